//! A verifier for analyzed modules.
//!
//! Checks the representation invariants the backend assumes:
//!
//! - labels are unique within a function and every branch target resolves;
//! - every register is defined before use in linear order, except the
//!   designated parameter entry registers;
//! - symbolic targets resolve to a module function, global or string, or to
//!   the owning function's locals and parameters;
//! - call arity matches the callee's parameter count for module-local
//!   callees;
//! - no SMC-enabled function has more than three parameters.
//!
//! The analyzer never hands the backend a module that fails these checks;
//! the verifier exists for tests and embedders.

use crate::ir::{Function, Module, Opcode, Target};
use cranelift_entity::EntityRef;
use rustc_hash::FxHashSet;
use thiserror::Error;

/// A verifier failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifierError {
    /// The same label is defined twice in one function.
    #[error("{func}: label {label} defined more than once")]
    DuplicateLabel {
        /// Function name.
        func: String,
        /// Offending label, rendered.
        label: String,
    },
    /// A branch targets a label that is never defined.
    #[error("{func}: jump to undefined label {label}")]
    UndefinedLabel {
        /// Function name.
        func: String,
        /// Offending label, rendered.
        label: String,
    },
    /// A register is read before any definition.
    #[error("{func}: instruction {index} reads {reg} before it is defined")]
    UseBeforeDef {
        /// Function name.
        func: String,
        /// Linear instruction index.
        index: usize,
        /// Offending register, rendered.
        reg: String,
    },
    /// An instruction names a symbol that exists nowhere.
    #[error("{func}: unknown symbol `{name}`")]
    UnknownSymbol {
        /// Function name.
        func: String,
        /// The unresolved name.
        name: String,
    },
    /// An instruction references a string label missing from the table.
    #[error("{func}: unknown string label `{label}`")]
    UnknownString {
        /// Function name.
        func: String,
        /// The unresolved label.
        label: String,
    },
    /// A call's argument count disagrees with the callee signature.
    #[error("{func}: call to {callee} passes {got} argument(s), expected {expected}")]
    CallArity {
        /// Calling function.
        func: String,
        /// Callee name.
        callee: String,
        /// Expected argument count.
        expected: usize,
        /// Actual argument count.
        got: usize,
    },
    /// An SMC-enabled function with more than three parameters.
    #[error("{func}: SMC enabled with {params} parameters")]
    SmcParamCount {
        /// Function name.
        func: String,
        /// Parameter count.
        params: usize,
    },
    /// A parameter-slot load outside the parameter table.
    #[error("{func}: parameter index {index} out of range")]
    ParamIndex {
        /// Function name.
        func: String,
        /// Offending parameter index.
        index: u8,
    },
}

/// Verify every function in `module`, stopping at the first failure.
pub fn verify_module(module: &Module) -> Result<(), VerifierError> {
    for func in &module.functions {
        verify_function(module, func)?;
    }
    Ok(())
}

fn verify_function(module: &Module, func: &Function) -> Result<(), VerifierError> {
    // Labels: unique definitions, resolvable targets.
    let mut defined = FxHashSet::default();
    for inst in &func.insts {
        if inst.opcode == Opcode::Label {
            if let Some(Target::Label(l)) = &inst.target {
                if !defined.insert(*l) {
                    return Err(VerifierError::DuplicateLabel {
                        func: func.name.clone(),
                        label: l.to_string(),
                    });
                }
            }
        }
    }
    for inst in &func.insts {
        if inst.opcode.is_branch() {
            if let Some(Target::Label(l)) = &inst.target {
                if !defined.contains(l) {
                    return Err(VerifierError::UndefinedLabel {
                        func: func.name.clone(),
                        label: l.to_string(),
                    });
                }
            }
        }
    }

    // Registers: parameters are pre-defined; everything else must be
    // written before it is read, in linear order.
    let mut written = vec![false; func.num_regs()];
    for param in &func.params {
        written[param.reg.index()] = true;
    }
    for (index, inst) in func.insts.iter().enumerate() {
        for r in inst.uses() {
            if !written[r.index()] {
                return Err(VerifierError::UseBeforeDef {
                    func: func.name.clone(),
                    index,
                    reg: r.to_string(),
                });
            }
        }
        if let Some(d) = inst.dest {
            written[d.index()] = true;
        }
    }

    // Symbolic targets.
    let locals: FxHashSet<&str> = func
        .locals
        .iter()
        .map(|l| l.name.as_str())
        .chain(func.params.iter().map(|p| p.name.as_str()))
        .collect();
    for inst in &func.insts {
        match &inst.target {
            Some(Target::Symbol(name)) => {
                let known = locals.contains(name.as_str())
                    || module.function(name).is_some()
                    || module.global(name).is_some()
                    || module.external(name).is_some();
                if !known {
                    return Err(VerifierError::UnknownSymbol {
                        func: func.name.clone(),
                        name: name.clone(),
                    });
                }
            }
            Some(Target::StringLit(label)) => {
                if module.strings.get(label).is_none() {
                    return Err(VerifierError::UnknownString {
                        func: func.name.clone(),
                        label: label.clone(),
                    });
                }
            }
            Some(Target::Param(i)) => {
                if usize::from(*i) >= func.params.len() {
                    return Err(VerifierError::ParamIndex {
                        func: func.name.clone(),
                        index: *i,
                    });
                }
            }
            _ => {}
        }
        if inst.opcode == Opcode::Call {
            if let Some(Target::Symbol(callee)) = &inst.target {
                let expected = module
                    .function(callee)
                    .map(|f| f.params.len())
                    .or_else(|| module.external(callee).map(|e| e.params.len()));
                if let Some(expected) = expected {
                    if expected != inst.args.len() {
                        return Err(VerifierError::CallArity {
                            func: func.name.clone(),
                            callee: callee.clone(),
                            expected,
                            got: inst.args.len(),
                        });
                    }
                }
            }
        }
    }

    // The SMC parameter rule.
    if func.flags.smc_enabled && func.params.len() > 3 {
        return Err(VerifierError::SmcParamCount {
            func: func.name.clone(),
            params: func.params.len(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Inst, Label, Type};

    #[test]
    fn accepts_a_straight_line_function() {
        let mut module = Module::new("t");
        let mut func = Function::new("f", Type::U8);
        let a = func.new_reg();
        func.emit(Inst::new(Opcode::LoadConst).dest(a).imm(1).ty(Type::U8));
        func.emit(Inst::new(Opcode::Return).src1(a));
        module.functions.push(func);
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn rejects_use_before_def() {
        let mut module = Module::new("t");
        let mut func = Function::new("f", Type::U8);
        let a = func.new_reg();
        func.emit(Inst::new(Opcode::Return).src1(a));
        module.functions.push(func);
        assert!(matches!(
            verify_module(&module),
            Err(VerifierError::UseBeforeDef { .. })
        ));
    }

    #[test]
    fn parameters_are_predefined() {
        let mut module = Module::new("t");
        let mut func = Function::new("f$u8", Type::U8);
        let p = func.add_param("x", Type::U8);
        func.emit(Inst::new(Opcode::Return).src1(p));
        module.functions.push(func);
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn rejects_undefined_and_duplicate_labels() {
        let mut module = Module::new("t");
        let mut func = Function::new("f", Type::Void);
        func.emit(Inst::new(Opcode::Jump).target(Target::Label(Label::from_u32(9))));
        func.emit(Inst::new(Opcode::Return));
        module.functions.push(func);
        assert!(matches!(
            verify_module(&module),
            Err(VerifierError::UndefinedLabel { .. })
        ));

        let mut module = Module::new("t");
        let mut func = Function::new("f", Type::Void);
        let l = Label::from_u32(0);
        func.emit(Inst::new(Opcode::Label).target(Target::Label(l)));
        func.emit(Inst::new(Opcode::Label).target(Target::Label(l)));
        func.emit(Inst::new(Opcode::Return));
        module.functions.push(func);
        assert!(matches!(
            verify_module(&module),
            Err(VerifierError::DuplicateLabel { .. })
        ));
    }

    #[test]
    fn rejects_smc_with_too_many_params() {
        let mut module = Module::new("t");
        let mut func = Function::new("f$u8$u8$u8$u8", Type::Void);
        for name in ["a", "b", "c", "d"] {
            func.add_param(name, Type::U8);
        }
        func.emit(Inst::new(Opcode::Return));
        module.functions.push(func);
        assert!(matches!(
            verify_module(&module),
            Err(VerifierError::SmcParamCount { .. })
        ));
    }

    #[test]
    fn rejects_call_arity_mismatch() {
        let mut module = Module::new("t");
        let mut callee = Function::new("g$u8", Type::Void);
        callee.add_param("x", Type::U8);
        callee.emit(Inst::new(Opcode::Return));
        module.functions.push(callee);

        let mut func = Function::new("f", Type::Void);
        let d = func.new_reg();
        func.emit(
            Inst::new(Opcode::Call)
                .dest(d)
                .target(Target::Symbol("g$u8".to_string())),
        );
        func.emit(Inst::new(Opcode::Return));
        module.functions.push(func);
        assert!(matches!(
            verify_module(&module),
            Err(VerifierError::CallArity { .. })
        ));
    }
}
