//! Intermediate representation of a function.
//!
//! The `Function` struct owns its parameter and local tables and its
//! instruction stream. Virtual registers are minted from a per-function
//! counter; parameters receive the first registers, which are the only
//! registers that may be read before being defined in the stream.

use super::{Inst, Opcode, Reg, Type};
use crate::callconv::CallConv;
use core::fmt;
use cranelift_entity::EntityRef;
use rustc_hash::FxHashMap;

/// A formal parameter.
#[derive(Clone, PartialEq, Debug)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Parameter type.
    pub ty: Type,
    /// Pre-assigned entry register.
    pub reg: Reg,
}

/// A function-local variable.
#[derive(Clone, PartialEq, Debug)]
pub struct Local {
    /// Variable name.
    pub name: String,
    /// Variable type.
    pub ty: Type,
    /// Register holding the variable.
    pub reg: Reg,
}

/// Calling-convention facts discovered during analysis.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct FunctionFlags {
    /// The function had no `@abi` attribute and started as an SMC
    /// candidate.
    pub smc_default: bool,
    /// SMC parameter patching is in effect after finalization.
    pub smc_enabled: bool,
    /// The function calls itself.
    pub recursive: bool,
    /// The function needs the caller's context pointer (interrupt handlers,
    /// shadow-set callees).
    pub requires_context: bool,
}

/// An SMC parameter patch site: the byte range inside the function body
/// that the caller overwrites with an argument.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SmcSlot {
    /// Byte offset of the load instruction from the function entry.
    pub offset: u16,
    /// Total size of the load instruction in bytes: 2 for one-byte
    /// parameters (`LD r, n`), 3 for two-byte parameters (`LD rr, nn`).
    pub size: u8,
}

/// A function in MinZ IR.
#[derive(Clone, PartialEq, Debug)]
pub struct Function {
    /// Mangled name; unique within the module.
    pub name: String,
    /// Parameters in declaration order.
    pub params: Vec<Param>,
    /// Locals in declaration order.
    pub locals: Vec<Local>,
    /// The instruction stream.
    pub insts: Vec<Inst>,
    /// Return type.
    pub return_type: Type,
    /// Calling convention.
    pub call_conv: CallConv,
    /// Convention facts.
    pub flags: FunctionFlags,
    /// SMC patch sites, parallel to `params`. Empty until
    /// [`assign_smc_slots`](Self::assign_smc_slots) runs.
    pub smc_slots: Vec<SmcSlot>,
    /// Free-form metadata consumed by the backend, e.g. the
    /// `register_mappings` string of the `register_mapped` convention.
    pub metadata: FxHashMap<String, String>,
    next_reg: u32,
}

impl Function {
    /// Create an empty function with the given mangled name and return
    /// type. New functions default to the SMC candidate state.
    pub fn new(name: impl Into<String>, return_type: Type) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            locals: Vec::new(),
            insts: Vec::new(),
            return_type,
            call_conv: CallConv::Smc,
            flags: FunctionFlags {
                smc_default: true,
                smc_enabled: true,
                ..FunctionFlags::default()
            },
            smc_slots: Vec::new(),
            metadata: FxHashMap::default(),
            next_reg: 0,
        }
    }

    /// Mint a fresh virtual register.
    pub fn new_reg(&mut self) -> Reg {
        let r = Reg::new(self.next_reg as usize);
        self.next_reg += 1;
        r
    }

    /// Number of virtual registers minted so far.
    pub fn num_regs(&self) -> usize {
        self.next_reg as usize
    }

    /// Append a parameter, assigning it the next register. Parameters must
    /// be added before any other register is minted so that they occupy the
    /// designated entry registers.
    pub fn add_param(&mut self, name: impl Into<String>, ty: Type) -> Reg {
        debug_assert_eq!(self.next_reg as usize, self.params.len());
        let reg = self.new_reg();
        self.params.push(Param {
            name: name.into(),
            ty,
            reg,
        });
        reg
    }

    /// Append a local, assigning it a fresh register.
    pub fn add_local(&mut self, name: impl Into<String>, ty: Type) -> Reg {
        let reg = self.new_reg();
        self.locals.push(Local {
            name: name.into(),
            ty,
            reg,
        });
        reg
    }

    /// Append an instruction.
    pub fn emit(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    /// Look up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Look up a parameter's index by name.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    /// Does the instruction stream end in a return?
    pub fn ends_with_return(&self) -> bool {
        matches!(
            self.insts.last(),
            Some(inst) if inst.opcode == Opcode::Return
        )
    }

    /// Assign SMC patch sites to every parameter.
    ///
    /// The first slot starts at byte offset 1, skipping the opcode byte of
    /// the first load; each slot covers the whole load instruction: 2 bytes
    /// for one-byte parameters, 3 bytes for two-byte (and wider) ones.
    pub fn assign_smc_slots(&mut self) {
        self.smc_slots.clear();
        let mut offset: u16 = 1;
        for param in &self.params {
            let size: u8 = if param.ty.size() <= 1 { 2 } else { 3 };
            self.smc_slots.push(SmcSlot { offset, size });
            offset += u16::from(size);
        }
    }

    /// The byte offset just past the last SMC patch site.
    pub fn smc_patch_end(&self) -> u16 {
        self.smc_slots
            .last()
            .map_or(1, |slot| slot.offset + u16::from(slot.size))
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "fn {}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {} [{}]", p.name, p.ty, p.reg)?;
        }
        writeln!(f, ") -> {} ; {}", self.return_type, self.call_conv)?;
        for local in &self.locals {
            writeln!(f, "  local {}: {} [{}]", local.name, local.ty, local.reg)?;
        }
        for inst in &self.insts {
            writeln!(f, "{inst}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_registers_come_first() {
        let mut func = Function::new("f$u8$u16", Type::Void);
        let a = func.add_param("a", Type::U8);
        let b = func.add_param("b", Type::U16);
        let tmp = func.new_reg();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(tmp.index(), 2);
        assert_eq!(func.num_regs(), 3);
    }

    #[test]
    fn smc_slot_layout() {
        let mut func = Function::new("draw$u8$u16$u8", Type::Void);
        func.add_param("x", Type::U8);
        func.add_param("addr", Type::U16);
        func.add_param("mask", Type::U8);
        func.assign_smc_slots();

        assert_eq!(
            func.smc_slots,
            vec![
                SmcSlot { offset: 1, size: 2 },
                SmcSlot { offset: 3, size: 3 },
                SmcSlot { offset: 6, size: 2 },
            ]
        );
        // The slot bytes tile the range exactly.
        let total: u16 = func.smc_slots.iter().map(|s| u16::from(s.size)).sum();
        assert_eq!(total, func.smc_patch_end() - 1);
    }

    #[test]
    fn trailing_return_detection() {
        let mut func = Function::new("main", Type::Void);
        assert!(!func.ends_with_return());
        func.emit(Inst::new(Opcode::Return));
        assert!(func.ends_with_return());
    }
}
