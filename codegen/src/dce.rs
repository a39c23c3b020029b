//! A dead-code elimination pass.
//!
//! Dead code here means instructions that have no side effects and whose
//! result register is never read, plus everything sitting between an
//! unconditional transfer and the next label. The pass runs four phases per
//! function: a forward reachability scan, a backward liveness scan, the
//! removal itself, and a sweep of locals and globals nothing refers to.
//!
//! Calls are classified against a side-effect database seeded from known
//! built-ins and from an analysis of every function body in the module; an
//! unknown callee is assumed to have effects.
//!
//! The pass is idempotent on its own output.

use crate::effects;
use crate::ir::{demangle, Function, Module, Opcode, Target};
use cranelift_entity::EntityRef;
use rustc_hash::{FxHashMap, FxHashSet};

/// Run dead-code elimination over the whole module.
pub fn eliminate_dead_code(module: &mut Module) {
    let effect_db = build_effect_db(module);
    for func in &mut module.functions {
        let removed = eliminate_in_function(func, &effect_db);
        if removed > 0 {
            log::debug!("dce: removed {} instruction(s) from {}", removed, func.name);
        }
        sweep_locals(func);
    }
    sweep_globals(module);
}

/// Does a call to `name` have observable effects, as far as we know?
fn call_has_effects(name: &str, db: &FxHashMap<String, bool>) -> bool {
    if let Some(&e) = db.get(name) {
        return e;
    }
    let base = demangle(name);
    if effects::known_pure(base) {
        return false;
    }
    // Unknown callees are assumed effectful.
    true
}

/// Compute per-function side effects to fixpoint over the call graph.
///
/// A function is side-effecting if any instruction stores, branches, is
/// inline assembly, or calls a side-effecting function.
fn build_effect_db(module: &Module) -> FxHashMap<String, bool> {
    let mut db: FxHashMap<String, bool> = FxHashMap::default();
    for func in &module.functions {
        db.insert(func.name.clone(), false);
    }
    loop {
        let mut changed = false;
        for func in &module.functions {
            if db[&func.name] {
                continue;
            }
            let effectful = func.insts.iter().any(|inst| {
                inst.opcode.is_store()
                    || inst.opcode.is_branch()
                    || inst.opcode == Opcode::Asm
                    || (inst.opcode == Opcode::Call
                        && match &inst.target {
                            Some(Target::Symbol(callee)) => call_has_effects(callee, &db),
                            _ => true,
                        })
            });
            if effectful {
                db.insert(func.name.clone(), true);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    db
}

/// Phase 1: forward reachability. Everything defaults to reachable; code
/// after an unconditional jump or return is unreachable until the next
/// label.
fn reachability(func: &Function) -> Vec<bool> {
    let mut reachable = vec![true; func.insts.len()];
    let mut live = true;
    for (i, inst) in func.insts.iter().enumerate() {
        if inst.opcode == Opcode::Label {
            live = true;
        }
        reachable[i] = live;
        if inst.opcode.is_terminator() {
            live = false;
        }
    }
    reachable
}

/// Phases 2 and 3: backward liveness over the reachable instructions, then
/// removal. Returns the number of removed instructions.
///
/// The backward scan runs to fixpoint: a loop back edge makes a register's
/// use appear before its redefinition in linear order, so keeping the
/// defining instruction can take a second round. Keeping is monotone, so
/// the loop terminates.
fn eliminate_in_function(func: &mut Function, effect_db: &FxHashMap<String, bool>) -> usize {
    let reachable = reachability(func);
    let local_names: FxHashSet<&str> = func.locals.iter().map(|l| l.name.as_str()).collect();

    let mut used = vec![false; func.num_regs()];
    let mut read_locals: FxHashSet<String> = FxHashSet::default();
    let mut keep = vec![false; func.insts.len()];

    loop {
        let mut changed = false;
        for (i, inst) in func.insts.iter().enumerate().rev() {
            if !reachable[i] || keep[i] {
                continue;
            }
            let kept = match inst.opcode {
                // A store to a local nothing reads is dead; stores to
                // globals or through pointers are not ours to judge.
                Opcode::StoreVar => match &inst.target {
                    Some(Target::Symbol(name)) if local_names.contains(name.as_str()) => {
                        read_locals.contains(name.as_str())
                    }
                    _ => true,
                },
                Opcode::Call => {
                    let effectful = match &inst.target {
                        Some(Target::Symbol(callee)) => call_has_effects(callee, effect_db),
                        _ => true,
                    };
                    effectful || inst.dest.is_some_and(|d| used[d.index()])
                }
                op if !op.is_removable_def() => true,
                _ => match inst.dest {
                    Some(dest) => used[dest.index()],
                    // No destination and no side effects: nothing to keep.
                    None => false,
                },
            };
            if kept {
                keep[i] = true;
                changed = true;
                for r in inst.uses() {
                    used[r.index()] = true;
                }
                // Any live reference other than a plain store counts as a
                // read; in particular a taken address (`LoadLabel`) makes
                // stores to the local observable.
                if inst.opcode != Opcode::StoreVar {
                    if let Some(Target::Symbol(name)) = &inst.target {
                        if local_names.contains(name.as_str()) {
                            read_locals.insert(name.clone());
                        }
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    let before = func.insts.len();
    let mut index = 0;
    func.insts.retain(|_| {
        let k = keep[index];
        index += 1;
        k
    });
    before - func.insts.len()
}

/// Phase 4a: drop locals no surviving instruction refers to.
fn sweep_locals(func: &mut Function) {
    let mut referenced: FxHashSet<&str> = FxHashSet::default();
    let mut used_regs = vec![false; func.num_regs()];
    for inst in &func.insts {
        if let Some(Target::Symbol(name)) = &inst.target {
            referenced.insert(name.as_str());
        }
        for r in inst.uses().chain(inst.dest) {
            used_regs[r.index()] = true;
        }
    }
    let referenced: FxHashSet<String> = referenced.iter().map(|s| s.to_string()).collect();
    func.locals
        .retain(|l| referenced.contains(&l.name) || used_regs[l.reg.index()]);
}

/// Phase 4b: drop globals that are never read or written anywhere in the
/// module and are not exported.
fn sweep_globals(module: &mut Module) {
    let mut referenced: FxHashSet<String> = FxHashSet::default();
    for func in &module.functions {
        for inst in &func.insts {
            if let Some(Target::Symbol(name)) = &inst.target {
                referenced.insert(name.clone());
            }
        }
    }
    let before = module.globals.len();
    module
        .globals
        .retain(|g| g.exported || referenced.contains(&g.name));
    let dropped = before - module.globals.len();
    if dropped > 0 {
        log::debug!("dce: dropped {dropped} unused global(s)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Inst, Label, Type};

    #[test]
    fn unreachable_code_after_return_is_removed() {
        let mut module = Module::new("t");
        let mut func = Function::new("f", Type::U8);
        let a = func.new_reg();
        func.emit(Inst::new(Opcode::LoadConst).dest(a).imm(1).ty(Type::U8));
        func.emit(Inst::new(Opcode::Return).src1(a));
        let b = func.new_reg();
        func.emit(Inst::new(Opcode::LoadConst).dest(b).imm(2).ty(Type::U8));
        module.functions.push(func);

        eliminate_dead_code(&mut module);
        assert_eq!(module.functions[0].insts.len(), 2);
    }

    #[test]
    fn label_restores_reachability() {
        let mut module = Module::new("t");
        let mut func = Function::new("f", Type::Void);
        let l = Label::from_u32(0);
        func.emit(Inst::new(Opcode::Jump).target(Target::Label(l)));
        func.emit(Inst::new(Opcode::Label).target(Target::Label(l)));
        func.emit(Inst::new(Opcode::Return));
        module.functions.push(func);

        eliminate_dead_code(&mut module);
        assert_eq!(module.functions[0].insts.len(), 3);
    }

    #[test]
    fn dead_defs_and_their_inputs_are_removed() {
        let mut module = Module::new("t");
        let mut func = Function::new("f", Type::U8);
        let a = func.new_reg();
        let b = func.new_reg();
        let c = func.new_reg();
        func.emit(Inst::new(Opcode::LoadConst).dest(a).imm(1).ty(Type::U8));
        func.emit(Inst::new(Opcode::LoadConst).dest(b).imm(2).ty(Type::U8));
        // Dead: c is never read.
        func.emit(Inst::new(Opcode::Add).dest(c).src1(a).src2(b).ty(Type::U8));
        func.emit(Inst::new(Opcode::Return).src1(a));
        module.functions.push(func);

        eliminate_dead_code(&mut module);
        let insts = &module.functions[0].insts;
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[0].dest, Some(a));
        assert_eq!(insts[1].opcode, Opcode::Return);
    }

    #[test]
    fn stores_to_unread_locals_die_with_their_values() {
        let mut module = Module::new("t");
        let mut func = Function::new("f", Type::Void);
        let v = func.add_local("scratch", Type::U8);
        let a = func.new_reg();
        func.emit(Inst::new(Opcode::LoadConst).dest(a).imm(9).ty(Type::U8));
        func.emit(
            Inst::new(Opcode::StoreVar)
                .src1(a)
                .target(Target::Symbol("scratch".to_string()))
                .ty(Type::U8),
        );
        func.emit(Inst::new(Opcode::Return));
        module.functions.push(func);
        let _ = v;

        eliminate_dead_code(&mut module);
        let f = &module.functions[0];
        assert_eq!(f.insts.len(), 1);
        assert_eq!(f.insts[0].opcode, Opcode::Return);
        assert!(f.locals.is_empty());
    }

    #[test]
    fn calls_to_effectful_functions_survive() {
        let mut module = Module::new("t");
        let mut func = Function::new("f", Type::Void);
        let a = func.new_reg();
        let d = func.new_reg();
        func.emit(Inst::new(Opcode::LoadConst).dest(a).imm(65).ty(Type::U8));
        func.emit(
            Inst::new(Opcode::Call)
                .dest(d)
                .target(Target::Symbol("print_u8".to_string()))
                .args([a])
                .ty(Type::Void),
        );
        func.emit(Inst::new(Opcode::Return));
        module.functions.push(func);

        eliminate_dead_code(&mut module);
        assert_eq!(module.functions[0].insts.len(), 3);
    }

    #[test]
    fn unused_pure_calls_are_removed() {
        let mut module = Module::new("t");
        let mut func = Function::new("f", Type::Void);
        let a = func.new_reg();
        let d = func.new_reg();
        func.emit(Inst::new(Opcode::LoadConst).dest(a).imm(65).ty(Type::U8));
        func.emit(
            Inst::new(Opcode::Call)
                .dest(d)
                .target(Target::Symbol("abs$i8".to_string()))
                .args([a])
                .ty(Type::I8),
        );
        func.emit(Inst::new(Opcode::Return));
        module.functions.push(func);

        eliminate_dead_code(&mut module);
        assert_eq!(module.functions[0].insts.len(), 1);
    }

    #[test]
    fn idempotent() {
        let mut module = Module::new("t");
        let mut func = Function::new("f", Type::U8);
        let a = func.new_reg();
        let b = func.new_reg();
        let c = func.new_reg();
        func.emit(Inst::new(Opcode::LoadConst).dest(a).imm(1).ty(Type::U8));
        func.emit(Inst::new(Opcode::LoadConst).dest(b).imm(2).ty(Type::U8));
        func.emit(Inst::new(Opcode::Add).dest(c).src1(a).src2(b).ty(Type::U8));
        func.emit(Inst::new(Opcode::Return).src1(c));
        module.functions.push(func);

        eliminate_dead_code(&mut module);
        let snapshot: Vec<String> = module.functions[0]
            .insts
            .iter()
            .map(|i| i.to_string())
            .collect();
        eliminate_dead_code(&mut module);
        let again: Vec<String> = module.functions[0]
            .insts
            .iter()
            .map(|i| i.to_string())
            .collect();
        assert_eq!(snapshot, again);
    }

    #[test]
    fn effect_db_propagates_through_the_call_graph() {
        let mut module = Module::new("t");
        let mut inner = Function::new("inner", Type::Void);
        let a = inner.new_reg();
        let d = inner.new_reg();
        inner.emit(Inst::new(Opcode::LoadConst).dest(a).imm(1).ty(Type::U8));
        inner.emit(
            Inst::new(Opcode::Call)
                .dest(d)
                .target(Target::Symbol("print_u8".to_string()))
                .args([a]),
        );
        inner.emit(Inst::new(Opcode::Return));
        module.functions.push(inner);

        let mut outer = Function::new("outer", Type::Void);
        let d = outer.new_reg();
        outer.emit(
            Inst::new(Opcode::Call)
                .dest(d)
                .target(Target::Symbol("inner".to_string())),
        );
        outer.emit(Inst::new(Opcode::Return));
        module.functions.push(outer);

        let db = build_effect_db(&module);
        assert_eq!(db["inner"], true);
        assert_eq!(db["outer"], true);
    }
}
