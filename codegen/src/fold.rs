//! A constant-folding pass.
//!
//! The pass runs module-wide: it first resolves constant-global
//! initializers, then walks every function's instruction stream in linear
//! order with a map of registers (and local variables) whose values are
//! known, rewriting foldable instructions into `LoadConst`. It makes no
//! attempt to prove liveness across jumps; the known-value map is reset at
//! every label, which is conservative but correct.
//!
//! The pass is idempotent: a second application finds nothing left to fold.

use crate::effects;
use crate::ir::{demangle, Function, GlobalInit, Inst, Module, Opcode, Reg, Target, Type};
use minz_ast::{BinOp, Expr, ExprKind, UnOp};
use rustc_hash::FxHashMap;

/// Run constant folding over the whole module.
pub fn fold_constants(module: &mut Module) {
    let consts = fold_global_initializers(module);
    for func in &mut module.functions {
        let folded = fold_function(func, &consts);
        if folded > 0 {
            log::debug!("fold: {} instruction(s) folded in {}", folded, func.name);
        }
    }
    sweep_unused_constants(module);
}

/// Resolve constant-global initializers, in source order, repeating until
/// no further initializer resolves (constants may reference constants).
/// Returns the map of known constant values.
fn fold_global_initializers(module: &mut Module) -> FxHashMap<String, i64> {
    let mut known: FxHashMap<String, i64> = FxHashMap::default();
    for g in &module.globals {
        if let GlobalInit::Const(v) = g.init {
            known.insert(g.name.clone(), v);
        }
    }
    loop {
        let mut progress = false;
        for g in &mut module.globals {
            if let GlobalInit::Expr(expr) = &g.init {
                if let Some(v) = eval_ast_expr(expr, &known) {
                    let v = wrap_to(&g.ty, v);
                    g.init = GlobalInit::Const(v);
                    known.insert(g.name.clone(), v);
                    progress = true;
                }
            }
        }
        if !progress {
            break;
        }
    }
    // Only constants participate in downstream folding; a mutable global's
    // initial value says nothing about its value at a given load.
    let const_names: FxHashMap<String, i64> = module
        .globals
        .iter()
        .filter(|g| g.constant)
        .filter_map(|g| match g.init {
            GlobalInit::Const(v) => Some((g.name.clone(), v)),
            _ => None,
        })
        .collect();
    const_names
}

/// Evaluate an initializer expression against the known-constant map.
fn eval_ast_expr(expr: &Expr, known: &FxHashMap<String, i64>) -> Option<i64> {
    match &expr.kind {
        ExprKind::IntLit(v) => Some(*v),
        ExprKind::BoolLit(b) => Some(i64::from(*b)),
        ExprKind::Ident(name) => known.get(name).copied(),
        ExprKind::Binary { op, lhs, rhs } => {
            let a = eval_ast_expr(lhs, known)?;
            let b = eval_ast_expr(rhs, known)?;
            eval_raw_binop(*op, a, b)
        }
        ExprKind::Unary { op, operand } => {
            let v = eval_ast_expr(operand, known)?;
            match op {
                UnOp::Neg => Some(-v),
                UnOp::Not => Some(i64::from(v == 0)),
                UnOp::BitNot => Some(!v),
                UnOp::AddrOf => None,
            }
        }
        ExprKind::Cast { value, .. } => eval_ast_expr(value, known),
        _ => None,
    }
}

fn eval_raw_binop(op: BinOp, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return None;
            }
            a.wrapping_div(b)
        }
        BinOp::Mod => {
            if b == 0 {
                return None;
            }
            a.wrapping_rem(b)
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a.wrapping_shl(b as u32),
        BinOp::Shr => a.wrapping_shr(b as u32),
        BinOp::Eq => i64::from(a == b),
        BinOp::Ne => i64::from(a != b),
        BinOp::Lt => i64::from(a < b),
        BinOp::Le => i64::from(a <= b),
        BinOp::Gt => i64::from(a > b),
        BinOp::Ge => i64::from(a >= b),
    })
}

/// Truncate `v` to the value range of `ty`, sign-extending signed kinds.
fn wrap_to(ty: &Type, v: i64) -> i64 {
    let bits = match ty {
        Type::U8 | Type::I8 => 8,
        Type::U16 | Type::I16 => 16,
        Type::U24 | Type::I24 => 24,
        Type::Bool => return i64::from(v != 0),
        _ => return v,
    };
    let mask = (1i64 << bits) - 1;
    let t = v & mask;
    if ty.is_signed() && t & (1 << (bits - 1)) != 0 {
        t | !mask
    } else {
        t
    }
}

/// Evaluate a typed IR binary operation with known operands.
///
/// Signed kinds use truncated division; unsigned kinds operate on the
/// masked unsigned value; booleans support `and`/`or`/`xor` only.
fn eval_binop(op: Opcode, a: i64, b: i64, ty: &Type) -> Option<i64> {
    // Comparisons carry their operand type for signedness; the result is
    // always bool.
    if op.is_comparison() {
        let r = if ty.is_signed() {
            compare(op, a, b)
        } else {
            compare(op, a as u64, b as u64)
        };
        return Some(i64::from(r));
    }
    if *ty == Type::Bool && !matches!(op, Opcode::And | Opcode::Or | Opcode::Xor) {
        return None;
    }
    let raw = if ty.is_signed() {
        match op {
            Opcode::Add => a.wrapping_add(b),
            Opcode::Sub => a.wrapping_sub(b),
            Opcode::Mul => a.wrapping_mul(b),
            Opcode::Div => {
                if b == 0 {
                    return None;
                }
                a.wrapping_div(b)
            }
            Opcode::Mod => {
                if b == 0 {
                    return None;
                }
                a.wrapping_rem(b)
            }
            Opcode::And => a & b,
            Opcode::Or => a | b,
            Opcode::Xor => a ^ b,
            Opcode::Shl => a.wrapping_shl(b as u32),
            Opcode::Shr => a.wrapping_shr(b as u32),
            _ => return None,
        }
    } else {
        let (ua, ub) = (a as u64, b as u64);
        let r = match op {
            Opcode::Add => ua.wrapping_add(ub),
            Opcode::Sub => ua.wrapping_sub(ub),
            Opcode::Mul => ua.wrapping_mul(ub),
            Opcode::Div => {
                if ub == 0 {
                    return None;
                }
                ua / ub
            }
            Opcode::Mod => {
                if ub == 0 {
                    return None;
                }
                ua % ub
            }
            Opcode::And => ua & ub,
            Opcode::Or => ua | ub,
            Opcode::Xor => ua ^ ub,
            Opcode::Shl => ua.wrapping_shl(ub as u32),
            Opcode::Shr => ua.wrapping_shr(ub as u32),
            _ => return None,
        };
        r as i64
    };
    Some(wrap_to(ty, raw))
}

fn compare<T: Ord>(op: Opcode, a: T, b: T) -> bool {
    match op {
        Opcode::Eq => a == b,
        Opcode::Ne => a != b,
        Opcode::Lt => a < b,
        Opcode::Le => a <= b,
        Opcode::Gt => a > b,
        Opcode::Ge => a >= b,
        _ => unreachable!(),
    }
}

/// Evaluate a pure built-in call with known arguments.
fn eval_pure_call(base: &str, args: &[i64]) -> Option<i64> {
    match (base, args) {
        ("add", [a, b]) => Some(a.wrapping_add(*b)),
        ("sub", [a, b]) => Some(a.wrapping_sub(*b)),
        ("mul", [a, b]) => Some(a.wrapping_mul(*b)),
        ("abs", [a]) => Some(a.wrapping_abs()),
        ("min", [a, b]) => Some(*a.min(b)),
        ("max", [a, b]) => Some(*a.max(b)),
        ("sqrt", [a]) if *a >= 0 => Some(isqrt(*a)),
        _ => None,
    }
}

fn isqrt(v: i64) -> i64 {
    let mut x = v;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + v / x) / 2;
    }
    x
}

fn is_foldable_binop(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
    ) || op.is_comparison()
}

/// Fold one function; returns the number of rewritten instructions.
fn fold_function(func: &mut Function, consts: &FxHashMap<String, i64>) -> usize {
    let local_names: Vec<String> = func.locals.iter().map(|l| l.name.clone()).collect();
    let mut known_regs: FxHashMap<Reg, i64> = FxHashMap::default();
    let mut known_vars: FxHashMap<String, i64> = FxHashMap::default();
    let mut folded = 0;

    for inst in &mut func.insts {
        match inst.opcode {
            // A label is a potential merge point; everything is unknown.
            Opcode::Label => {
                known_regs.clear();
                known_vars.clear();
            }
            Opcode::LoadConst => {
                if let (Some(dest), Some(v)) = (inst.dest, inst.imm) {
                    known_regs.insert(dest, v);
                }
            }
            Opcode::LoadVar => {
                let value = match &inst.target {
                    // A local shadows any like-named constant global.
                    Some(Target::Symbol(name)) if local_names.iter().any(|n| n == name) => {
                        known_vars.get(name).copied()
                    }
                    Some(Target::Symbol(name)) => consts.get(name).copied(),
                    _ => None,
                };
                match (inst.dest, value) {
                    (Some(dest), Some(v)) => {
                        let name = match &inst.target {
                            Some(Target::Symbol(n)) => n.clone(),
                            _ => String::new(),
                        };
                        let mut repl = Inst::new(Opcode::LoadConst)
                            .dest(dest)
                            .imm(v)
                            .comment(format!("folded load of {name}"));
                        repl.ty = inst.ty.clone();
                        *inst = repl;
                        known_regs.insert(dest, v);
                        folded += 1;
                    }
                    (Some(dest), None) => {
                        known_regs.remove(&dest);
                    }
                    _ => {}
                }
            }
            Opcode::StoreVar => {
                if let Some(Target::Symbol(name)) = &inst.target {
                    if local_names.iter().any(|n| n == name) {
                        match inst.src1.and_then(|r| known_regs.get(&r).copied()) {
                            Some(v) => {
                                known_vars.insert(name.clone(), v);
                            }
                            None => {
                                known_vars.remove(name);
                            }
                        }
                    }
                }
            }
            op if is_foldable_binop(op) => {
                let operands = match (inst.src1, inst.src2) {
                    (Some(a), Some(b)) => known_regs
                        .get(&a)
                        .copied()
                        .zip(known_regs.get(&b).copied()),
                    _ => None,
                };
                let value = operands.and_then(|(a, b)| {
                    let ty = inst.ty.as_ref()?;
                    eval_binop(op, a, b, ty)
                });
                match (inst.dest, value) {
                    (Some(dest), Some(v)) => {
                        let (a, b) = operands.expect("operands known");
                        let mut repl = Inst::new(Opcode::LoadConst)
                            .dest(dest)
                            .imm(v)
                            .comment(format!("folded {a} {op} {b}"));
                        repl.ty = inst.ty.clone();
                        *inst = repl;
                        known_regs.insert(dest, v);
                        folded += 1;
                    }
                    (Some(dest), None) => {
                        known_regs.remove(&dest);
                    }
                    _ => {}
                }
            }
            Opcode::Neg | Opcode::Not | Opcode::BitNot => {
                let value = inst
                    .src1
                    .and_then(|r| known_regs.get(&r).copied())
                    .and_then(|v| {
                        let ty = inst.ty.as_ref()?;
                        let raw = match inst.opcode {
                            Opcode::Neg => v.wrapping_neg(),
                            Opcode::Not => i64::from(v == 0),
                            Opcode::BitNot => !v,
                            _ => unreachable!(),
                        };
                        Some(wrap_to(ty, raw))
                    });
                match (inst.dest, value) {
                    (Some(dest), Some(v)) => {
                        let mut repl = Inst::new(Opcode::LoadConst)
                            .dest(dest)
                            .imm(v)
                            .comment(format!("folded {}", inst.opcode));
                        repl.ty = inst.ty.clone();
                        *inst = repl;
                        known_regs.insert(dest, v);
                        folded += 1;
                    }
                    (Some(dest), None) => {
                        known_regs.remove(&dest);
                    }
                    _ => {}
                }
            }
            Opcode::Call => {
                let folded_call = try_fold_pure_call(inst, &known_regs);
                match (inst.dest, folded_call) {
                    (Some(dest), Some(v)) => {
                        let mut repl = Inst::new(Opcode::LoadConst)
                            .dest(dest)
                            .imm(v)
                            .comment("folded pure call");
                        repl.ty = inst.ty.clone();
                        *inst = repl;
                        known_regs.insert(dest, v);
                        folded += 1;
                    }
                    (Some(dest), None) => {
                        known_regs.remove(&dest);
                    }
                    _ => {}
                }
            }
            // Inline assembly may clobber anything.
            Opcode::Asm => {
                known_regs.clear();
                known_vars.clear();
            }
            _ => {
                if let Some(dest) = inst.dest {
                    known_regs.remove(&dest);
                }
                // DJNZ decrements its counter register in place.
                if inst.opcode == Opcode::Djnz {
                    if let Some(counter) = inst.src1 {
                        known_regs.remove(&counter);
                    }
                }
            }
        }
    }
    folded
}

fn try_fold_pure_call(inst: &Inst, known: &FxHashMap<Reg, i64>) -> Option<i64> {
    let Some(Target::Symbol(name)) = &inst.target else {
        return None;
    };
    let base = demangle(name);
    if !effects::known_pure(base) {
        return None;
    }
    let args: Option<Vec<i64>> = inst.args.iter().map(|r| known.get(r).copied()).collect();
    let v = eval_pure_call(base, &args?)?;
    Some(match &inst.ty {
        Some(ty) => wrap_to(ty, v),
        None => v,
    })
}

/// Drop constant globals nothing refers to any more.
fn sweep_unused_constants(module: &mut Module) {
    let mut used: rustc_hash::FxHashSet<String> = rustc_hash::FxHashSet::default();
    for func in &module.functions {
        for inst in &func.insts {
            if let Some(Target::Symbol(name)) = &inst.target {
                used.insert(name.clone());
            }
        }
    }
    for g in &module.globals {
        if let GlobalInit::Expr(expr) = &g.init {
            collect_idents(expr, &mut used);
        }
    }
    let before = module.globals.len();
    module
        .globals
        .retain(|g| !g.constant || g.exported || used.contains(&g.name));
    let dropped = before - module.globals.len();
    if dropped > 0 {
        log::debug!("fold: dropped {dropped} unused constant global(s)");
    }
}

fn collect_idents(expr: &Expr, out: &mut rustc_hash::FxHashSet<String>) {
    match &expr.kind {
        ExprKind::Ident(name) => {
            out.insert(name.clone());
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_idents(lhs, out);
            collect_idents(rhs, out);
        }
        ExprKind::Unary { operand, .. } => collect_idents(operand, out),
        ExprKind::Cast { value, .. } => collect_idents(value, out),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Function;

    fn folded_body(func: &Function) -> Vec<String> {
        func.insts.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn folds_linear_arithmetic() {
        let mut module = Module::new("t");
        let mut func = Function::new("main", Type::U16);
        let a = func.new_reg();
        let b = func.new_reg();
        let c = func.new_reg();
        func.emit(Inst::new(Opcode::LoadConst).dest(a).imm(10).ty(Type::U16));
        func.emit(Inst::new(Opcode::LoadConst).dest(b).imm(20).ty(Type::U16));
        func.emit(
            Inst::new(Opcode::Add)
                .dest(c)
                .src1(a)
                .src2(b)
                .ty(Type::U16),
        );
        func.emit(Inst::new(Opcode::Return).src1(c));
        module.functions.push(func);

        fold_constants(&mut module);
        let f = &module.functions[0];
        assert_eq!(f.insts[2].opcode, Opcode::LoadConst);
        assert_eq!(f.insts[2].imm, Some(30));

        // Idempotence: a second run changes nothing.
        let snapshot = folded_body(f);
        fold_constants(&mut module);
        assert_eq!(folded_body(&module.functions[0]), snapshot);
    }

    #[test]
    fn unsigned_wrapping_and_signed_division() {
        assert_eq!(eval_binop(Opcode::Add, 250, 10, &Type::U8), Some(4));
        assert_eq!(eval_binop(Opcode::Div, -7, 2, &Type::I8), Some(-3));
        assert_eq!(eval_binop(Opcode::Mod, -7, 2, &Type::I8), Some(-1));
        assert_eq!(eval_binop(Opcode::Div, 7, 0, &Type::U8), None);
        assert_eq!(eval_binop(Opcode::Sub, 0, 1, &Type::U16), Some(65535));
    }

    #[test]
    fn bool_supports_logic_only() {
        assert_eq!(eval_binop(Opcode::And, 1, 0, &Type::Bool), Some(0));
        assert_eq!(eval_binop(Opcode::Or, 1, 0, &Type::Bool), Some(1));
        assert_eq!(eval_binop(Opcode::Xor, 1, 1, &Type::Bool), Some(0));
        assert_eq!(eval_binop(Opcode::Add, 1, 1, &Type::Bool), None);
    }

    #[test]
    fn label_resets_known_values() {
        let mut module = Module::new("t");
        let mut func = Function::new("f", Type::U8);
        let a = func.new_reg();
        let b = func.new_reg();
        func.emit(Inst::new(Opcode::LoadConst).dest(a).imm(1).ty(Type::U8));
        func.emit(
            Inst::new(Opcode::Label)
                .target(Target::Label(crate::ir::Label::from_u32(0))),
        );
        // `a` may have been redefined on another path into the label.
        func.emit(
            Inst::new(Opcode::Add)
                .dest(b)
                .src1(a)
                .src2(a)
                .ty(Type::U8),
        );
        func.emit(Inst::new(Opcode::Return).src1(b));
        module.functions.push(func);

        fold_constants(&mut module);
        assert_eq!(module.functions[0].insts[2].opcode, Opcode::Add);
    }

    #[test]
    fn folds_pure_calls() {
        let mut module = Module::new("t");
        let mut func = Function::new("f", Type::U8);
        let a = func.new_reg();
        let b = func.new_reg();
        let c = func.new_reg();
        func.emit(Inst::new(Opcode::LoadConst).dest(a).imm(3).ty(Type::U8));
        func.emit(Inst::new(Opcode::LoadConst).dest(b).imm(4).ty(Type::U8));
        func.emit(
            Inst::new(Opcode::Call)
                .dest(c)
                .target(Target::Symbol("add$u8$u8".to_string()))
                .args([a, b])
                .ty(Type::U8),
        );
        func.emit(Inst::new(Opcode::Return).src1(c));
        module.functions.push(func);

        fold_constants(&mut module);
        let f = &module.functions[0];
        assert_eq!(f.insts[2].opcode, Opcode::LoadConst);
        assert_eq!(f.insts[2].imm, Some(7));
    }

    #[test]
    fn unused_constant_globals_are_dropped() {
        let mut module = Module::new("t");
        module.globals.push(crate::ir::Global {
            name: "K".to_string(),
            ty: Type::U16,
            init: GlobalInit::Const(10),
            exported: false,
            constant: true,
        });
        module.globals.push(crate::ir::Global {
            name: "KEPT".to_string(),
            ty: Type::U16,
            init: GlobalInit::Const(1),
            exported: true,
            constant: true,
        });
        fold_constants(&mut module);
        assert!(module.global("K").is_none());
        assert!(module.global("KEPT").is_some());
    }
}
