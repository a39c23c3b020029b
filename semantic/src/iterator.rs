//! Iterator-chain fusion.
//!
//! A chain of operators lowers to a single loop over the source array; no
//! intermediate collection is materialized except by `collect`. Strategy
//! selection is static: a known length of at most 255 takes the DJNZ fast
//! path (one 8-bit counter in B, the element pointer in HL, no index and
//! no end-of-array compare); anything longer takes the indexed path with
//! an explicit counter and compare.
//!
//! Each operator contributes fixed pre-loop and per-iteration fragments,
//! assembled in chain order; `skip(n)` and `take(n)` with literal counts
//! fold into the loop count and the starting pointer before loop entry.

use crate::analyzer::Analyzer;
use crate::lower::{flatten_name, RValue};
use crate::scopes::{FuncId, Symbol, VarSymbol};
use minz_ast::{Expr, ExprKind, IterMethod, IterOp, LoopMode, Pos, Stmt};
use minz_codegen::ir::{Inst, Label, Opcode, Reg, RegHint, Target, Type};

/// Longest array the DJNZ strategy can drive: one 8-bit counter.
const DJNZ_MAX: i64 = 255;

/// A normalized per-iteration step.
enum Step {
    Map(FuncId),
    Filter(FuncId),
    TakeWhile(FuncId),
    SkipWhile(FuncId),
    Peek(FuncId),
    ForEach(FuncId),
    Collect,
    Reduce(FuncId),
}

/// The chain after validation and constant folding of skip/take.
struct Plan {
    steps: Vec<Step>,
    /// Element type after each step boundary; `elem_at[i]` feeds step i.
    elem_at: Vec<Type>,
    skip: i64,
    take: Option<i64>,
    enumerate: bool,
    /// Terminal shape of the chain.
    terminal: Terminal,
    /// Accumulator initializer for reduce.
    reduce_init: Option<Expr>,
    reduce_ty: Option<Type>,
    has_filter: bool,
}

#[derive(PartialEq)]
enum Terminal {
    ForEach,
    Collect,
    Reduce,
}

impl Analyzer<'_> {
    /// Lower a full iterator-chain expression.
    pub(crate) fn lower_iter_chain(
        &mut self,
        source: &Expr,
        ops: &[IterOp],
        pos: Pos,
    ) -> Option<RValue> {
        // `chain` concatenates: lower both halves in sequence, the
        // operators after the chain applying to each half.
        if let Some(split) = ops.iter().position(|op| op.method == IterMethod::Chain) {
            let chain_op = &ops[split];
            let [second] = chain_op.args.as_slice() else {
                self.errors
                    .report(chain_op.pos, "chain needs a second array argument");
                return None;
            };
            let mut first_ops: Vec<IterOp> = ops[..split].to_vec();
            first_ops.extend_from_slice(&ops[split + 1..]);
            let second_ops: Vec<IterOp> = ops[split + 1..].to_vec();
            if second_ops
                .iter()
                .any(|op| matches!(op.method, IterMethod::Collect | IterMethod::Reduce))
            {
                self.errors.report(
                    chain_op.pos,
                    "not yet implemented: collect or reduce across a chain",
                );
                return None;
            }
            let first_elem = self.source_element_type(source, pos)?;
            let second_elem = self.source_element_type(second, chain_op.pos)?;
            if first_elem != second_elem {
                self.errors.report(
                    chain_op.pos,
                    format!(
                        "chained arrays have different element types: {first_elem} vs {second_elem}"
                    ),
                );
                return None;
            }
            self.lower_fused(source, &first_ops, pos)?;
            return self.lower_fused(second, &second_ops, chain_op.pos);
        }
        self.lower_fused(source, ops, pos)
    }

    fn source_element_type(&mut self, source: &Expr, pos: Pos) -> Option<Type> {
        match self.infer_expr_type(source) {
            Some(Type::Array { elem, .. }) => Some(*elem),
            Some(other) => {
                self.errors
                    .report(pos, format!("cannot iterate a value of type {other}"));
                None
            }
            None => {
                self.errors.report(pos, "cannot iterate this expression");
                None
            }
        }
    }

    /// Resolve the source array to (base address register, element type,
    /// static length).
    fn lower_iter_source(&mut self, source: &Expr, pos: Pos) -> Option<(Reg, Type, i64)> {
        let ty = self.infer_expr_type(source);
        let Some(Type::Array { elem, len }) = ty else {
            return match ty {
                Some(other) => {
                    self.errors
                        .report(pos, format!("cannot iterate a value of type {other}"));
                    None
                }
                None => {
                    self.errors.report(pos, "cannot iterate this expression");
                    None
                }
            };
        };
        if len < 0 {
            self.errors
                .report(pos, "cannot iterate an array of unknown length");
            return None;
        }
        let addr = match &source.kind {
            ExprKind::Ident(_) | ExprKind::Field { .. } | ExprKind::Index { .. } => {
                let (addr, _) = self.lower_address(source, pos)?;
                addr
            }
            // Array literals and nested collects already hold their
            // storage address in the value register.
            _ => self.lower_expr_reg(source)?.0,
        };
        Some((addr, *elem, i64::from(len)))
    }

    /// Validate the operator sequence and resolve operator functions.
    fn build_plan(&mut self, ops: &[IterOp], source_elem: &Type, pos: Pos) -> Option<Plan> {
        let mut plan = Plan {
            steps: Vec::new(),
            elem_at: Vec::new(),
            skip: 0,
            take: None,
            enumerate: false,
            terminal: Terminal::ForEach,
            reduce_init: None,
            reduce_ty: None,
            has_filter: false,
        };
        let mut elem = source_elem.clone();
        let mut terminated = false;

        for op in ops {
            if terminated {
                self.errors.report(
                    op.pos,
                    format!("no operator may follow the chain terminal, found {}", op.method),
                );
                return None;
            }
            if plan.enumerate && op.method != IterMethod::ForEach {
                self.errors.report(
                    op.pos,
                    format!("not yet implemented: {} after enumerate", op.method),
                );
                return None;
            }
            match op.method {
                IterMethod::Skip | IterMethod::Take => {
                    if plan.has_filter || !plan.steps.is_empty() {
                        self.errors.report(
                            op.pos,
                            format!(
                                "not yet implemented: {} after another operator",
                                op.method
                            ),
                        );
                        return None;
                    }
                    let [count] = op.args.as_slice() else {
                        self.errors
                            .report(op.pos, format!("{} needs a count argument", op.method));
                        return None;
                    };
                    let Some(n) = self.eval_const_int(count) else {
                        self.errors.report(
                            op.pos,
                            format!("not yet implemented: {} with a non-literal count", op.method),
                        );
                        return None;
                    };
                    if n < 0 {
                        self.errors
                            .report(op.pos, format!("{} count must not be negative", op.method));
                        return None;
                    }
                    if op.method == IterMethod::Skip {
                        plan.skip += n;
                    } else {
                        plan.take = Some(plan.take.map_or(n, |t: i64| t.min(n)));
                    }
                }
                IterMethod::Map => {
                    let f = self.resolve_op_function(op, &[elem.clone()], None)?;
                    let ret = self.funcs[f].ret.clone();
                    if ret == Type::Void {
                        self.errors
                            .report(op.pos, "map function must return a value");
                        return None;
                    }
                    plan.elem_at.push(elem.clone());
                    plan.steps.push(Step::Map(f));
                    elem = ret;
                }
                IterMethod::Filter => {
                    let f = self.resolve_op_function(op, &[elem.clone()], Some(Type::Bool))?;
                    self.require_bool_result(f, op.pos)?;
                    plan.elem_at.push(elem.clone());
                    plan.steps.push(Step::Filter(f));
                    plan.has_filter = true;
                }
                IterMethod::TakeWhile => {
                    let f = self.resolve_op_function(op, &[elem.clone()], Some(Type::Bool))?;
                    self.require_bool_result(f, op.pos)?;
                    plan.elem_at.push(elem.clone());
                    plan.steps.push(Step::TakeWhile(f));
                    plan.has_filter = true;
                }
                IterMethod::SkipWhile => {
                    let f = self.resolve_op_function(op, &[elem.clone()], Some(Type::Bool))?;
                    self.require_bool_result(f, op.pos)?;
                    plan.elem_at.push(elem.clone());
                    plan.steps.push(Step::SkipWhile(f));
                    plan.has_filter = true;
                }
                IterMethod::Peek | IterMethod::Inspect => {
                    let f = self.resolve_op_function(op, &[elem.clone()], None)?;
                    plan.elem_at.push(elem.clone());
                    plan.steps.push(Step::Peek(f));
                }
                IterMethod::Enumerate => {
                    plan.enumerate = true;
                }
                IterMethod::ForEach => {
                    let params: Vec<Type> = if plan.enumerate {
                        vec![elem.clone(), Type::U8]
                    } else {
                        vec![elem.clone()]
                    };
                    let f = self.resolve_op_function(op, &params, None)?;
                    plan.elem_at.push(elem.clone());
                    plan.steps.push(Step::ForEach(f));
                    plan.terminal = Terminal::ForEach;
                    terminated = true;
                }
                IterMethod::Collect => {
                    plan.elem_at.push(elem.clone());
                    plan.steps.push(Step::Collect);
                    plan.terminal = Terminal::Collect;
                    terminated = true;
                }
                IterMethod::Reduce => {
                    let [f_arg, init] = op.args.as_slice() else {
                        self.errors.report(
                            op.pos,
                            "reduce needs a function and an initial accumulator",
                        );
                        return None;
                    };
                    let acc_ty = self.infer_expr_type(init).or_else(|| {
                        self.errors.report(
                            init.pos,
                            "cannot infer the accumulator type for reduce",
                        );
                        None
                    })?;
                    let f = self.resolve_op_fn_expr(
                        f_arg,
                        &[acc_ty.clone(), elem.clone()],
                        Some(acc_ty.clone()),
                        op.pos,
                    )?;
                    plan.elem_at.push(elem.clone());
                    plan.steps.push(Step::Reduce(f));
                    plan.reduce_init = Some(init.clone());
                    plan.reduce_ty = Some(self.funcs[f].ret.clone());
                    plan.terminal = Terminal::Reduce;
                    terminated = true;
                }
                IterMethod::FlatMap | IterMethod::Zip => {
                    self.errors
                        .report(op.pos, format!("not yet implemented: {}", op.method));
                    return None;
                }
                IterMethod::Chain => unreachable!("chain is split before planning"),
            }
        }

        if !terminated {
            self.errors.report(
                pos,
                "iterator chain must end in forEach, collect or reduce",
            );
            return None;
        }
        plan.elem_at.push(elem);
        Some(plan)
    }

    fn require_bool_result(&mut self, f: FuncId, pos: Pos) -> Option<()> {
        if self.funcs[f].ret != Type::Bool {
            self.errors.report(
                pos,
                format!(
                    "predicate must return bool; {} returns {}",
                    self.funcs[f].base_name, self.funcs[f].ret
                ),
            );
            return None;
        }
        Some(())
    }

    fn resolve_op_function(
        &mut self,
        op: &IterOp,
        param_types: &[Type],
        expected_ret: Option<Type>,
    ) -> Option<FuncId> {
        let [arg] = op.args.as_slice() else {
            self.errors
                .report(op.pos, format!("{} needs a function argument", op.method));
            return None;
        };
        self.resolve_op_fn_expr(arg, param_types, expected_ret, op.pos)
    }

    /// An operator function argument: a named function (resolved by the
    /// element type), or a single-parameter lambda lifted into an
    /// anonymous function.
    fn resolve_op_fn_expr(
        &mut self,
        arg: &Expr,
        param_types: &[Type],
        expected_ret: Option<Type>,
        pos: Pos,
    ) -> Option<FuncId> {
        match &arg.kind {
            ExprKind::Ident(_) | ExprKind::Field { .. } => {
                let name = flatten_name(arg)?;
                crate::overload::resolve_iter_fn(self, &name, param_types, pos)
            }
            ExprKind::Lambda { params, body } => {
                if params.len() != param_types.len() || params.len() != 1 {
                    self.errors
                        .report(pos, "not yet implemented: multi-parameter lambda");
                    return None;
                }
                self.lift_lambda(&params[0].name, &param_types[0], body, expected_ret, pos)
            }
            _ => {
                self.errors.report(
                    pos,
                    "iterator operator argument must be a function name or a lambda",
                );
                None
            }
        }
    }

    /// Lift a one-parameter lambda into an ordinary function and queue its
    /// body for analysis.
    fn lift_lambda(
        &mut self,
        param: &str,
        param_ty: &Type,
        body: &Expr,
        expected_ret: Option<Type>,
        pos: Pos,
    ) -> Option<FuncId> {
        let Some(param_te) = type_to_type_expr(param_ty) else {
            self.errors.report(
                pos,
                format!("not yet implemented: lambda over element type {param_ty}"),
            );
            return None;
        };
        let ret = match expected_ret {
            Some(ty) => ty,
            None => {
                self.scopes.push();
                self.scopes.define(
                    param,
                    Symbol::Var(VarSymbol {
                        ty: param_ty.clone(),
                        reg: minz_codegen::ir::Reg::from_u32(0),
                        mutable: false,
                        is_param: true,
                        param_index: Some(0),
                        direct: true,
                        buffer_addr: None,
                    }),
                );
                let inferred = self.infer_expr_type(body);
                self.scopes.pop();
                match inferred {
                    Some(ty) => ty,
                    None => {
                        self.errors.report(
                            pos,
                            "cannot infer the lambda's return type; use a named function",
                        );
                        return None;
                    }
                }
            }
        };
        let Some(ret_te) = type_to_type_expr(&ret) else {
            self.errors.report(
                pos,
                format!("not yet implemented: lambda returning {ret}"),
            );
            return None;
        };

        self.lambda_counter += 1;
        let decl = minz_ast::FunctionDecl {
            name: format!("lambda_{}", self.lambda_counter),
            params: vec![minz_ast::ParamDecl {
                name: param.to_string(),
                ty: param_te,
                pos,
            }],
            return_type: (ret != Type::Void).then_some(ret_te),
            error_type: None,
            attributes: Vec::new(),
            body: vec![Stmt {
                pos,
                kind: minz_ast::StmtKind::Return(Some(body.clone())),
            }],
            public: false,
        };
        let id = crate::declarations::register_function_signature(self, &decl, pos)?;
        self.pending_bodies.push((id, decl));
        Some(id)
    }

    /// Emit the fused loop for one (source, operators) half.
    fn lower_fused(&mut self, source: &Expr, ops: &[IterOp], pos: Pos) -> Option<RValue> {
        let (base, source_elem, len) = self.lower_iter_source(source, pos)?;
        let plan = self.build_plan(ops, &source_elem, pos)?;

        let mut count = len - plan.skip;
        if let Some(take) = plan.take {
            count = count.min(take);
        }
        count = count.max(0);
        let esize = i64::from(source_elem.size());
        let use_djnz = count <= DJNZ_MAX;
        if use_djnz && plan.steps.iter().any(|s| matches!(s, Step::SkipWhile(_))) {
            self.errors
                .report(pos, "not yet implemented: skipWhile in DJNZ mode");
            return None;
        }
        log::debug!(
            "fusing iterator chain: count={count} elem={source_elem} strategy={}",
            if use_djnz { "djnz" } else { "indexed" }
        );

        // Reduce needs its accumulator even when the loop body never runs.
        let mut acc: Option<(Reg, Type)> = None;
        if plan.terminal == Terminal::Reduce {
            let init = plan.reduce_init.clone().expect("reduce keeps its init");
            let acc_ty = plan.reduce_ty.clone().expect("reduce keeps its type");
            let (reg, _) = self.lower_expr_coerced(&init, &acc_ty)?;
            acc = Some((reg, acc_ty));
        }
        let out_elem = plan.elem_at.last().expect("plan records elem types").clone();
        let out_len = if plan.has_filter { -1 } else { count as i32 };
        let mut out: Option<Reg> = None;
        if plan.terminal == Terminal::Collect {
            let buffer = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::Alloc)
                    .dest(buffer)
                    .imm(count * i64::from(out_elem.size()))
                    .ty(Type::Array {
                        elem: Box::new(out_elem.clone()),
                        len: out_len,
                    }),
            );
            out = Some(buffer);
        }

        // The end check fires before the first body execution: an empty
        // range never enters the loop, so nothing at all is emitted.
        if count == 0 {
            return self.chain_result(&plan, acc, out, out_elem, out_len);
        }

        // Pre-loop fragment: starting pointer, stride, counter.
        let ptr = if plan.skip > 0 {
            let off = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::LoadConst)
                    .dest(off)
                    .imm(plan.skip * esize)
                    .ty(Type::U16),
            );
            let ptr = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::Add)
                    .dest(ptr)
                    .src1(base)
                    .src2(off)
                    .ty(Type::U16)
                    .hint(RegHint::Hl),
            );
            ptr
        } else {
            base
        };
        let stride = self.func().new_reg();
        self.emit(
            Inst::new(Opcode::LoadConst)
                .dest(stride)
                .imm(esize)
                .ty(Type::U16)
                .hint(RegHint::De),
        );
        let mut out_stride = None;
        let mut out_cursor = None;
        if let Some(buffer) = out {
            let r = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::LoadConst)
                    .dest(r)
                    .imm(i64::from(out_elem.size()))
                    .ty(Type::U16),
            );
            out_stride = Some(r);
            // The cursor advances through the buffer; the result register
            // keeps pointing at its start.
            let zero = self.func().new_reg();
            self.emit(Inst::new(Opcode::LoadConst).dest(zero).imm(0).ty(Type::U16));
            let cursor = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::Add)
                    .dest(cursor)
                    .src1(buffer)
                    .src2(zero)
                    .ty(Type::U16),
            );
            out_cursor = Some(cursor);
        }
        let mut en_index = None;
        let mut one = None;
        if plan.enumerate {
            let idx = self.func().new_reg();
            self.emit(Inst::new(Opcode::LoadConst).dest(idx).imm(0).ty(Type::U8));
            let o = self.func().new_reg();
            self.emit(Inst::new(Opcode::LoadConst).dest(o).imm(1).ty(Type::U8));
            en_index = Some(idx);
            one = Some(o);
        }
        let mut skip_flag = None;
        if plan.steps.iter().any(|s| matches!(s, Step::SkipWhile(_))) {
            let flag = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::LoadConst)
                    .dest(flag)
                    .imm(0)
                    .ty(Type::Bool),
            );
            let t = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::LoadConst)
                    .dest(t)
                    .imm(1)
                    .ty(Type::Bool),
            );
            skip_flag = Some((flag, t));
        }

        let (counter, limit_idx) = if use_djnz {
            let counter = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::LoadConst)
                    .dest(counter)
                    .imm(count)
                    .ty(Type::U8)
                    .hint(RegHint::B),
            );
            (counter, None)
        } else {
            let idx = self.func().new_reg();
            self.emit(Inst::new(Opcode::LoadConst).dest(idx).imm(0).ty(Type::U16));
            let limit = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::LoadConst)
                    .dest(limit)
                    .imm(count)
                    .ty(Type::U16),
            );
            let o = self.func().new_reg();
            self.emit(Inst::new(Opcode::LoadConst).dest(o).imm(1).ty(Type::U16));
            (idx, Some((limit, o)))
        };

        let head = self.new_label();
        let exit = self.new_label();
        let mut needs_exit = false;
        self.emit(Inst::new(Opcode::Label).target(Target::Label(head)));
        if let Some((limit, _)) = limit_idx {
            let in_range = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::Lt)
                    .dest(in_range)
                    .src1(counter)
                    .src2(limit)
                    .ty(Type::U16),
            );
            self.emit(
                Inst::new(Opcode::JumpIfNot)
                    .src1(in_range)
                    .target(Target::Label(exit)),
            );
            needs_exit = true;
        }

        // Per-iteration fragment: load the element, run the steps.
        let mut cur = self.func().new_reg();
        self.emit(
            Inst::new(Opcode::LoadPtr)
                .dest(cur)
                .src1(ptr)
                .ty(source_elem.clone()),
        );
        let mut continue_labels: Vec<Label> = Vec::new();
        for (i, step) in plan.steps.iter().enumerate() {
            let elem_ty = plan.elem_at[i].clone();
            match step {
                Step::Map(f) => {
                    let f = *f;
                    let ret = self.funcs[f].ret.clone();
                    let target = self.funcs[f].mangled.clone();
                    self.note_step_callee(f);
                    let dest = self.func().new_reg();
                    self.emit(
                        Inst::new(Opcode::Call)
                            .dest(dest)
                            .target(Target::Symbol(target))
                            .args([cur])
                            .ty(ret),
                    );
                    cur = dest;
                }
                Step::Filter(f) => {
                    let cond = self.emit_predicate(*f, cur);
                    let skip_to = self.new_label();
                    self.emit(
                        Inst::new(Opcode::JumpIfNot)
                            .src1(cond)
                            .target(Target::Label(skip_to)),
                    );
                    continue_labels.push(skip_to);
                }
                Step::TakeWhile(f) => {
                    let cond = self.emit_predicate(*f, cur);
                    self.emit(
                        Inst::new(Opcode::JumpIfNot)
                            .src1(cond)
                            .target(Target::Label(exit)),
                    );
                    needs_exit = true;
                }
                Step::SkipWhile(f) => {
                    let (flag, truth) = skip_flag.expect("flag allocated pre-loop");
                    let past = self.new_label();
                    let stop_skipping = self.new_label();
                    let next = self.new_label();
                    self.emit(
                        Inst::new(Opcode::JumpIf)
                            .src1(flag)
                            .target(Target::Label(past)),
                    );
                    let cond = self.emit_predicate(*f, cur);
                    self.emit(
                        Inst::new(Opcode::JumpIfNot)
                            .src1(cond)
                            .target(Target::Label(stop_skipping)),
                    );
                    self.emit(Inst::new(Opcode::Jump).target(Target::Label(next)));
                    self.emit(Inst::new(Opcode::Label).target(Target::Label(stop_skipping)));
                    self.emit(
                        Inst::new(Opcode::Or)
                            .dest(flag)
                            .src1(flag)
                            .src2(truth)
                            .ty(Type::Bool),
                    );
                    self.emit(Inst::new(Opcode::Label).target(Target::Label(past)));
                    continue_labels.push(next);
                }
                Step::Peek(f) => {
                    let f = *f;
                    let target = self.funcs[f].mangled.clone();
                    let ret = self.funcs[f].ret.clone();
                    self.note_step_callee(f);
                    let mut inst = Inst::new(Opcode::Call)
                        .target(Target::Symbol(target))
                        .args([cur])
                        .ty(ret.clone());
                    if ret != Type::Void {
                        inst = inst.dest(self.func().new_reg());
                    }
                    self.emit(inst);
                }
                Step::ForEach(f) => {
                    let f = *f;
                    let target = self.funcs[f].mangled.clone();
                    self.note_step_callee(f);
                    let args: smallvec::SmallVec<[Reg; 4]> = match en_index {
                        Some(idx) => smallvec::smallvec![cur, idx],
                        None => smallvec::smallvec![cur],
                    };
                    self.emit(
                        Inst::new(Opcode::Call)
                            .target(Target::Symbol(target))
                            .args(args)
                            .ty(Type::Void),
                    );
                }
                Step::Collect => {
                    let cursor = out_cursor.expect("collect allocated pre-loop");
                    self.emit(
                        Inst::new(Opcode::StoreIndex)
                            .src1(cursor)
                            .src2(cur)
                            .ty(elem_ty.clone()),
                    );
                    let out_stride = out_stride.expect("stride allocated pre-loop");
                    self.emit(
                        Inst::new(Opcode::Add)
                            .dest(cursor)
                            .src1(cursor)
                            .src2(out_stride)
                            .ty(Type::U16),
                    );
                }
                Step::Reduce(f) => {
                    let f = *f;
                    let (acc_reg, acc_ty) = acc.clone().expect("accumulator pre-loop");
                    let target = self.funcs[f].mangled.clone();
                    self.note_step_callee(f);
                    self.emit(
                        Inst::new(Opcode::Call)
                            .dest(acc_reg)
                            .target(Target::Symbol(target))
                            .args([acc_reg, cur])
                            .ty(acc_ty),
                    );
                }
            }
        }

        // Loop tail: the per-filter continue labels land just before the
        // pointer advance.
        for label in continue_labels {
            self.emit(Inst::new(Opcode::Label).target(Target::Label(label)));
        }
        self.emit(
            Inst::new(Opcode::Add)
                .dest(ptr)
                .src1(ptr)
                .src2(stride)
                .ty(Type::U16)
                .hint(RegHint::HlDe),
        );
        if let (Some(idx), Some(one)) = (en_index, one) {
            self.emit(
                Inst::new(Opcode::Add)
                    .dest(idx)
                    .src1(idx)
                    .src2(one)
                    .ty(Type::U8),
            );
        }
        match limit_idx {
            None => {
                self.emit(
                    Inst::new(Opcode::Djnz)
                        .src1(counter)
                        .target(Target::Label(head)),
                );
            }
            Some((_, one)) => {
                self.emit(
                    Inst::new(Opcode::Add)
                        .dest(counter)
                        .src1(counter)
                        .src2(one)
                        .ty(Type::U16),
                );
                self.emit(Inst::new(Opcode::Jump).target(Target::Label(head)));
            }
        }
        if needs_exit {
            self.emit(Inst::new(Opcode::Label).target(Target::Label(exit)));
        }

        self.chain_result(&plan, acc, out, out_elem, out_len)
    }

    fn chain_result(
        &mut self,
        plan: &Plan,
        acc: Option<(Reg, Type)>,
        out: Option<Reg>,
        out_elem: Type,
        out_len: i32,
    ) -> Option<RValue> {
        match plan.terminal {
            Terminal::ForEach => Some((None, Type::Void)),
            Terminal::Reduce => {
                let (reg, ty) = acc.expect("reduce accumulator");
                Some((Some(reg), ty))
            }
            Terminal::Collect => Some((
                out,
                Type::Array {
                    elem: Box::new(out_elem),
                    len: out_len,
                },
            )),
        }
    }

    fn emit_predicate(&mut self, f: FuncId, cur: Reg) -> Reg {
        let target = self.funcs[f].mangled.clone();
        self.note_step_callee(f);
        let dest = self.func().new_reg();
        self.emit(
            Inst::new(Opcode::Call)
                .dest(dest)
                .target(Target::Symbol(target))
                .args([cur])
                .ty(Type::Bool),
        );
        dest
    }

    fn note_step_callee(&mut self, f: FuncId) {
        let sym = self.funcs[f].clone();
        if !sym.is_local {
            self.note_external(&sym);
        }
    }

    /// Lower a `loop at array -> item` statement: the single-source
    /// iterator loop, sharing the chain's strategy selection. INTO mode
    /// copies the element into its static buffer before the body and
    /// writes it back afterwards.
    pub(crate) fn lower_loop_at(
        &mut self,
        array: &Expr,
        item: &str,
        mode: LoopMode,
        body: &[Stmt],
        pos: Pos,
    ) {
        let Some((base, elem, len)) = self.lower_iter_source(array, pos) else {
            return;
        };
        if len == 0 {
            return;
        }
        let esize = i64::from(elem.size());
        let use_djnz = len <= DJNZ_MAX;

        let stride = self.func().new_reg();
        self.emit(
            Inst::new(Opcode::LoadConst)
                .dest(stride)
                .imm(esize)
                .ty(Type::U16)
                .hint(RegHint::De),
        );
        let (counter, limit_idx) = if use_djnz {
            let counter = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::LoadConst)
                    .dest(counter)
                    .imm(len)
                    .ty(Type::U8)
                    .hint(RegHint::B),
            );
            (counter, None)
        } else {
            let idx = self.func().new_reg();
            self.emit(Inst::new(Opcode::LoadConst).dest(idx).imm(0).ty(Type::U16));
            let limit = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::LoadConst)
                    .dest(limit)
                    .imm(len)
                    .ty(Type::U16),
            );
            let one = self.func().new_reg();
            self.emit(Inst::new(Opcode::LoadConst).dest(one).imm(1).ty(Type::U16));
            (idx, Some((limit, one)))
        };
        let buffer = match mode {
            LoopMode::Into => Some(self.alloc_iter_buffer(elem.size() as u16)),
            LoopMode::Ref => None,
        };

        let head = self.new_label();
        let exit = self.new_label();
        self.emit(Inst::new(Opcode::Label).target(Target::Label(head)));
        if let Some((limit, _)) = limit_idx {
            let in_range = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::Lt)
                    .dest(in_range)
                    .src1(counter)
                    .src2(limit)
                    .ty(Type::U16),
            );
            self.emit(
                Inst::new(Opcode::JumpIfNot)
                    .src1(in_range)
                    .target(Target::Label(exit)),
            );
        }

        self.scopes.push();
        let item_reg = match buffer {
            Some(addr) => {
                self.emit(
                    Inst::new(Opcode::CopyIn)
                        .src1(base)
                        .imm(esize)
                        .imm2(i64::from(addr))
                        .ty(elem.clone()),
                );
                base
            }
            None => {
                let reg = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::LoadPtr)
                        .dest(reg)
                        .src1(base)
                        .ty(elem.clone()),
                );
                reg
            }
        };
        self.scopes.define(
            item,
            Symbol::Var(VarSymbol {
                ty: elem.clone(),
                reg: item_reg,
                mutable: false,
                is_param: false,
                param_index: None,
                direct: true,
                buffer_addr: buffer,
            }),
        );
        for stmt in body {
            self.lower_stmt(stmt);
        }
        if let Some(addr) = buffer {
            self.emit(
                Inst::new(Opcode::CopyOut)
                    .src1(base)
                    .imm(esize)
                    .imm2(i64::from(addr))
                    .ty(elem.clone()),
            );
        }
        self.scopes.pop();

        self.emit(
            Inst::new(Opcode::Add)
                .dest(base)
                .src1(base)
                .src2(stride)
                .ty(Type::U16)
                .hint(RegHint::HlDe),
        );
        match limit_idx {
            None => {
                self.emit(
                    Inst::new(Opcode::Djnz)
                        .src1(counter)
                        .target(Target::Label(head)),
                );
            }
            Some((_, one)) => {
                self.emit(
                    Inst::new(Opcode::Add)
                        .dest(counter)
                        .src1(counter)
                        .src2(one)
                        .ty(Type::U16),
                );
                self.emit(Inst::new(Opcode::Jump).target(Target::Label(head)));
            }
        }
        if limit_idx.is_some() {
            self.emit(Inst::new(Opcode::Label).target(Target::Label(exit)));
        }
    }
}

/// Best-effort conversion of a semantic type back to a syntax type, for
/// synthesized lambda signatures.
fn type_to_type_expr(ty: &Type) -> Option<minz_ast::TypeExpr> {
    use minz_ast::TypeExpr;
    match ty {
        Type::U8 | Type::U16 | Type::U24 | Type::I8 | Type::I16 | Type::I24 | Type::Bool
        | Type::Void | Type::Str | Type::LStr => Some(TypeExpr::Named(ty.to_string())),
        Type::Struct(s) => Some(TypeExpr::Named(s.name.clone())),
        Type::Enum(e) => Some(TypeExpr::Named(e.name.clone())),
        Type::Bits(b) => Some(TypeExpr::Named(b.name.clone())),
        Type::Pointer(base) => Some(TypeExpr::Pointer(Box::new(type_to_type_expr(base)?))),
        _ => None,
    }
}
