//! Lowering of statements and expressions to MinZ IR.
//!
//! Lowering is one big dispatch per construct, emitting into the function
//! the analyzer currently holds open. Errors are reported and the current
//! statement or expression is abandoned; the caller keeps going with the
//! rest of the body.

use crate::analyzer::Analyzer;
use crate::scopes::{ConstSymbol, ConstValue, Symbol, VarSymbol};
use minz_ast::{BinOp, Expr, ExprKind, Pos, Stmt, StmtKind, UnOp};
use minz_codegen::ir::{Inst, Opcode, Reg, RegHint, Target, Type};

/// A lowered expression: its register (absent for void) and type.
pub(crate) type RValue = (Option<Reg>, Type);

impl Analyzer<'_> {
    /// Lower one statement.
    pub(crate) fn lower_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let {
                name,
                ty,
                value,
                mutable,
            } => self.lower_let(name, ty.as_ref(), value.as_ref(), *mutable, stmt.pos),
            StmtKind::Assign { target, value } => self.lower_assign(target, value, stmt.pos),
            StmtKind::Return(value) => self.lower_return(value.as_ref(), stmt.pos),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => self.lower_if(cond, then_body, else_body.as_deref(), stmt.pos),
            StmtKind::While { cond, body } => self.lower_while(cond, body, stmt.pos),
            StmtKind::Block(stmts) => self.lower_block(stmts),
            StmtKind::For { var, lo, hi, body } => self.lower_for(var, lo, hi, body, stmt.pos),
            StmtKind::Times { count, body } => self.lower_times(count, body, stmt.pos),
            StmtKind::LoopAt {
                array,
                item,
                mode,
                body,
            } => self.lower_loop_at(array, item, *mode, body, stmt.pos),
            StmtKind::Asm(text) => self.emit(Inst::new(Opcode::Asm).comment(text.clone())),
            StmtKind::Expr(e) => {
                let _ = self.lower_expr(e);
            }
        }
    }

    /// Lower a statement list in its own scope.
    pub(crate) fn lower_block(&mut self, stmts: &[Stmt]) {
        self.scopes.push();
        for stmt in stmts {
            self.lower_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn lower_let(
        &mut self,
        name: &str,
        ty: Option<&minz_ast::TypeExpr>,
        value: Option<&Expr>,
        mutable: bool,
        pos: Pos,
    ) {
        let declared = ty.and_then(|t| self.convert_type(t, pos));
        let (init, var_ty) = match (declared, value) {
            (Some(want), Some(value)) => {
                let Some((reg, actual)) = self.lower_expr_coerced(value, &want) else {
                    return;
                };
                if !want.is_assignable_from(&actual) {
                    self.errors.report(
                        pos,
                        format!(
                            "type mismatch for variable {name}: declared type {want} \
                             but initializer has type {actual}"
                        ),
                    );
                }
                (Some(reg), want)
            }
            (None, Some(value)) => match self.lower_expr_reg(value) {
                Some((reg, ty)) => (Some(reg), ty),
                None => return,
            },
            (Some(want), None) => (None, want),
            (None, None) => {
                self.errors.report(
                    pos,
                    format!("variable `{name}` needs a type or an initializer"),
                );
                return;
            }
        };

        let reg = self.func().add_local(name, var_ty.clone());
        if let Some(init) = init {
            self.emit(
                Inst::new(Opcode::StoreVar)
                    .src1(init)
                    .target(Target::Symbol(name.to_string()))
                    .ty(var_ty.clone()),
            );
        }
        self.scopes.define(
            name,
            Symbol::Var(VarSymbol {
                ty: var_ty,
                reg,
                mutable,
                is_param: false,
                param_index: None,
                direct: false,
                buffer_addr: None,
            }),
        );
    }

    fn lower_assign(&mut self, target: &Expr, value: &Expr, pos: Pos) {
        match &target.kind {
            ExprKind::Ident(name) => match self.resolve_name(name) {
                Some(Symbol::Var(v)) => {
                    if !v.mutable {
                        self.errors
                            .report(pos, format!("cannot assign to immutable `{name}`"));
                        return;
                    }
                    if v.direct {
                        self.errors
                            .report(pos, format!("cannot assign to loop binding `{name}`"));
                        return;
                    }
                    let Some((reg, actual)) = self.lower_expr_coerced(value, &v.ty) else {
                        return;
                    };
                    if !v.ty.is_assignable_from(&actual) {
                        self.errors.report(
                            pos,
                            format!(
                                "type mismatch in assignment to {name}: expected {} \
                                 but value has type {actual}",
                                v.ty
                            ),
                        );
                        return;
                    }
                    self.emit(
                        Inst::new(Opcode::StoreVar)
                            .src1(reg)
                            .target(Target::Symbol(name.to_string()))
                            .ty(v.ty),
                    );
                }
                Some(Symbol::Global(g)) => {
                    let Some((reg, actual)) = self.lower_expr_coerced(value, &g.ty) else {
                        return;
                    };
                    if !g.ty.is_assignable_from(&actual) {
                        self.errors.report(
                            pos,
                            format!(
                                "type mismatch in assignment to {name}: expected {} \
                                 but value has type {actual}",
                                g.ty
                            ),
                        );
                        return;
                    }
                    self.emit(
                        Inst::new(Opcode::StoreVar)
                            .src1(reg)
                            .target(Target::Symbol(g.storage))
                            .ty(g.ty),
                    );
                }
                Some(Symbol::Const(_)) => {
                    self.errors
                        .report(pos, format!("cannot assign to constant `{name}`"));
                }
                Some(_) => {
                    self.errors
                        .report(pos, format!("`{name}` is not assignable"));
                }
                None => {
                    let names = self.scopes.visible_names();
                    self.errors
                        .undefined(pos, "variable", name, names.iter().map(|s| s.as_str()));
                }
            },
            ExprKind::Index { base, index } => self.lower_index_store(base, index, value, pos),
            ExprKind::Field { base, field } => self.lower_field_store(base, field, value, pos),
            _ => self.errors.report(pos, "invalid assignment target"),
        }
    }

    fn lower_return(&mut self, value: Option<&Expr>, pos: Pos) {
        let ret = self.func().return_type.clone();
        match (value, ret == Type::Void) {
            (Some(value), false) => {
                let Some((reg, actual)) = self.lower_expr_coerced(value, &ret) else {
                    return;
                };
                if !ret.is_assignable_from(&actual) {
                    self.errors.report(
                        pos,
                        format!("return type mismatch: expected {ret} but value has type {actual}"),
                    );
                    return;
                }
                self.emit(Inst::new(Opcode::Return).src1(reg).ty(ret));
            }
            (Some(value), true) => {
                let _ = self.lower_expr(value);
                self.errors.report(pos, "void function returns a value");
            }
            (None, false) => {
                self.errors
                    .report(pos, format!("missing return value of type {ret}"));
                self.emit(Inst::new(Opcode::Return));
            }
            (None, true) => self.emit(Inst::new(Opcode::Return)),
        }
    }

    fn lower_condition(&mut self, cond: &Expr, pos: Pos) -> Option<Reg> {
        let (reg, ty) = self.lower_expr_reg(cond)?;
        if ty != Type::Bool {
            self.errors
                .report(pos, format!("condition must be bool, found {ty}"));
            return None;
        }
        Some(reg)
    }

    fn lower_if(&mut self, cond: &Expr, then_body: &[Stmt], else_body: Option<&[Stmt]>, pos: Pos) {
        let Some(cond) = self.lower_condition(cond, pos) else {
            return;
        };
        let else_label = self.new_label();
        self.emit(
            Inst::new(Opcode::JumpIfNot)
                .src1(cond)
                .target(Target::Label(else_label)),
        );
        self.lower_block(then_body);
        match else_body {
            Some(else_body) => {
                let end_label = self.new_label();
                self.emit(Inst::new(Opcode::Jump).target(Target::Label(end_label)));
                self.emit(Inst::new(Opcode::Label).target(Target::Label(else_label)));
                self.lower_block(else_body);
                self.emit(Inst::new(Opcode::Label).target(Target::Label(end_label)));
            }
            None => {
                self.emit(Inst::new(Opcode::Label).target(Target::Label(else_label)));
            }
        }
    }

    fn lower_while(&mut self, cond: &Expr, body: &[Stmt], pos: Pos) {
        let head = self.new_label();
        let exit = self.new_label();
        self.emit(Inst::new(Opcode::Label).target(Target::Label(head)));
        let Some(cond) = self.lower_condition(cond, pos) else {
            return;
        };
        self.emit(
            Inst::new(Opcode::JumpIfNot)
                .src1(cond)
                .target(Target::Label(exit)),
        );
        self.lower_block(body);
        self.emit(Inst::new(Opcode::Jump).target(Target::Label(head)));
        self.emit(Inst::new(Opcode::Label).target(Target::Label(exit)));
    }

    fn lower_for(&mut self, var: &str, lo: &Expr, hi: &Expr, body: &[Stmt], pos: Pos) {
        let Some((lo_reg, lo_ty)) = self.lower_expr_reg(lo) else {
            return;
        };
        let Some((hi_reg, hi_ty)) = self.lower_expr_reg(hi) else {
            return;
        };
        let Some(ty) = self.unify_types(&lo_ty, &hi_ty, "..", pos) else {
            return;
        };

        self.scopes.push();
        // The induction variable lives in the lower bound's register.
        self.scopes.define(
            var,
            Symbol::Var(VarSymbol {
                ty: ty.clone(),
                reg: lo_reg,
                mutable: false,
                is_param: false,
                param_index: None,
                direct: true,
                buffer_addr: None,
            }),
        );

        let head = self.new_label();
        let exit = self.new_label();
        self.emit(Inst::new(Opcode::Label).target(Target::Label(head)));
        let in_range = self.func().new_reg();
        self.emit(
            Inst::new(Opcode::Lt)
                .dest(in_range)
                .src1(lo_reg)
                .src2(hi_reg)
                .ty(ty.clone()),
        );
        self.emit(
            Inst::new(Opcode::JumpIfNot)
                .src1(in_range)
                .target(Target::Label(exit)),
        );
        self.lower_block(body);
        let one = self.func().new_reg();
        self.emit(Inst::new(Opcode::LoadConst).dest(one).imm(1).ty(ty.clone()));
        self.emit(
            Inst::new(Opcode::Add)
                .dest(lo_reg)
                .src1(lo_reg)
                .src2(one)
                .ty(ty),
        );
        self.emit(Inst::new(Opcode::Jump).target(Target::Label(head)));
        self.emit(Inst::new(Opcode::Label).target(Target::Label(exit)));
        self.scopes.pop();
    }

    /// Countdown loop. A literal count up to 255 takes the DJNZ form; the
    /// counter never materializes an index the body could observe.
    fn lower_times(&mut self, count: &Expr, body: &[Stmt], pos: Pos) {
        if let Some(n) = self.eval_const_int(count) {
            if n == 0 {
                return;
            }
            if (1..=255).contains(&n) {
                let counter = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::LoadConst)
                        .dest(counter)
                        .imm(n)
                        .ty(Type::U8)
                        .hint(RegHint::B),
                );
                let head = self.new_label();
                self.emit(Inst::new(Opcode::Label).target(Target::Label(head)));
                self.lower_block(body);
                self.emit(
                    Inst::new(Opcode::Djnz)
                        .src1(counter)
                        .target(Target::Label(head)),
                );
                return;
            }
        }

        let Some((counter, ty)) = self.lower_expr_reg(count) else {
            return;
        };
        if !ty.is_integer() {
            self.errors
                .report(pos, format!("loop count must be an integer, found {ty}"));
            return;
        }
        let zero = self.func().new_reg();
        self.emit(
            Inst::new(Opcode::LoadConst)
                .dest(zero)
                .imm(0)
                .ty(ty.clone()),
        );
        let head = self.new_label();
        let exit = self.new_label();
        self.emit(Inst::new(Opcode::Label).target(Target::Label(head)));
        let nonzero = self.func().new_reg();
        self.emit(
            Inst::new(Opcode::Gt)
                .dest(nonzero)
                .src1(counter)
                .src2(zero)
                .ty(ty.clone()),
        );
        self.emit(
            Inst::new(Opcode::JumpIfNot)
                .src1(nonzero)
                .target(Target::Label(exit)),
        );
        self.lower_block(body);
        let one = self.func().new_reg();
        self.emit(Inst::new(Opcode::LoadConst).dest(one).imm(1).ty(ty.clone()));
        self.emit(
            Inst::new(Opcode::Sub)
                .dest(counter)
                .src1(counter)
                .src2(one)
                .ty(ty),
        );
        self.emit(Inst::new(Opcode::Jump).target(Target::Label(head)));
        self.emit(Inst::new(Opcode::Label).target(Target::Label(exit)));
    }

    // ---- Expressions ----------------------------------------------------

    /// Lower an expression, recording its type in the side table.
    pub(crate) fn lower_expr(&mut self, e: &Expr) -> Option<RValue> {
        let value = self.lower_expr_inner(e)?;
        self.set_expr_type(e.id, value.1.clone());
        Some(value)
    }

    /// Lower an expression that must produce a value.
    pub(crate) fn lower_expr_reg(&mut self, e: &Expr) -> Option<(Reg, Type)> {
        let (reg, ty) = self.lower_expr(e)?;
        match reg {
            Some(reg) => Some((reg, ty)),
            None => {
                self.errors
                    .report(e.pos, "expression has no value".to_string());
                None
            }
        }
    }

    /// Lower an expression in a slot of type `want`, retyping bare integer
    /// literals that fit. Returns the register and the actual type; the
    /// caller decides how to report incompatibility.
    pub(crate) fn lower_expr_coerced(&mut self, e: &Expr, want: &Type) -> Option<(Reg, Type)> {
        if let ExprKind::IntLit(v) = &e.kind {
            if want.is_integer() && Self::literal_fits(want, *v) {
                let reg = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::LoadConst)
                        .dest(reg)
                        .imm(*v)
                        .ty(want.clone()),
                );
                self.set_expr_type(e.id, want.clone());
                return Some((reg, want.clone()));
            }
        }
        self.lower_expr_reg(e)
    }

    fn lower_expr_inner(&mut self, e: &Expr) -> Option<RValue> {
        match &e.kind {
            ExprKind::IntLit(v) => {
                let ty = Self::infer_int_type(*v);
                let reg = self.func().new_reg();
                self.emit(Inst::new(Opcode::LoadConst).dest(reg).imm(*v).ty(ty.clone()));
                Some((Some(reg), ty))
            }
            ExprKind::BoolLit(b) => {
                let reg = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::LoadConst)
                        .dest(reg)
                        .imm(i64::from(*b))
                        .ty(Type::Bool),
                );
                Some((Some(reg), Type::Bool))
            }
            ExprKind::StrLit(s) => Some(self.lower_string_literal(s)),
            ExprKind::Ident(name) => self.lower_ident(name, e.pos),
            ExprKind::ArrayLit(elems) => self.lower_array_literal(elems, e.pos),
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(*op, lhs, rhs, e.pos),
            ExprKind::Unary { op, operand } => self.lower_unary(*op, operand, e.pos),
            ExprKind::Call { callee, args } => self.lower_call(callee, args, e.pos),
            ExprKind::StructLit { name, fields } => self.lower_struct_literal(name, fields, e.pos),
            ExprKind::Field { base, field } => self.lower_field_load(base, field, e.pos),
            ExprKind::Index { base, index } => self.lower_index_load(base, index, e.pos),
            ExprKind::Cast { value, ty } => self.lower_cast(value, ty, e.pos),
            ExprKind::Range { .. } => {
                self.errors
                    .report(e.pos, "range expression is only valid in a loop header");
                None
            }
            ExprKind::IterChain { source, ops } => self.lower_iter_chain(source, ops, e.pos),
            ExprKind::Lambda { .. } => {
                self.errors.report(
                    e.pos,
                    "lambda expressions are only supported as iterator operator arguments",
                );
                None
            }
            ExprKind::Asm(text) => {
                let reg = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::Asm)
                        .dest(reg)
                        .ty(Type::U16)
                        .comment(text.clone()),
                );
                Some((Some(reg), Type::U16))
            }
            ExprKind::CompileTime { name, args } => {
                crate::comptime::lower_comptime_expr(self, name, args, e.pos)
            }
        }
    }

    pub(crate) fn lower_string_literal(&mut self, s: &str) -> RValue {
        let label = self.module.strings.intern(s.as_bytes());
        let reg = self.func().new_reg();
        self.emit(
            Inst::new(Opcode::LoadLabel)
                .dest(reg)
                .target(Target::StringLit(label))
                .ty(Type::Str),
        );
        (Some(reg), Type::Str)
    }

    pub(crate) fn lower_ident(&mut self, name: &str, pos: Pos) -> Option<RValue> {
        match self.resolve_name(name) {
            Some(Symbol::Var(v)) => {
                if let Some(addr) = v.buffer_addr {
                    // INTO-mode binding of a scalar element: read the
                    // static buffer.
                    let reg = self.func().new_reg();
                    self.emit(
                        Inst::new(Opcode::LoadDirect)
                            .dest(reg)
                            .imm(i64::from(addr))
                            .ty(v.ty.clone()),
                    );
                    return Some((Some(reg), v.ty));
                }
                if v.is_param && !v.direct {
                    // SMC candidate: the value lives in a patched
                    // immediate, addressed by parameter slot.
                    let reg = self.func().new_reg();
                    self.emit(
                        Inst::new(Opcode::LoadParam)
                            .dest(reg)
                            .target(Target::Param(v.param_index.unwrap_or(0)))
                            .ty(v.ty.clone()),
                    );
                    return Some((Some(reg), v.ty));
                }
                if v.direct {
                    return Some((Some(v.reg), v.ty));
                }
                let reg = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::LoadVar)
                        .dest(reg)
                        .target(Target::Symbol(name.to_string()))
                        .ty(v.ty.clone()),
                );
                Some((Some(reg), v.ty))
            }
            Some(Symbol::Const(c)) => self.lower_const_value(&c, name, pos),
            Some(Symbol::Global(g)) => {
                let reg = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::LoadVar)
                        .dest(reg)
                        .target(Target::Symbol(g.storage))
                        .ty(g.ty.clone()),
                );
                Some((Some(reg), g.ty))
            }
            Some(Symbol::Func(id)) => {
                let sym = self.funcs[id].clone();
                if !sym.is_local {
                    self.note_external(&sym);
                }
                let ty = Type::Function(std::rc::Rc::new(minz_codegen::ir::FunctionType {
                    params: sym.params.iter().map(|(_, t)| t.clone()).collect(),
                    ret: sym.ret.clone(),
                }));
                let reg = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::LoadLabel)
                        .dest(reg)
                        .target(Target::Symbol(sym.mangled))
                        .ty(ty.clone()),
                );
                Some((Some(reg), ty))
            }
            Some(Symbol::Overloads(set)) => {
                self.errors.report(
                    pos,
                    format!("ambiguous reference to overloaded function `{}`", set.base),
                );
                None
            }
            Some(Symbol::Type(_)) => {
                self.errors
                    .report(pos, format!("type `{name}` used as a value"));
                None
            }
            Some(Symbol::Module(_)) => {
                self.errors
                    .report(pos, format!("module `{name}` used as a value"));
                None
            }
            None => {
                let names = self.scopes.visible_names();
                self.errors
                    .undefined(pos, "identifier", name, names.iter().map(|s| s.as_str()));
                None
            }
        }
    }

    fn lower_const_value(&mut self, c: &ConstSymbol, name: &str, pos: Pos) -> Option<RValue> {
        match &c.value {
            Some(ConstValue::Int(v)) => {
                let reg = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::LoadConst)
                        .dest(reg)
                        .imm(*v)
                        .ty(c.ty.clone()),
                );
                Some((Some(reg), c.ty.clone()))
            }
            Some(ConstValue::Bool(b)) => {
                let reg = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::LoadConst)
                        .dest(reg)
                        .imm(i64::from(*b))
                        .ty(Type::Bool),
                );
                Some((Some(reg), Type::Bool))
            }
            Some(ConstValue::Str(s)) => {
                let s = s.clone();
                Some(self.lower_string_literal(&s))
            }
            None => {
                // The initializer did not fold locally; the module-wide
                // constant folder resolves the load.
                let Some(storage) = &c.storage else {
                    self.errors.report(
                        pos,
                        format!("constant `{name}` has no usable compile-time value"),
                    );
                    return None;
                };
                let reg = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::LoadVar)
                        .dest(reg)
                        .target(Target::Symbol(storage.clone()))
                        .ty(c.ty.clone()),
                );
                Some((Some(reg), c.ty.clone()))
            }
        }
    }

    fn lower_array_literal(&mut self, elems: &[Expr], pos: Pos) -> Option<RValue> {
        let Some(first) = elems.first() else {
            self.errors
                .report(pos, "cannot infer the element type of an empty array literal");
            return None;
        };
        let (first_reg, elem_ty) = self.lower_expr_reg(first)?;
        let esize = i64::from(elem_ty.size());
        let len = elems.len() as i64;
        let buffer = self.func().new_reg();
        self.emit(
            Inst::new(Opcode::Alloc)
                .dest(buffer)
                .imm(esize * len)
                .ty(Type::Array {
                    elem: Box::new(elem_ty.clone()),
                    len: len as i32,
                }),
        );
        for (i, elem) in elems.iter().enumerate() {
            let value = if i == 0 {
                first_reg
            } else {
                let (reg, actual) = self.lower_expr_coerced(elem, &elem_ty)?;
                if !elem_ty.is_assignable_from(&actual) {
                    self.errors.report(
                        elem.pos,
                        format!("array element has type {actual}, expected {elem_ty}"),
                    );
                    return None;
                }
                reg
            };
            let offset = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::LoadConst)
                    .dest(offset)
                    .imm(i as i64 * esize)
                    .ty(Type::U16),
            );
            let slot = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::Add)
                    .dest(slot)
                    .src1(buffer)
                    .src2(offset)
                    .ty(Type::U16),
            );
            self.emit(
                Inst::new(Opcode::StoreIndex)
                    .src1(slot)
                    .src2(value)
                    .ty(elem_ty.clone()),
            );
        }
        Some((
            Some(buffer),
            Type::Array {
                elem: Box::new(elem_ty),
                len: len as i32,
            },
        ))
    }

    fn binop_opcode(op: BinOp) -> Opcode {
        match op {
            BinOp::Add => Opcode::Add,
            BinOp::Sub => Opcode::Sub,
            BinOp::Mul => Opcode::Mul,
            BinOp::Div => Opcode::Div,
            BinOp::Mod => Opcode::Mod,
            BinOp::And => Opcode::And,
            BinOp::Or => Opcode::Or,
            BinOp::Xor => Opcode::Xor,
            BinOp::Shl => Opcode::Shl,
            BinOp::Shr => Opcode::Shr,
            BinOp::Eq => Opcode::Eq,
            BinOp::Ne => Opcode::Ne,
            BinOp::Lt => Opcode::Lt,
            BinOp::Le => Opcode::Le,
            BinOp::Gt => Opcode::Gt,
            BinOp::Ge => Opcode::Ge,
        }
    }

    pub(crate) fn unify_types(
        &mut self,
        a: &Type,
        b: &Type,
        op: &str,
        pos: Pos,
    ) -> Option<Type> {
        if a == b {
            return Some(a.clone());
        }
        if a.is_assignable_from(b) {
            return Some(a.clone());
        }
        if b.is_assignable_from(a) {
            return Some(b.clone());
        }
        self.errors.report(
            pos,
            format!("operator `{op}` cannot combine {a} and {b}"),
        );
        None
    }

    fn lower_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, pos: Pos) -> Option<RValue> {
        // A literal operand adopts the other side's width when it fits.
        let (lhs_reg, lhs_ty, rhs_reg, rhs_ty) = match (&lhs.kind, &rhs.kind) {
            (_, ExprKind::IntLit(_)) if !matches!(&lhs.kind, ExprKind::IntLit(_)) => {
                let (lr, lt) = self.lower_expr_reg(lhs)?;
                let (rr, rt) = self.lower_expr_coerced(rhs, &lt)?;
                (lr, lt, rr, rt)
            }
            (ExprKind::IntLit(_), _) if !matches!(&rhs.kind, ExprKind::IntLit(_)) => {
                let (rr, rt) = self.lower_expr_reg(rhs)?;
                let (lr, lt) = self.lower_expr_coerced(lhs, &rt)?;
                (lr, lt, rr, rt)
            }
            _ => {
                let (lr, lt) = self.lower_expr_reg(lhs)?;
                let (rr, rt) = self.lower_expr_reg(rhs)?;
                (lr, lt, rr, rt)
            }
        };

        let opcode = Self::binop_opcode(op);
        let operand_ty = self.unify_types(&lhs_ty, &rhs_ty, &op.to_string(), pos)?;
        if matches!(op, BinOp::And | BinOp::Or | BinOp::Xor) {
            // Legal on integers (bitwise) and bools (logical); anything
            // else was already rejected by unification of unlike types.
            if !operand_ty.is_integer() && operand_ty != Type::Bool {
                self.errors.report(
                    pos,
                    format!("operator `{op}` cannot combine {lhs_ty} and {rhs_ty}"),
                );
                return None;
            }
        } else if !operand_ty.is_integer() && !opcode.is_comparison() {
            self.errors.report(
                pos,
                format!("operator `{op}` needs integer operands, found {operand_ty}"),
            );
            return None;
        }

        let dest = self.func().new_reg();
        self.emit(
            Inst::new(opcode)
                .dest(dest)
                .src1(lhs_reg)
                .src2(rhs_reg)
                .ty(operand_ty.clone()),
        );
        let result = if opcode.is_comparison() {
            Type::Bool
        } else {
            operand_ty
        };
        Some((Some(dest), result))
    }

    fn lower_unary(&mut self, op: UnOp, operand: &Expr, pos: Pos) -> Option<RValue> {
        if op == UnOp::AddrOf {
            let (reg, pointee) = self.lower_address(operand, pos)?;
            return Some((Some(reg), Type::Pointer(Box::new(pointee))));
        }
        let (src, ty) = self.lower_expr_reg(operand)?;
        let (opcode, result) = match op {
            UnOp::Neg => {
                if !ty.is_integer() {
                    self.errors
                        .report(pos, format!("cannot negate a value of type {ty}"));
                    return None;
                }
                (Opcode::Neg, ty)
            }
            UnOp::Not => {
                if ty != Type::Bool {
                    self.errors
                        .report(pos, format!("`!` needs a bool operand, found {ty}"));
                    return None;
                }
                (Opcode::Not, Type::Bool)
            }
            UnOp::BitNot => {
                if !ty.is_integer() {
                    self.errors
                        .report(pos, format!("`~` needs an integer operand, found {ty}"));
                    return None;
                }
                (Opcode::BitNot, ty)
            }
            UnOp::AddrOf => unreachable!(),
        };
        let dest = self.func().new_reg();
        self.emit(
            Inst::new(opcode)
                .dest(dest)
                .src1(src)
                .ty(result.clone()),
        );
        Some((Some(dest), result))
    }

    /// Lower an expression to the address of its storage. Returns the
    /// address register and the pointee type.
    pub(crate) fn lower_address(&mut self, e: &Expr, pos: Pos) -> Option<(Reg, Type)> {
        match &e.kind {
            ExprKind::Ident(name) => match self.resolve_name(name) {
                Some(Symbol::Var(v)) => {
                    if let Some(addr) = v.buffer_addr {
                        let reg = self.func().new_reg();
                        self.emit(
                            Inst::new(Opcode::LoadConst)
                                .dest(reg)
                                .imm(i64::from(addr))
                                .ty(Type::U16),
                        );
                        return Some((reg, v.ty));
                    }
                    if v.direct {
                        self.errors.report(
                            pos,
                            format!("cannot take the address of loop binding `{name}`"),
                        );
                        return None;
                    }
                    let reg = self.func().new_reg();
                    self.emit(
                        Inst::new(Opcode::LoadLabel)
                            .dest(reg)
                            .target(Target::Symbol(name.to_string()))
                            .ty(Type::Pointer(Box::new(v.ty.clone()))),
                    );
                    Some((reg, v.ty))
                }
                Some(Symbol::Global(g)) => {
                    let reg = self.func().new_reg();
                    self.emit(
                        Inst::new(Opcode::LoadLabel)
                            .dest(reg)
                            .target(Target::Symbol(g.storage))
                            .ty(Type::Pointer(Box::new(g.ty.clone()))),
                    );
                    Some((reg, g.ty))
                }
                _ => {
                    self.errors
                        .report(pos, format!("cannot take the address of `{name}`"));
                    None
                }
            },
            ExprKind::Index { base, index } => self.lower_element_address(base, index, pos),
            ExprKind::Field { base, field } => {
                let (base_addr, base_ty) = self.lower_struct_base(base, pos)?;
                let Type::Struct(s) = &base_ty else {
                    self.errors.report(
                        pos,
                        format!("field access on non-struct type {base_ty}"),
                    );
                    return None;
                };
                let Some((offset, fty)) = s.field(field) else {
                    self.errors
                        .report(pos, format!("no field `{field}` on {}", s.name));
                    return None;
                };
                let fty = fty.clone();
                let off = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::LoadConst)
                        .dest(off)
                        .imm(i64::from(offset))
                        .ty(Type::U16),
                );
                let addr = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::Add)
                        .dest(addr)
                        .src1(base_addr)
                        .src2(off)
                        .ty(Type::U16),
                );
                Some((addr, fty))
            }
            _ => {
                self.errors.report(pos, "expression has no address");
                None
            }
        }
    }

    /// The address of `base[index]`'s storage, scaled by the element size.
    fn lower_element_address(
        &mut self,
        base: &Expr,
        index: &Expr,
        pos: Pos,
    ) -> Option<(Reg, Type)> {
        let (base_addr, elem_ty) = self.lower_indexable(base, pos)?;
        let (index_reg, index_ty) = self.lower_expr_reg(index)?;
        if !index_ty.is_integer() {
            self.errors
                .report(pos, format!("index must be an integer, found {index_ty}"));
            return None;
        }
        let esize = elem_ty.size();
        let offset = if esize == 1 {
            index_reg
        } else {
            let size_reg = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::LoadConst)
                    .dest(size_reg)
                    .imm(i64::from(esize))
                    .ty(Type::U16),
            );
            let scaled = self.func().new_reg();
            self.emit(
                Inst::new(Opcode::Mul)
                    .dest(scaled)
                    .src1(index_reg)
                    .src2(size_reg)
                    .ty(Type::U16),
            );
            scaled
        };
        let addr = self.func().new_reg();
        self.emit(
            Inst::new(Opcode::Add)
                .dest(addr)
                .src1(base_addr)
                .src2(offset)
                .ty(Type::U16)
                .hint(RegHint::HlDe),
        );
        Some((addr, elem_ty))
    }

    /// Lower `base` of an index access to (base address, element type),
    /// accepting arrays and pointers.
    pub(crate) fn lower_indexable(&mut self, base: &Expr, pos: Pos) -> Option<(Reg, Type)> {
        let ty = self.infer_expr_type(base);
        match ty {
            Some(Type::Array { elem, .. }) => {
                let (addr, _) = self.lower_address(base, pos)?;
                Some((addr, *elem))
            }
            Some(Type::Pointer(elem)) => {
                let (reg, _) = self.lower_expr_reg(base)?;
                Some((reg, *elem))
            }
            Some(other) => {
                self.errors
                    .report(pos, format!("cannot index a value of type {other}"));
                None
            }
            None => {
                // Fall back to lowering for the error position.
                let (_, other) = self.lower_expr_reg(base)?;
                self.errors
                    .report(pos, format!("cannot index a value of type {other}"));
                None
            }
        }
    }

    fn lower_index_load(&mut self, base: &Expr, index: &Expr, pos: Pos) -> Option<RValue> {
        let (base_addr, elem_ty) = self.lower_indexable(base, pos)?;
        let (index_reg, index_ty) = self.lower_expr_reg(index)?;
        if !index_ty.is_integer() {
            self.errors
                .report(pos, format!("index must be an integer, found {index_ty}"));
            return None;
        }
        let dest = self.func().new_reg();
        self.emit(
            Inst::new(Opcode::LoadIndex)
                .dest(dest)
                .src1(base_addr)
                .src2(index_reg)
                .ty(elem_ty.clone()),
        );
        Some((Some(dest), elem_ty))
    }

    /// Indexed element store: verify the base is indexable, type-check the
    /// value against the element type, and store through the computed
    /// address.
    fn lower_index_store(&mut self, base: &Expr, index: &Expr, value: &Expr, pos: Pos) {
        let Some((addr, elem_ty)) = self.lower_element_address(base, index, pos) else {
            return;
        };
        let Some((value_reg, actual)) = self.lower_expr_coerced(value, &elem_ty) else {
            return;
        };
        if !elem_ty.is_assignable_from(&actual) {
            self.errors.report(
                pos,
                format!("cannot store {actual} into an array of {elem_ty}"),
            );
            return;
        }
        self.emit(
            Inst::new(Opcode::StoreIndex)
                .src1(addr)
                .src2(value_reg)
                .ty(elem_ty),
        );
    }

    /// Lower `base` of a struct field access to (address, struct type),
    /// looking through one level of pointer indirection.
    fn lower_struct_base(&mut self, base: &Expr, pos: Pos) -> Option<(Reg, Type)> {
        match self.infer_expr_type(base) {
            Some(Type::Pointer(inner)) if matches!(*inner, Type::Struct(_)) => {
                let (reg, _) = self.lower_expr_reg(base)?;
                Some((reg, *inner))
            }
            Some(Type::Struct(_)) => {
                // A struct value's register holds its storage address.
                match &base.kind {
                    ExprKind::Ident(_) | ExprKind::Index { .. } | ExprKind::Field { .. } => {
                        self.lower_address(base, pos)
                    }
                    _ => {
                        let (reg, ty) = self.lower_expr_reg(base)?;
                        Some((reg, ty))
                    }
                }
            }
            Some(other) => {
                self.errors
                    .report(pos, format!("field access on non-struct type {other}"));
                None
            }
            None => {
                let (_, other) = self.lower_expr_reg(base)?;
                self.errors
                    .report(pos, format!("field access on non-struct type {other}"));
                None
            }
        }
    }

    fn lower_field_load(&mut self, base: &Expr, field: &str, pos: Pos) -> Option<RValue> {
        // Deeply-dotted module references: `zx.screen.SCREEN_START`.
        if matches!(base.kind, ExprKind::Field { .. }) {
            if let Some(head) = flatten_name(base) {
                let dotted = format!("{head}.{field}");
                if self.resolve_name(&dotted).is_some() {
                    return self.lower_ident(&dotted, pos);
                }
            }
        }
        // Module-qualified names and enum variants first: `m.f`, `Color.RED`.
        if let ExprKind::Ident(head) = &base.kind {
            match self.resolve_name(head) {
                Some(Symbol::Module(m)) => {
                    let qualified = format!("{m}.{field}");
                    return self.lower_ident(&qualified, pos);
                }
                Some(Symbol::Type(Type::Enum(e))) => {
                    let Some(value) = e.variant(field) else {
                        self.errors.report(
                            pos,
                            format!("enum {} has no variant `{field}`", e.name),
                        );
                        return None;
                    };
                    let reg = self.func().new_reg();
                    let ty = Type::Enum(e.clone());
                    self.emit(
                        Inst::new(Opcode::LoadConst)
                            .dest(reg)
                            .imm(value)
                            .ty(ty.clone()),
                    );
                    return Some((Some(reg), ty));
                }
                Some(Symbol::Var(v)) if v.buffer_addr.is_some() => {
                    // INTO-mode element: the field lives at a fixed buffer
                    // address.
                    if let Type::Struct(s) = &v.ty {
                        let Some((offset, fty)) = s.field(field) else {
                            self.errors
                                .report(pos, format!("no field `{field}` on {}", s.name));
                            return None;
                        };
                        let fty = fty.clone();
                        let addr = i64::from(v.buffer_addr.unwrap()) + i64::from(offset);
                        let reg = self.func().new_reg();
                        self.emit(
                            Inst::new(Opcode::LoadDirect)
                                .dest(reg)
                                .imm(addr)
                                .ty(fty.clone()),
                        );
                        return Some((Some(reg), fty));
                    }
                }
                _ => {}
            }
        }

        match self.infer_expr_type(base) {
            Some(Type::Bits(b)) => {
                let Some(bf) = b.field(field) else {
                    self.errors
                        .report(pos, format!("no bit field `{field}` on {}", b.name));
                    return None;
                };
                let (src, _) = self.lower_expr_reg(base)?;
                let result_ty = if bf.bit_width <= 8 { Type::U8 } else { Type::U16 };
                let dest = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::LoadBits)
                        .dest(dest)
                        .src1(src)
                        .imm(i64::from(bf.bit_offset))
                        .imm2(i64::from(bf.bit_width))
                        .ty(b.underlying.clone()),
                );
                Some((Some(dest), result_ty))
            }
            _ => {
                let (addr, base_ty) = self.lower_struct_base(base, pos)?;
                let Type::Struct(s) = &base_ty else {
                    return None;
                };
                let Some((offset, fty)) = s.field(field) else {
                    self.errors
                        .report(pos, format!("no field `{field}` on {}", s.name));
                    return None;
                };
                let fty = fty.clone();
                let dest = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::LoadField)
                        .dest(dest)
                        .src1(addr)
                        .imm(i64::from(offset))
                        .ty(fty.clone()),
                );
                Some((Some(dest), fty))
            }
        }
    }

    fn lower_field_store(&mut self, base: &Expr, field: &str, value: &Expr, pos: Pos) {
        // INTO-mode buffer field store.
        if let ExprKind::Ident(head) = &base.kind {
            if let Some(Symbol::Var(v)) = self.resolve_name(head) {
                if let (Some(buffer), Type::Struct(s)) = (v.buffer_addr, &v.ty) {
                    let Some((offset, fty)) = s.field(field) else {
                        self.errors
                            .report(pos, format!("no field `{field}` on {}", s.name));
                        return;
                    };
                    let fty = fty.clone();
                    let Some((value_reg, actual)) = self.lower_expr_coerced(value, &fty) else {
                        return;
                    };
                    if !fty.is_assignable_from(&actual) {
                        self.errors.report(
                            pos,
                            format!("cannot store {actual} into field `{field}` of type {fty}"),
                        );
                        return;
                    }
                    self.emit(
                        Inst::new(Opcode::StoreDirect)
                            .src1(value_reg)
                            .imm(i64::from(buffer) + i64::from(offset))
                            .ty(fty),
                    );
                    return;
                }
            }
        }

        match self.infer_expr_type(base) {
            Some(Type::Bits(b)) => {
                let Some(bf) = b.field(field) else {
                    self.errors
                        .report(pos, format!("no bit field `{field}` on {}", b.name));
                    return;
                };
                let field_ty = if bf.bit_width <= 8 { Type::U8 } else { Type::U16 };
                let Some((current, _)) = self.lower_expr_reg(base) else {
                    return;
                };
                let Some((value_reg, _)) = self.lower_expr_coerced(value, &field_ty) else {
                    return;
                };
                let updated = self.func().new_reg();
                self.emit(
                    Inst::new(Opcode::StoreBits)
                        .dest(updated)
                        .src1(current)
                        .src2(value_reg)
                        .imm(i64::from(bf.bit_offset))
                        .imm2(i64::from(bf.bit_width))
                        .ty(b.underlying.clone()),
                );
                // Write the updated underlying value back to its variable.
                if let ExprKind::Ident(name) = &base.kind {
                    self.emit(
                        Inst::new(Opcode::StoreVar)
                            .src1(updated)
                            .target(Target::Symbol(name.clone()))
                            .ty(Type::Bits(b)),
                    );
                } else {
                    self.errors
                        .report(pos, "bit-field store needs a named variable");
                }
            }
            _ => {
                let Some((addr, base_ty)) = self.lower_struct_base(base, pos) else {
                    return;
                };
                let Type::Struct(s) = &base_ty else {
                    return;
                };
                let Some((offset, fty)) = s.field(field) else {
                    self.errors
                        .report(pos, format!("no field `{field}` on {}", s.name));
                    return;
                };
                let fty = fty.clone();
                let Some((value_reg, actual)) = self.lower_expr_coerced(value, &fty) else {
                    return;
                };
                if !fty.is_assignable_from(&actual) {
                    self.errors.report(
                        pos,
                        format!("cannot store {actual} into field `{field}` of type {fty}"),
                    );
                    return;
                }
                self.emit(
                    Inst::new(Opcode::StoreField)
                        .src1(addr)
                        .src2(value_reg)
                        .imm(i64::from(offset))
                        .ty(fty),
                );
            }
        }
    }

    fn lower_struct_literal(
        &mut self,
        name: &str,
        fields: &[(String, Expr)],
        pos: Pos,
    ) -> Option<RValue> {
        let Some(Symbol::Type(ty @ Type::Struct(_))) = self.resolve_name(name) else {
            let names = self.scopes.visible_names();
            self.errors
                .undefined(pos, "struct type", name, names.iter().map(|s| s.as_str()));
            return None;
        };
        let Type::Struct(s) = ty.clone() else {
            unreachable!()
        };

        let buffer = self.func().new_reg();
        self.emit(
            Inst::new(Opcode::Alloc)
                .dest(buffer)
                .imm(i64::from(ty.size()))
                .ty(ty.clone()),
        );
        for f in &s.fields {
            let Some((_, init)) = fields.iter().find(|(n, _)| n == &f.name) else {
                self.errors.report(
                    pos,
                    format!("missing field `{}` in {} literal", f.name, s.name),
                );
                continue;
            };
            let Some((value_reg, actual)) = self.lower_expr_coerced(init, &f.ty) else {
                continue;
            };
            if !f.ty.is_assignable_from(&actual) {
                self.errors.report(
                    init.pos,
                    format!(
                        "field `{}` of {} has type {}, found {actual}",
                        f.name, s.name, f.ty
                    ),
                );
                continue;
            }
            let (offset, _) = s.field(&f.name).expect("field exists");
            self.emit(
                Inst::new(Opcode::StoreField)
                    .src1(buffer)
                    .src2(value_reg)
                    .imm(i64::from(offset))
                    .ty(f.ty.clone()),
            );
        }
        for (n, _) in fields {
            if s.field(n).is_none() {
                self.errors
                    .report(pos, format!("no field `{n}` on {}", s.name));
            }
        }
        Some((Some(buffer), ty))
    }

    fn lower_cast(&mut self, value: &Expr, ty: &minz_ast::TypeExpr, pos: Pos) -> Option<RValue> {
        let (reg, src_ty) = self.lower_expr_reg(value)?;
        let target = self.convert_type(ty, pos)?;
        if !src_ty.can_cast_to(&target) {
            self.errors
                .report(pos, format!("cannot cast {src_ty} to {target}"));
            return None;
        }
        // Casts are free at the IR level: same register, new recorded
        // type. The backend widens or narrows at use sites from the
        // instruction types.
        Some((Some(reg), target))
    }

    /// Lower a call. The callee must be a plain or module-qualified name;
    /// resolution goes through the overload machinery.
    fn lower_call(&mut self, callee: &Expr, args: &[Expr], pos: Pos) -> Option<RValue> {
        let Some(name) = flatten_name(callee) else {
            self.errors.report(pos, "call target must be a function name");
            return None;
        };

        // Interpolated print strings expand into a sequence of prints:
        // constant parts coalesce into literals, runtime parts print at
        // their inferred type.
        if matches!(name.as_str(), "print_string" | "std.print_string") {
            if let [arg] = args {
                if let ExprKind::StrLit(s) = &arg.kind {
                    if s.contains('{') {
                        let s = s.clone();
                        return crate::comptime::lower_interpolated_print(self, &s, arg.pos);
                    }
                }
            }
        }

        let id = crate::overload::resolve_call(self, &name, args, pos)?;
        let sym = self.funcs[id].clone();

        let mut arg_regs = Vec::with_capacity(args.len());
        for (arg, (_, want)) in args.iter().zip(&sym.params) {
            let Some((reg, actual)) = self.lower_expr_coerced(arg, want) else {
                return None;
            };
            if !want.is_assignable_from(&actual) {
                self.errors.report(
                    arg.pos,
                    format!("argument has type {actual}, expected {want}"),
                );
                return None;
            }
            arg_regs.push(reg);
        }

        if let Some(cur) = &mut self.cur {
            if sym.is_local && self.funcs[cur.id].mangled == sym.mangled {
                cur.func.flags.recursive = true;
            }
        }
        if !sym.is_local {
            self.note_external(&sym);
        }

        let dest = if sym.ret == Type::Void {
            None
        } else {
            Some(self.func().new_reg())
        };
        let mut inst = Inst::new(Opcode::Call)
            .target(Target::Symbol(sym.mangled.clone()))
            .args(arg_regs)
            .ty(sym.ret.clone());
        if let Some(dest) = dest {
            inst = inst.dest(dest);
        }
        self.emit(inst);
        Some((dest, sym.ret))
    }

    /// Best-effort, non-emitting type inference, used where an argument's
    /// type must be known before lowering (overload resolution, base-type
    /// dispatch). Results land in the side table.
    pub(crate) fn infer_expr_type(&mut self, e: &Expr) -> Option<Type> {
        if let Some(ty) = self.expr_types.get(&e.id) {
            return Some(ty.clone());
        }
        let ty = match &e.kind {
            ExprKind::IntLit(v) => Some(Self::infer_int_type(*v)),
            ExprKind::BoolLit(_) => Some(Type::Bool),
            ExprKind::StrLit(_) => Some(Type::Str),
            ExprKind::Ident(name) => match self.resolve_name(name)? {
                Symbol::Var(v) => Some(v.ty),
                Symbol::Const(c) => Some(c.ty),
                Symbol::Global(g) => Some(g.ty),
                Symbol::Func(id) => {
                    let sym = &self.funcs[id];
                    Some(Type::Function(std::rc::Rc::new(
                        minz_codegen::ir::FunctionType {
                            params: sym.params.iter().map(|(_, t)| t.clone()).collect(),
                            ret: sym.ret.clone(),
                        },
                    )))
                }
                _ => None,
            },
            ExprKind::Cast { ty, .. } => self.convert_type(ty, e.pos),
            ExprKind::Unary { op, operand } => match op {
                UnOp::AddrOf => {
                    let inner = self.infer_expr_type(operand)?;
                    Some(Type::Pointer(Box::new(inner)))
                }
                UnOp::Not => Some(Type::Bool),
                UnOp::Neg | UnOp::BitNot => self.infer_expr_type(operand),
            },
            ExprKind::Binary { op, lhs, rhs } => {
                if Self::binop_opcode(*op).is_comparison() {
                    Some(Type::Bool)
                } else {
                    let lt = self.infer_expr_type(lhs);
                    let rt = self.infer_expr_type(rhs);
                    match (lt, rt) {
                        (Some(a), Some(b)) if a.is_assignable_from(&b) => Some(a),
                        (Some(a), Some(b)) if b.is_assignable_from(&a) => Some(b),
                        (Some(a), None) => Some(a),
                        (None, Some(b)) => Some(b),
                        _ => None,
                    }
                }
            }
            ExprKind::Field { base, field } => {
                if matches!(base.kind, ExprKind::Field { .. }) {
                    if let Some(head) = flatten_name(base) {
                        match self.resolve_name(&format!("{head}.{field}")) {
                            Some(Symbol::Const(c)) => return Some(c.ty),
                            Some(Symbol::Global(g)) => return Some(g.ty),
                            _ => {}
                        }
                    }
                }
                if let ExprKind::Ident(head) = &base.kind {
                    match self.resolve_name(head) {
                        Some(Symbol::Type(Type::Enum(en))) => {
                            return Some(Type::Enum(en));
                        }
                        Some(Symbol::Module(m)) => {
                            let qualified = format!("{m}.{field}");
                            return match self.resolve_name(&qualified)? {
                                Symbol::Const(c) => Some(c.ty),
                                Symbol::Global(g) => Some(g.ty),
                                _ => None,
                            };
                        }
                        _ => {}
                    }
                }
                match self.infer_expr_type(base)? {
                    Type::Struct(s) => s.field(field).map(|(_, t)| t.clone()),
                    Type::Pointer(inner) => match *inner {
                        Type::Struct(s) => s.field(field).map(|(_, t)| t.clone()),
                        _ => None,
                    },
                    Type::Bits(b) => b.field(field).map(|bf| {
                        if bf.bit_width <= 8 {
                            Type::U8
                        } else {
                            Type::U16
                        }
                    }),
                    _ => None,
                }
            }
            ExprKind::Index { base, .. } => match self.infer_expr_type(base)? {
                Type::Array { elem, .. } | Type::Pointer(elem) => Some(*elem),
                _ => None,
            },
            _ => None,
        };
        if let Some(ty) = &ty {
            self.set_expr_type(e.id, ty.clone());
        }
        ty
    }
}

/// Flatten an identifier or dotted field chain into a name.
pub(crate) fn flatten_name(e: &Expr) -> Option<String> {
    match &e.kind {
        ExprKind::Ident(name) => Some(name.clone()),
        ExprKind::Field { base, field } => {
            let head = flatten_name(base)?;
            Some(format!("{head}.{field}"))
        }
        _ => None,
    }
}
