//! Compile-time execution: `@minz` blocks, string interpolation, and the
//! `@`-function family.
//!
//! The executor is a small tree-walking interpreter over a whitelisted
//! subset of the language: variable declarations, integer ranges, `for`
//! loops, simple binary expressions, and the `@emit`/`@save_binary`/
//! `@incbin`/`@log.*` directives. Emitted text is concatenated, re-parsed
//! through the parser collaborator, and folded back into the ongoing
//! analysis: constants and globals immediately, functions as signatures
//! with their bodies queued.

use crate::analyzer::Analyzer;
use crate::lower::RValue;
use crate::scopes::{ConstSymbol, ConstValue, Symbol};
use minz_ast::{BinOp, Decl, DeclKind, Expr, ExprKind, MinzBody, Pos, Stmt, StmtKind};
use minz_codegen::ir::{Inst, Opcode, Type};
use rustc_hash::FxHashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Upper bound on compile-time loop iterations; a runaway range is a
/// diagnostic, not a hang.
const MAX_CT_ITERATIONS: i64 = 65536;

/// Minimum level of `@log` output forwarded to the diagnostic stream.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum LogLevel {
    /// Everything.
    Trace,
    /// Debug and up.
    Debug,
    /// Info and up; the default.
    Info,
    /// Warnings and errors.
    Warn,
    /// Errors only.
    Error,
    /// Nothing at all.
    None,
}

impl std::str::FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "none" => Ok(Self::None),
            _ => Err(()),
        }
    }
}

/// A compile-time value.
#[derive(Clone, Debug, PartialEq)]
enum CtValue {
    Int(i64),
    Bool(bool),
    Str(String),
    Range(i64, i64),
    Bytes(Vec<u8>),
}

impl CtValue {
    fn render(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Str(s) => s.clone(),
            Self::Range(a, b) => format!("{a}..{b}"),
            Self::Bytes(b) => format!("<{} byte(s)>", b.len()),
        }
    }
}

type Env = FxHashMap<String, CtValue>;

/// Execute an `@minz { .. }` block and fold its generated declarations
/// back into the analysis.
pub(crate) fn execute_block(az: &mut Analyzer, body: &MinzBody, pos: Pos) {
    let mut emitted: Vec<String> = Vec::new();
    match body {
        MinzBody::Stmts(stmts) => {
            let mut env = Env::default();
            exec_stmts(az, &mut env, &mut emitted, stmts);
        }
        // Raw fallback: the block text is itself the generated source.
        MinzBody::Raw(text) => emitted.push(text.clone()),
    }
    let generated = emitted.join("\n");
    if generated.trim().is_empty() {
        return;
    }
    log::debug!("compile-time block at {pos} generated {} byte(s)", generated.len());

    let decls = match az.parser.parse(&generated, "<compile-time>", az.ids) {
        Ok(decls) => decls,
        Err(e) => {
            az.errors.report(
                pos,
                format!("compile-time block generated invalid code: {}", e.message),
            );
            return;
        }
    };
    fold_back(az, decls);
}

/// Constants and globals are analyzed immediately; functions register
/// their signatures and queue their bodies; nested blocks run in turn.
fn fold_back(az: &mut Analyzer, decls: Vec<Decl>) {
    crate::declarations::first_pass(az, &decls);
    for decl in decls {
        match decl.kind {
            DeclKind::Function(f) => {
                let key = (f.name.clone(), decl.pos.offset);
                if let Some(&id) = az.sig_map.get(&key) {
                    az.pending_bodies.push((id, f));
                }
            }
            DeclKind::MinzBlock(body) => execute_block(az, &body, decl.pos),
            _ => {}
        }
    }
}

fn exec_stmts(az: &mut Analyzer, env: &mut Env, emitted: &mut Vec<String>, stmts: &[Stmt]) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Let { name, value, .. } => {
                let Some(value) = value else {
                    az.errors
                        .report(stmt.pos, "compile-time variables need an initializer");
                    continue;
                };
                if let Some(v) = eval(az, env, value) {
                    env.insert(name.clone(), v);
                }
            }
            StmtKind::Assign { target, value } => {
                let ExprKind::Ident(name) = &target.kind else {
                    az.errors
                        .report(stmt.pos, "compile-time assignment needs a plain variable");
                    continue;
                };
                if !env.contains_key(name) {
                    az.errors.report(
                        stmt.pos,
                        format!("unknown compile-time variable `{name}`"),
                    );
                    continue;
                }
                if let Some(v) = eval(az, env, value) {
                    env.insert(name.clone(), v);
                }
            }
            StmtKind::For { var, lo, hi, body } => {
                let bounds = eval(az, env, lo).zip(eval(az, env, hi));
                let Some((CtValue::Int(lo), CtValue::Int(hi))) = bounds else {
                    az.errors
                        .report(stmt.pos, "compile-time loop bounds must be integers");
                    continue;
                };
                if hi - lo > MAX_CT_ITERATIONS {
                    az.errors.report(
                        stmt.pos,
                        format!("compile-time loop runs more than {MAX_CT_ITERATIONS} times"),
                    );
                    continue;
                }
                for i in lo..hi {
                    env.insert(var.clone(), CtValue::Int(i));
                    exec_stmts(az, env, emitted, body);
                }
            }
            StmtKind::Expr(e) => exec_effect(az, env, emitted, e, stmt.pos),
            _ => {
                az.errors.report(
                    stmt.pos,
                    "statement not supported in a compile-time block",
                );
            }
        }
    }
}

fn exec_effect(az: &mut Analyzer, env: &mut Env, emitted: &mut Vec<String>, e: &Expr, pos: Pos) {
    let ExprKind::CompileTime { name, args } = &e.kind else {
        let _ = eval(az, env, e);
        return;
    };
    match name.as_str() {
        "emit" => {
            let Some(CtValue::Str(line)) = args.first().and_then(|a| eval(az, env, a)) else {
                az.errors.report(pos, "@emit needs a string argument");
                return;
            };
            emitted.push(line);
        }
        "save_binary" => {
            let path = args.first().and_then(|a| eval(az, env, a));
            let data = args.get(1).and_then(|a| eval(az, env, a));
            let (Some(CtValue::Str(path)), Some(data)) = (path, data) else {
                az.errors
                    .report(pos, "@save_binary needs a path and a data argument");
                return;
            };
            let bytes = match data {
                CtValue::Bytes(b) => b,
                CtValue::Str(s) => s.into_bytes(),
                other => {
                    az.errors.report(
                        pos,
                        format!("@save_binary cannot write a {} value", kind_name(&other)),
                    );
                    return;
                }
            };
            // Scoped write; the handle is gone before analysis resumes.
            if let Err(e) = std::fs::write(&path, bytes) {
                az.errors
                    .report(pos, format!("@save_binary `{path}`: {e}"));
            }
        }
        "incbin" => {
            let Some(CtValue::Str(path)) = args.first().and_then(|a| eval(az, env, a)) else {
                az.errors.report(pos, "@incbin needs a path argument");
                return;
            };
            emitted.push(format!("@incbin(\"{path}\")"));
        }
        name if name.starts_with("log.") => {
            let parts: Vec<String> = args
                .iter()
                .filter_map(|a| eval(az, env, a))
                .map(|v| v.render())
                .collect();
            emit_log(az, name.trim_start_matches("log."), &parts.join(" "));
        }
        _ => {
            let _ = eval(az, env, e);
        }
    }
}

/// Write one `@log` record to the diagnostic stream with an ANSI-colored
/// level prefix, honoring the minimum-level filter.
fn emit_log(az: &Analyzer, level: &str, message: &str) {
    let (rank, color) = match level {
        "trace" => (LogLevel::Trace, "90"),
        "debug" => (LogLevel::Debug, "36"),
        "info" => (LogLevel::Info, "32"),
        "warn" => (LogLevel::Warn, "33"),
        "error" => (LogLevel::Error, "31"),
        // `out` is user output: always printed, never filtered.
        _ => {
            eprintln!("{message}");
            return;
        }
    };
    if az.log_level <= rank && az.log_level != LogLevel::None {
        eprintln!("\x1b[{color}m[minz:{level}]\x1b[0m {message}");
    }
}

fn kind_name(v: &CtValue) -> &'static str {
    match v {
        CtValue::Int(_) => "integer",
        CtValue::Bool(_) => "bool",
        CtValue::Str(_) => "string",
        CtValue::Range(..) => "range",
        CtValue::Bytes(_) => "binary",
    }
}

fn eval(az: &mut Analyzer, env: &mut Env, e: &Expr) -> Option<CtValue> {
    match &e.kind {
        ExprKind::IntLit(v) => Some(CtValue::Int(*v)),
        ExprKind::BoolLit(b) => Some(CtValue::Bool(*b)),
        ExprKind::StrLit(s) => interpolate(az, env, s, e.pos).map(CtValue::Str),
        ExprKind::Ident(name) => lookup(az, env, name, e.pos),
        ExprKind::Range { lo, hi } => {
            let (Some(CtValue::Int(a)), Some(CtValue::Int(b))) =
                (eval(az, env, lo), eval(az, env, hi))
            else {
                az.errors.report(e.pos, "range bounds must be integers");
                return None;
            };
            Some(CtValue::Range(a, b))
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let a = eval(az, env, lhs)?;
            let b = eval(az, env, rhs)?;
            eval_binary(az, *op, a, b, e.pos)
        }
        ExprKind::Unary { op, operand } => {
            let v = eval(az, env, operand)?;
            match (op, v) {
                (minz_ast::UnOp::Neg, CtValue::Int(v)) => Some(CtValue::Int(-v)),
                (minz_ast::UnOp::Not, CtValue::Bool(b)) => Some(CtValue::Bool(!b)),
                (minz_ast::UnOp::BitNot, CtValue::Int(v)) => Some(CtValue::Int(!v)),
                _ => {
                    az.errors
                        .report(e.pos, "operand not supported at compile time");
                    None
                }
            }
        }
        ExprKind::CompileTime { name, args } => match name.as_str() {
            "hex" => {
                let Some(CtValue::Int(v)) = args.first().and_then(|a| eval(az, env, a)) else {
                    az.errors.report(e.pos, "@hex needs an integer argument");
                    return None;
                };
                Some(CtValue::Str(hex_string(v)))
            }
            "build_time" => Some(CtValue::Str(build_time())),
            "incbin" => {
                let Some(CtValue::Str(path)) = args.first().and_then(|a| eval(az, env, a))
                else {
                    az.errors.report(e.pos, "@incbin needs a path argument");
                    return None;
                };
                match std::fs::read(&path) {
                    Ok(bytes) => Some(CtValue::Bytes(bytes)),
                    Err(err) => {
                        az.errors.report(e.pos, format!("@incbin `{path}`: {err}"));
                        None
                    }
                }
            }
            _ => {
                az.errors
                    .report(e.pos, format!("@{name} is not usable at compile time"));
                None
            }
        },
        _ => {
            az.errors
                .report(e.pos, "expression not supported at compile time");
            None
        }
    }
}

fn lookup(az: &mut Analyzer, env: &Env, name: &str, pos: Pos) -> Option<CtValue> {
    if let Some(v) = env.get(name) {
        return Some(v.clone());
    }
    match az.resolve_name(name) {
        Some(Symbol::Const(ConstSymbol {
            value: Some(value), ..
        })) => Some(match value {
            ConstValue::Int(v) => CtValue::Int(v),
            ConstValue::Bool(b) => CtValue::Bool(b),
            ConstValue::Str(s) => CtValue::Str(s),
        }),
        _ => {
            let mut names: Vec<String> = env.keys().cloned().collect();
            names.extend(az.scopes.visible_names());
            az.errors.undefined(
                pos,
                "compile-time variable",
                name,
                names.iter().map(|s| s.as_str()),
            );
            None
        }
    }
}

fn eval_binary(az: &mut Analyzer, op: BinOp, a: CtValue, b: CtValue, pos: Pos) -> Option<CtValue> {
    match (a, b) {
        (CtValue::Int(a), CtValue::Int(b)) => {
            let v = eval_int_binop(op, a, b);
            if v.is_none() {
                az.errors.report(pos, "division by zero at compile time");
            }
            v.map(CtValue::Int)
        }
        (CtValue::Str(a), b) if op == BinOp::Add => Some(CtValue::Str(a + &b.render())),
        (a, CtValue::Str(b)) if op == BinOp::Add => Some(CtValue::Str(a.render() + &b)),
        (CtValue::Bool(a), CtValue::Bool(b)) => match op {
            BinOp::And => Some(CtValue::Bool(a && b)),
            BinOp::Or => Some(CtValue::Bool(a || b)),
            BinOp::Xor => Some(CtValue::Bool(a ^ b)),
            BinOp::Eq => Some(CtValue::Bool(a == b)),
            BinOp::Ne => Some(CtValue::Bool(a != b)),
            _ => {
                az.errors
                    .report(pos, format!("operator `{op}` not defined on bools"));
                None
            }
        },
        (a, b) => {
            az.errors.report(
                pos,
                format!(
                    "operator `{op}` not defined on {} and {}",
                    kind_name(&a),
                    kind_name(&b)
                ),
            );
            None
        }
    }
}

/// Integer arithmetic shared with the analyzer's constant evaluator.
/// Division and modulo by zero fail the evaluation.
pub(crate) fn eval_int_binop(op: BinOp, a: i64, b: i64) -> Option<i64> {
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

// ---- String interpolation ----------------------------------------------

/// One piece of an interpolated string.
#[derive(Debug, PartialEq)]
pub(crate) enum Segment {
    /// Literal text.
    Lit(String),
    /// The source text of a `{ expr }` hole.
    Expr(String),
}

/// Split an interpolated string into literal and expression segments.
/// `{{` and `}}` are literal braces; nested braces and string literals
/// inside a hole are tracked so the hole ends at its own closing brace.
pub(crate) fn parse_segments(s: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut lit = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                lit.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                lit.push('}');
            }
            '{' => {
                if !lit.is_empty() {
                    segments.push(Segment::Lit(std::mem::take(&mut lit)));
                }
                let mut depth = 1;
                let mut expr = String::new();
                let mut in_string = false;
                for c in chars.by_ref() {
                    match c {
                        '"' => {
                            in_string = !in_string;
                            expr.push(c);
                        }
                        '{' if !in_string => {
                            depth += 1;
                            expr.push(c);
                        }
                        '}' if !in_string => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            expr.push(c);
                        }
                        _ => expr.push(c),
                    }
                }
                segments.push(Segment::Expr(expr));
            }
            _ => lit.push(c),
        }
    }
    if !lit.is_empty() {
        segments.push(Segment::Lit(lit));
    }
    segments
}

/// Interpolate a string against the compile-time environment, coalescing
/// adjacent literal and evaluated parts.
fn interpolate(az: &mut Analyzer, env: &mut Env, s: &str, pos: Pos) -> Option<String> {
    if !s.contains('{') && !s.contains('}') {
        return Some(s.to_string());
    }
    let mut out = String::new();
    for segment in parse_segments(s) {
        match segment {
            Segment::Lit(text) => out.push_str(&text),
            Segment::Expr(text) => {
                let value = eval_expr_text(az, env, &text, pos)?;
                out.push_str(&value.render());
            }
        }
    }
    Some(out)
}

// A tiny precedence-climbing evaluator over interpolation hole text.
// Holes contain identifiers, integer literals and simple arithmetic; the
// full expression grammar belongs to the parser collaborator.

struct TextParser<'s> {
    tokens: Vec<TextToken<'s>>,
    at: usize,
}

#[derive(Clone, Copy, PartialEq, Debug)]
enum TextToken<'s> {
    Int(i64),
    Ident(&'s str),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Option<Vec<TextToken<'_>>> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' => i += 1,
            '0'..='9' => {
                let start = i;
                if c == '0' && bytes.get(i + 1) == Some(&b'x') {
                    i += 2;
                    while i < bytes.len() && (bytes[i] as char).is_ascii_hexdigit() {
                        i += 1;
                    }
                    let v = i64::from_str_radix(&text[start + 2..i], 16).ok()?;
                    tokens.push(TextToken::Int(v));
                } else {
                    while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                        i += 1;
                    }
                    tokens.push(TextToken::Int(text[start..i].parse().ok()?));
                }
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(TextToken::Ident(&text[start..i]));
            }
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(TextToken::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(TextToken::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(TextToken::RParen);
                i += 1;
            }
            _ => return None,
        }
    }
    Some(tokens)
}

fn eval_expr_text(az: &mut Analyzer, env: &mut Env, text: &str, pos: Pos) -> Option<CtValue> {
    let Some(tokens) = tokenize(text) else {
        az.errors
            .report(pos, format!("cannot evaluate `{{{text}}}` at compile time"));
        return None;
    };
    let mut parser = TextParser { tokens, at: 0 };
    let value = parser.expr(az, env, pos, 0)?;
    if parser.at != parser.tokens.len() {
        az.errors
            .report(pos, format!("cannot evaluate `{{{text}}}` at compile time"));
        return None;
    }
    Some(value)
}

impl<'s> TextParser<'s> {
    fn peek(&self) -> Option<TextToken<'s>> {
        self.tokens.get(self.at).copied()
    }

    fn expr(
        &mut self,
        az: &mut Analyzer,
        env: &mut Env,
        pos: Pos,
        min_prec: u8,
    ) -> Option<CtValue> {
        let mut lhs = self.atom(az, env, pos)?;
        while let Some(TextToken::Op(op)) = self.peek() {
            let prec = match op {
                '+' | '-' => 1,
                '*' | '/' | '%' => 2,
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.at += 1;
            let rhs = self.expr(az, env, pos, prec + 1)?;
            let bin = match op {
                '+' => BinOp::Add,
                '-' => BinOp::Sub,
                '*' => BinOp::Mul,
                '/' => BinOp::Div,
                _ => BinOp::Mod,
            };
            lhs = eval_binary(az, bin, lhs, rhs, pos)?;
        }
        Some(lhs)
    }

    fn atom(&mut self, az: &mut Analyzer, env: &mut Env, pos: Pos) -> Option<CtValue> {
        match self.peek() {
            Some(TextToken::Int(v)) => {
                self.at += 1;
                Some(CtValue::Int(v))
            }
            Some(TextToken::Ident(name)) => {
                self.at += 1;
                lookup(az, env, name, pos)
            }
            Some(TextToken::Op('-')) => {
                self.at += 1;
                match self.atom(az, env, pos)? {
                    CtValue::Int(v) => Some(CtValue::Int(-v)),
                    _ => None,
                }
            }
            Some(TextToken::LParen) => {
                self.at += 1;
                let v = self.expr(az, env, pos, 0)?;
                if self.peek() != Some(TextToken::RParen) {
                    return None;
                }
                self.at += 1;
                Some(v)
            }
            _ => None,
        }
    }
}

/// Lower an interpolated print-string call. Adjacent literal and
/// constant-evaluated parts coalesce into single literal emissions;
/// runtime expressions (in-scope variables) emit a value-print call at
/// the variable's inferred type.
pub(crate) fn lower_interpolated_print(az: &mut Analyzer, s: &str, pos: Pos) -> Option<RValue> {
    fn flush(az: &mut Analyzer, lit: &mut String, pos: Pos) -> Option<()> {
        if lit.is_empty() {
            return Some(());
        }
        let text = std::mem::take(lit);
        let (reg, _) = az.lower_string_literal(&text);
        emit_print(az, "print_string", reg.expect("string literals have registers"), pos)
    }

    let mut lit = String::new();
    for segment in parse_segments(s) {
        match segment {
            Segment::Lit(text) => lit.push_str(&text),
            Segment::Expr(text) => {
                let trimmed = text.trim();
                // A runtime variable prints itself; anything else must
                // evaluate at compile time.
                if is_plain_ident(trimmed)
                    && matches!(
                        az.resolve_name(trimmed),
                        Some(Symbol::Var(_)) | Some(Symbol::Global(_))
                    )
                {
                    flush(az, &mut lit, pos)?;
                    let (reg, ty) = az.lower_ident(trimmed, pos)?;
                    let reg = reg.expect("variables have registers");
                    let printer = match ty {
                        Type::U8 => "print_u8",
                        Type::U16 | Type::U24 => "print_u16",
                        Type::I8 | Type::I16 | Type::I24 => "print_i16",
                        Type::Bool => "print_bool",
                        Type::Str => "print_string",
                        other => {
                            az.errors.report(
                                pos,
                                format!("cannot print a value of type {other}"),
                            );
                            return None;
                        }
                    };
                    emit_print(az, printer, reg, pos)?;
                    continue;
                }
                let mut env = Env::default();
                let value = eval_expr_text(az, &mut env, trimmed, pos)?;
                lit.push_str(&value.render());
            }
        }
    }
    flush(az, &mut lit, pos)?;
    Some((None, Type::Void))
}

fn is_plain_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn emit_print(
    az: &mut Analyzer,
    name: &str,
    arg: minz_codegen::ir::Reg,
    pos: Pos,
) -> Option<()> {
    let Some(Symbol::Func(id)) = az.resolve_name(name) else {
        az.errors
            .report(pos, format!("built-in `{name}` is not available"));
        return None;
    };
    let sym = az.funcs[id].clone();
    if !sym.is_local {
        az.note_external(&sym);
    }
    az.emit(
        Inst::new(Opcode::Call)
            .target(minz_codegen::ir::Target::Symbol(sym.mangled))
            .args([arg])
            .ty(Type::Void),
    );
    Some(())
}

// ---- Runtime `@`-expressions -------------------------------------------

/// Lower a compile-time `@`-expression appearing in runtime code. The
/// evaluated constant is emitted in place; when evaluation is impossible
/// the expression lowers to the constant 0.
pub(crate) fn lower_comptime_expr(
    az: &mut Analyzer,
    name: &str,
    args: &[Expr],
    pos: Pos,
) -> Option<RValue> {
    match name {
        "hex" => {
            if let Some(v) = args.first().and_then(|a| az.eval_const_int(a)) {
                return Some(az.lower_string_literal(&hex_string(v)));
            }
        }
        "build_time" => {
            let stamp = build_time();
            return Some(az.lower_string_literal(&stamp));
        }
        name if name.starts_with("log.") => {
            let mut env = Env::default();
            let parts: Vec<String> = args
                .iter()
                .filter_map(|a| eval(az, &mut env, a))
                .map(|v| v.render())
                .collect();
            emit_log(az, name.trim_start_matches("log."), &parts.join(" "));
            return Some((None, Type::Void));
        }
        "emit" | "save_binary" => {
            az.errors
                .report(pos, format!("@{name} is only valid inside an @minz block"));
            return None;
        }
        _ => {}
    }
    // Unevaluable compile-time expressions lower to 0.
    log::debug!("@{name} at {pos} did not evaluate; lowering to 0");
    let reg = az.func().new_reg();
    az.emit(
        Inst::new(Opcode::LoadConst)
            .dest(reg)
            .imm(0)
            .ty(Type::U8)
            .comment(format!("@{name} fallback")),
    );
    Some((Some(reg), Type::U8))
}

fn hex_string(v: i64) -> String {
    if v > 0xFF {
        format!("0x{v:04X}")
    } else {
        format!("0x{v:02X}")
    }
}

/// Seconds-precision UTC timestamp, `YYYY-MM-DD HH:MM:SS`.
fn build_time() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let days = secs.div_euclid(86400);
    let rem = secs.rem_euclid(86400);
    let (y, m, d) = civil_from_days(days);
    format!(
        "{y:04}-{m:02}-{d:02} {:02}:{:02}:{:02}",
        rem / 3600,
        rem % 3600 / 60,
        rem % 60
    )
}

/// Gregorian date from days since 1970-01-01.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = z.div_euclid(146097);
    let doe = z.rem_euclid(146097);
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_handle_escapes_and_nesting() {
        assert_eq!(
            parse_segments("a{{b}}c"),
            vec![Segment::Lit("a{b}c".to_string())]
        );
        assert_eq!(
            parse_segments("x={i*i}!"),
            vec![
                Segment::Lit("x=".to_string()),
                Segment::Expr("i*i".to_string()),
                Segment::Lit("!".to_string()),
            ]
        );
        assert_eq!(
            parse_segments("{a{b}c}"),
            vec![Segment::Expr("a{b}c".to_string())]
        );
    }

    #[test]
    fn int_binop_guards_division() {
        assert_eq!(eval_int_binop(BinOp::Div, 7, 0), None);
        assert_eq!(eval_int_binop(BinOp::Mod, 7, 0), None);
        assert_eq!(eval_int_binop(BinOp::Div, -7, 2), Some(-3));
        assert_eq!(eval_int_binop(BinOp::Mul, 6, 7), Some(42));
    }

    #[test]
    fn dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19723), (2024, 1, 1));
    }

    #[test]
    fn hex_rendering() {
        assert_eq!(hex_string(7), "0x07");
        assert_eq!(hex_string(0x4000), "0x4000");
    }
}
