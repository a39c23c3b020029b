//! AST-level dead-code pruning, run on each body before lowering.
//!
//! Collapses conditionals whose condition is a compile-time constant
//! (constant-false keeps the else branch, constant-true the then branch)
//! and drops statements that follow a return or a diverging call
//! (`exit`, `panic`, `abort`) within the same block.

use crate::analyzer::Analyzer;
use minz_ast::{Expr, ExprKind, Stmt, StmtKind};

pub(crate) fn prune_stmts(az: &mut Analyzer, stmts: &mut Vec<Stmt>) {
    let mut end = stmts.len();
    for (i, stmt) in stmts.iter_mut().enumerate() {
        prune_stmt(az, stmt);
        if is_terminal(stmt) {
            end = i + 1;
            break;
        }
    }
    if end < stmts.len() {
        log::debug!("pruning {} unreachable statement(s)", stmts.len() - end);
        stmts.truncate(end);
    }
}

fn prune_stmt(az: &mut Analyzer, stmt: &mut Stmt) {
    if let StmtKind::If {
        cond,
        then_body,
        else_body,
    } = &mut stmt.kind
    {
        if let Some(value) = const_bool(az, cond) {
            let taken = if value {
                std::mem::take(then_body)
            } else {
                else_body.take().unwrap_or_default()
            };
            stmt.kind = StmtKind::Block(taken);
        }
    }

    match &mut stmt.kind {
        StmtKind::Block(body) => prune_stmts(az, body),
        StmtKind::If {
            then_body,
            else_body,
            ..
        } => {
            prune_stmts(az, then_body);
            if let Some(else_body) = else_body {
                prune_stmts(az, else_body);
            }
        }
        StmtKind::While { body, .. }
        | StmtKind::For { body, .. }
        | StmtKind::Times { body, .. }
        | StmtKind::LoopAt { body, .. } => prune_stmts(az, body),
        _ => {}
    }
}

fn const_bool(az: &Analyzer, cond: &Expr) -> Option<bool> {
    match &cond.kind {
        ExprKind::BoolLit(b) => Some(*b),
        _ => az.eval_const_int(cond).map(|v| v != 0),
    }
}

/// Does control never continue past this statement?
fn is_terminal(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) => true,
        StmtKind::Expr(Expr {
            kind: ExprKind::Call { callee, .. },
            ..
        }) => matches!(
            &callee.kind,
            ExprKind::Ident(name) if matches!(name.as_str(), "exit" | "panic" | "abort")
        ),
        _ => false,
    }
}
