//! Overload resolution.
//!
//! A call site names a base function; resolution picks the concrete
//! overload from the inferred argument types. An exact mangled-name match
//! wins; otherwise the widening rules narrow the set, and
//! anything other than exactly one survivor is a diagnostic carrying the
//! full candidate list.

use crate::analyzer::Analyzer;
use crate::scopes::{FuncId, OverloadSet, Symbol};
use minz_ast::{Expr, Pos};
use minz_codegen::ir::{demangle, mangle, Type};

/// Resolve a call to `name` with the given arguments.
pub(crate) fn resolve_call(
    az: &mut Analyzer,
    name: &str,
    args: &[Expr],
    pos: Pos,
) -> Option<FuncId> {
    match az.resolve_name(name) {
        Some(Symbol::Func(id)) => {
            let sym = &az.funcs[id];
            if sym.params.len() != args.len() {
                az.errors.report(
                    pos,
                    format!(
                        "{name} expects {} argument(s), found {}",
                        sym.params.len(),
                        args.len()
                    ),
                );
                return None;
            }
            Some(id)
        }
        Some(Symbol::Overloads(set)) => resolve_overload(az, &set, args, pos),
        Some(_) => {
            az.errors
                .report(pos, format!("`{name}` is not a function"));
            None
        }
        None => {
            let names = az.scopes.visible_names();
            az.errors
                .undefined(pos, "function", name, names.iter().map(|s| s.as_str()));
            None
        }
    }
}

fn resolve_overload(
    az: &mut Analyzer,
    set: &OverloadSet,
    args: &[Expr],
    pos: Pos,
) -> Option<FuncId> {
    // Every argument needs a concrete type before we can choose.
    let mut types = Vec::with_capacity(args.len());
    for arg in args {
        match az.infer_expr_type(arg) {
            Some(ty) => types.push(ty),
            None => {
                az.errors.report(
                    arg.pos,
                    format!("cannot infer an argument type for the call to `{}`", set.base),
                );
                return None;
            }
        }
    }

    // Exact mangled-name match wins outright.
    for &id in &set.entries {
        let f = &az.funcs[id];
        if mangle(demangle(&f.mangled), &types) == f.mangled {
            log::trace!("overload {} resolved exactly to {}", set.base, f.mangled);
            return Some(id);
        }
    }

    // Otherwise collect the compatible candidates.
    let compatible: Vec<FuncId> = set
        .entries
        .iter()
        .copied()
        .filter(|&id| {
            let f = &az.funcs[id];
            f.params.len() == types.len()
                && f.params
                    .iter()
                    .zip(&types)
                    .all(|((_, want), got)| want.is_assignable_from(got))
        })
        .collect();

    let arg_list = types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    match compatible.as_slice() {
        [] => {
            let candidates = candidate_list(az, &set.entries);
            az.errors.report(
                pos,
                format!(
                    "no matching overload for {}({arg_list}); available: {candidates}",
                    set.base
                ),
            );
            None
        }
        [only] => Some(*only),
        _ => {
            let candidates = candidate_list(az, &compatible);
            az.errors.report(
                pos,
                format!(
                    "ambiguous call to {}({arg_list}); candidates: {candidates}",
                    set.base
                ),
            );
            None
        }
    }
}

fn candidate_list(az: &Analyzer, entries: &[FuncId]) -> String {
    entries
        .iter()
        .map(|&id| az.funcs[id].signature())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Resolve an iterator-operator function by the types it must accept:
/// the current element type (plus an accumulator or index where the
/// operator carries one). Accepts a single function whose parameters are
/// compatible, or the matching member of an overload set.
pub(crate) fn resolve_iter_fn(
    az: &mut Analyzer,
    name: &str,
    param_types: &[Type],
    pos: Pos,
) -> Option<FuncId> {
    let accepts = |az: &Analyzer, id: FuncId| {
        let f = &az.funcs[id];
        f.params.len() == param_types.len()
            && f.params
                .iter()
                .zip(param_types)
                .all(|((_, want), got)| want.is_assignable_from(got))
    };
    match az.resolve_name(name) {
        Some(Symbol::Func(id)) => {
            if accepts(az, id) {
                Some(id)
            } else {
                let wanted = param_types
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                az.errors.report(
                    pos,
                    format!(
                        "{} cannot accept ({wanted}); its signature is {}",
                        name,
                        az.funcs[id].signature()
                    ),
                );
                None
            }
        }
        Some(Symbol::Overloads(set)) => {
            let found = set.entries.iter().copied().find(|&id| accepts(az, id));
            if found.is_none() {
                let wanted = param_types
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                let candidates = candidate_list(az, &set.entries);
                az.errors.report(
                    pos,
                    format!(
                        "no overload of {} accepts ({wanted}); available: {candidates}",
                        set.base
                    ),
                );
            }
            found
        }
        _ => {
            let names = az.scopes.visible_names();
            az.errors
                .undefined(pos, "function", name, names.iter().map(|s| s.as_str()));
            None
        }
    }
}
