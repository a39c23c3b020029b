//! `@define` template expansion.
//!
//! A pre-pass over the declaration list, before any semantic work.
//! Template definitions are collected by arity; each invocation is
//! expanded by textual substitution of its `{0}`..`{N-1}` placeholders and
//! the expansion is re-parsed through the parser collaborator. The
//! resulting declarations replace the invocation node; definition nodes
//! are dropped from the output tree.

use crate::analyzer::Analyzer;
use minz_ast::{Decl, DeclKind, Expr, ExprKind, Pos};
use rustc_hash::FxHashMap;

struct Template {
    body: String,
    pos: Pos,
}

/// Expand every template invocation in `decls`.
pub(crate) fn expand(az: &mut Analyzer, decls: Vec<Decl>) -> Vec<Decl> {
    let mut templates: FxHashMap<usize, Template> = FxHashMap::default();
    for decl in &decls {
        if let DeclKind::TemplateDef { params, body } = &decl.kind {
            if templates.contains_key(&params.len()) {
                log::debug!(
                    "template with {} parameter(s) redefined at {}",
                    params.len(),
                    decl.pos
                );
            }
            templates.insert(
                params.len(),
                Template {
                    body: body.clone(),
                    pos: decl.pos,
                },
            );
        }
    }
    if templates.is_empty() {
        return decls;
    }

    let mut out = Vec::with_capacity(decls.len());
    for decl in decls {
        match decl.kind {
            DeclKind::TemplateDef { .. } => {}
            DeclKind::TemplateUse { args } => {
                if let Some(expanded) = expand_use(az, &templates, &args, decl.pos) {
                    out.extend(expanded);
                }
            }
            kind => out.push(Decl {
                pos: decl.pos,
                kind,
            }),
        }
    }
    out
}

fn expand_use(
    az: &mut Analyzer,
    templates: &FxHashMap<usize, Template>,
    args: &[Expr],
    pos: Pos,
) -> Option<Vec<Decl>> {
    let Some(template) = templates.get(&args.len()) else {
        az.errors.report(
            pos,
            format!("no template takes {} argument(s)", args.len()),
        );
        return None;
    };

    let mut text = template.body.clone();
    for (i, arg) in args.iter().enumerate() {
        let Some(value) = stringify_argument(arg) else {
            az.errors.report(
                arg.pos,
                "template arguments must be literals or identifiers",
            );
            return None;
        };
        text = text.replace(&format!("{{{i}}}"), &value);
    }
    log::trace!(
        "expanding template defined at {} into {} byte(s)",
        template.pos,
        text.len()
    );

    match az.parser.parse(&text, "<template expansion>", az.ids) {
        Ok(decls) => Some(decls),
        Err(e) => {
            az.errors.report(
                pos,
                format!("template expansion failed to parse: {}", e.message),
            );
            None
        }
    }
}

fn stringify_argument(arg: &Expr) -> Option<String> {
    match &arg.kind {
        ExprKind::IntLit(v) => Some(v.to_string()),
        ExprKind::BoolLit(b) => Some(b.to_string()),
        ExprKind::StrLit(s) => Some(s.clone()),
        ExprKind::Ident(name) => Some(name.clone()),
        _ => None,
    }
}
