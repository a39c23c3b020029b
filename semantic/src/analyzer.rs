//! The analysis context and pipeline driver.
//!
//! One [`Analyzer`] exists per compilation. It owns the module being
//! built, the scope tree, the function-symbol arena, the expression-type
//! side table and the error collector, and it carries the per-compilation
//! label counter (labels only need compilation-unique names).

use crate::builtins;
use crate::comptime::LogLevel;
use crate::environ::{ModuleLoader, Parser};
use crate::errors::{AnalyzeError, ErrorCollector};
use crate::scopes::{ConstSymbol, FuncId, FuncSymbol, ScopeTree, Symbol};
use crate::template;
use cranelift_entity::{EntityRef, PrimaryMap};
use minz_ast::{Decl, DeclKind, Expr, ExprKind, FunctionDecl, NodeIds, Pos, TypeExpr, UnOp};
use minz_codegen::ir::{Function, Label, Module, Type};
use rustc_hash::FxHashMap;

/// Base address of the static element buffers used by INTO-mode loops.
const ITER_BUFFER_BASE: u16 = 0xF000;

/// The function currently being lowered.
pub(crate) struct CurrentFunction {
    /// The IR under construction.
    pub func: Function,
    /// The function's symbol.
    pub id: FuncId,
    /// Unmangled declaration name, for recursion detection.
    pub decl_name: String,
}

/// The analysis context.
pub struct Analyzer<'a> {
    pub(crate) parser: &'a mut dyn Parser,
    pub(crate) loader: Option<&'a mut dyn ModuleLoader>,
    pub(crate) ids: &'a mut NodeIds,
    pub(crate) module: Module,
    pub(crate) scopes: ScopeTree,
    pub(crate) funcs: PrimaryMap<FuncId, FuncSymbol>,
    pub(crate) expr_types: FxHashMap<minz_ast::ExprId, Type>,
    pub(crate) errors: ErrorCollector,
    pub(crate) cur: Option<CurrentFunction>,
    pub(crate) pending_bodies: Vec<(FuncId, FunctionDecl)>,
    /// Signature registered in the pre-pass, keyed by declaration name and
    /// byte offset, consumed by the body pass.
    pub(crate) sig_map: FxHashMap<(String, u32), FuncId>,
    pub(crate) imported: Vec<String>,
    pub(crate) prefix: Option<String>,
    pub(crate) log_level: LogLevel,
    pub(crate) verbose: bool,
    next_label: u32,
    next_iter_buffer: u16,
    pub(crate) lambda_counter: u32,
}

/// Analyze a parsed file into a typed, optimized module.
///
/// The pipeline order is fixed: template expansion, import seeding, the
/// signature pre-pass, the body pass, constant folding, dead-code
/// elimination. Declarations are processed in source order within each
/// pass. Analysis continues past errors; the result is `Err` whenever any
/// diagnostic was collected, and no partial module escapes.
pub fn analyze<'a>(
    decls: Vec<Decl>,
    module_name: &str,
    file: &str,
    parser: &'a mut dyn Parser,
    loader: Option<&'a mut dyn ModuleLoader>,
    ids: &'a mut NodeIds,
) -> Result<Module, AnalyzeError> {
    let mut analyzer = Analyzer::new(module_name, file, parser, loader, ids);
    analyzer.run(decls);
    analyzer.finish()
}

/// Parse `source` with `parser` and analyze it. The module is named after
/// the file stem.
pub fn analyze_source(
    source: &str,
    file: &str,
    parser: &mut dyn Parser,
) -> Result<Module, AnalyzeError> {
    let mut ids = NodeIds::new();
    let module_name = std::path::Path::new(file)
        .file_stem()
        .map_or_else(|| file.to_string(), |s| s.to_string_lossy().into_owned());
    let decls = match parser.parse(source, file, &mut ids) {
        Ok(decls) => decls,
        Err(e) => {
            let mut errors = ErrorCollector::new(file);
            errors.report(e.pos, e.message);
            return Err(errors.finish().unwrap_err());
        }
    };
    analyze(decls, &module_name, file, parser, None, &mut ids)
}

impl<'a> Analyzer<'a> {
    /// Create a context with built-ins seeded.
    pub fn new(
        module_name: &str,
        file: &str,
        parser: &'a mut dyn Parser,
        loader: Option<&'a mut dyn ModuleLoader>,
        ids: &'a mut NodeIds,
    ) -> Self {
        let mut scopes = ScopeTree::new();
        let mut funcs = PrimaryMap::new();
        builtins::seed(&mut scopes, &mut funcs);
        let verbose = std::env::var_os("DEBUG").is_some_and(|v| !v.is_empty());
        let log_level = std::env::var("MINZ_LOG")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(LogLevel::Info);
        Self {
            parser,
            loader,
            ids,
            module: Module::new(module_name),
            scopes,
            funcs,
            expr_types: FxHashMap::default(),
            errors: ErrorCollector::new(file),
            cur: None,
            pending_bodies: Vec::new(),
            sig_map: FxHashMap::default(),
            imported: Vec::new(),
            prefix: None,
            log_level,
            verbose,
            next_label: 0,
            next_iter_buffer: ITER_BUFFER_BASE,
            lambda_counter: 0,
        }
    }

    /// Run the full pipeline over the file's declarations.
    pub fn run(&mut self, decls: Vec<Decl>) {
        if self.verbose {
            log::debug!(
                "analyzing {} with {} top-level declaration(s)",
                self.errors.file(),
                decls.len()
            );
        }
        let decls = template::expand(self, decls);

        for decl in &decls {
            if let DeclKind::Import { path, alias } = &decl.kind {
                self.process_import(path, alias.as_deref(), decl.pos);
            }
        }

        crate::declarations::first_pass(self, &decls);
        crate::declarations::second_pass(self, &decls);

        // Functions synthesized during the body pass (compile-time blocks,
        // lambdas lifted by the iterator engine) queue their bodies.
        while let Some((id, decl)) = self.pending_bodies.pop() {
            crate::declarations::analyze_function_body(self, id, &decl);
        }

        if self.errors.is_empty() {
            minz_codegen::fold::fold_constants(&mut self.module);
            minz_codegen::dce::eliminate_dead_code(&mut self.module);
            debug_assert_eq!(
                minz_codegen::verifier::verify_module(&self.module),
                Ok(()),
                "analyzer produced an unverifiable module"
            );
        }
    }

    /// Finish the analysis: the module when clean, every collected
    /// diagnostic otherwise.
    pub fn finish(self) -> Result<Module, AnalyzeError> {
        self.errors.finish()?;
        Ok(self.module)
    }

    fn process_import(&mut self, path: &str, alias: Option<&str>, pos: Pos) {
        if builtins::is_builtin_module(path) {
            if let Some(alias) = alias {
                self.scopes
                    .define_global(alias, Symbol::Module(path.to_string()));
            }
            self.imported.push(path.to_string());
            return;
        }
        let Some(loader) = self.loader.as_deref_mut() else {
            self.errors
                .report(pos, format!("cannot import `{path}`: no module loader"));
            return;
        };
        match loader.load(path, &mut *self.parser, &mut *self.ids) {
            Ok(loaded) => {
                log::debug!("import `{path}` as module `{}`", loaded.module_name);
                self.scopes
                    .define_global(path, Symbol::Module(loaded.module_name.clone()));
                if let Some(alias) = alias {
                    self.scopes
                        .define_global(alias, Symbol::Module(loaded.module_name.clone()));
                }
                self.imported.push(loaded.module_name.clone());
                // The imported declarations become part of this
                // compilation, registered under both the plain and the
                // module-prefixed name.
                let saved = self.prefix.replace(loaded.module_name);
                crate::declarations::first_pass(self, &loaded.decls);
                crate::declarations::second_pass(self, &loaded.decls);
                self.prefix = saved;
            }
            Err(e) => self.errors.report(pos, e.to_string()),
        }
    }

    /// Mint a fresh label from the per-compilation counter.
    pub(crate) fn new_label(&mut self) -> Label {
        let l = Label::new(self.next_label as usize);
        self.next_label += 1;
        l
    }

    /// Reserve an INTO-mode element buffer of `size` bytes.
    pub(crate) fn alloc_iter_buffer(&mut self, size: u16) -> u16 {
        let addr = self.next_iter_buffer;
        self.next_iter_buffer = self.next_iter_buffer.wrapping_add(size);
        addr
    }

    /// The function currently being lowered.
    ///
    /// Panics outside a body; lowering entry points establish `cur` first.
    pub(crate) fn func(&mut self) -> &mut Function {
        &mut self.cur.as_mut().expect("no function under analysis").func
    }

    /// Append an instruction to the current function.
    pub(crate) fn emit(&mut self, inst: minz_codegen::ir::Inst) {
        self.func().emit(inst);
    }

    /// Record an expression's inferred type in the side table.
    pub(crate) fn set_expr_type(&mut self, id: minz_ast::ExprId, ty: Type) {
        self.expr_types.insert(id, ty);
    }

    /// The inferred type of an expression, if it has been analyzed.
    pub fn expr_type(&self, id: minz_ast::ExprId) -> Option<&Type> {
        self.expr_types.get(&id)
    }

    /// Apply the current registration prefix to a name.
    pub(crate) fn prefixed(&self, name: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{p}.{name}"),
            None => name.to_string(),
        }
    }

    /// Resolve a name per the fixed order: the scope chain first, then the
    /// module-prefixed form (types from imported modules only), then the
    /// dotted form through a module alias.
    pub(crate) fn resolve_name(&self, name: &str) -> Option<Symbol> {
        if let Some(s) = self.scopes.lookup(name) {
            return Some(s.clone());
        }
        for m in &self.imported {
            if let Some(s @ Symbol::Type(_)) = self.scopes.lookup(&format!("{m}.{name}")) {
                return Some(s.clone());
            }
        }
        if let Some((head, rest)) = name.split_once('.') {
            if let Some(Symbol::Module(actual)) = self.scopes.lookup(head) {
                if actual != head {
                    return self.scopes.lookup(&format!("{actual}.{rest}")).cloned();
                }
            }
        }
        None
    }

    /// Convert a syntax-level type to a semantic type, reporting (and
    /// returning `None` for) unknown names and non-constant array sizes.
    pub(crate) fn convert_type(&mut self, te: &TypeExpr, pos: Pos) -> Option<Type> {
        match te {
            TypeExpr::Named(name) => {
                if let Some(ty) = builtins::builtin_type(name) {
                    return Some(ty);
                }
                match self.resolve_name(name) {
                    Some(Symbol::Type(ty)) => Some(ty),
                    _ => {
                        let names = self.type_names();
                        self.errors.undefined(
                            pos,
                            "type",
                            name,
                            names.iter().map(|s| s.as_str()),
                        );
                        None
                    }
                }
            }
            TypeExpr::Pointer(base) => {
                let base = self.convert_type(base, pos)?;
                Some(Type::Pointer(Box::new(base)))
            }
            TypeExpr::Array { elem, len } => {
                let elem = self.convert_type(elem, pos)?;
                match self.eval_const_int(len) {
                    Some(n) if n >= 0 => Some(Type::Array {
                        elem: Box::new(elem),
                        len: n as i32,
                    }),
                    Some(_) => {
                        self.errors.report(pos, "array size must not be negative");
                        None
                    }
                    None => {
                        self.errors
                            .report(pos, "array size must be a constant expression");
                        None
                    }
                }
            }
            TypeExpr::Fun { params, ret } => {
                let params: Option<Vec<Type>> =
                    params.iter().map(|p| self.convert_type(p, pos)).collect();
                let ret = self.convert_type(ret, pos)?;
                Some(Type::Function(std::rc::Rc::new(
                    minz_codegen::ir::FunctionType {
                        params: params?,
                        ret,
                    },
                )))
            }
        }
    }

    fn type_names(&self) -> Vec<String> {
        self.scopes
            .visible_names()
            .into_iter()
            .filter(|n| matches!(self.scopes.lookup(n), Some(Symbol::Type(_))))
            .collect()
    }

    /// Evaluate a constant integer expression against in-scope constants.
    pub(crate) fn eval_const_int(&self, expr: &Expr) -> Option<i64> {
        match &expr.kind {
            ExprKind::IntLit(v) => Some(*v),
            ExprKind::BoolLit(b) => Some(i64::from(*b)),
            ExprKind::Ident(name) => match self.resolve_name(name)? {
                Symbol::Const(ConstSymbol {
                    value: Some(crate::scopes::ConstValue::Int(v)),
                    ..
                }) => Some(v),
                Symbol::Const(ConstSymbol {
                    value: Some(crate::scopes::ConstValue::Bool(b)),
                    ..
                }) => Some(i64::from(b)),
                _ => None,
            },
            ExprKind::Binary { op, lhs, rhs } => {
                let a = self.eval_const_int(lhs)?;
                let b = self.eval_const_int(rhs)?;
                crate::comptime::eval_int_binop(*op, a, b)
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval_const_int(operand)?;
                match op {
                    UnOp::Neg => Some(-v),
                    UnOp::Not => Some(i64::from(v == 0)),
                    UnOp::BitNot => Some(!v),
                    UnOp::AddrOf => None,
                }
            }
            ExprKind::Cast { value, .. } => self.eval_const_int(value),
            ExprKind::Field { base, field } => {
                // Enum variants and module constants, including deeply
                // dotted module paths.
                if let Some(head) = crate::lower::flatten_name(base) {
                    if let Some(Symbol::Const(ConstSymbol {
                        value: Some(crate::scopes::ConstValue::Int(v)),
                        ..
                    })) = self.resolve_name(&format!("{head}.{field}"))
                    {
                        return Some(v);
                    }
                }
                let ExprKind::Ident(head) = &base.kind else {
                    return None;
                };
                match self.resolve_name(head)? {
                    Symbol::Type(Type::Enum(e)) => e.variant(field),
                    Symbol::Module(m) => match self.resolve_name(&format!("{m}.{field}"))? {
                        Symbol::Const(ConstSymbol {
                            value: Some(crate::scopes::ConstValue::Int(v)),
                            ..
                        }) => Some(v),
                        _ => None,
                    },
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Infer the type of a bare integer literal from its value.
    pub(crate) fn infer_int_type(v: i64) -> Type {
        if (0..=255).contains(&v) {
            Type::U8
        } else if (-128..=-1).contains(&v) {
            Type::I8
        } else if (256..=65535).contains(&v) {
            Type::U16
        } else {
            Type::I16
        }
    }

    /// Does `v` fit the value range of integer type `ty`?
    pub(crate) fn literal_fits(ty: &Type, v: i64) -> bool {
        match ty {
            Type::U8 => (0..=0xFF).contains(&v),
            Type::U16 => (0..=0xFFFF).contains(&v),
            Type::U24 => (0..=0xFF_FFFF).contains(&v),
            Type::I8 => (-0x80..=0x7F).contains(&v),
            Type::I16 => (-0x8000..=0x7FFF).contains(&v),
            Type::I24 => (-0x80_0000..=0x7F_FFFF).contains(&v),
            Type::Bool => v == 0 || v == 1,
            _ => false,
        }
    }

    /// Record a built-in or imported callee in the module's external table.
    pub(crate) fn note_external(&mut self, sym: &FuncSymbol) {
        let params = sym.params.iter().map(|(_, t)| t.clone()).collect();
        self.module
            .declare_external(sym.mangled.clone(), params, sym.ret.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_width_inference() {
        assert_eq!(Analyzer::infer_int_type(0), Type::U8);
        assert_eq!(Analyzer::infer_int_type(255), Type::U8);
        assert_eq!(Analyzer::infer_int_type(256), Type::U16);
        assert_eq!(Analyzer::infer_int_type(65535), Type::U16);
        assert_eq!(Analyzer::infer_int_type(-1), Type::I8);
        assert_eq!(Analyzer::infer_int_type(-128), Type::I8);
        assert_eq!(Analyzer::infer_int_type(-129), Type::I16);
        assert_eq!(Analyzer::infer_int_type(70000), Type::I16);
    }

    #[test]
    fn literal_fit() {
        assert!(Analyzer::literal_fits(&Type::U8, 255));
        assert!(!Analyzer::literal_fits(&Type::U8, 256));
        assert!(!Analyzer::literal_fits(&Type::U8, -1));
        assert!(Analyzer::literal_fits(&Type::I8, -128));
        assert!(!Analyzer::literal_fits(&Type::I8, -129));
        assert!(Analyzer::literal_fits(&Type::U16, 65535));
    }
}
