//! Scopes, symbols and overload sets.
//!
//! Scopes form a parent-linked tree held in an entity-indexed arena;
//! entering a function body, block or loop body pushes a scope and leaving
//! pops it, in strict LIFO order. Function symbols live in a separate
//! arena ([`FuncId`]-indexed) because they are mutated after registration
//! (recursion and convention facts discovered while lowering), while scope
//! entries only ever point at them.

use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{entity_impl, PrimaryMap};
use minz_ast::FunctionDecl;
use minz_codegen::callconv::CallConv;
use minz_codegen::ir::{Reg, Type};
use rustc_hash::FxHashMap;

/// An opaque reference to a scope.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u32);
entity_impl!(ScopeId, "scope");

/// An opaque reference to a function symbol.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(u32);
entity_impl!(FuncId, "func");

/// A variable symbol.
#[derive(Clone, PartialEq, Debug)]
pub struct VarSymbol {
    /// Variable type.
    pub ty: Type,
    /// The virtual register holding (or homing) the variable.
    pub reg: Reg,
    /// Whether assignment is allowed.
    pub mutable: bool,
    /// Whether this is a function parameter.
    pub is_param: bool,
    /// Parameter index, for SMC parameter loads.
    pub param_index: Option<u8>,
    /// The value lives in `reg` directly (parameters of non-SMC functions,
    /// loop bindings); reads use the register instead of a `LoadVar`.
    pub direct: bool,
    /// Static buffer address for INTO-mode loop bindings.
    pub buffer_addr: Option<u16>,
}

/// A constant's folded value.
#[derive(Clone, PartialEq, Debug)]
pub enum ConstValue {
    /// An integer (or enum) value.
    Int(i64),
    /// A boolean.
    Bool(bool),
    /// A string.
    Str(String),
}

/// A constant symbol.
#[derive(Clone, PartialEq, Debug)]
pub struct ConstSymbol {
    /// Constant type.
    pub ty: Type,
    /// Folded value, when the initializer folded.
    pub value: Option<ConstValue>,
    /// Name of the backing module global, for constants whose initializer
    /// is resolved by the module-wide folder instead of locally.
    pub storage: Option<String>,
}

/// A module-global variable symbol.
#[derive(Clone, PartialEq, Debug)]
pub struct GlobalSymbol {
    /// Value type.
    pub ty: Type,
    /// Name of the module global backing this symbol (module-prefixed for
    /// imported globals).
    pub storage: String,
}

/// A function symbol. Overloads of one base name each get their own
/// `FuncSymbol`, distinguished by mangled name.
#[derive(Clone, PartialEq, Debug)]
pub struct FuncSymbol {
    /// Original (unmangled) name, without any module prefix.
    pub base_name: String,
    /// Mangled name: `base$t1$t2$...`.
    pub mangled: String,
    /// Formal parameters: name and converted type.
    pub params: Vec<(String, Type)>,
    /// Converted return type.
    pub ret: Type,
    /// Error type from the `?` suffix form, when declared.
    pub error_type: Option<Type>,
    /// A compiler built-in with no body in this module.
    pub is_builtin: bool,
    /// Defined in the module under analysis.
    pub is_local: bool,
    /// The declaration, kept for deferred body analysis of functions
    /// generated at compile time.
    pub decl: Option<FunctionDecl>,
    /// Calling convention, finalized after lowering.
    pub call_conv: CallConv,
    /// Marked while lowering when the body calls itself.
    pub recursive: bool,
}

impl FuncSymbol {
    /// Render the signature for diagnostics: `name(u8, u16) -> void`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|(_, t)| t.to_string()).collect();
        format!("{}({}) -> {}", self.base_name, params.join(", "), self.ret)
    }
}

/// An overload set: all registered functions sharing a base name in one
/// scope. Mangled names are unique within a set.
#[derive(Clone, PartialEq, Debug)]
pub struct OverloadSet {
    /// The shared base name.
    pub base: String,
    /// Member functions, in registration order.
    pub entries: Vec<FuncId>,
}

/// The symbol sum.
#[derive(Clone, PartialEq, Debug)]
pub enum Symbol {
    /// A local variable or parameter.
    Var(VarSymbol),
    /// A constant.
    Const(ConstSymbol),
    /// A module global variable.
    Global(GlobalSymbol),
    /// A single function.
    Func(FuncId),
    /// Functions overloaded on one base name.
    Overloads(OverloadSet),
    /// A type name.
    Type(Type),
    /// A module namespace; members are registered under `name.member`.
    Module(String),
}

#[derive(Default)]
struct ScopeData {
    parent: PackedOption<ScopeId>,
    symbols: FxHashMap<String, Symbol>,
}

/// The scope tree. One exists per analysis; [`ScopeTree::push`] and
/// [`ScopeTree::pop`] bracket every body and block.
pub struct ScopeTree {
    scopes: PrimaryMap<ScopeId, ScopeData>,
    current: ScopeId,
    root: ScopeId,
}

impl ScopeTree {
    /// Create a tree holding only the root (module) scope.
    pub fn new() -> Self {
        let mut scopes = PrimaryMap::new();
        let root = scopes.push(ScopeData::default());
        Self {
            scopes,
            current: root,
            root,
        }
    }

    /// The root (module) scope.
    pub fn root(&self) -> ScopeId {
        self.root
    }

    /// The innermost open scope.
    pub fn current(&self) -> ScopeId {
        self.current
    }

    /// Open a child of the current scope.
    pub fn push(&mut self) {
        let child = self.scopes.push(ScopeData {
            parent: PackedOption::from(self.current),
            symbols: FxHashMap::default(),
        });
        self.current = child;
    }

    /// Close the current scope, returning to its parent.
    ///
    /// Panics when called on the root scope; push/pop are strictly paired.
    pub fn pop(&mut self) {
        let parent = self.scopes[self.current]
            .parent
            .expand()
            .expect("cannot pop the module scope");
        self.current = parent;
    }

    /// Define a symbol in the current scope, shadowing outer definitions.
    pub fn define(&mut self, name: impl Into<String>, symbol: Symbol) {
        self.scopes[self.current].symbols.insert(name.into(), symbol);
    }

    /// Define a symbol in the root scope.
    pub fn define_global(&mut self, name: impl Into<String>, symbol: Symbol) {
        self.scopes[self.root].symbols.insert(name.into(), symbol);
    }

    /// Look up a name in the current scope only.
    pub fn lookup_local(&self, name: &str) -> Option<&Symbol> {
        self.scopes[self.current].symbols.get(name)
    }

    /// Look up a name, walking parent scopes.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            if let Some(sym) = self.scopes[id].symbols.get(name) {
                return Some(sym);
            }
            scope = self.scopes[id].parent.expand();
        }
        None
    }

    /// Register a function under its base name in the root scope,
    /// converting an existing single entry into an overload set.
    ///
    /// Returns `false` when an overload with the same mangled name is
    /// already present (the caller reports the diagnostic).
    pub fn register_function(
        &mut self,
        base: &str,
        id: FuncId,
        funcs: &PrimaryMap<FuncId, FuncSymbol>,
    ) -> bool {
        let symbols = &mut self.scopes[self.root].symbols;
        match symbols.get(base).cloned() {
            None => {
                symbols.insert(base.to_string(), Symbol::Func(id));
                true
            }
            Some(Symbol::Func(prev)) => {
                if funcs[prev].mangled == funcs[id].mangled {
                    return false;
                }
                symbols.insert(
                    base.to_string(),
                    Symbol::Overloads(OverloadSet {
                        base: base.to_string(),
                        entries: vec![prev, id],
                    }),
                );
                true
            }
            Some(Symbol::Overloads(mut set)) => {
                if set
                    .entries
                    .iter()
                    .any(|&e| funcs[e].mangled == funcs[id].mangled)
                {
                    return false;
                }
                set.entries.push(id);
                symbols.insert(base.to_string(), Symbol::Overloads(set));
                true
            }
            Some(_) => {
                // A non-function already owns the name; replace it and let
                // the caller report.
                symbols.insert(base.to_string(), Symbol::Func(id));
                false
            }
        }
    }

    /// Names visible from the current scope, for did-you-mean hints.
    pub fn visible_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            names.extend(self.scopes[id].symbols.keys().cloned());
            scope = self.scopes[id].parent.expand();
        }
        names
    }
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    fn var(ty: Type) -> Symbol {
        Symbol::Var(VarSymbol {
            ty,
            reg: Reg::new(0),
            mutable: true,
            is_param: false,
            param_index: None,
            direct: false,
            buffer_addr: None,
        })
    }

    #[test]
    fn lookup_walks_parents_and_local_does_not() {
        let mut scopes = ScopeTree::new();
        scopes.define("x", var(Type::U8));
        scopes.push();
        assert!(scopes.lookup("x").is_some());
        assert!(scopes.lookup_local("x").is_none());
        scopes.define("x", var(Type::U16));
        let Some(Symbol::Var(v)) = scopes.lookup("x") else {
            panic!("expected shadowing variable");
        };
        assert_eq!(v.ty, Type::U16);
        scopes.pop();
        let Some(Symbol::Var(v)) = scopes.lookup("x") else {
            panic!("expected outer variable");
        };
        assert_eq!(v.ty, Type::U8);
    }

    #[test]
    fn second_function_becomes_an_overload_set() {
        let mut scopes = ScopeTree::new();
        let mut funcs: PrimaryMap<FuncId, FuncSymbol> = PrimaryMap::new();
        let f8 = funcs.push(FuncSymbol {
            base_name: "f".into(),
            mangled: "f$u8".into(),
            params: vec![("a".into(), Type::U8)],
            ret: Type::U8,
            error_type: None,
            is_builtin: false,
            is_local: true,
            decl: None,
            call_conv: CallConv::Smc,
            recursive: false,
        });
        let f16 = funcs.push(FuncSymbol {
            base_name: "f".into(),
            mangled: "f$u16".into(),
            params: vec![("a".into(), Type::U16)],
            ret: Type::U16,
            error_type: None,
            is_builtin: false,
            is_local: true,
            decl: None,
            call_conv: CallConv::Smc,
            recursive: false,
        });

        assert!(scopes.register_function("f", f8, &funcs));
        assert!(matches!(scopes.lookup("f"), Some(Symbol::Func(_))));
        assert!(scopes.register_function("f", f16, &funcs));
        let Some(Symbol::Overloads(set)) = scopes.lookup("f") else {
            panic!("expected overload set");
        };
        assert_eq!(set.entries, vec![f8, f16]);

        // A duplicate mangled name is refused.
        let dup = funcs.push(FuncSymbol {
            base_name: "f".into(),
            mangled: "f$u16".into(),
            params: vec![("b".into(), Type::U16)],
            ret: Type::U16,
            error_type: None,
            is_builtin: false,
            is_local: true,
            decl: None,
            call_conv: CallConv::Smc,
            recursive: false,
        });
        assert!(!scopes.register_function("f", dup, &funcs));
    }
}
