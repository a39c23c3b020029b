//! The top-level module aggregate handed to the backend.

use super::{Function, Type};
use core::fmt;
use rustc_hash::FxHashMap;

/// The initializer of a module global.
#[derive(Clone, PartialEq, Debug)]
pub enum GlobalInit {
    /// No initializer; the backend reserves zeroed storage.
    Uninit,
    /// A folded constant value.
    Const(i64),
    /// An initializer the constant folder could not resolve, handed to the
    /// backend as the original expression.
    Expr(minz_ast::Expr),
}

/// A module global: a variable or constant with static storage.
#[derive(Clone, PartialEq, Debug)]
pub struct Global {
    /// Global name, possibly module-prefixed.
    pub name: String,
    /// Value type.
    pub ty: Type,
    /// Initializer.
    pub init: GlobalInit,
    /// Exported globals survive dead-code elimination unconditionally.
    pub exported: bool,
    /// Declared `const`; a candidate for folding and removal.
    pub constant: bool,
}

/// The interned string-literal table.
///
/// Contents are uniquely labeled: interning the same byte sequence twice
/// yields the same label, so no two labels point at equal bytes.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct StringTable {
    entries: Vec<(String, Vec<u8>)>,
    by_content: FxHashMap<Vec<u8>, usize>,
}

impl StringTable {
    /// Intern a byte sequence, returning its label.
    pub fn intern(&mut self, bytes: &[u8]) -> String {
        if let Some(&i) = self.by_content.get(bytes) {
            return self.entries[i].0.clone();
        }
        let label = format!("str_{}", self.entries.len());
        self.by_content.insert(bytes.to_vec(), self.entries.len());
        self.entries.push((label.clone(), bytes.to_vec()));
        label
    }

    /// Look up the bytes behind a label.
    pub fn get(&self, label: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, b)| b.as_slice())
    }

    /// Iterate over `(label, bytes)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(l, b)| (l.as_str(), b.as_slice()))
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A function defined outside the module: a built-in or an imported
/// module's function. The backend resolves the name at link time; the
/// analyzer records the signature so call sites stay checkable.
#[derive(Clone, PartialEq, Debug)]
pub struct ExternalFunc {
    /// Callee name as it appears in call targets.
    pub name: String,
    /// Parameter types.
    pub params: Vec<Type>,
    /// Return type.
    pub ret: Type,
}

/// A fully-analyzed module: ordered functions, globals and the string
/// table. This is the complete input of the backend code emitter.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Module {
    /// Module name, used as the prefix for exported symbols.
    pub name: String,
    /// Functions in source order.
    pub functions: Vec<Function>,
    /// Globals in source order.
    pub globals: Vec<Global>,
    /// Interned string literals.
    pub strings: StringTable,
    /// Functions referenced but defined elsewhere.
    pub externals: Vec<ExternalFunc>,
    /// Paths of binary files the backend includes verbatim, from
    /// `@incbin` directives.
    pub incbins: Vec<String>,
}

impl Module {
    /// Create an empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Look up a function by mangled name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Look up a global by name.
    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Look up an external function by name.
    pub fn external(&self, name: &str) -> Option<&ExternalFunc> {
        self.externals.iter().find(|e| e.name == name)
    }

    /// Record an external function, once per name.
    pub fn declare_external(&mut self, name: impl Into<String>, params: Vec<Type>, ret: Type) {
        let name = name.into();
        if self.external(&name).is_none() {
            self.externals.push(ExternalFunc { name, params, ret });
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for g in &self.globals {
            let kind = if g.constant { "const" } else { "global" };
            write!(f, "{kind} {}: {}", g.name, g.ty)?;
            match &g.init {
                GlobalInit::Uninit => writeln!(f)?,
                GlobalInit::Const(v) => writeln!(f, " = {v}")?,
                GlobalInit::Expr(_) => writeln!(f, " = <expr>")?,
            }
        }
        for (label, bytes) in self.strings.iter() {
            writeln!(f, "string {label} = {:?}", String::from_utf8_lossy(bytes))?;
        }
        for func in &self.functions {
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut table = StringTable::default();
        let a = table.intern(b"hello");
        let b = table.intern(b"world");
        let c = table.intern(b"hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&a), Some(&b"hello"[..]));

        // No two labels point at equal byte sequences.
        let mut seen = std::collections::HashSet::new();
        for (_, bytes) in table.iter() {
            assert!(seen.insert(bytes.to_vec()));
        }
    }
}
