//! Purity seeds for functions known to the compiler.
//!
//! Names are matched on the demangled base name, so every overload of a
//! seeded function shares its classification.

/// Is `base` a built-in whose result depends only on its arguments?
pub(crate) fn known_pure(base: &str) -> bool {
    matches!(base, "add" | "sub" | "mul" | "abs" | "sqrt" | "min" | "max")
}

/// Is `base` a built-in with observable effects?
pub(crate) fn known_side_effecting(base: &str) -> bool {
    base.starts_with("print_") || matches!(base, "malloc" | "free")
}
