//! Built-in types, modules and function signatures.
//!
//! Seeded into the root scope before any user declaration is processed.
//! Built-in module members are registered under their dotted names
//! (`zx.screen.set_pixel`); the `std` members are additionally visible
//! unqualified, which is where `print_u8` and friends come from.

use crate::scopes::{ConstSymbol, ConstValue, FuncId, FuncSymbol, ScopeTree, Symbol};
use cranelift_entity::PrimaryMap;
use minz_codegen::callconv::CallConv;
use minz_codegen::ir::Type;

/// The built-in scalar type names.
pub const BUILTIN_TYPES: &[(&str, Type)] = &[
    ("u8", Type::U8),
    ("u16", Type::U16),
    ("u24", Type::U24),
    ("i8", Type::I8),
    ("i16", Type::I16),
    ("i24", Type::I24),
    ("bool", Type::Bool),
    ("void", Type::Void),
    ("string", Type::Str),
    ("lstring", Type::LStr),
];

/// The pre-registered module names; imports of these bypass the loader.
pub const BUILTIN_MODULES: &[&str] = &["std", "zx.screen", "zx.input", "zx.sound"];

/// Is `path` a built-in module?
pub fn is_builtin_module(path: &str) -> bool {
    BUILTIN_MODULES.contains(&path)
}

/// Resolve a built-in scalar type name.
pub fn builtin_type(name: &str) -> Option<Type> {
    BUILTIN_TYPES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, t)| t.clone())
}

struct BuiltinFn {
    name: &'static str,
    params: Vec<Type>,
    ret: Type,
}

fn bf(name: &'static str, params: Vec<Type>, ret: Type) -> BuiltinFn {
    BuiltinFn { name, params, ret }
}

fn std_functions() -> Vec<BuiltinFn> {
    vec![
        bf("print_u8", vec![Type::U8], Type::Void),
        bf("print_u16", vec![Type::U16], Type::Void),
        bf("print_i16", vec![Type::I16], Type::Void),
        bf("print_bool", vec![Type::Bool], Type::Void),
        bf("print_string", vec![Type::Str], Type::Void),
        bf("print_char", vec![Type::U8], Type::Void),
        bf("print_newline", vec![], Type::Void),
        bf("malloc", vec![Type::U16], Type::Pointer(Box::new(Type::U8))),
        bf("free", vec![Type::Pointer(Box::new(Type::U8))], Type::Void),
        bf("abs", vec![Type::I16], Type::I16),
        bf("sqrt", vec![Type::U16], Type::U8),
        bf("min", vec![Type::U16, Type::U16], Type::U16),
        bf("max", vec![Type::U16, Type::U16], Type::U16),
        bf("add", vec![Type::U16, Type::U16], Type::U16),
        bf("sub", vec![Type::U16, Type::U16], Type::U16),
        bf("mul", vec![Type::U16, Type::U16], Type::U16),
        bf("exit", vec![Type::U8], Type::Void),
        bf("panic", vec![Type::Str], Type::Void),
        bf("abort", vec![], Type::Void),
    ]
}

fn screen_functions() -> Vec<BuiltinFn> {
    vec![
        bf("clear", vec![], Type::Void),
        bf("set_border", vec![Type::U8], Type::Void),
        bf("set_ink", vec![Type::U8], Type::Void),
        bf("set_paper", vec![Type::U8], Type::Void),
        bf("set_pixel", vec![Type::U8, Type::U8], Type::Void),
        bf("pixel_addr", vec![Type::U8, Type::U8], Type::U16),
        bf("attr_addr", vec![Type::U8, Type::U8], Type::U16),
        bf("print_at", vec![Type::U8, Type::U8, Type::Str], Type::Void),
    ]
}

fn input_functions() -> Vec<BuiltinFn> {
    vec![
        bf("read_key", vec![], Type::U8),
        bf("wait_key", vec![], Type::U8),
        bf("key_pressed", vec![Type::U8], Type::Bool),
    ]
}

fn sound_functions() -> Vec<BuiltinFn> {
    vec![
        bf("beep", vec![Type::U16, Type::U16], Type::Void),
        bf("click", vec![], Type::Void),
    ]
}

const SCREEN_CONSTS: &[(&str, i64, Type)] = &[
    ("SCREEN_START", 0x4000, Type::U16),
    ("ATTR_START", 0x5800, Type::U16),
    ("WIDTH", 32, Type::U8),
    ("HEIGHT", 24, Type::U8),
    ("BLACK", 0, Type::U8),
    ("WHITE", 7, Type::U8),
];

const INPUT_CONSTS: &[(&str, i64, Type)] = &[
    ("KEY_ENTER", 13, Type::U8),
    ("KEY_SPACE", 32, Type::U8),
];

/// Seed built-in types, the built-in modules and their members into the
/// root scope.
pub fn seed(scopes: &mut ScopeTree, funcs: &mut PrimaryMap<FuncId, FuncSymbol>) {
    for (name, ty) in BUILTIN_TYPES {
        scopes.define_global(*name, Symbol::Type(ty.clone()));
    }
    for module in BUILTIN_MODULES {
        scopes.define_global(*module, Symbol::Module(module.to_string()));
    }

    // `link_name` is what call instructions carry; `std` members link by
    // their plain name, other modules by their qualified name.
    let mut define_fn = |scopes: &mut ScopeTree,
                         funcs: &mut PrimaryMap<FuncId, FuncSymbol>,
                         registered: &str,
                         link_name: &str,
                         f: &BuiltinFn| {
        let id = funcs.push(FuncSymbol {
            base_name: f.name.to_string(),
            mangled: link_name.to_string(),
            params: f
                .params
                .iter()
                .enumerate()
                .map(|(i, t)| (format!("a{i}"), t.clone()))
                .collect(),
            ret: f.ret.clone(),
            error_type: None,
            is_builtin: true,
            is_local: false,
            decl: None,
            call_conv: CallConv::Register,
            recursive: false,
        });
        scopes.define_global(registered, Symbol::Func(id));
    };

    for f in std_functions() {
        // `std` members are visible both ways.
        define_fn(scopes, funcs, f.name, f.name, &f);
        define_fn(scopes, funcs, &format!("std.{}", f.name), f.name, &f);
    }
    for f in screen_functions() {
        let name = format!("zx.screen.{}", f.name);
        define_fn(scopes, funcs, &name, &name, &f);
    }
    for f in input_functions() {
        let name = format!("zx.input.{}", f.name);
        define_fn(scopes, funcs, &name, &name, &f);
    }
    for f in sound_functions() {
        let name = format!("zx.sound.{}", f.name);
        define_fn(scopes, funcs, &name, &name, &f);
    }

    for (name, value, ty) in SCREEN_CONSTS {
        scopes.define_global(
            format!("zx.screen.{name}"),
            Symbol::Const(ConstSymbol {
                ty: ty.clone(),
                value: Some(ConstValue::Int(*value)),
                storage: None,
            }),
        );
    }
    for (name, value, ty) in INPUT_CONSTS {
        scopes.define_global(
            format!("zx.input.{name}"),
            Symbol::Const(ConstSymbol {
                ty: ty.clone(),
                value: Some(ConstValue::Int(*value)),
                storage: None,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_registers_members_both_ways() {
        let mut scopes = ScopeTree::new();
        let mut funcs = PrimaryMap::new();
        seed(&mut scopes, &mut funcs);

        assert!(matches!(scopes.lookup("u8"), Some(Symbol::Type(Type::U8))));
        assert!(matches!(scopes.lookup("print_u8"), Some(Symbol::Func(_))));
        assert!(matches!(
            scopes.lookup("std.print_u8"),
            Some(Symbol::Func(_))
        ));
        assert!(matches!(
            scopes.lookup("zx.screen.set_pixel"),
            Some(Symbol::Func(_))
        ));
        assert!(scopes.lookup("set_pixel").is_none());
        assert!(matches!(
            scopes.lookup("zx.screen.SCREEN_START"),
            Some(Symbol::Const(_))
        ));
        assert!(is_builtin_module("zx.sound"));
        assert!(!is_builtin_module("game.sprites"));
    }
}
