//! Two-pass declaration analysis.
//!
//! The first pass walks top-level declarations and registers what later
//! code needs to see: struct/enum/bit-struct/alias types, function
//! signatures and constants. Forward references are therefore legal. The
//! second pass revisits every declaration to analyze bodies, initializers
//! and attributes, and finalizes each function's calling convention.

use crate::analyzer::{Analyzer, CurrentFunction};
use crate::scopes::{ConstSymbol, ConstValue, FuncId, FuncSymbol, Symbol, VarSymbol};
use minz_ast::{
    Attribute, Decl, DeclKind, Expr, ExprKind, FunctionDecl, Pos, TypeExpr,
};
use minz_codegen::callconv::CallConv;
use minz_codegen::ir;
use minz_codegen::ir::{
    mangle, BitField, BitStructType, EnumType, Function, GlobalInit, StructField, StructType, Type,
};
use std::rc::Rc;

/// Parameter-count ceiling for SMC parameter patching.
pub(crate) const SMC_MAX_PARAMS: usize = 3;
/// Locals-count ceiling beyond which SMC is disabled. Tunable policy, not
/// a proven optimum.
pub(crate) const SMC_MAX_LOCALS: usize = 6;

/// First pass: register types, constants and function signatures, in
/// source order.
pub(crate) fn first_pass(az: &mut Analyzer, decls: &[Decl]) {
    for decl in decls {
        match &decl.kind {
            DeclKind::Struct { name, fields } => register_struct(az, name, fields, decl.pos),
            DeclKind::Enum { name, variants } => register_enum(az, name, variants),
            DeclKind::BitStruct {
                name,
                underlying,
                fields,
            } => register_bit_struct(az, name, underlying, fields, decl.pos),
            DeclKind::TypeAlias { name, ty } => {
                if let Some(ty) = az.convert_type(ty, decl.pos) {
                    define_type(az, name, ty);
                }
            }
            DeclKind::Const {
                name,
                ty,
                value,
                public,
            } => register_const(az, name, ty.as_ref(), value, *public, decl.pos),
            DeclKind::Global {
                name,
                ty,
                value,
                public,
            } => register_global(az, name, ty.as_ref(), value.as_ref(), *public, decl.pos),
            DeclKind::Function(f) => {
                register_function_signature(az, f, decl.pos);
            }
            DeclKind::Incbin(path) => az.module.incbins.push(path.clone()),
            DeclKind::Import { .. }
            | DeclKind::TemplateDef { .. }
            | DeclKind::TemplateUse { .. }
            | DeclKind::MinzBlock(_) => {}
        }
    }
}

/// Second pass: analyze bodies and compile-time blocks, in source order.
pub(crate) fn second_pass(az: &mut Analyzer, decls: &[Decl]) {
    for decl in decls {
        match &decl.kind {
            DeclKind::Function(f) => {
                let key = (f.name.clone(), decl.pos.offset);
                if let Some(&id) = az.sig_map.get(&key) {
                    analyze_function_body(az, id, f);
                }
            }
            DeclKind::MinzBlock(body) => crate::comptime::execute_block(az, body, decl.pos),
            _ => {}
        }
    }
}

fn define_type(az: &mut Analyzer, name: &str, ty: Type) {
    az.scopes.define_global(name, Symbol::Type(ty.clone()));
    if az.prefix.is_some() {
        let qualified = az.prefixed(name);
        az.scopes.define_global(qualified, Symbol::Type(ty));
    }
}

fn register_struct(az: &mut Analyzer, name: &str, fields: &[minz_ast::FieldDecl], pos: Pos) {
    let mut converted = Vec::with_capacity(fields.len());
    for f in fields {
        let Some(ty) = az.convert_type(&f.ty, pos) else {
            return;
        };
        converted.push(StructField {
            name: f.name.clone(),
            ty,
        });
    }
    let ty = Type::Struct(Rc::new(StructType {
        name: az.prefixed(name),
        fields: converted,
    }));
    define_type(az, name, ty);
}

fn register_enum(az: &mut Analyzer, name: &str, variants: &[minz_ast::EnumVariant]) {
    let mut next = 0i64;
    let mut values = Vec::with_capacity(variants.len());
    for v in variants {
        let value = v.value.unwrap_or(next);
        next = value + 1;
        values.push((v.name.clone(), value));
    }
    let ty = Type::Enum(Rc::new(EnumType {
        name: az.prefixed(name),
        variants: values,
    }));
    define_type(az, name, ty);
}

fn register_bit_struct(
    az: &mut Analyzer,
    name: &str,
    underlying: &TypeExpr,
    fields: &[minz_ast::BitFieldDecl],
    pos: Pos,
) {
    let Some(under) = az.convert_type(underlying, pos) else {
        return;
    };
    if !matches!(under, Type::U8 | Type::U16) {
        az.errors.report(
            pos,
            format!("bit struct `{name}` must be backed by u8 or u16, not {under}"),
        );
        return;
    }
    let capacity = under.size() * 8;
    let mut offset = 0u8;
    let mut converted = Vec::with_capacity(fields.len());
    for f in fields {
        if u32::from(offset) + u32::from(f.width) > capacity {
            az.errors.report(
                pos,
                format!(
                    "bit struct `{name}` overflows its {capacity}-bit backing at field `{}`",
                    f.name
                ),
            );
            return;
        }
        converted.push((
            f.name.clone(),
            BitField {
                bit_offset: offset,
                bit_width: f.width,
            },
        ));
        offset += f.width;
    }
    let ty = Type::Bits(Rc::new(BitStructType {
        name: az.prefixed(name),
        underlying: under,
        fields: converted,
    }));
    define_type(az, name, ty);
}

fn register_const(
    az: &mut Analyzer,
    name: &str,
    ty: Option<&TypeExpr>,
    value: &Expr,
    public: bool,
    pos: Pos,
) {
    let declared = ty.and_then(|t| az.convert_type(t, pos));
    let folded = match &value.kind {
        ExprKind::StrLit(s) => Some(ConstValue::Str(s.clone())),
        ExprKind::BoolLit(b) => Some(ConstValue::Bool(*b)),
        _ => az.eval_const_int(value).map(ConstValue::Int),
    };

    let inferred = match &folded {
        Some(ConstValue::Str(_)) => Type::Str,
        Some(ConstValue::Bool(_)) => Type::Bool,
        Some(ConstValue::Int(v)) => Analyzer::infer_int_type(*v),
        None => declared.clone().unwrap_or(Type::U16),
    };
    let ty = match &declared {
        Some(declared) => {
            let ok = match &folded {
                Some(ConstValue::Int(v)) if declared.is_integer() => {
                    Analyzer::literal_fits(declared, *v)
                }
                _ => declared.is_assignable_from(&inferred),
            };
            if !ok {
                az.errors.report(
                    pos,
                    format!(
                        "type mismatch for constant {name}: declared type {declared} \
                         but initializer has type {inferred}"
                    ),
                );
            }
            declared.clone()
        }
        None => inferred,
    };

    let registered = az.prefixed(name);
    let symbol = Symbol::Const(ConstSymbol {
        ty: ty.clone(),
        value: folded.clone(),
        storage: (ty != Type::Str).then(|| registered.clone()),
    });
    az.scopes.define_global(name, symbol.clone());
    if az.prefix.is_some() {
        az.scopes.define_global(registered.clone(), symbol);
    }

    // Constants with static storage participate in the module-wide fold
    // and are swept when nothing ends up referring to them.
    if ty != Type::Str {
        let init = match &folded {
            Some(ConstValue::Int(v)) => GlobalInit::Const(*v),
            Some(ConstValue::Bool(b)) => GlobalInit::Const(i64::from(*b)),
            _ => GlobalInit::Expr(value.clone()),
        };
        az.module.globals.push(ir::Global {
            name: registered,
            ty,
            init,
            exported: public,
            constant: true,
        });
    }
}

fn register_global(
    az: &mut Analyzer,
    name: &str,
    ty: Option<&TypeExpr>,
    value: Option<&Expr>,
    public: bool,
    pos: Pos,
) {
    let declared = ty.and_then(|t| az.convert_type(t, pos));
    let folded = value.and_then(|v| az.eval_const_int(v));
    let ty = match declared {
        Some(t) => t,
        None => match (&folded, value) {
            (Some(v), _) => Analyzer::infer_int_type(*v),
            (None, Some(_)) => Type::U16,
            (None, None) => {
                az.errors.report(
                    pos,
                    format!("global `{name}` needs a type or an initializer"),
                );
                return;
            }
        },
    };
    if let Some(v) = folded {
        if ty.is_integer() && !Analyzer::literal_fits(&ty, v) {
            az.errors.report(
                pos,
                format!(
                    "type mismatch for global {name}: declared type {ty} but initializer \
                     has type {}",
                    Analyzer::infer_int_type(v)
                ),
            );
        }
    }

    let registered = az.prefixed(name);
    let symbol = Symbol::Global(crate::scopes::GlobalSymbol {
        ty: ty.clone(),
        storage: registered.clone(),
    });
    az.scopes.define_global(name, symbol.clone());
    if az.prefix.is_some() {
        az.scopes.define_global(registered.clone(), symbol);
    }
    let init = match (folded, value) {
        (Some(v), _) => GlobalInit::Const(v),
        (None, Some(e)) => GlobalInit::Expr(e.clone()),
        (None, None) => GlobalInit::Uninit,
    };
    az.module.globals.push(ir::Global {
        name: registered,
        ty,
        init,
        exported: public,
        constant: false,
    });
}

/// Register a function's signature and return its symbol id. Also used by
/// the compile-time executor for generated functions.
pub(crate) fn register_function_signature(
    az: &mut Analyzer,
    decl: &FunctionDecl,
    pos: Pos,
) -> Option<FuncId> {
    let mut params = Vec::with_capacity(decl.params.len());
    for p in &decl.params {
        let ty = az.convert_type(&p.ty, p.pos)?;
        params.push((p.name.clone(), ty));
    }
    let ret = match &decl.return_type {
        Some(t) => az.convert_type(t, pos)?,
        None => Type::Void,
    };
    let error_type = match &decl.error_type {
        Some(t) => Some(az.convert_type(t, pos)?),
        None => None,
    };

    let base = az.prefixed(&decl.name);
    let types: Vec<Type> = params.iter().map(|(_, t)| t.clone()).collect();
    let mangled = mangle(&base, &types);
    let id = az.funcs.push(FuncSymbol {
        base_name: decl.name.clone(),
        mangled: mangled.clone(),
        params,
        ret,
        error_type,
        is_builtin: false,
        is_local: true,
        decl: None,
        call_conv: CallConv::Smc,
        recursive: false,
    });

    let mut ok = az.scopes.register_function(&decl.name, id, &az.funcs);
    if az.prefix.is_some() {
        ok &= az.scopes.register_function(&base, id, &az.funcs);
    }
    if !ok {
        az.errors.report(
            pos,
            format!("duplicate definition of `{mangled}`"),
        );
        return None;
    }
    az.sig_map.insert((decl.name.clone(), pos.offset), id);
    Some(id)
}

/// Parse `@abi` attributes into a convention; `register: A=x, HL=ptr`
/// becomes the mapped form with its mapping string in the metadata.
fn apply_abi_attributes(az: &mut Analyzer, func: &mut Function, attrs: &[Attribute]) -> bool {
    let mut explicit = false;
    for attr in attrs {
        if attr.name != "abi" {
            continue;
        }
        let Some(value) = attr.value.as_deref() else {
            az.errors.report(attr.pos, "@abi needs a convention string");
            continue;
        };
        if let Some(mappings) = value.strip_prefix("register:") {
            func.call_conv = CallConv::RegisterMapped;
            func.metadata
                .insert("register_mappings".to_string(), mappings.trim().to_string());
            explicit = true;
        } else {
            match value.parse::<CallConv>() {
                Ok(cc) => {
                    func.call_conv = cc;
                    explicit = true;
                }
                Err(()) => az
                    .errors
                    .report(attr.pos, format!("unknown calling convention `{value}`")),
            }
        }
    }
    explicit
}

/// Analyze one function body: open the IR function, install parameters,
/// lower the statements, ensure a trailing return, and finalize the SMC
/// decision.
pub(crate) fn analyze_function_body(az: &mut Analyzer, id: FuncId, decl: &FunctionDecl) {
    let sym = az.funcs[id].clone();
    log::debug!("analyzing function {}", sym.mangled);

    let mut func = Function::new(sym.mangled.clone(), sym.ret.clone());
    let explicit_abi = apply_abi_attributes(az, &mut func, &decl.attributes);
    if explicit_abi {
        func.flags.smc_default = false;
        func.flags.smc_enabled = func.call_conv.is_smc();
    }
    func.flags.requires_context =
        matches!(func.call_conv, CallConv::Shadow | CallConv::Virtual);

    for (name, ty) in &sym.params {
        func.add_param(name.clone(), ty.clone());
    }
    func.assign_smc_slots();
    let smc_candidate = func.call_conv.is_smc();

    az.cur = Some(CurrentFunction {
        func,
        id,
        decl_name: decl.name.clone(),
    });
    az.scopes.push();
    for (index, (name, ty)) in sym.params.iter().enumerate() {
        let reg = az.func().params[index].reg;
        az.scopes.define(
            name.clone(),
            Symbol::Var(VarSymbol {
                ty: ty.clone(),
                reg,
                mutable: false,
                is_param: true,
                param_index: Some(index as u8),
                direct: !smc_candidate,
                buffer_addr: None,
            }),
        );
    }

    let mut body = decl.body.clone();
    crate::prune::prune_stmts(az, &mut body);
    for stmt in &body {
        az.lower_stmt(stmt);
    }
    if !az.func().ends_with_return() {
        az.emit(ir::Inst::new(ir::Opcode::Return));
    }
    az.scopes.pop();

    let cf = az.cur.take().expect("current function");
    let mut func = cf.func;
    finalize_smc(&mut func, az);

    az.funcs[id].call_conv = func.call_conv;
    az.funcs[id].recursive = func.flags.recursive;
    az.module.functions.push(func);
}

/// The self-modifying-code decision for a finished body.
///
/// The flag records whether the parameter patch slots stay viable; the
/// convention string records how the backend transfers arguments. A
/// non-recursive function with 1..=3 parameters keeps its slots but is
/// handed to the backend under the register convention.
fn finalize_smc(func: &mut Function, az: &mut Analyzer) {
    let params = func.params.len();
    let locals = func.locals.len();
    if func.flags.smc_default {
        if params > SMC_MAX_PARAMS {
            // Too many patch slots, recursive or not.
            func.flags.smc_enabled = false;
            func.call_conv = CallConv::Register;
        } else if locals > SMC_MAX_LOCALS {
            func.flags.smc_enabled = false;
            func.call_conv = CallConv::Register;
        } else if !func.flags.recursive && (1..=SMC_MAX_PARAMS).contains(&params) {
            func.call_conv = CallConv::Register;
        }
        // Recursive with few parameters, or parameter-less: SMC retained.
    } else if func.call_conv.is_smc() && params > SMC_MAX_PARAMS {
        az.errors.report(
            Pos::default(),
            format!(
                "{}: @abi(\"smc\") needs at most {SMC_MAX_PARAMS} parameters, found {params}",
                func.name
            ),
        );
        func.flags.smc_enabled = false;
        func.call_conv = CallConv::Register;
    }
    log::trace!(
        "{}: conv={} smc={} recursive={} params={} locals={}",
        func.name,
        func.call_conv,
        func.flags.smc_enabled,
        func.flags.recursive,
        params,
        locals
    );
}
