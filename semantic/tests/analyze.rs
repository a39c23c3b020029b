//! End-to-end pipeline tests: source text through the dummy parser, the
//! analyzer, constant folding and dead-code elimination, down to the
//! module the backend would receive.

use minz_codegen::callconv::CallConv;
use minz_codegen::ir::{Function, GlobalInit, Module, Opcode, SmcSlot, Target};
use minz_codegen::verifier::verify_module;
use minz_semantic::environ::DummyParser;
use minz_semantic::{analyze, analyze_source, AnalyzeError};

fn compile(source: &str) -> Module {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut parser = DummyParser::new();
    match analyze_source(source, "test.minz", &mut parser) {
        Ok(module) => module,
        Err(e) => panic!("expected a clean compile:\n{e}"),
    }
}

fn compile_err(source: &str) -> AnalyzeError {
    let mut parser = DummyParser::new();
    analyze_source(source, "test.minz", &mut parser)
        .expect_err("expected analysis to report errors")
}

fn func<'m>(module: &'m Module, name: &str) -> &'m Function {
    module
        .function(name)
        .unwrap_or_else(|| panic!("no function `{name}` in module"))
}

fn opcodes(f: &Function) -> Vec<Opcode> {
    f.insts.iter().map(|i| i.opcode).collect()
}

fn call_targets(f: &Function) -> Vec<String> {
    f.insts
        .iter()
        .filter(|i| i.opcode == Opcode::Call)
        .filter_map(|i| match &i.target {
            Some(Target::Symbol(s)) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

// ---- SMC eligibility ----------------------------------------------------

#[test]
fn smc_eligibility() {
    let module = compile(
        "fun twice(x: u8) -> u8 { return x + x; }\n\
         fun main() -> u8 { return twice(21); }",
    );

    // Source order is preserved.
    let names: Vec<&str> = module.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["twice$u8", "main"]);

    let twice = func(&module, "twice$u8");
    assert!(twice.flags.smc_enabled);
    assert_eq!(twice.smc_slots, vec![SmcSlot { offset: 1, size: 2 }]);
    assert_eq!(twice.smc_patch_end(), 3);
    // Non-recursive with one parameter: the backend transfers arguments in
    // registers even though the patch slots stay viable.
    assert_eq!(twice.call_conv, CallConv::Register);

    let main = func(&module, "main");
    assert!(main.flags.smc_enabled);
    assert!(!main.flags.recursive);
    assert_eq!(main.call_conv, CallConv::Smc);
    assert!(main.smc_slots.is_empty());

    assert_eq!(verify_module(&module), Ok(()));
}

#[test]
fn recursion_keeps_smc_below_the_parameter_ceiling() {
    let module = compile(
        "fun fact(n: u8) -> u8 {\n\
             if n == 0 { return 1; }\n\
             return fact(n - 1);\n\
         }",
    );
    let fact = func(&module, "fact$u8");
    assert!(fact.flags.recursive);
    assert!(fact.flags.smc_enabled);
    assert_eq!(fact.call_conv, CallConv::Smc);
}

#[test]
fn too_many_locals_disable_smc() {
    let module = compile(
        "fun f() -> u8 {\n\
             let a: u8 = 1; let b: u8 = 2; let c: u8 = 3; let d: u8 = 4;\n\
             let e: u8 = 5; let g: u8 = 6; let h: u8 = 7;\n\
             return a + b + c + d + e + g + h;\n\
         }",
    );
    let f = func(&module, "f");
    assert!(!f.flags.smc_enabled);
    assert_eq!(f.call_conv, CallConv::Register);
}

#[test]
fn abi_attribute_overrides_the_default() {
    let module = compile(
        "@abi(\"register: A=x, HL=ptr\")\n\
         fun poke(x: u8, ptr: u16) -> void { return; }",
    );
    let poke = func(&module, "poke$u8$u16");
    assert_eq!(poke.call_conv, CallConv::RegisterMapped);
    assert!(!poke.flags.smc_enabled);
    assert_eq!(
        poke.metadata.get("register_mappings").map(String::as_str),
        Some("A=x, HL=ptr")
    );
}

// ---- Overload resolution ------------------------------------------------

#[test]
fn overload_resolution_picks_the_exact_match() {
    let module = compile(
        "fun f(a: u8) -> u8 { return a; }\n\
         fun f(a: u16) -> u16 { return a; }\n\
         fun main() -> u16 { return f(1000u16); }",
    );
    assert!(module.function("f$u8").is_some());
    assert!(module.function("f$u16").is_some());
    assert_eq!(call_targets(func(&module, "main")), vec!["f$u16"]);
    assert_eq!(verify_module(&module), Ok(()));
}

#[test]
fn no_matching_overload_lists_candidates() {
    let err = compile_err(
        "fun f(a: u8) -> u8 { return a; }\n\
         fun f(a: u16) -> u16 { return a; }\n\
         fun main() -> void { f(\"hi\"); }",
    );
    assert_eq!(err.diagnostics.len(), 1);
    let message = &err.diagnostics[0].message;
    assert!(message.contains("no matching overload for f(string)"), "{message}");
    assert!(message.contains("f(u8) -> u8"), "{message}");
    assert!(message.contains("f(u16) -> u16"), "{message}");
}

#[test]
fn duplicate_mangled_names_are_rejected() {
    let err = compile_err(
        "fun f(a: u8) -> u8 { return a; }\n\
         fun f(b: u8) -> u8 { return b; }",
    );
    assert!(err.diagnostics[0].message.contains("duplicate definition of `f$u8`"));
}

// ---- Iterator fusion ----------------------------------------------------

#[test]
fn iterator_chain_fuses_into_a_single_djnz_loop() {
    let module = compile(
        "global arr: [u8; 4] = [1, 2, 3, 4];\n\
         fun double(x: u8) -> u8 { return x + x; }\n\
         fun gt5(x: u8) -> bool { return x > 5; }\n\
         fun run() -> void { arr.iter().map(double).filter(gt5).forEach(print_u8); }",
    );
    let run = func(&module, "run");
    let ops = opcodes(run);

    // One loop, one DJNZ back edge, no index counter and no end-of-array
    // compare.
    assert_eq!(ops.iter().filter(|&&o| o == Opcode::Djnz).count(), 1);
    assert_eq!(ops.iter().filter(|&&o| o == Opcode::Label).count(), 2);
    assert!(!ops.contains(&Opcode::Lt));
    assert!(!ops.contains(&Opcode::Jump));

    // Counter initialized to the array length, homed in B.
    let counter = run
        .insts
        .iter()
        .find(|i| i.opcode == Opcode::LoadConst && i.hint == Some(minz_codegen::ir::RegHint::B))
        .expect("djnz counter load");
    assert_eq!(counter.imm, Some(4));

    // Per-iteration shape: load, call double, call gt5, conditional skip
    // to the loop-tail label, call print_u8, pointer advance, DJNZ.
    let head = ops
        .iter()
        .position(|&o| o == Opcode::Label)
        .expect("loop head label");
    assert_eq!(
        &ops[head + 1..],
        &[
            Opcode::LoadPtr,
            Opcode::Call,
            Opcode::Call,
            Opcode::JumpIfNot,
            Opcode::Call,
            Opcode::Label,
            Opcode::Add,
            Opcode::Djnz,
            Opcode::Return,
        ]
    );
    assert_eq!(
        call_targets(run),
        vec!["double$u8", "gt5$u8", "print_u8"]
    );
    assert_eq!(verify_module(&module), Ok(()));
}

#[test]
fn skip_and_take_fold_into_count_and_start() {
    let module = compile(
        "global xs: [u8; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];\n\
         fun run() -> void { xs.iter().skip(2).take(5).forEach(print_u8); }",
    );
    let run = func(&module, "run");
    let counter = run
        .insts
        .iter()
        .find(|i| i.opcode == Opcode::LoadConst && i.hint == Some(minz_codegen::ir::RegHint::B))
        .expect("djnz counter load");
    assert_eq!(counter.imm, Some(5));
    // The starting pointer is advanced by skip * element size.
    assert!(run
        .insts
        .iter()
        .any(|i| i.opcode == Opcode::LoadConst && i.imm == Some(2)));
}

#[test]
fn skip_while_is_rejected_in_djnz_mode() {
    let err = compile_err(
        "global xs: [u8; 4] = [1, 2, 3, 4];\n\
         fun small(x: u8) -> bool { return x < 3; }\n\
         fun run() -> void { xs.iter().skipWhile(small).forEach(print_u8); }",
    );
    assert!(err.diagnostics[0]
        .message
        .contains("not yet implemented: skipWhile in DJNZ mode"));
}

#[test]
fn flat_map_is_feature_gated() {
    let err = compile_err(
        "global xs: [u8; 4] = [1, 2, 3, 4];\n\
         fun id(x: u8) -> u8 { return x; }\n\
         fun run() -> void { xs.iter().flatMap(id).forEach(print_u8); }",
    );
    assert!(err.diagnostics[0]
        .message
        .contains("not yet implemented: flatMap"));
}

#[test]
fn reduce_accumulates_into_one_register() {
    let module = compile(
        "global xs: [u8; 3] = [1, 2, 3];\n\
         fun plus(acc: u16, x: u8) -> u16 { return acc + x; }\n\
         fun sum() -> u16 { return xs.iter().reduce(plus, 0u16); }",
    );
    let sum = func(&module, "sum");
    let call = sum
        .insts
        .iter()
        .find(|i| i.opcode == Opcode::Call)
        .expect("reduce call");
    // The accumulator register feeds itself.
    assert_eq!(call.dest, Some(call.args[0]));
    assert_eq!(verify_module(&module), Ok(()));
}

#[test]
fn lambda_operators_are_lifted_into_functions() {
    let module = compile(
        "global xs: [u8; 4] = [1, 2, 3, 4];\n\
         fun run() -> void { xs.iter().map(|x| x + x).forEach(print_u8); }",
    );
    let lifted = module
        .functions
        .iter()
        .find(|f| f.name.starts_with("lambda_"))
        .expect("lifted lambda function");
    assert_eq!(lifted.params.len(), 1);
    assert_eq!(verify_module(&module), Ok(()));
}

// ---- Loop statements ----------------------------------------------------

#[test]
fn empty_arrays_never_enter_loop_bodies() {
    let module = compile(
        "global e: [u8; 0];\n\
         fun f() -> void { loop at e -> it { print_u8(it); } }",
    );
    assert_eq!(opcodes(func(&module, "f")), vec![Opcode::Return]);
}

#[test]
fn loop_at_strategy_boundary_at_255() {
    let module = compile(
        "global big: [u8; 255];\n\
         fun f() -> void { loop at big -> it { print_u8(it); } }",
    );
    let ops = opcodes(func(&module, "f"));
    assert!(ops.contains(&Opcode::Djnz));
    assert!(!ops.contains(&Opcode::Lt));

    let module = compile(
        "global bigger: [u8; 256];\n\
         fun f() -> void { loop at bigger -> it { print_u8(it); } }",
    );
    let ops = opcodes(func(&module, "f"));
    assert!(!ops.contains(&Opcode::Djnz));
    assert!(ops.contains(&Opcode::Lt));
}

#[test]
fn into_mode_copies_through_the_static_buffer() {
    let module = compile(
        "struct Sprite { x: u8, y: u8 }\n\
         global sprites: [Sprite; 4];\n\
         fun nudge() -> void { loop at sprites into s { s.x = 7; } }",
    );
    let ops = opcodes(func(&module, "nudge"));
    assert!(ops.contains(&Opcode::CopyIn));
    assert!(ops.contains(&Opcode::CopyOut));
    assert!(ops.contains(&Opcode::StoreDirect));
}

#[test]
fn countdown_loop_uses_djnz_for_small_literals() {
    let module = compile("fun f() -> void { do 10 times { print_newline(); } }");
    let ops = opcodes(func(&module, "f"));
    assert!(ops.contains(&Opcode::Djnz));
}

// ---- Constant folding and dead-code elimination -------------------------

#[test]
fn constant_folding_and_dce_across_the_module() {
    let module = compile(
        "const K: u16 = 2 * 3 + 4;\n\
         global G: u16 = K;\n\
         fun main() -> u16 { let x: u16 = 10 + 20; return x; }",
    );

    // K folded into G and swept; G retained.
    assert!(module.global("K").is_none());
    let g = module.global("G").expect("G survives");
    assert_eq!(g.init, GlobalInit::Const(10));

    // The body collapses to the folded constant and the return.
    let main = func(&module, "main");
    assert_eq!(opcodes(main), vec![Opcode::LoadConst, Opcode::Return]);
    assert_eq!(main.insts[0].imm, Some(30));
    assert!(main.locals.is_empty());
}

#[test]
fn constant_conditionals_collapse_before_lowering() {
    let module = compile(
        "const DEBUG_DRAW: bool = false;\n\
         fun f() -> u8 {\n\
             if DEBUG_DRAW { return 1; }\n\
             return 2;\n\
         }",
    );
    let f = func(&module, "f");
    // No branch survives; only the constant-2 return path remains.
    assert!(!opcodes(f).contains(&Opcode::JumpIfNot));
    assert_eq!(f.insts.last().map(|i| i.opcode), Some(Opcode::Return));
}

#[test]
fn statements_after_return_are_pruned() {
    let module = compile(
        "fun f() -> u8 { return 1; let dead: u8 = 2; return dead; }",
    );
    let f = func(&module, "f");
    assert_eq!(opcodes(f), vec![Opcode::LoadConst, Opcode::Return]);
}

// ---- Compile-time blocks and templates ----------------------------------

#[test]
fn minz_block_emits_constants_visible_to_later_code() {
    let module = compile(
        "@minz {\n\
             for i in 0..3 {\n\
                 @emit(\"pub const C{i}: u8 = {i*i};\")\n\
             }\n\
         }\n\
         fun main() -> u8 { return C2; }",
    );
    assert_eq!(module.global("C0").map(|g| g.init.clone()), Some(GlobalInit::Const(0)));
    assert_eq!(module.global("C1").map(|g| g.init.clone()), Some(GlobalInit::Const(1)));
    assert_eq!(module.global("C2").map(|g| g.init.clone()), Some(GlobalInit::Const(4)));

    let main = func(&module, "main");
    assert_eq!(opcodes(main), vec![Opcode::LoadConst, Opcode::Return]);
    assert_eq!(main.insts[0].imm, Some(4));
}

#[test]
fn minz_block_can_generate_functions() {
    let module = compile(
        "@minz { @emit(\"fun five() -> u8 {{ return 5; }}\") }\n\
         fun main() -> u8 { return five(); }",
    );
    assert!(module.function("five").is_some());
    assert_eq!(call_targets(func(&module, "main")), vec!["five"]);
}

#[test]
fn templates_expand_by_arity() {
    let module = compile(
        "@define(name, size) { global {0}: [u8; {1}]; }\n\
         @expand(buffer, 32);\n\
         fun main() -> u8 { return buffer[0]; }",
    );
    let buffer = module.global("buffer").expect("expanded global");
    assert_eq!(buffer.ty.to_string(), "a32_u8");
}

#[test]
fn template_arity_mismatch_is_positioned() {
    let err = compile_err(
        "@define(name) { global {0}: u8; }\n\
         @expand(a, b, c);",
    );
    assert!(err.diagnostics[0].message.contains("no template takes 3 argument(s)"));
    assert_eq!(err.diagnostics[0].pos.line, 2);
}

// ---- Diagnostics ---------------------------------------------------------

#[test]
fn literal_overflow_reports_a_type_mismatch() {
    let err = compile_err("fun main() -> void { let x: u8 = 1000; }");
    assert_eq!(err.diagnostics.len(), 1);
    assert_eq!(
        err.diagnostics[0].message,
        "type mismatch for variable x: declared type u8 but initializer has type u16"
    );
}

#[test]
fn undefined_identifiers_get_suggestions() {
    let err = compile_err(
        "global score: u16 = 0;\n\
         fun main() -> u16 { return scorre; }",
    );
    assert!(err.diagnostics[0].message.contains("did you mean `score`"));
}

#[test]
fn errors_accumulate_in_source_order() {
    let err = compile_err(
        "fun main() -> void {\n\
             let a: u8 = 1000;\n\
             let b: u8 = undefined_thing;\n\
             nonexistent();\n\
         }",
    );
    assert_eq!(err.diagnostics.len(), 3);
    assert!(err.diagnostics[0].message.contains("variable a"));
    assert!(err.diagnostics[1].message.contains("undefined_thing"));
    assert!(err.diagnostics[2].message.contains("nonexistent"));
}

#[test]
fn indexing_a_scalar_is_an_invariant_violation() {
    let err = compile_err("fun f() -> u8 { let x: u8 = 1; return x[0]; }");
    assert!(err.diagnostics[0].message.contains("cannot index a value of type u8"));
}

// ---- Types, casts, bit structs -----------------------------------------

#[test]
fn bit_struct_casts_are_free() {
    let module = compile(
        "bits Attr: u8 { ink: 3, paper: 3, bright: 1, flash: 1 }\n\
         fun f(a: Attr) -> u8 { return a as u8; }",
    );
    let f = func(&module, "f$Attr");
    assert_eq!(opcodes(f), vec![Opcode::LoadParam, Opcode::Return]);
    // Same register, different recorded type.
    assert_eq!(f.insts[0].dest, f.insts[1].src1);
}

#[test]
fn bit_field_access_carries_offset_and_width() {
    let module = compile(
        "bits Attr: u8 { ink: 3, paper: 3, bright: 1, flash: 1 }\n\
         global attr: Attr;\n\
         fun paper_of() -> u8 { return attr.paper; }",
    );
    let f = func(&module, "paper_of");
    let load = f
        .insts
        .iter()
        .find(|i| i.opcode == Opcode::LoadBits)
        .expect("bit-field load");
    assert_eq!(load.imm, Some(3));
    assert_eq!(load.imm2, Some(3));
}

#[test]
fn struct_fields_use_running_offsets() {
    let module = compile(
        "struct Sprite { x: u8, y: u8, addr: u16 }\n\
         global s: Sprite;\n\
         fun addr_of_sprite() -> u16 { return s.addr; }",
    );
    let f = func(&module, "addr_of_sprite");
    let load = f
        .insts
        .iter()
        .find(|i| i.opcode == Opcode::LoadField)
        .expect("field load");
    assert_eq!(load.imm, Some(2));
}

#[test]
fn enum_variants_are_constants() {
    let module = compile(
        "enum Color { BLACK, BLUE, RED = 5 }\n\
         fun f() -> Color { return Color.RED; }",
    );
    let f = func(&module, "f");
    assert_eq!(f.insts[0].opcode, Opcode::LoadConst);
    assert_eq!(f.insts[0].imm, Some(5));
}

#[test]
fn incompatible_casts_are_rejected() {
    let err = compile_err(
        "struct S { a: u8 }\n\
         global s: S;\n\
         fun f() -> u16 { return s as u16; }",
    );
    assert!(err.diagnostics[0].message.contains("cannot cast S to u16"));
}

// ---- Built-in modules and imports --------------------------------------

#[test]
fn builtin_modules_resolve_qualified() {
    let module = compile(
        "fun border() -> void { zx.screen.set_border(2); }\n\
         fun base() -> u16 { return zx.screen.SCREEN_START; }",
    );
    assert_eq!(call_targets(func(&module, "border")), vec!["zx.screen.set_border"]);
    let base = func(&module, "base");
    assert_eq!(base.insts[0].imm, Some(0x4000));
    // The builtin callee is declared as an external for the backend.
    assert!(module.external("zx.screen.set_border").is_some());
}

#[test]
fn imports_prefix_symbols_both_ways() {
    use minz_semantic::loader::FileModuleLoader;
    use minz_semantic::Parser as _;

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("game")).unwrap();
    std::fs::write(
        dir.path().join("game/sprites.minz"),
        "pub const COUNT: u8 = 8;\npub fun reset() -> void { print_newline(); }\n",
    )
    .unwrap();

    let source = "import game.sprites;\n\
                  fun main() -> u8 { game.sprites.reset(); return game.sprites.COUNT; }";
    let mut parser = DummyParser::new();
    let mut ids = minz_ast::NodeIds::new();
    let decls = parser.parse(source, "main.minz", &mut ids).unwrap();
    let mut loader = FileModuleLoader::new(vec![dir.path().to_path_buf()]);
    let module = analyze(
        decls,
        "main",
        "main.minz",
        &mut parser,
        Some(&mut loader),
        &mut ids,
    )
    .expect("import should analyze");

    assert!(module.function("game.sprites.reset").is_some());
    let main = func(&module, "main");
    assert_eq!(call_targets(main), vec!["game.sprites.reset"]);
    // COUNT folded into the call site.
    assert!(main
        .insts
        .iter()
        .any(|i| i.opcode == Opcode::LoadConst && i.imm == Some(8)));
}

#[test]
fn missing_modules_are_reported() {
    use minz_semantic::loader::FileModuleLoader;
    use minz_semantic::Parser as _;

    let dir = tempfile::tempdir().unwrap();
    let mut parser = DummyParser::new();
    let mut ids = minz_ast::NodeIds::new();
    let decls = parser.parse("import game.missing;", "main.minz", &mut ids).unwrap();
    let mut loader = FileModuleLoader::new(vec![dir.path().to_path_buf()]);
    let err = analyze(
        decls,
        "main",
        "main.minz",
        &mut parser,
        Some(&mut loader),
        &mut ids,
    )
    .expect_err("missing module should fail");
    assert!(err.diagnostics[0].message.contains("game.missing"));
}

// ---- Strings and assembly ----------------------------------------------

#[test]
fn string_literals_intern_once() {
    let module = compile(
        "fun f() -> void { print_string(\"hello\"); print_string(\"hello\"); print_string(\"bye\"); }",
    );
    assert_eq!(module.strings.len(), 2);
}

#[test]
fn interpolated_prints_coalesce_constant_parts() {
    let module = compile(
        "global score: u16 = 0;\n\
         const LIVES: u8 = 3;\n\
         fun hud() -> void { print_string(\"lives {LIVES} score {score}!\"); }",
    );
    let hud = func(&module, "hud");
    // Literal and constant parts collapse into one string; the runtime
    // variable prints at its inferred width.
    assert_eq!(
        call_targets(hud),
        vec!["print_string", "print_u16", "print_string"]
    );
    assert_eq!(module.strings.get("str_0"), Some(&b"lives 3 score "[..]));
    assert_eq!(module.strings.get("str_1"), Some(&b"!"[..]));
}

#[test]
fn inline_asm_passes_through() {
    let module = compile("fun f() -> void { asm { ld a, 255\n out (254), a } }");
    let f = func(&module, "f");
    let asm = f
        .insts
        .iter()
        .find(|i| i.opcode == Opcode::Asm)
        .expect("asm instruction");
    assert!(asm.comment.as_deref().unwrap().contains("out (254), a"));
}

// ---- Whole-module checks ------------------------------------------------

#[test]
fn analyzed_modules_always_verify() {
    let module = compile(
        "struct Point { x: u8, y: u8 }\n\
         enum Dir { UP, DOWN }\n\
         global origin: Point;\n\
         fun mirror(p: u8) -> u8 { return 0 - p as i8 as u8; }\n\
         fun go(d: u8) -> u8 {\n\
             let p: Point = Point { x: d, y: 2 };\n\
             if d == 0 { return p.x; }\n\
             for i in 0..10 { print_u8(i); }\n\
             while d > 100 { print_newline(); }\n\
             return mirror(p.y);\n\
         }",
    );
    assert_eq!(verify_module(&module), Ok(()));
}
