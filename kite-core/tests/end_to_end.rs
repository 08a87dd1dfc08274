use kite_core::const_eval::Limits;
use kite_core::hir::{Body, DefKind, Program};
use kite_core::parser::{DEFAULT_MAX_DEPTH, parse_unit};
use kite_core::span::FileId;
use kite_core::types::TypeId;
use kite_core::typecheck::check_modules;
use kite_core::{Category, CompileOptions, SourceUnit, compile};

fn compile_one(text: &str) -> kite_core::CompileOutput {
    let units = [SourceUnit::new("main", text)];
    compile(&units, "main", &CompileOptions::default()).expect("compilation runs")
}

fn function_signatures(program: &Program) -> Vec<(String, String)> {
    program
        .defs
        .iter()
        .filter_map(|def| match &def.kind {
            DefKind::Function(function) => {
                let params: Vec<String> = function
                    .param_types
                    .iter()
                    .map(|ty| program.types.display(*ty))
                    .collect();
                let ret = program.types.display(function.ret);
                Some((def.name.clone(), format!("({}) -> {ret}", params.join(", "))))
            }
            _ => None,
        })
        .collect()
}

#[test]
fn equal_generic_instantiations_share_one_definition() {
    let source = "struct Box<T> { value: T }\n\
                  function first() -> Box<i32> { Box(value: 1) }\n\
                  function second() -> Box<i32> { let b: Box<i32> = Box(value: 2); b }\n\
                  function main() { println(\"{}\", first().value + second().value); }";
    let parsed = parse_unit(FileId(0), source, DEFAULT_MAX_DEPTH);
    assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
    let (program, diagnostics) = check_modules([("main", &parsed.module)], Limits::default());
    assert!(diagnostics.is_empty(), "{diagnostics:?}");
    let ret_of = |name: &str| {
        program
            .defs
            .iter()
            .find_map(|def| match &def.kind {
                DefKind::Function(function) if def.name == name => Some(function.ret),
                _ => None,
            })
            .expect("function exists")
    };
    assert_eq!(ret_of("first"), ret_of("second"));

    let output = compile_one(source);
    assert!(output.success, "{:?}", output.diagnostics);
    let text = output.output.expect("output");
    assert_eq!(text.matches("struct Box__i32 {").count(), 1, "{text}");
}

#[test]
fn unresolved_call_and_unrelated_syntax_error_are_both_reported() {
    let source = "function caller() { let n = undefined_helper(2); }\n\
                  function broken() { let = ; }\n\
                  function main() { }";
    let output = compile_one(source);
    assert!(!output.success);
    assert!(output.output.is_none());

    let resolution: Vec<_> = output
        .diagnostics
        .iter()
        .filter(|d| d.category == Category::NameResolution)
        .collect();
    assert_eq!(resolution.len(), 1, "{:?}", output.diagnostics);
    let call_start = source.find("undefined_helper").expect("call in source") as u32;
    let call_end = source.find("(2)").expect("arguments") as u32 + 3;
    assert!(resolution[0].span.start >= call_start && resolution[0].span.end <= call_end);
    assert_eq!(resolution[0].code, Some("E0201"));

    let broken_start = source.find("function broken").expect("second function") as u32;
    assert!(
        output
            .diagnostics
            .iter()
            .any(|d| d.category == Category::Syntax && d.span.start > broken_start)
    );
}

#[test]
fn import_cycles_fail_without_output() {
    let units = [
        SourceUnit::new("alpha", "import beta;\nfunction main() { }"),
        SourceUnit::new("beta", "import alpha;\nfunction helper() { }"),
    ];
    let output = compile(&units, "alpha", &CompileOptions::default()).expect("compilation runs");
    assert!(!output.success);
    assert!(output.output.is_none());
    let cycles: Vec<_> = output.diagnostics.iter().filter(|d| d.code == Some("E0901")).collect();
    assert_eq!(cycles.len(), 1);
    assert!(cycles[0].message.contains("`alpha`"));
    assert!(cycles[0].message.contains("`beta`"));
    let rendered = output.diagnostics.render(&output.sources);
    assert!(rendered.contains("import cycle"), "{rendered}");
}

#[test]
fn division_by_zero_in_an_array_size_is_a_const_eval_error() {
    let output = compile_one("static DATA: [i32; 10 / 0] = [];\nfunction main() { }");
    assert!(!output.success);
    assert!(output.output.is_none());
    assert!(
        output.diagnostics.iter().any(|d| d.category == Category::ConstEval),
        "{:?}",
        output.diagnostics
    );
}

#[test]
fn checking_the_same_tree_twice_gives_the_same_types() {
    let source = "enum Shape { Circle(f64), Square(f64) }\n\
                  function area(s: Shape) -> f64 { match s { Shape::Circle(r) => r * r * 3.0, Shape::Square(w) => w * w } }\n\
                  function pick<T>(flag: bool, a: T, b: T) -> T { if flag { a } else { b } }\n\
                  function main() { let x = pick(true, 1, 2); println(\"{} {}\", x, area(Shape::Square(2.0))); }";
    let parsed = parse_unit(FileId(0), source, DEFAULT_MAX_DEPTH);
    assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);

    let (first, first_diagnostics) = check_modules([("main", &parsed.module)], Limits::default());
    let (second, second_diagnostics) = check_modules([("main", &parsed.module)], Limits::default());
    assert!(first_diagnostics.is_empty(), "{first_diagnostics:?}");
    assert!(second_diagnostics.is_empty(), "{second_diagnostics:?}");
    assert_eq!(function_signatures(&first), function_signatures(&second));
    assert_eq!(first.types.len(), second.types.len());
    assert_eq!(type_table(&first), type_table(&second));
    let bodies = function_bodies(&first);
    assert!(bodies.iter().any(|(name, _)| name == "pick"));
    assert_eq!(bodies, function_bodies(&second));
}

/// Every interned type by id, so equal ids across programs name equal types.
fn type_table(program: &Program) -> Vec<String> {
    (0..program.types.len()).map(|id| program.types.display(TypeId(id as u32))).collect()
}

/// Checked bodies by function name; each expression carries its type.
fn function_bodies(program: &Program) -> Vec<(String, Body)> {
    program
        .defs
        .iter()
        .filter_map(|def| match &def.kind {
            DefKind::Function(function) => {
                let body = function.body.as_deref()?.clone();
                Some((def.name.clone(), body))
            }
            _ => None,
        })
        .collect()
}
