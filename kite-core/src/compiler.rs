//! The compilation driver.
//!
//! [`compile`] loads the named units plus the library units they import,
//! lexes and parses them (in parallel when `jobs > 1`), orders them so that
//! every unit comes after the units it imports, checks them one at a time
//! into a single program and, when no error was reported, generates C++.

use std::collections::BTreeSet;
use std::path::PathBuf;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, error, info};

use crate::codegen_cpp::{self, CppOptions};
use crate::const_eval::Limits;
use crate::diagnostic::{Category, Diagnostic, Diagnostics};
use crate::error::CoreError;
use crate::hir::{DefKind, Program, UnitId};
use crate::parser::{DEFAULT_MAX_DEPTH, ParsedUnit, parse_unit};
use crate::span::{FileId, SourceMap, Span};
use crate::stdlib::{default_stdlib_root, load_stdlib};
use crate::typecheck::Checker;

/// One named unit of source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub name: String,
    pub text: String,
}

impl SourceUnit {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        SourceUnit {
            name: name.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Bound on syntactic nesting before the parser gives up.
    pub max_nesting_depth: usize,
    /// Maximum nesting of compile-time calls.
    pub const_eval_depth_limit: usize,
    /// Maximum number of expressions one constant may evaluate.
    pub const_eval_step_limit: u64,
    /// Wrap the entry unit's `main` in a C++ `main`.
    pub emit_main: bool,
    /// Worker threads for lexing and parsing.
    pub jobs: usize,
    /// Library units importable by name. `None` disables the library.
    pub stdlib_root: Option<PathBuf>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            max_nesting_depth: DEFAULT_MAX_DEPTH,
            const_eval_depth_limit: 128,
            const_eval_step_limit: 1_000_000,
            emit_main: true,
            jobs: 1,
            stdlib_root: Some(default_stdlib_root()),
        }
    }
}

impl CompileOptions {
    pub fn limits(&self) -> Limits {
        Limits {
            depth: self.const_eval_depth_limit,
            steps: self.const_eval_step_limit,
        }
    }
}

#[derive(Debug)]
pub struct CompileOutput {
    /// No error was reported and output was produced.
    pub success: bool,
    /// Every diagnostic of every unit, sorted by position.
    pub diagnostics: Diagnostics,
    pub output: Option<String>,
    /// A defect of the compiler itself, kept apart from user diagnostics.
    pub internal_error: Option<CoreError>,
    /// Texts of all loaded units, for rendering diagnostics.
    pub sources: SourceMap,
}

impl CompileOutput {
    fn failed(diagnostics: Diagnostics, sources: SourceMap) -> Self {
        CompileOutput {
            success: false,
            diagnostics,
            output: None,
            internal_error: None,
            sources,
        }
    }
}

/// A parsed unit and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedUnit {
    pub name: String,
    pub parsed: ParsedUnit,
    pub is_stdlib: bool,
}

/// All units of one compilation after parsing.
#[derive(Debug, Clone, Default)]
pub struct Frontend {
    pub sources: SourceMap,
    pub units: Vec<LoadedUnit>,
}

impl Frontend {
    /// Syntax and lexical diagnostics of every unit.
    pub fn diagnostics(&self) -> Diagnostics {
        self.units
            .iter()
            .flat_map(|unit| unit.parsed.diagnostics.iter().cloned())
            .collect()
    }
}

/// Stack size of every thread that runs the recursive stages. At the
/// default limits parsing, checking, evaluation and emission stay well
/// inside it.
pub const STAGE_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Run `work` on a fresh thread with [`STAGE_STACK_SIZE`] bytes of stack
/// and wait for it. A panic in `work` is resumed on the caller.
pub fn on_stage_stack<R: Send>(work: impl FnOnce() -> R + Send) -> Result<R, CoreError> {
    let result = crossbeam::scope(|scope| -> Result<R, CoreError> {
        let handle = scope
            .builder()
            .name("kite-stage".to_string())
            .stack_size(STAGE_STACK_SIZE)
            .spawn(move |_| work())
            .map_err(CoreError::ThreadSpawn)?;
        match handle.join() {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    });
    match result {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Lex and parse `files`, spreading them over up to `jobs` threads. The
/// result is in the order of `files`.
fn parse_all(sources: &SourceMap, files: &[FileId], options: &CompileOptions) -> Result<Vec<ParsedUnit>, CoreError> {
    let depth = options.max_nesting_depth;
    let parse = |file: &FileId| {
        let text = sources.get(*file).map(|source| source.text.as_str()).unwrap_or_default();
        parse_unit(*file, text, depth)
    };
    let jobs = options.jobs.clamp(1, files.len().max(1));
    if jobs == 1 {
        return Ok(files.iter().map(parse).collect());
    }
    debug!(units = files.len(), jobs, "parsing in parallel");
    let chunk = files.len().div_ceil(jobs);
    let parsed = crossbeam::scope(|scope| -> Result<Vec<ParsedUnit>, CoreError> {
        let mut workers = Vec::with_capacity(jobs);
        for batch in files.chunks(chunk) {
            let worker = scope
                .builder()
                .name("kite-parse".to_string())
                .stack_size(STAGE_STACK_SIZE)
                .spawn(move |_| batch.iter().map(parse).collect::<Vec<_>>())
                .map_err(CoreError::ThreadSpawn)?;
            workers.push(worker);
        }
        let mut out = Vec::with_capacity(files.len());
        for worker in workers {
            match worker.join() {
                Ok(batch) => out.extend(batch),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        Ok(out)
    });
    match parsed {
        Ok(parsed) => parsed,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Parse `units` and every library unit they import, directly or not.
pub fn load_units(units: &[SourceUnit], options: &CompileOptions) -> Result<Frontend, CoreError> {
    let stdlib = match &options.stdlib_root {
        Some(root) => load_stdlib(root)?,
        None => Vec::new(),
    };
    let mut frontend = Frontend::default();
    let files: Vec<FileId> = units
        .iter()
        .map(|unit| frontend.sources.add(unit.name.clone(), unit.text.clone()))
        .collect();
    let parsed = parse_all(&frontend.sources, &files, options)?;
    frontend
        .units
        .extend(units.iter().zip(parsed).map(|(unit, parsed)| LoadedUnit {
            name: unit.name.clone(),
            parsed,
            is_stdlib: false,
        }));

    loop {
        let known: FxHashSet<&str> = frontend.units.iter().map(|unit| unit.name.as_str()).collect();
        let wanted: BTreeSet<&str> = frontend
            .units
            .iter()
            .flat_map(|unit| unit.parsed.module.imports())
            .map(|import| import.module.name.as_str())
            .filter(|name| !known.contains(name))
            .collect();
        let batch: Vec<_> = stdlib
            .iter()
            .filter(|unit| wanted.contains(unit.name.as_str()))
            .collect();
        if batch.is_empty() {
            break;
        }
        let files: Vec<FileId> = batch
            .iter()
            .map(|unit| frontend.sources.add(unit.name.clone(), unit.text.clone()))
            .collect();
        let parsed = parse_all(&frontend.sources, &files, options)?;
        frontend
            .units
            .extend(batch.iter().zip(parsed).map(|(unit, parsed)| LoadedUnit {
                name: unit.name.clone(),
                parsed,
                is_stdlib: true,
            }));
    }
    debug!(units = frontend.units.len(), "units loaded");
    Ok(frontend)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Active,
    Done,
}

struct ImportWalk<'a> {
    edges: &'a [Vec<(usize, Span)>],
    marks: Vec<Mark>,
    stack: Vec<usize>,
    order: Vec<usize>,
    cycles: Vec<Vec<usize>>,
    seen: FxHashSet<Vec<usize>>,
}

impl ImportWalk<'_> {
    fn visit(&mut self, node: usize) {
        let edges = self.edges;
        self.marks[node] = Mark::Active;
        self.stack.push(node);
        for &(target, _) in &edges[node] {
            match self.marks[target] {
                Mark::New => self.visit(target),
                Mark::Active => {
                    let start = self.stack.iter().position(|entry| *entry == target).unwrap_or(0);
                    let cycle = self.stack[start..].to_vec();
                    let mut key = cycle.clone();
                    key.sort_unstable();
                    if self.seen.insert(key) {
                        self.cycles.push(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        self.stack.pop();
        self.marks[node] = Mark::Done;
        self.order.push(node);
    }
}

fn unit_span(unit: &LoadedUnit) -> Span {
    Span {
        file: unit.parsed.file,
        ..Span::default()
    }
}

fn cycle_diagnostic(units: &[LoadedUnit], edges: &[Vec<(usize, Span)>], cycle: &[usize]) -> Diagnostic {
    let span_of = |from: usize, to: usize| {
        edges[from]
            .iter()
            .find(|(target, _)| *target == to)
            .map(|(_, span)| *span)
            .unwrap_or_else(|| unit_span(&units[from]))
    };
    let names: Vec<String> = cycle.iter().map(|index| format!("`{}`", units[*index].name)).collect();
    let last = cycle[cycle.len() - 1];
    let mut diagnostic = Diagnostic::error(
        Category::Driver,
        format!("import cycle between units {}", names.join(", ")),
        span_of(last, cycle[0]),
    )
    .with_code("E0901");
    for pair in cycle.windows(2) {
        diagnostic = diagnostic.with_related(
            span_of(pair[0], pair[1]),
            format!("`{}` imports `{}` here", units[pair[0]].name, units[pair[1]].name),
        );
    }
    let chain: Vec<&str> = cycle
        .iter()
        .chain(cycle.first())
        .map(|index| units[*index].name.as_str())
        .collect();
    diagnostic.with_note(format!("the cycle is {}", chain.join(" -> ")))
}

/// Order `units` so that each follows the units it imports. Returns the
/// order and the driver diagnostics: duplicate unit names and one
/// diagnostic per import cycle. Imports closing a cycle are ignored for
/// ordering; unknown imports are left to the checker.
pub fn import_order(units: &[LoadedUnit]) -> (Vec<usize>, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let mut by_name: FxHashMap<&str, usize> = FxHashMap::default();
    let mut roots = Vec::new();
    for (index, unit) in units.iter().enumerate() {
        if by_name.contains_key(unit.name.as_str()) {
            diagnostics.push(
                Diagnostic::error(
                    Category::Driver,
                    format!("unit `{}` is provided more than once", unit.name),
                    unit_span(unit),
                )
                .with_code("E0903"),
            );
            continue;
        }
        by_name.insert(&unit.name, index);
        roots.push(index);
    }
    let edges: Vec<Vec<(usize, Span)>> = units
        .iter()
        .map(|unit| {
            unit.parsed
                .module
                .imports()
                .filter_map(|import| {
                    by_name
                        .get(import.module.name.as_str())
                        .map(|target| (*target, import.module.span))
                })
                .collect()
        })
        .collect();
    let mut walk = ImportWalk {
        edges: &edges,
        marks: vec![Mark::New; units.len()],
        stack: Vec::new(),
        order: Vec::with_capacity(units.len()),
        cycles: Vec::new(),
        seen: FxHashSet::default(),
    };
    for root in roots {
        if walk.marks[root] == Mark::New {
            walk.visit(root);
        }
    }
    for cycle in &walk.cycles {
        diagnostics.push(cycle_diagnostic(units, &edges, cycle));
    }
    (walk.order, diagnostics)
}

/// Check units in the given order into one program.
pub fn check_in_order(units: &[LoadedUnit], order: &[usize], limits: Limits) -> Checker {
    let mut checker = Checker::new(limits);
    for index in order {
        let unit = &units[*index];
        checker.check_unit(&unit.name, &unit.parsed.module, unit.is_stdlib);
    }
    checker
}

fn has_main(program: &Program, unit: UnitId) -> bool {
    program.units.get(unit.0 as usize).is_some_and(|info| {
        info.defs.iter().any(|def| {
            let def = program.def(*def);
            def.name == "main" && matches!(def.kind, DefKind::Function(_))
        })
    })
}

/// Compile `units` with `entry` as the program's entry unit.
///
/// Problems in the compiled program are reported as diagnostics in the
/// output. An `Err` means the compilation could not start: the entry unit
/// is not among `units` or the library directory is missing. The stages
/// run on a thread of their own, see [`on_stage_stack`].
pub fn compile(units: &[SourceUnit], entry: &str, options: &CompileOptions) -> Result<CompileOutput, CoreError> {
    on_stage_stack(|| compile_here(units, entry, options))?
}

fn compile_here(units: &[SourceUnit], entry: &str, options: &CompileOptions) -> Result<CompileOutput, CoreError> {
    if !units.iter().any(|unit| unit.name == entry) {
        return Err(CoreError::UnknownEntry(entry.to_string()));
    }
    info!(units = units.len(), entry, "compiling");
    let frontend = load_units(units, options)?;
    let mut diagnostics = frontend.diagnostics();

    let (order, driver) = import_order(&frontend.units);
    let cyclic = driver.iter().any(|diagnostic| diagnostic.code == Some("E0901"));
    diagnostics.extend(driver);
    if cyclic {
        diagnostics.sort();
        return Ok(CompileOutput::failed(diagnostics, frontend.sources));
    }

    let checker = check_in_order(&frontend.units, &order, options.limits());
    let entry_id = checker.unit_id(entry);
    let (mut program, checked) = checker.finish();
    diagnostics.merge(checked);

    let Some(entry_id) = entry_id else {
        return Err(CoreError::UnknownEntry(entry.to_string()));
    };
    if options.emit_main && !has_main(&program, entry_id) {
        let file = program.units[entry_id.0 as usize].file;
        diagnostics.push(
            Diagnostic::error(
                Category::Driver,
                format!("entry unit `{entry}` has no `main` function"),
                Span {
                    file,
                    ..Span::default()
                },
            )
            .with_code("E0902")
            .with_note("declare `function main() { .. }` or compile as a library"),
        );
    }
    diagnostics.sort();
    if diagnostics.has_errors() {
        info!(errors = diagnostics.error_count(), "compilation failed");
        return Ok(CompileOutput::failed(diagnostics, frontend.sources));
    }

    let cpp = CppOptions {
        emit_main: options.emit_main,
    };
    match codegen_cpp::generate(&mut program, entry_id, &cpp) {
        Ok(text) => {
            info!(bytes = text.len(), "compilation succeeded");
            Ok(CompileOutput {
                success: true,
                diagnostics,
                output: Some(text),
                internal_error: None,
                sources: frontend.sources,
            })
        }
        Err(internal) => {
            error!(%internal, "code generation failed");
            Ok(CompileOutput {
                success: false,
                diagnostics,
                output: None,
                internal_error: Some(internal),
                sources: frontend.sources,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(output: &CompileOutput) -> Vec<&'static str> {
        output.diagnostics.iter().filter_map(|d| d.code).collect()
    }

    #[test]
    fn compiles_a_program() {
        let units = [SourceUnit::new(
            "main",
            "function main() { let x = 40 + 2; println(\"{}\", x); }",
        )];
        let output = compile(&units, "main", &CompileOptions::default()).expect("compiles");
        assert!(output.success, "{:?}", output.diagnostics);
        let text = output.output.expect("output");
        assert!(text.contains("void kite_main()"));
        assert!(text.contains("int main()"));
    }

    #[test]
    fn unknown_entry_is_a_driver_failure() {
        let units = [SourceUnit::new("main", "function main() { }")];
        let err = compile(&units, "app", &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownEntry(name) if name == "app"));
    }

    #[test]
    fn missing_main_is_reported_unless_compiling_a_library() {
        let units = [SourceUnit::new("lib", "function helper() -> i64 { 1 }")];
        let output = compile(&units, "lib", &CompileOptions::default()).expect("runs");
        assert!(!output.success);
        assert_eq!(codes(&output), ["E0902"]);

        let options = CompileOptions {
            emit_main: false,
            ..CompileOptions::default()
        };
        let output = compile(&units, "lib", &options).expect("runs");
        assert!(output.success, "{:?}", output.diagnostics);
        assert!(!output.output.expect("output").contains("int main()"));
    }

    #[test]
    fn units_are_checked_after_their_imports() {
        let units = [
            SourceUnit::new("main", "import util;\nfunction main() { println(\"{}\", util::twice(2)); }"),
            SourceUnit::new("util", "function twice(x: i64) -> i64 { x * 2 }"),
        ];
        let output = compile(&units, "main", &CompileOptions::default()).expect("runs");
        assert!(output.success, "{:?}", output.diagnostics);
        assert!(output.output.expect("output").contains("util_twice("));
    }

    #[test]
    fn library_units_are_loaded_on_import() {
        let units = [SourceUnit::new(
            "main",
            "import math;\nconst BIG: i64 = math::max(3, 9);\nfunction main() { println(\"{}\", math::abs(-4)); }",
        )];
        let output = compile(&units, "main", &CompileOptions::default()).expect("runs");
        assert!(output.success, "{:?}", output.diagnostics);
        assert_eq!(output.sources.len(), 2);
        let text = output.output.expect("output");
        assert!(text.contains("math_abs("));
        assert!(text.contains("const int64_t BIG = int64_t{9LL};"));
    }

    #[test]
    fn unknown_imports_are_name_errors() {
        let units = [SourceUnit::new("main", "import nowhere;\nfunction main() { }")];
        let output = compile(&units, "main", &CompileOptions::default()).expect("runs");
        assert!(!output.success);
        let first = output.diagnostics.iter().next().expect("diagnostic");
        assert_eq!(first.category, Category::NameResolution);
    }

    #[test]
    fn missing_stdlib_root_fails_the_compilation() {
        let options = CompileOptions {
            stdlib_root: Some(PathBuf::from("/definitely/not/here")),
            ..CompileOptions::default()
        };
        let units = [SourceUnit::new("main", "function main() { }")];
        assert!(matches!(
            compile(&units, "main", &options),
            Err(CoreError::MissingStdlib(_))
        ));
    }

    #[test]
    fn duplicate_units_are_rejected() {
        let units = [
            SourceUnit::new("main", "function main() { }"),
            SourceUnit::new("main", "function other() { }"),
        ];
        let output = compile(&units, "main", &CompileOptions::default()).expect("runs");
        assert_eq!(codes(&output), ["E0903"]);
    }

    #[test]
    fn parallel_parsing_matches_sequential() {
        let units: Vec<SourceUnit> = (0..6)
            .map(|index| SourceUnit::new(format!("u{index}"), format!("function f{index}() -> i64 {{ {index} }}")))
            .chain([SourceUnit::new("main", "function main() { }")])
            .collect();
        let sequential = compile(&units, "main", &CompileOptions::default()).expect("runs");
        let options = CompileOptions {
            jobs: 4,
            ..CompileOptions::default()
        };
        let parallel = compile(&units, "main", &options).expect("runs");
        assert!(parallel.success);
        assert_eq!(sequential.output, parallel.output);
    }

    #[test]
    fn unbounded_compile_time_recursion_is_diagnosed_at_default_limits() {
        let units = [SourceUnit::new(
            "main",
            "comptime function f(n: i64) -> i64 { f(n + 1) }\nconst X: i64 = f(0);\nfunction main() { }",
        )];
        let output = compile(&units, "main", &CompileOptions::default()).expect("runs");
        assert!(!output.success);
        let depth = output
            .diagnostics
            .iter()
            .find(|d| d.code == Some("E0602"))
            .expect("recursion limit reported");
        assert_eq!(depth.category, Category::ConstEval);
    }

    #[test]
    fn nesting_up_to_the_default_depth_compiles() {
        let nested = |depth: usize| {
            format!(
                "function main() {{ let y = {}2{}; println(\"{{}}\", y); }}",
                "(".repeat(depth),
                ")".repeat(depth)
            )
        };
        let deep = [SourceUnit::new("main", nested(DEFAULT_MAX_DEPTH - 6))];
        let output = compile(&deep, "main", &CompileOptions::default()).expect("runs");
        assert!(output.success, "{:?}", output.diagnostics);

        let options = CompileOptions {
            jobs: 2,
            ..CompileOptions::default()
        };
        let too_deep = [
            SourceUnit::new("main", nested(DEFAULT_MAX_DEPTH + 50)),
            SourceUnit::new("other", nested(DEFAULT_MAX_DEPTH + 50)),
        ];
        let output = compile(&too_deep, "main", &options).expect("runs");
        assert!(!output.success);
        assert_eq!(codes(&output).iter().filter(|code| **code == "E0110").count(), 2);
    }

    #[test]
    fn stage_panics_reach_the_caller() {
        let caught = std::panic::catch_unwind(|| on_stage_stack(|| panic!("stage failed")));
        assert!(caught.is_err());
        assert_eq!(on_stage_stack(|| 7).expect("thread starts"), 7);
    }
}
