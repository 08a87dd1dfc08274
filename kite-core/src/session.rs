//! Entry points for interactive and editor tooling.
//!
//! A [`Session`] keeps one growing `<repl>` unit: each submission is checked
//! against everything submitted before it. [`analyze`] checks a set of units
//! without generating code and keeps whatever it could build, so editors
//! get trees, types and symbols even for broken input.

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::ast::{self, ItemKind, ParentMap, StmtKind};
use crate::compiler::{
    CompileOptions, Frontend, LoadedUnit, SourceUnit, check_in_order, import_order, load_units, on_stage_stack,
};
use crate::const_eval::{ConstValue, EvalError};
use crate::diagnostic::Diagnostics;
use crate::error::CoreError;
use crate::hir::{Body, Program, UnitId};
use crate::name_resolve::{SymbolDef, SymbolIndex};
use crate::parser::{parse_fragment, parse_unit};
use crate::span::{SourceMap, Span};
use crate::stdlib::{StdlibUnit, load_stdlib};
use crate::typecheck::Checker;

const REPL_UNIT: &str = "<repl>";

/// What a successful submission produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The submission was evaluated at compile time.
    Value { value: ConstValue, text: String, ty: String },
    /// Only declarations and bindings; their names in order.
    Declared(Vec<String>),
    /// Well typed, but only the run-time evaluation path can compute it.
    Runtime { body: Body, ty: String },
}

#[derive(Debug)]
pub struct Submission {
    /// `None` when an error was reported.
    pub outcome: Option<Outcome>,
    pub diagnostics: Diagnostics,
}

impl Submission {
    fn failed(diagnostics: Diagnostics) -> Self {
        Submission {
            outcome: None,
            diagnostics,
        }
    }
}

/// Persistent checking state for a read-eval-print loop.
pub struct Session {
    checker: Checker,
    unit: UnitId,
    sources: SourceMap,
    options: CompileOptions,
    stdlib: Vec<StdlibUnit>,
    submissions: usize,
}

impl Session {
    pub fn new(options: CompileOptions) -> Result<Self, CoreError> {
        let stdlib = match &options.stdlib_root {
            Some(root) => load_stdlib(root)?,
            None => Vec::new(),
        };
        let mut sources = SourceMap::new();
        let file = sources.add(REPL_UNIT, "");
        let mut checker = Checker::new(options.limits());
        let module = ast::Module {
            file,
            items: Vec::new(),
            span: Span {
                file,
                ..Span::default()
            },
        };
        let unit = checker.check_unit(REPL_UNIT, &module, false);
        Ok(Session {
            checker,
            unit,
            sources,
            options,
            stdlib,
            submissions: 0,
        })
    }

    pub fn program(&self) -> &Program {
        self.checker.program()
    }

    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    /// Check one fragment: declarations, `let` bindings, statements and an
    /// optional trailing expression.
    ///
    /// Declarations come first, then bindings in order; the remaining
    /// statements and the tail are checked together afterwards and
    /// evaluated at compile time when possible. Like [`compile`](crate::compile),
    /// the work runs on a thread of its own.
    pub fn submit(&mut self, source: &str) -> Result<Submission, CoreError> {
        on_stage_stack(|| self.submit_here(source))
    }

    fn submit_here(&mut self, source: &str) -> Submission {
        self.submissions += 1;
        let file = self.sources.add(format!("<repl:{}>", self.submissions), source);
        let (fragment, parsed) = parse_fragment(file, source, self.options.max_nesting_depth);
        let mut diagnostics: Diagnostics = parsed.into_iter().collect();
        if diagnostics.has_errors() {
            return Submission::failed(diagnostics);
        }
        trace!(
            items = fragment.items.len(),
            stmts = fragment.stmts.len(),
            tail = fragment.tail.is_some(),
            "submission parsed"
        );

        let imports: Vec<&ast::ImportDecl> = fragment
            .items
            .iter()
            .filter_map(|item| match &item.kind {
                ItemKind::Import(import) => Some(import),
                _ => None,
            })
            .collect();
        for import in &imports {
            diagnostics.merge(self.load_library(&import.module.name, &mut Vec::new()));
        }
        let mut declared: Vec<String> = imports.iter().map(|import| import.local_name().name.clone()).collect();
        self.checker.resolve_imports(self.unit, imports.into_iter());

        declared.extend(
            fragment
                .items
                .iter()
                .filter_map(|item| item.kind.declared_name())
                .map(|name| name.name.clone()),
        );
        self.checker.check_items(self.unit, &fragment.items);

        let mut rest = Vec::new();
        for stmt in &fragment.stmts {
            match &stmt.kind {
                StmtKind::Let {
                    name,
                    mutable,
                    ty,
                    init,
                } => {
                    self.checker.declare_binding(self.unit, name, *mutable, ty.as_ref(), init);
                    declared.push(name.name.clone());
                }
                _ => rest.push(stmt.clone()),
            }
        }

        if rest.is_empty() && fragment.tail.is_none() {
            diagnostics.merge(self.checker.take_diagnostics());
            diagnostics.sort();
            let outcome = (!diagnostics.has_errors()).then_some(Outcome::Declared(declared));
            return Submission { outcome, diagnostics };
        }

        let span = Span::new(file, 0, source.len() as u32);
        let body = self.checker.check_snippet(self.unit, &rest, fragment.tail.as_ref(), span);
        diagnostics.merge(self.checker.take_diagnostics());
        diagnostics.sort();
        if diagnostics.has_errors() {
            return Submission::failed(diagnostics);
        }

        let ty = self.program().types.display(body.expr.ty);
        let outcome = match self.checker.run_snippet(&body) {
            Ok(value) => {
                let text = value.render(self.program());
                Outcome::Value { value, text, ty }
            }
            Err(failure)
                if matches!(
                    failure.error,
                    EvalError::NotComptime(_) | EvalError::NotConstant(_) | EvalError::Poisoned
                ) =>
            {
                debug!(reason = %failure.error, "submission needs run-time evaluation");
                Outcome::Runtime { body, ty }
            }
            Err(failure) => {
                diagnostics.push(failure.into_diagnostic());
                return Submission::failed(diagnostics);
            }
        };
        Submission {
            outcome: Some(outcome),
            diagnostics,
        }
    }

    /// Check the library unit `name` and the units it imports, once.
    fn load_library(&mut self, name: &str, loading: &mut Vec<String>) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        if self.checker.unit_id(name).is_some() || loading.iter().any(|entry| entry == name) {
            return diagnostics;
        }
        let Some(unit) = self.stdlib.iter().find(|unit| unit.name == name).cloned() else {
            return diagnostics;
        };
        loading.push(unit.name.clone());
        let file = self.sources.add(unit.name.clone(), unit.text.clone());
        let parsed = parse_unit(file, &unit.text, self.options.max_nesting_depth);
        diagnostics.extend(parsed.diagnostics);
        for import in parsed.module.imports() {
            diagnostics.merge(self.load_library(&import.module.name, loading));
        }
        self.checker.check_unit(&unit.name, &parsed.module, true);
        diagnostics.merge(self.checker.take_diagnostics());
        loading.pop();
        debug!(unit = %unit.name, "library unit loaded into session");
        diagnostics
    }
}

/// Best-effort result of [`analyze`].
#[derive(Debug)]
pub struct Analysis {
    /// Token streams and syntax trees of every loaded unit.
    pub frontend: Frontend,
    pub program: Program,
    pub diagnostics: Diagnostics,
}

impl Analysis {
    pub fn symbols(&self) -> &SymbolIndex {
        &self.program.symbols
    }

    pub fn unit(&self, name: &str) -> Option<&LoadedUnit> {
        self.frontend.units.iter().find(|unit| unit.name == name)
    }

    /// Parent index of one unit's syntax tree.
    pub fn parents(&self, name: &str) -> Option<ParentMap> {
        self.unit(name).map(|unit| ParentMap::build(&unit.parsed.module))
    }

    /// The symbol defined or used at byte `offset` of unit `name`.
    pub fn definition_at(&self, name: &str, offset: u32) -> Option<&SymbolDef> {
        let file = self.unit(name)?.parsed.file;
        self.symbols().definition_at(file, offset)
    }
}

/// Parse and check `units` without generating code. Import cycles and
/// other errors are reported, never fatal; the units on a cycle are still
/// checked with the closing import left unresolved.
pub fn analyze(units: &[SourceUnit], options: &CompileOptions) -> Result<Analysis, CoreError> {
    on_stage_stack(|| analyze_here(units, options))?
}

fn analyze_here(units: &[SourceUnit], options: &CompileOptions) -> Result<Analysis, CoreError> {
    let frontend = load_units(units, options)?;
    let mut diagnostics = frontend.diagnostics();
    let (order, driver) = import_order(&frontend.units);
    diagnostics.extend(driver);
    let checker = check_in_order(&frontend.units, &order, options.limits());
    let (program, checked) = checker.finish();
    diagnostics.merge(checked);
    diagnostics.sort();
    let mut seen = FxHashSet::default();
    let mut unique = Diagnostics::new();
    for diagnostic in diagnostics {
        if seen.insert((diagnostic.span, diagnostic.code, diagnostic.message.clone())) {
            unique.push(diagnostic);
        }
    }
    debug!(units = frontend.units.len(), diagnostics = unique.len(), "analysis finished");
    Ok(Analysis {
        frontend,
        program,
        diagnostics: unique,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Category;

    fn session() -> Session {
        Session::new(CompileOptions::default()).expect("session starts")
    }

    fn value(submission: &Submission) -> &str {
        match &submission.outcome {
            Some(Outcome::Value { text, .. }) => text.as_str(),
            other => panic!("expected a value, got {other:?} with {:?}", submission.diagnostics),
        }
    }

    #[test]
    fn declarations_persist_between_submissions() {
        let mut session = session();
        let declared = session.submit("const LIMIT: i64 = 10;").expect("submission runs");
        assert_eq!(declared.outcome, Some(Outcome::Declared(vec!["LIMIT".to_string()])));
        assert_eq!(value(&session.submit("LIMIT * 2").expect("submission runs")), "20");
    }

    #[test]
    fn bindings_are_visible_to_later_submissions() {
        let mut session = session();
        let declared = session.submit("let x = 5;").expect("submission runs");
        assert_eq!(declared.outcome, Some(Outcome::Declared(vec!["x".to_string()])));
        let sum = session.submit("x + 1").expect("submission runs");
        assert_eq!(value(&sum), "6");
        assert!(matches!(sum.outcome, Some(Outcome::Value { ref ty, .. }) if ty == "i64"));
    }

    #[test]
    fn runtime_calls_take_the_runtime_path() {
        let mut session = session();
        session.submit("function double(n: i64) -> i64 { n * 2 }").expect("submission runs");
        let submission = session.submit("double(4)").expect("submission runs");
        assert!(submission.diagnostics.is_empty(), "{:?}", submission.diagnostics);
        assert!(matches!(submission.outcome, Some(Outcome::Runtime { ref ty, .. }) if ty == "i64"));
    }

    #[test]
    fn errors_do_not_poison_the_session() {
        let mut session = session();
        let failed = session.submit("missing + 1").expect("submission runs");
        assert!(failed.outcome.is_none());
        let first = failed.diagnostics.iter().next().expect("a diagnostic");
        assert_eq!(first.category, Category::NameResolution);
        assert_eq!(value(&session.submit("1 + 1").expect("submission runs")), "2");
    }

    #[test]
    fn compile_time_failures_are_diagnostics() {
        let mut session = session();
        let failed = session.submit("10 / 0").expect("submission runs");
        assert!(failed.outcome.is_none());
        assert!(failed.diagnostics.iter().any(|d| d.category == Category::ConstEval));
    }

    #[test]
    fn runaway_recursion_hits_the_default_depth_limit() {
        let mut session = session();
        session
            .submit("comptime function spin(n: i64) -> i64 { spin(n + 1) }")
            .expect("submission runs");
        let failed = session.submit("spin(0)").expect("submission runs");
        assert!(failed.outcome.is_none());
        assert!(failed.diagnostics.iter().any(|d| d.code == Some("E0602")), "{:?}", failed.diagnostics);
    }

    #[test]
    fn bindings_carry_their_type_for_hover() {
        let mut session = session();
        session.submit("let small: u8 = 7;").expect("submission runs");
        let symbol = session
            .program()
            .symbols
            .definitions()
            .iter()
            .find(|symbol| symbol.name == "small")
            .expect("binding is indexed");
        assert_eq!(symbol.detail, "u8");
    }

    #[test]
    fn library_units_can_be_imported() {
        let mut session = session();
        let declared = session.submit("import math;").expect("submission runs");
        assert_eq!(declared.outcome, Some(Outcome::Declared(vec!["math".to_string()])));
        assert_eq!(value(&session.submit("math::gcd(12, 18)").expect("submission runs")), "6");
    }

    #[test]
    fn analysis_survives_broken_input() {
        let source = "function helper() -> i64 { 1 }\nfunction main() { let v = helper(); missing(); }";
        let units = [SourceUnit::new("main", source)];
        let analysis = analyze(&units, &CompileOptions::default()).expect("analysis runs");
        assert!(analysis.diagnostics.iter().any(|d| d.code == Some("E0201")));

        let offset = source.rfind("helper()").expect("call site") as u32;
        let symbol = analysis.definition_at("main", offset).expect("resolved");
        assert_eq!(symbol.name, "helper");
        assert!(!analysis.parents("main").expect("unit").is_empty());
    }

    #[test]
    fn analysis_reports_cycles_and_keeps_going() {
        let units = [
            SourceUnit::new("a", "import b;\nfunction fa() -> i64 { 1 }"),
            SourceUnit::new("b", "import a;\nfunction fb() -> bool { 2 }"),
        ];
        let analysis = analyze(&units, &CompileOptions::default()).expect("analysis runs");
        let codes: Vec<_> = analysis.diagnostics.iter().filter_map(|d| d.code).collect();
        assert!(codes.contains(&"E0901"), "{codes:?}");
        assert!(codes.contains(&"E0301"), "{codes:?}");
    }
}
