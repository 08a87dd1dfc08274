//! Name resolution and type checking.
//!
//! [`Checker`] turns parsed units into one [`Program`]. Units are checked
//! one at a time in dependency order: every unit a unit imports has been
//! checked before it. Inside a unit, declarations are first collected so
//! that items may refer to each other in any order, then their signatures
//! are resolved, and finally bodies are checked. Function bodies and global
//! initializers are checked lazily, so the compile-time interpreter can ask
//! for a body or a constant that has not been reached yet.

mod expr;
mod generics;
mod items;
mod ownership;
mod stmt;
mod traits;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::ast;
use crate::const_eval::{self, ConstContext, ConstValue, EvalError, EvalFailure, Limits};
use crate::diagnostic::{Category, Diagnostic, Diagnostics};
use crate::hir::{Body, DefKind, HirExpr, Program, UnitId};
use crate::name_resolve::{ModuleScope, SymbolId};
use crate::span::Span;
use crate::types::{DefId, TypeId};

pub use ownership::is_copy;

use expr::BodyChecker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyState {
    Pending,
    InProgress,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
struct PendingFunction {
    unit: UnitId,
    decl: Arc<ast::FunctionDecl>,
    /// The return type comes from the expression body.
    infer_ret: bool,
}

#[derive(Debug, Clone)]
struct PendingGlobal {
    unit: UnitId,
    ty: Option<Arc<ast::TypeExpr>>,
    value: Arc<ast::Expr>,
    typed: bool,
    /// A session binding may hold a value only known at run time.
    runtime_init: bool,
}

/// Checks units into a growing [`Program`].
pub struct Checker {
    program: Program,
    scopes: Vec<ModuleScope>,
    unit_ids: FxHashMap<String, UnitId>,
    diagnostics: Diagnostics,
    limits: Limits,
    functions: FxHashMap<DefId, PendingFunction>,
    globals: FxHashMap<DefId, PendingGlobal>,
    states: FxHashMap<DefId, BodyState>,
    field_symbols: FxHashMap<(DefId, usize), SymbolId>,
    variant_symbols: FxHashMap<(DefId, usize), SymbolId>,
    /// Bound checks postponed until a unit's impls are registered.
    deferred_bounds: Option<Vec<traits::DeferredBound>>,
}

impl Checker {
    pub fn new(limits: Limits) -> Self {
        Checker {
            program: Program::default(),
            scopes: Vec::new(),
            unit_ids: FxHashMap::default(),
            diagnostics: Diagnostics::new(),
            limits,
            functions: FxHashMap::default(),
            globals: FxHashMap::default(),
            states: FxHashMap::default(),
            field_symbols: FxHashMap::default(),
            variant_symbols: FxHashMap::default(),
            deferred_bounds: None,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn finish(self) -> (Program, Diagnostics) {
        (self.program, self.diagnostics)
    }

    pub fn unit_id(&self, name: &str) -> Option<UnitId> {
        self.unit_ids.get(name).copied()
    }

    pub fn scope(&self, unit: UnitId) -> Option<&ModuleScope> {
        self.scopes.get(unit.0 as usize)
    }

    /// Check one parsed unit. Units it imports must already be checked.
    pub fn check_unit(&mut self, name: &str, module: &ast::Module, is_stdlib: bool) -> UnitId {
        debug!(unit = name, items = module.items.len(), "checking unit");
        let unit = self.add_unit(name, module.file, is_stdlib);
        self.resolve_imports(unit, module.imports());
        self.check_items(unit, &module.items);
        unit
    }

    fn emit(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn error(&mut self, category: Category, code: &'static str, span: Span, message: impl Into<String>) {
        self.emit(Diagnostic::error(category, message, span).with_code(code));
    }

    fn report_eval(&mut self, failure: EvalFailure) {
        if failure.error != EvalError::Poisoned {
            self.emit(failure.into_diagnostic());
        }
    }

    /// Evaluate a checked expression, reporting failures.
    fn evaluate(&mut self, expr: &HirExpr, locals: usize) -> Option<ConstValue> {
        if self.program.types.contains_error(expr.ty) {
            return None;
        }
        let limits = self.limits;
        match const_eval::evaluate(self, expr, locals, limits) {
            Ok(value) => Some(value),
            Err(failure) => {
                self.report_eval(failure);
                None
            }
        }
    }

    /// Check the body of `def` unless that already happened or is under way.
    fn ensure_function(&mut self, def: DefId) {
        if self.states.get(&def) != Some(&BodyState::Pending) {
            return;
        }
        let Some(pending) = self.functions.get(&def).cloned() else {
            return;
        };
        let Some(function) = self.program.function(def).cloned() else {
            return;
        };
        trace!(function = %self.program.def(def).name, "checking body");
        self.states.insert(def, BodyState::InProgress);
        let ret = (!pending.infer_ret).then_some(function.ret);
        let body = BodyChecker::check_function(self, pending.unit, &function, &pending.decl, ret);
        let inferred = body.expr.ty;
        if let DefKind::Function(function) = &mut self.program.def_mut(def).kind {
            if pending.infer_ret {
                function.ret = inferred;
            }
            function.body = Some(Arc::new(body));
        }
        if pending.infer_ret {
            let detail = self.function_detail(def);
            if let Some(symbol) = self.program.symbols.symbol_for(def) {
                self.program.symbols.set_detail(symbol, detail);
            }
        }
        self.states.insert(def, BodyState::Done);
    }

    /// Make the signature of `def` final. An expression-bodied function
    /// without a return type gets it from its body.
    fn ensure_signature(&mut self, def: DefId, span: Span) {
        let Some(pending) = self.functions.get(&def) else {
            return;
        };
        if !pending.infer_ret {
            return;
        }
        if self.states.get(&def) == Some(&BodyState::InProgress) {
            let name = self.program.def(def).name.clone();
            self.emit(
                Diagnostic::error(
                    Category::Type,
                    format!("cannot infer the return type of `{name}` while checking its own body"),
                    span,
                )
                .with_code("E0303")
                .with_note("add an explicit return type"),
            );
            return;
        }
        self.ensure_function(def);
    }

    /// Check and evaluate the initializer of a `const` or `static`.
    fn ensure_global(&mut self, def: DefId) -> Result<ConstValue, EvalError> {
        match self.states.get(&def).copied() {
            Some(BodyState::Pending) => {}
            Some(BodyState::InProgress) => return Err(EvalError::Cycle(self.program.def(def).name.clone())),
            _ => {
                return self
                    .program
                    .global(def)
                    .and_then(|global| global.value.clone())
                    .ok_or(EvalError::Poisoned);
            }
        }
        let Some(pending) = self.globals.get(&def).cloned() else {
            return Err(EvalError::Poisoned);
        };
        self.states.insert(def, BodyState::InProgress);
        let ty = self.global_type(def);
        let errors_before = self.diagnostics.error_count();
        let expected = (ty != TypeId::ERROR).then_some(ty);
        let body = Arc::new(BodyChecker::check_initializer(self, pending.unit, &[], &pending.value, expected));
        let result = if self.diagnostics.error_count() > errors_before {
            Err(EvalFailure {
                error: EvalError::Poisoned,
                span: pending.value.span,
            })
        } else {
            let limits = self.limits;
            const_eval::evaluate(self, &body.expr, body.locals.len(), limits)
        };
        let value = match result {
            Ok(value) => Some(value),
            Err(failure) => {
                let deferred = pending.runtime_init
                    && matches!(
                        failure.error,
                        EvalError::NotConstant(_) | EvalError::NotComptime(_) | EvalError::Poisoned
                    );
                if !deferred {
                    self.report_eval(failure);
                }
                None
            }
        };
        let inferred = body.expr.ty;
        if let DefKind::Const(global) | DefKind::Static(global) = &mut self.program.def_mut(def).kind {
            if global.ty == TypeId::ERROR && pending.ty.is_none() {
                global.ty = inferred;
            }
            global.init = Some(body);
            global.value = value.clone();
        }
        let state = if value.is_some() {
            BodyState::Done
        } else {
            BodyState::Failed
        };
        self.states.insert(def, state);
        value.ok_or(EvalError::Poisoned)
    }

    /// Check an anonymous body of statements and an optional tail in
    /// `unit`, for interactive sessions.
    pub(crate) fn check_snippet(&mut self, unit: UnitId, stmts: &[ast::Stmt], tail: Option<&ast::Expr>, span: Span) -> Body {
        let block = ast::Block {
            id: ast::NodeId(0),
            stmts: stmts.to_vec(),
            tail: tail.map(|tail| Box::new(tail.clone())),
            span,
        };
        BodyChecker::check_snippet(self, unit, &block)
    }

    /// Evaluate a snippet body without reporting anything.
    pub(crate) fn run_snippet(&mut self, body: &Body) -> Result<ConstValue, EvalFailure> {
        let limits = self.limits;
        const_eval::evaluate(self, &body.expr, body.locals.len(), limits)
    }

    /// Declare a session binding as a `static` of `unit`. A later binding
    /// with the same name shadows the earlier one.
    pub(crate) fn declare_binding(
        &mut self,
        unit: UnitId,
        name: &ast::Ident,
        mutable: bool,
        ty: Option<&ast::TypeExpr>,
        init: &ast::Expr,
    ) -> DefId {
        let def = self.program.add_def(crate::hir::Def {
            name: name.name.clone(),
            unit,
            span: name.span,
            kind: DefKind::Static(crate::hir::GlobalDef {
                ty: TypeId::ERROR,
                mutable,
                init: None,
                value: None,
            }),
        });
        self.scopes[unit.0 as usize].rebind(&name.name, def);
        self.define_item_symbol(def, name);
        self.globals.insert(
            def,
            PendingGlobal {
                unit,
                ty: ty.map(|ty| Arc::new(ty.clone())),
                value: Arc::new(init.clone()),
                typed: false,
                runtime_init: true,
            },
        );
        self.states.insert(def, BodyState::Pending);
        let _ = self.ensure_global(def);
        let ty = self.global_type(def);
        let detail = self.program.types.display(ty);
        if let Some(symbol) = self.program.symbols.symbol_for(def) {
            self.program.symbols.set_detail(symbol, detail);
        }
        def
    }
}

impl ConstContext for Checker {
    fn program(&self) -> &Program {
        &self.program
    }

    fn function_body(&mut self, def: DefId) -> Option<Arc<Body>> {
        self.ensure_function(def);
        self.program.function(def).and_then(|function| function.body.clone())
    }

    fn global_value(&mut self, def: DefId) -> Result<ConstValue, EvalError> {
        self.ensure_global(def)
    }
}

/// Check a list of units in the given order.
pub fn check_modules<'a>(
    units: impl IntoIterator<Item = (&'a str, &'a ast::Module)>,
    limits: Limits,
) -> (Program, Diagnostics) {
    let mut checker = Checker::new(limits);
    for (name, module) in units {
        checker.check_unit(name, module, false);
    }
    checker.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::HirExprKind;
    use crate::parser::{DEFAULT_MAX_DEPTH, parse_unit};
    use crate::span::FileId;

    fn check(source: &str) -> (Program, Diagnostics) {
        let parsed = parse_unit(FileId(0), source, DEFAULT_MAX_DEPTH);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        check_modules([("main", &parsed.module)], Limits::default())
    }

    fn codes(diagnostics: &Diagnostics) -> Vec<&'static str> {
        diagnostics.iter().filter_map(|d| d.code).collect()
    }

    fn def_named(program: &Program, name: &str) -> DefId {
        let index = program
            .defs
            .iter()
            .position(|def| def.name == name)
            .expect("declaration exists");
        DefId(index as u32)
    }

    #[test]
    fn accepts_a_simple_program() {
        let (_, diagnostics) = check(
            "function add(a: i32, b: i32) -> i32 { a + b }\n\
             function main() { let x = add(1, 2); println(\"{}\", x); }",
        );
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn reports_unresolved_names() {
        let (_, diagnostics) = check("function main() { missing(1); }");
        assert_eq!(codes(&diagnostics), ["E0201"]);
        let first = diagnostics.iter().next().expect("one diagnostic");
        assert_eq!(first.category, Category::NameResolution);
    }

    #[test]
    fn reports_mismatched_types() {
        let (_, diagnostics) = check("function main() { let x: i32 = \"text\"; }");
        assert_eq!(codes(&diagnostics), ["E0301"]);
    }

    #[test]
    fn integer_literals_adopt_the_expected_type() {
        let (program, diagnostics) = check("const SMALL: u8 = 200;");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let global = program.global(def_named(&program, "SMALL")).expect("global");
        assert_eq!(global.value.as_ref().and_then(ConstValue::as_int), Some(200));
    }

    #[test]
    fn out_of_range_literals_are_rejected() {
        let (_, diagnostics) = check("const SMALL: u8 = 300;");
        assert_eq!(codes(&diagnostics), ["E0302"]);
    }

    #[test]
    fn constants_may_refer_to_later_constants() {
        let (program, diagnostics) = check("const A: i64 = B * 2;\nconst B: i64 = 21;");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let global = program.global(def_named(&program, "A")).expect("global");
        assert_eq!(global.value.as_ref().and_then(ConstValue::as_int), Some(42));
    }

    #[test]
    fn constant_cycles_are_reported_once() {
        let (_, diagnostics) = check("const A: i64 = B + 1;\nconst B: i64 = A + 1;");
        assert_eq!(codes(&diagnostics), ["E0606"]);
    }

    #[test]
    fn array_lengths_are_evaluated() {
        let (program, diagnostics) = check(
            "comptime function square(n: usize) -> usize { n * n }\n\
             static GRID: [i32; square(3)] = [0; 9];",
        );
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let global = program.global(def_named(&program, "GRID")).expect("global");
        assert_eq!(program.types.display(global.ty), "[i32; 9]");
    }

    #[test]
    fn division_by_zero_in_an_array_length() {
        let (_, diagnostics) = check("static DATA: [i32; 10 / 0] = [];");
        let first = diagnostics.iter().next().expect("a diagnostic");
        assert_eq!(first.category, Category::ConstEval);
        assert_eq!(first.code, Some("E0601"));
    }

    #[test]
    fn calling_a_runtime_function_at_compile_time_fails() {
        let (_, diagnostics) = check("function five() -> i64 { 5 }\nconst X: i64 = five();");
        assert_eq!(codes(&diagnostics), ["E0603"]);
    }

    #[test]
    fn expression_bodies_infer_the_return_type() {
        let (program, diagnostics) = check(
            "function twice(x: i32) => x * 2;\n\
             function main() { let y: i32 = twice(4); }",
        );
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let function = program.function(def_named(&program, "twice")).expect("function");
        assert_eq!(function.ret, TypeId::I32);
    }

    #[test]
    fn failing_assertions_are_const_eval_errors() {
        let (_, diagnostics) = check("comptime assert(1 + 1 == 3, \"arithmetic\");");
        let first = diagnostics.iter().next().expect("a diagnostic");
        assert_eq!(first.code, Some("E0604"));
        assert!(first.message.contains("arithmetic"));
    }

    #[test]
    fn bodies_are_stored_on_functions() {
        let (program, _) = check("function one() -> i64 { 1 }");
        let function = program.function(def_named(&program, "one")).expect("function");
        let body = function.body.as_ref().expect("checked body");
        let HirExprKind::Block(block) = &body.expr.kind else {
            panic!("block body expected");
        };
        assert!(matches!(block.tail.as_deref().map(|t| &t.kind), Some(HirExprKind::Int(1))));
    }
}
