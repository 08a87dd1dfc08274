//! Generic instantiation.
//!
//! Starting from every non-generic function of the user units, the
//! collector walks checked bodies under the substitution of the instance
//! being visited and records each distinct `(declaration, type arguments)`
//! pair exactly once. Types are interned, so two spellings of `Box<i32>`
//! are the same key and produce a single instance. Every concrete struct,
//! class and enum type reachable from the instances is recorded as well.
//!
//! [`Mangler`] gives each instance its emitted name: `Box<i32>` becomes
//! `Box__i32`, `identity::<i64>` becomes `identity__i64`, and a method
//! `get` of `Box<i32>` becomes `Box__i32_get`. Declarations outside the
//! entry unit carry their unit name as a prefix.

use std::collections::BTreeSet;

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::hir::{Body, Callee, DefKind, HirBlock, HirExpr, HirExprKind, HirStmt, Program, UnitId};
use crate::types::{DefId, Subst, TypeId, TypeKind};

/// Identifiers that may not be used verbatim in the emitted C++.
const RESERVED: &[&str] = &[
    "alignas", "alignof", "and", "and_eq", "asm", "auto", "bitand", "bitor", "bool", "case", "catch", "char",
    "char8_t", "char16_t", "char32_t", "compl", "concept", "consteval", "constexpr", "constinit", "const_cast",
    "co_await", "co_return", "co_yield", "decltype", "default", "delete", "do", "double", "dynamic_cast",
    "explicit", "export", "float", "friend", "goto", "inline", "int", "long", "namespace", "new", "noexcept",
    "not", "not_eq", "nullptr", "operator", "or", "or_eq", "private", "protected", "public", "register",
    "reinterpret_cast", "requires", "short", "signed", "sizeof", "static_assert", "static_cast", "switch",
    "template", "thread_local", "throw", "try", "typedef", "typeid", "typename", "union", "unsigned", "using",
    "virtual", "void", "volatile", "wchar_t", "xor", "xor_eq", "main", "std", "self", "NULL", "EOF", "errno",
    "assert", "const", "enum", "struct", "class", "extern", "static", "this", "true", "false", "if", "else",
    "for", "while", "break", "continue", "return",
];

/// Make `name` safe to use as a C++ identifier.
pub fn escape_ident(name: &str) -> String {
    if RESERVED.contains(&name) || name.starts_with("kite_") {
        format!("{name}_")
    } else {
        name.to_string()
    }
}

/// Names emitted declarations and instances.
#[derive(Debug, Clone, Copy)]
pub struct Mangler {
    entry: UnitId,
}

impl Mangler {
    pub fn new(entry: UnitId) -> Self {
        Mangler { entry }
    }

    /// Name of a declaration without type arguments.
    pub fn base(&self, program: &Program, def: DefId) -> String {
        let decl = program.def(def);
        if decl.unit == self.entry {
            if decl.name == "main" && matches!(decl.kind, DefKind::Function(_)) {
                return "kite_main".to_string();
            }
            escape_ident(&decl.name)
        } else {
            format!("{}_{}", program.unit_name(decl.unit), decl.name)
        }
    }

    /// Name of a concrete struct, class or enum type.
    pub fn adt_name(&self, program: &Program, ty: TypeId) -> String {
        self.adt_name_with(program, ty, &Subst::default())
    }

    fn adt_name_with(&self, program: &Program, ty: TypeId, subst: &Subst) -> String {
        match program.types.kind(ty) {
            TypeKind::Adt { def, args, .. } => {
                let mut name = self.base(program, *def);
                for arg in args {
                    name.push_str("__");
                    name.push_str(&self.fragment(program, *arg, subst));
                }
                name
            }
            _ => self.fragment(program, ty, subst),
        }
    }

    /// Spelling of a type inside a mangled name. Compound arguments are
    /// closed with a trailing `_` so nested lists stay unambiguous.
    fn fragment(&self, program: &Program, ty: TypeId, subst: &Subst) -> String {
        let list = |items: &[TypeId]| {
            items
                .iter()
                .map(|item| self.fragment(program, *item, subst))
                .collect::<Vec<_>>()
                .join("_")
        };
        match program.types.kind(ty) {
            TypeKind::Param { id, name } => match subst.get(id) {
                Some(bound) if *bound != ty => self.fragment(program, *bound, subst),
                _ => name.clone(),
            },
            TypeKind::Adt { def, args, .. } if args.is_empty() => self.base(program, *def),
            TypeKind::Adt { def, args, .. } => format!("{}_{}_", self.base(program, *def), list(args)),
            TypeKind::Const(value) => value.to_string(),
            TypeKind::Vector(elem) => format!("vec_{}_", self.fragment(program, *elem, subst)),
            TypeKind::Array { elem, len } => format!(
                "arr_{}_{}_",
                self.fragment(program, *elem, subst),
                self.fragment(program, *len, subst)
            ),
            TypeKind::Optional(inner) => format!("opt_{}_", self.fragment(program, *inner, subst)),
            TypeKind::Tuple(items) => format!("tup_{}_", list(items)),
            TypeKind::Ref { mutable: false, inner } => format!("ref_{}_", self.fragment(program, *inner, subst)),
            TypeKind::Ref { mutable: true, inner } => format!("mut_{}_", self.fragment(program, *inner, subst)),
            TypeKind::Raw(inner) => format!("raw_{}_", self.fragment(program, *inner, subst)),
            TypeKind::Function { params, ret } => {
                format!("fn_{}_{}_", list(params), self.fragment(program, *ret, subst))
            }
            _ => program.types.display(ty),
        }
    }

    /// Emitted name of function `def` instantiated with `args`, which
    /// follow [`FunctionDef::generics`](crate::hir::FunctionDef::generics).
    pub fn function_name(&self, program: &Program, def: DefId, args: &[TypeId]) -> String {
        let Some(function) = program.function(def) else {
            return self.base(program, def);
        };
        if function.is_extern {
            return program.def(def).name.clone();
        }
        let mut own_start = 0;
        let mut name = match function.owner.and_then(|index| program.impls.get(index)) {
            Some(imp) => {
                own_start = imp.generics.len();
                let subst: Subst = imp.generics.iter().map(|generic| generic.id).zip(args.iter().copied()).collect();
                format!("{}_{}", self.adt_name_with(program, imp.target, &subst), program.def(def).name)
            }
            None => self.base(program, def),
        };
        for arg in args.iter().skip(own_start) {
            name.push_str("__");
            name.push_str(&self.fragment(program, *arg, &Subst::default()));
        }
        name
    }
}

/// Resolve a trait method called on a type parameter now that the
/// parameter is known to be `self_ty`.
pub fn resolve_trait_method(
    program: &Program,
    trait_def: DefId,
    method: &str,
    self_ty: TypeId,
) -> Option<(DefId, Vec<TypeId>)> {
    let self_ty = program.types.strip_refs(self_ty);
    for imp in &program.impls {
        if imp.trait_def != Some(trait_def) {
            continue;
        }
        if program.types.optional_inner(imp.target).is_some() && program.types.optional_inner(self_ty).is_none() {
            continue;
        }
        let mut subst = Subst::default();
        if !program.types.match_types(imp.target, self_ty, &mut subst) {
            continue;
        }
        let def = imp.methods.iter().copied().find(|m| program.def(*m).name == method)?;
        let function = program.function(def)?;
        let args = function
            .generics
            .iter()
            .map(|generic| subst.get(&generic.id).copied().unwrap_or(generic.ty))
            .collect();
        return Some((def, args));
    }
    None
}

/// One emitted function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub def: DefId,
    pub args: Vec<TypeId>,
    pub name: String,
}

impl Instance {
    pub fn subst(&self, program: &Program) -> Subst {
        program
            .function(self.def)
            .map(|function| function.generics.iter().map(|generic| generic.id).zip(self.args.iter().copied()).collect())
            .unwrap_or_default()
    }
}

/// Everything codegen emits, in a deterministic order.
#[derive(Debug, Clone, Default)]
pub struct Instances {
    /// Sorted by emitted name.
    pub functions: Vec<Instance>,
    /// Concrete struct, class and enum types, sorted by emitted name.
    pub types: Vec<TypeId>,
    pub externs: Vec<DefId>,
    pub globals: Vec<DefId>,
}

struct Collector<'p> {
    program: &'p mut Program,
    mangler: Mangler,
    seen: FxHashSet<(DefId, Vec<TypeId>)>,
    queue: Vec<(DefId, Vec<TypeId>)>,
    functions: Vec<Instance>,
    types: FxHashSet<TypeId>,
    externs: FxHashSet<DefId>,
    globals: FxHashSet<DefId>,
}

/// Collect every instance reachable from the non-generic functions and
/// globals of the non-stdlib units.
pub fn collect(program: &mut Program, entry: UnitId) -> Instances {
    let mut collector = Collector {
        program,
        mangler: Mangler::new(entry),
        seen: FxHashSet::default(),
        queue: Vec::new(),
        functions: Vec::new(),
        types: FxHashSet::default(),
        externs: FxHashSet::default(),
        globals: FxHashSet::default(),
    };
    for index in 0..collector.program.defs.len() {
        let def = DefId(index as u32);
        let decl = collector.program.def(def);
        let user_unit = collector
            .program
            .units
            .get(decl.unit.0 as usize)
            .is_some_and(|unit| !unit.is_stdlib);
        if !user_unit {
            continue;
        }
        let (root, global) = match &decl.kind {
            DefKind::Function(function) => (function.generics.is_empty() && !function.is_extern, false),
            DefKind::Const(_) | DefKind::Static(_) => (false, true),
            _ => (false, false),
        };
        if root {
            collector.request(def, Vec::new());
        } else if global {
            collector.global(def);
        }
    }
    while let Some((def, args)) = collector.queue.pop() {
        collector.visit(def, args);
    }

    let Collector {
        program,
        mangler,
        mut functions,
        types,
        externs,
        globals,
        ..
    } = collector;
    functions.sort_by(|a, b| a.name.cmp(&b.name));
    let mut types: Vec<(String, TypeId)> = types.into_iter().map(|ty| (mangler.adt_name(program, ty), ty)).collect();
    types.sort();
    let mut externs: Vec<DefId> = externs.into_iter().collect();
    externs.sort_by(|a, b| program.def(*a).name.cmp(&program.def(*b).name));
    let mut globals: Vec<(String, DefId)> = globals.into_iter().map(|def| (mangler.base(program, def), def)).collect();
    globals.sort();
    debug!(
        functions = functions.len(),
        types = types.len(),
        globals = globals.len(),
        "instances collected"
    );
    Instances {
        functions,
        types: types.into_iter().map(|(_, ty)| ty).collect(),
        externs,
        globals: globals.into_iter().map(|(_, def)| def).collect(),
    }
}

impl Collector<'_> {
    fn request(&mut self, def: DefId, args: Vec<TypeId>) {
        if self.program.function(def).is_some_and(|function| function.is_extern) {
            self.externs.insert(def);
            return;
        }
        if self.seen.insert((def, args.clone())) {
            self.queue.push((def, args));
        }
    }

    fn global(&mut self, def: DefId) {
        if !self.globals.insert(def) {
            return;
        }
        if let Some(ty) = self.program.global(def).map(|global| global.ty) {
            self.note_type(ty);
        }
    }

    fn visit(&mut self, def: DefId, args: Vec<TypeId>) {
        let Some(function) = self.program.function(def).cloned() else {
            return;
        };
        let name = self.mangler.function_name(self.program, def, &args);
        trace!(instance = %name, "instantiating");
        let subst: Subst = function.generics.iter().map(|generic| generic.id).zip(args.iter().copied()).collect();
        for ty in function.param_types.iter().chain([&function.ret]).chain(function.self_ty.as_ref()) {
            let ty = self.program.types.subst(*ty, &subst);
            self.note_type(ty);
        }
        if let Some(body) = &function.body {
            self.walk_body(body, &subst);
        }
        self.functions.push(Instance { def, args, name });
    }

    fn note_type(&mut self, ty: TypeId) {
        match self.program.types.kind(ty).clone() {
            TypeKind::Adt { def, args, .. } => {
                for arg in &args {
                    self.note_type(*arg);
                }
                if self.program.types.has_params(ty) || !self.types.insert(ty) {
                    return;
                }
                let (generics, members) = match &self.program.def(def).kind {
                    DefKind::Struct(decl) => (decl.generics.clone(), decl.fields.iter().map(|field| field.ty).collect()),
                    DefKind::Enum(decl) => (
                        decl.generics.clone(),
                        decl.variants.iter().flat_map(|variant| variant.payload.iter().copied()).collect(),
                    ),
                    _ => (Vec::new(), Vec::<TypeId>::new()),
                };
                let subst: Subst = generics.iter().map(|generic| generic.id).zip(args).collect();
                for member in members {
                    let member = self.program.types.subst(member, &subst);
                    self.note_type(member);
                }
            }
            TypeKind::Vector(inner) | TypeKind::Optional(inner) | TypeKind::Raw(inner) | TypeKind::Ref { inner, .. } => {
                self.note_type(inner)
            }
            TypeKind::Array { elem, .. } => self.note_type(elem),
            TypeKind::Tuple(items) => items.into_iter().for_each(|item| self.note_type(item)),
            TypeKind::Function { params, ret } => {
                params.into_iter().for_each(|param| self.note_type(param));
                self.note_type(ret);
            }
            _ => {}
        }
    }

    fn walk_body(&mut self, body: &Body, subst: &Subst) {
        for local in &body.locals {
            let ty = self.program.types.subst(local.ty, subst);
            self.note_type(ty);
        }
        self.walk_expr(&body.expr, subst);
    }

    fn concrete(&mut self, args: &[TypeId], subst: &Subst) -> Vec<TypeId> {
        args.iter().map(|arg| self.program.types.subst(*arg, subst)).collect()
    }

    fn walk_block(&mut self, block: &HirBlock, subst: &Subst) {
        for stmt in &block.stmts {
            self.walk_stmt(stmt, subst);
        }
        if let Some(tail) = &block.tail {
            self.walk_expr(tail, subst);
        }
    }

    fn walk_stmt(&mut self, stmt: &HirStmt, subst: &Subst) {
        match stmt {
            HirStmt::Let { init, .. } | HirStmt::Expr(init) => self.walk_expr(init, subst),
            HirStmt::While { cond, body } => {
                self.walk_expr(cond, subst);
                self.walk_block(body, subst);
            }
            HirStmt::Loop { body } => self.walk_block(body, subst),
            HirStmt::ForRange { start, end, body, .. } => {
                self.walk_expr(start, subst);
                self.walk_expr(end, subst);
                self.walk_block(body, subst);
            }
            HirStmt::ForEach { iterable, body, .. } => {
                self.walk_expr(iterable, subst);
                self.walk_block(body, subst);
            }
            HirStmt::Defer(inner) => self.walk_stmt(inner, subst),
        }
    }

    fn walk_expr(&mut self, expr: &HirExpr, subst: &Subst) {
        let ty = self.program.types.subst(expr.ty, subst);
        self.note_type(ty);
        match &expr.kind {
            HirExprKind::Global(def) => self.global(*def),
            HirExprKind::FunctionRef { def, generic_args } => {
                let args = self.concrete(generic_args, subst);
                self.request(*def, args);
            }
            HirExprKind::Call { callee, args } => {
                match callee {
                    Callee::Function { def, generic_args } => {
                        let concrete = self.concrete(generic_args, subst);
                        self.request(*def, concrete);
                    }
                    Callee::TraitMethod {
                        trait_def,
                        method,
                        self_ty,
                    } => {
                        let self_ty = self.program.types.subst(*self_ty, subst);
                        if let Some((def, concrete)) = resolve_trait_method(self.program, *trait_def, method, self_ty) {
                            self.request(def, concrete);
                        }
                    }
                    Callee::Indirect(function) => self.walk_expr(function, subst),
                    Callee::Builtin(_)
                    | Callee::BuiltinMethod(_)
                    | Callee::Constructor { .. }
                    | Callee::Variant { .. } => {}
                }
                for arg in args {
                    self.walk_expr(arg, subst);
                }
            }
            HirExprKind::Some(inner)
            | HirExprKind::Cast(inner)
            | HirExprKind::Unwrap(inner)
            | HirExprKind::Unary { operand: inner, .. } => self.walk_expr(inner, subst),
            HirExprKind::Return(value) => {
                if let Some(value) = value {
                    self.walk_expr(value, subst);
                }
            }
            HirExprKind::Binary { lhs, rhs, .. } => {
                self.walk_expr(lhs, subst);
                self.walk_expr(rhs, subst);
            }
            HirExprKind::Assign { target, value, .. } => {
                self.walk_expr(target, subst);
                self.walk_expr(value, subst);
            }
            HirExprKind::Range { start, end, .. } => {
                self.walk_expr(start, subst);
                self.walk_expr(end, subst);
            }
            HirExprKind::Field { base, .. } | HirExprKind::TupleIndex { base, .. } => self.walk_expr(base, subst),
            HirExprKind::Index { base, index } => {
                self.walk_expr(base, subst);
                self.walk_expr(index, subst);
            }
            HirExprKind::Slice { base, start, end, .. } => {
                self.walk_expr(base, subst);
                self.walk_expr(start, subst);
                self.walk_expr(end, subst);
            }
            HirExprKind::Tuple(items) | HirExprKind::Sequence(items) => {
                for item in items {
                    self.walk_expr(item, subst);
                }
            }
            HirExprKind::Fill { value, count } => {
                self.walk_expr(value, subst);
                self.walk_expr(count, subst);
            }
            HirExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.walk_expr(cond, subst);
                self.walk_expr(then_branch, subst);
                if let Some(else_branch) = else_branch {
                    self.walk_expr(else_branch, subst);
                }
            }
            HirExprKind::Match { scrutinee, arms } => {
                self.walk_expr(scrutinee, subst);
                for arm in arms {
                    self.walk_expr(&arm.body, subst);
                }
            }
            HirExprKind::Block(block) => self.walk_block(block, subst),
            HirExprKind::Int(_)
            | HirExprKind::Float(_)
            | HirExprKind::Bool(_)
            | HirExprKind::Char(_)
            | HirExprKind::Str(_)
            | HirExprKind::Void
            | HirExprKind::None
            | HirExprKind::Local(_)
            | HirExprKind::ConstParam(_)
            | HirExprKind::Break
            | HirExprKind::Continue
            | HirExprKind::Error => {}
        }
    }
}

/// Names of the collected instances, for logging and tests.
pub fn instance_names(instances: &Instances) -> BTreeSet<&str> {
    instances.functions.iter().map(|instance| instance.name.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::const_eval::Limits;
    use crate::parser::{DEFAULT_MAX_DEPTH, parse_unit};
    use crate::span::FileId;
    use crate::typecheck::check_modules;

    fn collect_source(source: &str) -> (Program, Instances) {
        let parsed = parse_unit(FileId(0), source, DEFAULT_MAX_DEPTH);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        let (mut program, diagnostics) = check_modules([("main", &parsed.module)], Limits::default());
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let instances = collect(&mut program, UnitId(0));
        (program, instances)
    }

    fn type_names(program: &Program, instances: &Instances) -> Vec<String> {
        let mangler = Mangler::new(UnitId(0));
        instances.types.iter().map(|ty| mangler.adt_name(program, *ty)).collect()
    }

    #[test]
    fn equal_instantiations_are_collected_once() {
        let (program, instances) = collect_source(
            "struct Box<T> { value: T }\n\
             function a() -> Box<i32> { Box(value: 1) }\n\
             function b() -> i32 { let x: Box<i32> = Box(value: 2); x.value }",
        );
        assert_eq!(type_names(&program, &instances), ["Box__i32"]);
    }

    #[test]
    fn generic_functions_are_instantiated_per_argument_list() {
        let (_, instances) = collect_source(
            "function identity<T>(x: T) -> T { x }\n\
             function main() { let a = identity(1); let b = identity(true); let c = identity(2); }",
        );
        let names = instance_names(&instances);
        assert!(names.contains("identity__i64"));
        assert!(names.contains("identity__bool"));
        assert!(names.contains("kite_main"));
        assert_eq!(instances.functions.len(), 3);
    }

    #[test]
    fn nested_arguments_are_closed() {
        let (program, instances) = collect_source(
            "struct Box<T> { value: T }\n\
             function main() { let inner: Box<i32> = Box(value: 1); let outer = Box(value: inner); }",
        );
        assert_eq!(type_names(&program, &instances), ["Box__Box_i32_", "Box__i32"]);
    }

    #[test]
    fn methods_are_named_after_their_receiver_type() {
        let (_, instances) = collect_source(
            "struct Box<T> { value: T }\n\
             impl<T> Box<T> { function get(this) -> T { this.value } }\n\
             function main() { let b: Box<i32> = Box(value: 1); let v = b.get(); }",
        );
        assert!(instance_names(&instances).contains("Box__i32_get"));
    }

    #[test]
    fn trait_calls_on_parameters_resolve_to_impls() {
        let (_, instances) = collect_source(
            "trait Show { function show(this) -> String; }\n\
             struct P { x: i64 }\n\
             impl Show for P { function show(this) -> String { \"p\" } }\n\
             function render<T: Show>(value: T) -> String { value.show() }\n\
             function main() { let s = render(P(x: 1)); }",
        );
        let names = instance_names(&instances);
        assert!(names.contains("render__P"));
        assert!(names.contains("P_show"));
    }

    #[test]
    fn reserved_words_are_escaped() {
        assert_eq!(escape_ident("new"), "new_");
        assert_eq!(escape_ident("kite_rt"), "kite_rt_");
        assert_eq!(escape_ident("point"), "point");
    }
}
