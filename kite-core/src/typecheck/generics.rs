//! Calls to generic functions, constructors and variants.
//!
//! Explicit turbofish arguments bind first, then the expected result type,
//! then each argument in order. An argument whose parameter type is fully
//! bound is checked against it like any other expression; otherwise its
//! synthesized type is matched structurally to bind the remaining
//! parameters.

use crate::ast;
use crate::diagnostic::{Category, Diagnostic};
use crate::hir::{Callee, GenericDef, HirExpr, HirExprKind};
use crate::span::Span;
use crate::types::{DefId, ParamId, Subst, TypeId, TypeKind};

use super::expr::BodyChecker;
use super::items::plural;

impl BodyChecker<'_> {
    /// Bind turbofish arguments to `own`, the parameters the call site may
    /// name.
    pub(super) fn bind_explicit(
        &mut self,
        name: &str,
        own: &[GenericDef],
        explicit: &[ast::TypeExpr],
        subst: &mut Subst,
        span: Span,
    ) {
        if explicit.is_empty() {
            return;
        }
        if explicit.len() != own.len() {
            self.error(
                Category::GenericBinding,
                "E0401",
                span,
                format!(
                    "`{name}` takes {} generic argument{} but {} were supplied",
                    own.len(),
                    plural(own.len()),
                    explicit.len()
                ),
            );
            return;
        }
        for (generic, arg) in own.iter().zip(explicit) {
            let ty = self.cx.resolve_generic_arg(self.unit, &self.generics, arg, generic);
            subst.insert(generic.id, ty);
        }
    }

    /// Let the expected type bind what the result type mentions, when the
    /// two agree.
    fn bind_expected(&mut self, result: TypeId, pending: &[ParamId], expected: Option<TypeId>, subst: &mut Subst) {
        let Some(expected) = expected else {
            return;
        };
        let types = &mut self.cx.program.types;
        let result = types.subst(result, subst);
        let unbound: Vec<ParamId> = pending.iter().filter(|id| !subst.contains_key(*id)).copied().collect();
        if unbound.is_empty() || !types.mentions_params(result, &unbound) {
            return;
        }
        let mut trial = subst.clone();
        if types.match_types(result, expected, &mut trial) {
            *subst = trial;
            return;
        }
        // `let x: Box<i64>? = Box::new(1)`
        if let Some(inner) = types.optional_inner(expected) {
            let mut trial = subst.clone();
            if types.match_types(result, inner, &mut trial) {
                *subst = trial;
            }
        }
    }

    /// Check one argument against its declared type, binding parameters
    /// of the callee along the way.
    fn check_arg(&mut self, value: &ast::Expr, declared: TypeId, pending: &[ParamId], subst: &mut Subst) -> HirExpr {
        let pattern = self.cx.program.types.subst(declared, subst);
        let unbound: Vec<ParamId> = pending.iter().filter(|id| !subst.contains_key(*id)).copied().collect();
        let determined = !self.cx.program.types.mentions_params(pattern, &unbound);
        let mut hir = self.synth(value, determined.then_some(pattern));
        if !determined {
            self.widen_literal_to_vector(pattern, &mut hir);
        }
        let fits = if determined {
            self.cx.program.types.can_coerce(hir.ty, pattern)
        } else if self.cx.program.types.is_absorbing(hir.ty) {
            true
        } else {
            self.cx.program.types.match_types(pattern, hir.ty, subst)
        };
        if !fits {
            let shown = self.cx.program.types.subst(pattern, subst);
            self.mismatch(shown, hir.ty, value.span);
        }
        if !determined && (!fits || self.cx.program.types.is_absorbing(hir.ty)) {
            // the argument is reported; keep quiet about what it would
            // have bound
            for id in unbound {
                if !subst.contains_key(&id) && self.cx.program.types.mentions_params(pattern, &[id]) {
                    subst.insert(id, TypeId::ERROR);
                }
            }
        }
        self.consume(&hir);
        hir
    }

    /// `[a, b]` written for a `[T]` parameter is a vector literal; only
    /// the callee's parameter types could have told the literal so.
    fn widen_literal_to_vector(&mut self, pattern: TypeId, hir: &mut HirExpr) {
        if !matches!(hir.kind, HirExprKind::Sequence(_) | HirExprKind::Fill { .. }) {
            return;
        }
        let types = &mut self.cx.program.types;
        if !matches!(types.kind(pattern), TypeKind::Vector(_)) {
            return;
        }
        if let TypeKind::Array { elem, .. } = types.kind(hir.ty) {
            let elem = *elem;
            hir.ty = types.vector(elem);
        }
    }

    /// Arguments for every generic, reporting those nothing determined.
    pub(super) fn generic_args(
        &mut self,
        name: &str,
        generics: &[GenericDef],
        subst: &Subst,
        span: Span,
    ) -> Option<Vec<TypeId>> {
        let missing: Vec<&str> = generics
            .iter()
            .filter(|generic| !subst.contains_key(&generic.id))
            .map(|generic| generic.name.as_str())
            .collect();
        if !missing.is_empty() {
            let list = missing.iter().map(|name| format!("`{name}`")).collect::<Vec<_>>().join(", ");
            self.cx.emit(
                Diagnostic::error(
                    Category::GenericBinding,
                    format!("cannot infer generic parameter{} {list} of `{name}`", plural(missing.len())),
                    span,
                )
                .with_code("E0402")
                .with_note(format!("specify {} with a turbofish: `{name}::<..>`", if missing.len() == 1 { "it" } else { "them" })),
            );
            return None;
        }
        Some(generics.iter().map(|generic| subst[&generic.id]).collect())
    }

    /// Check that every argument satisfies its parameter's bounds.
    pub(super) fn check_bounds(&mut self, generics: &[GenericDef], args: &[TypeId], span: Span) {
        for (generic, ty) in generics.iter().zip(args) {
            for bound in &generic.bounds {
                if !self.cx.satisfies(&self.generics, *ty, *bound) {
                    let message = format!(
                        "the trait `{}` is not implemented for `{}`",
                        self.cx.program.def(*bound).name,
                        self.show(*ty)
                    );
                    self.error(Category::Type, "E0340", span, message);
                }
            }
        }
    }

    fn check_labels(&mut self, names: &[String], args: &[ast::Arg]) {
        for (name, arg) in names.iter().zip(args) {
            if let Some(label) = &arg.label {
                if &label.name != name {
                    self.error(
                        Category::Type,
                        "E0308",
                        label.span,
                        format!("argument label `{}` does not match parameter `{name}`", label.name),
                    );
                }
            }
        }
    }

    /// A call of a free function, static method or method. `subst` holds
    /// the bindings of the owning impl's parameters already known.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn check_call_to(
        &mut self,
        def: DefId,
        mut subst: Subst,
        explicit: &[ast::TypeExpr],
        receiver: Option<HirExpr>,
        args: &[ast::Arg],
        expected: Option<TypeId>,
        span: Span,
    ) -> HirExpr {
        self.cx.ensure_signature(def, span);
        let Some(function) = self.cx.program.function(def).cloned() else {
            self.check_args_for_errors(args);
            return HirExpr::error(span);
        };
        let name = self.cx.program.def(def).name.clone();
        let owned = self.owner_generic_count(&function);
        self.bind_explicit(&name, &function.generics[owned..], explicit, &mut subst, span);
        if args.len() != function.param_types.len() {
            self.error(
                Category::Type,
                "E0304",
                span,
                format!(
                    "`{name}` takes {} argument{} but {} {} supplied",
                    function.param_types.len(),
                    plural(function.param_types.len()),
                    args.len(),
                    if args.len() == 1 { "was" } else { "were" }
                ),
            );
            self.check_args_for_errors(args);
            return HirExpr::error(span);
        }
        self.check_labels(&function.param_names, args);
        let pending: Vec<ParamId> = function.generics.iter().map(|generic| generic.id).collect();
        self.bind_expected(function.ret, &pending, expected, &mut subst);
        let mut values = Vec::with_capacity(args.len() + 1);
        values.extend(receiver);
        for (arg, declared) in args.iter().zip(&function.param_types) {
            let value = self.check_arg(&arg.value, *declared, &pending, &mut subst);
            values.push(value);
        }
        let Some(generic_args) = self.generic_args(&name, &function.generics, &subst, span) else {
            return HirExpr::error(span);
        };
        self.check_bounds(&function.generics, &generic_args, span);
        let ret = self.cx.program.types.subst(function.ret, &subst);
        HirExpr::new(
            HirExprKind::Call {
                callee: Callee::Function { def, generic_args },
                args: values,
            },
            ret,
            span,
        )
    }

    /// `Point(x: 1, y: 2)` or `Point(1, 2)`.
    pub(super) fn check_constructor(
        &mut self,
        def: DefId,
        explicit: &[ast::TypeExpr],
        args: &[ast::Arg],
        expected: Option<TypeId>,
        span: Span,
    ) -> HirExpr {
        let Some(decl) = self.cx.program.struct_def(def).cloned() else {
            self.check_args_for_errors(args);
            return HirExpr::error(span);
        };
        let name = self.cx.program.def(def).name.clone();
        let mut subst = Subst::default();
        self.bind_explicit(&name, &decl.generics, explicit, &mut subst, span);
        let pending: Vec<ParamId> = decl.generics.iter().map(|generic| generic.id).collect();
        self.bind_expected(decl.self_ty, &pending, expected, &mut subst);

        let labelled = args.iter().filter(|arg| arg.label.is_some()).count();
        let mut slots: Vec<Option<&ast::Arg>> = vec![None; decl.fields.len()];
        if labelled == 0 {
            if args.len() != decl.fields.len() {
                self.error(
                    Category::Type,
                    "E0304",
                    span,
                    format!(
                        "`{name}` has {} field{} but {} argument{} {} supplied",
                        decl.fields.len(),
                        plural(decl.fields.len()),
                        args.len(),
                        plural(args.len()),
                        if args.len() == 1 { "was" } else { "were" }
                    ),
                );
                self.check_args_for_errors(args);
                return HirExpr::error(span);
            }
            for (slot, arg) in slots.iter_mut().zip(args) {
                *slot = Some(arg);
            }
        } else if labelled != args.len() {
            self.error(
                Category::Type,
                "E0308",
                span,
                "constructor arguments must be either all labelled or all positional",
            );
            self.check_args_for_errors(args);
            return HirExpr::error(span);
        } else {
            for arg in args {
                let Some(label) = &arg.label else {
                    continue;
                };
                match decl.field_index(&label.name) {
                    None => {
                        self.error(
                            Category::Type,
                            "E0308",
                            label.span,
                            format!("`{name}` has no field named `{}`", label.name),
                        );
                        self.synth(&arg.value, None);
                    }
                    Some(index) if slots[index].is_some() => {
                        self.error(
                            Category::Type,
                            "E0308",
                            label.span,
                            format!("field `{}` is specified more than once", label.name),
                        );
                        self.synth(&arg.value, None);
                    }
                    Some(index) => {
                        slots[index] = Some(arg);
                        if let Some(symbol) = self.cx.field_symbols.get(&(def, index)).copied() {
                            self.cx.program.symbols.reference(label.span, symbol);
                        }
                    }
                }
            }
            let missing: Vec<String> = decl
                .fields
                .iter()
                .zip(&slots)
                .filter(|(_, slot)| slot.is_none())
                .map(|(field, _)| format!("`{}`", field.name))
                .collect();
            if !missing.is_empty() {
                self.error(
                    Category::Type,
                    "E0308",
                    span,
                    format!(
                        "missing field{} {} in constructor of `{name}`",
                        plural(missing.len()),
                        missing.join(", ")
                    ),
                );
            }
        }

        let mut values = Vec::with_capacity(slots.len());
        for (field, slot) in decl.fields.iter().zip(&slots) {
            match slot {
                Some(arg) => values.push(self.check_arg(&arg.value, field.ty, &pending, &mut subst)),
                None => values.push(HirExpr::error(span)),
            }
        }
        let Some(type_args) = self.generic_args(&name, &decl.generics, &subst, span) else {
            return HirExpr::error(span);
        };
        self.check_bounds(&decl.generics, &type_args, span);
        let ty = self.cx.program.types.adt(def, &name, type_args);
        HirExpr::new(
            HirExprKind::Call {
                callee: Callee::Constructor { def },
                args: values,
            },
            ty,
            span,
        )
    }

    /// `Shape::Circle(1.0)`, or a payload-free `Color::Red` when `args` is
    /// `None`.
    pub(super) fn check_variant(
        &mut self,
        def: DefId,
        index: usize,
        explicit: &[ast::TypeExpr],
        args: Option<&[ast::Arg]>,
        expected: Option<TypeId>,
        span: Span,
    ) -> HirExpr {
        let Some(decl) = self.cx.program.enum_def(def).cloned() else {
            return HirExpr::error(span);
        };
        let enum_name = self.cx.program.def(def).name.clone();
        let variant = &decl.variants[index];
        let mut subst = Subst::default();
        self.bind_explicit(&enum_name, &decl.generics, explicit, &mut subst, span);
        let pending: Vec<ParamId> = decl.generics.iter().map(|generic| generic.id).collect();
        self.bind_expected(decl.self_ty, &pending, expected, &mut subst);
        let supplied = args.unwrap_or(&[]);
        if supplied.len() != variant.payload.len() {
            let message = match args {
                None => format!(
                    "variant `{enum_name}::{}` carries {} value{}; construct it with `{enum_name}::{}(..)`",
                    variant.name,
                    variant.payload.len(),
                    plural(variant.payload.len()),
                    variant.name
                ),
                Some(_) => format!(
                    "variant `{enum_name}::{}` takes {} value{} but {} {} supplied",
                    variant.name,
                    variant.payload.len(),
                    plural(variant.payload.len()),
                    supplied.len(),
                    if supplied.len() == 1 { "was" } else { "were" }
                ),
            };
            self.error(Category::Type, "E0304", span, message);
            self.check_args_for_errors(supplied);
            return HirExpr::error(span);
        }
        let mut values = Vec::with_capacity(supplied.len());
        for (arg, declared) in supplied.iter().zip(&variant.payload) {
            if let Some(label) = &arg.label {
                self.error(
                    Category::Type,
                    "E0308",
                    label.span,
                    "variant payloads are positional and take no labels",
                );
            }
            values.push(self.check_arg(&arg.value, *declared, &pending, &mut subst));
        }
        let Some(type_args) = self.generic_args(&enum_name, &decl.generics, &subst, span) else {
            return HirExpr::error(span);
        };
        self.check_bounds(&decl.generics, &type_args, span);
        let ty = self.cx.program.types.adt(def, &enum_name, type_args);
        HirExpr::new(
            HirExprKind::Call {
                callee: Callee::Variant { def, index },
                args: values,
            },
            ty,
            span,
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::const_eval::Limits;
    use crate::diagnostic::{Category, Diagnostics};
    use crate::hir::{Callee, HirExprKind, HirStmt, Program};
    use crate::parser::{DEFAULT_MAX_DEPTH, parse_unit};
    use crate::span::FileId;
    use crate::typecheck::check_modules;

    fn check(source: &str) -> (Program, Diagnostics) {
        let parsed = parse_unit(FileId(0), source, DEFAULT_MAX_DEPTH);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        check_modules([("main", &parsed.module)], Limits::default())
    }

    fn codes(source: &str) -> Vec<&'static str> {
        check(source).1.iter().filter_map(|d| d.code).collect()
    }

    const BOX: &str = "struct Box<T> { value: T }\n\
                       impl<T> Box<T> {\n\
                         function new(value: T) -> Box<T> { Box(value: value) }\n\
                         function get(this) -> T { this.value }\n\
                       }\n";

    #[test]
    fn arguments_bind_generic_parameters() {
        let (program, diagnostics) = check(&format!("{BOX}function main() {{ let b = Box::new(5); let v: i64 = b.get(); }}"));
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let main = program.defs.iter().position(|def| def.name == "main").unwrap();
        let body = program.function(crate::types::DefId(main as u32)).unwrap().body.clone().unwrap();
        let HirExprKind::Block(block) = &body.expr.kind else {
            panic!("expected a block body");
        };
        let HirStmt::Let { init, .. } = &block.stmts[0] else {
            panic!("expected a let");
        };
        assert_eq!(program.types.display(init.ty), "Box<i64>");
        assert!(matches!(&init.kind, HirExprKind::Call { callee: Callee::Function { generic_args, .. }, .. } if generic_args.len() == 1));
    }

    #[test]
    fn expected_types_bind_before_arguments() {
        assert!(codes(&format!("{BOX}function main() {{ let b: Box<u8> = Box::new(200); }}")).is_empty());
        assert_eq!(codes(&format!("{BOX}function main() {{ let b: Box<u8> = Box::new(300); }}")), ["E0302"]);
    }

    #[test]
    fn turbofish_binds_explicitly() {
        let source = "function zero<T>() -> T? { none }\nfunction main() { let z = zero::<i32>(); }";
        assert!(codes(source).is_empty());
        let (_, diagnostics) = check("function zero<T>() -> T? { none }\nfunction main() { let z = zero(); }");
        let inferred: Vec<_> = diagnostics.iter().collect();
        assert_eq!(inferred.len(), 1);
        assert_eq!(inferred[0].category, Category::GenericBinding);
        assert_eq!(inferred[0].code, Some("E0402"));
    }

    #[test]
    fn wrong_turbofish_count_is_a_binding_error() {
        assert_eq!(
            codes("function id<T>(x: T) -> T { x }\nfunction main() { let v = id::<i32, i32>(1); }"),
            ["E0401"]
        );
    }

    #[test]
    fn conflicting_bindings_are_mismatches() {
        assert_eq!(
            codes("function same<T>(a: T, b: T) -> T { a }\nfunction main() { let v = same(1, \"x\"); }"),
            ["E0301"]
        );
    }

    #[test]
    fn bounds_are_checked_at_calls() {
        let source = "trait Show { function show(this) -> String; }\n\
                      struct P { x: i64 }\n\
                      impl Show for P { function show(this) -> String { \"p\" } }\n\
                      function render<T: Show>(value: T) -> String { value.show() }\n\
                      function main() { let a = render(P(x: 1)); }";
        assert!(codes(source).is_empty());
        assert_eq!(codes(&source.replace("render(P(x: 1))", "render(5)")), ["E0340"]);
    }

    #[test]
    fn sequence_literals_bind_vector_parameters() {
        let source = "trait Area { function area(this) -> f64; }\n\
                      enum Shape { Circle(f64), Empty }\n\
                      impl Area for Shape { function area(this) -> f64 { 0.0 } }\n\
                      function total<T: Area>(items: [T]) -> usize { items.len() }\n\
                      function main() { let n = total([Shape::Circle(1.0), Shape::Empty]); }";
        let (program, diagnostics) = check(source);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let main = program.defs.iter().position(|def| def.name == "main").unwrap();
        let body = program.function(crate::types::DefId(main as u32)).unwrap().body.clone().unwrap();
        let HirExprKind::Block(block) = &body.expr.kind else {
            panic!("expected a block body");
        };
        let HirStmt::Let { init, .. } = &block.stmts[0] else {
            panic!("expected a let");
        };
        let HirExprKind::Call { args, .. } = &init.kind else {
            panic!("expected a call");
        };
        assert_eq!(program.types.display(args[0].ty), "[Shape]");

        let fixed = source.replace(
            "let n = total([Shape::Circle(1.0), Shape::Empty]);",
            "let fixed: [Shape; 1] = [Shape::Empty]; let n = total(fixed);",
        );
        assert_eq!(codes(&fixed), ["E0301"]);
    }

    #[test]
    fn generic_variants_infer_from_payloads_or_context() {
        let decl = "enum Maybe<T> { Just(T), Nothing }\n";
        assert!(codes(&format!("{decl}function main() {{ let a = Maybe::Just(1); let b: Maybe<i64> = Maybe::Nothing; }}")).is_empty());
        assert_eq!(codes(&format!("{decl}function main() {{ let b = Maybe::Nothing; }}")), ["E0402"]);
    }
}
