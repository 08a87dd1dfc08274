//! Trait conformance of impl blocks and satisfaction of generic bounds.

use crate::ast::Receiver;
use crate::diagnostic::{Category, Diagnostic};
use crate::hir::{DefKind, GenericDef};
use crate::span::Span;
use crate::types::{DefId, Subst, TypeId, TypeKind};

use super::Checker;
use super::items::plural;

/// A bound check on `owner`'s generic parameter `index`, held back until
/// the impls of the unit being collected are known.
#[derive(Debug, Clone)]
pub(super) struct DeferredBound {
    scope: Vec<GenericDef>,
    owner: DefId,
    index: usize,
    ty: TypeId,
    span: Span,
}

fn signature_text(receiver: Option<Receiver>, params: &[String], ret: &str) -> String {
    let mut parts = Vec::with_capacity(params.len() + 1);
    match receiver {
        Some(Receiver::View) => parts.push("this".to_string()),
        Some(Receiver::Mutable) => parts.push("mut this".to_string()),
        None => {}
    }
    parts.extend(params.iter().cloned());
    format!("function({}) -> {ret}", parts.join(", "))
}

impl Checker {
    /// Whether `ty` satisfies `trait_def`. Type parameters satisfy the
    /// bounds declared for them in `scope`.
    pub(super) fn satisfies(&self, scope: &[GenericDef], ty: TypeId, trait_def: DefId) -> bool {
        let types = &self.program.types;
        let ty = types.strip_refs(ty);
        if types.contains_error(ty) {
            return true;
        }
        if let TypeKind::Param { id, .. } = types.kind(ty) {
            return scope
                .iter()
                .any(|generic| generic.id == *id && generic.bounds.contains(&trait_def));
        }
        self.program.implements(ty, trait_def)
    }

    fn generics_of(&self, owner: DefId) -> &[GenericDef] {
        match &self.program.def(owner).kind {
            DefKind::Struct(decl) => &decl.generics,
            DefKind::Enum(decl) => &decl.generics,
            DefKind::Function(function) => &function.generics,
            _ => &[],
        }
    }

    /// Check `ty` as the argument for generic parameter `index` of `owner`.
    pub(super) fn check_bounds_at(&mut self, scope: &[GenericDef], owner: DefId, index: usize, ty: TypeId, span: Span) {
        if let Some(deferred) = &mut self.deferred_bounds {
            deferred.push(DeferredBound {
                scope: scope.to_vec(),
                owner,
                index,
                ty,
                span,
            });
            return;
        }
        let Some(param) = self.generics_of(owner).get(index).cloned() else {
            return;
        };
        for bound in param.bounds {
            if self.satisfies(scope, ty, bound) {
                continue;
            }
            let message = format!(
                "the trait `{}` is not implemented for `{}`",
                self.program.def(bound).name,
                self.program.types.display(ty)
            );
            let note = format!(
                "required by the bound on `{}` of `{}`",
                param.name,
                self.program.def(owner).name
            );
            self.emit(
                Diagnostic::error(Category::Type, message, span)
                    .with_code("E0340")
                    .with_note(note),
            );
        }
    }

    pub(super) fn flush_deferred_bounds(&mut self) {
        let Some(deferred) = self.deferred_bounds.take() else {
            return;
        };
        for check in deferred {
            self.check_bounds_at(&check.scope, check.owner, check.index, check.ty, check.span);
        }
    }

    /// An associated function of a struct or enum, preferring inherent
    /// impls. Returns the method and the index of its impl.
    pub(super) fn find_associated(&self, owner: DefId, name: &str) -> Option<(DefId, usize)> {
        let mut trait_match = None;
        for (index, imp) in self.program.impls.iter().enumerate() {
            let TypeKind::Adt { def, .. } = self.program.types.kind(imp.target) else {
                continue;
            };
            if *def != owner {
                continue;
            }
            let Some(method) = imp.methods.iter().copied().find(|m| self.program.def(*m).name == name) else {
                continue;
            };
            if imp.trait_def.is_none() {
                return Some((method, index));
            }
            trait_match.get_or_insert((method, index));
        }
        trait_match
    }

    fn overlaps(&self, a: TypeId, b: TypeId) -> bool {
        let types = &self.program.types;
        types.match_types(a, b, &mut Subst::default()) || types.match_types(b, a, &mut Subst::default())
    }

    /// Check the trait impls registered since `first_impl`.
    pub(super) fn check_conformance(&mut self, first_impl: usize) {
        for index in first_impl..self.program.impls.len() {
            let imp = self.program.impls[index].clone();
            let Some(trait_def) = imp.trait_def else {
                continue;
            };
            let trait_name = self.program.def(trait_def).name.clone();
            let target = self.program.types.display(imp.target);

            let conflict = self.program.impls[..index]
                .iter()
                .find(|other| other.trait_def == Some(trait_def) && self.overlaps(other.target, imp.target))
                .map(|other| other.span);
            if let Some(previous) = conflict {
                self.emit(
                    Diagnostic::error(
                        Category::Type,
                        format!("conflicting implementations of trait `{trait_name}` for `{target}`"),
                        imp.span,
                    )
                    .with_code("E0344")
                    .with_related(previous, "first implementation here"),
                );
            }

            let Some(decl) = self.program.trait_def(trait_def).cloned() else {
                continue;
            };
            let mut missing = Vec::new();
            for required in &decl.methods {
                let found = imp
                    .methods
                    .iter()
                    .copied()
                    .find(|method| self.program.def(*method).name == required.name);
                let Some(method) = found else {
                    missing.push(format!("`{}`", required.name));
                    continue;
                };
                let method_span = self.program.def(method).span;
                self.ensure_signature(method, method_span);
                let Some(function) = self.program.function(method).cloned() else {
                    continue;
                };
                let types = &self.program.types;
                if types.contains_error(function.ret) || function.param_types.iter().any(|ty| types.contains_error(*ty)) {
                    continue;
                }
                let conforms = function.receiver == required.receiver
                    && function.param_types == required.params
                    && function.ret == required.ret;
                if conforms {
                    continue;
                }
                let show = |tys: &[TypeId]| tys.iter().map(|ty| types.display(*ty)).collect::<Vec<_>>();
                let expected = signature_text(required.receiver, &show(&required.params), &types.display(required.ret));
                let found = signature_text(function.receiver, &show(&function.param_types), &types.display(function.ret));
                self.emit(
                    Diagnostic::error(
                        Category::Type,
                        format!(
                            "method `{}` does not match its declaration in trait `{trait_name}`: expected `{expected}`, found `{found}`",
                            required.name
                        ),
                        method_span,
                    )
                    .with_code("E0342")
                    .with_related(required.span, "declared here"),
                );
            }
            if !missing.is_empty() {
                self.error(
                    Category::Type,
                    "E0341",
                    imp.span,
                    format!(
                        "missing method{} {} required by trait `{trait_name}` for `{target}`",
                        plural(missing.len()),
                        missing.join(", ")
                    ),
                );
            }
            for method in &imp.methods {
                let def = self.program.def(*method);
                if decl.methods.iter().any(|required| required.name == def.name) {
                    continue;
                }
                let (name, span) = (def.name.clone(), def.span);
                self.error(
                    Category::Type,
                    "E0343",
                    span,
                    format!("method `{name}` is not a member of trait `{trait_name}`"),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::const_eval::Limits;
    use crate::parser::{DEFAULT_MAX_DEPTH, parse_unit};
    use crate::span::FileId;
    use crate::typecheck::check_modules;

    fn codes(source: &str) -> Vec<&'static str> {
        let parsed = parse_unit(FileId(0), source, DEFAULT_MAX_DEPTH);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        let (_, diagnostics) = check_modules([("main", &parsed.module)], Limits::default());
        diagnostics.iter().filter_map(|d| d.code).collect()
    }

    const SHOW: &str = "trait Show { function show(this) -> String; }\nstruct P { x: i64 }\n";

    #[test]
    fn complete_impls_conform() {
        assert!(codes(&format!("{SHOW}impl Show for P {{ function show(this) -> String {{ \"p\" }} }}")).is_empty());
    }

    #[test]
    fn missing_methods_are_reported() {
        assert_eq!(codes(&format!("{SHOW}impl Show for P {{ }}")), ["E0341"]);
    }

    #[test]
    fn signatures_must_match() {
        assert_eq!(
            codes(&format!("{SHOW}impl Show for P {{ function show(this) -> i64 {{ 1 }} }}")),
            ["E0342"]
        );
    }

    #[test]
    fn extra_methods_are_rejected() {
        assert_eq!(
            codes(&format!(
                "{SHOW}impl Show for P {{ function show(this) -> String {{ \"p\" }} function other(this) {{ }} }}"
            )),
            ["E0343"]
        );
    }

    #[test]
    fn overlapping_impls_conflict() {
        let body = "{ function show(this) -> String { \"p\" } }";
        assert_eq!(
            codes(&format!("{SHOW}impl Show for P {body}\nimpl Show for P {body}")),
            ["E0344"]
        );
    }

    #[test]
    fn type_arguments_are_checked_after_impls_are_known() {
        let source = format!(
            "{SHOW}struct Shown<T: Show> {{ value: T }}\n\
             function wrap(s: Shown<P>) {{ }}\n\
             impl Show for P {{ function show(this) -> String {{ \"p\" }} }}"
        );
        assert!(codes(&source).is_empty());
        assert_eq!(codes(&source.replace("Shown<P>", "Shown<i64>")), ["E0340"]);
    }
}
