//! Copy classification, move tracking and place mutability.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::UnaryOp;
use crate::diagnostic::{Category, Diagnostic};
use crate::hir::{HirExpr, HirExprKind, LocalId, Program};
use crate::span::Span;
use crate::types::{Subst, TypeId, TypeKind};

use super::expr::BodyChecker;

/// Whether values of `ty` are copied rather than moved.
///
/// Primitives, views, raw pointers, function values and class handles are
/// copy. Aggregates are copy when all of their members are.
pub fn is_copy(program: &mut Program, ty: TypeId) -> bool {
    let mut visiting = FxHashSet::default();
    copy_inner(program, ty, &mut visiting)
}

fn copy_inner(program: &mut Program, ty: TypeId, visiting: &mut FxHashSet<TypeId>) -> bool {
    match program.types.kind(ty).clone() {
        TypeKind::Error
        | TypeKind::Void
        | TypeKind::Never
        | TypeKind::Bool
        | TypeKind::Char
        | TypeKind::Int(_)
        | TypeKind::Float(_)
        | TypeKind::Const(_)
        | TypeKind::Ref { .. }
        | TypeKind::Raw(_)
        | TypeKind::Function { .. } => true,
        TypeKind::String | TypeKind::Vector(_) | TypeKind::Param { .. } => false,
        TypeKind::Optional(inner) => copy_inner(program, inner, visiting),
        TypeKind::Array { elem, .. } => copy_inner(program, elem, visiting),
        TypeKind::Tuple(items) => items.into_iter().all(|item| copy_inner(program, item, visiting)),
        TypeKind::Adt { def, args, .. } => {
            // infinite types are reported by the containment check
            if !visiting.insert(ty) {
                return true;
            }
            let (generics, members) = if let Some(decl) = program.struct_def(def) {
                if decl.is_class {
                    return true;
                }
                let members: Vec<TypeId> = decl.fields.iter().map(|field| field.ty).collect();
                (decl.generics.clone(), members)
            } else if let Some(decl) = program.enum_def(def) {
                let members: Vec<TypeId> = decl.variants.iter().flat_map(|v| v.payload.iter().copied()).collect();
                (decl.generics.clone(), members)
            } else {
                return true;
            };
            let subst: Subst = generics.iter().map(|g| g.id).zip(args).collect();
            members.into_iter().all(|member| {
                let member = program.types.subst(member, &subst);
                copy_inner(program, member, visiting)
            })
        }
    }
}

/// Locals whose value has been moved out, with the span of the move.
#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct MoveState {
    moved: FxHashMap<LocalId, Span>,
}

impl MoveState {
    pub(super) fn mark(&mut self, local: LocalId, span: Span) {
        self.moved.insert(local, span);
    }

    pub(super) fn restore(&mut self, local: LocalId) {
        self.moved.remove(&local);
    }

    pub(super) fn moved_at(&self, local: LocalId) -> Option<Span> {
        self.moved.get(&local).copied()
    }

    /// Merge the state of another control-flow path; moved on any path
    /// means moved afterwards.
    pub(super) fn union(&mut self, other: MoveState) {
        for (local, span) in other.moved {
            self.moved.entry(local).or_insert(span);
        }
    }

    /// Locals moved now that were not moved in `before`, ordered by id.
    pub(super) fn moved_since(&self, before: &MoveState) -> Vec<(LocalId, Span)> {
        let mut fresh: Vec<_> = self
            .moved
            .iter()
            .filter(|(local, _)| !before.moved.contains_key(local))
            .map(|(local, span)| (*local, *span))
            .collect();
        fresh.sort_by_key(|(local, _)| *local);
        fresh
    }
}

pub(super) enum Place {
    Mutable,
    Immutable(String),
    NotAPlace,
}

impl BodyChecker<'_> {
    /// A value is used in a position that takes ownership of it.
    pub(super) fn consume(&mut self, expr: &HirExpr) {
        let HirExprKind::Local(local) = expr.kind else {
            return;
        };
        if Some(local) == self.this_local || is_copy(&mut self.cx.program, expr.ty) {
            return;
        }
        self.moves.mark(local, expr.span);
    }

    pub(super) fn check_not_moved(&mut self, local: LocalId, span: Span) {
        let Some(moved_at) = self.moves.moved_at(local) else {
            return;
        };
        let name = self.locals[local.0 as usize].name.clone();
        self.cx.emit(
            Diagnostic::error(Category::Type, format!("use of moved value `{name}`"), span)
                .with_code("E0320")
                .with_related(moved_at, "value moved here"),
        );
        // report each move once
        self.moves.restore(local);
    }

    /// Report locals declared outside a loop that its body moved.
    pub(super) fn check_loop_moves(&mut self, before: &MoveState, first_inner_local: usize) {
        for (local, span) in self.moves.moved_since(before) {
            if (local.0 as usize) < first_inner_local {
                let name = self.locals[local.0 as usize].name.clone();
                self.cx.error(
                    Category::Type,
                    "E0321",
                    span,
                    format!("value `{name}` is moved inside a loop and would be used again in the next iteration"),
                );
            }
        }
    }

    pub(super) fn place(&self, expr: &HirExpr) -> Place {
        match &expr.kind {
            HirExprKind::Local(local) => {
                let info = &self.locals[local.0 as usize];
                if info.mutable {
                    Place::Mutable
                } else if Some(*local) == self.this_local {
                    Place::Immutable("`this` in a method that does not take `mut this`".to_string())
                } else {
                    Place::Immutable(format!("binding `{}`", info.name))
                }
            }
            HirExprKind::Global(def) => match self.cx.program.global(*def) {
                Some(global) if global.mutable => Place::Mutable,
                _ => Place::Immutable(format!("`{}`", self.cx.program.def(*def).name)),
            },
            HirExprKind::Field { base, .. } | HirExprKind::TupleIndex { base, .. } | HirExprKind::Index { base, .. } => {
                self.place_through(base)
            }
            HirExprKind::Unary {
                op: UnaryOp::Deref,
                operand,
            } => match self.cx.program.types.kind(operand.ty) {
                TypeKind::Ref { mutable: true, .. } | TypeKind::Raw(_) => Place::Mutable,
                TypeKind::Ref { mutable: false, .. } => Place::Immutable("data behind a `&` view".to_string()),
                _ => Place::NotAPlace,
            },
            _ => Place::NotAPlace,
        }
    }

    fn place_through(&self, base: &HirExpr) -> Place {
        match self.cx.program.types.kind(base.ty) {
            TypeKind::Ref { mutable: true, .. } | TypeKind::Raw(_) => Place::Mutable,
            TypeKind::Ref { mutable: false, .. } => Place::Immutable("data behind a `&` view".to_string()),
            // class values are shared handles
            TypeKind::Adt { def, .. } if self.cx.program.struct_def(*def).is_some_and(|decl| decl.is_class) => {
                Place::Mutable
            }
            _ => self.place(base),
        }
    }

    /// Require `target` to be a writable place; reports and returns false
    /// otherwise.
    pub(super) fn require_mutable(&mut self, target: &HirExpr, action: &str) -> bool {
        if target.ty == TypeId::ERROR {
            return false;
        }
        match self.place(target) {
            Place::Mutable => true,
            Place::Immutable(what) => {
                self.cx.error(Category::Type, "E0361", target.span, format!("{action} immutable {what}"));
                false
            }
            Place::NotAPlace => {
                self.cx.error(
                    Category::Type,
                    "E0360",
                    target.span,
                    format!("{action} a value that is not a place"),
                );
                false
            }
        }
    }
}
