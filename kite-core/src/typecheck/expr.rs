//! Expression checking.
//!
//! Checking is bidirectional: [`BodyChecker::check_expr`] takes the type
//! the context expects, lets literals and empty aggregates adopt it, and
//! reports a mismatch when the synthesized type does not coerce into it.

use crate::ast::{self, BinaryOp, ExprKind, Literal, Receiver, UnaryOp};
use crate::builtins::{self, BuiltinDescriptor, BuiltinFn, BuiltinMethod, MethodDescriptor, ReceiverShape};
use crate::diagnostic::{Category, Diagnostic};
use crate::hir::{Body, Callee, DefKind, EnumDef, FunctionDef, GenericDef, HirExpr, HirExprKind, Local, LocalId, TraitMethod, UnitId};
use crate::name_resolve::{LocalScopes, SymbolId, SymbolKind};
use crate::span::Span;
use crate::types::{DefId, IntTy, Subst, TypeId, TypeKind, suffix_type};

use super::Checker;
use super::items::{ItemLookup, path_text, plural};
use super::ownership::MoveState;

pub(super) struct LoopFrame {
    pub(super) broke: bool,
}

/// Checks one body: a function, a global initializer or a constant
/// expression inside a type.
pub(super) struct BodyChecker<'c> {
    pub(super) cx: &'c mut Checker,
    pub(super) unit: UnitId,
    pub(super) generics: Vec<GenericDef>,
    /// Declared return type; `None` where `return` is not allowed.
    pub(super) ret: Option<TypeId>,
    pub(super) this_local: Option<LocalId>,
    pub(super) locals: Vec<Local>,
    local_symbols: Vec<SymbolId>,
    params: Vec<LocalId>,
    pub(super) scopes: LocalScopes,
    pub(super) loops: Vec<LoopFrame>,
    pub(super) unsafe_depth: usize,
    pub(super) moves: MoveState,
}

/// What a path in expression position names.
pub(super) enum PathTarget<'a> {
    Item { def: DefId, args: &'a [ast::TypeExpr] },
    Variant { def: DefId, index: usize, args: &'a [ast::TypeExpr] },
    /// A method named through its type, `Type::method`.
    Method { def: DefId, impl_args: Subst, args: &'a [ast::TypeExpr] },
    Builtin(&'static BuiltinDescriptor),
    Failed,
}

enum Callable {
    Function,
    Constructor,
    Global,
    Other(&'static str),
}

/// A numeric literal, possibly parenthesized.
pub(super) fn numeric_literal(expr: &ast::Expr) -> Option<&Literal> {
    match &expr.kind {
        ExprKind::Literal(literal @ (Literal::Int { .. } | Literal::Float { .. })) => Some(literal),
        ExprKind::Paren(inner) => numeric_literal(inner),
        _ => None,
    }
}

/// An unsuffixed operand whose type comes from the other side.
fn is_literal_operand(expr: &ast::Expr) -> bool {
    match &expr.kind {
        ExprKind::Literal(Literal::Int { suffix, .. } | Literal::Float { suffix, .. }) => suffix.is_none(),
        ExprKind::Paren(inner)
        | ExprKind::Unary {
            op: UnaryOp::Neg,
            operand: inner,
        } => is_literal_operand(inner),
        _ => false,
    }
}

impl<'c> BodyChecker<'c> {
    pub(super) fn new(cx: &'c mut Checker, unit: UnitId, generics: Vec<GenericDef>, ret: Option<TypeId>) -> Self {
        BodyChecker {
            cx,
            unit,
            generics,
            ret,
            this_local: None,
            locals: Vec::new(),
            local_symbols: Vec::new(),
            params: Vec::new(),
            scopes: LocalScopes::new(),
            loops: Vec::new(),
            unsafe_depth: 0,
            moves: MoveState::default(),
        }
    }

    pub(super) fn check_function(
        cx: &'c mut Checker,
        unit: UnitId,
        function: &FunctionDef,
        decl: &ast::FunctionDecl,
        ret: Option<TypeId>,
    ) -> Body {
        let mut checker = BodyChecker::new(cx, unit, function.generics.clone(), Some(ret.unwrap_or(TypeId::ERROR)));
        if let (Some((receiver, span)), Some(self_ty)) = (decl.receiver, function.self_ty) {
            let local = checker.declare_local("this", self_ty, receiver == Receiver::Mutable, span, SymbolKind::Param);
            checker.this_local = Some(local);
            checker.params.push(local);
        }
        for (param, ty) in decl.params.iter().zip(&function.param_types) {
            let local = checker.declare_local(&param.name.name, *ty, param.mutable, param.name.span, SymbolKind::Param);
            checker.params.push(local);
        }
        let expr = match &decl.body {
            ast::FunctionBody::Block(block) => checker.check_block_expr(block, ret),
            ast::FunctionBody::Expr(expr) => checker.check_expr(expr, ret),
            ast::FunctionBody::None => HirExpr::void(decl.span),
        };
        checker.finish(expr)
    }

    pub(super) fn check_initializer(
        cx: &'c mut Checker,
        unit: UnitId,
        generics: &[GenericDef],
        expr: &ast::Expr,
        expected: Option<TypeId>,
    ) -> Body {
        let mut checker = BodyChecker::new(cx, unit, generics.to_vec(), None);
        let value = checker.check_expr(expr, expected);
        checker.finish(value)
    }

    pub(super) fn check_snippet(cx: &'c mut Checker, unit: UnitId, block: &ast::Block) -> Body {
        let mut checker = BodyChecker::new(cx, unit, Vec::new(), None);
        let value = checker.check_block_expr(block, None);
        checker.finish(value)
    }

    fn finish(self, expr: HirExpr) -> Body {
        Body {
            locals: self.locals,
            params: self.params,
            expr,
        }
    }

    pub(super) fn error(&mut self, category: Category, code: &'static str, span: Span, message: impl Into<String>) {
        self.cx.error(category, code, span, message);
    }

    pub(super) fn show(&self, ty: TypeId) -> String {
        self.cx.program.types.display(ty)
    }

    pub(super) fn declare_local(&mut self, name: &str, ty: TypeId, mutable: bool, span: Span, kind: SymbolKind) -> LocalId {
        let local = LocalId(self.locals.len() as u32);
        self.locals.push(Local {
            name: name.to_string(),
            ty,
            mutable,
            span,
        });
        if let Err(previous) = self.scopes.define(name, local) {
            let previous_span = self.locals[previous.0 as usize].span;
            self.cx.emit(
                Diagnostic::error(Category::NameResolution, format!("redefinition of `{name}`"), span)
                    .with_code("E0203")
                    .with_related(previous_span, "previous definition in this scope"),
            );
        }
        let detail = format!("{}{name}: {}", if mutable { "mut " } else { "" }, self.show(ty));
        let ident = ast::Ident {
            name: name.to_string(),
            span,
        };
        let symbol = self.cx.define_symbol(None, &ident, kind, detail);
        self.local_symbols.push(symbol);
        local
    }

    pub(super) fn local_expr(&mut self, local: LocalId, span: Span) -> HirExpr {
        self.check_not_moved(local, span);
        self.reference_local(local, span)
    }

    fn reference_local(&mut self, local: LocalId, span: Span) -> HirExpr {
        let symbol = self.local_symbols[local.0 as usize];
        self.cx.program.symbols.reference(span, symbol);
        HirExpr::new(HirExprKind::Local(local), self.locals[local.0 as usize].ty, span)
    }

    pub(super) fn mismatch(&mut self, expected: TypeId, found: TypeId, span: Span) {
        let types = &self.cx.program.types;
        if types.contains_error(expected) || types.contains_error(found) {
            return;
        }
        let message = format!(
            "mismatched types: expected `{}`, found `{}`",
            types.display(expected),
            types.display(found)
        );
        self.error(Category::Type, "E0301", span, message);
    }

    pub(super) fn check_expr(&mut self, expr: &ast::Expr, expected: Option<TypeId>) -> HirExpr {
        let value = self.synth(expr, expected);
        self.coerce(value, expected)
    }

    fn coerce(&mut self, value: HirExpr, expected: Option<TypeId>) -> HirExpr {
        if let Some(expected) = expected {
            if !self.cx.program.types.can_coerce(value.ty, expected) {
                self.mismatch(expected, value.ty, value.span);
            }
        }
        value
    }

    /// Type a literal adopts from its context: through views and optionals.
    pub(super) fn literal_target(&self, ty: TypeId) -> TypeId {
        let types = &self.cx.program.types;
        let ty = types.strip_refs(ty);
        types.optional_inner(ty).unwrap_or(ty)
    }

    fn operand_hint(&self, ty: TypeId) -> Option<TypeId> {
        let ty = self.cx.program.types.strip_refs(ty);
        self.cx.program.types.is_numeric(ty).then_some(ty)
    }

    /// Check arguments only for their own diagnostics.
    pub(super) fn check_args_for_errors(&mut self, args: &[ast::Arg]) {
        for arg in args {
            self.synth(&arg.value, None);
        }
    }

    pub(super) fn synth(&mut self, expr: &ast::Expr, expected: Option<TypeId>) -> HirExpr {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Literal(literal) => self.literal(literal, false, expected, span),
            ExprKind::None => self.none_literal(expected, span),
            ExprKind::Some(inner) => {
                let hint = expected.and_then(|ty| self.cx.program.types.optional_inner(ty));
                let value = self.check_expr(inner, hint);
                self.consume(&value);
                let ty = self.cx.program.types.optional(hint.unwrap_or(value.ty));
                HirExpr::new(HirExprKind::Some(Box::new(value)), ty, span)
            }
            ExprKind::This => match self.this_local {
                Some(local) => self.local_expr(local, span),
                None => {
                    self.error(
                        Category::NameResolution,
                        "E0205",
                        span,
                        "`this` is only available inside methods",
                    );
                    HirExpr::error(span)
                }
            },
            ExprKind::Path(path) => self.value_path(path, expected, span),
            ExprKind::Paren(inner) => self.synth(inner, expected),
            ExprKind::Unary { op, operand } => self.check_unary(*op, operand, expected, span),
            ExprKind::Binary { op, lhs, rhs } => self.check_binary(*op, lhs, rhs, expected, span),
            ExprKind::Assign { op, target, value } => self.check_assign(*op, target, value, span),
            ExprKind::Range { .. } => {
                self.error(
                    Category::Type,
                    "E0307",
                    span,
                    "ranges are only allowed in `for` loops and slices",
                );
                HirExpr::error(span)
            }
            ExprKind::Cast { expr: inner, ty } => self.check_cast(inner, ty, span),
            ExprKind::Call { callee, args } => self.check_call(callee, args, expected, span),
            ExprKind::MethodCall {
                receiver,
                method,
                generic_args,
                args,
            } => self.check_method_call(receiver, method, generic_args, args, expected, span),
            ExprKind::Field { base, name } => self.check_field(base, name, span),
            ExprKind::TupleIndex {
                base,
                index,
                index_span,
            } => self.check_tuple_index(base, *index as usize, *index_span, span),
            ExprKind::Index { base, index } => self.check_index(base, index, span),
            ExprKind::Unwrap(inner) => self.check_unwrap(inner, expected, span),
            ExprKind::Tuple(items) => self.check_tuple(items, expected, span),
            ExprKind::Vector(items) => self.check_sequence(items, expected, span),
            ExprKind::Fill { value, count } => self.check_fill(value, count, expected, span),
            ExprKind::If {
                cond,
                then_block,
                else_branch,
            } => self.check_if(cond, then_block, else_branch.as_deref(), expected, false, span),
            ExprKind::Match { scrutinee, arms } => self.check_match(scrutinee, arms, expected, false, span),
            ExprKind::Block(block) => self.check_block_expr(block, expected),
            ExprKind::Unsafe(block) => {
                self.unsafe_depth += 1;
                let value = self.check_block_expr(block, expected);
                self.unsafe_depth -= 1;
                value
            }
            ExprKind::Return(value) => self.check_return(value.as_deref(), span),
            ExprKind::Break | ExprKind::Continue => {
                let is_break = matches!(expr.kind, ExprKind::Break);
                let Some(frame) = self.loops.last_mut() else {
                    let keyword = if is_break { "break" } else { "continue" };
                    self.error(Category::Type, "E0312", span, format!("`{keyword}` outside of a loop"));
                    return HirExpr::error(span);
                };
                if is_break {
                    frame.broke = true;
                    HirExpr::new(HirExprKind::Break, TypeId::NEVER, span)
                } else {
                    HirExpr::new(HirExprKind::Continue, TypeId::NEVER, span)
                }
            }
            ExprKind::Error => HirExpr::error(span),
        }
    }

    // -----------------------------------------------------------------
    // Literals
    // -----------------------------------------------------------------

    fn literal(&mut self, literal: &Literal, negative: bool, expected: Option<TypeId>, span: Span) -> HirExpr {
        match literal {
            Literal::Int { value, suffix } => {
                let value = if negative { -(*value as i128) } else { *value as i128 };
                let ty = match suffix {
                    Some(suffix) => suffix_type(*suffix),
                    None => match expected.map(|ty| self.literal_target(ty)) {
                        Some(ty) if self.cx.program.types.is_integer(ty) => ty,
                        _ => TypeId::I64,
                    },
                };
                if self.cx.program.types.float_ty(ty).is_some() {
                    return HirExpr::new(HirExprKind::Float(value as f64), ty, span);
                }
                let int = self.cx.program.types.int_ty(ty).unwrap_or(IntTy::I64);
                if !int.fits(value) {
                    self.error(
                        Category::Type,
                        "E0302",
                        span,
                        format!("integer literal out of range for `{}`", int.name()),
                    );
                }
                HirExpr::new(HirExprKind::Int(value), ty, span)
            }
            Literal::Float { value, suffix } => {
                let value = if negative { -*value } else { *value };
                let ty = match suffix {
                    Some(suffix) => suffix_type(*suffix),
                    None => match expected.map(|ty| self.literal_target(ty)) {
                        Some(ty) if self.cx.program.types.float_ty(ty).is_some() => ty,
                        _ => TypeId::F64,
                    },
                };
                HirExpr::new(HirExprKind::Float(value), ty, span)
            }
            Literal::Str(text) => HirExpr::new(HirExprKind::Str(text.clone()), TypeId::STRING, span),
            Literal::Char(ch) => HirExpr::new(HirExprKind::Char(*ch), TypeId::CHAR, span),
            Literal::Bool(value) => HirExpr::new(HirExprKind::Bool(*value), TypeId::BOOL, span),
        }
    }

    fn none_literal(&mut self, expected: Option<TypeId>, span: Span) -> HirExpr {
        let optional = expected.map(|ty| self.cx.program.types.strip_refs(ty)).filter(|ty| {
            matches!(self.cx.program.types.kind(*ty), TypeKind::Optional(_))
        });
        match optional {
            Some(ty) => HirExpr::new(HirExprKind::None, ty, span),
            None if expected == Some(TypeId::ERROR) => HirExpr::error(span),
            None => {
                self.cx.emit(
                    Diagnostic::error(Category::Type, "cannot infer the type of `none`", span)
                        .with_code("E0303")
                        .with_note("add a type annotation such as `let x: i64? = none;`"),
                );
                HirExpr::error(span)
            }
        }
    }

    // -----------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------

    /// A single-segment path naming a local or a const parameter.
    fn local_or_generic(&mut self, path: &ast::PathExpr) -> Option<HirExpr> {
        if !path.is_single() || !path.segments[0].generic_args.is_empty() {
            return None;
        }
        let ident = &path.segments[0].ident;
        if let Some(local) = self.scopes.lookup(&ident.name) {
            return Some(self.local_expr(local, ident.span));
        }
        let generic = self.generics.iter().find(|generic| generic.name == ident.name)?.clone();
        Some(match generic.const_ty {
            Some(ty) => HirExpr::new(HirExprKind::ConstParam(generic.id), ty, ident.span),
            None => {
                self.error(
                    Category::Type,
                    "E0206",
                    ident.span,
                    format!("type parameter `{}` cannot be used as a value", ident.name),
                );
                HirExpr::error(ident.span)
            }
        })
    }

    pub(super) fn resolve_path<'a>(&mut self, path: &'a ast::PathExpr) -> PathTarget<'a> {
        let idents: Vec<&ast::Ident> = path.segments.iter().map(|segment| &segment.ident).collect();
        let (def, consumed) = match self.cx.lookup_item(self.unit, &idents) {
            ItemLookup::Found(def, consumed) => (def, consumed),
            ItemLookup::Failed => return PathTarget::Failed,
            ItemLookup::NotFound => {
                if idents.len() == 1 {
                    if let Some(builtin) = builtins::find_builtin(&idents[0].name) {
                        return PathTarget::Builtin(builtin);
                    }
                }
                let message = if idents.len() == 1 {
                    format!("cannot find `{}` in this scope", idents[0].name)
                } else {
                    format!("cannot resolve path `{}`", path_text(&idents))
                };
                self.error(Category::NameResolution, "E0201", path.span, message);
                return PathTarget::Failed;
            }
        };
        if consumed == idents.len() {
            return PathTarget::Item {
                def,
                args: &path.segments[consumed - 1].generic_args,
            };
        }
        let owner_name = self.cx.program.def(def).name.clone();
        if consumed + 1 != idents.len() {
            self.error(
                Category::NameResolution,
                "E0201",
                path.span,
                format!("cannot resolve path `{}`", path_text(&idents)),
            );
            return PathTarget::Failed;
        }
        let member = idents[consumed];
        let owner_args = &path.segments[consumed - 1].generic_args;
        let member_args = &path.segments[consumed].generic_args;
        if let Some(index) = self.cx.program.enum_def(def).and_then(|decl| decl.variant_index(&member.name)) {
            if !member_args.is_empty() {
                self.error(
                    Category::GenericBinding,
                    "E0401",
                    member.span,
                    format!("generic arguments belong on the enum: write `{owner_name}::<..>::{}`", member.name),
                );
            }
            if let Some(symbol) = self.cx.variant_symbols.get(&(def, index)).copied() {
                self.cx.program.symbols.reference(member.span, symbol);
            }
            return PathTarget::Variant {
                def,
                index,
                args: owner_args,
            };
        }
        if let Some((method, imp)) = self.cx.find_associated(def, &member.name) {
            self.cx.program.symbols.reference_def(member.span, method);
            let mut impl_args = Subst::default();
            if !owner_args.is_empty() {
                let owner_ty = self.cx.instantiate_type(self.unit, &self.generics, def, owner_args, path.span);
                let target = self.cx.program.impls[imp].target;
                self.cx.program.types.match_types(target, owner_ty, &mut impl_args);
            }
            return PathTarget::Method {
                def: method,
                impl_args,
                args: member_args,
            };
        }
        self.error(
            Category::NameResolution,
            "E0201",
            member.span,
            format!("`{owner_name}` has no variant or associated function named `{}`", member.name),
        );
        PathTarget::Failed
    }

    fn value_path(&mut self, path: &ast::PathExpr, expected: Option<TypeId>, span: Span) -> HirExpr {
        if let Some(value) = self.local_or_generic(path) {
            return value;
        }
        match self.resolve_path(path) {
            PathTarget::Item { def, args } => match &self.cx.program.def(def).kind {
                DefKind::Function(_) => self.function_value(def, Subst::default(), args, span),
                DefKind::Const(_) | DefKind::Static(_) => {
                    let ty = self.cx.global_type(def);
                    HirExpr::new(HirExprKind::Global(def), ty, span)
                }
                kind => {
                    let message = format!("expected a value, found {} `{}`", kind.describe(), self.cx.program.def(def).name);
                    self.error(Category::Type, "E0206", span, message);
                    HirExpr::error(span)
                }
            },
            PathTarget::Variant { def, index, args } => self.check_variant(def, index, args, None, expected, span),
            PathTarget::Method { def, impl_args, args } => self.function_value(def, impl_args, args, span),
            PathTarget::Builtin(builtin) => {
                self.error(
                    Category::Type,
                    "E0206",
                    span,
                    format!("builtin `{}` can only be called", builtin.name),
                );
                HirExpr::error(span)
            }
            PathTarget::Failed => HirExpr::error(span),
        }
    }

    /// A function named as a value. Generic functions need every argument
    /// spelled out.
    fn function_value(&mut self, def: DefId, mut subst: Subst, explicit: &[ast::TypeExpr], span: Span) -> HirExpr {
        self.cx.ensure_signature(def, span);
        let Some(function) = self.cx.program.function(def).cloned() else {
            return HirExpr::error(span);
        };
        let name = self.cx.program.def(def).name.clone();
        if function.receiver.is_some() {
            self.error(
                Category::Type,
                "E0305",
                span,
                format!("method `{name}` takes `this` and cannot be used as a value"),
            );
            return HirExpr::error(span);
        }
        let owned = self.owner_generic_count(&function);
        self.bind_explicit(&name, &function.generics[owned..], explicit, &mut subst, span);
        let Some(generic_args) = self.generic_args(&name, &function.generics, &subst, span) else {
            return HirExpr::error(span);
        };
        let params = function
            .param_types
            .iter()
            .map(|ty| self.cx.program.types.subst(*ty, &subst))
            .collect();
        let ret = self.cx.program.types.subst(function.ret, &subst);
        let ty = self.cx.program.types.function(params, ret);
        HirExpr::new(HirExprKind::FunctionRef { def, generic_args }, ty, span)
    }

    // -----------------------------------------------------------------
    // Operators
    // -----------------------------------------------------------------

    fn check_unary(&mut self, op: UnaryOp, operand: &ast::Expr, expected: Option<TypeId>, span: Span) -> HirExpr {
        let (operand, ty) = match op {
            UnaryOp::Neg => {
                if let Some(literal) = numeric_literal(operand) {
                    return self.literal(literal, true, expected, span);
                }
                let value = self.synth(operand, expected);
                let ty = self.cx.program.types.strip_refs(value.ty);
                let types = &self.cx.program.types;
                let problem = match types.int_ty(ty) {
                    _ if types.is_absorbing(ty) => None,
                    Some(int) if !int.is_signed() => Some(format!("cannot negate a value of unsigned type `{}`", int.name())),
                    Some(_) => None,
                    None if types.float_ty(ty).is_some() => None,
                    None => Some(format!("cannot negate a value of type `{}`", types.display(ty))),
                };
                if let Some(message) = problem {
                    self.error(Category::Type, "E0307", span, message);
                }
                (value, ty)
            }
            UnaryOp::Not => (self.check_expr(operand, Some(TypeId::BOOL)), TypeId::BOOL),
            UnaryOp::BitNot => {
                let value = self.synth(operand, expected);
                let ty = self.cx.program.types.strip_refs(value.ty);
                if !self.cx.program.types.is_integer(ty) && !self.cx.program.types.is_absorbing(ty) {
                    let message = format!("cannot apply `~` to a value of type `{}`", self.show(ty));
                    self.error(Category::Type, "E0307", span, message);
                }
                (value, ty)
            }
            UnaryOp::Ref | UnaryOp::RefMut => {
                let mutable = op == UnaryOp::RefMut;
                let hint = expected.and_then(|ty| match self.cx.program.types.kind(ty) {
                    TypeKind::Ref { inner, .. } => Some(*inner),
                    _ => None,
                });
                let value = self.synth(operand, hint);
                if mutable {
                    self.require_mutable(&value, "mutable borrow of");
                }
                let ty = self.cx.program.types.reference(mutable, value.ty);
                (value, ty)
            }
            UnaryOp::Deref => {
                let value = self.synth(operand, None);
                let ty = match self.cx.program.types.kind(value.ty).clone() {
                    TypeKind::Ref { inner, .. } => inner,
                    TypeKind::Raw(inner) => {
                        if self.unsafe_depth == 0 {
                            self.error(
                                Category::Type,
                                "E0309",
                                span,
                                "dereference of a raw pointer requires an `unsafe` block",
                            );
                        }
                        inner
                    }
                    TypeKind::Error => TypeId::ERROR,
                    _ => {
                        let message = format!("cannot dereference a value of type `{}`", self.show(value.ty));
                        self.error(Category::Type, "E0307", span, message);
                        TypeId::ERROR
                    }
                };
                (value, ty)
            }
        };
        HirExpr::new(
            HirExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
            span,
        )
    }

    fn check_binary(
        &mut self,
        op: BinaryOp,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
        expected: Option<TypeId>,
        span: Span,
    ) -> HirExpr {
        if op.is_logical() {
            let lhs = self.check_expr(lhs, Some(TypeId::BOOL));
            let rhs = self.check_expr(rhs, Some(TypeId::BOOL));
            return binary(op, lhs, rhs, TypeId::BOOL, span);
        }
        let hint = if op.is_comparison() {
            None
        } else {
            expected.and_then(|ty| self.operand_hint(self.literal_target(ty)))
        };
        let (lhs, rhs) = if op.is_shift() {
            let lhs = self.synth(lhs, hint);
            let rhs = self.synth(rhs, None);
            (lhs, rhs)
        } else if is_literal_operand(lhs) && !is_literal_operand(rhs) {
            let rhs = self.synth(rhs, hint);
            let lhs_hint = self.operand_hint(rhs.ty).or(hint);
            let lhs = self.synth(lhs, lhs_hint);
            (lhs, rhs)
        } else {
            let lhs = self.synth(lhs, hint);
            let rhs_hint = self.operand_hint(lhs.ty);
            let rhs = self.synth(rhs, rhs_hint);
            (lhs, rhs)
        };
        let types = &self.cx.program.types;
        let left = types.strip_refs(lhs.ty);
        let right = types.strip_refs(rhs.ty);
        let fallback = if op.is_comparison() { TypeId::BOOL } else { TypeId::ERROR };
        if left == TypeId::ERROR || right == TypeId::ERROR {
            return binary(op, lhs, rhs, fallback, span);
        }
        if op.is_shift() {
            let ty = if types.is_integer(left) && types.is_integer(right) {
                left
            } else {
                let message = format!(
                    "operator `{}` needs integer operands, found `{}` and `{}`",
                    op.symbol(),
                    types.display(left),
                    types.display(right)
                );
                self.error(Category::Type, "E0307", span, message);
                TypeId::ERROR
            };
            return binary(op, lhs, rhs, ty, span);
        }
        let Some(common) = types.join(left, right) else {
            let message = format!(
                "mismatched operand types for `{}`: `{}` and `{}`",
                op.symbol(),
                types.display(left),
                types.display(right)
            );
            self.error(Category::Type, "E0307", span, message);
            return binary(op, lhs, rhs, fallback, span);
        };
        let numeric = types.is_numeric(common) || common == TypeId::NEVER;
        let supported = match op {
            BinaryOp::Eq | BinaryOp::Ne => self.is_equatable(common),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                numeric || common == TypeId::CHAR || common == TypeId::STRING
            }
            BinaryOp::Add => numeric || common == TypeId::STRING,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                types.is_integer(common) || common == TypeId::BOOL
            }
            _ => numeric,
        };
        if !supported {
            let message = format!("operator `{}` cannot be applied to `{}`", op.symbol(), self.show(common));
            self.error(Category::Type, "E0307", span, message);
        }
        let ty = if op.is_comparison() {
            TypeId::BOOL
        } else if supported {
            common
        } else {
            TypeId::ERROR
        };
        binary(op, lhs, rhs, ty, span)
    }

    fn is_equatable(&self, ty: TypeId) -> bool {
        let types = &self.cx.program.types;
        let ty = types.strip_refs(ty);
        match types.kind(ty) {
            TypeKind::Error
            | TypeKind::Never
            | TypeKind::Bool
            | TypeKind::Char
            | TypeKind::String
            | TypeKind::Int(_)
            | TypeKind::Float(_) => true,
            TypeKind::Optional(inner) => self.is_equatable(*inner),
            TypeKind::Adt { def, .. } => self.cx.program.enum_def(*def).is_some_and(EnumDef::is_c_like),
            _ => false,
        }
    }

    fn check_assign(&mut self, op: Option<BinaryOp>, target: &ast::Expr, value: &ast::Expr, span: Span) -> HirExpr {
        let target = self.assign_target(target);
        let target_ty = target.ty;
        let value = match op {
            None => {
                let value = self.check_expr(value, Some(target_ty));
                self.consume(&value);
                value
            }
            Some(op) => {
                let hint = if op.is_shift() { None } else { self.operand_hint(target_ty) };
                let value = self.synth(value, hint);
                let types = &self.cx.program.types;
                let left = types.strip_refs(target_ty);
                let right = types.strip_refs(value.ty);
                let fits = types.can_coerce(right, left);
                let supported = types.contains_error(left)
                    || types.contains_error(right)
                    || match op {
                        BinaryOp::Add => fits && (types.is_numeric(left) || left == TypeId::STRING),
                        BinaryOp::Shl | BinaryOp::Shr => types.is_integer(left) && types.is_integer(right),
                        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                            fits && (types.is_integer(left) || left == TypeId::BOOL)
                        }
                        _ => fits && types.is_numeric(left),
                    };
                if !supported {
                    let message = format!(
                        "cannot apply `{}=` to `{}` and `{}`",
                        op.symbol(),
                        types.display(left),
                        types.display(right)
                    );
                    self.error(Category::Type, "E0307", span, message);
                }
                value
            }
        };
        let writable = self.require_mutable_through(&target, "assignment to");
        if let (true, None, HirExprKind::Local(local)) = (writable, op, &target.kind) {
            self.moves.restore(*local);
        }
        HirExpr::new(
            HirExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            TypeId::VOID,
            span,
        )
    }

    /// The left side of an assignment. Writing a local is not a use of its
    /// old value.
    fn assign_target(&mut self, target: &ast::Expr) -> HirExpr {
        if let ExprKind::Path(path) = &target.kind {
            if path.is_single() && path.segments[0].generic_args.is_empty() {
                if let Some(local) = self.scopes.lookup(&path.segments[0].ident.name) {
                    return self.reference_local(local, target.span);
                }
            }
        }
        self.synth(target, None)
    }

    /// Like [`BodyChecker::require_mutable`], but a `&mut` view or a class
    /// handle also allows writing.
    pub(super) fn require_mutable_through(&mut self, target: &HirExpr, action: &str) -> bool {
        let types = &self.cx.program.types;
        match types.kind(target.ty) {
            TypeKind::Ref { mutable: true, .. } | TypeKind::Raw(_) => return true,
            TypeKind::Ref { mutable: false, .. } => {
                self.error(
                    Category::Type,
                    "E0361",
                    target.span,
                    format!("{action} data behind a `&` view"),
                );
                return false;
            }
            TypeKind::Adt { def, .. } if self.cx.program.struct_def(*def).is_some_and(|decl| decl.is_class) => {
                return true;
            }
            _ => {}
        }
        self.require_mutable(target, action)
    }

    fn check_cast(&mut self, inner: &ast::Expr, ty: &ast::TypeExpr, span: Span) -> HirExpr {
        let target = self.cx.resolve_type(self.unit, &self.generics, ty);
        let value = self.synth(inner, None);
        let from = value.ty;
        let types = &self.cx.program.types;
        let valid = types.contains_error(from)
            || types.contains_error(target)
            || types.can_coerce(from, target)
            || (types.is_numeric(from) && types.is_numeric(target))
            || match (types.kind(from), types.kind(target)) {
                (TypeKind::Bool | TypeKind::Char, TypeKind::Int(_)) => true,
                (TypeKind::Int(IntTy::U8 | IntTy::U32), TypeKind::Char) => true,
                (TypeKind::Adt { def, .. }, TypeKind::Int(_)) => {
                    self.cx.program.enum_def(*def).is_some_and(EnumDef::is_c_like)
                }
                (TypeKind::Raw(_), TypeKind::Raw(_)) => true,
                _ => false,
            };
        let raw_cast = matches!(
            (types.kind(from), types.kind(target)),
            (TypeKind::Raw(_), TypeKind::Raw(_))
        ) && from != target;
        if !valid {
            let message = format!("cannot cast `{}` to `{}`", types.display(from), types.display(target));
            self.error(Category::Type, "E0310", span, message);
        } else if raw_cast && self.unsafe_depth == 0 {
            self.error(
                Category::Type,
                "E0309",
                span,
                "casting between raw pointer types requires an `unsafe` block",
            );
        }
        HirExpr::new(HirExprKind::Cast(Box::new(value)), target, span)
    }

    // -----------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------

    fn check_call(&mut self, callee: &ast::Expr, args: &[ast::Arg], expected: Option<TypeId>, span: Span) -> HirExpr {
        let ExprKind::Path(path) = &callee.kind else {
            let function = self.synth(callee, None);
            return self.indirect_call(function, args, span);
        };
        if let Some(function) = self.local_or_generic(path) {
            return self.indirect_call(function, args, span);
        }
        match self.resolve_path(path) {
            PathTarget::Item { def, args: explicit } => {
                let callable = match &self.cx.program.def(def).kind {
                    DefKind::Function(_) => Callable::Function,
                    DefKind::Struct(_) => Callable::Constructor,
                    DefKind::Const(_) | DefKind::Static(_) => Callable::Global,
                    kind => Callable::Other(kind.describe()),
                };
                match callable {
                    Callable::Function => {
                        self.check_call_to(def, Subst::default(), explicit, None, args, expected, span)
                    }
                    Callable::Constructor => self.check_constructor(def, explicit, args, expected, span),
                    Callable::Global => {
                        let ty = self.cx.global_type(def);
                        let function = HirExpr::new(HirExprKind::Global(def), ty, callee.span);
                        self.indirect_call(function, args, span)
                    }
                    Callable::Other(what) => {
                        let message = format!("{what} `{}` is not callable", self.cx.program.def(def).name);
                        self.error(Category::Type, "E0307", callee.span, message);
                        self.check_args_for_errors(args);
                        HirExpr::error(span)
                    }
                }
            }
            PathTarget::Variant { def, index, args: explicit } => {
                self.check_variant(def, index, explicit, Some(args), expected, span)
            }
            PathTarget::Method { def, impl_args, args: explicit } => {
                if self.cx.program.function(def).is_some_and(|function| function.receiver.is_some()) {
                    let name = self.cx.program.def(def).name.clone();
                    self.error(
                        Category::Type,
                        "E0305",
                        callee.span,
                        format!("`{name}` takes `this`; call it with method syntax `value.{name}(..)`"),
                    );
                    self.check_args_for_errors(args);
                    return HirExpr::error(span);
                }
                self.check_call_to(def, impl_args, explicit, None, args, expected, span)
            }
            PathTarget::Builtin(builtin) => self.check_builtin_call(builtin, &path.last().generic_args, args, span),
            PathTarget::Failed => {
                self.check_args_for_errors(args);
                HirExpr::error(span)
            }
        }
    }

    fn indirect_call(&mut self, function: HirExpr, args: &[ast::Arg], span: Span) -> HirExpr {
        let ty = self.cx.program.types.strip_refs(function.ty);
        let TypeKind::Function { params, ret } = self.cx.program.types.kind(ty).clone() else {
            if !self.cx.program.types.is_absorbing(ty) {
                let message = format!("a value of type `{}` is not callable", self.show(function.ty));
                self.error(Category::Type, "E0307", function.span, message);
            }
            self.check_args_for_errors(args);
            return HirExpr::error(span);
        };
        if args.len() != params.len() {
            self.error(
                Category::Type,
                "E0304",
                span,
                format!(
                    "this function takes {} argument{} but {} were supplied",
                    params.len(),
                    plural(params.len()),
                    args.len()
                ),
            );
            self.check_args_for_errors(args);
            return HirExpr::error(span);
        }
        let mut values = Vec::with_capacity(args.len());
        for (arg, param) in args.iter().zip(params) {
            if let Some(label) = &arg.label {
                self.error(
                    Category::Type,
                    "E0308",
                    label.span,
                    "calls through function values take no argument labels",
                );
            }
            let value = self.check_expr(&arg.value, Some(param));
            self.consume(&value);
            values.push(value);
        }
        HirExpr::new(
            HirExprKind::Call {
                callee: Callee::Indirect(Box::new(function)),
                args: values,
            },
            ret,
            span,
        )
    }

    fn check_builtin_call(
        &mut self,
        builtin: &'static BuiltinDescriptor,
        generic_args: &[ast::TypeExpr],
        args: &[ast::Arg],
        span: Span,
    ) -> HirExpr {
        if let Some(first) = generic_args.first() {
            self.error(
                Category::GenericBinding,
                "E0401",
                first.span,
                format!("builtin `{}` takes no generic arguments", builtin.name),
            );
        }
        for arg in args {
            if let Some(label) = &arg.label {
                self.error(
                    Category::Type,
                    "E0308",
                    label.span,
                    format!("builtin `{}` takes no argument labels", builtin.name),
                );
            }
        }
        if builtin.kind == BuiltinFn::Panic {
            if args.len() != 1 {
                self.error(
                    Category::Type,
                    "E0304",
                    span,
                    format!("`panic` takes 1 argument but {} were supplied", args.len()),
                );
                self.check_args_for_errors(args);
                return HirExpr::new(HirExprKind::Error, TypeId::NEVER, span);
            }
            let message = self.check_expr(&args[0].value, Some(TypeId::STRING));
            return HirExpr::new(
                HirExprKind::Call {
                    callee: Callee::Builtin(BuiltinFn::Panic),
                    args: vec![message],
                },
                TypeId::NEVER,
                span,
            );
        }
        let call = |args: Vec<HirExpr>| {
            HirExpr::new(
                HirExprKind::Call {
                    callee: Callee::Builtin(builtin.kind),
                    args,
                },
                TypeId::VOID,
                span,
            )
        };
        let Some(format) = args.first() else {
            if builtin.kind == BuiltinFn::Println {
                return call(Vec::new());
            }
            self.error(
                Category::Type,
                "E0304",
                span,
                format!("`{}` takes a format string", builtin.name),
            );
            return HirExpr::error(span);
        };
        let ExprKind::Literal(Literal::Str(text)) = &format.value.kind else {
            self.error(
                Category::Type,
                "E0313",
                format.value.span,
                format!("the format string of `{}` must be a string literal", builtin.name),
            );
            self.check_args_for_errors(args);
            return HirExpr::error(span);
        };
        let holes = builtins::format_holes(text);
        let supplied = args.len() - 1;
        if holes != supplied {
            self.error(
                Category::Type,
                "E0313",
                format.value.span,
                format!(
                    "format string has {holes} placeholder{} but {supplied} argument{} {} supplied",
                    plural(holes),
                    plural(supplied),
                    if supplied == 1 { "was" } else { "were" }
                ),
            );
        }
        let mut values = vec![HirExpr::new(HirExprKind::Str(text.clone()), TypeId::STRING, format.value.span)];
        for arg in &args[1..] {
            let value = self.synth(&arg.value, None);
            if !self.is_printable(value.ty) {
                let message = format!("values of type `{}` cannot be formatted", self.show(value.ty));
                self.error(Category::Type, "E0313", value.span, message);
            }
            values.push(value);
        }
        call(values)
    }

    fn is_printable(&self, ty: TypeId) -> bool {
        let types = &self.cx.program.types;
        let ty = types.strip_refs(ty);
        match types.kind(ty) {
            TypeKind::Error
            | TypeKind::Never
            | TypeKind::Bool
            | TypeKind::Char
            | TypeKind::String
            | TypeKind::Int(_)
            | TypeKind::Float(_) => true,
            TypeKind::Adt { def, .. } => self.cx.program.enum_def(*def).is_some_and(EnumDef::is_c_like),
            _ => false,
        }
    }

    fn check_method_call(
        &mut self,
        receiver: &ast::Expr,
        method: &ast::Ident,
        generic_args: &[ast::TypeExpr],
        args: &[ast::Arg],
        expected: Option<TypeId>,
        span: Span,
    ) -> HirExpr {
        let receiver = self.synth(receiver, None);
        let value_ty = self.cx.program.types.strip_refs(receiver.ty);
        if self.cx.program.types.is_absorbing(value_ty) {
            self.check_args_for_errors(args);
            return HirExpr::error(span);
        }
        let shape = match self.cx.program.types.kind(value_ty) {
            TypeKind::String => Some(ReceiverShape::String),
            TypeKind::Vector(_) => Some(ReceiverShape::Vector),
            TypeKind::Array { .. } => Some(ReceiverShape::Array),
            TypeKind::Optional(_) => Some(ReceiverShape::Optional),
            _ => None,
        };
        if let Some(descriptor) = shape.and_then(|shape| builtins::find_builtin_method(shape, &method.name)) {
            return self.builtin_method_call(descriptor, receiver, value_ty, args, span);
        }
        if let TypeKind::Param { id, name } = self.cx.program.types.kind(value_ty).clone() {
            let bounds = self
                .generics
                .iter()
                .find(|generic| generic.id == id)
                .map(|generic| generic.bounds.clone())
                .unwrap_or_default();
            for trait_def in bounds {
                let found = self
                    .cx
                    .program
                    .trait_def(trait_def)
                    .and_then(|decl| decl.methods.iter().find(|m| m.name == method.name).cloned());
                if let Some(signature) = found {
                    return self.trait_method_call(trait_def, signature, receiver, value_ty, args, span);
                }
            }
            self.cx.emit(
                Diagnostic::error(
                    Category::Type,
                    format!("no method `{}` found for type parameter `{name}`", method.name),
                    method.span,
                )
                .with_code("E0305")
                .with_note(format!("add a trait bound to `{name}` that declares `{}`", method.name)),
            );
            self.check_args_for_errors(args);
            return HirExpr::error(span);
        }
        let Some((def, subst)) = self.cx.program.find_method(value_ty, &method.name) else {
            let message = format!("no method named `{}` found for type `{}`", method.name, self.show(value_ty));
            self.error(Category::Type, "E0305", method.span, message);
            self.check_args_for_errors(args);
            return HirExpr::error(span);
        };
        self.cx.program.symbols.reference_def(method.span, def);
        match self.cx.program.function(def).and_then(|function| function.receiver) {
            None => {
                let owner = self.show(value_ty);
                self.error(
                    Category::Type,
                    "E0305",
                    method.span,
                    format!("`{}` has no `this` parameter; call it as `{owner}::{}(..)`", method.name, method.name),
                );
                self.check_args_for_errors(args);
                return HirExpr::error(span);
            }
            Some(Receiver::Mutable) => {
                self.require_mutable_through(&receiver, "calling a `mut this` method on");
            }
            Some(Receiver::View) => {}
        }
        self.check_call_to(def, subst, generic_args, Some(receiver), args, expected, span)
    }

    fn builtin_method_call(
        &mut self,
        descriptor: &'static MethodDescriptor,
        receiver: HirExpr,
        value_ty: TypeId,
        args: &[ast::Arg],
        span: Span,
    ) -> HirExpr {
        if args.len() != descriptor.arity {
            self.error(
                Category::Type,
                "E0304",
                span,
                format!(
                    "method `{}` takes {} argument{} but {} were supplied",
                    descriptor.name,
                    descriptor.arity,
                    plural(descriptor.arity),
                    args.len()
                ),
            );
            self.check_args_for_errors(args);
            return HirExpr::error(span);
        }
        if descriptor.kind.mutates() {
            self.require_mutable_through(&receiver, "mutating method call on");
        }
        let elem = match self.cx.program.types.kind(value_ty) {
            TypeKind::Vector(elem) => *elem,
            _ => TypeId::ERROR,
        };
        let mut values = vec![receiver];
        let ret = match descriptor.kind {
            BuiltinMethod::StringLen | BuiltinMethod::VectorLen | BuiltinMethod::ArrayLen => TypeId::USIZE,
            BuiltinMethod::StringIsEmpty | BuiltinMethod::VectorIsEmpty | BuiltinMethod::OptionalHasValue => {
                TypeId::BOOL
            }
            BuiltinMethod::VectorPush => {
                let value = self.check_expr(&args[0].value, Some(elem));
                self.consume(&value);
                values.push(value);
                TypeId::VOID
            }
            BuiltinMethod::VectorPop => self.cx.program.types.optional(elem),
        };
        HirExpr::new(
            HirExprKind::Call {
                callee: Callee::BuiltinMethod(descriptor.kind),
                args: values,
            },
            ret,
            span,
        )
    }

    fn trait_method_call(
        &mut self,
        trait_def: DefId,
        signature: TraitMethod,
        receiver: HirExpr,
        self_ty: TypeId,
        args: &[ast::Arg],
        span: Span,
    ) -> HirExpr {
        match signature.receiver {
            None => {
                self.error(
                    Category::Type,
                    "E0305",
                    span,
                    format!("trait method `{}` has no `this` parameter", signature.name),
                );
                self.check_args_for_errors(args);
                return HirExpr::error(span);
            }
            Some(Receiver::Mutable) => {
                self.require_mutable_through(&receiver, "calling a `mut this` method on");
            }
            Some(Receiver::View) => {}
        }
        if args.len() != signature.params.len() {
            self.error(
                Category::Type,
                "E0304",
                span,
                format!(
                    "method `{}` takes {} argument{} but {} were supplied",
                    signature.name,
                    signature.params.len(),
                    plural(signature.params.len()),
                    args.len()
                ),
            );
            self.check_args_for_errors(args);
            return HirExpr::error(span);
        }
        let mut values = vec![receiver];
        for (arg, param) in args.iter().zip(&signature.params) {
            let value = self.check_expr(&arg.value, Some(*param));
            self.consume(&value);
            values.push(value);
        }
        HirExpr::new(
            HirExprKind::Call {
                callee: Callee::TraitMethod {
                    trait_def,
                    method: signature.name,
                    self_ty,
                },
                args: values,
            },
            signature.ret,
            span,
        )
    }

    // -----------------------------------------------------------------
    // Access
    // -----------------------------------------------------------------

    fn check_field(&mut self, base: &ast::Expr, name: &ast::Ident, span: Span) -> HirExpr {
        let base = self.synth(base, None);
        let ty = self.cx.program.types.strip_refs(base.ty);
        if self.cx.program.types.is_absorbing(ty) {
            return HirExpr::error(span);
        }
        if let TypeKind::Adt { def, args, .. } = self.cx.program.types.kind(ty).clone() {
            let field = self.cx.program.struct_def(def).and_then(|decl| {
                let index = decl.field_index(&name.name)?;
                let subst: Subst = decl.generics.iter().map(|generic| generic.id).zip(args).collect();
                Some((index, decl.fields[index].ty, subst))
            });
            if let Some((index, field_ty, subst)) = field {
                let ty = self.cx.program.types.subst(field_ty, &subst);
                if let Some(symbol) = self.cx.field_symbols.get(&(def, index)).copied() {
                    self.cx.program.symbols.reference(name.span, symbol);
                }
                return HirExpr::new(
                    HirExprKind::Field {
                        base: Box::new(base),
                        index,
                        name: name.name.clone(),
                    },
                    ty,
                    span,
                );
            }
        }
        let message = format!("no field `{}` on type `{}`", name.name, self.show(ty));
        self.error(Category::Type, "E0306", name.span, message);
        HirExpr::error(span)
    }

    fn check_tuple_index(&mut self, base: &ast::Expr, index: usize, index_span: Span, span: Span) -> HirExpr {
        let base = self.synth(base, None);
        let ty = self.cx.program.types.strip_refs(base.ty);
        if self.cx.program.types.is_absorbing(ty) {
            return HirExpr::error(span);
        }
        if let TypeKind::Tuple(items) = self.cx.program.types.kind(ty) {
            if let Some(item) = items.get(index).copied() {
                return HirExpr::new(
                    HirExprKind::TupleIndex {
                        base: Box::new(base),
                        index,
                    },
                    item,
                    span,
                );
            }
        }
        let message = format!("no field `{index}` on type `{}`", self.show(ty));
        self.error(Category::Type, "E0306", index_span, message);
        HirExpr::error(span)
    }

    fn check_index(&mut self, base: &ast::Expr, index: &ast::Expr, span: Span) -> HirExpr {
        let base = self.synth(base, None);
        let ty = self.cx.program.types.strip_refs(base.ty);
        let kind = self.cx.program.types.kind(ty).clone();
        if let ExprKind::Range { start, end, inclusive } = &index.kind {
            let start = self.index_operand(start);
            let end = self.index_operand(end);
            let result = match kind {
                TypeKind::String => TypeId::STRING,
                TypeKind::Vector(elem) | TypeKind::Array { elem, .. } => self.cx.program.types.vector(elem),
                TypeKind::Error | TypeKind::Never => TypeId::ERROR,
                _ => {
                    let message = format!("cannot slice a value of type `{}`", self.show(ty));
                    self.error(Category::Type, "E0307", span, message);
                    TypeId::ERROR
                }
            };
            return HirExpr::new(
                HirExprKind::Slice {
                    base: Box::new(base),
                    start: Box::new(start),
                    end: Box::new(end),
                    inclusive: *inclusive,
                },
                result,
                span,
            );
        }
        let index = self.index_operand(index);
        let elem = match kind {
            TypeKind::Vector(elem) | TypeKind::Array { elem, .. } => elem,
            TypeKind::String => TypeId::U8,
            TypeKind::Error | TypeKind::Never => TypeId::ERROR,
            _ => {
                let message = format!("cannot index into a value of type `{}`", self.show(ty));
                self.error(Category::Type, "E0307", span, message);
                TypeId::ERROR
            }
        };
        HirExpr::new(
            HirExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
            },
            elem,
            span,
        )
    }

    fn index_operand(&mut self, expr: &ast::Expr) -> HirExpr {
        let value = self.synth(expr, Some(TypeId::USIZE));
        let types = &self.cx.program.types;
        if !types.is_integer(value.ty) && !types.is_absorbing(value.ty) {
            let message = format!("indices must be integers, found `{}`", types.display(value.ty));
            self.error(Category::Type, "E0307", value.span, message);
        }
        value
    }

    fn check_unwrap(&mut self, inner: &ast::Expr, expected: Option<TypeId>, span: Span) -> HirExpr {
        let hint = expected.map(|ty| self.cx.program.types.optional(ty));
        let value = self.synth(inner, hint);
        let ty = self.cx.program.types.strip_refs(value.ty);
        let result = match self.cx.program.types.kind(ty) {
            TypeKind::Optional(inner) => *inner,
            TypeKind::Error | TypeKind::Never => TypeId::ERROR,
            _ => {
                let message = format!("`!` unwraps an optional, found `{}`", self.show(ty));
                self.error(Category::Type, "E0307", span, message);
                TypeId::ERROR
            }
        };
        HirExpr::new(HirExprKind::Unwrap(Box::new(value)), result, span)
    }

    // -----------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------

    fn check_tuple(&mut self, items: &[ast::Expr], expected: Option<TypeId>, span: Span) -> HirExpr {
        let hints: Vec<Option<TypeId>> = match expected.map(|ty| self.cx.program.types.kind(self.literal_target(ty)).clone()) {
            Some(TypeKind::Tuple(types)) if types.len() == items.len() => types.into_iter().map(Some).collect(),
            _ => vec![None; items.len()],
        };
        let mut values = Vec::with_capacity(items.len());
        let mut types = Vec::with_capacity(items.len());
        for (item, hint) in items.iter().zip(hints) {
            let value = self.check_expr(item, hint);
            self.consume(&value);
            types.push(hint.unwrap_or(value.ty));
            values.push(value);
        }
        let ty = self.cx.program.types.tuple(types);
        HirExpr::new(HirExprKind::Tuple(values), ty, span)
    }

    /// Element type and whether a vector is wanted, from the context.
    fn sequence_hint(&self, expected: Option<TypeId>) -> (Option<TypeId>, bool) {
        let Some(expected) = expected else {
            return (None, false);
        };
        match self.cx.program.types.kind(self.literal_target(expected)) {
            TypeKind::Vector(elem) => (Some(*elem), true),
            TypeKind::Array { elem, .. } => (Some(*elem), false),
            _ => (None, false),
        }
    }

    fn check_sequence(&mut self, items: &[ast::Expr], expected: Option<TypeId>, span: Span) -> HirExpr {
        let (hint, vector) = self.sequence_hint(expected);
        if items.is_empty() {
            let Some(elem) = hint else {
                self.cx.emit(
                    Diagnostic::error(Category::Type, "cannot infer the element type of an empty literal", span)
                        .with_code("E0303")
                        .with_note("add a type annotation such as `let v: [i64] = [];`"),
                );
                return HirExpr::error(span);
            };
            let ty = if vector {
                self.cx.program.types.vector(elem)
            } else {
                self.cx.program.types.array(elem, 0)
            };
            return HirExpr::new(HirExprKind::Sequence(Vec::new()), ty, span);
        }
        let mut elem = hint;
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            let value = self.check_expr(item, elem);
            self.consume(&value);
            if elem.is_none() && value.ty != TypeId::NEVER {
                elem = Some(value.ty);
            }
            values.push(value);
        }
        let elem = elem.unwrap_or(TypeId::ERROR);
        let ty = if vector {
            self.cx.program.types.vector(elem)
        } else {
            self.cx.program.types.array(elem, items.len() as u64)
        };
        HirExpr::new(HirExprKind::Sequence(values), ty, span)
    }

    fn check_fill(&mut self, value: &ast::Expr, count: &ast::Expr, expected: Option<TypeId>, span: Span) -> HirExpr {
        let (hint, vector) = self.sequence_hint(expected);
        let value = self.check_expr(value, hint);
        let elem = hint.unwrap_or(value.ty);
        let count = self.index_operand(count);
        let ty = if vector {
            self.cx.program.types.vector(elem)
        } else {
            let len = match count.kind {
                HirExprKind::ConstParam(id) => self.generics.iter().find(|generic| generic.id == id).map(|generic| generic.ty),
                _ => self
                    .cx
                    .evaluate(&count, self.locals.len())
                    .and_then(|value| value.as_int())
                    .and_then(|value| u64::try_from(value).ok())
                    .map(|value| self.cx.program.types.const_value(value)),
            };
            match len {
                Some(len) => self.cx.program.types.intern(TypeKind::Array { elem, len }),
                None => TypeId::ERROR,
            }
        };
        HirExpr::new(
            HirExprKind::Fill {
                value: Box::new(value),
                count: Box::new(count),
            },
            ty,
            span,
        )
    }

    // -----------------------------------------------------------------
    // Control flow
    // -----------------------------------------------------------------

    pub(super) fn check_if(
        &mut self,
        cond: &ast::Expr,
        then_block: &ast::Block,
        else_branch: Option<&ast::Expr>,
        expected: Option<TypeId>,
        stmt: bool,
        span: Span,
    ) -> HirExpr {
        let cond = self.check_expr(cond, Some(TypeId::BOOL));
        let branch_expected = if stmt { Some(TypeId::VOID) } else { expected };
        let before = self.moves.clone();
        let then_branch = self.check_block_expr(then_block, branch_expected);
        let after_then = std::mem::replace(&mut self.moves, before);
        let else_branch = match else_branch {
            Some(branch) => Some(match &branch.kind {
                ExprKind::If {
                    cond,
                    then_block,
                    else_branch,
                } => self.check_if(cond, then_block, else_branch.as_deref(), expected, stmt, branch.span),
                ExprKind::Block(block) => self.check_block_expr(block, branch_expected),
                _ => self.check_expr(branch, branch_expected),
            }),
            None => None,
        };
        let then_diverges = then_branch.ty == TypeId::NEVER;
        let else_diverges = else_branch.as_ref().is_some_and(|branch| branch.ty == TypeId::NEVER);
        let after_else = std::mem::take(&mut self.moves);
        self.moves = match (then_diverges, else_diverges) {
            (true, _) => after_else,
            (false, true) => after_then,
            (false, false) => {
                let mut merged = after_then;
                merged.union(after_else);
                merged
            }
        };
        let ty = match &else_branch {
            None => {
                let wants_value = !stmt && expected.is_some_and(|ty| ty != TypeId::VOID && ty != TypeId::ERROR);
                if wants_value {
                    self.error(
                        Category::Type,
                        "E0311",
                        span,
                        "`if` without `else` cannot produce a value",
                    );
                    TypeId::ERROR
                } else {
                    TypeId::VOID
                }
            }
            Some(_) if then_diverges && else_diverges => TypeId::NEVER,
            Some(_) if stmt => TypeId::VOID,
            Some(branch) => match (expected, self.cx.program.types.join(then_branch.ty, branch.ty)) {
                (Some(expected), _) => expected,
                (None, Some(joined)) => joined,
                (None, None) => {
                    let message = format!(
                        "`if` and `else` have incompatible types: `{}` and `{}`",
                        self.show(then_branch.ty),
                        self.show(branch.ty)
                    );
                    self.error(Category::Type, "E0301", span, message);
                    TypeId::ERROR
                }
            },
        };
        HirExpr::new(
            HirExprKind::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: else_branch.map(Box::new),
            },
            ty,
            span,
        )
    }

    fn check_return(&mut self, value: Option<&ast::Expr>, span: Span) -> HirExpr {
        let Some(ret) = self.ret else {
            self.error(Category::Type, "E0312", span, "`return` outside of a function");
            if let Some(value) = value {
                self.synth(value, None);
            }
            return HirExpr::error(span);
        };
        let value = match value {
            Some(value) => {
                let value = self.check_expr(value, Some(ret));
                self.consume(&value);
                Some(Box::new(value))
            }
            None => {
                if ret != TypeId::VOID {
                    self.mismatch(ret, TypeId::VOID, span);
                }
                None
            }
        };
        HirExpr::new(HirExprKind::Return(value), TypeId::NEVER, span)
    }

    pub(super) fn owner_generic_count(&self, function: &FunctionDef) -> usize {
        function
            .owner
            .map_or(0, |index| self.cx.program.impls[index].generics.len())
    }
}

fn binary(op: BinaryOp, lhs: HirExpr, rhs: HirExpr, ty: TypeId, span: Span) -> HirExpr {
    HirExpr::new(
        HirExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        ty,
        span,
    )
}

#[cfg(test)]
mod tests {
    use crate::const_eval::Limits;
    use crate::diagnostic::Diagnostics;
    use crate::parser::{DEFAULT_MAX_DEPTH, parse_unit};
    use crate::span::FileId;
    use crate::typecheck::check_modules;

    fn codes(source: &str) -> Vec<&'static str> {
        let parsed = parse_unit(FileId(0), source, DEFAULT_MAX_DEPTH);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        let (_, diagnostics): (_, Diagnostics) = check_modules([("main", &parsed.module)], Limits::default());
        diagnostics.iter().filter_map(|d| d.code).collect()
    }

    #[test]
    fn widening_is_implicit_but_narrowing_is_not() {
        assert!(codes("function f(a: i32) -> i64 { a }").is_empty());
        assert_eq!(codes("function f(a: i64) -> i32 { a }"), ["E0301"]);
        assert!(codes("function f(a: i64) -> i32 { a as i32 }").is_empty());
    }

    #[test]
    fn none_needs_a_type() {
        assert_eq!(codes("function main() { let x = none; }"), ["E0303"]);
        assert!(codes("function main() { let x: String? = none; }").is_empty());
    }

    #[test]
    fn argument_counts_are_checked() {
        assert_eq!(
            codes("function add(a: i64, b: i64) -> i64 { a + b }\nfunction main() { add(1); }"),
            ["E0304"]
        );
    }

    #[test]
    fn constructor_labels_are_checked() {
        let decl = "struct Point { x: i64, y: i64 }\n";
        assert!(codes(&format!("{decl}function main() {{ let p = Point(x: 1, y: 2); }}")).is_empty());
        assert_eq!(codes(&format!("{decl}function main() {{ let p = Point(x: 1, z: 2); }}")), ["E0308", "E0308"]);
        assert_eq!(codes(&format!("{decl}function main() {{ let p = Point(x: 1, x: 2, y: 3); }}")), ["E0308"]);
    }

    #[test]
    fn format_holes_must_match_arguments() {
        assert!(codes("function main() { println(\"{} {}\", 1, true); }").is_empty());
        assert_eq!(codes("function main() { println(\"{}\", 1, 2); }"), ["E0313"]);
    }

    #[test]
    fn raw_dereference_needs_unsafe() {
        assert_eq!(codes("function f(p: raw i32) -> i32 { *p }"), ["E0309"]);
        assert!(codes("function f(p: raw i32) -> i32 { unsafe { *p } }").is_empty());
    }

    #[test]
    fn assignment_needs_a_mutable_place() {
        assert_eq!(codes("function main() { let x = 1; x = 2; }"), ["E0361"]);
        assert!(codes("function main() { let mut x = 1; x = 2; x += 3; }").is_empty());
        assert_eq!(
            codes("struct C { n: i64 }\nfunction bump(c: &C) { c.n = 1; }"),
            ["E0361"]
        );
    }

    #[test]
    fn methods_resolve_through_impls() {
        let source = "struct Counter { n: i64 }\n\
                      impl Counter {\n\
                        function get(this) -> i64 { this.n }\n\
                        function bump(mut this) { this.n += 1; }\n\
                      }\n\
                      function main() { let mut c = Counter(n: 0); c.bump(); let v = c.get(); }";
        assert!(codes(source).is_empty());
        let frozen = source.replace("let mut c", "let c");
        assert_eq!(codes(&frozen), ["E0361"]);
    }

    #[test]
    fn builtin_methods_are_typed() {
        assert!(codes("function main() { let mut v: [i32] = []; v.push(1); let n: usize = v.len(); let last: i32? = v.pop(); }").is_empty());
        assert_eq!(codes("function main() { let v: [i32] = []; v.push(1); }"), ["E0361"]);
    }

    #[test]
    fn if_branches_must_agree() {
        assert!(codes("function f(c: bool) -> i64 { if c { 1 } else { 2 } }").is_empty());
        assert_eq!(codes("function f(c: bool) { let x = if c { 1 } else { \"a\" }; }"), ["E0301"]);
    }

    #[test]
    fn break_outside_a_loop_is_rejected() {
        assert_eq!(codes("function main() { break; }"), ["E0312"]);
    }
}
