//! Blocks, statements, loops and `match`.

use crate::ast::{self, ExprKind, Literal, StmtKind};
use crate::const_eval::{ConstValue, EvalError, EvalFailure};
use crate::diagnostic::{Category, Diagnostic};
use crate::hir::{HirArm, HirBlock, HirExpr, HirExprKind, HirPattern, HirStmt};
use crate::name_resolve::SymbolKind;
use crate::span::Span;
use crate::types::{Subst, TypeId, TypeKind};

use super::expr::{BodyChecker, LoopFrame};
use super::items::ItemLookup;
use super::ownership::MoveState;

impl BodyChecker<'_> {
    pub(super) fn check_block_expr(&mut self, block: &ast::Block, expected: Option<TypeId>) -> HirExpr {
        let (hir, ty) = self.check_block(block, expected);
        HirExpr::new(HirExprKind::Block(hir), ty, block.span)
    }

    /// Check a block in a new scope. With `expected` of `void` the tail is
    /// evaluated for its effects only.
    pub(super) fn check_block(&mut self, block: &ast::Block, expected: Option<TypeId>) -> (HirBlock, TypeId) {
        self.scopes.push();
        let mut stmts = Vec::with_capacity(block.stmts.len() + 1);
        let mut diverges = false;
        for stmt in &block.stmts {
            diverges |= self.check_stmt(stmt, &mut stmts);
        }
        let discard = expected == Some(TypeId::VOID);
        let (tail, tail_ty) = match &block.tail {
            Some(tail) if discard => {
                let value = self.check_stmt_expr(tail);
                let ty = value.ty;
                stmts.push(HirStmt::Expr(value));
                (None, ty)
            }
            Some(tail) => {
                let value = self.check_expr(tail, expected);
                let ty = value.ty;
                (Some(Box::new(value)), ty)
            }
            None => (None, TypeId::VOID),
        };
        self.scopes.pop();
        let ty = if tail_ty == TypeId::NEVER || (diverges && block.tail.is_none()) {
            TypeId::NEVER
        } else if discard {
            TypeId::VOID
        } else {
            if block.tail.is_none() {
                if let Some(expected) = expected {
                    if expected != TypeId::VOID {
                        self.mismatch(expected, TypeId::VOID, block.span);
                    }
                }
            }
            expected.unwrap_or(tail_ty)
        };
        (HirBlock { stmts, tail }, ty)
    }

    /// An expression in statement position; `if`, `match` and blocks yield
    /// no value there.
    pub(super) fn check_stmt_expr(&mut self, expr: &ast::Expr) -> HirExpr {
        match &expr.kind {
            ExprKind::If {
                cond,
                then_block,
                else_branch,
            } => self.check_if(cond, then_block, else_branch.as_deref(), None, true, expr.span),
            ExprKind::Match { scrutinee, arms } => self.check_match(scrutinee, arms, None, true, expr.span),
            ExprKind::Block(block) => self.check_block_expr(block, Some(TypeId::VOID)),
            ExprKind::Unsafe(block) => {
                self.unsafe_depth += 1;
                let value = self.check_block_expr(block, Some(TypeId::VOID));
                self.unsafe_depth -= 1;
                value
            }
            _ => self.synth(expr, None),
        }
    }

    /// Check one statement into `out`; returns whether control never
    /// continues past it.
    pub(super) fn check_stmt(&mut self, stmt: &ast::Stmt, out: &mut Vec<HirStmt>) -> bool {
        match &stmt.kind {
            StmtKind::Let {
                name,
                mutable,
                ty,
                init,
            } => {
                let annotated = ty
                    .as_ref()
                    .map(|ty| self.cx.resolve_type(self.unit, &self.generics, ty));
                let value = self.check_expr(init, annotated);
                self.consume(&value);
                let diverges = value.ty == TypeId::NEVER;
                let local_ty = annotated.unwrap_or(value.ty);
                let local = self.declare_local(&name.name, local_ty, *mutable, name.span, SymbolKind::Local);
                out.push(HirStmt::Let { local, init: value });
                diverges
            }
            StmtKind::Expr { expr, .. } => {
                let value = self.check_stmt_expr(expr);
                let diverges = value.ty == TypeId::NEVER;
                out.push(HirStmt::Expr(value));
                diverges
            }
            StmtKind::While { cond, body } => {
                let cond = self.check_expr(cond, Some(TypeId::BOOL));
                let first_inner = self.locals.len();
                let (body, _) = self.check_loop_body(body, first_inner);
                out.push(HirStmt::While { cond, body });
                false
            }
            StmtKind::Loop { body } => {
                let first_inner = self.locals.len();
                let (body, broke) = self.check_loop_body(body, first_inner);
                out.push(HirStmt::Loop { body });
                !broke
            }
            StmtKind::For {
                binding,
                iterable,
                body,
            } => {
                self.check_for(binding, iterable, body, out);
                false
            }
            StmtKind::Defer(inner) => {
                if matches!(inner.kind, StmtKind::Let { .. }) {
                    self.error(
                        Category::Type,
                        "E0307",
                        inner.span,
                        "`defer` takes an expression or a block, not a `let`",
                    );
                    return false;
                }
                let mut deferred = Vec::new();
                self.check_stmt(inner, &mut deferred);
                out.extend(deferred.into_iter().map(|stmt| HirStmt::Defer(Box::new(stmt))));
                false
            }
            StmtKind::Assert(decl) => {
                self.check_comptime_assert(decl);
                false
            }
            StmtKind::ComptimeIf {
                cond,
                then_block,
                else_branch,
            } => self.check_comptime_if(cond, then_block, else_branch.as_deref(), stmt.span, out),
            StmtKind::Error => false,
        }
    }

    /// Check a loop body; returns it with whether a `break` targets it.
    fn check_loop_body(&mut self, body: &ast::Block, first_inner: usize) -> (HirBlock, bool) {
        let before = self.moves.clone();
        self.loops.push(LoopFrame { broke: false });
        let (block, _) = self.check_block(body, Some(TypeId::VOID));
        let broke = self.loops.pop().is_some_and(|frame| frame.broke);
        self.check_loop_moves(&before, first_inner);
        (block, broke)
    }

    fn check_for(&mut self, binding: &ast::Ident, iterable: &ast::Expr, body: &ast::Block, out: &mut Vec<HirStmt>) {
        let first_inner = self.locals.len();
        if let ExprKind::Range { start, end, inclusive } = &iterable.kind {
            let (start, end) = self.range_bounds(start, end);
            let types = &self.cx.program.types;
            let ty = match types.join(start.ty, end.ty) {
                Some(ty) if types.is_integer(ty) || types.contains_error(ty) => ty,
                _ => {
                    let message = format!(
                        "range bounds must be integers of one type, found `{}` and `{}`",
                        types.display(start.ty),
                        types.display(end.ty)
                    );
                    self.error(Category::Type, "E0307", iterable.span, message);
                    TypeId::ERROR
                }
            };
            self.scopes.push();
            let local = self.declare_local(&binding.name, ty, false, binding.span, SymbolKind::Local);
            let (body, _) = self.check_loop_body(body, first_inner);
            self.scopes.pop();
            out.push(HirStmt::ForRange {
                local,
                start,
                end,
                inclusive: *inclusive,
                body,
            });
            return;
        }
        let iterable = self.synth(iterable, None);
        let collection = self.cx.program.types.strip_refs(iterable.ty);
        let elem = match self.cx.program.types.kind(collection) {
            TypeKind::Vector(elem) | TypeKind::Array { elem, .. } => *elem,
            TypeKind::Error | TypeKind::Never => TypeId::ERROR,
            _ => {
                let message = format!("cannot iterate over a value of type `{}`", self.show(collection));
                self.error(Category::Type, "E0307", iterable.span, message);
                TypeId::ERROR
            }
        };
        self.scopes.push();
        let local = self.declare_local(&binding.name, elem, false, binding.span, SymbolKind::Local);
        let (body, _) = self.check_loop_body(body, first_inner);
        self.scopes.pop();
        out.push(HirStmt::ForEach { local, iterable, body });
    }

    /// Range bounds; an unsuffixed literal bound takes the other's type.
    fn range_bounds(&mut self, start: &ast::Expr, end: &ast::Expr) -> (HirExpr, HirExpr) {
        let start_is_literal = matches!(start.kind, ExprKind::Literal(Literal::Int { suffix: None, .. }));
        let end_is_literal = matches!(end.kind, ExprKind::Literal(Literal::Int { suffix: None, .. }));
        if start_is_literal && !end_is_literal {
            let end = self.synth(end, None);
            let start = self.synth(start, Some(end.ty));
            (start, end)
        } else {
            let start = self.synth(start, None);
            let end = self.synth(end, Some(start.ty));
            (start, end)
        }
    }

    pub(super) fn check_comptime_assert(&mut self, decl: &ast::AssertDecl) {
        let cond = self.check_expr(&decl.condition, Some(TypeId::BOOL));
        let message = decl
            .message
            .as_ref()
            .map(|message| self.check_expr(message, Some(TypeId::STRING)));
        let locals = self.locals.len();
        let Some(value) = self.cx.evaluate(&cond, locals) else {
            return;
        };
        if value.as_bool() != Some(false) {
            return;
        }
        let text = match message {
            Some(HirExpr {
                kind: HirExprKind::Str(text),
                ..
            }) => text,
            Some(message) => match self.cx.evaluate(&message, locals) {
                Some(ConstValue::Str(text)) => text,
                Some(other) => other.render(&self.cx.program),
                None => return,
            },
            None => "condition is false".to_string(),
        };
        self.cx.report_eval(EvalFailure {
            error: EvalError::AssertionFailed(text),
            span: decl.condition.span,
        });
    }

    /// `comptime if`: only the branch the condition selects is checked.
    fn check_comptime_if(
        &mut self,
        cond: &ast::Expr,
        then_block: &ast::Block,
        else_branch: Option<&ast::Stmt>,
        span: Span,
        out: &mut Vec<HirStmt>,
    ) -> bool {
        let cond = self.check_expr(cond, Some(TypeId::BOOL));
        let locals = self.locals.len();
        match self.cx.evaluate(&cond, locals).and_then(|value| value.as_bool()) {
            Some(true) => {
                let block = self.check_block_expr(then_block, Some(TypeId::VOID));
                let diverges = block.ty == TypeId::NEVER;
                out.push(HirStmt::Expr(HirExpr::new(block.kind, block.ty, span)));
                diverges
            }
            Some(false) => match else_branch {
                Some(branch) => self.check_stmt(branch, out),
                None => false,
            },
            None => false,
        }
    }

    // -----------------------------------------------------------------
    // Match
    // -----------------------------------------------------------------

    pub(super) fn check_match(
        &mut self,
        scrutinee: &ast::Expr,
        arms: &[ast::MatchArm],
        expected: Option<TypeId>,
        stmt: bool,
        span: Span,
    ) -> HirExpr {
        let scrutinee = self.synth(scrutinee, None);
        let scrutinee_ty = self.cx.program.types.strip_refs(scrutinee.ty);
        let blocks_allowed = stmt || expected == Some(TypeId::VOID);
        let before = self.moves.clone();
        let mut merged: Option<MoveState> = None;
        let mut hir_arms = Vec::with_capacity(arms.len());
        let mut joined: Option<TypeId> = None;
        let mut incompatible = false;
        for arm in arms {
            self.moves = before.clone();
            self.scopes.push();
            let alternatives = arm.patterns.len() > 1;
            let mut patterns = Vec::with_capacity(arm.patterns.len());
            for pattern in &arm.patterns {
                patterns.push(self.check_pattern(pattern, scrutinee_ty, alternatives));
            }
            let body = match &arm.body.kind {
                ExprKind::Block(block) if blocks_allowed => self.check_block_expr(block, Some(TypeId::VOID)),
                ExprKind::Block(block) => {
                    self.cx.emit(
                        Diagnostic::error(
                            Category::Type,
                            "block arms are only allowed when `match` is used as a statement",
                            arm.body.span,
                        )
                        .with_code("E0311")
                        .with_note("write the arm as a single expression"),
                    );
                    self.check_block_expr(block, None);
                    HirExpr::error(arm.body.span)
                }
                _ if stmt => self.check_stmt_expr(&arm.body),
                _ => self.check_expr(&arm.body, expected),
            };
            self.scopes.pop();
            let after = std::mem::replace(&mut self.moves, before.clone());
            if body.ty != TypeId::NEVER {
                merged = Some(match merged {
                    Some(mut state) => {
                        state.union(after);
                        state
                    }
                    None => after,
                });
            }
            if !stmt && expected.is_none() && !incompatible {
                joined = match joined {
                    None => Some(body.ty),
                    Some(previous) => match self.cx.program.types.join(previous, body.ty) {
                        Some(ty) => Some(ty),
                        None => {
                            let message = format!(
                                "`match` arms have incompatible types: `{}` and `{}`",
                                self.show(previous),
                                self.show(body.ty)
                            );
                            self.error(Category::Type, "E0301", arm.body.span, message);
                            incompatible = true;
                            Some(TypeId::ERROR)
                        }
                    },
                };
            }
            hir_arms.push(HirArm { patterns, body });
        }
        self.moves = merged.unwrap_or(before);
        self.check_exhaustive(scrutinee_ty, &hir_arms, span);
        let all_diverge = !hir_arms.is_empty() && hir_arms.iter().all(|arm| arm.body.ty == TypeId::NEVER);
        let ty = if all_diverge {
            TypeId::NEVER
        } else if stmt {
            TypeId::VOID
        } else {
            expected.or(joined).unwrap_or(TypeId::VOID)
        };
        HirExpr::new(
            HirExprKind::Match {
                scrutinee: Box::new(scrutinee),
                arms: hir_arms,
            },
            ty,
            span,
        )
    }

    fn check_pattern(&mut self, pattern: &ast::Pattern, ty: TypeId, alternatives: bool) -> HirPattern {
        let span = pattern.span;
        match &pattern.kind {
            ast::PatternKind::Wildcard => HirPattern::Wildcard,
            ast::PatternKind::Binding(ident) => {
                if let Some(variant) = self.unit_variant_pattern(ident, ty) {
                    return variant;
                }
                if alternatives {
                    self.error(
                        Category::Type,
                        "E0331",
                        ident.span,
                        format!("cannot bind `{}` in a pattern with `|` alternatives", ident.name),
                    );
                    return HirPattern::Wildcard;
                }
                let local = self.declare_local(&ident.name, ty, false, ident.span, SymbolKind::Local);
                HirPattern::Binding(local)
            }
            ast::PatternKind::Literal { literal, negative } => self.literal_pattern(literal, *negative, ty, span),
            ast::PatternKind::Variant { path, fields } => {
                self.variant_pattern(path, fields.as_deref(), ty, alternatives, span)
            }
            ast::PatternKind::Some(inner) => match self.cx.program.types.kind(ty).clone() {
                TypeKind::Optional(inner_ty) => {
                    HirPattern::Some(Box::new(self.check_pattern(inner, inner_ty, alternatives)))
                }
                _ => {
                    self.pattern_mismatch(ty, "an optional", span);
                    HirPattern::Wildcard
                }
            },
            ast::PatternKind::None => match self.cx.program.types.kind(ty) {
                TypeKind::Optional(_) => HirPattern::None,
                _ => {
                    self.pattern_mismatch(ty, "an optional", span);
                    HirPattern::Wildcard
                }
            },
        }
    }

    fn pattern_mismatch(&mut self, ty: TypeId, what: &str, span: Span) {
        if self.cx.program.types.is_absorbing(ty) {
            return;
        }
        let message = format!("mismatched types: expected `{}`, found {what} pattern", self.show(ty));
        self.error(Category::Type, "E0301", span, message);
    }

    /// A bare name naming a payload-free variant of the scrutinee's enum.
    fn unit_variant_pattern(&mut self, ident: &ast::Ident, ty: TypeId) -> Option<HirPattern> {
        let TypeKind::Adt { def, .. } = self.cx.program.types.kind(ty) else {
            return None;
        };
        let def = *def;
        let decl = self.cx.program.enum_def(def)?;
        let index = decl.variant_index(&ident.name)?;
        if !decl.variants[index].payload.is_empty() {
            return None;
        }
        if let Some(symbol) = self.cx.variant_symbols.get(&(def, index)).copied() {
            self.cx.program.symbols.reference(ident.span, symbol);
        }
        Some(HirPattern::Variant {
            def,
            index,
            fields: Vec::new(),
        })
    }

    fn literal_pattern(&mut self, literal: &Literal, negative: bool, ty: TypeId, span: Span) -> HirPattern {
        let types = &self.cx.program.types;
        match literal {
            Literal::Int { value, .. } => {
                let value = if negative { -(*value as i128) } else { *value as i128 };
                match types.int_ty(ty) {
                    Some(int) if !int.fits(value) => {
                        let message = format!("integer literal out of range for `{}`", int.name());
                        self.error(Category::Type, "E0302", span, message);
                    }
                    Some(_) => {}
                    None => self.pattern_mismatch(ty, "an integer", span),
                }
                HirPattern::Int(value)
            }
            Literal::Bool(value) => {
                if ty != TypeId::BOOL {
                    self.pattern_mismatch(ty, "a `bool`", span);
                }
                HirPattern::Bool(*value)
            }
            Literal::Char(value) => {
                if ty != TypeId::CHAR {
                    self.pattern_mismatch(ty, "a `char`", span);
                }
                HirPattern::Char(*value)
            }
            Literal::Str(value) => {
                if ty != TypeId::STRING {
                    self.pattern_mismatch(ty, "a `String`", span);
                }
                HirPattern::Str(value.clone())
            }
            Literal::Float { .. } => {
                self.error(
                    Category::Type,
                    "E0307",
                    span,
                    "floating-point literals cannot be used in patterns",
                );
                HirPattern::Wildcard
            }
        }
    }

    fn variant_pattern(
        &mut self,
        path: &[ast::Ident],
        fields: Option<&[ast::Pattern]>,
        ty: TypeId,
        alternatives: bool,
        span: Span,
    ) -> HirPattern {
        let Some((member, owner)) = path.split_last() else {
            return HirPattern::Wildcard;
        };
        let idents: Vec<&ast::Ident> = owner.iter().collect();
        let def = match self.cx.lookup_item(self.unit, &idents) {
            ItemLookup::Found(def, consumed) if consumed == idents.len() => def,
            ItemLookup::Failed => return HirPattern::Wildcard,
            _ => {
                let name = owner.iter().map(|ident| ident.name.as_str()).collect::<Vec<_>>().join("::");
                self.error(
                    Category::NameResolution,
                    "E0201",
                    span,
                    format!("cannot find enum `{name}` in this scope"),
                );
                return HirPattern::Wildcard;
            }
        };
        let enum_name = self.cx.program.def(def).name.clone();
        let Some(decl) = self.cx.program.enum_def(def).cloned() else {
            let what = self.cx.program.def(def).kind.describe();
            self.error(
                Category::Type,
                "E0206",
                span,
                format!("expected an enum, found {what} `{enum_name}`"),
            );
            return HirPattern::Wildcard;
        };
        let Some(index) = decl.variant_index(&member.name) else {
            self.error(
                Category::NameResolution,
                "E0201",
                member.span,
                format!("no variant `{}` in enum `{enum_name}`", member.name),
            );
            return HirPattern::Wildcard;
        };
        if let Some(symbol) = self.cx.variant_symbols.get(&(def, index)).copied() {
            self.cx.program.symbols.reference(member.span, symbol);
        }
        let args = match self.cx.program.types.kind(ty) {
            TypeKind::Adt { def: scrutinee, args, .. } if *scrutinee == def => args.clone(),
            _ => {
                self.pattern_mismatch(ty, &format!("a `{enum_name}`"), span);
                return HirPattern::Wildcard;
            }
        };
        let subst: Subst = decl.generics.iter().map(|generic| generic.id).zip(args).collect();
        let payload: Vec<TypeId> = decl.variants[index]
            .payload
            .iter()
            .map(|ty| self.cx.program.types.subst(*ty, &subst))
            .collect();
        let fields = fields.unwrap_or(&[]);
        if fields.len() != payload.len() {
            self.error(
                Category::Type,
                "E0304",
                span,
                format!(
                    "variant `{enum_name}::{}` has {} field{} but the pattern has {}",
                    member.name,
                    payload.len(),
                    super::items::plural(payload.len()),
                    fields.len()
                ),
            );
            return HirPattern::Variant {
                def,
                index,
                fields: payload.iter().map(|_| HirPattern::Wildcard).collect(),
            };
        }
        let mut checked = Vec::with_capacity(fields.len());
        for (field, field_ty) in fields.iter().zip(payload) {
            checked.push(self.check_pattern(field, field_ty, alternatives));
        }
        HirPattern::Variant {
            def,
            index,
            fields: checked,
        }
    }

    fn check_exhaustive(&mut self, ty: TypeId, arms: &[HirArm], span: Span) {
        let patterns: Vec<&HirPattern> = arms.iter().flat_map(|arm| &arm.patterns).collect();
        if patterns.iter().any(|pattern| pattern.is_irrefutable()) {
            return;
        }
        let missing: Vec<String> = match self.cx.program.types.kind(ty) {
            TypeKind::Error | TypeKind::Never => return,
            TypeKind::Adt { def, .. } => match self.cx.program.enum_def(*def) {
                Some(decl) => {
                    let enum_name = &self.cx.program.def(*def).name;
                    decl.variants
                        .iter()
                        .enumerate()
                        .filter(|(index, _)| {
                            !patterns.iter().any(|pattern| {
                                matches!(pattern, HirPattern::Variant { index: covered, fields, .. }
                                    if covered == index && fields.iter().all(HirPattern::is_irrefutable))
                            })
                        })
                        .map(|(_, variant)| format!("`{enum_name}::{}`", variant.name))
                        .collect()
                }
                None => vec!["`_`".to_string()],
            },
            TypeKind::Bool => [true, false]
                .into_iter()
                .filter(|value| !patterns.iter().any(|pattern| **pattern == HirPattern::Bool(*value)))
                .map(|value| format!("`{value}`"))
                .collect(),
            TypeKind::Optional(_) => {
                let mut missing = Vec::new();
                let some_covered = patterns
                    .iter()
                    .any(|pattern| matches!(pattern, HirPattern::Some(inner) if inner.is_irrefutable()));
                if !some_covered {
                    missing.push("`some(_)`".to_string());
                }
                if !patterns.iter().any(|pattern| **pattern == HirPattern::None) {
                    missing.push("`none`".to_string());
                }
                missing
            }
            _ => vec!["`_`".to_string()],
        };
        if missing.is_empty() {
            return;
        }
        self.cx.emit(
            Diagnostic::error(
                Category::Type,
                format!("non-exhaustive match: missing {}", missing.join(", ")),
                span,
            )
            .with_code("E0330")
            .with_note("add the missing arms or a `_` arm"),
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::const_eval::Limits;
    use crate::diagnostic::Diagnostics;
    use crate::parser::{DEFAULT_MAX_DEPTH, parse_unit};
    use crate::span::FileId;
    use crate::typecheck::check_modules;

    fn check(source: &str) -> Diagnostics {
        let parsed = parse_unit(FileId(0), source, DEFAULT_MAX_DEPTH);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        check_modules([("main", &parsed.module)], Limits::default()).1
    }

    fn codes(source: &str) -> Vec<&'static str> {
        check(source).iter().filter_map(|d| d.code).collect()
    }

    const COLOR: &str = "enum Color { Red, Green, Blue }\n";

    #[test]
    fn missing_variants_are_named() {
        let diagnostics = check(&format!(
            "{COLOR}function f(c: Color) -> i64 {{ match c {{ Color::Red => 1, Color::Green => 2 }} }}"
        ));
        let messages: Vec<_> = diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, ["non-exhaustive match: missing `Color::Blue`"]);
    }

    #[test]
    fn wildcards_and_alternatives_cover() {
        assert!(
            codes(&format!(
                "{COLOR}function f(c: Color) -> i64 {{ match c {{ Color::Red | Color::Green => 1, _ => 2 }} }}"
            ))
            .is_empty()
        );
        assert!(codes("function f(b: bool) -> i64 { match b { true => 1, false => 0 } }").is_empty());
        assert!(codes("function f(x: i64?) -> i64 { match x { some(v) => v, none => 0 } }").is_empty());
    }

    #[test]
    fn bindings_are_rejected_in_alternatives() {
        assert_eq!(
            codes("function f(x: i64) -> i64 { match x { 1 | y => 0, _ => 1 } }"),
            ["E0331"]
        );
    }

    #[test]
    fn block_arms_need_statement_position() {
        assert_eq!(
            codes("function f(x: i64) -> i64 { let y = match x { 1 => { 2 } _ => 3 }; y }"),
            ["E0311"]
        );
        assert!(codes("function f(x: i64) { match x { 1 => { println(\"one\"); } _ => {} } }").is_empty());
    }

    #[test]
    fn moved_values_cannot_be_used() {
        let diagnostics = check("function take(s: String) {}\nfunction main() { let s = \"a\"; take(s); take(s); }");
        let moved: Vec<_> = diagnostics.iter().collect();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].code, Some("E0320"));
        assert_eq!(moved[0].related.len(), 1);
    }

    #[test]
    fn reassignment_restores_a_moved_value() {
        assert!(
            codes("function take(s: String) {}\nfunction main() { let mut s = \"a\"; take(s); s = \"b\"; take(s); }")
                .is_empty()
        );
    }

    #[test]
    fn moves_inside_loops_are_reported() {
        assert_eq!(
            codes("function take(s: String) {}\nfunction main() { let s = \"a\"; while true { take(s); } }"),
            ["E0321"]
        );
    }

    #[test]
    fn moves_on_one_branch_count_afterwards() {
        assert_eq!(
            codes(
                "function take(s: String) {}\n\
                 function run(c: bool) { let s = \"a\"; if c { take(s); } else { } take(s); }"
            ),
            ["E0320"]
        );
    }

    #[test]
    fn redefinition_in_one_scope_is_an_error_but_shadowing_is_not() {
        assert_eq!(codes("function main() { let x = 1; let x = 2; }"), ["E0203"]);
        assert!(codes("function main() { let x = 1; { let x = 2; } }").is_empty());
    }

    #[test]
    fn comptime_if_checks_only_the_taken_branch() {
        let source = "const DEBUG: bool = false;\n\
                      function main() { comptime if DEBUG { undefined_thing(); } else { println(\"release\"); } }";
        assert!(codes(source).is_empty());
    }

    #[test]
    fn for_loops_bind_their_element() {
        assert!(
            codes("function sum(v: [i64]) -> i64 { let mut total = 0; for x in v { total += x; } total }").is_empty()
        );
        assert!(codes("function count(n: usize) { for i in 0..n { let j: usize = i; } }").is_empty());
        assert_eq!(codes("function f(n: i64) { for c in n { } }"), ["E0307"]);
    }
}
