//! Declaration passes: units, collection, signatures and type resolution.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::ast::{self, ExprKind, FunctionBody, GenericParamKind, ItemKind, Receiver, TypeExprKind};
use crate::const_eval::EvalFailure;
use crate::diagnostic::{Category, Diagnostic};
use crate::hir::{
    Def, DefKind, EnumDef, FieldDef, FunctionDef, GenericDef, GlobalDef, ImplDef, StructDef, TraitDef, TraitMethod,
    UnitId, UnitInfo, VariantDef,
};
use crate::name_resolve::{ModuleLookup, ModuleScope, SymbolDef, SymbolId, SymbolKind, lookup_module};
use crate::span::{FileId, Span};
use crate::types::{self, DefId, TypeId, TypeKind};

use super::expr::BodyChecker;
use super::{BodyState, Checker, PendingFunction, PendingGlobal};

/// Outcome of resolving the leading segments of a path to a declaration.
pub(super) enum ItemLookup {
    /// The declaration and how many segments named it.
    Found(DefId, usize),
    NotFound,
    /// Already reported.
    Failed,
}

pub(super) fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

pub(super) fn path_text(idents: &[&ast::Ident]) -> String {
    idents.iter().map(|ident| ident.name.as_str()).collect::<Vec<_>>().join("::")
}

fn placeholder_function() -> FunctionDef {
    FunctionDef {
        generics: Vec::new(),
        receiver: None,
        self_ty: None,
        param_names: Vec::new(),
        param_types: Vec::new(),
        ret: TypeId::ERROR,
        body: None,
        is_comptime: false,
        is_extern: false,
        owner: None,
    }
}

fn symbol_kind(kind: &DefKind) -> SymbolKind {
    match kind {
        DefKind::Function(_) => SymbolKind::Function,
        DefKind::Struct(def) if def.is_class => SymbolKind::Class,
        DefKind::Struct(_) => SymbolKind::Struct,
        DefKind::Enum(_) => SymbolKind::Enum,
        DefKind::Trait(_) => SymbolKind::Trait,
        DefKind::Const(_) => SymbolKind::Const,
        DefKind::Static(_) => SymbolKind::Static,
    }
}

impl Checker {
    pub(crate) fn add_unit(&mut self, name: &str, file: FileId, is_stdlib: bool) -> UnitId {
        let unit = UnitId(self.program.units.len() as u32);
        self.program.units.push(UnitInfo {
            name: name.to_string(),
            file,
            defs: Vec::new(),
            is_stdlib,
        });
        self.scopes.push(ModuleScope::default());
        self.unit_ids.insert(name.to_string(), unit);
        unit
    }

    pub(crate) fn resolve_imports<'a>(&mut self, unit: UnitId, imports: impl Iterator<Item = &'a ast::ImportDecl>) {
        for import in imports {
            match self.unit_ids.get(&import.module.name).copied() {
                Some(target) if target != unit => {
                    let alias = import.local_name();
                    self.scopes[unit.0 as usize].add_import(&alias.name, target);
                    self.program.symbols.define(SymbolDef {
                        name: alias.name.clone(),
                        kind: SymbolKind::Unit,
                        span: alias.span,
                        def: None,
                        detail: format!("import {}", import.module.name),
                    });
                }
                _ => self.error(
                    Category::NameResolution,
                    "E0204",
                    import.module.span,
                    format!("unresolved import `{}`", import.module.name),
                ),
            }
        }
    }

    /// Check a batch of items of `unit`: collect, resolve signatures, then
    /// check every pending body.
    pub(crate) fn check_items(&mut self, unit: UnitId, items: &[ast::Item]) {
        let defs = self.collect(unit, items);
        let first_impl = self.program.impls.len();
        self.deferred_bounds = Some(Vec::new());

        for (item, def) in items.iter().zip(&defs) {
            let Some(def) = *def else { continue };
            match &item.kind {
                ItemKind::Struct(decl) => self.struct_signature(unit, def, decl),
                ItemKind::Enum(decl) => self.enum_signature(unit, def, decl),
                ItemKind::Trait(decl) => self.trait_signature(unit, def, decl),
                _ => {}
            }
        }
        for (item, def) in items.iter().zip(&defs) {
            match (&item.kind, *def) {
                (ItemKind::Function(decl), Some(def)) => self.function_signature(unit, def, decl, &[], None, None),
                (ItemKind::Struct(decl), Some(def)) => self.inline_methods(unit, def, &decl.methods, item.span),
                (ItemKind::Enum(decl), Some(def)) => self.inline_methods(unit, def, &decl.methods, item.span),
                (ItemKind::Impl(decl), _) => self.impl_block(unit, decl, item.span),
                _ => {}
            }
        }
        // global types may call functions in constant expressions
        for def in defs.iter().flatten() {
            if self.globals.contains_key(def) {
                self.global_type(*def);
            }
        }
        for (item, def) in items.iter().zip(&defs) {
            if let (ItemKind::Enum(decl), Some(def)) = (&item.kind, *def) {
                self.enum_discriminants(unit, def, decl);
            }
        }
        self.flush_deferred_bounds();
        self.check_conformance(first_impl);
        self.check_containment(&defs);

        for def in defs.iter().flatten() {
            if self.globals.contains_key(def) {
                let _ = self.ensure_global(*def);
            }
        }
        for item in items {
            if let ItemKind::Assert(decl) = &item.kind {
                self.check_assert(unit, decl);
            }
        }
        let unit_defs = self.program.units[unit.0 as usize].defs.clone();
        for def in unit_defs {
            if matches!(self.program.def(def).kind, DefKind::Function(_)) {
                self.ensure_function(def);
            }
        }
    }

    fn collect(&mut self, unit: UnitId, items: &[ast::Item]) -> Vec<Option<DefId>> {
        let mut defs = Vec::with_capacity(items.len());
        for item in items {
            let def = match &item.kind {
                ItemKind::Function(decl) => Some(self.declare(unit, &decl.name, DefKind::Function(placeholder_function()))),
                ItemKind::Struct(decl) => {
                    let generics = self.declare_generics(unit, &decl.generics);
                    let kind = DefKind::Struct(StructDef {
                        generics,
                        fields: Vec::new(),
                        is_class: decl.is_class,
                        self_ty: TypeId::ERROR,
                    });
                    let def = self.declare(unit, &decl.name, kind);
                    self.set_self_ty(def);
                    Some(def)
                }
                ItemKind::Enum(decl) => {
                    let generics = self.declare_generics(unit, &decl.generics);
                    let kind = DefKind::Enum(EnumDef {
                        generics,
                        repr: None,
                        variants: Vec::new(),
                        self_ty: TypeId::ERROR,
                    });
                    let def = self.declare(unit, &decl.name, kind);
                    self.set_self_ty(def);
                    Some(def)
                }
                ItemKind::Trait(decl) => Some(self.declare(unit, &decl.name, DefKind::Trait(TraitDef { methods: Vec::new() }))),
                ItemKind::Const(decl) => {
                    let def = self.declare(unit, &decl.name, DefKind::Const(empty_global(false)));
                    self.register_global(def, unit, &decl.ty, &decl.value);
                    Some(def)
                }
                ItemKind::Static(decl) => {
                    let def = self.declare(unit, &decl.name, DefKind::Static(empty_global(decl.mutable)));
                    self.register_global(def, unit, &decl.ty, &decl.value);
                    Some(def)
                }
                ItemKind::Import(_) | ItemKind::Impl(_) | ItemKind::Assert(_) => None,
            };
            defs.push(def);
        }
        trace!(unit = unit.0, declared = defs.iter().flatten().count(), "collected declarations");
        defs
    }

    fn declare(&mut self, unit: UnitId, name: &ast::Ident, kind: DefKind) -> DefId {
        let symbol = symbol_kind(&kind);
        let def = self.program.add_def(Def {
            name: name.name.clone(),
            unit,
            span: name.span,
            kind,
        });
        if let Err(previous) = self.scopes[unit.0 as usize].define(&name.name, def) {
            let previous_span = self.program.def(previous).span;
            self.emit(
                Diagnostic::error(
                    Category::NameResolution,
                    format!("redefinition of `{}`", name.name),
                    name.span,
                )
                .with_code("E0203")
                .with_related(previous_span, "first defined here"),
            );
        }
        self.define_symbol(Some(def), name, symbol, String::new());
        def
    }

    pub(super) fn define_item_symbol(&mut self, def: DefId, name: &ast::Ident) -> SymbolId {
        let kind = symbol_kind(&self.program.def(def).kind);
        self.define_symbol(Some(def), name, kind, String::new())
    }

    pub(super) fn define_symbol(
        &mut self,
        def: Option<DefId>,
        name: &ast::Ident,
        kind: SymbolKind,
        detail: String,
    ) -> SymbolId {
        self.program.symbols.define(SymbolDef {
            name: name.name.clone(),
            kind,
            span: name.span,
            def,
            detail,
        })
    }

    fn set_detail(&mut self, def: DefId, detail: String) {
        if let Some(symbol) = self.program.symbols.symbol_for(def) {
            self.program.symbols.set_detail(symbol, detail);
        }
    }

    fn register_global(&mut self, def: DefId, unit: UnitId, ty: &ast::TypeExpr, value: &ast::Expr) {
        self.globals.insert(
            def,
            PendingGlobal {
                unit,
                ty: Some(Arc::new(ty.clone())),
                value: Arc::new(value.clone()),
                typed: false,
                runtime_init: false,
            },
        );
        self.states.insert(def, BodyState::Pending);
    }

    fn set_self_ty(&mut self, def: DefId) {
        let name = self.program.def(def).name.clone();
        let args: Vec<TypeId> = match &self.program.def(def).kind {
            DefKind::Struct(decl) => decl.generics.iter().map(|generic| generic.ty).collect(),
            DefKind::Enum(decl) => decl.generics.iter().map(|generic| generic.ty).collect(),
            _ => return,
        };
        let ty = self.program.types.adt(def, &name, args);
        match &mut self.program.def_mut(def).kind {
            DefKind::Struct(decl) => decl.self_ty = ty,
            DefKind::Enum(decl) => decl.self_ty = ty,
            _ => {}
        }
        self.set_detail(def, name);
    }

    /// Fresh parameters for a generic list. Bounds are filled in later by
    /// [`Checker::resolve_bounds`]; const parameter types right away.
    fn declare_generics(&mut self, unit: UnitId, params: &[ast::GenericParam]) -> Vec<GenericDef> {
        let mut generics = Vec::with_capacity(params.len());
        for param in params {
            let id = self.program.fresh_param();
            let ty = self.program.types.param(id, &param.name.name);
            let const_ty = match &param.kind {
                GenericParamKind::Type { .. } => None,
                GenericParamKind::Const { ty } => {
                    let ty = self.resolve_type(unit, &[], ty);
                    if ty != TypeId::ERROR && !self.program.types.is_integer(ty) {
                        let shown = self.program.types.display(ty);
                        self.error(
                            Category::Type,
                            "E0301",
                            param.name.span,
                            format!("const parameter `{}` must have an integer type, found `{shown}`", param.name.name),
                        );
                    }
                    Some(ty)
                }
            };
            let detail = match const_ty {
                Some(ty) => format!("const {}: {}", param.name.name, self.program.types.display(ty)),
                None => param.name.name.clone(),
            };
            self.define_symbol(None, &param.name, SymbolKind::GenericParam, detail);
            generics.push(GenericDef {
                id,
                name: param.name.name.clone(),
                ty,
                bounds: Vec::new(),
                const_ty,
                span: param.name.span,
            });
        }
        generics
    }

    fn resolve_bounds(&mut self, unit: UnitId, generics: &mut [GenericDef], start: usize, params: &[ast::GenericParam]) {
        for (offset, param) in params.iter().enumerate() {
            let GenericParamKind::Type { bounds } = &param.kind else {
                continue;
            };
            for bound in bounds {
                if let Some(trait_def) = self.resolve_trait(unit, bound) {
                    generics[start + offset].bounds.push(trait_def);
                }
            }
        }
    }

    fn resolve_trait(&mut self, unit: UnitId, path: &ast::PathType) -> Option<DefId> {
        let idents: Vec<&ast::Ident> = path.segments.iter().collect();
        match self.lookup_item(unit, &idents) {
            ItemLookup::Found(def, consumed) if consumed == idents.len() => {
                let kind = &self.program.def(def).kind;
                if matches!(kind, DefKind::Trait(_)) {
                    if !path.args.is_empty() {
                        self.error(
                            Category::GenericBinding,
                            "E0401",
                            path.span,
                            format!("trait `{}` takes no generic arguments", path_text(&idents)),
                        );
                    }
                    Some(def)
                } else {
                    let what = kind.describe();
                    self.error(
                        Category::NameResolution,
                        "E0206",
                        path.span,
                        format!("expected a trait, found {what} `{}`", path_text(&idents)),
                    );
                    None
                }
            }
            ItemLookup::Failed => None,
            _ => {
                self.error(
                    Category::NameResolution,
                    "E0201",
                    path.span,
                    format!("cannot find trait `{}` in this scope", path_text(&idents)),
                );
                None
            }
        }
    }

    /// Resolve the leading segments of a path: `name`, or `unit::name`
    /// through an import alias.
    pub(super) fn lookup_item(&mut self, unit: UnitId, idents: &[&ast::Ident]) -> ItemLookup {
        let Some(first) = idents.first() else {
            return ItemLookup::NotFound;
        };
        let scope = &self.scopes[unit.0 as usize];
        if idents.len() > 1 && scope.get(&first.name).is_none() {
            if let Some(target) = scope.import(&first.name) {
                let second = idents[1];
                return match self.scopes[target.0 as usize].get(&second.name) {
                    Some(def) => {
                        self.program.symbols.reference_def(second.span, def);
                        ItemLookup::Found(def, 2)
                    }
                    None => {
                        let unit_name = self.program.unit_name(target).to_string();
                        self.error(
                            Category::NameResolution,
                            "E0201",
                            second.span,
                            format!("unit `{unit_name}` has no declaration named `{}`", second.name),
                        );
                        ItemLookup::Failed
                    }
                };
            }
        }
        match lookup_module(&self.scopes, unit, &first.name) {
            ModuleLookup::Found(def) => {
                self.program.symbols.reference_def(first.span, def);
                ItemLookup::Found(def, 1)
            }
            ModuleLookup::NotFound => ItemLookup::NotFound,
            ModuleLookup::Ambiguous(units) => {
                let names: Vec<String> = units
                    .iter()
                    .map(|unit| format!("`{}`", self.program.unit_name(*unit)))
                    .collect();
                let example = format!("{}::{}", self.program.unit_name(units[0]), first.name);
                self.emit(
                    Diagnostic::error(
                        Category::NameResolution,
                        format!("`{}` is ambiguous: it is declared in {}", first.name, names.join(" and ")),
                        first.span,
                    )
                    .with_code("E0202")
                    .with_note(format!("qualify the name, for example `{example}`")),
                );
                ItemLookup::Failed
            }
        }
    }

    pub(super) fn resolve_type(&mut self, unit: UnitId, generics: &[GenericDef], ty: &ast::TypeExpr) -> TypeId {
        match &ty.kind {
            TypeExprKind::Path(path) => self.resolve_path_type(unit, generics, path),
            TypeExprKind::Vector(inner) => {
                let inner = self.resolve_type(unit, generics, inner);
                self.program.types.vector(inner)
            }
            TypeExprKind::Array(elem, len) => {
                let elem = self.resolve_type(unit, generics, elem);
                let len = self.array_len(unit, generics, len);
                if elem == TypeId::ERROR || len == TypeId::ERROR {
                    return TypeId::ERROR;
                }
                self.program.types.intern(TypeKind::Array { elem, len })
            }
            TypeExprKind::Optional(inner) => {
                let inner = self.resolve_type(unit, generics, inner);
                self.program.types.optional(inner)
            }
            TypeExprKind::Tuple(items) => {
                let items = items.iter().map(|item| self.resolve_type(unit, generics, item)).collect();
                self.program.types.tuple(items)
            }
            TypeExprKind::Ref { mutable, inner } => {
                let inner = self.resolve_type(unit, generics, inner);
                self.program.types.reference(*mutable, inner)
            }
            TypeExprKind::Raw(inner) => {
                let inner = self.resolve_type(unit, generics, inner);
                self.program.types.raw(inner)
            }
            TypeExprKind::Function { params, ret } => {
                let params = params.iter().map(|param| self.resolve_type(unit, generics, param)).collect();
                let ret = self.resolve_type(unit, generics, ret);
                self.program.types.function(params, ret)
            }
            TypeExprKind::Const(_) => {
                self.error(
                    Category::Type,
                    "E0206",
                    ty.span,
                    "expected a type, found a constant expression",
                );
                TypeId::ERROR
            }
            TypeExprKind::Error => TypeId::ERROR,
        }
    }

    fn resolve_path_type(&mut self, unit: UnitId, generics: &[GenericDef], path: &ast::PathType) -> TypeId {
        if let [segment] = path.segments.as_slice() {
            if let Some(ty) = types::primitive(&segment.name) {
                if !path.args.is_empty() {
                    self.error(
                        Category::GenericBinding,
                        "E0401",
                        path.span,
                        format!("`{}` takes no generic arguments", segment.name),
                    );
                }
                return ty;
            }
            if let Some(generic) = generics.iter().find(|generic| generic.name == segment.name) {
                if generic.const_ty.is_some() {
                    self.error(
                        Category::Type,
                        "E0206",
                        segment.span,
                        format!("const parameter `{}` used as a type", segment.name),
                    );
                    return TypeId::ERROR;
                }
                if !path.args.is_empty() {
                    self.error(
                        Category::GenericBinding,
                        "E0401",
                        path.span,
                        format!("type parameter `{}` takes no generic arguments", segment.name),
                    );
                }
                return generic.ty;
            }
        }
        let idents: Vec<&ast::Ident> = path.segments.iter().collect();
        let def = match self.lookup_item(unit, &idents) {
            ItemLookup::Found(def, consumed) if consumed == idents.len() => def,
            ItemLookup::Failed => return TypeId::ERROR,
            _ => {
                self.error(
                    Category::NameResolution,
                    "E0201",
                    path.span,
                    format!("cannot find type `{}` in this scope", path_text(&idents)),
                );
                return TypeId::ERROR;
            }
        };
        self.instantiate_type(unit, generics, def, &path.args, path.span)
    }

    /// `Name<args>` for a struct, class or enum declaration.
    pub(super) fn instantiate_type(
        &mut self,
        unit: UnitId,
        generics: &[GenericDef],
        def: DefId,
        args: &[ast::TypeExpr],
        span: Span,
    ) -> TypeId {
        let name = self.program.def(def).name.clone();
        let params = match &self.program.def(def).kind {
            DefKind::Struct(decl) => decl.generics.clone(),
            DefKind::Enum(decl) => decl.generics.clone(),
            kind => {
                let what = kind.describe();
                self.error(
                    Category::Type,
                    "E0206",
                    span,
                    format!("expected a type, found {what} `{name}`"),
                );
                return TypeId::ERROR;
            }
        };
        if args.len() != params.len() {
            self.error(
                Category::GenericBinding,
                "E0401",
                span,
                format!(
                    "`{name}` takes {} generic argument{} but {} {} supplied",
                    params.len(),
                    plural(params.len()),
                    args.len(),
                    if args.len() == 1 { "was" } else { "were" }
                ),
            );
            return TypeId::ERROR;
        }
        let mut resolved = Vec::with_capacity(args.len());
        for (index, (param, arg)) in params.iter().zip(args).enumerate() {
            let ty = self.resolve_generic_arg(unit, generics, arg, param);
            self.check_bounds_at(generics, def, index, ty, arg.span);
            resolved.push(ty);
        }
        self.program.types.adt(def, &name, resolved)
    }

    /// One explicit generic argument for `param`: a type, or a constant
    /// for a const parameter.
    pub(super) fn resolve_generic_arg(
        &mut self,
        unit: UnitId,
        generics: &[GenericDef],
        arg: &ast::TypeExpr,
        param: &GenericDef,
    ) -> TypeId {
        let Some(const_ty) = param.const_ty else {
            if matches!(arg.kind, TypeExprKind::Const(_)) {
                self.error(
                    Category::GenericBinding,
                    "E0401",
                    arg.span,
                    format!("expected a type for `{}`, found a constant", param.name),
                );
                return TypeId::ERROR;
            }
            return self.resolve_type(unit, generics, arg);
        };
        let expr = match &arg.kind {
            TypeExprKind::Const(expr) => expr.as_ref(),
            TypeExprKind::Path(path) if path.segments.len() == 1 && path.args.is_empty() => {
                let ident = &path.segments[0];
                if let Some(generic) = generics.iter().find(|generic| generic.name == ident.name) {
                    if generic.const_ty.is_some() {
                        return generic.ty;
                    }
                    self.error(
                        Category::GenericBinding,
                        "E0401",
                        arg.span,
                        format!("expected a constant for `{}`, found type parameter `{}`", param.name, ident.name),
                    );
                    return TypeId::ERROR;
                }
                return self.named_const_arg(unit, ident, param, arg.span);
            }
            _ => {
                self.error(
                    Category::GenericBinding,
                    "E0401",
                    arg.span,
                    format!("expected a constant for `{}`", param.name),
                );
                return TypeId::ERROR;
            }
        };
        match self.const_int(unit, generics, expr, const_ty) {
            Some(value) => self.const_arg(value, arg.span),
            None => TypeId::ERROR,
        }
    }

    fn named_const_arg(&mut self, unit: UnitId, ident: &ast::Ident, param: &GenericDef, span: Span) -> TypeId {
        let def = match self.lookup_item(unit, &[ident]) {
            ItemLookup::Found(def, _) if matches!(self.program.def(def).kind, DefKind::Const(_)) => def,
            ItemLookup::Failed => return TypeId::ERROR,
            _ => {
                self.error(
                    Category::GenericBinding,
                    "E0401",
                    span,
                    format!("expected a constant for `{}`, found `{}`", param.name, ident.name),
                );
                return TypeId::ERROR;
            }
        };
        match self.ensure_global(def) {
            Ok(value) => match value.as_int() {
                Some(value) => self.const_arg(value, span),
                None => {
                    self.error(
                        Category::GenericBinding,
                        "E0401",
                        span,
                        format!("constant `{}` is not an integer", ident.name),
                    );
                    TypeId::ERROR
                }
            },
            Err(error) => {
                self.report_eval(EvalFailure { error, span });
                TypeId::ERROR
            }
        }
    }

    fn const_arg(&mut self, value: i128, span: Span) -> TypeId {
        match u64::try_from(value) {
            Ok(value) => self.program.types.const_value(value),
            Err(_) => {
                self.error(
                    Category::GenericBinding,
                    "E0401",
                    span,
                    format!("const arguments must not be negative, found {value}"),
                );
                TypeId::ERROR
            }
        }
    }

    fn array_len(&mut self, unit: UnitId, generics: &[GenericDef], len: &ast::Expr) -> TypeId {
        if let ExprKind::Path(path) = &len.kind {
            let segment = &path.segments[0];
            if path.is_single() && segment.generic_args.is_empty() {
                if let Some(generic) = generics.iter().find(|generic| generic.name == segment.ident.name) {
                    if generic.const_ty.is_some() {
                        return generic.ty;
                    }
                    self.error(
                        Category::Type,
                        "E0206",
                        len.span,
                        format!("type parameter `{}` used as an array length", generic.name),
                    );
                    return TypeId::ERROR;
                }
            }
        }
        match self.const_int(unit, generics, len, TypeId::USIZE) {
            Some(value) => self.const_arg(value, len.span),
            None => TypeId::ERROR,
        }
    }

    /// Check `expr` against the integer type `ty` and evaluate it.
    fn const_int(&mut self, unit: UnitId, generics: &[GenericDef], expr: &ast::Expr, ty: TypeId) -> Option<i128> {
        let body = BodyChecker::check_initializer(self, unit, generics, expr, Some(ty));
        if body.expr.ty == TypeId::ERROR {
            return None;
        }
        self.evaluate(&body.expr, body.locals.len())?.as_int()
    }

    /// Declared type of a global, resolving it on first use.
    pub(super) fn global_type(&mut self, def: DefId) -> TypeId {
        let current = self.program.global(def).map_or(TypeId::ERROR, |global| global.ty);
        let Some(pending) = self.globals.get_mut(&def) else {
            return current;
        };
        if pending.typed {
            return current;
        }
        pending.typed = true;
        let unit = pending.unit;
        let Some(ty_expr) = pending.ty.clone() else {
            return current;
        };
        let ty = self.resolve_type(unit, &[], &ty_expr);
        if let DefKind::Const(global) | DefKind::Static(global) = &mut self.program.def_mut(def).kind {
            global.ty = ty;
        }
        let detail = self.program.types.display(ty);
        self.set_detail(def, detail);
        ty
    }

    pub(super) fn function_detail(&self, def: DefId) -> String {
        let Some(function) = self.program.function(def) else {
            return String::new();
        };
        let types = &self.program.types;
        let mut params = Vec::new();
        match function.receiver {
            Some(Receiver::View) => params.push("this".to_string()),
            Some(Receiver::Mutable) => params.push("mut this".to_string()),
            None => {}
        }
        for (name, ty) in function.param_names.iter().zip(&function.param_types) {
            params.push(format!("{name}: {}", types.display(*ty)));
        }
        let generics = if function.generics.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = function.generics.iter().map(|generic| generic.name.as_str()).collect();
            format!("<{}>", names.join(", "))
        };
        format!(
            "function {}{generics}({}) -> {}",
            self.program.def(def).name,
            params.join(", "),
            types.display(function.ret)
        )
    }

    fn function_signature(
        &mut self,
        unit: UnitId,
        def: DefId,
        decl: &ast::FunctionDecl,
        owner_generics: &[GenericDef],
        self_ty: Option<TypeId>,
        owner: Option<usize>,
    ) {
        let mut generics = owner_generics.to_vec();
        let start = generics.len();
        generics.extend(self.declare_generics(unit, &decl.generics));
        self.resolve_bounds(unit, &mut generics, start, &decl.generics);

        let param_types: Vec<TypeId> = decl
            .params
            .iter()
            .map(|param| self.resolve_type(unit, &generics, &param.ty))
            .collect();
        let infer_ret = decl.ret.is_none() && matches!(decl.body, FunctionBody::Expr(_));
        let ret = match &decl.ret {
            Some(ty) => self.resolve_type(unit, &generics, ty),
            None if infer_ret => TypeId::ERROR,
            None => TypeId::VOID,
        };

        let name = &decl.name.name;
        if let (Some((_, span)), None) = (decl.receiver, self_ty) {
            self.error(
                Category::NameResolution,
                "E0205",
                span,
                format!("`{name}` takes `this` but is not a method"),
            );
        }
        let has_body = !matches!(decl.body, FunctionBody::None);
        if decl.is_extern {
            if has_body {
                self.error(Category::Type, "E0314", decl.name.span, format!("extern function `{name}` cannot have a body"));
            }
            if decl.is_comptime {
                self.error(Category::Type, "E0314", decl.name.span, format!("extern function `{name}` cannot be comptime"));
            }
            if !decl.generics.is_empty() {
                self.error(Category::Type, "E0314", decl.name.span, format!("extern function `{name}` cannot be generic"));
            }
        } else if !has_body {
            self.error(Category::Type, "E0314", decl.name.span, format!("function `{name}` has no body"));
        }

        let function = FunctionDef {
            generics,
            receiver: decl.receiver.filter(|_| self_ty.is_some()).map(|(receiver, _)| receiver),
            self_ty,
            param_names: decl.params.iter().map(|param| param.name.name.clone()).collect(),
            param_types,
            ret,
            body: None,
            is_comptime: decl.is_comptime,
            is_extern: decl.is_extern,
            owner,
        };
        self.program.def_mut(def).kind = DefKind::Function(function);
        if has_body && !decl.is_extern {
            self.functions.insert(
                def,
                PendingFunction {
                    unit,
                    decl: Arc::new(decl.clone()),
                    infer_ret,
                },
            );
            self.states.insert(def, BodyState::Pending);
        }
        let detail = self.function_detail(def);
        self.set_detail(def, detail);
    }

    fn impl_block(&mut self, unit: UnitId, decl: &ast::ImplDecl, span: Span) {
        let mut generics = self.declare_generics(unit, &decl.generics);
        self.resolve_bounds(unit, &mut generics, 0, &decl.generics);
        let target = self.resolve_type(unit, &generics, &decl.target);
        let trait_def = decl.trait_ref.as_ref().and_then(|path| self.resolve_trait(unit, path));
        if matches!(self.program.types.kind(target), TypeKind::Param { .. }) {
            self.error(
                Category::Type,
                "E0206",
                decl.target.span,
                "methods cannot be implemented for a bare type parameter",
            );
            return;
        }
        self.add_impl(unit, generics, trait_def, target, &decl.methods, span);
    }

    fn inline_methods(&mut self, unit: UnitId, def: DefId, methods: &[ast::FunctionDecl], span: Span) {
        if methods.is_empty() {
            return;
        }
        let (generics, target) = match &self.program.def(def).kind {
            DefKind::Struct(decl) => (decl.generics.clone(), decl.self_ty),
            DefKind::Enum(decl) => (decl.generics.clone(), decl.self_ty),
            _ => return,
        };
        self.add_impl(unit, generics, None, target, methods, span);
    }

    fn add_impl(
        &mut self,
        unit: UnitId,
        generics: Vec<GenericDef>,
        trait_def: Option<DefId>,
        target: TypeId,
        methods: &[ast::FunctionDecl],
        span: Span,
    ) {
        let index = self.program.impls.len();
        self.program.impls.push(ImplDef {
            unit,
            generics: generics.clone(),
            trait_def,
            target,
            methods: Vec::new(),
            span,
        });
        let mut seen: FxHashMap<&str, Span> = FxHashMap::default();
        let mut defs = Vec::with_capacity(methods.len());
        for method in methods {
            if let Some(previous) = seen.insert(method.name.name.as_str(), method.name.span) {
                self.emit(
                    Diagnostic::error(
                        Category::NameResolution,
                        format!("redefinition of method `{}`", method.name.name),
                        method.name.span,
                    )
                    .with_code("E0203")
                    .with_related(previous, "first defined here"),
                );
            }
            let def = self.program.add_def(Def {
                name: method.name.name.clone(),
                unit,
                span: method.name.span,
                kind: DefKind::Function(placeholder_function()),
            });
            self.define_symbol(Some(def), &method.name, SymbolKind::Method, String::new());
            self.function_signature(unit, def, method, &generics, Some(target), Some(index));
            defs.push(def);
        }
        self.program.impls[index].methods = defs;
    }

    fn struct_signature(&mut self, unit: UnitId, def: DefId, decl: &ast::StructDecl) {
        let Some(mut generics) = self.program.struct_def(def).map(|decl| decl.generics.clone()) else {
            return;
        };
        self.resolve_bounds(unit, &mut generics, 0, &decl.generics);
        let mut fields: Vec<FieldDef> = Vec::with_capacity(decl.fields.len());
        for (index, field) in decl.fields.iter().enumerate() {
            let ty = self.resolve_type(unit, &generics, &field.ty);
            if let Some(previous) = fields.iter().find(|existing| existing.name == field.name.name) {
                let previous = previous.span;
                self.emit(
                    Diagnostic::error(
                        Category::NameResolution,
                        format!("redefinition of field `{}`", field.name.name),
                        field.name.span,
                    )
                    .with_code("E0203")
                    .with_related(previous, "first declared here"),
                );
            }
            let detail = format!("{}: {}", field.name.name, self.program.types.display(ty));
            let symbol = self.define_symbol(None, &field.name, SymbolKind::Field, detail);
            self.field_symbols.insert((def, index), symbol);
            fields.push(FieldDef {
                name: field.name.name.clone(),
                ty,
                span: field.name.span,
            });
        }
        if let DefKind::Struct(target) = &mut self.program.def_mut(def).kind {
            target.generics = generics;
            target.fields = fields;
        }
    }

    fn enum_signature(&mut self, unit: UnitId, def: DefId, decl: &ast::EnumDecl) {
        let Some(mut generics) = self.program.enum_def(def).map(|decl| decl.generics.clone()) else {
            return;
        };
        self.resolve_bounds(unit, &mut generics, 0, &decl.generics);
        let repr = decl.repr.as_ref().and_then(|repr| {
            let ty = self.resolve_type(unit, &[], repr);
            let int = self.program.types.int_ty(ty);
            if int.is_none() && ty != TypeId::ERROR {
                let shown = self.program.types.display(ty);
                self.error(
                    Category::Type,
                    "E0301",
                    repr.span,
                    format!("an enum representation must be an integer type, found `{shown}`"),
                );
            }
            int
        });
        let enum_name = decl.name.name.clone();
        let mut variants: Vec<VariantDef> = Vec::with_capacity(decl.variants.len());
        for (index, variant) in decl.variants.iter().enumerate() {
            let payload: Vec<TypeId> = variant
                .payload
                .iter()
                .map(|ty| self.resolve_type(unit, &generics, ty))
                .collect();
            if let Some(previous) = variants.iter().find(|existing| existing.name == variant.name.name) {
                let previous = previous.span;
                self.emit(
                    Diagnostic::error(
                        Category::NameResolution,
                        format!("redefinition of variant `{}`", variant.name.name),
                        variant.name.span,
                    )
                    .with_code("E0203")
                    .with_related(previous, "first declared here"),
                );
            }
            if repr.is_some() && !payload.is_empty() {
                self.error(
                    Category::Type,
                    "E0315",
                    variant.span,
                    format!(
                        "enum `{enum_name}` has an integer representation but variant `{}` carries data",
                        variant.name.name
                    ),
                );
            }
            let symbol = self.define_symbol(
                None,
                &variant.name,
                SymbolKind::Variant,
                format!("{enum_name}::{}", variant.name.name),
            );
            self.variant_symbols.insert((def, index), symbol);
            variants.push(VariantDef {
                name: variant.name.name.clone(),
                payload,
                discriminant: None,
                span: variant.name.span,
            });
        }
        if let DefKind::Enum(target) = &mut self.program.def_mut(def).kind {
            target.generics = generics;
            target.repr = repr;
            target.variants = variants;
        }
    }

    /// Evaluate the discriminants of a C-like enum: explicit values, or one
    /// past the previous variant starting from zero.
    fn enum_discriminants(&mut self, unit: UnitId, def: DefId, decl: &ast::EnumDecl) {
        let Some(enum_def) = self.program.enum_def(def) else {
            return;
        };
        if !enum_def.is_c_like() {
            for variant in &decl.variants {
                if let Some(value) = &variant.discriminant {
                    self.error(
                        Category::Type,
                        "E0315",
                        value.span,
                        "only enums without payloads or generics can have explicit discriminants",
                    );
                }
            }
            return;
        }
        let repr = enum_def.repr_ty();
        let mut next: i128 = 0;
        let mut seen: FxHashMap<i128, (String, Span)> = FxHashMap::default();
        let mut values = Vec::with_capacity(decl.variants.len());
        for variant in &decl.variants {
            let value = match &variant.discriminant {
                Some(expr) => self.const_int(unit, &[], expr, repr.type_id()),
                None => Some(next),
            };
            let Some(value) = value else {
                values.push(None);
                next += 1;
                continue;
            };
            if !repr.fits(value) {
                self.error(
                    Category::Type,
                    "E0302",
                    variant.name.span,
                    format!("discriminant {value} of `{}` does not fit in `{}`", variant.name.name, repr.name()),
                );
            }
            if let Some((other, span)) = seen.get(&value) {
                let message = format!(
                    "discriminant {value} of `{}` is already used by `{other}`",
                    variant.name.name
                );
                let span_other = *span;
                self.emit(
                    Diagnostic::error(Category::Type, message, variant.name.span)
                        .with_code("E0351")
                        .with_related(span_other, "first used here"),
                );
            } else {
                seen.insert(value, (variant.name.name.clone(), variant.name.span));
            }
            values.push(Some(value));
            next = value + 1;
        }
        if let DefKind::Enum(target) = &mut self.program.def_mut(def).kind {
            for (variant, value) in target.variants.iter_mut().zip(values) {
                variant.discriminant = value;
            }
        }
    }

    fn trait_signature(&mut self, unit: UnitId, def: DefId, decl: &ast::TraitDecl) {
        let mut methods: Vec<TraitMethod> = Vec::with_capacity(decl.methods.len());
        for method in &decl.methods {
            let name = &method.name.name;
            if !method.generics.is_empty() {
                self.error(
                    Category::GenericBinding,
                    "E0401",
                    method.name.span,
                    format!("trait method `{name}` cannot declare generic parameters"),
                );
            }
            if !matches!(method.body, FunctionBody::None) {
                self.emit(
                    Diagnostic::error(Category::Type, format!("trait method `{name}` cannot have a body"), method.name.span)
                        .with_code("E0314")
                        .with_note("implement it in an `impl` block"),
                );
            }
            if let Some(previous) = methods.iter().find(|existing| &existing.name == name) {
                let previous = previous.span;
                self.emit(
                    Diagnostic::error(Category::NameResolution, format!("redefinition of method `{name}`"), method.name.span)
                        .with_code("E0203")
                        .with_related(previous, "first declared here"),
                );
            }
            let params: Vec<TypeId> = method.params.iter().map(|param| self.resolve_type(unit, &[], &param.ty)).collect();
            let ret = match &method.ret {
                Some(ty) => self.resolve_type(unit, &[], ty),
                None => TypeId::VOID,
            };
            let detail = format!(
                "function {name}({}) -> {}",
                params.iter().map(|ty| self.program.types.display(*ty)).collect::<Vec<_>>().join(", "),
                self.program.types.display(ret)
            );
            self.define_symbol(None, &method.name, SymbolKind::Method, detail);
            methods.push(TraitMethod {
                name: name.clone(),
                receiver: method.receiver.map(|(receiver, _)| receiver),
                params,
                ret,
                span: method.name.span,
            });
        }
        if let DefKind::Trait(target) = &mut self.program.def_mut(def).kind {
            target.methods = methods;
        }
    }

    /// Structs and enums may not contain themselves by value.
    fn check_containment(&mut self, defs: &[Option<DefId>]) {
        for def in defs.iter().flatten().copied() {
            let Some(members) = self.by_value_members(def) else {
                continue;
            };
            let mut visiting = FxHashSet::default();
            visiting.insert(def);
            if !members.iter().any(|member| self.contains_by_value(*member, def, &mut visiting)) {
                continue;
            }
            let name = self.program.def(def).name.clone();
            let note = if self.program.enum_def(def).is_some() {
                "store the recursive payload in a vector".to_string()
            } else {
                format!("store the recursive field in a vector or declare `{name}` as a class")
            };
            let span = self.program.def(def).span;
            self.emit(
                Diagnostic::error(Category::Type, format!("recursive type `{name}` has infinite size"), span)
                    .with_code("E0350")
                    .with_note(note),
            );
        }
    }

    fn by_value_members(&self, def: DefId) -> Option<Vec<TypeId>> {
        match &self.program.def(def).kind {
            DefKind::Struct(decl) if !decl.is_class => Some(decl.fields.iter().map(|field| field.ty).collect()),
            DefKind::Enum(decl) => Some(decl.variants.iter().flat_map(|v| v.payload.iter().copied()).collect()),
            _ => None,
        }
    }

    fn contains_by_value(&self, ty: TypeId, target: DefId, visiting: &mut FxHashSet<DefId>) -> bool {
        match self.program.types.kind(ty) {
            TypeKind::Adt { def, .. } => {
                if *def == target {
                    return true;
                }
                if !visiting.insert(*def) {
                    return false;
                }
                self.by_value_members(*def)
                    .is_some_and(|members| members.iter().any(|member| self.contains_by_value(*member, target, visiting)))
            }
            TypeKind::Optional(inner) | TypeKind::Array { elem: inner, .. } => {
                self.contains_by_value(*inner, target, visiting)
            }
            TypeKind::Tuple(items) => items.iter().any(|item| self.contains_by_value(*item, target, visiting)),
            _ => false,
        }
    }

    fn check_assert(&mut self, unit: UnitId, decl: &ast::AssertDecl) {
        let mut checker = BodyChecker::new(self, unit, Vec::new(), None);
        checker.check_comptime_assert(decl);
    }
}

fn empty_global(mutable: bool) -> GlobalDef {
    GlobalDef {
        ty: TypeId::ERROR,
        mutable,
        init: None,
        value: None,
    }
}

#[cfg(test)]
mod tests {
    use crate::const_eval::Limits;
    use crate::diagnostic::Diagnostics;
    use crate::hir::Program;
    use crate::parser::{DEFAULT_MAX_DEPTH, parse_unit};
    use crate::span::FileId;
    use crate::typecheck::check_modules;

    fn check(source: &str) -> (Program, Diagnostics) {
        let parsed = parse_unit(FileId(0), source, DEFAULT_MAX_DEPTH);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        check_modules([("main", &parsed.module)], Limits::default())
    }

    fn codes(diagnostics: &Diagnostics) -> Vec<&'static str> {
        diagnostics.iter().filter_map(|d| d.code).collect()
    }

    #[test]
    fn duplicate_declarations_point_at_the_first() {
        let (_, diagnostics) = check("function f() {}\nfunction f() {}");
        assert_eq!(codes(&diagnostics), ["E0203"]);
        let diagnostic = diagnostics.iter().next().expect("one diagnostic");
        assert_eq!(diagnostic.related.len(), 1);
    }

    #[test]
    fn implicit_discriminants_count_up() {
        let (program, diagnostics) = check("enum Level: u8 { Low, Mid = 5, High }");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let level = program.defs.iter().find(|def| def.name == "Level").expect("enum");
        let crate::hir::DefKind::Enum(decl) = &level.kind else {
            panic!("enum expected");
        };
        let values: Vec<_> = decl.variants.iter().map(|v| v.discriminant).collect();
        assert_eq!(values, [Some(0), Some(5), Some(6)]);
    }

    #[test]
    fn duplicate_discriminants_are_rejected() {
        let (_, diagnostics) = check("enum Flag { A = 1, B = 1 }");
        assert_eq!(codes(&diagnostics), ["E0351"]);
    }

    #[test]
    fn recursive_structs_need_indirection() {
        let (_, diagnostics) = check("struct Node { value: i32, next: Node? }");
        assert_eq!(codes(&diagnostics), ["E0350"]);
        let (_, diagnostics) = check("struct Node { value: i32, next: [Node] }");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let (_, diagnostics) = check("class Node { value: i32, next: Node? }");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn generic_argument_counts_are_checked() {
        let (_, diagnostics) = check("struct Pair<A, B> { a: A, b: B }\nstatic P: Pair<i32>? = none;");
        let diagnostic = diagnostics.iter().next().expect("a diagnostic");
        assert_eq!(diagnostic.code, Some("E0401"));
        assert_eq!(diagnostic.category, crate::diagnostic::Category::GenericBinding);
    }

    #[test]
    fn unknown_types_are_reported() {
        let (_, diagnostics) = check("function f(x: Missing) {}");
        assert_eq!(codes(&diagnostics), ["E0201"]);
    }
}
