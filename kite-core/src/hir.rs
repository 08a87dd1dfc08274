//! Typed, resolved program representation.
//!
//! The checker produces one [`Program`] for a whole compilation: every
//! declaration of every unit lives in [`Program::defs`] and is referred to
//! by [`DefId`]. Expressions carry their interned [`TypeId`], and every
//! name use has been resolved to a local, a declaration or a builtin.
//! Codegen and the compile-time interpreter read this tree and never
//! re-derive anything from the AST.

use std::sync::Arc;

use crate::ast::{BinaryOp, Receiver, UnaryOp};
use crate::builtins::{BuiltinFn, BuiltinMethod};
use crate::const_eval::ConstValue;
use crate::name_resolve::SymbolIndex;
use crate::span::{FileId, Span};
use crate::types::{DefId, IntTy, ParamId, Subst, TypeId, TypeInterner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub u32);

#[derive(Debug, Clone)]
pub struct Program {
    pub types: TypeInterner,
    pub defs: Vec<Def>,
    pub units: Vec<UnitInfo>,
    pub impls: Vec<ImplDef>,
    pub symbols: SymbolIndex,
    next_param: u32,
}

impl Default for Program {
    fn default() -> Self {
        Program {
            types: TypeInterner::new(),
            defs: Vec::new(),
            units: Vec::new(),
            impls: Vec::new(),
            symbols: SymbolIndex::default(),
            next_param: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitInfo {
    pub name: String,
    pub file: FileId,
    /// Top-level declarations in source order.
    pub defs: Vec<DefId>,
    pub is_stdlib: bool,
}

#[derive(Debug, Clone)]
pub struct Def {
    pub name: String,
    pub unit: UnitId,
    pub span: Span,
    pub kind: DefKind,
}

#[derive(Debug, Clone)]
pub enum DefKind {
    Function(FunctionDef),
    Struct(StructDef),
    Enum(EnumDef),
    Trait(TraitDef),
    Const(GlobalDef),
    Static(GlobalDef),
}

impl DefKind {
    pub fn describe(&self) -> &'static str {
        match self {
            DefKind::Function(_) => "function",
            DefKind::Struct(def) if def.is_class => "class",
            DefKind::Struct(_) => "struct",
            DefKind::Enum(_) => "enum",
            DefKind::Trait(_) => "trait",
            DefKind::Const(_) => "constant",
            DefKind::Static(_) => "static",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericDef {
    pub id: ParamId,
    pub name: String,
    /// The interned `Param` type standing for this parameter.
    pub ty: TypeId,
    /// Trait bounds of a type parameter.
    pub bounds: Vec<DefId>,
    /// Value type of a const parameter.
    pub const_ty: Option<TypeId>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    pub name: String,
    pub ty: TypeId,
    pub mutable: bool,
    pub span: Span,
}

/// A checked function body with its local variable table.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub locals: Vec<Local>,
    /// `this` followed by the declared parameters.
    pub params: Vec<LocalId>,
    pub expr: HirExpr,
}

impl Body {
    pub fn local(&self, id: LocalId) -> &Local {
        &self.locals[id.0 as usize]
    }
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    /// Generics of the owning type or impl first, then the function's own.
    pub generics: Vec<GenericDef>,
    pub receiver: Option<Receiver>,
    /// Value type `this` refers to, for methods.
    pub self_ty: Option<TypeId>,
    pub param_names: Vec<String>,
    pub param_types: Vec<TypeId>,
    pub ret: TypeId,
    pub body: Option<Arc<Body>>,
    pub is_comptime: bool,
    pub is_extern: bool,
    /// The impl block this method belongs to.
    pub owner: Option<usize>,
}

impl FunctionDef {
    pub fn is_generic(&self) -> bool {
        !self.generics.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub generics: Vec<GenericDef>,
    pub fields: Vec<FieldDef>,
    pub is_class: bool,
    /// The type with its own parameters as arguments.
    pub self_ty: TypeId,
}

impl StructDef {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantDef {
    pub name: String,
    pub payload: Vec<TypeId>,
    /// Evaluated discriminant of a C-like enum.
    pub discriminant: Option<i128>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub generics: Vec<GenericDef>,
    /// Underlying integer type of a C-like enum.
    pub repr: Option<IntTy>,
    pub variants: Vec<VariantDef>,
    pub self_ty: TypeId,
}

impl EnumDef {
    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|variant| variant.name == name)
    }

    /// Every variant is payload-free.
    pub fn is_c_like(&self) -> bool {
        self.generics.is_empty() && self.variants.iter().all(|variant| variant.payload.is_empty())
    }

    /// Integer type of the discriminants; `i32` unless declared.
    pub fn repr_ty(&self) -> IntTy {
        self.repr.unwrap_or(IntTy::I32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraitMethod {
    pub name: String,
    pub receiver: Option<Receiver>,
    pub params: Vec<TypeId>,
    pub ret: TypeId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TraitDef {
    pub methods: Vec<TraitMethod>,
}

/// A `const` or `static` declaration.
#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub ty: TypeId,
    pub mutable: bool,
    pub init: Option<Arc<Body>>,
    pub value: Option<ConstValue>,
}

/// An `impl` block, or the implicit inherent impl holding the methods
/// written inside a struct or enum body.
#[derive(Debug, Clone)]
pub struct ImplDef {
    pub unit: UnitId,
    pub generics: Vec<GenericDef>,
    pub trait_def: Option<DefId>,
    pub target: TypeId,
    pub methods: Vec<DefId>,
    pub span: Span,
}

// ---------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct HirExpr {
    pub kind: HirExprKind,
    pub ty: TypeId,
    pub span: Span,
}

impl HirExpr {
    pub fn new(kind: HirExprKind, ty: TypeId, span: Span) -> Self {
        HirExpr { kind, ty, span }
    }

    pub fn error(span: Span) -> Self {
        HirExpr::new(HirExprKind::Error, TypeId::ERROR, span)
    }

    pub fn void(span: Span) -> Self {
        HirExpr::new(HirExprKind::Void, TypeId::VOID, span)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// Free function, static method or method; a method's receiver is the
    /// first argument. `generic_args` follow [`FunctionDef::generics`].
    Function { def: DefId, generic_args: Vec<TypeId> },
    /// Trait method called on a value whose type is a bounded parameter;
    /// resolved to a concrete method during monomorphization.
    TraitMethod { trait_def: DefId, method: String, self_ty: TypeId },
    Builtin(BuiltinFn),
    /// Receiver is the first argument.
    BuiltinMethod(BuiltinMethod),
    /// Call through a function value.
    Indirect(Box<HirExpr>),
    /// Struct or class construction; arguments in field order.
    Constructor { def: DefId },
    Variant { def: DefId, index: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum HirExprKind {
    Int(i128),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Void,
    None,
    Some(Box<HirExpr>),
    Local(LocalId),
    /// A `const` or `static`.
    Global(DefId),
    /// Value of a const generic parameter.
    ConstParam(ParamId),
    /// A function used as a value.
    FunctionRef { def: DefId, generic_args: Vec<TypeId> },
    Unary {
        op: UnaryOp,
        operand: Box<HirExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<HirExpr>,
        rhs: Box<HirExpr>,
    },
    Assign {
        op: Option<BinaryOp>,
        target: Box<HirExpr>,
        value: Box<HirExpr>,
    },
    Range {
        start: Box<HirExpr>,
        end: Box<HirExpr>,
        inclusive: bool,
    },
    Cast(Box<HirExpr>),
    Call {
        callee: Callee,
        args: Vec<HirExpr>,
    },
    Field {
        base: Box<HirExpr>,
        index: usize,
        name: String,
    },
    TupleIndex {
        base: Box<HirExpr>,
        index: usize,
    },
    Index {
        base: Box<HirExpr>,
        index: Box<HirExpr>,
    },
    /// `base[a..b]` on a string or sequence.
    Slice {
        base: Box<HirExpr>,
        start: Box<HirExpr>,
        end: Box<HirExpr>,
        inclusive: bool,
    },
    Unwrap(Box<HirExpr>),
    Tuple(Vec<HirExpr>),
    /// Vector or array literal, decided by the expression type.
    Sequence(Vec<HirExpr>),
    Fill {
        value: Box<HirExpr>,
        count: Box<HirExpr>,
    },
    If {
        cond: Box<HirExpr>,
        then_branch: Box<HirExpr>,
        else_branch: Option<Box<HirExpr>>,
    },
    Match {
        scrutinee: Box<HirExpr>,
        arms: Vec<HirArm>,
    },
    Block(HirBlock),
    Return(Option<Box<HirExpr>>),
    Break,
    Continue,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirBlock {
    pub stmts: Vec<HirStmt>,
    pub tail: Option<Box<HirExpr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirArm {
    pub patterns: Vec<HirPattern>,
    pub body: HirExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HirPattern {
    Wildcard,
    Binding(LocalId),
    Int(i128),
    Bool(bool),
    Char(char),
    Str(String),
    Variant {
        def: DefId,
        index: usize,
        fields: Vec<HirPattern>,
    },
    Some(Box<HirPattern>),
    None,
}

impl HirPattern {
    /// Matches every value of its type.
    pub fn is_irrefutable(&self) -> bool {
        matches!(self, HirPattern::Wildcard | HirPattern::Binding(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HirStmt {
    Let {
        local: LocalId,
        init: HirExpr,
    },
    Expr(HirExpr),
    While {
        cond: HirExpr,
        body: HirBlock,
    },
    Loop {
        body: HirBlock,
    },
    /// `for i in a..b`
    ForRange {
        local: LocalId,
        start: HirExpr,
        end: HirExpr,
        inclusive: bool,
        body: HirBlock,
    },
    /// `for x in collection`
    ForEach {
        local: LocalId,
        iterable: HirExpr,
        body: HirBlock,
    },
    Defer(Box<HirStmt>),
}

// ---------------------------------------------------------------------
// Program queries
// ---------------------------------------------------------------------

impl Program {
    pub fn def(&self, id: DefId) -> &Def {
        &self.defs[id.0 as usize]
    }

    pub fn def_mut(&mut self, id: DefId) -> &mut Def {
        &mut self.defs[id.0 as usize]
    }

    pub fn add_def(&mut self, def: Def) -> DefId {
        let id = DefId(self.defs.len() as u32);
        if let Some(unit) = self.units.get_mut(def.unit.0 as usize) {
            unit.defs.push(id);
        }
        self.defs.push(def);
        id
    }

    pub fn fresh_param(&mut self) -> ParamId {
        let id = ParamId(self.next_param);
        self.next_param += 1;
        id
    }

    pub fn function(&self, id: DefId) -> Option<&FunctionDef> {
        match &self.def(id).kind {
            DefKind::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn struct_def(&self, id: DefId) -> Option<&StructDef> {
        match &self.def(id).kind {
            DefKind::Struct(def) => Some(def),
            _ => None,
        }
    }

    pub fn enum_def(&self, id: DefId) -> Option<&EnumDef> {
        match &self.def(id).kind {
            DefKind::Enum(def) => Some(def),
            _ => None,
        }
    }

    pub fn trait_def(&self, id: DefId) -> Option<&TraitDef> {
        match &self.def(id).kind {
            DefKind::Trait(def) => Some(def),
            _ => None,
        }
    }

    pub fn global(&self, id: DefId) -> Option<&GlobalDef> {
        match &self.def(id).kind {
            DefKind::Const(def) | DefKind::Static(def) => Some(def),
            _ => None,
        }
    }

    pub fn unit_name(&self, unit: UnitId) -> &str {
        self.units
            .get(unit.0 as usize)
            .map(|info| info.name.as_str())
            .unwrap_or("<unknown>")
    }

    /// Find a method named `name` applicable to a value of type `ty`.
    ///
    /// Returns the method and the bindings of its impl's generics. Inherent
    /// methods win over trait methods.
    pub fn find_method(&self, ty: TypeId, name: &str) -> Option<(DefId, Subst)> {
        let mut trait_match = None;
        for imp in &self.impls {
            let mut subst = Subst::default();
            if !self.types.match_types(imp.target, ty, &mut subst) || imp.target == TypeId::ERROR {
                continue;
            }
            // `T?` patterns also accept bare values; methods need exact targets
            if self.types.optional_inner(imp.target).is_some() && self.types.optional_inner(ty).is_none() {
                continue;
            }
            let Some(method) = imp.methods.iter().copied().find(|m| self.def(*m).name == name) else {
                continue;
            };
            if imp.trait_def.is_none() {
                return Some((method, subst));
            }
            trait_match.get_or_insert((method, subst));
        }
        trait_match
    }

    /// Whether `ty` has an `impl Trait for ..` block.
    pub fn implements(&self, ty: TypeId, trait_def: DefId) -> bool {
        self.impls.iter().any(|imp| {
            imp.trait_def == Some(trait_def) && self.types.match_types(imp.target, ty, &mut Subst::default())
        })
    }

    /// Default generic arguments of a function: its own parameters.
    pub fn identity_args(&self, function: &FunctionDef) -> Vec<TypeId> {
        function.generics.iter().map(|generic| generic.ty).collect()
    }
}
