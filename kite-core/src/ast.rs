//! Untyped syntax tree produced by the parser.
//!
//! Every node carries a [`NodeId`] unique within its unit and a [`Span`].
//! Nodes own their children and never point back at their parents; upward
//! navigation goes through a [`ParentMap`] built on demand.

use rustc_hash::FxHashMap;

use crate::lexer::NumberSuffix;
use crate::span::{FileId, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// One parsed unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub file: FileId,
    pub items: Vec<Item>,
    pub span: Span,
}

impl Module {
    pub fn imports(&self) -> impl Iterator<Item = &ImportDecl> {
        self.items.iter().filter_map(|item| match &item.kind {
            ItemKind::Import(import) => Some(import),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: NodeId,
    pub kind: ItemKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Import(ImportDecl),
    Function(FunctionDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Trait(TraitDecl),
    Impl(ImplDecl),
    Const(ConstDecl),
    Static(StaticDecl),
    Assert(AssertDecl),
}

impl ItemKind {
    /// The name a declaration introduces into module scope, if any.
    pub fn declared_name(&self) -> Option<&Ident> {
        match self {
            ItemKind::Function(function) => Some(&function.name),
            ItemKind::Struct(decl) => Some(&decl.name),
            ItemKind::Enum(decl) => Some(&decl.name),
            ItemKind::Trait(decl) => Some(&decl.name),
            ItemKind::Const(decl) => Some(&decl.name),
            ItemKind::Static(decl) => Some(&decl.name),
            ItemKind::Import(_) | ItemKind::Impl(_) | ItemKind::Assert(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub module: Ident,
    pub alias: Option<Ident>,
}

impl ImportDecl {
    /// Name under which the imported unit can be qualified.
    pub fn local_name(&self) -> &Ident {
        self.alias.as_ref().unwrap_or(&self.module)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericParam {
    pub id: NodeId,
    pub name: Ident,
    pub kind: GenericParamKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenericParamKind {
    Type { bounds: Vec<PathType> },
    Const { ty: TypeExpr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    /// `this`
    View,
    /// `mut this`
    Mutable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub id: NodeId,
    pub name: Ident,
    pub mutable: bool,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Block(Block),
    /// `=> expr;`
    Expr(Expr),
    /// Trait requirements and `extern` declarations.
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub id: NodeId,
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub receiver: Option<(Receiver, Span)>,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub body: FunctionBody,
    pub is_comptime: bool,
    pub is_extern: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub id: NodeId,
    pub name: Ident,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FunctionDecl>,
    /// `class` declarations are reference counted.
    pub is_class: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantDecl {
    pub id: NodeId,
    pub name: Ident,
    pub payload: Vec<TypeExpr>,
    pub discriminant: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub repr: Option<TypeExpr>,
    pub variants: Vec<VariantDecl>,
    pub methods: Vec<FunctionDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraitDecl {
    pub name: Ident,
    pub methods: Vec<FunctionDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImplDecl {
    pub generics: Vec<GenericParam>,
    pub trait_ref: Option<PathType>,
    pub target: TypeExpr,
    pub methods: Vec<FunctionDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstDecl {
    pub name: Ident,
    pub ty: TypeExpr,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticDecl {
    pub name: Ident,
    pub mutable: bool,
    pub ty: TypeExpr,
    pub value: Expr,
}

/// `comptime assert(condition, "message")`
#[derive(Debug, Clone, PartialEq)]
pub struct AssertDecl {
    pub condition: Expr,
    pub message: Option<Expr>,
}

// ---------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub id: NodeId,
    pub kind: TypeExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathType {
    pub segments: Vec<Ident>,
    /// Generic arguments of the last segment.
    pub args: Vec<TypeExpr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExprKind {
    Path(PathType),
    /// `[T]`
    Vector(Box<TypeExpr>),
    /// `[T; N]`
    Array(Box<TypeExpr>, Box<Expr>),
    /// `T?`
    Optional(Box<TypeExpr>),
    /// `(A, B)`; the empty tuple is `void`.
    Tuple(Vec<TypeExpr>),
    Ref { mutable: bool, inner: Box<TypeExpr> },
    Raw(Box<TypeExpr>),
    Function { params: Vec<TypeExpr>, ret: Box<TypeExpr> },
    /// A constant generic argument such as the `4` in `Buffer<4>`.
    Const(Box<Expr>),
    Error,
}

// ---------------------------------------------------------------------
// Statements and expressions
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: NodeId,
    pub stmts: Vec<Stmt>,
    /// Trailing expression without a semicolon; the value of the block.
    pub tail: Option<Box<Expr>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub id: NodeId,
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Let {
        name: Ident,
        mutable: bool,
        ty: Option<TypeExpr>,
        init: Expr,
    },
    /// An expression statement. Block-like expressions may omit the `;`.
    Expr { expr: Expr, semi: bool },
    While { cond: Expr, body: Block },
    Loop { body: Block },
    For { binding: Ident, iterable: Expr, body: Block },
    Defer(Box<Stmt>),
    Assert(AssertDecl),
    ComptimeIf {
        cond: Expr,
        then_block: Block,
        else_branch: Option<Box<Stmt>>,
    },
    /// Leftover of a statement that failed to parse.
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    Ref,
    RefMut,
    Deref,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::Ref => "&",
            UnaryOp::RefMut => "&mut",
            UnaryOp::Deref => "*",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }

    pub fn is_bitwise(self) -> bool {
        matches!(self, BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int { value: u64, suffix: Option<NumberSuffix> },
    Float { value: f64, suffix: Option<NumberSuffix> },
    Str(String),
    Char(char),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub ident: Ident,
    /// Turbofish arguments: `name::<T>`.
    pub generic_args: Vec<TypeExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub segments: Vec<PathSegment>,
    pub span: Span,
}

impl PathExpr {
    pub fn last(&self) -> &PathSegment {
        // the parser never produces an empty path
        &self.segments[self.segments.len() - 1]
    }

    pub fn is_single(&self) -> bool {
        self.segments.len() == 1 && self.segments[0].generic_args.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub label: Option<Ident>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    pub id: NodeId,
    /// Alternatives separated by `|`.
    pub patterns: Vec<Pattern>,
    pub body: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub id: NodeId,
    pub kind: PatternKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    /// `_` or `else`
    Wildcard,
    Binding(Ident),
    Literal { literal: Literal, negative: bool },
    /// `Enum::Variant` or `Enum::Variant(p, ..)`
    Variant {
        path: Vec<Ident>,
        fields: Option<Vec<Pattern>>,
    },
    Some(Box<Pattern>),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    None,
    Some(Box<Expr>),
    This,
    Path(PathExpr),
    Paren(Box<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `=` when `op` is `None`, otherwise a compound assignment.
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        inclusive: bool,
    },
    Cast {
        expr: Box<Expr>,
        ty: TypeExpr,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Arg>,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: Ident,
        generic_args: Vec<TypeExpr>,
        args: Vec<Arg>,
    },
    Field {
        base: Box<Expr>,
        name: Ident,
    },
    TupleIndex {
        base: Box<Expr>,
        index: u32,
        index_span: Span,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// Postfix `!`.
    Unwrap(Box<Expr>),
    Tuple(Vec<Expr>),
    Vector(Vec<Expr>),
    /// `[value; count]`
    Fill {
        value: Box<Expr>,
        count: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_block: Block,
        /// Either a `Block` expression or a nested `If`.
        else_branch: Option<Box<Expr>>,
    },
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    Block(Block),
    Unsafe(Block),
    Return(Option<Box<Expr>>),
    Break,
    Continue,
    /// Placeholder for an expression that failed to parse.
    Error,
}

impl ExprKind {
    /// Block-like expressions end a statement without a `;`.
    pub fn is_block_like(&self) -> bool {
        matches!(
            self,
            ExprKind::If { .. } | ExprKind::Match { .. } | ExprKind::Block(_) | ExprKind::Unsafe(_)
        )
    }
}

// ---------------------------------------------------------------------
// Parent index
// ---------------------------------------------------------------------

/// Maps every node to its enclosing node. Items map to [`NodeId::ROOT`].
#[derive(Debug, Default, Clone)]
pub struct ParentMap {
    parents: FxHashMap<NodeId, NodeId>,
}

impl ParentMap {
    pub fn build(module: &Module) -> ParentMap {
        let mut map = ParentMap::default();
        for item in &module.items {
            map.link(item.id, NodeId::ROOT);
            map.item(item);
        }
        map
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(&id).copied()
    }

    /// Parent chain from `id` (exclusive) up to the root (inclusive).
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            chain.push(parent);
            if parent == NodeId::ROOT {
                break;
            }
            current = parent;
        }
        chain
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    fn link(&mut self, child: NodeId, parent: NodeId) {
        self.parents.insert(child, parent);
    }

    fn item(&mut self, item: &Item) {
        let id = item.id;
        match &item.kind {
            ItemKind::Import(_) => {}
            ItemKind::Function(function) => self.function(function, id),
            ItemKind::Struct(decl) => {
                self.generics(&decl.generics, id);
                for field in &decl.fields {
                    self.link(field.id, id);
                    self.ty(&field.ty, field.id);
                }
                for method in &decl.methods {
                    self.function(method, id);
                }
            }
            ItemKind::Enum(decl) => {
                self.generics(&decl.generics, id);
                if let Some(repr) = &decl.repr {
                    self.ty(repr, id);
                }
                for variant in &decl.variants {
                    self.link(variant.id, id);
                    for ty in &variant.payload {
                        self.ty(ty, variant.id);
                    }
                    if let Some(value) = &variant.discriminant {
                        self.expr(value, variant.id);
                    }
                }
                for method in &decl.methods {
                    self.function(method, id);
                }
            }
            ItemKind::Trait(decl) => {
                for method in &decl.methods {
                    self.function(method, id);
                }
            }
            ItemKind::Impl(decl) => {
                self.generics(&decl.generics, id);
                self.ty(&decl.target, id);
                if let Some(trait_ref) = &decl.trait_ref {
                    for arg in &trait_ref.args {
                        self.ty(arg, id);
                    }
                }
                for method in &decl.methods {
                    self.function(method, id);
                }
            }
            ItemKind::Const(decl) => {
                self.ty(&decl.ty, id);
                self.expr(&decl.value, id);
            }
            ItemKind::Static(decl) => {
                self.ty(&decl.ty, id);
                self.expr(&decl.value, id);
            }
            ItemKind::Assert(decl) => self.assert(decl, id),
        }
    }

    fn assert(&mut self, decl: &AssertDecl, parent: NodeId) {
        self.expr(&decl.condition, parent);
        if let Some(message) = &decl.message {
            self.expr(message, parent);
        }
    }

    fn generics(&mut self, generics: &[GenericParam], parent: NodeId) {
        for param in generics {
            self.link(param.id, parent);
            match &param.kind {
                GenericParamKind::Type { bounds } => {
                    for bound in bounds {
                        for arg in &bound.args {
                            self.ty(arg, param.id);
                        }
                    }
                }
                GenericParamKind::Const { ty } => self.ty(ty, param.id),
            }
        }
    }

    fn function(&mut self, function: &FunctionDecl, parent: NodeId) {
        self.link(function.id, parent);
        let id = function.id;
        self.generics(&function.generics, id);
        for param in &function.params {
            self.link(param.id, id);
            self.ty(&param.ty, param.id);
        }
        if let Some(ret) = &function.ret {
            self.ty(ret, id);
        }
        match &function.body {
            FunctionBody::Block(block) => self.block(block, id),
            FunctionBody::Expr(expr) => self.expr(expr, id),
            FunctionBody::None => {}
        }
    }

    fn ty(&mut self, ty: &TypeExpr, parent: NodeId) {
        self.link(ty.id, parent);
        let id = ty.id;
        match &ty.kind {
            TypeExprKind::Path(path) => {
                for arg in &path.args {
                    self.ty(arg, id);
                }
            }
            TypeExprKind::Vector(inner) | TypeExprKind::Optional(inner) | TypeExprKind::Raw(inner) => {
                self.ty(inner, id)
            }
            TypeExprKind::Ref { inner, .. } => self.ty(inner, id),
            TypeExprKind::Array(inner, len) => {
                self.ty(inner, id);
                self.expr(len, id);
            }
            TypeExprKind::Tuple(items) => {
                for item in items {
                    self.ty(item, id);
                }
            }
            TypeExprKind::Function { params, ret } => {
                for param in params {
                    self.ty(param, id);
                }
                self.ty(ret, id);
            }
            TypeExprKind::Const(expr) => self.expr(expr, id),
            TypeExprKind::Error => {}
        }
    }

    fn block(&mut self, block: &Block, parent: NodeId) {
        self.link(block.id, parent);
        for stmt in &block.stmts {
            self.stmt(stmt, block.id);
        }
        if let Some(tail) = &block.tail {
            self.expr(tail, block.id);
        }
    }

    fn stmt(&mut self, stmt: &Stmt, parent: NodeId) {
        self.link(stmt.id, parent);
        let id = stmt.id;
        match &stmt.kind {
            StmtKind::Let { ty, init, .. } => {
                if let Some(ty) = ty {
                    self.ty(ty, id);
                }
                self.expr(init, id);
            }
            StmtKind::Expr { expr, .. } => self.expr(expr, id),
            StmtKind::While { cond, body } => {
                self.expr(cond, id);
                self.block(body, id);
            }
            StmtKind::Loop { body } => self.block(body, id),
            StmtKind::For { iterable, body, .. } => {
                self.expr(iterable, id);
                self.block(body, id);
            }
            StmtKind::Defer(inner) => self.stmt(inner, id),
            StmtKind::Assert(decl) => self.assert(decl, id),
            StmtKind::ComptimeIf {
                cond,
                then_block,
                else_branch,
            } => {
                self.expr(cond, id);
                self.block(then_block, id);
                if let Some(else_branch) = else_branch {
                    self.stmt(else_branch, id);
                }
            }
            StmtKind::Error => {}
        }
    }

    fn pattern(&mut self, pattern: &Pattern, parent: NodeId) {
        self.link(pattern.id, parent);
        match &pattern.kind {
            PatternKind::Variant {
                fields: Some(fields), ..
            } => {
                for field in fields {
                    self.pattern(field, pattern.id);
                }
            }
            PatternKind::Some(inner) => self.pattern(inner, pattern.id),
            _ => {}
        }
    }

    fn expr(&mut self, expr: &Expr, parent: NodeId) {
        self.link(expr.id, parent);
        let id = expr.id;
        match &expr.kind {
            ExprKind::Literal(_)
            | ExprKind::None
            | ExprKind::This
            | ExprKind::Break
            | ExprKind::Continue
            | ExprKind::Error => {}
            ExprKind::Path(path) => {
                for segment in &path.segments {
                    for arg in &segment.generic_args {
                        self.ty(arg, id);
                    }
                }
            }
            ExprKind::Some(inner) | ExprKind::Paren(inner) | ExprKind::Unwrap(inner) => {
                self.expr(inner, id)
            }
            ExprKind::Unary { operand, .. } => self.expr(operand, id),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.expr(lhs, id);
                self.expr(rhs, id);
            }
            ExprKind::Assign { target, value, .. } => {
                self.expr(target, id);
                self.expr(value, id);
            }
            ExprKind::Range { start, end, .. } => {
                self.expr(start, id);
                self.expr(end, id);
            }
            ExprKind::Cast { expr: inner, ty } => {
                self.expr(inner, id);
                self.ty(ty, id);
            }
            ExprKind::Call { callee, args } => {
                self.expr(callee, id);
                for arg in args {
                    self.expr(&arg.value, id);
                }
            }
            ExprKind::MethodCall {
                receiver,
                generic_args,
                args,
                ..
            } => {
                self.expr(receiver, id);
                for arg in generic_args {
                    self.ty(arg, id);
                }
                for arg in args {
                    self.expr(&arg.value, id);
                }
            }
            ExprKind::Field { base, .. } | ExprKind::TupleIndex { base, .. } => self.expr(base, id),
            ExprKind::Index { base, index } => {
                self.expr(base, id);
                self.expr(index, id);
            }
            ExprKind::Tuple(items) | ExprKind::Vector(items) => {
                for item in items {
                    self.expr(item, id);
                }
            }
            ExprKind::Fill { value, count } => {
                self.expr(value, id);
                self.expr(count, id);
            }
            ExprKind::If {
                cond,
                then_block,
                else_branch,
            } => {
                self.expr(cond, id);
                self.block(then_block, id);
                if let Some(else_branch) = else_branch {
                    self.expr(else_branch, id);
                }
            }
            ExprKind::Match { scrutinee, arms } => {
                self.expr(scrutinee, id);
                for arm in arms {
                    self.link(arm.id, id);
                    for pattern in &arm.patterns {
                        self.pattern(pattern, arm.id);
                    }
                    self.expr(&arm.body, arm.id);
                }
            }
            ExprKind::Block(block) | ExprKind::Unsafe(block) => self.block(block, id),
            ExprKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value, id);
                }
            }
        }
    }
}
