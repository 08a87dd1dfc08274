//! Interned type representation shared by the checker, the compile-time
//! interpreter and codegen.
//!
//! Every type is a [`TypeId`] handle into a [`TypeInterner`]. Structurally
//! equal types always receive the same handle, so two instantiations of a
//! generic declaration with equal argument lists are the same type and
//! comparing types is an integer comparison.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::lexer::NumberSuffix;

/// Index of a declaration in [`Program::defs`](crate::hir::Program).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DefId(pub u32);

impl fmt::Display for DefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "def#{}", self.0)
    }
}

/// A generic parameter, unique across the whole program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    pub const ERROR: TypeId = TypeId(0);
    pub const VOID: TypeId = TypeId(1);
    pub const NEVER: TypeId = TypeId(2);
    pub const BOOL: TypeId = TypeId(3);
    pub const CHAR: TypeId = TypeId(4);
    pub const STRING: TypeId = TypeId(5);
    pub const I8: TypeId = TypeId(6);
    pub const I16: TypeId = TypeId(7);
    pub const I32: TypeId = TypeId(8);
    pub const I64: TypeId = TypeId(9);
    pub const U8: TypeId = TypeId(10);
    pub const U16: TypeId = TypeId(11);
    pub const U32: TypeId = TypeId(12);
    pub const U64: TypeId = TypeId(13);
    pub const USIZE: TypeId = TypeId(14);
    pub const F32: TypeId = TypeId(15);
    pub const F64: TypeId = TypeId(16);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntTy {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Usize,
}

impl IntTy {
    pub const ALL: [IntTy; 9] = [
        IntTy::I8,
        IntTy::I16,
        IntTy::I32,
        IntTy::I64,
        IntTy::U8,
        IntTy::U16,
        IntTy::U32,
        IntTy::U64,
        IntTy::Usize,
    ];

    pub fn name(self) -> &'static str {
        match self {
            IntTy::I8 => "i8",
            IntTy::I16 => "i16",
            IntTy::I32 => "i32",
            IntTy::I64 => "i64",
            IntTy::U8 => "u8",
            IntTy::U16 => "u16",
            IntTy::U32 => "u32",
            IntTy::U64 => "u64",
            IntTy::Usize => "usize",
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntTy::I8 | IntTy::I16 | IntTy::I32 | IntTy::I64)
    }

    pub fn bits(self) -> u32 {
        match self {
            IntTy::I8 | IntTy::U8 => 8,
            IntTy::I16 | IntTy::U16 => 16,
            IntTy::I32 | IntTy::U32 => 32,
            IntTy::I64 | IntTy::U64 | IntTy::Usize => 64,
        }
    }

    pub fn min(self) -> i128 {
        if self.is_signed() {
            -(1i128 << (self.bits() - 1))
        } else {
            0
        }
    }

    pub fn max(self) -> i128 {
        if self.is_signed() {
            (1i128 << (self.bits() - 1)) - 1
        } else {
            (1i128 << self.bits()) - 1
        }
    }

    pub fn fits(self, value: i128) -> bool {
        self.min() <= value && value <= self.max()
    }

    /// Reduce `value` modulo the width of this type, the way a C++ cast does.
    pub fn wrap(self, value: i128) -> i128 {
        let bits = self.bits();
        let mask = (1i128 << bits) - 1;
        let low = value & mask;
        if self.is_signed() && low > self.max() {
            low - (1i128 << bits)
        } else {
            low
        }
    }

    /// Lossless implicit conversion from `self` to `to`.
    pub fn widens_to(self, to: IntTy) -> bool {
        match (self.is_signed(), to.is_signed()) {
            (true, true) | (false, false) | (false, true) => self.bits() < to.bits(),
            (true, false) => false,
        }
    }

    pub fn type_id(self) -> TypeId {
        match self {
            IntTy::I8 => TypeId::I8,
            IntTy::I16 => TypeId::I16,
            IntTy::I32 => TypeId::I32,
            IntTy::I64 => TypeId::I64,
            IntTy::U8 => TypeId::U8,
            IntTy::U16 => TypeId::U16,
            IntTy::U32 => TypeId::U32,
            IntTy::U64 => TypeId::U64,
            IntTy::Usize => TypeId::USIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FloatTy {
    F32,
    F64,
}

impl FloatTy {
    pub fn name(self) -> &'static str {
        match self {
            FloatTy::F32 => "f32",
            FloatTy::F64 => "f64",
        }
    }
}

/// The type a numeric literal suffix names.
pub fn suffix_type(suffix: NumberSuffix) -> TypeId {
    match suffix {
        NumberSuffix::I8 => TypeId::I8,
        NumberSuffix::I16 => TypeId::I16,
        NumberSuffix::I32 => TypeId::I32,
        NumberSuffix::I64 => TypeId::I64,
        NumberSuffix::U8 => TypeId::U8,
        NumberSuffix::U16 => TypeId::U16,
        NumberSuffix::U32 => TypeId::U32,
        NumberSuffix::U64 => TypeId::U64,
        NumberSuffix::Usize => TypeId::USIZE,
        NumberSuffix::F32 => TypeId::F32,
        NumberSuffix::F64 => TypeId::F64,
    }
}

/// Builtin type names usable without any declaration.
pub fn primitive(name: &str) -> Option<TypeId> {
    let ty = match name {
        "void" => TypeId::VOID,
        "never" => TypeId::NEVER,
        "bool" => TypeId::BOOL,
        "char" => TypeId::CHAR,
        "String" => TypeId::STRING,
        "i8" => TypeId::I8,
        "i16" => TypeId::I16,
        "i32" => TypeId::I32,
        "i64" => TypeId::I64,
        "u8" => TypeId::U8,
        "u16" => TypeId::U16,
        "u32" => TypeId::U32,
        "u64" => TypeId::U64,
        "usize" => TypeId::USIZE,
        "f32" => TypeId::F32,
        "f64" => TypeId::F64,
        _ => return None,
    };
    Some(ty)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Placeholder after a reported error; compatible with everything.
    Error,
    Void,
    /// Type of `return`, `break`, `continue` and `panic(..)`.
    Never,
    Bool,
    Char,
    String,
    Int(IntTy),
    Float(FloatTy),
    /// Struct, class or enum, possibly instantiated.
    Adt {
        def: DefId,
        name: String,
        args: Vec<TypeId>,
    },
    Param {
        id: ParamId,
        name: String,
    },
    /// Value of a const generic argument.
    Const(u64),
    Vector(TypeId),
    /// `len` is a [`TypeKind::Const`] or a const [`TypeKind::Param`].
    Array {
        elem: TypeId,
        len: TypeId,
    },
    Optional(TypeId),
    Tuple(Vec<TypeId>),
    Ref {
        mutable: bool,
        inner: TypeId,
    },
    Raw(TypeId),
    Function {
        params: Vec<TypeId>,
        ret: TypeId,
    },
}

/// Bindings from generic parameters to types.
pub type Subst = FxHashMap<ParamId, TypeId>;

#[derive(Debug, Clone)]
pub struct TypeInterner {
    cache: FxHashMap<TypeKind, TypeId>,
    types: Vec<TypeKind>,
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeInterner {
    pub fn new() -> Self {
        let mut interner = TypeInterner {
            cache: FxHashMap::default(),
            types: Vec::new(),
        };
        // order must match the TypeId constants
        for kind in [
            TypeKind::Error,
            TypeKind::Void,
            TypeKind::Never,
            TypeKind::Bool,
            TypeKind::Char,
            TypeKind::String,
        ] {
            interner.intern(kind);
        }
        for int in IntTy::ALL {
            interner.intern(TypeKind::Int(int));
        }
        interner.intern(TypeKind::Float(FloatTy::F32));
        interner.intern(TypeKind::Float(FloatTy::F64));
        debug_assert_eq!(interner.intern(TypeKind::Float(FloatTy::F64)), TypeId::F64);
        interner
    }

    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.cache.get(&kind) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(kind.clone());
        self.cache.insert(kind, id);
        id
    }

    /// Look up an already interned type without inserting it.
    pub fn lookup(&self, kind: &TypeKind) -> Option<TypeId> {
        self.cache.get(kind).copied()
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.types[id.index()]
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    // -----------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------

    pub fn vector(&mut self, elem: TypeId) -> TypeId {
        self.intern(TypeKind::Vector(elem))
    }

    pub fn optional(&mut self, inner: TypeId) -> TypeId {
        self.intern(TypeKind::Optional(inner))
    }

    pub fn tuple(&mut self, items: Vec<TypeId>) -> TypeId {
        if items.is_empty() {
            return TypeId::VOID;
        }
        self.intern(TypeKind::Tuple(items))
    }

    pub fn const_value(&mut self, value: u64) -> TypeId {
        self.intern(TypeKind::Const(value))
    }

    pub fn array(&mut self, elem: TypeId, len: u64) -> TypeId {
        let len = self.const_value(len);
        self.intern(TypeKind::Array { elem, len })
    }

    pub fn reference(&mut self, mutable: bool, inner: TypeId) -> TypeId {
        self.intern(TypeKind::Ref { mutable, inner })
    }

    pub fn raw(&mut self, inner: TypeId) -> TypeId {
        self.intern(TypeKind::Raw(inner))
    }

    pub fn function(&mut self, params: Vec<TypeId>, ret: TypeId) -> TypeId {
        self.intern(TypeKind::Function { params, ret })
    }

    pub fn adt(&mut self, def: DefId, name: &str, args: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Adt {
            def,
            name: name.to_string(),
            args,
        })
    }

    pub fn param(&mut self, id: ParamId, name: &str) -> TypeId {
        self.intern(TypeKind::Param {
            id,
            name: name.to_string(),
        })
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    pub fn int_ty(&self, id: TypeId) -> Option<IntTy> {
        match self.kind(id) {
            TypeKind::Int(int) => Some(*int),
            _ => None,
        }
    }

    pub fn float_ty(&self, id: TypeId) -> Option<FloatTy> {
        match self.kind(id) {
            TypeKind::Float(float) => Some(*float),
            _ => None,
        }
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        self.int_ty(id).is_some()
    }

    pub fn is_numeric(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Int(_) | TypeKind::Float(_))
    }

    /// Error or never: the type of something already diagnosed or diverging.
    pub fn is_absorbing(&self, id: TypeId) -> bool {
        id == TypeId::ERROR || id == TypeId::NEVER
    }

    pub fn optional_inner(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Optional(inner) => Some(*inner),
            _ => None,
        }
    }

    /// The value type behind any number of borrowed views.
    pub fn strip_refs(&self, mut id: TypeId) -> TypeId {
        while let TypeKind::Ref { inner, .. } = self.kind(id) {
            id = *inner;
        }
        id
    }

    pub fn contains_error(&self, id: TypeId) -> bool {
        self.any(id, &|kind| matches!(kind, TypeKind::Error))
    }

    /// Whether `id` mentions a generic parameter anywhere.
    pub fn has_params(&self, id: TypeId) -> bool {
        self.any(id, &|kind| matches!(kind, TypeKind::Param { .. }))
    }

    /// Whether `id` mentions any of `params`.
    pub fn mentions_params(&self, id: TypeId, params: &[ParamId]) -> bool {
        !params.is_empty()
            && self.any(id, &|kind| matches!(kind, TypeKind::Param { id, .. } if params.contains(id)))
    }

    fn any(&self, id: TypeId, predicate: &dyn Fn(&TypeKind) -> bool) -> bool {
        let kind = self.kind(id);
        if predicate(kind) {
            return true;
        }
        match kind {
            TypeKind::Adt { args, .. } => args.iter().any(|arg| self.any(*arg, predicate)),
            TypeKind::Vector(inner) | TypeKind::Optional(inner) | TypeKind::Raw(inner) => {
                self.any(*inner, predicate)
            }
            TypeKind::Ref { inner, .. } => self.any(*inner, predicate),
            TypeKind::Array { elem, len } => self.any(*elem, predicate) || self.any(*len, predicate),
            TypeKind::Tuple(items) => items.iter().any(|item| self.any(*item, predicate)),
            TypeKind::Function { params, ret } => {
                params.iter().any(|param| self.any(*param, predicate)) || self.any(*ret, predicate)
            }
            _ => false,
        }
    }

    // -----------------------------------------------------------------
    // Substitution and matching
    // -----------------------------------------------------------------

    /// Replace bound parameters structurally. Unbound parameters stay.
    pub fn subst(&mut self, id: TypeId, subst: &Subst) -> TypeId {
        if subst.is_empty() {
            return id;
        }
        let kind = self.kind(id).clone();
        match kind {
            TypeKind::Param { id: param, .. } => subst.get(&param).copied().unwrap_or(id),
            TypeKind::Adt { def, name, args } => {
                let args = args.iter().map(|arg| self.subst(*arg, subst)).collect();
                self.intern(TypeKind::Adt { def, name, args })
            }
            TypeKind::Vector(inner) => {
                let inner = self.subst(inner, subst);
                self.vector(inner)
            }
            TypeKind::Optional(inner) => {
                let inner = self.subst(inner, subst);
                self.optional(inner)
            }
            TypeKind::Raw(inner) => {
                let inner = self.subst(inner, subst);
                self.raw(inner)
            }
            TypeKind::Ref { mutable, inner } => {
                let inner = self.subst(inner, subst);
                self.reference(mutable, inner)
            }
            TypeKind::Array { elem, len } => {
                let elem = self.subst(elem, subst);
                let len = self.subst(len, subst);
                self.intern(TypeKind::Array { elem, len })
            }
            TypeKind::Tuple(items) => {
                let items = items.iter().map(|item| self.subst(*item, subst)).collect();
                self.tuple(items)
            }
            TypeKind::Function { params, ret } => {
                let params = params.iter().map(|param| self.subst(*param, subst)).collect();
                let ret = self.subst(ret, subst);
                self.function(params, ret)
            }
            _ => id,
        }
    }

    /// Bind the parameters of `pattern` so that it matches `actual`.
    ///
    /// Parameters already bound must agree. A `T?` pattern also accepts a
    /// bare `T` and a `&T` pattern accepts `&mut T`, mirroring coercion.
    pub fn match_types(&self, pattern: TypeId, actual: TypeId, subst: &mut Subst) -> bool {
        if pattern == actual || self.is_absorbing(actual) || pattern == TypeId::ERROR {
            return true;
        }
        match (self.kind(pattern), self.kind(actual)) {
            (TypeKind::Param { id, .. }, _) => match subst.get(id) {
                Some(&bound) => bound == actual || self.can_coerce(actual, bound),
                None => {
                    subst.insert(*id, actual);
                    true
                }
            },
            (
                TypeKind::Adt { def: a, args: a_args, .. },
                TypeKind::Adt { def: b, args: b_args, .. },
            ) => {
                a == b
                    && a_args.len() == b_args.len()
                    && a_args.iter().zip(b_args).all(|(p, t)| self.match_types(*p, *t, subst))
            }
            (TypeKind::Vector(p), TypeKind::Vector(t)) => self.match_types(*p, *t, subst),
            (TypeKind::Optional(p), TypeKind::Optional(t)) => self.match_types(*p, *t, subst),
            (TypeKind::Optional(p), _) => self.match_types(*p, actual, subst),
            (TypeKind::Raw(p), TypeKind::Raw(t)) => self.match_types(*p, *t, subst),
            (
                TypeKind::Ref { mutable: pm, inner: p },
                TypeKind::Ref { mutable: tm, inner: t },
            ) => (*tm || !*pm) && self.match_types(*p, *t, subst),
            (
                TypeKind::Array { elem: pe, len: pl },
                TypeKind::Array { elem: te, len: tl },
            ) => self.match_types(*pe, *te, subst) && self.match_types(*pl, *tl, subst),
            (TypeKind::Tuple(ps), TypeKind::Tuple(ts)) => {
                ps.len() == ts.len() && ps.iter().zip(ts).all(|(p, t)| self.match_types(*p, *t, subst))
            }
            (
                TypeKind::Function { params: pp, ret: pr },
                TypeKind::Function { params: tp, ret: tr },
            ) => {
                pp.len() == tp.len()
                    && pp.iter().zip(tp).all(|(p, t)| self.match_types(*p, *t, subst))
                    && self.match_types(*pr, *tr, subst)
            }
            _ => self.can_coerce(actual, pattern),
        }
    }

    /// The documented implicit conversions. Anything else needs `as`.
    pub fn can_coerce(&self, from: TypeId, to: TypeId) -> bool {
        if from == to || self.is_absorbing(from) || to == TypeId::ERROR {
            return true;
        }
        match (self.kind(from), self.kind(to)) {
            (TypeKind::Int(a), TypeKind::Int(b)) => a.widens_to(*b),
            (TypeKind::Float(FloatTy::F32), TypeKind::Float(FloatTy::F64)) => true,
            (TypeKind::Optional(a), TypeKind::Optional(b)) => self.can_coerce(*a, *b),
            (_, TypeKind::Optional(inner)) => self.can_coerce(from, *inner),
            (
                TypeKind::Ref { mutable: true, inner: a },
                TypeKind::Ref { mutable: false, inner: b },
            ) => a == b,
            _ => false,
        }
    }

    /// Common type of two branches, if one coerces into the other.
    pub fn join(&self, a: TypeId, b: TypeId) -> Option<TypeId> {
        if a == TypeId::NEVER {
            return Some(b);
        }
        if b == TypeId::NEVER || a == b {
            return Some(a);
        }
        if a == TypeId::ERROR || b == TypeId::ERROR {
            return Some(TypeId::ERROR);
        }
        if self.can_coerce(a, b) {
            Some(b)
        } else if self.can_coerce(b, a) {
            Some(a)
        } else {
            None
        }
    }

    // -----------------------------------------------------------------
    // Display
    // -----------------------------------------------------------------

    pub fn display(&self, id: TypeId) -> String {
        let mut out = String::new();
        self.write_type(&mut out, id);
        out
    }

    fn write_list(&self, out: &mut String, items: &[TypeId]) {
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            self.write_type(out, *item);
        }
    }

    fn write_type(&self, out: &mut String, id: TypeId) {
        match self.kind(id) {
            TypeKind::Error => out.push_str("{error}"),
            TypeKind::Void => out.push_str("void"),
            TypeKind::Never => out.push_str("never"),
            TypeKind::Bool => out.push_str("bool"),
            TypeKind::Char => out.push_str("char"),
            TypeKind::String => out.push_str("String"),
            TypeKind::Int(int) => out.push_str(int.name()),
            TypeKind::Float(float) => out.push_str(float.name()),
            TypeKind::Adt { name, args, .. } => {
                out.push_str(name);
                if !args.is_empty() {
                    out.push('<');
                    self.write_list(out, args);
                    out.push('>');
                }
            }
            TypeKind::Param { name, .. } => out.push_str(name),
            TypeKind::Const(value) => out.push_str(&value.to_string()),
            TypeKind::Vector(elem) => {
                out.push('[');
                self.write_type(out, *elem);
                out.push(']');
            }
            TypeKind::Array { elem, len } => {
                out.push('[');
                self.write_type(out, *elem);
                out.push_str("; ");
                self.write_type(out, *len);
                out.push(']');
            }
            TypeKind::Optional(inner) => {
                let needs_parens = matches!(self.kind(*inner), TypeKind::Function { .. } | TypeKind::Ref { .. });
                if needs_parens {
                    out.push('(');
                }
                self.write_type(out, *inner);
                if needs_parens {
                    out.push(')');
                }
                out.push('?');
            }
            TypeKind::Tuple(items) => {
                out.push('(');
                self.write_list(out, items);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            TypeKind::Ref { mutable, inner } => {
                out.push_str(if *mutable { "&mut " } else { "&" });
                self.write_type(out, *inner);
            }
            TypeKind::Raw(inner) => {
                out.push_str("raw ");
                self.write_type(out, *inner);
            }
            TypeKind::Function { params, ret } => {
                out.push_str("function(");
                self.write_list(out, params);
                out.push_str(") -> ");
                self.write_type(out, *ret);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_constants_match_their_kinds() {
        let types = TypeInterner::new();
        assert_eq!(types.kind(TypeId::ERROR), &TypeKind::Error);
        assert_eq!(types.kind(TypeId::STRING), &TypeKind::String);
        assert_eq!(types.kind(TypeId::I32), &TypeKind::Int(IntTy::I32));
        assert_eq!(types.kind(TypeId::USIZE), &TypeKind::Int(IntTy::Usize));
        assert_eq!(types.kind(TypeId::F64), &TypeKind::Float(FloatTy::F64));
        for int in IntTy::ALL {
            assert_eq!(types.kind(int.type_id()), &TypeKind::Int(int));
        }
    }

    #[test]
    fn equal_instantiations_share_one_handle() {
        let mut types = TypeInterner::new();
        let first = types.adt(DefId(3), "Box", vec![TypeId::I32]);
        let second = types.adt(DefId(3), "Box", vec![TypeId::I32]);
        let other = types.adt(DefId(3), "Box", vec![TypeId::I64]);
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(types.display(first), "Box<i32>");
    }

    #[test]
    fn substitution_is_structural() {
        let mut types = TypeInterner::new();
        let t = types.param(ParamId(0), "T");
        let boxed = types.adt(DefId(1), "Box", vec![t]);
        let vector = types.vector(boxed);
        let mut subst = Subst::default();
        subst.insert(ParamId(0), TypeId::I32);
        let concrete = types.subst(vector, &subst);
        let expected_box = types.adt(DefId(1), "Box", vec![TypeId::I32]);
        assert_eq!(concrete, types.vector(expected_box));
        assert!(types.has_params(vector));
        assert!(!types.has_params(concrete));
    }

    #[test]
    fn matching_binds_parameters() {
        let mut types = TypeInterner::new();
        let t = types.param(ParamId(0), "T");
        let pattern = types.vector(t);
        let actual = types.vector(TypeId::STRING);
        let mut subst = Subst::default();
        assert!(types.match_types(pattern, actual, &mut subst));
        assert_eq!(subst.get(&ParamId(0)), Some(&TypeId::STRING));

        let optional = types.optional(t);
        let mut subst = Subst::default();
        assert!(types.match_types(optional, TypeId::BOOL, &mut subst));
        assert_eq!(subst.get(&ParamId(0)), Some(&TypeId::BOOL));

        let pair = types.tuple(vec![t, t]);
        let mixed = types.tuple(vec![TypeId::BOOL, TypeId::STRING]);
        assert!(!types.match_types(pair, mixed, &mut Subst::default()));
    }

    #[test]
    fn widening_set() {
        let mut types = TypeInterner::new();
        assert!(types.can_coerce(TypeId::I8, TypeId::I64));
        assert!(types.can_coerce(TypeId::U8, TypeId::I16));
        assert!(types.can_coerce(TypeId::U32, TypeId::USIZE));
        assert!(!types.can_coerce(TypeId::U32, TypeId::I32));
        assert!(!types.can_coerce(TypeId::I64, TypeId::I32));
        assert!(!types.can_coerce(TypeId::I32, TypeId::U64));
        assert!(types.can_coerce(TypeId::F32, TypeId::F64));
        assert!(!types.can_coerce(TypeId::I32, TypeId::F64));
        let optional = types.optional(TypeId::I64);
        assert!(types.can_coerce(TypeId::I32, optional));
        let view = types.reference(false, TypeId::STRING);
        let view_mut = types.reference(true, TypeId::STRING);
        assert!(types.can_coerce(view_mut, view));
        assert!(!types.can_coerce(view, view_mut));
        assert!(types.can_coerce(TypeId::NEVER, view));
    }

    #[test]
    fn integer_ranges_and_wrapping() {
        assert!(IntTy::I8.fits(-128));
        assert!(!IntTy::I8.fits(128));
        assert_eq!(IntTy::U64.max(), u64::MAX as i128);
        assert_eq!(IntTy::I8.wrap(200), -56);
        assert_eq!(IntTy::U8.wrap(-1), 255);
    }

    #[test]
    fn displays_compound_types() {
        let mut types = TypeInterner::new();
        let array = types.array(TypeId::U8, 4);
        let optional = types.optional(array);
        let view = types.reference(true, optional);
        let function = types.function(vec![view, TypeId::BOOL], TypeId::VOID);
        assert_eq!(types.display(function), "function(&mut [u8; 4]?, bool) -> void");
    }
}
