//! Compile-time interpreter.
//!
//! A tree-walking evaluator over checked HIR. The checker calls it whenever
//! it needs a concrete value: array lengths, `const` and `static`
//! initializers, enum discriminants, `comptime assert` and `comptime if`.
//! Evaluation never touches anything outside its own frames; every failure
//! is an [`EvalFailure`] that the caller turns into a ConstEval diagnostic.

use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::ast::{BinaryOp, Receiver, UnaryOp};
use crate::builtins::{BuiltinFn, BuiltinMethod};
use crate::diagnostic::{Category, Diagnostic};
use crate::hir::{Body, Callee, DefKind, HirBlock, HirExpr, HirExprKind, HirPattern, HirStmt, LocalId, Program};
use crate::span::Span;
use crate::types::{DefId, FloatTy, IntTy, Subst, TypeId, TypeKind};

/// A value computed at compile time.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int { value: i128, ty: IntTy },
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Void,
    Tuple(Vec<ConstValue>),
    /// Vector or fixed array.
    Sequence(Vec<ConstValue>),
    Optional(Option<Box<ConstValue>>),
    Struct { def: DefId, fields: Vec<ConstValue> },
    Variant { def: DefId, index: usize, fields: Vec<ConstValue> },
}

impl ConstValue {
    pub fn as_int(&self) -> Option<i128> {
        match self {
            ConstValue::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConstValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Human-readable rendering for the REPL and diagnostics.
    pub fn render(&self, program: &Program) -> String {
        let mut out = String::new();
        self.write(&mut out, program);
        out
    }

    fn write_list(out: &mut String, program: &Program, items: &[ConstValue]) {
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            item.write(out, program);
        }
    }

    fn write(&self, out: &mut String, program: &Program) {
        match self {
            ConstValue::Int { value, .. } => {
                let _ = write!(out, "{value}");
            }
            ConstValue::Float(value) => {
                let _ = write!(out, "{value:?}");
            }
            ConstValue::Bool(value) => {
                let _ = write!(out, "{value}");
            }
            ConstValue::Char(value) => {
                let _ = write!(out, "{value:?}");
            }
            ConstValue::Str(value) => {
                let _ = write!(out, "{value:?}");
            }
            ConstValue::Void => out.push_str("()"),
            ConstValue::Tuple(items) => {
                out.push('(');
                Self::write_list(out, program, items);
                out.push(')');
            }
            ConstValue::Sequence(items) => {
                out.push('[');
                Self::write_list(out, program, items);
                out.push(']');
            }
            ConstValue::Optional(None) => out.push_str("none"),
            ConstValue::Optional(Some(inner)) => {
                out.push_str("some(");
                inner.write(out, program);
                out.push(')');
            }
            ConstValue::Struct { def, fields } => {
                out.push_str(&program.def(*def).name);
                out.push('(');
                Self::write_list(out, program, fields);
                out.push(')');
            }
            ConstValue::Variant { def, index, fields } => {
                let enum_name = &program.def(*def).name;
                let variant = program
                    .enum_def(*def)
                    .and_then(|e| e.variants.get(*index))
                    .map(|v| v.name.as_str())
                    .unwrap_or("?");
                let _ = write!(out, "{enum_name}::{variant}");
                if !fields.is_empty() {
                    out.push('(');
                    Self::write_list(out, program, fields);
                    out.push(')');
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("division by zero in constant expression")]
    DivisionByZero,
    #[error("compile-time call depth exceeded the limit of {0}")]
    RecursionLimit(usize),
    #[error("compile-time evaluation exceeded the step limit of {0}")]
    StepLimit(u64),
    #[error("`{0}` is not a comptime function and cannot be called at compile time")]
    NotComptime(String),
    #[error("{0} cannot be evaluated at compile time")]
    NotConstant(&'static str),
    #[error("compile-time assertion failed: {0}")]
    AssertionFailed(String),
    #[error("arithmetic overflow: {value} does not fit in {ty}")]
    Overflow { value: i128, ty: &'static str },
    #[error("index {index} is out of bounds for length {len}")]
    IndexOutOfBounds { index: i128, len: usize },
    #[error("unwrapped `none` at compile time")]
    UnwrapNone,
    #[error("panic during compile-time evaluation: {0}")]
    Panic(String),
    #[error("the value of `{0}` depends on itself")]
    Cycle(String),
    #[error("no match arm matched the value at compile time")]
    NoArmMatched,
    /// A referenced constant failed to evaluate and was already reported.
    #[error("the referenced constant has errors")]
    Poisoned,
}

impl EvalError {
    pub fn code(&self) -> &'static str {
        match self {
            EvalError::DivisionByZero => "E0601",
            EvalError::RecursionLimit(_) | EvalError::StepLimit(_) => "E0602",
            EvalError::NotComptime(_) | EvalError::NotConstant(_) => "E0603",
            EvalError::AssertionFailed(_) => "E0604",
            EvalError::Overflow { .. } => "E0605",
            EvalError::Cycle(_) => "E0606",
            _ => "E0607",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalFailure {
    pub error: EvalError,
    pub span: Span,
}

impl EvalFailure {
    pub fn into_diagnostic(self) -> Diagnostic {
        Diagnostic::error(Category::ConstEval, self.error.to_string(), self.span).with_code(self.error.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum nesting of compile-time calls.
    pub depth: usize,
    /// Maximum number of evaluated expressions.
    pub steps: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            depth: 128,
            steps: 1_000_000,
        }
    }
}

/// What the interpreter needs from its host.
pub trait ConstContext {
    fn program(&self) -> &Program;
    /// Checked body of a function, checking it on demand if necessary.
    fn function_body(&mut self, def: DefId) -> Option<Arc<Body>>;
    /// Value of a `const` or `static`, evaluating it on demand.
    fn global_value(&mut self, def: DefId) -> Result<ConstValue, EvalError>;
}

/// Context over a finished program: bodies and global values are read as
/// stored.
pub struct ProgramContext<'p>(pub &'p Program);

impl ConstContext for ProgramContext<'_> {
    fn program(&self) -> &Program {
        self.0
    }

    fn function_body(&mut self, def: DefId) -> Option<Arc<Body>> {
        self.0.function(def).and_then(|function| function.body.clone())
    }

    fn global_value(&mut self, def: DefId) -> Result<ConstValue, EvalError> {
        self.0
            .global(def)
            .and_then(|global| global.value.clone())
            .ok_or(EvalError::Poisoned)
    }
}

/// Evaluate `expr`, whose locals are numbered below `locals`.
pub fn evaluate(
    ctx: &mut dyn ConstContext,
    expr: &HirExpr,
    locals: usize,
    limits: Limits,
) -> Result<ConstValue, EvalFailure> {
    let mut interpreter = Interpreter {
        ctx,
        limits,
        steps: 0,
        depth: 0,
    };
    let mut frame = Frame {
        locals: vec![None; locals],
        subst: Subst::default(),
    };
    match interpreter.expr(&mut frame, expr) {
        Ok(value) => Ok(value),
        Err(Unwind::Fail(failure)) => {
            debug!(error = %failure.error, "compile-time evaluation failed");
            Err(failure)
        }
        Err(Unwind::Return(value)) => Ok(value),
        Err(Unwind::Break | Unwind::Continue) => Err(EvalFailure {
            error: EvalError::NotConstant("`break` outside a loop"),
            span: expr.span,
        }),
    }
}

/// Non-local exits threaded through evaluation.
enum Unwind {
    Fail(EvalFailure),
    Return(ConstValue),
    Break,
    Continue,
}

type Eval<T> = Result<T, Unwind>;

fn fail<T>(error: EvalError, span: Span) -> Eval<T> {
    Err(Unwind::Fail(EvalFailure { error, span }))
}

struct Frame {
    locals: Vec<Option<ConstValue>>,
    subst: Subst,
}

enum Projection {
    Field(usize),
    Index(usize),
}

struct Interpreter<'c> {
    ctx: &'c mut dyn ConstContext,
    limits: Limits,
    steps: u64,
    depth: usize,
}

impl Interpreter<'_> {
    fn tick(&mut self, span: Span) -> Eval<()> {
        self.steps += 1;
        if self.steps > self.limits.steps {
            return fail(EvalError::StepLimit(self.limits.steps), span);
        }
        Ok(())
    }

    fn int_ty(&self, ty: TypeId) -> IntTy {
        let types = &self.ctx.program().types;
        match types.kind(types.strip_refs(ty)) {
            TypeKind::Int(int) => *int,
            TypeKind::Adt { def, .. } => self
                .ctx
                .program()
                .enum_def(*def)
                .map_or(IntTy::I64, |e| e.repr_ty()),
            _ => IntTy::I64,
        }
    }

    fn int(&self, value: i128, ty: IntTy, span: Span) -> Eval<ConstValue> {
        if !ty.fits(value) {
            return fail(EvalError::Overflow { value, ty: ty.name() }, span);
        }
        Ok(ConstValue::Int { value, ty })
    }

    fn expr(&mut self, frame: &mut Frame, expr: &HirExpr) -> Eval<ConstValue> {
        self.tick(expr.span)?;
        let span = expr.span;
        match &expr.kind {
            HirExprKind::Int(value) => self.int(*value, self.int_ty(expr.ty), span),
            HirExprKind::Float(value) => Ok(ConstValue::Float(*value)),
            HirExprKind::Bool(value) => Ok(ConstValue::Bool(*value)),
            HirExprKind::Char(value) => Ok(ConstValue::Char(*value)),
            HirExprKind::Str(value) => Ok(ConstValue::Str(value.clone())),
            HirExprKind::Void => Ok(ConstValue::Void),
            HirExprKind::None => Ok(ConstValue::Optional(None)),
            HirExprKind::Some(inner) => {
                let value = self.expr(frame, inner)?;
                Ok(ConstValue::Optional(Some(Box::new(value))))
            }
            HirExprKind::Local(local) => match frame.locals.get(local.0 as usize) {
                Some(Some(value)) => Ok(value.clone()),
                _ => fail(EvalError::NotConstant("an uninitialized local"), span),
            },
            HirExprKind::Global(def) => {
                let def = *def;
                if matches!(self.ctx.program().def(def).kind, DefKind::Static(ref g) if g.mutable) {
                    return fail(EvalError::NotConstant("a mutable static"), span);
                }
                self.ctx
                    .global_value(def)
                    .or_else(|error| fail(error, span))
            }
            HirExprKind::ConstParam(param) => {
                let types = &self.ctx.program().types;
                match frame.subst.get(param).map(|ty| types.kind(*ty)) {
                    Some(TypeKind::Const(value)) => Ok(ConstValue::Int {
                        value: *value as i128,
                        ty: self.int_ty(expr.ty),
                    }),
                    _ => fail(EvalError::NotConstant("an unbound const parameter"), span),
                }
            }
            HirExprKind::FunctionRef { .. } => fail(EvalError::NotConstant("a function value"), span),
            HirExprKind::Unary { op, operand } => {
                let value = self.expr(frame, operand)?;
                self.unary(*op, value, span)
            }
            HirExprKind::Binary { op, lhs, rhs } => self.binary(frame, *op, lhs, rhs, expr.ty, span),
            HirExprKind::Assign { op, target, value } => {
                let mut value = self.expr(frame, value)?;
                if let Some(op) = op {
                    let current = self.expr(frame, target)?;
                    value = self.arith(*op, current, value, target.ty, span)?;
                }
                self.store(frame, target, value)?;
                Ok(ConstValue::Void)
            }
            HirExprKind::Range { .. } => fail(EvalError::NotConstant("a range outside `for`"), span),
            HirExprKind::Cast(inner) => {
                let value = self.expr(frame, inner)?;
                self.cast(value, expr.ty, span)
            }
            HirExprKind::Call { callee, args } => self.call(frame, callee, args, span),
            HirExprKind::Field { base, index, .. } => match self.expr(frame, base)? {
                ConstValue::Struct { fields, .. } => Ok(fields.get(*index).cloned().unwrap_or(ConstValue::Void)),
                _ => fail(EvalError::NotConstant("this field access"), span),
            },
            HirExprKind::TupleIndex { base, index } => match self.expr(frame, base)? {
                ConstValue::Tuple(items) => Ok(items.get(*index).cloned().unwrap_or(ConstValue::Void)),
                _ => fail(EvalError::NotConstant("this tuple access"), span),
            },
            HirExprKind::Index { base, index } => {
                let base = self.expr(frame, base)?;
                let index = self.expr(frame, index)?.as_int().unwrap_or(-1);
                match base {
                    ConstValue::Sequence(items) => {
                        let len = items.len();
                        usize::try_from(index)
                            .ok()
                            .and_then(|i| items.into_iter().nth(i))
                            .map_or_else(|| fail(EvalError::IndexOutOfBounds { index, len }, span), Ok)
                    }
                    ConstValue::Str(text) => {
                        let len = text.len();
                        usize::try_from(index)
                            .ok()
                            .and_then(|i| text.as_bytes().get(i).copied())
                            .map(|byte| ConstValue::Int {
                                value: byte as i128,
                                ty: IntTy::U8,
                            })
                            .map_or_else(|| fail(EvalError::IndexOutOfBounds { index, len }, span), Ok)
                    }
                    _ => fail(EvalError::NotConstant("this index expression"), span),
                }
            }
            HirExprKind::Slice {
                base,
                start,
                end,
                inclusive,
            } => {
                let base = self.expr(frame, base)?;
                let start = self.expr(frame, start)?.as_int().unwrap_or(0);
                let end = self.expr(frame, end)?.as_int().unwrap_or(0) + i128::from(*inclusive);
                let len = match &base {
                    ConstValue::Str(text) => text.len(),
                    ConstValue::Sequence(items) => items.len(),
                    _ => return fail(EvalError::NotConstant("this slice"), span),
                };
                if start < 0 || end < start || end as usize > len {
                    return fail(EvalError::IndexOutOfBounds { index: end - 1, len }, span);
                }
                let (start, end) = (start as usize, end as usize);
                match base {
                    ConstValue::Str(text) => match text.get(start..end) {
                        Some(slice) => Ok(ConstValue::Str(slice.to_string())),
                        None => fail(EvalError::NotConstant("a slice inside a character"), span),
                    },
                    ConstValue::Sequence(items) => Ok(ConstValue::Sequence(items[start..end].to_vec())),
                    _ => fail(EvalError::NotConstant("this slice"), span),
                }
            }
            HirExprKind::Unwrap(inner) => match self.expr(frame, inner)? {
                ConstValue::Optional(Some(value)) => Ok(*value),
                ConstValue::Optional(None) => fail(EvalError::UnwrapNone, span),
                other => Ok(other),
            },
            HirExprKind::Tuple(items) => {
                let values = items.iter().map(|item| self.expr(frame, item)).collect::<Eval<_>>()?;
                Ok(ConstValue::Tuple(values))
            }
            HirExprKind::Sequence(items) => {
                let values = items.iter().map(|item| self.expr(frame, item)).collect::<Eval<_>>()?;
                Ok(ConstValue::Sequence(values))
            }
            HirExprKind::Fill { value, count } => {
                let value = self.expr(frame, value)?;
                let count = self.expr(frame, count)?.as_int().unwrap_or(0);
                if !(0..=u32::MAX as i128).contains(&count) {
                    return fail(EvalError::Overflow { value: count, ty: "usize" }, span);
                }
                self.steps += count as u64;
                self.tick(span)?;
                Ok(ConstValue::Sequence(vec![value; count as usize]))
            }
            HirExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.condition(frame, cond)? {
                    self.expr(frame, then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.expr(frame, else_branch)
                } else {
                    Ok(ConstValue::Void)
                }
            }
            HirExprKind::Match { scrutinee, arms } => {
                let value = self.expr(frame, scrutinee)?;
                for arm in arms {
                    for pattern in &arm.patterns {
                        if self.bind_pattern(frame, pattern, &value) {
                            return self.expr(frame, &arm.body);
                        }
                    }
                }
                fail(EvalError::NoArmMatched, span)
            }
            HirExprKind::Block(block) => self.block(frame, block),
            HirExprKind::Return(value) => {
                let value = match value {
                    Some(value) => self.expr(frame, value)?,
                    None => ConstValue::Void,
                };
                Err(Unwind::Return(value))
            }
            HirExprKind::Break => Err(Unwind::Break),
            HirExprKind::Continue => Err(Unwind::Continue),
            HirExprKind::Error => fail(EvalError::Poisoned, span),
        }
    }

    fn condition(&mut self, frame: &mut Frame, cond: &HirExpr) -> Eval<bool> {
        match self.expr(frame, cond)? {
            ConstValue::Bool(value) => Ok(value),
            _ => fail(EvalError::NotConstant("a non-boolean condition"), cond.span),
        }
    }

    fn unary(&self, op: UnaryOp, value: ConstValue, span: Span) -> Eval<ConstValue> {
        match (op, value) {
            (UnaryOp::Neg, ConstValue::Int { value, ty }) => self.int(-value, ty, span),
            (UnaryOp::Neg, ConstValue::Float(value)) => Ok(ConstValue::Float(-value)),
            (UnaryOp::Not, ConstValue::Bool(value)) => Ok(ConstValue::Bool(!value)),
            (UnaryOp::BitNot, ConstValue::Int { value, ty }) => Ok(ConstValue::Int {
                value: ty.wrap(!value),
                ty,
            }),
            (UnaryOp::Ref | UnaryOp::RefMut | UnaryOp::Deref, value) => Ok(value),
            _ => fail(EvalError::NotConstant("this operator"), span),
        }
    }

    fn binary(
        &mut self,
        frame: &mut Frame,
        op: BinaryOp,
        lhs: &HirExpr,
        rhs: &HirExpr,
        ty: TypeId,
        span: Span,
    ) -> Eval<ConstValue> {
        if op.is_logical() {
            let left = self.condition(frame, lhs)?;
            let short_circuit = if op == BinaryOp::And { !left } else { left };
            if short_circuit {
                return Ok(ConstValue::Bool(left));
            }
            return Ok(ConstValue::Bool(self.condition(frame, rhs)?));
        }
        let left = self.expr(frame, lhs)?;
        let right = self.expr(frame, rhs)?;
        if op.is_comparison() {
            return self.compare(op, &left, &right, span);
        }
        self.arith(op, left, right, ty, span)
    }

    fn compare(&self, op: BinaryOp, left: &ConstValue, right: &ConstValue, span: Span) -> Eval<ConstValue> {
        use std::cmp::Ordering;
        let ordering = match (left, right) {
            (ConstValue::Int { value: a, .. }, ConstValue::Int { value: b, .. }) => Some(a.cmp(b)),
            (ConstValue::Float(a), ConstValue::Float(b)) => a.partial_cmp(b),
            (ConstValue::Char(a), ConstValue::Char(b)) => Some(a.cmp(b)),
            (ConstValue::Str(a), ConstValue::Str(b)) => Some(a.cmp(b)),
            (ConstValue::Bool(a), ConstValue::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        };
        let result = match op {
            BinaryOp::Eq => left == right,
            BinaryOp::Ne => left != right,
            _ => {
                let Some(ordering) = ordering else {
                    return fail(EvalError::NotConstant("this comparison"), span);
                };
                match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::Le => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }
            }
        };
        Ok(ConstValue::Bool(result))
    }

    fn arith(&self, op: BinaryOp, left: ConstValue, right: ConstValue, ty: TypeId, span: Span) -> Eval<ConstValue> {
        match (left, right) {
            (ConstValue::Int { value: a, ty: int }, ConstValue::Int { value: b, .. }) => {
                let value = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a.checked_mul(b).unwrap_or(i128::MAX),
                    BinaryOp::Div | BinaryOp::Rem if b == 0 => return fail(EvalError::DivisionByZero, span),
                    // C++ division truncates toward zero, as does i128
                    BinaryOp::Div => a / b,
                    BinaryOp::Rem => a % b,
                    BinaryOp::BitAnd => a & b,
                    BinaryOp::BitOr => a | b,
                    BinaryOp::BitXor => a ^ b,
                    BinaryOp::Shl | BinaryOp::Shr => {
                        if b < 0 || b >= int.bits() as i128 {
                            return fail(EvalError::Overflow { value: b, ty: "shift amount" }, span);
                        }
                        if op == BinaryOp::Shl {
                            return Ok(ConstValue::Int {
                                value: int.wrap(a << b),
                                ty: int,
                            });
                        }
                        a >> b
                    }
                    _ => return fail(EvalError::NotConstant("this operator"), span),
                };
                self.int(value, int, span)
            }
            (ConstValue::Float(a), ConstValue::Float(b)) => {
                let value = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Rem => a % b,
                    _ => return fail(EvalError::NotConstant("this operator"), span),
                };
                let float = self.ctx.program().types.float_ty(ty);
                Ok(ConstValue::Float(if float == Some(FloatTy::F32) {
                    value as f32 as f64
                } else {
                    value
                }))
            }
            (ConstValue::Str(a), ConstValue::Str(b)) if op == BinaryOp::Add => Ok(ConstValue::Str(a + &b)),
            _ => fail(EvalError::NotConstant("this operator"), span),
        }
    }

    fn cast(&self, value: ConstValue, to: TypeId, span: Span) -> Eval<ConstValue> {
        let program = self.ctx.program();
        let target = program.types.kind(to);
        match (value, target) {
            (ConstValue::Int { value, .. }, TypeKind::Int(int)) => Ok(ConstValue::Int {
                value: int.wrap(value),
                ty: *int,
            }),
            (ConstValue::Int { value, .. }, TypeKind::Float(_)) => Ok(ConstValue::Float(value as f64)),
            (ConstValue::Float(value), TypeKind::Int(int)) => Ok(ConstValue::Int {
                value: int.wrap(value.trunc() as i128),
                ty: *int,
            }),
            (ConstValue::Float(value), TypeKind::Float(FloatTy::F32)) => Ok(ConstValue::Float(value as f32 as f64)),
            (ConstValue::Float(value), TypeKind::Float(FloatTy::F64)) => Ok(ConstValue::Float(value)),
            (ConstValue::Bool(value), TypeKind::Int(int)) => Ok(ConstValue::Int {
                value: i128::from(value),
                ty: *int,
            }),
            (ConstValue::Char(value), TypeKind::Int(int)) => Ok(ConstValue::Int {
                value: int.wrap(value as i128),
                ty: *int,
            }),
            (ConstValue::Int { value, .. }, TypeKind::Char) => u32::try_from(value)
                .ok()
                .and_then(char::from_u32)
                .map(ConstValue::Char)
                .map_or_else(|| fail(EvalError::Overflow { value, ty: "char" }, span), Ok),
            (ConstValue::Variant { def, index, .. }, TypeKind::Int(int)) => {
                let discriminant = program
                    .enum_def(def)
                    .and_then(|e| e.variants.get(index))
                    .and_then(|v| v.discriminant)
                    .unwrap_or(index as i128);
                Ok(ConstValue::Int {
                    value: int.wrap(discriminant),
                    ty: *int,
                })
            }
            (value, _) => Ok(value),
        }
    }

    fn call(&mut self, frame: &mut Frame, callee: &Callee, args: &[HirExpr], span: Span) -> Eval<ConstValue> {
        match callee {
            Callee::Function { def, generic_args } => {
                let generic_args: Vec<TypeId> = generic_args
                    .iter()
                    .map(|arg| self.resolve_param(frame, *arg))
                    .collect();
                let values = args.iter().map(|arg| self.expr(frame, arg)).collect::<Eval<Vec<_>>>()?;
                self.invoke(*def, &generic_args, values, span)
            }
            Callee::TraitMethod { method, self_ty, .. } => {
                let concrete = self.resolve_param(frame, *self_ty);
                let found = self.ctx.program().find_method(concrete, method);
                let Some((def, _)) = found else {
                    return fail(EvalError::NotConstant("this trait method call"), span);
                };
                let values = args.iter().map(|arg| self.expr(frame, arg)).collect::<Eval<Vec<_>>>()?;
                self.invoke(def, &[], values, span)
            }
            Callee::Builtin(BuiltinFn::Panic) => {
                let message = match args.first() {
                    Some(arg) => match self.expr(frame, arg)? {
                        ConstValue::Str(text) => text,
                        other => other.render(self.ctx.program()),
                    },
                    None => String::new(),
                };
                fail(EvalError::Panic(message), span)
            }
            Callee::Builtin(_) => fail(EvalError::NotConstant("output"), span),
            Callee::BuiltinMethod(method) => self.builtin_method(frame, *method, args, span),
            Callee::Indirect(_) => fail(EvalError::NotConstant("an indirect call"), span),
            Callee::Constructor { def } => {
                let fields = args.iter().map(|arg| self.expr(frame, arg)).collect::<Eval<_>>()?;
                Ok(ConstValue::Struct { def: *def, fields })
            }
            Callee::Variant { def, index } => {
                let fields = args.iter().map(|arg| self.expr(frame, arg)).collect::<Eval<_>>()?;
                Ok(ConstValue::Variant {
                    def: *def,
                    index: *index,
                    fields,
                })
            }
        }
    }

    fn resolve_param(&self, frame: &Frame, ty: TypeId) -> TypeId {
        match self.ctx.program().types.kind(ty) {
            TypeKind::Param { id, .. } => frame.subst.get(id).copied().unwrap_or(ty),
            _ => ty,
        }
    }

    fn invoke(&mut self, def: DefId, generic_args: &[TypeId], args: Vec<ConstValue>, span: Span) -> Eval<ConstValue> {
        let program = self.ctx.program();
        let name = program.def(def).name.clone();
        let Some(function) = program.function(def) else {
            return fail(EvalError::NotConstant("a call to a non-function"), span);
        };
        if !function.is_comptime {
            return fail(EvalError::NotComptime(name), span);
        }
        if function.receiver == Some(Receiver::Mutable) {
            return fail(EvalError::NotConstant("a `mut this` method"), span);
        }
        let mut subst = Subst::default();
        for (generic, arg) in function.generics.iter().zip(generic_args) {
            subst.insert(generic.id, *arg);
        }
        if self.depth >= self.limits.depth {
            return fail(EvalError::RecursionLimit(self.limits.depth), span);
        }
        let Some(body) = self.ctx.function_body(def) else {
            return fail(EvalError::NotConstant("a function without a checked body"), span);
        };
        let mut callee_frame = Frame {
            locals: vec![None; body.locals.len()],
            subst,
        };
        for (param, value) in body.params.iter().zip(args) {
            callee_frame.locals[param.0 as usize] = Some(value);
        }
        self.depth += 1;
        let result = self.expr(&mut callee_frame, &body.expr);
        self.depth -= 1;
        match result {
            Ok(value) | Err(Unwind::Return(value)) => Ok(value),
            Err(Unwind::Fail(failure)) => Err(Unwind::Fail(failure)),
            Err(Unwind::Break | Unwind::Continue) => fail(EvalError::NotConstant("`break` outside a loop"), span),
        }
    }

    fn builtin_method(&mut self, frame: &mut Frame, method: BuiltinMethod, args: &[HirExpr], span: Span) -> Eval<ConstValue> {
        let Some(receiver) = args.first() else {
            return fail(EvalError::NotConstant("a method without receiver"), span);
        };
        if method == BuiltinMethod::VectorPush || method == BuiltinMethod::VectorPop {
            let pushed = match args.get(1) {
                Some(arg) => Some(self.expr(frame, arg)?),
                None => None,
            };
            let (local, projections) = self.place(frame, receiver)?;
            let slot = place_mut(frame, local, &projections).map_err(|error| Unwind::Fail(EvalFailure { error, span }))?;
            let ConstValue::Sequence(items) = slot else {
                return fail(EvalError::NotConstant("this receiver"), span);
            };
            return Ok(match pushed {
                Some(value) => {
                    items.push(value);
                    ConstValue::Void
                }
                None => ConstValue::Optional(items.pop().map(Box::new)),
            });
        }
        let value = self.expr(frame, receiver)?;
        let usize_value = |len: usize| ConstValue::Int {
            value: len as i128,
            ty: IntTy::Usize,
        };
        match (method, value) {
            (BuiltinMethod::StringLen, ConstValue::Str(text)) => Ok(usize_value(text.len())),
            (BuiltinMethod::StringIsEmpty, ConstValue::Str(text)) => Ok(ConstValue::Bool(text.is_empty())),
            (BuiltinMethod::VectorLen | BuiltinMethod::ArrayLen, ConstValue::Sequence(items)) => {
                Ok(usize_value(items.len()))
            }
            (BuiltinMethod::VectorIsEmpty, ConstValue::Sequence(items)) => Ok(ConstValue::Bool(items.is_empty())),
            (BuiltinMethod::OptionalHasValue, ConstValue::Optional(inner)) => Ok(ConstValue::Bool(inner.is_some())),
            _ => fail(EvalError::NotConstant("this method call"), span),
        }
    }

    /// Resolve an assignable expression to a local and a projection path.
    fn place(&mut self, frame: &mut Frame, expr: &HirExpr) -> Eval<(LocalId, Vec<Projection>)> {
        match &expr.kind {
            HirExprKind::Local(local) => Ok((*local, Vec::new())),
            HirExprKind::Unary {
                op: UnaryOp::Deref, operand, ..
            } => self.place(frame, operand),
            HirExprKind::Field { base, index, .. } | HirExprKind::TupleIndex { base, index } => {
                let (local, mut path) = self.place(frame, base)?;
                path.push(Projection::Field(*index));
                Ok((local, path))
            }
            HirExprKind::Index { base, index } => {
                let position = self.expr(frame, index)?.as_int().unwrap_or(-1);
                let (local, mut path) = self.place(frame, base)?;
                let Ok(position) = usize::try_from(position) else {
                    return fail(EvalError::IndexOutOfBounds { index: position, len: 0 }, expr.span);
                };
                path.push(Projection::Index(position));
                Ok((local, path))
            }
            _ => fail(EvalError::NotConstant("assignment to this place"), expr.span),
        }
    }

    fn store(&mut self, frame: &mut Frame, target: &HirExpr, value: ConstValue) -> Eval<()> {
        let (local, projections) = self.place(frame, target)?;
        let slot = place_mut(frame, local, &projections).map_err(|error| {
            Unwind::Fail(EvalFailure {
                error,
                span: target.span,
            })
        })?;
        *slot = value;
        Ok(())
    }

    fn block(&mut self, frame: &mut Frame, block: &HirBlock) -> Eval<ConstValue> {
        let mut deferred: Vec<&HirStmt> = Vec::new();
        let mut result = Ok(ConstValue::Void);
        for stmt in &block.stmts {
            if let HirStmt::Defer(inner) = stmt {
                deferred.push(inner);
                continue;
            }
            if let Err(unwind) = self.stmt(frame, stmt) {
                result = Err(unwind);
                break;
            }
        }
        if result.is_ok() {
            if let Some(tail) = &block.tail {
                result = self.expr(frame, tail);
            }
        }
        for stmt in deferred.into_iter().rev() {
            self.stmt(frame, stmt)?;
        }
        result
    }

    fn stmt(&mut self, frame: &mut Frame, stmt: &HirStmt) -> Eval<()> {
        match stmt {
            HirStmt::Let { local, init } => {
                let value = self.expr(frame, init)?;
                frame.locals[local.0 as usize] = Some(value);
            }
            HirStmt::Expr(expr) => {
                self.expr(frame, expr)?;
            }
            HirStmt::While { cond, body } => {
                while self.condition(frame, cond)? {
                    if !self.loop_body(frame, body)? {
                        break;
                    }
                }
            }
            HirStmt::Loop { body } => {
                while self.loop_body(frame, body)? {
                    self.tick(cond_span(body))?;
                }
            }
            HirStmt::ForRange {
                local,
                start,
                end,
                inclusive,
                body,
            } => {
                let start_value = self.expr(frame, start)?;
                let end_value = self.expr(frame, end)?;
                let (Some(first), Some(last)) = (start_value.as_int(), end_value.as_int()) else {
                    return fail(EvalError::NotConstant("a non-integer range"), start.span);
                };
                let ty = match start_value {
                    ConstValue::Int { ty, .. } => ty,
                    _ => IntTy::I64,
                };
                let stop = if *inclusive { last + 1 } else { last };
                let mut current = first;
                while current < stop {
                    frame.locals[local.0 as usize] = Some(ConstValue::Int { value: current, ty });
                    if !self.loop_body(frame, body)? {
                        break;
                    }
                    current += 1;
                }
            }
            HirStmt::ForEach { local, iterable, body } => {
                let items = match self.expr(frame, iterable)? {
                    ConstValue::Sequence(items) => items,
                    _ => return fail(EvalError::NotConstant("iteration over this value"), iterable.span),
                };
                for item in items {
                    frame.locals[local.0 as usize] = Some(item);
                    if !self.loop_body(frame, body)? {
                        break;
                    }
                }
            }
            HirStmt::Defer(inner) => self.stmt(frame, inner)?,
        }
        Ok(())
    }

    /// Run one iteration; `false` means the loop was broken out of.
    fn loop_body(&mut self, frame: &mut Frame, body: &HirBlock) -> Eval<bool> {
        match self.block(frame, body) {
            Ok(_) | Err(Unwind::Continue) => Ok(true),
            Err(Unwind::Break) => Ok(false),
            Err(other) => Err(other),
        }
    }

    fn bind_pattern(&self, frame: &mut Frame, pattern: &HirPattern, value: &ConstValue) -> bool {
        match (pattern, value) {
            (HirPattern::Wildcard, _) => true,
            (HirPattern::Binding(local), value) => {
                frame.locals[local.0 as usize] = Some(value.clone());
                true
            }
            (HirPattern::Int(expected), ConstValue::Int { value, .. }) => expected == value,
            (HirPattern::Int(expected), ConstValue::Variant { def, index, .. }) => {
                let discriminant = self
                    .ctx
                    .program()
                    .enum_def(*def)
                    .and_then(|e| e.variants.get(*index))
                    .and_then(|v| v.discriminant);
                discriminant == Some(*expected)
            }
            (HirPattern::Bool(expected), ConstValue::Bool(value)) => expected == value,
            (HirPattern::Char(expected), ConstValue::Char(value)) => expected == value,
            (HirPattern::Str(expected), ConstValue::Str(value)) => expected == value,
            (HirPattern::None, ConstValue::Optional(None)) => true,
            (HirPattern::Some(inner), ConstValue::Optional(Some(value))) => self.bind_pattern(frame, inner, value),
            (
                HirPattern::Variant { index, fields, .. },
                ConstValue::Variant {
                    index: actual,
                    fields: values,
                    ..
                },
            ) => {
                index == actual
                    && fields
                        .iter()
                        .zip(values)
                        .all(|(pattern, value)| self.bind_pattern(frame, pattern, value))
            }
            _ => false,
        }
    }
}

fn cond_span(block: &HirBlock) -> Span {
    block.tail.as_ref().map(|tail| tail.span).unwrap_or_default()
}

fn place_mut<'f>(frame: &'f mut Frame, local: LocalId, projections: &[Projection]) -> Result<&'f mut ConstValue, EvalError> {
    let mut slot = frame
        .locals
        .get_mut(local.0 as usize)
        .and_then(Option::as_mut)
        .ok_or(EvalError::NotConstant("an uninitialized local"))?;
    for projection in projections {
        slot = match (projection, slot) {
            (Projection::Field(index), ConstValue::Struct { fields, .. } | ConstValue::Tuple(fields)) => fields
                .get_mut(*index)
                .ok_or(EvalError::NotConstant("this field"))?,
            (Projection::Index(index), ConstValue::Sequence(items)) => {
                let len = items.len();
                items.get_mut(*index).ok_or(EvalError::IndexOutOfBounds {
                    index: *index as i128,
                    len,
                })?
            }
            _ => return Err(EvalError::NotConstant("assignment to this place")),
        };
    }
    Ok(slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::FileId;

    fn span() -> Span {
        Span::new(FileId(0), 0, 1)
    }

    fn int(value: i128, ty: TypeId) -> HirExpr {
        HirExpr::new(HirExprKind::Int(value), ty, span())
    }

    fn binary(op: BinaryOp, lhs: HirExpr, rhs: HirExpr, ty: TypeId) -> HirExpr {
        HirExpr::new(
            HirExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
            span(),
        )
    }

    fn eval(expr: &HirExpr) -> Result<ConstValue, EvalFailure> {
        let program = Program::default();
        evaluate(&mut ProgramContext(&program), expr, 0, Limits::default())
    }

    #[test]
    fn evaluates_arithmetic() {
        let expr = binary(
            BinaryOp::Add,
            int(2, TypeId::I64),
            binary(BinaryOp::Mul, int(3, TypeId::I64), int(4, TypeId::I64), TypeId::I64),
            TypeId::I64,
        );
        assert_eq!(eval(&expr).unwrap().as_int(), Some(14));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let expr = binary(BinaryOp::Div, int(10, TypeId::USIZE), int(0, TypeId::USIZE), TypeId::USIZE);
        let failure = eval(&expr).unwrap_err();
        assert_eq!(failure.error, EvalError::DivisionByZero);
        let diagnostic = failure.into_diagnostic();
        assert_eq!(diagnostic.category, Category::ConstEval);
        assert_eq!(diagnostic.code, Some("E0601"));
    }

    #[test]
    fn overflow_is_detected_in_the_operand_type() {
        let expr = binary(BinaryOp::Add, int(200, TypeId::U8), int(100, TypeId::U8), TypeId::U8);
        assert!(matches!(eval(&expr).unwrap_err().error, EvalError::Overflow { value: 300, .. }));
    }

    #[test]
    fn logical_operators_short_circuit() {
        let bad = binary(BinaryOp::Div, int(1, TypeId::I64), int(0, TypeId::I64), TypeId::I64);
        let cmp = binary(BinaryOp::Eq, bad, int(1, TypeId::I64), TypeId::BOOL);
        let expr = binary(
            BinaryOp::Or,
            HirExpr::new(HirExprKind::Bool(true), TypeId::BOOL, span()),
            cmp,
            TypeId::BOOL,
        );
        assert_eq!(eval(&expr).unwrap(), ConstValue::Bool(true));
    }

    #[test]
    fn step_limit_stops_infinite_loops() {
        let body = HirBlock {
            stmts: Vec::new(),
            tail: None,
        };
        let looping = HirExpr::new(
            HirExprKind::Block(HirBlock {
                stmts: vec![HirStmt::Loop { body }],
                tail: None,
            }),
            TypeId::VOID,
            span(),
        );
        let program = Program::default();
        let limits = Limits { depth: 8, steps: 500 };
        let failure = evaluate(&mut ProgramContext(&program), &looping, 0, limits).unwrap_err();
        assert_eq!(failure.error, EvalError::StepLimit(500));
    }

    #[test]
    fn casts_wrap_like_the_target() {
        let program = Program::default();
        let cast = HirExpr::new(HirExprKind::Cast(Box::new(int(300, TypeId::I64))), TypeId::U8, span());
        let value = evaluate(&mut ProgramContext(&program), &cast, 0, Limits::default()).unwrap();
        assert_eq!(value, ConstValue::Int { value: 44, ty: IntTy::U8 });
    }
}
