//! C++17 backend.
//!
//! Lowers the checked [`Program`] to one self-contained C++ translation
//! unit. Every encoding is fixed:
//!
//! | Kite | C++ |
//! |---|---|
//! | `String` | `std::string` |
//! | `[T]`, `[T; N]` | `std::vector<T>`, `std::array<T, N>` |
//! | `T?` | `std::optional<T>` |
//! | `&T`, `&mut T`, `raw T` | `T const&`, `T&`, `T*` |
//! | `struct` | aggregate `struct` |
//! | `class` | `struct` held by `std::shared_ptr` |
//! | payload `enum E` | `struct E { std::variant<E_A, E_B> value; }` |
//! | C-like `enum E: r` | `enum class E : r` |
//! | method `m` of `T` | free function `T_m(self, ..)` |
//!
//! Value-producing `if`, `match` and blocks in expression position become
//! immediately invoked lambdas, unless they contain a `return`, `break`
//! or `continue` leaving the expression; those are lowered into a
//! temporary declared before the enclosing statement.
//!
//! The output depends only on the program: declarations are ordered by
//! their mangled names, and type definitions follow by-value containment.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::ast::{BinaryOp, Receiver, UnaryOp};
use crate::builtins::{BuiltinFn, BuiltinMethod};
use crate::const_eval::ConstValue;
use crate::error::CoreError;
use crate::hir::{
    Body, Callee, DefKind, EnumDef, FunctionDef, HirArm, HirBlock, HirExpr, HirExprKind, HirPattern, HirStmt,
    LocalId, Program, UnitId,
};
use crate::monomorph::{self, Instance, Instances, Mangler, escape_ident};
use crate::span::Span;
use crate::types::{DefId, FloatTy, IntTy, Subst, TypeId, TypeKind};

const RUNTIME_PRELUDE: &str = r#"#include <array>
#include <cmath>
#include <cstddef>
#include <cstdint>
#include <cstdlib>
#include <functional>
#include <initializer_list>
#include <iostream>
#include <limits>
#include <memory>
#include <optional>
#include <sstream>
#include <string>
#include <tuple>
#include <type_traits>
#include <utility>
#include <variant>
#include <vector>

namespace kite_rt {

[[noreturn]] inline void panic(const std::string& message) {
    std::cout.flush();
    std::cerr << "panic: " << message << std::endl;
    std::exit(101);
}

[[noreturn]] inline void unreachable() {
    panic("entered unreachable code");
}

inline std::string show(const std::string& value) {
    return value;
}

inline std::string show(bool value) {
    return value ? "true" : "false";
}

inline std::string show(char32_t value) {
    std::string out;
    auto code = static_cast<std::uint32_t>(value);
    if (code < 0x80) {
        out += static_cast<char>(code);
    } else if (code < 0x800) {
        out += static_cast<char>(0xC0 | (code >> 6));
        out += static_cast<char>(0x80 | (code & 0x3F));
    } else if (code < 0x10000) {
        out += static_cast<char>(0xE0 | (code >> 12));
        out += static_cast<char>(0x80 | ((code >> 6) & 0x3F));
        out += static_cast<char>(0x80 | (code & 0x3F));
    } else {
        out += static_cast<char>(0xF0 | (code >> 18));
        out += static_cast<char>(0x80 | ((code >> 12) & 0x3F));
        out += static_cast<char>(0x80 | ((code >> 6) & 0x3F));
        out += static_cast<char>(0x80 | (code & 0x3F));
    }
    return out;
}

inline std::string show(double value) {
    std::ostringstream out;
    out << value;
    return out.str();
}

inline std::string show(float value) {
    return show(static_cast<double>(value));
}

template <typename T, typename = std::enable_if_t<std::is_integral_v<T>>>
std::string show(T value) {
    if constexpr (std::is_signed_v<T>) {
        return std::to_string(static_cast<long long>(value));
    } else {
        return std::to_string(static_cast<unsigned long long>(value));
    }
}

inline std::string format(const std::string& pattern, std::initializer_list<std::string> args) {
    std::string out;
    auto next = args.begin();
    for (std::size_t i = 0; i < pattern.size(); ++i) {
        char c = pattern[i];
        if ((c == '{' || c == '}') && i + 1 < pattern.size() && pattern[i + 1] == c) {
            out += c;
            ++i;
        } else if (c == '{' && i + 1 < pattern.size() && pattern[i + 1] == '}') {
            if (next != args.end()) {
                out += *next;
                ++next;
            }
            ++i;
        } else {
            out += c;
        }
    }
    return out;
}

inline void print(const std::string& text) {
    std::cout << text;
}

inline void println(const std::string& text) {
    std::cout << text << '\n';
}

inline void eprintln(const std::string& text) {
    std::cerr << text << '\n';
}

template <typename Index>
std::size_t checked_index(Index index, std::size_t size) {
    if constexpr (std::is_signed_v<Index>) {
        if (index < 0) {
            panic("index " + show(index) + " out of bounds for length " + show(size));
        }
    }
    auto position = static_cast<std::size_t>(index);
    if (position >= size) {
        panic("index " + show(index) + " out of bounds for length " + show(size));
    }
    return position;
}

template <typename Container, typename Index>
auto at(Container&& container, Index index) -> decltype(container[0]) {
    return container[checked_index(index, container.size())];
}

inline std::string slice(const std::string& text, std::size_t start, std::size_t end) {
    if (start > end || end > text.size()) {
        panic("slice " + show(start) + ".." + show(end) + " out of bounds for length " + show(text.size()));
    }
    return text.substr(start, end - start);
}

template <typename Container>
auto slice(const Container& items, std::size_t start, std::size_t end) {
    if (start > end || end > items.size()) {
        panic("slice " + show(start) + ".." + show(end) + " out of bounds for length " + show(items.size()));
    }
    using Item = typename Container::value_type;
    return std::vector<Item>(items.begin() + start, items.begin() + end);
}

template <typename T>
std::optional<T> pop(std::vector<T>& items) {
    if (items.empty()) {
        return std::nullopt;
    }
    T last = std::move(items.back());
    items.pop_back();
    return last;
}

template <typename T, std::size_t N>
std::array<T, N> fill(const T& value) {
    std::array<T, N> items;
    items.fill(value);
    return items;
}

class Defer {
public:
    explicit Defer(std::function<void()> action) : action_(std::move(action)) {}
    Defer(const Defer&) = delete;
    Defer& operator=(const Defer&) = delete;
    ~Defer() {
        action_();
    }

private:
    std::function<void()> action_;
};

}  // namespace kite_rt
"#;

#[derive(Debug, Clone)]
pub struct CppOptions {
    /// Emit a C++ `main` calling the entry unit's `main`.
    pub emit_main: bool,
}

impl Default for CppOptions {
    fn default() -> Self {
        CppOptions { emit_main: true }
    }
}

/// Generate C++ for `program`. The program must be free of errors.
pub fn generate(program: &mut Program, entry: UnitId, options: &CppOptions) -> Result<String, CoreError> {
    let instances = monomorph::collect(program, entry);
    let mut emitter = Emitter::new(program, entry);
    emitter.emit_program(&instances, options);
    let text = emitter.finish()?;
    debug!(bytes = text.len(), functions = instances.functions.len(), "emitted C++");
    Ok(text)
}

#[derive(Debug, Default)]
struct Writer {
    text: String,
    indent: usize,
}

impl Writer {
    fn at(indent: usize) -> Self {
        Writer {
            text: String::new(),
            indent,
        }
    }

    fn line(&mut self, line: &str) {
        for _ in 0..self.indent {
            self.text.push_str("    ");
        }
        self.text.push_str(line);
        self.text.push('\n');
    }

    fn blank(&mut self) {
        self.text.push('\n');
    }

    fn open(&mut self, line: &str) {
        self.line(line);
        self.indent += 1;
    }

    fn close(&mut self, line: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(line);
    }

    /// `} else {` and friends.
    fn reopen(&mut self, line: &str) {
        self.close(line);
        self.indent += 1;
    }
}

/// Where the value of a lowered expression goes.
#[derive(Debug, Clone, Copy)]
enum Dest<'a> {
    Discard,
    Return,
    Assign(&'a str),
}

fn int_ctype(int: IntTy) -> &'static str {
    match int {
        IntTy::I8 => "int8_t",
        IntTy::I16 => "int16_t",
        IntTy::I32 => "int32_t",
        IntTy::I64 => "int64_t",
        IntTy::U8 => "uint8_t",
        IntTy::U16 => "uint16_t",
        IntTy::U32 => "uint32_t",
        IntTy::U64 => "uint64_t",
        IntTy::Usize => "std::size_t",
    }
}

fn int_literal(int: IntTy, value: i128) -> String {
    if int.is_signed() && int.bits() == 64 && value == int.min() {
        return "INT64_MIN".to_string();
    }
    let suffix = match (int.is_signed(), int.bits()) {
        (true, 64) => "LL",
        (false, 64) => "ULL",
        _ => "",
    };
    format!("{}{{{value}{suffix}}}", int_ctype(int))
}

fn float_literal(float: FloatTy, value: f64) -> String {
    let ctype = match float {
        FloatTy::F32 => "float",
        FloatTy::F64 => "double",
    };
    if value.is_nan() {
        return format!("std::numeric_limits<{ctype}>::quiet_NaN()");
    }
    if value.is_infinite() {
        let sign = if value < 0.0 { "-" } else { "" };
        return format!("{sign}std::numeric_limits<{ctype}>::infinity()");
    }
    let mut text = format!("{value:?}");
    if !text.contains(['.', 'e']) {
        text.push_str(".0");
    }
    match float {
        FloatTy::F32 => format!("{text}f"),
        FloatTy::F64 => text,
    }
}

fn char_literal(value: char) -> String {
    if value.is_ascii_graphic() && value != '\'' && value != '\\' || value == ' ' {
        format!("U'{value}'")
    } else {
        format!("char32_t{{0x{:X}}}", value as u32)
    }
}

fn string_literal(value: &str) -> String {
    let mut out = String::from("std::string(\"");
    for byte in value.bytes() {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\{byte:03o}")),
        }
    }
    out.push('"');
    if value.contains('\0') {
        out.push_str(&format!(", {}", value.len()));
    }
    out.push(')');
    out
}

/// Drop one pair of parentheses enclosing the whole of `text`.
fn unparen(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'(' || bytes[bytes.len() - 1] != b')' {
        return text;
    }
    let mut depth = 0usize;
    let mut quote = None;
    let mut escaped = false;
    for (index, byte) in bytes.iter().enumerate() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == open {
                quote = None;
            }
            continue;
        }
        match byte {
            b'"' | b'\'' => quote = Some(*byte),
            b'(' => depth += 1,
            b')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 && index != bytes.len() - 1 {
                    return text;
                }
            }
            _ => {}
        }
    }
    &text[1..text.len() - 1]
}

/// The single expression a branch reduces to, when it has no statements.
fn plain_value(expr: &HirExpr) -> Option<&HirExpr> {
    match &expr.kind {
        HirExprKind::Block(block) if block.stmts.is_empty() => block.tail.as_deref().and_then(plain_value),
        HirExprKind::Block(_)
        | HirExprKind::If { .. }
        | HirExprKind::Match { .. }
        | HirExprKind::Return(_)
        | HirExprKind::Break
        | HirExprKind::Continue => None,
        _ => Some(expr),
    }
}

/// Whether evaluating `expr` may jump out of it.
fn escapes(expr: &HirExpr) -> bool {
    jumps_expr(expr, 0)
}

fn jumps_expr(expr: &HirExpr, loops: usize) -> bool {
    match &expr.kind {
        HirExprKind::Return(_) => true,
        HirExprKind::Break | HirExprKind::Continue => loops == 0,
        HirExprKind::Block(block) => jumps_block(block, loops),
        HirExprKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            jumps_expr(cond, loops)
                || jumps_expr(then_branch, loops)
                || else_branch.as_deref().is_some_and(|e| jumps_expr(e, loops))
        }
        HirExprKind::Match { scrutinee, arms } => {
            jumps_expr(scrutinee, loops) || arms.iter().any(|arm| jumps_expr(&arm.body, loops))
        }
        _ => children(expr).into_iter().any(|child| jumps_expr(child, loops)),
    }
}

fn jumps_block(block: &HirBlock, loops: usize) -> bool {
    block.stmts.iter().any(|stmt| jumps_stmt(stmt, loops)) || block.tail.as_deref().is_some_and(|t| jumps_expr(t, loops))
}

fn jumps_stmt(stmt: &HirStmt, loops: usize) -> bool {
    match stmt {
        HirStmt::Let { init, .. } | HirStmt::Expr(init) => jumps_expr(init, loops),
        HirStmt::While { cond, body } => jumps_expr(cond, loops) || jumps_block(body, loops + 1),
        HirStmt::Loop { body } => jumps_block(body, loops + 1),
        HirStmt::ForRange { start, end, body, .. } => {
            jumps_expr(start, loops) || jumps_expr(end, loops) || jumps_block(body, loops + 1)
        }
        HirStmt::ForEach { iterable, body, .. } => jumps_expr(iterable, loops) || jumps_block(body, loops + 1),
        HirStmt::Defer(inner) => jumps_stmt(inner, loops),
    }
}

/// Direct operands of a non-control expression.
fn children(expr: &HirExpr) -> Vec<&HirExpr> {
    match &expr.kind {
        HirExprKind::Some(inner)
        | HirExprKind::Cast(inner)
        | HirExprKind::Unwrap(inner)
        | HirExprKind::Unary { operand: inner, .. }
        | HirExprKind::Field { base: inner, .. }
        | HirExprKind::TupleIndex { base: inner, .. } => vec![&**inner],
        HirExprKind::Binary { lhs, rhs, .. } => vec![&**lhs, &**rhs],
        HirExprKind::Assign { target, value, .. } => vec![&**target, &**value],
        HirExprKind::Range { start, end, .. } => vec![&**start, &**end],
        HirExprKind::Index { base, index } => vec![&**base, &**index],
        HirExprKind::Slice { base, start, end, .. } => vec![&**base, &**start, &**end],
        HirExprKind::Fill { value, count } => vec![&**value, &**count],
        HirExprKind::Tuple(items) | HirExprKind::Sequence(items) => items.iter().collect(),
        HirExprKind::Call { callee, args } => {
            let mut out: Vec<&HirExpr> = args.iter().collect();
            if let Callee::Indirect(function) = callee {
                out.push(function);
            }
            out
        }
        _ => Vec::new(),
    }
}

struct Emitter<'p> {
    program: &'p mut Program,
    mangler: Mangler,
    entry: UnitId,
    out: Writer,
    fault: Option<CoreError>,
    subst: Subst,
    locals: Vec<String>,
    local_types: Vec<TypeId>,
    temps: usize,
}

impl<'p> Emitter<'p> {
    fn new(program: &'p mut Program, entry: UnitId) -> Self {
        Emitter {
            program,
            mangler: Mangler::new(entry),
            entry,
            out: Writer::default(),
            fault: None,
            subst: Subst::default(),
            locals: Vec::new(),
            local_types: Vec::new(),
            temps: 0,
        }
    }

    fn finish(self) -> Result<String, CoreError> {
        match self.fault {
            Some(fault) => Err(fault),
            None => Ok(self.out.text),
        }
    }

    fn violation(&mut self, message: impl Into<String>, span: Span) {
        if self.fault.is_none() {
            self.fault = Some(CoreError::invariant(message, span));
        }
    }

    fn temp(&mut self) -> String {
        let name = format!("kite_t{}", self.temps);
        self.temps += 1;
        name
    }

    /// Emit into a detached writer one level deeper and return its text.
    fn capture(&mut self, emit: impl FnOnce(&mut Self)) -> String {
        let nested = Writer::at(self.out.indent + 1);
        let saved = std::mem::replace(&mut self.out, nested);
        emit(self);
        std::mem::replace(&mut self.out, saved).text
    }

    // -----------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------

    fn concrete(&mut self, ty: TypeId) -> TypeId {
        self.program.types.subst(ty, &self.subst)
    }

    fn cpp_type(&mut self, ty: TypeId) -> String {
        let ty = self.concrete(ty);
        self.type_text(ty)
    }

    fn is_class(&self, ty: TypeId) -> bool {
        match self.program.types.kind(self.program.types.strip_refs(ty)) {
            TypeKind::Adt { def, .. } => self.program.struct_def(*def).is_some_and(|decl| decl.is_class),
            _ => false,
        }
    }

    fn c_like_enum(&self, ty: TypeId) -> Option<&EnumDef> {
        match self.program.types.kind(self.program.types.strip_refs(ty)) {
            TypeKind::Adt { def, .. } => self.program.enum_def(*def).filter(|decl| decl.is_c_like()),
            _ => None,
        }
    }

    fn void_like(&self, ty: TypeId) -> bool {
        matches!(self.program.types.kind(ty), TypeKind::Void | TypeKind::Never)
    }

    fn type_text(&mut self, ty: TypeId) -> String {
        match self.program.types.kind(ty).clone() {
            TypeKind::Error | TypeKind::Param { .. } => {
                let shown = self.program.types.display(ty);
                self.violation(format!("type `{shown}` reached code generation"), Span::default());
                "void".to_string()
            }
            TypeKind::Void | TypeKind::Never => "void".to_string(),
            TypeKind::Bool => "bool".to_string(),
            TypeKind::Char => "char32_t".to_string(),
            TypeKind::String => "std::string".to_string(),
            TypeKind::Int(int) => int_ctype(int).to_string(),
            TypeKind::Float(FloatTy::F32) => "float".to_string(),
            TypeKind::Float(FloatTy::F64) => "double".to_string(),
            TypeKind::Adt { .. } => {
                let name = self.mangler.adt_name(self.program, ty);
                if self.is_class(ty) {
                    format!("std::shared_ptr<{name}>")
                } else {
                    name
                }
            }
            TypeKind::Const(value) => value.to_string(),
            TypeKind::Vector(elem) => format!("std::vector<{}>", self.type_text(elem)),
            TypeKind::Array { elem, len } => format!("std::array<{}, {}>", self.type_text(elem), self.type_text(len)),
            TypeKind::Optional(inner) => format!("std::optional<{}>", self.type_text(inner)),
            TypeKind::Tuple(items) => {
                let items: Vec<String> = items.into_iter().map(|item| self.type_text(item)).collect();
                format!("std::tuple<{}>", items.join(", "))
            }
            TypeKind::Ref { mutable: false, inner } => format!("{} const&", self.type_text(inner)),
            TypeKind::Ref { mutable: true, inner } => format!("{}&", self.type_text(inner)),
            TypeKind::Raw(inner) => format!("{}*", self.type_text(inner)),
            TypeKind::Function { params, ret } => {
                let params: Vec<String> = params.into_iter().map(|param| self.type_text(param)).collect();
                format!("std::function<{}({})>", self.type_text(ret), params.join(", "))
            }
        }
    }

    /// Member types of a concrete struct or enum variant.
    fn members(&mut self, ty: TypeId, variant: Option<usize>) -> Vec<TypeId> {
        let TypeKind::Adt { def, args, .. } = self.program.types.kind(ty).clone() else {
            return Vec::new();
        };
        let (generics, members) = match (&self.program.def(def).kind, variant) {
            (DefKind::Struct(decl), None) => (
                decl.generics.clone(),
                decl.fields.iter().map(|field| field.ty).collect::<Vec<_>>(),
            ),
            (DefKind::Enum(decl), Some(index)) => (
                decl.generics.clone(),
                decl.variants.get(index).map(|v| v.payload.clone()).unwrap_or_default(),
            ),
            _ => return Vec::new(),
        };
        let subst: Subst = generics.iter().map(|generic| generic.id).zip(args).collect();
        members.into_iter().map(|member| self.program.types.subst(member, &subst)).collect()
    }

    // -----------------------------------------------------------------
    // Program layout
    // -----------------------------------------------------------------

    fn emit_program(&mut self, instances: &Instances, options: &CppOptions) {
        self.out.line("// Generated by kitec. Do not edit.");
        self.out.text.push_str(RUNTIME_PRELUDE);

        if !instances.types.is_empty() {
            self.out.blank();
            self.emit_forward_declarations(&instances.types);
            for ty in self.definition_order(&instances.types) {
                self.out.blank();
                self.emit_type_definition(ty);
            }
        }

        if !instances.externs.is_empty() {
            self.out.blank();
            for def in &instances.externs {
                let Some(function) = self.program.function(*def).cloned() else {
                    continue;
                };
                let signature = self.signature(&self.program.def(*def).name.clone(), &function, None);
                self.out.line(&format!("extern \"C\" {signature};"));
            }
        }

        if !instances.functions.is_empty() {
            self.out.blank();
            for instance in &instances.functions {
                self.prototype(instance);
            }
        }

        if !instances.globals.is_empty() {
            self.out.blank();
            for def in &instances.globals {
                self.emit_global(*def);
            }
        }

        for instance in &instances.functions {
            self.out.blank();
            self.emit_function(instance);
        }

        if options.emit_main {
            self.emit_main_wrapper();
        }
    }

    fn emit_forward_declarations(&mut self, types: &[TypeId]) {
        for ty in types {
            let name = self.mangler.adt_name(self.program, *ty);
            match self.c_like_enum(*ty).map(EnumDef::repr_ty) {
                Some(repr) => self.out.line(&format!("enum class {name} : {};", int_ctype(repr))),
                None => self.out.line(&format!("struct {name};")),
            }
        }
    }

    /// Types whose complete definition `ty` needs before its own.
    fn value_dependencies(&mut self, ty: TypeId) -> Vec<TypeId> {
        let variants = match self.program.types.kind(ty) {
            TypeKind::Adt { def, .. } => match self.program.enum_def(*def) {
                Some(decl) => (0..decl.variants.len()).map(Some).collect(),
                None => vec![None],
            },
            _ => Vec::new(),
        };
        let mut out = Vec::new();
        for variant in variants {
            for member in self.members(ty, variant) {
                self.held_by_value(member, &mut out);
            }
        }
        out
    }

    fn held_by_value(&self, ty: TypeId, out: &mut Vec<TypeId>) {
        match self.program.types.kind(ty) {
            TypeKind::Adt { .. } if !self.is_class(ty) => out.push(ty),
            TypeKind::Optional(inner) => self.held_by_value(*inner, out),
            TypeKind::Array { elem, .. } => self.held_by_value(*elem, out),
            TypeKind::Tuple(items) => items.iter().for_each(|item| self.held_by_value(*item, out)),
            _ => {}
        }
    }

    /// Topological order over by-value containment, ties by name.
    fn definition_order(&mut self, types: &[TypeId]) -> Vec<TypeId> {
        let names: Vec<String> = types.iter().map(|ty| self.mangler.adt_name(self.program, *ty)).collect();
        let index_of: FxHashMap<TypeId, usize> = types.iter().enumerate().map(|(index, ty)| (*ty, index)).collect();
        let mut pending = vec![0usize; types.len()];
        let mut users: Vec<Vec<usize>> = vec![Vec::new(); types.len()];
        for (index, ty) in types.iter().enumerate() {
            let deps: FxHashSet<usize> = self
                .value_dependencies(*ty)
                .into_iter()
                .filter_map(|dep| index_of.get(&dep).copied())
                .filter(|dep| *dep != index)
                .collect();
            pending[index] = deps.len();
            for dep in deps {
                users[dep].push(index);
            }
        }
        let mut ready: BTreeSet<(&str, usize)> = (0..types.len())
            .filter(|index| pending[*index] == 0)
            .map(|index| (names[index].as_str(), index))
            .collect();
        let mut order = Vec::with_capacity(types.len());
        let mut placed = vec![false; types.len()];
        while let Some((name, index)) = ready.pop_first() {
            trace!(ty = name, "type definition");
            order.push(types[index]);
            placed[index] = true;
            for user in &users[index] {
                pending[*user] -= 1;
                if pending[*user] == 0 {
                    ready.insert((names[*user].as_str(), *user));
                }
            }
        }
        // containment cycles are rejected by the checker
        order.extend((0..types.len()).filter(|index| !placed[*index]).map(|index| types[index]));
        order
    }

    fn emit_type_definition(&mut self, ty: TypeId) {
        let TypeKind::Adt { def, .. } = self.program.types.kind(ty).clone() else {
            return;
        };
        let name = self.mangler.adt_name(self.program, ty);
        match self.program.def(def).kind.clone() {
            DefKind::Struct(decl) => {
                let members = self.members(ty, None);
                self.out.open(&format!("struct {name} {{"));
                for (field, member) in decl.fields.iter().zip(members) {
                    let member = self.type_text(member);
                    self.out.line(&format!("{member} {};", escape_ident(&field.name)));
                }
                self.out.close("};");
            }
            DefKind::Enum(decl) if decl.is_c_like() => {
                let repr = decl.repr_ty();
                self.out.open(&format!("enum class {name} : {} {{", int_ctype(repr)));
                for (index, variant) in decl.variants.iter().enumerate() {
                    let value = variant.discriminant.unwrap_or(index as i128);
                    let suffix = if value > i64::MAX as i128 { "ULL" } else { "" };
                    self.out.line(&format!("{} = {value}{suffix},", escape_ident(&variant.name)));
                }
                self.out.close("};");
            }
            DefKind::Enum(decl) => {
                let mut alternatives = Vec::new();
                for (index, variant) in decl.variants.iter().enumerate() {
                    let alternative = format!("{name}_{}", variant.name);
                    let members = self.members(ty, Some(index));
                    if members.is_empty() {
                        self.out.line(&format!("struct {alternative} {{}};"));
                    } else {
                        self.out.open(&format!("struct {alternative} {{"));
                        for (position, member) in members.into_iter().enumerate() {
                            let member = self.type_text(member);
                            self.out.line(&format!("{member} _{position};"));
                        }
                        self.out.close("};");
                    }
                    alternatives.push(alternative);
                }
                self.out.open(&format!("struct {name} {{"));
                self.out.line(&format!("std::variant<{}> value;", alternatives.join(", ")));
                self.out.close("};");
            }
            _ => self.violation(format!("`{name}` is not a type"), self.program.def(def).span),
        }
    }

    fn signature(&mut self, name: &str, function: &FunctionDef, params: Option<&[String]>) -> String {
        let ret = self.cpp_type(function.ret);
        let mut types = Vec::new();
        if let (Some(receiver), Some(self_ty)) = (function.receiver, function.self_ty) {
            let self_ty = self.cpp_type(self_ty);
            types.push(match receiver {
                Receiver::View => format!("{self_ty} const&"),
                Receiver::Mutable => format!("{self_ty}&"),
            });
        }
        for param in &function.param_types {
            types.push(self.cpp_type(*param));
        }
        let params = match params {
            Some(names) => types
                .iter()
                .zip(names)
                .map(|(ty, name)| format!("{ty} {name}"))
                .collect::<Vec<_>>(),
            None => types,
        };
        format!("{ret} {name}({})", params.join(", "))
    }

    fn prototype(&mut self, instance: &Instance) {
        let Some(function) = self.program.function(instance.def).cloned() else {
            return;
        };
        self.subst = instance.subst(self.program);
        let signature = self.signature(&instance.name, &function, None);
        self.out.line(&format!("{signature};"));
    }

    fn emit_global(&mut self, def: DefId) {
        let Some(global) = self.program.global(def).cloned() else {
            return;
        };
        self.subst = Subst::default();
        let name = self.mangler.base(self.program, def);
        let Some(value) = global.value else {
            self.violation(format!("`{name}` has no compile-time value"), self.program.def(def).span);
            return;
        };
        let ty = self.type_text(global.ty);
        let init = self.const_value(&value, global.ty);
        let constant = matches!(self.program.def(def).kind, DefKind::Const(_)) || !global.mutable;
        let qualifier = if constant { "const " } else { "" };
        self.out.line(&format!("{qualifier}{ty} {name} = {init};"));
    }

    fn emit_main_wrapper(&mut self) {
        let main = self
            .program
            .units
            .get(self.entry.0 as usize)
            .and_then(|unit| {
                unit.defs
                    .iter()
                    .copied()
                    .find(|def| self.program.def(*def).name == "main")
            })
            .and_then(|def| self.program.function(def).cloned());
        let Some(main) = main else {
            return;
        };
        self.out.blank();
        self.out.open("int main() {");
        if self.program.types.is_integer(main.ret) {
            self.out.line("return static_cast<int>(kite_main());");
        } else {
            self.out.line("kite_main();");
            self.out.line("return 0;");
        }
        self.out.close("}");
    }

    // -----------------------------------------------------------------
    // Functions and statements
    // -----------------------------------------------------------------

    fn begin_body(&mut self, body: &Body) {
        let mut used = FxHashSet::default();
        self.locals = body
            .locals
            .iter()
            .enumerate()
            .map(|(index, local)| {
                let base = if local.name == "this" {
                    "self".to_string()
                } else {
                    escape_ident(&local.name)
                };
                if used.insert(base.clone()) {
                    base
                } else {
                    format!("{base}_{index}")
                }
            })
            .collect();
        self.local_types = body.locals.iter().map(|local| local.ty).collect();
        self.temps = 0;
    }

    fn local_name(&self, local: LocalId) -> String {
        self.locals.get(local.0 as usize).cloned().unwrap_or_default()
    }

    fn local_type(&mut self, local: LocalId) -> TypeId {
        let ty = self.local_types.get(local.0 as usize).copied().unwrap_or(TypeId::ERROR);
        self.concrete(ty)
    }

    fn emit_function(&mut self, instance: &Instance) {
        let Some(function) = self.program.function(instance.def).cloned() else {
            return;
        };
        let Some(body) = function.body.clone() else {
            return;
        };
        trace!(function = %instance.name, "emitting");
        self.subst = instance.subst(self.program);
        self.begin_body(&body);
        let names: Vec<String> = body.params.iter().map(|local| self.local_name(*local)).collect();
        let signature = self.signature(&instance.name, &function, Some(&names));
        self.out.open(&format!("{signature} {{"));
        let ret = self.concrete(function.ret);
        let dest = if self.void_like(ret) { Dest::Discard } else { Dest::Return };
        self.emit_branch(&body.expr, dest);
        self.out.close("}");
    }

    fn emit_block_contents(&mut self, block: &HirBlock, dest: Dest<'_>) {
        for stmt in &block.stmts {
            self.emit_stmt(stmt);
        }
        if let Some(tail) = &block.tail {
            self.emit_into(tail, dest);
        }
    }

    /// Emit the body of a construct that already opened a C++ scope.
    fn emit_branch(&mut self, expr: &HirExpr, dest: Dest<'_>) {
        match &expr.kind {
            HirExprKind::Block(block) => self.emit_block_contents(block, dest),
            _ => self.emit_into(expr, dest),
        }
    }

    fn emit_stmt(&mut self, stmt: &HirStmt) {
        match stmt {
            HirStmt::Let { local, init } => {
                let ty = self.local_type(*local);
                if self.void_like(ty) || init.ty == TypeId::NEVER {
                    self.emit_into(init, Dest::Discard);
                    return;
                }
                let ctype = self.type_text(ty);
                let value = self.expr(init);
                let name = self.local_name(*local);
                self.out.line(&format!("{ctype} {name} = {};", unparen(&value)));
            }
            HirStmt::Expr(expr) => self.emit_into(expr, Dest::Discard),
            HirStmt::While { cond, body } => {
                if escapes(cond) {
                    self.out.open("while (true) {");
                    let cond = self.expr(cond);
                    self.out.line(&format!("if (!({})) break;", unparen(&cond)));
                } else {
                    let cond = self.expr(cond);
                    self.out.open(&format!("while ({}) {{", unparen(&cond)));
                }
                self.emit_block_contents(body, Dest::Discard);
                self.out.close("}");
            }
            HirStmt::Loop { body } => {
                self.out.open("while (true) {");
                self.emit_block_contents(body, Dest::Discard);
                self.out.close("}");
            }
            HirStmt::ForRange {
                local,
                start,
                end,
                inclusive,
                body,
            } => {
                let ty = self.local_type(*local);
                let ctype = self.type_text(ty);
                let name = self.local_name(*local);
                let limit = self.temp();
                let start = self.expr(start);
                let end = self.expr(end);
                let op = if *inclusive { "<=" } else { "<" };
                self.out.open(&format!(
                    "for ({ctype} {name} = {}, {limit} = {}; {name} {op} {limit}; ++{name}) {{",
                    unparen(&start),
                    unparen(&end)
                ));
                self.emit_block_contents(body, Dest::Discard);
                self.out.close("}");
            }
            HirStmt::ForEach { local, iterable, body } => {
                let ty = self.local_type(*local);
                let ctype = self.type_text(ty);
                let name = self.local_name(*local);
                let iterable = self.expr(iterable);
                self.out.open(&format!("for ({ctype} const& {name} : {}) {{", unparen(&iterable)));
                self.emit_block_contents(body, Dest::Discard);
                self.out.close("}");
            }
            HirStmt::Defer(inner) => {
                let guard = self.temp();
                self.out.open(&format!("kite_rt::Defer {guard}([&]() {{"));
                self.emit_stmt(inner);
                self.out.close("});");
            }
        }
    }

    /// Lower `expr` as statements delivering its value to `dest`.
    fn emit_into(&mut self, expr: &HirExpr, dest: Dest<'_>) {
        match &expr.kind {
            HirExprKind::Block(block) => {
                if block.stmts.is_empty() && block.tail.is_none() {
                    return;
                }
                self.out.open("{");
                self.emit_block_contents(block, dest);
                self.out.close("}");
            }
            HirExprKind::If { .. } => self.emit_if(expr, dest),
            HirExprKind::Match { scrutinee, arms } => self.emit_match(scrutinee, arms, dest),
            HirExprKind::Return(value) => match value {
                Some(value) if !self.void_like(value.ty) => self.emit_into(value, Dest::Return),
                Some(value) => {
                    self.emit_into(value, Dest::Discard);
                    self.out.line("return;");
                }
                None => self.out.line("return;"),
            },
            HirExprKind::Break => self.out.line("break;"),
            HirExprKind::Continue => self.out.line("continue;"),
            HirExprKind::Void => {}
            HirExprKind::Assign { op, target, value } if matches!(dest, Dest::Discard) => {
                let target = self.place(target);
                let value = self.expr(value);
                let op = op.map(BinaryOp::symbol).unwrap_or("");
                self.out.line(&format!("{target} {op}= {};", unparen(&value)));
            }
            _ => {
                let ty = self.concrete(expr.ty);
                let value = self.expr(expr);
                let value = unparen(&value);
                match dest {
                    Dest::Discard => self.out.line(&format!("{value};")),
                    Dest::Return if self.void_like(ty) => {
                        self.out.line(&format!("{value};"));
                        if ty != TypeId::NEVER {
                            self.out.line("return;");
                        }
                    }
                    Dest::Return => self.out.line(&format!("return {value};")),
                    Dest::Assign(_) if self.void_like(ty) => self.out.line(&format!("{value};")),
                    Dest::Assign(target) => self.out.line(&format!("{target} = {value};")),
                }
            }
        }
    }

    fn emit_if(&mut self, expr: &HirExpr, dest: Dest<'_>) {
        let mut current = expr;
        let mut first = true;
        while let HirExprKind::If {
            cond,
            then_branch,
            else_branch,
        } = &current.kind
        {
            let cond = self.expr(cond);
            let cond = unparen(&cond);
            if first {
                self.out.open(&format!("if ({cond}) {{"));
            } else {
                self.out.reopen(&format!("}} else if ({cond}) {{"));
            }
            first = false;
            self.emit_branch(then_branch, dest);
            match else_branch.as_deref() {
                Some(next) if matches!(next.kind, HirExprKind::If { .. }) && !escapes_condition(next) => current = next,
                Some(other) => {
                    self.out.reopen("} else {");
                    self.emit_branch(other, dest);
                    break;
                }
                None => break,
            }
        }
        self.out.close("}");
    }

    fn emit_match(&mut self, scrutinee: &HirExpr, arms: &[HirArm], dest: Dest<'_>) {
        let subject = self.temp();
        let value = self.expr(scrutinee);
        let subject_ty = self.concrete(scrutinee.ty);
        let subject_ty = self.program.types.strip_refs(subject_ty);
        self.out.open("{");
        self.out.line(&format!("auto const& {subject} = {};", unparen(&value)));
        let mut first = true;
        let mut exhaustive = false;
        for arm in arms {
            let mut conditions = Vec::new();
            let mut bindings = Vec::new();
            for pattern in &arm.patterns {
                let (condition, bound) = self.pattern(pattern, &subject, subject_ty);
                conditions.push(condition);
                bindings.extend(bound);
            }
            let condition = if conditions.iter().any(|c| c.is_empty()) {
                String::new()
            } else if conditions.len() == 1 {
                conditions.remove(0)
            } else {
                conditions.iter().map(|c| format!("({c})")).collect::<Vec<_>>().join(" || ")
            };
            match (condition.is_empty(), first) {
                (true, true) => self.out.open("{"),
                (true, false) => self.out.reopen("} else {"),
                (false, true) => self.out.open(&format!("if ({condition}) {{")),
                (false, false) => self.out.reopen(&format!("}} else if ({condition}) {{")),
            }
            first = false;
            for (local, access) in bindings {
                let ty = self.local_type(local);
                let ctype = self.type_text(ty);
                let name = self.local_name(local);
                self.out.line(&format!("{ctype} {name} = {access};"));
            }
            self.emit_branch(&arm.body, dest);
            if condition.is_empty() {
                exhaustive = true;
                break;
            }
        }
        if !exhaustive {
            if first {
                self.out.line("kite_rt::unreachable();");
            } else {
                self.out.reopen("} else {");
                self.out.line("kite_rt::unreachable();");
            }
        }
        if !first {
            self.out.close("}");
        }
        self.out.close("}");
    }

    /// The test for `pattern` against `subject` and the locals it binds.
    /// An empty test always matches.
    fn pattern(&mut self, pattern: &HirPattern, subject: &str, ty: TypeId) -> (String, Vec<(LocalId, String)>) {
        match pattern {
            HirPattern::Wildcard => (String::new(), Vec::new()),
            HirPattern::Binding(local) => (String::new(), vec![(*local, subject.to_string())]),
            HirPattern::Int(value) => {
                let int = self.program.types.int_ty(ty).unwrap_or(IntTy::I64);
                (format!("{subject} == {}", int_literal(int, *value)), Vec::new())
            }
            HirPattern::Bool(true) => (subject.to_string(), Vec::new()),
            HirPattern::Bool(false) => (format!("!{subject}"), Vec::new()),
            HirPattern::Char(value) => (format!("{subject} == {}", char_literal(*value)), Vec::new()),
            HirPattern::Str(value) => (format!("{subject} == {}", string_literal(value)), Vec::new()),
            HirPattern::None => (format!("!{subject}.has_value()"), Vec::new()),
            HirPattern::Some(inner) => {
                let inner_ty = self.program.types.optional_inner(ty).unwrap_or(TypeId::ERROR);
                let (condition, bindings) = self.pattern(inner, &format!("(*{subject})"), inner_ty);
                let mut conditions = vec![format!("{subject}.has_value()")];
                if !condition.is_empty() {
                    conditions.push(condition);
                }
                (conditions.join(" && "), bindings)
            }
            HirPattern::Variant { def, index, fields } => {
                let name = self.mangler.adt_name(self.program, ty);
                let Some(decl) = self.program.enum_def(*def).cloned() else {
                    return (String::new(), Vec::new());
                };
                let variant = decl.variants.get(*index).map(|v| v.name.clone()).unwrap_or_default();
                if decl.is_c_like() {
                    return (format!("{subject} == {name}::{}", escape_ident(&variant)), Vec::new());
                }
                let members = self.members(ty, Some(*index));
                let mut conditions = vec![format!("{subject}.value.index() == {index}")];
                let mut bindings = Vec::new();
                for (position, (field, member)) in fields.iter().zip(members).enumerate() {
                    let access = format!("std::get<{index}>({subject}.value)._{position}");
                    let (condition, bound) = self.pattern(field, &access, member);
                    if !condition.is_empty() {
                        conditions.push(condition);
                    }
                    bindings.extend(bound);
                }
                (conditions.join(" && "), bindings)
            }
        }
    }

    // -----------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------

    /// Value of a control-flow expression used inside another expression.
    fn control_value(&mut self, expr: &HirExpr) -> String {
        let ty = self.concrete(expr.ty);
        if escapes(expr) && !self.void_like(ty) {
            let temp = self.temp();
            let ctype = self.type_text(ty);
            self.out.line(&format!("{ctype} {temp}{{}};"));
            self.emit_into(expr, Dest::Assign(&temp));
            return temp;
        }
        let ret = self.type_text(ty);
        let pad = "    ".repeat(self.out.indent);
        let body = self.capture(|this| this.emit_into(expr, Dest::Return));
        format!("[&]() -> {ret} {{\n{body}{pad}}}()")
    }

    /// A place expression, for assignment targets.
    fn place(&mut self, expr: &HirExpr) -> String {
        match &expr.kind {
            HirExprKind::Index { base, index } => {
                let base = self.place(base);
                let index = self.expr(index);
                format!("kite_rt::at({base}, {})", unparen(&index))
            }
            _ => self.expr(expr),
        }
    }

    fn narrow(&mut self, ty: TypeId, text: String) -> String {
        match self.program.types.int_ty(ty) {
            Some(int) if int.bits() < 32 => format!("static_cast<{}>({})", int_ctype(int), unparen(&text)),
            _ => text,
        }
    }

    fn expr(&mut self, expr: &HirExpr) -> String {
        let ty = self.concrete(expr.ty);
        match &expr.kind {
            HirExprKind::Int(value) => {
                let int = self.program.types.int_ty(ty).unwrap_or(IntTy::I64);
                int_literal(int, *value)
            }
            HirExprKind::Float(value) => {
                let float = self.program.types.float_ty(ty).unwrap_or(FloatTy::F64);
                float_literal(float, *value)
            }
            HirExprKind::Bool(value) => value.to_string(),
            HirExprKind::Char(value) => char_literal(*value),
            HirExprKind::Str(value) => string_literal(value),
            HirExprKind::Void => "(void)0".to_string(),
            HirExprKind::None => format!("{}{{}}", self.type_text(ty)),
            HirExprKind::Some(inner) => {
                let inner = self.expr(inner);
                format!("{}({})", self.type_text(ty), unparen(&inner))
            }
            HirExprKind::Local(local) => self.local_name(*local),
            HirExprKind::Global(def) => self.mangler.base(self.program, *def),
            HirExprKind::ConstParam(param) => {
                let bound = self.subst.get(param).copied();
                match bound.map(|bound| self.program.types.kind(bound).clone()) {
                    Some(TypeKind::Const(value)) => {
                        let int = self.program.types.int_ty(ty).unwrap_or(IntTy::Usize);
                        int_literal(int, value as i128)
                    }
                    _ => {
                        self.violation("unbound const parameter", expr.span);
                        String::new()
                    }
                }
            }
            HirExprKind::FunctionRef { def, generic_args } => {
                let args: Vec<TypeId> = generic_args.iter().map(|arg| self.concrete(*arg)).collect();
                self.mangler.function_name(self.program, *def, &args)
            }
            HirExprKind::Unary { op, operand } => self.unary(*op, operand, ty),
            HirExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, ty),
            HirExprKind::Assign { op, target, value } => {
                let target = self.place(target);
                let value = self.expr(value);
                let op = op.map(BinaryOp::symbol).unwrap_or("");
                format!("({target} {op}= {})", unparen(&value))
            }
            HirExprKind::Range { .. } => {
                self.violation("range used as a value", expr.span);
                String::new()
            }
            HirExprKind::Cast(inner) => {
                let from = self.concrete(inner.ty);
                let value = self.expr(inner);
                if from == ty {
                    return value;
                }
                let target = self.type_text(ty);
                let raw = matches!(
                    (self.program.types.kind(from), self.program.types.kind(ty)),
                    (TypeKind::Raw(_), TypeKind::Raw(_))
                );
                let cast = if raw { "reinterpret_cast" } else { "static_cast" };
                format!("{cast}<{target}>({})", unparen(&value))
            }
            HirExprKind::Call { callee, args } => self.call(callee, args, ty, expr.span),
            HirExprKind::Field { base, name, .. } => {
                let base_ty = self.concrete(base.ty);
                let access = if self.is_class(base_ty) { "->" } else { "." };
                let base = self.expr(base);
                format!("{base}{access}{}", escape_ident(name))
            }
            HirExprKind::TupleIndex { base, index } => {
                let base = self.expr(base);
                format!("std::get<{index}>({})", unparen(&base))
            }
            HirExprKind::Index { base, index: _ } => {
                let base_ty = self.concrete(base.ty);
                let text = self.place(expr);
                if self.program.types.strip_refs(base_ty) == TypeId::STRING {
                    format!("static_cast<uint8_t>({text})")
                } else {
                    text
                }
            }
            HirExprKind::Slice {
                base,
                start,
                end,
                inclusive,
            } => {
                let base = self.expr(base);
                let start = self.expr(start);
                let end = self.expr(end);
                let end = if *inclusive { format!("{end} + 1") } else { unparen(&end).to_string() };
                format!("kite_rt::slice({}, {}, {end})", unparen(&base), unparen(&start))
            }
            HirExprKind::Unwrap(inner) => {
                let inner = self.expr(inner);
                format!("{inner}.value()")
            }
            HirExprKind::Tuple(items) | HirExprKind::Sequence(items) => {
                let items: Vec<String> = items.iter().map(|item| self.expr(item)).collect();
                let items: Vec<&str> = items.iter().map(|item| unparen(item)).collect();
                format!("{}{{{}}}", self.type_text(ty), items.join(", "))
            }
            HirExprKind::Fill { value, count } => {
                let value = self.expr(value);
                match self.program.types.kind(ty).clone() {
                    TypeKind::Array { elem, len } => {
                        let elem = self.type_text(elem);
                        let len = self.type_text(len);
                        format!("kite_rt::fill<{elem}, {len}>({})", unparen(&value))
                    }
                    _ => {
                        let count = self.expr(count);
                        format!("{}({}, {})", self.type_text(ty), unparen(&count), unparen(&value))
                    }
                }
            }
            HirExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let branches = plain_value(then_branch).zip(else_branch.as_deref().and_then(plain_value));
                match branches {
                    Some((then_value, else_value))
                        if !self.void_like(ty)
                            && self.concrete(then_value.ty) == ty
                            && self.concrete(else_value.ty) == ty =>
                    {
                        let cond = self.expr(cond);
                        let then_value = self.expr(then_value);
                        let else_value = self.expr(else_value);
                        format!("({cond} ? {then_value} : {else_value})")
                    }
                    _ => self.control_value(expr),
                }
            }
            HirExprKind::Match { .. } => self.control_value(expr),
            HirExprKind::Block(block) if block.stmts.is_empty() => match &block.tail {
                Some(tail) => self.expr(tail),
                None => "(void)0".to_string(),
            },
            HirExprKind::Block(_) => self.control_value(expr),
            HirExprKind::Return(_) | HirExprKind::Break | HirExprKind::Continue => {
                self.emit_into(expr, Dest::Discard);
                "(void)0".to_string()
            }
            HirExprKind::Error => {
                self.violation("erroneous expression reached code generation", expr.span);
                String::new()
            }
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: &HirExpr, ty: TypeId) -> String {
        let operand_ty = self.concrete(operand.ty);
        let value = self.expr(operand);
        match op {
            UnaryOp::Neg => self.narrow(ty, format!("(-{value})")),
            UnaryOp::Not => format!("(!{value})"),
            UnaryOp::BitNot => self.narrow(ty, format!("(~{value})")),
            // views are C++ references and bind directly
            UnaryOp::Ref | UnaryOp::RefMut => value,
            UnaryOp::Deref => match self.program.types.kind(operand_ty) {
                TypeKind::Raw(_) => format!("(*{value})"),
                _ => value,
            },
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &HirExpr, rhs: &HirExpr, ty: TypeId) -> String {
        let operand_ty = self.concrete(lhs.ty);
        let left = self.expr(lhs);
        let right = self.expr(rhs);
        let float = self.program.types.float_ty(self.program.types.strip_refs(operand_ty)).is_some();
        match op {
            BinaryOp::Rem if float => format!("std::fmod({}, {})", unparen(&left), unparen(&right)),
            BinaryOp::And
            | BinaryOp::Or
            | BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => format!("({left} {} {right})", op.symbol()),
            _ => self.narrow(ty, format!("({left} {} {right})", op.symbol())),
        }
    }

    fn call(&mut self, callee: &Callee, args: &[HirExpr], ty: TypeId, span: Span) -> String {
        match callee {
            Callee::Builtin(builtin) => return self.builtin_call(*builtin, args),
            Callee::BuiltinMethod(method) => return self.builtin_method(*method, args),
            _ => {}
        }
        let values: Vec<String> = args.iter().map(|arg| self.expr(arg)).collect();
        let values = values.iter().map(|value| unparen(value)).collect::<Vec<_>>().join(", ");
        match callee {
            Callee::Function { def, generic_args } => {
                let args: Vec<TypeId> = generic_args.iter().map(|arg| self.concrete(*arg)).collect();
                let name = self.mangler.function_name(self.program, *def, &args);
                format!("{name}({values})")
            }
            Callee::TraitMethod {
                trait_def,
                method,
                self_ty,
            } => {
                let self_ty = self.concrete(*self_ty);
                match monomorph::resolve_trait_method(self.program, *trait_def, method, self_ty) {
                    Some((def, args)) => {
                        let name = self.mangler.function_name(self.program, def, &args);
                        format!("{name}({values})")
                    }
                    None => {
                        let shown = self.program.types.display(self_ty);
                        self.violation(format!("no implementation of `{method}` for `{shown}`"), span);
                        String::new()
                    }
                }
            }
            Callee::Indirect(function) => {
                let function = self.expr(function);
                format!("{function}({values})")
            }
            Callee::Constructor { .. } => {
                let name = self.mangler.adt_name(self.program, ty);
                let init = format!("{name}{{{values}}}");
                if self.is_class(ty) {
                    format!("std::make_shared<{name}>({init})")
                } else {
                    init
                }
            }
            Callee::Variant { def, index } => {
                let name = self.mangler.adt_name(self.program, ty);
                let Some(decl) = self.program.enum_def(*def) else {
                    return String::new();
                };
                let variant = decl.variants.get(*index).map(|v| v.name.clone()).unwrap_or_default();
                if decl.is_c_like() {
                    format!("{name}::{}", escape_ident(&variant))
                } else {
                    format!("{name}{{{name}_{variant}{{{values}}}}}")
                }
            }
            Callee::Builtin(_) | Callee::BuiltinMethod(_) => String::new(),
        }
    }

    /// Argument of a formatting builtin, converted to text.
    fn shown(&mut self, arg: &HirExpr) -> String {
        let ty = self.concrete(arg.ty);
        let value = self.expr(arg);
        match self.c_like_enum(ty).map(EnumDef::repr_ty) {
            Some(repr) => format!("kite_rt::show(static_cast<{}>({}))", int_ctype(repr), unparen(&value)),
            None => format!("kite_rt::show({})", unparen(&value)),
        }
    }

    fn builtin_call(&mut self, builtin: BuiltinFn, args: &[HirExpr]) -> String {
        let function = match builtin {
            BuiltinFn::Panic => {
                let message = args.first().map(|arg| self.expr(arg)).unwrap_or_default();
                return format!("kite_rt::panic({})", unparen(&message));
            }
            BuiltinFn::Println => "println",
            BuiltinFn::Print => "print",
            BuiltinFn::Eprintln => "eprintln",
        };
        let Some((format, rest)) = args.split_first() else {
            return format!("kite_rt::{function}(\"\")");
        };
        let format = self.expr(format);
        let shown: Vec<String> = rest.iter().map(|arg| self.shown(arg)).collect();
        format!("kite_rt::{function}(kite_rt::format({format}, {{{}}}))", shown.join(", "))
    }

    fn builtin_method(&mut self, method: BuiltinMethod, args: &[HirExpr]) -> String {
        let values: Vec<String> = args.iter().map(|arg| self.expr(arg)).collect();
        let receiver = values.first().cloned().unwrap_or_default();
        match method {
            BuiltinMethod::StringLen | BuiltinMethod::VectorLen | BuiltinMethod::ArrayLen => format!("{receiver}.size()"),
            BuiltinMethod::StringIsEmpty | BuiltinMethod::VectorIsEmpty => format!("{receiver}.empty()"),
            BuiltinMethod::VectorPush => {
                let value = values.get(1).map(|value| unparen(value).to_string()).unwrap_or_default();
                format!("{receiver}.push_back({value})")
            }
            BuiltinMethod::VectorPop => format!("kite_rt::pop({})", unparen(&receiver)),
            BuiltinMethod::OptionalHasValue => format!("{receiver}.has_value()"),
        }
    }

    /// C++ spelling of a compile-time value of type `ty`.
    fn const_value(&mut self, value: &ConstValue, ty: TypeId) -> String {
        match value {
            ConstValue::Int { value, ty: own } => {
                let int = self.program.types.int_ty(ty).unwrap_or(*own);
                int_literal(int, *value)
            }
            ConstValue::Float(value) => {
                let float = self.program.types.float_ty(ty).unwrap_or(FloatTy::F64);
                float_literal(float, *value)
            }
            ConstValue::Bool(value) => value.to_string(),
            ConstValue::Char(value) => char_literal(*value),
            ConstValue::Str(value) => string_literal(value),
            ConstValue::Void => "(void)0".to_string(),
            ConstValue::Tuple(items) => {
                let types = match self.program.types.kind(ty) {
                    TypeKind::Tuple(types) => types.clone(),
                    _ => Vec::new(),
                };
                let items: Vec<String> = items
                    .iter()
                    .zip(types)
                    .map(|(item, item_ty)| self.const_value(item, item_ty))
                    .collect();
                format!("{}{{{}}}", self.type_text(ty), items.join(", "))
            }
            ConstValue::Sequence(items) => {
                let elem = match self.program.types.kind(ty) {
                    TypeKind::Vector(elem) | TypeKind::Array { elem, .. } => *elem,
                    _ => TypeId::ERROR,
                };
                let items: Vec<String> = items.iter().map(|item| self.const_value(item, elem)).collect();
                format!("{}{{{}}}", self.type_text(ty), items.join(", "))
            }
            ConstValue::Optional(None) => format!("{}{{}}", self.type_text(ty)),
            ConstValue::Optional(Some(inner)) => {
                let inner_ty = self.program.types.optional_inner(ty).unwrap_or(ty);
                let inner = self.const_value(inner, inner_ty);
                format!("{}({inner})", self.type_text(ty))
            }
            ConstValue::Struct { fields, .. } => {
                let name = self.mangler.adt_name(self.program, ty);
                let members = self.members(ty, None);
                let fields: Vec<String> = fields
                    .iter()
                    .zip(members)
                    .map(|(field, member)| self.const_value(field, member))
                    .collect();
                let init = format!("{name}{{{}}}", fields.join(", "));
                if self.is_class(ty) {
                    format!("std::make_shared<{name}>({init})")
                } else {
                    init
                }
            }
            ConstValue::Variant { def, index, fields } => {
                let name = self.mangler.adt_name(self.program, ty);
                let Some(decl) = self.program.enum_def(*def).cloned() else {
                    return String::new();
                };
                let variant = decl.variants.get(*index).map(|v| v.name.clone()).unwrap_or_default();
                if decl.is_c_like() {
                    return format!("{name}::{}", escape_ident(&variant));
                }
                let members = self.members(ty, Some(*index));
                let fields: Vec<String> = fields
                    .iter()
                    .zip(members)
                    .map(|(field, member)| self.const_value(field, member))
                    .collect();
                format!("{name}{{{name}_{variant}{{{}}}}}", fields.join(", "))
            }
        }
    }
}

/// An `else if` whose condition would need statements hoisted before it.
fn escapes_condition(expr: &HirExpr) -> bool {
    match &expr.kind {
        HirExprKind::If { cond, .. } => escapes(cond),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::const_eval::Limits;
    use crate::parser::{DEFAULT_MAX_DEPTH, parse_unit};
    use crate::span::FileId;
    use crate::typecheck::check_modules;

    fn emit(source: &str) -> String {
        let parsed = parse_unit(FileId(0), source, DEFAULT_MAX_DEPTH);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        let (mut program, diagnostics) = check_modules([("main", &parsed.module)], Limits::default());
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        generate(&mut program, UnitId(0), &CppOptions::default()).expect("codegen succeeds")
    }

    #[test]
    fn indexing_is_checked_and_string_bytes_are_unsigned() {
        let out = emit("function pick(v: [i64], s: String) -> i64 { v[1] + s[0] as i64 }");
        assert!(out.contains("kite_rt::at(v, "), "{out}");
        assert!(out.contains("static_cast<uint8_t>(kite_rt::at(s, "), "{out}");
    }

    #[test]
    fn literals_have_fixed_spellings() {
        assert_eq!(int_literal(IntTy::I32, -5), "int32_t{-5}");
        assert_eq!(int_literal(IntTy::U64, 7), "uint64_t{7ULL}");
        assert_eq!(int_literal(IntTy::I64, i64::MIN as i128), "INT64_MIN");
        assert_eq!(float_literal(FloatTy::F32, 1.5), "1.5f");
        assert_eq!(float_literal(FloatTy::F64, 2.0), "2.0");
        assert_eq!(char_literal('a'), "U'a'");
        assert_eq!(char_literal('\n'), "char32_t{0xA}");
        assert_eq!(string_literal("say \"hi\"\n"), "std::string(\"say \\\"hi\\\"\\n\")");
    }

    #[test]
    fn unparen_only_strips_enclosing_pairs() {
        assert_eq!(unparen("(a + b)"), "a + b");
        assert_eq!(unparen("(a) + (b)"), "(a) + (b)");
        assert_eq!(unparen("(s == \"(\") == (t == \")\")"), "(s == \"(\") == (t == \")\")");
    }

    #[test]
    fn structs_become_aggregates() {
        let out = emit(
            "struct Point { x: i64, y: i64 }\n\
             function origin() -> Point { Point(x: 0, y: 0) }",
        );
        assert!(out.contains("struct Point {\n    int64_t x;\n    int64_t y;\n};"), "{out}");
        assert!(out.contains("return Point{int64_t{0LL}, int64_t{0LL}};"), "{out}");
    }

    #[test]
    fn one_definition_per_instantiation() {
        let out = emit(
            "struct Box<T> { value: T }\n\
             function a() -> Box<i32> { Box(value: 1) }\n\
             function b() -> Box<i32> { Box(value: 2) }",
        );
        assert_eq!(out.matches("struct Box__i32 {").count(), 1, "{out}");
        assert_eq!(out.matches("struct Box__i32;").count(), 1, "{out}");
    }

    #[test]
    fn contained_types_are_defined_first() {
        let out = emit(
            "struct Outer { inner: Inner }\n\
             struct Inner { value: i64 }\n\
             function make() -> Outer { Outer(inner: Inner(value: 1)) }",
        );
        let inner = out.find("struct Inner {").expect("inner defined");
        let outer = out.find("struct Outer {").expect("outer defined");
        assert!(inner < outer);
    }

    #[test]
    fn enums_use_their_encodings() {
        let out = emit(
            "enum Color: u8 { Red, Green = 4, Blue }\n\
             enum Shape { Circle(f64), Empty }\n\
             function show(c: Color) { println(\"{}\", c); }\n\
             function area(s: Shape) -> f64 { match s { Shape::Circle(r) => r * r, Shape::Empty => 0.0 } }",
        );
        assert!(out.contains("enum class Color : uint8_t {\n    Red = 0,\n    Green = 4,\n    Blue = 5,\n};"), "{out}");
        assert!(out.contains("kite_rt::show(static_cast<uint8_t>(c))"), "{out}");
        assert!(out.contains("std::variant<Shape_Circle, Shape_Empty> value;"), "{out}");
        assert!(out.contains(".value.index() == 0"), "{out}");
        assert!(out.contains("double r = std::get<0>(kite_t0.value)._0;"), "{out}");
    }

    #[test]
    fn nested_value_matches_become_lambdas() {
        let out = emit(
            "function pick(flag: bool) -> i64 { 1 + match flag { true => 1, false => 2 } }",
        );
        assert!(out.contains("[&]() -> int64_t {"), "{out}");
    }

    #[test]
    fn matches_with_early_returns_are_hoisted() {
        let out = emit(
            "function first(v: i64?) -> i64 { let x = match v { some(n) => n, none => return 0 }; x + 1 }",
        );
        assert!(out.contains("int64_t kite_t0{};"), "{out}");
        assert!(out.contains("return int64_t{0LL};"), "{out}");
        assert!(!out.contains("[&]()"), "{out}");
    }

    #[test]
    fn classes_are_shared() {
        let out = emit(
            "class Counter { count: i64 }\n\
             function bump(c: Counter) { c.count += 1; }\n\
             function make() -> Counter { Counter(count: 0) }",
        );
        assert!(out.contains("void bump(std::shared_ptr<Counter> c)"), "{out}");
        assert!(out.contains("c->count += int64_t{1LL};"), "{out}");
        assert!(out.contains("std::make_shared<Counter>(Counter{int64_t{0LL}})"), "{out}");
    }

    #[test]
    fn loops_defer_and_main() {
        let out = emit(
            "function main() {\n\
                 defer println(\"done\");\n\
                 for i in 0..3 { println(\"{}\", i); }\n\
             }",
        );
        assert!(out.contains("kite_rt::Defer kite_t0([&]() {"), "{out}");
        assert!(out.contains("for (int64_t i = int64_t{0LL}, kite_t1 = int64_t{3LL}; i < kite_t1; ++i) {"), "{out}");
        assert!(out.contains("void kite_main() {"), "{out}");
        assert!(out.contains("int main() {\n    kite_main();\n    return 0;\n}"), "{out}");
    }

    #[test]
    fn globals_are_emitted_from_their_values() {
        let out = emit("const LIMIT: i64 = 2 * 5;\nstatic mut COUNT: u8 = 1;");
        assert!(out.contains("const int64_t LIMIT = int64_t{10LL};"), "{out}");
        assert!(out.contains("uint8_t COUNT = uint8_t{1};"), "{out}");
    }

    #[test]
    fn output_is_deterministic() {
        let source = "struct B { x: i64 }\nstruct A { b: B }\n\
                      function f(a: A) -> i64 { a.b.x }\nfunction main() { }";
        assert_eq!(emit(source), emit(source));
    }
}
