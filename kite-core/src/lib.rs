//! Core compiler pipeline for the Kite language.
//!
//! The pipeline is roughly:
//!
//!   source .kite
//!     -> lexer      (tokens)
//!     -> parser     (AST, Pratt expressions)
//!     -> name_resolve + typecheck (types, HIR, compile-time evaluation)
//!     -> monomorph  (one instance per generic use)
//!     -> codegen_cpp (C++17 source)
//!
//! [`compiler`] drives the whole pipeline over a set of units; [`session`]
//! exposes the same checker to a REPL and to editor tooling. The CLI should
//! depend on this crate rather than reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod span;
pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod lexer;
pub mod parser;
pub mod ast;

// ---------------------------------------------------------------------
// Semantic layers: types, name resolution, type checking, HIR
// ---------------------------------------------------------------------

pub mod types;
pub mod name_resolve;
pub mod typecheck;
pub mod hir;
pub mod const_eval;

// ---------------------------------------------------------------------
// Builtins and stdlib integration
// ---------------------------------------------------------------------

pub mod builtins;
pub mod stdlib;

// ---------------------------------------------------------------------
// Back-end: code generation and compiler orchestration
// ---------------------------------------------------------------------

pub mod monomorph;
pub mod codegen_cpp;
pub mod compiler;
pub mod session;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{CompileOptions, CompileOutput, SourceUnit, compile};
pub use diagnostic::{Category, Diagnostic, Diagnostics, Severity};
pub use error::CoreError;
pub use session::{Analysis, Outcome, Session, Submission, analyze};
pub use span::{FileId, SourceMap, Span};
