use std::path::PathBuf;

use thiserror::Error;

use crate::span::Span;

/// Failures of the toolchain itself, as opposed to problems in the
/// compiled program (those are [`Diagnostic`](crate::diagnostic::Diagnostic)s).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("standard library directory was not found at {0}")]
    MissingStdlib(PathBuf),
    #[error("failed to start a compiler thread: {0}")]
    ThreadSpawn(std::io::Error),
    #[error("entry unit `{0}` is not part of the compilation")]
    UnknownEntry(String),
    /// The typed program has a shape codegen is not defined for. This is a
    /// bug in the compiler, never a user error.
    #[error("internal compiler error: {message} (at byte {})", span.start)]
    CodegenInvariant { message: String, span: Span },
}

impl CoreError {
    pub fn invariant(message: impl Into<String>, span: Span) -> Self {
        CoreError::CodegenInvariant {
            message: message.into(),
            span,
        }
    }
}
