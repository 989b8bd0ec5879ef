//! Error types for the compile entry points.
//!
//! Internal invariant violations (malformed lowering output, allocator
//! conflicts) are panics, not errors. `CompileError` covers what bad input
//! across the public seam can legitimately produce.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    /// The language requires the single top-level class to be named `Program`.
    #[error("class name must be 'Program', found '{0}'")]
    WrongClassName(String),

    #[error("duplicate method '{0}'")]
    DuplicateMethod(String),

    #[error("failed to write assembly: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CompileError>;
