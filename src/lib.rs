//! Back end for a small class-based teaching language: AST flattening to a
//! three-address IR, reaching-definitions dataflow, global constant
//! propagation, loop-invariant detection, web-based register allocation,
//! and x86-64 assembly emission.
//!
//! The typed AST in `frontend::ast` is the input surface; `driver::compile`
//! runs the whole pipeline and returns assembly text.

pub mod backend;
pub mod common;
pub mod driver;
pub mod frontend;
pub mod ir;
pub mod passes;

pub use common::error::{CompileError, Result};
pub use driver::{compile, compile_to, compile_with, Options};
