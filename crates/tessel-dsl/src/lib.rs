//! Tessel DSL compiler
//!
//! Lowers host-declared parallel computations over mesh and grid
//! relations into a typed task graph with statically-determined field
//! access modes, stencil footprints, and reduction semantics.
//!
//! ## Pipeline
//!
//! ```text
//! raw AST + host environment
//!     ↓ specialize   (names, macros, relation identity)
//!     ↓ check        (types, coercion, affine legality)
//!     ↓ phase        (access modes, race freedom)
//!     ↓ lower        (task specs + driver)
//! TaskGraph
//! ```
//!
//! Hosts drive a [`Context`]: declarations and control statements are
//! recorded into a serializable [`program::Program`], which
//! [`compile::compile`] turns into a [`tessel_ir::TaskGraph`] for the
//! runtime.

pub mod ast;
pub mod cache;
pub mod check;
pub mod compile;
pub mod context;
pub mod error;
pub mod grid;
pub mod lower;
pub mod phase;
pub mod program;
pub mod relation;
pub mod span;
pub mod specialize;

pub use compile::{compile, compile_for, deserialize_program, serialize_program};
pub use context::Context;
pub use error::{CompileError, CompileResult, ErrorKind};
pub use program::Program;
pub use span::Span;
