//! # scribe-instrumenter
//!
//! Compiles scribe annotations (`#invariant`, `#if_succeeds`, `#assert`, ...) into runtime checks
//! inside a Solidity AST, and describes the generated code for downstream tooling.

#[macro_use]
extern crate tracing;

pub mod annotations;
pub mod ast;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod instrument;
pub mod interpose;
pub mod metadata;
pub mod transpile;
pub mod transpiling_context;

pub use annotations::{AnnotationMetaData, Annotations};
pub use config::{AssertionMode, InstrumentationConfig};
pub use driver::{instrument, InstrumentationResult};
pub use error::{InstrumentationError, Result};
pub use metadata::{InstrumentationMetadata, PropertyDesc};
