//! RequestPro Declarative Compiler
//!
//! This crate compiles the block and redirect rules of a rule table into the
//! host filter engine's declarative rule format, and (with the `worker`
//! feature) keeps the installed table in step with the engine.

pub mod declarative;
#[cfg(feature = "worker")]
pub mod worker;

pub use declarative::{compile, fold_conditions, CompiledAction, CompiledCondition, CompiledRule, CompilerConfig};
#[cfg(feature = "worker")]
pub use worker::{DeclarativeSink, InstallError, Recompiler};
