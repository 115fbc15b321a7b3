#![deny(missing_docs)]
//! Tracing-scalar recording façade and top-level compiler for Forge
//! (spec §6).
//!
//! This is the crate application code links against directly: it wires the
//! IR recording session (`forge-ir`), the x86-64 JIT backend (`forge-jit`),
//! and the value buffer (`forge-runtime`) behind `fdouble`/`fbool`/`fint`
//! operator-overloaded types and a small [`Compiler`] entry point, in the
//! same three-layer split the teacher's `sunscreen_frontend_types` /
//! `sunscreen_compiler` / `sunscreen_runtime` crates use.

mod compiler;
mod config;
mod error;
mod types;

pub use compiler::Compiler;
pub use config::CompilerConfig;
pub use error::{Error, Result};
pub use types::{Fbool, Fdouble, Fint, Selectable};

pub use forge_ir::{is_recording, Recorder};
pub use forge_jit::InstructionSetKind;
pub use forge_runtime::Buffer;
