#![deny(missing_docs)]
//! x86-64 JIT backend for Forge graphs (spec §4.3-§4.8).
//!
//! Compiles a [`forge_ir::Graph`] to native machine code for either a
//! scalar SSE2 kernel (one double per call) or a packed AVX2 kernel (four
//! doubles per call, processed independently lane-wise). A kernel always
//! emits its forward pass; a reverse (adjoint) pass is added automatically
//! whenever the graph has at least one differentiated input.
//!
//! This crate knows nothing about recording graphs (that's `forge-ir`) or
//! about owning the value buffer a kernel runs against (that's
//! `forge-runtime`); it only turns a finished graph into callable code.

mod const_pool;
mod error;
mod forward;
mod isa;
mod kernel;
mod register;
mod reverse;

pub use const_pool::{ConstPoolPlan, PoolAlignment};
pub use error::{Error, Result};
pub use isa::{Avx2, InstructionSet, InstructionSetKind, Predicate, Sse2};
pub use kernel::Kernel;
pub use register::{with_locked, Allocation, RegIdx, RegisterAllocator, RegisterLock, NUM_REGISTERS};
