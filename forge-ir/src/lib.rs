#![deny(missing_docs)]
//! Graph intermediate representation and thread-local recording session for
//! Forge (spec §3, §4.1, §4.2).
//!
//! This crate knows nothing about x86-64 or JIT compilation; it is the
//! "frontend" layer, grounded on the teacher's
//! `sunscreen_frontend_types`/`sunscreen_compiler` split between an
//! operator-overload-driven IR and the backend that consumes it.

mod error;
mod graph;
mod node;
mod recorder;

pub use error::{Error, Result};
pub use graph::Graph;
pub use node::{Node, NodeId, OpCode, NO_NODE};
pub use recorder::{is_recording, mark_input, with_active_graph, Recorder};
