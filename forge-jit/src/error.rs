use thiserror::Error;

/// Errors raised by constant-pool planning, code generation, and kernel
/// execution (spec §7).
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error(transparent)]
    Ir(#[from] forge_ir::Error),

    #[error("failed to allocate executable memory for the compiled kernel")]
    CodeBufferAllocationFailed,

    #[error(
        "buffer shape mismatch: kernel expects {expected_nodes} nodes at vector width \
         {expected_width}, buffer has {actual_nodes} nodes at vector width {actual_width}"
    )]
    BufferShapeMismatch {
        expected_nodes: usize,
        expected_width: usize,
        actual_nodes: usize,
        actual_width: usize,
    },

    #[error("constant node {node} has invalid pool index {index}")]
    InvalidConstPoolIndex { node: u32, index: usize },
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
