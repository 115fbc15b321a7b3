use thiserror::Error;

/// Errors raised while building or indexing into a [`crate::Buffer`] (spec
/// §7, §4.9).
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error(transparent)]
    Jit(#[from] forge_jit::Error),

    #[error("node id {node} is out of range for a buffer sized for {num_nodes} nodes")]
    NodeOutOfRange { node: u32, num_nodes: usize },

    #[error(
        "lane buffer has {actual} entries, but this buffer's kernel was compiled for vector \
         width {expected}"
    )]
    LaneWidthMismatch { expected: usize, actual: usize },

    #[error("gradient access on node {node} but this buffer carries no adjoint region (kernel has no reverse pass)")]
    NoGradientRegion { node: u32 },
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
