use thiserror::Error;

/// Errors raised by graph construction and the recording session (spec §7).
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("operation requires an active recorder on this thread, but none is recording")]
    RecordingNotActive,

    #[error("a recorder is already active on this thread")]
    RecorderAlreadyActive,

    #[error("stop() was called without marking any output")]
    NoOutputsMarked,

    #[error("node {node} references operand {operand}, which is not less than its own id")]
    OperandOutOfRange { node: u32, operand: u32 },

    #[error(
        "an active tracing value was coerced to a native branch or scalar while recording; \
         the only sound way to branch on or extract a recorded value is the graph's own If \
         operator"
    )]
    ActiveBoolInBranch,

    #[error("constant node {node} has invalid pool index {index}")]
    InvalidConstPoolIndex { node: u32, index: usize },

    #[error("fint::index called on a zero-length array")]
    EmptyArrayIndex,
}

pub type Result<T> = std::result::Result<T, Error>;
