use thiserror::Error;

/// Errors raised anywhere in the `forge` facade: tracing-scalar recording,
/// JIT compilation, or buffer access. Wraps each lower crate's error type so
/// callers match against a single enum (spec §7: `forge::Error` wraps the
/// lower crates' errors with `#[from]`).
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error(transparent)]
    Ir(#[from] forge_ir::Error),

    #[error(transparent)]
    Jit(#[from] forge_jit::Error),

    #[error(transparent)]
    Runtime(#[from] forge_runtime::Error),
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
