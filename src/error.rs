use std::fmt::Debug;
use thiserror::Error;

/// Enum with all errors in this crate.
#[derive(Error, Debug)]
pub enum KdIndexError {
    /// Bad caller-supplied data: zero dimensionality, zero rows, or a point
    /// block whose dimensionality disagrees with the index.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation requires a built tree.
    #[error("Index has not been built.")]
    NotBuilt,

    /// The point identifier does not name a registered point.
    #[error("Point id {0} is out of range.")]
    OutOfRange(u32),

    /// The point identifier was already removed.
    #[error("Point id {0} was already removed.")]
    AlreadyRemoved(u32),

    /// The persisted buffer is not a kd-index encoding this build understands.
    #[error("Format error: {0}")]
    FormatError(String),

    /// The supplied point data has a different dimensionality than the
    /// persisted index.
    #[error("Dimension mismatch: index has {expected} dimensions, data has {actual}.")]
    DimensionMismatch {
        /// Dimensionality recorded in the persisted header.
        expected: usize,
        /// Dimensionality of the caller-supplied data.
        actual: usize,
    },

    /// The persisted buffer ended before all declared content was read.
    #[error("Truncated index data: {0}")]
    Truncated(String),

    /// I/O failure while persisting or loading an index.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KdIndexError>;
