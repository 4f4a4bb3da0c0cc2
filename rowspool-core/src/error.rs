//! Error types for table and spool operations

use std::io;
use thiserror::Error;

/// Result type for table and spool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for table and spool operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error during load/save
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Assigned column shape disagrees with the dataset row count
    #[error("shape mismatch for field '{field}': expected {expected} rows, got {actual}")]
    ShapeMismatch {
        /// Field being assigned
        field: String,
        /// Dataset row count
        expected: usize,
        /// Length of the assigned data
        actual: usize,
    },

    /// Constructor inputs of unequal length
    #[error("length mismatch for field '{field}': expected {expected} rows, got {actual}")]
    LengthMismatch {
        /// Offending field
        field: String,
        /// Length of the first supplied field
        expected: usize,
        /// Length of this field
        actual: usize,
    },

    /// Unrecognized or explicitly unimplemented serialization format
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Oversubscribed sampling
    #[error("insufficient items: requested {requested}, available {available}")]
    InsufficientItems {
        /// Number of rows requested
        requested: usize,
        /// Number of rows available
        available: usize,
    },

    /// Row or column access by an absent field name
    #[error("unknown field: '{0}'")]
    UnknownField(String),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
