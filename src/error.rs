//! Error type shared by every stage of the analysis pipeline.

use thiserror::Error;

/// Reasons a trace table can be rejected while parsing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("row {row}: field {column} is not a number ({field:?})")]
    Malformed {
        row: usize,
        column: usize,
        field: String,
    },
    #[error("row {row}: particle id {value} is not a non-negative integer")]
    InvalidId { row: usize, value: f64 },
    #[error("row {row}: expected {expected} columns, found {found}")]
    ColumnCount {
        row: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("length mismatch: particle {id} has {found} values, expected {expected}")]
    LengthMismatch {
        id: u64,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "csv")]
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
