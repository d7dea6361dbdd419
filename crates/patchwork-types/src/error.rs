use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected at most {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid file mode: {0:?}")]
    InvalidMode(String),
}
