//! Error types for the diff crate.

use std::path::PathBuf;

use patchwork_store::StoreError;
use patchwork_types::ObjectId;

use crate::patch::PatchState;

/// Errors that can occur while loading, diffing, parsing or rendering patches.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// A content id could not be resolved by the object store.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Reading a working-tree file failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed patch text.
    #[error("patch parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A structurally valid header whose contents are inconsistent: hunk
    /// arithmetic, rename paths that do not match the header, or a truncated
    /// binary payload.
    #[error("invalid patch header at line {line}: {message}")]
    InvalidHeader { line: usize, message: String },

    /// Hunk or line index past the end.
    #[error("{what} index {index} out of range (have {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    /// The patch has not reached the state the operation needs.
    #[error("patch is {state:?}, operation requires {required}")]
    NotReady {
        state: PatchState,
        required: &'static str,
    },

    /// A callback asked to stop. Not a failure.
    #[error("operation aborted by callback")]
    UserAborted,

    /// Not enough content to build a similarity digest.
    #[error("content too small to fingerprint ({considered} hashes considered)")]
    ContentTooSmall { considered: usize },

    /// Invalid configuration or options.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The line engine produced output the adapter cannot interpret.
    #[error("line engine error: {0}")]
    Engine(String),
}

impl DiffError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn header(line: usize, message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            line,
            message: message.into(),
        }
    }

    /// Lift a store failure, surfacing unknown ids as [`Self::ObjectNotFound`].
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::ObjectNotFound(id),
            other => Self::Store(other),
        }
    }

    /// Returns `true` for the callback-initiated stop signal.
    pub fn is_user_abort(&self) -> bool {
        matches!(self, Self::UserAborted)
    }

    /// The 1-based line of patch text where a parse problem was detected.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Parse { line, .. } | Self::InvalidHeader { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
