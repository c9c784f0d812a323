//! Abstract storage traits.
//!
//! The evaluation log is an external collaborator: the core may be seeded
//! from one at start-up and offers every new record for append-only
//! persistence, but it does not define the log's on-disk layout.

use thiserror::Error;

use crate::record::EvaluationRecord;

/// Errors that can occur in storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O failure.
    #[error("i/o error: {0}")]
    Io(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A frame failed its integrity check.
    #[error("corrupt frame at sequence {sequence}: {detail}")]
    Corrupt {
        /// Sequence number of the first bad frame.
        sequence: u64,
        /// What failed.
        detail: String,
    },

    /// Backend error.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Append-only persistence collaborator for evaluation records.
///
/// Implementations must preserve insertion order on replay and must not fail
/// a replay on trailing corruption; they truncate at the first bad frame
/// instead, since a partially recovered history is still a usable seed.
pub trait EvalLog: Send + Sync {
    /// Offers a freshly computed record for persistence.
    fn append(&self, record: &EvaluationRecord) -> Result<(), StorageError>;

    /// Reads back every persisted record, in append order.
    ///
    /// Run-local identifiers do not survive a restart; replayed records are
    /// re-keyed to [`EvalId::Restored`](crate::record::EvalId::Restored).
    fn replay(&self) -> Result<Vec<EvaluationRecord>, StorageError>;

    /// Forces buffered appends to durable storage.
    fn flush(&self) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: the log trait stays object-safe.
    fn _assert_eval_log_object_safe(_: &dyn EvalLog) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Corrupt {
            sequence: 12,
            detail: "crc mismatch".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("crc mismatch"));

        let err = StorageError::Io("permission denied".to_string());
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing log");
        let err: StorageError = io.into();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(err.to_string().contains("missing log"));
    }
}
