//! Error types for Kestrel.
//!
//! All errors are strongly typed using thiserror. The split mirrors the
//! propagation policy: configuration and data-consistency errors abort the
//! run, storage errors surface the failing backend, and cache misses are not
//! errors at all (lookups return `Option`).

use thiserror::Error;

use crate::storage::StorageError;

/// Configuration errors detected while wiring producers and split rules.
///
/// These are fatal: retrying with the same configuration cannot succeed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("replication factor {replication} does not divide response length {response_len} of producer '{producer}'")]
    ReplicationMismatch {
        producer: String,
        response_len: usize,
        replication: usize,
    },

    #[error("replication factor must be at least 1")]
    ZeroReplication,

    #[error("approximate output index {index} is out of range for {outputs} outputs")]
    ApproxIndexOutOfRange {
        index: usize,
        outputs: usize,
    },

    #[error("request has {request_len} outputs but producer '{producer}' serves {producer_len}")]
    RequestLengthMismatch {
        producer: String,
        request_len: usize,
        producer_len: usize,
    },

    #[error("length {len} is not divisible by replication factor {replication}")]
    IndivisibleLength {
        len: usize,
        replication: usize,
    },

    #[error("replicates of output {output} disagree during deflation")]
    ReplicateDisagreement {
        output: usize,
    },

    #[error("producer '{producer}' does not support queued evaluation")]
    AsyncUnsupported {
        producer: String,
    },

    #[error("{context}: expected dimension {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("producer id cannot be empty")]
    EmptyProducerId,
}

/// Data-consistency errors raised when results cannot be trusted.
///
/// Callers must be able to rely on every requested bit being populated, so
/// these abort the run rather than propagate partial data.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("requested output {index} was computed by neither side of a combination")]
    OutputMissing {
        index: usize,
    },

    #[error("output {index} was computed by both sides of a disjoint overlay")]
    OutputOverlap {
        index: usize,
    },

    #[error("producer '{producer}' has no pending entry for local id {local}")]
    UnknownLocalId {
        producer: String,
        local: u64,
    },

    #[error("producer '{producer}' already has a live entry for local id {local}")]
    DuplicateLocalId {
        producer: String,
        local: u64,
    },

    #[error("no popped batch available to push")]
    UndoStackEmpty,

    #[error("no active batch to pop")]
    NoActiveBatch,

    #[error("unknown batch token {batch}")]
    UnknownBatch {
        batch: String,
    },

    #[error("unknown fidelity key '{key}'")]
    UnknownFidelityKey {
        key: String,
    },

    #[error("no combined data staged; call combine() before promote()")]
    NothingCombined,

    #[error("logical evaluation {logical} is unknown to the reassembly table")]
    UnknownLogicalId {
        logical: u64,
    },
}

/// Top-level error type for Kestrel operations.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("internal error: {message}")]
    Internal {
        message: String,
    },
}

impl EvalError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this is a data-consistency error.
    #[must_use]
    pub const fn is_consistency(&self) -> bool {
        matches!(self, Self::Consistency(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this error must terminate the run.
    ///
    /// Configuration and consistency errors are never recoverable; storage
    /// errors leave the in-memory state intact and the run may continue
    /// without persistence.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::Consistency(_) | Self::Internal { .. } => true,
            Self::Storage(_) => false,
        }
    }
}

/// Result type alias for Kestrel operations.
pub type EvalResult<T> = Result<T, EvalError>;
