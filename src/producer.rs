//! Producer interface: anything that can compute outputs for an input point.
//!
//! A producer may be a real simulation, a surrogate, or a layered composition
//! of either. The core only requires that every local identifier handed out
//! by `evaluate_nowait` eventually appears in a `synchronize` result exactly
//! once.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConsistencyError, EvalResult};
use crate::point::InputPoint;
use crate::request::RequestSpec;
use crate::response::Response;

/// A producer's own evaluation counter.
///
/// Local ids are assigned by each producer independently and monotonically;
/// they carry no meaning outside that producer and must be re-keyed to the
/// caller's logical numbering before results travel upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalEvalId(u64);

impl LocalEvalId {
    /// Wraps a raw counter value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw counter value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalEvalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local#{}", self.0)
    }
}

/// Whether `synchronize` waits for all outstanding work or returns whatever
/// subset is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Suspend the calling flow until every outstanding request resolves.
    Block,
    /// Return immediately with the results that are already available.
    NoBlock,
}

/// A component capable of computing outputs for an input point.
///
/// Within one producer, results are retrievable in the order their local
/// identifiers were issued. Across producers no ordering is guaranteed.
pub trait Producer: Send + Sync {
    /// Identity of the underlying executable/mapping.
    ///
    /// Records generated by this producer carry this id, so it must be stable
    /// across runs for the cache and log to be of any use.
    fn id(&self) -> &str;

    /// Number of outputs this producer serves.
    fn output_len(&self) -> usize;

    /// Computes `request` at `point` synchronously.
    fn evaluate(&self, point: &InputPoint, request: &RequestSpec) -> EvalResult<Response>;

    /// Enqueues `request` at `point` and returns immediately.
    fn evaluate_nowait(&self, point: &InputPoint, request: &RequestSpec)
        -> EvalResult<LocalEvalId>;

    /// Retrieves completed evaluations, in local-id issue order.
    ///
    /// With [`SyncPolicy::Block`] this waits for every outstanding request;
    /// with [`SyncPolicy::NoBlock`] it returns only what is ready.
    fn synchronize(&self, policy: SyncPolicy) -> EvalResult<Vec<(LocalEvalId, Response)>>;
}

/// Index of the first requested bit `active` fails to cover, if any.
pub(crate) fn first_unsatisfied(active: &RequestSpec, request: &RequestSpec) -> Option<usize> {
    if active.len() != request.len() {
        return Some(0);
    }
    (0..request.len()).find(|&i| !active.code(i).contains(request.code(i)))
}

/// Synchronous producer backed by a plain function.
///
/// Useful for surrogates evaluated in-process and for tests. Queued entry
/// points are a configuration error here; wrap the producer in
/// [`QueuedProducer`](crate::dispatch::QueuedProducer) to add them.
pub struct FnProducer<F> {
    id: String,
    outputs: usize,
    func: F,
}

impl<F> FnProducer<F>
where
    F: Fn(&InputPoint, &RequestSpec) -> EvalResult<Response> + Send + Sync,
{
    /// Creates a producer from a function.
    ///
    /// # Errors
    /// `ConfigError::EmptyProducerId` if the id is blank.
    pub fn new(id: impl Into<String>, outputs: usize, func: F) -> Result<Self, ConfigError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ConfigError::EmptyProducerId);
        }
        Ok(Self { id, outputs, func })
    }
}

impl<F> Producer for FnProducer<F>
where
    F: Fn(&InputPoint, &RequestSpec) -> EvalResult<Response> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn output_len(&self) -> usize {
        self.outputs
    }

    fn evaluate(&self, point: &InputPoint, request: &RequestSpec) -> EvalResult<Response> {
        if request.len() != self.outputs {
            return Err(ConfigError::RequestLengthMismatch {
                producer: self.id.clone(),
                request_len: request.len(),
                producer_len: self.outputs,
            }
            .into());
        }
        let response = (self.func)(point, request)?;
        if let Some(index) = first_unsatisfied(response.active(), request) {
            return Err(ConsistencyError::OutputMissing { index }.into());
        }
        // Catch layouts that claim data without populating it before they
        // reach the cache.
        response.validate()?;
        Ok(response)
    }

    fn evaluate_nowait(
        &self,
        _point: &InputPoint,
        _request: &RequestSpec,
    ) -> EvalResult<LocalEvalId> {
        Err(ConfigError::AsyncUnsupported {
            producer: self.id.clone(),
        }
        .into())
    }

    fn synchronize(&self, _policy: SyncPolicy) -> EvalResult<Vec<(LocalEvalId, Response)>> {
        Err(ConfigError::AsyncUnsupported {
            producer: self.id.clone(),
        }
        .into())
    }
}
