//! # Kestrel - Evaluation Caching and Dispatch for Design-Space Exploration
//!
//! Kestrel sits between outer algorithms (optimizers, trust-region
//! minimizers, multifidelity correctors) and the producers that actually
//! compute outputs. It avoids redundant evaluations through a
//! content-addressed record store with subset satisfaction, services one
//! logical evaluation by splitting it across a cheap approximate producer
//! and an expensive actual one, and versions surrogate training data with
//! stacked pop/push rollback.
//!
//! ## Core Concepts
//!
//! - **RequestSpec**: which outputs are wanted, and at what derivative depth
//! - **EvaluationRecord**: one computed unit with producer identity and
//!   provenance-tagged id
//! - **EvaluationStore**: the cache, answering superset-containment lookups
//! - **EvalEngine**: split, cache-consult, dispatch, re-key, combine
//! - **ApproxData**: keyed surrogate samples with anchor and undo history
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kestrel::{
//!     EngineConfig, EvalEngine, FnProducer, InputPoint, RequestCode, RequestSpec, Response,
//! };
//!
//! let surrogate = Arc::new(FnProducer::new("surrogate", 2, |point, request| {
//!     let mut resp = Response::new(request.clone());
//!     resp.set_value(0, point.coords()[0].sin())?;
//!     Ok(resp)
//! })?);
//! let simulation = Arc::new(FnProducer::new("sim1", 2, |point, request| {
//!     // expensive path
//!     # unimplemented!()
//! })?);
//!
//! let mut config = EngineConfig::new(2);
//! config.approx_outputs.insert(0);
//! let mut engine = EvalEngine::new(surrogate, simulation, config)?;
//!
//! let request = RequestSpec::uniform(2, RequestCode::VALUE);
//! let response = engine.evaluate(&InputPoint::new(vec![0.3, 0.7]), &request)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod combine;
pub mod error;
pub mod point;
pub mod record;
pub mod request;
pub mod response;

// Dispatch, storage, and surrogate data
pub mod dispatch;
pub mod engine;
pub mod producer;
pub mod storage;
pub mod surrogate;

// Re-export primary types at crate root for convenience
pub use combine::{AffineCorrection, CombineMode, Correction};
pub use dispatch::{DispatchSplitter, LogicalEvalId, PendingMap, QueuedProducer};
pub use engine::{EngineConfig, EvalEngine, Exporter};
pub use error::{ConfigError, ConsistencyError, EvalError, EvalResult};
pub use point::{CacheKey, InputPoint};
pub use producer::{FnProducer, LocalEvalId, Producer, SyncPolicy};
pub use record::{EvalId, EvaluationRecord};
pub use request::{RequestCode, RequestSpec};
pub use response::{ReplicateReduction, Response};
pub use storage::{EvalLog, EvaluationStore, StorageError};
pub use surrogate::{ApproxData, BatchId, BuildState, FidelityKey, SurrogatePoint};

#[cfg(feature = "persistent")]
pub use storage::persistent::{FileEvalLog, LogFrame};
