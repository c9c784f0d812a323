//! Evaluation records: one computed unit of work.
//!
//! A record ties together the input point, the identity of the producer that
//! computed it, the request that was actually satisfied, and the outputs.
//! Records are immutable once created; augmented derivative content is stored
//! as an additional record for the same (producer, point) pair.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::point::{CacheKey, InputPoint};
use crate::request::RequestSpec;
use crate::response::Response;

/// Evaluation identifier with explicit provenance.
///
/// Replaces the legacy sign-encoded integer convention (positive = this run,
/// zero = imported, negative = restored) with a tagged variant carrying the
/// same disambiguation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "provenance", content = "id", rename_all = "snake_case")]
pub enum EvalId {
    /// Generated in the current run; unique within it.
    RunLocal(u64),
    /// Imported from an external data file; not guaranteed unique.
    Imported,
    /// Recovered from a persisted log; not guaranteed unique.
    Restored(i64),
}

impl EvalId {
    /// Returns true if the id was generated in the current run.
    #[must_use]
    pub const fn is_run_local(&self) -> bool {
        matches!(self, Self::RunLocal(_))
    }

    /// Returns true if the id is guaranteed unique within this run.
    ///
    /// Only run-local ids carry that guarantee; imported and restored ids may
    /// collide with anything.
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.is_run_local()
    }

    /// The run-local counter value, if any.
    #[must_use]
    pub const fn run_local(&self) -> Option<u64> {
        match self {
            Self::RunLocal(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for EvalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunLocal(n) => write!(f, "#{n}"),
            Self::Imported => write!(f, "imported"),
            Self::Restored(n) => write!(f, "restored({n})"),
        }
    }
}

/// One computed unit: (input point, producer identity, satisfied request,
/// outputs, global identifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    producer_id: String,
    eval_id: EvalId,
    point: InputPoint,
    response: Response,
}

impl EvaluationRecord {
    /// Creates a record.
    ///
    /// # Errors
    /// `ConfigError::EmptyProducerId` if the producer identity is blank.
    pub fn new(
        producer_id: impl Into<String>,
        eval_id: EvalId,
        point: InputPoint,
        response: Response,
    ) -> Result<Self, ConfigError> {
        let producer_id = producer_id.into();
        if producer_id.trim().is_empty() {
            return Err(ConfigError::EmptyProducerId);
        }
        Ok(Self {
            producer_id,
            eval_id,
            point,
            response,
        })
    }

    /// Identity of the producer that generated this record.
    ///
    /// This names the executable/mapping, not the evaluation counter.
    #[must_use]
    pub fn producer_id(&self) -> &str {
        &self.producer_id
    }

    /// The record's evaluation identifier.
    #[must_use]
    pub const fn eval_id(&self) -> EvalId {
        self.eval_id
    }

    /// The input point the record was computed at.
    #[must_use]
    pub fn point(&self) -> &InputPoint {
        &self.point
    }

    /// The computed outputs.
    #[must_use]
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// The request this record actually satisfies.
    ///
    /// Always a bitwise superset of what was originally asked.
    #[must_use]
    pub fn satisfied(&self) -> &RequestSpec {
        self.response.active()
    }

    /// The record's content-addressed cache key.
    #[must_use]
    pub fn key(&self) -> CacheKey {
        self.point.digest(&self.producer_id)
    }

    /// Re-tags the record with a different evaluation id.
    ///
    /// Used when records cross a provenance boundary, e.g. log replay re-keys
    /// run-local ids to [`EvalId::Restored`].
    #[must_use]
    pub fn with_eval_id(mut self, eval_id: EvalId) -> Self {
        self.eval_id = eval_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestCode;

    fn record(producer: &str) -> EvaluationRecord {
        let spec = RequestSpec::new(vec![RequestCode::VALUE]);
        let mut resp = Response::new(spec);
        resp.set_value(0, 1.0).unwrap();
        EvaluationRecord::new(
            producer,
            EvalId::RunLocal(1),
            InputPoint::new(vec![1.0, 2.0]),
            resp,
        )
        .unwrap()
    }

    #[test]
    fn test_eval_id_provenance() {
        assert!(EvalId::RunLocal(3).is_unique());
        assert!(!EvalId::Imported.is_unique());
        assert!(!EvalId::Restored(-7).is_unique());
        assert_eq!(EvalId::RunLocal(3).run_local(), Some(3));
        assert_eq!(EvalId::Restored(-7).run_local(), None);
    }

    #[test]
    fn test_eval_id_display() {
        assert_eq!(EvalId::RunLocal(12).to_string(), "#12");
        assert_eq!(EvalId::Imported.to_string(), "imported");
        assert_eq!(EvalId::Restored(-4).to_string(), "restored(-4)");
    }

    #[test]
    fn test_eval_id_serde_roundtrip() {
        for id in [EvalId::RunLocal(9), EvalId::Imported, EvalId::Restored(-2)] {
            let json = serde_json::to_string(&id).unwrap();
            let back: EvalId = serde_json::from_str(&json).unwrap();
            assert_eq!(back, id);
        }
    }

    #[test]
    fn test_empty_producer_id_rejected() {
        let spec = RequestSpec::new(vec![RequestCode::VALUE]);
        let resp = Response::new(spec);
        let err = EvaluationRecord::new("  ", EvalId::Imported, InputPoint::new(vec![1.0]), resp)
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyProducerId));
    }

    #[test]
    fn test_key_matches_point_digest() {
        let rec = record("sim1");
        assert_eq!(rec.key(), rec.point().digest("sim1"));
        assert_ne!(rec.key(), record("sim2").key());
    }

    #[test]
    fn test_retagging() {
        let rec = record("sim1").with_eval_id(EvalId::Restored(-1));
        assert_eq!(rec.eval_id(), EvalId::Restored(-1));
    }
}
