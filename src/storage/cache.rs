//! In-memory evaluation record store.
//!
//! The store keeps every record in two logical views: an append-only sequence
//! in insertion order (for temporal replay) and a hash index keyed on the
//! content digest of (producer id, input point) (for amortized O(1) lookup).
//! Hashing deliberately excludes the request spec: hashing on it would
//! fragment identical inputs across buckets and defeat incremental
//! derivative augmentation, so the (typically 1–3) candidates sharing a key
//! are scanned linearly with the superset test.

use std::collections::HashMap;

use tracing::debug;

use crate::point::{CacheKey, InputPoint};
use crate::record::{EvalId, EvaluationRecord};
use crate::request::RequestSpec;

/// Unbounded cache of previously computed evaluation records.
///
/// Records are never evicted or mutated in place; augmenting the derivative
/// content of a point appends a second record for the same (producer, point)
/// pair with a different satisfied request. Size management is an external
/// concern (log rotation).
#[derive(Debug, Default)]
pub struct EvaluationStore {
    records: Vec<EvaluationRecord>,
    by_key: HashMap<CacheKey, Vec<usize>>,
}

impl EvaluationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Unconditionally appends a record.
    ///
    /// Duplicate (producer, point) pairs are legal and expected when a later
    /// call augments derivative content.
    pub fn insert(&mut self, record: EvaluationRecord) {
        let key = record.key();
        let index = self.records.len();
        self.records.push(record);
        self.by_key.entry(key).or_default().push(index);
    }

    /// Looks up a record that can serve `query` at `point` for `producer_id`.
    ///
    /// Returns a record iff one exists whose producer and input point match
    /// exactly and whose satisfied request is a superset of `query` (bitmask
    /// per output, derivative coordinates included). Among several satisfying
    /// records the earliest inserted wins. A miss is not an error; callers
    /// treat it as "must recompute".
    #[must_use]
    pub fn lookup(
        &self,
        producer_id: &str,
        point: &InputPoint,
        query: &RequestSpec,
    ) -> Option<&EvaluationRecord> {
        let key = point.digest(producer_id);
        let found = self.by_key.get(&key).and_then(|candidates| {
            candidates
                .iter()
                .map(|&i| &self.records[i])
                .find(|record| {
                    // The digest already encodes producer and point, but the
                    // scan re-checks both so a digest collision cannot serve
                    // the wrong record.
                    record.producer_id() == producer_id
                        && record.point() == point
                        && record.satisfied().contains(query)
                })
        });
        match found {
            Some(record) => {
                debug!(producer = producer_id, eval = %record.eval_id(), "cache hit");
                Some(record)
            }
            None => {
                debug!(producer = producer_id, "cache miss");
                None
            }
        }
    }

    /// Tolerance-based lookup: a linear scan in insertion order.
    ///
    /// For callers that accept inexact input matching. This bypasses the hash
    /// index entirely, so it is O(n) in the store size.
    #[must_use]
    pub fn lookup_approx(
        &self,
        producer_id: &str,
        point: &InputPoint,
        tol: f64,
        query: &RequestSpec,
    ) -> Option<&EvaluationRecord> {
        self.records.iter().find(|record| {
            record.producer_id() == producer_id
                && record.point().approx_eq(point, tol)
                && record.satisfied().contains(query)
        })
    }

    /// All records, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &EvaluationRecord> {
        self.records.iter()
    }

    /// All records for one producer, in insertion (temporal) order.
    ///
    /// This is the sequential-replay view, independent of hash bucket order.
    pub fn records_for_producer<'a>(
        &'a self,
        producer_id: &'a str,
    ) -> impl Iterator<Item = &'a EvaluationRecord> {
        self.records
            .iter()
            .filter(move |record| record.producer_id() == producer_id)
    }

    /// Seeds the store from a replayed persisted log.
    ///
    /// Run-local ids from the previous run are re-keyed to
    /// [`EvalId::Restored`] (negative counter, legacy log convention);
    /// already-restored and imported ids pass through unchanged.
    pub fn seed_restored(&mut self, records: impl IntoIterator<Item = EvaluationRecord>) {
        for record in records {
            let eval_id = match record.eval_id() {
                #[allow(clippy::cast_possible_wrap)]
                EvalId::RunLocal(n) => EvalId::Restored(-(n as i64)),
                other => other,
            };
            self.insert(record.with_eval_id(eval_id));
        }
    }

    /// Seeds the store from an external data file.
    ///
    /// Imported records carry no identifier guarantee at all.
    pub fn seed_imported(&mut self, records: impl IntoIterator<Item = EvaluationRecord>) {
        for record in records {
            self.insert(record.with_eval_id(EvalId::Imported));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestCode;
    use crate::response::Response;

    fn record(producer: &str, coords: Vec<f64>, spec: RequestSpec, id: u64) -> EvaluationRecord {
        let mut resp = Response::new(spec);
        for i in 0..resp.len() {
            if resp.active().code(i).wants_value() {
                resp.set_value(i, 1.0).unwrap();
            }
        }
        EvaluationRecord::new(producer, EvalId::RunLocal(id), InputPoint::new(coords), resp)
            .unwrap()
    }

    fn vg() -> RequestCode {
        RequestCode::VALUE | RequestCode::GRADIENT
    }

    #[test]
    fn test_exact_hit_and_miss() {
        let mut store = EvaluationStore::new();
        store.insert(record(
            "sim1",
            vec![1.0, 2.0],
            RequestSpec::uniform(1, RequestCode::VALUE),
            1,
        ));

        let query = RequestSpec::uniform(1, RequestCode::VALUE);
        assert!(store.lookup("sim1", &InputPoint::new(vec![1.0, 2.0]), &query).is_some());
        assert!(store.lookup("sim1", &InputPoint::new(vec![1.0, 2.1]), &query).is_none());
        assert!(store.lookup("sim2", &InputPoint::new(vec![1.0, 2.0]), &query).is_none());
    }

    #[test]
    fn test_superset_satisfaction() {
        let mut store = EvaluationStore::new();
        store.insert(record(
            "sim1",
            vec![0.5],
            RequestSpec::with_deriv_vars(vec![vg()], vec![0]),
            1,
        ));

        let point = InputPoint::new(vec![0.5]);
        // A value-only query is served by the value+gradient record.
        assert!(store
            .lookup("sim1", &point, &RequestSpec::uniform(1, RequestCode::VALUE))
            .is_some());
        // A Hessian query is not.
        assert!(store
            .lookup("sim1", &point, &RequestSpec::uniform(1, RequestCode::HESSIAN))
            .is_none());
    }

    #[test]
    fn test_incremental_augmentation() {
        // A {VALUE} record does not serve {VALUE, GRADIENT} until a second,
        // richer record for the same (producer, point) pair lands.
        let mut store = EvaluationStore::new();
        let point = InputPoint::new(vec![1.0, 2.0]);
        store.insert(record(
            "sim1",
            vec![1.0, 2.0],
            RequestSpec::uniform(1, RequestCode::VALUE),
            1,
        ));

        let rich_query = RequestSpec::with_deriv_vars(vec![vg()], vec![0, 1]);
        assert!(store.lookup("sim1", &point, &rich_query).is_none());

        store.insert(record(
            "sim1",
            vec![1.0, 2.0],
            RequestSpec::with_deriv_vars(vec![vg()], vec![0, 1]),
            2,
        ));
        assert!(store.lookup("sim1", &point, &rich_query).is_some());
        // The original value-only lookup still succeeds.
        assert!(store
            .lookup("sim1", &point, &RequestSpec::uniform(1, RequestCode::VALUE))
            .is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_earliest_satisfying_record_wins() {
        let mut store = EvaluationStore::new();
        store.insert(record("sim1", vec![1.0], RequestSpec::uniform(1, RequestCode::VALUE), 1));
        store.insert(record("sim1", vec![1.0], RequestSpec::uniform(1, RequestCode::VALUE), 2));

        let hit = store
            .lookup(
                "sim1",
                &InputPoint::new(vec![1.0]),
                &RequestSpec::uniform(1, RequestCode::VALUE),
            )
            .unwrap();
        assert_eq!(hit.eval_id(), EvalId::RunLocal(1));
    }

    #[test]
    fn test_insertion_order_replay() {
        let mut store = EvaluationStore::new();
        store.insert(record("a", vec![1.0], RequestSpec::uniform(1, RequestCode::VALUE), 1));
        store.insert(record("b", vec![2.0], RequestSpec::uniform(1, RequestCode::VALUE), 2));
        store.insert(record("a", vec![3.0], RequestSpec::uniform(1, RequestCode::VALUE), 3));

        let all: Vec<u64> = store.iter().filter_map(|r| r.eval_id().run_local()).collect();
        assert_eq!(all, vec![1, 2, 3]);

        let for_a: Vec<u64> = store
            .records_for_producer("a")
            .filter_map(|r| r.eval_id().run_local())
            .collect();
        assert_eq!(for_a, vec![1, 3]);
    }

    #[test]
    fn test_tolerance_scan() {
        let mut store = EvaluationStore::new();
        store.insert(record("sim1", vec![1.0], RequestSpec::uniform(1, RequestCode::VALUE), 1));

        let near = InputPoint::new(vec![1.0 + 1e-10]);
        let query = RequestSpec::uniform(1, RequestCode::VALUE);
        assert!(store.lookup("sim1", &near, &query).is_none());
        assert!(store.lookup_approx("sim1", &near, 1e-8, &query).is_some());
        assert!(store.lookup_approx("sim1", &near, 1e-12, &query).is_none());
    }

    #[test]
    fn test_seed_rekeys_provenance() {
        let mut store = EvaluationStore::new();
        store.seed_restored(vec![
            record("sim1", vec![1.0], RequestSpec::uniform(1, RequestCode::VALUE), 5),
        ]);
        store.seed_imported(vec![
            record("sim1", vec![2.0], RequestSpec::uniform(1, RequestCode::VALUE), 9),
        ]);

        let ids: Vec<EvalId> = store.iter().map(EvaluationRecord::eval_id).collect();
        assert_eq!(ids, vec![EvalId::Restored(-5), EvalId::Imported]);
    }
}
