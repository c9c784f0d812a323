//! Pending-evaluation bookkeeping and reassembly.
//!
//! Independent producers assign their own monotonically increasing local
//! identifiers, so re-keying to the caller's logical numbering is mandatory
//! before any result travels upward; omitting it is the classic source of
//! cross-talk in layered composition. One [`PendingMap`] exists per producer;
//! the [`ReassemblyTable`] holds per-logical-evaluation state until both
//! halves are present.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConsistencyError;
use crate::point::InputPoint;
use crate::producer::LocalEvalId;
use crate::request::RequestSpec;
use crate::response::Response;

/// The caller's numbering of logical evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalEvalId(u64);

impl LogicalEvalId {
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

impl fmt::Display for LogicalEvalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eval#{}", self.0)
    }
}

/// Bidirectional association between one producer's local ids and the
/// caller's logical ids.
///
/// At most one live entry per local id: an entry is created when a
/// sub-request is dispatched and destroyed when its result is re-keyed.
#[derive(Debug)]
pub struct PendingMap {
    producer_id: String,
    by_local: HashMap<LocalEvalId, LogicalEvalId>,
}

impl PendingMap {
    /// Creates an empty map for one producer.
    #[must_use]
    pub fn new(producer_id: impl Into<String>) -> Self {
        Self {
            producer_id: producer_id.into(),
            by_local: HashMap::new(),
        }
    }

    /// The producer this map tracks.
    #[must_use]
    pub fn producer_id(&self) -> &str {
        &self.producer_id
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_local.len()
    }

    /// Returns true if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_local.is_empty()
    }

    /// Registers a dispatched sub-request.
    ///
    /// # Errors
    /// `ConsistencyError::DuplicateLocalId` if the local id already has a
    /// live entry.
    pub fn submit(
        &mut self,
        local: LocalEvalId,
        logical: LogicalEvalId,
    ) -> Result<(), ConsistencyError> {
        if self.by_local.contains_key(&local) {
            return Err(ConsistencyError::DuplicateLocalId {
                producer: self.producer_id.clone(),
                local: local.value(),
            });
        }
        self.by_local.insert(local, logical);
        Ok(())
    }

    /// Strictly resolves a local id, destroying its entry.
    ///
    /// # Errors
    /// `ConsistencyError::UnknownLocalId` if there is no live entry; callers
    /// on this path have asserted the id must exist, so a miss is fatal.
    pub fn resolve(&mut self, local: LocalEvalId) -> Result<LogicalEvalId, ConsistencyError> {
        self.by_local
            .remove(&local)
            .ok_or(ConsistencyError::UnknownLocalId {
                producer: self.producer_id.clone(),
                local: local.value(),
            })
    }

    /// Matches a drained completion against the live entries.
    ///
    /// Returns `None` for an unexpected or duplicate identifier; the caller
    /// logs a correlation warning and discards the result, and the run
    /// continues.
    pub fn match_completion(&mut self, local: LocalEvalId) -> Option<LogicalEvalId> {
        self.by_local.remove(&local)
    }

    /// Logical ids still awaiting a completion, in no particular order.
    pub fn outstanding(&self) -> impl Iterator<Item = LogicalEvalId> + '_ {
        self.by_local.values().copied()
    }
}

/// Reassembly progress of one logical evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Dispatched; no partial result yet.
    Dispatched,
    /// One needed half completed, cached pending the other.
    Partial,
    /// Every needed half is present.
    Complete,
}

/// Per-logical-evaluation reassembly state.
#[derive(Debug)]
pub struct Slot {
    whole: RequestSpec,
    point: InputPoint,
    needs_approx: bool,
    needs_actual: bool,
    approx: Option<Response>,
    actual: Option<Response>,
}

impl Slot {
    /// Creates a slot expecting the given halves.
    ///
    /// A half that was satisfied from the cache (or skipped as all-zero) is
    /// simply not "needed"; pre-filled data may still be attached so the
    /// combiner sees it.
    #[must_use]
    pub fn new(whole: RequestSpec, point: InputPoint, needs_approx: bool, needs_actual: bool) -> Self {
        Self {
            whole,
            point,
            needs_approx,
            needs_actual,
            approx: None,
            actual: None,
        }
    }

    /// The original, unsplit request.
    #[must_use]
    pub fn whole(&self) -> &RequestSpec {
        &self.whole
    }

    /// The input point of this evaluation.
    #[must_use]
    pub fn point(&self) -> &InputPoint {
        &self.point
    }

    /// Attaches the approximate half.
    pub fn fill_approx(&mut self, response: Response) {
        self.approx = Some(response);
        self.needs_approx = false;
    }

    /// Attaches the actual half (already deflated to logical outputs).
    pub fn fill_actual(&mut self, response: Response) {
        self.actual = Some(response);
        self.needs_actual = false;
    }

    /// Current reassembly state.
    #[must_use]
    pub fn state(&self) -> SlotState {
        if !self.needs_approx && !self.needs_actual {
            SlotState::Complete
        } else if self.approx.is_some() || self.actual.is_some() {
            SlotState::Partial
        } else {
            SlotState::Dispatched
        }
    }

    /// Returns true if every needed half is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state() == SlotState::Complete
    }

    /// Decomposes the slot for combination.
    #[must_use]
    pub fn into_parts(self) -> (RequestSpec, InputPoint, Option<Response>, Option<Response>) {
        (self.whole, self.point, self.approx, self.actual)
    }
}

/// All in-flight logical evaluations, keyed in ascending logical order.
///
/// The ordering matters for blocking drains: halves are paired and combined
/// in ascending logical id order, so results come back deterministically
/// regardless of producer completion order.
#[derive(Debug, Default)]
pub struct ReassemblyTable {
    slots: BTreeMap<LogicalEvalId, Slot>,
}

impl ReassemblyTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of in-flight logical evaluations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing is in flight.
    ///
    /// The partial cache lives in the same table, so "empty" also means no
    /// cached halves are waiting for a counterpart.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Registers a dispatched logical evaluation.
    pub fn register(&mut self, logical: LogicalEvalId, slot: Slot) {
        self.slots.insert(logical, slot);
    }

    /// Mutable access to one slot.
    ///
    /// # Errors
    /// `ConsistencyError::UnknownLogicalId` if the id was never registered.
    pub fn slot_mut(&mut self, logical: LogicalEvalId) -> Result<&mut Slot, ConsistencyError> {
        self.slots
            .get_mut(&logical)
            .ok_or(ConsistencyError::UnknownLogicalId {
                logical: logical.value(),
            })
    }

    /// Removes and returns every complete slot, in ascending logical order.
    pub fn take_complete(&mut self) -> Vec<(LogicalEvalId, Slot)> {
        let ready: Vec<LogicalEvalId> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.is_complete())
            .map(|(&id, _)| id)
            .collect();
        ready
            .into_iter()
            .filter_map(|id| self.slots.remove(&id).map(|slot| (id, slot)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestCode;

    fn value_spec() -> RequestSpec {
        RequestSpec::uniform(1, RequestCode::VALUE)
    }

    fn value_response(v: f64) -> Response {
        let mut resp = Response::new(value_spec());
        resp.set_value(0, v).unwrap();
        resp
    }

    #[test]
    fn test_submit_and_resolve() {
        let mut map = PendingMap::new("hf_sim");
        map.submit(LocalEvalId::new(1), LogicalEvalId::new(10)).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.resolve(LocalEvalId::new(1)).unwrap(), LogicalEvalId::new(10));
        assert!(map.is_empty());
    }

    #[test]
    fn test_duplicate_local_id_is_fatal() {
        let mut map = PendingMap::new("hf_sim");
        map.submit(LocalEvalId::new(1), LogicalEvalId::new(10)).unwrap();
        let err = map.submit(LocalEvalId::new(1), LogicalEvalId::new(11)).unwrap_err();
        assert!(matches!(err, ConsistencyError::DuplicateLocalId { local: 1, .. }));
    }

    #[test]
    fn test_resolve_unknown_is_fatal() {
        let mut map = PendingMap::new("hf_sim");
        let err = map.resolve(LocalEvalId::new(7)).unwrap_err();
        assert!(matches!(err, ConsistencyError::UnknownLocalId { local: 7, .. }));
    }

    #[test]
    fn test_match_completion_tolerates_strays() {
        let mut map = PendingMap::new("hf_sim");
        map.submit(LocalEvalId::new(1), LogicalEvalId::new(10)).unwrap();
        // A stray completion is None, not an error.
        assert!(map.match_completion(LocalEvalId::new(99)).is_none());
        // A second delivery of the same id is also a stray.
        assert!(map.match_completion(LocalEvalId::new(1)).is_some());
        assert!(map.match_completion(LocalEvalId::new(1)).is_none());
    }

    #[test]
    fn test_slot_state_machine() {
        let point = InputPoint::new(vec![1.0]);
        let mut slot = Slot::new(value_spec(), point, true, true);
        assert_eq!(slot.state(), SlotState::Dispatched);

        slot.fill_actual(value_response(1.0));
        assert_eq!(slot.state(), SlotState::Partial);

        slot.fill_approx(value_response(2.0));
        assert_eq!(slot.state(), SlotState::Complete);
    }

    #[test]
    fn test_slot_with_single_needed_half() {
        let point = InputPoint::new(vec![1.0]);
        let mut slot = Slot::new(value_spec(), point, false, true);
        assert_eq!(slot.state(), SlotState::Dispatched);
        slot.fill_actual(value_response(1.0));
        assert!(slot.is_complete());
    }

    #[test]
    fn test_take_complete_in_ascending_order() {
        let mut table = ReassemblyTable::new();
        for id in [3_u64, 1, 2] {
            table.register(
                LogicalEvalId::new(id),
                Slot::new(value_spec(), InputPoint::new(vec![id as f64]), false, true),
            );
        }
        // Complete them out of order.
        for id in [2_u64, 3, 1] {
            table
                .slot_mut(LogicalEvalId::new(id))
                .unwrap()
                .fill_actual(value_response(id as f64));
        }

        let drained: Vec<u64> = table
            .take_complete()
            .into_iter()
            .map(|(id, _)| id.value())
            .collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_partial_slots_stay_cached() {
        let mut table = ReassemblyTable::new();
        table.register(
            LogicalEvalId::new(1),
            Slot::new(value_spec(), InputPoint::new(vec![1.0]), true, true),
        );
        table
            .slot_mut(LogicalEvalId::new(1))
            .unwrap()
            .fill_actual(value_response(1.0));

        assert!(table.take_complete().is_empty());
        assert!(!table.is_empty());
        assert_eq!(
            table.slot_mut(LogicalEvalId::new(1)).unwrap().state(),
            SlotState::Partial
        );
    }

    #[test]
    fn test_unknown_logical_id() {
        let mut table = ReassemblyTable::new();
        let err = table.slot_mut(LogicalEvalId::new(5)).unwrap_err();
        assert!(matches!(err, ConsistencyError::UnknownLogicalId { logical: 5 }));
    }
}
