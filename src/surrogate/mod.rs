//! Versioned sample data for surrogate builds.
//!
//! An [`ApproxData`] instance holds the training data of one response
//! function, partitioned by fidelity key. Trailing batches can be popped off
//! the active view onto an undo stack and pushed back in LIFO order, which is
//! what lets trust-region and multifidelity algorithms speculate on a data
//! set and roll back. The anchor point is exempt from rollback: it is a hard
//! constraint the surrogate must interpolate, so it survives pop/push.
//!
//! Ownership discipline: one instance per response function, mutated only by
//! the owning model layer. Sharing across layers is by value-copy of
//! completed data, never by aliasing the store.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConsistencyError;
use crate::point::InputPoint;

/// Tag identifying which model-form/fidelity source a data point came from.
///
/// Keys are opaque to the store; the caller's key-selection policy decides
/// what they mean (model form, resolution level, a combined representation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FidelityKey(String);

impl FidelityKey {
    /// Creates a key from a caller-chosen tag.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The raw tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FidelityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token identifying one appended batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One training sample: an input point with its response data and source key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogatePoint {
    point: InputPoint,
    value: f64,
    gradient: Option<Vec<f64>>,
    hessian: Option<Vec<Vec<f64>>>,
    key: FidelityKey,
}

impl SurrogatePoint {
    /// Creates a value-only sample.
    #[must_use]
    pub fn new(point: InputPoint, value: f64, key: FidelityKey) -> Self {
        Self {
            point,
            value,
            gradient: None,
            hessian: None,
            key,
        }
    }

    /// Attaches gradient data.
    #[must_use]
    pub fn with_gradient(mut self, gradient: Vec<f64>) -> Self {
        self.gradient = Some(gradient);
        self
    }

    /// Attaches Hessian data.
    #[must_use]
    pub fn with_hessian(mut self, hessian: Vec<Vec<f64>>) -> Self {
        self.hessian = Some(hessian);
        self
    }

    /// The sample's input point.
    #[must_use]
    pub fn point(&self) -> &InputPoint {
        &self.point
    }

    /// The sampled response value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Gradient data, if any.
    #[must_use]
    pub fn gradient(&self) -> Option<&[f64]> {
        self.gradient.as_deref()
    }

    /// Hessian data, if any.
    #[must_use]
    pub fn hessian(&self) -> Option<&[Vec<f64>]> {
        self.hessian.as_deref()
    }

    /// Which fidelity source produced this sample.
    #[must_use]
    pub fn key(&self) -> &FidelityKey {
        &self.key
    }
}

/// Build lifecycle of one response function's data under one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    /// No data appended yet.
    Empty,
    /// Data present, surrogate not (re)built since.
    Building {
        /// Batches appended so far.
        appends: u32,
    },
    /// Surrogate fit accepted on the current data.
    Built {
        /// Batches appended when the fit was accepted.
        appends: u32,
    },
}

#[derive(Debug, Default, Clone)]
struct KeyData {
    anchor: Option<SurrogatePoint>,
    active: Vec<BatchId>,
    arena: HashMap<BatchId, Vec<SurrogatePoint>>,
    undo: Vec<BatchId>,
    appends: u32,
    built: bool,
}

impl KeyData {
    fn state(&self) -> BuildState {
        if self.built {
            BuildState::Built {
                appends: self.appends,
            }
        } else if self.appends == 0 && self.anchor.is_none() {
            BuildState::Empty
        } else {
            BuildState::Building {
                appends: self.appends,
            }
        }
    }

    fn merged_with(&self, other: &Self) -> Self {
        let mut out = self.clone();
        // The sibling's batches trail this key's; its anchor only fills a gap.
        out.active.extend(other.active.iter().copied());
        for (id, batch) in &other.arena {
            out.arena.insert(*id, batch.clone());
        }
        out.undo.extend(other.undo.iter().copied());
        if out.anchor.is_none() {
            out.anchor = other.anchor.clone();
        }
        out.appends += other.appends;
        out.built = false;
        out
    }
}

/// Per-response-function container of keyed surrogate training data.
#[derive(Debug)]
pub struct ApproxData {
    active_key: FidelityKey,
    data: HashMap<FidelityKey, KeyData>,
    combined: Option<(FidelityKey, KeyData)>,
}

impl ApproxData {
    /// Creates an empty store with the given active key.
    #[must_use]
    pub fn new(active_key: FidelityKey) -> Self {
        let mut data = HashMap::new();
        data.insert(active_key.clone(), KeyData::default());
        Self {
            active_key,
            data,
            combined: None,
        }
    }

    /// The currently active fidelity key.
    #[must_use]
    pub fn active_key(&self) -> &FidelityKey {
        &self.active_key
    }

    /// Switches the active key, creating an empty partition if new.
    pub fn set_active_key(&mut self, key: FidelityKey) {
        self.data.entry(key.clone()).or_default();
        self.active_key = key;
    }

    fn active_data(&self) -> &KeyData {
        // The active key always has a partition; set_active_key and new()
        // maintain that.
        &self.data[&self.active_key]
    }

    fn active_data_mut(&mut self) -> &mut KeyData {
        self.data
            .entry(self.active_key.clone())
            .or_default()
    }

    /// Build state of the active key.
    #[must_use]
    pub fn state(&self) -> BuildState {
        self.active_data().state()
    }

    /// Appends a batch of points to the trailing history.
    ///
    /// Returns the batch token for targeted pop.
    pub fn append(&mut self, points: Vec<SurrogatePoint>) -> BatchId {
        let id = BatchId::new();
        let data = self.active_data_mut();
        data.arena.insert(id, points);
        data.active.push(id);
        data.appends += 1;
        data.built = false;
        id
    }

    /// Sets or overwrites the single anchor point. Legal from any state.
    pub fn replace_anchor(&mut self, point: SurrogatePoint) {
        self.active_data_mut().anchor = Some(point);
    }

    /// The anchor point, if set.
    #[must_use]
    pub fn anchor(&self) -> Option<&SurrogatePoint> {
        self.active_data().anchor.as_ref()
    }

    /// Pops the most recently appended batch onto the undo stack.
    ///
    /// The anchor is never touched: pop targets trailing batches only, so
    /// hard constraints survive speculative rollback. The data remains
    /// retrievable until [`finalize`](Self::finalize).
    ///
    /// # Errors
    /// `ConsistencyError::NoActiveBatch` if the active view has no batches.
    pub fn pop(&mut self) -> Result<BatchId, ConsistencyError> {
        let data = self.active_data_mut();
        let id = data.active.pop().ok_or(ConsistencyError::NoActiveBatch)?;
        data.undo.push(id);
        data.built = false;
        Ok(id)
    }

    /// Pops a specific batch by token.
    ///
    /// # Errors
    /// `ConsistencyError::UnknownBatch` if the token is not in the active
    /// view.
    pub fn pop_batch(&mut self, batch: BatchId) -> Result<(), ConsistencyError> {
        let data = self.active_data_mut();
        let Some(pos) = data.active.iter().position(|&b| b == batch) else {
            return Err(ConsistencyError::UnknownBatch {
                batch: batch.to_string(),
            });
        };
        data.active.remove(pos);
        data.undo.push(batch);
        data.built = false;
        Ok(())
    }

    /// Restores the most recently popped batch (LIFO).
    ///
    /// # Errors
    /// `ConsistencyError::UndoStackEmpty` if nothing has been popped.
    pub fn push(&mut self) -> Result<BatchId, ConsistencyError> {
        let data = self.active_data_mut();
        let id = data.undo.pop().ok_or(ConsistencyError::UndoStackEmpty)?;
        data.active.push(id);
        data.built = false;
        Ok(id)
    }

    /// Marks the surrogate as built on the current active data.
    pub fn build(&mut self) {
        self.active_data_mut().built = true;
    }

    /// Points in the active view: the anchor (if any) followed by every
    /// active batch in append order.
    #[must_use]
    pub fn active_points(&self) -> Vec<&SurrogatePoint> {
        let data = self.active_data();
        let mut out = Vec::new();
        if let Some(anchor) = data.anchor.as_ref() {
            out.push(anchor);
        }
        for id in &data.active {
            if let Some(batch) = data.arena.get(id) {
                out.extend(batch.iter());
            }
        }
        out
    }

    /// Number of points in the active view, anchor included.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active_points().len()
    }

    /// Depth of the undo stack.
    #[must_use]
    pub fn popped_depth(&self) -> usize {
        self.active_data().undo.len()
    }

    /// Stage 1 of promoting a combined representation: aggregate the active
    /// key's data with a sibling key's under a new key.
    ///
    /// Nothing becomes visible until [`promote`](Self::promote); call
    /// [`clear_combined`](Self::clear_combined) to abandon the staging.
    ///
    /// # Errors
    /// `ConsistencyError::UnknownFidelityKey` if the sibling key has no data.
    pub fn combine(
        &mut self,
        sibling: &FidelityKey,
        combined: FidelityKey,
    ) -> Result<(), ConsistencyError> {
        let sibling_data = self
            .data
            .get(sibling)
            .ok_or_else(|| ConsistencyError::UnknownFidelityKey {
                key: sibling.to_string(),
            })?;
        let staged = self.active_data().merged_with(sibling_data);
        self.combined = Some((combined, staged));
        Ok(())
    }

    /// Stage 2: makes the staged combined representation the active one.
    ///
    /// # Errors
    /// `ConsistencyError::NothingCombined` if no staging exists.
    pub fn promote(&mut self) -> Result<(), ConsistencyError> {
        let (key, staged) = self
            .combined
            .take()
            .ok_or(ConsistencyError::NothingCombined)?;
        self.data.insert(key.clone(), staged);
        self.active_key = key;
        Ok(())
    }

    /// Discards any staged combined representation.
    pub fn clear_combined(&mut self) {
        self.combined = None;
    }

    /// Permanently discards the undo history of every key.
    ///
    /// Popped batches become unrecoverable; the active views are unchanged.
    /// Used once an iterative algorithm accepts its final state.
    pub fn finalize(&mut self) {
        for data in self.data.values_mut() {
            for id in data.undo.drain(..) {
                data.arena.remove(&id);
            }
        }
    }
}
