//! Evaluation engine: cache-aware, split-aware dispatch.
//!
//! The engine drives the full flow for a composite of one approximate and one
//! actual producer: split the request, consult the record store per
//! sub-request, dispatch what is unmet (synchronously or queued), re-key
//! completions back to logical numbering, combine halves, and offer every new
//! record to the persisted log.
//!
//! Dispatch is cooperative and single-flow: `evaluate_nowait` enqueues and
//! returns, `synchronize` is the only suspension point.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::combine::{combine, CombineMode};
use crate::dispatch::{DispatchSplitter, LogicalEvalId, PendingMap, ReassemblyTable, Slot};
use crate::error::{ConsistencyError, EvalResult};
use crate::point::InputPoint;
use crate::producer::{first_unsatisfied, LocalEvalId, Producer, SyncPolicy};
use crate::record::{EvalId, EvaluationRecord};
use crate::request::RequestSpec;
use crate::response::{ReplicateReduction, Response};
use crate::storage::{EvalLog, EvaluationStore};

/// Consumer of post-combination results, e.g. a tabular data exporter.
///
/// The engine offers every combined response together with its originating
/// input point; the output format is owned by the exporter.
pub trait Exporter: Send + Sync {
    /// Receives one combined result.
    fn export(&self, point: &InputPoint, response: &Response);
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of logical outputs of the composite.
    pub outputs: usize,
    /// Outputs served by the approximate producer; the rest go to the actual
    /// producer. Only consulted in overlay modes.
    pub approx_outputs: std::collections::BTreeSet<usize>,
    /// Replicates the actual producer aggregates per logical output.
    pub replication: usize,
    /// How actual-side replicates collapse back to logical outputs.
    pub reduction: ReplicateReduction,
    /// How the two halves merge into one logical result.
    pub mode: CombineMode,
    /// Whether to consult the record store before dispatching.
    pub cache_lookups: bool,
}

impl EngineConfig {
    /// Creates a configuration for `outputs` logical outputs with defaults:
    /// no approximate outputs, replication 1, mean reduction, overlay mode,
    /// cache lookups on.
    #[must_use]
    pub fn new(outputs: usize) -> Self {
        Self {
            outputs,
            approx_outputs: std::collections::BTreeSet::new(),
            replication: 1,
            reduction: ReplicateReduction::default(),
            mode: CombineMode::default(),
            cache_lookups: true,
        }
    }
}

enum Side {
    Approx,
    Actual,
}

/// Cache-aware evaluation engine over an (approximate, actual) producer pair.
pub struct EvalEngine {
    approx: Arc<dyn Producer>,
    actual: Arc<dyn Producer>,
    splitter: DispatchSplitter,
    reduction: ReplicateReduction,
    mode: CombineMode,
    cache_lookups: bool,
    store: EvaluationStore,
    log: Option<Arc<dyn EvalLog>>,
    exporter: Option<Arc<dyn Exporter>>,
    pending_approx: PendingMap,
    pending_actual: PendingMap,
    table: ReassemblyTable,
    next_record: u64,
    next_logical: u64,
}

impl std::fmt::Debug for EvalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalEngine")
            .field("reduction", &self.reduction)
            .field("mode", &self.mode)
            .field("cache_lookups", &self.cache_lookups)
            .field("next_record", &self.next_record)
            .field("next_logical", &self.next_logical)
            .finish_non_exhaustive()
    }
}

impl EvalEngine {
    /// Wires an engine over the producer pair.
    ///
    /// # Errors
    /// Configuration errors if the split rule is inconsistent or either
    /// producer's response length disagrees with it, including a replication
    /// factor that does not evenly divide the actual producer's length.
    pub fn new(
        approx: Arc<dyn Producer>,
        actual: Arc<dyn Producer>,
        config: EngineConfig,
    ) -> EvalResult<Self> {
        let splitter =
            DispatchSplitter::new(config.outputs, config.approx_outputs, config.replication)?;
        splitter.validate_approx(approx.id(), approx.output_len())?;
        splitter.validate_actual(actual.id(), actual.output_len())?;

        let pending_approx = PendingMap::new(approx.id());
        let pending_actual = PendingMap::new(actual.id());
        Ok(Self {
            approx,
            actual,
            splitter,
            reduction: config.reduction,
            mode: config.mode,
            cache_lookups: config.cache_lookups,
            store: EvaluationStore::new(),
            log: None,
            exporter: None,
            pending_approx,
            pending_actual,
            table: ReassemblyTable::new(),
            next_record: 0,
            next_logical: 0,
        })
    }

    /// Attaches a persisted evaluation log; every new record is offered to
    /// it.
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn EvalLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Attaches a post-combination result consumer.
    #[must_use]
    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Seeds the record store from the attached log.
    ///
    /// Returns the number of restored records.
    ///
    /// # Errors
    /// Storage errors from the log replay.
    pub fn seed_from_log(&mut self) -> EvalResult<usize> {
        let Some(log) = self.log.as_ref() else {
            return Ok(0);
        };
        let records = log.replay()?;
        let count = records.len();
        self.store.seed_restored(records);
        Ok(count)
    }

    /// Seeds the record store from an external data file's records.
    pub fn seed_imported(&mut self, records: impl IntoIterator<Item = EvaluationRecord>) {
        self.store.seed_imported(records);
    }

    /// Read access to the record store.
    #[must_use]
    pub fn store(&self) -> &EvaluationStore {
        &self.store
    }

    /// Number of logical evaluations still in flight (partials included).
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.table.len()
    }

    /// Forces the attached log to durable storage.
    ///
    /// # Errors
    /// Storage errors from the log.
    pub fn flush_log(&self) -> EvalResult<()> {
        if let Some(log) = self.log.as_ref() {
            log.flush()?;
        }
        Ok(())
    }

    /// Evaluates `request` at `point` synchronously.
    ///
    /// # Errors
    /// Configuration or consistency errors; both are fatal to the run.
    pub fn evaluate(&mut self, point: &InputPoint, request: &RequestSpec) -> EvalResult<Response> {
        let (approx_req, actual_req) = self.partition(request)?;

        let approx_resp = if approx_req.is_nop() {
            None
        } else {
            Some(self.resolve_sync(&Side::Approx, point, &approx_req)?)
        };
        let actual_resp = if actual_req.is_nop() {
            None
        } else {
            let raw = self.resolve_sync(&Side::Actual, point, &actual_req)?;
            Some(self.splitter.deflate_actual(&raw, self.reduction)?)
        };

        let combined = self.merge(request, approx_resp, actual_resp)?;
        if let Some(exporter) = self.exporter.as_ref() {
            exporter.export(point, &combined);
        }
        Ok(combined)
    }

    /// Enqueues an evaluation and returns its logical id immediately.
    ///
    /// Cache-satisfied halves are filled in place; only unmet halves are
    /// dispatched. An evaluation with nothing left to dispatch becomes
    /// retrievable on the next `synchronize` call.
    ///
    /// # Errors
    /// Configuration or consistency errors; both are fatal to the run.
    pub fn evaluate_nowait(
        &mut self,
        point: &InputPoint,
        request: &RequestSpec,
    ) -> EvalResult<LogicalEvalId> {
        let (approx_req, actual_req) = self.partition(request)?;
        self.next_logical += 1;
        let logical = LogicalEvalId::new(self.next_logical);

        let mut dispatch_approx = false;
        let mut cached_approx = None;
        if !approx_req.is_nop() {
            match self.cached(&Side::Approx, point, &approx_req) {
                Some(resp) => cached_approx = Some(resp),
                None => dispatch_approx = true,
            }
        }
        let mut dispatch_actual = false;
        let mut cached_actual = None;
        if !actual_req.is_nop() {
            match self.cached(&Side::Actual, point, &actual_req) {
                Some(raw) => {
                    cached_actual = Some(self.splitter.deflate_actual(&raw, self.reduction)?);
                }
                None => dispatch_actual = true,
            }
        }

        let mut slot = Slot::new(
            request.clone(),
            point.clone(),
            dispatch_approx,
            dispatch_actual,
        );
        if let Some(resp) = cached_approx {
            slot.fill_approx(resp);
        }
        if let Some(resp) = cached_actual {
            slot.fill_actual(resp);
        }
        self.table.register(logical, slot);

        if dispatch_approx {
            let local = self.approx.evaluate_nowait(point, &approx_req)?;
            self.pending_approx.submit(local, logical)?;
        }
        if dispatch_actual {
            let local = self.actual.evaluate_nowait(point, &actual_req)?;
            self.pending_actual.submit(local, logical)?;
        }
        Ok(logical)
    }

    /// Retrieves completed logical evaluations.
    ///
    /// Blocking waits until every outstanding sub-request of the current
    /// batch resolves; non-blocking returns only fully resolved evaluations
    /// and keeps out-of-order halves cached for a later call. Results are
    /// keyed (and were combined) in ascending logical order, so arrival
    /// order of the two halves never shows through.
    ///
    /// # Errors
    /// Configuration or consistency errors; both are fatal to the run.
    pub fn synchronize(
        &mut self,
        policy: SyncPolicy,
    ) -> EvalResult<BTreeMap<LogicalEvalId, Response>> {
        let approx_done = if self.pending_approx.is_empty() {
            Vec::new()
        } else {
            self.approx.synchronize(policy)?
        };
        for (local, response) in approx_done {
            self.absorb(&Side::Approx, local, response)?;
        }

        let actual_done = if self.pending_actual.is_empty() {
            Vec::new()
        } else {
            self.actual.synchronize(policy)?
        };
        for (local, response) in actual_done {
            self.absorb(&Side::Actual, local, response)?;
        }

        let mut out = BTreeMap::new();
        for (logical, slot) in self.table.take_complete() {
            let (whole, point, approx_resp, actual_resp) = slot.into_parts();
            let combined = self.merge(&whole, approx_resp, actual_resp)?;
            if let Some(exporter) = self.exporter.as_ref() {
                exporter.export(&point, &combined);
            }
            out.insert(logical, combined);
        }
        Ok(out)
    }

    /// Splits a request per the configured combination mode.
    ///
    /// Overlay modes partition outputs between the producers; discrepancy
    /// and aggregate need both sides to compute everything, so the whole
    /// request goes to each (the actual side inflated).
    fn partition(&self, request: &RequestSpec) -> EvalResult<(RequestSpec, RequestSpec)> {
        match self.mode {
            CombineMode::Overlay | CombineMode::CorrectedOverlay(_) => {
                Ok(self.splitter.split(request)?)
            }
            CombineMode::Discrepancy | CombineMode::Aggregate => {
                let actual = request.inflate(self.splitter.replication())?;
                Ok((request.clone(), actual))
            }
        }
    }

    fn producer(&self, side: &Side) -> &Arc<dyn Producer> {
        match side {
            Side::Approx => &self.approx,
            Side::Actual => &self.actual,
        }
    }

    fn cached(&self, side: &Side, point: &InputPoint, request: &RequestSpec) -> Option<Response> {
        if !self.cache_lookups {
            return None;
        }
        self.store
            .lookup(self.producer(side).id(), point, request)
            .map(|record| record.response().clone())
    }

    /// Serves one half synchronously: cache first, then the producer.
    fn resolve_sync(
        &mut self,
        side: &Side,
        point: &InputPoint,
        request: &RequestSpec,
    ) -> EvalResult<Response> {
        if let Some(hit) = self.cached(side, point, request) {
            return Ok(hit);
        }
        let response = self.producer(side).evaluate(point, request)?;
        self.record(side, point.clone(), response.clone());
        Ok(response)
    }

    /// Stores and logs a freshly computed producer response.
    ///
    /// Actual-side responses are recorded in producer-native (inflated)
    /// form so later cache lookups see exactly what the producer satisfies.
    fn record(&mut self, side: &Side, point: InputPoint, response: Response) {
        self.next_record += 1;
        let eval_id = EvalId::RunLocal(self.next_record);
        let producer_id = self.producer(side).id().to_string();
        match EvaluationRecord::new(producer_id, eval_id, point, response) {
            Ok(record) => {
                if let Some(log) = self.log.as_ref() {
                    if let Err(e) = log.append(&record) {
                        // The run continues without persistence.
                        warn!(error = %e, "failed to append evaluation record to log");
                    }
                }
                self.store.insert(record);
            }
            Err(e) => warn!(error = %e, "dropping unrecordable response"),
        }
    }

    /// Re-keys one drained completion and attaches it to its slot.
    fn absorb(&mut self, side: &Side, local: LocalEvalId, response: Response) -> EvalResult<()> {
        let matched = match side {
            Side::Approx => self.pending_approx.match_completion(local),
            Side::Actual => self.pending_actual.match_completion(local),
        };
        let Some(logical) = matched else {
            warn!(
                producer = self.producer(side).id(),
                %local,
                "discarding completion with no pending entry"
            );
            return Ok(());
        };

        let point = self.table.slot_mut(logical)?.point().clone();
        self.record(side, point, response.clone());

        match side {
            Side::Approx => self.table.slot_mut(logical)?.fill_approx(response),
            Side::Actual => {
                let deflated = self.splitter.deflate_actual(&response, self.reduction)?;
                self.table.slot_mut(logical)?.fill_actual(deflated);
            }
        }
        Ok(())
    }

    /// Combines whatever halves an evaluation produced.
    ///
    /// A single present half passes through uncombined, provided it covers
    /// the whole request.
    fn merge(
        &self,
        whole: &RequestSpec,
        approx: Option<Response>,
        actual: Option<Response>,
    ) -> EvalResult<Response> {
        match (approx, actual) {
            (Some(approx), Some(actual)) => combine(whole, &actual, &approx, &self.mode),
            (Some(single), None) | (None, Some(single)) => {
                if let Some(index) = first_unsatisfied(single.active(), whole) {
                    return Err(ConsistencyError::OutputMissing { index }.into());
                }
                Ok(single)
            }
            (None, None) => {
                if let Some(index) = whole.requested_indices().next() {
                    return Err(ConsistencyError::OutputMissing { index }.into());
                }
                Ok(Response::new(whole.clone()))
            }
        }
    }
}

impl Drop for EvalEngine {
    fn drop(&mut self) {
        // Best-effort final flush; shutdown must not panic over storage.
        if let Some(log) = self.log.as_ref() {
            let _ = log.flush();
        }
    }
}
