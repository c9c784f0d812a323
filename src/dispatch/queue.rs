//! Queued producer adapter.
//!
//! Wraps a synchronous [`Producer`] with a dedicated worker thread and
//! bounded channels, supplying the `evaluate_nowait`/`synchronize` surface.
//! A single worker draining a single FIFO channel gives the ordering
//! guarantee the core relies on: within one producer, results come back in
//! the order their local identifiers were issued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::error::{EvalError, EvalResult};
use crate::point::InputPoint;
use crate::producer::{LocalEvalId, Producer, SyncPolicy};
use crate::request::RequestSpec;
use crate::response::Response;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct WorkMsg {
    local: LocalEvalId,
    point: InputPoint,
    request: RequestSpec,
}

type DoneMsg = (LocalEvalId, EvalResult<Response>);

/// Asynchronous front for a synchronous producer.
///
/// `evaluate_nowait` enqueues work and returns immediately with a fresh
/// local id; `synchronize` is the only suspension point. The bounded work
/// queue applies backpressure to the dispatching flow instead of dropping
/// evaluations.
pub struct QueuedProducer {
    inner: Arc<dyn Producer>,
    work_tx: Sender<WorkMsg>,
    done_rx: Receiver<DoneMsg>,
    next_local: AtomicU64,
    outstanding: AtomicU64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl QueuedProducer {
    /// Wraps `inner` with a worker thread and the default queue capacity.
    #[must_use]
    pub fn new(inner: Arc<dyn Producer>) -> Self {
        Self::with_capacity(inner, DEFAULT_QUEUE_CAPACITY)
    }

    /// Wraps `inner` with an explicit work-queue capacity.
    #[must_use]
    pub fn with_capacity(inner: Arc<dyn Producer>, capacity: usize) -> Self {
        let (work_tx, work_rx) = bounded::<WorkMsg>(capacity.max(1));
        let (done_tx, done_rx) = bounded::<DoneMsg>(capacity.max(1));

        let worker_inner = Arc::clone(&inner);
        let join = thread::Builder::new()
            .name(format!("kestrel-queue-{}", inner.id()))
            .spawn(move || worker_loop(&worker_inner, &work_rx, &done_tx))
            .expect("failed to spawn kestrel queue worker");

        Self {
            inner,
            work_tx,
            done_rx,
            next_local: AtomicU64::new(0),
            outstanding: AtomicU64::new(0),
            join: Mutex::new(Some(join)),
        }
    }

    /// Number of dispatched evaluations not yet retrieved.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.outstanding.load(Ordering::Relaxed)
    }

    fn collect(&self, msg: DoneMsg, out: &mut Vec<(LocalEvalId, Response)>) -> EvalResult<()> {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        let (local, result) = msg;
        out.push((local, result?));
        Ok(())
    }
}

impl Producer for QueuedProducer {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn output_len(&self) -> usize {
        self.inner.output_len()
    }

    fn evaluate(&self, point: &InputPoint, request: &RequestSpec) -> EvalResult<Response> {
        self.inner.evaluate(point, request)
    }

    fn evaluate_nowait(
        &self,
        point: &InputPoint,
        request: &RequestSpec,
    ) -> EvalResult<LocalEvalId> {
        let local = LocalEvalId::new(self.next_local.fetch_add(1, Ordering::Relaxed) + 1);
        self.work_tx
            .send(WorkMsg {
                local,
                point: point.clone(),
                request: request.clone(),
            })
            .map_err(|_| EvalError::internal("queued producer worker terminated"))?;
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Ok(local)
    }

    fn synchronize(&self, policy: SyncPolicy) -> EvalResult<Vec<(LocalEvalId, Response)>> {
        let mut out = Vec::new();
        match policy {
            SyncPolicy::Block => {
                while self.outstanding.load(Ordering::Relaxed) > 0 {
                    let msg = self
                        .done_rx
                        .recv()
                        .map_err(|_| EvalError::internal("queued producer worker terminated"))?;
                    self.collect(msg, &mut out)?;
                }
            }
            SyncPolicy::NoBlock => loop {
                match self.done_rx.try_recv() {
                    Ok(msg) => self.collect(msg, &mut out)?,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if self.outstanding.load(Ordering::Relaxed) > 0 {
                            return Err(EvalError::internal(
                                "queued producer worker terminated with work outstanding",
                            ));
                        }
                        break;
                    }
                }
            },
        }
        Ok(out)
    }
}

impl Drop for QueuedProducer {
    fn drop(&mut self) {
        // Close the work channel so the worker can terminate, then detach.
        // Joining would block on whatever evaluation is mid-flight.
        let (dummy_tx, _) = bounded::<WorkMsg>(1);
        drop(std::mem::replace(&mut self.work_tx, dummy_tx));

        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                drop(handle);
            }
        }
    }
}

fn worker_loop(inner: &Arc<dyn Producer>, work_rx: &Receiver<WorkMsg>, done_tx: &Sender<DoneMsg>) {
    while let Ok(msg) = work_rx.recv() {
        let result = inner.evaluate(&msg.point, &msg.request);
        if done_tx.send((msg.local, result)).is_err() {
            // Receiver side dropped; nothing left to report to.
            break;
        }
    }
}
