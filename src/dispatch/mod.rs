//! Request splitting and asynchronous dispatch bookkeeping.
//!
//! One logical evaluation may be serviced by two producers: a cheap
//! approximate path and an expensive actual path. This module owns the
//! machinery around that split: partitioning requests, correlating each
//! producer's private evaluation counters back to the caller's logical
//! numbering, and buffering halves that arrive out of order.

mod pending;
mod queue;
mod splitter;

pub use pending::{LogicalEvalId, PendingMap, ReassemblyTable, Slot, SlotState};
pub use queue::QueuedProducer;
pub use splitter::DispatchSplitter;
