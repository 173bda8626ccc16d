mod batch;
mod ingestor;
mod state;


use crate::feed::Backoff;
use crate::reading::Reading;
use crate::stats::IngestStats;
use batch::BatchAccumulator;
use state::IngestPhase;
use std::sync::Arc;
use tokio::sync::watch;

pub use batch::{BatchSize, DEFAULT_BATCH_SIZE};

/// Feed consumer: decode, gate, batch and persist, forever.
///
/// Owns the only batch in the process. The feed connection is replaced on
/// every transport failure while the batch carries over untouched.
pub struct Ingestor<F, C, S> {
    feed: F,
    config: C,
    sink: S,
    batch: BatchAccumulator,
    backoff: Backoff,
    stats: Arc<IngestStats>,
    shutdown: watch::Receiver<bool>,
    phase: IngestPhase,
    written: u64,
    flushes: u64,
    reconnects: u64,
}

/// What a stopped loop leaves behind.
#[derive(Debug)]
pub struct IngestSummary {
    pub written: u64,
    pub flushes: u64,
    pub reconnects: u64,
    /// Accepted readings that never reached a full batch; not persisted.
    pub unflushed: Vec<Reading>,
}
