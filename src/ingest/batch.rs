use crate::error::ConfigError;
use crate::reading::Reading;
use std::num::NonZeroUsize;

pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Number of readings per bulk write. Always at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSize(NonZeroUsize);

impl BatchSize {
    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for BatchSize {
    fn default() -> Self {
        Self(NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN))
    }
}

impl TryFrom<i64> for BatchSize {
    type Error = ConfigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self)
            .ok_or(ConfigError::InvalidBatchSize(value))
    }
}

/// Appends `reading` and decides whether the batch is full.
///
/// Returns the batch to keep accumulating into and, when the new size
/// reaches `batch_size`, the complete batch to persist. The returned batch is
/// empty exactly when a flush payload is produced.
pub fn accumulate(
    mut batch: Vec<Reading>,
    batch_size: BatchSize,
    reading: Reading,
) -> (Vec<Reading>, Option<Vec<Reading>>) {
    batch.push(reading);
    if batch.len() >= batch_size.get() {
        (Vec::new(), Some(batch))
    } else {
        (batch, None)
    }
}

/// Batch owned by the ingest loop. Survives reconnects; lost on exit.
#[derive(Debug)]
pub struct BatchAccumulator {
    batch: Vec<Reading>,
    batch_size: BatchSize,
}

impl BatchAccumulator {
    pub fn new(batch_size: BatchSize) -> Self {
        Self {
            batch: Vec::new(),
            batch_size,
        }
    }

    pub fn accept(&mut self, reading: Reading) -> Option<Vec<Reading>> {
        let current = std::mem::take(&mut self.batch);
        let (next, flushed) = accumulate(current, self.batch_size, reading);
        self.batch = next;
        flushed
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn batch_size(&self) -> BatchSize {
        self.batch_size
    }

    /// Readings that never reached `batch_size`.
    pub fn into_pending(self) -> Vec<Reading> {
        self.batch
    }
}
