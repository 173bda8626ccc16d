#[cfg(test)]
pub mod memory;

use crate::error::StorageError;
use crate::reading::Reading;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Key/value settings shared between the ingest loop and the control API.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Inserts or replaces `key` and returns the committed value.
    async fn upsert(&self, key: &str, value: &str) -> Result<String, StorageError>;

    /// Inserts `default` only when `key` is absent; returns the stored value.
    async fn ensure(&self, key: &str, default: &str) -> Result<String, StorageError> {
        match self.get(key).await? {
            Some(value) => Ok(value),
            None => self.upsert(key, default).await,
        }
    }
}

/// Durable destination for flushed batches.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    /// Writes every reading in one transaction, or none of them.
    async fn bulk_write(&self, readings: &[Reading]) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait ReadingQuery: Send + Sync {
    /// Reading with the latest timestamp.
    async fn current(&self) -> Result<Option<Reading>, StorageError>;

    async fn statistics(&self, range: TimeRange) -> Result<Option<Statistics>, StorageError>;
}

/// Inclusive timestamp bounds; `None` leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> Self {
        Self { after, before }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub min: Decimal,
    pub max: Decimal,
}
