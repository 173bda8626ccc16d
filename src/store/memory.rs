use super::{ConfigStore, ReadingQuery, ReadingSink, Statistics, TimeRange};
use crate::error::StorageError;
use crate::reading::Reading;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-process stand-in for Postgres used by the loop and API tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    config: HashMap<String, String>,
    readings: Vec<Reading>,
    write_sizes: Vec<usize>,
    config_writes: usize,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_readings(readings: Vec<Reading>) -> Self {
        let store = Self::new();
        store.inner.lock().unwrap().readings = readings;
        store
    }

    pub fn with_config(key: &str, value: &str) -> Self {
        let store = Self::new();
        store
            .inner
            .lock()
            .unwrap()
            .config
            .insert(key.to_string(), value.to_string());
        store
    }

    pub fn set_config(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .unwrap()
            .config
            .insert(key.to_string(), value.to_string());
    }

    pub fn config_value(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().config.get(key).cloned()
    }

    pub fn config_writes(&self) -> usize {
        self.inner.lock().unwrap().config_writes
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.inner.lock().unwrap().readings.clone()
    }

    /// Size of every successful bulk write, in call order.
    pub fn write_sizes(&self) -> Vec<usize> {
        self.inner.lock().unwrap().write_sizes.clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.config_value(key))
    }

    async fn upsert(&self, key: &str, value: &str) -> Result<String, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.config_writes += 1;
        inner.config.insert(key.to_string(), value.to_string());
        Ok(value.to_string())
    }
}

#[async_trait]
impl ReadingSink for MemoryStore {
    async fn bulk_write(&self, readings: &[Reading]) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(StorageError::Database(sqlx::Error::PoolClosed));
        }
        if readings.is_empty() {
            return Ok(0);
        }
        inner.readings.extend_from_slice(readings);
        inner.write_sizes.push(readings.len());
        Ok(readings.len() as u64)
    }
}

#[async_trait]
impl ReadingQuery for MemoryStore {
    async fn current(&self) -> Result<Option<Reading>, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .readings
            .iter()
            .max_by_key(|reading| reading.timestamp)
            .cloned())
    }

    async fn statistics(&self, range: TimeRange) -> Result<Option<Statistics>, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .readings
            .iter()
            .filter(|reading| in_range(&range, reading))
            .fold(None, |acc: Option<Statistics>, reading| {
                Some(match acc {
                    None => Statistics {
                        min: reading.value,
                        max: reading.value,
                    },
                    Some(stats) => Statistics {
                        min: stats.min.min(reading.value),
                        max: stats.max.max(reading.value),
                    },
                })
            }))
    }
}

fn in_range(range: &TimeRange, reading: &Reading) -> bool {
    range.after.map_or(true, |after| reading.timestamp >= after)
        && range.before.map_or(true, |before| reading.timestamp <= before)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 2, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let reading = |ts| Reading::new(ts, Decimal::ONE);
        let range = TimeRange::new(Some(at(12, 0)), Some(at(14, 0)));
        assert!(in_range(&range, &reading(at(12, 0))));
        assert!(in_range(&range, &reading(at(14, 0))));
        assert!(!in_range(&range, &reading(at(11, 59))));
        assert!(!in_range(&range, &reading(at(14, 1))));
        assert!(in_range(&TimeRange::default(), &reading(at(0, 0))));
    }
}
