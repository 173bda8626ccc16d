use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Counters published by the ingest loop and read by the health RPC.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub buffered: AtomicU64,
    pub total_written: AtomicU64,
    pub last_flush_unix_ms: AtomicU64,
    pub last_batch_len: AtomicU64,
    pub dropped_messages: AtomicU64,
    pub gated_messages: AtomicU64,
    pub reconnects: AtomicU64,
    pub feed_connected: AtomicBool,
    pub last_error: Mutex<Option<String>>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_feed_connected(&self, connected: bool) {
        self.feed_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_buffered(&self, buffered: usize) {
        self.buffered.store(buffered as u64, Ordering::Relaxed);
    }

    pub fn record_flush(&self, written: u64) {
        self.total_written.fetch_add(written, Ordering::Relaxed);
        self.last_batch_len.store(written, Ordering::Relaxed);
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.last_flush_unix_ms.store(now, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gated(&self) {
        self.gated_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }
}
