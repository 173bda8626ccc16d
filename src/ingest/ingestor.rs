use super::batch::{BatchAccumulator, BatchSize};
use super::state::{IngestPhase, MessageOutcome, SessionEnd};
use super::{IngestSummary, Ingestor};
use crate::error::StorageError;
use crate::feed::{Backoff, FeedConnection, FeedSource};
use crate::reading::{decode_temperature, Reading};
use crate::stats::IngestStats;
use crate::status::{current_status, ensure_status};
use crate::store::{ConfigStore, ReadingSink};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

impl<F, C, S> Ingestor<F, C, S>
where
    F: FeedSource,
    C: ConfigStore,
    S: ReadingSink,
{
    pub fn new(
        feed: F,
        config: C,
        sink: S,
        batch_size: BatchSize,
        backoff: Backoff,
        stats: Arc<IngestStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            feed,
            config,
            sink,
            batch: BatchAccumulator::new(batch_size),
            backoff,
            stats,
            shutdown,
            phase: IngestPhase::Bootstrap,
            written: 0,
            flushes: 0,
            reconnects: 0,
        }
    }

    /// Runs until the shutdown flag is raised or a write fails.
    ///
    /// Transport failures never end the loop. A storage failure does: the
    /// error is returned so the process can exit non-zero.
    pub async fn run(mut self) -> Result<IngestSummary, StorageError> {
        let status = match ensure_status(&self.config).await {
            Ok(status) => status,
            Err(err) => return Err(self.fail(err)),
        };
        tracing::info!(
            status = %status,
            batch_size = self.batch.batch_size().get(),
            "ingestion bootstrapped"
        );

        loop {
            self.transition(IngestPhase::Connecting);
            let connected = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                connected = self.feed.connect() => connected,
            };

            let connection = match connected {
                Ok(connection) => connection,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to connect to temperature feed");
                    self.stats.record_error(err.to_string());
                    if self.wait_before_retry().await {
                        break;
                    }
                    continue;
                }
            };
            self.backoff.reset();
            self.stats.set_feed_connected(true);
            self.stats.clear_error();
            self.transition(IngestPhase::Streaming);

            let session = match self.stream(connection).await {
                Ok(session) => session,
                Err(err) => return Err(self.fail(err)),
            };
            self.stats.set_feed_connected(false);
            match session {
                SessionEnd::Shutdown => break,
                SessionEnd::Disconnected(err) => {
                    tracing::warn!(
                        error = %err,
                        buffered = self.batch.len(),
                        "feed connection lost; reconnecting"
                    );
                    self.stats.record_error(err.to_string());
                    if self.wait_before_retry().await {
                        break;
                    }
                }
            }
        }

        Ok(self.terminate())
    }

    async fn stream(&mut self, mut connection: F::Connection) -> Result<SessionEnd, StorageError> {
        loop {
            let received = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => return Ok(SessionEnd::Shutdown),
                received = connection.recv() => received,
            };
            match received {
                Ok(payload) => {
                    let outcome = self.handle_message(&payload, Utc::now()).await?;
                    if let MessageOutcome::Flushed(written) = outcome {
                        tracing::trace!(written, total = self.written, "batch committed");
                    }
                }
                Err(err) => return Ok(SessionEnd::Disconnected(err)),
            }
        }
    }

    /// One inbound message: decode, check the gate, buffer, flush when full.
    pub(in crate::ingest) async fn handle_message(
        &mut self,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<MessageOutcome, StorageError> {
        let value = match decode_temperature(payload) {
            Ok(Some(value)) => value,
            Ok(None) => {
                tracing::trace!("skipped feed protocol frame");
                return Ok(MessageOutcome::Ignored);
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed feed message");
                self.stats.record_dropped();
                return Ok(MessageOutcome::Dropped);
            }
        };

        if !current_status(&self.config).await?.is_on() {
            tracing::trace!(%value, "ingestion paused; discarding reading");
            self.stats.record_gated();
            return Ok(MessageOutcome::Gated);
        }

        let outcome = match self.batch.accept(Reading::new(received_at, value)) {
            Some(full) => MessageOutcome::Flushed(self.flush(full).await?),
            None => MessageOutcome::Buffered,
        };
        self.stats.set_buffered(self.batch.len());
        Ok(outcome)
    }

    async fn flush(&mut self, batch: Vec<Reading>) -> Result<u64, StorageError> {
        let len = batch.len();
        let started = Instant::now();
        let written = match self.sink.bulk_write(&batch).await {
            Ok(written) => written,
            Err(err) => {
                tracing::error!(error = %err, lost = len, "failed to persist temperature batch");
                return Err(err);
            }
        };

        self.written += written;
        self.flushes += 1;
        self.stats.record_flush(written);
        let micros = started.elapsed().as_micros() as u64;
        tracing::debug!(len, written, micros, "flushed temperature batch");
        Ok(written)
    }

    /// Returns true when shutdown was requested during the wait.
    async fn wait_before_retry(&mut self) -> bool {
        self.transition(IngestPhase::Reconnecting);
        self.reconnects += 1;
        self.stats.record_reconnect();
        let delay = self.backoff.next_delay();
        tracing::debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut self.shutdown) => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    fn transition(&mut self, next: IngestPhase) {
        if self.phase != next {
            tracing::debug!(from = %self.phase, to = %next, "ingest phase changed");
            self.phase = next;
        }
    }

    fn fail(&mut self, err: StorageError) -> StorageError {
        self.transition(IngestPhase::Terminated);
        self.stats.set_feed_connected(false);
        self.stats.record_error(err.to_string());
        tracing::error!(
            error = %err,
            unflushed = self.batch.len(),
            "stopping ingestion after storage failure"
        );
        err
    }

    fn terminate(mut self) -> IngestSummary {
        self.transition(IngestPhase::Terminated);
        self.stats.set_feed_connected(false);
        let unflushed = self.batch.into_pending();
        if !unflushed.is_empty() {
            tracing::warn!(
                unflushed = unflushed.len(),
                "ingestion stopped with unflushed readings; they are not persisted"
            );
        }
        IngestSummary {
            written: self.written,
            flushes: self.flushes,
            reconnects: self.reconnects,
            unflushed,
        }
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if *shutdown.borrow_and_update() {
        return;
    }
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow_and_update() {
            return;
        }
    }
    // every sender is gone, so a stop can no longer be requested
    std::future::pending::<()>().await
}
