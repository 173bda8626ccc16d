use std::fmt;

/// Lifecycle of the ingest loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPhase {
    Bootstrap,
    Connecting,
    Streaming,
    Reconnecting,
    Terminated,
}

impl fmt::Display for IngestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestPhase::Bootstrap => "bootstrap",
            IngestPhase::Connecting => "connecting",
            IngestPhase::Streaming => "streaming",
            IngestPhase::Reconnecting => "reconnecting",
            IngestPhase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(in crate::ingest) enum MessageOutcome {
    /// Protocol frame with no reading in it.
    Ignored,
    Dropped,
    /// Decoded, then discarded because ingestion is off.
    Gated,
    Buffered,
    /// Completed a batch; carries the rows written.
    Flushed(u64),
}

/// Why a streaming session ended.
#[derive(Debug)]
pub(in crate::ingest) enum SessionEnd {
    Shutdown,
    Disconnected(crate::error::FeedError),
}
