//! The bridge abstraction.
//!
//! A bridge connects one partition chain to the ordered log behind it. It
//! sends locally produced records, pushes every record in the log (including
//! the sender's own) to its subscriber in offset order, and answers sync
//! barriers: "has my subscriber seen everything that was in the log when I
//! asked?"

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use trustchain_core::{PartitionKey, Record};

use crate::error::Result;
use crate::ticket::SyncTicket;

/// A record together with its position in the partition log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// 1-based position. Strictly increasing within a partition.
    pub offset: u64,
    pub record: Arc<Record>,
}

/// Receiver of log entries. Implemented by the partition chain.
pub trait RecordSink: Send + Sync {
    /// Apply a batch of entries, in offset order.
    fn feed(&self, entries: &[LogEntry]);

    /// Called once, after every entry present at subscription time has been
    /// fed.
    fn caught_up(&self);
}

/// Bridge tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How often a durable bridge polls for records written elsewhere.
    pub poll_interval_ms: u64,
    /// Maximum entries handed to the sink in one batch.
    pub batch_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            batch_size: 256,
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Transport between a chain and its partition log.
#[async_trait]
pub trait Bridge: Send + Sync {
    fn partition(&self) -> &PartitionKey;

    /// Append a record to the log. Returns its offset.
    async fn send(&self, record: &Record) -> Result<u64>;

    /// Start delivering the log to `sink`, from the beginning.
    async fn subscribe(&self, sink: Arc<dyn RecordSink>) -> Result<()>;

    /// Capture the current end of the log.
    async fn start_sync(&self) -> Result<SyncTicket>;

    /// Wait until the subscriber has been fed up to `ticket`.
    async fn finish_sync(&self, ticket: SyncTicket, timeout: Duration) -> Result<()>;

    /// Non-blocking check of a ticket.
    fn has_finished_sync(&self, ticket: SyncTicket) -> bool;

    /// Highest offset fed to the subscriber so far.
    fn delivered(&self) -> u64;

    /// Stop delivery. Further sends fail.
    async fn shutdown(&self);

    /// Full barrier: start a sync and wait for it.
    async fn sync(&self, timeout: Duration) -> Result<()> {
        let ticket = self.start_sync().await?;
        self.finish_sync(ticket, timeout).await
    }
}

/// Opens bridges for partitions on demand.
pub trait BridgeFactory: Send + Sync {
    fn open(&self, key: &PartitionKey, config: &BridgeConfig) -> Result<Arc<dyn Bridge>>;
}
