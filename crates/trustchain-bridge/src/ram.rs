//! In-memory bridge.
//!
//! A [`RamNetwork`] holds one shared log per partition. Every bridge opened on
//! the same network and partition sees the same log, which makes it a stand-in
//! for several nodes talking to one broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use trustchain_core::{PartitionKey, Record};

use crate::error::{BridgeError, Result};
use crate::ticket::{Delivery, SyncTicket};
use crate::traits::{Bridge, BridgeConfig, BridgeFactory, LogEntry, RecordSink};

/// Shared state for in-memory partitions.
#[derive(Default)]
pub struct RamNetwork {
    logs: Mutex<HashMap<PartitionKey, Arc<RamLog>>>,
}

impl RamNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The log behind `key`, created empty on first use.
    pub fn log(&self, key: &PartitionKey) -> Arc<RamLog> {
        self.logs
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RamLog::new()))
            .clone()
    }

    pub fn bridge(&self, key: &PartitionKey, config: BridgeConfig) -> RamBridge {
        RamBridge {
            key: key.clone(),
            token: key.to_token(),
            log: self.log(key),
            config,
            delivery: Arc::new(Delivery::new()),
            consumer: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

impl BridgeFactory for RamNetwork {
    fn open(&self, key: &PartitionKey, config: &BridgeConfig) -> Result<Arc<dyn Bridge>> {
        Ok(Arc::new(self.bridge(key, config.clone())))
    }
}

/// One partition's append-only log.
pub struct RamLog {
    entries: RwLock<Vec<Arc<Record>>>,
    head: watch::Sender<u64>,
}

impl RamLog {
    fn new() -> Self {
        let (head, _) = watch::channel(0);
        Self {
            entries: RwLock::new(Vec::new()),
            head,
        }
    }

    pub fn append(&self, record: Record) -> u64 {
        let mut entries = self.entries.write().unwrap();
        entries.push(Arc::new(record));
        let offset = entries.len() as u64;
        self.head.send_replace(offset);
        offset
    }

    pub fn high_water(&self) -> u64 {
        self.entries.read().unwrap().len() as u64
    }

    /// Up to `limit` entries after `offset`.
    pub fn read_after(&self, offset: u64, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .enumerate()
            .skip(offset as usize)
            .take(limit)
            .map(|(i, record)| LogEntry {
                offset: i as u64 + 1,
                record: record.clone(),
            })
            .collect()
    }

    fn watch(&self) -> watch::Receiver<u64> {
        self.head.subscribe()
    }
}

/// Bridge over a [`RamLog`].
pub struct RamBridge {
    key: PartitionKey,
    token: String,
    log: Arc<RamLog>,
    config: BridgeConfig,
    delivery: Arc<Delivery>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RamBridge {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Bridge for RamBridge {
    fn partition(&self) -> &PartitionKey {
        &self.key
    }

    async fn send(&self, record: &Record) -> Result<u64> {
        if self.is_closed() {
            return Err(BridgeError::Closed(self.token.clone()));
        }
        Ok(self.log.append(record.clone()))
    }

    async fn subscribe(&self, sink: Arc<dyn RecordSink>) -> Result<()> {
        let mut consumer = self.consumer.lock().unwrap();
        if consumer.is_some() {
            return Err(BridgeError::AlreadySubscribed(self.token.clone()));
        }

        let log = self.log.clone();
        let delivery = self.delivery.clone();
        let batch_size = self.config.batch_size.max(1);
        let target = log.high_water();
        let mut head = log.watch();

        *consumer = Some(tokio::spawn(async move {
            let mut cursor = 0u64;
            let mut loaded = target == 0;
            if loaded {
                sink.caught_up();
            }
            loop {
                // Mark the head seen before reading so no append is missed.
                let _ = head.borrow_and_update();
                let entries = log.read_after(cursor, batch_size);
                if let Some(last) = entries.last() {
                    cursor = last.offset;
                    sink.feed(&entries);
                    delivery.advance(cursor);
                    if !loaded && cursor >= target {
                        loaded = true;
                        sink.caught_up();
                    }
                    continue;
                }
                if head.changed().await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn start_sync(&self) -> Result<SyncTicket> {
        Ok(SyncTicket(self.log.high_water()))
    }

    async fn finish_sync(&self, ticket: SyncTicket, timeout: Duration) -> Result<()> {
        self.delivery.wait(&self.token, ticket, timeout).await
    }

    fn has_finished_sync(&self, ticket: SyncTicket) -> bool {
        self.delivery.reached(ticket)
    }

    fn delivered(&self) -> u64 {
        self.delivery.delivered()
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = self.consumer.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for RamBridge {
    fn drop(&mut self) {
        if let Some(handle) = self.consumer.lock().unwrap().take() {
            handle.abort();
        }
    }
}
