//! Durable bridge backed by SQLite.
//!
//! All partitions share one database file. Records are appended with a
//! per-partition sequence number inside an immediate transaction, so several
//! processes may append to the same file. Subscribers poll for rows written
//! elsewhere and are woken immediately by appends made through the same
//! [`SqliteLog`] handle.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, TransactionBehavior};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use trustchain_core::{now_millis, PartitionKey, Record};

use crate::error::{BridgeError, Result};
use crate::migration;
use crate::ticket::{Delivery, SyncTicket};
use crate::traits::{Bridge, BridgeConfig, BridgeFactory, LogEntry, RecordSink};

/// Handle to the durable log database.
#[derive(Clone)]
pub struct SqliteLog {
    conn: Arc<Mutex<Connection>>,
    appended: Arc<Notify>,
}

impl SqliteLog {
    /// Open (creating and migrating if needed) the log at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        migration::migrate(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    /// In-memory database, for tests.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            appended: Arc::new(Notify::new()),
        }
    }

    pub fn bridge(&self, key: &PartitionKey, config: BridgeConfig) -> SqliteBridge {
        SqliteBridge {
            key: key.clone(),
            token: key.to_token(),
            log: self.clone(),
            config,
            delivery: Arc::new(Delivery::new()),
            consumer: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| BridgeError::Poisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| BridgeError::Task(e.to_string()))?
    }

    /// Append a record and wake local subscribers. Returns the new offset.
    pub async fn append(&self, key: &PartitionKey, record: &Record) -> Result<u64> {
        let token = key.to_token();
        let record_id = record.compute_id();
        let bytes = record.to_bytes()?;

        let offset = self
            .blocking(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let next: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(seq), 0) + 1 FROM partition_log WHERE partition_key = ?1",
                    params![token],
                    |row| row.get(0),
                )?;
                tx.execute(
                    "INSERT INTO partition_log (partition_key, seq, record_id, record, appended_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![token, next, record_id.as_bytes().to_vec(), bytes, now_millis()],
                )?;
                tx.commit()?;
                Ok(next as u64)
            })
            .await?;

        self.appended.notify_waiters();
        Ok(offset)
    }

    /// Highest offset in the partition, 0 when empty.
    pub async fn high_water(&self, key: &PartitionKey) -> Result<u64> {
        let token = key.to_token();
        self.blocking(move |conn| {
            let high: i64 = conn.query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM partition_log WHERE partition_key = ?1",
                params![token],
                |row| row.get(0),
            )?;
            Ok(high as u64)
        })
        .await
    }

    /// Raw rows after `offset`, at most `limit`.
    pub async fn read_after(
        &self,
        key: &PartitionKey,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<(u64, Vec<u8>)>> {
        let token = key.to_token();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT seq, record FROM partition_log
                 WHERE partition_key = ?1 AND seq > ?2
                 ORDER BY seq ASC LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![token, offset as i64, limit as i64], |row| {
                    Ok((row.get::<_, i64>(0)? as u64, row.get::<_, Vec<u8>>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

impl BridgeFactory for SqliteLog {
    fn open(&self, key: &PartitionKey, config: &BridgeConfig) -> Result<Arc<dyn Bridge>> {
        Ok(Arc::new(self.bridge(key, config.clone())))
    }
}

/// Bridge over one partition of a [`SqliteLog`].
pub struct SqliteBridge {
    key: PartitionKey,
    token: String,
    log: SqliteLog,
    config: BridgeConfig,
    delivery: Arc<Delivery>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

#[async_trait]
impl Bridge for SqliteBridge {
    fn partition(&self) -> &PartitionKey {
        &self.key
    }

    async fn send(&self, record: &Record) -> Result<u64> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::Closed(self.token.clone()));
        }
        self.log.append(&self.key, record).await
    }

    async fn subscribe(&self, sink: Arc<dyn RecordSink>) -> Result<()> {
        if self.consumer.lock().unwrap().is_some() {
            return Err(BridgeError::AlreadySubscribed(self.token.clone()));
        }
        let target = self.log.high_water(&self.key).await?;

        let log = self.log.clone();
        let key = self.key.clone();
        let delivery = self.delivery.clone();
        let batch_size = self.config.batch_size.max(1);
        let poll = self.config.poll_interval();

        let handle = tokio::spawn(async move {
            let appended = log.appended.clone();
            let mut cursor = 0u64;
            let mut loaded = target == 0;
            if loaded {
                sink.caught_up();
            }
            loop {
                // Registered before the read so a concurrent append wakes us.
                let notified = appended.notified();
                match log.read_after(&key, cursor, batch_size).await {
                    Ok(rows) if !rows.is_empty() => {
                        let mut entries = Vec::with_capacity(rows.len());
                        for (offset, bytes) in rows {
                            cursor = offset;
                            match Record::from_bytes(&bytes) {
                                Ok(record) => entries.push(LogEntry {
                                    offset,
                                    record: Arc::new(record),
                                }),
                                Err(e) => {
                                    tracing::warn!(partition = %key, offset, "undecodable record skipped: {}", e);
                                }
                            }
                        }
                        if !entries.is_empty() {
                            sink.feed(&entries);
                        }
                        delivery.advance(cursor);
                        if !loaded && cursor >= target {
                            loaded = true;
                            sink.caught_up();
                        }
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(partition = %key, "log poll failed: {}", e);
                    }
                }
                tokio::select! {
                    _ = notified => {}
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        });

        let mut consumer = self.consumer.lock().unwrap();
        if consumer.is_some() {
            handle.abort();
            return Err(BridgeError::AlreadySubscribed(self.token.clone()));
        }
        *consumer = Some(handle);
        Ok(())
    }

    async fn start_sync(&self) -> Result<SyncTicket> {
        Ok(SyncTicket(self.log.high_water(&self.key).await?))
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

impl Drop for SqliteBridge {
    fn drop(&mut self) {
        if let Some(handle) = self.consumer.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustchain_core::{EntityMeta, EntityType, Keypair, RecordBuilder};

    #[derive(Default)]
    struct Collect {
        records: Mutex<Vec<(u64, Record)>>,
    }

    impl RecordSink for Collect {
        fn feed(&self, entries: &[LogEntry]) {
            let mut records = self.records.lock().unwrap();
            for entry in entries {
                records.push((entry.offset, (*entry.record).clone()));
            }
        }

        fn caught_up(&self) {}
    }

    fn record(body: &'static [u8]) -> Record {
        RecordBuilder::data(EntityMeta::new(EntityType::new("note")), body)
            .sign(&Keypair::generate())
    }

    fn key() -> PartitionKey {
        PartitionKey::new("durable", 0).unwrap()
    }

    #[tokio::test]
    async fn test_offsets_are_per_partition() {
        let log = SqliteLog::open_memory().unwrap();
        let other = PartitionKey::new("durable", 1).unwrap();

        assert_eq!(log.append(&key(), &record(b"a")).await.unwrap(), 1);
        assert_eq!(log.append(&key(), &record(b"b")).await.unwrap(), 2);
        assert_eq!(log.append(&other, &record(b"c")).await.unwrap(), 1);
        assert_eq!(log.high_water(&key()).await.unwrap(), 2);
        assert_eq!(log.read_after(&key(), 1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_send_is_delivered() {
        let log = SqliteLog::open_memory().unwrap();
        let bridge = log.bridge(&key(), BridgeConfig::default());
        let sink = Arc::new(Collect::default());
        bridge.subscribe(sink.clone()).await.unwrap();

        let sent = record(b"hello");
        bridge.send(&sent).await.unwrap();
        bridge.sync(Duration::from_secs(2)).await.unwrap();

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], (1, sent));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");

        {
            let log = SqliteLog::open(&path).unwrap();
            log.append(&key(), &record(b"one")).await.unwrap();
            log.append(&key(), &record(b"two")).await.unwrap();
        }

        let log = SqliteLog::open(&path).unwrap();
        let bridge = log.bridge(&key(), BridgeConfig::default());
        let sink = Arc::new(Collect::default());
        bridge.subscribe(sink.clone()).await.unwrap();
        bridge.sync(Duration::from_secs(2)).await.unwrap();

        let bodies: Vec<_> = sink
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.payload.clone())
            .collect();
        assert_eq!(bodies, vec![&b"one"[..], &b"two"[..]]);
    }

    #[tokio::test]
    async fn test_two_handles_see_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let config = BridgeConfig {
            poll_interval_ms: 10,
            ..BridgeConfig::default()
        };

        let a = SqliteLog::open(&path).unwrap().bridge(&key(), config.clone());
        let b = SqliteLog::open(&path).unwrap().bridge(&key(), config);
        let sink = Arc::new(Collect::default());
        b.subscribe(sink.clone()).await.unwrap();

        a.send(&record(b"remote")).await.unwrap();
        b.sync(Duration::from_secs(2)).await.unwrap();
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }
}
