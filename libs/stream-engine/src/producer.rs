use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use bytes::Bytes;
use tagstream_api::LogStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::codec::{Message, encode, ensure_topic, validate_id};
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::stats::StatTable;
use crate::{BROADCAST_TAG, Backend};

// ═══════════════════════════════════════════════════════════════
//  Shared state
// ═══════════════════════════════════════════════════════════════

struct ProducerInner {
    log: Arc<dyn LogStore>,
    table: StatTable,
    topic: String,
    config: StreamConfig,
    /// Tags with at least one fresh, caught-up consumer.
    available: RwLock<HashSet<String>>,
}

impl ProducerInner {
    fn is_available(&self, tag: &str) -> bool {
        let guard = match self.available.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(topic = %self.topic, "availability read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if tag == BROADCAST_TAG {
            !guard.is_empty()
        } else {
            guard.contains(tag)
        }
    }

    async fn refresh_availability(&self) {
        let rows = match self.table.all().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(topic = %self.topic, error = %e, "stats read failed, keeping previous availability");
                return;
            }
        };
        let now = chrono::Utc::now();
        let mut available = HashSet::new();
        for (name, stat) in rows {
            if stat.is_stale(now, self.config.stat_alive()) {
                tracing::info!(topic = %self.topic, name = %name, "removing stale consumer stat");
                if let Err(e) = self.table.remove(&name).await {
                    tracing::warn!(topic = %self.topic, name = %name, error = %e, "stale stat removal failed");
                }
                continue;
            }
            if stat.is_lagging(self.config.latency_tolerance) {
                tracing::debug!(topic = %self.topic, name = %name, latency = stat.latency_entries, "consumer lagging");
                continue;
            }
            available.insert(stat.tag_id);
        }

        let mut guard = match self.available.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(topic = %self.topic, "availability write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *guard = available;
    }

    async fn flush(&self, batch: &mut Vec<Message>) {
        if batch.is_empty() {
            return;
        }
        match self.log.append(&self.topic, encode(batch), self.config.max_len).await {
            Ok(id) => tracing::trace!(topic = %self.topic, entry = %id, count = batch.len(), "batch appended"),
            Err(e) => tracing::error!(topic = %self.topic, count = batch.len(), error = %e, "batch append failed, dropping"),
        }
        batch.clear();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Loops
// ═══════════════════════════════════════════════════════════════

async fn run_batcher(inner: Arc<ProducerInner>, mut rx: mpsc::Receiver<Message>, token: CancellationToken) {
    let cap = inner.config.batch_size;
    let linger = inner.config.linger();
    let mut batch = Vec::with_capacity(cap);
    let deadline = tokio::time::sleep(linger);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if batch.is_empty() {
                    deadline.as_mut().reset(Instant::now() + linger);
                }
                batch.push(msg);
                if batch.len() >= cap {
                    inner.flush(&mut batch).await;
                }
            }
            _ = &mut deadline, if !batch.is_empty() => inner.flush(&mut batch).await,
            _ = token.cancelled() => break,
        }
    }

    // Best effort: whatever was accepted before the stop still goes out.
    rx.close();
    while let Ok(msg) = rx.try_recv() {
        batch.push(msg);
        if batch.len() >= cap {
            inner.flush(&mut batch).await;
        }
    }
    inner.flush(&mut batch).await;
    tracing::info!(topic = %inner.topic, "producer batcher stopped");
}

async fn run_monitor(inner: Arc<ProducerInner>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.config.report_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; start() already refreshed.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => inner.refresh_availability().await,
            _ = token.cancelled() => break,
        }
    }
    tracing::debug!(topic = %inner.topic, "producer monitor stopped");
}

// ═══════════════════════════════════════════════════════════════
//  Producer
// ═══════════════════════════════════════════════════════════════

/// Batching publisher for one topic.
///
/// `publish` drops messages for tags nobody is keeping up with; the set of
/// available tags is recomputed from the topic's stats table every report
/// interval.
pub struct Producer {
    inner: Arc<ProducerInner>,
    tx: mpsc::Sender<Message>,
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    token: CancellationToken,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer").field("topic", &self.inner.topic).finish()
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>, topic: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!(topic = %topic, "producer lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl Producer {
    pub fn new(backend: &Backend, topic: &str, config: StreamConfig) -> Result<Self, StreamError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        Ok(Self {
            inner: Arc::new(ProducerInner {
                log: backend.log.clone(),
                table: StatTable::new(backend.hash.clone(), topic),
                topic: topic.to_string(),
                config,
                available: RwLock::new(HashSet::new()),
            }),
            tx,
            rx: Mutex::new(Some(rx)),
            handles: Mutex::new(Vec::new()),
            token: CancellationToken::new(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Bootstrap the topic, load availability once, then spawn the batching
    /// and monitoring loops.
    pub async fn start(&self) -> Result<(), StreamError> {
        if self.token.is_cancelled() {
            return Err(StreamError::Stopped(self.inner.topic.clone()));
        }
        let rx = lock(&self.rx, &self.inner.topic)
            .take()
            .ok_or_else(|| StreamError::AlreadyStarted(self.inner.topic.clone()))?;

        ensure_topic(&*self.inner.log, &self.inner.topic, self.inner.config.max_len).await;
        self.inner.refresh_availability().await;

        let batcher = tokio::spawn(run_batcher(self.inner.clone(), rx, self.token.clone()));
        let monitor = tokio::spawn(run_monitor(self.inner.clone(), self.token.clone()));
        lock(&self.handles, &self.inner.topic).extend([batcher, monitor]);
        tracing::info!(topic = %self.inner.topic, "producer started");
        Ok(())
    }

    /// Queue one message per tag, or a single broadcast message when `tags`
    /// is empty. Messages for unavailable tags are dropped. Returns how many
    /// were queued; waits while the queue is full.
    pub async fn publish(&self, id: &str, payload: impl Into<Bytes>, tags: &[&str]) -> Result<usize, StreamError> {
        if self.token.is_cancelled() {
            return Err(StreamError::Stopped(self.inner.topic.clone()));
        }
        validate_id(id)?;
        let payload = payload.into();
        let targets: &[&str] = if tags.is_empty() { &[BROADCAST_TAG] } else { tags };

        let mut accepted = 0;
        for tag in targets {
            if !self.inner.is_available(tag) {
                tracing::debug!(topic = %self.inner.topic, tag = %tag, id = %id, "tag unavailable, dropping message");
                continue;
            }
            self.tx
                .send(Message::new(id, *tag, payload.clone()))
                .await
                .map_err(|_| StreamError::Stopped(self.inner.topic.clone()))?;
            accepted += 1;
        }
        Ok(accepted)
    }

    pub fn is_available(&self, tag: &str) -> bool {
        self.inner.is_available(tag)
    }

    /// Recompute availability now instead of waiting for the next cycle.
    pub async fn refresh_availability(&self) {
        self.inner.refresh_availability().await;
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Stop and wait for the final flush.
    pub async fn shutdown(&self) {
        self.stop();
        let handles = std::mem::take(&mut *lock(&self.handles, &self.inner.topic));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(topic = %self.inner.topic, error = %e, "producer task failed");
            }
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tagstream_api::{EntryId, ReadOptions};
    use tagstream_store_memory::{MemoryHash, MemoryLog};

    use super::*;
    use crate::codec::decode;
    use crate::stats::ConsumerStat;

    fn backend() -> Backend {
        Backend::new(Arc::new(MemoryLog::new()), Arc::new(MemoryHash::new()))
    }

    async fn mark_fresh(backend: &Backend, topic: &str, name: &str, tag: &str) {
        let stat = ConsumerStat {
            qps: 0,
            tag_id: tag.into(),
            last_entry_id: String::new(),
            last_read_id: String::new(),
            latency_entries: 0,
            updated_at: chrono::Utc::now(),
        };
        StatTable::new(backend.hash.clone(), topic).put(name, &stat).await.expect("put stat");
    }

    async fn published(backend: &Backend, topic: &str) -> Vec<Vec<Message>> {
        let entries = backend
            .log
            .read(topic, EntryId::ZERO, ReadOptions { count: 1_000, block: None })
            .await
            .expect("read");
        entries
            .iter()
            .map(|e| decode(&e.fields))
            .filter(|batch| !batch.iter().any(Message::is_sentinel))
            .collect()
    }

    #[tokio::test]
    async fn nothing_available_without_stats() {
        let backend = backend();
        let producer = Producer::new(&backend, "t", StreamConfig::default()).expect("producer");
        producer.start().await.expect("start");

        assert!(!producer.is_available(BROADCAST_TAG));
        assert_eq!(producer.publish("m1", "x", &[]).await.expect("publish"), 0);
        assert_eq!(producer.publish("m2", "x", &["c1"]).await.expect("publish"), 0);
        producer.shutdown().await;
    }

    #[tokio::test]
    async fn batches_flush_on_cap_and_linger() {
        let backend = backend();
        mark_fresh(&backend, "t", "consumer@c1", "c1").await;
        let config = StreamConfig {
            batch_size: 4,
            ..StreamConfig::default()
        };
        let producer = Producer::new(&backend, "t", config).expect("producer");
        producer.start().await.expect("start");

        for i in 0..6 {
            let accepted = producer.publish(&format!("m{i}"), "x", &["c1", "c2"]).await.expect("publish");
            assert_eq!(accepted, 1);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let batches = published(&backend, "t").await;
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 2]);
        let ids: Vec<String> = batches.concat().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2", "m3", "m4", "m5"]);
        producer.shutdown().await;
    }

    #[tokio::test]
    async fn stop_flushes_and_rejects_further_publishes() {
        let backend = backend();
        mark_fresh(&backend, "t", "consumer@c1", "c1").await;
        let config = StreamConfig {
            linger_ms: 60_000,
            ..StreamConfig::default()
        };
        let producer = Producer::new(&backend, "t", config).expect("producer");
        producer.start().await.expect("start");

        assert_eq!(producer.publish("m1", "x", &[]).await.expect("publish"), 1);
        producer.shutdown().await;

        assert_eq!(published(&backend, "t").await.concat().len(), 1);
        assert!(matches!(producer.publish("m2", "x", &[]).await, Err(StreamError::Stopped(_))));
        assert!(matches!(producer.start().await, Err(StreamError::Stopped(_))));
    }

    #[tokio::test]
    async fn invalid_ids_are_rejected() {
        let backend = backend();
        let producer = Producer::new(&backend, "t", StreamConfig::default()).expect("producer");
        for id in ["", "a-b", crate::SENTINEL_ID] {
            assert!(matches!(
                producer.publish(id, "x", &[]).await,
                Err(StreamError::InvalidMessageId(_))
            ));
        }
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let backend = backend();
        let producer = Producer::new(&backend, "t", StreamConfig::default()).expect("producer");
        producer.start().await.expect("start");
        assert!(matches!(producer.start().await, Err(StreamError::AlreadyStarted(_))));
        producer.shutdown().await;
    }
}
