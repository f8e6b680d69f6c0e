use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tagstream_api::{BoxFuture, EntryId, LogStore, ReadOptions, StoreError};
use tokio_util::sync::CancellationToken;

use crate::Backend;
use crate::codec::ensure_topic;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::reporter::Reporter;
use crate::subscriber::{Handler, Subscriber, Subscription, backoff, deliver};

struct ConsumerInner {
    log: Arc<dyn LogStore>,
    topic: String,
    tag_id: String,
    full_name: String,
    config: StreamConfig,
    reporter: Arc<Reporter>,
}

impl Subscription for ConsumerInner {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn tag_id(&self) -> &str {
        &self.tag_id
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }
}

async fn run_reader(inner: Arc<ConsumerInner>, handler: Handler, start: EntryId, token: CancellationToken) {
    let options = ReadOptions {
        count: inner.config.read_count,
        block: Some(inner.config.block()),
    };
    let mut cursor = start;
    loop {
        let read = tokio::select! {
            read = inner.log.read(&inner.topic, cursor, options) => read,
            _ = token.cancelled() => break,
        };
        match read {
            Ok(entries) => {
                let Some(last) = entries.last() else { continue };
                cursor = last.id;
                let read = deliver(&entries, &handler, &*inner);
                inner.reporter.update(cursor, read);
            }
            Err(e) => {
                tracing::warn!(topic = %inner.topic, name = %inner.full_name, error = %e, "read failed, backing off");
                if !backoff(&token, inner.config.error_backoff()).await {
                    break;
                }
            }
        }
    }
    tracing::info!(topic = %inner.topic, name = %inner.full_name, "consumer stopped");
}

/// Non-durable reader: sees every entry appended after `subscribe`, keeps
/// broadcasts and messages addressed to its own name.
pub struct Consumer {
    inner: Arc<ConsumerInner>,
    handler: Mutex<Option<Handler>>,
    subscribed: AtomicBool,
    token: CancellationToken,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("topic", &self.inner.topic)
            .field("full_name", &self.inner.full_name)
            .finish()
    }
}

impl Consumer {
    pub fn new(backend: &Backend, topic: &str, name: &str, config: StreamConfig) -> Result<Self, StreamError> {
        config.validate()?;
        let full_name = format!("consumer@{name}");
        let reporter = Reporter::new(backend, topic, &full_name, name, config.report_interval());
        Ok(Self {
            inner: Arc::new(ConsumerInner {
                log: backend.log.clone(),
                topic: topic.to_string(),
                tag_id: name.to_string(),
                full_name,
                config,
                reporter: Arc::new(reporter),
            }),
            handler: Mutex::new(None),
            subscribed: AtomicBool::new(false),
            token: CancellationToken::new(),
        })
    }

    fn handler_slot(&self) -> MutexGuard<'_, Option<Handler>> {
        match self.handler.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(name = %self.inner.full_name, "handler lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    async fn start(&self) -> Result<(), StreamError> {
        if self.token.is_cancelled() {
            return Err(StreamError::Stopped(self.inner.full_name.clone()));
        }
        let handler = self
            .handler_slot()
            .clone()
            .ok_or_else(|| StreamError::NoHandler(self.inner.full_name.clone()))?;
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(StreamError::AlreadySubscribed(self.inner.full_name.clone()));
        }

        let inner = &self.inner;
        ensure_topic(&*inner.log, &inner.topic, inner.config.max_len).await;
        let start = match inner.log.info(&inner.topic).await {
            Ok(info) => info.last_generated_id,
            Err(StoreError::TopicNotFound(_)) => EntryId::ZERO,
            Err(e) => {
                self.subscribed.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        inner.reporter.update(start, 0);
        inner.reporter.start(self.token.clone()).await;
        tokio::spawn(run_reader(inner.clone(), handler, start, self.token.clone()));
        tracing::info!(topic = %inner.topic, name = %inner.full_name, start = %start, "consumer subscribed");
        Ok(())
    }
}

impl Subscription for Consumer {
    fn topic(&self) -> &str {
        &self.inner.topic
    }

    fn tag_id(&self) -> &str {
        &self.inner.tag_id
    }

    fn full_name(&self) -> &str {
        &self.inner.full_name
    }
}

impl Subscriber for Consumer {
    fn set_handler(&self, handler: Handler) {
        *self.handler_slot() = Some(handler);
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<(), StreamError>> {
        Box::pin(self.start())
    }

    fn stop(&self) {
        self.token.cancel();
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tagstream_store_memory::{MemoryHash, MemoryLog};

    use super::*;
    use crate::Message;
    use crate::codec::encode;
    use crate::stats::StatTable;

    fn backend() -> Backend {
        Backend::new(Arc::new(MemoryLog::new()), Arc::new(MemoryHash::new()))
    }

    fn recording() -> (Handler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = {
            let seen = seen.clone();
            Arc::new(move |msg: &Message, _: &dyn Subscription| seen.lock().unwrap().push(msg.id.clone()))
        };
        (handler, seen)
    }

    async fn append(backend: &Backend, batch: &[Message]) {
        backend.log.append("t", encode(batch), 0).await.expect("append");
    }

    #[tokio::test]
    async fn subscribe_requires_handler_once() {
        let backend = backend();
        let consumer = Consumer::new(&backend, "t", "c1", StreamConfig::default()).expect("consumer");
        assert_eq!(consumer.full_name(), "consumer@c1");
        assert_eq!(consumer.tag_id(), "c1");
        assert!(matches!(consumer.subscribe().await, Err(StreamError::NoHandler(_))));

        consumer.set_handler(recording().0);
        consumer.subscribe().await.expect("subscribe");
        assert!(matches!(consumer.subscribe().await, Err(StreamError::AlreadySubscribed(_))));
        consumer.stop();
    }

    #[tokio::test]
    async fn reads_only_what_follows_subscribe() {
        let backend = backend();
        append(&backend, &[Message::new("old", "$", "x")]).await;

        let consumer = Consumer::new(&backend, "t", "c1", StreamConfig::default()).expect("consumer");
        let (handler, seen) = recording();
        consumer.set_handler(handler);
        consumer.subscribe().await.expect("subscribe");

        append(&backend, &[
            Message::new("a", "c1", "1"),
            Message::new("b", "c2", "2"),
            Message::new("c", "$", "3"),
        ])
        .await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("delivery");
        assert_eq!(*seen.lock().unwrap(), vec!["a", "c"]);
        consumer.stop();
    }

    #[tokio::test]
    async fn subscribe_writes_first_stat_row() {
        let backend = backend();
        let consumer = Consumer::new(&backend, "t", "c1", StreamConfig::default()).expect("consumer");
        consumer.set_handler(recording().0);
        consumer.subscribe().await.expect("subscribe");

        let rows = StatTable::new(backend.hash.clone(), "t").all().await.expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "consumer@c1");
        assert_eq!(rows[0].1.latency_entries, 0);
        consumer.stop();
    }

    #[tokio::test]
    async fn stopped_consumer_cannot_subscribe() {
        let backend = backend();
        let consumer = Consumer::new(&backend, "t", "c1", StreamConfig::default()).expect("consumer");
        consumer.set_handler(recording().0);
        consumer.stop();
        assert!(matches!(consumer.subscribe().await, Err(StreamError::Stopped(_))));
    }
}
