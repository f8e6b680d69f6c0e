use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tagstream_api::{EntryId, LogStore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::Backend;
use crate::stats::{ConsumerStat, StatTable};

#[derive(Debug, Default)]
struct Progress {
    total: u64,
    last_read: Option<EntryId>,
}

/// Periodically publishes one entity's throughput and lag to the topic's
/// stats table.
pub struct Reporter {
    log: Arc<dyn LogStore>,
    table: StatTable,
    topic: String,
    full_name: String,
    tag_id: String,
    interval: Duration,
    progress: Mutex<Progress>,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("topic", &self.topic)
            .field("full_name", &self.full_name)
            .finish()
    }
}

impl Reporter {
    pub fn new(
        backend: &Backend,
        topic: &str,
        full_name: &str,
        tag_id: &str,
        interval: Duration,
    ) -> Self {
        Self {
            log: backend.log.clone(),
            table: StatTable::new(backend.hash.clone(), topic),
            topic: topic.to_string(),
            full_name: full_name.to_string(),
            tag_id: tag_id.to_string(),
            interval,
            progress: Mutex::new(Progress::default()),
        }
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        match self.progress.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(name = %self.full_name, "reporter lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Record that entries up to `last_read` were read, carrying `increment`
    /// messages.
    pub fn update(&self, last_read: EntryId, increment: u64) {
        let mut progress = self.progress();
        progress.total += increment;
        progress.last_read = Some(last_read);
    }

    /// Write one stats row and return the total it was computed from, the
    /// baseline for the next report. Skips the write when the topic frontier
    /// cannot be fetched.
    pub async fn report(&self, baseline: u64) -> u64 {
        let (total, last_read) = {
            let progress = self.progress();
            (progress.total, progress.last_read)
        };

        let info = match self.log.info(&self.topic).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(topic = %self.topic, name = %self.full_name, error = %e, "frontier unavailable, skipping report");
                return baseline;
            }
        };
        let frontier = info.last_entry_id.unwrap_or(info.last_generated_id);
        let latency = last_read.map_or(-1, |read| frontier.ms_gap(&read));

        let interval_ms = self.interval.as_millis().max(1) as u64;
        let qps = total.saturating_sub(baseline) * 1_000 / interval_ms;

        let stat = ConsumerStat {
            qps: qps as i64,
            tag_id: self.tag_id.clone(),
            last_entry_id: frontier.to_string(),
            last_read_id: last_read.map(|id| id.to_string()).unwrap_or_default(),
            latency_entries: latency,
            updated_at: chrono::Utc::now(),
        };
        if let Err(e) = self.table.put(&self.full_name, &stat).await {
            tracing::warn!(topic = %self.topic, name = %self.full_name, error = %e, "stats write failed");
            return baseline;
        }
        tracing::trace!(topic = %self.topic, name = %self.full_name, qps, latency, "stats reported");
        total
    }

    /// Report once, then keep reporting every interval until `token` is
    /// cancelled.
    pub async fn start(self: &Arc<Self>, token: CancellationToken) {
        let baseline = self.report(0).await;
        let reporter = self.clone();
        tokio::spawn(async move {
            let mut baseline = baseline;
            let mut ticker = tokio::time::interval(reporter.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => baseline = reporter.report(baseline).await,
                    _ = token.cancelled() => break,
                }
            }
            tracing::debug!(name = %reporter.full_name, "reporter stopped");
        });
    }
}
