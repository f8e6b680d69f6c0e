use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tagstream_api::{
    BoxFuture, Entry, EntryId, GroupInfo, GroupRead, GroupReadOptions, GroupStart, LogStore,
    PendingEntry, PendingSummary, StoreError, TopicInfo,
};
use tokio_util::sync::CancellationToken;

use crate::Backend;
use crate::codec::ensure_topic;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::reporter::Reporter;
use crate::subscriber::{Handler, Subscriber, Subscription, backoff, deliver};

/// Read phase of a group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Re-reading entries delivered to this member but never acknowledged.
    Backlog { after: EntryId },
    /// Only entries never delivered to the group.
    Live,
}

struct GroupInner {
    log: Arc<dyn LogStore>,
    topic: String,
    group: String,
    member: String,
    full_name: String,
    config: StreamConfig,
    reporter: Arc<Reporter>,
}

impl Subscription for GroupInner {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn tag_id(&self) -> &str {
        &self.group
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }
}

impl GroupInner {
    async fn create_group(&self) -> Result<(), StoreError> {
        match self.log.create_group(&self.topic, &self.group, GroupStart::Beginning).await {
            Ok(()) => {
                tracing::info!(topic = %self.topic, group = %self.group, "group created");
                Ok(())
            }
            Err(e @ StoreError::GroupExists { .. }) => {
                tracing::warn!(topic = %self.topic, group = %self.group, "{e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn read(&self, phase: Phase) -> Result<Vec<Entry>, StoreError> {
        let position = match phase {
            Phase::Backlog { after } => GroupRead::Pending { after },
            Phase::Live => GroupRead::New,
        };
        let options = GroupReadOptions {
            position,
            count: self.config.read_count,
            block: Some(self.config.block()),
            no_ack: false,
        };
        self.log.read_group(&self.topic, &self.group, &self.member, options).await
    }
}

async fn run_member(inner: Arc<GroupInner>, handler: Handler, token: CancellationToken) {
    let mut phase = Phase::Backlog { after: EntryId::ZERO };
    loop {
        let read = tokio::select! {
            read = inner.read(phase) => read,
            _ = token.cancelled() => break,
        };
        let entries = match read {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(topic = %inner.topic, name = %inner.full_name, error = %e, "group read failed, backing off");
                if matches!(e, StoreError::GroupNotFound { .. }) {
                    ensure_topic(&*inner.log, &inner.topic, inner.config.max_len).await;
                    if let Err(e) = inner.create_group().await {
                        tracing::warn!(topic = %inner.topic, group = %inner.group, error = %e, "group re-create failed");
                    }
                }
                if !backoff(&token, inner.config.error_backoff()).await {
                    break;
                }
                continue;
            }
        };

        let Some(last) = entries.last().map(|e| e.id) else {
            if let Phase::Backlog { .. } = phase {
                tracing::debug!(topic = %inner.topic, name = %inner.full_name, "backlog drained, going live");
                phase = Phase::Live;
            }
            continue;
        };
        if let Phase::Backlog { after } = &mut phase {
            *after = last;
        }

        let read = deliver(&entries, &handler, &*inner);
        inner.reporter.update(last, read);

        let ids: Vec<EntryId> = entries.iter().map(|e| e.id).collect();
        if let Err(e) = inner.log.ack(&inner.topic, &inner.group, &ids).await {
            tracing::error!(topic = %inner.topic, name = %inner.full_name, count = ids.len(), error = %e, "ack failed, entries stay pending");
            if !backoff(&token, inner.config.error_backoff()).await {
                break;
            }
        }
    }
    tracing::info!(topic = %inner.topic, name = %inner.full_name, "group member stopped");
}

/// One member of a durable consumer group.
///
/// Members of the same group split the topic between them; different
/// groups each see every entry. A member first drains what was delivered
/// to it but never acknowledged, then follows new entries.
pub struct Group {
    inner: Arc<GroupInner>,
    handler: Mutex<Option<Handler>>,
    subscribed: AtomicBool,
    token: CancellationToken,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("topic", &self.inner.topic)
            .field("full_name", &self.inner.full_name)
            .finish()
    }
}

impl Group {
    /// Bootstrap the topic and create `group` at the start of the log. An
    /// existing group is reused.
    pub async fn new(
        backend: &Backend,
        topic: &str,
        group: &str,
        member: &str,
        config: StreamConfig,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let full_name = format!("group@{group}@{member}");
        let reporter = Reporter::new(backend, topic, &full_name, group, config.report_interval());
        let inner = Arc::new(GroupInner {
            log: backend.log.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            member: member.to_string(),
            full_name,
            config,
            reporter: Arc::new(reporter),
        });

        ensure_topic(&*inner.log, topic, inner.config.max_len).await;
        if let Err(e) = inner.create_group().await {
            tracing::warn!(topic = %topic, group = %group, error = %e, "group create failed");
        }

        Ok(Self {
            inner,
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

        self.inner.reporter.start(self.token.clone()).await;
        tokio::spawn(run_member(self.inner.clone(), handler, self.token.clone()));
        tracing::info!(topic = %self.inner.topic, name = %self.inner.full_name, "group member subscribed");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    //  Maintenance
    // ═══════════════════════════════════════════════════════════════

    /// Hand every pending entry of the group idle for at least `min_idle`
    /// to member `sweeper`, which drains them in its next backlog phase.
    /// Looks at up to `read_count` pending entries per call.
    pub async fn claim_idle(&self, sweeper: &str, min_idle: Duration) -> Result<Vec<EntryId>, StreamError> {
        let inner = &self.inner;
        let idle: Vec<EntryId> = inner
            .log
            .pending_entries(&inner.topic, &inner.group, inner.config.read_count)
            .await?
            .into_iter()
            .filter(|p| p.idle >= min_idle)
            .map(|p| p.id)
            .collect();
        if idle.is_empty() {
            return Ok(Vec::new());
        }
        let claimed: Vec<EntryId> = inner
            .log
            .claim(&inner.topic, &inner.group, sweeper, min_idle, &idle)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        tracing::info!(topic = %inner.topic, group = %inner.group, sweeper = %sweeper, count = claimed.len(), "claimed idle entries");
        Ok(claimed)
    }

    pub async fn pending(&self) -> Result<PendingSummary, StreamError> {
        Ok(self.inner.log.pending(&self.inner.topic, &self.inner.group).await?)
    }

    pub async fn pending_entries(&self, count: usize) -> Result<Vec<PendingEntry>, StreamError> {
        Ok(self.inner.log.pending_entries(&self.inner.topic, &self.inner.group, count).await?)
    }

    pub async fn groups_info(&self) -> Result<Vec<GroupInfo>, StreamError> {
        Ok(self.inner.log.groups_info(&self.inner.topic).await?)
    }

    pub async fn topic_info(&self) -> Result<TopicInfo, StreamError> {
        Ok(self.inner.log.info(&self.inner.topic).await?)
    }

    pub async fn topic_len(&self) -> Result<u64, StreamError> {
        Ok(self.inner.log.length(&self.inner.topic).await?)
    }
}

impl Subscription for Group {
    fn topic(&self) -> &str {
        &self.inner.topic
    }

    fn tag_id(&self) -> &str {
        &self.inner.group
    }

    fn full_name(&self) -> &str {
        &self.inner.full_name
    }
}

impl Subscriber for Group {
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

impl Drop for Group {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
