use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;
use tokio::time::Instant;

use tagstream_api::{
    BoxFuture, Entry, EntryId, FieldMap, GroupInfo, GroupRead, GroupReadOptions, GroupStart,
    LogStore, PendingEntry, PendingSummary, ReadOptions, StoreError, TopicInfo,
};

use crate::lock_recover;

// ═══════════════════════════════════════════════════════════════
//  Per-topic state
// ═══════════════════════════════════════════════════════════════

struct PendingState {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

struct GroupState {
    last_delivered: EntryId,
    /// Delivered but not yet acknowledged, keyed by entry id.
    pending: BTreeMap<EntryId, PendingState>,
    consumers: HashSet<String>,
}

impl GroupState {
    fn new(last_delivered: EntryId) -> Self {
        Self {
            last_delivered,
            pending: BTreeMap::new(),
            consumers: HashSet::new(),
        }
    }
}

struct TopicLog {
    /// Ascending by id.
    entries: VecDeque<Entry>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl TopicLog {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            last_id: EntryId::ZERO,
            groups: HashMap::new(),
        }
    }
}

fn entries_after(entries: &VecDeque<Entry>, after: EntryId, count: usize) -> Vec<Entry> {
    let start = entries.partition_point(|e| e.id <= after);
    entries.range(start..).take(count).cloned().collect()
}

fn find(entries: &VecDeque<Entry>, id: EntryId) -> Option<&Entry> {
    entries
        .binary_search_by(|e| e.id.cmp(&id))
        .ok()
        .map(|i| &entries[i])
}

fn deliver_new(
    entries: &VecDeque<Entry>,
    state: &mut GroupState,
    member: &str,
    count: usize,
    no_ack: bool,
) -> Vec<Entry> {
    let batch = entries_after(entries, state.last_delivered, count);
    if let Some(last) = batch.last() {
        state.last_delivered = last.id;
    }
    if !no_ack {
        let now = Instant::now();
        for entry in &batch {
            state.pending.insert(entry.id, PendingState {
                consumer: member.to_string(),
                delivered_at: now,
                delivery_count: 1,
            });
        }
    }
    batch
}

fn redeliver_pending(
    entries: &VecDeque<Entry>,
    state: &mut GroupState,
    member: &str,
    after: EntryId,
    count: usize,
) -> Vec<Entry> {
    let now = Instant::now();
    let mut batch = Vec::new();
    for (id, pending) in state.pending.range_mut((Bound::Excluded(after), Bound::Unbounded)) {
        if batch.len() >= count {
            break;
        }
        if pending.consumer != member {
            continue;
        }
        pending.delivered_at = now;
        pending.delivery_count += 1;
        // Trimmed entries are still handed out, with no fields.
        let fields = find(entries, *id).map(|e| e.fields.clone()).unwrap_or_default();
        batch.push(Entry::new(*id, fields));
    }
    batch
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn group_not_found(topic: &str, group: &str) -> StoreError {
    StoreError::GroupNotFound {
        topic: topic.to_string(),
        group: group.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryLog
// ═══════════════════════════════════════════════════════════════

/// In-memory `LogStore` with Redis-Streams semantics.
///
/// Each topic is a ring buffer trimmed to `max_len` on append. Blocking
/// reads wait on a broadcast unit signal sent after every append.
pub struct MemoryLog {
    topics: Mutex<HashMap<String, TopicLog>>,
    notify_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = lock_recover(&self.topics, "log");
        f.debug_struct("MemoryLog")
            .field("topics", &topics.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        Self {
            topics: Mutex::new(HashMap::new()),
            notify_tx,
        }
    }
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Wait for the next append or the deadline. `false` on timeout.
async fn wait_append(rx: &mut broadcast::Receiver<()>, deadline: Instant) -> bool {
    // Lagged counts as a wake-up: something was appended.
    tokio::time::timeout_at(deadline, rx.recv()).await.is_ok()
}

impl LogStore for MemoryLog {
    fn append<'a>(&'a self, topic: &'a str, fields: FieldMap, max_len: usize)
        -> BoxFuture<'a, Result<EntryId, StoreError>>
    {
        Box::pin(async move {
            if fields.is_empty() {
                return Err(StoreError::InvalidArgument(
                    "append requires at least one field".into(),
                ));
            }
            let id = {
                let mut topics = lock_recover(&self.topics, "log");
                let log = topics.entry(topic.to_string()).or_insert_with(TopicLog::new);
                let id = log.last_id.successor(now_ms());
                log.last_id = id;
                log.entries.push_back(Entry::new(id, fields));
                if max_len > 0 {
                    while log.entries.len() > max_len {
                        log.entries.pop_front();
                    }
                }
                id
            };
            // Ignore if nobody is waiting.
            let _ = self.notify_tx.send(());
            Ok(id)
        })
    }

    fn read<'a>(&'a self, topic: &'a str, after: EntryId, options: ReadOptions)
        -> BoxFuture<'a, Result<Vec<Entry>, StoreError>>
    {
        Box::pin(async move {
            let deadline = options.block.map(|b| Instant::now() + b);
            loop {
                let mut notify_rx = self.notify_tx.subscribe();
                {
                    let topics = lock_recover(&self.topics, "log");
                    if let Some(log) = topics.get(topic) {
                        let batch = entries_after(&log.entries, after, options.count);
                        if !batch.is_empty() {
                            return Ok(batch);
                        }
                    }
                }
                let Some(deadline) = deadline else {
                    return Ok(Vec::new());
                };
                if !wait_append(&mut notify_rx, deadline).await {
                    return Ok(Vec::new());
                }
            }
        })
    }

    fn create_group<'a>(&'a self, topic: &'a str, group: &'a str, start: GroupStart)
        -> BoxFuture<'a, Result<(), StoreError>>
    {
        Box::pin(async move {
            let mut topics = lock_recover(&self.topics, "log");
            let log = topics
                .get_mut(topic)
                .ok_or_else(|| StoreError::TopicNotFound(topic.to_string()))?;
            if log.groups.contains_key(group) {
                return Err(StoreError::GroupExists {
                    topic: topic.to_string(),
                    group: group.to_string(),
                });
            }
            let last_delivered = match start {
                GroupStart::Beginning => EntryId::ZERO,
                GroupStart::Latest => log.last_id,
            };
            log.groups.insert(group.to_string(), GroupState::new(last_delivered));
            Ok(())
        })
    }

    fn read_group<'a>(
        &'a self,
        topic: &'a str,
        group: &'a str,
        member: &'a str,
        options: GroupReadOptions,
    ) -> BoxFuture<'a, Result<Vec<Entry>, StoreError>> {
        Box::pin(async move {
            let deadline = match options.position {
                GroupRead::New => options.block.map(|b| Instant::now() + b),
                GroupRead::Pending { .. } => None,
            };
            loop {
                let mut notify_rx = self.notify_tx.subscribe();
                {
                    let mut topics = lock_recover(&self.topics, "log");
                    let TopicLog { entries, groups, .. } = topics
                        .get_mut(topic)
                        .ok_or_else(|| group_not_found(topic, group))?;
                    let state = groups
                        .get_mut(group)
                        .ok_or_else(|| group_not_found(topic, group))?;
                    state.consumers.insert(member.to_string());

                    let batch = match options.position {
                        GroupRead::Pending { after } => {
                            return Ok(redeliver_pending(entries, state, member, after, options.count));
                        }
                        GroupRead::New => {
                            deliver_new(entries, state, member, options.count, options.no_ack)
                        }
                    };
                    if !batch.is_empty() {
                        return Ok(batch);
                    }
                }
                let Some(deadline) = deadline else {
                    return Ok(Vec::new());
                };
                if !wait_append(&mut notify_rx, deadline).await {
                    return Ok(Vec::new());
                }
            }
        })
    }

    fn ack<'a>(&'a self, topic: &'a str, group: &'a str, ids: &'a [EntryId])
        -> BoxFuture<'a, Result<u64, StoreError>>
    {
        Box::pin(async move {
            let mut topics = lock_recover(&self.topics, "log");
            let Some(state) = topics.get_mut(topic).and_then(|log| log.groups.get_mut(group)) else {
                return Ok(0);
            };
            let acked = ids
                .iter()
                .filter(|id| state.pending.remove(id).is_some())
                .count();
            Ok(acked as u64)
        })
    }

    fn length<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            let topics = lock_recover(&self.topics, "log");
            Ok(topics.get(topic).map_or(0, |log| log.entries.len() as u64))
        })
    }

    fn info<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<TopicInfo, StoreError>> {
        Box::pin(async move {
            let topics = lock_recover(&self.topics, "log");
            let log = topics
                .get(topic)
                .ok_or_else(|| StoreError::TopicNotFound(topic.to_string()))?;
            Ok(TopicInfo {
                length: log.entries.len() as u64,
                last_generated_id: log.last_id,
                first_entry_id: log.entries.front().map(|e| e.id),
                last_entry_id: log.entries.back().map(|e| e.id),
                groups: log.groups.len(),
            })
        })
    }

    fn groups_info<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<Vec<GroupInfo>, StoreError>> {
        Box::pin(async move {
            let topics = lock_recover(&self.topics, "log");
            let log = topics
                .get(topic)
                .ok_or_else(|| StoreError::TopicNotFound(topic.to_string()))?;
            let mut groups: Vec<GroupInfo> = log
                .groups
                .iter()
                .map(|(name, state)| GroupInfo {
                    name: name.clone(),
                    consumers: state.consumers.len(),
                    pending: state.pending.len() as u64,
                    last_delivered_id: state.last_delivered,
                })
                .collect();
            groups.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(groups)
        })
    }

    fn pending<'a>(&'a self, topic: &'a str, group: &'a str)
        -> BoxFuture<'a, Result<PendingSummary, StoreError>>
    {
        Box::pin(async move {
            let topics = lock_recover(&self.topics, "log");
            let state = topics
                .get(topic)
                .and_then(|log| log.groups.get(group))
                .ok_or_else(|| group_not_found(topic, group))?;

            let mut per_consumer: BTreeMap<&str, u64> = BTreeMap::new();
            for pending in state.pending.values() {
                *per_consumer.entry(pending.consumer.as_str()).or_default() += 1;
            }
            Ok(PendingSummary {
                count: state.pending.len() as u64,
                lowest_id: state.pending.keys().next().copied(),
                highest_id: state.pending.keys().next_back().copied(),
                consumers: per_consumer
                    .into_iter()
                    .map(|(name, n)| (name.to_string(), n))
                    .collect(),
            })
        })
    }

    fn pending_entries<'a>(&'a self, topic: &'a str, group: &'a str, count: usize)
        -> BoxFuture<'a, Result<Vec<PendingEntry>, StoreError>>
    {
        Box::pin(async move {
            let topics = lock_recover(&self.topics, "log");
            let state = topics
                .get(topic)
                .and_then(|log| log.groups.get(group))
                .ok_or_else(|| group_not_found(topic, group))?;
            let now = Instant::now();
            Ok(state
                .pending
                .iter()
                .take(count)
                .map(|(id, pending)| PendingEntry {
                    id: *id,
                    consumer: pending.consumer.clone(),
                    idle: now.saturating_duration_since(pending.delivered_at),
                    delivery_count: pending.delivery_count,
                })
                .collect())
        })
    }

    fn claim<'a>(
        &'a self,
        topic: &'a str,
        group: &'a str,
        member: &'a str,
        min_idle: Duration,
        ids: &'a [EntryId],
    ) -> BoxFuture<'a, Result<Vec<Entry>, StoreError>> {
        Box::pin(async move {
            let mut topics = lock_recover(&self.topics, "log");
            let TopicLog { entries, groups, .. } = topics
                .get_mut(topic)
                .ok_or_else(|| group_not_found(topic, group))?;
            let state = groups
                .get_mut(group)
                .ok_or_else(|| group_not_found(topic, group))?;

            let now = Instant::now();
            let mut claimed = Vec::new();
            for id in ids {
                let Some(pending) = state.pending.get_mut(id) else {
                    continue;
                };
                if now.saturating_duration_since(pending.delivered_at) < min_idle {
                    continue;
                }
                match find(entries, *id) {
                    Some(entry) => {
                        pending.consumer = member.to_string();
                        pending.delivered_at = now;
                        pending.delivery_count += 1;
                        claimed.push(entry.clone());
                    }
                    // Trimmed away: nothing left to hand over.
                    None => {
                        state.pending.remove(id);
                    }
                }
            }
            state.consumers.insert(member.to_string());
            Ok(claimed)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Bytes::copy_from_slice(v.as_bytes())))
            .collect()
    }

    fn no_block(count: usize) -> ReadOptions {
        ReadOptions { count, block: None }
    }

    fn new_entries(count: usize) -> GroupReadOptions {
        GroupReadOptions {
            position: GroupRead::New,
            count,
            block: None,
            no_ack: false,
        }
    }

    fn pending_from_start(count: usize) -> GroupReadOptions {
        GroupReadOptions {
            position: GroupRead::Pending { after: EntryId::ZERO },
            count,
            block: None,
            no_ack: false,
        }
    }

    #[tokio::test]
    async fn append_assigns_increasing_ids_and_trims() {
        let log = MemoryLog::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let v = i.to_string();
            ids.push(log.append("t", fields(&[("k", &v)]), 3).await.expect("append"));
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(log.length("t").await.expect("len"), 3);

        let info = log.info("t").await.expect("info");
        assert_eq!(info.first_entry_id, Some(ids[2]));
        assert_eq!(info.last_entry_id, Some(ids[4]));
        assert_eq!(info.last_generated_id, ids[4]);
    }

    #[tokio::test]
    async fn append_rejects_empty_entry() {
        let log = MemoryLog::new();
        let err = log.append("t", FieldMap::new(), 0).await.expect_err("empty entry");
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn read_returns_entries_after_cursor() {
        let log = MemoryLog::new();
        let first = log.append("t", fields(&[("a", "1")]), 0).await.expect("append");
        let second = log.append("t", fields(&[("b", "2")]), 0).await.expect("append");

        let all = log.read("t", EntryId::ZERO, no_block(10)).await.expect("read");
        assert_eq!(all.iter().map(|e| e.id).collect::<Vec<_>>(), vec![first, second]);

        let tail = log.read("t", first, no_block(10)).await.expect("read");
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].id, second);

        assert!(log.read("missing", EntryId::ZERO, no_block(10)).await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_append() {
        let log = Arc::new(MemoryLog::new());
        let reader = {
            let log = log.clone();
            tokio::spawn(async move {
                log.read("t", EntryId::ZERO, ReadOptions {
                    count: 10,
                    block: Some(Duration::from_secs(5)),
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        log.append("t", fields(&[("k", "v")]), 0).await.expect("append");

        let entries = reader.await.expect("join").expect("read");
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn blocking_read_times_out_empty() {
        let log = MemoryLog::new();
        let entries = log
            .read("t", EntryId::ZERO, ReadOptions {
                count: 10,
                block: Some(Duration::from_millis(20)),
            })
            .await
            .expect("read");
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn create_group_requires_topic_and_is_unique() {
        let log = MemoryLog::new();
        let err = log.create_group("t", "g", GroupStart::Beginning).await.expect_err("no topic");
        assert!(matches!(err, StoreError::TopicNotFound(_)));

        log.append("t", fields(&[("k", "v")]), 0).await.expect("append");
        log.create_group("t", "g", GroupStart::Beginning).await.expect("create");
        let err = log.create_group("t", "g", GroupStart::Beginning).await.expect_err("dup");
        assert!(matches!(err, StoreError::GroupExists { .. }));
    }

    #[tokio::test]
    async fn group_members_never_share_an_entry() {
        let log = MemoryLog::new();
        log.append("t", fields(&[("k", "0")]), 0).await.expect("append");
        log.create_group("t", "g", GroupStart::Beginning).await.expect("create");
        for i in 1..10 {
            let v = i.to_string();
            log.append("t", fields(&[("k", &v)]), 0).await.expect("append");
        }

        let a = log.read_group("t", "g", "a", new_entries(4)).await.expect("read a");
        let b = log.read_group("t", "g", "b", new_entries(100)).await.expect("read b");
        assert_eq!(a.len(), 4);
        assert_eq!(b.len(), 6);
        assert!(a.iter().all(|x| b.iter().all(|y| x.id != y.id)));

        let again = log.read_group("t", "g", "a", new_entries(100)).await.expect("read a");
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn latest_group_skips_history() {
        let log = MemoryLog::new();
        log.append("t", fields(&[("old", "x")]), 0).await.expect("append");
        log.create_group("t", "g", GroupStart::Latest).await.expect("create");
        let fresh = log.append("t", fields(&[("new", "y")]), 0).await.expect("append");

        let got = log.read_group("t", "g", "a", new_entries(10)).await.expect("read");
        assert_eq!(got.iter().map(|e| e.id).collect::<Vec<_>>(), vec![fresh]);
    }

    #[tokio::test]
    async fn pending_entries_are_redelivered_until_acked() {
        let log = MemoryLog::new();
        log.append("t", fields(&[("k", "0")]), 0).await.expect("append");
        log.create_group("t", "g", GroupStart::Beginning).await.expect("create");

        let delivered = log.read_group("t", "g", "a", new_entries(10)).await.expect("read");
        assert_eq!(delivered.len(), 1);

        // Another member never sees a's pending entries.
        assert!(log.read_group("t", "g", "b", pending_from_start(10)).await.expect("b").is_empty());

        let again = log.read_group("t", "g", "a", pending_from_start(10)).await.expect("a");
        assert_eq!(again, delivered);

        let summary = log.pending("t", "g").await.expect("pending");
        assert_eq!(summary.count, 1);
        assert_eq!(summary.consumers, vec![("a".to_string(), 1)]);

        let ids: Vec<EntryId> = delivered.iter().map(|e| e.id).collect();
        assert_eq!(log.ack("t", "g", &ids).await.expect("ack"), 1);
        assert_eq!(log.ack("t", "g", &ids).await.expect("ack twice"), 0);
        assert!(log.read_group("t", "g", "a", pending_from_start(10)).await.expect("a").is_empty());
        assert_eq!(log.pending("t", "g").await.expect("pending").count, 0);
    }

    #[tokio::test]
    async fn no_ack_reads_skip_pending_list() {
        let log = MemoryLog::new();
        log.append("t", fields(&[("k", "0")]), 0).await.expect("append");
        log.create_group("t", "g", GroupStart::Beginning).await.expect("create");
        let opts = GroupReadOptions { no_ack: true, ..new_entries(10) };
        assert_eq!(log.read_group("t", "g", "a", opts).await.expect("read").len(), 1);
        assert_eq!(log.pending("t", "g").await.expect("pending").count, 0);
    }

    #[tokio::test]
    async fn claim_moves_idle_entries() {
        let log = MemoryLog::new();
        log.append("t", fields(&[("k", "0")]), 0).await.expect("append");
        log.create_group("t", "g", GroupStart::Beginning).await.expect("create");
        let delivered = log.read_group("t", "g", "a", new_entries(10)).await.expect("read");
        let ids: Vec<EntryId> = delivered.iter().map(|e| e.id).collect();

        let none = log
            .claim("t", "g", "sweeper", Duration::from_secs(3600), &ids)
            .await
            .expect("claim");
        assert!(none.is_empty());

        let claimed = log.claim("t", "g", "sweeper", Duration::ZERO, &ids).await.expect("claim");
        assert_eq!(claimed, delivered);

        let entries = log.pending_entries("t", "g", 10).await.expect("pending entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].consumer, "sweeper");
        assert_eq!(entries[0].delivery_count, 2);

        let drained = log
            .read_group("t", "g", "sweeper", pending_from_start(10))
            .await
            .expect("sweeper backlog");
        assert_eq!(drained.len(), 1);
    }

    #[tokio::test]
    async fn read_group_on_unknown_group_fails() {
        let log = MemoryLog::new();
        log.append("t", fields(&[("k", "0")]), 0).await.expect("append");
        let err = log.read_group("t", "nope", "a", new_entries(1)).await.expect_err("no group");
        assert!(matches!(err, StoreError::GroupNotFound { .. }));
    }
}
