use std::time::Duration;

use crate::BoxFuture;
use crate::entry::{Entry, FieldMap};
use crate::error::StoreError;
use crate::id::EntryId;

// ════════════════════════════════════════════════════════════════
//  Read positions and options
// ════════════════════════════════════════════════════════════════

/// Where a new consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    /// From the first entry of the log (`0`).
    Beginning,
    /// Only entries appended after the group is created (`$`).
    Latest,
}

/// What a group member asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRead {
    /// Entries already delivered to this member but not acknowledged,
    /// with ids greater than `after`. Never blocks.
    Pending { after: EntryId },
    /// Entries never delivered to any member of the group (`>`).
    New,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub count: usize,
    /// `None` returns immediately; `Some(d)` long-polls up to `d`.
    pub block: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
pub struct GroupReadOptions {
    pub position: GroupRead,
    pub count: usize,
    /// Ignored for `GroupRead::Pending`.
    pub block: Option<Duration>,
    /// Deliver without adding entries to the pending list.
    pub no_ack: bool,
}

// ════════════════════════════════════════════════════════════════
//  Metadata
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub length: u64,
    /// Highest id ever assigned, including trimmed entries.
    pub last_generated_id: EntryId,
    pub first_entry_id: Option<EntryId>,
    pub last_entry_id: Option<EntryId>,
    pub groups: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub consumers: usize,
    pub pending: u64,
    pub last_delivered_id: EntryId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSummary {
    pub count: u64,
    pub lowest_id: Option<EntryId>,
    pub highest_id: Option<EntryId>,
    /// `(member, pending count)` for every member with pending entries.
    pub consumers: Vec<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: EntryId,
    pub consumer: String,
    /// Time since the entry was last delivered.
    pub idle: Duration,
    pub delivery_count: u64,
}

// ════════════════════════════════════════════════════════════════
//  LogStore
// ════════════════════════════════════════════════════════════════

/// Ordered, bounded, append-only log with consumer groups.
///
/// Semantics follow Redis Streams: appending creates the topic, group
/// members share one delivery cursor and each entry handed out through
/// `read_group(.., GroupRead::New, ..)` goes to exactly one member, where
/// it stays pending until acknowledged or claimed by another member.
pub trait LogStore: Send + Sync {
    /// Append one entry. `max_len > 0` trims the topic to roughly that many
    /// entries, oldest first.
    fn append<'a>(&'a self, topic: &'a str, fields: FieldMap, max_len: usize)
        -> BoxFuture<'a, Result<EntryId, StoreError>>;

    /// Entries with ids greater than `after`. An empty result means no data
    /// arrived within the block time.
    fn read<'a>(&'a self, topic: &'a str, after: EntryId, options: ReadOptions)
        -> BoxFuture<'a, Result<Vec<Entry>, StoreError>>;

    /// Fails with `StoreError::GroupExists` when the group is already there.
    fn create_group<'a>(&'a self, topic: &'a str, group: &'a str, start: GroupStart)
        -> BoxFuture<'a, Result<(), StoreError>>;

    fn read_group<'a>(
        &'a self,
        topic: &'a str,
        group: &'a str,
        member: &'a str,
        options: GroupReadOptions,
    ) -> BoxFuture<'a, Result<Vec<Entry>, StoreError>>;

    /// Number of entries removed from the group's pending list.
    fn ack<'a>(&'a self, topic: &'a str, group: &'a str, ids: &'a [EntryId])
        -> BoxFuture<'a, Result<u64, StoreError>>;

    /// Entries currently held. A missing topic has length 0.
    fn length<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<u64, StoreError>>;

    fn info<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<TopicInfo, StoreError>>;

    fn groups_info<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<Vec<GroupInfo>, StoreError>>;

    fn pending<'a>(&'a self, topic: &'a str, group: &'a str)
        -> BoxFuture<'a, Result<PendingSummary, StoreError>>;

    /// Up to `count` pending entries of the group, lowest ids first.
    fn pending_entries<'a>(&'a self, topic: &'a str, group: &'a str, count: usize)
        -> BoxFuture<'a, Result<Vec<PendingEntry>, StoreError>>;

    /// Transfer ownership of pending entries idle for at least `min_idle`
    /// to `member`. Returns the claimed entries still present in the log.
    fn claim<'a>(
        &'a self,
        topic: &'a str,
        group: &'a str,
        member: &'a str,
        min_idle: Duration,
        ids: &'a [EntryId],
    ) -> BoxFuture<'a, Result<Vec<Entry>, StoreError>>;
}
