use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::{Cmd, FromRedisValue, Value};
use tagstream_api::{
    BoxFuture, Entry, EntryId, FieldMap, GroupInfo, GroupRead, GroupReadOptions, GroupStart,
    LogStore, PendingEntry, PendingSummary, ReadOptions, StoreError, TopicInfo,
};

use crate::error::with_context;
use crate::{RedisStore, store_error};

// ═══════════════════════════════════════════════════════════════
//  Reply shapes (RESP2)
// ═══════════════════════════════════════════════════════════════

/// `[id, [field, value, ...] | nil]`. Fields are nil for entries trimmed
/// while still pending.
type RawEntry = (String, Option<Vec<(String, Vec<u8>)>>);

/// `XREAD`/`XREADGROUP`: nil on timeout, else `[[stream, [entry, ...]], ...]`.
type RawRead = Option<Vec<(String, Vec<RawEntry>)>>;

/// `XPENDING key group`: count, lowest, highest, `[[consumer, count], ...]`.
type RawPendingSummary = (u64, Option<String>, Option<String>, Option<Vec<(String, u64)>>);

/// `XPENDING key group - + count`: id, consumer, idle ms, deliveries.
type RawPendingEntry = (String, String, u64, u64);

fn parse_id(raw: &str) -> Result<EntryId, StoreError> {
    raw.parse()
}

fn to_entry((id, fields): RawEntry) -> Result<Entry, StoreError> {
    let fields: FieldMap = fields
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, Bytes::from(v)))
        .collect();
    Ok(Entry::new(parse_id(&id)?, fields))
}

fn to_entries(read: RawRead) -> Result<Vec<Entry>, StoreError> {
    read.unwrap_or_default()
        .into_iter()
        .flat_map(|(_, entries)| entries)
        .map(to_entry)
        .collect()
}

fn field<T: FromRedisValue>(map: &HashMap<String, Value>, name: &str) -> Result<T, StoreError> {
    let value = map
        .get(name)
        .ok_or_else(|| StoreError::Decode(format!("reply has no '{name}' field")))?;
    T::from_redis_value(value).map_err(store_error)
}

fn entry_id_field(map: &HashMap<String, Value>, name: &str) -> Result<Option<EntryId>, StoreError> {
    let entry: Option<(String, Value)> = field(map, name)?;
    entry.map(|(id, _)| parse_id(&id)).transpose()
}

fn block_ms(block: Option<Duration>) -> Option<u64> {
    // BLOCK 0 means forever; a zero wait is a plain non-blocking read.
    block.map(|d| d.as_millis() as u64).filter(|ms| *ms > 0)
}

// ═══════════════════════════════════════════════════════════════
//  Command execution
// ═══════════════════════════════════════════════════════════════

impl RedisStore {
    pub(crate) async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T, StoreError> {
        let mut conn = self.shared();
        cmd.query_async(&mut conn).await.map_err(store_error)
    }

    /// Run `cmd` on a pooled connection if it blocks, on the shared one
    /// otherwise.
    async fn query_read<T: FromRedisValue>(&self, cmd: &Cmd, blocking: bool) -> Result<T, StoreError> {
        if !blocking {
            return self.query(cmd).await;
        }
        let mut conn: MultiplexedConnection = self.checkout().await?;
        let reply = cmd.query_async(&mut conn).await;
        match reply {
            Ok(value) => {
                self.checkin(conn);
                Ok(value)
            }
            Err(e) => Err(store_error(e)),
        }
    }
}

impl LogStore for RedisStore {
    fn append<'a>(&'a self, topic: &'a str, fields: FieldMap, max_len: usize)
        -> BoxFuture<'a, Result<EntryId, StoreError>>
    {
        Box::pin(async move {
            if fields.is_empty() {
                return Err(StoreError::InvalidArgument(
                    "append requires at least one field".into(),
                ));
            }
            let mut cmd = redis::cmd("XADD");
            cmd.arg(topic);
            if max_len > 0 {
                cmd.arg("MAXLEN").arg("~").arg(max_len);
            }
            cmd.arg("*");
            for (key, value) in &fields {
                cmd.arg(key.as_str()).arg(&value[..]);
            }
            let id: String = self.query(&cmd).await?;
            parse_id(&id)
        })
    }

    fn read<'a>(&'a self, topic: &'a str, after: EntryId, options: ReadOptions)
        -> BoxFuture<'a, Result<Vec<Entry>, StoreError>>
    {
        Box::pin(async move {
            let mut cmd = redis::cmd("XREAD");
            cmd.arg("COUNT").arg(options.count);
            let block = block_ms(options.block);
            if let Some(ms) = block {
                cmd.arg("BLOCK").arg(ms);
            }
            cmd.arg("STREAMS").arg(topic).arg(after.to_string());
            let read: RawRead = self.query_read(&cmd, block.is_some()).await?;
            to_entries(read)
        })
    }

    fn create_group<'a>(&'a self, topic: &'a str, group: &'a str, start: GroupStart)
        -> BoxFuture<'a, Result<(), StoreError>>
    {
        Box::pin(async move {
            let start = match start {
                GroupStart::Beginning => "0",
                GroupStart::Latest => "$",
            };
            let mut cmd = redis::cmd("XGROUP");
            cmd.arg("CREATE").arg(topic).arg(group).arg(start);
            let _: () = self
                .query(&cmd)
                .await
                .map_err(|e| with_context(e, topic, Some(group)))?;
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
            let mut cmd = redis::cmd("XREADGROUP");
            cmd.arg("GROUP").arg(group).arg(member).arg("COUNT").arg(options.count);
            let (block, position) = match options.position {
                GroupRead::New => (block_ms(options.block), ">".to_string()),
                GroupRead::Pending { after } => (None, after.to_string()),
            };
            if let Some(ms) = block {
                cmd.arg("BLOCK").arg(ms);
            }
            if options.no_ack {
                cmd.arg("NOACK");
            }
            cmd.arg("STREAMS").arg(topic).arg(position);
            let read: RawRead = self
                .query_read(&cmd, block.is_some())
                .await
                .map_err(|e| with_context(e, topic, Some(group)))?;
            to_entries(read)
        })
    }

    fn ack<'a>(&'a self, topic: &'a str, group: &'a str, ids: &'a [EntryId])
        -> BoxFuture<'a, Result<u64, StoreError>>
    {
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(0);
            }
            let mut cmd = redis::cmd("XACK");
            cmd.arg(topic).arg(group);
            for id in ids {
                cmd.arg(id.to_string());
            }
            self.query(&cmd).await
        })
    }

    fn length<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move { self.query(redis::cmd("XLEN").arg(topic)).await })
    }

    fn info<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<TopicInfo, StoreError>> {
        Box::pin(async move {
            let reply: HashMap<String, Value> = self
                .query(redis::cmd("XINFO").arg("STREAM").arg(topic))
                .await
                .map_err(|e| with_context(e, topic, None))?;
            let last_generated: String = field(&reply, "last-generated-id")?;
            Ok(TopicInfo {
                length: field(&reply, "length")?,
                last_generated_id: parse_id(&last_generated)?,
                first_entry_id: entry_id_field(&reply, "first-entry")?,
                last_entry_id: entry_id_field(&reply, "last-entry")?,
                groups: field(&reply, "groups")?,
            })
        })
    }

    fn groups_info<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<Vec<GroupInfo>, StoreError>> {
        Box::pin(async move {
            let reply: Vec<HashMap<String, Value>> = self
                .query(redis::cmd("XINFO").arg("GROUPS").arg(topic))
                .await
                .map_err(|e| with_context(e, topic, None))?;
            reply
                .iter()
                .map(|group| {
                    let last_delivered: String = field(group, "last-delivered-id")?;
                    Ok(GroupInfo {
                        name: field(group, "name")?,
                        consumers: field(group, "consumers")?,
                        pending: field(group, "pending")?,
                        last_delivered_id: parse_id(&last_delivered)?,
                    })
                })
                .collect()
        })
    }

    fn pending<'a>(&'a self, topic: &'a str, group: &'a str)
        -> BoxFuture<'a, Result<PendingSummary, StoreError>>
    {
        Box::pin(async move {
            let (count, lowest, highest, consumers): RawPendingSummary = self
                .query(redis::cmd("XPENDING").arg(topic).arg(group))
                .await
                .map_err(|e| with_context(e, topic, Some(group)))?;
            Ok(PendingSummary {
                count,
                lowest_id: lowest.as_deref().map(parse_id).transpose()?,
                highest_id: highest.as_deref().map(parse_id).transpose()?,
                consumers: consumers.unwrap_or_default(),
            })
        })
    }

    fn pending_entries<'a>(&'a self, topic: &'a str, group: &'a str, count: usize)
        -> BoxFuture<'a, Result<Vec<PendingEntry>, StoreError>>
    {
        Box::pin(async move {
            let reply: Vec<RawPendingEntry> = self
                .query(redis::cmd("XPENDING").arg(topic).arg(group).arg("-").arg("+").arg(count))
                .await
                .map_err(|e| with_context(e, topic, Some(group)))?;
            reply
                .into_iter()
                .map(|(id, consumer, idle_ms, delivery_count)| {
                    Ok(PendingEntry {
                        id: parse_id(&id)?,
                        consumer,
                        idle: Duration::from_millis(idle_ms),
                        delivery_count,
                    })
                })
                .collect()
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
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let mut cmd = redis::cmd("XCLAIM");
            cmd.arg(topic).arg(group).arg(member).arg(min_idle.as_millis() as u64);
            for id in ids {
                cmd.arg(id.to_string());
            }
            let reply: Vec<Option<RawEntry>> = self
                .query(&cmd)
                .await
                .map_err(|e| with_context(e, topic, Some(group)))?;
            // Older servers answer nil for claimed ids that were trimmed.
            reply
                .into_iter()
                .flatten()
                .filter(|(_, fields)| fields.is_some())
                .map(to_entry)
                .collect()
        })
    }
}
