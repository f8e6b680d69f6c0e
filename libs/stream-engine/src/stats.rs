use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tagstream_api::HashStore;

use crate::codec::stat_key;
use crate::error::StreamError;

/// Progress record one subscribing entity writes once per report interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStat {
    pub qps: i64,
    pub tag_id: String,
    /// Topic frontier at report time.
    pub last_entry_id: String,
    pub last_read_id: String,
    /// Frontier minus read position in milliseconds; `-1` when unknown.
    pub latency_entries: i64,
    pub updated_at: DateTime<Utc>,
}

impl ConsumerStat {
    pub fn is_stale(&self, now: DateTime<Utc>, alive: Duration) -> bool {
        match chrono::Duration::from_std(alive) {
            Ok(alive) => now - self.updated_at > alive,
            Err(_) => false,
        }
    }

    /// Unknown latency does not count as lagging.
    pub fn is_lagging(&self, tolerance: i64) -> bool {
        self.latency_entries > tolerance
    }
}

/// JSON-encoded `ConsumerStat` rows of one topic, keyed by full name.
#[derive(Clone)]
pub struct StatTable {
    hash: Arc<dyn HashStore>,
    key: String,
}

impl std::fmt::Debug for StatTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatTable").field("key", &self.key).finish()
    }
}

impl StatTable {
    pub fn new(hash: Arc<dyn HashStore>, topic: &str) -> Self {
        Self {
            hash,
            key: stat_key(topic),
        }
    }

    /// All decodable rows, sorted by name. Corrupt rows are logged and left
    /// in place.
    pub async fn all(&self) -> Result<Vec<(String, ConsumerStat)>, StreamError> {
        let raw = self.hash.get_all(&self.key).await?;
        let mut rows: Vec<(String, ConsumerStat)> = raw
            .into_iter()
            .filter_map(|(name, value)| match serde_json::from_str(&value) {
                Ok(stat) => Some((name, stat)),
                Err(e) => {
                    tracing::warn!(key = %self.key, name = %name, error = %e, "undecodable stat row, skipping");
                    None
                }
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }

    pub async fn put(&self, name: &str, stat: &ConsumerStat) -> Result<(), StreamError> {
        let value = serde_json::to_string(stat)?;
        self.hash.set(&self.key, name, value).await?;
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<(), StreamError> {
        self.hash.delete(&self.key, name).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), StreamError> {
        self.hash.delete_all(&self.key).await?;
        Ok(())
    }
}
