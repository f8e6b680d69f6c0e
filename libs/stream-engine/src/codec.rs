//! Mapping between application messages and log entries.
//!
//! One log entry carries a whole batch. Each message becomes one field
//! keyed `<id>-<ordinal>-<tag>`; the store does not keep field order, so
//! decoding places every message back at its ordinal.

use bytes::Bytes;
use tagstream_api::{FieldMap, LogStore};

use crate::error::StreamError;
use crate::{BROADCAST_TAG, SENTINEL_ID};

/// One application message. `id` is chosen by the publisher and is not
/// the log's entry id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub tag_id: String,
    pub payload: Bytes,
}

impl Message {
    pub fn new(id: impl Into<String>, tag_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            tag_id: tag_id.into(),
            payload: payload.into(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.id == SENTINEL_ID
    }
}

pub fn field_key(id: &str, ordinal: usize, tag_id: &str) -> String {
    format!("{id}-{ordinal}-{tag_id}")
}

/// Name of the hash holding a topic's consumer stats.
pub fn stat_key(topic: &str) -> String {
    format!("{topic}_stat")
}

/// Ids are the first `-`-separated segment of a field key.
pub fn validate_id(id: &str) -> Result<(), StreamError> {
    if id.is_empty() || id.contains('-') || id == SENTINEL_ID {
        return Err(StreamError::InvalidMessageId(id.to_string()));
    }
    Ok(())
}

pub fn encode(batch: &[Message]) -> FieldMap {
    batch
        .iter()
        .enumerate()
        .map(|(ordinal, msg)| (field_key(&msg.id, ordinal, &msg.tag_id), msg.payload.clone()))
        .collect()
}

/// Messages of one entry in publish order. Malformed keys are logged and
/// skipped; a decode never fails as a whole.
pub fn decode(fields: &FieldMap) -> Vec<Message> {
    let mut slots: Vec<Option<Message>> = vec![None; fields.len()];
    for (key, payload) in fields {
        let mut parts = key.splitn(3, '-');
        let (Some(id), Some(ordinal), Some(tag_id)) = (parts.next(), parts.next(), parts.next()) else {
            tracing::warn!(key = %key, "malformed field key, skipping");
            continue;
        };
        let ordinal = match ordinal.parse::<usize>() {
            Ok(n) if n < slots.len() => n,
            _ => {
                tracing::warn!(key = %key, "field ordinal out of range, skipping");
                continue;
            }
        };
        slots[ordinal] = Some(Message::new(id, tag_id, payload.clone()));
    }
    slots.into_iter().flatten().collect()
}

/// Make sure `topic` exists by appending the bootstrap sentinel. Safe to
/// call concurrently and repeatedly; failures are only logged.
pub async fn ensure_topic(log: &dyn LogStore, topic: &str, max_len: usize) {
    let created_at = chrono::Utc::now().to_rfc3339();
    let sentinel = Message::new(SENTINEL_ID, BROADCAST_TAG, created_at);
    match log.append(topic, encode(std::slice::from_ref(&sentinel)), max_len).await {
        Ok(id) => tracing::debug!(topic = %topic, entry = %id, "topic bootstrapped"),
        Err(e) => tracing::error!(topic = %topic, error = %e, "topic bootstrap failed"),
    }
}
