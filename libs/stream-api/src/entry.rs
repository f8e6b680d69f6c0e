use std::collections::HashMap;

use bytes::Bytes;

use crate::id::EntryId;

/// Flat field map of one log entry. Iteration order is unspecified.
pub type FieldMap = HashMap<String, Bytes>;

/// One physical entry of a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: EntryId,
    /// Empty when the entry was trimmed from the log but is still pending
    /// for a group.
    pub fields: FieldMap,
}

impl Entry {
    pub fn new(id: EntryId, fields: FieldMap) -> Self {
        Self { id, fields }
    }
}
