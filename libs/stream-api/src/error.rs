/// Errors reported by store backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("topic '{0}' not found")]
    TopicNotFound(String),

    #[error("group '{group}' already exists on topic '{topic}'")]
    GroupExists { topic: String, group: String },

    #[error("group '{group}' not found on topic '{topic}'")]
    GroupNotFound { topic: String, group: String },

    #[error("invalid entry id '{0}'")]
    InvalidEntryId(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("decode: {0}")]
    Decode(String),

    /// Connection or server failure.
    #[error("backend: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}
