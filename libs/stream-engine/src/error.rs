use tagstream_api::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid message id '{0}': must be non-empty, contain no '-' and not be reserved")]
    InvalidMessageId(String),

    #[error("no handler set for '{0}'")]
    NoHandler(String),

    #[error("'{0}' is already subscribed")]
    AlreadySubscribed(String),

    #[error("producer for '{0}' is already started")]
    AlreadyStarted(String),

    #[error("'{0}' is stopped")]
    Stopped(String),

    #[error("config: {0}")]
    Config(String),
}
