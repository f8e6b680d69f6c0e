#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Stream(#[from] tagstream_engine::StreamError),

    #[error("store: {0}")]
    Store(#[from] tagstream_api::StoreError),

    #[error("timed out after {0:?} waiting for deliveries")]
    Timeout(std::time::Duration),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
