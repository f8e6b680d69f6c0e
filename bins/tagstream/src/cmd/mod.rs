pub mod admin;
pub mod bench;
pub mod consume;
pub mod demo;

use std::sync::Arc;
use std::time::Duration;

use tagstream_engine::Backend;
use tagstream_store_memory::{MemoryHash, MemoryLog};
use tagstream_store_redis::RedisStore;

use crate::config::{AppConfig, StoreConfig, StoreKind};
use crate::error::CliError;

/// Build the store handles every producer, consumer and group shares.
pub async fn connect(store: &StoreConfig) -> Result<Backend, CliError> {
    match store.kind {
        StoreKind::Memory => {
            tracing::info!("using in-memory store");
            Ok(Backend::new(Arc::new(MemoryLog::new()), Arc::new(MemoryHash::new())))
        }
        StoreKind::Redis => {
            let redis = Arc::new(RedisStore::connect(&store.url).await?);
            Ok(Backend::new(redis.clone(), redis))
        }
    }
}

pub async fn load(config: Option<&str>) -> Result<(AppConfig, Backend), CliError> {
    let config = AppConfig::load(config)?;
    let backend = connect(&config.store).await?;
    Ok((config, backend))
}

/// Poll `done` every 50 ms for at most `limit`.
pub async fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> Result<(), CliError> {
    tokio::time::timeout(limit, async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .map_err(|_| CliError::Timeout(limit))
}
