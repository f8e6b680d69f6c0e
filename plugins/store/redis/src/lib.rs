//! Redis backend: topics are Redis Streams, the hash store is plain Redis
//! hashes. One multiplexed connection serves non-blocking commands; blocking
//! reads borrow a dedicated connection from a small idle pool so they never
//! stall other traffic.

mod error;
mod hash;
mod log;

use std::sync::{Mutex, MutexGuard};

use redis::aio::MultiplexedConnection;
use redis::Client;
use tagstream_api::StoreError;

pub(crate) use error::store_error;

pub struct RedisStore {
    client: Client,
    conn: MultiplexedConnection,
    idle: Mutex<Vec<MultiplexedConnection>>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.client.get_connection_info().addr)
            .finish()
    }
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(store_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_error)?;
        tracing::info!(addr = %client.get_connection_info().addr, "connected to redis");
        Ok(Self {
            client,
            conn,
            idle: Mutex::new(Vec::new()),
        })
    }

    /// Handle for non-blocking commands.
    fn shared(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    fn idle(&self) -> MutexGuard<'_, Vec<MultiplexedConnection>> {
        match self.idle.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("redis connection pool lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    async fn checkout(&self) -> Result<MultiplexedConnection, StoreError> {
        if let Some(conn) = self.idle().pop() {
            return Ok(conn);
        }
        tracing::debug!("opening connection for blocking reads");
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_error)
    }

    /// Return a healthy connection to the pool. Connections that saw an
    /// error are dropped instead.
    fn checkin(&self, conn: MultiplexedConnection) {
        self.idle().push(conn);
    }
}
