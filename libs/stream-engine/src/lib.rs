//! Tag-routed publish/subscribe over an ordered log store.
//!
//! A [`Producer`] batches messages into log entries and drops messages for
//! tags whose consumers are stale or lagging. A [`Consumer`] reads the log
//! directly and filters by tag; a [`Group`] member shares a durable cursor
//! with the other members of its group and acknowledges what it handled.
//! Every subscribing entity runs a [`Reporter`] whose stats drive the
//! producer's admission decisions.

pub mod codec;
pub mod config;
pub mod consumer;
pub mod error;
pub mod group;
pub mod producer;
pub mod reporter;
pub mod stats;
pub mod subscriber;

use std::sync::Arc;

use tagstream_api::{HashStore, LogStore};

pub use codec::Message;
pub use config::StreamConfig;
pub use consumer::Consumer;
pub use error::StreamError;
pub use group::Group;
pub use producer::Producer;
pub use reporter::Reporter;
pub use stats::{ConsumerStat, StatTable};
pub use subscriber::{Handler, Subscriber, Subscription};

/// Tag addressing every consumer and every group.
pub const BROADCAST_TAG: &str = "$";

/// Id of the message appended once per topic on bootstrap. Never delivered.
pub const SENTINEL_ID: &str = "createTopic";

/// Store handles shared by every producer, consumer and group of a process.
#[derive(Clone)]
pub struct Backend {
    pub log: Arc<dyn LogStore>,
    pub hash: Arc<dyn HashStore>,
}

impl Backend {
    pub fn new(log: Arc<dyn LogStore>, hash: Arc<dyn HashStore>) -> Self {
        Self { log, hash }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}
