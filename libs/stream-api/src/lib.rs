//! Collaborator contracts for the tag-routed stream engine.
//!
//! The engine never talks to a concrete backend. It needs an ordered log
//! with consumer groups (`LogStore`) and a keyed hash table (`HashStore`);
//! backends live in `plugins/store/*`. Like the rest of the API layer this
//! crate does not depend on an async runtime.

pub mod entry;
pub mod error;
pub mod hash;
pub mod id;
pub mod log;

use std::future::Future;
use std::pin::Pin;

pub use entry::{Entry, FieldMap};
pub use error::StoreError;
pub use hash::HashStore;
pub use id::EntryId;
pub use log::{
    GroupInfo, GroupRead, GroupReadOptions, GroupStart, LogStore, PendingEntry, PendingSummary,
    ReadOptions, TopicInfo,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
