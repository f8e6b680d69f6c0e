#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tagstream_engine::{Backend, Handler, Message, Subscription};
use tagstream_store_memory::{MemoryHash, MemoryLog};

pub fn memory_backend() -> Backend {
    Backend::new(Arc::new(MemoryLog::new()), Arc::new(MemoryHash::new()))
}

pub fn counting_handler() -> (Handler, Arc<AtomicU64>) {
    let count = Arc::new(AtomicU64::new(0));
    let handler: Handler = {
        let count = count.clone();
        Arc::new(move |_: &Message, _: &dyn Subscription| {
            count.fetch_add(1, Ordering::Relaxed);
        })
    };
    (handler, count)
}

/// Poll `done` until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut done: impl FnMut() -> bool) {
    tokio::time::timeout(limit, async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
