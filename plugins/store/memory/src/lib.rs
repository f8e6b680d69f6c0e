//! In-process store backend: a ring-buffer log with consumer groups and a
//! keyed hash table. Nothing survives the process; used for tests, demos
//! and single-process deployments.

mod hash;
mod log;

use std::sync::{Mutex, MutexGuard};

pub use hash::MemoryHash;
pub use log::MemoryLog;

fn lock_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!(store = what, "memory store lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
