use std::collections::HashMap;

use crate::BoxFuture;
use crate::error::StoreError;

/// Keyed hash table (`key → field → value`) with string values.
///
/// Typed JSON encoding is layered on top by the caller.
pub trait HashStore: Send + Sync {
    /// All fields of `key`. A missing key yields an empty map.
    fn get_all<'a>(&'a self, key: &'a str)
        -> BoxFuture<'a, Result<HashMap<String, String>, StoreError>>;

    fn set<'a>(&'a self, key: &'a str, field: &'a str, value: String)
        -> BoxFuture<'a, Result<(), StoreError>>;

    fn delete<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    fn delete_all<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}
