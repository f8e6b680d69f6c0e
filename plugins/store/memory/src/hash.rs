use std::collections::HashMap;
use std::sync::Mutex;

use tagstream_api::{BoxFuture, HashStore, StoreError};

use crate::lock_recover;

/// `key → field → value` table behind one mutex.
#[derive(Debug, Default)]
pub struct MemoryHash {
    tables: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemoryHash {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashStore for MemoryHash {
    fn get_all<'a>(&'a self, key: &'a str)
        -> BoxFuture<'a, Result<HashMap<String, String>, StoreError>>
    {
        Box::pin(async move {
            let tables = lock_recover(&self.tables, "hash");
            Ok(tables.get(key).cloned().unwrap_or_default())
        })
    }

    fn set<'a>(&'a self, key: &'a str, field: &'a str, value: String)
        -> BoxFuture<'a, Result<(), StoreError>>
    {
        Box::pin(async move {
            let mut tables = lock_recover(&self.tables, "hash");
            tables
                .entry(key.to_string())
                .or_default()
                .insert(field.to_string(), value);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut tables = lock_recover(&self.tables, "hash");
            let emptied = match tables.get_mut(key) {
                Some(table) => {
                    table.remove(field);
                    table.is_empty()
                }
                None => false,
            };
            if emptied {
                tables.remove(key);
            }
            Ok(())
        })
    }

    fn delete_all<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            lock_recover(&self.tables, "hash").remove(key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let hash = MemoryHash::new();
        hash.set("t_stat", "consumer@a", "1".into()).await.expect("set");
        hash.set("t_stat", "consumer@b", "2".into()).await.expect("set");
        hash.set("t_stat", "consumer@a", "3".into()).await.expect("overwrite");

        let all = hash.get_all("t_stat").await.expect("get_all");
        assert_eq!(all.len(), 2);
        assert_eq!(all["consumer@a"], "3");

        hash.delete("t_stat", "consumer@a").await.expect("delete");
        assert_eq!(hash.get_all("t_stat").await.expect("get_all").len(), 1);

        hash.delete_all("t_stat").await.expect("delete_all");
        assert!(hash.get_all("t_stat").await.expect("get_all").is_empty());
    }

    #[tokio::test]
    async fn missing_key_is_empty() {
        let hash = MemoryHash::new();
        assert!(hash.get_all("nope").await.expect("get_all").is_empty());
        hash.delete("nope", "field").await.expect("delete on missing key");
    }
}
