use std::collections::HashMap;

use tagstream_api::{BoxFuture, HashStore, StoreError};

use crate::RedisStore;

impl HashStore for RedisStore {
    fn get_all<'a>(&'a self, key: &'a str)
        -> BoxFuture<'a, Result<HashMap<String, String>, StoreError>>
    {
        Box::pin(async move { self.query(redis::cmd("HGETALL").arg(key)).await })
    }

    fn set<'a>(&'a self, key: &'a str, field: &'a str, value: String)
        -> BoxFuture<'a, Result<(), StoreError>>
    {
        Box::pin(async move {
            let _: u64 = self.query(redis::cmd("HSET").arg(key).arg(field).arg(value)).await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let _: u64 = self.query(redis::cmd("HDEL").arg(key).arg(field)).await?;
            Ok(())
        })
    }

    fn delete_all<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let _: u64 = self.query(redis::cmd("DEL").arg(key)).await?;
            Ok(())
        })
    }
}
