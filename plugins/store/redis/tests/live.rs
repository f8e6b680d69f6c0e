//! Runs against a real server when `TAGSTREAM_TEST_REDIS_URL` is set,
//! otherwise every test returns early.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tagstream_api::{
    EntryId, FieldMap, GroupRead, GroupReadOptions, GroupStart, HashStore, LogStore, ReadOptions,
    StoreError,
};
use tagstream_store_redis::RedisStore;

async fn connect() -> Option<RedisStore> {
    let url = match std::env::var("TAGSTREAM_TEST_REDIS_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping redis tests: TAGSTREAM_TEST_REDIS_URL not set");
            return None;
        }
    };
    match RedisStore::connect(&url).await {
        Ok(store) => Some(store),
        Err(err) => {
            eprintln!("skipping redis tests: cannot connect: {err}");
            None
        }
    }
}

fn unique(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    format!("{prefix}-{nanos}")
}

fn fields(key: &str, value: &str) -> FieldMap {
    FieldMap::from([(key.to_string(), Bytes::copy_from_slice(value.as_bytes()))])
}

#[tokio::test]
async fn append_read_and_info() {
    let Some(store) = connect().await else { return };
    let topic = unique("tagstream-log");

    let first = store.append(&topic, fields("a-0-$", "1"), 100).await.expect("append");
    let second = store.append(&topic, fields("b-0-c1", "2"), 100).await.expect("append");
    assert!(first < second);

    let entries = store
        .read(&topic, EntryId::ZERO, ReadOptions { count: 10, block: None })
        .await
        .expect("read");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].fields["b-0-c1"], Bytes::from_static(b"2"));

    let timed_out = store
        .read(&topic, second, ReadOptions { count: 10, block: Some(Duration::from_millis(50)) })
        .await
        .expect("blocking read");
    assert!(timed_out.is_empty());

    let info = store.info(&topic).await.expect("info");
    assert_eq!(info.length, 2);
    assert_eq!(info.last_entry_id, Some(second));
    assert_eq!(store.length(&topic).await.expect("len"), 2);
}

#[tokio::test]
async fn groups_pending_and_claim() {
    let Some(store) = connect().await else { return };
    let topic = unique("tagstream-group");
    store.append(&topic, fields("a-0-$", "1"), 0).await.expect("append");

    store.create_group(&topic, "g", GroupStart::Beginning).await.expect("create");
    let dup = store.create_group(&topic, "g", GroupStart::Beginning).await;
    assert!(matches!(dup, Err(StoreError::GroupExists { .. })));

    let options = GroupReadOptions {
        position: GroupRead::New,
        count: 10,
        block: None,
        no_ack: false,
    };
    let delivered = store.read_group(&topic, "g", "a", options).await.expect("read");
    assert_eq!(delivered.len(), 1);
    assert_eq!(store.pending(&topic, "g").await.expect("pending").count, 1);

    let ids = [delivered[0].id];
    let claimed = store.claim(&topic, "g", "sweeper", Duration::ZERO, &ids).await.expect("claim");
    assert_eq!(claimed.len(), 1);
    let pending = store.pending_entries(&topic, "g", 10).await.expect("entries");
    assert_eq!(pending[0].consumer, "sweeper");

    assert_eq!(store.ack(&topic, "g", &ids).await.expect("ack"), 1);
    let groups = store.groups_info(&topic).await.expect("groups");
    assert_eq!(groups[0].name, "g");
    assert_eq!(groups[0].pending, 0);

    let missing = store
        .read_group(&topic, "nope", "a", GroupReadOptions { position: GroupRead::Pending { after: EntryId::ZERO }, ..options })
        .await;
    assert!(matches!(missing, Err(StoreError::GroupNotFound { .. })));
}

#[tokio::test]
async fn hash_roundtrip() {
    let Some(store) = connect().await else { return };
    let key = unique("tagstream-hash");
    store.set(&key, "consumer@c1", "{}".into()).await.expect("set");
    assert_eq!(store.get_all(&key).await.expect("get_all").len(), 1);
    store.delete(&key, "consumer@c1").await.expect("delete");
    store.delete_all(&key).await.expect("delete_all");
    assert!(store.get_all(&key).await.expect("get_all").is_empty());
}
