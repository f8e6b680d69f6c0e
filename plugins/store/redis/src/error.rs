use redis::RedisError;
use tagstream_api::StoreError;

/// Map server replies the engine reacts to onto typed errors; everything
/// else is a transient backend failure.
pub(crate) fn store_error(e: RedisError) -> StoreError {
    let text = e.to_string();
    match e.code() {
        Some("BUSYGROUP") => StoreError::GroupExists {
            topic: String::new(),
            group: String::new(),
        },
        Some("NOGROUP") => StoreError::GroupNotFound {
            topic: String::new(),
            group: String::new(),
        },
        _ if text.contains("no such key") || text.contains("requires the key to exist") => {
            StoreError::TopicNotFound(String::new())
        }
        _ if e.kind() == redis::ErrorKind::TypeError => StoreError::Decode(text),
        _ => StoreError::Backend(text),
    }
}

/// Fill in the names the server reply does not carry.
pub(crate) fn with_context(e: StoreError, topic: &str, group: Option<&str>) -> StoreError {
    let group = group.unwrap_or_default().to_string();
    match e {
        StoreError::GroupExists { .. } => StoreError::GroupExists {
            topic: topic.to_string(),
            group,
        },
        StoreError::GroupNotFound { .. } => StoreError::GroupNotFound {
            topic: topic.to_string(),
            group,
        },
        StoreError::TopicNotFound(_) => StoreError::TopicNotFound(topic.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_reply(raw: &[u8]) -> RedisError {
        redis::parse_redis_value(raw)
            .and_then(|value| value.extract_error())
            .expect_err("error reply")
    }

    #[test]
    fn server_codes_map_to_typed_errors() {
        let busy = server_reply(b"-BUSYGROUP Consumer Group name already exists\r\n");
        assert!(matches!(store_error(busy), StoreError::GroupExists { .. }));

        let nogroup = server_reply(b"-NOGROUP No such key 't' or consumer group 'g' in XREADGROUP with GROUP option\r\n");
        let mapped = with_context(store_error(nogroup), "t", Some("g"));
        assert_eq!(
            mapped,
            StoreError::GroupNotFound {
                topic: "t".into(),
                group: "g".into(),
            }
        );

        let missing = server_reply(b"-ERR no such key\r\n");
        let mapped = with_context(store_error(missing), "orders", None);
        assert_eq!(mapped, StoreError::TopicNotFound("orders".into()));
    }

    #[test]
    fn io_failures_are_transient() {
        let io = RedisError::from(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
        let mapped = store_error(io);
        assert!(mapped.is_transient());
    }
}
