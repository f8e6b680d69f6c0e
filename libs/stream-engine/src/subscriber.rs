use std::sync::Arc;
use std::time::Duration;

use tagstream_api::{BoxFuture, Entry};
use tokio_util::sync::CancellationToken;

use crate::BROADCAST_TAG;
use crate::codec::{Message, decode};
use crate::error::StreamError;

/// Called synchronously, in publish order, for every delivered message.
pub type Handler = Arc<dyn Fn(&Message, &dyn Subscription) + Send + Sync>;

/// Identity of a subscribing entity, handed to its handler.
pub trait Subscription: Send + Sync {
    fn topic(&self) -> &str;
    /// Tag this entity receives in addition to broadcasts.
    fn tag_id(&self) -> &str;
    /// Key of this entity's row in the topic's stats table.
    fn full_name(&self) -> &str;
}

pub trait Subscriber: Subscription {
    /// Must be called before `subscribe`.
    fn set_handler(&self, handler: Handler);

    /// Start the read loop and the reporter. Returns once the entity is
    /// reading and its first stats row is written.
    fn subscribe(&self) -> BoxFuture<'_, Result<(), StreamError>>;

    /// Signal the read loop and reporter to exit. Does not wait for them.
    fn stop(&self);
}

/// Tag routing rule: broadcast on either side, or an exact match.
pub fn accepts(message: &Message, tag_id: &str) -> bool {
    if message.is_sentinel() {
        return false;
    }
    message.tag_id == BROADCAST_TAG || tag_id == BROADCAST_TAG || message.tag_id == tag_id
}

/// Decode `entries` and hand every accepted message to `handler`. Returns the
/// number of messages read, delivered or not.
pub(crate) fn deliver(entries: &[Entry], handler: &Handler, sub: &dyn Subscription) -> u64 {
    let mut read = 0;
    for entry in entries {
        for message in decode(&entry.fields) {
            read += 1;
            if accepts(&message, sub.tag_id()) {
                handler(&message, sub);
            }
        }
    }
    read
}

/// Sleep for `backoff` unless cancelled first. `false` when cancelled.
pub(crate) async fn backoff(token: &CancellationToken, backoff: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(backoff) => true,
        _ = token.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tagstream_api::EntryId;

    use super::*;
    use crate::SENTINEL_ID;
    use crate::codec::encode;

    struct Named(&'static str);

    impl Subscription for Named {
        fn topic(&self) -> &str {
            "t"
        }
        fn tag_id(&self) -> &str {
            self.0
        }
        fn full_name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn routing_rule() {
        let to = |tag: &str| Message::new("m", tag, "");
        assert!(accepts(&to("$"), "c1"));
        assert!(accepts(&to("c1"), "c1"));
        assert!(accepts(&to("c2"), "$"));
        assert!(!accepts(&to("c2"), "c1"));
        assert!(!accepts(&Message::new(SENTINEL_ID, "$", ""), "$"));
    }

    #[test]
    fn deliver_filters_and_keeps_order() {
        let batch = vec![
            Message::new("a", "c1", "1"),
            Message::new("b", "c2", "2"),
            Message::new("c", "$", "3"),
            Message::new("d", "c1", "4"),
        ];
        let entries = vec![
            Entry::new(EntryId::new(1, 0), encode(&[Message::new(SENTINEL_ID, "$", "now")])),
            Entry::new(EntryId::new(2, 0), encode(&batch)),
        ];
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = {
            let seen = seen.clone();
            Arc::new(move |msg: &Message, sub: &dyn Subscription| {
                assert_eq!(sub.tag_id(), "c1");
                seen.lock().unwrap().push(msg.id.clone());
            })
        };

        assert_eq!(deliver(&entries, &handler, &Named("c1")), 5);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "c", "d"]);
    }
}
