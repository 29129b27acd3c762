use std::sync::Arc;

use {
    tokio::sync::Mutex,
    tracing::{debug, warn},
};

use botgate_protocol::BotEvent;

use crate::{
    connection::WsConn,
    filter::{self, EventFilter},
};

/// Connections registered to receive broadcast events, in registration
/// order. The sequence is only ever touched under its lock, including
/// during compaction, and raw indices never leave this module.
#[derive(Default)]
pub struct SubscriberSet {
    conns: Mutex<Vec<Arc<WsConn>>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for broadcasts.
    pub async fn register(&self, conn: Arc<WsConn>) {
        self.conns.lock().await.push(conn);
    }

    pub async fn len(&self) -> usize {
        self.conns.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conns.lock().await.is_empty()
    }

    /// Write `text` to every live subscriber. A failed write closes that
    /// subscriber and compacts it out in place (survivor order is kept, the
    /// backing storage is reused) while delivery to the rest continues.
    pub async fn fan_out(&self, text: &str) {
        let mut conns = self.conns.lock().await;
        let mut kept = 0;
        for i in 0..conns.len() {
            let conn = Arc::clone(&conns[i]);
            if let Err(e) = conn.write_text(text).await {
                warn!(error = %e, "ws: dropping subscriber after failed push");
                let _ = conn.close().await;
                continue;
            }
            if i != kept {
                conns[kept] = conn;
            }
            kept += 1;
        }
        conns.truncate(kept);
    }
}

/// Fans bot events out to a subscriber set, honoring an optional filter.
pub struct EventBroadcaster {
    subscribers: Arc<SubscriberSet>,
    filter: Option<Arc<dyn EventFilter>>,
}

impl EventBroadcaster {
    pub fn new(subscribers: Arc<SubscriberSet>, filter: Option<Arc<dyn EventFilter>>) -> Self {
        Self {
            subscribers,
            filter,
        }
    }

    /// Deliver one event to every registered subscriber. A filtered event
    /// produces zero write attempts.
    pub async fn publish(&self, event: &BotEvent) {
        if !filter::passes(&self.filter, event.value()) {
            debug!("event filtered before push");
            return;
        }
        debug!("pushing event to subscribers");
        self.subscribers.fan_out(event.json()).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use botgate_protocol::BotEvent;

    use super::{EventBroadcaster, SubscriberSet};
    use crate::{
        api::{ApiDispatcher, testing::static_bot},
        connection::{WsConn, testing::RecordingSink},
        filter::testing::DenyAll,
    };

    async fn registered(set: &Arc<SubscriberSet>) -> RecordingSink {
        let sink = RecordingSink::new();
        let conn = WsConn::new(sink.clone(), ApiDispatcher::new(static_bot()));
        set.register(conn).await;
        sink
    }

    #[tokio::test]
    async fn publish_delivers_exactly_once_to_each_subscriber() {
        let set = Arc::new(SubscriberSet::new());
        let sinks = [
            registered(&set).await,
            registered(&set).await,
            registered(&set).await,
        ];

        let broadcaster = EventBroadcaster::new(Arc::clone(&set), None);
        let event = BotEvent::new(serde_json::json!({"post_type":"message","text":"hi"}));
        broadcaster.publish(&event).await;

        for sink in &sinks {
            assert_eq!(sink.frames(), vec![event.json().to_owned()]);
        }
    }

    #[tokio::test]
    async fn failed_subscriber_is_closed_and_compacted_out_in_order() {
        let set = Arc::new(SubscriberSet::new());
        let first = registered(&set).await;
        let second = registered(&set).await;
        let third = registered(&set).await;
        second.set_failing(true);

        let broadcaster = EventBroadcaster::new(Arc::clone(&set), None);
        broadcaster.publish(&BotEvent::new(serde_json::json!({"n":1}))).await;

        assert_eq!(set.len().await, 2);
        assert!(second.is_closed());
        assert_eq!(first.frames().len(), 1);
        assert_eq!(third.frames().len(), 1);

        // Survivors keep receiving, in their original order.
        broadcaster.publish(&BotEvent::new(serde_json::json!({"n":2}))).await;
        assert_eq!(first.frames().len(), 2);
        assert_eq!(third.frames().len(), 2);
        assert_eq!(second.frames().len(), 0);
    }

    #[tokio::test]
    async fn filtered_event_reaches_no_one() {
        let set = Arc::new(SubscriberSet::new());
        let sink = registered(&set).await;

        let broadcaster = EventBroadcaster::new(Arc::clone(&set), Some(Arc::new(DenyAll)));
        broadcaster.publish(&BotEvent::new(serde_json::json!({"post_type":"message"}))).await;

        assert!(sink.frames().is_empty());
        assert_eq!(set.len().await, 1);
    }

    #[tokio::test]
    async fn one_subscriber_sees_events_in_publish_order() {
        let set = Arc::new(SubscriberSet::new());
        let sink = registered(&set).await;
        let broadcaster = EventBroadcaster::new(Arc::clone(&set), None);

        for n in 0..10 {
            broadcaster.publish(&BotEvent::new(serde_json::json!({"n": n}))).await;
        }

        let order: Vec<i64> = sink
            .frames()
            .iter()
            .map(|f| serde_json::from_str::<serde_json::Value>(f).unwrap()["n"]
                .as_i64()
                .unwrap())
            .collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }
}
