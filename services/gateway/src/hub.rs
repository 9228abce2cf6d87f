//! In-process topic-keyed pub/sub with best-effort fan-out.
//!
//! Each subscriber owns a bounded FIFO; publishing offers the message to
//! every subscriber without blocking and silently drops it for any whose
//! buffer is full.  One slow SSE or WebSocket consumer therefore never
//! back-pressures a publisher or its fellow subscribers.  There is no
//! delivery guarantee; order holds per (channel, subscriber) while the
//! subscriber keeps up.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-subscriber FIFO capacity before messages drop.
pub const SUBSCRIBER_BUFFER: usize = 16;

/// One delivered event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubMessage {
    pub channel: String,
    pub kind: String,
    pub data: serde_json::Value,
}

/// A registered subscriber: the receiving end of its FIFO plus the identity
/// the hub needs to remove it again.
pub struct Subscription {
    channel: String,
    id: u64,
    receiver: mpsc::Receiver<HubMessage>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<HubMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<HubMessage, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

type ChannelMap = HashMap<String, HashMap<u64, mpsc::Sender<HubMessage>>>;

pub struct EventHub {
    channels: RwLock<ChannelMap>,
    next_id: AtomicU64,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        EventHub {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a fresh subscriber under `channel`.
    pub fn subscribe(&self, channel: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.channels
            .write()
            .expect("subscriber registry lock poisoned")
            .entry(channel.to_owned())
            .or_default()
            .insert(id, tx);
        Subscription {
            channel: channel.to_owned(),
            id,
            receiver: rx,
        }
    }

    /// Remove a subscriber.  Dropping its sender closes the FIFO; removing a
    /// subscription that is already gone is a harmless no-op.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.unsubscribe_id(&subscription.channel, subscription.id);
    }

    pub(crate) fn unsubscribe_id(&self, channel: &str, id: u64) {
        let mut channels = self
            .channels
            .write()
            .expect("subscriber registry lock poisoned");
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }

    /// Encode `payload` once and offer it to every subscriber of `channel`.
    ///
    /// Never blocks: a full FIFO drops the message for that subscriber only.
    /// No subscribers means nothing happens; an unencodable payload is
    /// logged and dropped.
    pub fn publish<T: Serialize>(&self, channel: &str, kind: &str, payload: &T) {
        let data = match serde_json::to_value(payload) {
            Ok(data) => data,
            Err(error) => {
                warn!(channel, kind, %error, "event payload failed to encode, dropping");
                return;
            }
        };
        let channels = self
            .channels
            .read()
            .expect("subscriber registry lock poisoned");
        let Some(subscribers) = channels.get(channel) else {
            return;
        };
        let message = HubMessage {
            channel: channel.to_owned(),
            kind: kind.to_owned(),
            data,
        };
        for sender in subscribers.values() {
            match sender.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(channel, "subscriber buffer full, dropping event");
                }
                // Receiver already dropped without unsubscribing; the entry
                // is removed when unsubscribe eventually runs.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Current subscriber count for a channel (status surface + tests).
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .expect("subscriber registry lock poisoned")
            .get(channel)
            .map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_reaches_every_subscriber_of_the_channel() {
        let hub = EventHub::new();
        let mut first = hub.subscribe("jobs");
        let mut second = hub.subscribe("jobs");
        let mut other = hub.subscribe("metrics");

        hub.publish("jobs", "started", &serde_json::json!({"job": 7}));

        for subscription in [&mut first, &mut second] {
            let message = subscription.try_recv().unwrap();
            assert_eq!(message.channel, "jobs");
            assert_eq!(message.kind, "started");
            assert_eq!(message.data["job"], 7);
        }
        assert!(other.try_recv().is_err(), "other channels see nothing");
    }

    #[tokio::test]
    async fn order_holds_per_subscriber_while_draining() {
        let hub = EventHub::new();
        let mut subscription = hub.subscribe("jobs");
        for i in 0..5 {
            hub.publish("jobs", "tick", &serde_json::json!(i));
        }
        for i in 0..5 {
            assert_eq!(subscription.try_recv().unwrap().data, serde_json::json!(i));
        }
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let hub = EventHub::new();
        let mut subscription = hub.subscribe("jobs");

        // Fill the FIFO and then some; publish must return promptly every time.
        let publish_all = async {
            for i in 0..(SUBSCRIBER_BUFFER + 10) {
                hub.publish("jobs", "tick", &serde_json::json!(i));
            }
        };
        tokio::time::timeout(Duration::from_secs(1), publish_all)
            .await
            .expect("publish must never block on a full subscriber");

        let mut received = 0;
        while subscription.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_BUFFER, "overflow events are dropped");
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_fifo_and_stops_delivery() {
        let hub = EventHub::new();
        let mut subscription = hub.subscribe("jobs");
        hub.publish("jobs", "before", &serde_json::json!(null));
        hub.unsubscribe(&subscription);
        hub.publish("jobs", "after", &serde_json::json!(null));

        assert_eq!(subscription.try_recv().unwrap().kind, "before");
        // Sender gone: the queue drains to Disconnected, not Empty.
        assert_eq!(
            subscription.try_recv().unwrap_err(),
            mpsc::error::TryRecvError::Disconnected
        );
        assert_eq!(hub.subscriber_count("jobs"), 0, "empty channel set is dropped");

        // Unsubscribing again is a no-op.
        hub.unsubscribe(&subscription);
    }

    #[tokio::test]
    async fn publish_to_empty_channel_is_a_no_op() {
        let hub = EventHub::new();
        hub.publish("nobody-home", "tick", &serde_json::json!(1));
        assert_eq!(hub.subscriber_count("nobody-home"), 0);
    }
}
