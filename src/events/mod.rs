//! Live event fan-out.
//!
//! A single process-wide `tokio::sync::broadcast` channel would drop the
//! *oldest* message for every lagging subscriber uniformly once any one of
//! them falls behind — it can't single out the slow subscriber without
//! penalizing the fast ones. This hub instead keeps one bounded `mpsc`
//! channel per subscriber behind a topic keyed by session id: a publish is
//! a `try_send` to every subscriber of that topic, and a subscriber whose
//! channel is full is evicted on the spot rather than slowing or dropping
//! messages for anyone else.

use crate::models::{Event, EventPayload, SessionId};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Event>,
}

#[derive(Default)]
struct Topic {
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

pub struct EventHub {
    topics: Mutex<HashMap<SessionId, Topic>>,
    buffer_size: usize,
}

/// A live handle on one session's event stream. Dropping it unsubscribes.
pub struct Subscription {
    session_id: SessionId,
    subscriber_id: u64,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl EventHub {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            buffer_size,
        }
    }

    pub async fn subscribe(&self, session_id: SessionId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let mut topics = self.topics.lock().await;
        let topic = topics.entry(session_id).or_default();
        let subscriber_id = topic.next_id;
        topic.next_id += 1;
        topic.subscribers.push(Subscriber { id: subscriber_id, tx });

        Subscription {
            session_id,
            subscriber_id,
            rx,
        }
    }

    pub async fn unsubscribe(&self, subscription: &Subscription) {
        let mut topics = self.topics.lock().await;
        if let Some(topic) = topics.get_mut(&subscription.session_id) {
            topic
                .subscribers
                .retain(|s| s.id != subscription.subscriber_id);
            if topic.subscribers.is_empty() {
                topics.remove(&subscription.session_id);
            }
        }
    }

    /// Publish one payload to every live subscriber of `session_id`.
    /// Full channels are treated as evidence of a slow consumer and
    /// dropped rather than awaited.
    pub async fn publish(&self, session_id: SessionId, payload: EventPayload) {
        let event = Event { session_id, payload };
        let mut topics = self.topics.lock().await;
        let Some(topic) = topics.get_mut(&session_id) else {
            return;
        };

        topic.subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%session_id, subscriber_id = sub.id, "evicting slow event subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%session_id, subscriber_id = sub.id, "dropping closed event subscriber");
                false
            }
        });

        if topic.subscribers.is_empty() {
            topics.remove(&session_id);
        }
    }

    /// Drop every subscriber across every topic, closing their channels
    /// so in-flight `recv` calls observe `None`.
    pub async fn shutdown(&self) {
        let mut topics = self.topics.lock().await;
        topics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let hub = EventHub::new(8);
        let session_id = Uuid::new_v4();
        let mut sub = hub.subscribe(session_id).await;

        hub.publish(session_id, EventPayload::VotingStarted).await;

        let event = sub.recv().await.unwrap();
        assert_eq!(event.session_id, session_id);
        assert!(matches!(event.payload, EventPayload::VotingStarted));
    }

    #[tokio::test]
    async fn full_subscriber_is_evicted_without_blocking_others() {
        let hub = EventHub::new(1);
        let session_id = Uuid::new_v4();
        let mut slow = hub.subscribe(session_id).await;
        let mut fast = hub.subscribe(session_id).await;

        // First publish fills both buffers (capacity 1).
        hub.publish(session_id, EventPayload::VotingStarted).await;
        // Fast keeps up and drains; slow does not.
        assert!(fast.recv().await.is_some());

        // Second publish: fast has room and receives it, slow is still
        // full and gets evicted instead of stalling the topic.
        hub.publish(session_id, EventPayload::SynthesisStarted).await;

        let second = fast.recv().await.unwrap();
        assert!(matches!(second.payload, EventPayload::SynthesisStarted));

        // slow's one buffered message is still there, but its channel
        // was closed on eviction, so after reading it recv yields None.
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_removes_empty_topics() {
        let hub = EventHub::new(4);
        let session_id = Uuid::new_v4();
        let sub = hub.subscribe(session_id).await;
        hub.unsubscribe(&sub).await;
        assert!(hub.topics.lock().await.get(&session_id).is_none());
    }
}
