//! Change feed subscriptions.
//!
//! A feed delivers [`ChangeEvent`]s per [`FeedTopic`], at least once.
//! Subscribers receive a bounded channel and a [`Subscription`] handle
//! whose only operation is [`Subscription::stop`].

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use offering_types::{ChangeEvent, FeedTopic};

/// Default per-subscriber buffer.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Handle to an active subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    topic: FeedTopic,
    token: CancellationToken,
}

impl Subscription {
    fn new(topic: FeedTopic) -> Self {
        Self {
            topic,
            token: CancellationToken::new(),
        }
    }

    /// Stop delivery to this subscriber.
    pub fn stop(&self) {
        debug!(topic = %self.topic, "Stopping subscription");
        self.token.cancel();
    }

    pub(crate) fn topic(&self) -> FeedTopic {
        self.topic
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) async fn stopped(&self) {
        self.token.cancelled().await
    }
}

/// Events for one topic plus the handle controlling them.
pub struct FeedSubscription {
    pub events: mpsc::Receiver<ChangeEvent>,
    pub handle: Subscription,
}

/// Source of change events.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self, topic: FeedTopic) -> FeedSubscription;
}

/// In-process feed fanning published events out to subscribers.
pub struct ChannelFeed {
    capacity: usize,
    subscribers: Mutex<HashMap<FeedTopic, Vec<(mpsc::Sender<ChangeEvent>, Subscription)>>>,
}

impl Default for ChannelFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl ChannelFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver an event to every live subscriber of its topic.
    ///
    /// Waits for buffer space. Returns the number of subscribers reached.
    pub async fn publish(&self, event: ChangeEvent) -> usize {
        let topic = event.topic();
        let targets: Vec<mpsc::Sender<ChangeEvent>> = {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            let Some(list) = subscribers.get_mut(&topic) else {
                return 0;
            };
            list.retain(|(tx, handle)| !tx.is_closed() && !handle.is_stopped());
            list.iter().map(|(tx, _)| tx.clone()).collect()
        };

        let mut delivered = 0;
        for tx in targets {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        if delivered == 0 {
            debug!(topic = %topic, "No subscriber for event");
        }
        delivered
    }

    /// Drop every subscriber's sender.
    ///
    /// Subscribers still receive what is already buffered, then see the
    /// end of their stream.
    pub fn close(&self) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let closed: usize = subscribers.values().map(Vec::len).sum();
        subscribers.clear();
        debug!(subscribers = closed, "Closed change feed");
    }

    pub fn subscriber_count(&self, topic: FeedTopic) -> usize {
        let subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers
            .get(&topic)
            .map(|list| {
                list.iter()
                    .filter(|(tx, handle)| !tx.is_closed() && !handle.is_stopped())
                    .count()
            })
            .unwrap_or(0)
    }
}

impl ChangeFeed for ChannelFeed {
    fn subscribe(&self, topic: FeedTopic) -> FeedSubscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let handle = Subscription::new(topic);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic)
            .or_default()
            .push((tx, handle.clone()));
        debug!(topic = %topic, "Subscribed to change feed");
        FeedSubscription { events: rx, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offering_types::{AttributeValue, Course, Offering, Semester};
    use uuid::Uuid;

    fn offering() -> Offering {
        Offering::new(
            Course::new("CS 101", "Intro"),
            Semester::new(2022, "Spring"),
            Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn test_publish_routes_by_topic() {
        let feed = ChannelFeed::new(8);
        let mut created = feed.subscribe(FeedTopic::Created);
        let mut times = feed.subscribe(FeedTopic::Attribute(offering_types::AttributeKind::Time));

        let o = offering();
        assert_eq!(
            feed.publish(ChangeEvent::OfferingCreated { offering: o.clone() }).await,
            1
        );
        assert_eq!(
            feed.publish(ChangeEvent::updated(o.clone(), AttributeValue::time("MF", "10:00")))
            .await,
            1
        );
        // Nobody listens for instructors
        assert_eq!(
            feed.publish(ChangeEvent::updated(o, AttributeValue::instructor("Dr. Smith")))
            .await,
            0
        );

        assert_eq!(created.events.recv().await.unwrap().topic(), FeedTopic::Created);
        assert!(matches!(
            times.events.recv().await.unwrap(),
            ChangeEvent::AttributeUpdated { .. }
        ));
    }

    #[tokio::test]
    async fn test_stopped_subscription_receives_nothing() {
        let feed = ChannelFeed::new(8);
        let sub = feed.subscribe(FeedTopic::Deleted);
        assert_eq!(feed.subscriber_count(FeedTopic::Deleted), 1);

        sub.handle.stop();
        assert_eq!(feed.subscriber_count(FeedTopic::Deleted), 0);
        let delivered = feed
            .publish(ChangeEvent::OfferingDeleted { offering: offering() })
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_close_drains_buffered_events() {
        let feed = ChannelFeed::new(8);
        let mut sub = feed.subscribe(FeedTopic::Created);
        feed.publish(ChangeEvent::OfferingCreated { offering: offering() })
            .await;

        feed.close();
        assert_eq!(feed.subscriber_count(FeedTopic::Created), 0);
        assert!(sub.events.recv().await.is_some());
        assert!(sub.events.recv().await.is_none());
    }
}
