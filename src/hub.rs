use std::{collections::HashMap, fmt::Display, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::Error;

/// How long a single subscriber gets to accept a message.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Something which accepts text, such as a websocket.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Deliver the text.
    /// An error means the subscriber should be dropped.
    async fn send_text(&self, text: &str) -> Result<(), Error>;
}

/// Identifies a subscriber within a [`BroadcastHub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fans text out to every registered [`Subscriber`].
///
/// The lock is only held while changing or copying the set of subscribers,
/// never while sending.
#[derive(Clone)]
pub struct BroadcastHub {
    subscribers: Arc<Mutex<HashMap<SubscriberId, Arc<dyn Subscriber>>>>,
    delivery_timeout: Duration,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_DELIVERY_TIMEOUT)
    }
}

impl BroadcastHub {
    /// A hub giving each subscriber `delivery_timeout` to accept a message.
    pub fn new(delivery_timeout: Duration) -> Self {
        Self {
            subscribers: Arc::default(),
            delivery_timeout,
        }
    }

    /// Register a subscriber.
    /// The returned id is used to remove it again.
    pub async fn add(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId::new();
        self.subscribers.lock().await.insert(id, subscriber);
        debug!(%id, "Subscriber added");
        id
    }

    /// Remove a subscriber.
    /// Returns false if it was already gone.
    pub async fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.lock().await.remove(&id).is_some();
        if removed {
            debug!(%id, "Subscriber removed");
        }
        removed
    }

    /// How many subscribers are registered.
    pub async fn count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Send the text to all subscribers concurrently.
    ///
    /// Subscribers which fail (or time out) are removed.
    /// Returns how many subscribers got the text.
    pub async fn broadcast(&self, text: &str) -> usize {
        let snapshot = {
            let subscribers = self.subscribers.lock().await;
            if subscribers.is_empty() {
                return 0;
            }
            subscribers
                .iter()
                .map(|(id, subscriber)| (*id, Arc::clone(subscriber)))
                .collect::<Vec<_>>()
        };

        let deliveries = snapshot.into_iter().map(|(id, subscriber)| async move {
            let outcome =
                match tokio::time::timeout(self.delivery_timeout, subscriber.send_text(text)).await {
                    Ok(result) => result,
                    Err(_elapsed) => Err(Error::SubscriberGone),
                };
            (id, outcome)
        });

        let mut delivered = 0;
        for (id, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(%id, %e, "Dropping subscriber");
                    self.remove(id).await;
                }
            }
        }

        trace!("Broadcasted to {delivered} subscriber(s)");

        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct Recording {
        received: std::sync::Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    impl Recording {
        fn failing() -> Self {
            let recording = Self::default();
            recording.fail.store(true, Ordering::SeqCst);
            recording
        }

        fn received(&self) -> Vec<String> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Subscriber for Recording {
        async fn send_text(&self, text: &str) -> Result<(), Error> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::SubscriberGone);
            }
            self.received.lock().unwrap().push(text.to_owned());
            Ok(())
        }
    }

    struct Stuck;

    #[async_trait]
    impl Subscriber for Stuck {
        async fn send_text(&self, _text: &str) -> Result<(), Error> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn empty_broadcast_is_noop() {
        let hub = BroadcastHub::default();

        assert_eq!(hub.broadcast("hi").await, 0);
        assert_eq!(hub.count().await, 0);
    }

    #[tokio::test]
    async fn fan_out_to_all() {
        let hub = BroadcastHub::default();
        let subscribers = (0..4)
            .map(|_| Arc::new(Recording::default()))
            .collect::<Vec<_>>();

        for subscriber in &subscribers {
            hub.add(subscriber.clone()).await;
        }

        assert_eq!(hub.broadcast("1,2,3,4,5,6").await, 4);

        for subscriber in &subscribers {
            assert_eq!(subscriber.received(), vec!["1,2,3,4,5,6"]);
        }
    }

    #[tokio::test]
    async fn failing_subscriber_is_removed_others_still_receive() {
        let hub = BroadcastHub::default();
        let good = Arc::new(Recording::default());
        let also_good = Arc::new(Recording::default());
        let bad = Arc::new(Recording::failing());

        hub.add(good.clone()).await;
        let bad_id = hub.add(bad.clone()).await;
        hub.add(also_good.clone()).await;

        assert_eq!(hub.broadcast("garbage").await, 2);

        assert_eq!(good.received(), vec!["garbage"]);
        assert_eq!(also_good.received(), vec!["garbage"]);
        assert_eq!(hub.count().await, 2);

        // Already removed by the broadcast.
        assert!(!hub.remove(bad_id).await);
    }

    #[tokio::test]
    async fn stuck_subscriber_does_not_block_others() {
        let hub = BroadcastHub::new(Duration::from_millis(50));
        let good = Arc::new(Recording::default());

        hub.add(Arc::new(Stuck)).await;
        hub.add(good.clone()).await;

        assert_eq!(hub.broadcast("hello").await, 1);
        assert_eq!(good.received(), vec!["hello"]);
        assert_eq!(hub.count().await, 1);
    }

    #[tokio::test]
    async fn add_remove() {
        let hub = BroadcastHub::default();
        let subscriber = Arc::new(Recording::default());

        let id = hub.add(subscriber.clone()).await;
        assert_eq!(hub.count().await, 1);

        assert!(hub.remove(id).await);
        assert_eq!(hub.count().await, 0);

        hub.broadcast("nobody listens").await;
        assert!(subscriber.received().is_empty());
    }
}
