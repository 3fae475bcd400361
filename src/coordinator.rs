// src/coordinator.rs
//! Reconciles the topic a client asked for with the topic the broker
//! connection is actually subscribed to.
//!
//! The client side holds a [`TopicRequester`], the broker session holds the
//! matching [`TopicWatcher`]. The wake signal is a single stored permit: any
//! number of diverging requests made before the watcher looks are coalesced
//! into one wake, and the watcher always reads the *latest* desired topic.

use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

#[derive(Debug)]
struct TopicSlots {
    desired: String,
    subscribed: String,
}

#[derive(Debug)]
struct Shared {
    slots: RwLock<TopicSlots>,
    wake: Notify,
}

/// Creates a connected requester/watcher pair, both starting on `initial`.
pub fn topic_switch(initial: &str) -> (TopicRequester, TopicWatcher) {
    let shared = Arc::new(Shared {
        slots: RwLock::new(TopicSlots {
            desired: initial.to_string(),
            subscribed: initial.to_string(),
        }),
        wake: Notify::new(),
    });
    (
        TopicRequester { shared: shared.clone() },
        TopicWatcher { shared },
    )
}

/// Client-command side of the switch.
#[derive(Debug)]
pub struct TopicRequester {
    shared: Arc<Shared>,
}

impl TopicRequester {
    /// Records `topic` as desired and raises the wake signal if it differs
    /// from what the broker connection is subscribed to.
    pub async fn request_topic(&self, topic: impl Into<String>) {
        let topic = topic.into();
        let mut slots = self.shared.slots.write().await;
        let diverged = topic != slots.subscribed;
        slots.desired = topic;
        drop(slots);
        if diverged {
            self.shared.wake.notify_one();
        }
    }

    pub async fn desired_topic(&self) -> String {
        self.shared.slots.read().await.desired.clone()
    }
}

/// Broker-session side of the switch.
#[derive(Debug)]
pub struct TopicWatcher {
    shared: Arc<Shared>,
}

impl TopicWatcher {
    /// Suspends until the wake signal is raised, clears it and returns the
    /// current desired topic.
    ///
    /// Several requests may have been folded into this wake, so callers must
    /// compare the result against the subscribed topic themselves.
    pub async fn await_change(&self) -> String {
        self.shared.wake.notified().await;
        self.desired_topic().await
    }

    pub async fn desired_topic(&self) -> String {
        self.shared.slots.read().await.desired.clone()
    }

    pub async fn subscribed_topic(&self) -> String {
        self.shared.slots.read().await.subscribed.clone()
    }

    /// Publishes the topic the broker connection is now subscribed to and
    /// returns the desired topic as of that same instant. Only the broker
    /// session calls this, right after a subscribe completes.
    ///
    /// A request made while the subscribe was in flight was compared against
    /// the old subscription and may not have raised the signal, so a returned
    /// topic different from `topic` is still pending.
    pub async fn mark_subscribed(&self, topic: &str) -> String {
        let mut slots = self.shared.slots.write().await;
        slots.subscribed = topic.to_string();
        slots.desired.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_request_same_topic_does_not_wake() {
        let (requester, watcher) = topic_switch("#");
        requester.request_topic("#").await;
        let woke = timeout(Duration::from_millis(50), watcher.await_change()).await;
        assert!(woke.is_err(), "no divergence, no wake");
    }

    #[tokio::test]
    async fn test_diverging_request_wakes_with_latest() {
        let (requester, watcher) = topic_switch("#");
        requester.request_topic("a/+").await;
        requester.request_topic("b/#").await;
        let got = timeout(Duration::from_millis(50), watcher.await_change()).await.unwrap();
        assert_eq!(got, "b/#");
    }

    #[tokio::test]
    async fn test_coalesced_requests_wake_once() {
        let (requester, watcher) = topic_switch("t1");
        requester.request_topic("t2").await;
        requester.request_topic("t3").await;
        requester.request_topic("t1").await;

        let got = timeout(Duration::from_millis(50), watcher.await_change()).await.unwrap();
        assert_eq!(got, "t1");
        assert_eq!(watcher.subscribed_topic().await, "t1");

        let again = timeout(Duration::from_millis(50), watcher.await_change()).await;
        assert!(again.is_err(), "signal must be consumed exactly once");
    }

    #[tokio::test]
    async fn test_mark_subscribed_changes_divergence_baseline() {
        let (requester, watcher) = topic_switch("#");
        assert_eq!(watcher.mark_subscribed("x").await, "#");
        requester.request_topic("x").await;
        assert!(timeout(Duration::from_millis(50), watcher.await_change()).await.is_err());

        requester.request_topic("#").await;
        assert_eq!(timeout(Duration::from_millis(50), watcher.await_change()).await.unwrap(), "#");
        assert_eq!(requester.desired_topic().await, "#");
    }
}
