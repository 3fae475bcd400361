// src/session.rs
//! Broker session state machine.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Subscribed ──fault──▶ Disconnected
//!       ▲                        │                 │  ▲
//!       └──── backoff ◀── fail ──┘                 └──┘ topic switch
//! ```
//!
//! While `Subscribed`, an inbound listener and a topic listener run side by
//! side over the same connection. The first one to hit a broker error ends the
//! connection; a closed sink ends the whole session. Cancellation is external:
//! the owner drops the [`BrokerSession::run`] future via its token.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    broker::{BrokerConnector, BrokerControl, BrokerInbox, BrokerLink},
    config::DEFAULT_RECONNECT_DELAY_SECS,
    coordinator::TopicWatcher,
    error::{BrokerError, SinkError},
    logger::metrics,
    normalizer::normalize_payload,
    sink::EventSink,
    topic,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Fixed delay between a failed or dropped connection and the next attempt.
    pub reconnect_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerPhase {
    Disconnected,
    Connecting,
    Subscribed,
}

/// State owned by exactly one broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub phase: BrokerPhase,
    pub connected: bool,
    /// Last desired topic this session observed.
    pub desired_topic: String,
    /// Only written right after a subscribe (or unsubscribe/subscribe pair) succeeded.
    pub subscribed_topic: String,
}

impl SessionState {
    fn new(initial_topic: String) -> Self {
        Self {
            phase: BrokerPhase::Disconnected,
            connected: false,
            desired_topic: initial_topic.clone(),
            subscribed_topic: initial_topic,
        }
    }
}

/// Why a connection ended.
#[derive(Debug)]
enum Fault {
    Broker(BrokerError),
    SinkClosed,
}

impl From<BrokerError> for Fault {
    fn from(err: BrokerError) -> Self {
        Fault::Broker(err)
    }
}

impl From<SinkError> for Fault {
    fn from(_: SinkError) -> Self {
        Fault::SinkClosed
    }
}

pub struct BrokerSession {
    connector: Arc<dyn BrokerConnector>,
    sink: Arc<dyn EventSink>,
    watcher: TopicWatcher,
    settings: SessionSettings,
    state: SessionState,
}

impl BrokerSession {
    pub async fn new(
        connector: Arc<dyn BrokerConnector>,
        sink: Arc<dyn EventSink>,
        watcher: TopicWatcher,
        settings: SessionSettings,
    ) -> Self {
        let state = SessionState::new(watcher.desired_topic().await);
        Self { connector, sink, watcher, settings, state }
    }

    fn enter(&mut self, phase: BrokerPhase) {
        debug!("broker session {:?} → {:?}", self.state.phase, phase);
        self.state.phase = phase;
    }

    /// Drives the session until the sink closes or `cancel` fires. Whatever
    /// is in flight at that point (connect, subscribe, receive, backoff) is
    /// dropped together with the broker connection.
    pub async fn run(mut self, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => debug!("broker session cancelled"),
            _ = self.run_until_closed() => info!("client sink closed, broker session ends"),
        }
    }

    async fn run_until_closed(&mut self) {
        loop {
            match self.connect_and_relay().await {
                Fault::SinkClosed => return,
                Fault::Broker(err) => {
                    metrics().broker_faults.add(1, &[]);
                    warn!("❌ MQTT error: {}", err);
                    self.state.connected = false;
                    self.enter(BrokerPhase::Disconnected);
                    self.state.desired_topic = self.watcher.desired_topic().await;
                    if self.sink.send_status(false, &self.state.desired_topic).await.is_err() {
                        return;
                    }
                    sleep(self.settings.reconnect_delay).await;
                }
            }
        }
    }

    /// One connection lifetime: connect, subscribe, relay until something breaks.
    async fn connect_and_relay(&mut self) -> Fault {
        self.enter(BrokerPhase::Connecting);
        info!("🔌 connecting to MQTT broker");
        let BrokerLink { control, mut inbox } = match self.connector.connect().await {
            Ok(link) => link,
            Err(err) => return err.into(),
        };
        metrics().broker_connects.add(1, &[]);
        self.state.connected = true;
        info!("✅ MQTT connected");

        let desired = self.watcher.desired_topic().await;
        self.state.desired_topic = desired.clone();
        if let Err(err) = self.sink.send_status(true, &desired).await {
            return err.into();
        }

        if let Err(err) = control.subscribe(&desired).await {
            return err.into();
        }
        let current = self.watcher.mark_subscribed(&desired).await;
        self.state.subscribed_topic = desired.clone();
        self.state.desired_topic = current.clone();
        info!("📡 subscribed to {}", desired);
        if let Err(err) = self.sink.send_status(true, &current).await {
            return err.into();
        }
        self.enter(BrokerPhase::Subscribed);

        // a request that raced the subscribe above may not have raised the signal
        let pending = (current != desired).then_some(current);

        tokio::select! {
            fault = inbound_listener(inbox.as_mut(), self.sink.as_ref(), &self.watcher) => fault,
            fault = topic_listener(control.as_ref(), self.sink.as_ref(), &self.watcher, &mut self.state, pending) => fault,
        }
    }
}

/// Relays every publish on the subscribed topic as normalized message events,
/// in broker order. Publishes whose topic no longer matches the desired filter
/// (stragglers from a topic being switched away from) are dropped.
async fn inbound_listener(inbox: &mut dyn BrokerInbox, sink: &dyn EventSink, watcher: &TopicWatcher) -> Fault {
    loop {
        let message = match inbox.next_message().await {
            Ok(message) => message,
            Err(err) => return err.into(),
        };

        let desired = watcher.desired_topic().await;
        if !topic::matches(&desired, &message.topic) {
            debug!("dropping straggler on {} (now watching {})", message.topic, desired);
            continue;
        }

        for event in normalize_payload(&message.topic, &message.payload) {
            if let Err(err) = sink.send_message(&event.topic, &event.value).await {
                return err.into();
            }
            metrics().messages_relayed.add(1, &[]);
        }
    }
}

/// Applies topic switches: waits for the coordinator, then swaps the
/// subscription and confirms with a status event.
async fn topic_listener(
    control: &dyn BrokerControl,
    sink: &dyn EventSink,
    watcher: &TopicWatcher,
    state: &mut SessionState,
    mut pending: Option<String>,
) -> Fault {
    loop {
        let desired = match pending.take() {
            Some(topic) => topic,
            None => watcher.await_change().await,
        };
        state.desired_topic = desired.clone();
        if desired == state.subscribed_topic {
            debug!("topic requests settled back on {}", desired);
            continue;
        }

        info!("🔄 topic changed {} → {}", state.subscribed_topic, desired);
        if let Err(err) = control.unsubscribe(&state.subscribed_topic).await {
            return err.into();
        }
        if let Err(err) = control.subscribe(&desired).await {
            return err.into();
        }
        let current = watcher.mark_subscribed(&desired).await;
        state.subscribed_topic = desired.clone();
        state.desired_topic = current.clone();

        if let Err(err) = sink.send_status(true, &current).await {
            return err.into();
        }
        if current != desired {
            pending = Some(current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        coordinator::topic_switch,
        event::{MessageEvent, RelayEvent, StatusEvent},
        sink::ChannelSink,
        testing::{BrokerOp, MemoryBroker},
    };
    use tokio::sync::mpsc::UnboundedReceiver;

    fn status(connected: bool, topic: &str) -> RelayEvent {
        RelayEvent::Status(StatusEvent::new(connected, topic))
    }

    fn message(topic: &str, value: &str) -> RelayEvent {
        RelayEvent::Message(MessageEvent::new(topic, value))
    }

    async fn spawn_session(
        broker: &MemoryBroker,
    ) -> (crate::coordinator::TopicRequester, UnboundedReceiver<RelayEvent>, CancellationToken) {
        let (requester, watcher) = topic_switch(topic::WILDCARD_ALL);
        let (sink, rx) = ChannelSink::new();
        let session = BrokerSession::new(
            Arc::new(broker.clone()),
            Arc::new(sink),
            watcher,
            SessionSettings::default(),
        )
        .await;
        assert_eq!(session.state.phase, BrokerPhase::Disconnected);
        let cancel = CancellationToken::new();
        tokio::spawn(session.run(cancel.clone()));
        (requester, rx, cancel)
    }

    #[tokio::test]
    async fn test_connect_emits_two_status_events_and_subscribes() {
        let broker = MemoryBroker::new();
        let (_requester, mut rx, cancel) = spawn_session(&broker).await;

        assert_eq!(rx.recv().await, Some(status(true, "#")));
        assert_eq!(rx.recv().await, Some(status(true, "#")));
        assert_eq!(broker.ops(), vec![BrokerOp::Connect, BrokerOp::Subscribe("#".into())]);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_payloads_are_normalized_in_order() {
        let broker = MemoryBroker::new();
        let (_requester, mut rx, cancel) = spawn_session(&broker).await;
        rx.recv().await;
        rx.recv().await;

        assert!(broker.publish("sensors/room1", r#"{"a": {"b": 1, "c": [true, false]}}"#));
        assert!(broker.publish("x/y", "42"));
        assert!(broker.publish("x/y", "not-json"));

        assert_eq!(rx.recv().await, Some(message("sensors_room1_a_b", "1")));
        assert_eq!(rx.recv().await, Some(message("sensors_room1_a_c_0", "1")));
        assert_eq!(rx.recv().await, Some(message("sensors_room1_a_c_1", "0")));
        assert_eq!(rx.recv().await, Some(message("x_y", "42")));
        assert_eq!(rx.recv().await, Some(message("x_y", "not-json")));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_topic_switch_resubscribes() {
        let broker = MemoryBroker::new();
        let (requester, mut rx, cancel) = spawn_session(&broker).await;
        rx.recv().await;
        rx.recv().await;

        requester.request_topic("sensors/#").await;
        assert_eq!(rx.recv().await, Some(status(true, "sensors/#")));
        assert_eq!(
            broker.ops(),
            vec![
                BrokerOp::Connect,
                BrokerOp::Subscribe("#".into()),
                BrokerOp::Unsubscribe("#".into()),
                BrokerOp::Subscribe("sensors/#".into()),
            ]
        );
        assert_eq!(broker.subscriptions(), vec!["sensors/#".to_string()]);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_stream_fault_reports_and_reconnects() {
        let broker = MemoryBroker::new();
        let (_requester, mut rx, cancel) = spawn_session(&broker).await;
        rx.recv().await;
        rx.recv().await;

        broker.drop_connection("broker restarted");
        assert_eq!(rx.recv().await, Some(status(false, "#")));
        assert_eq!(rx.recv().await, Some(status(true, "#")));
        assert_eq!(rx.recv().await, Some(status(true, "#")));

        let attempts = broker.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] - attempts[0] >= Duration::from_secs(5));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_subscribe_faults_then_recovers_on_valid_topic() {
        let broker = MemoryBroker::new();
        let (requester, mut rx, cancel) = spawn_session(&broker).await;
        rx.recv().await;
        rx.recv().await;

        requester.request_topic("a/#/b").await;
        assert_eq!(rx.recv().await, Some(status(false, "a/#/b")));

        // still inside the backoff
        requester.request_topic("ok/+").await;
        assert_eq!(rx.recv().await, Some(status(true, "ok/+")));
        assert_eq!(rx.recv().await, Some(status(true, "ok/+")));

        assert_eq!(
            broker.ops(),
            vec![
                BrokerOp::Connect,
                BrokerOp::Subscribe("#".into()),
                BrokerOp::Unsubscribe("#".into()),
                BrokerOp::Connect,
                BrokerOp::Subscribe("ok/+".into()),
            ]
        );
        let attempts = broker.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] - attempts[0] >= Duration::from_secs(5));

        assert!(broker.publish("ok/go", "1"));
        assert_eq!(rx.recv().await, Some(message("ok_go", "1")));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_closed_sink_ends_session() {
        let broker = MemoryBroker::new();
        let (_requester, watcher) = topic_switch("#");
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let session = BrokerSession::new(Arc::new(broker.clone()), Arc::new(sink), watcher, SessionSettings::default()).await;

        // returns on its own, no cancel needed
        session.run(CancellationToken::new()).await;
        assert_eq!(broker.attempts().len(), 1);
    }
}
