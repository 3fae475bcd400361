// src/testing.rs
//! In-memory broker for tests and local demos.
//!
//! Behaves like a single-client MQTT broker: it accepts (or refuses)
//! connections, tracks the live connection's subscriptions, routes published
//! payloads by topic filter and can drop the connection on demand. Every
//! operation is logged so tests can assert on the exact broker traffic.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    time::Instant,
};

use crate::{
    broker::{BrokerConnector, BrokerControl, BrokerInbox, BrokerLink, InboundPayload},
    error::BrokerError,
    topic,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerOp {
    Connect,
    Subscribe(String),
    Unsubscribe(String),
}

type Delivery = Result<InboundPayload, BrokerError>;

#[derive(Default)]
struct MemoryState {
    refuse_next: usize,
    stall_connect: bool,
    attempts: Vec<Instant>,
    ops: Vec<BrokerOp>,
    subscriptions: Vec<String>,
    link: Option<UnboundedSender<Delivery>>,
    pending: usize,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuses the next `n` connection attempts.
    pub fn refuse_connections(&self, n: usize) {
        self.lock().refuse_next = n;
    }

    /// Makes every following connection attempt hang until it is dropped.
    pub fn stall_connections(&self) {
        self.lock().stall_connect = true;
    }

    /// When each connection attempt was made.
    pub fn attempts(&self) -> Vec<Instant> {
        self.lock().attempts.clone()
    }

    /// Connection attempts accepted but not yet finished or abandoned.
    pub fn pending_connects(&self) -> usize {
        self.lock().pending
    }

    pub fn ops(&self) -> Vec<BrokerOp> {
        self.lock().ops.clone()
    }

    /// Filters the live connection is subscribed to.
    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    /// True while a client holds the connection open.
    pub fn is_connected(&self) -> bool {
        self.lock().link.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Publishes `payload` on `topic`. Returns whether a subscription matched.
    pub fn publish(&self, topic_name: &str, payload: impl Into<Vec<u8>>) -> bool {
        let state = self.lock();
        let Some(tx) = &state.link else { return false };
        if !state.subscriptions.iter().any(|f| topic::matches(f, topic_name)) {
            return false;
        }
        tx.send(Ok(InboundPayload::new(topic_name, payload))).is_ok()
    }

    /// Kills the live connection; the client sees `reason` as a connection error.
    pub fn drop_connection(&self, reason: &str) {
        let mut state = self.lock();
        if let Some(tx) = state.link.take() {
            let _ = tx.send(Err(BrokerError::Connection(reason.to_string())));
        }
        state.subscriptions.clear();
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self) -> Result<BrokerLink, BrokerError> {
        let stall = {
            let mut state = self.lock();
            state.attempts.push(Instant::now());
            state.ops.push(BrokerOp::Connect);
            if state.refuse_next > 0 {
                state.refuse_next -= 1;
                return Err(BrokerError::Connect("connection refused".into()));
            }
            state.pending += 1;
            state.stall_connect
        };
        let _attempt = PendingConnect { broker: self.clone() };
        if stall {
            std::future::pending::<()>().await;
        }

        let (tx, rx) = unbounded_channel();
        {
            let mut state = self.lock();
            state.link = Some(tx);
            state.subscriptions.clear();
        }
        Ok(BrokerLink {
            control: Box::new(MemoryControl { broker: self.clone() }),
            inbox: Box::new(MemoryInbox { rx }),
        })
    }
}

/// Counts an attempt as pending until its future completes or is dropped.
struct PendingConnect {
    broker: MemoryBroker,
}

impl Drop for PendingConnect {
    fn drop(&mut self) {
        let mut state = self.broker.lock();
        state.pending = state.pending.saturating_sub(1);
    }
}

struct MemoryControl {
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerControl for MemoryControl {
    async fn subscribe(&self, filter: &str) -> Result<(), BrokerError> {
        if !topic::valid_filter(filter) {
            return Err(BrokerError::Subscribe {
                topic: filter.to_string(),
                reason: "invalid topic filter".into(),
            });
        }
        let mut state = self.broker.lock();
        state.ops.push(BrokerOp::Subscribe(filter.to_string()));
        state.subscriptions.push(filter.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.ops.push(BrokerOp::Unsubscribe(filter.to_string()));
        state.subscriptions.retain(|f| f != filter);
        Ok(())
    }
}

struct MemoryInbox {
    rx: UnboundedReceiver<Delivery>,
}

#[async_trait]
impl BrokerInbox for MemoryInbox {
    async fn next_message(&mut self) -> Result<InboundPayload, BrokerError> {
        match self.rx.recv().await {
            Some(delivery) => delivery,
            None => Err(BrokerError::Connection("connection closed".into())),
        }
    }
}
