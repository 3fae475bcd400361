// src/broker/mod.rs
//! Broker boundary.
//!
//! A [`BrokerConnector`] opens one connection and hands it back split in two:
//! a [`BrokerControl`] for subscription changes and a [`BrokerInbox`] that
//! yields inbound publishes. The split lets the two session listeners share
//! one connection without locking.

pub mod mqtt;

use async_trait::async_trait;

use crate::error::BrokerError;

/// One publish received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPayload {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundPayload {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self { topic: topic.into(), payload: payload.into() }
    }
}

/// A live broker connection. Dropping both halves releases it.
pub struct BrokerLink {
    pub control: Box<dyn BrokerControl>,
    pub inbox: Box<dyn BrokerInbox>,
}

#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Opens a new connection. Resolves only once the broker accepted it.
    async fn connect(&self) -> Result<BrokerLink, BrokerError>;
}

#[async_trait]
pub trait BrokerControl: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError>;
    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait BrokerInbox: Send {
    /// Waits for the next publish. An error means the connection is dead.
    async fn next_message(&mut self) -> Result<InboundPayload, BrokerError>;
}
