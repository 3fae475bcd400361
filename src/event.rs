// src/event.rs

use serde::{Deserialize, Serialize};

/// Connection state as shown to the client.
///
/// `topic` always carries the *desired* topic at the moment of emission, so the
/// page shows the requested topic even while a switch is still in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub connected: bool,
    pub topic: String,
}

impl StatusEvent {
    pub fn new(connected: bool, topic: impl Into<String>) -> Self {
        Self { connected, topic: topic.into() }
    }
}

/// One normalized scalar update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub topic: String,
    pub value: String,
}

impl MessageEvent {
    pub fn new(topic: impl Into<String>, value: impl Into<String>) -> Self {
        Self { topic: topic.into(), value: value.into() }
    }
}

/// What goes over the wire, one JSON text frame per event:
/// `{"type":"status","connected":true,"topic":"#"}` or
/// `{"type":"message","topic":"a_b","value":"1"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayEvent {
    Status(StatusEvent),
    Message(MessageEvent),
}

impl RelayEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<StatusEvent> for RelayEvent {
    fn from(ev: StatusEvent) -> Self {
        RelayEvent::Status(ev)
    }
}

impl From<MessageEvent> for RelayEvent {
    fn from(ev: MessageEvent) -> Self {
        RelayEvent::Message(ev)
    }
}
