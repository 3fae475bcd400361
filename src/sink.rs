// src/sink.rs

use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::{
    error::SinkError,
    event::{MessageEvent, RelayEvent, StatusEvent},
};

/// Where session output goes. In the server this is the client's WebSocket;
/// the session only ever sees this trait.
///
/// Implementations must be safe to call from the inbound listener and the
/// topic listener at the same time and must keep per-caller call order.
/// An `Err` means the peer is gone and the session should stop.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send_status(&self, connected: bool, topic: &str) -> Result<(), SinkError>;
    async fn send_message(&self, topic: &str, value: &str) -> Result<(), SinkError>;
}

/// Sink backed by an unbounded mpsc channel; the receiving half is drained by
/// the connection writer (or by a test).
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: UnboundedSender<RelayEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<RelayEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, event: RelayEvent) -> Result<(), SinkError> {
        self.tx.send(event).map_err(|_| SinkError::Closed)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send_status(&self, connected: bool, topic: &str) -> Result<(), SinkError> {
        self.push(StatusEvent::new(connected, topic).into())
    }

    async fn send_message(&self, topic: &str, value: &str) -> Result<(), SinkError> {
        self.push(MessageEvent::new(topic, value).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.send_status(false, "#").await.unwrap();
        sink.send_message("a_b", "1").await.unwrap();

        assert_eq!(rx.recv().await, Some(RelayEvent::Status(StatusEvent::new(false, "#"))));
        assert_eq!(rx.recv().await, Some(RelayEvent::Message(MessageEvent::new("a_b", "1"))));
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_peer() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        assert_eq!(sink.send_status(true, "#").await, Err(SinkError::Closed));
        assert_eq!(sink.send_message("x", "y").await, Err(SinkError::Closed));
    }
}
