// src/broker/mqtt.rs

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tracing::debug;
use uuid::Uuid;

use crate::{
    broker::{BrokerConnector, BrokerControl, BrokerInbox, BrokerLink, InboundPayload},
    config::BrokerSettings,
    error::BrokerError,
};

/// Bound of the request queue between `AsyncClient` and its `EventLoop`.
const REQUEST_CAPACITY: usize = 16;

/// Opens MQTT connections with `rumqttc`, one fresh client per call.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    settings: BrokerSettings,
}

impl MqttConnector {
    pub fn new(settings: BrokerSettings) -> Self {
        Self { settings }
    }

    fn options(&self) -> MqttOptions {
        let client_id = format!("mqtt-relay-{}", Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, &self.settings.host, self.settings.port);
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);
        if !self.settings.username.is_empty() {
            options.set_credentials(&self.settings.username, &self.settings.password);
        }
        options
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    async fn connect(&self) -> Result<BrokerLink, BrokerError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        // the event loop connects lazily on its first poll
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!("broker accepted connection: {:?}", ack.code);
                    break;
                }
                Ok(_) => continue,
                Err(e) => return Err(BrokerError::Connect(e.to_string())),
            }
        }

        Ok(BrokerLink {
            control: Box::new(MqttControl { client }),
            inbox: Box::new(MqttInbox { eventloop }),
        })
    }
}

struct MqttControl {
    client: AsyncClient,
}

#[async_trait]
impl BrokerControl for MqttControl {
    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BrokerError::Subscribe { topic: topic.to_string(), reason: e.to_string() })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| BrokerError::Unsubscribe { topic: topic.to_string(), reason: e.to_string() })
    }
}

struct MqttInbox {
    eventloop: EventLoop,
}

#[async_trait]
impl BrokerInbox for MqttInbox {
    async fn next_message(&mut self) -> Result<InboundPayload, BrokerError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(InboundPayload::new(publish.topic, publish.payload.to_vec()));
                }
                Ok(_) => continue,
                Err(e) => return Err(BrokerError::Connection(e.to_string())),
            }
        }
    }
}
