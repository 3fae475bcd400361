// src/supervisor.rs
//! Owns one client's broker session from start to teardown.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    broker::BrokerConnector,
    coordinator::{TopicRequester, topic_switch},
    error::SinkError,
    logger::metrics,
    session::{BrokerSession, SessionSettings},
    sink::EventSink,
    topic::WILDCARD_ALL,
};

pub struct SessionSupervisor {
    requester: TopicRequester,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionSupervisor {
    /// Reports the pre-connect status on `sink`, then spawns the broker
    /// session with a fresh topic switch starting on the all-topics wildcard.
    ///
    /// Fails only if `sink` is already closed, in which case nothing is spawned.
    pub async fn start(
        connector: Arc<dyn BrokerConnector>,
        sink: Arc<dyn EventSink>,
        settings: SessionSettings,
    ) -> Result<Self, SinkError> {
        let (requester, watcher) = topic_switch(WILDCARD_ALL);
        sink.send_status(false, &requester.desired_topic().await).await?;

        let session = BrokerSession::new(connector, sink, watcher, settings).await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(session.run(cancel.clone()));
        metrics().sessions_started.add(1, &[]);
        info!("🚀 relay session started");

        Ok(Self { requester, cancel, task: Some(task) })
    }

    /// A client frame is the new desired topic filter, verbatim.
    pub async fn on_client_command(&self, topic: &str) {
        debug!("client requested topic {}", topic);
        self.requester.request_topic(topic).await;
    }

    /// True once the session has ended, on its own (sink closed) or via [`stop`](Self::stop).
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Cancels the session and waits until it has released the broker
    /// connection. No sink delivery happens after this returns. Safe to call
    /// more than once.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        let Some(task) = self.task.take() else { return };
        match task.await {
            Ok(()) => info!("🛑 relay session stopped"),
            Err(e) if e.is_panic() => error!("relay session panicked: {}", e),
            Err(_) => {}
        }
    }
}

impl Drop for SessionSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
