// src/server/mod.rs
//! WebSocket front end. Every accepted connection gets its own
//! [`SessionSupervisor`]; session events go out as JSON text frames and every
//! inbound text frame is a topic request.

pub mod auth;

use std::{io, net::SocketAddr, sync::Arc};

use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::broadcast,
    task::JoinSet,
};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        Message as WsMsg,
        handshake::server::{ErrorResponse, Request, Response},
    },
};
use tracing::{debug, error, info, warn};

use crate::{
    broker::BrokerConnector,
    session::SessionSettings,
    sink::ChannelSink,
    supervisor::SessionSupervisor,
};

struct ConnectionContext {
    connector: Arc<dyn BrokerConnector>,
    settings: SessionSettings,
    web_password: Option<String>,
}

pub struct RelayServer {
    listener: TcpListener,
    context: Arc<ConnectionContext>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl RelayServer {
    /// Binds the listener. With `web_password` set, upgrades without matching
    /// Basic credentials are refused with `401`.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        connector: Arc<dyn BrokerConnector>,
        settings: SessionSettings,
        web_password: Option<String>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(16);
        Ok(Self {
            listener,
            context: Arc::new(ConnectionContext { connector, settings, web_password }),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Sending on this stops the accept loop and every open connection.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Accepts connections until shutdown, then waits for every connection
    /// to tear down its session.
    pub async fn serve(mut self) {
        let mut connections = JoinSet::new();
        info!("🌐 relay listening on {:?}", self.listener.local_addr().ok());

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("relay listener shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(handle_connection(
                            stream,
                            peer,
                            self.context.clone(),
                            self.shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => warn!("accept failed: {}", e),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        while connections.join_next().await.is_some() {}
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<ConnectionContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let gate = context.web_password.clone();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match gate.as_deref() {
            Some(expected) if !auth::authorized(request, expected) => {
                warn!("rejected {}: bad credentials", peer);
                Err(auth::unauthorized())
            }
            _ => Ok(response),
        }
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    info!("👤 client {} connected", peer);

    let (mut write, mut read) = ws_stream.split();
    let (sink, mut events) = ChannelSink::new();
    let mut supervisor =
        match SessionSupervisor::start(context.connector.clone(), Arc::new(sink), context.settings).await {
            Ok(supervisor) => supervisor,
            Err(e) => {
                error!("could not start session for {}: {}", peer, e);
                return;
            }
        };

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            // inbound
            frame = read.next() => match frame {
                Some(Ok(WsMsg::Text(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    supervisor.on_client_command(text.as_str()).await;
                }
                Some(Ok(WsMsg::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("read from {} failed: {}", peer, e);
                    break;
                }
            },
            // outbound
            event = events.recv() => match event {
                Some(event) => {
                    let json = match event.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            error!("could not encode event: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(WsMsg::Text(json.into())).await {
                        debug!("write to {} failed: {}", peer, e);
                        break;
                    }
                }
                None => break,
            },
        }
    }

    supervisor.stop().await;
    let _ = write.close().await;
    info!("👋 client {} disconnected", peer);
}
