// tests/ws_relay.rs
use std::{net::SocketAddr, sync::Arc, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures_util::{SinkExt, StreamExt};
use mqtt_relay::{server::RelayServer, session::SessionSettings, testing::MemoryBroker};
use serde_json::{Value, json};
use tokio::{
    net::TcpStream,
    sync::broadcast,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Error as WsError, Message as WsMsg,
        client::IntoClientRequest,
        http::{HeaderValue, StatusCode, header},
    },
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn serve(broker: &MemoryBroker, web_password: Option<&str>) -> (SocketAddr, broadcast::Sender<()>, JoinHandle<()>) {
    let server = RelayServer::bind(
        "127.0.0.1:0",
        Arc::new(broker.clone()),
        SessionSettings::default(),
        web_password.map(str::to_string),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.serve());
    (addr, shutdown, task)
}

async fn next_event(ws: &mut Client) -> Value {
    loop {
        let frame = timeout(WAIT, ws.next()).await.expect("frame in time").expect("stream open").unwrap();
        if let WsMsg::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

#[tokio::test]
async fn test_status_topic_switch_and_messages() {
    let broker = MemoryBroker::new();
    let (addr, shutdown, task) = serve(&broker, None).await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

    assert_eq!(next_event(&mut ws).await, json!({"type": "status", "connected": false, "topic": "#"}));
    assert_eq!(next_event(&mut ws).await, json!({"type": "status", "connected": true, "topic": "#"}));
    assert_eq!(next_event(&mut ws).await, json!({"type": "status", "connected": true, "topic": "#"}));

    ws.send(WsMsg::Text("".into())).await.unwrap();
    ws.send(WsMsg::Text("sensors/#".into())).await.unwrap();
    assert_eq!(next_event(&mut ws).await, json!({"type": "status", "connected": true, "topic": "sensors/#"}));
    assert_eq!(broker.subscriptions(), vec!["sensors/#".to_string()]);

    assert!(broker.publish("sensors/room1", r#"{"temp": 21.5, "window: open": true}"#));
    assert_eq!(
        next_event(&mut ws).await,
        json!({"type": "message", "topic": "sensors_room1_temp", "value": "21.5"})
    );
    assert_eq!(
        next_event(&mut ws).await,
        json!({"type": "message", "topic": "sensors_room1_windowopen", "value": "1"})
    );

    ws.close(None).await.unwrap();
    wait_until(|| !broker.is_connected()).await;

    let _ = shutdown.send(());
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_sessions_are_independent_per_client() {
    let broker_a = MemoryBroker::new();
    let (addr, shutdown, task) = serve(&broker_a, None).await;
    let (mut first, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    for _ in 0..3 {
        next_event(&mut first).await;
    }
    let (mut second, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    for _ in 0..3 {
        next_event(&mut second).await;
    }

    first.send(WsMsg::Text("a/b".into())).await.unwrap();
    assert_eq!(next_event(&mut first).await["topic"], "a/b");
    assert_eq!(broker_a.attempts().len(), 2, "one broker connection per client");

    drop(second);
    let _ = shutdown.send(());
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_password_gate() {
    let broker = MemoryBroker::new();
    let (addr, shutdown, task) = serve(&broker, Some("letmein")).await;
    let url = format!("ws://{}/ws", addr);

    match connect_async(url.as_str()).await {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("upgrade without credentials must be refused"),
    }

    let mut wrong = url.as_str().into_client_request().unwrap();
    wrong.headers_mut().insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Basic {}", STANDARD.encode("admin:nope"))).unwrap(),
    );
    assert!(connect_async(wrong).await.is_err());
    assert!(broker.attempts().is_empty(), "no session for rejected clients");

    let mut request = url.as_str().into_client_request().unwrap();
    request.headers_mut().insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Basic {}", STANDARD.encode("admin:letmein"))).unwrap(),
    );
    let (mut ws, _) = connect_async(request).await.unwrap();
    assert_eq!(next_event(&mut ws).await, json!({"type": "status", "connected": false, "topic": "#"}));

    let _ = shutdown.send(());
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_clients_and_releases_broker() {
    let broker = MemoryBroker::new();
    let (addr, shutdown, task) = serve(&broker, None).await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    for _ in 0..3 {
        next_event(&mut ws).await;
    }
    assert!(broker.is_connected());

    let _ = shutdown.send(());
    timeout(WAIT, task).await.unwrap().unwrap();
    assert!(!broker.is_connected());

    let rest = timeout(WAIT, async {
        while let Some(Ok(frame)) = ws.next().await {
            if frame.is_close() {
                return true;
            }
        }
        true
    })
    .await;
    assert!(rest.is_ok());
}
