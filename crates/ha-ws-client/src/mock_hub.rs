//! In-process hub for tests: a real websocket over `tokio::io::duplex`.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, client_async, WebSocketStream};

use crate::client::{ConnectConfig, HaClient};

pub(crate) const HA_VERSION: &str = "2024.1.0";

/// The hub's end of the socket.
pub(crate) struct MockHub {
    ws: WebSocketStream<DuplexStream>,
}

impl MockHub {
    /// Next text message from the client, parsed as JSON.
    pub(crate) async fn recv(&mut self) -> Value {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).expect("client sent invalid JSON")
                }
                Some(Ok(_)) => continue,
                other => panic!("client connection ended: {other:?}"),
            }
        }
    }

    pub(crate) async fn send(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string()))
            .await
            .expect("hub send failed");
    }

    pub(crate) async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// A connected websocket pair: the client end (not yet authenticated) and
/// the hub end.
pub(crate) async fn raw_pair() -> (WebSocketStream<DuplexStream>, MockHub) {
    let (client_io, hub_io) = tokio::io::duplex(1 << 16);
    let hub = tokio::spawn(async move { accept_async(hub_io).await.expect("hub accept failed") });
    let (ws, _response) = client_async("ws://hub.test/api/websocket", client_io)
        .await
        .expect("client handshake failed");
    let hub_ws = hub.await.expect("hub task panicked");
    (ws, MockHub { ws: hub_ws })
}

/// A ready client authenticated with `token`.
pub(crate) async fn connected(token: &str) -> (HaClient, MockHub) {
    connected_with(ConnectConfig {
        access_token: token.to_string(),
        ..Default::default()
    })
    .await
}

pub(crate) async fn connected_with(config: ConnectConfig) -> (HaClient, MockHub) {
    let (ws, mut hub) = raw_pair().await;
    let expected_token = config.access_token.clone();
    let client = HaClient::new(config);

    let auth = tokio::spawn(async move {
        hub.send(json!({"type": "auth_required", "ha_version": HA_VERSION}))
            .await;
        let msg = hub.recv().await;
        assert_eq!(msg, json!({"type": "auth", "access_token": expected_token}));
        hub.send(json!({"type": "auth_ok", "ha_version": HA_VERSION}))
            .await;
        hub
    });

    client.attach(ws).await.expect("handshake failed");
    let hub = auth.await.expect("hub auth task panicked");
    (client, hub)
}
