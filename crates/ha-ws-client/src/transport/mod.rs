//! Websocket transport for the hub's control channel.
//!
//! Accepts the hub's base URL in any of the usual spellings:
//! - `http://` / `https://` → `ws://` / `wss://`
//! - `ws://` / `wss://` → used as-is
//!
//! A URL without a path gets the API endpoint `/api/websocket` appended.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Sink, Stream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use ha_ws_core::error::{HaError, HaResult};

/// Path of the websocket endpoint on the hub.
pub const API_PATH: &str = "/api/websocket";

/// Write half of a websocket, type-erased over the underlying byte stream.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Read half of a websocket, type-erased over the underlying byte stream.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// The writer shared between callers and the dispatch loop. `None` once the
/// connection is closed.
pub(crate) type SharedSink = Arc<Mutex<Option<FrameSink>>>;

/// Turn a hub URL into the websocket endpoint URL.
pub fn websocket_url(url: &str) -> HaResult<String> {
    let url = url.trim().trim_end_matches('/');
    let lower = url.to_lowercase();

    let (scheme, rest) = if lower.starts_with("ws://") || lower.starts_with("wss://") {
        let idx = url.find("://").unwrap_or(0);
        (&lower[..idx], &url[idx + 3..])
    } else if lower.starts_with("http://") {
        ("ws", &url[7..])
    } else if lower.starts_with("https://") {
        ("wss", &url[8..])
    } else {
        return Err(HaError::Transport(format!(
            "unsupported URL scheme: {url} (expected http://, https://, ws://, or wss://)"
        )));
    };

    if rest.is_empty() || rest.starts_with('/') {
        return Err(HaError::Transport(format!("missing host in URL: {url}")));
    }

    if rest.contains('/') {
        Ok(format!("{scheme}://{rest}"))
    } else {
        Ok(format!("{scheme}://{rest}{API_PATH}"))
    }
}

/// Open a websocket to the hub. The handshake is not performed here.
pub async fn connect(url: &str) -> HaResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    let endpoint = websocket_url(url)?;

    // rustls needs a process-wide crypto provider for wss://; a second
    // install attempt fails harmlessly.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let (ws, _response) = connect_async(endpoint.as_str())
        .await
        .map_err(|e| HaError::Transport(format!("WebSocket connect error: {e}")))?;

    tracing::info!("WebSocket connected to {}", endpoint);
    Ok(ws)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_becomes_ws_with_api_path() {
        assert_eq!(
            websocket_url("http://homeassistant.local:8123").unwrap(),
            "ws://homeassistant.local:8123/api/websocket"
        );
        assert_eq!(
            websocket_url("https://ha.example.com/").unwrap(),
            "wss://ha.example.com/api/websocket"
        );
    }

    #[test]
    fn explicit_path_is_kept() {
        assert_eq!(
            websocket_url("ws://localhost:8123/api/websocket").unwrap(),
            "ws://localhost:8123/api/websocket"
        );
        assert_eq!(
            websocket_url("wss://proxy.example.com/ha/api/websocket").unwrap(),
            "wss://proxy.example.com/ha/api/websocket"
        );
    }

    #[test]
    fn ws_without_path_gets_api_path() {
        assert_eq!(
            websocket_url("WS://localhost:8123").unwrap(),
            "ws://localhost:8123/api/websocket"
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(websocket_url("ftp://example.com").is_err());
        assert!(websocket_url("homeassistant.local").is_err());
    }

    #[test]
    fn rejects_missing_host() {
        assert!(websocket_url("http://").is_err());
        assert!(websocket_url("ws:///api/websocket").is_err());
    }
}
