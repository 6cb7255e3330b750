//! The connection's single reader task.
//!
//! Pulls frames off the websocket and routes every message to the registry
//! entry matching its id. This loop is the only place entries get resolved.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use ha_ws_core::codec::split_frames;
use ha_ws_core::error::HaError;
use ha_ws_core::messages::Frame;

use crate::client::ConnectionState;
use crate::registry::{Registry, Reply};
use crate::transport::{FrameStream, SharedSink};

/// Run until the transport ends, then close the connection and drain the
/// registry.
pub(crate) async fn dispatch_loop(
    mut stream: FrameStream,
    writer: SharedSink,
    registry: Arc<Registry>,
    state: Arc<Mutex<ConnectionState>>,
) {
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                debug!(?frame, "WebSocket close frame received");
                break;
            }
            // tungstenite answers transport-level pings on its own.
            Ok(_) => continue,
            Err(e) => {
                warn!("WebSocket read error: {}", e);
                break;
            }
        };

        route_text(&text, &registry).await;
    }

    {
        let mut state = state.lock().await;
        if *state != ConnectionState::Closed {
            *state = ConnectionState::Closed;
            info!("connection closed by hub");
        }
    }
    // No new call may reach the wire once the reader is gone.
    writer.lock().await.take();

    let drained = registry.drain_all(HaError::TransportClosed).await;
    debug!(drained, "dispatch loop ended");
}

/// Decode one text frame and route every message it carries.
pub(crate) async fn route_text(text: &str, registry: &Registry) {
    let frames = match split_frames(text) {
        Ok(frames) => frames,
        Err(e) => {
            warn!("dropping undecodable frame: {}", e);
            return;
        }
    };

    for frame in frames {
        match frame {
            Ok(frame) => route_frame(frame, registry).await,
            Err(e) => warn!("dropping undecodable message: {}", e),
        }
    }
}

async fn route_frame(frame: Frame, registry: &Registry) {
    let (id, reply) = match frame {
        Frame::Result { id, outcome } => (id, Reply::Result(outcome.map_err(HaError::from))),
        Frame::Pong { id } => (id, Reply::Result(Ok(Value::Null))),
        Frame::Event { id, event } => (id, Reply::Event(event)),
        Frame::Unknown { id, msg_type } => {
            debug!(?id, msg_type = %msg_type, "ignoring unhandled message type");
            return;
        }
        other => {
            warn!("unexpected handshake message on a ready connection: {:?}", other);
            return;
        }
    };

    if !registry.resolve(id, reply).await {
        debug!(id, "dropping orphan frame");
    }
}
