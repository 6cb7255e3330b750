//! The Home Assistant WebSocket client.
//!
//! `HaClient` owns the connection lifecycle: transport, authentication
//! handshake, the dispatch loop, keepalive, and the call/subscribe facade
//! that multiplexes every exchange over one socket.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, trace, warn};

use ha_ws_core::codec::{decode_frames, encode_auth, encode_call};
use ha_ws_core::error::{HaError, HaResult};
use ha_ws_core::messages::Frame;

use crate::dispatch;
use crate::registry::{Callback, Registry, ReplyReceiver};
use crate::subscription::Subscription;
use crate::transport::{self, FrameSink, FrameStream, SharedSink};

/// Configuration for connecting to a hub.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Long-lived access token sent in the `auth` message.
    pub access_token: String,
    /// Upper bound on the whole authentication handshake.
    pub handshake_timeout: Duration,
    /// Default timeout used by the [`crate::api`] helpers.
    pub call_timeout: Duration,
    /// Interval between keepalive pings (`None` = disabled).
    pub ping_interval: Option<Duration>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            handshake_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
            ping_interval: None,
        }
    }
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport yet.
    Disconnected,
    /// Transport open, handshake in progress.
    Authenticating,
    /// Handshake done; calls may be issued.
    Ready,
    /// Terminal. Every outstanding entry has been released.
    Closed,
}

/// What a request leaves behind in the registry.
enum Pending {
    Waiter,
    Subscription(Callback),
}

/// Shared connection internals. Subscriptions and the keepalive task hold a
/// reference so they can issue calls on their own.
pub(crate) struct Inner {
    config: ConnectConfig,
    state: Arc<Mutex<ConnectionState>>,
    pub(crate) registry: Arc<Registry>,
    writer: SharedSink,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    ha_version: Mutex<Option<String>>,
}

/// A connection to a Home Assistant hub.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct HaClient {
    inner: Arc<Inner>,
}

impl HaClient {
    /// Create a client in the `Disconnected` state.
    pub fn new(config: ConnectConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
                registry: Arc::new(Registry::new()),
                writer: Arc::new(Mutex::new(None)),
                tasks: Mutex::new(Vec::new()),
                ha_version: Mutex::new(None),
            }),
        }
    }

    /// Connect to a hub and authenticate.
    pub async fn connect(url: &str, config: ConnectConfig) -> HaResult<Self> {
        let client = Self::new(config);
        client.open(url).await?;
        Ok(client)
    }

    /// Open a websocket to `url` and authenticate over it.
    pub async fn open(&self, url: &str) -> HaResult<()> {
        let ws = transport::connect(url).await?;
        self.attach(ws).await
    }

    /// Authenticate over an already-open websocket and start the dispatch
    /// loop. Works over any async byte stream.
    pub async fn attach<S>(&self, ws: WebSocketStream<S>) -> HaResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock().await;
            if *state != ConnectionState::Disconnected {
                return Err(HaError::InvalidState(format!(
                    "cannot attach a transport in state {:?}",
                    *state
                )));
            }
            *state = ConnectionState::Authenticating;
        }

        let (sink, stream) = ws.split();
        let mut sink: FrameSink = Box::pin(sink);
        let mut stream: FrameStream = Box::pin(stream);

        let result = time::timeout(
            self.inner.config.handshake_timeout,
            handshake(&mut sink, &mut stream, &self.inner.config.access_token),
        )
        .await
        .unwrap_or(Err(HaError::Timeout));

        let ha_version = match result {
            Ok(version) => version,
            Err(e) => {
                warn!("handshake failed: {}", e);
                *self.inner.state.lock().await = ConnectionState::Closed;
                let _ = sink.close().await;
                return Err(e);
            }
        };

        *self.inner.writer.lock().await = Some(sink);
        *self.inner.ha_version.lock().await = ha_version.clone();

        let mut tasks = vec![tokio::spawn(dispatch::dispatch_loop(
            stream,
            self.inner.writer.clone(),
            self.inner.registry.clone(),
            self.inner.state.clone(),
        ))];
        if let Some(interval) = self.inner.config.ping_interval {
            tasks.push(spawn_keepalive(Arc::downgrade(&self.inner), interval));
        }

        {
            let mut state = self.inner.state.lock().await;
            if *state != ConnectionState::Authenticating {
                // Closed while the handshake was running.
                drop(state);
                for task in &tasks {
                    task.abort();
                }
                if let Some(mut sink) = self.inner.writer.lock().await.take() {
                    let _ = sink.close().await;
                }
                return Err(HaError::TransportClosed);
            }
            *state = ConnectionState::Ready;
        }
        self.inner.tasks.lock().await.extend(tasks);

        info!(ha_version = ?ha_version, "authenticated");
        Ok(())
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.lock().await
    }

    /// Whether calls may be issued.
    pub async fn is_ready(&self) -> bool {
        self.state().await == ConnectionState::Ready
    }

    /// Hub version reported during the handshake.
    pub async fn ha_version(&self) -> Option<String> {
        self.inner.ha_version.lock().await.clone()
    }

    /// Timeout the [`crate::api`] helpers use.
    pub fn default_timeout(&self) -> Duration {
        self.inner.config.call_timeout
    }

    /// Number of calls and subscriptions still outstanding.
    pub async fn outstanding(&self) -> usize {
        self.inner.registry.len().await
    }

    /// Issue a call and wait for its reply.
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> HaResult<Value> {
        self.inner.call(method, params, timeout).await
    }

    /// Issue a call and decode the reply into `T`.
    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> HaResult<T> {
        let raw = self.call(method, params, timeout).await?;
        decode_payload(method, raw)
    }

    /// Start a subscription. `callback` runs once per event, in order, until
    /// the returned [`Subscription`] is cancelled or the connection closes.
    ///
    /// Only the subscribe acknowledgement is awaited (bounded by `timeout`).
    pub async fn subscribe<F>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        callback: F,
    ) -> HaResult<Subscription>
    where
        F: FnMut(Value) + Send + 'static,
    {
        let inner = &self.inner;
        inner.ensure_ready().await?;

        let (id, ack_rx) = inner
            .send_request(method, &params, Pending::Subscription(Box::new(callback)))
            .await?;
        debug!(id, method, "subscribe sent");

        let ack = match time::timeout(timeout, ack_rx).await {
            Ok(Ok(Ok(ack))) => ack,
            Ok(Ok(Err(e))) => {
                inner.registry.remove(id).await;
                return Err(e);
            }
            Ok(Err(_)) => {
                inner.registry.remove(id).await;
                return Err(HaError::TransportClosed);
            }
            Err(_) => {
                inner.registry.remove(id).await;
                warn!(id, method, "subscribe acknowledgement timed out");
                return Err(HaError::Timeout);
            }
        };

        Ok(Subscription::new(id, ack, self.inner.clone()))
    }

    /// Close the connection. Outstanding calls fail with `TransportClosed`,
    /// subscriptions stop. Closing again is a no-op.
    pub async fn close(&self) -> HaResult<()> {
        self.inner.close().await
    }
}

impl Inner {
    async fn ensure_ready(&self) -> HaResult<()> {
        match *self.state.lock().await {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Closed => Err(HaError::TransportClosed),
            ConnectionState::Disconnected | ConnectionState::Authenticating => {
                Err(HaError::NotReady)
            }
        }
    }

    pub(crate) async fn is_ready(&self) -> bool {
        *self.state.lock().await == ConnectionState::Ready
    }

    pub(crate) fn call_timeout(&self) -> Duration {
        self.config.call_timeout
    }

    pub(crate) async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> HaResult<Value> {
        self.ensure_ready().await?;

        let (id, rx) = self.send_request(method, &params, Pending::Waiter).await?;
        debug!(id, method, "call sent");

        match time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // The sender went away without an answer.
            Ok(Err(_)) => Err(HaError::TransportClosed),
            Err(_) => {
                // A late reply for this id becomes an orphan.
                self.registry.remove(id).await;
                warn!(id, method, "call timed out");
                Err(HaError::Timeout)
            }
        }
    }

    /// Allocate an id, register the pending entry and write the request.
    ///
    /// All three happen under the writer lock, so ids reach the wire in the
    /// order they were allocated; the hub rejects an id that is not greater
    /// than the last one it saw.
    async fn send_request(
        &self,
        method: &str,
        params: &Value,
        pending: Pending,
    ) -> HaResult<(u64, ReplyReceiver)> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(HaError::TransportClosed)?;

        let id = self.registry.allocate();
        let text = encode_call(id, method, params)?;
        let rx = match pending {
            Pending::Waiter => self.registry.register_waiter(id).await?,
            Pending::Subscription(callback) => {
                self.registry.register_subscription(id, callback).await?
            }
        };

        let sent = sink.send(Message::Text(text)).await;
        drop(writer);
        if let Err(e) = sent {
            self.registry.remove(id).await;
            return Err(HaError::Transport(format!("WebSocket send error: {e}")));
        }
        Ok((id, rx))
    }

    async fn close(&self) -> HaResult<()> {
        {
            let mut state = self.state.lock().await;
            if *state == ConnectionState::Closed {
                return Ok(());
            }
            *state = ConnectionState::Closed;
        }

        if let Some(mut sink) = self.writer.lock().await.take() {
            if let Err(e) = sink.send(Message::Close(None)).await {
                debug!("close frame not sent: {}", e);
            }
            let _ = sink.close().await;
        }

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        let drained = self.registry.drain_all(HaError::TransportClosed).await;
        info!(drained, "connection closed");
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Decode a raw payload into the caller's expected shape.
pub(crate) fn decode_payload<T: DeserializeOwned>(what: &str, raw: Value) -> HaResult<T> {
    serde_json::from_value(raw).map_err(|e| HaError::Decode(format!("{what}: {e}")))
}

/// Perform the handshake: auth_required -> auth -> auth_ok.
///
/// Returns the hub version it reported.
async fn handshake(
    sink: &mut FrameSink,
    stream: &mut FrameStream,
    access_token: &str,
) -> HaResult<Option<String>> {
    match next_frame(stream).await? {
        Frame::AuthRequired { ha_version } => {
            debug!(ha_version = ?ha_version, "hub requires authentication");
        }
        other => {
            return Err(HaError::InvalidMessage(format!(
                "expected auth_required, got {other:?}"
            )))
        }
    }

    sink.send(Message::Text(encode_auth(access_token)?))
        .await
        .map_err(|e| HaError::Transport(format!("WebSocket send error: {e}")))?;

    match next_frame(stream).await? {
        Frame::AuthOk { ha_version } => Ok(ha_version),
        Frame::AuthInvalid { message } => Err(HaError::AuthenticationFailed(message)),
        other => Err(HaError::InvalidMessage(format!(
            "expected auth_ok or auth_invalid, got {other:?}"
        ))),
    }
}

/// Read the next message during the handshake, skipping non-text frames.
async fn next_frame(stream: &mut FrameStream) -> HaResult<Frame> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Some(frame) = decode_frames(&text)?.into_iter().next() {
                    return Ok(frame);
                }
            }
            Some(Ok(Message::Close(_))) | None => return Err(HaError::TransportClosed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(HaError::Transport(format!("WebSocket read error: {e}"))),
        }
    }
}

/// Periodically ping the hub. Ends when the connection goes away.
fn spawn_keepalive(inner: Weak<Inner>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.tick().await; // skip first immediate tick

        loop {
            ticker.tick().await;

            let Some(inner) = inner.upgrade() else {
                break;
            };
            match inner.call("ping", Value::Null, interval).await {
                Ok(_) => trace!("keepalive pong"),
                Err(HaError::TransportClosed) | Err(HaError::NotReady) => break,
                Err(e) => warn!("keepalive ping failed: {}", e),
            }
        }

        debug!("keepalive loop ended");
    })
}
