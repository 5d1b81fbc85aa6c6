//! Auto-reconnecting signaling transport.
//!
//! The transport owns one WebSocket-style connection at a time, identified by
//! a monotonically increasing **epoch**. Events are delivered strictly in
//! order within an epoch; nothing survives an epoch boundary, so the session
//! coordinator re-issues its state (rejoin + resync) whenever a new epoch is
//! announced.
//!
//! Disconnects come in two flavors:
//! - `disconnect()` marks the closure as intentional and suppresses any
//!   reconnect work;
//! - an unexpected drop triggers bounded, jittered exponential backoff
//!   redials, announced as `Dropped` and then either `Connected` with a new
//!   epoch or `ReconnectsExhausted`.

use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY_MS,
    DEFAULT_RECONNECT_MAX_DELAY_MS,
};
use crate::signaling::protocol::{ClientCommand, ServerEvent};

/// Default control mailbox size for the transport task.
const CTRL_CHANNEL_BUFFER: usize = 16;

/// Transport-level errors.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Could not establish a connection.
    #[error("failed to connect: {0}")]
    Connect(String),

    /// The signaling service rejected the credentials.
    #[error("signaling authentication failed: {0}")]
    Auth(String),

    /// A command was issued while no connection was up.
    #[error("not connected to the signaling service")]
    NotConnected,

    /// Writing a command onto the wire failed.
    #[error("send failed: {0}")]
    Send(String),

    /// A frame could not be parsed as a known event.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport task is no longer running.
    #[error("transport task unavailable")]
    TaskGone,
}

/// Notifications from the transport task to the session coordinator.
#[derive(Debug)]
pub enum TransportEvent {
    /// A connection epoch is live. Epochs only grow.
    Connected { epoch: u64 },
    /// An inbound signaling event, ordered within its epoch.
    Event(ServerEvent),
    /// The connection dropped unexpectedly; redialing has started.
    Dropped { epoch: u64, reason: String },
    /// Redialing gave up; the drop is now surfaced to the caller.
    ReconnectsExhausted { reason: String },
    /// An intentional disconnect completed.
    Closed,
}

/// Dials one connection and hands back its two directed halves.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn CommandSink>, Box<dyn EventSource>), TransportError>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait CommandSink: Send {
    async fn send(&mut self, command: ClientCommand) -> Result<(), TransportError>;
    async fn close(&mut self);
}

/// Inbound half of a connection. `None` means the remote closed.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Option<Result<ServerEvent, TransportError>>;
}

/// Reconnect backoff policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS),
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before redial `attempt` (1-based): exponential growth capped at
    /// `max_delay`, randomized into the upper half of the window so a herd of
    /// clients does not redial in lockstep.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let cap = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);

        let shift = attempt.saturating_sub(1).min(16);
        let exp = base.saturating_mul(1u64 << shift).min(cap);
        let jitter = rand::thread_rng().gen_range(0..=exp / 2);
        Duration::from_millis(exp / 2 + jitter)
    }
}

enum Ctrl {
    Connect {
        respond_to: oneshot::Sender<Result<u64, TransportError>>,
    },
    Disconnect {
        respond_to: oneshot::Sender<()>,
    },
}

type SharedSink = Arc<Mutex<Option<Box<dyn CommandSink>>>>;

/// Handle to the transport task.
pub struct SignalingTransport {
    ctrl_tx: mpsc::Sender<Ctrl>,
    sink: SharedSink,
}

impl SignalingTransport {
    /// Spawn the transport task.
    ///
    /// Inbound notifications arrive on `events`; `cancel` stops the task.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        events: mpsc::Sender<TransportEvent>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (ctrl_tx, ctrl_rx) = mpsc::channel(CTRL_CHANNEL_BUFFER);
        let sink: SharedSink = Arc::new(Mutex::new(None));

        let task = TransportTask {
            connector,
            policy,
            ctrl_rx,
            events,
            sink: Arc::clone(&sink),
            cancel,
            epoch: 0,
        };

        let task_handle = tokio::spawn(task.run());

        (Self { ctrl_tx, sink }, task_handle)
    }

    /// Establish a connection, returning the live epoch.
    ///
    /// Idempotent: if a connection is already up, returns its epoch. The
    /// first dial fails fast (no retries) so credential problems surface to
    /// the join caller immediately.
    pub async fn connect(&self) -> Result<u64, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.ctrl_tx
            .send(Ctrl::Connect { respond_to: tx })
            .await
            .map_err(|_| TransportError::TaskGone)?;
        rx.await.map_err(|_| TransportError::TaskGone)?
    }

    /// Send a command over the current connection.
    ///
    /// Fire-and-forget at the protocol level; the returned error only
    /// reflects local write failures, which the caller surfaces as
    /// per-peer signaling errors.
    pub async fn send(&self, command: ClientCommand) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            None => Err(TransportError::NotConnected),
            Some(sink) => sink.send(command).await,
        }
    }

    /// Close the connection intentionally. No reconnect will be attempted.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .ctrl_tx
            .send(Ctrl::Disconnect { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Whether a connection is currently up.
    pub async fn is_connected(&self) -> bool {
        self.sink.lock().await.is_some()
    }
}

enum Drive {
    /// Intentional disconnect; go back to idle.
    Intentional,
    /// Unexpected drop with a reason; start redialing.
    Dropped(String),
    /// The task should stop.
    Stop,
}

enum Redial {
    Connected(Box<dyn EventSource>),
    GaveUp(String),
    Disconnected,
    Stop,
}

struct TransportTask {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    ctrl_rx: mpsc::Receiver<Ctrl>,
    events: mpsc::Sender<TransportEvent>,
    sink: SharedSink,
    cancel: CancellationToken,
    epoch: u64,
}

impl TransportTask {
    async fn run(mut self) {
        loop {
            // Idle until someone asks for a connection.
            let respond_to = tokio::select! {
                () = self.cancel.cancelled() => break,
                ctrl = self.ctrl_rx.recv() => match ctrl {
                    None => break,
                    Some(Ctrl::Connect { respond_to }) => respond_to,
                    Some(Ctrl::Disconnect { respond_to }) => {
                        let _ = respond_to.send(());
                        continue;
                    }
                },
            };

            match self.open().await {
                Ok(source) => {
                    let _ = respond_to.send(Ok(self.epoch));
                    if self.emit(TransportEvent::Connected { epoch: self.epoch }).await.is_err() {
                        break;
                    }
                    if !self.connected_phase(source).await {
                        break;
                    }
                }
                Err(e) => {
                    let _ = respond_to.send(Err(e));
                }
            }
        }

        self.take_sink().await;
        debug!(target: "session.transport", "transport task stopped");
    }

    /// Service one connection, redialing across unexpected drops.
    /// Returns false when the task should stop.
    async fn connected_phase(&mut self, mut source: Box<dyn EventSource>) -> bool {
        loop {
            let outcome = self.drive(source.as_mut()).await;
            if let Some(mut sink) = self.take_sink().await {
                sink.close().await;
            }

            match outcome {
                Drive::Stop => return false,
                Drive::Intentional => {
                    info!(target: "session.transport", epoch = self.epoch, "disconnected intentionally");
                    return self.emit(TransportEvent::Closed).await.is_ok();
                }
                Drive::Dropped(reason) => {
                    warn!(
                        target: "session.transport",
                        epoch = self.epoch,
                        reason = %reason,
                        "connection dropped, redialing"
                    );
                    if self
                        .emit(TransportEvent::Dropped {
                            epoch: self.epoch,
                            reason,
                        })
                        .await
                        .is_err()
                    {
                        return false;
                    }

                    match self.redial().await {
                        Redial::Connected(new_source) => {
                            source = new_source;
                        }
                        Redial::GaveUp(reason) => {
                            return self
                                .emit(TransportEvent::ReconnectsExhausted { reason })
                                .await
                                .is_ok();
                        }
                        Redial::Disconnected => {
                            return self.emit(TransportEvent::Closed).await.is_ok();
                        }
                        Redial::Stop => return false,
                    }
                }
            }
        }
    }

    /// Pump events and control messages for one live connection.
    async fn drive(&mut self, source: &mut dyn EventSource) -> Drive {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Drive::Stop,

                ctrl = self.ctrl_rx.recv() => match ctrl {
                    None => return Drive::Stop,
                    Some(Ctrl::Connect { respond_to }) => {
                        // Already connected; report the live epoch.
                        let _ = respond_to.send(Ok(self.epoch));
                    }
                    Some(Ctrl::Disconnect { respond_to }) => {
                        // Clear the sink before acknowledging so callers
                        // observe the disconnected state immediately.
                        if let Some(mut sink) = self.take_sink().await {
                            sink.close().await;
                        }
                        let _ = respond_to.send(());
                        return Drive::Intentional;
                    }
                },

                event = source.next_event() => match event {
                    Some(Ok(event)) => {
                        if self.events.send(TransportEvent::Event(event)).await.is_err() {
                            return Drive::Stop;
                        }
                    }
                    Some(Err(e)) => return Drive::Dropped(e.to_string()),
                    None => return Drive::Dropped("connection closed by remote".to_string()),
                },
            }
        }
    }

    /// Redial with bounded, jittered backoff.
    async fn redial(&mut self) -> Redial {
        let mut attempt: u32 = 1;
        loop {
            if attempt > self.policy.max_attempts {
                return Redial::GaveUp(format!(
                    "gave up after {} redial attempts",
                    self.policy.max_attempts
                ));
            }

            let delay = self.policy.backoff_delay(attempt);
            debug!(
                target: "session.transport",
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "waiting before redial"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return Redial::Stop,

                ctrl = self.ctrl_rx.recv() => match ctrl {
                    None => return Redial::Stop,
                    Some(Ctrl::Disconnect { respond_to }) => {
                        let _ = respond_to.send(());
                        return Redial::Disconnected;
                    }
                    // An explicit connect request skips the remaining backoff.
                    Some(Ctrl::Connect { respond_to }) => match self.open().await {
                        Ok(source) => {
                            let _ = respond_to.send(Ok(self.epoch));
                            if self.emit(TransportEvent::Connected { epoch: self.epoch }).await.is_err() {
                                return Redial::Stop;
                            }
                            return Redial::Connected(source);
                        }
                        Err(e) => {
                            let _ = respond_to.send(Err(e));
                            attempt += 1;
                        }
                    },
                },

                () = tokio::time::sleep(delay) => match self.open().await {
                    Ok(source) => {
                        if self.emit(TransportEvent::Connected { epoch: self.epoch }).await.is_err() {
                            return Redial::Stop;
                        }
                        return Redial::Connected(source);
                    }
                    Err(e) => {
                        debug!(
                            target: "session.transport",
                            attempt,
                            error = %e,
                            "redial attempt failed"
                        );
                        attempt += 1;
                    }
                },
            }
        }
    }

    /// Dial a fresh connection and install its sink under a new epoch.
    async fn open(&mut self) -> Result<Box<dyn EventSource>, TransportError> {
        let (sink, source) = self.connector.connect().await?;
        self.epoch += 1;
        *self.sink.lock().await = Some(sink);
        info!(target: "session.transport", epoch = self.epoch, "connected");
        Ok(source)
    }

    async fn take_sink(&self) -> Option<Box<dyn CommandSink>> {
        self.sink.lock().await.take()
    }

    /// Forward a notification; a closed channel means the session is gone
    /// and the task can stop.
    async fn emit(&self, event: TransportEvent) -> Result<(), ()> {
        self.events.send(event).await.map_err(|_| ())
    }
}

// ===== WebSocket connector =====

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production [`Connector`]: a WebSocket client authenticating with a bearer
/// token, exchanging JSON text frames.
pub struct WsConnector {
    url: String,
    access_token: SecretString,
}

impl WsConnector {
    #[must_use]
    pub fn new(url: impl Into<String>, access_token: SecretString) -> Self {
        Self {
            url: url.into(),
            access_token,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn CommandSink>, Box<dyn EventSource>), TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("invalid signaling url: {e}")))?;

        let header =
            HeaderValue::from_str(&format!("Bearer {}", self.access_token.expose_secret()))
                .map_err(|e| TransportError::Connect(format!("invalid access token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        let (stream, _response) = connect_async(request).await.map_err(|e| match &e {
            tungstenite::Error::Http(resp)
                if resp.status() == StatusCode::UNAUTHORIZED
                    || resp.status() == StatusCode::FORBIDDEN =>
            {
                TransportError::Auth(resp.status().to_string())
            }
            _ => TransportError::Connect(e.to_string()),
        })?;

        let (write, read) = stream.split();
        Ok((
            Box::new(WsCommandSink { inner: write }),
            Box::new(WsEventSource { inner: read }),
        ))
    }
}

struct WsCommandSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl CommandSink for WsCommandSink {
    async fn send(&mut self, command: ClientCommand) -> Result<(), TransportError> {
        let text = serde_json::to_string(&command)
            .map_err(|e| TransportError::Protocol(format!("encode failed: {e}")))?;
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.inner.close().await;
    }
}

struct WsEventSource {
    inner: SplitStream<WsStream>,
}

fn parse_event(text: &str) -> Result<ServerEvent, TransportError> {
    serde_json::from_str(text).map_err(|e| TransportError::Protocol(format!("bad event: {e}")))
}

#[async_trait]
impl EventSource for WsEventSource {
    async fn next_event(&mut self) -> Option<Result<ServerEvent, TransportError>> {
        loop {
            match self.inner.next().await {
                None => return None,
                Some(Ok(Message::Text(text))) => return Some(parse_event(&text)),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Some(parse_event(&text)),
                    Err(e) => {
                        return Some(Err(TransportError::Protocol(format!(
                            "non-utf8 frame: {e}"
                        ))))
                    }
                },
                Some(Ok(Message::Close(_))) => return None,
                // Ping/pong and raw frames are handled by the library.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some(Err(TransportError::Protocol(e.to_string()))),
            }
        }
    }
}
