//! WebSocket session runtime (`spec.md` §4.1).
//!
//! Grounded on the teacher's `input/connection.rs` `ConnectionManager` (connect timeout,
//! exponential-ish backoff, circuit breaker, reconnect loop) generalized with an explicit
//! RPC correlation map and a venue-supplied [`FrameRouter`] so one runtime serves every
//! venue's envelope shape. Subscription state is deliberately NOT kept here: per
//! `spec.md` §3 a subscription is "held in the adapter so resubscribe is a pure function
//! of its state" — this session only tells the adapter *when* to replay it, via
//! [`SessionEvent::Reconnected`].

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::pending::PendingCalls;
use crate::state::SessionState;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use md_types::{MdError, VenueId};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Venue-supplied hook that lets one session runtime serve every envelope shape.
pub trait FrameRouter: Send + Sync {
    /// `Some(id)` when this frame is the response to a previously issued [`Session::call`].
    fn correlation_id(&self, frame: &serde_json::Value) -> Option<u64>;
    /// Recognize heartbeat sentinels before JSON parsing (textual `"pong"`, `{"op":"pong"}`, ...).
    fn is_heartbeat(&self, raw: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    pub ping_payload: String,
    pub reconnect: bool,
    pub reconnect_base_delay: Duration,
    pub max_backoff: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(20),
            ping_payload: "ping".to_string(),
            reconnect: true,
            reconnect_base_delay: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_reconnect_attempts: 10,
        }
    }
}

/// Out-of-band notifications the session delivers to its owning adapter.
pub enum SessionEvent {
    /// A non-RPC frame (event or control) the adapter must classify and handle.
    Message(serde_json::Value),
    /// A read/parse error surfaced for logging; not necessarily fatal.
    Error(MdError),
    /// The socket dropped; the adapter should stop emitting for this venue's symbols
    /// until `Reconnected` arrives.
    Disconnected,
    /// Reconnect succeeded and the session is back in `Open`. The adapter must
    /// re-authenticate (if private) and replay its subscriptions, then call
    /// [`Session::mark_live`].
    Reconnected,
    /// Reconnect attempts exhausted; the session is now terminally `Failing`.
    ReconnectExhausted,
}

pub struct Session {
    venue: VenueId,
    config: SessionConfig,
    state: RwLock<SessionState>,
    writer: Mutex<Option<WsSink>>,
    reader: Mutex<Option<WsSource>>,
    pending: PendingCalls,
    circuit_breaker: CircuitBreaker,
    router: Box<dyn FrameRouter>,
    events: mpsc::Sender<SessionEvent>,
}

impl Session {
    /// Open a new session and start its reader and ping tasks. Returns once the initial
    /// connection succeeds; the session starts in `Open` — callers authenticate (if
    /// private) and call [`Session::mark_live`] before sending application frames.
    pub async fn open(
        venue: VenueId,
        config: SessionConfig,
        router: Box<dyn FrameRouter>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Arc<Session>, MdError> {
        let session = Arc::new(Session {
            venue,
            config,
            state: RwLock::new(SessionState::Closed),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            pending: PendingCalls::new(),
            circuit_breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            router,
            events,
        });

        session.connect().await?;

        let reader_session = session.clone();
        tokio::spawn(async move { reader_session.run().await });

        let ping_session = session.clone();
        tokio::spawn(async move { ping_session.ping_loop().await });

        Ok(session)
    }

    async fn connect(&self) -> Result<(), MdError> {
        if !self.circuit_breaker.should_attempt().await {
            return Err(MdError::ConnectionFailed {
                venue: self.venue,
                reason: "circuit breaker open".to_string(),
            });
        }

        *self.state.write().await = SessionState::Connecting;
        tracing::info!(venue = %self.venue, url = %self.config.url, "connecting");

        match timeout(self.config.connect_timeout, connect_async(&self.config.url)).await {
            Ok(Ok((ws_stream, _response))) => {
                let (sink, stream) = ws_stream.split();
                *self.writer.lock().await = Some(sink);
                *self.reader.lock().await = Some(stream);
                *self.state.write().await = SessionState::Open;
                self.circuit_breaker.on_success().await;
                Ok(())
            }
            Ok(Err(e)) => {
                self.circuit_breaker.on_failure().await;
                *self.state.write().await = SessionState::Closed;
                Err(MdError::ConnectionFailed {
                    venue: self.venue,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                self.circuit_breaker.on_failure().await;
                *self.state.write().await = SessionState::Closed;
                Err(MdError::ConnectionTimeout {
                    venue: self.venue,
                    timeout_ms: self.config.connect_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Transition to `Live`, the only state accepting application sends. Called by the
    /// adapter after open (public streams) or after a successful auth ack (private).
    pub async fn mark_live(&self) {
        *self.state.write().await = SessionState::Live;
    }

    /// Begin the post-open auth handshake: send `login_frame`, wait up to `ack_timeout`
    /// for a response correlated through the same [`FrameRouter`] used for RPCs.
    pub async fn authenticate(
        &self,
        login_frame: serde_json::Value,
        ack_timeout: Duration,
    ) -> Result<(), MdError> {
        *self.state.write().await = SessionState::AuthPending;
        let (id, rx) = self.pending.register();
        if let Err(e) = self.send_value(&login_frame).await {
            self.pending.cancel(id);
            return Err(e);
        }
        match timeout(ack_timeout, rx).await {
            Ok(Ok(_ack)) => {
                *self.state.write().await = SessionState::Authed;
                Ok(())
            }
            Ok(Err(_)) => Err(MdError::AuthenticationFailed {
                venue: self.venue,
                reason: "session closed while awaiting auth ack".to_string(),
            }),
            Err(_) => {
                self.pending.cancel(id);
                Err(MdError::AuthenticationFailed {
                    venue: self.venue,
                    reason: format!("no ack within {}ms", ack_timeout.as_millis()),
                })
            }
        }
    }

    /// Serialize and write one frame. Only accepted while `Live`.
    pub async fn send(&self, frame: serde_json::Value) -> Result<(), MdError> {
        if !self.state.read().await.accepts_sends() {
            return Err(MdError::Disconnected { venue: self.venue });
        }
        self.send_value(&frame).await
    }

    /// Attach a correlation id (via `build_frame`), send, and await the matching
    /// response or timeout.
    pub async fn call(
        &self,
        build_frame: impl FnOnce(u64) -> serde_json::Value,
        rpc_timeout: Duration,
    ) -> Result<serde_json::Value, MdError> {
        let (id, rx) = self.pending.register();
        let frame = build_frame(id);
        if let Err(e) = self.send_value(&frame).await {
            self.pending.cancel(id);
            return Err(e);
        }
        match timeout(rpc_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(MdError::Disconnected { venue: self.venue }),
            Err(_) => {
                self.pending.cancel(id);
                Err(MdError::RpcTimeout {
                    timeout_ms: rpc_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Idempotent shutdown: cancels the read/ping tasks' ability to keep going, drains
    /// pending calls with `Disconnected`, and closes the socket if still open.
    pub async fn close(&self) {
        *self.state.write().await = SessionState::Closing;
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.close().await;
        }
        self.reader.lock().await.take();
        self.pending.drain();
        *self.state.write().await = SessionState::Closed;
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn send_value(&self, frame: &serde_json::Value) -> Result<(), MdError> {
        let text = serde_json::to_string(frame)?;
        self.send_raw_text(text).await
    }

    async fn send_raw_text(&self, text: String) -> Result<(), MdError> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(sink) => sink
                .send(Message::Text(text))
                .await
                .map_err(|e| MdError::ConnectionFailed {
                    venue: self.venue,
                    reason: e.to_string(),
                }),
            None => Err(MdError::Disconnected { venue: self.venue }),
        }
    }

    async fn ping_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.ping_interval);
        loop {
            interval.tick().await;
            let state = self.state().await;
            if state.is_terminal() {
                return;
            }
            if matches!(
                state,
                SessionState::Open | SessionState::AuthPending | SessionState::Authed | SessionState::Live
            ) {
                if let Err(e) = self.send_raw_text(self.config.ping_payload.clone()).await {
                    tracing::debug!(venue = %self.venue, error = %e, "ping send failed");
                }
            }
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            let stream = match self.reader.lock().await.take() {
                Some(stream) => stream,
                None => return,
            };

            self.read_until_error(stream).await;

            self.pending.drain();
            let _ = self.events.send(SessionEvent::Disconnected).await;

            if !self.config.reconnect {
                *self.state.write().await = SessionState::Closed;
                return;
            }

            if self.reconnect_with_backoff().await {
                let _ = self.events.send(SessionEvent::Reconnected).await;
            } else {
                *self.state.write().await = SessionState::Failing;
                let _ = self.events.send(SessionEvent::ReconnectExhausted).await;
                return;
            }
        }
    }

    async fn read_until_error(&self, mut stream: WsSource) {
        while let Some(next) = stream.next().await {
            match next {
                Ok(Message::Text(text)) => self.handle_text(text).await,
                Ok(Message::Binary(bytes)) => {
                    // None of this framework's five venues send compressed binary
                    // frames on their futures streams, so binary frames are treated as
                    // UTF-8 text directly rather than attempting inflate/gunzip.
                    self.handle_text(String::from_utf8_lossy(&bytes).into_owned()).await;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!(venue = %self.venue, error = %e, "websocket read error");
                    let _ = self
                        .events
                        .send(SessionEvent::Error(MdError::Disconnected { venue: self.venue }))
                        .await;
                    break;
                }
            }
        }
    }

    async fn handle_text(&self, text: String) {
        if self.router.is_heartbeat(&text) {
            return;
        }
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => self.dispatch(value).await,
            Err(e) => {
                let _ = self.events.send(SessionEvent::Error(MdError::from(e))).await;
            }
        }
    }

    async fn dispatch(&self, value: serde_json::Value) {
        if let Some(id) = self.router.correlation_id(&value) {
            if self.pending.resolve(id, value) {
                return;
            }
        }
        let _ = self.events.send(SessionEvent::Message(value)).await;
    }

    async fn reconnect_with_backoff(&self) -> bool {
        for attempt in 1..=self.config.max_reconnect_attempts {
            let backoff = self.backoff_for_attempt(attempt);
            tracing::info!(
                venue = %self.venue,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "reconnecting"
            );
            tokio::time::sleep(backoff).await;
            if self.connect().await.is_ok() {
                return true;
            }
        }
        false
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(6);
        let scaled = self.config.reconnect_base_delay.as_millis() as u64 * 2u64.pow(exponent);
        Duration::from_millis(scaled).min(self.config.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoRouter;
    impl FrameRouter for EchoRouter {
        fn correlation_id(&self, frame: &serde_json::Value) -> Option<u64> {
            frame.get("id").and_then(|v| v.as_u64())
        }
        fn is_heartbeat(&self, raw: &str) -> bool {
            raw == "pong" || raw == r#"{"op":"pong"}"#
        }
    }

    #[test]
    fn backoff_is_capped() {
        let config = SessionConfig {
            reconnect_base_delay: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            ..Default::default()
        };
        let (tx, _rx) = mpsc::channel(1);
        let session = Session {
            venue: VenueId::Binance,
            config,
            state: RwLock::new(SessionState::Closed),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            pending: PendingCalls::new(),
            circuit_breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            router: Box::new(EchoRouter),
            events: tx,
        };
        assert!(session.backoff_for_attempt(20) <= Duration::from_secs(5));
    }
}
