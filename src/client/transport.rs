//! Client transport adapter: one realtime channel to the relay.
//!
//! The transport owns exactly one WebSocket at a time and moves through an
//! explicit state machine: Disconnected → Connecting → Connected →
//! (Disconnected | Failed). Abnormal closes drive the reconnection policy;
//! a user-initiated disconnect cleans the policy up first so no scheduled
//! retry can fire afterwards.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

use crate::core::bridge::{BridgeError, BridgeResult, ClientEvent, ConnectionState};
use crate::core::policy::{ReconnectConfig, ReconnectPolicy};

use super::Notifier;

/// Channel capacity for outbound client frames.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Handler for inbound relay frames, typically wired to an
/// [`super::interpreter::EventInterpreter`].
pub type FrameHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Configuration for the relay transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Relay WebSocket endpoint, e.g. `wss://bridge.example.com/realtime`
    pub relay_url: String,
    /// Opaque session identifier, carried as a query parameter
    pub session_id: String,
    /// Bearer credential, carried as a query parameter because WebSocket
    /// clients cannot set request headers
    pub token: Option<String>,
    /// Reconnection policy configuration
    pub reconnect: ReconnectConfig,
}

struct TransportInner {
    config: TransportConfig,
    state: Mutex<ConnectionState>,
    policy: ReconnectPolicy,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    cancel: Mutex<Option<CancellationToken>>,
    on_frame: FrameHandler,
    notifier: Arc<dyn Notifier>,
}

/// Client-side wrapper around one bidirectional realtime channel.
#[derive(Clone)]
pub struct RelayTransport {
    inner: Arc<TransportInner>,
}

enum ChannelExit {
    UserClosed,
    RemoteNormal,
    Abnormal,
}

impl RelayTransport {
    pub fn new(config: TransportConfig, on_frame: FrameHandler, notifier: Arc<dyn Notifier>) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect.clone());
        Self {
            inner: Arc::new(TransportInner {
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                policy,
                outbound: Mutex::new(None),
                cancel: Mutex::new(None),
                on_frame,
                notifier,
            }),
        }
    }

    /// Current state of the channel.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Reconnection policy shared with this transport.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    /// Open the channel to the relay.
    ///
    /// On success the policy is reset and a single "connected" notification
    /// is emitted. A failed attempt counts as an abnormal close and consumes
    /// one retry from the policy.
    pub async fn connect(&self) -> BridgeResult<()> {
        Self::connect_inner(self.inner.clone()).await
    }

    async fn connect_inner(inner: Arc<TransportInner>) -> BridgeResult<()> {
        {
            let mut state = inner.state.lock();
            match *state {
                ConnectionState::Connecting | ConnectionState::Connected => return Ok(()),
                _ => *state = ConnectionState::Connecting,
            }
        }

        let url = session_url(&inner.config)?;
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _response)) => {
                let (tx, rx) = mpsc::channel::<String>(OUTBOUND_CHANNEL_CAPACITY);
                let token = CancellationToken::new();
                *inner.outbound.lock() = Some(tx);
                *inner.cancel.lock() = Some(token.clone());
                *inner.state.lock() = ConnectionState::Connected;
                inner.policy.reset_attempts();
                tracing::info!(session_id = %inner.config.session_id, "Connected to relay");
                inner
                    .notifier
                    .notify("Connected", "Voice session connected");

                tokio::spawn(Self::run_channel(inner.clone(), ws, rx, token));
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %inner.config.session_id,
                    "Relay connection attempt failed: {}",
                    e
                );
                *inner.state.lock() = ConnectionState::Failed;
                Self::schedule_reconnect(inner.clone());
                Err(BridgeError::ConnectionFailed(e.to_string()))
            }
        }
    }

    async fn run_channel(
        inner: Arc<TransportInner>,
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        mut outbound_rx: mpsc::Receiver<String>,
        token: CancellationToken,
    ) {
        let (mut sink, mut stream) = ws.split();

        let exit = loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client disconnect".into(),
                        })))
                        .await;
                    break ChannelExit::UserClosed;
                }

                out = outbound_rx.recv() => {
                    match out {
                        Some(frame) => {
                            if sink.send(Message::Text(frame.into())).await.is_err() {
                                break ChannelExit::Abnormal;
                            }
                        }
                        None => break ChannelExit::UserClosed,
                    }
                }

                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            (inner.on_frame)(text.to_string());
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let normal = frame
                                .as_ref()
                                .map(|f| u16::from(f.code) == 1000)
                                .unwrap_or(false);
                            break if normal {
                                ChannelExit::RemoteNormal
                            } else {
                                ChannelExit::Abnormal
                            };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("Relay WebSocket error: {}", e);
                            break ChannelExit::Abnormal;
                        }
                        None => break ChannelExit::Abnormal,
                    }
                }
            }
        };

        *inner.outbound.lock() = None;

        match exit {
            ChannelExit::UserClosed => {
                *inner.state.lock() = ConnectionState::Disconnected;
            }
            ChannelExit::RemoteNormal => {
                tracing::info!("Relay closed the channel normally");
                *inner.state.lock() = ConnectionState::Disconnected;
            }
            ChannelExit::Abnormal => {
                // The user may have disconnected while the close was in
                // flight; disconnect always wins.
                {
                    let mut state = inner.state.lock();
                    if *state == ConnectionState::Disconnected {
                        return;
                    }
                    *state = ConnectionState::Failed;
                }
                tracing::warn!(
                    session_id = %inner.config.session_id,
                    "Relay channel lost"
                );
                Self::schedule_reconnect(inner);
            }
        }
    }

    fn schedule_reconnect(inner: Arc<TransportInner>) {
        let retry_inner = inner.clone();
        let notifier = inner.notifier.clone();
        inner.policy.attempt_reconnect(
            move || {
                *retry_inner.state.lock() = ConnectionState::Reconnecting;
                tokio::spawn(async move {
                    if let Err(e) = Self::connect_inner(retry_inner.clone()).await {
                        tracing::debug!("Reconnection attempt failed: {}", e);
                    }
                });
            },
            move || {
                notifier.notify(
                    "Connection failed",
                    "Unable to reach the voice service after repeated attempts",
                );
            },
        );
    }

    /// Send a raw frame to the relay.
    ///
    /// When the channel is not open this reports the failure (log + error
    /// return) instead of panicking or silently dropping.
    pub async fn send(&self, frame: String) -> BridgeResult<()> {
        let sender = {
            let state = *self.inner.state.lock();
            if state != ConnectionState::Connected {
                tracing::warn!(state = %state, "Dropping send on non-open channel");
                return Err(BridgeError::NotConnected);
            }
            self.inner.outbound.lock().clone()
        };
        match sender {
            Some(tx) => tx.send(frame).await.map_err(|_| BridgeError::NotConnected),
            None => Err(BridgeError::NotConnected),
        }
    }

    /// Serialize and send a protocol event.
    pub async fn send_event(&self, event: &ClientEvent) -> BridgeResult<()> {
        let frame =
            serde_json::to_string(event).map_err(|e| BridgeError::Serialization(e.to_string()))?;
        self.send(frame).await
    }

    /// Explicitly close the channel.
    ///
    /// Policy cleanup runs first so a scheduled retry can never fire after
    /// the user asked to disconnect; the channel is then closed with a
    /// normal status code.
    pub fn disconnect(&self) {
        self.inner.policy.cleanup();
        *self.inner.state.lock() = ConnectionState::Disconnected;
        if let Some(token) = self.inner.cancel.lock().take() {
            token.cancel();
        }
        *self.inner.outbound.lock() = None;
        tracing::info!(session_id = %self.inner.config.session_id, "Disconnected from relay");
    }
}

/// Build the relay URL with `session` and `token` query parameters.
fn session_url(config: &TransportConfig) -> BridgeResult<url::Url> {
    let mut url = url::Url::parse(&config.relay_url)
        .map_err(|e| BridgeError::InvalidConfiguration(format!("invalid relay URL: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("session", &config.session_id);
        if let Some(token) = &config.token {
            query.append_pair("token", token);
        }
    }
    Ok(url)
}
