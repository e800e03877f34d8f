//! Upstream realtime provider connection.
//!
//! One [`UpstreamBridge`] owns one WebSocket to the provider for one relay
//! session. It forwards every inbound text frame verbatim through a callback
//! and performs exactly one protocol-level intervention: when the provider
//! announces `session.created`, the bridge sends a single `session.update`
//! carrying the server's fixed session configuration. Client audio is
//! refused until that injection has happened, otherwise the provider would
//! run the session with default parameters.
//!
//! Credential rejections from the provider are terminal; other abnormal
//! closes trigger a fixed-delay, bounded reconnect that is independent of
//! any client-side retry policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::{ClientEvent, ProviderEvent, SessionUpdateConfig, error_frame};
use super::{BridgeError, BridgeResult, CloseReason, ClosedCallback, FrameCallback};

/// Channel capacity for outbound upstream frames.
const UPSTREAM_CHANNEL_CAPACITY: usize = 256;

/// Provider close code for an invalid credential. Not retryable.
pub const CLOSE_INVALID_CREDENTIAL: u16 = 4001;

/// Provider close code for insufficient permissions. Not retryable.
pub const CLOSE_INSUFFICIENT_PERMISSION: u16 = 4003;

/// Normal closure per RFC 6455.
const CLOSE_NORMAL: u16 = 1000;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for one upstream connection.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Provider WebSocket endpoint (e.g. `wss://api.openai.com/v1/realtime`)
    pub url: String,
    /// Provider API key, sent as a bearer credential
    pub api_key: String,
    /// Model selector appended as a query parameter
    pub model: String,
    /// Session configuration injected on `session.created`
    pub session: SessionUpdateConfig,
    /// Upper bound on a single connection attempt
    pub connect_timeout: Duration,
    /// Fixed delay between upstream reconnection attempts
    pub reconnect_delay: Duration,
    /// Upstream reconnection budget
    pub reconnect_max_attempts: u32,
}

/// Cheap cloneable sending surface of a bridge, safe to use without holding
/// any registry lock across an await point.
#[derive(Clone)]
pub struct UpstreamHandle {
    outbound: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
    session_ready: Arc<AtomicBool>,
}

impl UpstreamHandle {
    /// Whether the upstream socket is currently open.
    pub fn is_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether the `session.update` injection has been performed for the
    /// current upstream session.
    pub fn is_session_ready(&self) -> bool {
        self.session_ready.load(Ordering::SeqCst)
    }

    /// Forward a raw client frame to the provider.
    pub async fn forward_text(&self, frame: String) -> BridgeResult<()> {
        if !self.is_open() {
            return Err(BridgeError::NotConnected);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| BridgeError::NotConnected)
    }

    /// Wrap raw PCM audio into an `input_audio_buffer.append` event and send
    /// it upstream. Refused until the session has been configured.
    pub async fn send_audio(&self, pcm: &[u8]) -> BridgeResult<()> {
        if !self.is_session_ready() {
            return Err(BridgeError::SessionNotReady);
        }
        let event = ClientEvent::audio_append(pcm);
        let frame =
            serde_json::to_string(&event).map_err(|e| BridgeError::Serialization(e.to_string()))?;
        self.forward_text(frame).await
    }
}

/// One relay session's connection to the upstream provider.
pub struct UpstreamBridge {
    connection_id: Uuid,
    handle: UpstreamHandle,
    cancel: CancellationToken,
    close_reason: Arc<Mutex<Option<CloseReason>>>,
}

impl UpstreamBridge {
    /// Open the upstream connection and start the bridging task.
    ///
    /// `on_frame` receives every inbound provider text frame verbatim (plus
    /// relay-originated in-band error frames); `on_closed` fires exactly
    /// once when the bridge reaches a terminal state.
    pub async fn connect(
        config: UpstreamConfig,
        on_frame: FrameCallback,
        on_closed: ClosedCallback,
    ) -> BridgeResult<Self> {
        let ws = open_socket(&config).await?;
        tracing::info!(model = %config.model, "Connected to upstream realtime provider");

        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(UPSTREAM_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let session_ready = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let close_reason = Arc::new(Mutex::new(None));

        let handle = UpstreamHandle {
            outbound: outbound_tx,
            connected: connected.clone(),
            session_ready: session_ready.clone(),
        };

        tokio::spawn(run_bridge(
            ws,
            config,
            outbound_rx,
            connected,
            session_ready,
            cancel.clone(),
            close_reason.clone(),
            on_frame,
            on_closed,
        ));

        Ok(Self {
            connection_id: Uuid::new_v4(),
            handle,
            cancel,
            close_reason,
        })
    }

    /// Unique identifier of this upstream connection, used by the session
    /// registry to tell a connection from its successor.
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Cloneable sending surface.
    pub fn handle(&self) -> UpstreamHandle {
        self.handle.clone()
    }

    /// Whether the upstream socket is currently open.
    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Close the bridge. The first recorded reason wins and is reported
    /// through the closed callback.
    pub fn close(&self, reason: CloseReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.cancel.cancel();
    }
}

/// Outcome of one connection's read/write loop.
enum LoopExit {
    Cancelled,
    Normal,
    NonRetryable { code: u16, message: String },
    Abnormal,
}

fn classify_close(frame: Option<tungstenite::protocol::CloseFrame>) -> LoopExit {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            match code {
                CLOSE_NORMAL => LoopExit::Normal,
                CLOSE_INVALID_CREDENTIAL | CLOSE_INSUFFICIENT_PERMISSION => {
                    LoopExit::NonRetryable {
                        code,
                        message: frame.reason.to_string(),
                    }
                }
                _ => LoopExit::Abnormal,
            }
        }
        None => LoopExit::Abnormal,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_bridge(
    mut ws: WsStream,
    config: UpstreamConfig,
    mut outbound_rx: mpsc::Receiver<String>,
    connected: Arc<AtomicBool>,
    session_ready: Arc<AtomicBool>,
    cancel: CancellationToken,
    close_reason: Arc<Mutex<Option<CloseReason>>>,
    on_frame: FrameCallback,
    on_closed: ClosedCallback,
) {
    let mut reconnect_attempt: u32 = 0;

    let final_reason: CloseReason = 'outer: loop {
        let (mut sink, mut stream) = ws.split();
        // One injection per upstream session: a reconnect yields a new
        // provider session and a fresh session.created.
        let mut injected = false;
        connected.store(true, Ordering::SeqCst);
        session_ready.store(false, Ordering::SeqCst);

        let exit = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break LoopExit::Cancelled;
                }

                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(frame) => {
                            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                                tracing::error!("Failed to send frame upstream: {}", e);
                                break LoopExit::Abnormal;
                            }
                        }
                        // Every handle dropped; nothing left to bridge.
                        None => break LoopExit::Cancelled,
                    }
                }

                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !injected
                                && matches!(
                                    serde_json::from_str::<ProviderEvent>(&text),
                                    Ok(ProviderEvent::SessionCreated { .. })
                                )
                            {
                                match serde_json::to_string(&ClientEvent::SessionUpdate {
                                    session: config.session.clone(),
                                }) {
                                    Ok(update) => {
                                        if let Err(e) =
                                            sink.send(Message::Text(update.into())).await
                                        {
                                            tracing::error!(
                                                "Failed to inject session.update: {}",
                                                e
                                            );
                                            break LoopExit::Abnormal;
                                        }
                                        injected = true;
                                        session_ready.store(true, Ordering::SeqCst);
                                        tracing::debug!("Injected session.update");
                                    }
                                    Err(e) => {
                                        tracing::error!(
                                            "Failed to serialize session.update: {}",
                                            e
                                        );
                                    }
                                }
                            }
                            // Forward the raw frame verbatim, session.created
                            // included; the client interprets the vocabulary,
                            // the relay does not.
                            on_frame(text.to_string()).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Upstream closed the connection");
                            break classify_close(frame);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("Upstream WebSocket error: {}", e);
                            break LoopExit::Abnormal;
                        }
                        None => break LoopExit::Abnormal,
                    }
                }
            }
        };

        connected.store(false, Ordering::SeqCst);
        session_ready.store(false, Ordering::SeqCst);

        match exit {
            LoopExit::Cancelled => {
                break 'outer close_reason
                    .lock()
                    .take()
                    .unwrap_or(CloseReason::ClientDisconnected);
            }
            LoopExit::Normal => break 'outer CloseReason::UpstreamClosed,
            LoopExit::NonRetryable { code, message } => {
                on_frame(error_frame(
                    "upstream_auth_error",
                    format!("Upstream rejected credentials (close code {code}): {message}"),
                    None,
                ))
                .await;
                break 'outer CloseReason::AuthRejected { code, message };
            }
            LoopExit::Abnormal => {
                // Fixed-delay upstream-only reconnect, bounded by config.
                loop {
                    if reconnect_attempt >= config.reconnect_max_attempts {
                        break 'outer CloseReason::Exhausted {
                            attempts: reconnect_attempt,
                        };
                    }
                    reconnect_attempt += 1;
                    tracing::info!(
                        attempt = reconnect_attempt,
                        max_attempts = config.reconnect_max_attempts,
                        delay_ms = config.reconnect_delay.as_millis() as u64,
                        "Reconnecting to upstream provider"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            break 'outer close_reason
                                .lock()
                                .take()
                                .unwrap_or(CloseReason::ClientDisconnected);
                        }
                        _ = tokio::time::sleep(config.reconnect_delay) => {}
                    }

                    match open_socket(&config).await {
                        Ok(new_ws) => {
                            tracing::info!("Reconnected to upstream provider");
                            reconnect_attempt = 0;
                            ws = new_ws;
                            continue 'outer;
                        }
                        Err(e) => {
                            tracing::warn!(
                                attempt = reconnect_attempt,
                                "Upstream reconnection attempt failed: {}",
                                e
                            );
                        }
                    }
                }
            }
        }
    };

    connected.store(false, Ordering::SeqCst);
    session_ready.store(false, Ordering::SeqCst);
    tracing::info!(reason = %final_reason, "Upstream bridge task ended");
    on_closed(final_reason).await;
}

/// Open one WebSocket to the provider, bounded by the connect timeout.
async fn open_socket(config: &UpstreamConfig) -> BridgeResult<WsStream> {
    let request = build_request(config)?;

    let connect = tokio_tungstenite::connect_async(request);
    match tokio::time::timeout(config.connect_timeout, connect).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(tungstenite::Error::Http(response))) => {
            let status = response.status();
            if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
                Err(BridgeError::AuthenticationFailed(format!(
                    "upstream returned {status}"
                )))
            } else {
                Err(BridgeError::ConnectionFailed(format!(
                    "upstream returned {status}"
                )))
            }
        }
        Ok(Err(e)) => Err(BridgeError::ConnectionFailed(e.to_string())),
        Err(_) => Err(BridgeError::Timeout(format!(
            "upstream connection attempt exceeded {}s",
            config.connect_timeout.as_secs()
        ))),
    }
}

/// Build the WebSocket handshake request with the provider's auth and
/// protocol-version headers.
fn build_request(config: &UpstreamConfig) -> BridgeResult<http::Request<()>> {
    let url = format!("{}?model={}", config.url, config.model);
    let uri: http::Uri = url
        .parse()
        .map_err(|e| BridgeError::InvalidConfiguration(format!("invalid upstream URL: {e}")))?;
    let host = uri
        .host()
        .ok_or_else(|| {
            BridgeError::InvalidConfiguration("upstream URL has no host".to_string())
        })?
        .to_string();

    http::Request::builder()
        .uri(&url)
        .header("Authorization", format!("Bearer {}", config.api_key))
        .header("OpenAI-Beta", "realtime=v1")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host)
        .body(())
        .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))
}
