//! Realtime WebSocket handler: the client leg of the relay.
//!
//! Each accepted socket gets one upstream provider connection, registered in
//! the session registry under the caller's session identifier (superseding
//! any prior registration for the same id). Client text frames pass through
//! to the provider verbatim; binary frames are raw PCM and get wrapped into
//! base64 append events. Inbound provider frames arrive through the bridge's
//! frame callback and are written to the socket in arrival order by a single
//! sender task.

use axum::{
    Extension,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};

use crate::auth::Auth;
use crate::core::bridge::{
    BridgeError, CloseReason, ClosedCallback, FrameCallback, UpstreamBridge, UpstreamHandle,
    error_frame,
};
use crate::errors::app_error::AppError;
use crate::middleware::ClientIp;
use crate::state::AppState;

use super::messages::{AUDIO_APPEND_TYPE, validate_client_frame};

/// Channel buffer size for outbound client frames
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How often the idle check runs
const PROCESSING_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum idle time before a stale connection is closed
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Query parameters of the realtime endpoint.
#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    /// Opaque session identifier
    pub session: Option<String>,
}

enum OutboundFrame {
    Text(String),
    Close,
}

/// Realtime WebSocket handler.
///
/// Upgrades the HTTP connection and bridges it to the upstream realtime
/// provider. The bearer token has already been validated by the auth
/// middleware; a missing upstream credential is reported as a structured
/// 500 before the upgrade.
pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<RealtimeQuery>,
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<Auth>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let Some(session_id) = query.session.filter(|s| !s.is_empty()) else {
        return AppError::BadRequest("missing `session` query parameter".to_string())
            .into_response();
    };

    let Some(api_key) = state.config.openai_api_key.clone() else {
        return AppError::MissingCredential {
            error: "Realtime provider credential is not configured".to_string(),
            debug: "set OPENAI_API_KEY or upstream.api_key in the config file".to_string(),
        }
        .into_response();
    };

    info!(
        auth_id = ?auth.id,
        session_id = %session_id,
        "Realtime WebSocket connection upgrade requested"
    );

    let ip = client_ip.map(|Extension(ClientIp(ip))| ip);
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_realtime_socket(socket, state, session_id, api_key, ip))
}

/// Handle the realtime WebSocket connection.
async fn handle_realtime_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    session_id: String,
    api_key: String,
    client_ip: Option<IpAddr>,
) {
    info!(session_id = %session_id, "Realtime WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<OutboundFrame>(CHANNEL_BUFFER_SIZE);

    // Single sender task: provider frames reach the client in the order the
    // bridge delivered them.
    let sender_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let should_close = matches!(frame, OutboundFrame::Close);
            let result = match frame {
                OutboundFrame::Text(text) => sender.send(Message::Text(text.into())).await,
                OutboundFrame::Close => {
                    info!("Closing realtime WebSocket connection");
                    sender.send(Message::Close(None)).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    let on_frame: FrameCallback = {
        let tx = frame_tx.clone();
        Arc::new(move |frame: String| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(OutboundFrame::Text(frame)).await;
            })
        })
    };

    let on_closed: ClosedCallback = {
        let tx = frame_tx.clone();
        Arc::new(move |reason: CloseReason| {
            let tx = tx.clone();
            Box::pin(async move {
                match &reason {
                    // Our own teardown, or an auth rejection whose error
                    // frame the bridge already forwarded in-band.
                    CloseReason::ClientDisconnected | CloseReason::AuthRejected { .. } => {}
                    CloseReason::UpstreamClosed => {}
                    CloseReason::Exhausted { .. } | CloseReason::Superseded => {
                        let _ = tx
                            .send(OutboundFrame::Text(error_frame(
                                "upstream_unavailable",
                                reason.to_string(),
                                None,
                            )))
                            .await;
                    }
                }
                let _ = tx.send(OutboundFrame::Close).await;
            })
        })
    };

    let upstream_config = state.config.upstream_config(api_key);
    let upstream = match UpstreamBridge::connect(upstream_config, on_frame, on_closed).await {
        Ok(upstream) => upstream,
        Err(e) => {
            error!(session_id = %session_id, "Failed to open upstream connection: {}", e);
            let code = match e {
                BridgeError::AuthenticationFailed(_) => "upstream_auth_error",
                BridgeError::Timeout(_) => "upstream_timeout",
                _ => "upstream_connect_failed",
            };
            let _ = frame_tx
                .send(OutboundFrame::Text(error_frame(
                    code,
                    format!("Failed to reach the realtime provider: {e}"),
                    None,
                )))
                .await;
            let _ = frame_tx.send(OutboundFrame::Close).await;
            let _ = sender_task.await;
            if let Some(ip) = client_ip {
                state.release_connection(ip);
            }
            return;
        }
    };

    let handle = upstream.handle();
    let connection_id = state.sessions.register(&session_id, upstream);

    let mut last_activity = tokio::time::Instant::now();

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = tokio::time::Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        if !process_client_message(msg, &handle, &frame_tx).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, "Realtime WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(session_id = %session_id, "Realtime WebSocket closed by client");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(PROCESSING_INTERVAL) => {
                if last_activity.elapsed() > IDLE_TIMEOUT {
                    warn!(
                        session_id = %session_id,
                        idle_secs = last_activity.elapsed().as_secs(),
                        "Closing stale realtime connection"
                    );
                    let _ = frame_tx
                        .send(OutboundFrame::Text(error_frame(
                            "idle_timeout",
                            "Connection closed due to inactivity",
                            None,
                        )))
                        .await;
                    break;
                }
                debug!(session_id = %session_id, "Idle check - connection still active");
            }
        }
    }

    // Teardown: deregister (closing the upstream leg) unless a newer
    // connection already took over the session id.
    state.sessions.remove(&session_id, connection_id);
    sender_task.abort();
    if let Some(ip) = client_ip {
        state.release_connection(ip);
    }
    info!(session_id = %session_id, "Realtime WebSocket connection terminated");
}

/// Process one inbound client message. Returns false when the connection
/// should end.
async fn process_client_message(
    msg: Message,
    handle: &UpstreamHandle,
    frame_tx: &mpsc::Sender<OutboundFrame>,
) -> bool {
    match msg {
        Message::Text(text) => {
            match validate_client_frame(&text) {
                Ok(kind) => {
                    // Audio must wait for the session.update injection or
                    // the provider would run with default parameters.
                    let result = if kind == AUDIO_APPEND_TYPE && !handle.is_session_ready() {
                        Err(BridgeError::SessionNotReady)
                    } else {
                        handle.forward_text(text.to_string()).await
                    };
                    if let Err(e) = result {
                        warn!(event_type = %kind, "Failed to forward client frame: {}", e);
                        let code = match e {
                            BridgeError::SessionNotReady => "session_not_ready",
                            _ => "upstream_unavailable",
                        };
                        let _ = frame_tx
                            .send(OutboundFrame::Text(error_frame(
                                code,
                                format!("Failed to forward message: {e}"),
                                None,
                            )))
                            .await;
                    }
                }
                Err(e) => {
                    warn!("Rejected client frame: {}", e);
                    let _ = frame_tx
                        .send(OutboundFrame::Text(error_frame(
                            "invalid_frame",
                            e.to_string(),
                            None,
                        )))
                        .await;
                }
            }
            true
        }
        Message::Binary(data) => {
            debug!("Received binary audio: {} bytes", data.len());
            if let Err(e) = handle.send_audio(&data).await {
                warn!("Failed to send audio upstream: {}", e);
                let code = match e {
                    BridgeError::SessionNotReady => "session_not_ready",
                    _ => "audio_error",
                };
                let _ = frame_tx
                    .send(OutboundFrame::Text(error_frame(
                        code,
                        format!("Failed to send audio: {e}"),
                        None,
                    )))
                    .await;
            }
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!("Realtime WebSocket close received");
            false
        }
    }
}
