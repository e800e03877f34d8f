//! Mock upstream realtime provider for integration tests.
//!
//! Sends `session.created` on accept, records every frame the relay sends,
//! and replays a scripted set of response frames once it sees the
//! `session.update` injection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Per-connection record of what the relay sent us.
#[derive(Default)]
pub struct ConnectionLog {
    pub received: Mutex<Vec<Value>>,
    closed: AtomicBool,
}

impl ConnectionLog {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn received_types(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|v| v["type"].as_str().map(String::from))
            .collect()
    }

    pub fn count_of(&self, event_type: &str) -> usize {
        self.received_types()
            .iter()
            .filter(|t| t.as_str() == event_type)
            .count()
    }
}

pub struct MockProviderServer {
    addr: SocketAddr,
    connections: Arc<Mutex<Vec<Arc<ConnectionLog>>>>,
}

impl MockProviderServer {
    /// Spawn the mock. `script` frames are sent to the relay right after the
    /// `session.update` injection arrives.
    pub async fn spawn(script: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections: Arc<Mutex<Vec<Arc<ConnectionLog>>>> = Arc::new(Mutex::new(Vec::new()));

        let accepted = connections.clone();
        let script = Arc::new(script);
        tokio::spawn(async move {
            let mut counter = 0u32;
            while let Ok((stream, _)) = listener.accept().await {
                counter += 1;
                let log = Arc::new(ConnectionLog::default());
                accepted.lock().push(log.clone());
                tokio::spawn(handle_connection(stream, log, script.clone(), counter));
            }
        });

        Self { addr, connections }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connection(&self, index: usize) -> Arc<ConnectionLog> {
        self.connections.lock()[index].clone()
    }
}

async fn handle_connection(
    stream: TcpStream,
    log: Arc<ConnectionLog>,
    script: Arc<Vec<String>>,
    session_n: u32,
) {
    let Ok(ws) = accept_async(stream).await else {
        log.closed.store(true, Ordering::SeqCst);
        return;
    };
    let (mut write, mut read) = ws.split();

    let created = json!({
        "type": "session.created",
        "session": {
            "id": format!("sess_mock_{session_n}"),
            "object": "realtime.session",
            "model": "gpt-4o-realtime-preview",
            "expires_at": 0
        }
    });
    let _ = write.send(Message::Text(created.to_string().into())).await;

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let value: Value =
                    serde_json::from_str(&text).unwrap_or_else(|_| json!({"type": "unparseable"}));
                let is_update = value["type"] == "session.update";
                log.received.lock().push(value);
                if is_update {
                    for frame in script.iter() {
                        let _ = write.send(Message::Text(frame.clone().into())).await;
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
    log.closed.store(true, Ordering::SeqCst);
}
