//! The duplex text channel to the remote interactive session.
//!
//! A [`Connection`] is a pair of unbounded tokio channels: outbound text
//! fragments (keystrokes) and inbound output chunks. Connectors produce
//! connections; [`WebSocketConnector`] bridges one to a real socket and
//! [`MemoryConnector`] hands the far end to the caller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use coachflow_types::{CoachflowError, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

pub const DEFAULT_URL: &str = "ws://localhost:1337/ws";

/// Driver side of an open session channel.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl Connection {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self { outbound, inbound }
    }

    pub fn send(&self, text: &str) -> Result<()> {
        self.outbound
            .send(text.to_string())
            .map_err(|_| CoachflowError::ChannelClosed)
    }

    /// Next inbound chunk; `None` once the remote side has closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection>;

    /// Where this connector points, for logs.
    fn endpoint(&self) -> String;
}

// ---------------------------------------------------------------------------
// WebSocketConnector
// ---------------------------------------------------------------------------

pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Connection> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| CoachflowError::ConnectFailed {
                url: self.url.clone(),
                message: e.to_string(),
            })?;
        info!(url = %self.url, "Session socket connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let url = self.url.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => {
                        let Some(text) = outgoing else {
                            debug!(url = %url, "Connection dropped, closing socket");
                            let _ = ws_tx.close().await;
                            break;
                        };
                        if let Err(e) = ws_tx.send(WsMessage::Text(text.into())).await {
                            warn!(error = %e, "Session socket write failed");
                            break;
                        }
                    }
                    msg = ws_rx.next() => {
                        let msg = match msg {
                            Some(Ok(m)) => m,
                            Some(Err(e)) => {
                                warn!(error = %e, "Session socket error");
                                break;
                            }
                            None => {
                                info!("Session socket closed by peer");
                                break;
                            }
                        };
                        let text = match msg {
                            WsMessage::Text(t) => t.to_string(),
                            WsMessage::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
                            WsMessage::Ping(data) => {
                                let _ = ws_tx.send(WsMessage::Pong(data)).await;
                                continue;
                            }
                            WsMessage::Close(_) => {
                                info!("Session socket close frame");
                                break;
                            }
                            _ => continue,
                        };
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Connection::new(out_tx, in_rx))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

// ---------------------------------------------------------------------------
// In-memory channel
// ---------------------------------------------------------------------------

/// The remote side of an in-memory connection.
#[derive(Debug)]
pub struct RemoteEnd {
    from_driver: mpsc::UnboundedReceiver<String>,
    to_driver: mpsc::UnboundedSender<String>,
}

impl RemoteEnd {
    /// Push an output chunk to the driver. `false` once the driver is gone.
    pub fn emit(&self, chunk: impl Into<String>) -> bool {
        self.to_driver.send(chunk.into()).is_ok()
    }

    /// Next input fragment sent by the driver; `None` after it disconnects.
    pub async fn next_input(&mut self) -> Option<String> {
        self.from_driver.recv().await
    }

    /// Input already sent, without waiting.
    pub fn try_next_input(&mut self) -> Option<String> {
        self.from_driver.try_recv().ok()
    }
}

pub fn memory_pair() -> (Connection, RemoteEnd) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    (
        Connection::new(out_tx, in_rx),
        RemoteEnd {
            from_driver: out_rx,
            to_driver: in_tx,
        },
    )
}

/// Hands out pre-opened in-memory connections, one per `connect`.
#[derive(Default)]
pub struct MemoryConnector {
    pending: Mutex<VecDeque<Connection>>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection for the next `connect` call and return its remote end.
    pub fn accept(&self) -> RemoteEnd {
        let (connection, remote) = memory_pair();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(connection);
        remote
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Connection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| CoachflowError::ConnectFailed {
                url: self.endpoint(),
                message: "no session accepted".into(),
            })
    }

    fn endpoint(&self) -> String {
        "memory".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pair_carries_both_directions() {
        let (mut conn, mut remote) = memory_pair();
        conn.send("\n").unwrap();
        assert_eq!(remote.next_input().await.as_deref(), Some("\n"));

        assert!(remote.emit("hello"));
        assert_eq!(conn.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn dropping_remote_closes_connection() {
        let (mut conn, remote) = memory_pair();
        drop(remote);
        assert!(conn.recv().await.is_none());
        assert!(matches!(conn.send("x"), Err(CoachflowError::ChannelClosed)));
    }

    #[tokio::test]
    async fn memory_connector_hands_out_queued_sessions() {
        let connector = MemoryConnector::new();
        assert!(connector.connect().await.is_err());

        let remote = connector.accept();
        let mut conn = connector.connect().await.unwrap();
        remote.emit("ready");
        assert_eq!(conn.recv().await.as_deref(), Some("ready"));
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn websocket_bridge_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(WsMessage::Text("menu".into())).await.unwrap();
            ws.send(WsMessage::Binary(b"raw bytes".to_vec().into()))
                .await
                .unwrap();
            let reply = ws.next().await.unwrap().unwrap();
            reply.into_text().unwrap().as_str().to_owned()
        });

        let connector = WebSocketConnector::new(format!("ws://{addr}/ws"));
        let mut conn = connector.connect().await.unwrap();
        assert_eq!(conn.recv().await.as_deref(), Some("menu"));
        assert_eq!(conn.recv().await.as_deref(), Some("raw bytes"));
        conn.send("\n").unwrap();
        assert_eq!(server.await.unwrap(), "\n");
    }

    #[tokio::test]
    async fn websocket_peer_close_ends_inbound() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let mut conn = WebSocketConnector::new(format!("ws://{addr}/ws"))
            .connect()
            .await
            .unwrap();
        assert!(conn.recv().await.is_none());
    }
}
