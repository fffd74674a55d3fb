//! Signaling socket: the connection to the rendezvous service.
//!
//! Frames are JSON text over WebSocket. The trait/factory split with an
//! mpsc event receiver keeps the supervisor loop independent of the
//! concrete socket, and lets tests drive the client with a scripted one.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use concore::ConnectId;
use concore::signaling::WireFrame;

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("socket is closed")]
    Closed,

    #[error("connect already in progress")]
    AlreadyConnecting,

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// An event produced by a live socket.
#[derive(Debug)]
pub enum SocketEvent {
    /// A decoded frame arrived.
    Frame(WireFrame),
    /// The connection was lost; this socket is dead.
    Disconnected,
}

/// An active connection to the rendezvous service.
#[async_trait]
pub trait SignalingSocket: Send + Sync {
    async fn send(&self, frame: &WireFrame) -> Result<(), SocketError>;

    /// Close the connection. Idempotent.
    async fn disconnect(&self);
}

/// Creates one socket per connection attempt, registered under our id.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    async fn connect(
        &self,
        self_id: &ConnectId,
    ) -> Result<(Arc<dyn SignalingSocket>, mpsc::Receiver<SocketEvent>), SocketError>;
}

/// WebSocket signaling socket backed by tokio-tungstenite.
pub struct TungsteniteSocket {
    sink: Mutex<Option<WsSink>>,
}

#[async_trait]
impl SignalingSocket for TungsteniteSocket {
    async fn send(&self, frame: &WireFrame) -> Result<(), SocketError> {
        let text = serde_json::to_string(frame)?;
        let mut sink_guard = self.sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(SocketError::Closed)?;
        debug!(target: "Socket", "--> {text}");
        sink.send(Message::text(text))
            .await
            .map_err(|e| SocketError::WebSocket(e.to_string()))
    }

    async fn disconnect(&self) {
        let mut sink_guard = self.sink.lock().await;
        if let Some(mut sink) = sink_guard.take() {
            let _ = sink.close().await;
        }
    }
}

/// Factory dialing a fixed rendezvous endpoint.
pub struct TungsteniteSocketFactory {
    server_url: String,
}

impl TungsteniteSocketFactory {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }
}

#[async_trait]
impl SocketFactory for TungsteniteSocketFactory {
    async fn connect(
        &self,
        self_id: &ConnectId,
    ) -> Result<(Arc<dyn SignalingSocket>, mpsc::Receiver<SocketEvent>), SocketError> {
        let url = format!("{}?id={}", self.server_url, self_id);
        info!(target: "Socket", "dialing {url}");
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| SocketError::WebSocket(e.to_string()))?;
        let (sink, stream) = ws.split();

        let (event_tx, event_rx) = mpsc::channel(64);
        tokio::spawn(read_pump(stream, event_tx));

        Ok((
            Arc::new(TungsteniteSocket {
                sink: Mutex::new(Some(sink)),
            }),
            event_rx,
        ))
    }
}


async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<SocketEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<WireFrame>(text.as_str()) {
                    Ok(frame) => {
                        debug!(target: "Socket", "<-- {}", text.as_str());
                        if event_tx.send(SocketEvent::Frame(frame)).await.is_err() {
                            warn!(target: "Socket", "event receiver dropped, closing read pump");
                            return;
                        }
                    }
                    // A junk frame is skipped; it does not kill the channel.
                    Err(e) => warn!(target: "Socket", "malformed frame: {e}"),
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {} // ping/pong/binary: nothing for us
            Some(Err(e)) => {
                warn!(target: "Socket", "read error: {e}");
                break;
            }
        }
    }
    let _ = event_tx.send(SocketEvent::Disconnected).await;
}
