//! Shared test doubles: scripted signaling socket, controllable transport
//! and an in-memory media backend.
#![allow(dead_code)] // each test binary uses a different subset

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::timeout;

use connectly_rust::calls::transport::{
    RemoteStream, TransportError, TransportEvent, TransportFactory, TransportSession,
};
use connectly_rust::calls::CallManagerConfig;
use connectly_rust::media::{MediaBackend, MediaConstraints, MediaError, MediaStream};
use connectly_rust::signaling::WireFrame;
use connectly_rust::socket::{SignalingSocket, SocketError, SocketEvent, SocketFactory};
use connectly_rust::types::events::PhaseChanged;
use connectly_rust::{Client, ClientConfig, ConnectId};

// ---------------------------------------------------------------------------
// Scripted signaling socket
// ---------------------------------------------------------------------------

/// One scripted connection: the test injects inbound events and inspects
/// outbound frames.
pub struct ScriptedConnection {
    inbound: mpsc::Sender<SocketEvent>,
    sent: Arc<Mutex<Vec<WireFrame>>>,
}

impl ScriptedConnection {
    pub async fn open(&self) {
        let _ = self.inbound.send(SocketEvent::Frame(WireFrame::Open)).await;
    }

    pub async fn inject(&self, frame: WireFrame) {
        let _ = self.inbound.send(SocketEvent::Frame(frame)).await;
    }

    pub async fn drop_link(&self) {
        let _ = self.inbound.send(SocketEvent::Disconnected).await;
    }

    pub async fn sent(&self) -> Vec<WireFrame> {
        self.sent.lock().await.clone()
    }
}

struct ScriptedSocket {
    sent: Arc<Mutex<Vec<WireFrame>>>,
}

#[async_trait]
impl SignalingSocket for ScriptedSocket {
    async fn send(&self, frame: &WireFrame) -> Result<(), SocketError> {
        self.sent.lock().await.push(frame.clone());
        Ok(())
    }

    async fn disconnect(&self) {}
}

pub struct ScriptedSocketFactory {
    /// Confirm registration as soon as a connection is made.
    auto_open: bool,
    connections: Mutex<Vec<Arc<ScriptedConnection>>>,
    connects: AtomicUsize,
}

impl ScriptedSocketFactory {
    pub fn new(auto_open: bool) -> Arc<Self> {
        Arc::new(Self {
            auto_open,
            connections: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    /// Wait for the `idx`-th connection to exist.
    pub async fn connection(&self, idx: usize) -> Arc<ScriptedConnection> {
        for _ in 0..400 {
            {
                let connections = self.connections.lock().await;
                if connections.len() > idx {
                    return connections[idx].clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("connection {idx} never appeared");
    }
}

#[async_trait]
impl SocketFactory for ScriptedSocketFactory {
    async fn connect(
        &self,
        _self_id: &ConnectId,
    ) -> Result<(Arc<dyn SignalingSocket>, mpsc::Receiver<SocketEvent>), SocketError> {
        let (inbound, events) = mpsc::channel(64);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let connection = Arc::new(ScriptedConnection {
            inbound: inbound.clone(),
            sent: sent.clone(),
        });
        self.connections.lock().await.push(connection);
        self.connects.fetch_add(1, Ordering::Relaxed);
        if self.auto_open {
            let _ = inbound.send(SocketEvent::Frame(WireFrame::Open)).await;
        }
        Ok((Arc::new(ScriptedSocket { sent }), events))
    }
}

// ---------------------------------------------------------------------------
// Controllable transport
// ---------------------------------------------------------------------------

pub struct MockTransportSession {
    pub closed: AtomicBool,
    pub answers: Mutex<Vec<Value>>,
    pub candidates: Mutex<Vec<Value>>,
    description: Value,
}

#[async_trait]
impl TransportSession for MockTransportSession {
    async fn local_description(&self) -> Result<Value, TransportError> {
        Ok(self.description.clone())
    }

    async fn apply_answer(&self, payload: Value) -> Result<(), TransportError> {
        self.answers.lock().await.push(payload);
        Ok(())
    }

    async fn add_candidate(&self, payload: Value) -> Result<(), TransportError> {
        self.candidates.lock().await.push(payload);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// Handle the test uses to drive one created transport session.
pub struct TransportControl {
    pub session: Arc<MockTransportSession>,
    events: mpsc::Sender<TransportEvent>,
}

impl TransportControl {
    pub async fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event).await;
    }

    pub async fn connect_remote(&self) {
        self.emit(TransportEvent::RemoteStream(RemoteStream {
            id: "remote".to_string(),
            has_audio: true,
            has_video: true,
        }))
        .await;
    }

    pub fn is_closed(&self) -> bool {
        self.session.closed.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct MockTransportFactory {
    controls: Mutex<Vec<Arc<TransportControl>>>,
    pub outgoing: AtomicUsize,
    pub incoming: AtomicUsize,
}

impl MockTransportFactory {
    fn create(&self, description: Value) -> (Arc<dyn TransportSession>, mpsc::Receiver<TransportEvent>, Arc<TransportControl>) {
        let (events, receiver) = mpsc::channel(16);
        let session = Arc::new(MockTransportSession {
            closed: AtomicBool::new(false),
            answers: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            description,
        });
        let control = Arc::new(TransportControl {
            session: session.clone(),
            events,
        });
        (session, receiver, control)
    }

    pub fn created(&self) -> usize {
        self.outgoing.load(Ordering::Relaxed) + self.incoming.load(Ordering::Relaxed)
    }

    /// Wait for the `idx`-th created session to exist.
    pub async fn control(&self, idx: usize) -> Arc<TransportControl> {
        for _ in 0..400 {
            {
                let controls = self.controls.lock().await;
                if controls.len() > idx {
                    return controls[idx].clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("transport {idx} never appeared");
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create_outgoing(
        &self,
        _peer: &ConnectId,
        _local: Arc<MediaStream>,
    ) -> Result<(Arc<dyn TransportSession>, mpsc::Receiver<TransportEvent>), TransportError> {
        let (session, receiver, control) = self.create(json!({"sdp": "offer"}));
        self.controls.lock().await.push(control);
        self.outgoing.fetch_add(1, Ordering::Relaxed);
        Ok((session, receiver))
    }

    async fn create_incoming(
        &self,
        _offer: Value,
        _local: Arc<MediaStream>,
    ) -> Result<(Arc<dyn TransportSession>, mpsc::Receiver<TransportEvent>), TransportError> {
        let (session, receiver, control) = self.create(json!({"sdp": "answer"}));
        self.controls.lock().await.push(control);
        self.incoming.fetch_add(1, Ordering::Relaxed);
        Ok((session, receiver))
    }
}

// ---------------------------------------------------------------------------
// In-memory media backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TestMediaBackend {
    next_id: AtomicU64,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub deny: AtomicBool,
    pub last: Mutex<Option<Arc<MediaStream>>>,
}

#[async_trait]
impl MediaBackend for TestMediaBackend {
    async fn acquire(
        &self,
        _constraints: &MediaConstraints,
    ) -> Result<Arc<MediaStream>, MediaError> {
        if self.deny.load(Ordering::Relaxed) {
            return Err(MediaError::PermissionDenied);
        }
        self.acquired.fetch_add(1, Ordering::Relaxed);
        let stream = Arc::new(MediaStream::new(
            self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
        ));
        *self.last.lock().await = Some(stream.clone());
        Ok(stream)
    }

    async fn release(&self, _stream: &MediaStream) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub client: Arc<Client>,
    pub sockets: Arc<ScriptedSocketFactory>,
    pub transports: Arc<MockTransportFactory>,
    pub media: Arc<TestMediaBackend>,
}

impl Harness {
    pub fn new(self_id: &str, config: ClientConfig, auto_open: bool) -> Self {
        let sockets = ScriptedSocketFactory::new(auto_open);
        let transports = Arc::new(MockTransportFactory::default());
        let media = Arc::new(TestMediaBackend::default());
        let client = Client::new(
            ConnectId::new(self_id),
            config,
            sockets.clone(),
            transports.clone(),
            media.clone(),
        );
        Self {
            client,
            sockets,
            transports,
            media,
        }
    }

    /// Spawn the supervisor loop.
    pub fn spawn_run(&self) {
        let client = self.client.clone();
        tokio::spawn(async move {
            client.run().await;
        });
    }

    pub async fn wait_channel_open(&self) {
        for _ in 0..400 {
            if self.client.channel().is_open() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("channel never opened");
    }
}

pub fn fast_config() -> ClientConfig {
    ClientConfig {
        reconnect_initial_delay: Duration::from_millis(20),
        reconnect_max_delay: Duration::from_millis(100),
        call: CallManagerConfig {
            ring_timeout_secs: 0,
            media: MediaConstraints::default(),
        },
        auto_dial: None,
    }
}

/// Pull phase events until `want` shows up.
pub async fn expect_phase(receiver: &mut broadcast::Receiver<Arc<PhaseChanged>>, want: &str) {
    loop {
        let event = timeout(Duration::from_secs(2), receiver.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for phase {want}"))
            .expect("phase channel closed");
        if event.phase.name() == want {
            return;
        }
    }
}

/// Count offers addressed to `target` in a sent-frame log.
pub fn offers_to(frames: &[WireFrame], target: &str) -> usize {
    frames
        .iter()
        .filter(|frame| {
            matches!(frame, WireFrame::Offer(body) if body.target_id.as_str() == target)
        })
        .count()
}
