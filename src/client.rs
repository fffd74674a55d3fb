//! Client: owns the signaling channel and the call manager, and drives
//! reconnection with capped exponential backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::time::sleep;

use concore::ConnectId;
use concore::backoff::Backoff;
use concore::signaling::{ChannelErrorKind, SignalingEvent, WireFrame};
use concore::types::events::{ChannelState, ChannelUpdate};

use crate::calls::CallManager;
use crate::calls::transport::TransportFactory;
use crate::config::ClientConfig;
use crate::media::{MediaBackend, MediaDeviceManager};
use crate::socket::{SignalingSocket, SocketError, SocketEvent, SocketFactory};
use crate::types::events::EventBus;

/// Shared handle to the signaling channel: the live socket (if any) plus
/// the connectivity state. Call transitions read it without taking any
/// session lock, so the supervisor never contends with them.
pub struct ChannelHandle {
    socket: Mutex<Option<Arc<dyn SignalingSocket>>>,
    state: watch::Sender<ChannelState>,
}

impl ChannelHandle {
    pub(crate) fn new() -> Self {
        Self {
            socket: Mutex::new(None),
            state: watch::channel(ChannelState::Connecting).0,
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Watch channel-state transitions without polling.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }

    pub(crate) async fn send(&self, frame: &WireFrame) -> Result<(), SocketError> {
        let socket = self.socket.lock().await.clone();
        match socket {
            Some(socket) => socket.send(frame).await,
            None => Err(SocketError::Closed),
        }
    }

    pub(crate) async fn install(&self, socket: Arc<dyn SignalingSocket>) {
        *self.socket.lock().await = Some(socket);
    }

    pub(crate) async fn take(&self) -> Option<Arc<dyn SignalingSocket>> {
        self.socket.lock().await.take()
    }
}

pub struct Client {
    self_id: ConnectId,
    config: ClientConfig,
    socket_factory: Arc<dyn SocketFactory>,
    channel: Arc<ChannelHandle>,
    calls: Arc<CallManager>,
    bus: Arc<EventBus>,

    is_running: AtomicBool,
    is_connecting: AtomicBool,
    enable_reconnect: AtomicBool,

    /// One-shot dial target from the navigation boundary, consumed the
    /// first time the channel is open.
    auto_dial: Mutex<Option<ConnectId>>,
    resume_notify: Notify,
    shutdown_notify: Notify,
}

impl Client {
    pub fn new(
        self_id: ConnectId,
        config: ClientConfig,
        socket_factory: Arc<dyn SocketFactory>,
        transport_factory: Arc<dyn TransportFactory>,
        media_backend: Arc<dyn MediaBackend>,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let channel = Arc::new(ChannelHandle::new());
        let media = Arc::new(MediaDeviceManager::new(media_backend));
        let calls = CallManager::new(
            self_id.clone(),
            config.call.clone(),
            media,
            transport_factory,
            channel.clone(),
            bus.clone(),
        );
        let auto_dial = config.auto_dial.clone();

        Arc::new(Self {
            self_id,
            config,
            socket_factory,
            channel,
            calls,
            bus,
            is_running: AtomicBool::new(false),
            is_connecting: AtomicBool::new(false),
            enable_reconnect: AtomicBool::new(true),
            auto_dial: Mutex::new(auto_dial),
            resume_notify: Notify::new(),
            shutdown_notify: Notify::new(),
        })
    }

    pub fn self_id(&self) -> &ConnectId {
        &self.self_id
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn calls(&self) -> &Arc<CallManager> {
        &self.calls
    }

    pub fn channel(&self) -> &Arc<ChannelHandle> {
        &self.channel
    }

    /// Connection supervisor: keeps the signaling channel alive, retrying
    /// with capped exponential backoff that resets after a successful
    /// reopen. Independent of call state; a lost channel never tears down
    /// an established call here. Returns when `shutdown` is called or the
    /// channel fails permanently.
    pub async fn run(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "Client", "run called while already running");
            return;
        }
        let mut backoff = Backoff::new(
            self.config.reconnect_initial_delay,
            self.config.reconnect_max_delay,
        );
        while self.is_running.load(Ordering::Relaxed) {
            match self.connect_once().await {
                Ok(events) => {
                    let opened = self.read_loop(events).await;
                    let _ = self.channel.take().await;
                    if opened {
                        backoff.reset();
                    }
                }
                Err(e) => warn!(target: "Client", "connect failed: {e}"),
            }

            if !self.is_running.load(Ordering::Relaxed)
                || !self.enable_reconnect.load(Ordering::Relaxed)
            {
                break;
            }

            let delay = backoff.next_delay();
            self.set_channel_state(ChannelState::Reconnecting);
            info!(
                target: "Client",
                "will attempt to reconnect in {:?} (attempt {})",
                delay,
                backoff.attempts()
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.resume_notify.notified() => {
                    info!(target: "Client", "resumed while disconnected, reconnecting now");
                }
                _ = self.shutdown_notify.notified() => break,
            }
        }
        self.is_running.store(false, Ordering::Relaxed);
        self.set_channel_state(ChannelState::Closed);
        info!(target: "Client", "client run loop has shut down");
    }

    async fn connect_once(&self) -> Result<mpsc::Receiver<SocketEvent>, SocketError> {
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            return Err(SocketError::AlreadyConnecting);
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });

        info!(target: "Client", "connecting as {}", self.self_id);
        let (socket, events) = self.socket_factory.connect(&self.self_id).await?;
        self.channel.install(socket).await;
        Ok(events)
    }

    /// Consume one socket's events until it dies. Returns whether the
    /// channel reached the open state on this connection, which is what
    /// resets the reconnect backoff.
    async fn read_loop(self: &Arc<Self>, mut events: mpsc::Receiver<SocketEvent>) -> bool {
        let mut opened = false;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SocketEvent::Frame(frame)) => {
                        if !self.dispatch_frame(frame, &mut opened).await {
                            return opened;
                        }
                    }
                    Some(SocketEvent::Disconnected) | None => {
                        info!(target: "Client", "signaling channel disconnected");
                        self.set_channel_state(ChannelState::Reconnecting);
                        self.calls
                            .handle_signaling_event(SignalingEvent::ChannelDisconnected)
                            .await;
                        return opened;
                    }
                },
                _ = self.shutdown_notify.notified() => {
                    self.disconnect_socket().await;
                    return opened;
                }
            }
        }
    }

    /// Returns false when the connection must be abandoned for good.
    async fn dispatch_frame(self: &Arc<Self>, frame: WireFrame, opened: &mut bool) -> bool {
        let Some(event) = frame.into_event(&self.self_id) else {
            debug!(target: "Client", "dropping frame not addressed to us");
            return true;
        };
        match event {
            SignalingEvent::ChannelOpened => {
                *opened = true;
                info!(target: "Client", "registered as {}", self.self_id);
                self.set_channel_state(ChannelState::Open);
                self.calls
                    .handle_signaling_event(SignalingEvent::ChannelOpened)
                    .await;
                self.fire_auto_dial().await;
                true
            }
            SignalingEvent::ChannelError(ChannelErrorKind::Fatal) => {
                error!(target: "Client", "fatal signaling error, giving up");
                self.enable_reconnect.store(false, Ordering::Relaxed);
                self.calls
                    .handle_signaling_event(SignalingEvent::ChannelError(ChannelErrorKind::Fatal))
                    .await;
                self.disconnect_socket().await;
                false
            }
            other => {
                self.calls.handle_signaling_event(other).await;
                true
            }
        }
    }

    /// Navigation hint: dial `target` as soon as possible, exactly once.
    /// Applied immediately if the channel is already open, otherwise the
    /// next channel-open consumes it. It never re-fires on reconnect.
    pub async fn request_auto_dial(&self, target: ConnectId) {
        *self.auto_dial.lock().await = Some(target);
        if self.channel.is_open() {
            self.fire_auto_dial().await;
        }
    }

    async fn fire_auto_dial(&self) {
        // Taken before dialing: consumed exactly once whatever the outcome.
        let target = self.auto_dial.lock().await.take();
        if let Some(target) = target {
            info!(target: "Client", "auto-dialing {target}");
            if let Err(e) = self.calls.dial(target.clone()).await {
                warn!(target: "Client", "auto-dial to {target} failed: {e}");
            }
        }
    }

    /// Reconciliation hook for process resume: if the channel is down,
    /// skip the rest of the backoff delay and reconnect immediately.
    pub fn notify_resumed(&self) {
        if !self.channel.is_open() {
            debug!(target: "Client", "resume requested while disconnected");
            self.resume_notify.notify_waiters();
        }
    }

    /// Stop the supervisor, end any live call and close the socket.
    pub async fn shutdown(&self) {
        info!(target: "Client", "shutting down");
        self.enable_reconnect.store(false, Ordering::Relaxed);
        self.is_running.store(false, Ordering::Relaxed);
        if let Err(e) = self.calls.hangup().await {
            debug!(target: "Client", "no call to end on shutdown: {e}");
        }
        self.shutdown_notify.notify_waiters();
        self.disconnect_socket().await;
        self.set_channel_state(ChannelState::Closed);
    }

    async fn disconnect_socket(&self) {
        if let Some(socket) = self.channel.take().await {
            socket.disconnect().await;
        }
    }

    fn set_channel_state(&self, state: ChannelState) {
        if self.channel.state() == state {
            return;
        }
        self.channel.set_state(state);
        let _ = self.bus.channel.send(Arc::new(ChannelUpdate { state }));
    }
}
