//! Call lifecycle orchestration.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, sleep};

use concore::ConnectId;
use concore::error::CallError;
use concore::session::{CallPhase, CallSession, CallTransition, InvalidTransition};
use concore::signaling::{ChannelErrorKind, SignalingEvent, WireFrame};
use concore::types::call::{CallDirection, EndReason, TrackKind};
use concore::types::events::{CallEnded, IncomingRing, PhaseChanged};

use super::transport::{TransportEvent, TransportFactory, TransportSession};
use crate::client::ChannelHandle;
use crate::media::{MediaConstraints, MediaDeviceManager};
use crate::types::events::EventBus;

/// Configuration for the call manager.
#[derive(Debug, Clone)]
pub struct CallManagerConfig {
    /// Abandon an unanswered outgoing ring after this many seconds.
    /// 0 disables the timer.
    pub ring_timeout_secs: u64,
    /// Capture constraints used for every session.
    pub media: MediaConstraints,
}

impl Default for CallManagerConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 45,
            media: MediaConstraints::default(),
        }
    }
}

/// The one live call attempt and the resources it holds.
struct ActiveCall {
    session: CallSession,
    /// Present iff the phase is Dialing or Connected.
    transport: Option<Arc<dyn TransportSession>>,
    media_acquired: bool,
    /// Offer payload held while ringing, consumed on accept.
    pending_offer: Option<Value>,
    /// Candidates relayed before the transport existed.
    pending_candidates: Vec<Value>,
}

impl ActiveCall {
    fn new(session: CallSession) -> Self {
        Self {
            session,
            transport: None,
            media_acquired: false,
            pending_offer: None,
            pending_candidates: Vec::new(),
        }
    }
}

/// Owns the zero-or-one live [`CallSession`] and every transition on it.
///
/// All mutations go through the single `active` slot; asynchronous
/// completions (media, negotiation, timers) re-enter stamped with the
/// session epoch they belong to and are discarded when stale, so a hangup
/// during a pending operation behaves as cancellation.
pub struct CallManager {
    self_id: ConnectId,
    config: CallManagerConfig,
    media: Arc<MediaDeviceManager>,
    transport_factory: Arc<dyn TransportFactory>,
    channel: Arc<ChannelHandle>,
    bus: Arc<EventBus>,
    active: Mutex<Option<ActiveCall>>,
    epoch: AtomicU64,
}

impl CallManager {
    pub(crate) fn new(
        self_id: ConnectId,
        config: CallManagerConfig,
        media: Arc<MediaDeviceManager>,
        transport_factory: Arc<dyn TransportFactory>,
        channel: Arc<ChannelHandle>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            self_id,
            config,
            media,
            transport_factory,
            channel,
            bus,
            active: Mutex::new(None),
            epoch: AtomicU64::new(0),
        })
    }

    /// Current phase; `Idle` when no session exists.
    pub async fn phase(&self) -> CallPhase {
        let active = self.active.lock().await;
        active
            .as_ref()
            .map(|call| call.session.phase.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the live session, if any.
    pub async fn session(&self) -> Option<CallSession> {
        let active = self.active.lock().await;
        active.as_ref().map(|call| call.session.clone())
    }

    /// Start an outgoing call to `peer`.
    ///
    /// Guards are checked before any resource is touched: a non-empty
    /// target that is not us, an open channel and no live session. An
    /// active call is never overridden.
    pub async fn dial(self: &Arc<Self>, peer: ConnectId) -> Result<(), CallError> {
        if peer.is_empty() {
            return Err(CallError::EmptyTarget);
        }
        if peer == self.self_id {
            return Err(CallError::SelfCall);
        }
        if !self.channel.is_open() {
            return Err(CallError::NotConnected);
        }

        let epoch = {
            let mut active = self.active.lock().await;
            if active.is_some() {
                return Err(CallError::AlreadyInCall);
            }
            let epoch = self.next_epoch();
            *active = Some(ActiveCall::new(CallSession::new_outgoing(
                peer.clone(),
                epoch,
            )));
            epoch
        };
        info!(target: "Calls", "dialing {peer}");
        self.emit_phase().await;

        let local = match self.media.acquire(&self.config.media).await {
            Ok(stream) => stream,
            Err(e) => {
                self.teardown(epoch, EndReason::MediaError).await;
                return Err(e.into());
            }
        };
        if !self.mark_media_acquired(epoch).await {
            // Hung up while the capture prompt was pending.
            self.media.release().await;
            return Err(CallError::Cancelled);
        }

        let (transport, events) = match self
            .transport_factory
            .create_outgoing(&peer, local)
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                self.teardown(epoch, EndReason::TransportError).await;
                return Err(CallError::Transport(e.to_string()));
            }
        };
        let offer = match transport.local_description().await {
            Ok(payload) => payload,
            Err(e) => {
                transport.close().await;
                self.teardown(epoch, EndReason::TransportError).await;
                return Err(CallError::Transport(e.to_string()));
            }
        };
        if !self.install_transport(epoch, transport.clone()).await {
            transport.close().await;
            return Err(CallError::Cancelled);
        }

        let frame = WireFrame::offer(self.self_id.clone(), peer.clone(), offer);
        if let Err(e) = self.channel.send(&frame).await {
            warn!(target: "Calls", "offer to {peer} not sent: {e}");
            self.teardown(epoch, EndReason::SignalingLost).await;
            return Err(CallError::NotConnected);
        }

        self.spawn_transport_pump(epoch, events);
        self.spawn_ring_timeout(epoch);
        Ok(())
    }

    /// Answer the ringing incoming call.
    pub async fn accept_incoming(self: &Arc<Self>) -> Result<(), CallError> {
        if !self.channel.is_open() {
            return Err(CallError::NotConnected);
        }
        let (epoch, peer, offer) = {
            let active = self.active.lock().await;
            let call = active.as_ref().ok_or(CallError::NoSession)?;
            if !call.session.can_accept() {
                return Err(InvalidTransition {
                    current: call.session.phase.name(),
                    attempted: "LocalAccepted".to_string(),
                }
                .into());
            }
            let offer = call.pending_offer.clone().ok_or(CallError::NoSession)?;
            (call.session.epoch, call.session.peer.clone(), offer)
        };
        info!(target: "Calls", "accepting call from {peer}");

        let local = match self.media.acquire(&self.config.media).await {
            Ok(stream) => stream,
            Err(e) => {
                self.teardown(epoch, EndReason::MediaError).await;
                return Err(e.into());
            }
        };
        if !self.mark_media_acquired(epoch).await {
            self.media.release().await;
            return Err(CallError::Cancelled);
        }

        let (transport, events) = match self
            .transport_factory
            .create_incoming(offer, local)
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                self.teardown(epoch, EndReason::TransportError).await;
                return Err(CallError::Transport(e.to_string()));
            }
        };
        let answer = match transport.local_description().await {
            Ok(payload) => payload,
            Err(e) => {
                transport.close().await;
                self.teardown(epoch, EndReason::TransportError).await;
                return Err(CallError::Transport(e.to_string()));
            }
        };
        if !self.promote_accepted(epoch, transport.clone()).await {
            transport.close().await;
            return Err(CallError::Cancelled);
        }
        self.emit_phase().await;

        let frame = WireFrame::answer(self.self_id.clone(), peer.clone(), answer);
        if let Err(e) = self.channel.send(&frame).await {
            warn!(target: "Calls", "answer to {peer} not sent: {e}");
            self.teardown(epoch, EndReason::SignalingLost).await;
            return Err(CallError::NotConnected);
        }

        self.spawn_transport_pump(epoch, events);
        Ok(())
    }

    /// End the live call attempt, whatever phase it is in. Also declines a
    /// ringing incoming call.
    pub async fn hangup(&self) -> Result<(), CallError> {
        let epoch = {
            let active = self.active.lock().await;
            active
                .as_ref()
                .map(|call| call.session.epoch)
                .ok_or(CallError::NoSession)?
        };
        self.teardown(epoch, EndReason::Hangup).await;
        Ok(())
    }

    /// Flip the microphone gate. Returns the new muted state.
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        let muted = {
            let mut active = self.active.lock().await;
            let call = active.as_mut().ok_or(CallError::NoSession)?;
            let muted = !call.session.flags.muted;
            call.session
                .apply(CallTransition::AudioMuteChanged { muted })?;
            muted
        };
        self.media
            .set_track_enabled(TrackKind::Audio, !muted)
            .await;
        Ok(muted)
    }

    /// Flip the camera gate. Returns the new video-off state.
    pub async fn toggle_video(&self) -> Result<bool, CallError> {
        let off = {
            let mut active = self.active.lock().await;
            let call = active.as_mut().ok_or(CallError::NoSession)?;
            let off = !call.session.flags.video_off;
            call.session
                .apply(CallTransition::VideoStateChanged { off })?;
            off
        };
        self.media.set_track_enabled(TrackKind::Video, !off).await;
        Ok(off)
    }

    /// Entry point for everything the signaling channel delivers.
    pub async fn handle_signaling_event(self: &Arc<Self>, event: SignalingEvent) {
        match event {
            SignalingEvent::IncomingOffer { from, payload } => {
                self.handle_incoming_offer(from, payload).await;
            }
            SignalingEvent::TransportAnswered { from, payload } => {
                self.handle_answer(from, payload).await;
            }
            SignalingEvent::TransportCandidate { from, payload } => {
                self.handle_candidate(from, payload).await;
            }
            // Channel state itself is the client's business; an open channel
            // only widens what dial/accept allow.
            SignalingEvent::ChannelOpened => {}
            SignalingEvent::ChannelDisconnected => {
                debug!(
                    target: "Calls",
                    "channel lost; established media continues, new attempts blocked until reopen"
                );
            }
            SignalingEvent::ChannelError(kind) => self.handle_channel_error(kind).await,
        }
    }

    async fn handle_incoming_offer(&self, from: ConnectId, payload: Value) {
        if from.is_empty() || from == self.self_id {
            warn!(target: "Calls", "dropping offer with bogus sender {from}");
            return;
        }
        let received_at = {
            let mut active = self.active.lock().await;
            if active.is_some() {
                // Single live session: a second offer is dropped and the
                // caller times out on their side.
                info!(target: "Calls", "busy, dropping offer from {from}");
                return;
            }
            let epoch = self.next_epoch();
            let session = CallSession::new_incoming(from.clone(), epoch);
            let received_at = match session.phase {
                CallPhase::Incoming { received_at } => received_at,
                _ => Utc::now(),
            };
            let mut call = ActiveCall::new(session);
            call.pending_offer = Some(payload);
            *active = Some(call);
            received_at
        };
        info!(target: "Calls", "incoming call from {from}");
        let _ = self.bus.incoming.send(Arc::new(IncomingRing {
            from: from.clone(),
            received_at,
        }));
        self.emit_phase().await;
    }

    async fn handle_answer(&self, from: ConnectId, payload: Value) {
        let transport = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(call)
                    if call.session.peer == from
                        && call.session.direction == CallDirection::Outgoing
                        && call.session.phase.is_dialing() =>
                {
                    call.transport.clone()
                }
                _ => {
                    debug!(target: "Calls", "dropping answer from {from} with no matching attempt");
                    None
                }
            }
        };
        if let Some(transport) = transport {
            if let Err(e) = transport.apply_answer(payload).await {
                // The transport will follow up with an Error event.
                warn!(target: "Calls", "answer from {from} rejected: {e}");
            }
        }
    }

    async fn handle_candidate(&self, from: ConnectId, payload: Value) {
        let transport = {
            let mut active = self.active.lock().await;
            match active.as_mut() {
                Some(call) if call.session.peer == from => match &call.transport {
                    Some(transport) => Some(transport.clone()),
                    None => {
                        // Ringing, not yet accepted: keep it for later.
                        call.pending_candidates.push(payload);
                        return;
                    }
                },
                _ => {
                    debug!(target: "Calls", "dropping candidate from {from} with no matching attempt");
                    None
                }
            }
        };
        if let Some(transport) = transport {
            if let Err(e) = transport.add_candidate(payload).await {
                warn!(target: "Calls", "candidate from {from} rejected: {e}");
            }
        }
    }

    async fn handle_channel_error(&self, kind: ChannelErrorKind) {
        match kind {
            ChannelErrorKind::PeerUnreachable { target } => {
                let epoch = {
                    let active = self.active.lock().await;
                    match active.as_ref() {
                        Some(call)
                            if call.session.peer == target
                                && !call.session.phase.is_connected() =>
                        {
                            Some(call.session.epoch)
                        }
                        _ => None,
                    }
                };
                if let Some(epoch) = epoch {
                    info!(target: "Calls", "{target} is unreachable");
                    self.teardown(epoch, EndReason::PeerUnreachable).await;
                }
            }
            ChannelErrorKind::Network | ChannelErrorKind::Server => {
                debug!(target: "Calls", "transient channel error: {kind:?}");
            }
            ChannelErrorKind::Fatal => {
                // No signaling, ever again: nothing can complete or be
                // ended remotely, so whatever is live goes down too.
                let epoch = {
                    let active = self.active.lock().await;
                    active.as_ref().map(|call| call.session.epoch)
                };
                if let Some(epoch) = epoch {
                    self.teardown(epoch, EndReason::SignalingLost).await;
                }
            }
        }
    }

    async fn handle_transport_event(self: &Arc<Self>, epoch: u64, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(payload) => {
                let peer = {
                    let active = self.active.lock().await;
                    match active.as_ref() {
                        Some(call) if call.session.epoch == epoch => {
                            Some(call.session.peer.clone())
                        }
                        _ => None,
                    }
                };
                let Some(peer) = peer else { return };
                let frame = WireFrame::candidate(self.self_id.clone(), peer, payload);
                if let Err(e) = self.channel.send(&frame).await {
                    warn!(target: "Calls", "candidate not sent: {e}");
                }
            }
            TransportEvent::RemoteStream(remote) => {
                let connected = {
                    let mut active = self.active.lock().await;
                    match active.as_mut() {
                        Some(call) if call.session.epoch == epoch => {
                            match call.session.apply(CallTransition::MediaConnected) {
                                Ok(()) => true,
                                Err(e) => {
                                    debug!(target: "Calls", "{e}");
                                    false
                                }
                            }
                        }
                        _ => {
                            debug!(target: "Calls", "ignoring stale remote stream (epoch {epoch})");
                            false
                        }
                    }
                };
                if connected {
                    info!(target: "Calls", "media connected");
                    let _ = self.bus.remote_stream.send(Arc::new(remote));
                    self.emit_phase().await;
                }
            }
            TransportEvent::Closed => {
                let reason = {
                    let active = self.active.lock().await;
                    match active.as_ref() {
                        Some(call) if call.session.epoch == epoch => {
                            Some(match (&call.session.phase, call.session.direction) {
                                (CallPhase::Connected { .. }, _) => EndReason::RemoteClosed,
                                (_, CallDirection::Outgoing) => EndReason::Declined,
                                _ => EndReason::RemoteClosed,
                            })
                        }
                        _ => None,
                    }
                };
                if let Some(reason) = reason {
                    self.teardown(epoch, reason).await;
                }
            }
            TransportEvent::Error(detail) => {
                warn!(target: "Calls", "transport error: {detail}");
                self.teardown(epoch, EndReason::TransportError).await;
            }
        }
    }

    /// Destroy the session identified by `epoch`: close the transport,
    /// release media, notify the display boundary. Stale epochs are no-ops,
    /// which is what makes hangup a cancellation for in-flight work.
    async fn teardown(&self, epoch: u64, reason: EndReason) {
        let call = {
            let mut active = self.active.lock().await;
            match active.take() {
                Some(call) if call.session.epoch == epoch => call,
                other => {
                    // Stale teardown: leave whatever session is live alone.
                    *active = other;
                    return;
                }
            }
        };
        let duration_secs = call.session.connected_secs();
        if let Some(transport) = &call.transport {
            transport.close().await;
        }
        if call.media_acquired {
            self.media.release().await;
        }
        info!(target: "Calls", "call with {} ended: {:?}", call.session.peer, reason);
        let _ = self.bus.ended.send(Arc::new(CallEnded {
            peer: call.session.peer.clone(),
            reason,
            ended_at: Utc::now(),
            duration_secs,
        }));
        self.emit_phase().await;
    }

    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn mark_media_acquired(&self, epoch: u64) -> bool {
        let mut active = self.active.lock().await;
        match active.as_mut() {
            Some(call) if call.session.epoch == epoch => {
                call.media_acquired = true;
                true
            }
            _ => false,
        }
    }

    async fn install_transport(&self, epoch: u64, transport: Arc<dyn TransportSession>) -> bool {
        let mut active = self.active.lock().await;
        match active.as_mut() {
            Some(call) if call.session.epoch == epoch => {
                call.transport = Some(transport);
                true
            }
            _ => false,
        }
    }

    /// Accept path: apply the transition, attach the transport and drain
    /// candidates that arrived while ringing.
    async fn promote_accepted(&self, epoch: u64, transport: Arc<dyn TransportSession>) -> bool {
        let pending = {
            let mut active = self.active.lock().await;
            let Some(call) = active.as_mut() else {
                return false;
            };
            if call.session.epoch != epoch {
                return false;
            }
            if let Err(e) = call.session.apply(CallTransition::LocalAccepted) {
                warn!(target: "Calls", "{e}");
                return false;
            }
            call.pending_offer = None;
            call.transport = Some(transport.clone());
            std::mem::take(&mut call.pending_candidates)
        };
        for payload in pending {
            if let Err(e) = transport.add_candidate(payload).await {
                warn!(target: "Calls", "buffered candidate rejected: {e}");
            }
        }
        true
    }

    fn spawn_transport_pump(self: &Arc<Self>, epoch: u64, mut events: mpsc::Receiver<TransportEvent>) {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                manager.handle_transport_event(epoch, event).await;
            }
        });
    }

    fn spawn_ring_timeout(self: &Arc<Self>, epoch: u64) {
        let secs = self.config.ring_timeout_secs;
        if secs == 0 {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(secs)).await;
            let expired = {
                let active = manager.active.lock().await;
                matches!(
                    active.as_ref(),
                    Some(call) if call.session.epoch == epoch && call.session.phase.is_dialing()
                )
            };
            if expired {
                info!(target: "Calls", "ring timeout");
                manager.teardown(epoch, EndReason::Timeout).await;
            }
        });
    }

    async fn emit_phase(&self) {
        let (phase, peer) = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(call) => (
                    call.session.phase.clone(),
                    Some(call.session.peer.clone()),
                ),
                None => (CallPhase::Idle, None),
            }
        };
        debug!(target: "Calls", "phase -> {}", phase.name());
        let _ = self.bus.phase.send(Arc::new(PhaseChanged { phase, peer }));
    }
}
