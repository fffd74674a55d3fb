//! Peer transport collaborator contract.
//!
//! The negotiation and codec machinery (a WebRTC stack in the Connectly
//! web client) lives outside this crate. The call layer drives it through
//! these traits and relays its opaque payloads over signaling; it never
//! looks inside them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use concore::ConnectId;

use crate::media::MediaStream;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("transport closed")]
    Closed,
}

/// Remote media surfacing back to the display boundary.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub id: String,
    pub has_audio: bool,
    pub has_video: bool,
}

/// Events emitted by one transport session.
#[derive(Debug)]
pub enum TransportEvent {
    /// Negotiation produced a candidate to relay to the peer.
    LocalCandidate(Value),
    /// Remote media arrived; the call is live.
    RemoteStream(RemoteStream),
    /// The session ended from the far side or below.
    Closed,
    /// Negotiation or media failure; the session is unusable.
    Error(String),
}

/// One peer-to-peer negotiation/media session.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// The offer (outgoing) or answer (incoming) payload to relay to the
    /// peer over signaling.
    async fn local_description(&self) -> Result<Value, TransportError>;

    /// Apply the peer's answer to our offer.
    async fn apply_answer(&self, payload: Value) -> Result<(), TransportError>;

    /// Feed a relayed candidate from the peer.
    async fn add_candidate(&self, payload: Value) -> Result<(), TransportError>;

    /// Close the session. Idempotent.
    async fn close(&self);
}

/// Creates transport sessions bound to the local capture stream.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Start an outgoing negotiation towards `peer`.
    async fn create_outgoing(
        &self,
        peer: &ConnectId,
        local: Arc<MediaStream>,
    ) -> Result<(Arc<dyn TransportSession>, mpsc::Receiver<TransportEvent>), TransportError>;

    /// Answer a received offer.
    async fn create_incoming(
        &self,
        offer: Value,
        local: Arc<MediaStream>,
    ) -> Result<(Arc<dyn TransportSession>, mpsc::Receiver<TransportEvent>), TransportError>;
}
