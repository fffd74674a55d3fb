//! Signaling wire format and channel events.
//!
//! The rendezvous service relays small JSON frames between registered ids
//! and never touches media. Peer traffic is one of `offer`, `answer` or
//! `candidate`, each carrying sender, target and an opaque payload the
//! transport layer understands; the service itself emits `open`,
//! `peer-unreachable` and `error` frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::id::ConnectId;

/// Common body of relayed peer-to-peer frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalBody {
    pub sender_id: ConnectId,
    pub target_id: ConnectId,
    /// Opaque negotiation data; only the transport collaborator reads it.
    pub payload: Value,
}

/// Everything that travels over the signaling channel, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireFrame {
    Offer(SignalBody),
    Answer(SignalBody),
    Candidate(SignalBody),
    /// Registration under our id confirmed; the channel is usable.
    Open,
    /// A relayed frame could not be delivered: target not registered.
    PeerUnreachable {
        #[serde(rename = "targetId")]
        target: ConnectId,
    },
    /// Service-side failure.
    Error { kind: WireErrorKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireErrorKind {
    /// Transient; the supervisor keeps the channel alive.
    Server,
    /// Unrecoverable, e.g. our own id was rejected. No retry.
    Fatal,
}

impl WireFrame {
    pub fn offer(sender: ConnectId, target: ConnectId, payload: Value) -> Self {
        Self::Offer(SignalBody {
            sender_id: sender,
            target_id: target,
            payload,
        })
    }

    pub fn answer(sender: ConnectId, target: ConnectId, payload: Value) -> Self {
        Self::Answer(SignalBody {
            sender_id: sender,
            target_id: target,
            payload,
        })
    }

    pub fn candidate(sender: ConnectId, target: ConnectId, payload: Value) -> Self {
        Self::Candidate(SignalBody {
            sender_id: sender,
            target_id: target,
            payload,
        })
    }

    /// Translate an inbound frame into a channel event for the call layer.
    ///
    /// Relayed frames whose target is not `self_id` are discarded (`None`):
    /// the service should never misroute, but a receiver must not act on
    /// traffic addressed to someone else.
    pub fn into_event(self, self_id: &ConnectId) -> Option<SignalingEvent> {
        match self {
            Self::Offer(body) => {
                if body.target_id != *self_id {
                    return None;
                }
                Some(SignalingEvent::IncomingOffer {
                    from: body.sender_id,
                    payload: body.payload,
                })
            }
            Self::Answer(body) => {
                if body.target_id != *self_id {
                    return None;
                }
                Some(SignalingEvent::TransportAnswered {
                    from: body.sender_id,
                    payload: body.payload,
                })
            }
            Self::Candidate(body) => {
                if body.target_id != *self_id {
                    return None;
                }
                Some(SignalingEvent::TransportCandidate {
                    from: body.sender_id,
                    payload: body.payload,
                })
            }
            Self::Open => Some(SignalingEvent::ChannelOpened),
            Self::PeerUnreachable { target } => Some(SignalingEvent::ChannelError(
                ChannelErrorKind::PeerUnreachable { target },
            )),
            Self::Error { kind, .. } => Some(SignalingEvent::ChannelError(match kind {
                WireErrorKind::Server => ChannelErrorKind::Server,
                WireErrorKind::Fatal => ChannelErrorKind::Fatal,
            })),
        }
    }
}

/// Channel-level events consumed by the call layer.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// A peer offered us a call.
    IncomingOffer { from: ConnectId, payload: Value },
    /// The peer answered our offer.
    TransportAnswered { from: ConnectId, payload: Value },
    /// The peer sent a negotiation candidate.
    TransportCandidate { from: ConnectId, payload: Value },
    /// Registration confirmed; dial/accept become available.
    ChannelOpened,
    /// Connection to the service lost; the supervisor will retry.
    ChannelDisconnected,
    /// Service-reported failure.
    ChannelError(ChannelErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelErrorKind {
    /// Ends only the current call attempt; channel health is unaffected.
    PeerUnreachable { target: ConnectId },
    /// Transient network-level failure.
    Network,
    /// Transient service-side failure.
    Server,
    /// Unrecoverable; surfaced upward, no retry.
    Fatal,
}
