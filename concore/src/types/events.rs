//! Payload types for events delivered to the display boundary.
//! The broadcast bus itself lives in the root crate.

use chrono::{DateTime, Utc};

use crate::session::CallPhase;
use crate::types::call::EndReason;
use crate::types::id::ConnectId;

/// The controller's phase changed; drives the main call screen.
#[derive(Debug, Clone)]
pub struct PhaseChanged {
    pub phase: CallPhase,
    pub peer: Option<ConnectId>,
}

/// An incoming offer is ringing locally.
#[derive(Debug, Clone)]
pub struct IncomingRing {
    pub from: ConnectId,
    pub received_at: DateTime<Utc>,
}

/// A call attempt ended and the controller returned to idle.
#[derive(Debug, Clone)]
pub struct CallEnded {
    pub peer: ConnectId,
    pub reason: EndReason,
    pub ended_at: DateTime<Utc>,
    /// Set only if the call reached the connected phase.
    pub duration_secs: Option<i64>,
}

/// Connectivity of the signaling channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// First connection attempt in progress.
    Connecting,
    /// Registered under our id; dial/accept available.
    Open,
    /// Connection lost, supervisor is retrying. Non-blocking for an
    /// established call.
    Reconnecting,
    /// Shut down or failed permanently; no further attempts.
    Closed,
}

#[derive(Debug, Clone)]
pub struct ChannelUpdate {
    pub state: ChannelState,
}
