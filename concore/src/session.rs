//! Call session state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::types::call::{CallDirection, MediaFlags};
use crate::types::id::ConnectId;

/// Current phase of a call attempt.
///
/// An accepted incoming call goes back through `Dialing`: both directions
/// wait for the transport to report media before reaching `Connected`.
#[derive(Debug, Clone, Serialize, Default)]
pub enum CallPhase {
    /// No call in progress.
    #[default]
    Idle,
    /// Negotiating: offer sent (outgoing) or answered (incoming), media not
    /// yet flowing.
    Dialing { since: DateTime<Utc> },
    /// Incoming offer ringing locally, not yet answered.
    Incoming { received_at: DateTime<Utc> },
    /// Media flowing both ways.
    Connected { connected_at: DateTime<Utc> },
}

impl CallPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_dialing(&self) -> bool {
        matches!(self, Self::Dialing { .. })
    }

    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::Incoming { .. })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dialing { .. } => "dialing",
            Self::Incoming { .. } => "incoming",
            Self::Connected { .. } => "connected",
        }
    }
}

/// State transitions applied to a live session.
///
/// Session creation and teardown are not transitions: the controller owns
/// those by installing or dropping the session value itself.
#[derive(Debug, Clone)]
pub enum CallTransition {
    /// Local user answered an incoming ring.
    LocalAccepted,
    /// Transport reports remote media; the call is live.
    MediaConnected,
    AudioMuteChanged { muted: bool },
    VideoStateChanged { off: bool },
}

/// One call attempt. Created on dial or on an incoming offer, dropped on
/// teardown; at most one exists at a time.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub peer: ConnectId,
    pub direction: CallDirection,
    /// Distinguishes this session instance from superseded ones. Async
    /// completions stamped with an older epoch are stale and discarded.
    pub epoch: u64,
    pub phase: CallPhase,
    pub flags: MediaFlags,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new_outgoing(peer: ConnectId, epoch: u64) -> Self {
        Self {
            peer,
            direction: CallDirection::Outgoing,
            epoch,
            phase: CallPhase::Dialing { since: Utc::now() },
            flags: MediaFlags::default(),
            created_at: Utc::now(),
        }
    }

    pub fn new_incoming(peer: ConnectId, epoch: u64) -> Self {
        Self {
            peer,
            direction: CallDirection::Incoming,
            epoch,
            phase: CallPhase::Incoming {
                received_at: Utc::now(),
            },
            flags: MediaFlags::default(),
            created_at: Utc::now(),
        }
    }

    pub fn can_accept(&self) -> bool {
        self.phase.is_ringing()
    }

    /// Seconds of connected time so far, if the call is or was live.
    pub fn connected_secs(&self) -> Option<i64> {
        match self.phase {
            CallPhase::Connected { connected_at } => {
                Some(Utc::now().signed_duration_since(connected_at).num_seconds())
            }
            _ => None,
        }
    }

    /// Apply a state transition. Returns an error if the transition is not
    /// valid for the current phase; the session is left untouched then.
    pub fn apply(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let new_phase = match (&self.phase, &transition) {
            (CallPhase::Incoming { .. }, CallTransition::LocalAccepted) => {
                CallPhase::Dialing { since: Utc::now() }
            }
            (CallPhase::Dialing { .. }, CallTransition::MediaConnected) => CallPhase::Connected {
                connected_at: Utc::now(),
            },
            // Track gates are intrinsic to the session and never change the
            // phase; valid in every live phase.
            (_, CallTransition::AudioMuteChanged { muted }) => {
                self.flags.muted = *muted;
                return Ok(());
            }
            (_, CallTransition::VideoStateChanged { off }) => {
                self.flags.video_off = *off;
                return Ok(());
            }
            (current, attempted) => {
                return Err(InvalidTransition {
                    current: current.name(),
                    attempted: format!("{attempted:?}"),
                });
            }
        };
        self.phase = new_phase;
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
#[error("invalid transition {attempted} in phase {current}")]
pub struct InvalidTransition {
    pub current: &'static str,
    pub attempted: String,
}
