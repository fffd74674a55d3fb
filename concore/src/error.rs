//! Error taxonomy for call session management.

use thiserror::Error;

use crate::session::InvalidTransition;
use crate::types::id::ConnectId;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("camera/microphone access denied")]
    PermissionDenied,

    #[error("camera/microphone unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("peer {0} is not reachable")]
    PeerUnreachable(ConnectId),

    #[error("signaling channel failed permanently: {0}")]
    ChannelFatal(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("signaling channel is not connected")]
    NotConnected,

    #[error("another call is already in progress")]
    AlreadyInCall,

    #[error("cannot call own id")]
    SelfCall,

    #[error("target id is empty")]
    EmptyTarget,

    #[error("no call in progress")]
    NoSession,

    #[error("call attempt cancelled")]
    Cancelled,

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),
}
