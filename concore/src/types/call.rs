use serde::Serialize;

/// Which side created the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Why a call attempt stopped.
///
/// Every teardown path resolves to exactly one of these so the display
/// boundary can render a distinct message per cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndReason {
    /// Local user hung up or declined an incoming ring.
    Hangup,
    /// Remote side went away before media connected.
    Declined,
    /// Remote side closed an established call.
    RemoteClosed,
    /// Signaling service reported the target id is not registered.
    PeerUnreachable,
    /// Media negotiation or mid-call transport failure.
    TransportError,
    /// Local camera/microphone could not be acquired.
    MediaError,
    /// The signaling channel became permanently unusable mid-attempt.
    SignalingLost,
    /// Outgoing ring was never answered.
    Timeout,
}

/// Track-level gates intrinsic to one session. Reset on session start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MediaFlags {
    pub muted: bool,
    pub video_off: bool,
}

/// Local capture track kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}
