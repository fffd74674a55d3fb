//! Call session management.
//!
//! This module owns the lifecycle of one call attempt, from dial or
//! incoming offer through negotiation, active media and teardown.
//!
//! # Architecture
//!
//! - [`CallManager`]: orchestrates the zero-or-one live session; every
//!   state transition funnels through it
//! - [`concore::session`]: the pure phase/transition state machine
//! - [`transport`]: the collaborator contract for the peer negotiation and
//!   media stack
//!
//! Signaling events arrive from the client's read loop; transport events
//! arrive from a per-session pump and are stamped with the session epoch
//! so completions belonging to a superseded session are discarded.

pub mod controller;
pub mod transport;

pub use controller::{CallManager, CallManagerConfig};
pub use transport::{
    RemoteStream, TransportError, TransportEvent, TransportFactory, TransportSession,
};
