//! Platform-independent core logic for connectly: identity, the call
//! session state machine, signaling wire types, backoff and errors.
//! No IO happens here; the async layer lives in the root crate.

pub mod backoff;
pub mod error;
pub mod session;
pub mod signaling;
pub mod types;

pub use error::CallError;
pub use types::id::ConnectId;
