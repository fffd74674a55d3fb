// Re-export the pure core so downstream code only deals with one crate
pub use concore::{backoff, error, session, signaling};

// Core types are re-exported; the EventBus stays here because it is built
// on the tokio broadcast runtime
pub mod types {
    pub use concore::types::*;
    pub mod events;
}

pub mod calls;
pub mod client;
pub mod config;
pub mod media;
pub mod socket;

pub use concore::{CallError, ConnectId};

pub use client::Client;
pub use config::ClientConfig;
