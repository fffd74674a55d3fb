use std::sync::Arc;
use tokio::sync::broadcast;
pub use concore::types::events::*;

use crate::calls::transport::RemoteStream;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 32;

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with a separate broadcast channel per event
        /// type, for the display boundary to subscribe to.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Call lifecycle
    (phase, Arc<PhaseChanged>),
    (incoming, Arc<IncomingRing>),
    (ended, Arc<CallEnded>),
    (remote_stream, Arc<RemoteStream>),

    // Channel connectivity
    (channel, Arc<ChannelUpdate>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
