use std::time::Duration;

use concore::ConnectId;

use crate::calls::CallManagerConfig;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// First reconnect delay; doubles up to `reconnect_max_delay`.
    pub reconnect_initial_delay: Duration,
    /// Backoff cap.
    pub reconnect_max_delay: Duration,
    pub call: CallManagerConfig,
    /// Navigation hint: dial this id once the channel first opens.
    pub auto_dial: Option<ConnectId>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_delay: Duration::from_secs(2),
            reconnect_max_delay: Duration::from_secs(30),
            call: CallManagerConfig::default(),
            auto_dial: None,
        }
    }
}
