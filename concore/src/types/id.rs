use rand::Rng;
use serde::{Deserialize, Serialize};

/// Connect-id: the short token a peer is dialed by.
///
/// The Connectly web client hands out 4-digit numeric ids, but nothing in
/// the core relies on that. The only guarantees used here are non-emptiness
/// and comparability (for the self-call check and signaling target
/// filtering).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectId(String);

impl ConnectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random 4-digit id, the format the web client assigns on signup.
    pub fn generate() -> Self {
        Self(rand::rng().random_range(1000..10000u32).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ConnectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
