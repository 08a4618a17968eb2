//! Session identity and connection state.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a session in the registry.
///
/// Member-backed sessions reuse the member id so that a reconnecting
/// client finds its previous session; anonymous sessions get a generated
/// id that is never handed out twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Connection and watching state of a session.
///
/// Timestamps are Unix milliseconds of the last transition in each
/// direction; `None` until the transition has happened once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Transport (WebSocket) attached.
    pub is_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_connected_since: Option<u64>,

    /// Real-time peer reached the connected state.
    pub is_watching: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watching_since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_watching_since: Option<u64>,
}

impl SessionState {
    /// Record a transport transition. Returns `false` if nothing changed.
    pub fn set_connected(&mut self, connected: bool) -> bool {
        if self.is_connected == connected {
            return false;
        }
        self.is_connected = connected;
        if connected {
            self.connected_since = Some(unix_millis());
        } else {
            self.not_connected_since = Some(unix_millis());
        }
        true
    }

    /// Record a real-time peer transition. Returns `false` if nothing changed.
    pub fn set_watching(&mut self, watching: bool) -> bool {
        if self.is_watching == watching {
            return false;
        }
        self.is_watching = watching;
        if watching {
            self.watching_since = Some(unix_millis());
        } else {
            self.not_watching_since = Some(unix_millis());
        }
        true
    }
}

/// Current wall-clock time in Unix milliseconds.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn session_id_serializes_as_plain_string() {
        let id = SessionId::new("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
    }

    #[test]
    fn state_transitions_record_timestamps() {
        let mut state = SessionState::default();
        assert!(state.set_connected(true));
        assert!(!state.set_connected(true));
        assert!(state.connected_since.is_some());
        assert!(state.not_connected_since.is_none());

        assert!(state.set_watching(true));
        assert!(state.set_watching(false));
        assert!(!state.is_watching);
        assert!(state.not_watching_since.is_some());
    }
}
