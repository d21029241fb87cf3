use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PeerChatError;

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── PeerId ───────────────────────────────────────────────────────────────

/// Ids that would make a peer's topics collide with directory or group topics.
const RESERVED_IDS: [&str; 3] = ["USERS", "GROUPS", "GROUP"];

/// Identity of one running peer, chosen at startup.
///
/// Doubles as the name of the peer's control channel (`<id>_Control`) and
/// as a segment of session topics (`<a>_<b>_<ts>`), so it may not contain
/// `_`, topic separators or wildcards, or whitespace. Directory names and
/// the group prefix are reserved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    /// Validate and wrap a peer id.
    pub fn new(id: impl Into<String>) -> Result<Self, PeerChatError> {
        let id = id.into();
        let invalid = id.is_empty()
            || RESERVED_IDS.contains(&id.as_str())
            || id
                .chars()
                .any(|c| matches!(c, '_' | '/' | '+' | '#') || c.is_whitespace());
        if invalid {
            return Err(PeerChatError::InvalidPeerId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PeerId {
    type Error = PeerChatError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

impl std::str::FromStr for PeerId {
    type Err = PeerChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl PartialEq<str> for PeerId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PeerId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// ── Statuses ─────────────────────────────────────────────────────────────

/// Presence status carried by `status_update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceStatus::Online => f.write_str("online"),
            PresenceStatus::Offline => f.write_str("offline"),
        }
    }
}

/// Decision carried by conversation and join responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Accepted,
    Rejected,
}

impl ResponseStatus {
    pub fn from_accept(accept: bool) -> Self {
        if accept {
            ResponseStatus::Accepted
        } else {
            ResponseStatus::Rejected
        }
    }
}

// ── ChatMessage ──────────────────────────────────────────────────────────

/// One entry in a 1:1 conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: PeerId,
    pub text: String,
    pub timestamp: u64,
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sender, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_accepts_plain_names() {
        for id in ["alice", "bob-2", "Zoë", "x.y"] {
            assert!(PeerId::new(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn peer_id_rejects_topic_syntax() {
        for id in ["", "a_b", "a/b", "a+", "#", "a b", "tab\t"] {
            assert!(PeerId::new(id).is_err(), "{id:?} should be rejected");
        }
    }

    #[test]
    fn peer_id_rejects_reserved_names() {
        for id in ["GROUP", "GROUPS", "USERS"] {
            assert!(
                matches!(PeerId::new(id), Err(PeerChatError::InvalidPeerId(_))),
                "{id} should be reserved"
            );
        }
        assert!(PeerId::new("Group").is_ok());
        assert!(serde_json::from_str::<PeerId>("\"GROUP\"").is_err());
    }

    #[test]
    fn peer_id_serde_validates() {
        let id: PeerId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(id, "alice");
        assert!(serde_json::from_str::<PeerId>("\"a_b\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
    }

    #[test]
    fn statuses_are_lowercase_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&PresenceStatus::Offline).unwrap(),
            "\"offline\""
        );
        assert_eq!(
            serde_json::to_string(&ResponseStatus::Accepted).unwrap(),
            "\"accepted\""
        );
        assert!(serde_json::from_str::<ResponseStatus>("\"maybe\"").is_err());
    }

    #[test]
    fn chat_message_display() {
        let msg = ChatMessage {
            sender: PeerId::new("x").unwrap(),
            text: "hi".into(),
            timestamp: 1,
        };
        assert_eq!(msg.to_string(), "x: hi");
    }

    #[test]
    fn now_ms_is_recent() {
        // After 2020-01-01.
        assert!(now_ms() > 1_577_836_800_000);
    }
}
