//! Topic naming.
//!
//! | topic | use |
//! |---|---|
//! | `<peer>_Control` | private control channel |
//! | `USERS` | status requests (live) |
//! | `USERS/<peer>` | one retained announcement per peer |
//! | `GROUPS` | retained group directory |
//! | `<a>_<b>_<ts>` | 1:1 session |
//! | `GROUP_<name>` | group session |
use crate::types::PeerId;

/// Presence directory. Status requests are published here.
pub const PRESENCE_TOPIC: &str = "USERS";

/// Subscription filter covering every presence announcement.
pub const PRESENCE_FILTER: &str = "USERS/#";

/// Retained group directory.
pub const GROUP_DIRECTORY_TOPIC: &str = "GROUPS";

/// Suffix of per-peer control channels.
pub const CONTROL_SUFFIX: &str = "_Control";

/// Prefix of group session topics.
pub const GROUP_TOPIC_PREFIX: &str = "GROUP_";

/// Control channel of `peer`.
pub fn control_topic(peer: &PeerId) -> String {
    format!("{peer}{CONTROL_SUFFIX}")
}

/// Retained presence slot of `peer`.
pub fn presence_topic(peer: &PeerId) -> String {
    format!("{PRESENCE_TOPIC}/{peer}")
}

/// Session topic of a group.
pub fn group_topic(name: &str) -> String {
    format!("{GROUP_TOPIC_PREFIX}{name}")
}

/// Session topic for a conversation accepted at `timestamp`.
pub fn session_topic(requester: &PeerId, responder: &PeerId, timestamp: u64) -> String {
    format!("{requester}_{responder}_{timestamp}")
}

pub fn is_presence_topic(topic: &str) -> bool {
    topic == PRESENCE_TOPIC
        || topic
            .strip_prefix(PRESENCE_TOPIC)
            .is_some_and(|rest| rest.starts_with('/'))
}

pub fn is_group_directory_topic(topic: &str) -> bool {
    topic == GROUP_DIRECTORY_TOPIC
}

pub fn is_control_topic(topic: &str) -> bool {
    topic
        .strip_suffix(CONTROL_SUFFIX)
        .is_some_and(|owner| !owner.is_empty())
}

pub fn is_group_topic(topic: &str) -> bool {
    topic
        .strip_prefix(GROUP_TOPIC_PREFIX)
        .is_some_and(|name| !name.is_empty())
}

/// Group names become topic suffixes: no separators, wildcards or whitespace.
/// The resulting topic must not read as a control channel.
pub fn valid_group_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace())
        && !is_control_topic(&group_topic(name))
}

// ── SessionTopic ─────────────────────────────────────────────────────────

/// A topic decomposed as `<a>_<b>_<digits>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTopic {
    pub first: PeerId,
    pub second: PeerId,
    pub timestamp: u64,
}

impl SessionTopic {
    /// Decompose a topic. Returns `None` unless it is exactly two valid peer
    /// ids and a numeric timestamp joined by `_`.
    pub fn parse(topic: &str) -> Option<Self> {
        let mut parts = topic.split('_');
        let (first, second, ts) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        if ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            first: PeerId::new(first).ok()?,
            second: PeerId::new(second).ok()?,
            timestamp: ts.parse().ok()?,
        })
    }

    /// Whether `peer` is one of the two participants.
    pub fn includes(&self, peer: &PeerId) -> bool {
        self.first == *peer || self.second == *peer
    }

    /// The participant that is not `me`, if `me` participates.
    pub fn other(&self, me: &PeerId) -> Option<&PeerId> {
        if self.first == *me {
            Some(&self.second)
        } else if self.second == *me {
            Some(&self.first)
        } else {
            None
        }
    }
}
