/// Group data structures.
use chrono::{DateTime, FixedOffset, Utc};

use crate::envelope::{Envelope, GroupBroadcast};
use crate::topic::{group_topic, valid_group_name};
use crate::types::PeerId;

// ── Group ────────────────────────────────────────────────────────────────

/// A group as known locally. Only the leader mutates membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub leader_id: PeerId,
    /// Members in join order. Never has duplicates; always holds the leader.
    pub members: Vec<PeerId>,
    /// Always `GROUP_<name>`.
    pub topic: String,
}

impl Group {
    /// A fresh group whose only member is its leader.
    pub fn new(name: &str, leader_id: PeerId) -> Self {
        Self {
            name: name.to_string(),
            topic: group_topic(name),
            members: vec![leader_id.clone()],
            leader_id,
        }
    }

    /// Rebuild a group from a directory broadcast.
    ///
    /// Returns `None` when the name is unusable or the topic does not match it. Duplicate
    /// members are dropped and a missing leader is put first.
    pub fn from_broadcast(b: &GroupBroadcast) -> Option<Self> {
        if !valid_group_name(&b.name) || b.topic != group_topic(&b.name) {
            return None;
        }
        let mut group = Self::new(&b.name, b.leader_id.clone());
        group.members.clear();
        if !b.members.contains(&b.leader_id) {
            group.members.push(b.leader_id.clone());
        }
        for member in &b.members {
            group.add_member(member.clone());
        }
        Some(group)
    }

    pub fn to_broadcast(&self, timestamp: u64) -> GroupBroadcast {
        GroupBroadcast {
            name: self.name.clone(),
            leader_id: self.leader_id.clone(),
            members: self.members.clone(),
            topic: self.topic.clone(),
            timestamp,
        }
    }

    pub fn is_member(&self, peer: &PeerId) -> bool {
        self.members.contains(peer)
    }

    pub fn is_leader(&self, peer: &PeerId) -> bool {
        self.leader_id == *peer
    }

    /// Add a member. Returns `false` if already present.
    pub fn add_member(&mut self, peer: PeerId) -> bool {
        if self.is_member(&peer) {
            return false;
        }
        self.members.push(peer);
        true
    }
}

// ── GroupJoinRequest ─────────────────────────────────────────────────────

/// A join request held by the group's leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupJoinRequest {
    pub group_name: String,
    pub from: PeerId,
    pub to: PeerId,
    pub timestamp: u64,
}

// ── GroupLogEntry ────────────────────────────────────────────────────────

/// One message in a group log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLogEntry {
    pub sender: PeerId,
    /// Sender's display name when the message was recorded.
    pub sender_name: String,
    pub text: String,
    pub timestamp: u64,
}

impl GroupLogEntry {
    /// `[HH:MM] [sender]: text`, with the time shown at `offset`.
    pub fn render(&self, offset: &FixedOffset) -> String {
        let time = DateTime::<Utc>::from_timestamp_millis(self.timestamp as i64)
            .map(|t| t.with_timezone(offset).format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string());
        format!("[{time}] [{}]: {}", self.sender_name, self.text)
    }
}

// ── GroupAction / GroupEvent ─────────────────────────────────────────────

/// Action produced by the registry for the runtime to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupAction {
    /// Publish an envelope (retained for directory broadcasts).
    Publish {
        topic: String,
        envelope: Envelope,
        retained: bool,
    },
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
    /// Surface an event to the operator.
    Event(GroupEvent),
}

/// Group events surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvent {
    /// A group appeared in the directory.
    GroupCreated { group: Group },
    /// A group's membership changed.
    GroupUpdated { group: Group },
    /// A group was deleted by its leader.
    GroupDeleted { name: String },
    /// We became a member and now follow the group topic.
    Joined { group_name: String, topic: String },
    /// (Leader) a peer asked to join.
    JoinRequested { group_name: String, from: PeerId },
    /// The leader declined our join request.
    JoinRejected { group_name: String, leader: PeerId },
    /// A leader added us to a group.
    InvitationReceived { group_name: String, from: PeerId },
    /// A message from another member.
    MessageReceived {
        group_name: String,
        entry: GroupLogEntry,
        /// Rendered `[HH:MM] [sender]: text` line.
        line: String,
    },
    /// A protocol violation handled as a local no-op.
    Notice(String),
}
