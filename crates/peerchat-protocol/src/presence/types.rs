/// Presence data structures.
use crate::envelope::Envelope;
use crate::types::{PeerId, PresenceStatus};

// ── Constants ────────────────────────────────────────────────────────────

/// Default grace period before an offline peer is purged (30 seconds).
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 30_000;

// ── RemovalTimer ─────────────────────────────────────────────────────────

/// Handle for a scheduled removal, stored on the record it guards.
///
/// `ticket` changes on every reschedule, so a stale handle never matches
/// the record's current timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalTimer {
    pub ticket: u64,
    /// Unix ms at which the record is removed.
    pub deadline: u64,
}

// ── PresenceRecord ───────────────────────────────────────────────────────

/// What this peer currently believes about another peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub peer_id: PeerId,
    pub display_name: String,
    pub status: PresenceStatus,
    /// Timestamp of the last announcement applied (sender clock, Unix ms).
    pub last_activity: u64,
    /// Pending removal, set only while `status` is offline.
    pub removal: Option<RemovalTimer>,
}

impl PresenceRecord {
    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }
}

// ── Announcement ─────────────────────────────────────────────────────────

/// A decoded `status_update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub peer_id: PeerId,
    pub display_name: String,
    pub status: PresenceStatus,
    pub timestamp: u64,
}

impl Announcement {
    /// Extract an announcement from a `status_update` envelope.
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        match envelope {
            Envelope::StatusUpdate {
                user_id,
                status,
                timestamp,
                name,
            } => Some(Self {
                peer_id: user_id.clone(),
                display_name: name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| user_id.to_string()),
                status: *status,
                timestamp: *timestamp,
            }),
            _ => None,
        }
    }
}

// ── PresenceView ─────────────────────────────────────────────────────────

/// Read-only view of presence, for components that must not mutate it.
pub trait PresenceView {
    /// Best known display name, if the peer is known.
    fn display_name(&self, peer: &PeerId) -> Option<&str>;

    /// Last announced status, if the peer is known.
    fn status(&self, peer: &PeerId) -> Option<PresenceStatus>;

    fn is_online(&self, peer: &PeerId) -> bool {
        self.status(peer) == Some(PresenceStatus::Online)
    }
}

// ── Actions / events ─────────────────────────────────────────────────────

/// Action produced by the tracker for the runtime to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceAction {
    /// Publish an envelope.
    Publish {
        topic: String,
        envelope: Envelope,
        retained: bool,
    },
    /// Surface an event to the operator.
    Event(PresenceEvent),
}

/// Presence changes surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A peer was seen for the first time, or came back online.
    PeerOnline {
        peer_id: PeerId,
        display_name: String,
    },
    /// A peer announced offline; removal is scheduled.
    PeerOffline { peer_id: PeerId },
    /// The grace period elapsed and the record was purged.
    PeerRemoved { peer_id: PeerId },
}
