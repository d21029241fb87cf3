/// PresenceTracker: who is online, as seen by this peer.
///
/// Pure state machine: no I/O, no timers of its own. Removal deadlines are
/// stored on the records; the runtime asks for `next_deadline()` and calls
/// `expire_due_at()` when it passes.
use std::collections::BTreeMap;
use std::time::Duration;

use crate::envelope::Envelope;
use crate::presence::types::*;
use crate::topic::{presence_topic, PRESENCE_TOPIC};
use crate::types::{now_ms, PeerId, PresenceStatus};

/// Tracks presence records of remote peers.
pub struct PresenceTracker {
    local_id: PeerId,
    local_name: String,
    /// Last status we announced for ourselves.
    local_status: PresenceStatus,
    /// Grace period before an offline record is removed, in ms.
    grace_period_ms: u64,
    records: BTreeMap<PeerId, PresenceRecord>,
    next_ticket: u64,
}

impl PresenceTracker {
    pub fn new(local_id: PeerId, local_name: String, grace_period: Duration) -> Self {
        Self {
            local_id,
            local_name,
            local_status: PresenceStatus::Online,
            grace_period_ms: grace_period.as_millis() as u64,
            records: BTreeMap::new(),
            next_ticket: 0,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Online peers, ordered by id.
    pub fn snapshot_online(&self) -> Vec<PresenceRecord> {
        self.records
            .values()
            .filter(|r| r.is_online())
            .cloned()
            .collect()
    }

    /// Every known peer, ordered by id.
    pub fn snapshot_all(&self) -> Vec<PresenceRecord> {
        self.records.values().cloned().collect()
    }

    pub fn get(&self, peer: &PeerId) -> Option<&PresenceRecord> {
        self.records.get(peer)
    }

    pub fn local_status(&self) -> PresenceStatus {
        self.local_status
    }

    /// Earliest pending removal deadline (Unix ms).
    pub fn next_deadline(&self) -> Option<u64> {
        self.records
            .values()
            .filter_map(|r| r.removal.map(|t| t.deadline))
            .min()
    }

    // ── Outbound ─────────────────────────────────────────────────────────

    /// Announce our own status as a retained presence entry.
    ///
    /// Idempotent: the retained slot simply holds the latest value.
    pub fn announce_self(&mut self, status: PresenceStatus) -> Vec<PresenceAction> {
        self.announce_self_at(status, now_ms())
    }

    pub fn announce_self_at(&mut self, status: PresenceStatus, now: u64) -> Vec<PresenceAction> {
        self.local_status = status;
        vec![PresenceAction::Publish {
            topic: presence_topic(&self.local_id),
            envelope: Envelope::StatusUpdate {
                user_id: self.local_id.clone(),
                status,
                timestamp: now,
                name: Some(self.local_name.clone()),
            },
            retained: true,
        }]
    }

    /// Ask every peer to re-announce itself.
    pub fn request_refresh(&self) -> Vec<PresenceAction> {
        self.request_refresh_at(now_ms())
    }

    pub fn request_refresh_at(&self, now: u64) -> Vec<PresenceAction> {
        vec![PresenceAction::Publish {
            topic: PRESENCE_TOPIC.to_string(),
            envelope: Envelope::StatusRequest {
                requester: self.local_id.clone(),
                timestamp: now,
            },
            retained: false,
        }]
    }

    /// Answer another peer's status request by re-announcing.
    pub fn on_status_request(&mut self, requester: &PeerId) -> Vec<PresenceAction> {
        self.on_status_request_at(requester, now_ms())
    }

    pub fn on_status_request_at(&mut self, requester: &PeerId, now: u64) -> Vec<PresenceAction> {
        if *requester == self.local_id {
            return vec![];
        }
        self.announce_self_at(self.local_status, now)
    }

    // ── Inbound ──────────────────────────────────────────────────────────

    /// Apply an announcement from another peer.
    pub fn on_announcement(&mut self, announcement: Announcement) -> Vec<PresenceAction> {
        self.on_announcement_at(announcement, now_ms())
    }

    /// Apply an announcement received at `now` (local clock).
    ///
    /// The most recently delivered status always wins, whatever its
    /// timestamp says.
    pub fn on_announcement_at(&mut self, announcement: Announcement, now: u64) -> Vec<PresenceAction> {
        if announcement.peer_id == self.local_id {
            return vec![];
        }

        let previous = self.records.get(&announcement.peer_id).map(|r| r.status);
        let removal = match announcement.status {
            PresenceStatus::Online => None,
            PresenceStatus::Offline => Some(self.schedule(now)),
        };

        let peer_id = announcement.peer_id.clone();
        let display_name = announcement.display_name.clone();
        self.records.insert(
            announcement.peer_id.clone(),
            PresenceRecord {
                peer_id: announcement.peer_id,
                display_name: announcement.display_name,
                status: announcement.status,
                last_activity: announcement.timestamp,
                removal,
            },
        );

        let changed = previous != Some(announcement.status);
        match (announcement.status, changed) {
            (PresenceStatus::Online, true) => {
                tracing::debug!(peer = %peer_id, "peer online");
                vec![PresenceAction::Event(PresenceEvent::PeerOnline {
                    peer_id,
                    display_name,
                })]
            }
            (PresenceStatus::Offline, true) => {
                tracing::debug!(peer = %peer_id, grace_ms = self.grace_period_ms, "peer offline, removal scheduled");
                vec![PresenceAction::Event(PresenceEvent::PeerOffline { peer_id })]
            }
            _ => vec![],
        }
    }

    /// Cancel a pending removal. Returns whether one was pending.
    pub fn cancel_removal(&mut self, peer: &PeerId) -> bool {
        self.records
            .get_mut(peer)
            .and_then(|r| r.removal.take())
            .is_some()
    }

    /// Remove every record whose removal deadline has passed.
    pub fn expire_due_at(&mut self, now: u64) -> Vec<PresenceAction> {
        let due: Vec<PeerId> = self
            .records
            .values()
            .filter(|r| r.removal.is_some_and(|t| t.deadline <= now))
            .map(|r| r.peer_id.clone())
            .collect();

        due.into_iter()
            .map(|peer_id| {
                self.records.remove(&peer_id);
                tracing::info!(peer = %peer_id, "presence record expired");
                PresenceAction::Event(PresenceEvent::PeerRemoved { peer_id })
            })
            .collect()
    }

    fn schedule(&mut self, now: u64) -> RemovalTimer {
        self.next_ticket += 1;
        RemovalTimer {
            ticket: self.next_ticket,
            deadline: now.saturating_add(self.grace_period_ms),
        }
    }
}

impl PresenceView for PresenceTracker {
    fn display_name(&self, peer: &PeerId) -> Option<&str> {
        self.records.get(peer).map(|r| r.display_name.as_str())
    }

    fn status(&self, peer: &PeerId) -> Option<PresenceStatus> {
        self.records.get(peer).map(|r| r.status)
    }
}
