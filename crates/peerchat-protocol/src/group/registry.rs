/// GroupRegistry: group directory, membership arbitration, group logs.
///
/// Pure decision engine: no I/O. Returns `Vec<GroupAction>` that the
/// runtime executes against the bus.
///
/// Every peer caches every group it sees on the directory. Only the leader
/// of a group changes its membership; leader-only operations attempted by
/// anyone else are local no-ops with an operator notice.
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::FixedOffset;

use crate::envelope::{Envelope, GroupBroadcast};
use crate::error::PeerChatError;
use crate::group::types::*;
use crate::presence::PresenceView;
use crate::topic::{control_topic, group_topic, valid_group_name, GROUP_DIRECTORY_TOPIC, GROUP_TOPIC_PREFIX};
use crate::types::{now_ms, PeerId, ResponseStatus};

pub struct GroupRegistry {
    local_id: PeerId,
    local_name: String,
    /// Offset used when rendering log timestamps.
    log_offset: FixedOffset,
    /// Known groups by name.
    groups: BTreeMap<String, Group>,
    /// (Leader) pending join requests per group, in arrival order.
    pending: HashMap<String, Vec<GroupJoinRequest>>,
    /// Message log per group topic.
    logs: HashMap<String, Vec<GroupLogEntry>>,
    /// Group topics we follow.
    subscribed: HashSet<String>,
}

impl GroupRegistry {
    pub fn new(local_id: PeerId, local_name: String, log_offset: FixedOffset) -> Self {
        Self {
            local_id,
            local_name,
            log_offset,
            groups: BTreeMap::new(),
            pending: HashMap::new(),
            logs: HashMap::new(),
            subscribed: HashSet::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// All known groups, ordered by name.
    pub fn groups(&self) -> Vec<&Group> {
        self.groups.values().collect()
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Pending join requests for a group we lead.
    pub fn pending_requests(&self, name: &str) -> &[GroupJoinRequest] {
        self.pending.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscribed.contains(topic)
    }

    pub fn history(&self, topic: &str) -> Option<&[GroupLogEntry]> {
        self.logs.get(topic).map(|v| v.as_slice())
    }

    /// The log of `topic` rendered as `[HH:MM] [sender]: text` lines.
    pub fn formatted_history(&self, topic: &str) -> Vec<String> {
        self.logs
            .get(topic)
            .map(|log| log.iter().map(|e| e.render(&self.log_offset)).collect())
            .unwrap_or_default()
    }

    // ── Directory ────────────────────────────────────────────────────────

    /// Handle an envelope from the group directory topic.
    pub fn on_directory_update(&mut self, envelope: Envelope) -> Vec<GroupAction> {
        self.on_directory_update_at(envelope, now_ms())
    }

    pub fn on_directory_update_at(&mut self, envelope: Envelope, now: u64) -> Vec<GroupAction> {
        match envelope {
            Envelope::GroupCreated(b) => self.apply_broadcast(b, true),
            Envelope::GroupUpdated(b) => self.apply_broadcast(b, false),
            Envelope::GroupDeleted(b) => self.apply_delete(b),
            Envelope::GroupsSyncRequest { requester, .. } => self.on_sync_request_at(&requester, now),
            other => {
                tracing::debug!(kind = other.kind(), "not a directory envelope");
                vec![]
            }
        }
    }

    fn apply_broadcast(&mut self, broadcast: GroupBroadcast, created: bool) -> Vec<GroupAction> {
        let Some(group) = Group::from_broadcast(&broadcast) else {
            tracing::warn!(name = %broadcast.name, topic = %broadcast.topic, "malformed group broadcast dropped");
            return vec![];
        };

        let mut actions = Vec::new();
        let previous = self.groups.insert(group.name.clone(), group.clone());
        match previous {
            None if created => actions.push(GroupAction::Event(GroupEvent::GroupCreated {
                group: group.clone(),
            })),
            Some(ref prev) if *prev == group => {}
            _ => actions.push(GroupAction::Event(GroupEvent::GroupUpdated {
                group: group.clone(),
            })),
        }

        if group.is_leader(&self.local_id) {
            // Whoever was just admitted no longer needs a pending slot.
            if let Some(pending) = self.pending.get_mut(&group.name) {
                pending.retain(|r| !group.is_member(&r.from));
            }
        }

        if group.is_member(&self.local_id) {
            actions.extend(self.follow(&group.name, &group.topic));
        }
        actions
    }

    fn apply_delete(&mut self, broadcast: GroupBroadcast) -> Vec<GroupAction> {
        match self.groups.get(&broadcast.name) {
            None => return vec![],
            Some(known) if known.leader_id != broadcast.leader_id => {
                tracing::warn!(name = %broadcast.name, from = %broadcast.leader_id, "delete from a non-leader ignored");
                return vec![];
            }
            Some(_) => {}
        }
        self.forget(&broadcast.name)
    }

    /// Drop a group, its log and its pending requests.
    fn forget(&mut self, name: &str) -> Vec<GroupAction> {
        let Some(group) = self.groups.remove(name) else {
            return vec![];
        };
        self.pending.remove(name);
        self.logs.remove(&group.topic);
        tracing::info!(name, "group deleted");

        let mut actions = Vec::new();
        if self.subscribed.remove(&group.topic) {
            actions.push(GroupAction::Unsubscribe { topic: group.topic });
        }
        actions.push(GroupAction::Event(GroupEvent::GroupDeleted {
            name: name.to_string(),
        }));
        actions
    }

    /// Subscribe to a group topic the first time we are a member.
    fn follow(&mut self, name: &str, topic: &str) -> Vec<GroupAction> {
        self.logs.entry(topic.to_string()).or_default();
        if !self.subscribed.insert(topic.to_string()) {
            return vec![];
        }
        tracing::info!(name, topic, "following group");
        vec![
            GroupAction::Subscribe {
                topic: topic.to_string(),
            },
            GroupAction::Event(GroupEvent::Joined {
                group_name: name.to_string(),
                topic: topic.to_string(),
            }),
        ]
    }

    /// Ask leaders to re-publish their groups.
    pub fn request_sync_at(&self, now: u64) -> Vec<GroupAction> {
        vec![GroupAction::Publish {
            topic: GROUP_DIRECTORY_TOPIC.to_string(),
            envelope: Envelope::GroupsSyncRequest {
                requester: self.local_id.clone(),
                timestamp: now,
            },
            retained: false,
        }]
    }

    /// Re-publish every group we lead.
    pub fn on_sync_request_at(&self, requester: &PeerId, now: u64) -> Vec<GroupAction> {
        if *requester == self.local_id {
            return vec![];
        }
        self.groups
            .values()
            .filter(|g| g.is_leader(&self.local_id))
            .map(|g| directory_publish(Envelope::GroupUpdated(g.to_broadcast(now))))
            .collect()
    }

    // ── Leader operations ────────────────────────────────────────────────

    /// Create a group led by us.
    pub fn create_group(&mut self, name: &str) -> Result<Vec<GroupAction>, PeerChatError> {
        self.create_group_at(name, now_ms())
    }

    pub fn create_group_at(&mut self, name: &str, now: u64) -> Result<Vec<GroupAction>, PeerChatError> {
        if !valid_group_name(name) {
            return Err(PeerChatError::InvalidGroupName(name.to_string()));
        }
        if self.groups.contains_key(name) {
            return Err(PeerChatError::GroupExists(name.to_string()));
        }

        let group = Group::new(name, self.local_id.clone());
        self.groups.insert(name.to_string(), group.clone());
        self.logs.entry(group.topic.clone()).or_default();
        tracing::info!(name, topic = %group.topic, "group created");

        let mut actions = Vec::new();
        if self.subscribed.insert(group.topic.clone()) {
            actions.push(GroupAction::Subscribe {
                topic: group.topic.clone(),
            });
        }
        actions.push(directory_publish(Envelope::GroupCreated(group.to_broadcast(now))));
        actions.push(GroupAction::Event(GroupEvent::GroupCreated { group }));
        Ok(actions)
    }

    /// Admit `requester`. Accepting twice never duplicates the member.
    pub fn accept_join(&mut self, name: &str, requester: &PeerId) -> Result<Vec<GroupAction>, PeerChatError> {
        self.accept_join_at(name, requester, now_ms())
    }

    pub fn accept_join_at(
        &mut self,
        name: &str,
        requester: &PeerId,
        now: u64,
    ) -> Result<Vec<GroupAction>, PeerChatError> {
        let group = self.led_group_mut(name, "accept a join request")?;
        let Some(group) = group else {
            return Ok(not_leader_notice(name, "accept a join request"));
        };
        group.add_member(requester.clone());
        let group = group.clone();
        self.remove_pending(name, requester);
        tracing::info!(name, member = %requester, "join accepted");

        Ok(vec![
            directory_publish(Envelope::GroupUpdated(group.to_broadcast(now))),
            GroupAction::Publish {
                topic: control_topic(requester),
                envelope: Envelope::GroupJoinResponse {
                    group_name: name.to_string(),
                    from: self.local_id.clone(),
                    to: requester.clone(),
                    status: ResponseStatus::Accepted,
                    topic: Some(group.topic.clone()),
                    timestamp: now,
                },
                retained: false,
            },
            GroupAction::Event(GroupEvent::GroupUpdated { group }),
        ])
    }

    /// Decline `requester`'s pending request.
    pub fn reject_join(&mut self, name: &str, requester: &PeerId) -> Result<Vec<GroupAction>, PeerChatError> {
        self.reject_join_at(name, requester, now_ms())
    }

    pub fn reject_join_at(
        &mut self,
        name: &str,
        requester: &PeerId,
        now: u64,
    ) -> Result<Vec<GroupAction>, PeerChatError> {
        if self.led_group_mut(name, "reject a join request")?.is_none() {
            return Ok(not_leader_notice(name, "reject a join request"));
        }
        if !self.remove_pending(name, requester) {
            return Err(PeerChatError::NoPendingJoin {
                group: name.to_string(),
                from: requester.to_string(),
            });
        }
        tracing::info!(name, from = %requester, "join rejected");

        Ok(vec![GroupAction::Publish {
            topic: control_topic(requester),
            envelope: Envelope::GroupJoinResponse {
                group_name: name.to_string(),
                from: self.local_id.clone(),
                to: requester.clone(),
                status: ResponseStatus::Rejected,
                topic: None,
                timestamp: now,
            },
            retained: false,
        }])
    }

    /// Add `peer` directly and tell them.
    pub fn invite_at(&mut self, name: &str, peer: &PeerId, now: u64) -> Result<Vec<GroupAction>, PeerChatError> {
        let Some(group) = self.led_group_mut(name, "invite")? else {
            return Ok(not_leader_notice(name, "invite"));
        };
        if !group.add_member(peer.clone()) {
            return Err(PeerChatError::AlreadyMember {
                group: name.to_string(),
                peer: peer.to_string(),
            });
        }
        let group = group.clone();
        self.remove_pending(name, peer);
        tracing::info!(name, member = %peer, "member invited");

        Ok(vec![
            directory_publish(Envelope::GroupUpdated(group.to_broadcast(now))),
            GroupAction::Publish {
                topic: control_topic(peer),
                envelope: Envelope::GroupInvitation {
                    group_name: name.to_string(),
                    from: self.local_id.clone(),
                    to: peer.clone(),
                    topic: Some(group.topic.clone()),
                    timestamp: now,
                },
                retained: false,
            },
            GroupAction::Event(GroupEvent::GroupUpdated { group }),
        ])
    }

    /// Announce deletion, then drop local state.
    pub fn delete_group_at(&mut self, name: &str, now: u64) -> Result<Vec<GroupAction>, PeerChatError> {
        let Some(group) = self.led_group_mut(name, "delete")? else {
            return Ok(not_leader_notice(name, "delete"));
        };
        let broadcast = group.to_broadcast(now);
        let mut actions = vec![directory_publish(Envelope::GroupDeleted(broadcast))];
        actions.extend(self.forget(name));
        Ok(actions)
    }

    /// `Ok(Some)` if we lead `name`, `Ok(None)` if someone else does.
    fn led_group_mut(&mut self, name: &str, what: &str) -> Result<Option<&mut Group>, PeerChatError> {
        let group = self
            .groups
            .get_mut(name)
            .ok_or_else(|| PeerChatError::UnknownGroup(name.to_string()))?;
        if !group.is_leader(&self.local_id) {
            tracing::warn!(name, leader = %group.leader_id, "only the leader may {what}");
            return Ok(None);
        }
        Ok(Some(group))
    }

    fn remove_pending(&mut self, name: &str, from: &PeerId) -> bool {
        let Some(pending) = self.pending.get_mut(name) else {
            return false;
        };
        let before = pending.len();
        pending.retain(|r| r.from != *from);
        before != pending.len()
    }

    // ── Member operations ────────────────────────────────────────────────

    /// Ask a group's leader to let us in.
    pub fn request_to_join(&self, name: &str) -> Result<Vec<GroupAction>, PeerChatError> {
        self.request_to_join_at(name, now_ms())
    }

    pub fn request_to_join_at(&self, name: &str, now: u64) -> Result<Vec<GroupAction>, PeerChatError> {
        let group = self
            .groups
            .get(name)
            .ok_or_else(|| PeerChatError::UnknownGroup(name.to_string()))?;
        if group.is_leader(&self.local_id) {
            return Err(PeerChatError::IsLeader {
                group: name.to_string(),
            });
        }
        if group.is_member(&self.local_id) {
            return Err(PeerChatError::AlreadyMember {
                group: name.to_string(),
                peer: self.local_id.to_string(),
            });
        }
        Ok(vec![GroupAction::Publish {
            topic: control_topic(&group.leader_id),
            envelope: Envelope::GroupJoinRequest {
                group_name: name.to_string(),
                from: self.local_id.clone(),
                to: group.leader_id.clone(),
                timestamp: now,
            },
            retained: false,
        }])
    }

    /// Publish a message on the group topic.
    ///
    /// Not appended locally: the bus echoes our own publish back and
    /// `on_group_message` records it then, without a notification.
    pub fn send_group_message_at(
        &self,
        name: &str,
        text: String,
        now: u64,
    ) -> Result<Vec<GroupAction>, PeerChatError> {
        let group = self
            .groups
            .get(name)
            .ok_or_else(|| PeerChatError::UnknownGroup(name.to_string()))?;
        if !group.is_member(&self.local_id) {
            return Err(PeerChatError::NotMember {
                group: name.to_string(),
            });
        }
        Ok(vec![GroupAction::Publish {
            topic: group.topic.clone(),
            envelope: Envelope::GroupMessage {
                from: self.local_id.clone(),
                message: text,
                timestamp: now,
            },
            retained: false,
        }])
    }

    // ── Inbound control ──────────────────────────────────────────────────

    /// Handle a group envelope from our control channel.
    pub fn on_control_message(&mut self, envelope: Envelope) -> Vec<GroupAction> {
        match envelope {
            Envelope::GroupJoinRequest {
                group_name,
                from,
                to,
                timestamp,
            } if to == self.local_id => self.on_join_request(GroupJoinRequest {
                group_name,
                from,
                to,
                timestamp,
            }),
            Envelope::GroupJoinResponse {
                group_name,
                from,
                to,
                status,
                topic,
                ..
            } if to == self.local_id => self.on_join_response(group_name, from, status, topic),
            Envelope::GroupInvitation {
                group_name,
                from,
                to,
                topic,
                ..
            } if to == self.local_id => self.on_invitation(group_name, from, topic),
            other => {
                tracing::debug!(kind = other.kind(), "group control envelope not for us, dropped");
                vec![]
            }
        }
    }

    fn on_join_request(&mut self, request: GroupJoinRequest) -> Vec<GroupAction> {
        let Some(group) = self.groups.get(&request.group_name) else {
            tracing::debug!(name = %request.group_name, "join request for unknown group");
            return vec![];
        };
        if !group.is_leader(&self.local_id) {
            tracing::warn!(name = %request.group_name, from = %request.from, "join request sent to a non-leader");
            return vec![];
        }
        if group.is_member(&request.from) {
            tracing::debug!(name = %request.group_name, from = %request.from, "join request from existing member");
            return vec![];
        }

        let pending = self.pending.entry(request.group_name.clone()).or_default();
        if pending.iter().any(|r| r.from == request.from) {
            return vec![];
        }
        tracing::info!(name = %request.group_name, from = %request.from, "join requested");
        let event = GroupEvent::JoinRequested {
            group_name: request.group_name.clone(),
            from: request.from.clone(),
        };
        pending.push(request);
        vec![GroupAction::Event(event)]
    }

    fn on_join_response(
        &mut self,
        name: String,
        from: PeerId,
        status: ResponseStatus,
        topic: Option<String>,
    ) -> Vec<GroupAction> {
        if let Some(group) = self.groups.get(&name) {
            if !group.is_leader(&from) {
                tracing::warn!(%name, %from, "join response from a non-leader ignored");
                return vec![];
            }
        }
        match status {
            ResponseStatus::Accepted => {
                let topic = topic.unwrap_or_else(|| group_topic(&name));
                if topic != group_topic(&name) {
                    tracing::warn!(%name, %topic, "join response names a foreign topic");
                    return vec![];
                }
                self.follow(&name, &topic)
            }
            ResponseStatus::Rejected => {
                tracing::info!(%name, "join request rejected");
                vec![GroupAction::Event(GroupEvent::JoinRejected {
                    group_name: name,
                    leader: from,
                })]
            }
        }
    }

    fn on_invitation(&mut self, name: String, from: PeerId, topic: Option<String>) -> Vec<GroupAction> {
        if !valid_group_name(&name) {
            tracing::warn!(%name, "invitation for an invalid group name");
            return vec![];
        }
        let topic = topic.unwrap_or_else(|| group_topic(&name));
        if topic != group_topic(&name) {
            tracing::warn!(%name, %topic, "invitation names a foreign topic");
            return vec![];
        }
        match self.groups.get(&name) {
            Some(group) if !group.is_leader(&from) => {
                tracing::warn!(%name, %from, "invitation from a non-leader ignored");
                return vec![];
            }
            Some(_) => {}
            None => {
                // Cache what we know until the directory catches up.
                let mut group = Group::new(&name, from.clone());
                group.add_member(self.local_id.clone());
                self.groups.insert(name.clone(), group);
            }
        }

        let mut actions = vec![GroupAction::Event(GroupEvent::InvitationReceived {
            group_name: name.clone(),
            from,
        })];
        actions.extend(self.follow(&name, &topic));
        actions
    }

    // ── Group traffic ────────────────────────────────────────────────────

    /// Record a message seen on a group topic.
    ///
    /// Our own messages are recorded too but raise no event.
    pub fn on_group_message(
        &mut self,
        topic: &str,
        envelope: Envelope,
        presence: &dyn PresenceView,
    ) -> Vec<GroupAction> {
        let (from, message, timestamp) = match envelope {
            Envelope::GroupMessage {
                from,
                message,
                timestamp,
            } => (from, message, timestamp),
            other => {
                tracing::warn!(topic, kind = other.kind(), "non-message envelope on group topic");
                return vec![];
            }
        };
        let Some(log) = self.logs.get_mut(topic) else {
            tracing::debug!(topic, "message for a group we do not follow");
            return vec![];
        };

        let sender_name = if from == self.local_id {
            self.local_name.clone()
        } else {
            presence
                .display_name(&from)
                .map(str::to_string)
                .unwrap_or_else(|| from.to_string())
        };
        let own = from == self.local_id;
        let entry = GroupLogEntry {
            sender: from,
            sender_name,
            text: message,
            timestamp,
        };
        log.push(entry.clone());

        if own {
            return vec![];
        }
        let line = entry.render(&self.log_offset);
        vec![GroupAction::Event(GroupEvent::MessageReceived {
            group_name: topic
                .strip_prefix(GROUP_TOPIC_PREFIX)
                .unwrap_or(topic)
                .to_string(),
            entry,
            line,
        })]
    }
}

fn directory_publish(envelope: Envelope) -> GroupAction {
    GroupAction::Publish {
        topic: GROUP_DIRECTORY_TOPIC.to_string(),
        envelope,
        retained: true,
    }
}

fn not_leader_notice(name: &str, what: &str) -> Vec<GroupAction> {
    vec![GroupAction::Event(GroupEvent::Notice(format!(
        "only the leader of {name} may {what}"
    )))]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PresenceStatus;

    fn id(s: &str) -> PeerId {
        PeerId::new(s).unwrap()
    }

    fn registry(me: &str) -> GroupRegistry {
        GroupRegistry::new(id(me), me.to_uppercase(), FixedOffset::east_opt(0).unwrap())
    }

    /// Presence stub: everyone is online under their uppercase id.
    struct Names(Vec<(PeerId, String)>);

    impl PresenceView for Names {
        fn display_name(&self, peer: &PeerId) -> Option<&str> {
            self.0.iter().find(|(p, _)| p == peer).map(|(_, n)| n.as_str())
        }
        fn status(&self, peer: &PeerId) -> Option<PresenceStatus> {
            self.display_name(peer).map(|_| PresenceStatus::Online)
        }
    }

    fn envelopes(actions: &[GroupAction]) -> Vec<(&str, &Envelope, bool)> {
        actions
            .iter()
            .filter_map(|a| match a {
                GroupAction::Publish {
                    topic,
                    envelope,
                    retained,
                } => Some((topic.as_str(), envelope, *retained)),
                _ => None,
            })
            .collect()
    }

    fn subscribes(actions: &[GroupAction]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|a| match a {
                GroupAction::Subscribe { topic } => Some(topic.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Deliver every directory publish in `actions` to `to`.
    fn sync(to: &mut GroupRegistry, actions: &[GroupAction]) -> Vec<GroupAction> {
        let mut out = Vec::new();
        for (topic, env, _) in envelopes(actions) {
            if topic == GROUP_DIRECTORY_TOPIC {
                out.extend(to.on_directory_update_at(env.clone(), 0));
            }
        }
        out
    }

    #[test]
    fn create_group_subscribes_and_broadcasts() {
        let mut alice = registry("alice");
        let actions = alice.create_group_at("team", 10).unwrap();

        assert_eq!(subscribes(&actions), vec!["GROUP_team"]);
        assert_eq!(
            envelopes(&actions),
            vec![(
                "GROUPS",
                &Envelope::GroupCreated(GroupBroadcast {
                    name: "team".into(),
                    leader_id: id("alice"),
                    members: vec![id("alice")],
                    topic: "GROUP_team".into(),
                    timestamp: 10,
                }),
                true
            )]
        );
        assert_eq!(alice.group("team").unwrap().members, vec![id("alice")]);
    }

    #[test]
    fn create_existing_group_fails() {
        let mut alice = registry("alice");
        alice.create_group_at("team", 1).unwrap();
        assert!(matches!(
            alice.create_group_at("team", 2),
            Err(PeerChatError::GroupExists(_))
        ));
        assert!(matches!(
            alice.create_group_at("bad name", 2),
            Err(PeerChatError::InvalidGroupName(_))
        ));
    }

    #[test]
    fn group_topic_shaped_like_control_channel_is_refused() {
        let mut alice = registry("alice");
        assert!(matches!(
            alice.create_group_at("ops_Control", 1),
            Err(PeerChatError::InvalidGroupName(_))
        ));
        assert!(alice.groups().is_empty());

        let mut bob = registry("bob");
        let foreign = Envelope::GroupCreated(GroupBroadcast {
            name: "ops_Control".into(),
            leader_id: id("carol"),
            members: vec![id("carol"), id("bob")],
            topic: "GROUP_ops_Control".into(),
            timestamp: 1,
        });
        assert!(bob.on_directory_update_at(foreign, 1).is_empty());
        assert!(!bob.is_subscribed("GROUP_ops_Control"));
    }

    #[test]
    fn request_to_join_rules() {
        let mut alice = registry("alice");
        let mut bob = registry("bob");
        let created = alice.create_group_at("team", 1).unwrap();
        sync(&mut bob, &created);

        assert!(matches!(
            bob.request_to_join_at("nope", 2),
            Err(PeerChatError::UnknownGroup(_))
        ));
        assert!(matches!(
            alice.request_to_join_at("team", 2),
            Err(PeerChatError::IsLeader { .. })
        ));

        let actions = bob.request_to_join_at("team", 2).unwrap();
        assert_eq!(
            envelopes(&actions),
            vec![(
                "alice_Control",
                &Envelope::GroupJoinRequest {
                    group_name: "team".into(),
                    from: id("bob"),
                    to: id("alice"),
                    timestamp: 2,
                },
                false
            )]
        );
    }

    #[test]
    fn join_requests_dedup_by_requester() {
        let mut alice = registry("alice");
        alice.create_group_at("team", 1).unwrap();
        let req = Envelope::GroupJoinRequest {
            group_name: "team".into(),
            from: id("bob"),
            to: id("alice"),
            timestamp: 2,
        };
        assert_eq!(alice.on_control_message(req.clone()).len(), 1);
        assert!(alice.on_control_message(req).is_empty());
        assert_eq!(alice.pending_requests("team").len(), 1);
    }

    #[test]
    fn join_request_to_non_leader_is_noop() {
        let mut alice = registry("alice");
        let mut carol = registry("carol");
        sync(&mut carol, &alice.create_group_at("team", 1).unwrap());

        let actions = carol.on_control_message(Envelope::GroupJoinRequest {
            group_name: "team".into(),
            from: id("bob"),
            to: id("carol"),
            timestamp: 2,
        });
        assert!(actions.is_empty());
        assert!(carol.pending_requests("team").is_empty());
    }

    #[test]
    fn accept_join_by_non_leader_does_not_change_members() {
        let mut alice = registry("alice");
        let mut carol = registry("carol");
        sync(&mut carol, &alice.create_group_at("team", 1).unwrap());

        let actions = carol.accept_join_at("team", &id("bob"), 2).unwrap();
        assert!(matches!(
            &actions[..],
            [GroupAction::Event(GroupEvent::Notice(_))]
        ));
        assert_eq!(carol.group("team").unwrap().members, vec![id("alice")]);
    }

    #[test]
    fn accept_join_twice_keeps_members_unique() {
        let mut alice = registry("alice");
        alice.create_group_at("team", 1).unwrap();
        alice.on_control_message(Envelope::GroupJoinRequest {
            group_name: "team".into(),
            from: id("bob"),
            to: id("alice"),
            timestamp: 2,
        });

        alice.accept_join_at("team", &id("bob"), 3).unwrap();
        alice.accept_join_at("team", &id("bob"), 4).unwrap();
        assert_eq!(
            alice.group("team").unwrap().members,
            vec![id("alice"), id("bob")]
        );
        assert!(alice.pending_requests("team").is_empty());
    }

    #[test]
    fn accepted_member_follows_group_topic() {
        let mut alice = registry("alice");
        let mut bob = registry("bob");
        sync(&mut bob, &alice.create_group_at("team", 1).unwrap());
        assert!(!bob.is_subscribed("GROUP_team"));

        let req = bob.request_to_join_at("team", 2).unwrap();
        alice.on_control_message(envelopes(&req)[0].1.clone());
        let accepted = alice.accept_join_at("team", &id("bob"), 3).unwrap();

        // group_updated on the directory, response on bob's control channel.
        let published = envelopes(&accepted);
        assert!(matches!(
            published[0],
            ("GROUPS", Envelope::GroupUpdated(b), true) if b.members == vec![id("alice"), id("bob")]
        ));
        assert_eq!(published[1].0, "bob_Control");

        let from_directory = sync(&mut bob, &accepted);
        assert_eq!(subscribes(&from_directory), vec!["GROUP_team"]);
        // The direct response finds the subscription already in place.
        let from_control = bob.on_control_message(published[1].1.clone());
        assert!(subscribes(&from_control).is_empty());
        assert!(bob.is_subscribed("GROUP_team"));
    }

    #[test]
    fn rejection_is_surfaced_without_state_change() {
        let mut alice = registry("alice");
        let mut bob = registry("bob");
        sync(&mut bob, &alice.create_group_at("team", 1).unwrap());
        alice.on_control_message(Envelope::GroupJoinRequest {
            group_name: "team".into(),
            from: id("bob"),
            to: id("alice"),
            timestamp: 2,
        });

        let rejected = alice.reject_join_at("team", &id("bob"), 3).unwrap();
        assert!(alice.pending_requests("team").is_empty());
        let (topic, env, _) = envelopes(&rejected)[0];
        assert_eq!(topic, "bob_Control");

        let actions = bob.on_control_message(env.clone());
        assert_eq!(
            actions,
            vec![GroupAction::Event(GroupEvent::JoinRejected {
                group_name: "team".into(),
                leader: id("alice"),
            })]
        );
        assert!(!bob.is_subscribed("GROUP_team"));

        assert!(matches!(
            alice.reject_join_at("team", &id("bob"), 4),
            Err(PeerChatError::NoPendingJoin { .. })
        ));
    }

    #[test]
    fn join_response_from_non_leader_ignored() {
        let mut alice = registry("alice");
        let mut bob = registry("bob");
        sync(&mut bob, &alice.create_group_at("team", 1).unwrap());

        let forged = Envelope::GroupJoinResponse {
            group_name: "team".into(),
            from: id("mallory"),
            to: id("bob"),
            status: ResponseStatus::Accepted,
            topic: Some("GROUP_team".into()),
            timestamp: 2,
        };
        assert!(bob.on_control_message(forged).is_empty());
        assert!(!bob.is_subscribed("GROUP_team"));
    }

    #[test]
    fn created_broadcast_listing_us_subscribes() {
        let mut bob = registry("bob");
        let actions = bob.on_directory_update_at(
            Envelope::GroupCreated(GroupBroadcast {
                name: "team".into(),
                leader_id: id("alice"),
                members: vec![id("alice"), id("bob")],
                topic: "GROUP_team".into(),
                timestamp: 1,
            }),
            1,
        );
        assert_eq!(subscribes(&actions), vec!["GROUP_team"]);
        assert!(bob.history("GROUP_team").is_some());
    }

    #[test]
    fn mismatched_topic_broadcast_dropped() {
        let mut bob = registry("bob");
        let actions = bob.on_directory_update_at(
            Envelope::GroupCreated(GroupBroadcast {
                name: "team".into(),
                leader_id: id("alice"),
                members: vec![id("bob")],
                topic: "x_bob_1".into(),
                timestamp: 1,
            }),
            1,
        );
        assert!(actions.is_empty());
        assert!(bob.group("team").is_none());
    }

    #[test]
    fn delete_removes_everything() {
        let mut alice = registry("alice");
        let mut bob = registry("bob");
        let created = alice.create_group_at("team", 1).unwrap();
        sync(&mut bob, &created);
        alice.invite_at("team", &id("bob"), 2).map(|a| sync(&mut bob, &a)).unwrap();
        assert!(bob.is_subscribed("GROUP_team"));

        let deleted = alice.delete_group_at("team", 3).unwrap();
        assert!(matches!(
            envelopes(&deleted)[0],
            ("GROUPS", Envelope::GroupDeleted(_), true)
        ));
        assert!(alice.group("team").is_none());
        assert!(alice.history("GROUP_team").is_none());

        let on_bob = sync(&mut bob, &deleted);
        assert!(on_bob.contains(&GroupAction::Unsubscribe {
            topic: "GROUP_team".into()
        }));
        assert!(bob.group("team").is_none());
        assert!(!bob.is_subscribed("GROUP_team"));
    }

    #[test]
    fn delete_by_non_leader_is_noop() {
        let mut alice = registry("alice");
        let mut bob = registry("bob");
        sync(&mut bob, &alice.create_group_at("team", 1).unwrap());
        let actions = bob.delete_group_at("team", 2).unwrap();
        assert!(envelopes(&actions).is_empty());
        assert!(bob.group("team").is_some());
    }

    #[test]
    fn invitation_caches_group_and_subscribes() {
        let mut alice = registry("alice");
        let mut bob = registry("bob");
        alice.create_group_at("team", 1).unwrap();

        let invited = alice.invite_at("team", &id("bob"), 2).unwrap();
        let (topic, invitation, _) = envelopes(&invited)[1];
        assert_eq!(topic, "bob_Control");

        let actions = bob.on_control_message(invitation.clone());
        assert!(actions.contains(&GroupAction::Event(GroupEvent::InvitationReceived {
            group_name: "team".into(),
            from: id("alice"),
        })));
        assert_eq!(subscribes(&actions), vec!["GROUP_team"]);
        assert!(bob.group("team").unwrap().is_member(&id("bob")));

        assert!(matches!(
            alice.invite_at("team", &id("bob"), 3),
            Err(PeerChatError::AlreadyMember { .. })
        ));
    }

    #[test]
    fn group_messages_recorded_and_rendered() {
        let mut alice = registry("alice");
        alice.create_group_at("team", 1).unwrap();
        let names = Names(vec![(id("bob"), "Bobby".into())]);

        let sent = alice
            .send_group_message_at("team", "hi all".into(), 60_000)
            .unwrap();
        let (topic, echo, retained) = envelopes(&sent)[0];
        assert_eq!(topic, "GROUP_team");
        assert!(!retained);
        assert!(alice.history("GROUP_team").unwrap().is_empty());

        // Own echo: recorded, no event.
        assert!(alice.on_group_message("GROUP_team", echo.clone(), &names).is_empty());

        let from_bob = Envelope::GroupMessage {
            from: id("bob"),
            message: "hey".into(),
            timestamp: 120_000,
        };
        let actions = alice.on_group_message("GROUP_team", from_bob, &names);
        assert!(matches!(
            &actions[..],
            [GroupAction::Event(GroupEvent::MessageReceived { group_name, line, .. })]
                if group_name == "team" && line == "[00:02] [Bobby]: hey"
        ));

        assert_eq!(
            alice.formatted_history("GROUP_team"),
            vec!["[00:01] [ALICE]: hi all", "[00:02] [Bobby]: hey"]
        );
    }

    #[test]
    fn send_requires_membership() {
        let mut alice = registry("alice");
        let mut bob = registry("bob");
        sync(&mut bob, &alice.create_group_at("team", 1).unwrap());
        assert!(matches!(
            bob.send_group_message_at("team", "x".into(), 2),
            Err(PeerChatError::NotMember { .. })
        ));
        assert!(matches!(
            bob.send_group_message_at("nope", "x".into(), 2),
            Err(PeerChatError::UnknownGroup(_))
        ));
    }

    #[test]
    fn sync_request_republishes_led_groups() {
        let mut alice = registry("alice");
        let mut bob = registry("bob");
        alice.create_group_at("team", 1).unwrap();
        alice.create_group_at("ops", 1).unwrap();

        let ask = bob.request_sync_at(5);
        let (_, env, retained) = envelopes(&ask)[0];
        assert!(!retained);

        let answer = alice.on_directory_update_at(env.clone(), 6);
        let names: Vec<_> = envelopes(&answer)
            .into_iter()
            .map(|(_, e, r)| match e {
                Envelope::GroupUpdated(b) if r => b.name.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["ops", "team"]);

        // Own sync request is not answered.
        let own = alice.request_sync_at(7);
        assert!(alice.on_directory_update_at(envelopes(&own)[0].1.clone(), 7).is_empty());

        sync(&mut bob, &answer);
        assert_eq!(bob.groups().len(), 2);
    }
}
