use crate::conversation::{ConversationNegotiator, ConversationRequest};
use crate::envelope::Envelope;
use crate::error::PeerChatError;
use crate::group::{Group, GroupJoinRequest, GroupRegistry};
use crate::presence::{Announcement, PresenceRecord, PresenceTracker};
use crate::router::{MessageRouter, RoutingAction};
use crate::topic::{control_topic, GROUP_DIRECTORY_TOPIC, PRESENCE_FILTER};
use crate::types::{ChatMessage, PeerId, PresenceStatus};

use super::effect::{effects, RuntimeEffect};
use super::{Operation, RuntimeConfig};

/// Complete protocol state: pure logic, no async, no bus.
///
/// Every `handle_*` / `tick_*` method returns `Vec<RuntimeEffect>`. Nothing
/// here touches the transport or the event channel.
pub struct RuntimeState {
    pub(crate) local_id: PeerId,
    pub(crate) config: RuntimeConfig,

    pub(crate) router: MessageRouter,
    pub(crate) presence: PresenceTracker,
    pub(crate) conversations: ConversationNegotiator,
    pub(crate) groups: GroupRegistry,
}

impl RuntimeState {
    pub fn new(config: RuntimeConfig) -> Self {
        let local_id = config.peer_id.clone();
        Self {
            router: MessageRouter::new(local_id.clone()),
            presence: PresenceTracker::new(
                local_id.clone(),
                config.display_name.clone(),
                config.grace_period,
            ),
            conversations: ConversationNegotiator::new(local_id.clone(), config.request_timeout),
            groups: GroupRegistry::new(
                local_id.clone(),
                config.display_name.clone(),
                config.log_offset(),
            ),
            local_id,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Subscribe to our channels, announce ourselves, ask others to do the same.
    pub fn startup_at(&mut self, now: u64) -> Vec<RuntimeEffect> {
        let mut out = vec![
            RuntimeEffect::Subscribe {
                topic: control_topic(&self.local_id),
            },
            // `USERS/#` also matches the bare `USERS` request topic.
            RuntimeEffect::Subscribe {
                topic: PRESENCE_FILTER.to_string(),
            },
            RuntimeEffect::Subscribe {
                topic: GROUP_DIRECTORY_TOPIC.to_string(),
            },
        ];
        out.extend(effects(
            self.presence.announce_self_at(PresenceStatus::Online, now),
        ));
        out.extend(effects(self.presence.request_refresh_at(now)));
        if self.config.sync_on_start {
            out.extend(effects(self.groups.request_sync_at(now)));
        }
        tracing::info!(peer = %self.local_id, "runtime started");
        out
    }

    /// Best-effort retained offline announcement.
    pub fn shutdown_at(&mut self, now: u64) -> Vec<RuntimeEffect> {
        tracing::info!(peer = %self.local_id, "runtime shutting down");
        effects(self.presence.announce_self_at(PresenceStatus::Offline, now))
    }

    // ── Inbound ──────────────────────────────────────────────────────────

    /// Route one delivery to the state machine that owns it.
    pub fn handle_incoming_at(&mut self, topic: &str, payload: &[u8], now: u64) -> Vec<RuntimeEffect> {
        let known_session = self.conversations.has_conversation(topic);
        match self.router.route(topic, payload, known_session) {
            RoutingAction::Presence(Envelope::StatusRequest { requester, .. }) => {
                effects(self.presence.on_status_request_at(&requester, now))
            }
            RoutingAction::Presence(envelope) => match Announcement::from_envelope(&envelope) {
                Some(announcement) => effects(self.presence.on_announcement_at(announcement, now)),
                None => Vec::new(),
            },
            RoutingAction::GroupDirectory(envelope) => {
                effects(self.groups.on_directory_update_at(envelope, now))
            }
            RoutingAction::ConversationControl(envelope) => {
                effects(self.conversations.on_control_message_at(envelope, now))
            }
            RoutingAction::GroupControl(envelope) => effects(self.groups.on_control_message(envelope)),
            RoutingAction::Session { topic, envelope } => {
                effects(self.conversations.on_session_message(&topic, envelope))
            }
            RoutingAction::Group { topic, envelope } => {
                effects(self.groups.on_group_message(&topic, envelope, &self.presence))
            }
            RoutingAction::Restore { topic, envelope } => {
                let mut out = effects(self.conversations.restore_conversation(&topic));
                out.extend(effects(self.conversations.on_session_message(&topic, envelope)));
                out
            }
            RoutingAction::Drop { .. } => Vec::new(),
        }
    }

    // ── Operator operations ──────────────────────────────────────────────

    /// Apply one operator operation.
    pub fn apply_at(&mut self, op: Operation, now: u64) -> Result<Vec<RuntimeEffect>, PeerChatError> {
        let out = match op {
            Operation::RequestConversation { target } => {
                effects(self.conversations.request_conversation_at(&target, now)?)
            }
            Operation::RespondToRequest { requester, accept } => effects(
                self.conversations
                    .respond_to_pending_request_at(&requester, accept, now)?,
            ),
            Operation::SendMessage { topic, text } => {
                effects(self.conversations.send_message_at(&topic, text, now)?)
            }
            Operation::RestoreConversation { topic } => {
                effects(self.conversations.restore_conversation(&topic))
            }
            Operation::RequestRestore { peers } => {
                effects(self.conversations.request_restore_at(&peers, now))
            }
            Operation::RequestRefresh => effects(self.presence.request_refresh_at(now)),
            Operation::CreateGroup { name } => effects(self.groups.create_group_at(&name, now)?),
            Operation::RequestToJoin { name } => effects(self.groups.request_to_join_at(&name, now)?),
            Operation::AcceptJoin { group, requester } => {
                effects(self.groups.accept_join_at(&group, &requester, now)?)
            }
            Operation::RejectJoin { group, requester } => {
                effects(self.groups.reject_join_at(&group, &requester, now)?)
            }
            Operation::Invite { group, peer } => effects(self.groups.invite_at(&group, &peer, now)?),
            Operation::DeleteGroup { name } => effects(self.groups.delete_group_at(&name, now)?),
            Operation::SendGroupMessage { group, text } => {
                effects(self.groups.send_group_message_at(&group, text, now)?)
            }
            Operation::SyncGroups => effects(self.groups.request_sync_at(now)),
        };
        Ok(out)
    }

    // ── Ticks ────────────────────────────────────────────────────────────

    /// Earliest presence removal deadline (Unix ms), if any.
    pub fn next_presence_deadline(&self) -> Option<u64> {
        self.presence.next_deadline()
    }

    /// Purge peers whose grace period has run out.
    pub fn tick_presence_at(&mut self, now: u64) -> Vec<RuntimeEffect> {
        effects(self.presence.expire_due_at(now))
    }

    /// Expire stale conversation requests.
    pub fn tick_maintenance_at(&mut self, now: u64) -> Vec<RuntimeEffect> {
        let mut out = effects(self.conversations.expire_stale_requests_at(now));
        out.extend(effects(self.presence.expire_due_at(now)));
        out
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn online_peers(&self) -> Vec<PresenceRecord> {
        self.presence.snapshot_online()
    }

    pub fn peers(&self) -> Vec<PresenceRecord> {
        self.presence.snapshot_all()
    }

    pub fn pending_requests(&self) -> Vec<ConversationRequest> {
        self.conversations.pending_inbound()
    }

    pub fn conversation_topics(&self) -> Vec<String> {
        self.conversations.conversation_topics()
    }

    pub fn history(&self, topic: &str) -> Vec<ChatMessage> {
        self.conversations
            .history(topic)
            .map(<[ChatMessage]>::to_vec)
            .unwrap_or_default()
    }

    pub fn groups(&self) -> Vec<Group> {
        self.groups.groups().into_iter().cloned().collect()
    }

    pub fn pending_joins(&self, group: &str) -> Vec<GroupJoinRequest> {
        self.groups.pending_requests(group).to_vec()
    }

    pub fn group_history(&self, topic: &str) -> Vec<String> {
        self.groups.formatted_history(topic)
    }
}
