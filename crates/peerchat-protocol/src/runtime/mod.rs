/// Peer runtime: wires the state machines to a live bus.
///
/// The runtime owns a `Transport` and all protocol state (router, presence,
/// conversations, groups). It exposes a channel-based API so the operator
/// side (a terminal client, a bot, a test) never touches raw payloads.
mod effect;
mod executor;
mod r#loop;
mod state;
pub mod transport;

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::conversation::{ConversationEvent, ConversationRequest, DEFAULT_REQUEST_TIMEOUT_MS};
use crate::error::PeerChatError;
use crate::group::{Group, GroupEvent, GroupJoinRequest};
use crate::presence::{PresenceEvent, PresenceRecord, DEFAULT_GRACE_PERIOD_MS};
use crate::types::{ChatMessage, PeerId};

pub use effect::RuntimeEffect;
pub use state::RuntimeState;
pub use transport::Transport;

/// Overrides `grace_period` in [`RuntimeConfig::from_env`].
pub const GRACE_PERIOD_ENV: &str = "PEERCHAT_GRACE_PERIOD_MS";
/// Overrides `request_timeout` in [`RuntimeConfig::from_env`].
pub const REQUEST_TIMEOUT_ENV: &str = "PEERCHAT_REQUEST_TIMEOUT_MS";

// ── Configuration ───────────────────────────────────────────────────────

/// Configuration for the peer runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Our identity; also names our control channel.
    pub peer_id: PeerId,
    /// Name carried in presence announcements.
    pub display_name: String,
    /// How long an offline peer stays listed before it is purged.
    pub grace_period: Duration,
    /// How long an outbound conversation request may stay unanswered.
    pub request_timeout: Duration,
    /// Interval for request expiry and other housekeeping.
    pub maintenance_interval: Duration,
    /// Wait after the offline announcement before the transport is dropped.
    pub shutdown_grace: Duration,
    /// Ask group leaders to re-publish their groups at startup.
    pub sync_on_start: bool,
    /// Offset applied to group log timestamps.
    pub log_utc_offset_secs: i32,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl RuntimeConfig {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            display_name: peer_id.to_string(),
            peer_id,
            grace_period: Duration::from_millis(DEFAULT_GRACE_PERIOD_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            maintenance_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(500),
            sync_on_start: true,
            log_utc_offset_secs: 0,
            event_buffer: 256,
        }
    }

    /// Defaults plus overrides from `PEERCHAT_GRACE_PERIOD_MS` and
    /// `PEERCHAT_REQUEST_TIMEOUT_MS`. Unparseable values are ignored.
    pub fn from_env(peer_id: PeerId) -> Self {
        let mut config = Self::new(peer_id);
        if let Some(ms) = env_millis(GRACE_PERIOD_ENV) {
            config.grace_period = ms;
        }
        if let Some(ms) = env_millis(REQUEST_TIMEOUT_ENV) {
            config.request_timeout = ms;
        }
        config
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn sync_on_start(mut self, sync: bool) -> Self {
        self.sync_on_start = sync;
        self
    }

    pub fn log_utc_offset_secs(mut self, secs: i32) -> Self {
        self.log_utc_offset_secs = secs;
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Offset for group log rendering. Out-of-range values fall back to UTC.
    pub fn log_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.log_utc_offset_secs).unwrap_or_else(|| Utc.fix())
    }
}

fn env_millis(var: &str) -> Option<Duration> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(e) => {
            tracing::warn!(var, value = %raw, error = %e, "ignoring invalid duration");
            None
        }
    }
}

// ── Commands (operator → runtime) ───────────────────────────────────────

/// State-changing operator operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Ask a peer for a 1:1 conversation.
    RequestConversation { target: PeerId },
    /// Accept or reject the pending request from `requester`.
    RespondToRequest { requester: PeerId, accept: bool },
    /// Send a chat message on a session topic.
    SendMessage { topic: String, text: String },
    /// Recreate a session locally without a handshake.
    RestoreConversation { topic: String },
    /// Ask peers which sessions we share with them.
    RequestRestore { peers: Vec<PeerId> },
    /// Ask every peer to re-announce.
    RequestRefresh,
    CreateGroup { name: String },
    RequestToJoin { name: String },
    AcceptJoin { group: String, requester: PeerId },
    RejectJoin { group: String, requester: PeerId },
    Invite { group: String, peer: PeerId },
    DeleteGroup { name: String },
    SendGroupMessage { group: String, text: String },
    /// Ask group leaders to re-publish their groups.
    SyncGroups,
}

/// Commands the operator sends to the runtime event loop.
pub enum RuntimeCommand {
    Operate {
        op: Operation,
        reply: oneshot::Sender<Result<(), PeerChatError>>,
    },
    GetOnlinePeers {
        reply: oneshot::Sender<Vec<PresenceRecord>>,
    },
    GetPeers {
        reply: oneshot::Sender<Vec<PresenceRecord>>,
    },
    GetPendingRequests {
        reply: oneshot::Sender<Vec<ConversationRequest>>,
    },
    GetConversations {
        reply: oneshot::Sender<Vec<String>>,
    },
    GetHistory {
        topic: String,
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    GetGroups {
        reply: oneshot::Sender<Vec<Group>>,
    },
    GetPendingJoins {
        group: String,
        reply: oneshot::Sender<Vec<GroupJoinRequest>>,
    },
    GetGroupHistory {
        topic: String,
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Announce offline, wait `shutdown_grace`, stop.
    Shutdown { reply: oneshot::Sender<()> },
}

// ── Events (runtime → operator) ─────────────────────────────────────────

/// Everything the operator may want to observe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    Presence(PresenceEvent),
    Conversation(ConversationEvent),
    Group(GroupEvent),
    /// A protocol violation or refused operation, handled as a no-op.
    Notice(String),
    /// Non-fatal transport or encoding failure.
    Error { description: String },
}

// ── RuntimeHandle (operator-facing API) ─────────────────────────────────

/// Handle to a running peer runtime.
///
/// Cheap to clone. Operations resolve once the runtime has applied them.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    local_id: PeerId,
}

impl RuntimeHandle {
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Run one operation and wait for its outcome.
    pub async fn operate(&self, op: Operation) -> Result<(), PeerChatError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(RuntimeCommand::Operate { op, reply: tx })
            .await
            .map_err(|_| PeerChatError::RuntimeClosed)?;
        rx.await.map_err(|_| PeerChatError::RuntimeClosed)?
    }

    pub async fn request_conversation(&self, target: PeerId) -> Result<(), PeerChatError> {
        self.operate(Operation::RequestConversation { target }).await
    }

    pub async fn respond_to_request(&self, requester: PeerId, accept: bool) -> Result<(), PeerChatError> {
        self.operate(Operation::RespondToRequest { requester, accept })
            .await
    }

    pub async fn send_message(&self, topic: String, text: String) -> Result<(), PeerChatError> {
        self.operate(Operation::SendMessage { topic, text }).await
    }

    pub async fn restore_conversation(&self, topic: String) -> Result<(), PeerChatError> {
        self.operate(Operation::RestoreConversation { topic }).await
    }

    pub async fn request_restore(&self, peers: Vec<PeerId>) -> Result<(), PeerChatError> {
        self.operate(Operation::RequestRestore { peers }).await
    }

    pub async fn request_refresh(&self) -> Result<(), PeerChatError> {
        self.operate(Operation::RequestRefresh).await
    }

    // ── Groups ──────────────────────────────

    pub async fn create_group(&self, name: String) -> Result<(), PeerChatError> {
        self.operate(Operation::CreateGroup { name }).await
    }

    pub async fn request_to_join(&self, name: String) -> Result<(), PeerChatError> {
        self.operate(Operation::RequestToJoin { name }).await
    }

    pub async fn accept_join(&self, group: String, requester: PeerId) -> Result<(), PeerChatError> {
        self.operate(Operation::AcceptJoin { group, requester }).await
    }

    pub async fn reject_join(&self, group: String, requester: PeerId) -> Result<(), PeerChatError> {
        self.operate(Operation::RejectJoin { group, requester }).await
    }

    pub async fn invite(&self, group: String, peer: PeerId) -> Result<(), PeerChatError> {
        self.operate(Operation::Invite { group, peer }).await
    }

    pub async fn delete_group(&self, name: String) -> Result<(), PeerChatError> {
        self.operate(Operation::DeleteGroup { name }).await
    }

    pub async fn send_group_message(&self, group: String, text: String) -> Result<(), PeerChatError> {
        self.operate(Operation::SendGroupMessage { group, text })
            .await
    }

    pub async fn sync_groups(&self) -> Result<(), PeerChatError> {
        self.operate(Operation::SyncGroups).await
    }

    // ── Queries ─────────────────────────────

    /// Peers currently online.
    pub async fn online_peers(&self) -> Vec<PresenceRecord> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::GetOnlinePeers { reply: tx })
            .await;
        rx.await.unwrap_or_default()
    }

    /// Every known peer, offline ones included.
    pub async fn peers(&self) -> Vec<PresenceRecord> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(RuntimeCommand::GetPeers { reply: tx }).await;
        rx.await.unwrap_or_default()
    }

    /// Inbound conversation requests awaiting an answer.
    pub async fn pending_requests(&self) -> Vec<ConversationRequest> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::GetPendingRequests { reply: tx })
            .await;
        rx.await.unwrap_or_default()
    }

    /// Active session topics.
    pub async fn conversations(&self) -> Vec<String> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::GetConversations { reply: tx })
            .await;
        rx.await.unwrap_or_default()
    }

    pub async fn history(&self, topic: String) -> Vec<ChatMessage> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::GetHistory { topic, reply: tx })
            .await;
        rx.await.unwrap_or_default()
    }

    pub async fn groups(&self) -> Vec<Group> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(RuntimeCommand::GetGroups { reply: tx }).await;
        rx.await.unwrap_or_default()
    }

    pub async fn pending_joins(&self, group: String) -> Vec<GroupJoinRequest> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::GetPendingJoins { group, reply: tx })
            .await;
        rx.await.unwrap_or_default()
    }

    /// Rendered `[HH:MM] [sender]: text` lines of a group topic.
    pub async fn group_history(&self, topic: String) -> Vec<String> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::GetGroupHistory { topic, reply: tx })
            .await;
        rx.await.unwrap_or_default()
    }

    /// Graceful shutdown. Resolves once the loop has stopped.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(RuntimeCommand::Shutdown { reply: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

// ── RuntimeChannels ─────────────────────────────────────────────────────

/// Channels returned to the operator when the runtime starts.
pub struct RuntimeChannels {
    /// Handle to send commands to the runtime.
    pub handle: RuntimeHandle,
    /// Receive protocol events.
    pub events: mpsc::Receiver<ProtocolEvent>,
}

// ── PeerRuntime ─────────────────────────────────────────────────────────

/// The peer runtime: spawn it and talk to it through channels.
pub struct PeerRuntime;

impl PeerRuntime {
    /// Start the runtime on a tokio task.
    ///
    /// Takes ownership of the transport; it is dropped, and so detached
    /// from the bus, when the loop stops.
    pub fn spawn<T: Transport + 'static>(transport: T, config: RuntimeConfig) -> RuntimeChannels {
        let local_id = config.peer_id.clone();

        let (cmd_tx, cmd_rx) = mpsc::channel::<RuntimeCommand>(64);
        let (event_tx, event_rx) = mpsc::channel::<ProtocolEvent>(config.event_buffer.max(1));

        tokio::spawn(r#loop::runtime_loop(transport, config, cmd_rx, event_tx));

        RuntimeChannels {
            handle: RuntimeHandle { cmd_tx, local_id },
            events: event_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = RuntimeConfig::new(PeerId::new("alice").unwrap());
        assert_eq!(config.display_name, "alice");
        assert_eq!(config.grace_period, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert!(config.sync_on_start);
    }

    #[test]
    fn config_builder() {
        let config = RuntimeConfig::new(PeerId::new("alice").unwrap())
            .display_name("Alice")
            .grace_period(Duration::from_secs(5))
            .sync_on_start(false)
            .log_utc_offset_secs(3600);
        assert_eq!(config.display_name, "Alice");
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert!(!config.sync_on_start);
        assert_eq!(config.log_offset().local_minus_utc(), 3600);
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        let config = RuntimeConfig::new(PeerId::new("alice").unwrap()).log_utc_offset_secs(90_000);
        assert_eq!(config.log_offset().local_minus_utc(), 0);
    }

    #[test]
    fn from_env_overrides() {
        std::env::set_var(GRACE_PERIOD_ENV, "1500");
        std::env::set_var(REQUEST_TIMEOUT_ENV, "soon");
        let config = RuntimeConfig::from_env(PeerId::new("alice").unwrap());
        std::env::remove_var(GRACE_PERIOD_ENV);
        std::env::remove_var(REQUEST_TIMEOUT_ENV);

        assert_eq!(config.grace_period, Duration::from_millis(1500));
        assert_eq!(config.request_timeout, Duration::from_secs(120));
    }
}
