/// Conversation data structures.
use crate::envelope::Envelope;
use crate::types::{ChatMessage, PeerId};

/// Outbound requests left unanswered this long are dropped locally (2 minutes).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2 * 60 * 1000;

/// Lifecycle of a conversation request. Accepted and Rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A conversation request, inbound (`to == self`) or outbound (`from == self`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRequest {
    pub from: PeerId,
    pub to: PeerId,
    pub timestamp: u64,
    pub status: RequestStatus,
    pub session_topic: Option<String>,
}

impl ConversationRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Whether an outbound pending request has outlived `timeout_ms`.
    pub fn is_stale(&self, now: u64, timeout_ms: u64) -> bool {
        self.is_pending() && now.saturating_sub(self.timestamp) >= timeout_ms
    }
}

/// Action produced by the negotiator for the runtime to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationAction {
    /// Publish a (non-retained) envelope.
    Publish { topic: String, envelope: Envelope },
    /// Subscribe to a session topic.
    Subscribe { topic: String },
    /// Surface an event to the operator.
    Event(ConversationEvent),
}

/// Conversation events surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// A peer wants to talk; answer with `respond_to_pending_request`.
    RequestReceived { from: PeerId, timestamp: u64 },
    /// A session is open with `peer` (either side of the handshake).
    Accepted { peer: PeerId, session_topic: String },
    /// `peer` declined our request.
    Rejected { peer: PeerId },
    /// Our request to `peer` went unanswered for too long.
    RequestExpired { peer: PeerId },
    /// A session was recovered without a handshake.
    Restored { session_topic: String },
    /// A message from the other participant.
    MessageReceived {
        session_topic: String,
        message: ChatMessage,
    },
    /// A protocol violation handled as a local no-op.
    Notice(String),
}
