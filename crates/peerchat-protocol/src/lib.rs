//! peerchat protocol layer.
//!
//! Presence, 1:1 session negotiation and leader-arbitrated groups on top of
//! a publish/subscribe bus with retained messages. There is no central
//! coordinator: every peer runs the same state machines and the bus is the
//! only shared medium.
//!
//! Wire format: JSON envelopes tagged by `type`.
//!
//! Each state machine is pure and returns actions; [`runtime`] wires them to
//! a [`runtime::Transport`] on a single tokio task.

pub mod conversation;
pub mod envelope;
pub mod error;
pub mod group;
pub mod presence;
pub mod router;
pub mod runtime;
pub mod topic;
pub mod types;

pub use conversation::{
    ConversationAction, ConversationEvent, ConversationNegotiator, ConversationRequest,
    RequestStatus,
};
pub use envelope::{Envelope, GroupBroadcast};
pub use error::PeerChatError;
pub use group::{Group, GroupAction, GroupEvent, GroupJoinRequest, GroupLogEntry, GroupRegistry};
pub use presence::{
    Announcement, PresenceAction, PresenceEvent, PresenceRecord, PresenceTracker, PresenceView,
};
pub use router::{MessageRouter, RoutingAction};
pub use runtime::{
    Operation, PeerRuntime, ProtocolEvent, RuntimeChannels, RuntimeConfig, RuntimeHandle,
    Transport,
};
pub use types::{now_ms, ChatMessage, PeerId, PresenceStatus, ResponseStatus};
