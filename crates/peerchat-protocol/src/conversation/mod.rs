/// One-to-one conversations.
///
/// Request → accept/reject handshake over control channels, then a shared
/// session topic derived from both participant ids and the accept time.
/// Pure state machine: no I/O.
pub mod negotiator;
pub mod types;

pub use negotiator::ConversationNegotiator;
pub use types::{
    ConversationAction, ConversationEvent, ConversationRequest, RequestStatus,
    DEFAULT_REQUEST_TIMEOUT_MS,
};
