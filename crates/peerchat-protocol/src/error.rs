/// Protocol-level errors for peerchat.
///
/// Operator operations that fail locally (duplicate request, unknown group,
/// wrong membership) return one of these. Inbound traffic never does: the
/// router logs and drops bad input instead.
#[derive(Debug, thiserror::Error)]
pub enum PeerChatError {
    #[error("invalid peer id: {0:?}")]
    InvalidPeerId(String),

    #[error("invalid group name: {0:?}")]
    InvalidGroupName(String),

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("a conversation request to {to} is already pending")]
    DuplicateRequest { to: String },

    #[error("cannot open a conversation with yourself")]
    SelfRequest,

    #[error("no pending conversation request from {from}")]
    NoPendingRequest { from: String },

    #[error("unknown session topic: {0}")]
    UnknownSession(String),

    #[error("group already exists: {0}")]
    GroupExists(String),

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("{peer} is already a member of {group}")]
    AlreadyMember { group: String, peer: String },

    #[error("you lead {group}")]
    IsLeader { group: String },

    #[error("not a member of {group}")]
    NotMember { group: String },

    #[error("no pending join request from {from} for {group}")]
    NoPendingJoin { group: String, from: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("runtime shut down")]
    RuntimeClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_duplicate_request() {
        let err = PeerChatError::DuplicateRequest { to: "bob".into() };
        assert_eq!(
            err.to_string(),
            "a conversation request to bob is already pending"
        );
    }

    #[test]
    fn test_display_already_member() {
        let err = PeerChatError::AlreadyMember {
            group: "team".into(),
            peer: "bob".into(),
        };
        assert_eq!(err.to_string(), "bob is already a member of team");
    }

    #[test]
    fn test_display_invalid_peer_id() {
        let err = PeerChatError::InvalidPeerId("a_b".into());
        assert_eq!(err.to_string(), "invalid peer id: \"a_b\"");
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: PeerChatError = json_err.into();
        assert!(err.to_string().starts_with("malformed envelope:"));
    }
}
