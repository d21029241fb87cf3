use serde::{Deserialize, Serialize};

use crate::error::PeerChatError;
use crate::types::{PeerId, PresenceStatus, ResponseStatus};

/// Protocol envelope: the unit of communication on every topic.
///
/// Serialized as a JSON object with a `type` discriminator and camelCase
/// fields. A payload with a missing or unknown `type`, or missing required
/// fields, fails to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    // ── Presence ─────────────────────────────────────
    #[serde(rename_all = "camelCase")]
    StatusUpdate {
        user_id: PeerId,
        status: PresenceStatus,
        timestamp: u64,
        /// Display name; defaults to the peer id when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    StatusRequest { requester: PeerId, timestamp: u64 },

    // ── Conversations ────────────────────────────────
    #[serde(rename_all = "camelCase")]
    ConversationRequest {
        from: PeerId,
        to: PeerId,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    ConversationResponse {
        from: PeerId,
        to: PeerId,
        status: ResponseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_topic: Option<String>,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    RestoreConversationsRequest { from: PeerId, timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    RestoreConversationsResponse {
        from: PeerId,
        to: PeerId,
        session_topics: Vec<String>,
        timestamp: u64,
    },

    // ── Group directory ──────────────────────────────
    GroupCreated(GroupBroadcast),
    GroupUpdated(GroupBroadcast),
    GroupDeleted(GroupBroadcast),
    #[serde(rename_all = "camelCase")]
    GroupsSyncRequest { requester: PeerId, timestamp: u64 },

    // ── Group control ────────────────────────────────
    #[serde(rename_all = "camelCase")]
    GroupJoinRequest {
        group_name: String,
        from: PeerId,
        to: PeerId,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    GroupJoinResponse {
        group_name: String,
        from: PeerId,
        to: PeerId,
        status: ResponseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    GroupInvitation {
        group_name: String,
        from: PeerId,
        to: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        timestamp: u64,
    },

    // ── Session traffic ──────────────────────────────
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        from: PeerId,
        message: String,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    GroupMessage {
        from: PeerId,
        message: String,
        timestamp: u64,
    },
}

/// Body of `group_created` / `group_updated` / `group_deleted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupBroadcast {
    pub name: String,
    pub leader_id: PeerId,
    pub members: Vec<PeerId>,
    pub topic: String,
    pub timestamp: u64,
}

impl Envelope {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PeerChatError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, PeerChatError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// The wire discriminator, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::StatusUpdate { .. } => "status_update",
            Envelope::StatusRequest { .. } => "status_request",
            Envelope::ConversationRequest { .. } => "conversation_request",
            Envelope::ConversationResponse { .. } => "conversation_response",
            Envelope::RestoreConversationsRequest { .. } => "restore_conversations_request",
            Envelope::RestoreConversationsResponse { .. } => "restore_conversations_response",
            Envelope::GroupCreated(_) => "group_created",
            Envelope::GroupUpdated(_) => "group_updated",
            Envelope::GroupDeleted(_) => "group_deleted",
            Envelope::GroupsSyncRequest { .. } => "groups_sync_request",
            Envelope::GroupJoinRequest { .. } => "group_join_request",
            Envelope::GroupJoinResponse { .. } => "group_join_response",
            Envelope::GroupInvitation { .. } => "group_invitation",
            Envelope::ChatMessage { .. } => "chat_message",
            Envelope::GroupMessage { .. } => "group_message",
        }
    }

    /// Envelopes that belong on the presence directory.
    pub fn is_presence(&self) -> bool {
        matches!(
            self,
            Envelope::StatusUpdate { .. } | Envelope::StatusRequest { .. }
        )
    }

    /// Envelopes that belong on the group directory.
    pub fn is_directory(&self) -> bool {
        matches!(
            self,
            Envelope::GroupCreated(_)
                | Envelope::GroupUpdated(_)
                | Envelope::GroupDeleted(_)
                | Envelope::GroupsSyncRequest { .. }
        )
    }

    /// Control envelopes handled by the conversation negotiator.
    pub fn is_conversation_control(&self) -> bool {
        matches!(
            self,
            Envelope::ConversationRequest { .. }
                | Envelope::ConversationResponse { .. }
                | Envelope::RestoreConversationsRequest { .. }
                | Envelope::RestoreConversationsResponse { .. }
        )
    }

    /// Control envelopes handled by the group registry.
    pub fn is_group_control(&self) -> bool {
        matches!(
            self,
            Envelope::GroupJoinRequest { .. }
                | Envelope::GroupJoinResponse { .. }
                | Envelope::GroupInvitation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> PeerId {
        PeerId::new(s).unwrap()
    }

    #[test]
    fn conversation_request_wire_shape() {
        let env = Envelope::ConversationRequest {
            from: id("x"),
            to: id("y"),
            timestamp: 1000,
        };
        let value: serde_json::Value = serde_json::from_slice(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "conversation_request", "from": "x", "to": "y", "timestamp": 1000})
        );
    }

    #[test]
    fn conversation_response_wire_shape() {
        let env = Envelope::ConversationResponse {
            from: id("y"),
            to: id("x"),
            status: ResponseStatus::Accepted,
            session_topic: Some("x_y_1000".into()),
            timestamp: 1000,
        };
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "conversation_response");
        assert_eq!(value["status"], "accepted");
        assert_eq!(value["sessionTopic"], "x_y_1000");

        let rejected = Envelope::ConversationResponse {
            from: id("y"),
            to: id("x"),
            status: ResponseStatus::Rejected,
            session_topic: None,
            timestamp: 1000,
        };
        let value = serde_json::to_value(&rejected).unwrap();
        assert!(value.get("sessionTopic").is_none());
    }

    #[test]
    fn group_broadcast_is_flattened() {
        let env = Envelope::GroupUpdated(GroupBroadcast {
            name: "team".into(),
            leader_id: id("alice"),
            members: vec![id("alice"), id("bob")],
            topic: "GROUP_team".into(),
            timestamp: 5,
        });
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "group_updated",
                "name": "team",
                "leaderId": "alice",
                "members": ["alice", "bob"],
                "topic": "GROUP_team",
                "timestamp": 5
            })
        );
        let back = Envelope::from_bytes(value.to_string().as_bytes()).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn status_update_name_is_optional() {
        let raw = br#"{"type":"status_update","userId":"bob","status":"online","timestamp":7}"#;
        let env = Envelope::from_bytes(raw).unwrap();
        assert_eq!(
            env,
            Envelope::StatusUpdate {
                user_id: id("bob"),
                status: PresenceStatus::Online,
                timestamp: 7,
                name: None,
            }
        );
    }

    #[test]
    fn missing_or_unknown_type_fails() {
        assert!(Envelope::from_bytes(br#"{"from":"x","message":"hi","timestamp":1}"#).is_err());
        assert!(Envelope::from_bytes(br#"{"type":"mystery","from":"x"}"#).is_err());
        assert!(Envelope::from_bytes(b"not json").is_err());
    }

    #[test]
    fn missing_required_field_fails() {
        // Announcement without a status.
        let raw = br#"{"type":"status_update","userId":"bob","timestamp":7}"#;
        assert!(Envelope::from_bytes(raw).is_err());
        // Announcement without a peer id.
        let raw = br#"{"type":"status_update","status":"online","timestamp":7}"#;
        assert!(Envelope::from_bytes(raw).is_err());
    }

    #[test]
    fn invalid_peer_id_fails() {
        let raw = br#"{"type":"status_request","requester":"a_b","timestamp":7}"#;
        assert!(Envelope::from_bytes(raw).is_err());
    }

    #[test]
    fn kind_matches_wire_tag() {
        let env = Envelope::GroupsSyncRequest {
            requester: id("bob"),
            timestamp: 1,
        };
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], env.kind());
        assert!(env.is_directory());
        assert!(!env.is_presence());
    }

    #[test]
    fn category_predicates() {
        let join = Envelope::GroupJoinRequest {
            group_name: "team".into(),
            from: id("bob"),
            to: id("alice"),
            timestamp: 1,
        };
        assert!(join.is_group_control());
        assert!(!join.is_conversation_control());

        let chat = Envelope::ChatMessage {
            from: id("x"),
            message: "hi".into(),
            timestamp: 1,
        };
        assert!(!chat.is_group_control());
        assert!(!chat.is_conversation_control());
        assert!(!chat.is_directory());
    }
}
