/// Message classification for inbound bus traffic.
///
/// Pure decision logic: receives a `(topic, payload)` pair, returns a
/// `RoutingAction` telling the runtime which state machine gets it. Never
/// fails; anything it cannot place becomes `Drop`.
use crate::envelope::Envelope;
use crate::topic::{
    is_control_topic, is_group_directory_topic, is_group_topic, is_presence_topic, SessionTopic,
};
use crate::types::PeerId;

// ── Routing decisions ────────────────────────────────────────────────────

/// Where an inbound message goes.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingAction {
    /// Announcement or status request for the presence tracker.
    Presence(Envelope),
    /// Group directory broadcast or sync request.
    GroupDirectory(Envelope),
    /// Handshake or restore envelope from our control channel.
    ConversationControl(Envelope),
    /// Join request, join response or invitation from our control channel.
    GroupControl(Envelope),
    /// Chat message on a session we already know.
    Session { topic: String, envelope: Envelope },
    /// Message on a group topic.
    Group { topic: String, envelope: Envelope },
    /// Chat message on an unknown topic shaped like one of our sessions.
    /// The caller restores the session, then delivers it as a session message.
    Restore { topic: String, envelope: Envelope },
    /// Unknown topic, malformed payload or misplaced envelope.
    Drop { reason: String },
}

// ── Router ───────────────────────────────────────────────────────────────

pub struct MessageRouter {
    local_id: PeerId,
}

impl MessageRouter {
    pub fn new(local_id: PeerId) -> Self {
        Self { local_id }
    }

    /// Classify one inbound message.
    ///
    /// Topics are checked in priority order: presence, group directory,
    /// control, known session, group, restore candidate. `known_session`
    /// tells the router whether `topic` is an active conversation.
    pub fn route(&self, topic: &str, payload: &[u8], known_session: bool) -> RoutingAction {
        if is_presence_topic(topic) {
            return self.decode(topic, payload, |env| {
                env.is_presence().then_some(RoutingAction::Presence(env))
            });
        }
        if is_group_directory_topic(topic) {
            return self.decode(topic, payload, |env| {
                env.is_directory().then_some(RoutingAction::GroupDirectory(env))
            });
        }
        if is_control_topic(topic) {
            return self.decode(topic, payload, |env| {
                if env.is_conversation_control() {
                    Some(RoutingAction::ConversationControl(env))
                } else if env.is_group_control() {
                    Some(RoutingAction::GroupControl(env))
                } else {
                    None
                }
            });
        }
        if known_session {
            return self.decode(topic, payload, |env| {
                matches!(env, Envelope::ChatMessage { .. }).then(|| RoutingAction::Session {
                    topic: topic.to_string(),
                    envelope: env,
                })
            });
        }
        if is_group_topic(topic) {
            return self.decode(topic, payload, |env| {
                matches!(env, Envelope::GroupMessage { .. }).then(|| RoutingAction::Group {
                    topic: topic.to_string(),
                    envelope: env,
                })
            });
        }
        if SessionTopic::parse(topic).is_some_and(|s| s.includes(&self.local_id)) {
            return self.decode(topic, payload, |env| {
                matches!(env, Envelope::ChatMessage { .. }).then(|| RoutingAction::Restore {
                    topic: topic.to_string(),
                    envelope: env,
                })
            });
        }

        tracing::debug!(topic, "message on unknown topic dropped");
        RoutingAction::Drop {
            reason: format!("unknown topic {topic}"),
        }
    }

    /// Decode the payload and let `place` accept or refuse the envelope.
    fn decode(
        &self,
        topic: &str,
        payload: &[u8],
        place: impl FnOnce(Envelope) -> Option<RoutingAction>,
    ) -> RoutingAction {
        let envelope = match Envelope::from_bytes(payload) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(topic, error = %e, "malformed payload dropped");
                return RoutingAction::Drop {
                    reason: e.to_string(),
                };
            }
        };
        let kind = envelope.kind();
        match place(envelope) {
            Some(action) => action,
            None => {
                tracing::warn!(topic, kind, "envelope does not belong on this topic");
                RoutingAction::Drop {
                    reason: format!("{kind} not expected on {topic}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PresenceStatus, ResponseStatus};

    fn id(s: &str) -> PeerId {
        PeerId::new(s).unwrap()
    }

    fn router() -> MessageRouter {
        MessageRouter::new(id("x"))
    }

    fn bytes(env: &Envelope) -> Vec<u8> {
        env.to_bytes().unwrap()
    }

    fn chat(from: &str) -> Envelope {
        Envelope::ChatMessage {
            from: id(from),
            message: "hi".into(),
            timestamp: 1,
        }
    }

    #[test]
    fn presence_topics() {
        let update = Envelope::StatusUpdate {
            user_id: id("bob"),
            status: PresenceStatus::Online,
            timestamp: 1,
            name: None,
        };
        assert_eq!(
            router().route("USERS/bob", &bytes(&update), false),
            RoutingAction::Presence(update.clone())
        );
        assert_eq!(
            router().route("USERS", &bytes(&update), false),
            RoutingAction::Presence(update)
        );
    }

    #[test]
    fn directory_topic() {
        let sync = Envelope::GroupsSyncRequest {
            requester: id("bob"),
            timestamp: 1,
        };
        assert_eq!(
            router().route("GROUPS", &bytes(&sync), false),
            RoutingAction::GroupDirectory(sync)
        );
    }

    #[test]
    fn control_dispatch_by_type() {
        let request = Envelope::ConversationRequest {
            from: id("y"),
            to: id("x"),
            timestamp: 1,
        };
        assert_eq!(
            router().route("x_Control", &bytes(&request), false),
            RoutingAction::ConversationControl(request)
        );

        let join = Envelope::GroupJoinResponse {
            group_name: "team".into(),
            from: id("alice"),
            to: id("x"),
            status: ResponseStatus::Accepted,
            topic: Some("GROUP_team".into()),
            timestamp: 1,
        };
        assert_eq!(
            router().route("x_Control", &bytes(&join), false),
            RoutingAction::GroupControl(join)
        );

        // A chat message does not belong on a control channel.
        assert!(matches!(
            router().route("x_Control", &bytes(&chat("y")), false),
            RoutingAction::Drop { .. }
        ));
    }

    #[test]
    fn known_session_beats_restore() {
        let msg = chat("y");
        assert!(matches!(
            router().route("x_y_1000", &bytes(&msg), true),
            RoutingAction::Session { .. }
        ));
        assert!(matches!(
            router().route("x_y_1000", &bytes(&msg), false),
            RoutingAction::Restore { .. }
        ));
    }

    #[test]
    fn restore_requires_self_in_topic() {
        assert!(matches!(
            router().route("y_z_1000", &bytes(&chat("y")), false),
            RoutingAction::Drop { .. }
        ));
        assert!(matches!(
            router().route("y_x_abc", &bytes(&chat("y")), false),
            RoutingAction::Drop { .. }
        ));
    }

    #[test]
    fn group_topic() {
        let msg = Envelope::GroupMessage {
            from: id("bob"),
            message: "hey".into(),
            timestamp: 1,
        };
        assert_eq!(
            router().route("GROUP_team", &bytes(&msg), false),
            RoutingAction::Group {
                topic: "GROUP_team".into(),
                envelope: msg,
            }
        );
    }

    #[test]
    fn unknown_topic_dropped_even_with_garbage() {
        let action = router().route("weather/today", b"\xff\x00", false);
        assert_eq!(
            action,
            RoutingAction::Drop {
                reason: "unknown topic weather/today".into()
            }
        );
    }

    #[test]
    fn malformed_payload_dropped() {
        assert!(matches!(
            router().route("USERS/bob", b"{not json", false),
            RoutingAction::Drop { .. }
        ));
        assert!(matches!(
            router().route("x_Control", br#"{"from":"y","to":"x"}"#, false),
            RoutingAction::Drop { .. }
        ));
    }
}
