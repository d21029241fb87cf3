/// ConversationNegotiator: the 1:1 handshake and session logs.
///
/// Requests are keyed by the ordered pair (from, to), so "I asked bob" and
/// "bob asked me" are tracked independently and never merged.
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::conversation::types::*;
use crate::envelope::Envelope;
use crate::error::PeerChatError;
use crate::topic::{control_topic, session_topic, SessionTopic};
use crate::types::{now_ms, ChatMessage, PeerId, ResponseStatus};

pub struct ConversationNegotiator {
    local_id: PeerId,
    request_timeout_ms: u64,
    /// Latest request per ordered (from, to) pair.
    requests: HashMap<(PeerId, PeerId), ConversationRequest>,
    /// Session topic → ordered log.
    conversations: BTreeMap<String, Vec<ChatMessage>>,
}

impl ConversationNegotiator {
    pub fn new(local_id: PeerId, request_timeout: Duration) -> Self {
        Self {
            local_id,
            request_timeout_ms: request_timeout.as_millis() as u64,
            requests: HashMap::new(),
            conversations: BTreeMap::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Latest request for the ordered pair, whatever its state.
    pub fn request(&self, from: &PeerId, to: &PeerId) -> Option<&ConversationRequest> {
        self.requests.get(&(from.clone(), to.clone()))
    }

    /// Inbound requests awaiting our answer, oldest first.
    pub fn pending_inbound(&self) -> Vec<ConversationRequest> {
        let mut pending: Vec<_> = self
            .requests
            .values()
            .filter(|r| r.to == self.local_id && r.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.timestamp);
        pending
    }

    pub fn has_conversation(&self, topic: &str) -> bool {
        self.conversations.contains_key(topic)
    }

    /// Active session topics, ordered.
    pub fn conversation_topics(&self) -> Vec<String> {
        self.conversations.keys().cloned().collect()
    }

    /// Log of one session.
    pub fn history(&self, topic: &str) -> Option<&[ChatMessage]> {
        self.conversations.get(topic).map(|v| v.as_slice())
    }

    // ── Handshake: initiator ─────────────────────────────────────────────

    /// Ask `target` for a conversation.
    ///
    /// Fails locally, without publishing, when a request to `target` is
    /// already pending or when `target` is ourselves.
    pub fn request_conversation(
        &mut self,
        target: &PeerId,
    ) -> Result<Vec<ConversationAction>, PeerChatError> {
        self.request_conversation_at(target, now_ms())
    }

    pub fn request_conversation_at(
        &mut self,
        target: &PeerId,
        now: u64,
    ) -> Result<Vec<ConversationAction>, PeerChatError> {
        if *target == self.local_id {
            return Err(PeerChatError::SelfRequest);
        }
        let key = (self.local_id.clone(), target.clone());
        if self.requests.get(&key).is_some_and(|r| r.is_pending()) {
            return Err(PeerChatError::DuplicateRequest {
                to: target.to_string(),
            });
        }

        self.requests.insert(
            key,
            ConversationRequest {
                from: self.local_id.clone(),
                to: target.clone(),
                timestamp: now,
                status: RequestStatus::Pending,
                session_topic: None,
            },
        );
        tracing::debug!(to = %target, "conversation requested");

        Ok(vec![ConversationAction::Publish {
            topic: control_topic(target),
            envelope: Envelope::ConversationRequest {
                from: self.local_id.clone(),
                to: target.clone(),
                timestamp: now,
            },
        }])
    }

    /// Give up on outbound requests older than the request timeout.
    pub fn expire_stale_requests_at(&mut self, now: u64) -> Vec<ConversationAction> {
        let timeout = self.request_timeout_ms;
        let mut actions = Vec::new();
        for request in self.requests.values_mut() {
            if request.from == self.local_id && request.is_stale(now, timeout) {
                request.status = RequestStatus::Rejected;
                tracing::debug!(to = %request.to, "conversation request expired");
                actions.push(ConversationAction::Event(ConversationEvent::RequestExpired {
                    peer: request.to.clone(),
                }));
            }
        }
        actions
    }

    // ── Handshake: responder ─────────────────────────────────────────────

    /// Answer the pending request from `requester`.
    pub fn respond_to_pending_request(
        &mut self,
        requester: &PeerId,
        accept: bool,
    ) -> Result<Vec<ConversationAction>, PeerChatError> {
        self.respond_to_pending_request_at(requester, accept, now_ms())
    }

    pub fn respond_to_pending_request_at(
        &mut self,
        requester: &PeerId,
        accept: bool,
        now: u64,
    ) -> Result<Vec<ConversationAction>, PeerChatError> {
        let key = (requester.clone(), self.local_id.clone());
        let request = match self.requests.get_mut(&key) {
            Some(r) if r.is_pending() => r,
            _ => {
                return Err(PeerChatError::NoPendingRequest {
                    from: requester.to_string(),
                })
            }
        };

        let reply_to = control_topic(requester);
        if !accept {
            request.status = RequestStatus::Rejected;
            return Ok(vec![ConversationAction::Publish {
                topic: reply_to,
                envelope: Envelope::ConversationResponse {
                    from: self.local_id.clone(),
                    to: requester.clone(),
                    status: ResponseStatus::Rejected,
                    session_topic: None,
                    timestamp: now,
                },
            }]);
        }

        let topic = session_topic(requester, &self.local_id, now);
        request.status = RequestStatus::Accepted;
        request.session_topic = Some(topic.clone());
        self.conversations.entry(topic.clone()).or_default();
        tracing::info!(peer = %requester, %topic, "conversation accepted");

        Ok(vec![
            ConversationAction::Subscribe {
                topic: topic.clone(),
            },
            ConversationAction::Publish {
                topic: reply_to,
                envelope: Envelope::ConversationResponse {
                    from: self.local_id.clone(),
                    to: requester.clone(),
                    status: ResponseStatus::Accepted,
                    session_topic: Some(topic.clone()),
                    timestamp: now,
                },
            },
            ConversationAction::Event(ConversationEvent::Accepted {
                peer: requester.clone(),
                session_topic: topic,
            }),
        ])
    }

    // ── Inbound control ──────────────────────────────────────────────────

    /// Handle a conversation envelope from our control channel.
    pub fn on_control_message(&mut self, envelope: Envelope) -> Vec<ConversationAction> {
        self.on_control_message_at(envelope, now_ms())
    }

    pub fn on_control_message_at(&mut self, envelope: Envelope, now: u64) -> Vec<ConversationAction> {
        match envelope {
            Envelope::ConversationRequest {
                from,
                to,
                timestamp,
            } => {
                if !self.addressed_to_me(&to, "conversation_request") || from == self.local_id {
                    return vec![];
                }
                self.on_request(from, timestamp)
            }
            Envelope::ConversationResponse {
                from,
                to,
                status,
                session_topic,
                ..
            } => {
                if !self.addressed_to_me(&to, "conversation_response") {
                    return vec![];
                }
                self.on_response(from, status, session_topic)
            }
            Envelope::RestoreConversationsRequest { from, .. } => {
                self.on_restore_request(from, now)
            }
            Envelope::RestoreConversationsResponse {
                from,
                to,
                session_topics,
                ..
            } => {
                if !self.addressed_to_me(&to, "restore_conversations_response") {
                    return vec![];
                }
                self.on_restore_response(&from, session_topics)
            }
            other => {
                tracing::debug!(kind = other.kind(), "not a conversation envelope");
                vec![]
            }
        }
    }

    fn addressed_to_me(&self, to: &PeerId, kind: &str) -> bool {
        if *to != self.local_id {
            tracing::warn!(%to, kind, "control envelope addressed to another peer, dropped");
            return false;
        }
        true
    }

    fn on_request(&mut self, from: PeerId, timestamp: u64) -> Vec<ConversationAction> {
        let key = (from.clone(), self.local_id.clone());
        if self.requests.get(&key).is_some_and(|r| r.is_pending()) {
            tracing::debug!(%from, "duplicate conversation request ignored");
            return vec![];
        }
        self.requests.insert(
            key,
            ConversationRequest {
                from: from.clone(),
                to: self.local_id.clone(),
                timestamp,
                status: RequestStatus::Pending,
                session_topic: None,
            },
        );
        tracing::info!(%from, "conversation request received");
        vec![ConversationAction::Event(ConversationEvent::RequestReceived {
            from,
            timestamp,
        })]
    }

    fn on_response(
        &mut self,
        from: PeerId,
        status: ResponseStatus,
        session_topic: Option<String>,
    ) -> Vec<ConversationAction> {
        let key = (self.local_id.clone(), from.clone());
        let Some(request) = self.requests.get_mut(&key).filter(|r| r.is_pending()) else {
            tracing::debug!(%from, "response to a request that is not pending, ignored");
            return vec![ConversationAction::Event(ConversationEvent::Notice(format!(
                "ignored response from {from}: no pending request"
            )))];
        };

        // An acceptance must name a session we participate in.
        let accepted_topic = match (status, session_topic) {
            (ResponseStatus::Accepted, Some(topic))
                if SessionTopic::parse(&topic)
                    .is_some_and(|s| s.includes(&self.local_id) && s.includes(&from)) =>
            {
                Some(topic)
            }
            (ResponseStatus::Accepted, topic) => {
                tracing::warn!(%from, ?topic, "acceptance without a usable session topic");
                None
            }
            (ResponseStatus::Rejected, _) => None,
        };

        match accepted_topic {
            Some(topic) => {
                request.status = RequestStatus::Accepted;
                request.session_topic = Some(topic.clone());
                self.conversations.entry(topic.clone()).or_default();
                tracing::info!(peer = %from, %topic, "conversation accepted by peer");
                vec![
                    ConversationAction::Subscribe {
                        topic: topic.clone(),
                    },
                    ConversationAction::Event(ConversationEvent::Accepted {
                        peer: from,
                        session_topic: topic,
                    }),
                ]
            }
            None => {
                request.status = RequestStatus::Rejected;
                tracing::info!(peer = %from, "conversation rejected by peer");
                vec![ConversationAction::Event(ConversationEvent::Rejected {
                    peer: from,
                })]
            }
        }
    }

    // ── Session traffic ──────────────────────────────────────────────────

    /// Record a message from the other participant. Our own messages come
    /// back as bus echoes and are skipped.
    pub fn on_session_message(&mut self, topic: &str, envelope: Envelope) -> Vec<ConversationAction> {
        let (from, message, timestamp) = match envelope {
            Envelope::ChatMessage {
                from,
                message,
                timestamp,
            } => (from, message, timestamp),
            other => {
                tracing::warn!(topic, kind = other.kind(), "non-chat envelope on session topic");
                return vec![];
            }
        };
        if from == self.local_id {
            return vec![];
        }
        let Some(log) = self.conversations.get_mut(topic) else {
            tracing::debug!(topic, "message for unknown session dropped");
            return vec![];
        };

        let message = ChatMessage {
            sender: from,
            text: message,
            timestamp,
        };
        log.push(message.clone());
        vec![ConversationAction::Event(ConversationEvent::MessageReceived {
            session_topic: topic.to_string(),
            message,
        })]
    }

    /// Publish a chat message and append it to the local log.
    pub fn send_message(
        &mut self,
        topic: &str,
        text: String,
    ) -> Result<Vec<ConversationAction>, PeerChatError> {
        self.send_message_at(topic, text, now_ms())
    }

    pub fn send_message_at(
        &mut self,
        topic: &str,
        text: String,
        now: u64,
    ) -> Result<Vec<ConversationAction>, PeerChatError> {
        let log = self
            .conversations
            .get_mut(topic)
            .ok_or_else(|| PeerChatError::UnknownSession(topic.to_string()))?;
        log.push(ChatMessage {
            sender: self.local_id.clone(),
            text: text.clone(),
            timestamp: now,
        });
        Ok(vec![ConversationAction::Publish {
            topic: topic.to_string(),
            envelope: Envelope::ChatMessage {
                from: self.local_id.clone(),
                message: text,
                timestamp: now,
            },
        }])
    }

    // ── Recovery ─────────────────────────────────────────────────────────

    /// Create an empty log for a session found without a handshake.
    pub fn restore_conversation(&mut self, topic: &str) -> Vec<ConversationAction> {
        if self.conversations.contains_key(topic) {
            return vec![];
        }
        self.conversations.insert(topic.to_string(), Vec::new());
        tracing::info!(topic, "conversation restored");
        vec![
            ConversationAction::Subscribe {
                topic: topic.to_string(),
            },
            ConversationAction::Event(ConversationEvent::Restored {
                session_topic: topic.to_string(),
            }),
        ]
    }

    /// Ask `peers` which sessions we share with them.
    pub fn request_restore(&self, peers: &[PeerId]) -> Vec<ConversationAction> {
        self.request_restore_at(peers, now_ms())
    }

    pub fn request_restore_at(&self, peers: &[PeerId], now: u64) -> Vec<ConversationAction> {
        peers
            .iter()
            .filter(|p| **p != self.local_id)
            .map(|peer| ConversationAction::Publish {
                topic: control_topic(peer),
                envelope: Envelope::RestoreConversationsRequest {
                    from: self.local_id.clone(),
                    timestamp: now,
                },
            })
            .collect()
    }

    fn on_restore_request(&self, from: PeerId, now: u64) -> Vec<ConversationAction> {
        if from == self.local_id {
            return vec![];
        }
        let shared: Vec<String> = self
            .conversations
            .keys()
            .filter(|topic| SessionTopic::parse(topic).is_some_and(|s| s.includes(&from)))
            .cloned()
            .collect();
        if shared.is_empty() {
            return vec![];
        }
        tracing::debug!(%from, count = shared.len(), "answering restore request");
        vec![ConversationAction::Publish {
            topic: control_topic(&from),
            envelope: Envelope::RestoreConversationsResponse {
                from: self.local_id.clone(),
                to: from,
                session_topics: shared,
                timestamp: now,
            },
        }]
    }

    fn on_restore_response(&mut self, from: &PeerId, topics: Vec<String>) -> Vec<ConversationAction> {
        let mut actions = Vec::new();
        for topic in topics {
            let ok = SessionTopic::parse(&topic)
                .is_some_and(|s| s.includes(&self.local_id) && s.includes(from));
            if !ok {
                tracing::warn!(%from, %topic, "restore offered a session we are not part of");
                continue;
            }
            actions.extend(self.restore_conversation(&topic));
        }
        actions
    }
}
