use crate::conversation::{ConversationAction, ConversationEvent};
use crate::envelope::Envelope;
use crate::group::{GroupAction, GroupEvent};
use crate::presence::PresenceAction;

use super::ProtocolEvent;

/// Intent produced by the pure logic of `RuntimeState`.
///
/// Every `handle_*` / `tick_*` method returns `Vec<RuntimeEffect>`; the event
/// loop then runs them against the transport and the event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEffect {
    /// Serialize and publish an envelope.
    Publish {
        topic: String,
        envelope: Envelope,
        retained: bool,
    },

    /// Start receiving a topic filter.
    Subscribe { topic: String },

    /// Stop receiving a topic filter.
    Unsubscribe { topic: String },

    /// Surface an event to the operator.
    Emit(ProtocolEvent),
}

impl From<PresenceAction> for RuntimeEffect {
    fn from(action: PresenceAction) -> Self {
        match action {
            PresenceAction::Publish {
                topic,
                envelope,
                retained,
            } => RuntimeEffect::Publish {
                topic,
                envelope,
                retained,
            },
            PresenceAction::Event(event) => RuntimeEffect::Emit(ProtocolEvent::Presence(event)),
        }
    }
}

impl From<ConversationAction> for RuntimeEffect {
    fn from(action: ConversationAction) -> Self {
        match action {
            ConversationAction::Publish { topic, envelope } => RuntimeEffect::Publish {
                topic,
                envelope,
                retained: false,
            },
            ConversationAction::Subscribe { topic } => RuntimeEffect::Subscribe { topic },
            ConversationAction::Event(ConversationEvent::Notice(text)) => {
                RuntimeEffect::Emit(ProtocolEvent::Notice(text))
            }
            ConversationAction::Event(event) => {
                RuntimeEffect::Emit(ProtocolEvent::Conversation(event))
            }
        }
    }
}

impl From<GroupAction> for RuntimeEffect {
    fn from(action: GroupAction) -> Self {
        match action {
            GroupAction::Publish {
                topic,
                envelope,
                retained,
            } => RuntimeEffect::Publish {
                topic,
                envelope,
                retained,
            },
            GroupAction::Subscribe { topic } => RuntimeEffect::Subscribe { topic },
            GroupAction::Unsubscribe { topic } => RuntimeEffect::Unsubscribe { topic },
            GroupAction::Event(GroupEvent::Notice(text)) => {
                RuntimeEffect::Emit(ProtocolEvent::Notice(text))
            }
            GroupAction::Event(event) => RuntimeEffect::Emit(ProtocolEvent::Group(event)),
        }
    }
}

/// Convert a state machine's actions into runtime effects.
pub(crate) fn effects<A: Into<RuntimeEffect>>(actions: Vec<A>) -> Vec<RuntimeEffect> {
    actions.into_iter().map(Into::into).collect()
}
