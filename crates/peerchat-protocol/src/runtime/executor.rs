//! Effect executor: the only place that touches I/O.
//!
//! Publish -> serialize, transport.publish()
//! Subscribe / Unsubscribe -> transport
//! Emit -> event_tx.try_send()

use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::error::PeerChatError;

use super::effect::RuntimeEffect;
use super::transport::Transport;
use super::ProtocolEvent;

/// Execute a list of effects using the given transport and event channel.
pub(super) async fn execute_effects<T: Transport>(
    effects: Vec<RuntimeEffect>,
    transport: &T,
    event_tx: &mpsc::Sender<ProtocolEvent>,
) {
    for effect in effects {
        match effect {
            RuntimeEffect::Publish {
                topic,
                envelope,
                retained,
            } => {
                publish(transport, &topic, &envelope, retained, event_tx).await;
            }
            RuntimeEffect::Subscribe { topic } => {
                if let Err(e) = transport.subscribe(&topic).await {
                    report(event_tx, format!("subscribe {topic} failed: {}", PeerChatError::Transport(e)));
                }
            }
            RuntimeEffect::Unsubscribe { topic } => {
                if let Err(e) = transport.unsubscribe(&topic).await {
                    report(event_tx, format!("unsubscribe {topic} failed: {}", PeerChatError::Transport(e)));
                }
            }
            RuntimeEffect::Emit(event) => {
                // Never block the loop on a slow operator.
                if event_tx.try_send(event).is_err() {
                    tracing::warn!("event channel full or closed, event dropped");
                }
            }
        }
    }
}

async fn publish<T: Transport>(
    transport: &T,
    topic: &str,
    envelope: &Envelope,
    retained: bool,
    event_tx: &mpsc::Sender<ProtocolEvent>,
) {
    match envelope.to_bytes() {
        Ok(bytes) => {
            tracing::debug!(topic, kind = envelope.kind(), retained, "publish");
            if let Err(e) = transport.publish(topic, &bytes, retained).await {
                report(event_tx, format!("publish to {topic} failed: {}", PeerChatError::Transport(e)));
            }
        }
        Err(e) => {
            report(event_tx, format!("serialize envelope failed: {e}"));
        }
    }
}

fn report(event_tx: &mpsc::Sender<ProtocolEvent>, description: String) {
    tracing::warn!("{description}");
    let _ = event_tx.try_send(ProtocolEvent::Error { description });
}
