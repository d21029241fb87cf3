use bytes::Bytes;
use tokio::sync::mpsc;

use crate::broker::Broker;
use crate::config::BusConfig;
use crate::{BusError, Message};

/// A connected bus client.
///
/// Dropping the client detaches it from the broker the same way
/// [`disconnect`](Self::disconnect) does. A persistent session
/// (`clean_session(false)`) keeps its subscriptions and queues messages
/// until the same client id connects again.
pub struct BusClient {
    broker: Broker,
    client_id: String,
    generation: u64,
    resumed: bool,
    incoming_rx: mpsc::UnboundedReceiver<Message>,
    max_payload_size: usize,
}

impl BusClient {
    /// Connect to a broker.
    pub fn connect(broker: &Broker, config: BusConfig) -> Result<Self, BusError> {
        let attached = broker.attach(&config)?;
        tracing::info!(
            client_id = %config.client_id,
            resumed = attached.resumed,
            "connected to bus"
        );
        Ok(Self {
            broker: broker.clone(),
            client_id: config.client_id,
            generation: attached.generation,
            resumed: attached.resumed,
            incoming_rx: attached.receiver,
            max_payload_size: config.max_payload_size,
        })
    }

    /// This client's session id.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether this connection resumed a persistent session.
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// Subscribe to a topic filter. Retained messages matching a new filter
    /// are delivered immediately; re-subscribing an existing filter is a no-op.
    pub fn subscribe(&self, filter: &str) -> Result<(), BusError> {
        self.broker.subscribe(&self.client_id, filter)
    }

    /// Remove a topic filter.
    pub fn unsubscribe(&self, filter: &str) -> Result<(), BusError> {
        self.broker.unsubscribe(&self.client_id, filter)
    }

    /// Publish a payload. With `retain`, the broker keeps it as the topic's
    /// last value (an empty payload clears it).
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        retain: bool,
    ) -> Result<(), BusError> {
        let payload = payload.into();
        if payload.len() > self.max_payload_size {
            return Err(BusError::MessageTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }
        self.broker.publish(topic, payload, retain)
    }

    /// Receive the next message. Blocks until one arrives.
    pub async fn recv(&mut self) -> Result<Message, BusError> {
        self.incoming_rx.recv().await.ok_or(BusError::Disconnected)
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.incoming_rx.try_recv().ok()
    }

    /// Graceful disconnect.
    pub fn disconnect(self) {
        // Detach happens in Drop.
        tracing::info!(client_id = %self.client_id, "disconnecting from bus");
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.broker.detach(&self.client_id, self.generation);
    }
}
