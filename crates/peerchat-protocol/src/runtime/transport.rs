use peerchat_bus::BusClient;

/// Bus abstraction for the runtime.
///
/// In production: implemented by `BusClient`.
/// In tests: implemented by `MockTransport` (records publishes and
/// subscriptions, replays injected deliveries).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Start receiving messages matching `filter`.
    async fn subscribe(&self, filter: &str) -> Result<(), String>;

    /// Stop receiving messages matching `filter`.
    async fn unsubscribe(&self, filter: &str) -> Result<(), String>;

    /// Publish raw bytes on `topic`.
    async fn publish(&self, topic: &str, payload: &[u8], retained: bool) -> Result<(), String>;

    /// Next delivery as `(topic, payload)`. Must be cancel-safe.
    async fn recv(&mut self) -> Result<(String, Vec<u8>), String>;
}

// ── Impl for BusClient (production) ─────────────────────────────────────

#[async_trait::async_trait]
impl Transport for BusClient {
    async fn subscribe(&self, filter: &str) -> Result<(), String> {
        BusClient::subscribe(self, filter).map_err(|e| e.to_string())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), String> {
        BusClient::unsubscribe(self, filter).map_err(|e| e.to_string())
    }

    async fn publish(&self, topic: &str, payload: &[u8], retained: bool) -> Result<(), String> {
        BusClient::publish(self, topic, payload.to_vec(), retained).map_err(|e| e.to_string())
    }

    async fn recv(&mut self) -> Result<(String, Vec<u8>), String> {
        let msg = BusClient::recv(self).await.map_err(|e| e.to_string())?;
        Ok((msg.topic, msg.payload.to_vec()))
    }
}

// ── MockTransport (tests) ───────────────────────────────────────────────
