/// Configuration for a [`BusClient`](crate::BusClient).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use peerchat_bus::BusConfig;
///
/// let config = BusConfig::new()
///     .client_id("alice")
///     .clean_session(false)
///     .max_queued(512);
/// ```
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Session identifier. Reconnecting with the same id resumes a
    /// persistent session.
    pub(crate) client_id: String,
    /// Discard subscriptions and queued messages on disconnect.
    pub(crate) clean_session: bool,
    /// Messages kept for a persistent session while it is offline.
    pub(crate) max_queued: usize,
    /// Maximum payload size accepted by `publish`.
    pub(crate) max_payload_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BusConfig {
    /// Create a new config with defaults and a random client id.
    pub fn new() -> Self {
        Self {
            client_id: format!("client-{}", uuid::Uuid::new_v4()),
            clean_session: true,
            max_queued: 1024,
            max_payload_size: 256 * 1024,
        }
    }

    /// Set the session identifier.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Keep (`false`) or discard (`true`, default) the session on disconnect.
    ///
    /// A persistent session keeps its subscriptions and queues messages
    /// published while the client is away; they are delivered on reconnect.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Cap on messages queued for an offline persistent session (default: 1024).
    /// The oldest message is dropped once the cap is reached.
    pub fn max_queued(mut self, count: usize) -> Self {
        self.max_queued = count;
        self
    }

    /// Maximum payload size in bytes (default: 256 KiB).
    pub fn max_payload_size(mut self, bytes: usize) -> Self {
        self.max_payload_size = bytes;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), crate::BusError> {
        if self.client_id.is_empty() {
            return Err(crate::BusError::Config("client id must not be empty".into()));
        }
        if self.max_payload_size == 0 {
            return Err(crate::BusError::Config(
                "max payload size must be positive".into(),
            ));
        }
        Ok(())
    }
}
