//! peerchat bus layer.
//!
//! An in-process publish/subscribe broker with the semantics the protocol
//! layer relies on: topic filters with `+` / `#` wildcards, retained
//! messages redelivered to new subscribers, persistent sessions that survive
//! a reconnect, and in-order delivery per topic.
//!
//! # Quick start
//!
//! ```rust
//! use peerchat_bus::{Broker, BusClient, BusConfig};
//!
//! # async fn example() -> Result<(), peerchat_bus::BusError> {
//! let broker = Broker::new();
//! let mut alice = BusClient::connect(&broker, BusConfig::new().client_id("alice"))?;
//! let bob = BusClient::connect(&broker, BusConfig::new().client_id("bob"))?;
//!
//! alice.subscribe("USERS/#")?;
//! bob.publish("USERS/bob", b"online".to_vec(), true)?;
//!
//! let msg = alice.recv().await?;
//! assert_eq!(msg.topic, "USERS/bob");
//! assert!(!msg.retained);
//! # Ok(())
//! # }
//! ```

mod broker;
mod client;
mod config;
mod error;
mod filter;

pub use broker::Broker;
pub use client::BusClient;
pub use config::BusConfig;
pub use error::BusError;
pub use filter::{topic_matches, validate_filter, validate_topic};

use bytes::Bytes;

/// A message as delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Concrete topic the message was published on.
    pub topic: String,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// Whether this delivery comes from the retained store (replayed on
    /// subscribe) rather than a live publish.
    pub retained: bool,
}

impl Message {
    pub(crate) fn live(topic: &str, payload: Bytes) -> Self {
        Self {
            topic: topic.to_string(),
            payload,
            retained: false,
        }
    }

    pub(crate) fn replay(topic: &str, payload: Bytes) -> Self {
        Self {
            topic: topic.to_string(),
            payload,
            retained: true,
        }
    }
}
