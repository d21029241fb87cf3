//! In-process broker state shared by every [`BusClient`](crate::BusClient).
//!
//! All mutation happens under one lock, so delivery order on a topic is the
//! publish order for every subscriber.
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::BusConfig;
use crate::filter::{topic_matches, validate_filter, validate_topic};
use crate::{BusError, Message};

/// Handle to a broker. Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct Broker {
    inner: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    /// Last retained payload per concrete topic.
    retained: BTreeMap<String, Bytes>,
    /// Sessions by client id.
    sessions: HashMap<String, Session>,
    /// Monotonic connection counter (distinguishes reconnects).
    next_generation: u64,
}

struct Session {
    filters: Vec<String>,
    /// Live channel while connected.
    sender: Option<mpsc::UnboundedSender<Message>>,
    /// Messages held for an offline persistent session.
    queue: VecDeque<Message>,
    clean: bool,
    max_queued: usize,
    generation: u64,
}

impl Session {
    fn deliver(&mut self, client_id: &str, msg: Message) {
        if let Some(tx) = &self.sender {
            match tx.send(msg) {
                Ok(()) => return,
                Err(mpsc::error::SendError(msg)) => {
                    // Receiver gone without a disconnect: treat as offline.
                    self.sender = None;
                    self.enqueue(client_id, msg);
                }
            }
        } else {
            self.enqueue(client_id, msg);
        }
    }

    fn enqueue(&mut self, client_id: &str, msg: Message) {
        if self.clean {
            return;
        }
        if self.queue.len() >= self.max_queued {
            self.queue.pop_front();
            tracing::warn!(client_id, "offline queue full, dropping oldest message");
        }
        self.queue.push_back(msg);
    }
}

/// Result of attaching a client to the broker.
pub(crate) struct Attached {
    pub(crate) receiver: mpsc::UnboundedReceiver<Message>,
    pub(crate) generation: u64,
    pub(crate) resumed: bool,
}

impl Broker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current retained payload for a concrete topic.
    pub fn retained(&self, topic: &str) -> Option<Bytes> {
        self.state().retained.get(topic).cloned()
    }

    /// Number of known sessions (connected or persistent-offline).
    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    /// Whether a client id currently has a live connection.
    pub fn is_connected(&self, client_id: &str) -> bool {
        self.state()
            .sessions
            .get(client_id)
            .is_some_and(|s| s.sender.is_some())
    }

    pub(crate) fn attach(&self, config: &BusConfig) -> Result<Attached, BusError> {
        config.validate()?;
        let mut state = self.state();
        state.next_generation += 1;
        let generation = state.next_generation;
        let (tx, rx) = mpsc::unbounded_channel();

        let resumed = match state.sessions.get(&config.client_id) {
            Some(existing) if existing.sender.is_some() => {
                return Err(BusError::ClientIdInUse(config.client_id.clone()));
            }
            Some(existing) => !config.clean_session && !existing.clean,
            None => false,
        };

        let existing = if resumed {
            state.sessions.get_mut(&config.client_id)
        } else {
            None
        };
        if let Some(existing) = existing {
            // Flush the offline queue in order, then go live.
            for msg in existing.queue.drain(..) {
                let _ = tx.send(msg);
            }
            existing.sender = Some(tx);
            existing.generation = generation;
            existing.max_queued = config.max_queued;
        } else {
            state.sessions.insert(
                config.client_id.clone(),
                Session {
                    filters: Vec::new(),
                    sender: Some(tx),
                    queue: VecDeque::new(),
                    clean: config.clean_session,
                    max_queued: config.max_queued,
                    generation,
                },
            );
        }

        tracing::debug!(client_id = %config.client_id, resumed, "bus client attached");
        Ok(Attached {
            receiver: rx,
            generation,
            resumed,
        })
    }

    pub(crate) fn detach(&self, client_id: &str, generation: u64) {
        let mut state = self.state();
        let Some(session) = state.sessions.get_mut(client_id) else {
            return;
        };
        // A newer connection owns the session now.
        if session.generation != generation {
            return;
        }
        if session.clean {
            state.sessions.remove(client_id);
        } else {
            session.sender = None;
        }
        tracing::debug!(client_id, "bus client detached");
    }

    pub(crate) fn subscribe(&self, client_id: &str, filter: &str) -> Result<(), BusError> {
        validate_filter(filter)?;
        let mut state = self.state();
        let BrokerState {
            retained, sessions, ..
        } = &mut *state;
        let session = sessions.get_mut(client_id).ok_or(BusError::Disconnected)?;

        if session.filters.iter().any(|f| f == filter) {
            return Ok(());
        }
        session.filters.push(filter.to_string());

        // Replay retained state to the new subscription.
        for (topic, payload) in retained.iter() {
            if topic_matches(filter, topic) {
                session.deliver(client_id, Message::replay(topic, payload.clone()));
            }
        }
        Ok(())
    }

    pub(crate) fn unsubscribe(&self, client_id: &str, filter: &str) -> Result<(), BusError> {
        let mut state = self.state();
        let session = state
            .sessions
            .get_mut(client_id)
            .ok_or(BusError::Disconnected)?;
        session.filters.retain(|f| f != filter);
        Ok(())
    }

    pub(crate) fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<(), BusError> {
        validate_topic(topic)?;
        let mut state = self.state();

        if retain {
            if payload.is_empty() {
                state.retained.remove(topic);
            } else {
                state.retained.insert(topic.to_string(), payload.clone());
            }
        }

        let mut delivered = 0usize;
        for (client_id, session) in state.sessions.iter_mut() {
            if session.filters.iter().any(|f| topic_matches(f, topic)) {
                session.deliver(client_id, Message::live(topic, payload.clone()));
                delivered += 1;
            }
        }
        tracing::trace!(topic, retain, delivered, "bus publish");
        Ok(())
    }
}
