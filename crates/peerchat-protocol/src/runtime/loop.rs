/// The peer runtime event loop.
///
/// A single async task that owns all protocol state and multiplexes over
/// bus deliveries, operator commands, the presence deadline and the
/// maintenance interval.
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::types::now_ms;

use super::executor::execute_effects;
use super::state::RuntimeState;
use super::transport::Transport;
use super::{ProtocolEvent, RuntimeCommand, RuntimeConfig};

/// Wall clock anchored to the tokio clock, so paused-time tests move both.
struct Clock {
    origin: Instant,
    origin_ms: u64,
}

impl Clock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_ms: now_ms(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin_ms + self.origin.elapsed().as_millis() as u64
    }

    /// Tokio instant for a Unix ms deadline.
    fn instant_at(&self, ms: u64) -> Instant {
        self.origin + Duration::from_millis(ms.saturating_sub(self.origin_ms))
    }
}

/// Main event loop. Owns all protocol state and the transport.
pub(super) async fn runtime_loop<T: Transport>(
    mut transport: T,
    config: RuntimeConfig,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    event_tx: mpsc::Sender<ProtocolEvent>,
) {
    let clock = Clock::new();
    let shutdown_grace = config.shutdown_grace;
    let mut maintenance = tokio::time::interval(config.maintenance_interval);
    let mut state = RuntimeState::new(config);

    // Skip the immediate first tick
    maintenance.tick().await;

    let effects = state.startup_at(clock.now_ms());
    execute_effects(effects, &transport, &event_tx).await;

    loop {
        let presence_deadline = state
            .next_presence_deadline()
            .map(|ms| clock.instant_at(ms));

        tokio::select! {
            // ── 1. Deliveries from the bus ──────────────────────
            result = transport.recv() => {
                match result {
                    Ok((topic, payload)) => {
                        let effects = state.handle_incoming_at(&topic, &payload, clock.now_ms());
                        execute_effects(effects, &transport, &event_tx).await;
                    }
                    Err(e) => {
                        tracing::warn!("transport closed: {e}");
                        let _ = event_tx.try_send(ProtocolEvent::Error {
                            description: format!("transport closed: {e}"),
                        });
                        break;
                    }
                }
            }

            // ── 2. Operator commands ────────────────────────────
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    // Every handle is gone.
                    shutdown(&mut state, &transport, &event_tx, &clock, shutdown_grace).await;
                    break;
                };
                match cmd {
                    RuntimeCommand::Operate { op, reply } => {
                        match state.apply_at(op, clock.now_ms()) {
                            Ok(effects) => {
                                execute_effects(effects, &transport, &event_tx).await;
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                tracing::debug!("operation refused: {e}");
                                let _ = event_tx.try_send(ProtocolEvent::Notice(e.to_string()));
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    RuntimeCommand::GetOnlinePeers { reply } => {
                        let _ = reply.send(state.online_peers());
                    }
                    RuntimeCommand::GetPeers { reply } => {
                        let _ = reply.send(state.peers());
                    }
                    RuntimeCommand::GetPendingRequests { reply } => {
                        let _ = reply.send(state.pending_requests());
                    }
                    RuntimeCommand::GetConversations { reply } => {
                        let _ = reply.send(state.conversation_topics());
                    }
                    RuntimeCommand::GetHistory { topic, reply } => {
                        let _ = reply.send(state.history(&topic));
                    }
                    RuntimeCommand::GetGroups { reply } => {
                        let _ = reply.send(state.groups());
                    }
                    RuntimeCommand::GetPendingJoins { group, reply } => {
                        let _ = reply.send(state.pending_joins(&group));
                    }
                    RuntimeCommand::GetGroupHistory { topic, reply } => {
                        let _ = reply.send(state.group_history(&topic));
                    }
                    RuntimeCommand::Shutdown { reply } => {
                        shutdown(&mut state, &transport, &event_tx, &clock, shutdown_grace).await;
                        let _ = reply.send(());
                        break;
                    }
                }
            }

            // ── 3. Presence grace expiry ────────────────────────
            _ = sleep_until(presence_deadline) => {
                let effects = state.tick_presence_at(clock.now_ms());
                execute_effects(effects, &transport, &event_tx).await;
            }

            // ── 4. Maintenance ──────────────────────────────────
            _ = maintenance.tick() => {
                let effects = state.tick_maintenance_at(clock.now_ms());
                execute_effects(effects, &transport, &event_tx).await;
            }
        }
    }

    tracing::info!("runtime stopped");
}

async fn shutdown<T: Transport>(
    state: &mut RuntimeState,
    transport: &T,
    event_tx: &mpsc::Sender<ProtocolEvent>,
    clock: &Clock,
    grace: Duration,
) {
    let effects = state.shutdown_at(clock.now_ms());
    execute_effects(effects, transport, event_tx).await;
    tokio::time::sleep(grace).await;
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
