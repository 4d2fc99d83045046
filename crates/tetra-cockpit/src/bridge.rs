//! [`TelemetryBridge`] – drain-and-broadcast polling task.
//!
//! Every [`POLL_INTERVAL`] the bridge:
//!
//! 1. asks the supervisor to reap a worker that exited on its own;
//! 2. drains at most [`MAX_DRAIN_PER_TICK`] messages from the telemetry
//!    channel without blocking;
//! 3. serialises each one and broadcasts it to every connected client.
//!
//! Every [`HEARTBEAT_INTERVAL`] it also pings all clients and drops those
//! that have been silent for longer than the client timeout.

use std::sync::Arc;
use std::time::Duration;

use tetra_runtime::Supervisor;
use tetra_types::{Message, TetraError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::connections::{CLIENT_TIMEOUT, ConnectionManager, Outbound};

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const MAX_DRAIN_PER_TICK: usize = 50;
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Serialise a telemetry message to its JSON text frame.
///
/// # Errors
///
/// [`TetraError::Serialization`] when the payload cannot be encoded.
pub fn encode(message: &Message) -> Result<String, TetraError> {
    serde_json::to_string(message).map_err(|e| TetraError::Serialization(e.to_string()))
}

/// Outcome of one poll tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub delivered: usize,
    pub dropped_clients: usize,
    /// Messages still queued after the capped drain.
    pub backlog: usize,
}

pub struct TelemetryBridge {
    supervisor: Arc<Supervisor>,
    connections: Arc<ConnectionManager>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl TelemetryBridge {
    pub fn new(supervisor: Arc<Supervisor>, connections: Arc<ConnectionManager>) -> Self {
        Self {
            supervisor,
            connections,
            poll_interval: POLL_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            client_timeout: CLIENT_TIMEOUT,
        }
    }

    pub fn with_heartbeat(mut self, interval: Duration, client_timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.client_timeout = client_timeout;
        self
    }

    /// One drain-and-broadcast pass.
    pub async fn tick(&self) -> TickReport {
        self.supervisor.check_liveness().await;

        let ctx = self.supervisor.context();
        let batch = ctx.drain_telemetry(MAX_DRAIN_PER_TICK);
        let mut report = TickReport::default();
        for message in &batch {
            match encode(message) {
                Ok(text) => {
                    report.dropped_clients += self.connections.broadcast(&Outbound::Text(text));
                    report.delivered += 1;
                }
                Err(e) => error!(kind = message.kind(), error = %e, "dropping telemetry"),
            }
        }

        report.backlog = ctx.telemetry_backlog();
        if report.backlog > 0 {
            let e = TetraError::ChannelBackpressure(MAX_DRAIN_PER_TICK);
            debug!(backlog = report.backlog, "{e}");
        }
        report
    }

    /// Ping every client and drop the silent ones.
    pub fn heartbeat(&self) -> usize {
        let mut dropped = self.connections.reap_silent(self.client_timeout).len();
        dropped += self.connections.broadcast(&Outbound::Ping);
        if let Ok(text) = encode(&Message::Ping) {
            dropped += self.connections.broadcast(&Outbound::Text(text));
        }
        dropped
    }

    /// Run until the task is cancelled.
    pub async fn run(self) {
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            "telemetry bridge running"
        );
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.tick().await;
                }
                _ = heartbeat.tick() => {
                    let dropped = self.heartbeat();
                    if dropped > 0 {
                        debug!(dropped, "heartbeat dropped clients");
                    }
                }
            }
        }
    }
}
