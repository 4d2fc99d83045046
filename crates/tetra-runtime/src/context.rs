//! [`ControlContext`] – the only state shared between the control side and
//! the worker.
//!
//! Built once at startup and handed to both the [`Supervisor`] and every
//! worker it launches.  It bundles:
//!
//! - the [`ControlFlags`] (pause gate, stop flag);
//! - the command channel (control side → worker, FIFO, single consumer);
//! - the telemetry channel (worker and supervisor → telemetry bridge);
//! - a session generation counter.
//!
//! # Session generations
//!
//! Every launched worker is tied to the generation that was current when it
//! started.  When the supervisor abandons a worker that did not stop in time
//! it bumps the generation; the abandoned worker then treats itself as
//! stopped, can no longer consume commands, and its telemetry is discarded.
//!
//! [`Supervisor`]: crate::supervisor::Supervisor

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tetra_types::Message;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::flags::ControlFlags;

/// A command the worker consumes during its drain step.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    SetMode { visual: bool },
    SetSpeed(f64),
    Stop,
}

#[derive(Debug)]
pub struct ControlContext {
    flags: ControlFlags,
    generation: AtomicU64,
    command_tx: UnboundedSender<WorkerCommand>,
    command_rx: Mutex<UnboundedReceiver<WorkerCommand>>,
    telemetry_tx: UnboundedSender<Message>,
    telemetry_rx: Mutex<UnboundedReceiver<Message>>,
}

impl Default for ControlContext {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ControlContext {
    pub fn new() -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel();
        Self {
            flags: ControlFlags::new(),
            generation: AtomicU64::new(0),
            command_tx,
            command_rx: Mutex::new(command_rx),
            telemetry_tx,
            telemetry_rx: Mutex::new(telemetry_rx),
        }
    }

    pub fn flags(&self) -> &ControlFlags {
        &self.flags
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// `true` while `generation` is the current session.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    // ── Session lifecycle ────────────────────────────────────────────────────

    /// Reset flags and drop stale commands, then open a new generation.
    ///
    /// Returns the generation the new worker must carry.
    pub fn begin_session(&self) -> u64 {
        self.flags.clear_stop();
        self.flags.pause.set();
        let stale = self.clear_commands();
        if stale > 0 {
            trace!(stale, "dropped stale commands");
        }
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Signal stop and release a paused worker so it can observe it.
    pub fn request_stop(&self) {
        self.flags.request_stop();
        self.flags.pause.set();
    }

    /// Invalidate the current generation without starting a new session.
    pub fn abandon_session(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.flags.pause.set();
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    pub fn send_command(&self, command: WorkerCommand) {
        // The receiver lives as long as `self`, so send cannot fail.
        let _ = self.command_tx.send(command);
    }

    /// Take every queued command, in FIFO order, on behalf of `generation`.
    ///
    /// A stale generation receives nothing and leaves the queue untouched.
    pub fn drain_commands(&self, generation: u64) -> Vec<WorkerCommand> {
        let mut rx = lock(&self.command_rx);
        if !self.is_current(generation) {
            return Vec::new();
        }
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    fn clear_commands(&self) -> usize {
        let mut rx = lock(&self.command_rx);
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    // ── Telemetry ────────────────────────────────────────────────────────────

    /// Publish from the control side.
    pub fn publish(&self, message: Message) {
        let _ = self.telemetry_tx.send(message);
    }

    /// Publish on behalf of the worker of `generation`; dropped when stale.
    pub fn emit(&self, generation: u64, message: Message) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.telemetry_tx.send(message).is_ok()
    }

    /// Non-blocking drain of at most `max` messages.
    pub fn drain_telemetry(&self, max: usize) -> Vec<Message> {
        let mut rx = lock(&self.telemetry_rx);
        let mut out = Vec::new();
        while out.len() < max {
            match rx.try_recv() {
                Ok(msg) => out.push(msg),
                Err(_) => break,
            }
        }
        out
    }

    /// Number of telemetry messages waiting to be drained.
    pub fn telemetry_backlog(&self) -> usize {
        lock(&self.telemetry_rx).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_drain_in_fifo_order() {
        let ctx = ControlContext::new();
        let generation = ctx.begin_session();
        ctx.send_command(WorkerCommand::SetSpeed(0.5));
        ctx.send_command(WorkerCommand::SetMode { visual: true });
        ctx.send_command(WorkerCommand::Stop);

        assert_eq!(
            ctx.drain_commands(generation),
            vec![
                WorkerCommand::SetSpeed(0.5),
                WorkerCommand::SetMode { visual: true },
                WorkerCommand::Stop
            ]
        );
        assert!(ctx.drain_commands(generation).is_empty());
    }

    #[test]
    fn begin_session_drops_stale_commands_and_resets_flags() {
        let ctx = ControlContext::new();
        ctx.send_command(WorkerCommand::Stop);
        ctx.flags().request_stop();
        ctx.flags().pause.clear();

        let generation = ctx.begin_session();
        assert!(!ctx.flags().stop_requested());
        assert!(ctx.flags().pause.is_set());
        assert!(ctx.drain_commands(generation).is_empty());
    }

    #[test]
    fn stale_generation_cannot_consume_or_emit() {
        let ctx = ControlContext::new();
        let old = ctx.begin_session();
        let new = ctx.begin_session();
        assert_ne!(old, new);

        ctx.send_command(WorkerCommand::SetSpeed(0.2));
        assert!(ctx.drain_commands(old).is_empty());
        assert!(!ctx.emit(old, Message::info("from the past")));
        assert_eq!(ctx.drain_commands(new), vec![WorkerCommand::SetSpeed(0.2)]);
        assert_eq!(ctx.telemetry_backlog(), 0);
    }

    #[test]
    fn telemetry_drain_is_bounded() {
        let ctx = ControlContext::new();
        for i in 0..10 {
            ctx.publish(Message::info(format!("m{i}")));
        }
        assert_eq!(ctx.drain_telemetry(4).len(), 4);
        assert_eq!(ctx.telemetry_backlog(), 6);
        assert_eq!(ctx.drain_telemetry(100).len(), 6);
    }

    #[test]
    fn request_stop_opens_the_pause_gate() {
        let ctx = ControlContext::new();
        ctx.flags().pause.clear();
        ctx.request_stop();
        assert!(ctx.flags().stop_requested());
        assert!(ctx.flags().pause.is_set());
    }
}
