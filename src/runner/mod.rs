//! Engine runners: one engine identity bound to one live UCI session.
//!
//! A runner moves through
//! `NOT_STARTED → STARTING → CONNECTING → INITIALIZING → READY →
//! (PLAYING)* → SHUTTING_DOWN → STOPPED`. A failure before READY marks it
//! FAILED and immediately shuts it down, so nothing provisioned is left
//! behind.

mod process;
mod remote;

pub use process::{ProcessRunner, ProcessRunners};
pub use remote::RemoteRunner;

use std::fmt;
use std::future::Future;

use crate::board::Board;
use crate::error::Result;
use crate::model::Engine;
use crate::telemetry::game::record_runner_transition;
use crate::uci::Limit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerState {
    NotStarted,
    Starting,
    Connecting,
    Initializing,
    Ready,
    Playing,
    ShuttingDown,
    Stopped,
    Failed,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunnerState::NotStarted => "not_started",
            RunnerState::Starting => "starting",
            RunnerState::Connecting => "connecting",
            RunnerState::Initializing => "initializing",
            RunnerState::Ready => "ready",
            RunnerState::Playing => "playing",
            RunnerState::ShuttingDown => "shutting_down",
            RunnerState::Stopped => "stopped",
            RunnerState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The unit the game loop drives.
pub trait EngineRunner: Send + 'static {
    /// Bring the engine up and complete the UCI handshake. On failure the
    /// runner has already shut itself down.
    fn run(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Best move for `board`, in UCI notation. Fails with `NotReady` if
    /// `run` has not succeeded.
    fn play(&mut self, board: &Board, limit: &Limit)
    -> impl Future<Output = Result<String>> + Send;

    /// Release the engine. Idempotent: later calls are no-ops.
    fn shutdown(&mut self, reason: &str) -> impl Future<Output = Result<()>> + Send;

    fn engine(&self) -> &Engine;
}

/// Builds a fresh runner for an engine.
pub trait RunnerFactory: Send + Sync + 'static {
    type Runner: EngineRunner;

    fn runner(&self, engine: Engine) -> Self::Runner;
}

/// Current state of a runner, with every change traced.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    engine_id: String,
    state: RunnerState,
}

impl Lifecycle {
    pub(crate) fn new(engine: &Engine) -> Self {
        Self {
            engine_id: engine.id(),
            state: RunnerState::NotStarted,
        }
    }

    pub(crate) fn get(&self) -> RunnerState {
        self.state
    }

    pub(crate) fn set(&mut self, to: RunnerState) {
        if self.state != to {
            record_runner_transition(&self.engine_id, self.state, to);
            self.state = to;
        }
    }
}
