//! Runner for a local engine executable.
//!
//! The engine's `image` is taken as the path of the binary. Useful for
//! development and for engines that do not need a container.

use tracing::{info, warn};

use super::{EngineRunner, Lifecycle, RunnerFactory, RunnerState};
use crate::board::Board;
use crate::error::{Error, Result};
use crate::model::Engine;
use crate::transport::{ChildProcess, EngineProcess};
use crate::uci::{Limit, UciSession};

pub struct ProcessRunner {
    engine: Engine,
    session: Option<UciSession<ChildProcess>>,
    lifecycle: Lifecycle,
}

impl ProcessRunner {
    pub fn new(engine: Engine) -> Self {
        let lifecycle = Lifecycle::new(&engine);
        Self {
            engine,
            session: None,
            lifecycle,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.lifecycle.get()
    }

    async fn start(&mut self) -> Result<()> {
        self.lifecycle.set(RunnerState::Starting);
        let process = ChildProcess::spawn(&self.engine.image)
            .map_err(|e| Error::Provisioning(format!("spawning {}: {e}", self.engine.image)))?;
        let pid = process.pid();

        self.lifecycle.set(RunnerState::Initializing);
        let mut session = UciSession::new(process, self.engine.id());
        let handshake = session.initialize().await;
        // Keep the session even on failure so shutdown can reap the child.
        self.session = Some(session);
        handshake?;

        info!(engine = %self.engine.id(), ?pid, "local engine ready");
        self.lifecycle.set(RunnerState::Ready);
        Ok(())
    }
}

impl EngineRunner for ProcessRunner {
    async fn run(&mut self) -> Result<()> {
        if self.lifecycle.get() != RunnerState::NotStarted {
            return Err(Error::Other(format!(
                "runner for {} already started",
                self.engine.id()
            )));
        }

        let result = self.start().await;
        if let Err(e) = &result {
            self.lifecycle.set(RunnerState::Failed);
            if let Err(stop) = self.shutdown(&format!("engine failed to start: {e}")).await {
                warn!(engine = %self.engine.id(), error = %stop, "cleanup after failed start failed");
            }
        }
        result
    }

    async fn play(&mut self, board: &Board, limit: &Limit) -> Result<String> {
        if self.lifecycle.get() != RunnerState::Ready {
            return Err(Error::NotReady);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(Error::NotReady);
        };
        self.lifecycle.set(RunnerState::Playing);
        let mv = session.play(board, limit).await?;
        self.lifecycle.set(RunnerState::Ready);
        Ok(mv)
    }

    async fn shutdown(&mut self, reason: &str) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            if self.lifecycle.get() != RunnerState::NotStarted {
                self.lifecycle.set(RunnerState::Stopped);
            }
            return Ok(());
        };

        self.lifecycle.set(RunnerState::ShuttingDown);
        info!(engine = %self.engine.id(), reason, "stopping local engine");
        let result = session.quit().await;
        self.lifecycle.set(RunnerState::Stopped);
        result
    }

    fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// Factory for [`ProcessRunner`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunners;

impl RunnerFactory for ProcessRunners {
    type Runner = ProcessRunner;

    fn runner(&self, engine: Engine) -> Self::Runner {
        ProcessRunner::new(engine)
    }
}
