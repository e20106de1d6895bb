//! Runner for an engine in a provisioned container.

use tracing::{info, warn};

use super::{EngineRunner, Lifecycle, RunnerFactory, RunnerState};
use crate::board::Board;
use crate::error::{Error, Result};
use crate::manager::{EngineManager, RunningEngine};
use crate::model::Engine;
use crate::scheduler::Scheduler;
use crate::transport::SocketProcess;
use crate::uci::{Limit, UciSession};

pub struct RemoteRunner<S> {
    manager: EngineManager<S>,
    engine: Engine,
    running: Option<RunningEngine>,
    session: Option<UciSession<SocketProcess>>,
    lifecycle: Lifecycle,
}

impl<S: Scheduler> RemoteRunner<S> {
    pub fn new(manager: EngineManager<S>, engine: Engine) -> Self {
        let lifecycle = Lifecycle::new(&engine);
        Self {
            manager,
            engine,
            running: None,
            session: None,
            lifecycle,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.lifecycle.get()
    }

    /// The container currently held, if any.
    pub fn running(&self) -> Option<&RunningEngine> {
        self.running.as_ref()
    }

    async fn start(&mut self) -> Result<()> {
        self.lifecycle.set(RunnerState::Starting);
        let running = self.manager.provision(&self.engine).await?;
        let addr = running.socket_addr();
        self.running = Some(running);

        self.lifecycle.set(RunnerState::Connecting);
        let process = SocketProcess::connect(addr)
            .await
            .map_err(|e| Error::ProtocolInit(format!("connecting to {addr}: {e}")))?;

        self.lifecycle.set(RunnerState::Initializing);
        let mut session = UciSession::new(process, self.engine.id());
        session.initialize().await?;
        info!(engine = %self.engine.id(), %addr, name = ?session.info().name, "remote engine ready");

        self.session = Some(session);
        self.lifecycle.set(RunnerState::Ready);
        Ok(())
    }
}

impl<S: Scheduler> EngineRunner for RemoteRunner<S> {
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
        let Some(session) = self.session.as_mut() else {
            return Err(Error::NotReady);
        };
        self.lifecycle.set(RunnerState::Playing);
        let mv = session.play(board, limit).await?;
        self.lifecycle.set(RunnerState::Ready);
        Ok(mv)
    }

    async fn shutdown(&mut self, reason: &str) -> Result<()> {
        if self.session.is_none() && self.running.is_none() {
            if self.lifecycle.get() != RunnerState::NotStarted {
                self.lifecycle.set(RunnerState::Stopped);
            }
            return Ok(());
        }

        self.lifecycle.set(RunnerState::ShuttingDown);
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.quit().await {
                warn!(engine = %self.engine.id(), error = %e, "engine did not quit cleanly");
            }
        }
        // Cleared before the call so a failed stop is never retried by us.
        let result = match self.running.take() {
            Some(running) => self.manager.terminate(&running, reason).await,
            None => Ok(()),
        };
        self.lifecycle.set(RunnerState::Stopped);
        result
    }

    fn engine(&self) -> &Engine {
        &self.engine
    }
}

impl<S: Scheduler> RunnerFactory for EngineManager<S> {
    type Runner = RemoteRunner<S>;

    fn runner(&self, engine: Engine) -> Self::Runner {
        RemoteRunner::new(self.clone(), engine)
    }
}
