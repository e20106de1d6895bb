//! Error types for chessnet.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Engine identity that cannot round-trip through its id.
    #[error("invalid engine: {0}")]
    InvalidEngine(String),

    #[error("game {0} already has an outcome")]
    AlreadyFinished(String),

    /// Task template resolution or instance launch failed.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// The instance never became reachable within the polling budget.
    #[error("task {task} not ready after {waited:?}")]
    ProvisioningTimeout { task: String, waited: Duration },

    /// The scheduler reported the instance stopped before it became ready.
    #[error("task {task} stopped while starting: {reason}")]
    TaskStopped { task: String, reason: String },

    /// Handshake with a reachable engine failed.
    #[error("engine handshake failed: {0}")]
    ProtocolInit(String),

    #[error("engine protocol error: {0}")]
    Protocol(String),

    /// A move was requested from a runner that never finished `run()`.
    #[error("engine is not running")]
    NotReady,

    #[error("illegal move {mv} in position {fen}")]
    IllegalMove { mv: String, fen: String },

    #[error("game ended without an outcome")]
    NoOutcome,

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
