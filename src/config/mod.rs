//! Typed configuration from environment variables and an optional TOML
//! file.
//!
//! Loaded once at startup; missing required variables fail fast. The
//! database URL may carry credentials, so it is kept in a `SecretString`.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::game::GameConfig;
use crate::manager::ManagerConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Which runner implementation hosts engines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    /// Containers provisioned through the scheduler.
    #[default]
    Docker,
    /// Local executables.
    Process,
}

impl FromStr for RunnerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docker" => Ok(RunnerKind::Docker),
            "process" => Ok(RunnerKind::Process),
            other => Err(Error::Config(format!(
                "unknown runner {other:?} (expected docker or process)"
            ))),
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerKind::Docker => f.write_str("docker"),
            RunnerKind::Process => f.write_str("process"),
        }
    }
}

/// Tunables read from the TOML file named by `CHESSNET_CONFIG`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub manager: ManagerConfig,
    pub game: GameConfig,
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("bad settings: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read settings {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad settings {}: {e}", path.display())))
    }
}

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub bind: SocketAddr,
    pub runner: RunnerKind,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub settings: Settings,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` first.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| {
                Error::Config(format!("required environment variable {name} is not set"))
            })
        };

        let bind = lookup("CHESSNET_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind
            .parse()
            .map_err(|e| Error::Config(format!("CHESSNET_BIND {bind:?}: {e}")))?;

        let runner = match lookup("CHESSNET_RUNNER") {
            Some(raw) => raw.parse()?,
            None => RunnerKind::default(),
        };

        let settings = match lookup("CHESSNET_CONFIG") {
            Some(path) => Settings::load(Path::new(&path))?,
            None => Settings::default(),
        };

        Ok(Self {
            database_url: SecretString::from(required("DATABASE_URL")?),
            bind,
            runner,
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            settings,
        })
    }
}
