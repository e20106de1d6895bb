//! Minimal UCI client.
//!
//! Drives one engine through the handshake and best-move searches over any
//! [`EngineProcess`]. Engine output is logged at `trace`, our commands at
//! `debug`.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use crate::board::Board;
use crate::error::{Error, Result};
use crate::transport::EngineProcess;

/// Bound on the whole `uci`/`isready` handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time an engine gets past its move time before a search is
/// considered lost.
pub const DEFAULT_MOVE_GRACE: Duration = Duration::from_secs(5);

/// Search budget for one move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Limit {
    pub time: Option<Duration>,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
}

impl Limit {
    pub fn movetime(time: Duration) -> Self {
        Self {
            time: Some(time),
            ..Self::default()
        }
    }

    fn go_command(&self) -> String {
        let mut cmd = String::from("go");
        if let Some(time) = self.time {
            cmd.push_str(&format!(" movetime {}", time.as_millis()));
        }
        if let Some(depth) = self.depth {
            cmd.push_str(&format!(" depth {depth}"));
        }
        if let Some(nodes) = self.nodes {
            cmd.push_str(&format!(" nodes {nodes}"));
        }
        cmd
    }
}

/// What the engine said about itself during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineInfo {
    pub name: Option<String>,
    pub author: Option<String>,
    /// Raw `option ...` declarations.
    pub options: Vec<String>,
}

pub struct UciSession<P> {
    process: P,
    label: String,
    grace: Duration,
    info: EngineInfo,
}

impl<P: EngineProcess> UciSession<P> {
    /// `label` tags log lines, usually the engine id.
    pub fn new(process: P, label: impl Into<String>) -> Self {
        Self {
            process,
            label: label.into(),
            grace: DEFAULT_MOVE_GRACE,
            info: EngineInfo::default(),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn info(&self) -> &EngineInfo {
        &self.info
    }

    pub fn process(&self) -> &P {
        &self.process
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        debug!(engine = %self.label, ">> {line}");
        let stdin = self.process.stdin();
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.process.stdout().read_line(&mut line).await?;
        if n == 0 {
            return Err(Error::Protocol(format!(
                "{} closed the connection (exit status {:?})",
                self.label,
                self.process.returncode()
            )));
        }
        let line = line.trim_end().to_string();
        trace!(engine = %self.label, "<< {line}");
        Ok(line)
    }

    /// `uci` until `uciok`, then `ucinewgame` and `isready` until `readyok`.
    ///
    /// Any failure is reported as [`Error::ProtocolInit`].
    pub async fn initialize(&mut self) -> Result<()> {
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, self.handshake()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::ProtocolInit(format!("{}: {e}", self.label))),
            Err(_) => Err(Error::ProtocolInit(format!(
                "{}: no answer within {HANDSHAKE_TIMEOUT:?}",
                self.label
            ))),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        self.send("uci").await?;
        loop {
            let line = self.recv().await?;
            if line == "uciok" {
                break;
            }
            if let Some(name) = line.strip_prefix("id name ") {
                self.info.name = Some(name.to_string());
            } else if let Some(author) = line.strip_prefix("id author ") {
                self.info.author = Some(author.to_string());
            } else if line.starts_with("option ") {
                self.info.options.push(line);
            }
        }
        self.send("ucinewgame").await?;
        self.wait_ready().await?;
        debug!(engine = %self.label, name = ?self.info.name, "engine initialized");
        Ok(())
    }

    async fn wait_ready(&mut self) -> Result<()> {
        self.send("isready").await?;
        while self.recv().await? != "readyok" {}
        Ok(())
    }

    /// Ask for the best move in `board`'s position. Returns it in UCI
    /// notation, unvalidated.
    pub async fn play(&mut self, board: &Board, limit: &Limit) -> Result<String> {
        self.send(&board.position_command()).await?;
        self.send(&limit.go_command()).await?;

        let Some(budget) = limit.time.map(|t| t + self.grace) else {
            return self.best_move().await;
        };
        match tokio::time::timeout(budget, self.best_move()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Protocol(format!(
                "{} returned no move within {budget:?}",
                self.label
            ))),
        }
    }

    async fn best_move(&mut self) -> Result<String> {
        loop {
            let line = self.recv().await?;
            let mut tokens = line.split_whitespace();
            if tokens.next() != Some("bestmove") {
                // info, or anything else we do not care about
                continue;
            }
            return match tokens.next() {
                Some("(none)") | Some("0000") | None => Err(Error::Protocol(format!(
                    "{} has no move: {line:?}",
                    self.label
                ))),
                Some(mv) => Ok(mv.to_string()),
            };
        }
    }

    /// Say goodbye and release the pipes. Best-effort.
    pub async fn quit(&mut self) -> Result<()> {
        if self.process.returncode().is_none() {
            if let Err(e) = self.send("quit").await {
                debug!(engine = %self.label, error = %e, "quit not delivered");
            }
        }
        self.process.close().await
    }
}
