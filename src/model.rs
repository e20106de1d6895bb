//! Core data model.
//!
//! An engine is an immutable, versioned container image that speaks UCI.
//! A game pairs two engines and gains an outcome exactly once. Moves are
//! append-only records attributed to the engine that produced them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Separator between the identity components of an engine id.
pub const ENGINE_ID_SEPARATOR: char = '#';

/// A registered chess engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Engine {
    /// Engine lineage (e.g., "stockfish").
    pub family: String,
    /// Branch or flavour within the family (e.g., "main").
    pub variant: String,
    pub version: String,
    /// Container image reference. For the process runner this is the path
    /// of the engine executable.
    pub image: String,
}

impl Engine {
    pub fn new(
        family: impl Into<String>,
        variant: impl Into<String>,
        version: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            family: family.into(),
            variant: variant.into(),
            version: version.into(),
            image: image.into(),
        }
    }

    /// Opaque identity string: `family#variant#version`.
    pub fn id(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.family,
            self.variant,
            self.version,
            sep = ENGINE_ID_SEPARATOR
        )
    }

    /// Check that the id can be split back into its components: none may be
    /// empty or contain the separator.
    pub fn validate(&self) -> Result<(), Error> {
        let components = [
            ("family", &self.family),
            ("variant", &self.variant),
            ("version", &self.version),
        ];
        for (field, value) in components {
            if value.is_empty() {
                return Err(Error::InvalidEngine(format!("{field} is empty")));
            }
            if value.contains(ENGINE_ID_SEPARATOR) {
                return Err(Error::InvalidEngine(format!(
                    "{field} {value:?} contains {ENGINE_ID_SEPARATOR:?}"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

/// Newtype for game IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub Uuid);

impl GameId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GameId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(GameId)
            .map_err(|e| Error::Other(format!("invalid game id {s:?}: {e}")))
    }
}

/// One match between two engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub game_id: GameId,
    pub started_at: DateTime<Utc>,
    /// Engine id playing white.
    pub white: String,
    /// Engine id playing black.
    pub black: String,
    /// Unset until the game reaches a terminal position.
    pub outcome: Option<GameOutcome>,
    /// Why the game was abandoned, if it was.
    pub failure: Option<String>,
}

impl Game {
    pub fn new(white: &Engine, black: &Engine) -> Self {
        Self {
            game_id: GameId::new(),
            started_at: Utc::now(),
            white: white.id(),
            black: black.id(),
            outcome: None,
            failure: None,
        }
    }
}

/// Final result of a game in standard result notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameOutcome {
    #[serde(rename = "1-0")]
    WhiteWins,
    #[serde(rename = "0-1")]
    BlackWins,
    #[serde(rename = "1/2-1/2")]
    Draw,
}

impl GameOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            GameOutcome::WhiteWins => "1-0",
            GameOutcome::BlackWins => "0-1",
            GameOutcome::Draw => "1/2-1/2",
        }
    }
}

impl fmt::Display for GameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1-0" => Ok(GameOutcome::WhiteWins),
            "0-1" => Ok(GameOutcome::BlackWins),
            "1/2-1/2" => Ok(GameOutcome::Draw),
            _ => Err(Error::Other(format!("unknown outcome: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Moves
// ---------------------------------------------------------------------------

/// A single accepted move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    /// Long algebraic notation as spoken over UCI (e.g., "e2e4").
    pub uci: String,
    /// Standard algebraic notation (e.g., "e4").
    pub san: String,
    pub timestamp: DateTime<Utc>,
}

/// A move as stored, with the context it was played in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub game_id: GameId,
    #[serde(flatten)]
    pub mv: Move,
    pub fen_before: String,
    /// Engine that produced the move.
    pub engine_id: String,
}
