//! Domain events emitted by the game orchestrator.
//!
//! Events are fire-and-forget notifications of state transitions. They are
//! not persisted themselves; persistence is a side effect of a subscriber
//! (see [`crate::subscriber`]).

use serde::{Deserialize, Serialize};

use crate::model::{Game, GameId, GameOutcome, Move};

/// Something that happened to a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Both engines are up and the first move is about to be requested.
    StartGame { game: Game },
    /// An engine produced a legal move. `fen_before` is the position it
    /// was played from.
    MakeMove {
        game_id: GameId,
        #[serde(rename = "move")]
        mv: Move,
        fen_before: String,
        engine_id: String,
    },
    EndGame {
        game_id: GameId,
        outcome: GameOutcome,
    },
    /// A started game failed before reaching a terminal position.
    AbortGame { game_id: GameId, reason: String },
    /// The engines never both came up. No `StartGame` precedes it.
    AbortStart { game: Game, reason: String },
}

/// Discriminant of [`Event`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StartGame,
    MakeMove,
    EndGame,
    AbortGame,
    AbortStart,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::StartGame,
        EventKind::MakeMove,
        EventKind::EndGame,
        EventKind::AbortGame,
        EventKind::AbortStart,
    ];
}

impl Event {
    pub fn start_game(game: Game) -> Self {
        Event::StartGame { game }
    }

    pub fn make_move(
        game_id: GameId,
        mv: Move,
        fen_before: impl Into<String>,
        engine_id: impl Into<String>,
    ) -> Self {
        Event::MakeMove {
            game_id,
            mv,
            fen_before: fen_before.into(),
            engine_id: engine_id.into(),
        }
    }

    pub fn end_game(game_id: GameId, outcome: GameOutcome) -> Self {
        Event::EndGame { game_id, outcome }
    }

    pub fn abort_game(game_id: GameId, reason: impl Into<String>) -> Self {
        Event::AbortGame {
            game_id,
            reason: reason.into(),
        }
    }

    pub fn abort_start(game: Game, reason: impl Into<String>) -> Self {
        Event::AbortStart {
            game,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::StartGame { .. } => EventKind::StartGame,
            Event::MakeMove { .. } => EventKind::MakeMove,
            Event::EndGame { .. } => EventKind::EndGame,
            Event::AbortGame { .. } => EventKind::AbortGame,
            Event::AbortStart { .. } => EventKind::AbortStart,
        }
    }

    /// The game this event belongs to.
    pub fn game_id(&self) -> GameId {
        match self {
            Event::StartGame { game } | Event::AbortStart { game, .. } => game.game_id,
            Event::MakeMove { game_id, .. }
            | Event::EndGame { game_id, .. }
            | Event::AbortGame { game_id, .. } => *game_id,
        }
    }
}
