//! Local board model for a game in progress.
//!
//! Thin wrapper over `shakmaty`: tracks the position and move history,
//! validates moves returned by engines, and decides when the game is over.

use std::collections::HashMap;

use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position};

use crate::error::{Error, Result};
use crate::model::GameOutcome;

/// Halfmove clock at which the seventy-five-move rule ends the game.
const SEVENTY_FIVE_MOVE_PLIES: u32 = 150;

/// Occurrences of one position that end the game by repetition.
const FIVEFOLD: u32 = 5;

/// A move that passed legality checks and was applied to the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    pub uci: String,
    pub san: String,
}

#[derive(Debug, Clone)]
pub struct Board {
    position: Chess,
    history: Vec<String>,
    seen: HashMap<String, u32>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    /// Standard starting position.
    pub fn new() -> Self {
        let position = Chess::default();
        let mut seen = HashMap::new();
        seen.insert(repetition_key(&position), 1);
        Self {
            position,
            history: Vec::new(),
            seen,
        }
    }

    pub fn fen(&self) -> String {
        Fen::from_position(self.position.clone(), EnPassantMode::Legal).to_string()
    }

    /// Side to move.
    pub fn turn(&self) -> Color {
        self.position.turn()
    }

    /// Moves played so far, in UCI notation.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn ply(&self) -> usize {
        self.history.len()
    }

    /// UCI `position` command describing the game so far.
    pub fn position_command(&self) -> String {
        if self.history.is_empty() {
            "position startpos".to_string()
        } else {
            format!("position startpos moves {}", self.history.join(" "))
        }
    }

    /// Legal moves in the current position, in UCI notation.
    pub fn legal_moves(&self) -> Vec<String> {
        self.position
            .legal_moves()
            .iter()
            .map(|m| UciMove::from_move(m, CastlingMode::Standard).to_string())
            .collect()
    }

    /// Validate `uci` against the current position and play it.
    pub fn play_uci(&mut self, uci: &str) -> Result<AppliedMove> {
        let illegal = || Error::IllegalMove {
            mv: uci.to_string(),
            fen: self.fen(),
        };

        let parsed: UciMove = uci.parse().map_err(|_| illegal())?;
        let m = parsed.to_move(&self.position).map_err(|_| illegal())?;
        if !self.position.is_legal(&m) {
            return Err(illegal());
        }

        let normalized = UciMove::from_move(&m, CastlingMode::Standard).to_string();
        let san = SanPlus::from_move_and_play_unchecked(&mut self.position, &m).to_string();

        self.history.push(normalized.clone());
        *self.seen.entry(repetition_key(&self.position)).or_insert(0) += 1;

        Ok(AppliedMove {
            uci: normalized,
            san,
        })
    }

    /// Terminal outcome of the current position, if any.
    ///
    /// Only conditions that end the game without a claim count: checkmate,
    /// stalemate, insufficient material, the seventy-five-move rule and
    /// fivefold repetition.
    pub fn outcome(&self) -> Option<GameOutcome> {
        if self.position.is_checkmate() {
            return Some(match self.position.turn() {
                Color::White => GameOutcome::BlackWins,
                Color::Black => GameOutcome::WhiteWins,
            });
        }
        if self.position.is_stalemate()
            || self.position.is_insufficient_material()
            || self.position.halfmoves() >= SEVENTY_FIVE_MOVE_PLIES
            || self.repetitions() >= FIVEFOLD
        {
            return Some(GameOutcome::Draw);
        }
        None
    }

    fn repetitions(&self) -> u32 {
        self.seen
            .get(&repetition_key(&self.position))
            .copied()
            .unwrap_or(0)
    }
}

/// Placement, side to move, castling rights and en passant square.
fn repetition_key(position: &Chess) -> String {
    let fen = Fen::from_position(position.clone(), EnPassantMode::Legal).to_string();
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}
