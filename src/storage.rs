//! Persistence gateway used by the orchestration core.
//!
//! The core never talks SQL; it depends on this trait. [`crate::db::Db`] is
//! the SQLite implementation.

use std::future::Future;

use crate::error::Result;
use crate::model::{Engine, Game, GameId, GameOutcome, Move, MoveRecord};

pub trait Storage: Send + Sync + 'static {
    /// Fails with `AlreadyExists` if an engine with the same id is stored.
    fn store_engine(&self, engine: &Engine) -> impl Future<Output = Result<()>> + Send;

    /// Fails with `NotFound` if absent.
    fn get_engine(&self, id: &str) -> impl Future<Output = Result<Engine>> + Send;

    fn list_engines(&self) -> impl Future<Output = Result<Vec<Engine>>> + Send;

    fn delete_engine(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

    fn store_game(&self, game: &Game) -> impl Future<Output = Result<()>> + Send;

    /// Set the outcome of an unfinished game. A finished game is left
    /// untouched and the call fails with `AlreadyFinished`.
    fn finish_game(
        &self,
        game_id: GameId,
        outcome: GameOutcome,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Record why an unfinished game was abandoned. The outcome stays unset.
    fn abort_game(&self, game_id: GameId, reason: &str)
    -> impl Future<Output = Result<()>> + Send;

    fn get_game(&self, game_id: GameId) -> impl Future<Output = Result<Game>> + Send;

    fn list_games(&self) -> impl Future<Output = Result<Vec<Game>>> + Send;

    /// Games in which the engine played either colour.
    fn games_for_engine(&self, engine_id: &str) -> impl Future<Output = Result<Vec<Game>>> + Send;

    fn store_move(
        &self,
        game_id: GameId,
        mv: &Move,
        fen_before: &str,
        engine_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Moves of a game in the order they were played.
    fn moves_in_game(&self, game_id: GameId)
    -> impl Future<Output = Result<Vec<MoveRecord>>> + Send;
}
