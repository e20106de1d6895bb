//! Span helpers for games and engine runners.

use tracing::Span;

use crate::model::GameId;
use crate::runner::RunnerState;

/// Span covering one game from engine start to teardown.
///
/// `game.outcome` is declared empty and filled in by [`record_outcome`].
pub fn start_game_span(game_id: GameId, white: &str, black: &str) -> Span {
    tracing::info_span!(
        "game.play",
        "game.id" = %game_id,
        "game.white" = white,
        "game.black" = black,
        "game.outcome" = tracing::field::Empty,
    )
}

pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("game.outcome", outcome);
}

/// Emit an event for an engine runner state change.
pub fn record_runner_transition(engine_id: &str, from: RunnerState, to: RunnerState) {
    tracing::debug!(engine = engine_id, from = %from, to = %to, "runner_transition");
}
