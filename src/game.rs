//! Game orchestration: one game from engine start to teardown.
//!
//! Both runners are started concurrently. `StartGame` is published only
//! once both are ready, so a stored game always had two live engines; if
//! either fails to come up, `AbortStart` is published instead. The
//! loop then alternates moves, publishing `MakeMove` for each accepted
//! move, until the board reports an outcome. Whatever happens, both runners
//! are shut down (concurrently) before the result is returned.

use std::time::Duration;

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use shakmaty::Color;
use tracing::{Instrument, info, warn};

use crate::board::Board;
use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::model::{Game, GameOutcome, Move};
use crate::runner::EngineRunner;
use crate::telemetry::game::{record_outcome, start_game_span};
use crate::telemetry::metrics;
use crate::uci::Limit;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Search time per move.
    pub move_time_ms: u64,
    /// Slack past `move_time_ms` before a silent engine forfeits the game.
    pub move_grace_ms: u64,
    /// Give up after this many plies without an outcome.
    pub max_plies: Option<usize>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            move_time_ms: 100,
            move_grace_ms: 5_000,
            max_plies: None,
        }
    }
}

impl GameConfig {
    pub fn move_time(&self) -> Duration {
        Duration::from_millis(self.move_time_ms)
    }

    pub fn move_grace(&self) -> Duration {
        Duration::from_millis(self.move_grace_ms)
    }

    pub fn limit(&self) -> Limit {
        Limit::movetime(self.move_time())
    }
}

/// Play `game` between `white` and `black`, publishing events on the
/// channel named after the game id.
///
/// Returns the outcome, or the error that ended the game. A game that
/// stops without reaching a terminal position fails with
/// [`Error::NoOutcome`]; no outcome is ever made up.
pub async fn play_game<W, B>(
    game: &Game,
    white: &mut W,
    black: &mut B,
    broker: &Broker,
    config: &GameConfig,
) -> Result<GameOutcome>
where
    W: EngineRunner,
    B: EngineRunner,
{
    let span = start_game_span(game.game_id, &game.white, &game.black);
    let channel = game.game_id.to_string();

    async {
        let (white_started, black_started) = tokio::join!(white.run(), black.run());
        if let (Err(e), _) | (_, Err(e)) = (white_started, black_started) {
            // A runner that failed has already cleaned up after itself; the
            // other one may be up and must not be left running.
            let reason = format!("game aborted before start: {e}");
            let (w, b) = tokio::join!(white.shutdown(&reason), black.shutdown(&reason));
            log_shutdown_errors(w, b);
            broker.publish(&channel, Event::abort_start(game.clone(), e.to_string()));
            metrics::games_aborted().add(1, &[KeyValue::new("stage", "start")]);
            warn!(error = %e, "game failed to start");
            return Err(e);
        }

        broker.publish(&channel, Event::start_game(game.clone()));
        metrics::games_started().add(1, &[]);
        info!("game started");

        let result = turn_loop(game, white, black, broker, config, &channel).await;

        let reason = match &result {
            Ok(outcome) => format!("game finished: {outcome}"),
            Err(e) => format!("game aborted: {e}"),
        };
        let (w, b) = tokio::join!(white.shutdown(&reason), black.shutdown(&reason));
        log_shutdown_errors(w, b);

        match result {
            Ok(outcome) => {
                record_outcome(&tracing::Span::current(), outcome.as_str());
                broker.publish(&channel, Event::end_game(game.game_id, outcome));
                metrics::games_finished().add(1, &[KeyValue::new("outcome", outcome.as_str())]);
                info!(%outcome, "game finished");
                Ok(outcome)
            }
            Err(e) => {
                broker.publish(&channel, Event::abort_game(game.game_id, e.to_string()));
                metrics::games_aborted().add(1, &[KeyValue::new("stage", "play")]);
                warn!(error = %e, "game aborted");
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

async fn turn_loop<W, B>(
    game: &Game,
    white: &mut W,
    black: &mut B,
    broker: &Broker,
    config: &GameConfig,
    channel: &str,
) -> Result<GameOutcome>
where
    W: EngineRunner,
    B: EngineRunner,
{
    let mut board = Board::new();
    let limit = config.limit();
    let deadline = config.move_time() + config.move_grace();

    loop {
        if let Some(outcome) = board.outcome() {
            return Ok(outcome);
        }
        if config.max_plies.is_some_and(|max| board.ply() >= max) {
            return Err(Error::NoOutcome);
        }

        let (engine_id, requested) = match board.turn() {
            Color::White => (
                white.engine().id(),
                tokio::time::timeout(deadline, white.play(&board, &limit)).await,
            ),
            Color::Black => (
                black.engine().id(),
                tokio::time::timeout(deadline, black.play(&board, &limit)).await,
            ),
        };
        let uci = requested.map_err(|_| {
            Error::Protocol(format!("{engine_id} returned no move within {deadline:?}"))
        })??;

        let fen_before = board.fen();
        let applied = board.play_uci(&uci)?;
        let mv = Move {
            uci: applied.uci,
            san: applied.san,
            timestamp: Utc::now(),
        };
        broker.publish(channel, Event::make_move(game.game_id, mv, fen_before, engine_id));
        metrics::moves_played().add(1, &[]);
    }
}

fn log_shutdown_errors(white: Result<()>, black: Result<()>) {
    for (side, result) in [("white", white), ("black", black)] {
        if let Err(e) = result {
            warn!(side, error = %e, "engine shutdown failed");
        }
    }
}
