//! Game and move queries.
//!
//! A game's outcome is written by a single guarded UPDATE
//! (`WHERE outcome IS NULL`), so it moves from unset to set at most once
//! even when two writers race.

use chrono::{DateTime, Utc};

use super::is_unique_violation;
use crate::error::{Error, Result};
use crate::model::{Game, GameId, GameOutcome, Move, MoveRecord};

#[derive(sqlx::FromRow)]
struct GameRow {
    game_id: String,
    started_at: DateTime<Utc>,
    white: String,
    black: String,
    outcome: Option<String>,
    failure: Option<String>,
}

impl TryFrom<GameRow> for Game {
    type Error = Error;

    fn try_from(row: GameRow) -> Result<Self> {
        Ok(Game {
            game_id: row.game_id.parse()?,
            started_at: row.started_at,
            white: row.white,
            black: row.black,
            outcome: row
                .outcome
                .as_deref()
                .map(str::parse::<GameOutcome>)
                .transpose()?,
            failure: row.failure,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MoveRow {
    game_id: String,
    uci: String,
    san: String,
    played_at: DateTime<Utc>,
    fen_before: String,
    engine_id: String,
}

impl TryFrom<MoveRow> for MoveRecord {
    type Error = Error;

    fn try_from(row: MoveRow) -> Result<Self> {
        Ok(MoveRecord {
            game_id: row.game_id.parse()?,
            mv: Move {
                uci: row.uci,
                san: row.san,
                timestamp: row.played_at,
            },
            fen_before: row.fen_before,
            engine_id: row.engine_id,
        })
    }
}

const GAME_COLUMNS: &str = "game_id, started_at, white, black, outcome, failure";

impl super::Db {
    pub(super) async fn insert_game(&self, game: &Game) -> Result<()> {
        sqlx::query(
            "INSERT INTO games (game_id, started_at, white, black, outcome, failure)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(game.game_id.to_string())
        .bind(game.started_at)
        .bind(&game.white)
        .bind(&game.black)
        .bind(game.outcome.map(GameOutcome::as_str))
        .bind(&game.failure)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::AlreadyExists(format!("game {}", game.game_id))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    pub(super) async fn fetch_game(&self, game_id: GameId) -> Result<Game> {
        let row: Option<GameRow> =
            sqlx::query_as(&format!("SELECT {GAME_COLUMNS} FROM games WHERE game_id = ?1"))
                .bind(game_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or_else(|| Error::NotFound(format!("game {game_id}")))?
            .try_into()
    }

    /// All games, or only those `engine_id` played in.
    pub(super) async fn fetch_games(&self, engine_id: Option<&str>) -> Result<Vec<Game>> {
        let rows: Vec<GameRow> = match engine_id {
            Some(id) => {
                sqlx::query_as(&format!(
                    "SELECT {GAME_COLUMNS} FROM games
                     WHERE white = ?1 OR black = ?1
                     ORDER BY started_at"
                ))
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {GAME_COLUMNS} FROM games ORDER BY started_at"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(Game::try_from).collect()
    }

    pub(super) async fn set_outcome(&self, game_id: GameId, outcome: GameOutcome) -> Result<()> {
        let result = sqlx::query(
            "UPDATE games SET outcome = ?1, finished_at = ?2
             WHERE game_id = ?3 AND outcome IS NULL",
        )
        .bind(outcome.as_str())
        .bind(Utc::now())
        .bind(game_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.unfinished_guard_error(game_id).await);
        }
        Ok(())
    }

    pub(super) async fn set_failure(&self, game_id: GameId, reason: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE games SET failure = ?1, finished_at = ?2
             WHERE game_id = ?3 AND outcome IS NULL",
        )
        .bind(reason)
        .bind(Utc::now())
        .bind(game_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.unfinished_guard_error(game_id).await);
        }
        Ok(())
    }

    /// Explain why a `WHERE outcome IS NULL` update touched nothing.
    async fn unfinished_guard_error(&self, game_id: GameId) -> Error {
        let exists: std::result::Result<Option<(String,)>, sqlx::Error> =
            sqlx::query_as("SELECT game_id FROM games WHERE game_id = ?1")
                .bind(game_id.to_string())
                .fetch_optional(&self.pool)
                .await;
        match exists {
            Ok(Some(_)) => Error::AlreadyFinished(game_id.to_string()),
            Ok(None) => Error::NotFound(format!("game {game_id}")),
            Err(e) => e.into(),
        }
    }

    pub(super) async fn insert_move(
        &self,
        game_id: GameId,
        mv: &Move,
        fen_before: &str,
        engine_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO moves (game_id, uci, san, played_at, fen_before, engine_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(game_id.to_string())
        .bind(&mv.uci)
        .bind(&mv.san)
        .bind(mv.timestamp)
        .bind(fen_before)
        .bind(engine_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(super) async fn fetch_moves(&self, game_id: GameId) -> Result<Vec<MoveRecord>> {
        let rows: Vec<MoveRow> = sqlx::query_as(
            "SELECT game_id, uci, san, played_at, fen_before, engine_id FROM moves
             WHERE game_id = ?1
             ORDER BY played_at, id",
        )
        .bind(game_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MoveRecord::try_from).collect()
    }
}
