//! SQLite connection pool, migrations, and health check.
//!
//! Query code lives in the submodules as `impl Db` blocks; [`Storage`] is
//! implemented here by delegating to them.

mod engines;
mod games;

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::error::Result;
use crate::model::{Engine, Game, GameId, GameOutcome, Move, MoveRecord};
use crate::storage::Storage;

/// Database handle. Cloning shares the pool.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open (creating if needed) the database at `url`, e.g.
    /// `sqlite://chessnet.db`.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database, already migrated.
    pub async fn in_memory() -> Result<Self> {
        // Every new connection would get a fresh empty database, so pin
        // exactly one and never recycle it.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Whether `err` is a uniqueness constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl Storage for Db {
    async fn store_engine(&self, engine: &Engine) -> Result<()> {
        self.insert_engine(engine).await
    }

    async fn get_engine(&self, id: &str) -> Result<Engine> {
        self.fetch_engine(id).await
    }

    async fn list_engines(&self) -> Result<Vec<Engine>> {
        self.fetch_engines().await
    }

    async fn delete_engine(&self, id: &str) -> Result<()> {
        self.remove_engine(id).await
    }

    async fn store_game(&self, game: &Game) -> Result<()> {
        self.insert_game(game).await
    }

    async fn finish_game(&self, game_id: GameId, outcome: GameOutcome) -> Result<()> {
        self.set_outcome(game_id, outcome).await
    }

    async fn abort_game(&self, game_id: GameId, reason: &str) -> Result<()> {
        self.set_failure(game_id, reason).await
    }

    async fn get_game(&self, game_id: GameId) -> Result<Game> {
        self.fetch_game(game_id).await
    }

    async fn list_games(&self) -> Result<Vec<Game>> {
        self.fetch_games(None).await
    }

    async fn games_for_engine(&self, engine_id: &str) -> Result<Vec<Game>> {
        self.fetch_games(Some(engine_id)).await
    }

    async fn store_move(
        &self,
        game_id: GameId,
        mv: &Move,
        fen_before: &str,
        engine_id: &str,
    ) -> Result<()> {
        self.insert_move(game_id, mv, fen_before, engine_id).await
    }

    async fn moves_in_game(&self, game_id: GameId) -> Result<Vec<MoveRecord>> {
        self.fetch_moves(game_id).await
    }
}
