//! Engine registry queries.

use chrono::Utc;

use super::is_unique_violation;
use crate::error::{Error, Result};
use crate::model::Engine;

#[derive(sqlx::FromRow)]
struct EngineRow {
    family: String,
    variant: String,
    version: String,
    image: String,
}

impl From<EngineRow> for Engine {
    fn from(row: EngineRow) -> Self {
        Engine::new(row.family, row.variant, row.version, row.image)
    }
}

impl super::Db {
    pub(super) async fn insert_engine(&self, engine: &Engine) -> Result<()> {
        engine.validate()?;
        let id = engine.id();
        sqlx::query(
            "INSERT INTO engines (id, family, variant, version, image, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&id)
        .bind(&engine.family)
        .bind(&engine.variant)
        .bind(&engine.version)
        .bind(&engine.image)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::AlreadyExists(format!("engine {id}"))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    pub(super) async fn fetch_engine(&self, id: &str) -> Result<Engine> {
        let row: Option<EngineRow> = sqlx::query_as(
            "SELECT family, variant, version, image FROM engines WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Engine::from)
            .ok_or_else(|| Error::NotFound(format!("engine {id}")))
    }

    pub(super) async fn fetch_engines(&self) -> Result<Vec<Engine>> {
        let rows: Vec<EngineRow> = sqlx::query_as(
            "SELECT family, variant, version, image FROM engines ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Engine::from).collect())
    }

    pub(super) async fn remove_engine(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM engines WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("engine {id}")));
        }
        Ok(())
    }
}
