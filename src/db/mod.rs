// Database access layer (SQLite via sqlx).

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::engine::model::RoundResults;
use crate::error::StoreError;
use crate::store::KeyValueStore;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RoundResultRow {
    pub id: i64,
    pub session_id: String,
    pub round_index: i64,
    pub chameleon_id: i64,
    pub lie_index: i64,
    pub reveal_trigger: String,
    pub results: String,
    pub completed_at: i64,
}

impl RoundResultRow {
    pub fn parsed(&self) -> Result<RoundResults, StoreError> {
        Ok(serde_json::from_str(&self.results)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GameArchiveRow {
    pub id: i64,
    pub session_id: String,
    pub players: i64,
    pub rounds: i64,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub created_at: String,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS round_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                round_index INTEGER NOT NULL,
                chameleon_id INTEGER NOT NULL,
                lie_index INTEGER NOT NULL,
                reveal_trigger TEXT NOT NULL,
                results TEXT NOT NULL,
                completed_at INTEGER NOT NULL,
                UNIQUE(session_id, round_index)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS game_archives (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                players INTEGER NOT NULL,
                rounds INTEGER NOT NULL,
                data BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Key-value records ─────────────────────────────────────────────

    pub async fn get_value(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn put_value(&self, key: &str, value: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO kv_store (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_value(&self, key: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Round results ─────────────────────────────────────────────────

    /// Append a revealed round. A second write for the same round is ignored.
    pub async fn record_round_result(
        &self,
        session_id: Uuid,
        round_index: usize,
        chameleon_id: u32,
        results: &RoundResults,
    ) -> Result<bool, StoreError> {
        let json = serde_json::to_string(results)?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO round_results
             (session_id, round_index, chameleon_id, lie_index, reveal_trigger, results, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session_id.to_string())
        .bind(round_index as i64)
        .bind(chameleon_id as i64)
        .bind(results.lie_index as i64)
        .bind(results.trigger.as_str())
        .bind(json)
        .bind(results.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_round_results(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<RoundResultRow>, sqlx::Error> {
        sqlx::query_as::<_, RoundResultRow>(
            "SELECT id, session_id, round_index, chameleon_id, lie_index, reveal_trigger, results, completed_at
             FROM round_results WHERE session_id = ? ORDER BY round_index",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
    }

    pub async fn delete_round_results(&self, session_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM round_results WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ── Game archives ─────────────────────────────────────────────────

    pub async fn archive_game(
        &self,
        session_id: Uuid,
        players: usize,
        rounds: usize,
        data: &[u8],
    ) -> Result<i64, sqlx::Error> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO game_archives (session_id, players, rounds, data) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(session_id.to_string())
        .bind(players as i64)
        .bind(rounds as i64)
        .bind(data)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_archive(&self, id: i64) -> Result<Option<GameArchiveRow>, sqlx::Error> {
        sqlx::query_as::<_, GameArchiveRow>(
            "SELECT id, session_id, players, rounds, data, created_at FROM game_archives WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn list_archives(&self, session_id: Uuid) -> Result<Vec<GameArchiveRow>, sqlx::Error> {
        sqlx::query_as::<_, GameArchiveRow>(
            "SELECT id, session_id, players, rounds, data, created_at FROM game_archives
             WHERE session_id = ? ORDER BY id",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
    }
}

impl KeyValueStore for Database {
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>> {
        async move { Ok(self.get_value(key).await?) }.boxed()
    }

    fn save<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<(), StoreError>> {
        async move { Ok(self.put_value(key, &value).await?) }.boxed()
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.delete_value(key).await?;
            Ok(())
        }
        .boxed()
    }
}
