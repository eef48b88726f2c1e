// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::EngineError;
use crate::migrations::SQLITE as MIGRATOR;

use super::{HeartbeatRecord, Persistence, RunRecord, RunStatus};

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file when missing, then
    /// runs all migrations.
    ///
    /// ```ignore
    /// let persistence = SqlitePersistence::from_path(".data/replicator.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| EngineError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a private in-memory database, mostly useful for tests.
    pub async fn in_memory() -> Result<Self, EngineError> {
        // A single connection keeps every query on the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), EngineError> {
        MIGRATOR
            .run(pool)
            .await
            .map_err(|e| EngineError::Database {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })
    }

    fn ensure_updated(rows: u64, run_id: &str) -> Result<(), EngineError> {
        if rows == 0 {
            return Err(EngineError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn create_run(&self, run_id: &str, kind: &str, params: &[u8]) -> Result<(), EngineError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO runs (run_id, kind, status, execution, params, created_at, updated_at)
            VALUES (?, ?, 'pending', 0, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(kind)
        .bind(params)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(EngineError::DuplicateRun {
                    run_id: run_id.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, EngineError> {
        let record = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT run_id, kind, status, execution, params, status_snapshot, error,
                   created_at, updated_at, finished_at
            FROM runs
            WHERE run_id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_runs(&self, limit: i64) -> Result<Vec<RunRecord>, EngineError> {
        let rows = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT run_id, kind, status, execution, params, status_snapshot, error,
                   created_at, updated_at, finished_at
            FROM runs
            ORDER BY updated_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?, updated_at = ?
            WHERE run_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(result.rows_affected(), run_id)
    }

    async fn save_continuation(
        &self,
        run_id: &str,
        execution: i64,
        params: &[u8],
        status_snapshot: Option<&[u8]>,
    ) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET execution = ?, params = ?, status_snapshot = ?, updated_at = ?
            WHERE run_id = ?
            "#,
        )
        .bind(execution)
        .bind(params)
        .bind(status_snapshot)
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(result.rows_affected(), run_id)
    }

    async fn save_status_snapshot(&self, run_id: &str, snapshot: &[u8]) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status_snapshot = ?, updated_at = ?
            WHERE run_id = ?
            "#,
        )
        .bind(snapshot)
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(result.rows_affected(), run_id)
    }

    async fn complete_run(
        &self,
        run_id: &str,
        status_snapshot: Option<&[u8]>,
        error: Option<&str>,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        let status = if error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?,
                status_snapshot = COALESCE(?, status_snapshot),
                error = ?,
                finished_at = ?,
                updated_at = ?
            WHERE run_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(status_snapshot)
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(result.rows_affected(), run_id)
    }

    async fn record_heartbeat(
        &self,
        run_id: &str,
        activity_id: &str,
        details: &[u8],
        attempt: i64,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO heartbeats (run_id, activity_id, details, attempt, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (run_id, activity_id) DO UPDATE
            SET details = excluded.details,
                attempt = excluded.attempt,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(run_id)
        .bind(activity_id)
        .bind(details)
        .bind(attempt)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_heartbeat(
        &self,
        run_id: &str,
        activity_id: &str,
    ) -> Result<Option<HeartbeatRecord>, EngineError> {
        let record = sqlx::query_as::<_, HeartbeatRecord>(
            r#"
            SELECT run_id, activity_id, details, attempt, recorded_at
            FROM heartbeats
            WHERE run_id = ? AND activity_id = ?
            "#,
        )
        .bind(run_id)
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn clear_heartbeat(&self, run_id: &str, activity_id: &str) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            DELETE FROM heartbeats
            WHERE run_id = ? AND activity_id = ?
            "#,
        )
        .bind(run_id)
        .bind(activity_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
