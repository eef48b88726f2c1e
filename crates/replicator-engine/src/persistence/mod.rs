// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for replicator-engine.
//!
//! A run is one logical, possibly very long operation. It is stored as a
//! single row that is overwritten at every continuation boundary, so the
//! persisted history of a run stays bounded no matter how many executions
//! it goes through. Heartbeats are stored per (run, activity) and are
//! likewise overwritten on every record.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineError;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Created, no execution started yet.
    Pending,
    /// An execution is in progress.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl RunStatus {
    /// Stable string form used in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the stored string form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the run reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Run record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRecord {
    /// Unique identifier for the run.
    pub run_id: String,
    /// Workflow kind that drives the run.
    pub kind: String,
    /// Current status (pending, running, completed, failed).
    pub status: String,
    /// Number of the current (or last) execution, starting at 0.
    pub execution: i64,
    /// Serialized params of the current execution (the continuation record).
    pub params: Vec<u8>,
    /// Latest serialized status snapshot, if one was saved.
    pub status_snapshot: Option<Vec<u8>>,
    /// Error message from failure.
    pub error: Option<String>,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When the run record was last written.
    pub updated_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Parsed run status.
    pub fn run_status(&self) -> Option<RunStatus> {
        RunStatus::parse(&self.status)
    }
}

/// Heartbeat record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HeartbeatRecord {
    /// Run this heartbeat belongs to.
    pub run_id: String,
    /// Activity within the run.
    pub activity_id: String,
    /// Serialized heartbeat details.
    pub details: Vec<u8>,
    /// Attempt of the activity that recorded the heartbeat.
    pub attempt: i64,
    /// When the heartbeat was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Persistence interface used by the supervisor and heartbeats.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Create a new run in `pending` state with its initial params.
    async fn create_run(&self, run_id: &str, kind: &str, params: &[u8]) -> Result<(), EngineError>;

    /// Fetch a run by ID.
    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, EngineError>;

    /// List runs, most recently updated first.
    async fn list_runs(&self, limit: i64) -> Result<Vec<RunRecord>, EngineError>;

    /// Set the run status.
    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<(), EngineError>;

    /// Replace the continuation record of a run.
    ///
    /// The previous params and snapshot are discarded.
    async fn save_continuation(
        &self,
        run_id: &str,
        execution: i64,
        params: &[u8],
        status_snapshot: Option<&[u8]>,
    ) -> Result<(), EngineError>;

    /// Store the latest status snapshot of a run.
    async fn save_status_snapshot(&self, run_id: &str, snapshot: &[u8]) -> Result<(), EngineError>;

    /// Mark a run as finished. A present `error` marks it failed.
    async fn complete_run(
        &self,
        run_id: &str,
        status_snapshot: Option<&[u8]>,
        error: Option<&str>,
    ) -> Result<(), EngineError>;

    /// Upsert the heartbeat of an activity.
    async fn record_heartbeat(
        &self,
        run_id: &str,
        activity_id: &str,
        details: &[u8],
        attempt: i64,
    ) -> Result<(), EngineError>;

    /// Load the latest heartbeat of an activity.
    async fn load_heartbeat(
        &self,
        run_id: &str,
        activity_id: &str,
    ) -> Result<Option<HeartbeatRecord>, EngineError>;

    /// Remove the heartbeat of an activity.
    async fn clear_heartbeat(&self, run_id: &str, activity_id: &str) -> Result<(), EngineError>;
}
