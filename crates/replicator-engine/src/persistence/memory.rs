// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process persistence.
//!
//! Keeps runs and heartbeats in memory. State is lost with the process, so
//! this backend suits tests and embedded one-shot migrations.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::EngineError;

use super::{HeartbeatRecord, Persistence, RunRecord, RunStatus};

/// In-memory persistence provider.
#[derive(Default)]
pub struct MemoryPersistence {
    runs: Mutex<HashMap<String, RunRecord>>,
    heartbeats: Mutex<HashMap<(String, String), HeartbeatRecord>>,
}

impl MemoryPersistence {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(run_id: &str) -> EngineError {
    EngineError::RunNotFound {
        run_id: run_id.to_string(),
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn create_run(&self, run_id: &str, kind: &str, params: &[u8]) -> Result<(), EngineError> {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(run_id) {
            return Err(EngineError::DuplicateRun {
                run_id: run_id.to_string(),
            });
        }

        let now = Utc::now();
        runs.insert(
            run_id.to_string(),
            RunRecord {
                run_id: run_id.to_string(),
                kind: kind.to_string(),
                status: RunStatus::Pending.as_str().to_string(),
                execution: 0,
                params: params.to_vec(),
                status_snapshot: None,
                error: None,
                created_at: now,
                updated_at: now,
                finished_at: None,
            },
        );
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, EngineError> {
        Ok(self.runs.lock().await.get(run_id).cloned())
    }

    async fn list_runs(&self, limit: i64) -> Result<Vec<RunRecord>, EngineError> {
        let runs = self.runs.lock().await;
        let mut records: Vec<RunRecord> = runs.values().cloned().collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<(), EngineError> {
        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        run.status = status.as_str().to_string();
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn save_continuation(
        &self,
        run_id: &str,
        execution: i64,
        params: &[u8],
        status_snapshot: Option<&[u8]>,
    ) -> Result<(), EngineError> {
        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        run.execution = execution;
        run.params = params.to_vec();
        run.status_snapshot = status_snapshot.map(<[u8]>::to_vec);
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn save_status_snapshot(&self, run_id: &str, snapshot: &[u8]) -> Result<(), EngineError> {
        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        run.status_snapshot = Some(snapshot.to_vec());
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_run(
        &self,
        run_id: &str,
        status_snapshot: Option<&[u8]>,
        error: Option<&str>,
    ) -> Result<(), EngineError> {
        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        let now = Utc::now();
        let status = if error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        run.status = status.as_str().to_string();
        if let Some(snapshot) = status_snapshot {
            run.status_snapshot = Some(snapshot.to_vec());
        }
        run.error = error.map(str::to_string);
        run.finished_at = Some(now);
        run.updated_at = now;
        Ok(())
    }

    async fn record_heartbeat(
        &self,
        run_id: &str,
        activity_id: &str,
        details: &[u8],
        attempt: i64,
    ) -> Result<(), EngineError> {
        self.heartbeats.lock().await.insert(
            (run_id.to_string(), activity_id.to_string()),
            HeartbeatRecord {
                run_id: run_id.to_string(),
                activity_id: activity_id.to_string(),
                details: details.to_vec(),
                attempt,
                recorded_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn load_heartbeat(
        &self,
        run_id: &str,
        activity_id: &str,
    ) -> Result<Option<HeartbeatRecord>, EngineError> {
        Ok(self
            .heartbeats
            .lock()
            .await
            .get(&(run_id.to_string(), activity_id.to_string()))
            .cloned())
    }

    async fn clear_heartbeat(&self, run_id: &str, activity_id: &str) -> Result<(), EngineError> {
        self.heartbeats
            .lock()
            .await
            .remove(&(run_id.to_string(), activity_id.to_string()));
        Ok(())
    }
}
