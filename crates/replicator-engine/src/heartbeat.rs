// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Activity heartbeats.
//!
//! A heartbeat is a progress cursor an activity writes after each unit of
//! work and reads back when it is retried or resumed after a crash. Every
//! recorded heartbeat is also emitted on the engine's progress stream, so
//! operators and tests can observe each checkpoint as it happens rather
//! than only the latest persisted one.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::error::{EngineError, Result};
use crate::persistence::Persistence;

/// A heartbeat as seen on the progress stream.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// Run that recorded the heartbeat.
    pub run_id: String,
    /// Activity within the run.
    pub activity_id: String,
    /// Attempt of the activity.
    pub attempt: i64,
    /// Heartbeat details as JSON.
    pub details: serde_json::Value,
    /// When the heartbeat was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl ProgressEvent {
    /// Decode the details into the activity's heartbeat type.
    pub fn details_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.details.clone())
            .map_err(|e| EngineError::serialization("progress event details", e))
    }
}

/// Typed progress checkpoint for one activity of one run.
pub struct Heartbeat<T> {
    persistence: Arc<dyn Persistence>,
    progress: broadcast::Sender<ProgressEvent>,
    run_id: String,
    activity_id: String,
    attempt: AtomicI64,
    _details: PhantomData<fn() -> T>,
}

impl<T> Heartbeat<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create a heartbeat handle for `activity_id` of `run_id`.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        progress: broadcast::Sender<ProgressEvent>,
        run_id: impl Into<String>,
        activity_id: impl Into<String>,
    ) -> Self {
        Self {
            persistence,
            progress,
            run_id: run_id.into(),
            activity_id: activity_id.into(),
            attempt: AtomicI64::new(1),
            _details: PhantomData,
        }
    }

    /// Activity this heartbeat belongs to.
    pub fn activity_id(&self) -> &str {
        &self.activity_id
    }

    /// Attempt number stamped on subsequent records.
    pub fn set_attempt(&self, attempt: i64) {
        self.attempt.store(attempt, Ordering::Relaxed);
    }

    /// Persist `details` as the latest cursor and emit it on the progress stream.
    #[instrument(skip(self, details), fields(run_id = %self.run_id, activity_id = %self.activity_id))]
    pub async fn record(&self, details: &T) -> Result<()> {
        let value = serde_json::to_value(details)
            .map_err(|e| EngineError::serialization("heartbeat details", e))?;
        let bytes = serde_json::to_vec(&value)?;
        let attempt = self.attempt.load(Ordering::Relaxed);

        self.persistence
            .record_heartbeat(&self.run_id, &self.activity_id, &bytes, attempt)
            .await?;

        // No subscribers is fine; the persisted record is authoritative.
        let _ = self.progress.send(ProgressEvent {
            run_id: self.run_id.clone(),
            activity_id: self.activity_id.clone(),
            attempt,
            details: value,
            recorded_at: Utc::now(),
        });
        debug!(attempt, "Heartbeat recorded");
        Ok(())
    }

    /// Latest recorded cursor, if any.
    pub async fn last(&self) -> Result<Option<T>> {
        let Some(record) = self
            .persistence
            .load_heartbeat(&self.run_id, &self.activity_id)
            .await?
        else {
            return Ok(None);
        };
        let details = serde_json::from_slice(&record.details)
            .map_err(|e| EngineError::serialization("heartbeat details", e))?;
        Ok(Some(details))
    }

    /// Drop the cursor once the activity finished.
    pub async fn clear(&self) -> Result<()> {
        self.persistence
            .clear_heartbeat(&self.run_id, &self.activity_id)
            .await
    }
}
