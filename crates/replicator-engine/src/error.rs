// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for replicator-engine.

use thiserror::Error;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the engine itself (persistence, serialization, run bookkeeping).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Run was not found in the store.
    #[error("Run '{run_id}' not found")]
    RunNotFound {
        /// The run ID that was not found.
        run_id: String,
    },

    /// A run with the same ID already exists.
    #[error("Run '{run_id}' already exists")]
    DuplicateRun {
        /// The run ID that already exists.
        run_id: String,
    },

    /// Run is in a state that does not allow the requested operation.
    #[error("Run '{run_id}' is in invalid state: expected '{expected}', got '{actual}'")]
    InvalidRunState {
        /// The run ID.
        run_id: String,
        /// The expected status.
        expected: String,
        /// The actual status.
        actual: String,
    },

    /// Continuation record, heartbeat or status could not be (de)serialized.
    #[error("Serialization error during '{context}': {details}")]
    Serialization {
        /// What was being (de)serialized.
        context: String,
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RunNotFound { .. } => "RUN_NOT_FOUND",
            Self::DuplicateRun { .. } => "DUPLICATE_RUN",
            Self::InvalidRunState { .. } => "INVALID_RUN_STATE",
            Self::Serialization { .. } => "SERIALIZATION_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    pub(crate) fn serialization(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            context: context.into(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::serialization("json", err)
    }
}

/// Outcome error of a supervised run.
#[derive(Debug, Error)]
pub enum RunError<E> {
    /// The engine failed to persist or restore the run.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The workflow failed an execution.
    #[error("{0}")]
    Workflow(E),

    /// The driver task panicked or was cancelled.
    #[error("run driver aborted: {0}")]
    Aborted(String),
}

impl<E> RunError<E> {
    /// Returns the workflow error, if the run failed inside the workflow.
    pub fn workflow_error(&self) -> Option<&E> {
        match self {
            Self::Workflow(e) => Some(e),
            _ => None,
        }
    }
}
