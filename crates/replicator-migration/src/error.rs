// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for replicator-migration.

use replicator_engine::{EngineError, Retryable};
use thiserror::Error;

/// Failure reported by a cluster collaborator.
///
/// The message is surfaced unchanged, so a migration failing on a
/// collaborator error reports exactly what the collaborator said.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ClientError {
    /// Error message from the collaborator.
    pub message: String,
    /// Whether retrying the call may succeed.
    pub retryable: bool,
}

impl ClientError {
    /// A transient failure; the caller's retry policy applies.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A terminal failure; no retry.
    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl Retryable for ClientError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Errors that end a migration execution.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum MigrationError {
    /// The params are unusable. Raised before any side effect.
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    /// An activity failed terminally or exhausted its retries.
    #[error("{source}")]
    Activity {
        /// Name of the failing operation.
        operation: &'static str,
        /// The collaborator error.
        source: ClientError,
    },

    /// Fetching a page of executions failed.
    #[error("{0}")]
    Scan(ClientError),

    /// The user-data sub-migration ended in failure.
    #[error("{0}")]
    UserDataReplication(String),

    /// The engine failed underneath the migration.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl MigrationError {
    /// Wrap an activity failure.
    pub fn activity(operation: &'static str, source: ClientError) -> Self {
        Self::Activity { operation, source }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Activity { .. } => "ACTIVITY_FAILED",
            Self::Scan(_) => "SCAN_FAILED",
            Self::UserDataReplication(_) => "USER_DATA_REPLICATION_FAILED",
            Self::Engine(e) => e.error_code(),
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
