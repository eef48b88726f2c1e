// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replicator Engine - durable execution substrate for long-running migrations.
//!
//! The engine runs a [`Workflow`] as a sequence of bounded executions. Each
//! execution either completes the run or continues as new with a fresh
//! params record, which replaces the previous one in the store. A run that
//! processes millions of items therefore never accumulates more persisted
//! state than one params record, one status snapshot and one heartbeat per
//! activity.
//!
//! # Building blocks
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`persistence`] | Run and heartbeat records (SQLite or in-memory) |
//! | [`supervisor`] | Drives executions, persists continuations, resumes runs |
//! | [`heartbeat`] | Activity progress cursors plus the progress event stream |
//! | [`retry`] | Retry policy with exponential backoff |
//! | [`status`] | Non-blocking status snapshots for queries |
//! | [`child`] | Exactly-once child tasks that outlive an execution |
//!
//! # Example
//!
//! ```ignore
//! let persistence = Arc::new(SqlitePersistence::from_path(&config.database_path).await?);
//! let supervisor = Supervisor::new(MyWorkflow::new(), persistence, &config);
//! let handle = supervisor.start("run-1", params).await?;
//! println!("{:?}", handle.status());
//! handle.wait().await?;
//! ```

#![deny(missing_docs)]

pub mod child;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod migrations;
pub mod persistence;
pub mod retry;
pub mod status;
pub mod supervisor;

pub use child::{ChildHandle, ChildRegistry};
pub use config::{ConfigError, EngineConfig};
pub use error::{EngineError, Result, RunError};
pub use heartbeat::{Heartbeat, ProgressEvent};
pub use persistence::{
    HeartbeatRecord, MemoryPersistence, Persistence, RunRecord, RunStatus, SqlitePersistence,
};
pub use retry::{RetryConfig, RetryStrategy, Retryable, retry};
pub use status::StatusBoard;
pub use supervisor::{ExecutionContext, ExecutionReport, RunHandle, Step, Supervisor, Workflow};
