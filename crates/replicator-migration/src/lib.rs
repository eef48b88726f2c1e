// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replicator Migration - resumable force-replication of a namespace.
//!
//! Replicates every workflow execution of a namespace, and every
//! task-queue user-data entry, from a source cluster to a target cluster.
//! The migration runs on [`replicator_engine`] as a sequence of bounded
//! executions: each one scans a fixed number of pages and then continues
//! as new with the updated [`MigrationParams`], so arbitrarily large
//! namespaces never grow the persisted state of the run.
//!
//! # Components
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`workflow`] | State machine: validate, count, scan, continue or finish |
//! | [`scanner`] | Sequential page fetching in source order |
//! | [`pipeline`] | Generate and verify calls for one page |
//! | [`throttle`] | Concurrency gate, token bucket, adaptive rate estimate |
//! | [`seed`] | Heartbeat-resumable task-queue user-data seeding |
//! | [`client`] | One trait per remote operation the migration consumes |
//!
//! # Example
//!
//! ```ignore
//! let supervisor = Supervisor::new(ForceReplication::new(collaborators), persistence, &config);
//! let mut params = MigrationParams::new("orders", "target.example:7233");
//! params.concurrent_activity_count = 4;
//! params.enable_verification = true;
//! let handle = supervisor.start("orders-migration", params).await?;
//! handle.wait().await?;
//! ```

#![deny(missing_docs)]

pub mod client;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod scanner;
pub mod seed;
pub mod throttle;
pub mod token;
pub mod workflow;

pub use client::Collaborators;
pub use error::{ClientError, MigrationError, Result};
pub use params::{MigrationParams, MigrationPhase, MigrationStatus, UserDataParams, UserDataStatus};
pub use seed::{SEED_ACTIVITY_ID, SeedHeartbeat, UserDataSeeder};
pub use token::PageToken;
pub use workflow::{FORCE_REPLICATION_KIND, ForceReplication};
