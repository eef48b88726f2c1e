// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Migration params (the continuation record) and status.
//!
//! [`MigrationParams`] is both the caller's input and the record handed
//! from one execution to the next. Every field is serialized; a missing
//! field decodes to its zero value, and zero values are replaced by
//! defaults during validation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::throttle::ThroughputWindow;
use crate::token::PageToken;

/// Default executions per list page.
pub const DEFAULT_LIST_WORKFLOWS_PAGE_SIZE: usize = 1000;
/// Default pages processed by one execution.
pub const DEFAULT_PAGE_COUNT_PER_EXECUTION: usize = 200;
/// Upper bound of pages processed by one execution.
pub const MAX_PAGE_COUNT_PER_EXECUTION: usize = 1000;
/// Default pause between verification rounds.
pub const DEFAULT_VERIFY_INTERVAL_IN_SECONDS: u64 = 5;
/// Default user-data entries per page.
pub const DEFAULT_USER_DATA_PAGE_SIZE: usize = 20;
/// Default user-data publish rate.
pub const DEFAULT_USER_DATA_RPS: f64 = 1.0;

/// Settings of the user-data sub-migration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserDataParams {
    /// Entries per page; 0 means the default.
    pub page_size: usize,
    /// Publish rate; 0 means the default.
    pub rps: f64,
}

impl UserDataParams {
    /// Copy with defaults filled in.
    pub fn with_defaults(&self) -> Self {
        Self {
            page_size: if self.page_size == 0 {
                DEFAULT_USER_DATA_PAGE_SIZE
            } else {
                self.page_size
            },
            rps: if self.rps <= 0.0 {
                DEFAULT_USER_DATA_RPS
            } else {
                self.rps
            },
        }
    }
}

/// Terminal state of the user-data sub-migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserDataStatus {
    /// Whether the sub-migration finished.
    pub done: bool,
    /// Failure message; empty on success.
    pub failure_message: String,
}

impl UserDataStatus {
    /// Finished successfully.
    pub fn succeeded() -> Self {
        Self {
            done: true,
            failure_message: String::new(),
        }
    }

    /// Finished with a failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            done: true,
            failure_message: message.into(),
        }
    }

    /// Whether it finished with a failure.
    pub fn is_failure(&self) -> bool {
        self.done && !self.failure_message.is_empty()
    }
}

/// Input and continuation record of a force-replication migration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationParams {
    /// Namespace to replicate.
    pub namespace: String,
    /// Visibility query selecting the executions.
    pub query: String,
    /// Maximum outbound calls in flight.
    pub concurrent_activity_count: usize,
    /// Ceiling of the aggregate call rate.
    pub overall_rps: f64,
    /// Rate budget of parent-info lookups.
    pub get_parent_info_rps: f64,
    /// Executions per list page.
    pub list_workflows_page_size: usize,
    /// Pages processed before continuing as new.
    pub page_count_per_execution: usize,
    /// Token of the next page to scan.
    pub next_page_token: Option<PageToken>,
    /// Whether generation checks parent workflows first.
    pub enable_parent_info_check: bool,
    /// Whether each page is verified on the target.
    pub enable_verification: bool,
    /// Target cluster endpoint.
    pub target_cluster_endpoint: String,
    /// Target cluster name.
    pub target_cluster_name: String,
    /// Pause between verification rounds.
    pub verify_interval_in_seconds: u64,
    /// Latest start time seen by the scan.
    pub last_start_time: Option<DateTime<Utc>>,
    /// Latest close time seen by the scan.
    pub last_close_time: Option<DateTime<Utc>>,
    /// Executions completed so far.
    pub continued_as_new_count: u32,
    /// Settings of the user-data sub-migration.
    pub user_data_params: UserDataParams,
    /// Last known state of the user-data sub-migration.
    pub user_data_status: UserDataStatus,
    /// Workflows replicated so far.
    pub replicated_workflow_count: u64,
    /// Workflows to replicate in total.
    pub total_workflow_count: u64,
    /// Recent replication throughput.
    pub replicated_workflow_count_per_second: f64,
    /// Namespace identity, once fetched.
    pub namespace_id: Option<String>,
    /// Shard count of the source cluster, once fetched.
    pub shard_count: i32,
    /// Learned rate multiplier; 0 until first learned.
    pub estimation_multiplier: f64,
    /// Progress samples behind the throughput estimate.
    pub throughput_window: ThroughputWindow,
}

impl MigrationParams {
    /// Params for `namespace` replicating to `target_cluster_endpoint`.
    pub fn new(namespace: impl Into<String>, target_cluster_endpoint: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            target_cluster_endpoint: target_cluster_endpoint.into(),
            ..Self::default()
        }
    }

    /// Reject unusable params and fill zero values with defaults.
    pub fn validate_and_apply_defaults(&mut self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(MigrationError::InvalidArgument(
                "namespace is required".to_string(),
            ));
        }
        if self.target_cluster_endpoint.is_empty() {
            return Err(MigrationError::InvalidArgument(
                "target cluster endpoint is required".to_string(),
            ));
        }

        if self.concurrent_activity_count == 0 {
            self.concurrent_activity_count = 1;
        }
        let concurrency = self.concurrent_activity_count as f64;
        if self.overall_rps <= 0.0 {
            self.overall_rps = concurrency;
        }
        if self.get_parent_info_rps <= 0.0 {
            self.get_parent_info_rps = concurrency;
        }
        if self.list_workflows_page_size == 0 {
            self.list_workflows_page_size = DEFAULT_LIST_WORKFLOWS_PAGE_SIZE;
        }
        if self.page_count_per_execution == 0 {
            self.page_count_per_execution = DEFAULT_PAGE_COUNT_PER_EXECUTION;
        }
        self.page_count_per_execution = self
            .page_count_per_execution
            .min(MAX_PAGE_COUNT_PER_EXECUTION);
        if self.verify_interval_in_seconds == 0 {
            self.verify_interval_in_seconds = DEFAULT_VERIFY_INTERVAL_IN_SECONDS;
        }
        Ok(())
    }

    /// Pause between verification rounds.
    pub fn verify_interval(&self) -> Duration {
        Duration::from_secs(self.verify_interval_in_seconds)
    }
}

/// Phase of the migration state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    /// Checking the params.
    #[default]
    Validating,
    /// Fetching the total count and cluster metadata.
    Counting,
    /// Scanning pages and replicating them.
    Scanning,
    /// Handing over to the next execution.
    Continuing,
    /// Source exhausted; waiting for the user-data sub-migration.
    Finishing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// Query-exposed status of a migration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationStatus {
    /// Current phase.
    pub phase: MigrationPhase,
    /// Executions completed before the current one.
    pub continued_as_new_count: u32,
    /// Workflows to replicate in total.
    pub total_workflow_count: u64,
    /// Workflows replicated so far.
    pub replicated_workflow_count: u64,
    /// Recent replication throughput.
    pub replicated_workflow_count_per_second: f64,
    /// Latest start time seen by the scan.
    pub last_start_time: Option<DateTime<Utc>>,
    /// Latest close time seen by the scan.
    pub last_close_time: Option<DateTime<Utc>>,
    /// Token a restarted migration should scan from; `None` once the
    /// source is exhausted.
    pub page_token_for_restart: Option<PageToken>,
    /// State of the user-data sub-migration.
    pub user_data_status: UserDataStatus,
}

impl MigrationStatus {
    /// Status derived from the live params of an execution.
    pub fn from_params(
        params: &MigrationParams,
        phase: MigrationPhase,
        page_token_for_restart: Option<PageToken>,
    ) -> Self {
        Self {
            phase,
            continued_as_new_count: params.continued_as_new_count,
            total_workflow_count: params.total_workflow_count,
            replicated_workflow_count: params.replicated_workflow_count,
            replicated_workflow_count_per_second: params.replicated_workflow_count_per_second,
            last_start_time: params.last_start_time,
            last_close_time: params.last_close_time,
            page_token_for_restart,
            user_data_status: params.user_data_status.clone(),
        }
    }
}
