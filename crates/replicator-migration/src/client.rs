// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Collaborator interfaces.
//!
//! The migration talks to the source and target clusters only through the
//! traits in this module, one per remote operation. Network clients,
//! persistence engines and wire formats live behind them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::token::PageToken;

/// Result type for collaborator calls.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Identity of one workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Workflow ID.
    pub workflow_id: String,
    /// Run ID.
    pub run_id: String,
}

impl WorkflowExecution {
    /// Create an execution identity.
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

/// Request to count the workflows matching a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountWorkflowRequest {
    /// Namespace name.
    pub namespace: String,
    /// Visibility query.
    pub query: String,
}

/// Request for cluster metadata of a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRequest {
    /// Namespace name.
    pub namespace: String,
}

/// Cluster metadata used to size the rate estimate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataResponse {
    /// Number of history shards of the source cluster.
    pub shard_count: i32,
    /// Namespace identity.
    pub namespace_id: String,
}

/// Request for one page of workflow executions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListWorkflowsRequest {
    /// Namespace name.
    pub namespace: String,
    /// Visibility query.
    pub query: String,
    /// Maximum executions per page.
    pub page_size: usize,
    /// Token of the page to fetch; `None` for the first page.
    pub next_page_token: Option<PageToken>,
}

/// One page of workflow executions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListWorkflowsResponse {
    /// Executions on the page, possibly none.
    pub executions: Vec<WorkflowExecution>,
    /// Token of the next page; `None` on the last page.
    pub next_page_token: Option<PageToken>,
    /// Start time of the last item the source looked at.
    pub last_start_time: Option<DateTime<Utc>>,
    /// Close time of the last item the source looked at.
    pub last_close_time: Option<DateTime<Utc>>,
}

/// Request to generate replication tasks for a page of executions.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateReplicationTasksRequest {
    /// Namespace identity.
    pub namespace_id: String,
    /// Executions to replicate.
    pub executions: Vec<WorkflowExecution>,
    /// Target cluster name.
    pub target_cluster_name: String,
    /// Per-call rate budget.
    pub rps: f64,
    /// Rate budget for parent-info lookups.
    pub get_parent_info_rps: f64,
    /// Whether to verify that parent workflows are replicated first.
    pub enable_parent_info_check: bool,
}

/// Request to verify that a page of executions reached the target.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyReplicationTasksRequest {
    /// Namespace name.
    pub namespace: String,
    /// Namespace identity.
    pub namespace_id: String,
    /// Target cluster endpoint.
    pub target_cluster_endpoint: String,
    /// Target cluster name.
    pub target_cluster_name: String,
    /// Pause between verification rounds.
    pub verify_interval: Duration,
    /// Executions to verify.
    pub executions: Vec<WorkflowExecution>,
}

/// Outcome of a verification call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyReplicationTasksResponse {
    /// Executions confirmed on the target.
    pub verified_workflow_count: u64,
}

/// One task-queue user-data entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueueUserDataEntry {
    /// Task queue name.
    pub task_queue: String,
    /// Opaque user data blob.
    pub user_data: Vec<u8>,
    /// Version of the user data.
    pub version: i64,
}

impl TaskQueueUserDataEntry {
    /// Entry for `task_queue` with empty data.
    pub fn new(task_queue: impl Into<String>) -> Self {
        Self {
            task_queue: task_queue.into(),
            user_data: Vec::new(),
            version: 0,
        }
    }
}

/// Request for one page of task-queue user data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListUserDataRequest {
    /// Namespace identity.
    pub namespace_id: String,
    /// Maximum entries per page.
    pub page_size: usize,
    /// Token of the page to fetch; `None` for the first page.
    pub next_page_token: Option<PageToken>,
}

/// One page of task-queue user data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListUserDataResponse {
    /// Entries on the page.
    pub entries: Vec<TaskQueueUserDataEntry>,
    /// Token of the next page; `None` on the last page.
    pub next_page_token: Option<PageToken>,
}

/// A user-data replication task published to the replication channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDataReplicationTask {
    /// Namespace identity.
    pub namespace_id: String,
    /// The entry being replicated.
    pub entry: TaskQueueUserDataEntry,
}

/// Counts workflows matching a query.
#[async_trait]
pub trait WorkflowCounter: Send + Sync {
    /// Total number of matching workflows.
    async fn count_workflow(&self, request: CountWorkflowRequest) -> ClientResult<u64>;
}

/// Reads cluster metadata.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Shard count and namespace identity.
    async fn get_metadata(&self, request: MetadataRequest) -> ClientResult<MetadataResponse>;
}

/// Lists workflow executions page by page.
#[async_trait]
pub trait WorkflowLister: Send + Sync {
    /// Fetch one page.
    async fn list_workflows(
        &self,
        request: ListWorkflowsRequest,
    ) -> ClientResult<ListWorkflowsResponse>;
}

/// Generates replication tasks on the source cluster.
#[async_trait]
pub trait ReplicationTaskGenerator: Send + Sync {
    /// Generate tasks for every execution in the request.
    async fn generate_replication_tasks(
        &self,
        request: GenerateReplicationTasksRequest,
    ) -> ClientResult<()>;
}

/// Verifies replicated executions on the target cluster.
#[async_trait]
pub trait ReplicationVerifier: Send + Sync {
    /// Verify the executions in the request.
    async fn verify_replication_tasks(
        &self,
        request: VerifyReplicationTasksRequest,
    ) -> ClientResult<VerifyReplicationTasksResponse>;
}

/// Resolves namespace identities.
#[async_trait]
pub trait NamespaceDescriber: Send + Sync {
    /// Namespace ID for a namespace name.
    async fn describe_namespace(&self, namespace: &str) -> ClientResult<String>;
}

/// Lists task-queue user data page by page.
#[async_trait]
pub trait UserDataLister: Send + Sync {
    /// Fetch one page.
    async fn list_task_queue_user_data(
        &self,
        request: ListUserDataRequest,
    ) -> ClientResult<ListUserDataResponse>;
}

/// Publishes replication tasks to the replication channel.
///
/// Consumers must tolerate the same task being published twice.
#[async_trait]
pub trait ReplicationPublisher: Send + Sync {
    /// Publish one task.
    async fn publish(&self, task: UserDataReplicationTask) -> ClientResult<()>;
}

/// Every collaborator a migration needs.
#[derive(Clone)]
pub struct Collaborators {
    /// Workflow counting.
    pub counter: Arc<dyn WorkflowCounter>,
    /// Cluster metadata.
    pub metadata: Arc<dyn MetadataProvider>,
    /// Execution listing.
    pub lister: Arc<dyn WorkflowLister>,
    /// Replication task generation.
    pub generator: Arc<dyn ReplicationTaskGenerator>,
    /// Replication verification.
    pub verifier: Arc<dyn ReplicationVerifier>,
    /// Namespace lookup.
    pub namespaces: Arc<dyn NamespaceDescriber>,
    /// User-data listing.
    pub user_data: Arc<dyn UserDataLister>,
    /// Replication channel.
    pub publisher: Arc<dyn ReplicationPublisher>,
}
