// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for replicator-migration tests.
//!
//! Provides MockCluster, a scripted in-process stand-in for every
//! collaborator of a migration, plus helpers to build migrations on it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use replicator_engine::{EngineConfig, RetryConfig, RetryStrategy};
use replicator_migration::client::{
    ClientResult, CountWorkflowRequest, GenerateReplicationTasksRequest, ListUserDataRequest,
    ListUserDataResponse, ListWorkflowsRequest, ListWorkflowsResponse, MetadataProvider,
    MetadataRequest, MetadataResponse, NamespaceDescriber, ReplicationPublisher,
    ReplicationTaskGenerator, ReplicationVerifier, TaskQueueUserDataEntry, UserDataLister,
    UserDataReplicationTask, VerifyReplicationTasksRequest, VerifyReplicationTasksResponse,
    WorkflowCounter, WorkflowExecution, WorkflowLister,
};
use replicator_migration::{ClientError, Collaborators, ForceReplication, PageToken};

pub const NAMESPACE: &str = "test-ns";
pub const NAMESPACE_ID: &str = "test-ns-id";
pub const TARGET_ENDPOINT: &str = "test-target-endpoint";

/// Pages served by token; `None` keys the first page.
type Script<T> = HashMap<Option<PageToken>, T>;

/// Scripted source and target cluster.
pub struct MockCluster {
    pub count: u64,
    pub count_error: Option<ClientError>,
    pub metadata: MetadataResponse,
    pub list_error: Option<ClientError>,
    /// Latency of every list call.
    pub list_delay: Option<Duration>,
    pub generate_error: Option<ClientError>,
    /// Error returned by the first generate call only.
    pub generate_fail_once: Mutex<Option<ClientError>>,
    /// Verified count per page; `None` verifies every execution.
    pub verified_per_page: Option<u64>,
    pub verify_error: Option<ClientError>,
    pub describe_error: Option<ClientError>,
    /// Task queue whose first publish fails.
    pub publish_fail_once: Mutex<Option<String>>,

    workflow_pages: Script<ListWorkflowsResponse>,
    user_data_pages: Script<ListUserDataResponse>,

    pub count_calls: AtomicU32,
    pub metadata_calls: AtomicU32,
    pub generate_calls: AtomicU32,
    pub verify_calls: AtomicU32,
    pub describe_calls: AtomicU32,
    pub list_requests: Mutex<Vec<Option<PageToken>>>,
    pub user_data_requests: Mutex<Vec<Option<PageToken>>>,
    pub generated: Mutex<Vec<GenerateReplicationTasksRequest>>,
    pub published: Mutex<Vec<String>>,
}

impl Default for MockCluster {
    fn default() -> Self {
        let mut user_data_pages = HashMap::new();
        user_data_pages.insert(None, ListUserDataResponse::default());
        Self {
            count: 0,
            count_error: None,
            metadata: MetadataResponse {
                shard_count: 4,
                namespace_id: NAMESPACE_ID.to_string(),
            },
            list_error: None,
            list_delay: None,
            generate_error: None,
            generate_fail_once: Mutex::new(None),
            verified_per_page: None,
            verify_error: None,
            describe_error: None,
            publish_fail_once: Mutex::new(None),
            workflow_pages: HashMap::new(),
            user_data_pages,
            count_calls: AtomicU32::new(0),
            metadata_calls: AtomicU32::new(0),
            generate_calls: AtomicU32::new(0),
            verify_calls: AtomicU32::new(0),
            describe_calls: AtomicU32::new(0),
            list_requests: Mutex::new(Vec::new()),
            user_data_requests: Mutex::new(Vec::new()),
            generated: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        }
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `pages` pages of `per_page` executions, the first one at
    /// `first_token`. Page `i` (from 1) links to `page-token-i`; the last
    /// page has no next token.
    pub fn with_workflow_pages(
        mut self,
        pages: usize,
        per_page: usize,
        first_token: Option<&str>,
    ) -> Self {
        let mut token = first_token.map(PageToken::from);
        for page in 1..=pages {
            let next = (page < pages).then(|| page_token(page));
            let executions = (0..per_page)
                .map(|i| WorkflowExecution::new(format!("wf-{}-{}", page, i), "run"))
                .collect();
            self.workflow_pages.insert(
                token.clone(),
                ListWorkflowsResponse {
                    executions,
                    next_page_token: next.clone(),
                    last_start_time: Some(start_time(page)),
                    last_close_time: Some(close_time(page)),
                },
            );
            token = next;
        }
        self
    }

    /// Serve user-data pages, each a list of task queue names.
    pub fn with_user_data_pages(mut self, pages: &[&[&str]]) -> Self {
        self.user_data_pages.clear();
        let mut token = None;
        for (i, queues) in pages.iter().enumerate() {
            let next = (i + 1 < pages.len())
                .then(|| PageToken::from(format!("ud-{}", i + 1).as_str()));
            self.user_data_pages.insert(
                token.clone(),
                ListUserDataResponse {
                    entries: queues.iter().map(|q| TaskQueueUserDataEntry::new(*q)).collect(),
                    // The last page reports an empty token rather than none.
                    next_page_token: Some(next.clone().unwrap_or_else(|| PageToken::from(""))),
                },
            );
            token = next;
        }
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    pub fn list_calls(&self) -> Vec<Option<PageToken>> {
        self.list_requests.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            counter: self.clone(),
            metadata: self.clone(),
            lister: self.clone(),
            generator: self.clone(),
            verifier: self.clone(),
            namespaces: self.clone(),
            user_data: self.clone(),
            publisher: self.clone(),
        }
    }
}

pub fn page_token(page: usize) -> PageToken {
    PageToken::from(format!("page-token-{}", page).as_str())
}

pub fn start_time(page: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, page as u32, 0)
        .single()
        .unwrap_or_default()
}

pub fn close_time(page: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 2, 0, page as u32, 0)
        .single()
        .unwrap_or_default()
}

/// Retry policy with `max_retries` retries and a 1ms pause.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::new(max_retries, 1, RetryStrategy::Fixed)
}

pub fn engine_config() -> EngineConfig {
    EngineConfig::default().with_activity_retry(fast_retry(2))
}

/// Migration over `cluster` with fast retry policies.
pub fn migration(cluster: &Arc<MockCluster>) -> ForceReplication {
    ForceReplication::from_config(cluster.collaborators(), &engine_config())
}

#[async_trait]
impl WorkflowCounter for MockCluster {
    async fn count_workflow(&self, request: CountWorkflowRequest) -> ClientResult<u64> {
        assert_eq!(request.namespace, NAMESPACE);
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        match &self.count_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.count),
        }
    }
}

#[async_trait]
impl MetadataProvider for MockCluster {
    async fn get_metadata(&self, _request: MetadataRequest) -> ClientResult<MetadataResponse> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.metadata.clone())
    }
}

#[async_trait]
impl WorkflowLister for MockCluster {
    async fn list_workflows(
        &self,
        request: ListWorkflowsRequest,
    ) -> ClientResult<ListWorkflowsResponse> {
        self.list_requests
            .lock()
            .unwrap()
            .push(request.next_page_token.clone());
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = &self.list_error {
            return Err(e.clone());
        }
        self.workflow_pages
            .get(&request.next_page_token)
            .cloned()
            .ok_or_else(|| ClientError::terminal("unknown page token"))
    }
}

#[async_trait]
impl ReplicationTaskGenerator for MockCluster {
    async fn generate_replication_tasks(
        &self,
        request: GenerateReplicationTasksRequest,
    ) -> ClientResult<()> {
        assert_eq!(request.namespace_id, NAMESPACE_ID);
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.generated.lock().unwrap().push(request);
        if let Some(e) = self.generate_fail_once.lock().unwrap().take() {
            return Err(e);
        }
        match &self.generate_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReplicationVerifier for MockCluster {
    async fn verify_replication_tasks(
        &self,
        request: VerifyReplicationTasksRequest,
    ) -> ClientResult<VerifyReplicationTasksResponse> {
        assert_eq!(request.target_cluster_endpoint, TARGET_ENDPOINT);
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.verify_error {
            return Err(e.clone());
        }
        Ok(VerifyReplicationTasksResponse {
            verified_workflow_count: self
                .verified_per_page
                .unwrap_or(request.executions.len() as u64),
        })
    }
}

#[async_trait]
impl NamespaceDescriber for MockCluster {
    async fn describe_namespace(&self, namespace: &str) -> ClientResult<String> {
        assert_eq!(namespace, NAMESPACE);
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        match &self.describe_error {
            Some(e) => Err(e.clone()),
            None => Ok(NAMESPACE_ID.to_string()),
        }
    }
}

#[async_trait]
impl UserDataLister for MockCluster {
    async fn list_task_queue_user_data(
        &self,
        request: ListUserDataRequest,
    ) -> ClientResult<ListUserDataResponse> {
        assert_eq!(request.namespace_id, NAMESPACE_ID);
        self.user_data_requests
            .lock()
            .unwrap()
            .push(request.next_page_token.clone());
        self.user_data_pages
            .get(&request.next_page_token)
            .cloned()
            .ok_or_else(|| ClientError::terminal("unknown user data page token"))
    }
}

#[async_trait]
impl ReplicationPublisher for MockCluster {
    async fn publish(&self, task: UserDataReplicationTask) -> ClientResult<()> {
        let queue = task.entry.task_queue;
        self.published.lock().unwrap().push(queue.clone());
        let mut fail_once = self.publish_fail_once.lock().unwrap();
        if fail_once.as_deref() == Some(queue.as_str()) {
            *fail_once = None;
            return Err(ClientError::retryable(format!("mock publish error: {}", queue)));
        }
        Ok(())
    }
}
