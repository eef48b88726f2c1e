// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task-queue user-data seeding.
//!
//! Publishes every task-queue user-data entry of a namespace to the
//! replication channel, in source order. Before each publish the cursor of
//! the entry about to be published is recorded as a heartbeat; a retried
//! attempt re-reads that page and restarts at that entry. Entries before
//! the cursor are never published again, the entry at the cursor may be
//! published twice.

use std::sync::Arc;

use replicator_engine::{Heartbeat, RetryConfig, Retryable, retry};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::client::{
    ClientResult, Collaborators, ListUserDataRequest, NamespaceDescriber, ReplicationPublisher,
    UserDataLister, UserDataReplicationTask,
};
use crate::error::ClientError;
use crate::params::{UserDataParams, UserDataStatus};
use crate::throttle::TokenBucket;
use crate::token::{PageToken, normalize};

/// Heartbeat activity ID of the seeding operation.
pub const SEED_ACTIVITY_ID: &str = "seed-user-data";

/// Resume cursor of the seeding operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedHeartbeat {
    /// Token of the page being published; `None` for the first page.
    pub next_page_token: Option<PageToken>,
    /// Index within that page of the entry being published.
    pub index_in_page: usize,
}

/// Seeds the replication channel with task-queue user data.
pub struct UserDataSeeder {
    namespaces: Arc<dyn NamespaceDescriber>,
    lister: Arc<dyn UserDataLister>,
    publisher: Arc<dyn ReplicationPublisher>,
}

impl UserDataSeeder {
    /// Seeder over the given collaborators.
    pub fn new(
        namespaces: Arc<dyn NamespaceDescriber>,
        lister: Arc<dyn UserDataLister>,
        publisher: Arc<dyn ReplicationPublisher>,
    ) -> Self {
        Self {
            namespaces,
            lister,
            publisher,
        }
    }

    /// Seeder over the user-data collaborators of a migration.
    pub fn from_collaborators(collaborators: &Collaborators) -> Self {
        Self::new(
            collaborators.namespaces.clone(),
            collaborators.user_data.clone(),
            collaborators.publisher.clone(),
        )
    }

    /// One attempt, resuming from the last recorded heartbeat.
    pub async fn seed_attempt(
        &self,
        namespace: &str,
        params: &UserDataParams,
        heartbeat: &Heartbeat<SeedHeartbeat>,
    ) -> ClientResult<()> {
        let params = params.with_defaults();
        let namespace_id = self.namespaces.describe_namespace(namespace).await?;
        let limiter = TokenBucket::new(params.rps);

        let cursor = heartbeat
            .last()
            .await
            .map_err(|e| ClientError::retryable(e.to_string()))?
            .unwrap_or_default();
        if cursor != SeedHeartbeat::default() {
            debug!(index = cursor.index_in_page, "Resuming user data seeding");
        }
        let mut page_token = normalize(cursor.next_page_token);
        let mut skip = cursor.index_in_page;

        loop {
            let page = self
                .lister
                .list_task_queue_user_data(ListUserDataRequest {
                    namespace_id: namespace_id.clone(),
                    page_size: params.page_size,
                    next_page_token: page_token.clone(),
                })
                .await?;

            for (index, entry) in page.entries.into_iter().enumerate().skip(skip) {
                heartbeat
                    .record(&SeedHeartbeat {
                        next_page_token: page_token.clone(),
                        index_in_page: index,
                    })
                    .await
                    .map_err(|e| ClientError::retryable(e.to_string()))?;
                limiter.acquire().await;
                self.publisher
                    .publish(UserDataReplicationTask {
                        namespace_id: namespace_id.clone(),
                        entry,
                    })
                    .await?;
            }
            skip = 0;

            match normalize(page.next_page_token) {
                Some(next) => page_token = Some(next),
                None => return Ok(()),
            }
        }
    }

    /// Seed until done, retrying transient failures, and report the outcome.
    pub async fn run(
        &self,
        namespace: &str,
        params: &UserDataParams,
        heartbeat: &Heartbeat<SeedHeartbeat>,
        retry_config: &RetryConfig,
    ) -> UserDataStatus {
        info!(namespace, "User data seeding started");
        let result = retry(retry_config, "SeedReplicationQueueWithUserDataEntries", |attempt| {
            heartbeat.set_attempt(i64::from(attempt));
            self.seed_attempt(namespace, params, heartbeat)
        })
        .await;

        match result {
            Ok(()) => {
                info!(namespace, "User data seeding completed");
                UserDataStatus::succeeded()
            }
            Err(e) => {
                error!(
                    namespace,
                    retryable = e.is_retryable(),
                    error = %e,
                    "User data seeding failed"
                );
                UserDataStatus::failed(e.message)
            }
        }
    }
}
