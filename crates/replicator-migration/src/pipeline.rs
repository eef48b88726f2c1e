// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-page replication pipeline.
//!
//! A page is replicated by one generate call and, when verification is
//! enabled, one verify call for the same executions. The two run
//! concurrently; the first terminal failure decides the page's error and
//! the sibling call is dropped. Each call attempt holds a slot of the
//! shared gate for its duration, so retries back off without blocking
//! other pages.

use std::sync::Arc;
use std::time::Duration;

use replicator_engine::{RetryConfig, retry};
use tracing::debug;

use crate::client::{
    GenerateReplicationTasksRequest, ReplicationTaskGenerator, ReplicationVerifier,
    VerifyReplicationTasksRequest, WorkflowExecution,
};
use crate::error::{ClientError, MigrationError, Result};
use crate::params::MigrationParams;
use crate::throttle::ConcurrencyGate;

/// Result of replicating one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOutcome {
    /// Position of the page within the execution, starting at 0.
    pub page: usize,
    /// Executions on the page.
    pub executions: usize,
    /// Executions confirmed replicated.
    pub verified: u64,
}

/// Replicates pages against the shared gate.
pub struct PagePipeline {
    generator: Arc<dyn ReplicationTaskGenerator>,
    verifier: Arc<dyn ReplicationVerifier>,
    gate: Arc<ConcurrencyGate>,
    retry: RetryConfig,
    namespace: String,
    namespace_id: String,
    target_cluster_endpoint: String,
    target_cluster_name: String,
    verify_interval: Duration,
    get_parent_info_rps: f64,
    enable_parent_info_check: bool,
    enable_verification: bool,
}

impl PagePipeline {
    /// Pipeline for the validated params of one execution.
    pub fn new(
        generator: Arc<dyn ReplicationTaskGenerator>,
        verifier: Arc<dyn ReplicationVerifier>,
        gate: Arc<ConcurrencyGate>,
        retry: RetryConfig,
        params: &MigrationParams,
    ) -> Self {
        Self {
            generator,
            verifier,
            gate,
            retry,
            namespace: params.namespace.clone(),
            namespace_id: params.namespace_id.clone().unwrap_or_default(),
            target_cluster_endpoint: params.target_cluster_endpoint.clone(),
            target_cluster_name: params.target_cluster_name.clone(),
            verify_interval: params.verify_interval(),
            get_parent_info_rps: params.get_parent_info_rps,
            enable_parent_info_check: params.enable_parent_info_check,
            enable_verification: params.enable_verification,
        }
    }

    /// Replicate one page, generating at `rps` per call.
    pub async fn process(
        &self,
        page: usize,
        executions: Vec<WorkflowExecution>,
        rps: f64,
    ) -> Result<PageOutcome> {
        let count = executions.len();
        let verified = if self.enable_verification {
            let (_, verified) = tokio::try_join!(
                self.generate(executions.clone(), rps),
                self.verify(executions)
            )?;
            verified
        } else {
            self.generate(executions, rps).await?;
            count as u64
        };

        debug!(page, executions = count, verified, "Page replicated");
        Ok(PageOutcome {
            page,
            executions: count,
            verified,
        })
    }

    async fn generate(&self, executions: Vec<WorkflowExecution>, rps: f64) -> Result<()> {
        let request = GenerateReplicationTasksRequest {
            namespace_id: self.namespace_id.clone(),
            executions,
            target_cluster_name: self.target_cluster_name.clone(),
            rps,
            get_parent_info_rps: self.get_parent_info_rps,
            enable_parent_info_check: self.enable_parent_info_check,
        };
        retry(&self.retry, "GenerateReplicationTasks", |_| {
            let request = request.clone();
            async move {
                let _permit = self.gate.admit().await.map_err(gate_closed)?;
                self.generator.generate_replication_tasks(request).await
            }
        })
        .await
        .map_err(|e| MigrationError::activity("GenerateReplicationTasks", e))
    }

    async fn verify(&self, executions: Vec<WorkflowExecution>) -> Result<u64> {
        let request = VerifyReplicationTasksRequest {
            namespace: self.namespace.clone(),
            namespace_id: self.namespace_id.clone(),
            target_cluster_endpoint: self.target_cluster_endpoint.clone(),
            target_cluster_name: self.target_cluster_name.clone(),
            verify_interval: self.verify_interval,
            executions,
        };
        let response = retry(&self.retry, "VerifyReplicationTasks", |_| {
            let request = request.clone();
            async move {
                let _permit = self.gate.admit().await.map_err(gate_closed)?;
                self.verifier.verify_replication_tasks(request).await
            }
        })
        .await
        .map_err(|e| MigrationError::activity("VerifyReplicationTasks", e))?;
        Ok(response.verified_workflow_count)
    }
}

fn gate_closed(e: crate::throttle::GateClosed) -> ClientError {
    ClientError::terminal(e.to_string())
}
