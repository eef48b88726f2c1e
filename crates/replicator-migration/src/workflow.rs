// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Force-replication migration state machine.
//!
//! ```text
//! Validating ─► Counting ─► (launch user-data seeding, first execution only)
//!                              │
//!                              ▼
//!                          Scanning ──budget spent, pages left──► Continuing ─► ContinueAsNew
//!                              │
//!                       source exhausted
//!                              ▼
//!                          Finishing ─► wait for seeding ─► Completed | Failed
//! ```
//!
//! Scanning is a single control loop: pages are fetched one at a time in
//! source order and each page is handed to a worker; up to
//! `concurrent_activity_count` pages are replicated at once. Finished
//! workers are collected before every fetch, so a failed page aborts the
//! remaining workers and fails the execution before another page is read.
//! A failed page fetch waits for the workers already running and then
//! fails the execution with the fetch error.
//!
//! A failed execution releases its user-data seeding once the seeding has
//! finished; a later attempt relaunches it from its last heartbeat.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use replicator_engine::{
    ChildHandle, ChildRegistry, EngineConfig, ExecutionContext, RetryConfig, StatusBoard, Step,
    Workflow, retry,
};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::client::{Collaborators, CountWorkflowRequest, MetadataRequest};
use crate::error::{ClientError, MigrationError, Result};
use crate::params::{MigrationParams, MigrationPhase, MigrationStatus, UserDataStatus};
use crate::pipeline::{PageOutcome, PagePipeline};
use crate::scanner::PageScanner;
use crate::seed::{SEED_ACTIVITY_ID, SeedHeartbeat, UserDataSeeder};
use crate::throttle::{ConcurrencyGate, RateEstimator};
use crate::token::{PageToken, normalize};

/// Run kind stored for force-replication migrations.
pub const FORCE_REPLICATION_KIND: &str = "force-replication";

/// The force-replication migration.
pub struct ForceReplication {
    collaborators: Collaborators,
    seeder: Arc<UserDataSeeder>,
    children: ChildRegistry<UserDataStatus>,
    activity_retry: RetryConfig,
    seed_retry: RetryConfig,
}

impl ForceReplication {
    /// Migration over the given collaborators with default retry policies.
    pub fn new(collaborators: Collaborators) -> Self {
        let seeder = Arc::new(UserDataSeeder::from_collaborators(&collaborators));
        Self {
            collaborators,
            seeder,
            children: ChildRegistry::new(),
            activity_retry: RetryConfig::default(),
            seed_retry: RetryConfig::default(),
        }
    }

    /// Migration using the engine's activity retry policy for every call.
    pub fn from_config(collaborators: Collaborators, config: &EngineConfig) -> Self {
        Self::new(collaborators)
            .with_activity_retry(config.activity_retry.clone())
            .with_seed_retry(config.activity_retry.clone())
    }

    /// Set the retry policy of count, metadata, list, generate and verify calls.
    pub fn with_activity_retry(mut self, retry: RetryConfig) -> Self {
        self.activity_retry = retry;
        self
    }

    /// Set the retry policy of the user-data seeding.
    pub fn with_seed_retry(mut self, retry: RetryConfig) -> Self {
        self.seed_retry = retry;
        self
    }

    /// Fetch the total count and cluster metadata not carried in the params.
    ///
    /// Returns whether the metadata was fetched in this call.
    async fn count_and_fetch_metadata(&self, params: &mut MigrationParams) -> Result<bool> {
        if params.total_workflow_count == 0 {
            let request = CountWorkflowRequest {
                namespace: params.namespace.clone(),
                query: params.query.clone(),
            };
            let counter = self.collaborators.counter.clone();
            params.total_workflow_count = retry(&self.activity_retry, "CountWorkflow", |_| {
                let counter = counter.clone();
                let request = request.clone();
                async move { counter.count_workflow(request).await }
            })
            .await
            .map_err(|e| MigrationError::activity("CountWorkflow", e))?;
        }

        if params.namespace_id.is_some() {
            return Ok(false);
        }
        let request = MetadataRequest {
            namespace: params.namespace.clone(),
        };
        let metadata = self.collaborators.metadata.clone();
        let response = retry(&self.activity_retry, "GetMetadata", |_| {
            let metadata = metadata.clone();
            let request = request.clone();
            async move { metadata.get_metadata(request).await }
        })
        .await
        .map_err(|e| MigrationError::activity("GetMetadata", e))?;

        params.namespace_id = Some(response.namespace_id);
        params.shard_count = response.shard_count;
        Ok(true)
    }

    /// Start the user-data seeding for this run unless it is already running.
    async fn launch_user_data(
        &self,
        ctx: &ExecutionContext<MigrationStatus>,
        params: &MigrationParams,
    ) -> ChildHandle<UserDataStatus> {
        let seeder = self.seeder.clone();
        let namespace = params.namespace.clone();
        let user_data_params = params.user_data_params.clone();
        let heartbeat = ctx.heartbeat::<SeedHeartbeat>(SEED_ACTIVITY_ID);
        let seed_retry = self.seed_retry.clone();

        let (handle, spawned) = self
            .children
            .spawn(ctx.run_id(), async move {
                seeder
                    .run(&namespace, &user_data_params, &heartbeat, &seed_retry)
                    .await
            })
            .await;
        if spawned {
            info!(run_id = ctx.run_id(), "User data replication launched");
        }
        handle
    }

    /// Wait for the user-data seeding to reach a terminal state.
    ///
    /// A seeding lost with a previous process is relaunched from its last
    /// heartbeat.
    async fn await_user_data(
        &self,
        ctx: &ExecutionContext<MigrationStatus>,
        params: &MigrationParams,
    ) -> UserDataStatus {
        if params.user_data_status.done {
            return params.user_data_status.clone();
        }
        let handle = match self.children.get(ctx.run_id()).await {
            Some(handle) => handle,
            None => {
                warn!(
                    run_id = ctx.run_id(),
                    "User data replication not running, relaunching from last heartbeat"
                );
                self.launch_user_data(ctx, params).await
            }
        };
        let status = ChildRegistry::wait(handle).await.unwrap_or_else(|| {
            UserDataStatus::failed("user data replication ended without a result")
        });
        self.children.remove(ctx.run_id()).await;
        status
    }

    async fn refresh_user_data_status(&self, run_id: &str, params: &mut MigrationParams) {
        refresh_user_data_status(&self.children, run_id, params).await;
    }

    /// Publish `Failed` and let go of the seeding of a failed execution.
    async fn fail_before_scan(
        &self,
        ctx: &ExecutionContext<MigrationStatus>,
        params: &MigrationParams,
        restart_token: Option<PageToken>,
        err: MigrationError,
    ) -> MigrationError {
        ctx.status().publish(MigrationStatus::from_params(
            params,
            MigrationPhase::Failed,
            restart_token,
        ));
        self.children.release(ctx.run_id()).await;
        err
    }
}

async fn refresh_user_data_status(
    children: &ChildRegistry<UserDataStatus>,
    run_id: &str,
    params: &mut MigrationParams,
) {
    if let Some(status) = children.peek(run_id).await {
        params.user_data_status = status;
    }
}

/// Live state of one execution's scan.
struct ScanState<'a> {
    run_id: &'a str,
    params: MigrationParams,
    board: &'a StatusBoard<MigrationStatus>,
    children: &'a ChildRegistry<UserDataStatus>,
    restart_token: Option<PageToken>,
    estimator: RateEstimator,
    gate: Arc<ConcurrencyGate>,
}

impl ScanState<'_> {
    fn publish(&self, phase: MigrationPhase) {
        self.board.publish(MigrationStatus::from_params(
            &self.params,
            phase,
            self.restart_token.clone(),
        ));
    }

    async fn apply(&mut self, outcome: PageOutcome) {
        let params = &mut self.params;
        params.replicated_workflow_count += outcome.verified;
        params
            .throughput_window
            .record(params.replicated_workflow_count, Utc::now());
        params.replicated_workflow_count_per_second = params.throughput_window.per_second();

        self.estimator
            .observe(params.replicated_workflow_count_per_second);
        self.gate.set_rate(self.estimator.aggregate_rps()).await;
        refresh_user_data_status(self.children, self.run_id, &mut self.params).await;
        self.publish(MigrationPhase::Scanning);
    }

    async fn fail(&self, err: MigrationError) -> MigrationError {
        self.publish(MigrationPhase::Failed);
        self.children.release(self.run_id).await;
        err
    }
}

fn page_result(joined: std::result::Result<Result<PageOutcome>, JoinError>) -> Result<PageOutcome> {
    joined.unwrap_or_else(|e| {
        Err(MigrationError::activity(
            "ReplicatePage",
            ClientError::terminal(e.to_string()),
        ))
    })
}

/// Count a finished page into the scan state.
async fn collect(
    state: &mut ScanState<'_>,
    joined: std::result::Result<Result<PageOutcome>, JoinError>,
) -> Result<()> {
    state.apply(page_result(joined)?).await;
    Ok(())
}

/// Stop every page worker and fail the execution.
async fn abort(
    state: &ScanState<'_>,
    jobs: &mut JoinSet<Result<PageOutcome>>,
    err: MigrationError,
) -> MigrationError {
    state.gate.close();
    jobs.shutdown().await;
    state.fail(err).await
}

/// Persist the status snapshot; runs driven outside the store skip it.
async fn checkpoint(ctx: &ExecutionContext<MigrationStatus>) {
    if let Err(e) = ctx.checkpoint_status().await {
        debug!(run_id = ctx.run_id(), error = %e, "Status checkpoint skipped");
    }
}

#[async_trait]
impl Workflow for ForceReplication {
    type Params = MigrationParams;
    type Status = MigrationStatus;
    type Error = MigrationError;

    fn kind(&self) -> &'static str {
        FORCE_REPLICATION_KIND
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext<MigrationStatus>,
        mut params: MigrationParams,
    ) -> Result<Step<MigrationParams>> {
        let board = ctx.status();
        let restart_token = normalize(params.next_page_token.clone());
        board.publish(MigrationStatus::from_params(
            &params,
            MigrationPhase::Validating,
            restart_token.clone(),
        ));

        if let Err(e) = params.validate_and_apply_defaults() {
            return Err(self.fail_before_scan(ctx, &params, restart_token, e).await);
        }
        info!(
            run_id = ctx.run_id(),
            namespace = %params.namespace,
            continued_as_new_count = params.continued_as_new_count,
            "Force replication execution started"
        );

        board.publish(MigrationStatus::from_params(
            &params,
            MigrationPhase::Counting,
            restart_token.clone(),
        ));
        let fetched_metadata = match self.count_and_fetch_metadata(&mut params).await {
            Ok(fetched) => fetched,
            Err(e) => {
                return Err(self.fail_before_scan(ctx, &params, restart_token, e).await);
            }
        };

        if params.continued_as_new_count == 0 {
            self.launch_user_data(ctx, &params).await;
        }
        self.refresh_user_data_status(ctx.run_id(), &mut params)
            .await;

        let concurrency = params.concurrent_activity_count;
        let mut estimator = RateEstimator::new(
            params.overall_rps,
            concurrency,
            params.estimation_multiplier,
        );
        if fetched_metadata && params.estimation_multiplier <= 0.0 {
            estimator.seed_from_shards(params.shard_count);
        }
        let gate = Arc::new(ConcurrencyGate::new(concurrency, estimator.aggregate_rps()));
        let pipeline = Arc::new(PagePipeline::new(
            self.collaborators.generator.clone(),
            self.collaborators.verifier.clone(),
            gate.clone(),
            self.activity_retry.clone(),
            &params,
        ));
        let mut scanner = PageScanner::new(
            self.collaborators.lister.clone(),
            &params,
            self.activity_retry.clone(),
        );

        let mut state = ScanState {
            run_id: ctx.run_id(),
            params,
            board,
            children: &self.children,
            restart_token,
            estimator,
            gate,
        };
        state.publish(MigrationPhase::Scanning);

        let budget = state.params.page_count_per_execution;
        let mut jobs: JoinSet<Result<PageOutcome>> = JoinSet::new();
        let mut pages = 0usize;
        let mut scan_error = None;

        while pages < budget {
            while let Some(joined) = jobs.try_join_next() {
                if let Err(e) = collect(&mut state, joined).await {
                    return Err(abort(&state, &mut jobs, e).await);
                }
            }
            while jobs.len() >= concurrency {
                let Some(joined) = jobs.join_next().await else {
                    break;
                };
                if let Err(e) = collect(&mut state, joined).await {
                    return Err(abort(&state, &mut jobs, e).await);
                }
            }

            let page = match scanner.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    scan_error = Some(e);
                    break;
                }
            };

            if page.last_start_time.is_some() {
                state.params.last_start_time = page.last_start_time;
            }
            if page.last_close_time.is_some() {
                state.params.last_close_time = page.last_close_time;
            }
            let rps = state.estimator.per_call_rps();
            let pipeline = pipeline.clone();
            let index = pages;
            jobs.spawn(async move { pipeline.process(index, page.executions, rps).await });
            pages += 1;
        }

        if let Some(scan_error) = scan_error {
            while let Some(joined) = jobs.join_next().await {
                match page_result(joined) {
                    Ok(outcome) => state.apply(outcome).await,
                    Err(e) => debug!(error = %e, "Page failed after scan error"),
                }
            }
            return Err(state.fail(scan_error).await);
        }

        while let Some(joined) = jobs.join_next().await {
            if let Err(e) = collect(&mut state, joined).await {
                return Err(abort(&state, &mut jobs, e).await);
            }
        }

        state.params.estimation_multiplier = state.estimator.multiplier();
        state.params.next_page_token = scanner.next_page_token().cloned();
        self.refresh_user_data_status(ctx.run_id(), &mut state.params)
            .await;

        if !scanner.is_exhausted() {
            state.params.continued_as_new_count += 1;
            state.publish(MigrationPhase::Continuing);
            checkpoint(ctx).await;
            info!(
                run_id = ctx.run_id(),
                pages,
                replicated = state.params.replicated_workflow_count,
                continued_as_new_count = state.params.continued_as_new_count,
                "Continuing as new"
            );
            return Ok(Step::ContinueAsNew(state.params));
        }

        state.restart_token = None;
        state.publish(MigrationPhase::Finishing);
        checkpoint(ctx).await;
        info!(run_id = ctx.run_id(), "Source exhausted, waiting for user data replication");

        let user_data = self.await_user_data(ctx, &state.params).await;
        state.params.user_data_status = user_data.clone();
        if user_data.is_failure() {
            return Err(state
                .fail(MigrationError::UserDataReplication(user_data.failure_message))
                .await);
        }

        if let Err(e) = ctx
            .heartbeat::<SeedHeartbeat>(SEED_ACTIVITY_ID)
            .clear()
            .await
        {
            warn!(error = %e, "Failed to clear user data heartbeat");
        }
        state.publish(MigrationPhase::Completed);
        info!(
            run_id = ctx.run_id(),
            total = state.params.total_workflow_count,
            replicated = state.params.replicated_workflow_count,
            "Force replication completed"
        );
        Ok(Step::Complete)
    }
}
