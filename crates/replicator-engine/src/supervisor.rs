// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run supervisor with continue-as-new.
//!
//! A run is driven as a sequence of executions. Each execution receives
//! its params, does a bounded amount of work, and either completes or asks
//! to continue as new with successor params. The successor params are
//! persisted as the run's only continuation record and then decoded again,
//! so the next execution starts from exactly what a restarted process
//! would read. Nothing else crosses the boundary.
//!
//! ```text
//!   start(params) ──► create_run ──► execution 0 ──► ContinueAsNew(p1)
//!                                                        │ save_continuation
//!                                         execution 1 ◄──┘
//!                                              │
//!                                          Complete ──► complete_run
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::config::EngineConfig;
use crate::error::{EngineError, RunError};
use crate::heartbeat::{Heartbeat, ProgressEvent};
use crate::persistence::{Persistence, RunStatus};
use crate::status::StatusBoard;

/// What an execution asks the supervisor to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<P> {
    /// The run is finished.
    Complete,
    /// Start a fresh execution with these params.
    ContinueAsNew(P),
}

/// A durable, continuable unit of orchestration.
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Input and continuation record.
    type Params: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    /// Query-exposed status.
    type Status: Serialize + Clone + Default + Send + Sync + 'static;
    /// Execution failure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stable identifier stored with each run.
    fn kind(&self) -> &'static str;

    /// Run one execution.
    async fn execute(
        &self,
        ctx: &ExecutionContext<Self::Status>,
        params: Self::Params,
    ) -> Result<Step<Self::Params>, Self::Error>;
}

/// Per-execution handle given to a workflow.
pub struct ExecutionContext<S> {
    run_id: String,
    execution: i64,
    status: StatusBoard<S>,
    persistence: Arc<dyn Persistence>,
    progress: broadcast::Sender<ProgressEvent>,
    cancel: CancellationToken,
}

impl<S> ExecutionContext<S>
where
    S: Serialize + Clone + Send + Sync + 'static,
{
    /// Run this execution belongs to.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Execution number, 0 for the first one.
    pub fn execution(&self) -> i64 {
        self.execution
    }

    /// Status board answering status queries for the run.
    pub fn status(&self) -> &StatusBoard<S> {
        &self.status
    }

    /// Heartbeat handle for an activity of this run.
    pub fn heartbeat<T>(&self, activity_id: &str) -> Heartbeat<T>
    where
        T: Serialize + DeserializeOwned,
    {
        Heartbeat::new(
            self.persistence.clone(),
            self.progress.clone(),
            self.run_id.clone(),
            activity_id,
        )
    }

    /// Persistence backing the run.
    pub fn persistence(&self) -> Arc<dyn Persistence> {
        self.persistence.clone()
    }

    /// Progress stream heartbeats are emitted on.
    pub fn progress(&self) -> broadcast::Sender<ProgressEvent> {
        self.progress.clone()
    }

    /// Token cancelled when the run is cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Persist the current status snapshot so it survives the process.
    pub async fn checkpoint_status(&self) -> Result<(), EngineError> {
        let snapshot = encode("status snapshot", &self.status.snapshot())?;
        self.persistence
            .save_status_snapshot(&self.run_id, &snapshot)
            .await
    }
}

/// Result of a single execution run through [`Supervisor::execute_once`].
#[derive(Debug)]
pub struct ExecutionReport<P, S, E> {
    /// What the execution returned.
    pub outcome: Result<Step<P>, E>,
    /// Status snapshot at the end of the execution.
    pub status: S,
}

/// Drives runs of one workflow kind.
pub struct Supervisor<W: Workflow> {
    workflow: Arc<W>,
    persistence: Arc<dyn Persistence>,
    progress: broadcast::Sender<ProgressEvent>,
}

impl<W: Workflow> Clone for Supervisor<W> {
    fn clone(&self) -> Self {
        Self {
            workflow: self.workflow.clone(),
            persistence: self.persistence.clone(),
            progress: self.progress.clone(),
        }
    }
}

impl<W: Workflow> Supervisor<W> {
    /// Create a supervisor for `workflow`.
    pub fn new(workflow: W, persistence: Arc<dyn Persistence>, config: &EngineConfig) -> Self {
        let (progress, _) = broadcast::channel(config.progress_channel_capacity.max(1));
        Self {
            workflow: Arc::new(workflow),
            persistence,
            progress,
        }
    }

    /// The supervised workflow.
    pub fn workflow(&self) -> &W {
        &self.workflow
    }

    /// Persistence backing the runs.
    pub fn persistence(&self) -> Arc<dyn Persistence> {
        self.persistence.clone()
    }

    /// Subscribe to heartbeats recorded by any run of this supervisor.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Persist a new run and start driving it.
    #[instrument(skip(self, params), fields(kind = self.workflow.kind()))]
    pub async fn start(
        &self,
        run_id: &str,
        params: W::Params,
    ) -> Result<RunHandle<W>, EngineError> {
        let bytes = encode("params", &params)?;
        self.persistence
            .create_run(run_id, self.workflow.kind(), &bytes)
            .await?;
        info!(run_id, "Run created");
        Ok(self.spawn_driver(run_id.to_string(), 0, params))
    }

    /// Re-attach to a run from its persisted continuation record.
    #[instrument(skip(self), fields(kind = self.workflow.kind()))]
    pub async fn resume(&self, run_id: &str) -> Result<RunHandle<W>, EngineError> {
        let run = self
            .persistence
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound {
                run_id: run_id.to_string(),
            })?;

        if run.kind != self.workflow.kind() {
            return Err(EngineError::InvalidRunState {
                run_id: run_id.to_string(),
                expected: format!("kind {}", self.workflow.kind()),
                actual: format!("kind {}", run.kind),
            });
        }
        if run.run_status().is_none_or(|s| s.is_terminal()) {
            return Err(EngineError::InvalidRunState {
                run_id: run_id.to_string(),
                expected: "pending or running".to_string(),
                actual: run.status,
            });
        }

        let params: W::Params = decode("params", &run.params)?;
        info!(run_id, execution = run.execution, "Resuming run");
        Ok(self.spawn_driver(run.run_id, run.execution, params))
    }

    /// Run a single execution without touching the run record.
    pub async fn execute_once(
        &self,
        run_id: &str,
        execution: i64,
        params: W::Params,
    ) -> ExecutionReport<W::Params, W::Status, W::Error> {
        let ctx = self.context(
            run_id.to_string(),
            execution,
            StatusBoard::default(),
            CancellationToken::new(),
        );
        let outcome = self.workflow.execute(&ctx, params).await;
        ExecutionReport {
            outcome,
            status: ctx.status.snapshot(),
        }
    }

    fn context(
        &self,
        run_id: String,
        execution: i64,
        status: StatusBoard<W::Status>,
        cancel: CancellationToken,
    ) -> ExecutionContext<W::Status> {
        ExecutionContext {
            run_id,
            execution,
            status,
            persistence: self.persistence.clone(),
            progress: self.progress.clone(),
            cancel,
        }
    }

    fn spawn_driver(&self, run_id: String, execution: i64, params: W::Params) -> RunHandle<W> {
        let status = StatusBoard::default();
        let cancel = CancellationToken::new();
        let driver = self.clone();
        let join = tokio::spawn(driver.drive(
            run_id.clone(),
            execution,
            params,
            status.clone(),
            cancel.clone(),
        ));
        RunHandle {
            run_id,
            status,
            cancel,
            join,
        }
    }

    async fn drive(
        self,
        run_id: String,
        mut execution: i64,
        mut params: W::Params,
        status: StatusBoard<W::Status>,
        cancel: CancellationToken,
    ) -> Result<(), RunError<W::Error>> {
        let kind = self.workflow.kind();
        self.persistence
            .update_run_status(&run_id, RunStatus::Running)
            .await?;

        loop {
            info!(run_id = %run_id, execution, kind, "Execution started");
            let ctx = self.context(run_id.clone(), execution, status.clone(), cancel.clone());

            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                outcome = self.workflow.execute(&ctx, params) => Some(outcome),
            };
            let snapshot = encode("status snapshot", &status.snapshot())?;

            match outcome {
                None => {
                    info!(run_id = %run_id, execution, "Run cancelled");
                    self.persistence
                        .complete_run(&run_id, Some(&snapshot), Some("cancelled"))
                        .await?;
                    return Err(RunError::Aborted("cancelled".to_string()));
                }
                Some(Ok(Step::ContinueAsNew(next))) => {
                    let bytes = encode("params", &next)?;
                    execution += 1;
                    self.persistence
                        .save_continuation(&run_id, execution, &bytes, Some(&snapshot))
                        .await?;
                    params = decode("params", &bytes)?;
                    info!(run_id = %run_id, execution, "Continued as new");
                }
                Some(Ok(Step::Complete)) => {
                    self.persistence
                        .complete_run(&run_id, Some(&snapshot), None)
                        .await?;
                    info!(run_id = %run_id, execution, "Run completed");
                    return Ok(());
                }
                Some(Err(e)) => {
                    let message = e.to_string();
                    error!(run_id = %run_id, execution, error = %message, "Run failed");
                    self.persistence
                        .complete_run(&run_id, Some(&snapshot), Some(&message))
                        .await?;
                    return Err(RunError::Workflow(e));
                }
            }
        }
    }
}

/// Handle to a run driven in the background.
pub struct RunHandle<W: Workflow> {
    run_id: String,
    status: StatusBoard<W::Status>,
    cancel: CancellationToken,
    join: JoinHandle<Result<(), RunError<W::Error>>>,
}

impl<W: Workflow> RunHandle<W> {
    /// ID of the run.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Current status snapshot. Never waits on the run.
    pub fn status(&self) -> W::Status {
        self.status.snapshot()
    }

    /// Receiver notified on every status change.
    pub fn watch_status(&self) -> tokio::sync::watch::Receiver<W::Status> {
        self.status.subscribe()
    }

    /// Request cancellation of the current execution.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<(), RunError<W::Error>> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(RunError::Aborted(e.to_string())),
        }
    }
}

fn encode<T: Serialize>(context: &str, value: &T) -> Result<Vec<u8>, EngineError> {
    serde_json::to_vec(value).map_err(|e| EngineError::serialization(context, e))
}

fn decode<T: DeserializeOwned>(context: &str, bytes: &[u8]) -> Result<T, EngineError> {
    serde_json::from_slice(bytes).map_err(|e| EngineError::serialization(context, e))
}
