//! Workflow engine: run lifecycle, lease ownership, suspend/resume.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use runloom_types::error::{EngineError, StepError};
use runloom_types::run::{RunPatch, RunStatus, StepStatus, WorkflowRun, WorkflowStep};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::{ReplayPort, StepContext};
use crate::graph_executor::GraphExecutor;
use crate::invoke::TargetInvoker;
use crate::registry::{WorkflowKind, WorkflowRegistry};
use crate::step_runner::{StepRunner, StepSpec};
use crate::store::WorkflowStore;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine tuning knobs, deserializable from configuration files.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock ceiling for one drive of a run, in seconds.
    pub run_timeout_secs: u64,
    /// Per-attempt step timeout, in seconds.
    pub step_timeout_secs: u64,
    /// Run lease time-to-live, in seconds. Expired leases are reclaimable.
    pub lease_ttl_secs: u64,
    /// How long to wait for a contended lease before giving up, in seconds.
    pub lease_acquire_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: 1800,
            step_timeout_secs: 300,
            lease_ttl_secs: 60,
            lease_acquire_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn lease_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_acquire_timeout_secs)
    }
}

/// Result of driving a run as far as it can currently go.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Drives workflow runs: starts them, resumes suspended ones, cancels
/// in-flight ones. Holds a lease on any run it is driving so two executors
/// never advance the same run concurrently.
pub struct WorkflowEngine<S> {
    store: Arc<S>,
    registry: Arc<WorkflowRegistry>,
    runner: Arc<StepRunner<S>>,
    graph: Arc<GraphExecutor<S>>,
    config: EngineConfig,
    /// Identity used as lease owner.
    worker_id: Uuid,
    /// Cancellation tokens for runs currently being driven here.
    cancellations: DashMap<Uuid, CancellationToken>,
}

impl<S: WorkflowStore + 'static> WorkflowEngine<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<WorkflowRegistry>,
        invoker: Arc<dyn TargetInvoker>,
        config: EngineConfig,
    ) -> Self {
        let runner = Arc::new(StepRunner::new(
            Arc::clone(&store),
            invoker,
            config.step_timeout(),
        ));
        let graph = Arc::new(GraphExecutor::new(Arc::clone(&runner)));
        Self {
            store,
            registry,
            runner,
            graph,
            config,
            worker_id: Uuid::now_v7(),
            cancellations: DashMap::new(),
        }
    }

    /// Start a new run of the named workflow and drive it until it
    /// completes, suspends, or fails.
    pub async fn start(&self, name: &str, input: Value) -> Result<ExecutionOutcome, EngineError> {
        let kind = self
            .registry
            .get(name)
            .ok_or_else(|| EngineError::UnknownWorkflow(name.to_string()))?;

        let run = WorkflowRun::new(name, input.clone());
        let run_id = run.id;
        self.store.create_run(&run).await?;
        tracing::info!(run_id = %run_id, workflow = name, "run started");

        self.acquire_lease_blocking(run_id).await?;
        let result = self.drive(run_id, &kind, input).await;
        self.finish(run_id, result).await
    }

    /// Resume a suspended run with an approval payload.
    ///
    /// The pending approval is consumed, the waiting suspension checkpoint
    /// is completed with the payload as its result, and the workflow is
    /// re-driven from the top with completed steps replaying from the
    /// store.
    pub async fn resume(
        &self,
        run_id: Uuid,
        approval_payload: Option<Value>,
    ) -> Result<ExecutionOutcome, EngineError> {
        let run = self
            .store
            .get_run(&run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))?;
        if run.status != RunStatus::Suspended {
            return Err(EngineError::ResumeState {
                run_id,
                status: run.status,
            });
        }
        let kind = self
            .registry
            .get(&run.workflow_name)
            .ok_or_else(|| EngineError::UnknownWorkflow(run.workflow_name.clone()))?;

        self.acquire_lease_blocking(run_id).await?;

        let approval = self.store.take_pending_approval(&run_id).await?;
        self.complete_suspension_checkpoint(run_id, approval_payload)
            .await?;
        self.store
            .update_run(&run_id, RunPatch::status(RunStatus::Running))
            .await?;
        tracing::info!(
            run_id = %run_id,
            workflow = run.workflow_name.as_str(),
            reason = approval.as_ref().map(|a| a.reason.as_str()).unwrap_or(""),
            "run resuming"
        );

        let result = self.drive(run_id, &kind, run.input).await;
        self.finish(run_id, result).await
    }

    /// Re-drive a run left `Running` by a crashed worker.
    ///
    /// Succeeds once the run's lease is free or expired; completed steps
    /// replay from the store, so execution continues from wherever the
    /// crash interrupted it.
    pub async fn recover(&self, run_id: Uuid) -> Result<ExecutionOutcome, EngineError> {
        let run = self
            .store
            .get_run(&run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))?;
        if run.status != RunStatus::Running {
            return Err(EngineError::ResumeState {
                run_id,
                status: run.status,
            });
        }
        let kind = self
            .registry
            .get(&run.workflow_name)
            .ok_or_else(|| EngineError::UnknownWorkflow(run.workflow_name.clone()))?;

        self.acquire_lease_blocking(run_id).await?;
        tracing::info!(
            run_id = %run_id,
            workflow = run.workflow_name.as_str(),
            "recovering interrupted run"
        );

        let result = self.drive(run_id, &kind, run.input).await;
        self.finish(run_id, result).await
    }

    /// Cancel an in-flight run driven by this engine.
    pub async fn cancel(&self, run_id: Uuid) -> Result<(), EngineError> {
        let token = self
            .cancellations
            .get(&run_id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::RunNotFound(run_id))?;
        token.cancel();
        let run = self
            .store
            .get_run(&run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))?;
        if !run.status.is_terminal() {
            self.store
                .update_run(&run_id, RunPatch::status(RunStatus::Cancelled))
                .await?;
        }
        tracing::info!(run_id = %run_id, "run cancelled");
        Ok(())
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<WorkflowRun, EngineError> {
        self.store
            .get_run(&run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))
    }

    pub async fn get_run_steps(&self, run_id: Uuid) -> Result<Vec<WorkflowStep>, EngineError> {
        Ok(self.store.list_run_steps(&run_id).await?)
    }

    /// Suspended runs awaiting approval, optionally filtered by workflow
    /// name.
    pub async fn list_suspended_runs(
        &self,
        workflow_name: Option<&str>,
    ) -> Result<Vec<WorkflowRun>, EngineError> {
        Ok(self.store.list_suspended_runs(workflow_name).await?)
    }

    // -- internals --------------------------------------------------------

    /// Execute the workflow body under the run timeout.
    async fn drive(
        &self,
        run_id: Uuid,
        kind: &WorkflowKind,
        input: Value,
    ) -> Result<Value, EngineError> {
        let cancel = CancellationToken::new();
        self.cancellations.insert(run_id, cancel.clone());

        let body = async {
            match kind {
                WorkflowKind::Imperative(handler) => {
                    let port: Arc<dyn ReplayPort> = Arc::new(EnginePort {
                        runner: Arc::clone(&self.runner),
                        cancel: cancel.clone(),
                    });
                    let ctx = StepContext::new(run_id, input, port);
                    handler(ctx).await.map_err(EngineError::Step)
                }
                WorkflowKind::Graph(def) => {
                    Arc::clone(&self.graph)
                        .execute(Arc::clone(def), run_id, input, cancel.clone())
                        .await
                }
            }
        };

        let result = match tokio::time::timeout(self.config.run_timeout(), body).await {
            Ok(result) => result,
            Err(_elapsed) => Err(EngineError::RunTimeout),
        };
        self.cancellations.remove(&run_id);
        // A body that ignored the token and finished anyway must not win
        // over an issued cancellation; Cancelled is terminal.
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        result
    }

    /// Persist the terminal (or suspended) run state and release the lease.
    async fn finish(
        &self,
        run_id: Uuid,
        result: Result<Value, EngineError>,
    ) -> Result<ExecutionOutcome, EngineError> {
        let outcome = match result {
            Ok(output) => {
                self.store
                    .update_run(&run_id, RunPatch::completed(output.clone()))
                    .await?;
                tracing::info!(run_id = %run_id, "run completed");
                Ok(ExecutionOutcome {
                    run_id,
                    status: RunStatus::Completed,
                    output: Some(output),
                    error: None,
                })
            }
            Err(EngineError::Step(StepError::Suspended { reason })) => {
                self.store
                    .update_run(&run_id, RunPatch::status(RunStatus::Suspended))
                    .await?;
                Ok(ExecutionOutcome {
                    run_id,
                    status: RunStatus::Suspended,
                    output: None,
                    error: Some(reason),
                })
            }
            Err(err @ (EngineError::Cancelled | EngineError::Step(StepError::Cancelled))) => {
                // Run record already marked cancelled by `cancel`.
                Err(err)
            }
            Err(err) => {
                let message = err.to_string();
                self.store
                    .update_run(&run_id, RunPatch::failed(message.clone()))
                    .await?;
                tracing::warn!(run_id = %run_id, error = message.as_str(), "run failed");
                Err(err)
            }
        };
        self.store.release_lease(&run_id, self.worker_id).await?;
        outcome
    }

    /// Mark the waiting suspension checkpoint as completed so replay passes
    /// through it.
    async fn complete_suspension_checkpoint(
        &self,
        run_id: Uuid,
        payload: Option<Value>,
    ) -> Result<(), EngineError> {
        let steps = self.store.list_run_steps(&run_id).await?;
        for mut step in steps {
            if step.status == StepStatus::Suspended {
                step.status = StepStatus::Succeeded;
                step.result = Some(payload.clone().unwrap_or(Value::Null));
                step.completed_at = Some(Utc::now());
                self.store.upsert_step(&step).await?;
            }
        }
        Ok(())
    }

    /// Acquire the run lease, retrying until the acquire timeout. Expired
    /// leases of crashed workers are reclaimed by the store.
    async fn acquire_lease_blocking(&self, run_id: Uuid) -> Result<(), EngineError> {
        let deadline = tokio::time::Instant::now() + self.config.lease_acquire_timeout();
        loop {
            if self
                .store
                .acquire_lease(&run_id, self.worker_id, self.config.lease_ttl())
                .await?
            {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::LeaseUnavailable(run_id));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

// ---------------------------------------------------------------------------
// EnginePort
// ---------------------------------------------------------------------------

/// [`ReplayPort`] the engine hands to imperative workflow contexts.
struct EnginePort<S> {
    runner: Arc<StepRunner<S>>,
    cancel: CancellationToken,
}

impl<S: WorkflowStore + 'static> ReplayPort for EnginePort<S> {
    fn execute_step(
        &self,
        run_id: Uuid,
        spec: StepSpec,
    ) -> BoxFuture<'_, Result<Value, StepError>> {
        Box::pin(async move { self.runner.execute(run_id, spec, &self.cancel).await })
    }

    fn sleep_step(
        &self,
        run_id: Uuid,
        step_id: String,
        duration: Duration,
    ) -> BoxFuture<'_, Result<(), StepError>> {
        Box::pin(async move {
            self.runner
                .sleep(run_id, &step_id, duration, &self.cancel)
                .await
        })
    }

    fn suspend_run(
        &self,
        run_id: Uuid,
        ordinal: u32,
        reason: String,
    ) -> BoxFuture<'_, Result<(), StepError>> {
        Box::pin(async move {
            let checkpoint_id = format!("suspend:{ordinal}");
            self.runner
                .suspend(run_id, &checkpoint_id, &reason)
                .await
                .map(|_| ())
        })
    }
}
