//! Replay-safe step execution.
//!
//! `StepRunner` is the single path through which both executors run a step:
//! it stamps the target version, computes the step's identity hash, replays
//! persisted results where they exist, and otherwise drives attempts through
//! the retry controller, persisting every transition (pending -> running ->
//! scheduled/succeeded/failed) before the run advances. This persistence
//! discipline is what makes crashed runs resumable.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use runloom_types::error::StepError;
use runloom_types::retry::RetryConfig;
use runloom_types::run::{PendingApproval, RunPatch, StepStatus, WorkflowStep};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::identity::{compute_step_hash, schema_hashes, stamp_version};
use crate::invoke::TargetInvoker;
use crate::retry::RetrySchedule;
use crate::store::WorkflowStore;

/// One step occurrence to execute.
#[derive(Debug, Clone)]
pub struct StepSpec {
    /// Step name (imperative) or node id (graph), unique within the run.
    pub step_id: String,
    /// Target function, bare or version-qualified.
    pub target: String,
    /// Resolved input value.
    pub input: Value,
    /// Retry policy; defaults to zero retries.
    pub retry: RetryConfig,
}

impl StepSpec {
    pub fn new(step_id: impl Into<String>, target: impl Into<String>, input: Value) -> Self {
        Self {
            step_id: step_id.into(),
            target: target.into(),
            input,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Executes step occurrences with replay, retry, and durable checkpoints.
///
/// Generic over `S: WorkflowStore` for storage flexibility.
pub struct StepRunner<S> {
    store: Arc<S>,
    invoker: Arc<dyn TargetInvoker>,
    step_timeout: Duration,
}

impl<S: WorkflowStore> StepRunner<S> {
    pub fn new(store: Arc<S>, invoker: Arc<dyn TargetInvoker>, step_timeout: Duration) -> Self {
        Self {
            store,
            invoker,
            step_timeout,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Execute (or replay) one step occurrence.
    ///
    /// A persisted `Succeeded` record with a matching hash short-circuits to
    /// its result without re-invoking the target. A matching record whose
    /// hash differs surfaces [`StepError::VersionMismatch`]. A persisted
    /// terminal failure is replayed as the same failure. Anything else runs
    /// attempts until success or the retry budget is spent.
    pub async fn execute(
        &self,
        run_id: Uuid,
        spec: StepSpec,
        cancel: &CancellationToken,
    ) -> Result<Value, StepError> {
        let catalog = self.invoker.catalog();
        let stamped = stamp_version(&spec.target, catalog);
        let (input_hash, output_hash) = schema_hashes(&stamped, catalog);
        let hash = compute_step_hash(&spec.step_id, &stamped, &input_hash, &output_hash);

        let mut step = match self.store.get_step(&run_id, &spec.step_id).await? {
            Some(existing) => match existing.status {
                StepStatus::Succeeded => {
                    if existing.step_hash != hash {
                        return Err(StepError::VersionMismatch {
                            step_id: spec.step_id,
                            recorded: existing.step_hash,
                            computed: hash,
                        });
                    }
                    tracing::debug!(
                        run_id = %run_id,
                        step_id = spec.step_id.as_str(),
                        "replaying persisted step result"
                    );
                    return Ok(existing.result.unwrap_or(Value::Null));
                }
                StepStatus::Failed => {
                    // Deterministic replay of a recorded terminal failure.
                    return Err(StepError::RetriesExhausted {
                        step_id: existing.step_id,
                        attempts: existing.attempt_count,
                        message: existing.error.unwrap_or_default(),
                    });
                }
                // Interrupted mid-flight; attempts already consumed stay
                // consumed.
                _ => existing,
            },
            None => WorkflowStep::pending(run_id, spec.step_id.clone(), hash.clone(), stamped.clone()),
        };
        step.step_hash = hash;
        step.target_name = stamped.clone();

        self.store
            .update_run(
                &run_id,
                RunPatch {
                    current_step_id: Some(spec.step_id.clone()),
                    ..RunPatch::default()
                },
            )
            .await?;

        let schedule = RetrySchedule::new(spec.retry);
        loop {
            step.attempt_count += 1;
            step.status = StepStatus::Running;
            step.scheduled_at = None;
            if step.started_at.is_none() {
                step.started_at = Some(Utc::now());
            }
            self.store.upsert_step(&step).await?;

            tracing::debug!(
                run_id = %run_id,
                step_id = step.step_id.as_str(),
                target_name = stamped.as_str(),
                attempt = step.attempt_count,
                "step attempt started"
            );

            let invocation = self.invoker.invoke(&stamped, spec.input.clone());
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(StepError::Cancelled),
                res = tokio::time::timeout(self.step_timeout, invocation) => res,
            };

            let message = match outcome {
                Ok(Ok(value)) => {
                    step.status = StepStatus::Succeeded;
                    step.result = Some(value.clone());
                    step.completed_at = Some(Utc::now());
                    self.store.upsert_step(&step).await?;
                    tracing::debug!(
                        run_id = %run_id,
                        step_id = step.step_id.as_str(),
                        attempt = step.attempt_count,
                        "step succeeded"
                    );
                    return Ok(value);
                }
                Ok(Err(err)) => err.to_string(),
                Err(_elapsed) => StepError::Timeout {
                    step_id: step.step_id.clone(),
                }
                .to_string(),
            };

            if schedule.should_retry(step.attempt_count) {
                let delay = schedule.delay_for(step.attempt_count);
                step.status = StepStatus::Scheduled;
                step.scheduled_at = Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
                self.store.upsert_step(&step).await?;
                tracing::warn!(
                    run_id = %run_id,
                    step_id = step.step_id.as_str(),
                    attempt = step.attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    error = message.as_str(),
                    "step attempt failed, retry scheduled"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StepError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            } else {
                step.status = StepStatus::Failed;
                step.error = Some(message.clone());
                step.completed_at = Some(Utc::now());
                self.store.upsert_step(&step).await?;
                tracing::warn!(
                    run_id = %run_id,
                    step_id = step.step_id.as_str(),
                    attempts = step.attempt_count,
                    error = message.as_str(),
                    "step failed, retries exhausted"
                );
                return Err(StepError::RetriesExhausted {
                    step_id: step.step_id,
                    attempts: step.attempt_count,
                    message,
                });
            }
        }
    }

    /// Durable delay: a zero-output step whose result is the elapsed-time
    /// checkpoint, so replay skips re-waiting once recorded.
    pub async fn sleep(
        &self,
        run_id: Uuid,
        step_id: &str,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), StepError> {
        if let Some(existing) = self.store.get_step(&run_id, step_id).await? {
            if existing.status == StepStatus::Succeeded {
                tracing::debug!(
                    run_id = %run_id,
                    step_id,
                    "sleep already elapsed, skipping"
                );
                return Ok(());
            }
        }

        let mut step = WorkflowStep::pending(run_id, step_id, "", "");
        step.status = StepStatus::Scheduled;
        step.attempt_count = 1;
        step.started_at = Some(Utc::now());
        step.scheduled_at =
            Some(Utc::now() + chrono::Duration::from_std(duration).unwrap_or_default());
        self.store.upsert_step(&step).await?;

        tokio::select! {
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            _ = tokio::time::sleep(duration) => {}
        }

        step.status = StepStatus::Succeeded;
        step.scheduled_at = None;
        step.result = Some(serde_json::json!({ "slept_ms": duration.as_millis() as u64 }));
        step.completed_at = Some(Utc::now());
        self.store.upsert_step(&step).await?;
        Ok(())
    }

    /// Suspension checkpoint shared by the imperative `suspend()` primitive
    /// and graph approval nodes.
    ///
    /// Returns the recorded approval payload when the checkpoint was already
    /// completed by a resume (the caller proceeds past it); otherwise
    /// records the checkpoint as `Suspended`, replaces the run's pending
    /// approval, and raises the suspension signal.
    pub async fn suspend(
        &self,
        run_id: Uuid,
        checkpoint_id: &str,
        reason: &str,
    ) -> Result<Value, StepError> {
        if let Some(existing) = self.store.get_step(&run_id, checkpoint_id).await? {
            if existing.status == StepStatus::Succeeded {
                tracing::debug!(
                    run_id = %run_id,
                    checkpoint_id,
                    "suspension checkpoint already approved, proceeding"
                );
                return Ok(existing.result.unwrap_or(Value::Null));
            }
        }

        let mut step = WorkflowStep::pending(run_id, checkpoint_id, "", "");
        step.status = StepStatus::Suspended;
        step.started_at = Some(Utc::now());
        self.store.upsert_step(&step).await?;
        self.store
            .put_pending_approval(&PendingApproval::new(run_id, reason))
            .await?;

        tracing::info!(
            run_id = %run_id,
            checkpoint_id,
            reason,
            "run suspending"
        );
        Err(StepError::Suspended {
            reason: reason.to_string(),
        })
    }
}
