//! Step context handed to imperative workflow functions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use runloom_types::error::StepError;
use runloom_types::retry::RetryConfig;
use serde_json::Value;
use uuid::Uuid;

use crate::step_runner::StepSpec;

/// Object-safe seam between workflow-authored code and the engine's
/// replay machinery. Workflow functions never see the store or the
/// invoker directly.
pub trait ReplayPort: Send + Sync {
    fn execute_step(
        &self,
        run_id: Uuid,
        spec: StepSpec,
    ) -> BoxFuture<'_, Result<Value, StepError>>;

    fn sleep_step(
        &self,
        run_id: Uuid,
        step_id: String,
        duration: Duration,
    ) -> BoxFuture<'_, Result<(), StepError>>;

    fn suspend_run(
        &self,
        run_id: Uuid,
        ordinal: u32,
        reason: String,
    ) -> BoxFuture<'_, Result<(), StepError>>;
}

/// Handle an imperative workflow function uses to run steps.
///
/// Every durable effect goes through a named step on this context; plain
/// code between steps must stay deterministic, since the whole function is
/// re-run from the top on resume with completed steps replayed from the
/// store.
#[derive(Clone)]
pub struct StepContext {
    run_id: Uuid,
    input: Value,
    port: Arc<dyn ReplayPort>,
    /// Ordinal counter for suspension checkpoints within one invocation.
    suspend_seq: Arc<AtomicU32>,
}

impl StepContext {
    pub fn new(run_id: Uuid, input: Value, port: Arc<dyn ReplayPort>) -> Self {
        Self {
            run_id,
            input,
            port,
            suspend_seq: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The trigger input the run was started with.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Run a step with the default (no-retry) policy.
    pub async fn run(
        &self,
        step_id: impl Into<String>,
        target: impl Into<String>,
        input: Value,
    ) -> Result<Value, StepError> {
        self.run_with(step_id, target, input, RetryConfig::default())
            .await
    }

    /// Run a step with an explicit retry policy.
    pub async fn run_with(
        &self,
        step_id: impl Into<String>,
        target: impl Into<String>,
        input: Value,
        retry: RetryConfig,
    ) -> Result<Value, StepError> {
        let spec = StepSpec::new(step_id, target, input).with_retry(retry);
        self.port.execute_step(self.run_id, spec).await
    }

    /// Durable delay recorded as a step; replay skips the wait.
    pub async fn sleep(&self, step_id: impl Into<String>, duration: Duration) -> Result<(), StepError> {
        self.port
            .sleep_step(self.run_id, step_id.into(), duration)
            .await
    }

    /// Suspend the run for external approval.
    ///
    /// Returns `Err(StepError::Suspended)` on the first pass, which the
    /// workflow function forwards with `?`. After a resume, the recorded
    /// checkpoint replays as completed and execution proceeds past this
    /// call. Suspension points are identified by call order, so the number
    /// of `suspend` calls before this one must be deterministic.
    pub async fn suspend(&self, reason: impl Into<String>) -> Result<(), StepError> {
        let ordinal = self.suspend_seq.fetch_add(1, Ordering::SeqCst);
        self.port
            .suspend_run(self.run_id, ordinal, reason.into())
            .await
    }
}
