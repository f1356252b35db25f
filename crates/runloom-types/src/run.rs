//! Run and step execution records.
//!
//! `WorkflowRun` is one execution of a workflow definition; `WorkflowStep`
//! is one step occurrence within a run. Both are persisted through the
//! engine's state store on every transition, which is what makes crashed
//! runs resumable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
///
/// Transitions are monotonic and one-directional except the
/// Running <-> Suspended pair, which may cycle any number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Whether a transition from `self` to `to` is legal.
    pub fn can_transition(self, to: RunStatus) -> bool {
        match self {
            RunStatus::Running => !matches!(to, RunStatus::Running),
            RunStatus::Suspended => {
                matches!(to, RunStatus::Running | RunStatus::Cancelled | RunStatus::Failed)
            }
            _ => false,
        }
    }
}

/// Status of an individual step occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    /// Awaiting a retry delay; `scheduled_at` holds the next attempt time.
    Scheduled,
    Succeeded,
    Failed,
    Suspended,
}

// ---------------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------------

/// A single execution instance of a workflow.
///
/// Invariants: `output` is set iff `status == Completed`; `error` is set iff
/// `status == Failed`. The engine is the only writer while it holds the
/// run's lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// UUIDv7 run ID, generated at start.
    pub id: Uuid,
    /// Name of the workflow definition being executed.
    pub workflow_name: String,
    /// Current run status.
    pub status: RunStatus,
    /// The trigger input the run was started with.
    pub input: Value,
    /// Final output, present only once the run completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Terminal error message, present only once the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last step the engine touched (informational; resume never uses it as
    /// a program counter).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When the run record was last written.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Create a fresh `Running` record for a new run.
    pub fn new(workflow_name: impl Into<String>, input: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workflow_name: workflow_name.into(),
            status: RunStatus::Running,
            input,
            output: None,
            error: None,
            current_step_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied to a run record.
///
/// `None` fields are left untouched by the store.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub current_step_id: Option<String>,
}

impl RunPatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn completed(output: Value) -> Self {
        Self {
            status: Some(RunStatus::Completed),
            output: Some(output),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(RunStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowStep
// ---------------------------------------------------------------------------

/// One step occurrence within a run, keyed by `(run_id, step_id)`.
///
/// A step is never re-executed once `status == Succeeded`; on replay its
/// persisted `result` is returned directly. `attempt_count` never exceeds
/// the configured `retries + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Owning run.
    pub run_id: Uuid,
    /// Step name (imperative) or node id (graph). Unique within the run.
    pub step_id: String,
    /// Deterministic identity hash; detects contract drift across replay.
    pub step_hash: String,
    /// Version-qualified target function identifier (`name@N`).
    pub target_name: String,
    /// Current step status.
    pub status: StepStatus,
    /// 1-based number of attempts made so far.
    pub attempt_count: u32,
    /// Result value, present iff the step succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Terminal error, present iff the step failed with retries exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Next attempt time while `status == Scheduled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When the first attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStep {
    /// Create a `Pending` record for a step about to run its first attempt.
    pub fn pending(
        run_id: Uuid,
        step_id: impl Into<String>,
        step_hash: impl Into<String>,
        target_name: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            step_id: step_id.into(),
            step_hash: step_hash.into(),
            target_name: target_name.into(),
            status: StepStatus::Pending,
            attempt_count: 0,
            result: None,
            error: None,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// PendingApproval
// ---------------------------------------------------------------------------

/// Suspension payload for a run awaiting external approval.
///
/// Exists only while the run is `Suspended`; consumed (deleted) by resume.
/// A later suspend replaces any prior pending approval for the same run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub run_id: Uuid,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

impl PendingApproval {
    pub fn new(run_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            run_id,
            reason: reason.into(),
            requested_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
