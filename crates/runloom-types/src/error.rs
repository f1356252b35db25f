//! Error taxonomy shared by the engine and its storage backends.

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::run::RunStatus;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors from state-store operations (used by the trait defined in
/// runloom-core; implemented by external backends).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors surfaced by step execution inside a run.
#[derive(Debug, Error)]
pub enum StepError {
    /// A target invocation threw; retryable up to the step's budget.
    #[error("step target '{target}' failed: {message}")]
    Execution { target: String, message: String },

    /// Terminal form once the attempt budget is spent; fails the run unless
    /// caught by workflow-authored compensation or a graph `on_error`.
    #[error("step '{step_id}' failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        step_id: String,
        attempts: u32,
        message: String,
    },

    /// A step's recorded hash disagrees with the one recomputed at replay:
    /// the target's contract changed underneath a live run. Never retried,
    /// never silently replayed.
    #[error(
        "step '{step_id}' contract changed since the run was created \
         (recorded hash {recorded}, computed {computed})"
    )]
    VersionMismatch {
        step_id: String,
        recorded: String,
        computed: String,
    },

    /// Control-flow signal raised by `suspend()` -- not a failure. The
    /// enclosing workflow function forwards it with `?` and the engine
    /// checkpoints the run as suspended.
    #[error("run suspended: {reason}")]
    Suspended { reason: String },

    /// A step attempt exceeded its timeout; counts as a failed attempt.
    #[error("step '{step_id}' timed out")]
    Timeout { step_id: String },

    /// The run was cancelled while the step was in flight.
    #[error("run cancelled")]
    Cancelled,

    /// Persistence failed mid-step.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl StepError {
    /// Whether this error is the suspension signal rather than a failure.
    pub fn is_suspension(&self) -> bool {
        matches!(self, StepError::Suspended { .. })
    }

    /// The suspension reason, if this is the suspension signal.
    pub fn suspension_reason(&self) -> Option<&str> {
        match self {
            StepError::Suspended { reason } => Some(reason),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// GraphError
// ---------------------------------------------------------------------------

/// Graph validation failures. Always fatal to the run, never retried.
#[derive(Debug, Error)]
pub enum GraphError {
    /// `context` names the graph or node holding the dangling reference.
    #[error("'{context}' references unknown node '{node}'")]
    UnknownNode { context: String, node: String },

    #[error("node '{node}' returned unrecognized branch key '{key}'")]
    UnknownBranchKey { node: String, key: String },

    #[error("node '{node}' did not produce a branch key (expected a string output or a 'branch' field)")]
    MissingBranchKey { node: String },

    #[error("node '{node}' uses an item reference outside a per-item fan-out")]
    ItemOutsideFanOut { node: String },

    #[error("fan-out at node '{node}' references a non-collection value")]
    FanOutNotACollection { node: String },

    #[error("graph '{graph}' contains duplicate node id '{node}'")]
    DuplicateNode { graph: String, node: String },

    #[error("graph '{graph}' has no entry nodes")]
    NoEntry { graph: String },

    #[error("graph '{graph}' contains a cycle involving node '{node}'")]
    Cycle { graph: String, node: String },
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Top-level engine failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),

    #[error("workflow run not found: {0}")]
    RunNotFound(Uuid),

    /// `resume` was called on a run that is not suspended.
    #[error("run {run_id} cannot be resumed from status {status:?}")]
    ResumeState { run_id: Uuid, status: RunStatus },

    /// The run's lease is held by another live executor.
    #[error("run {0} is owned by another executor")]
    LeaseUnavailable(Uuid),

    #[error(transparent)]
    Step(#[from] StepError),

    #[error("graph validation error: {0}")]
    Graph(#[from] GraphError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("run exceeded its overall timeout")]
    RunTimeout,

    #[error("run cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// InvokeError
// ---------------------------------------------------------------------------

/// Failure reported by the opaque target-invocation capability.
///
/// Carries an optional structured payload so invokers can pass through
/// machine-readable detail alongside the message.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct InvokeError {
    pub message: String,
    pub detail: Option<Value>,
}

impl InvokeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_error_display() {
        let err = StepError::RetriesExhausted {
            step_id: "charge".to_string(),
            attempts: 3,
            message: "card declined".to_string(),
        };
        assert!(err.to_string().contains("charge"));
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("card declined"));
    }

    #[test]
    fn suspension_is_not_a_failure() {
        let err = StepError::Suspended {
            reason: "Needs approval".to_string(),
        };
        assert!(err.is_suspension());
        assert_eq!(err.suspension_reason(), Some("Needs approval"));

        let err = StepError::Timeout {
            step_id: "slow".to_string(),
        };
        assert!(!err.is_suspension());
        assert!(err.suspension_reason().is_none());
    }

    #[test]
    fn engine_error_display() {
        let run_id = Uuid::nil();
        let err = EngineError::ResumeState {
            run_id,
            status: RunStatus::Running,
        };
        assert!(err.to_string().contains("cannot be resumed"));

        let err = EngineError::UnknownWorkflow("nope".to_string());
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn graph_error_display() {
        let err = GraphError::UnknownBranchKey {
            node: "classify".to_string(),
            key: "unknown-key".to_string(),
        };
        assert!(err.to_string().contains("classify"));
        assert!(err.to_string().contains("unknown-key"));
    }
}
