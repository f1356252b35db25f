//! Workflow state store trait definition.
//!
//! Defines the persistence interface the engine requires: run records, step
//! records, suspension payloads, and the run-ownership lease. Concrete
//! backends (in-memory, SQL, key-value) implement this trait outside the
//! engine; any store with atomic per-record read/write and a lease
//! primitive qualifies.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use std::time::Duration;

use runloom_types::error::StoreError;
use runloom_types::run::{PendingApproval, RunPatch, WorkflowRun, WorkflowStep};
use uuid::Uuid;

/// Storage port consumed by the engine.
///
/// Every operation must be atomic for the record it touches: a run or step
/// update is all-or-nothing. The lease operations provide the "exactly one
/// writer per run" guarantee described in the concurrency model; leases
/// carry a TTL so a crashed worker's run can be reclaimed.
pub trait WorkflowStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Create a new run record. Fails with `Conflict` if the id exists.
    fn create_run(
        &self,
        run: &WorkflowRun,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Get a run by id.
    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, StoreError>> + Send;

    /// Apply a partial update to a run record; `None` fields are untouched.
    /// Bumps `updated_at`.
    fn update_run(
        &self,
        run_id: &Uuid,
        patch: RunPatch,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// List runs currently suspended, optionally filtered by workflow name.
    fn list_suspended_runs(
        &self,
        workflow_name: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Get one step occurrence by `(run_id, step_id)`.
    fn get_step(
        &self,
        run_id: &Uuid,
        step_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowStep>, StoreError>> + Send;

    /// Insert or replace a step record keyed by `(run_id, step_id)`.
    fn upsert_step(
        &self,
        step: &WorkflowStep,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// List all step records for a run, ordered by `started_at` ascending.
    fn list_run_steps(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowStep>, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Suspension payloads
    // -----------------------------------------------------------------------

    /// Record the pending approval for a suspended run, replacing any prior
    /// one for the same run.
    fn put_pending_approval(
        &self,
        approval: &PendingApproval,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Consume (read and delete) the pending approval for a run, if any.
    fn take_pending_approval(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<PendingApproval>, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Run ownership lease
    // -----------------------------------------------------------------------

    /// Try to acquire the run's lease for `owner` with the given TTL.
    /// Returns `true` on success (including re-acquiring one's own lease or
    /// claiming an expired one), `false` while a live lease is held by
    /// another owner.
    fn acquire_lease(
        &self,
        run_id: &Uuid,
        owner: Uuid,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Release the lease if `owner` holds it; releasing a lease one does not
    /// hold is a no-op.
    fn release_lease(
        &self,
        run_id: &Uuid,
        owner: Uuid,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}
