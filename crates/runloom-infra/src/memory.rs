//! In-memory workflow state store.
//!
//! All records live in `DashMap`s keyed the way a relational schema would
//! key them: runs by id, steps by `(run_id, step_id)`, one pending approval
//! and at most one lease per run. Suitable for tests and single-process
//! deployments; durability across restarts requires an external backend.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use runloom_core::WorkflowStore;
use runloom_types::error::StoreError;
use runloom_types::run::{PendingApproval, RunPatch, RunStatus, WorkflowRun, WorkflowStep};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Lease {
    owner: Uuid,
    expires_at: DateTime<Utc>,
}

/// Concurrent in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    runs: DashMap<Uuid, WorkflowRun>,
    steps: DashMap<(Uuid, String), WorkflowStep>,
    approvals: DashMap<Uuid, PendingApproval>,
    leases: DashMap<Uuid, Lease>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowStore for MemoryStore {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        if self.runs.contains_key(&run.id) {
            return Err(StoreError::Conflict(format!(
                "run {} already exists",
                run.id
            )));
        }
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, StoreError> {
        Ok(self.runs.get(run_id).map(|entry| entry.value().clone()))
    }

    async fn update_run(&self, run_id: &Uuid, patch: RunPatch) -> Result<(), StoreError> {
        let mut run = self.runs.get_mut(run_id).ok_or(StoreError::NotFound)?;
        if let Some(status) = patch.status {
            run.status = status;
        }
        if let Some(output) = patch.output {
            run.output = Some(output);
        }
        if let Some(error) = patch.error {
            run.error = Some(error);
        }
        if let Some(step_id) = patch.current_step_id {
            run.current_step_id = Some(step_id);
        }
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn list_suspended_runs(
        &self,
        workflow_name: Option<&str>,
    ) -> Result<Vec<WorkflowRun>, StoreError> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .iter()
            .filter(|entry| entry.status == RunStatus::Suspended)
            .filter(|entry| workflow_name.is_none_or(|name| entry.workflow_name == name))
            .map(|entry| entry.value().clone())
            .collect();
        runs.sort_by_key(|run| run.created_at);
        Ok(runs)
    }

    async fn get_step(
        &self,
        run_id: &Uuid,
        step_id: &str,
    ) -> Result<Option<WorkflowStep>, StoreError> {
        Ok(self
            .steps
            .get(&(*run_id, step_id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn upsert_step(&self, step: &WorkflowStep) -> Result<(), StoreError> {
        self.steps
            .insert((step.run_id, step.step_id.clone()), step.clone());
        Ok(())
    }

    async fn list_run_steps(&self, run_id: &Uuid) -> Result<Vec<WorkflowStep>, StoreError> {
        let mut steps: Vec<WorkflowStep> = self
            .steps
            .iter()
            .filter(|entry| entry.run_id == *run_id)
            .map(|entry| entry.value().clone())
            .collect();
        steps.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.step_id.cmp(&b.step_id))
        });
        Ok(steps)
    }

    async fn put_pending_approval(&self, approval: &PendingApproval) -> Result<(), StoreError> {
        self.approvals.insert(approval.run_id, approval.clone());
        Ok(())
    }

    async fn take_pending_approval(
        &self,
        run_id: &Uuid,
    ) -> Result<Option<PendingApproval>, StoreError> {
        Ok(self.approvals.remove(run_id).map(|(_, approval)| approval))
    }

    async fn acquire_lease(
        &self,
        run_id: &Uuid,
        owner: Uuid,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();
        let mut acquired = true;
        self.leases
            .entry(*run_id)
            .and_modify(|lease| {
                if lease.owner == owner || lease.expires_at <= now {
                    *lease = Lease { owner, expires_at };
                } else {
                    acquired = false;
                }
            })
            .or_insert(Lease { owner, expires_at });
        Ok(acquired)
    }

    async fn release_lease(&self, run_id: &Uuid, owner: Uuid) -> Result<(), StoreError> {
        self.leases
            .remove_if(run_id, |_, lease| lease.owner == owner);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
