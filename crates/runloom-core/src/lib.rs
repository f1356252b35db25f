//! Durable workflow orchestration engine.
//!
//! Runloom executes multi-step business processes defined either
//! imperatively (hand-written async functions calling named remote steps) or
//! declaratively (a node graph with data-flow bindings and branching), with
//! durability across process restarts, bounded retries with backoff, and
//! explicit suspension/resumption for human-in-the-loop approval.
//!
//! The engine's core guarantee is replay safety: every step occurrence has a
//! stable identity, its result is persisted before the run advances, and a
//! re-entered run returns persisted results instead of re-invoking targets.
//!
//! This crate contains the engine only. Persistence is behind the
//! [`WorkflowStore`] trait, target invocation behind [`TargetInvoker`];
//! concrete backends live outside (see `runloom-infra` for in-process
//! implementations).

pub mod binding;
pub mod context;
pub mod engine;
pub mod graph_executor;
pub mod identity;
pub mod invoke;
pub mod registry;
pub mod retry;
pub mod step_runner;
pub mod store;

pub use context::{ReplayPort, StepContext};
pub use engine::{EngineConfig, ExecutionOutcome, WorkflowEngine};
pub use invoke::TargetInvoker;
pub use registry::{RegistryError, WorkflowKind, WorkflowRegistry};
pub use step_runner::{StepRunner, StepSpec};
pub use store::WorkflowStore;
