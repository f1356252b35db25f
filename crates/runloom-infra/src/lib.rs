//! In-process backends for the Runloom engine.
//!
//! [`MemoryStore`] keeps all run state in concurrent maps; it is the
//! reference [`runloom_core::WorkflowStore`] implementation and the one the
//! engine tests run against. [`InProcessInvoker`] dispatches step targets to
//! registered async closures.

pub mod functions;
pub mod memory;

pub use functions::InProcessInvoker;
pub use memory::MemoryStore;
