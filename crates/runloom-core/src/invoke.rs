//! Target invocation seam.
//!
//! The engine treats "invoke named function with input, get output or
//! error" as an opaque capability: the transport (in-process call, queue
//! job, remote RPC) is outside its scope. The trait is object-safe with
//! manually boxed futures so executors can hold it as `Arc<dyn
//! TargetInvoker>` without knowing the backing transport.

use std::future::Future;
use std::pin::Pin;

use runloom_types::error::InvokeError;
use runloom_types::target::FunctionCatalog;
use serde_json::Value;

/// Boxed future returned by dyn-compatible invoker methods.
pub type InvokeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Value, InvokeError>> + Send + 'a>>;

/// Opaque capability to call the function identified by a step's target
/// name. Implementations also expose the function catalog the identity
/// resolver stamps versions from.
pub trait TargetInvoker: Send + Sync {
    /// Invoke `target` (possibly version-qualified) with `input`.
    fn invoke(&self, target: &str, input: Value) -> InvokeFuture<'_>;

    /// Version and schema metadata for known targets.
    fn catalog(&self) -> &FunctionCatalog;
}
