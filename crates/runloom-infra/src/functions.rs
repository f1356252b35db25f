//! In-process target invoker.
//!
//! Dispatches step targets to async closures registered under a base name,
//! with version metadata recorded in a [`FunctionCatalog`]. Version
//! qualifiers select catalog metadata but all versions of a name dispatch
//! to the same registered closure; hosting multiple live implementations is
//! a deployment concern, not an engine one.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use runloom_core::invoke::{InvokeFuture, TargetInvoker};
use runloom_types::error::InvokeError;
use runloom_types::target::{FunctionCatalog, FunctionMetadata, split_versioned};
use serde_json::Value;

type TargetFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, InvokeError>> + Send + Sync>;

/// Invoker backed by registered async closures.
#[derive(Default)]
pub struct InProcessInvoker {
    targets: HashMap<String, TargetFn>,
    catalog: FunctionCatalog,
}

impl InProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target function under its metadata's base name.
    pub fn register<F, Fut>(&mut self, meta: FunctionMetadata, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, InvokeError>> + Send + 'static,
    {
        let handler: TargetFn = Arc::new(move |input| Box::pin(f(input)));
        tracing::debug!(target_name = meta.name.as_str(), version = meta.version, "target registered");
        self.targets.insert(meta.name.clone(), handler);
        self.catalog.insert(meta);
    }

    /// Shorthand for registering version 1 of a name with no schema hashes.
    pub fn register_simple<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, InvokeError>> + Send + 'static,
    {
        self.register(
            FunctionMetadata {
                name: name.into(),
                version: 1,
                input_schema_hash: String::new(),
                output_schema_hash: String::new(),
            },
            f,
        );
    }
}

impl TargetInvoker for InProcessInvoker {
    fn invoke(&self, target: &str, input: Value) -> InvokeFuture<'_> {
        let (base, _version) = split_versioned(target);
        match self.targets.get(base) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                Box::pin(async move { handler(input).await })
            }
            None => {
                let target = target.to_string();
                Box::pin(async move {
                    Err(InvokeError::new(format!("unknown target '{target}'")))
                })
            }
        }
    }

    fn catalog(&self) -> &FunctionCatalog {
        &self.catalog
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn dispatches_by_base_name() {
        let mut invoker = InProcessInvoker::new();
        invoker.register_simple("math.double", |input: Value| async move {
            let n = input["n"].as_i64().unwrap_or(0);
            Ok(json!({"n": n * 2}))
        });

        let out = invoker.invoke("math.double", json!({"n": 4})).await.unwrap();
        assert_eq!(out, json!({"n": 8}));

        // Qualified names dispatch to the same closure.
        let out = invoker
            .invoke("math.double@1", json!({"n": 5}))
            .await
            .unwrap();
        assert_eq!(out, json!({"n": 10}));
    }

    #[tokio::test]
    async fn unknown_target_errors() {
        let invoker = InProcessInvoker::new();
        let err = invoker.invoke("nope", json!(null)).await.unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn catalog_records_versions() {
        let mut invoker = InProcessInvoker::new();
        invoker.register(
            FunctionMetadata {
                name: "tasks.create".to_string(),
                version: 2,
                input_schema_hash: "in2".to_string(),
                output_schema_hash: "out2".to_string(),
            },
            |_| async { Ok(json!(null)) },
        );

        let meta = invoker.catalog().resolve("tasks.create").unwrap();
        assert_eq!(meta.version, 2);
        assert_eq!(meta.input_schema_hash, "in2");
    }
}
