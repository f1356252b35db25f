//! Traversal executor for declarative graph workflows.
//!
//! Traversal starts at each entry node and follows transitions recorded in
//! the definition. Node outputs land in a shared map keyed by node id, which
//! binding expressions of later nodes read. Fan-out branches run
//! concurrently on a `JoinSet` with a join barrier before the run proceeds.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use runloom_types::error::{EngineError, GraphError, StepError};
use runloom_types::graph::{FanOut, GraphDefinition, GraphNode, NodeAction, Transition};
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::binding::{self, BindingEnv};
use crate::step_runner::{StepRunner, StepSpec};
use crate::store::WorkflowStore;

/// Shared traversal state for one graph run.
#[derive(Clone)]
struct GraphCtx {
    def: Arc<GraphDefinition>,
    run_id: Uuid,
    trigger: Arc<Value>,
    outputs: Arc<DashMap<String, Value>>,
    /// Nodes already claimed by a traversal path this drive. A node where
    /// paths converge runs exactly once: the first arrival claims it.
    claimed: Arc<DashMap<String, ()>>,
    cancel: CancellationToken,
}

pub struct GraphExecutor<S> {
    runner: Arc<StepRunner<S>>,
}

impl<S: WorkflowStore + 'static> GraphExecutor<S> {
    pub fn new(runner: Arc<StepRunner<S>>) -> Self {
        Self { runner }
    }

    /// Run a graph definition to completion.
    ///
    /// The run output is an object mapping node ids to their recorded
    /// outputs. Suspension and failure propagate as errors for the engine
    /// to classify.
    pub async fn execute(
        self: Arc<Self>,
        def: Arc<GraphDefinition>,
        run_id: Uuid,
        trigger: Value,
        cancel: CancellationToken,
    ) -> Result<Value, EngineError> {
        let gctx = GraphCtx {
            def,
            run_id,
            trigger: Arc::new(trigger),
            outputs: Arc::new(DashMap::new()),
            claimed: Arc::new(DashMap::new()),
            cancel,
        };

        for entry in gctx.def.entry.clone() {
            Arc::clone(&self).traverse(gctx.clone(), entry).await?;
        }

        let mut out = serde_json::Map::new();
        for entry in gctx.outputs.iter() {
            out.insert(entry.key().clone(), entry.value().clone());
        }
        Ok(Value::Object(out))
    }

    /// Execute `node_id` and follow its transition. Boxed for recursion.
    fn traverse(
        self: Arc<Self>,
        gctx: GraphCtx,
        node_id: String,
    ) -> BoxFuture<'static, Result<(), EngineError>> {
        Box::pin(async move {
            // Converging paths (fan-out branches with a shared successor,
            // branch targets reachable via on_error) meet here: only the
            // first arrival executes the node and follows its transition.
            // Sibling paths stop at the join; the fan-out barrier still
            // waits for the claiming path's whole subtree.
            if gctx.claimed.insert(node_id.clone(), ()).is_some() {
                tracing::debug!(
                    run_id = %gctx.run_id,
                    node = node_id.as_str(),
                    "node already claimed by a converging path, joining"
                );
                return Ok(());
            }

            // Validation guarantees the node exists.
            let node = match gctx.def.node(&node_id) {
                Some(node) => node.clone(),
                None => {
                    return Err(EngineError::Graph(GraphError::UnknownNode {
                        context: gctx.def.name.clone(),
                        node: node_id,
                    }));
                }
            };

            let output = match self.execute_node(&gctx, &node, None, &node.id).await {
                Ok(output) => output,
                Err(EngineError::Step(StepError::RetriesExhausted {
                    step_id, message, ..
                })) if !node.on_error.is_empty() => {
                    tracing::warn!(
                        run_id = %gctx.run_id,
                        node = node.id.as_str(),
                        step_id = step_id.as_str(),
                        error = message.as_str(),
                        "node failed terminally, rerouting to error path"
                    );
                    for target in node.on_error.clone() {
                        Arc::clone(&self).traverse(gctx.clone(), target).await?;
                    }
                    return Ok(());
                }
                Err(err) => return Err(err),
            };
            gctx.outputs.insert(node.id.clone(), output.clone());

            match &node.next {
                Transition::End => Ok(()),
                Transition::Single { target } => {
                    self.traverse(gctx, target.clone()).await
                }
                Transition::FanOut { fan_out } => {
                    self.fan_out(gctx, &node, fan_out.clone()).await
                }
                Transition::Branch { branches } => {
                    let key = branch_key(&output).ok_or_else(|| {
                        EngineError::Graph(GraphError::MissingBranchKey {
                            node: node.id.clone(),
                        })
                    })?;
                    let targets = branches.get(key).ok_or_else(|| {
                        EngineError::Graph(GraphError::UnknownBranchKey {
                            node: node.id.clone(),
                            key: key.to_string(),
                        })
                    })?;
                    for target in targets.clone() {
                        Arc::clone(&self).traverse(gctx.clone(), target).await?;
                    }
                    Ok(())
                }
            }
        })
    }

    /// Resolve the node's input binding and perform its action.
    async fn execute_node(
        &self,
        gctx: &GraphCtx,
        node: &GraphNode,
        item: Option<&Value>,
        step_id: &str,
    ) -> Result<Value, EngineError> {
        let env = BindingEnv {
            trigger: &gctx.trigger,
            outputs: &gctx.outputs,
            item,
        };
        let input = binding::eval(&node.input, &env, &node.id)?;

        match &node.action {
            NodeAction::Invoke { target } => {
                let spec = StepSpec::new(step_id, target.clone(), input)
                    .with_retry(node.retry.clone().unwrap_or_default());
                let value = self.runner.execute(gctx.run_id, spec, &gctx.cancel).await?;
                Ok(value)
            }
            NodeAction::Approval { reason } => {
                let payload = self.runner.suspend(gctx.run_id, step_id, reason).await?;
                Ok(payload)
            }
        }
    }

    /// Run fan-out branches concurrently and join them all before
    /// returning.
    async fn fan_out(
        self: Arc<Self>,
        gctx: GraphCtx,
        node: &GraphNode,
        fan_out: FanOut,
    ) -> Result<(), EngineError> {
        match fan_out {
            FanOut::Fixed { targets } => {
                let mut set: JoinSet<Result<(), EngineError>> = JoinSet::new();
                for target in targets {
                    let this = Arc::clone(&self);
                    let gctx = gctx.clone();
                    set.spawn(async move { this.traverse(gctx, target).await });
                }
                join_barrier(set, &node.id).await
            }
            FanOut::PerItem { node: target_id, items } => {
                let env = BindingEnv {
                    trigger: &gctx.trigger,
                    outputs: &gctx.outputs,
                    item: None,
                };
                let collection = binding::resolve_ref(&items, &env, &node.id)?;
                let Value::Array(elements) = collection else {
                    return Err(EngineError::Graph(GraphError::FanOutNotACollection {
                        node: node.id.clone(),
                    }));
                };
                let target = match gctx.def.node(&target_id) {
                    Some(node) => node.clone(),
                    None => {
                        return Err(EngineError::Graph(GraphError::UnknownNode {
                            context: node.id.clone(),
                            node: target_id,
                        }));
                    }
                };

                let mut set: JoinSet<Result<(usize, Value), EngineError>> = JoinSet::new();
                for (idx, element) in elements.into_iter().enumerate() {
                    let this = Arc::clone(&self);
                    let gctx = gctx.clone();
                    let target = target.clone();
                    // Replica step ids carry the element index so each item
                    // checkpoints independently.
                    let step_id = format!("{}[{}]", target.id, idx);
                    set.spawn(async move {
                        let value = this
                            .execute_node(&gctx, &target, Some(&element), &step_id)
                            .await?;
                        Ok((idx, value))
                    });
                }

                let mut results: Vec<(usize, Value)> = Vec::new();
                let mut failure: Option<EngineError> = None;
                let mut suspension: Option<EngineError> = None;
                while let Some(joined) = set.join_next().await {
                    match joined {
                        Ok(Ok(pair)) => results.push(pair),
                        Ok(Err(err)) => classify(err, &mut failure, &mut suspension),
                        Err(join_err) => classify(
                            EngineError::Step(StepError::Execution {
                                target: target_id.clone(),
                                message: join_err.to_string(),
                            }),
                            &mut failure,
                            &mut suspension,
                        ),
                    }
                }
                if let Some(err) = failure.or(suspension) {
                    return Err(err);
                }

                results.sort_by_key(|(idx, _)| *idx);
                let values: Vec<Value> = results.into_iter().map(|(_, v)| v).collect();
                gctx.outputs.insert(target_id, Value::Array(values));
                Ok(())
            }
        }
    }
}

/// Wait for every branch; a real failure wins over a suspension signal so
/// genuine errors are never masked by a sibling's approval wait.
async fn join_barrier(
    mut set: JoinSet<Result<(), EngineError>>,
    node_id: &str,
) -> Result<(), EngineError> {
    let mut failure: Option<EngineError> = None;
    let mut suspension: Option<EngineError> = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => classify(err, &mut failure, &mut suspension),
            Err(join_err) => classify(
                EngineError::Step(StepError::Execution {
                    target: node_id.to_string(),
                    message: join_err.to_string(),
                }),
                &mut failure,
                &mut suspension,
            ),
        }
    }
    match failure.or(suspension) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn classify(err: EngineError, failure: &mut Option<EngineError>, suspension: &mut Option<EngineError>) {
    let is_suspension = matches!(&err, EngineError::Step(step) if step.is_suspension());
    if is_suspension {
        suspension.get_or_insert(err);
    } else {
        failure.get_or_insert(err);
    }
}

/// A branching node's key is its string output, or its output's `branch`
/// field.
fn branch_key(output: &Value) -> Option<&str> {
    match output {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("branch").and_then(Value::as_str),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn branch_key_from_string_output() {
        assert_eq!(branch_key(&json!("enterprise")), Some("enterprise"));
    }

    #[test]
    fn branch_key_from_branch_field() {
        assert_eq!(branch_key(&json!({"branch": "hot", "score": 9})), Some("hot"));
    }

    #[test]
    fn branch_key_absent() {
        assert_eq!(branch_key(&json!({"score": 9})), None);
        assert_eq!(branch_key(&json!(42)), None);
    }
}
