//! Workflow registry and registration-time graph validation.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use runloom_types::error::{GraphError, StepError};
use runloom_types::graph::{FanOut, GraphDefinition, RefSource, Transition};
use serde_json::Value;
use thiserror::Error;

use crate::context::StepContext;

/// Boxed imperative workflow function.
pub type WorkflowHandler =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<Value, StepError>> + Send + Sync>;

/// A registered workflow definition.
#[derive(Clone)]
pub enum WorkflowKind {
    /// Code-defined workflow driven by a [`StepContext`].
    Imperative(WorkflowHandler),
    /// Declarative graph, validated at registration.
    Graph(Arc<GraphDefinition>),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("workflow '{0}' is already registered")]
    DuplicateWorkflow(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Named workflow definitions available to the engine.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, WorkflowKind>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an imperative workflow function under `name`.
    pub fn register_imperative<F, Fut>(
        &mut self,
        name: impl Into<String>,
        f: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        let name = name.into();
        if self.workflows.contains_key(&name) {
            return Err(RegistryError::DuplicateWorkflow(name));
        }
        let handler: WorkflowHandler = Arc::new(move |ctx| Box::pin(f(ctx)));
        self.workflows.insert(name, WorkflowKind::Imperative(handler));
        Ok(())
    }

    /// Register a graph workflow; the whole graph is validated here so
    /// traversal never has to.
    pub fn register_graph(&mut self, def: GraphDefinition) -> Result<(), RegistryError> {
        if self.workflows.contains_key(&def.name) {
            return Err(RegistryError::DuplicateWorkflow(def.name));
        }
        validate_graph(&def)?;
        self.workflows
            .insert(def.name.clone(), WorkflowKind::Graph(Arc::new(def)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<WorkflowKind> {
        self.workflows.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.workflows.keys().map(String::as_str).collect()
    }
}

// ---------------------------------------------------------------------------
// Graph validation
// ---------------------------------------------------------------------------

/// Structural checks: unique node ids, resolvable references, item refs
/// confined to per-item targets, and acyclicity of the transition graph.
pub fn validate_graph(def: &GraphDefinition) -> Result<(), GraphError> {
    if def.entry.is_empty() {
        return Err(GraphError::NoEntry {
            graph: def.name.clone(),
        });
    }

    let mut ids: HashMap<&str, &runloom_types::graph::GraphNode> = HashMap::new();
    for node in &def.nodes {
        if ids.insert(node.id.as_str(), node).is_some() {
            return Err(GraphError::DuplicateNode {
                graph: def.name.clone(),
                node: node.id.clone(),
            });
        }
    }

    let check = |context: &str, target: &str| -> Result<(), GraphError> {
        if ids.contains_key(target) {
            Ok(())
        } else {
            Err(GraphError::UnknownNode {
                context: context.to_string(),
                node: target.to_string(),
            })
        }
    };

    for entry in &def.entry {
        check(&def.name, entry)?;
    }

    // Nodes reachable only as a per-item replica; these may read item refs
    // and must not continue past themselves, since each replica would
    // otherwise collide on downstream step identities.
    let mut per_item_targets: Vec<&str> = Vec::new();

    for node in &def.nodes {
        match &node.next {
            Transition::End => {}
            Transition::Single { target } => check(&node.id, target)?,
            Transition::FanOut { fan_out } => match fan_out {
                FanOut::Fixed { targets } => {
                    for target in targets {
                        check(&node.id, target)?;
                    }
                }
                FanOut::PerItem { node: target, items } => {
                    check(&node.id, target)?;
                    if let RefSource::Node { id } = &items.source {
                        check(&node.id, id)?;
                    }
                    per_item_targets.push(target);
                }
            },
            Transition::Branch { branches } => {
                for targets in branches.values() {
                    for target in targets {
                        check(&node.id, target)?;
                    }
                }
            }
        }
        for target in &node.on_error {
            check(&node.id, target)?;
        }
        for r#ref in node.input.refs() {
            if let RefSource::Node { id } = &r#ref.source {
                check(&node.id, id)?;
            }
        }
    }

    // Item references are only valid inside a per-item replica.
    for node in &def.nodes {
        let reads_item = node
            .input
            .refs()
            .iter()
            .any(|r| matches!(r.source, RefSource::Item));
        if reads_item && !per_item_targets.contains(&node.id.as_str()) {
            return Err(GraphError::ItemOutsideFanOut {
                node: node.id.clone(),
            });
        }
    }

    // A per-item target ends its replica; continuations and error routes
    // would replicate step ids across items.
    for target in &per_item_targets {
        let node = ids[*target];
        if node.next != Transition::End || !node.on_error.is_empty() {
            return Err(GraphError::ItemOutsideFanOut {
                node: node.id.clone(),
            });
        }
    }

    // Cycle check over all transition and error edges.
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
    for node in &def.nodes {
        indices.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }
    let mut add_edge = |from: &str, to: &str| {
        graph.add_edge(indices[from], indices[to], ());
    };
    for node in &def.nodes {
        match &node.next {
            Transition::End => {}
            Transition::Single { target } => add_edge(&node.id, target),
            Transition::FanOut { fan_out } => match fan_out {
                FanOut::Fixed { targets } => {
                    for target in targets {
                        add_edge(&node.id, target);
                    }
                }
                FanOut::PerItem { node: target, .. } => add_edge(&node.id, target),
            },
            Transition::Branch { branches } => {
                for targets in branches.values() {
                    for target in targets {
                        add_edge(&node.id, target);
                    }
                }
            }
        }
        for target in &node.on_error {
            add_edge(&node.id, target);
        }
    }
    if let Err(cycle) = toposort(&graph, None) {
        return Err(GraphError::Cycle {
            graph: def.name.clone(),
            node: graph[cycle.node_id()].to_string(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use runloom_types::graph::{BindingExpr, BindingRef, GraphNode};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn linear_graph() -> GraphDefinition {
        GraphDefinition {
            name: "linear".to_string(),
            entry: vec!["a".to_string()],
            nodes: vec![
                GraphNode::invoke("a", "fn.a").with_next(Transition::Single {
                    target: "b".to_string(),
                }),
                GraphNode::invoke("b", "fn.b"),
            ],
        }
    }

    #[test]
    fn registers_and_fetches() {
        let mut registry = WorkflowRegistry::new();
        registry
            .register_imperative("imp", |_ctx| async { Ok(json!(null)) })
            .unwrap();
        registry.register_graph(linear_graph()).unwrap();

        assert!(matches!(registry.get("imp"), Some(WorkflowKind::Imperative(_))));
        assert!(matches!(registry.get("linear"), Some(WorkflowKind::Graph(_))));
        assert!(registry.get("missing").is_none());

        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["imp", "linear"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = WorkflowRegistry::new();
        registry
            .register_imperative("dup", |_ctx| async { Ok(json!(null)) })
            .unwrap();
        let err = registry.register_graph(GraphDefinition {
            name: "dup".to_string(),
            entry: vec!["a".to_string()],
            nodes: vec![GraphNode::invoke("a", "fn.a")],
        });
        assert!(matches!(err, Err(RegistryError::DuplicateWorkflow(n)) if n == "dup"));
    }

    #[test]
    fn rejects_empty_entry() {
        let def = GraphDefinition {
            name: "g".to_string(),
            entry: vec![],
            nodes: vec![GraphNode::invoke("a", "fn.a")],
        };
        assert!(matches!(validate_graph(&def), Err(GraphError::NoEntry { .. })));
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let def = GraphDefinition {
            name: "g".to_string(),
            entry: vec!["a".to_string()],
            nodes: vec![GraphNode::invoke("a", "fn.a"), GraphNode::invoke("a", "fn.b")],
        };
        assert!(matches!(
            validate_graph(&def),
            Err(GraphError::DuplicateNode { node, .. }) if node == "a"
        ));
    }

    #[test]
    fn rejects_dangling_transition() {
        let def = GraphDefinition {
            name: "g".to_string(),
            entry: vec!["a".to_string()],
            nodes: vec![GraphNode::invoke("a", "fn.a").with_next(Transition::Single {
                target: "ghost".to_string(),
            })],
        };
        assert!(matches!(
            validate_graph(&def),
            Err(GraphError::UnknownNode { context, node }) if context == "a" && node == "ghost"
        ));
    }

    #[test]
    fn rejects_dangling_input_ref() {
        let def = GraphDefinition {
            name: "g".to_string(),
            entry: vec!["a".to_string()],
            nodes: vec![
                GraphNode::invoke("a", "fn.a")
                    .with_input(BindingExpr::reference(BindingRef::node("ghost", &[]))),
            ],
        };
        assert!(matches!(
            validate_graph(&def),
            Err(GraphError::UnknownNode { node, .. }) if node == "ghost"
        ));
    }

    #[test]
    fn rejects_item_ref_outside_per_item_target() {
        let def = GraphDefinition {
            name: "g".to_string(),
            entry: vec!["a".to_string()],
            nodes: vec![
                GraphNode::invoke("a", "fn.a")
                    .with_input(BindingExpr::reference(BindingRef::item(&["sku"]))),
            ],
        };
        assert!(matches!(
            validate_graph(&def),
            Err(GraphError::ItemOutsideFanOut { node }) if node == "a"
        ));
    }

    #[test]
    fn accepts_item_ref_inside_per_item_target() {
        let def = GraphDefinition {
            name: "g".to_string(),
            entry: vec!["split".to_string()],
            nodes: vec![
                GraphNode::invoke("split", "fn.split").with_next(Transition::FanOut {
                    fan_out: FanOut::PerItem {
                        node: "charge".to_string(),
                        items: BindingRef::node("split", &["items"]),
                    },
                }),
                GraphNode::invoke("charge", "fn.charge")
                    .with_input(BindingExpr::reference(BindingRef::item(&[]))),
            ],
        };
        assert!(validate_graph(&def).is_ok());
    }

    #[test]
    fn rejects_per_item_target_with_continuation() {
        let def = GraphDefinition {
            name: "g".to_string(),
            entry: vec!["split".to_string()],
            nodes: vec![
                GraphNode::invoke("split", "fn.split").with_next(Transition::FanOut {
                    fan_out: FanOut::PerItem {
                        node: "charge".to_string(),
                        items: BindingRef::node("split", &["items"]),
                    },
                }),
                GraphNode::invoke("charge", "fn.charge").with_next(Transition::Single {
                    target: "after".to_string(),
                }),
                GraphNode::invoke("after", "fn.after"),
            ],
        };
        assert!(matches!(
            validate_graph(&def),
            Err(GraphError::ItemOutsideFanOut { node }) if node == "charge"
        ));
    }

    #[test]
    fn rejects_cycle() {
        let def = GraphDefinition {
            name: "g".to_string(),
            entry: vec!["a".to_string()],
            nodes: vec![
                GraphNode::invoke("a", "fn.a").with_next(Transition::Single {
                    target: "b".to_string(),
                }),
                GraphNode::invoke("b", "fn.b").with_next(Transition::Single {
                    target: "a".to_string(),
                }),
            ],
        };
        assert!(matches!(validate_graph(&def), Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn accepts_branch_and_error_routes() {
        let def = GraphDefinition {
            name: "g".to_string(),
            entry: vec!["classify".to_string()],
            nodes: vec![
                GraphNode::invoke("classify", "fn.classify").with_next(Transition::Branch {
                    branches: BTreeMap::from([
                        ("hot".to_string(), vec!["page".to_string()]),
                        ("cold".to_string(), vec!["queue".to_string()]),
                    ]),
                }),
                GraphNode::invoke("page", "fn.page").with_on_error(vec!["queue".to_string()]),
                GraphNode::invoke("queue", "fn.queue"),
            ],
        };
        assert!(validate_graph(&def).is_ok());
    }
}
