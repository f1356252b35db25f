//! Declarative graph workflow IR.
//!
//! A graph workflow is a set of nodes with data-flow bindings and explicit
//! transitions. Every shape is a tagged variant -- the engine validates the
//! whole graph at registration time and never inspects shapes during
//! traversal. Input bindings are a small closed expression AST evaluated
//! against an explicit environment, not strings parsed at call time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::retry::RetryConfig;

// ---------------------------------------------------------------------------
// Binding AST
// ---------------------------------------------------------------------------

/// Where a reference reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefSource {
    /// The run's original trigger input.
    Trigger,
    /// The output of a previously completed node.
    Node { id: String },
    /// The current element of a per-item fan-out collection.
    Item,
}

/// A reference with an optional dot-path into the source value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRef {
    #[serde(flatten)]
    pub source: RefSource,
    /// Field path into the referenced value; empty means the whole value.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

impl BindingRef {
    pub fn trigger(path: &[&str]) -> Self {
        Self {
            source: RefSource::Trigger,
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn node(id: impl Into<String>, path: &[&str]) -> Self {
        Self {
            source: RefSource::Node { id: id.into() },
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn item(path: &[&str]) -> Self {
        Self {
            source: RefSource::Item,
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Input-mapping expression for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "snake_case")]
pub enum BindingExpr {
    /// A constant JSON value.
    Literal { value: Value },
    /// A single reference.
    Ref {
        #[serde(flatten)]
        r#ref: BindingRef,
    },
    /// String interpolation: `$0, $1, ...` positions are substituted with
    /// resolved reference values.
    Template { format: String, args: Vec<BindingRef> },
    /// An object whose fields are themselves binding expressions.
    Object { fields: BTreeMap<String, BindingExpr> },
}

impl BindingExpr {
    pub fn literal(value: Value) -> Self {
        BindingExpr::Literal { value }
    }

    pub fn reference(r#ref: BindingRef) -> Self {
        BindingExpr::Ref { r#ref }
    }

    pub fn object<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (String, BindingExpr)>,
    {
        BindingExpr::Object {
            fields: fields.into_iter().collect(),
        }
    }

    /// All references this expression reads, for registration-time checks.
    pub fn refs(&self) -> Vec<&BindingRef> {
        match self {
            BindingExpr::Literal { .. } => vec![],
            BindingExpr::Ref { r#ref } => vec![r#ref],
            BindingExpr::Template { args, .. } => args.iter().collect(),
            BindingExpr::Object { fields } => {
                fields.values().flat_map(|e| e.refs()).collect()
            }
        }
    }
}

impl Default for BindingExpr {
    fn default() -> Self {
        BindingExpr::Literal { value: Value::Null }
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Fan-out form: execute several branches concurrently, join before
/// the run proceeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FanOut {
    /// A fixed list of node ids, one branch each.
    Fixed { targets: Vec<String> },
    /// One node replicated once per element of a referenced collection;
    /// the element is bound as the loop item for that branch.
    PerItem { node: String, items: BindingRef },
}

/// What happens after a node completes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// This path is done.
    #[default]
    End,
    /// Continue to one node.
    Single { target: String },
    /// Concurrent branches with a join barrier.
    FanOut {
        #[serde(flatten)]
        fan_out: FanOut,
    },
    /// Dispatch on a branch key returned by this node's output.
    Branch { branches: BTreeMap<String, Vec<String>> },
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// What a node does when reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeAction {
    /// Invoke a named target function with the node's resolved input.
    Invoke { target: String },
    /// Suspend the run until an external approval resumes it.
    Approval { reason: String },
}

/// One node of a graph workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node id, unique within the graph.
    pub id: String,
    /// The node's action.
    pub action: NodeAction,
    /// Input mapping resolved before the action runs.
    #[serde(default)]
    pub input: BindingExpr,
    /// Transition taken after the action succeeds.
    #[serde(default)]
    pub next: Transition,
    /// Nodes to run instead of failing the run when the action fails
    /// terminally. Empty means failure propagates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_error: Vec<String>,
    /// Retry policy for the node's action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

impl GraphNode {
    /// An invoke node with null input and no continuation; callers adjust
    /// fields as needed.
    pub fn invoke(id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: NodeAction::Invoke {
                target: target.into(),
            },
            input: BindingExpr::default(),
            next: Transition::End,
            on_error: vec![],
            retry: None,
        }
    }

    /// An approval node.
    pub fn approval(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: NodeAction::Approval {
                reason: reason.into(),
            },
            input: BindingExpr::default(),
            next: Transition::End,
            on_error: vec![],
            retry: None,
        }
    }

    pub fn with_input(mut self, input: BindingExpr) -> Self {
        self.input = input;
        self
    }

    pub fn with_next(mut self, next: Transition) -> Self {
        self.next = next;
        self
    }

    pub fn with_on_error(mut self, targets: Vec<String>) -> Self {
        self.on_error = targets;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }
}

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// A complete declarative workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    /// Workflow name, unique within a registry.
    pub name: String,
    /// Entry node ids; each starts a traversal path.
    pub entry: Vec<String>,
    /// All nodes of the graph.
    pub nodes: Vec<GraphNode>,
}

impl GraphDefinition {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binding_expr_serde_roundtrip() {
        let expr = BindingExpr::object([
            (
                "email".to_string(),
                BindingExpr::reference(BindingRef::trigger(&["email"])),
            ),
            (
                "greeting".to_string(),
                BindingExpr::Template {
                    format: "Hello $0, welcome to $1".to_string(),
                    args: vec![
                        BindingRef::trigger(&["name"]),
                        BindingRef::node("lookup-org", &["org", "name"]),
                    ],
                },
            ),
            ("count".to_string(), BindingExpr::literal(json!(3))),
        ]);

        let json_str = serde_json::to_string(&expr).unwrap();
        let parsed: BindingExpr = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed, expr);
    }

    #[test]
    fn binding_expr_collects_refs() {
        let expr = BindingExpr::object([
            (
                "a".to_string(),
                BindingExpr::reference(BindingRef::node("n1", &[])),
            ),
            (
                "b".to_string(),
                BindingExpr::Template {
                    format: "$0".to_string(),
                    args: vec![BindingRef::item(&["sku"])],
                },
            ),
        ]);
        let refs = expr.refs();
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().any(|r| matches!(&r.source, RefSource::Node { id } if id == "n1")));
        assert!(refs.iter().any(|r| matches!(r.source, RefSource::Item)));
    }

    #[test]
    fn transition_serde_tagged() {
        let t = Transition::Branch {
            branches: BTreeMap::from([
                ("enterprise".to_string(), vec!["assign-csm".to_string()]),
                ("self_serve".to_string(), vec!["send-drip".to_string()]),
            ]),
        };
        let json_str = serde_json::to_string(&t).unwrap();
        assert!(json_str.contains("\"kind\":\"branch\""));
        let parsed: Transition = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed, t);

        let t = Transition::FanOut {
            fan_out: FanOut::PerItem {
                node: "charge-item".to_string(),
                items: BindingRef::node("cart", &["items"]),
            },
        };
        let json_str = serde_json::to_string(&t).unwrap();
        assert!(json_str.contains("\"mode\":\"per_item\""));
        let parsed: Transition = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed, t);
    }

    #[test]
    fn graph_definition_serde_roundtrip() {
        let def = GraphDefinition {
            name: "onboarding".to_string(),
            entry: vec!["create-task".to_string()],
            nodes: vec![
                GraphNode::invoke("create-task", "tasks.create")
                    .with_input(BindingExpr::reference(BindingRef::trigger(&[])))
                    .with_retry(RetryConfig::fixed(2, std::time::Duration::from_millis(250)))
                    .with_next(Transition::Single {
                        target: "review".to_string(),
                    }),
                GraphNode::approval("review", "Needs approval"),
            ],
        };
        let json_str = serde_json::to_string(&def).unwrap();
        let parsed: GraphDefinition = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed, def);
        assert!(parsed.node("create-task").is_some());
        assert!(parsed.node("nope").is_none());
    }
}
