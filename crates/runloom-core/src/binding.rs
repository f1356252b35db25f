//! Binding-expression evaluation for graph nodes.
//!
//! Expressions are resolved against an explicit environment (trigger input,
//! completed node outputs, and optionally the current fan-out item). Missing
//! path segments resolve to null; missing node outputs are errors, since
//! validation guarantees every referenced node precedes the reader.

use dashmap::DashMap;
use runloom_types::error::GraphError;
use runloom_types::graph::{BindingExpr, BindingRef, RefSource};
use serde_json::Value;

/// Values a binding expression may read.
pub struct BindingEnv<'a> {
    /// The run's original trigger input.
    pub trigger: &'a Value,
    /// Outputs of completed nodes, keyed by node id.
    pub outputs: &'a DashMap<String, Value>,
    /// Current element when evaluating inside a per-item fan-out branch.
    pub item: Option<&'a Value>,
}

/// Evaluate `expr` for the node `node_id`.
pub fn eval(expr: &BindingExpr, env: &BindingEnv<'_>, node_id: &str) -> Result<Value, GraphError> {
    match expr {
        BindingExpr::Literal { value } => Ok(value.clone()),
        BindingExpr::Ref { r#ref } => resolve_ref(r#ref, env, node_id),
        BindingExpr::Template { format, args } => {
            let mut resolved = Vec::with_capacity(args.len());
            for arg in args {
                resolved.push(resolve_ref(arg, env, node_id)?);
            }
            Ok(Value::String(render_template(format, &resolved)))
        }
        BindingExpr::Object { fields } => {
            let mut out = serde_json::Map::with_capacity(fields.len());
            for (key, field_expr) in fields {
                out.insert(key.clone(), eval(field_expr, env, node_id)?);
            }
            Ok(Value::Object(out))
        }
    }
}

/// Resolve a single reference, walking its dot-path.
pub fn resolve_ref(
    r#ref: &BindingRef,
    env: &BindingEnv<'_>,
    node_id: &str,
) -> Result<Value, GraphError> {
    let root = match &r#ref.source {
        RefSource::Trigger => env.trigger.clone(),
        RefSource::Node { id } => match env.outputs.get(id) {
            Some(value) => value.clone(),
            None => {
                return Err(GraphError::UnknownNode {
                    context: node_id.to_string(),
                    node: id.clone(),
                });
            }
        },
        RefSource::Item => match env.item {
            Some(item) => item.clone(),
            None => {
                return Err(GraphError::ItemOutsideFanOut {
                    node: node_id.to_string(),
                });
            }
        },
    };
    Ok(walk_path(root, &r#ref.path))
}

/// Follow a field path; absent segments yield null rather than an error.
fn walk_path(mut value: Value, path: &[String]) -> Value {
    for segment in path {
        value = match value {
            Value::Object(mut map) => map.remove(segment).unwrap_or(Value::Null),
            Value::Array(mut items) => match segment.parse::<usize>() {
                Ok(idx) if idx < items.len() => items.swap_remove(idx),
                _ => Value::Null,
            },
            _ => Value::Null,
        };
    }
    value
}

/// Substitute `$0, $1, ...` with the rendered argument values.
///
/// Indices are replaced from highest to lowest so `$10` is never clobbered
/// by the `$1` substitution.
fn render_template(format: &str, args: &[Value]) -> String {
    let mut out = format.to_string();
    for (idx, value) in args.iter().enumerate().rev() {
        let placeholder = format!("${idx}");
        out = out.replace(&placeholder, &value_to_string(value));
    }
    out
}

/// Strings interpolate bare; everything else as compact JSON.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env<'a>(
        trigger: &'a Value,
        outputs: &'a DashMap<String, Value>,
        item: Option<&'a Value>,
    ) -> BindingEnv<'a> {
        BindingEnv {
            trigger,
            outputs,
            item,
        }
    }

    #[test]
    fn literal_evaluates_to_itself() {
        let trigger = json!({});
        let outputs = DashMap::new();
        let value = eval(
            &BindingExpr::literal(json!({"n": 1})),
            &env(&trigger, &outputs, None),
            "n1",
        )
        .unwrap();
        assert_eq!(value, json!({"n": 1}));
    }

    #[test]
    fn trigger_ref_walks_path() {
        let trigger = json!({"user": {"email": "a@b.com", "tags": ["x", "y"]}});
        let outputs = DashMap::new();
        let e = env(&trigger, &outputs, None);

        let value = eval(
            &BindingExpr::reference(BindingRef::trigger(&["user", "email"])),
            &e,
            "n1",
        )
        .unwrap();
        assert_eq!(value, json!("a@b.com"));

        let value = eval(
            &BindingExpr::reference(BindingRef::trigger(&["user", "tags", "1"])),
            &e,
            "n1",
        )
        .unwrap();
        assert_eq!(value, json!("y"));
    }

    #[test]
    fn missing_path_segment_is_null() {
        let trigger = json!({"user": {}});
        let outputs = DashMap::new();
        let value = eval(
            &BindingExpr::reference(BindingRef::trigger(&["user", "missing", "deep"])),
            &env(&trigger, &outputs, None),
            "n1",
        )
        .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn node_ref_reads_recorded_output() {
        let trigger = json!({});
        let outputs = DashMap::new();
        outputs.insert("lookup".to_string(), json!({"org": {"name": "Acme"}}));
        let value = eval(
            &BindingExpr::reference(BindingRef::node("lookup", &["org", "name"])),
            &env(&trigger, &outputs, None),
            "n2",
        )
        .unwrap();
        assert_eq!(value, json!("Acme"));
    }

    #[test]
    fn node_ref_to_unrecorded_output_errors() {
        let trigger = json!({});
        let outputs = DashMap::new();
        let err = eval(
            &BindingExpr::reference(BindingRef::node("nope", &[])),
            &env(&trigger, &outputs, None),
            "n2",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnknownNode { context, node } if context == "n2" && node == "nope"
        ));
    }

    #[test]
    fn item_ref_outside_fan_out_errors() {
        let trigger = json!({});
        let outputs = DashMap::new();
        let err = eval(
            &BindingExpr::reference(BindingRef::item(&[])),
            &env(&trigger, &outputs, None),
            "n3",
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::ItemOutsideFanOut { node } if node == "n3"));
    }

    #[test]
    fn item_ref_inside_fan_out_resolves() {
        let trigger = json!({});
        let outputs = DashMap::new();
        let item = json!({"sku": "ABC", "qty": 2});
        let value = eval(
            &BindingExpr::reference(BindingRef::item(&["sku"])),
            &env(&trigger, &outputs, Some(&item)),
            "n3",
        )
        .unwrap();
        assert_eq!(value, json!("ABC"));
    }

    #[test]
    fn template_substitutes_in_order() {
        let trigger = json!({"name": "Ada"});
        let outputs = DashMap::new();
        outputs.insert("lookup".to_string(), json!({"org": "Acme"}));
        let value = eval(
            &BindingExpr::Template {
                format: "Hello $0, welcome to $1".to_string(),
                args: vec![
                    BindingRef::trigger(&["name"]),
                    BindingRef::node("lookup", &["org"]),
                ],
            },
            &env(&trigger, &outputs, None),
            "n1",
        )
        .unwrap();
        assert_eq!(value, json!("Hello Ada, welcome to Acme"));
    }

    #[test]
    fn template_double_digit_placeholders() {
        let args: Vec<Value> = (0..11).map(|i| json!(i)).collect();
        let rendered = render_template("$1 and $10", &args);
        assert_eq!(rendered, "1 and 10");
    }

    #[test]
    fn template_renders_non_strings_as_json() {
        let rendered = render_template("count=$0 flag=$1", &[json!(3), json!(true)]);
        assert_eq!(rendered, "count=3 flag=true");
    }

    #[test]
    fn object_expression_recurses() {
        let trigger = json!({"email": "a@b.com"});
        let outputs = DashMap::new();
        let expr = BindingExpr::object([
            (
                "to".to_string(),
                BindingExpr::reference(BindingRef::trigger(&["email"])),
            ),
            ("retries".to_string(), BindingExpr::literal(json!(2))),
        ]);
        let value = eval(&expr, &env(&trigger, &outputs, None), "n1").unwrap();
        assert_eq!(value, json!({"to": "a@b.com", "retries": 2}));
    }
}
