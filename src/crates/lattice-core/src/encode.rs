//! Result-document encoding for observers and archived artifacts
//!
//! Renders a [`DispatchResult`] to the strict-JSON document consumed by
//! observers and archived alongside the dispatch row: statuses as their
//! string tags, timestamps as ISO-8601, the transport graph in node-link
//! form with each node's `function` dropped and its docstring extracted,
//! metadata flattened, and opaque payloads string-coerced. Non-finite
//! floats cannot reach this layer: wrapping a NaN renders `null`.
//!
//! This is a one-way projection. The lossless wire form of a result is its
//! plain serde serialization.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::graph::{Node, NodeMetadata};
use crate::result::{DispatchResult, NodeState};
use crate::transport::TransportableObject;

/// Render a result to its observer/archive document
pub fn encode_result(result: &DispatchResult) -> Result<String> {
    let lattice = &result.lattice;

    let mut inputs = Map::new();
    for (i, arg) in lattice.args.iter().enumerate() {
        inputs.insert(format!("arg_{i}"), coerce_payload(arg));
    }
    for (name, value) in &lattice.kwargs {
        inputs.insert(name.clone(), coerce_payload(value));
    }

    let doc = json!({
        "dispatch_id": result.dispatch_id,
        "status": result.status.as_str(),
        "result": materialize_or_null(result.result.as_ref()),
        "start_time": encode_time(result.start_time),
        "end_time": encode_time(result.end_time),
        "results_dir": lattice.metadata.results_dir,
        "error": result.error,
        "lattice": {
            "function_string": lattice.function_string,
            "doc": lattice.doc,
            "name": lattice.name,
            "inputs": inputs,
            "metadata": {
                "results_dir": lattice.metadata.results_dir,
                "schedule": lattice.metadata.schedule,
                "executor_name": lattice.metadata.executor,
                "executor": coerce_dict(&lattice.metadata.executor_data),
                "workflow_executor_name": lattice.metadata.workflow_executor,
                "workflow_executor": coerce_dict(&lattice.metadata.workflow_executor_data),
            },
        },
        "graph": encode_graph(result),
    });

    Ok(serde_json::to_string(&doc)?)
}

fn encode_graph(result: &DispatchResult) -> Value {
    let graph = &result.lattice.transport_graph;
    let nodes: Vec<Value> = graph
        .nodes()
        .map(|node| encode_graph_node(node, result.nodes.get(node.id)))
        .collect();
    let links: Vec<Value> = graph
        .edges()
        .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
        .collect();
    json!({ "nodes": nodes, "links": links })
}

/// One node-link entry: static definition merged with runtime state,
/// `function` dropped, docstring pulled out
fn encode_graph_node(node: &Node, state: Option<&NodeState>) -> Value {
    let doc = node
        .function
        .as_ref()
        .and_then(|f| f.materialize_callable().ok())
        .and_then(|c| c.doc);

    let mut entry = Map::new();
    entry.insert("id".into(), json!(node.id));
    entry.insert("name".into(), json!(node.name));
    entry.insert("doc".into(), json!(doc));
    entry.insert("metadata".into(), encode_node_metadata(&node.metadata));
    if let Some(value) = &node.value {
        entry.insert("value".into(), coerce_payload(value));
    }
    if let Some(key) = &node.key {
        entry.insert("key".into(), key.clone());
    }
    if let Some(attr) = &node.attribute_name {
        entry.insert("attribute_name".into(), json!(attr));
    }

    if let Some(state) = state {
        entry.insert("status".into(), json!(state.status.as_str()));
        entry.insert("start_time".into(), encode_time(state.start_time));
        entry.insert("end_time".into(), encode_time(state.end_time));
        entry.insert("output".into(), materialize_or_null(state.output.as_ref()));
        entry.insert("error".into(), json!(state.error));
        entry.insert("stdout".into(), json!(state.stdout));
        entry.insert("stderr".into(), json!(state.stderr));
        if let Some(sub) = &state.sub_dispatch_id {
            entry.insert("sub_dispatch_id".into(), json!(sub));
        }
    }

    Value::Object(entry)
}

/// Flatten node metadata: executor config inlined under `executor`, the
/// short-name kept under `executor_name`, deps and hook lists stringified
fn encode_node_metadata(metadata: &NodeMetadata) -> Value {
    let deps: Map<String, Value> = metadata
        .deps
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.to_string())))
        .collect();
    let stringify = |hooks: &[Value]| -> Vec<Value> {
        hooks.iter().map(|h| Value::String(h.to_string())).collect()
    };

    json!({
        "executor_name": metadata.executor,
        "executor": coerce_dict(&metadata.executor_data),
        "deps": deps,
        "call_before": stringify(&metadata.call_before),
        "call_after": stringify(&metadata.call_after),
    })
}

fn encode_time(t: Option<DateTime<Utc>>) -> Value {
    match t {
        Some(t) => json!(t.to_rfc3339()),
        None => Value::Null,
    }
}

fn materialize_or_null(value: Option<&TransportableObject>) -> Value {
    value
        .and_then(|v| v.materialize_value().ok())
        .unwrap_or(Value::Null)
}

/// Opaque payloads render as their serialized text
fn coerce_payload(value: &TransportableObject) -> Value {
    Value::String(value.payload().to_string())
}

/// String-coerce every value of a config dictionary; scalars pass through
/// as their string form
fn coerce_dict(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let coerced = match v {
                        Value::String(s) => Value::String(s.clone()),
                        other => Value::String(other.to_string()),
                    };
                    (k.clone(), coerced)
                })
                .collect(),
        ),
        Value::Null => Value::Object(Map::new()),
        other => Value::String(other.to_string()),
    }
}
