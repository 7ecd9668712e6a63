//! Task-input assembly
//!
//! Builds the `{args, kwargs}` payload for a node from its parents'
//! outputs and the parameter-binding records on its incoming edges.
//! Collection markers change the shape: list collections gather parent
//! outputs in ascending-parent-id order, dict collections key them by edge
//! name; both are wrapped as one transportable bound to `x=`. Wait-only
//! edges order execution but never contribute data.

use std::collections::BTreeMap;

use lattice_core::{DispatchResult, NodeKind, ParamType, TransportableObject};
use serde_json::{Map, Value};

use crate::error::Result;

/// Serialized inputs for one task invocation
#[derive(Debug, Clone, Default)]
pub struct TaskInputs {
    pub args: Vec<TransportableObject>,
    pub kwargs: BTreeMap<String, TransportableObject>,
}

impl TaskInputs {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Assemble the inputs of `node_id` from upstream outputs
pub fn assemble_task_inputs(
    node_id: usize,
    node_name: &str,
    result: &DispatchResult,
) -> Result<TaskInputs> {
    let graph = &result.lattice.transport_graph;

    match NodeKind::of(node_name) {
        NodeKind::ElectronList => {
            let mut parents = graph.dependencies(node_id);
            parents.sort_unstable();

            let mut values = Vec::with_capacity(parents.len());
            for parent in parents {
                values.push(result.node_output(parent)?.materialize_value()?);
            }

            let mut kwargs = BTreeMap::new();
            kwargs.insert("x".to_string(), TransportableObject::wrap(&values)?);
            Ok(TaskInputs { args: vec![], kwargs })
        }

        NodeKind::ElectronDict => {
            let mut values = Map::new();
            for parent in graph.dependencies(node_id) {
                let value = result.node_output(parent)?.materialize_value()?;
                for edge in graph.edge_records(parent, node_id) {
                    if edge.param_type != ParamType::WaitOnly {
                        values.insert(edge.edge_name.clone(), value.clone());
                    }
                }
            }

            let mut kwargs = BTreeMap::new();
            kwargs.insert("x".to_string(), TransportableObject::wrap(&Value::Object(values))?);
            Ok(TaskInputs { args: vec![], kwargs })
        }

        _ => {
            let mut args = Vec::new();
            let mut kwargs = BTreeMap::new();

            for parent in graph.dependencies(node_id) {
                let output = result.node_output(parent)?;
                for edge in graph.edge_records(parent, node_id) {
                    match edge.param_type {
                        ParamType::Arg => args.push(output.clone()),
                        ParamType::Kwarg => {
                            kwargs.insert(edge.edge_name.clone(), output.clone());
                        }
                        ParamType::WaitOnly => {}
                    }
                }
            }

            Ok(TaskInputs { args, kwargs })
        }
    }
}
