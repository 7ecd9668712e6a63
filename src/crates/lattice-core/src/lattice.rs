//! The lattice envelope: a workflow definition on the wire
//!
//! A serialized lattice carries the workflow function, its bound inputs,
//! dispatch metadata, and the transport graph in node-link form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::graph::TransportGraph;
use crate::transport::{CallableRef, TransportableObject};

/// Dispatch metadata attached to a lattice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatticeMetadata {
    /// Directory where result artifacts for this dispatch are kept
    #[serde(default)]
    pub results_dir: String,

    /// Scheduling hint; planning is a no-op seam today
    #[serde(default)]
    pub schedule: bool,

    /// Default executor short-name for nodes that select none
    #[serde(default)]
    pub executor: String,

    /// Default executor configuration
    #[serde(default)]
    pub executor_data: Value,

    /// Executor short-name for post-processing and sublattice dispatch
    #[serde(default)]
    pub workflow_executor: String,

    /// Configuration for the workflow executor
    #[serde(default)]
    pub workflow_executor_data: Value,
}

impl Default for LatticeMetadata {
    fn default() -> Self {
        Self {
            results_dir: String::new(),
            schedule: false,
            executor: "local".to_string(),
            executor_data: Value::Null,
            workflow_executor: "local".to_string(),
            workflow_executor_data: Value::Null,
        }
    }
}

/// A workflow definition: function, inputs, metadata, transport graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    /// Workflow name
    pub name: String,

    /// Workflow docstring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    /// Serialized workflow callable, invoked during post-processing
    pub function: TransportableObject,

    /// Source string of the workflow function
    #[serde(default)]
    pub function_string: String,

    /// Positional workflow arguments
    #[serde(default)]
    pub args: Vec<TransportableObject>,

    /// Named workflow arguments
    #[serde(default)]
    pub kwargs: BTreeMap<String, TransportableObject>,

    pub metadata: LatticeMetadata,

    pub transport_graph: TransportGraph,
}

impl Lattice {
    /// Parse a serialized lattice document
    pub fn deserialize_from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render the lattice back to its wire form
    pub fn serialize_to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The workflow callable reference
    pub fn workflow_callable(&self) -> Result<CallableRef> {
        self.function.materialize_callable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node, NodeMetadata};

    fn lattice_json() -> String {
        let mut graph = TransportGraph::new();
        graph
            .add_node(Node {
                id: 0,
                name: ":parameter:5".into(),
                function: None,
                value: Some(TransportableObject::wrap(&5i64).unwrap()),
                metadata: NodeMetadata::default(),
                key: None,
                attribute_name: None,
            })
            .unwrap();
        graph
            .add_node(Node {
                id: 1,
                name: "identity".into(),
                function: Some(
                    TransportableObject::wrap_callable(&CallableRef::new("identity")).unwrap(),
                ),
                value: None,
                metadata: NodeMetadata::default(),
                key: None,
                attribute_name: None,
            })
            .unwrap();
        graph.add_edge(Edge::kwarg(0, 1, "x")).unwrap();

        let lattice = Lattice {
            name: "wf".into(),
            doc: Some("A workflow".into()),
            function: TransportableObject::wrap_callable(&CallableRef::new("wf")).unwrap(),
            function_string: "def wf(): ...".into(),
            args: vec![],
            kwargs: BTreeMap::new(),
            metadata: LatticeMetadata {
                results_dir: "/tmp/results".into(),
                ..LatticeMetadata::default()
            },
            transport_graph: graph,
        };
        lattice.serialize_to_json().unwrap()
    }

    #[test]
    fn test_deserialize_round_trip() {
        let json = lattice_json();
        let lattice = Lattice::deserialize_from_json(&json).unwrap();
        assert_eq!(lattice.name, "wf");
        assert_eq!(lattice.metadata.results_dir, "/tmp/results");
        assert_eq!(lattice.transport_graph.len(), 2);
        assert_eq!(lattice.workflow_callable().unwrap().name, "wf");

        let back = Lattice::deserialize_from_json(&lattice.serialize_to_json().unwrap()).unwrap();
        assert_eq!(back, lattice);
    }

    #[test]
    fn test_metadata_defaults() {
        let meta = LatticeMetadata::default();
        assert_eq!(meta.executor, "local");
        assert_eq!(meta.workflow_executor, "local");
        assert!(!meta.schedule);
    }

    #[test]
    fn test_malformed_document_is_rejected() {
        assert!(Lattice::deserialize_from_json("{\"name\": 3}").is_err());
    }
}
