//! Canonical per-dispatch state
//!
//! [`DispatchResult`] is the single source of truth for one execution of a
//! workflow: overall status and timings, the terminal result value, and one
//! [`NodeState`] per graph node. Task runners never touch it directly; they
//! return a [`NodeResult`] record which the scheduler merges in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LatticeError, Result};
use crate::lattice::Lattice;
use crate::status::Status;
use crate::transport::TransportableObject;

/// Runtime state of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub node_id: usize,
    pub node_name: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TransportableObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Dispatch id of the nested run, set iff the node is a sublattice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_dispatch_id: Option<String>,
    /// Full result of the nested run, set iff the node is a sublattice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sublattice_result: Option<Box<DispatchResult>>,
}

impl NodeState {
    fn new(node_id: usize, node_name: String) -> Self {
        Self {
            node_id,
            node_name,
            status: Status::NewObject,
            start_time: None,
            end_time: None,
            output: None,
            error: None,
            stdout: None,
            stderr: None,
            sub_dispatch_id: None,
            sublattice_result: None,
        }
    }
}

/// Record a task runner returns for one node execution
///
/// Only fields that are `Some` are merged into the node state, so partial
/// updates (marking RUNNING, then merging the terminal record) compose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TransportableObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_dispatch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sublattice_result: Option<Box<DispatchResult>>,
}

impl NodeResult {
    pub fn new(node_id: usize) -> Self {
        Self { node_id, ..Self::default() }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_start_time(mut self, t: DateTime<Utc>) -> Self {
        self.start_time = Some(t);
        self
    }

    pub fn with_end_time(mut self, t: DateTime<Utc>) -> Self {
        self.end_time = Some(t);
        self
    }

    pub fn with_output(mut self, output: TransportableObject) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Terminal failure record with the error rendered and the end time set
    pub fn failed(node_id: usize, error: impl Into<String>) -> Self {
        Self::new(node_id)
            .with_status(Status::Failed)
            .with_error(error)
            .with_end_time(Utc::now())
    }
}

/// Canonical state of one dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub dispatch_id: String,
    pub lattice: Lattice,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Terminal workflow result produced by post-processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TransportableObject>,
    /// Per-node states, indexed by node id
    pub nodes: Vec<NodeState>,
}

impl DispatchResult {
    pub fn new(lattice: Lattice, dispatch_id: impl Into<String>) -> Self {
        Self {
            dispatch_id: dispatch_id.into(),
            lattice,
            status: Status::NewObject,
            start_time: None,
            end_time: None,
            error: None,
            result: None,
            nodes: Vec::new(),
        }
    }

    /// Results directory recorded in the lattice metadata
    pub fn results_dir(&self) -> &str {
        &self.lattice.metadata.results_dir
    }

    /// Create one `NEW_OBJECT` state per graph node
    pub fn initialize_nodes(&mut self) {
        self.nodes = self
            .lattice
            .transport_graph
            .nodes()
            .map(|n| NodeState::new(n.id, n.name.clone()))
            .collect();
    }

    pub fn node(&self, node_id: usize) -> Result<&NodeState> {
        self.nodes.get(node_id).ok_or(LatticeError::UnknownNode(node_id))
    }

    pub fn node_status(&self, node_id: usize) -> Result<Status> {
        Ok(self.node(node_id)?.status)
    }

    pub fn node_name(&self, node_id: usize) -> Result<&str> {
        Ok(self.node(node_id)?.node_name.as_str())
    }

    pub fn node_error(&self, node_id: usize) -> Result<Option<&str>> {
        Ok(self.node(node_id)?.error.as_deref())
    }

    /// A node's output, readable only once the node completed
    pub fn node_output(&self, node_id: usize) -> Result<&TransportableObject> {
        let state = self.node(node_id)?;
        if state.status != Status::Completed {
            return Err(LatticeError::MissingOutput(node_id));
        }
        state.output.as_ref().ok_or(LatticeError::MissingOutput(node_id))
    }

    /// Merge a node-result record; only `Some` fields overwrite
    pub fn update_node(&mut self, record: NodeResult) -> Result<()> {
        let state = self
            .nodes
            .get_mut(record.node_id)
            .ok_or(LatticeError::UnknownNode(record.node_id))?;

        if let Some(t) = record.start_time {
            state.start_time = Some(t);
        }
        if let Some(t) = record.end_time {
            state.end_time = Some(t);
        }
        if let Some(status) = record.status {
            state.status = status;
        }
        if let Some(output) = record.output {
            state.output = Some(output);
        }
        if let Some(error) = record.error {
            state.error = Some(error);
        }
        if let Some(stdout) = record.stdout {
            state.stdout = Some(stdout);
        }
        if let Some(stderr) = record.stderr {
            state.stderr = Some(stderr);
        }
        if let Some(id) = record.sub_dispatch_id {
            state.sub_dispatch_id = Some(id);
        }
        if let Some(sub) = record.sublattice_result {
            state.sublattice_result = Some(sub);
        }
        Ok(())
    }

    /// All node outputs as `("name(id)", output)` pairs in node-id order
    ///
    /// Returned as ordered pairs rather than a map so consumers see outputs
    /// in execution-graph order.
    pub fn all_node_outputs(&self) -> Vec<(String, TransportableObject)> {
        self.nodes
            .iter()
            .filter_map(|state| {
                state
                    .output
                    .clone()
                    .map(|out| (format!("{}({})", state.node_name, state.node_id), out))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node, NodeMetadata, TransportGraph};
    use crate::lattice::{Lattice, LatticeMetadata};
    use crate::transport::CallableRef;

    fn small_lattice() -> Lattice {
        let mut graph = TransportGraph::new();
        graph
            .add_node(Node {
                id: 0,
                name: ":parameter:2".into(),
                function: None,
                value: Some(TransportableObject::wrap(&2i64).unwrap()),
                metadata: NodeMetadata::default(),
                key: None,
                attribute_name: None,
            })
            .unwrap();
        graph
            .add_node(Node {
                id: 1,
                name: "square".into(),
                function: Some(
                    TransportableObject::wrap_callable(&CallableRef::new("square")).unwrap(),
                ),
                value: None,
                metadata: NodeMetadata::default(),
                key: None,
                attribute_name: None,
            })
            .unwrap();
        graph.add_edge(Edge::kwarg(0, 1, "x")).unwrap();

        Lattice {
            name: "wf".into(),
            doc: None,
            function: TransportableObject::wrap_callable(&CallableRef::new("wf")).unwrap(),
            function_string: "def wf(x): ...".into(),
            args: vec![],
            kwargs: Default::default(),
            metadata: LatticeMetadata::default(),
            transport_graph: graph,
        }
    }

    #[test]
    fn test_initialize_nodes() {
        let mut result = DispatchResult::new(small_lattice(), "d1");
        result.initialize_nodes();
        assert_eq!(result.nodes.len(), 2);
        assert!(result.nodes.iter().all(|n| n.status == Status::NewObject));
        assert_eq!(result.node_name(1).unwrap(), "square");
    }

    #[test]
    fn test_update_node_merges_some_fields() {
        let mut result = DispatchResult::new(small_lattice(), "d1");
        result.initialize_nodes();

        let start = Utc::now();
        result
            .update_node(
                NodeResult::new(1)
                    .with_status(Status::Running)
                    .with_start_time(start),
            )
            .unwrap();
        assert_eq!(result.node_status(1).unwrap(), Status::Running);

        result
            .update_node(
                NodeResult::new(1)
                    .with_status(Status::Completed)
                    .with_output(TransportableObject::wrap(&4i64).unwrap())
                    .with_end_time(Utc::now()),
            )
            .unwrap();

        let state = result.node(1).unwrap();
        assert_eq!(state.status, Status::Completed);
        // the partial terminal record must not clear the earlier start time
        assert_eq!(state.start_time, Some(start));
        let out: i64 = result.node_output(1).unwrap().materialize().unwrap();
        assert_eq!(out, 4);
    }

    #[test]
    fn test_output_unreadable_until_completed() {
        let mut result = DispatchResult::new(small_lattice(), "d1");
        result.initialize_nodes();
        assert!(matches!(
            result.node_output(1),
            Err(LatticeError::MissingOutput(1))
        ));
    }

    #[test]
    fn test_all_node_outputs_in_id_order() {
        let mut result = DispatchResult::new(small_lattice(), "d1");
        result.initialize_nodes();
        for id in [1usize, 0] {
            result
                .update_node(
                    NodeResult::new(id)
                        .with_status(Status::Completed)
                        .with_output(TransportableObject::wrap(&(id as i64)).unwrap()),
                )
                .unwrap();
        }
        let outputs = result.all_node_outputs();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].0, ":parameter:2(0)");
        assert_eq!(outputs[1].0, "square(1)");
    }

    #[test]
    fn test_serde_round_trip_identity() {
        let mut result = DispatchResult::new(small_lattice(), "d1");
        result.initialize_nodes();
        result.status = Status::Running;
        result.start_time = Some(Utc::now());
        result
            .update_node(
                NodeResult::new(0)
                    .with_status(Status::Completed)
                    .with_output(TransportableObject::wrap(&2i64).unwrap()),
            )
            .unwrap();

        let json = serde_json::to_string(&result).unwrap();
        let back: DispatchResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_failed_record_sets_end_time() {
        let record = NodeResult::failed(3, "boom");
        assert_eq!(record.status, Some(Status::Failed));
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert!(record.end_time.is_some());
    }
}
