//! Transport graph: the DAG of nodes and parameter-binding edges
//!
//! Pure data structure. Nodes carry the static task definition (name,
//! serialized function, literal value, executor metadata); edges carry the
//! parameter binding that routes a parent's output into a child's call.
//! Runtime state (status, output, timings) lives on the dispatch result,
//! which is the single source of truth.
//!
//! The wire format is node-link JSON: `{"nodes": [...], "links": [...]}`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LatticeError, Result};
use crate::transport::TransportableObject;

/// Marker separator: any node name starting with this carries a marker prefix
pub const PREFIX_SEPARATOR: &str = ":";

pub const PARAMETER_PREFIX: &str = ":parameter:";
pub const SUBSCRIPT_PREFIX: &str = ":subscript:";
pub const ATTR_PREFIX: &str = ":attribute:";
pub const GENERATOR_PREFIX: &str = ":generator:";
pub const ELECTRON_LIST_PREFIX: &str = ":electron_list:";
pub const ELECTRON_DICT_PREFIX: &str = ":electron_dict:";
pub const SUBLATTICE_PREFIX: &str = ":sublattice:";

/// Edge name used by ordering-only edges
pub const WAIT_EDGE_NAME: &str = "!waiting_edge";

/// Classification of a node by its name marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Literal value node; the `value` attribute is its payload
    Parameter,
    /// Index the sole parent output by `key`
    Subscript,
    /// Read `attribute_name` off the sole parent output
    Attribute,
    /// Iterator projection, same single-parent shape as subscript
    Generator,
    /// Collect all parents into a list passed as `x=`
    ElectronList,
    /// Collect parents into a dict keyed by edge name, passed as `x=`
    ElectronDict,
    /// Recursive workflow dispatch
    Sublattice,
    /// Regular task node
    Task,
}

impl NodeKind {
    /// Classify a node name by its marker prefix
    pub fn of(name: &str) -> Self {
        if name.starts_with(PARAMETER_PREFIX) {
            Self::Parameter
        } else if name.starts_with(SUBSCRIPT_PREFIX) {
            Self::Subscript
        } else if name.starts_with(ATTR_PREFIX) {
            Self::Attribute
        } else if name.starts_with(GENERATOR_PREFIX) {
            Self::Generator
        } else if name.starts_with(ELECTRON_LIST_PREFIX) {
            Self::ElectronList
        } else if name.starts_with(ELECTRON_DICT_PREFIX) {
            Self::ElectronDict
        } else if name.starts_with(SUBLATTICE_PREFIX) {
            Self::Sublattice
        } else {
            Self::Task
        }
    }

    /// Pure nodes are evaluated inline by the scheduler, never dispatched
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            Self::Parameter | Self::Subscript | Self::Attribute | Self::Generator
        )
    }
}

/// How an edge binds the parent output into the child call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// Positional argument
    Arg,
    /// Keyword argument named by `edge_name`
    Kwarg,
    /// Ordering only, contributes no data
    WaitOnly,
}

/// Directed parent -> child edge with its parameter-binding record
///
/// Multiple edges between the same pair are allowed (parallel bindings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub param_type: ParamType,
    /// Parameter name when kwarg; `!waiting_edge` when wait-only
    pub edge_name: String,
    /// Position for positional bindings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg_index: Option<usize>,
}

impl Edge {
    pub fn arg(source: usize, target: usize, arg_index: usize) -> Self {
        Self {
            source,
            target,
            param_type: ParamType::Arg,
            edge_name: format!("arg[{arg_index}]"),
            arg_index: Some(arg_index),
        }
    }

    pub fn kwarg(source: usize, target: usize, name: impl Into<String>) -> Self {
        Self {
            source,
            target,
            param_type: ParamType::Kwarg,
            edge_name: name.into(),
            arg_index: None,
        }
    }

    pub fn wait_only(source: usize, target: usize) -> Self {
        Self {
            source,
            target,
            param_type: ParamType::WaitOnly,
            edge_name: WAIT_EDGE_NAME.to_string(),
            arg_index: None,
        }
    }
}

/// Executor selection, dependency bundles, and hooks attached to a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Executor short-name selected for this node
    #[serde(default)]
    pub executor: String,

    /// Executor configuration dictionary
    #[serde(default)]
    pub executor_data: Value,

    /// Dependency bundles keyed by kind (`bash`, `pip`)
    #[serde(default)]
    pub deps: BTreeMap<String, Value>,

    /// Serialized call-before hooks
    #[serde(default)]
    pub call_before: Vec<Value>,

    /// Serialized call-after hooks
    #[serde(default)]
    pub call_after: Vec<Value>,
}

/// One unit of work in the transport graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique id, dense from zero
    pub id: usize,

    /// Name; a leading marker prefix classifies the node
    pub name: String,

    /// Serialized callable, absent for pure parameter nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<TransportableObject>,

    /// Literal payload for parameter nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<TransportableObject>,

    #[serde(default)]
    pub metadata: NodeMetadata,

    /// Subscript key for subscript/generator nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Value>,

    /// Attribute name for attribute nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_name: Option<String>,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        NodeKind::of(&self.name)
    }
}

/// In-memory DAG with attribute bags and parameter-binding edges
///
/// Serializes to node-link form: the edge list is named `links` on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportGraph {
    nodes: Vec<Node>,
    #[serde(rename = "links")]
    edges: Vec<Edge>,
}

impl TransportGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append a node; its id must equal its position
    pub fn add_node(&mut self, node: Node) -> Result<usize> {
        if node.id != self.nodes.len() {
            return Err(LatticeError::Malformed(format!(
                "node id {} out of sequence, expected {}",
                node.id,
                self.nodes.len()
            )));
        }
        let id = node.id;
        self.nodes.push(node);
        Ok(id)
    }

    /// Append an edge; both endpoints must exist
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        for endpoint in [edge.source, edge.target] {
            if endpoint >= self.nodes.len() {
                return Err(LatticeError::UnknownEdgeEndpoint(endpoint));
            }
        }
        self.edges.push(edge);
        Ok(())
    }

    pub fn node(&self, id: usize) -> Result<&Node> {
        self.nodes.get(id).ok_or(LatticeError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: usize) -> Result<&mut Node> {
        self.nodes.get_mut(id).ok_or(LatticeError::UnknownNode(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Parent ids of a node, in first-occurrence edge-insertion order
    pub fn dependencies(&self, node_id: usize) -> Vec<usize> {
        let mut parents = Vec::new();
        for edge in &self.edges {
            if edge.target == node_id && !parents.contains(&edge.source) {
                parents.push(edge.source);
            }
        }
        parents
    }

    /// All parallel edge records between a parent and a child, in insertion order
    pub fn edge_records(&self, parent: usize, child: usize) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| e.source == parent && e.target == child)
            .collect()
    }

    /// Topological layering via Kahn's algorithm
    ///
    /// The ready set is an ascending-id priority queue, so node ids appear
    /// in ascending order within each layer and the layering is stable.
    pub fn topological_layers(&self) -> Result<Vec<Vec<usize>>> {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        for edge in &self.edges {
            in_degree[edge.target] += 1;
            children[edge.source].push(edge.target);
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&id| in_degree[id] == 0)
            .map(Reverse)
            .collect();

        let mut layers = Vec::new();
        let mut visited = 0usize;

        while !ready.is_empty() {
            let mut layer = Vec::with_capacity(ready.len());
            let mut next: BinaryHeap<Reverse<usize>> = BinaryHeap::new();

            while let Some(Reverse(id)) = ready.pop() {
                layer.push(id);
                visited += 1;
                for &child in &children[id] {
                    in_degree[child] -= 1;
                    if in_degree[child] == 0 {
                        next.push(Reverse(child));
                    }
                }
            }

            layers.push(layer);
            ready = next;
        }

        if visited != n {
            return Err(LatticeError::CycleDetected);
        }
        Ok(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn task_node(id: usize, name: &str) -> Node {
        Node {
            id,
            name: name.to_string(),
            function: None,
            value: None,
            metadata: NodeMetadata::default(),
            key: None,
            attribute_name: None,
        }
    }

    fn diamond() -> TransportGraph {
        // 0 -> {1, 2} -> 3
        let mut g = TransportGraph::new();
        for (id, name) in [(0, ":parameter:2"), (1, "square"), (2, "cube"), (3, "add")] {
            g.add_node(task_node(id, name)).unwrap();
        }
        g.add_edge(Edge::kwarg(0, 1, "x")).unwrap();
        g.add_edge(Edge::kwarg(0, 2, "x")).unwrap();
        g.add_edge(Edge::kwarg(1, 3, "a")).unwrap();
        g.add_edge(Edge::kwarg(2, 3, "b")).unwrap();
        g
    }

    #[test]
    fn test_node_kind_markers() {
        assert_eq!(NodeKind::of(":parameter:5"), NodeKind::Parameter);
        assert_eq!(NodeKind::of(":subscript:[0]"), NodeKind::Subscript);
        assert_eq!(NodeKind::of(":attribute:field"), NodeKind::Attribute);
        assert_eq!(NodeKind::of(":generator:it"), NodeKind::Generator);
        assert_eq!(NodeKind::of(":electron_list:xs"), NodeKind::ElectronList);
        assert_eq!(NodeKind::of(":electron_dict:kv"), NodeKind::ElectronDict);
        assert_eq!(NodeKind::of(":sublattice:inner"), NodeKind::Sublattice);
        assert_eq!(NodeKind::of("square"), NodeKind::Task);

        assert!(NodeKind::Parameter.is_pure());
        assert!(NodeKind::Generator.is_pure());
        assert!(!NodeKind::ElectronList.is_pure());
        assert!(!NodeKind::Sublattice.is_pure());
    }

    #[test]
    fn test_diamond_layers() {
        let layers = diamond().topological_layers().unwrap();
        assert_eq!(layers, vec![vec![0], vec![1, 2], vec![3]]);
    }

    #[test]
    fn test_dependencies_insertion_order() {
        let g = diamond();
        assert_eq!(g.dependencies(3), vec![1, 2]);
        assert_eq!(g.dependencies(1), vec![0]);
        assert_eq!(g.dependencies(0), Vec::<usize>::new());
    }

    #[test]
    fn test_parallel_edges_preserved() {
        let mut g = TransportGraph::new();
        g.add_node(task_node(0, "a")).unwrap();
        g.add_node(task_node(1, "b")).unwrap();
        g.add_edge(Edge::arg(0, 1, 0)).unwrap();
        g.add_edge(Edge::kwarg(0, 1, "x")).unwrap();
        g.add_edge(Edge::wait_only(0, 1)).unwrap();

        let records = g.edge_records(0, 1);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].param_type, ParamType::Arg);
        assert_eq!(records[1].param_type, ParamType::Kwarg);
        assert_eq!(records[2].param_type, ParamType::WaitOnly);
        assert_eq!(records[2].edge_name, WAIT_EDGE_NAME);
        // parallel edges contribute one dependency entry
        assert_eq!(g.dependencies(1), vec![0]);
    }

    #[test]
    fn test_cycle_detected() {
        let mut g = TransportGraph::new();
        g.add_node(task_node(0, "a")).unwrap();
        g.add_node(task_node(1, "b")).unwrap();
        g.add_edge(Edge::kwarg(0, 1, "x")).unwrap();
        g.add_edge(Edge::kwarg(1, 0, "y")).unwrap();
        assert!(matches!(
            g.topological_layers(),
            Err(LatticeError::CycleDetected)
        ));
    }

    #[test]
    fn test_edge_endpoint_validation() {
        let mut g = TransportGraph::new();
        g.add_node(task_node(0, "a")).unwrap();
        assert!(matches!(
            g.add_edge(Edge::kwarg(0, 7, "x")),
            Err(LatticeError::UnknownEdgeEndpoint(7))
        ));
    }

    #[test]
    fn test_node_link_round_trip() {
        let g = diamond();
        let json = serde_json::to_string(&g).unwrap();
        assert!(json.contains("\"links\""));
        let back: TransportGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }

    /// Random DAG: edges only point from lower to higher ids
    fn arb_dag() -> impl Strategy<Value = TransportGraph> {
        (2usize..12)
            .prop_flat_map(|n| {
                let edges = proptest::collection::vec((0usize..n, 0usize..n), 0..n * 2);
                (Just(n), edges)
            })
            .prop_map(|(n, raw_edges)| {
                let mut g = TransportGraph::new();
                for id in 0..n {
                    g.add_node(task_node(id, &format!("task_{id}"))).unwrap();
                }
                for (a, b) in raw_edges {
                    let (lo, hi) = (a.min(b), a.max(b));
                    if lo != hi {
                        g.add_edge(Edge::kwarg(lo, hi, format!("k{lo}_{hi}"))).unwrap();
                    }
                }
                g
            })
    }

    proptest! {
        #[test]
        fn prop_every_edge_crosses_layers_forward(g in arb_dag()) {
            let layers = g.topological_layers().unwrap();
            let mut layer_of = vec![usize::MAX; g.len()];
            for (i, layer) in layers.iter().enumerate() {
                for &id in layer {
                    layer_of[id] = i;
                }
            }
            for edge in g.edges() {
                prop_assert!(layer_of[edge.source] < layer_of[edge.target]);
            }
        }

        #[test]
        fn prop_layering_is_a_permutation(g in arb_dag()) {
            let layers = g.topological_layers().unwrap();
            let mut all: Vec<usize> = layers.into_iter().flatten().collect();
            all.sort_unstable();
            let expected: Vec<usize> = (0..g.len()).collect();
            prop_assert_eq!(all, expected);
        }

        #[test]
        fn prop_layers_ascend_within(g in arb_dag()) {
            for layer in g.topological_layers().unwrap() {
                for pair in layer.windows(2) {
                    prop_assert!(pair[0] < pair[1]);
                }
            }
        }
    }
}
