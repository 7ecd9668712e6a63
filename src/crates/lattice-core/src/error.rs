//! Error types for lattice data-model operations

use thiserror::Error;

/// Convenience result type using [`LatticeError`]
pub type Result<T> = std::result::Result<T, LatticeError>;

/// Errors arising from the transport graph and dispatch-result data model
#[derive(Debug, Error)]
pub enum LatticeError {
    /// The transport graph contains a cycle and cannot be layered
    #[error("cycle detected in transport graph")]
    CycleDetected,

    /// A node id does not exist in the graph
    #[error("unknown node id {0}")]
    UnknownNode(usize),

    /// An edge references a node id outside the graph
    #[error("edge references unknown node id {0}")]
    UnknownEdgeEndpoint(usize),

    /// A node's output was read before the node completed
    #[error("node {0} has no readable output")]
    MissingOutput(usize),

    /// A node that requires exactly one parent has zero or many
    #[error("node {node} expects a single parent, found {found}")]
    SingleParentExpected { node: usize, found: usize },

    /// A projection (subscript/attribute) could not be applied to a value
    #[error("cannot project node {node} output: {reason}")]
    Projection { node: usize, reason: String },

    /// The lattice document or a transportable payload is malformed
    #[error("malformed lattice document: {0}")]
    Malformed(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
