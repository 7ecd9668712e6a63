//! Data model for lattice workflows
//!
//! A *lattice* is a workflow definition: a function plus a transport graph
//! of interdependent task nodes and the metadata needed to dispatch it.
//! This crate holds the pure data structures shared by the dispatcher
//! runtime and the durable store:
//!
//! - [`TransportableObject`]: opaque serialized values crossing task
//!   boundaries
//! - [`TransportGraph`]: the DAG of nodes and parameter-binding edges,
//!   with stable topological layering
//! - [`Dep`]: dependency bundles applied around task invocations
//! - [`Status`], [`DispatchResult`], [`NodeResult`]: the per-dispatch
//!   state machine and its single source of truth
//! - [`Lattice`]: the serialized workflow envelope
//! - [`encode_result`]: the strict-JSON document rendered for observers

pub mod deps;
pub mod encode;
pub mod error;
pub mod graph;
pub mod lattice;
pub mod result;
pub mod status;
pub mod transport;

pub use deps::{Dep, Hook, PACKAGE_INSTALL_CALLABLE, SHELL_CALLABLE};
pub use encode::encode_result;
pub use error::{LatticeError, Result};
pub use graph::{
    Edge, Node, NodeKind, NodeMetadata, ParamType, TransportGraph, ATTR_PREFIX,
    ELECTRON_DICT_PREFIX, ELECTRON_LIST_PREFIX, GENERATOR_PREFIX, PARAMETER_PREFIX,
    PREFIX_SEPARATOR, SUBLATTICE_PREFIX, SUBSCRIPT_PREFIX, WAIT_EDGE_NAME,
};
pub use lattice::{Lattice, LatticeMetadata};
pub use result::{DispatchResult, NodeResult, NodeState};
pub use status::Status;
pub use transport::{CallableRef, TransportableObject};
