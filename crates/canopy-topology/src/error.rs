//! Error types for the topology graph

use canopy_wire::Address;
use thiserror::Error;

/// Errors from graph mutation and neighbour selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("Node not in graph: {0}")]
    UnknownNode(Address),

    #[error("Parent not in graph: {0}")]
    UnknownParent(Address),

    #[error("Node already in graph: {0}")]
    DuplicateNode(Address),

    #[error("No live node with a free child slot")]
    NoCapacity,
}
