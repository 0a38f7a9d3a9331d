use crate::NodeId;
use thiserror::Error;

/// Errors surfaced when building or loading a network.
///
/// Analytical outcomes (a failed DC check, an irrecoverable relaxation, a
/// dispatch violation) are not errors: they are carried in the result types
/// of the corresponding operations.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("empty interval on edge ({i}, {j}): lower bound exceeds upper bound")]
    EmptyInterval { i: NodeId, j: NodeId },

    #[error("edge ({i}, {j}) references a vertex that is not in the network")]
    UnknownVertex { i: NodeId, j: NodeId },

    #[error("vertex {sink} already has an incoming contingent edge")]
    DuplicateContingent { sink: NodeId },

    #[error("an edge between {i} and {j} is already present")]
    DuplicateEdge { i: NodeId, j: NodeId },

    #[error("contingent edge ({i}, {j}) must have finite bounds")]
    UnboundedContingent { i: NodeId, j: NodeId },

    #[error("malformed input: {0}")]
    MalformedInput(String),
}
