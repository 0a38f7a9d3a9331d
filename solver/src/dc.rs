mod checker;
mod conflict;
mod labeled;

pub use checker::{dc_check, DcResult};
pub use conflict::{Conflict, LiftedBound, Polarity};
pub use labeled::{EdgeId, EdgeKind, LabeledGraph, LgEdge, LgNode, NodeIdx, Provenance};
