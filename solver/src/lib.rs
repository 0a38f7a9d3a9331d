//! Analysis, repair and execution of Simple Temporal Networks with
//! Uncertainty (STNU).
//!
//! The crate is organized as a pipeline:
//!  - [`model`] holds the STNU itself (vertices, requirement and contingent
//!    edges, minimal network, strong controllability, JSON shape);
//!  - [`dc`] derives the labeled distance graph and checks dynamic
//!    controllability, producing a conflict when the check fails;
//!  - [`lp`] builds linear programs over the network (super-interval,
//!    max-subinterval, proportion, max-min, min-max, relaxation) on top of
//!    an abstract solver contract with a shipped simplex implementation;
//!  - [`relax`] iterates DC check + relaxation LP until the network is
//!    dynamically controllable or declared irrecoverable;
//!  - [`dispatch`] executes a network against sampled realizations of the
//!    contingent durations;
//!  - [`prob`] estimates the probability that dispatch succeeds from the
//!    conflicts found along the way.

pub mod collections;
pub mod dc;
pub mod dispatch;
pub mod lp;
pub mod model;
pub mod prob;
pub mod relax;
pub mod utils;

/// Identifier of a timepoint in an STNU. Node `0` is reserved for the
/// zero timepoint (temporal origin).
pub type NodeId = u32;

/// The reserved id of the zero timepoint.
pub const ZERO_ID: NodeId = 0;
