mod builder;
mod problem;
mod simplex;

pub use builder::{
    max_subinterval_lp, maxmin_lp, minmax_lp, proportion_lp, relaxation_delta_lp, relaxation_lp,
    super_interval_lp, IntervalObjective, LpOutcome, Sign,
};
pub use problem::{Cmp, LinExpr, LpSolver, Problem, Sense, Solution, Status, VarId};
pub use simplex::Simplex;

/// Large finite sentinel standing in for absent bounds inside LPs.
pub const MAX_FLOAT: f64 = 1e15;
