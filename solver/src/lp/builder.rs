//! The LP family over an STNU.
//!
//! Every variant shares a skeleton: per-timepoint schedule variables
//! `t_i_lo <= t_i_hi` boxed by the horizon, equality rows tying contingent
//! intervals to their shrinkage (or growth) variables, and `<=` rows for
//! the requirement edges. The variants differ in the epsilon family and the
//! objective.

use crate::lp::problem::{Cmp, LinExpr, LpSolver, Problem, Sense, Solution, Status, VarId};
use crate::lp::MAX_FLOAT;
use crate::model::{Stnu, Weight};
use crate::{dc::LiftedBound, NodeId, ZERO_ID};
use std::collections::BTreeMap;
use tracing::debug;

/// Which schedule bound a variable refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Sign {
    Lo,
    Hi,
}

/// Objective flavor of the interval LPs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IntervalObjective {
    /// Plain sum of the epsilons.
    Naive,
    /// Each contingent's epsilons weighted by the inverse interval length.
    Normalized,
}

/// Values read back from a solved interval LP. A non-`Optimal` status
/// carries no values: callers treat it as "cannot improve".
#[derive(Clone, Debug)]
pub struct LpOutcome {
    pub status: Status,
    pub bounds: Option<BTreeMap<(NodeId, Sign), f64>>,
    pub epsilons: Option<BTreeMap<(NodeId, Sign), f64>>,
    /// The auxiliary scalar of the variant: the uniform step, `delta`, or `z`.
    pub scalar: Option<f64>,
}

impl LpOutcome {
    fn failed(status: Status) -> LpOutcome {
        LpOutcome {
            status,
            bounds: None,
            epsilons: None,
            scalar: None,
        }
    }
}

/// The shared LP skeleton under construction.
struct SetUp {
    pb: Problem,
    stnu: Stnu,
    bounds: BTreeMap<(NodeId, Sign), VarId>,
    epsilons: BTreeMap<(NodeId, Sign), VarId>,
    uniform: Option<VarId>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Variant {
    /// Grow a guaranteed super-interval (strong controllability side).
    Super,
    /// Shrink to a max subinterval (weak/dynamic side).
    Sub,
}

/// Builds the schedule variables and their box constraints. The network is
/// cloned and, when some event has no finite horizon, closed under a
/// sentinel makespan first: the LP needs every `t_i_hi` boxed.
fn set_up(stnu: &Stnu, name: &str, sense: Sense) -> SetUp {
    let mut stnu = stnu.clone();
    let open = stnu
        .verts()
        .any(|i| !stnu.get_edge_weight(ZERO_ID, i).is_finite());
    if open {
        stnu.set_makespan(MAX_FLOAT);
    }

    let mut pb = Problem::new(name, sense);
    let mut bounds = BTreeMap::new();
    for i in stnu.verts() {
        let hi_ub = stnu.get_edge_weight(ZERO_ID, i).clamped(MAX_FLOAT);
        let hi = pb.add_var(format!("t_{i}_hi"), 0.0, Some(hi_ub));
        let lo_lb = match stnu.get_edge_weight(i, ZERO_ID) {
            Weight::Finite(w) => -w,
            Weight::PosInf => 0.0,
        };
        let lo = pb.add_var(format!("t_{i}_lo"), lo_lb, None);
        pb.add_constraint(LinExpr::new().term(lo, 1.0).term(hi, -1.0), Cmp::Le, 0.0);
        if i == ZERO_ID {
            pb.add_constraint(LinExpr::single(lo), Cmp::Eq, 0.0);
            pb.add_constraint(LinExpr::single(hi), Cmp::Eq, 0.0);
        }
        bounds.insert((i, Sign::Lo), lo);
        bounds.insert((i, Sign::Hi), hi);
    }
    SetUp {
        pb,
        stnu,
        bounds,
        epsilons: BTreeMap::new(),
        uniform: None,
    }
}

impl SetUp {
    fn bound(&self, i: NodeId, sign: Sign) -> VarId {
        self.bounds[&(i, sign)]
    }

    /// Adds the `<=` rows of a requirement edge, clamping absent bounds.
    fn requirement_rows(&mut self, i: NodeId, j: NodeId, cij: Weight, cji: Weight) {
        let hi_j = self.bound(j, Sign::Hi);
        let lo_i = self.bound(i, Sign::Lo);
        let hi_i = self.bound(i, Sign::Hi);
        let lo_j = self.bound(j, Sign::Lo);
        self.pb.add_constraint(
            LinExpr::new().term(hi_j, 1.0).term(lo_i, -1.0),
            Cmp::Le,
            cij.clamped(MAX_FLOAT),
        );
        self.pb.add_constraint(
            LinExpr::new().term(hi_i, 1.0).term(lo_j, -1.0),
            Cmp::Le,
            cji.clamped(MAX_FLOAT),
        );
    }

    /// Ties a contingent edge to a pair of epsilon variables (or the shared
    /// uniform step): `Super` grows the interval outward, `Sub` shrinks it
    /// inward. `Super` also guards the grown lower bound against becoming
    /// negative, which the shrinking direction cannot produce.
    fn contingent_rows(&mut self, i: NodeId, j: NodeId, lb: f64, ub: f64, variant: Variant) {
        let (eps_hi, eps_lo) = match self.uniform {
            Some(eps) => (eps, eps),
            None => {
                let hi = self.pb.add_var(format!("eps_{j}_hi"), 0.0, None);
                let lo = self.pb.add_var(format!("eps_{j}_lo"), 0.0, None);
                self.epsilons.insert((j, Sign::Hi), hi);
                self.epsilons.insert((j, Sign::Lo), lo);
                (hi, lo)
            }
        };
        let hi_i = self.bound(i, Sign::Hi);
        let hi_j = self.bound(j, Sign::Hi);
        let lo_i = self.bound(i, Sign::Lo);
        let lo_j = self.bound(j, Sign::Lo);
        let eps_sign = match variant {
            Variant::Super => -1.0,
            Variant::Sub => 1.0,
        };
        // t_j_hi - t_i_hi = ub -/+ eps_hi
        self.pb.add_constraint(
            LinExpr::new().term(hi_j, 1.0).term(hi_i, -1.0).term(eps_hi, eps_sign),
            Cmp::Eq,
            ub,
        );
        // t_j_lo - t_i_lo = lb +/- eps_lo
        self.pb.add_constraint(
            LinExpr::new().term(lo_j, 1.0).term(lo_i, -1.0).term(eps_lo, -eps_sign),
            Cmp::Eq,
            lb,
        );
        if variant == Variant::Super {
            // lb - eps_lo >= 0
            self.pb
                .add_constraint(LinExpr::new().term(eps_lo, -1.0), Cmp::Ge, -lb);
        }
    }

    /// Adds the edge rows of the whole network for an interval variant.
    fn edge_rows(&mut self, variant: Variant) {
        let edges: Vec<(NodeId, NodeId, Weight, Weight, bool, f64, f64)> = self
            .stnu
            .edges()
            .map(|e| (e.from, e.to, e.cij, e.cji, e.is_contingent(), e.min_weight(), e.max_weight()))
            .collect();
        for (i, j, cij, cji, contingent, lb, ub) in edges {
            if contingent {
                self.contingent_rows(i, j, lb, ub, variant);
            } else {
                self.requirement_rows(i, j, cij, cji);
            }
        }
    }

    /// Declares the single shared epsilon of the uniform-step method.
    fn uniform_eps(&mut self, variant: Variant) {
        let ub = match variant {
            // the grown lower bounds must stay non-negative
            Variant::Super => self
                .stnu
                .contingent_edges()
                .map(|e| e.min_weight())
                .fold(f64::INFINITY, f64::min),
            // shrinking both sides must leave the interval non-empty
            Variant::Sub => self
                .stnu
                .contingent_edges()
                .map(|e| e.length() / 2.0)
                .fold(f64::INFINITY, f64::min),
        };
        let ub = if ub.is_finite() { Some(ub) } else { None };
        self.uniform = Some(self.pb.add_var("eps", 0.0, ub));
    }

    fn solve(self, solver: &dyn LpSolver) -> LpOutcome {
        let solution = solver.solve(&self.pb);
        debug!(name = self.pb.name(), status = ?solution.status, "LP solved");
        if solution.status != Status::Optimal {
            return LpOutcome::failed(solution.status);
        }
        self.read(&solution)
    }

    fn read(&self, solution: &Solution) -> LpOutcome {
        let bounds = self
            .bounds
            .iter()
            .map(|(&key, &var)| (key, solution.value(var)))
            .collect();
        let epsilons = self
            .epsilons
            .iter()
            .map(|(&key, &var)| (key, solution.value(var)))
            .collect();
        LpOutcome {
            status: Status::Optimal,
            bounds: Some(bounds),
            epsilons: Some(epsilons),
            scalar: self.uniform.map(|var| solution.value(var)),
        }
    }

    fn interval_objective(&mut self, obj: IntervalObjective) {
        let mut expr = LinExpr::new();
        if let Some(eps) = self.uniform {
            expr = expr.term(eps, 1.0);
        } else {
            let lengths: BTreeMap<NodeId, f64> = self
                .stnu
                .contingent_edges()
                .map(|e| (e.to, e.length()))
                .collect();
            for (&(j, _), &var) in &self.epsilons {
                let coef = match obj {
                    IntervalObjective::Naive => 1.0,
                    IntervalObjective::Normalized => 1.0 / lengths[&j].max(f64::MIN_POSITIVE),
                };
                expr = expr.term(var, coef);
            }
        }
        self.pb.set_objective(expr);
    }
}

/// Maximizes the guaranteed super-intervals of the contingents: how much
/// the environment's freedom could grow while a single fixed schedule still
/// works (the strong-controllability direction).
pub fn super_interval_lp(
    stnu: &Stnu,
    uniform_step: bool,
    obj: IntervalObjective,
    solver: &dyn LpSolver,
) -> LpOutcome {
    let mut setup = set_up(stnu, "super-interval", Sense::Maximize);
    if uniform_step {
        setup.uniform_eps(Variant::Super);
    }
    setup.edge_rows(Variant::Super);
    setup.interval_objective(obj);
    setup.solve(solver)
}

/// Minimizes the shrinkage that turns every contingent into a subinterval
/// schedulable by a fixed decision (the weak/dynamic direction).
pub fn max_subinterval_lp(
    stnu: &Stnu,
    uniform_step: bool,
    obj: IntervalObjective,
    solver: &dyn LpSolver,
) -> LpOutcome {
    let mut setup = set_up(stnu, "max-subinterval", Sense::Minimize);
    if uniform_step {
        setup.uniform_eps(Variant::Sub);
    }
    setup.edge_rows(Variant::Sub);
    setup.interval_objective(obj);
    setup.solve(solver)
}

/// Shrinks every contingent by the same proportion `delta` of its length,
/// minimizing `delta`.
pub fn proportion_lp(stnu: &Stnu, solver: &dyn LpSolver) -> LpOutcome {
    let mut setup = set_up(stnu, "proportion", Sense::Minimize);
    let delta = setup.pb.add_var("delta", 0.0, Some(1.0));
    setup.edge_rows(Variant::Sub);
    let contingents: Vec<(NodeId, f64)> = setup
        .stnu
        .contingent_edges()
        .map(|e| (e.to, e.length()))
        .collect();
    for (j, length) in contingents {
        let eps_hi = setup.epsilons[&(j, Sign::Hi)];
        let eps_lo = setup.epsilons[&(j, Sign::Lo)];
        setup.pb.add_constraint(
            LinExpr::new().term(eps_lo, 1.0).term(eps_hi, 1.0).term(delta, -length),
            Cmp::Eq,
            0.0,
        );
    }
    setup.pb.set_objective(LinExpr::single(delta));
    let solution = solver.solve(&setup.pb);
    if solution.status != Status::Optimal {
        return LpOutcome::failed(solution.status);
    }
    let mut outcome = setup.read(&solution);
    outcome.scalar = Some(solution.value(delta));
    outcome
}

/// Maximizes the smallest shrunk contingent interval.
pub fn maxmin_lp(stnu: &Stnu, solver: &dyn LpSolver) -> LpOutcome {
    let mut setup = set_up(stnu, "max-min", Sense::Maximize);
    let z = setup.pb.add_var("z", 0.0, None);
    setup.edge_rows(Variant::Sub);
    let contingents: Vec<(NodeId, f64)> = setup
        .stnu
        .contingent_edges()
        .map(|e| (e.to, e.length()))
        .collect();
    for (j, length) in contingents {
        let eps_hi = setup.epsilons[&(j, Sign::Hi)];
        let eps_lo = setup.epsilons[&(j, Sign::Lo)];
        // z <= length - eps_lo - eps_hi
        setup.pb.add_constraint(
            LinExpr::new().term(z, 1.0).term(eps_lo, 1.0).term(eps_hi, 1.0),
            Cmp::Le,
            length,
        );
    }
    setup.pb.set_objective(LinExpr::single(z));
    let solution = solver.solve(&setup.pb);
    if solution.status != Status::Optimal {
        return LpOutcome::failed(solution.status);
    }
    let mut outcome = setup.read(&solution);
    outcome.scalar = Some(solution.value(z));
    outcome
}

/// Minimizes the largest amount of uncertainty removed from any contingent.
pub fn minmax_lp(stnu: &Stnu, solver: &dyn LpSolver) -> LpOutcome {
    let mut setup = set_up(stnu, "min-max", Sense::Minimize);
    let z = setup.pb.add_var("z", 0.0, None);
    setup.edge_rows(Variant::Sub);
    let sinks: Vec<NodeId> = setup.stnu.contingent_edges().map(|e| e.to).collect();
    for j in sinks {
        let eps_hi = setup.epsilons[&(j, Sign::Hi)];
        let eps_lo = setup.epsilons[&(j, Sign::Lo)];
        // z >= eps_lo + eps_hi
        setup.pb.add_constraint(
            LinExpr::new().term(z, 1.0).term(eps_lo, -1.0).term(eps_hi, -1.0),
            Cmp::Ge,
            0.0,
        );
    }
    setup.pb.set_objective(LinExpr::single(z));
    let solution = solver.solve(&setup.pb);
    if solution.status != Status::Optimal {
        return LpOutcome::failed(solution.status);
    }
    let mut outcome = setup.read(&solution);
    outcome.scalar = Some(solution.value(z));
    outcome
}

/// The relaxation LP of the repair loop: per lifted contingent, an epsilon
/// in `[0, length]`; together they must cover the cycle deficit; the
/// removed uncertainty is minimized relative to each interval's length.
/// Returns the epsilon per contingent sink.
pub fn relaxation_lp(
    contingent: &BTreeMap<(NodeId, NodeId), LiftedBound>,
    cycle_weight: f64,
    solver: &dyn LpSolver,
) -> (Status, Option<BTreeMap<NodeId, f64>>) {
    let mut pb = Problem::new("relaxation", Sense::Minimize);
    let mut vars = BTreeMap::new();
    let mut cover = LinExpr::new();
    let mut objective = LinExpr::new();
    for (&(_, j), bound) in contingent {
        let length = bound.length();
        if length <= 0.0 {
            continue; // a point interval has nothing left to remove
        }
        let eps = pb.add_var(format!("eps_{j}"), 0.0, Some(length));
        vars.insert(j, eps);
        cover = cover.term(eps, 1.0);
        objective = objective.term(eps, 1.0 / length);
    }
    if vars.is_empty() {
        return (Status::Infeasible, None);
    }
    pb.add_constraint(cover, Cmp::Ge, -cycle_weight);
    pb.set_objective(objective);

    let solution = solver.solve(&pb);
    if solution.status != Status::Optimal {
        return (solution.status, None);
    }
    let values = vars.into_iter().map(|(j, var)| (j, solution.value(var))).collect();
    (Status::Optimal, Some(values))
}

/// The proportional variant of the relaxation LP: a single `delta` scales
/// every epsilon by its interval length; `delta` is minimized. Returns the
/// epsilons and `delta`.
pub fn relaxation_delta_lp(
    contingent: &BTreeMap<(NodeId, NodeId), LiftedBound>,
    cycle_weight: f64,
    solver: &dyn LpSolver,
) -> (Status, Option<BTreeMap<NodeId, f64>>, Option<f64>) {
    let mut pb = Problem::new("relaxation-delta", Sense::Minimize);
    let delta = pb.add_var("delta", 0.0, Some(1.0));
    let mut vars = BTreeMap::new();
    let mut cover = LinExpr::new();
    for (&(_, j), bound) in contingent {
        let length = bound.length();
        if length <= 0.0 {
            continue;
        }
        let eps = pb.add_var(format!("eps_{j}"), 0.0, Some(length));
        pb.add_constraint(
            LinExpr::new().term(eps, 1.0).term(delta, -length),
            Cmp::Eq,
            0.0,
        );
        vars.insert(j, eps);
        cover = cover.term(eps, 1.0);
    }
    if vars.is_empty() {
        return (Status::Infeasible, None, None);
    }
    pb.add_constraint(cover, Cmp::Ge, -cycle_weight);
    pb.set_objective(LinExpr::single(delta));

    let solution = solver.solve(&pb);
    if solution.status != Status::Optimal {
        return (solution.status, None, None);
    }
    let values = vars.into_iter().map(|(j, var)| (j, solution.value(var))).collect();
    (Status::Optimal, Some(values), Some(solution.value(delta)))
}
