//! The repair loop: shrink contingent intervals until the network becomes
//! dynamically controllable.
//!
//! Each round runs the DC check; on failure the lifted contingent bounds
//! and the cycle weight feed the relaxation LP, whose epsilons are applied
//! through `modify_edge` (upper bounds come down, lower bounds go up). The
//! cycle deficit is removed in full every round, so the loop terminates on
//! bounded networks.

use crate::dc::{dc_check, Conflict, LiftedBound, Polarity};
use crate::lp::{relaxation_lp, LpSolver, Status};
use crate::model::Stnu;
use crate::NodeId;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Hard cap on repair rounds; reaching it means the instance keeps
/// producing conflicts the LP cannot pay for (numerically degenerate
/// input) and is reported as irrecoverable rather than looping.
const MAX_ROUNDS: usize = 1000;

/// One resolved conflict, as recorded by the repair loop.
#[derive(Clone, Debug)]
pub struct ConflictRecord {
    /// The contingent bounds blamed by the DC check, keyed by edge pair.
    pub contingent: BTreeMap<(NodeId, NodeId), LiftedBound>,
    /// Interval lengths of those contingents when the conflict was found.
    pub lengths: Vec<f64>,
    /// Weight of the semi-reducible negative cycle.
    pub cycle_weight: f64,
}

impl ConflictRecord {
    fn from_conflict(conflict: &Conflict) -> ConflictRecord {
        ConflictRecord {
            contingent: conflict.contingent.clone(),
            lengths: conflict.contingent.values().map(LiftedBound::length).collect(),
            cycle_weight: conflict.cycle_weight,
        }
    }
}

/// Outcome of the relaxation search.
#[derive(Debug)]
pub struct RelaxOutcome {
    /// Whether the loop reached a dynamically controllable network.
    pub controllable: bool,
    /// The repaired network; `None` when the instance is irrecoverable.
    pub network: Option<Stnu>,
    /// Number of conflicts resolved.
    pub iterations: usize,
    /// Every conflict encountered, in resolution order.
    pub conflicts: Vec<ConflictRecord>,
}

/// Repeatedly checks and repairs the network. The input is never mutated.
pub fn relax_search(stnu: &Stnu, solver: &dyn LpSolver) -> RelaxOutcome {
    let mut network = stnu.clone();
    let mut conflicts = Vec::new();

    for iteration in 0..MAX_ROUNDS {
        let result = dc_check(&network);
        if result.controllable {
            debug!(iteration, "network is dynamically controllable");
            return RelaxOutcome {
                controllable: true,
                network: Some(network),
                iterations: iteration,
                conflicts,
            };
        }
        let conflict = result.conflict.expect("non-DC check carries a conflict");
        debug!(
            iteration,
            cycle_weight = conflict.cycle_weight,
            contingents = conflict.contingent.len(),
            "resolving conflict"
        );
        conflicts.push(ConflictRecord::from_conflict(&conflict));

        let (status, epsilons) = relaxation_lp(&conflict.contingent, conflict.cycle_weight, solver);
        if status != Status::Optimal {
            warn!(?status, "relaxation LP cannot resolve the conflict");
            return RelaxOutcome {
                controllable: false,
                network: None,
                iterations: iteration,
                conflicts,
            };
        }
        let epsilons = epsilons.expect("optimal relaxation carries epsilons");

        for (&(i, j), bound) in &conflict.contingent {
            let Some(&eps) = epsilons.get(&j) else { continue };
            if eps <= 0.0 {
                continue;
            }
            match bound.polarity {
                // new upper bound: ub - eps
                Polarity::Upper => {
                    network.modify_edge(i, j, bound.ub - eps);
                }
                // new lower bound: lb + eps, stored negated
                Polarity::Lower => {
                    network.modify_edge(j, i, -(bound.lb + eps));
                }
            }
        }
    }

    warn!("relaxation did not converge within {MAX_ROUNDS} rounds");
    RelaxOutcome {
        controllable: false,
        network: None,
        iterations: MAX_ROUNDS,
        conflicts,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lp::Simplex;

    fn diamond() -> Stnu {
        let mut stnu = Stnu::new();
        for v in 0..4 {
            stnu.add_vertex(v);
        }
        stnu.add_contingent(0, 1, 1.0, 5.0).unwrap();
        stnu.add_contingent(0, 2, 1.0, 5.0).unwrap();
        stnu.add_requirement(1, 3, 0.0, 2.0).unwrap();
        stnu.add_requirement(2, 3, 0.0, 2.0).unwrap();
        stnu
    }

    #[test]
    fn test_relaxed_network_is_dc() {
        let stnu = diamond();
        let outcome = relax_search(&stnu, &Simplex::default());
        assert!(outcome.controllable);
        assert!(outcome.iterations >= 1);
        let repaired = outcome.network.expect("repaired network");
        assert!(dc_check(&repaired).controllable);
        // the input is untouched
        assert!(!dc_check(&stnu).controllable);
    }

    #[test]
    fn test_contingent_spans_shrunk() {
        let outcome = relax_search(&diamond(), &Simplex::default());
        let repaired = outcome.network.unwrap();
        let original_span: f64 = diamond().contingent_edges().map(|e| e.length()).sum();
        let new_span: f64 = repaired.contingent_edges().map(|e| e.length()).sum();
        assert!(new_span < original_span);
        // upper bounds only came down
        for e in repaired.contingent_edges() {
            let orig = diamond();
            let source = orig.edge(e.from, e.to).unwrap();
            assert!(e.max_weight() <= source.max_weight() + 1e-9);
            assert!(e.min_weight() >= source.min_weight() - 1e-9);
        }
    }

    #[test]
    fn test_dc_network_needs_no_rounds() {
        let mut stnu = Stnu::new();
        stnu.add_vertex(0);
        stnu.add_vertex(1);
        stnu.add_contingent(0, 1, 1.0, 3.0).unwrap();
        let outcome = relax_search(&stnu, &Simplex::default());
        assert!(outcome.controllable);
        assert_eq!(outcome.iterations, 0);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_conflict_records_carry_weights() {
        let outcome = relax_search(&diamond(), &Simplex::default());
        assert!(!outcome.conflicts.is_empty());
        for record in &outcome.conflicts {
            assert!(record.cycle_weight < 0.0);
            assert_eq!(record.lengths.len(), record.contingent.len());
        }
    }
}
