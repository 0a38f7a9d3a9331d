//! Degree-of-controllability estimates.
//!
//! The dynamic degree approximates, for every conflict the repair loop
//! resolved, the probability that the realized contingent durations land
//! inside the cycle's slack; the overall degree is the product. The strong
//! degree compares shrunk against original interval volumes.

use crate::lp::Sign;
use crate::model::Stnu;
use crate::relax::{relax_search, ConflictRecord, RelaxOutcome};
use crate::{lp::LpSolver, NodeId};
use rand::rngs::SmallRng;
use rand::Rng;
use std::collections::BTreeMap;
use tracing::debug;

/// The standard normal CDF, via the Abramowitz-Stegun 7.1.26 polynomial.
/// The polynomial is applied to `|z|` and mirrored, so `phi(0)` is exactly
/// one half and the tails are monotone.
fn phi(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    if x == 0.0 {
        return 0.0;
    }
    let sign = x.signum();
    let x = x.abs();

    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

/// Probability that `a_1 + ... + a_n <= s` for independent `a_i ~ U(0, l_i)`,
/// by the normal approximation with matching mean and variance.
pub fn prob_small_sum(lengths: &[f64], s: f64) -> f64 {
    let mean: f64 = lengths.iter().sum::<f64>() / 2.0;
    let variance: f64 = lengths.iter().map(|l| l * l).sum::<f64>() / 12.0;
    if variance <= 0.0 {
        // degenerate: every length is zero
        return if s >= 0.0 { 1.0 } else { 0.0 };
    }
    phi((s - mean) / variance.sqrt())
}

/// Product of the per-conflict probabilities: each conflict is survived
/// when the contingent draws stay within the slack left by the cycle.
pub fn prob_of_conflicts(conflicts: &[ConflictRecord]) -> f64 {
    let mut probability = 1.0;
    for record in conflicts {
        let slack: f64 = record.lengths.iter().sum::<f64>() + record.cycle_weight;
        probability *= prob_small_sum(&record.lengths, slack);
    }
    probability
}

/// Estimated probability that dynamic dispatch of the network succeeds:
/// `1` when it is already dynamically controllable, the conflict product
/// otherwise, and `0` when the repair loop gave up.
pub fn prob_of_dc(stnu: &Stnu, solver: &dyn LpSolver) -> f64 {
    let RelaxOutcome {
        controllable,
        conflicts,
        ..
    } = relax_search(stnu, solver);
    if !controllable {
        return 0.0;
    }
    let p = prob_of_conflicts(&conflicts);
    debug!(conflicts = conflicts.len(), p, "estimated degree of controllability");
    p
}

// ---------------------------------------------------------------------
// Strong-controllability degree (volume based)
// ---------------------------------------------------------------------

/// Original and shrunk contingent intervals given the epsilons of a solved
/// subinterval LP, in contingent key order.
pub fn new_intervals(
    stnu: &Stnu,
    epsilons: &BTreeMap<(NodeId, Sign), f64>,
) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
    let mut original = Vec::new();
    let mut shrunk = Vec::new();
    for e in stnu.contingent_edges() {
        let (lb, ub) = (e.min_weight(), e.max_weight());
        original.push((lb, ub));
        let low = epsilons.get(&(e.to, Sign::Lo)).copied().unwrap_or(0.0);
        let high = epsilons.get(&(e.to, Sign::Hi)).copied().unwrap_or(0.0);
        shrunk.push((lb + low, ub - high));
    }
    (original, shrunk)
}

/// Volume ratio of the shrunk against the original intervals:
/// `(original volume, shrunk volume, degree)`.
pub fn controllability_degree(original: &[(f64, f64)], shrunk: &[(f64, f64)]) -> (f64, f64, f64) {
    let old: f64 = original.iter().map(|(a, b)| b - a).product();
    let new: f64 = shrunk.iter().map(|(a, b)| (b - a).max(0.0)).product();
    let degree = if old > 0.0 { new / old } else { 0.0 };
    (old, new, degree)
}

/// Draws one realization from the original intervals and reports whether
/// it falls inside the shrunk (strongly controllable) region.
pub fn sample_once(original: &[(f64, f64)], shrunk: &[(f64, f64)], rng: &mut SmallRng) -> bool {
    for (&(lo, hi), &(a, b)) in original.iter().zip(shrunk) {
        let draw = rng.random_range(lo..=hi);
        if draw < a || draw > b {
            return false;
        }
    }
    true
}

/// Extends a fixed decision for the controllable events with random
/// contingent draws and validates the full schedule.
pub fn alt_sample_once(
    stnu: &Stnu,
    decision: &BTreeMap<NodeId, f64>,
    epsilon: f64,
    rng: &mut SmallRng,
) -> bool {
    let mut schedule = decision.clone();
    for e in stnu.contingent_edges() {
        let Some(&start) = schedule.get(&e.from) else {
            return false;
        };
        let draw = rng.random_range(e.min_weight()..=e.max_weight());
        schedule.insert(e.to, start + draw);
    }
    crate::dispatch::schedule_is_valid(stnu, &schedule, epsilon)
}

/// The fixed decision suggested by a solved LP: the midpoint of every
/// controllable event's schedule box.
pub fn fixed_decision(stnu: &Stnu, bounds: &BTreeMap<(NodeId, Sign), f64>) -> BTreeMap<NodeId, f64> {
    stnu.verts()
        .filter(|&v| !stnu.is_uncontrollable(v))
        .filter_map(|v| {
            let lo = bounds.get(&(v, Sign::Lo))?;
            let hi = bounds.get(&(v, Sign::Hi))?;
            Some((v, (lo + hi) / 2.0))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dc::{LiftedBound, Polarity};
    use rand::SeedableRng;

    #[test]
    fn test_phi_midpoint_exact() {
        // lengths [10, 10, 10] and slack 15: mean is exactly 15, so the
        // z-score is 0 and the estimate must be one half to the last bit
        let p = prob_small_sum(&[10.0, 10.0, 10.0], 15.0);
        assert!((p - 0.5).abs() < 1e-9, "p was {p}");
    }

    #[test]
    fn test_phi_monotone_tails() {
        assert!(prob_small_sum(&[10.0], 1.0) < 0.5);
        assert!(prob_small_sum(&[10.0], 9.0) > 0.5);
        assert!(prob_small_sum(&[10.0], 100.0) > 0.999);
        assert!(prob_small_sum(&[10.0], -100.0) < 0.001);
    }

    #[test]
    fn test_conflict_product() {
        let record = |lengths: Vec<f64>, weight: f64| ConflictRecord {
            contingent: [(
                (0u32, 1u32),
                LiftedBound {
                    lb: 0.0,
                    ub: lengths[0],
                    polarity: Polarity::Upper,
                },
            )]
            .into_iter()
            .collect(),
            lengths,
            cycle_weight: weight,
        };
        // slack at the mean in both conflicts: product is a quarter
        let conflicts = vec![record(vec![10.0, 10.0], -10.0), record(vec![4.0], -2.0)];
        let p = prob_of_conflicts(&conflicts);
        assert!((p - 0.25).abs() < 1e-9, "p was {p}");
    }

    #[test]
    fn test_prob_of_dc_bounds() {
        use crate::lp::Simplex;
        let mut diamond = Stnu::new();
        for v in 0..4 {
            diamond.add_vertex(v);
        }
        diamond.add_contingent(0, 1, 1.0, 5.0).unwrap();
        diamond.add_contingent(0, 2, 1.0, 5.0).unwrap();
        diamond.add_requirement(1, 3, 0.0, 2.0).unwrap();
        diamond.add_requirement(2, 3, 0.0, 2.0).unwrap();
        let p = prob_of_dc(&diamond, &Simplex::default());
        assert!(p > 0.0 && p < 1.0, "p was {p}");

        let mut trivial = Stnu::new();
        trivial.add_vertex(0);
        trivial.add_vertex(1);
        trivial.add_contingent(0, 1, 1.0, 3.0).unwrap();
        assert_eq!(prob_of_dc(&trivial, &Simplex::default()), 1.0);
    }

    #[test]
    fn test_volume_degree() {
        let original = [(0.0, 4.0), (0.0, 2.0)];
        let shrunk = [(1.0, 3.0), (0.0, 2.0)];
        let (old, new, degree) = controllability_degree(&original, &shrunk);
        assert_eq!(old, 8.0);
        assert_eq!(new, 4.0);
        assert_eq!(degree, 0.5);
    }

    #[test]
    fn test_sampling_against_volume() {
        let original = [(0.0, 4.0)];
        let shrunk = [(1.0, 3.0)];
        let mut rng = SmallRng::seed_from_u64(9);
        let hits = (0..10_000).filter(|_| sample_once(&original, &shrunk, &mut rng)).count();
        let rate = hits as f64 / 10_000.0;
        assert!((rate - 0.5).abs() < 0.05, "rate was {rate}");
    }
}
