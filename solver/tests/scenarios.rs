//! End-to-end scenarios over the whole pipeline: check, repair, dispatch,
//! estimate.

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tempo::dc::{dc_check, Polarity};
use tempo::dispatch::simulate;
use tempo::lp::{relaxation_delta_lp, Simplex, Status};
use tempo::model::{from_json_str, generate_chain, to_json_string, ModelError, Stnu};
use tempo::prob::{prob_of_dc, prob_small_sum};
use tempo::relax::relax_search;

fn two_node() -> Stnu {
    let mut stnu = Stnu::new();
    stnu.add_vertex(0);
    stnu.add_vertex(1);
    stnu.add_contingent(0, 1, 1.0, 3.0).unwrap();
    stnu
}

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
fn trivial_contingent_checks_and_dispatches() {
    let stnu = two_node();
    assert!(dc_check(&stnu).controllable);
    let rate = simulate(&stnu, 1000, 1);
    assert_eq!(rate, 1.0);
}

#[test]
fn diamond_is_repaired_by_relaxation() {
    let stnu = diamond();

    let result = dc_check(&stnu);
    assert!(!result.controllable);
    let conflict = result.conflict.expect("conflict evidence");
    assert!(!conflict.contingent.is_empty());
    for (pair, bound) in &conflict.contingent {
        assert!(stnu.edge(pair.0, pair.1).is_some(), "lifted pair {pair:?} unknown");
        assert_eq!(bound.polarity, Polarity::Upper);
    }

    let outcome = relax_search(&stnu, &Simplex::default());
    assert!(outcome.controllable);
    let repaired = outcome.network.expect("repaired network");
    assert!(dc_check(&repaired).controllable);

    // both contingent upper bounds came down across the repair
    let shrunk: Vec<f64> = repaired.contingent_edges().map(|e| e.max_weight()).collect();
    let total: f64 = shrunk.iter().sum();
    assert!(total < 10.0, "upper bounds were {shrunk:?}");
    for e in repaired.contingent_edges() {
        assert!(e.max_weight() <= 5.0 + 1e-9);
        assert!(e.min_weight() >= 1.0 - 1e-9);
        assert!(!e.is_empty_interval());
    }
}

#[test]
fn proportional_relaxation_of_three_contingents() {
    use std::collections::BTreeMap;
    use tempo::dc::LiftedBound;

    // three independent contingents of length 10 against a slack of 5
    let bounds: BTreeMap<_, _> = [(0u32, 1u32), (2, 3), (4, 5)]
        .into_iter()
        .map(|pair| {
            (
                pair,
                LiftedBound {
                    lb: 0.0,
                    ub: 10.0,
                    polarity: Polarity::Upper,
                },
            )
        })
        .collect();
    let (status, eps, delta) = relaxation_delta_lp(&bounds, -5.0, &Simplex::default());
    assert_eq!(status, Status::Optimal);
    assert!((delta.unwrap() - 1.0 / 6.0).abs() < 1e-9);
    for value in eps.unwrap().values() {
        assert!((value - 10.0 / 6.0).abs() < 1e-9);
    }
}

#[test]
fn controllable_stn_is_strongly_controllable() {
    let mut stnu = Stnu::new();
    for v in 0..3 {
        stnu.add_vertex(v);
    }
    stnu.add_requirement(0, 1, 2.0, 5.0).unwrap();
    stnu.add_requirement(1, 2, 1.0, 4.0).unwrap();

    let reduced = stnu.strongly_controllable_network().expect("strongly controllable");
    // without uncertainty the reduction is the identity up to minimality
    let m1 = stnu.minimal().unwrap();
    let m2 = reduced.minimal().unwrap();
    for e in m1.edges() {
        let other = m2.edge(e.from, e.to).expect("same constraint set");
        assert_eq!(e.cij, other.cij);
        assert_eq!(e.cji, other.cji);
    }
}

#[test]
fn strong_controllability_implies_dynamic() {
    // a strongly controllable diamond (loose joins)
    let mut stnu = Stnu::new();
    for v in 0..4 {
        stnu.add_vertex(v);
    }
    stnu.add_contingent(0, 1, 1.0, 5.0).unwrap();
    stnu.add_contingent(0, 2, 1.0, 5.0).unwrap();
    stnu.add_requirement(1, 3, 0.0, 10.0).unwrap();
    stnu.add_requirement(2, 3, 0.0, 10.0).unwrap();
    assert!(stnu.is_strongly_controllable());
    assert!(dc_check(&stnu).controllable);

    // and over a few generated chains
    for seed in 0..5 {
        let mut rng = SmallRng::seed_from_u64(seed);
        let chain = generate_chain(2, 30.0, &mut rng);
        if chain.is_strongly_controllable() {
            assert!(dc_check(&chain).controllable, "chain from seed {seed}");
        }
    }
}

#[test]
fn inconsistent_network_is_refused_gracefully() {
    let mut stnu = Stnu::new();
    for v in 0..3 {
        stnu.add_vertex(v);
    }
    // an explicitly empty interval is rejected at construction
    assert!(matches!(
        stnu.add_requirement(0, 1, 5.0, 2.0),
        Err(ModelError::EmptyInterval { .. })
    ));
    // a transitively empty one is only caught by the closure
    stnu.add_requirement(0, 1, 2.0, 5.0).unwrap();
    stnu.add_requirement(1, 2, 1.0, 4.0).unwrap();
    stnu.add_requirement(0, 2, 0.0, 1.0).unwrap();
    assert!(!stnu.is_consistent());
    assert_eq!(simulate(&stnu, 100, 5), 0.0);
}

#[test]
fn probability_estimator_midpoint() {
    // lengths [10, 10, 10] and slack 15 sit exactly on the mean
    let p = prob_small_sum(&[10.0, 10.0, 10.0], 15.0);
    assert!((p - 0.5).abs() < 1e-9);
}

#[test]
fn expected_probability_tracks_difficulty() {
    let solver = Simplex::default();
    let easy = prob_of_dc(&two_node(), &solver);
    let hard = prob_of_dc(&diamond(), &solver);
    assert_eq!(easy, 1.0);
    assert!(hard < 1.0);
    assert!(hard > 0.0);
}

#[test]
fn json_round_trip_preserves_analysis() {
    let stnu = diamond();
    let text = to_json_string(&stnu).unwrap();
    let again = from_json_str(&text).unwrap();
    assert_eq!(dc_check(&stnu).controllable, dc_check(&again).controllable);
    let a = relax_search(&stnu, &Simplex::default());
    let b = relax_search(&again, &Simplex::default());
    assert_eq!(a.controllable, b.controllable);
    assert_eq!(a.iterations, b.iterations);
}

#[test]
fn repaired_diamond_probability_and_dispatch_agree_on_success() {
    // once repaired, the estimator reports certainty and dispatch of the
    // repaired network cannot do worse than the original
    let outcome = relax_search(&diamond(), &Simplex::default());
    let repaired = outcome.network.expect("repaired");
    assert_eq!(prob_of_dc(&repaired, &Simplex::default()), 1.0);
    let original_rate = simulate(&diamond(), 300, 9);
    let repaired_rate = simulate(&repaired, 300, 9);
    assert!(repaired_rate >= original_rate);
}
