//! Real-time execution of an STNU against sampled realizations.
//!
//! The default strategy is late dynamic dispatch: events become enabled
//! once their predecessors and waits allow, the earliest allowed enabled
//! event executes next, uncontrollable events are pinned when their source
//! fires, and every decision is validated against the source constraints.
//! Initial execution windows come from the all-pairs minimal form of a
//! zero-anchored copy of the network.

use crate::dc::{LabeledGraph, LgNode};
use crate::model::Stnu;
use crate::utils::env_or;
use crate::{NodeId, ZERO_ID};
use itertools::Itertools;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace, warn};

/// Horizon granted to events with no bound against the origin.
const LARGE: f64 = 1_000_000.0;

/// Slack tolerated when validating a schedule against a constraint.
pub fn dispatch_epsilon() -> f64 {
    env_or("TEMPO_DISPATCH_EPSILON", 1e-3)
}

/// The durations drawn by the environment, keyed by uncontrollable sink.
pub type Realization = BTreeMap<NodeId, f64>;

/// Draws every contingent duration uniformly from its interval.
pub fn generate_realization(stnu: &Stnu, rng: &mut SmallRng) -> Realization {
    stnu.contingent_edges()
        .map(|e| (e.to, rng.random_range(e.min_weight()..=e.max_weight())))
        .collect()
}

/// A copy of the network where every event is reachable from the origin:
/// vertex `0` is added if missing and unanchored events receive a
/// `[0, LARGE]` bound against it.
pub fn set_dynamic_zeropoint(stnu: &Stnu) -> Stnu {
    let mut anchored = stnu.clone();
    anchored.add_vertex(ZERO_ID);
    let verts: Vec<NodeId> = anchored.verts().collect();
    for v in verts {
        if v != ZERO_ID && !anchored.edge_exists(ZERO_ID, v) {
            let _ = anchored.add_requirement(ZERO_ID, v, 0.0, LARGE);
        }
    }
    anchored
}

/// Checks the freshly scheduled `event` against every incident constraint
/// whose both endpoints are already scheduled.
pub fn safely_scheduled(stnu: &Stnu, schedule: &BTreeMap<NodeId, f64>, event: NodeId, epsilon: f64) -> bool {
    for e in stnu.edges_of(event) {
        let (Some(&start), Some(&end)) = (schedule.get(&e.from), schedule.get(&e.to)) else {
            continue;
        };
        let delta = end - start;
        if delta > e.max_weight() + epsilon || delta < e.min_weight() - epsilon {
            trace!(%e, delta, "constraint violated");
            return false;
        }
    }
    true
}

/// Validates a complete schedule against every constraint of the network.
pub fn schedule_is_valid(stnu: &Stnu, schedule: &BTreeMap<NodeId, f64>, epsilon: f64) -> bool {
    if stnu.verts().any(|v| !schedule.contains_key(&v)) {
        return false;
    }
    for e in stnu.edges() {
        let delta = schedule[&e.to] - schedule[&e.from];
        if delta > e.max_weight() + epsilon || delta < e.min_weight() - epsilon {
            return false;
        }
    }
    true
}

/// One late-dispatch trial over a private clone of the labeled graph.
///
/// `validation` is the network whose constraints decide success; `windows`
/// are the initial `[earliest, latest]` execution windows. Returns `true`
/// iff every event is scheduled without breaking a constraint.
pub fn dispatch(
    validation: &Stnu,
    graph: &mut LabeledGraph,
    windows: &BTreeMap<NodeId, (f64, f64)>,
    realization: &Realization,
    epsilon: f64,
) -> bool {
    let sinks_of: BTreeMap<NodeId, Vec<NodeId>> = {
        let mut map: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for e in validation.contingent_edges() {
            map.entry(e.from).or_default().push(e.to);
        }
        map
    };
    let uncontrollable: BTreeSet<NodeId> = validation.uncontrollables().collect();

    let events = windows.keys().copied().collect_vec();
    let mut windows = windows.clone();
    let mut not_executed: BTreeSet<NodeId> = events.iter().copied().collect();
    let mut executed: BTreeSet<NodeId> = BTreeSet::new();
    let mut enabled: BTreeSet<NodeId> = BTreeSet::new();
    enabled.insert(ZERO_ID);
    let mut schedule: BTreeMap<NodeId, f64> = BTreeMap::new();

    while !not_executed.is_empty() {
        // pick the enabled event with the smallest allowed time
        let mut best: Option<(f64, NodeId)> = None;
        for &event in &enabled {
            let mut lo = windows[&event].0;
            if !uncontrollable.contains(&event) {
                // waits: an unresolved contingent may force the event to sit
                // behind an already-executed activation point
                let idx = graph.node_idx(LgNode::Original(event)).expect("event in graph");
                for wait in graph.outgoing_upper(idx) {
                    let Some(parent) = wait.kind.parent() else { continue };
                    if parent == event || executed.contains(&parent) {
                        continue;
                    }
                    let LgNode::Original(target) = graph.node(wait.tgt) else { continue };
                    if let Some(&t) = schedule.get(&target) {
                        lo = lo.max(t - wait.weight);
                    }
                }
            }
            let better = best.is_none_or(|(t, _)| lo < t);
            if better {
                best = Some((lo, event));
            }
        }
        let Some((now, event)) = best else {
            warn!("no event is enabled; dispatch is stuck");
            return false;
        };

        trace!(event, now, "scheduling");
        schedule.insert(event, now);
        if !safely_scheduled(validation, &schedule, event, epsilon) {
            debug!(event, now, "dispatch violated a constraint");
            return false;
        }

        // firing a contingent source pins its sinks
        if let Some(sinks) = sinks_of.get(&event) {
            for &sink in sinks {
                let t = now + realization[&sink];
                windows.insert(sink, (t, t));
                enabled.insert(sink);
            }
        }

        // a resolved contingent discharges its waits
        if uncontrollable.contains(&event) {
            let idx = graph.node_idx(LgNode::Original(event)).expect("event in graph");
            let discharged = graph
                .upper_edges()
                .filter(|&id| {
                    let e = graph.edge(id);
                    e.kind.parent() == Some(event) && e.src != idx && e.tgt != idx
                })
                .collect_vec();
            for id in discharged {
                graph.remove_edge(id);
            }
        }

        not_executed.remove(&event);
        enabled.remove(&event);
        executed.insert(event);

        // propagate the decision through the plain edges
        let idx = graph.node_idx(LgNode::Original(event)).expect("event in graph");
        let mut tightened: Vec<(NodeId, f64, bool)> = Vec::new();
        for e in graph.outgoing_normal(idx) {
            if let LgNode::Original(k) = graph.node(e.tgt) {
                tightened.push((k, now + e.weight, true));
            }
        }
        for e in graph.incoming_normal(idx) {
            if let LgNode::Original(k) = graph.node(e.src) {
                tightened.push((k, now - e.weight, false));
            }
        }
        for (k, bound, is_upper) in tightened {
            let Some(window) = windows.get_mut(&k) else { continue };
            if is_upper {
                window.1 = window.1.min(bound);
            } else {
                window.0 = window.0.max(bound);
            }
        }

        // newly enabled events: all negative requirements and waits resolved
        for &candidate in &not_executed {
            if enabled.contains(&candidate) || uncontrollable.contains(&candidate) {
                continue;
            }
            let idx = graph.node_idx(LgNode::Original(candidate)).expect("event in graph");
            let mut ready = true;
            for e in graph.outgoing_normal(idx) {
                if e.weight < 0.0 {
                    let LgNode::Original(target) = graph.node(e.tgt) else { continue };
                    if !executed.contains(&target) {
                        ready = false;
                        break;
                    }
                }
            }
            if ready {
                for e in graph.outgoing_upper(idx) {
                    if e.weight < 0.0 {
                        let parent_done = e.kind.parent().is_some_and(|p| executed.contains(&p));
                        let target_done = match graph.node(e.tgt) {
                            LgNode::Original(t) => executed.contains(&t),
                            LgNode::Aux { .. } => false,
                        };
                        if !parent_done && !target_done {
                            ready = false;
                            break;
                        }
                    }
                }
            }
            if ready {
                enabled.insert(candidate);
            }
        }
    }
    true
}

/// Initial execution windows from the minimal form of the anchored network:
/// `[max(0, -d(e, 0)), d(0, e)]` per event.
fn initial_windows(anchored: &Stnu) -> Option<BTreeMap<NodeId, (f64, f64)>> {
    let matrix = anchored.distance_matrix();
    if matrix.has_negative_diagonal() {
        return None;
    }
    let windows = anchored
        .verts()
        .map(|v| {
            let lo = (-matrix.get(v, ZERO_ID).to_f64()).max(0.0);
            let hi = matrix.get(ZERO_ID, v).to_f64();
            (v, (lo, hi))
        })
        .collect();
    Some(windows)
}

/// Runs `trials` independent dispatch simulations with realizations drawn
/// from the given seed, returning the success rate in `[0, 1]`. An
/// inconsistent network is never dispatched and scores `0`.
pub fn simulate(stnu: &Stnu, trials: usize, seed: u64) -> f64 {
    if trials == 0 {
        return 0.0;
    }
    let anchored = set_dynamic_zeropoint(stnu);
    if !anchored.is_consistent() {
        warn!("network is inconsistent; dispatch is not attempted");
        return 0.0;
    }
    let windows = match initial_windows(&anchored) {
        Some(w) => w,
        None => return 0.0,
    };
    let graph = LabeledGraph::direct(&anchored);
    let epsilon = dispatch_epsilon();
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut wins = 0usize;
    for trial in 0..trials {
        let realization = generate_realization(stnu, &mut rng);
        let mut private = graph.clone();
        if dispatch(&anchored, &mut private, &windows, &realization, epsilon) {
            wins += 1;
        } else {
            trace!(trial, "dispatch trial failed");
        }
    }
    let rate = wins as f64 / trials as f64;
    debug!(trials, rate, "simulation finished");
    rate
}

/// Early execution: every controllable event runs at its earliest allowed
/// time, pushed later only when an executed successor forces it. Kept
/// experimental while the late strategy remains the reference.
#[cfg(feature = "early-dispatch")]
pub fn early_execution(stnu: &Stnu, realization: &Realization, epsilon: f64) -> bool {
    use crate::collections::IdxHeap;

    let anchored = set_dynamic_zeropoint(stnu);
    let Some(windows) = initial_windows(&anchored) else {
        return false;
    };
    let uncontrollable: BTreeSet<NodeId> = anchored.uncontrollables().collect();
    let sinks_of: BTreeMap<NodeId, Vec<NodeId>> = {
        let mut map: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for e in anchored.contingent_edges() {
            map.entry(e.from).or_default().push(e.to);
        }
        map
    };

    let mut planned: BTreeMap<NodeId, f64> = BTreeMap::new();
    let mut queue: IdxHeap<NodeId, f64> = IdxHeap::new();
    for v in anchored.verts() {
        if !uncontrollable.contains(&v) {
            let t = windows[&v].0;
            planned.insert(v, t);
            queue.push(v, t);
        }
    }

    let mut schedule: BTreeMap<NodeId, f64> = BTreeMap::new();
    while let Some((event, t)) = queue.pop() {
        if planned.get(&event).copied().unwrap_or(t) > t {
            // pushed later since it was enqueued
            queue.push(event, planned[&event]);
            continue;
        }
        schedule.insert(event, t);

        if let Some(sinks) = sinks_of.get(&event) {
            for &sink in sinks {
                let arrival = t + realization[&sink];
                planned.insert(sink, arrival);
                queue.push(sink, arrival);
            }
        }

        // executed events drag their unscheduled predecessors along
        for e in anchored.edges_of(event) {
            if e.to == event && !schedule.contains_key(&e.from) && !uncontrollable.contains(&e.from) {
                let at_least = t - e.max_weight();
                if planned.get(&e.from).copied().unwrap_or(f64::NEG_INFINITY) < at_least {
                    planned.insert(e.from, at_least);
                    if !queue.contains(e.from) {
                        queue.push(e.from, at_least);
                    }
                }
            }
        }
    }
    schedule_is_valid(stnu, &schedule, epsilon)
}
