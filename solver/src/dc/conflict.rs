//! From cycle evidence back to network constraints.
//!
//! The traversal reports its cycle as labeled-graph edges, some of which
//! are novel shortcuts. Resolution expands every shortcut into the original
//! edges it summarizes; lifting maps each original edge back onto the
//! requirement or contingent constraint of the network it renders, with the
//! polarity telling which of the two bounds the cycle leans on.

use crate::dc::checker::{path_from_table, Preds};
use crate::dc::labeled::{EdgeId, EdgeKind, LabeledGraph, LgNode, Provenance};
use crate::model::Stnu;
use crate::NodeId;
use hashbrown::HashSet;
use std::collections::BTreeMap;
use tracing::warn;

/// Which bound of a lifted constraint the conflict involves.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Polarity {
    Upper,
    Lower,
}

/// A constraint participating in a conflict, with its interval at the time
/// of the check.
#[derive(Copy, Clone, Debug)]
pub struct LiftedBound {
    pub lb: f64,
    pub ub: f64,
    pub polarity: Polarity,
}

impl LiftedBound {
    /// Interval length, the amount of uncertainty a contingent carries.
    pub fn length(&self) -> f64 {
        self.ub - self.lb
    }
}

/// A semi-reducible negative cycle lifted back onto the network.
#[derive(Debug, Clone, Default)]
pub struct Conflict {
    /// Requirement constraints on the cycle, keyed by their stored pair.
    pub requirement: BTreeMap<(NodeId, NodeId), LiftedBound>,
    /// Contingent constraints on the cycle, keyed by their stored pair.
    pub contingent: BTreeMap<(NodeId, NodeId), LiftedBound>,
    /// Total weight of the resolved cycle (negative).
    pub cycle_weight: f64,
    /// The resolved cycle itself: `(from, to, weight)` per original edge.
    pub cycle: Vec<(LgNode, LgNode, f64)>,
}

/// Expands every novel shortcut of the cycle into original edges, walking
/// the distance tables of the traversal that created it.
pub(crate) fn resolve_cycle(g: &LabeledGraph, preds: &Preds, cycle: &[EdgeId]) -> Vec<EdgeId> {
    let mut resolved = Vec::new();
    let mut visiting = HashSet::new();
    for &id in cycle {
        expand(g, preds, id, &mut resolved, &mut visiting);
    }
    resolved
}

fn expand(g: &LabeledGraph, preds: &Preds, id: EdgeId, out: &mut Vec<EdgeId>, visiting: &mut HashSet<EdgeId>) {
    let e = g.edge(id);
    let Provenance::Novel { label } = e.origin else {
        out.push(id);
        return;
    };
    if !visiting.insert(id) {
        // a shortcut cannot be part of its own expansion; drop it rather
        // than recurse forever
        warn!(id, "novel edge expansion revisited itself");
        return;
    }
    match preds.get(&e.tgt) {
        Some((label_dist, unlabel_dist)) => {
            let table = if label.is_some() { label_dist } else { unlabel_dist };
            let path = path_from_table(g, table, e.src, e.tgt);
            if path.is_empty() {
                warn!(id, "novel edge has no recorded path, keeping the shortcut");
            }
            for step in path {
                expand(g, preds, step, out, visiting);
            }
        }
        None => warn!(id, "novel edge without a recorded traversal"),
    }
    visiting.remove(&id);
}

/// Maps every resolved cycle edge back onto the constraint of the source
/// network it renders. When a cycle leans on both bounds of the same
/// constraint, the upper bound wins: it is the relaxable direction.
pub(crate) fn lift(stnu: &Stnu, g: &LabeledGraph, resolved: &[EdgeId]) -> Conflict {
    let mut conflict = Conflict::default();

    for &id in resolved {
        let e = g.edge(id);
        conflict.cycle_weight += e.weight;
        conflict
            .cycle
            .push((g.node(e.src), g.node(e.tgt), e.weight));

        let (pair, polarity) = match (g.node(e.src), g.node(e.tgt)) {
            (LgNode::Original(a), LgNode::Original(b)) => match stored_pair(stnu, a, b) {
                Some((pair, forward)) => {
                    let polarity = match e.kind {
                        EdgeKind::Upper { .. } => Polarity::Upper,
                        EdgeKind::Lower { .. } => Polarity::Lower,
                        EdgeKind::Normal if forward => Polarity::Upper,
                        EdgeKind::Normal => Polarity::Lower,
                    };
                    (pair, polarity)
                }
                None => {
                    warn!(?a, ?b, "cycle edge does not map to a stored constraint");
                    continue;
                }
            },
            // edges leaving the waypoint of a split contingent (i, j): the
            // case label decides when present; a plain edge back to the
            // source renders the lower bound, one on to the sink the upper
            (LgNode::Aux { src, sink }, other) => {
                let polarity = match e.kind {
                    EdgeKind::Upper { .. } => Polarity::Upper,
                    EdgeKind::Lower { .. } => Polarity::Lower,
                    EdgeKind::Normal if other == LgNode::Original(src) => Polarity::Lower,
                    EdgeKind::Normal => Polarity::Upper,
                };
                ((src, sink), polarity)
            }
            // edges entering the waypoint (from the source at `-l`, or the
            // zero-weight edge from the sink) both render the lower bound
            (_, LgNode::Aux { src, sink }) => {
                let polarity = match e.kind {
                    EdgeKind::Upper { .. } => Polarity::Upper,
                    EdgeKind::Lower { .. } => Polarity::Lower,
                    EdgeKind::Normal => Polarity::Lower,
                };
                ((src, sink), polarity)
            }
        };

        let stored = match stnu.edge(pair.0, pair.1) {
            Some(edge) => edge,
            None => continue,
        };
        let bucket = if stored.is_contingent() {
            &mut conflict.contingent
        } else {
            &mut conflict.requirement
        };
        bucket
            .entry(pair)
            .and_modify(|b| {
                if polarity == Polarity::Upper {
                    b.polarity = Polarity::Upper;
                }
            })
            .or_insert(LiftedBound {
                lb: stored.min_weight(),
                ub: stored.max_weight(),
                polarity,
            });
    }
    conflict
}

/// The stored orientation of the constraint between `a` and `b`, and
/// whether the queried direction matches it.
fn stored_pair(stnu: &Stnu, a: NodeId, b: NodeId) -> Option<((NodeId, NodeId), bool)> {
    let e = stnu.edge(a, b)?;
    if e.from == a {
        Some(((a, b), true))
    } else {
        Some(((b, a), false))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dc::dc_check;
    use crate::model::Stnu;

    #[test]
    fn test_lift_keys_exist_in_source() {
        // contingent feeding two competing requirements in a chain
        let mut stnu = Stnu::new();
        for v in 0..4 {
            stnu.add_vertex(v);
        }
        stnu.add_contingent(0, 1, 2.0, 8.0).unwrap();
        stnu.add_requirement(1, 2, 0.0, 1.0).unwrap();
        stnu.add_requirement(0, 2, 0.0, 4.0).unwrap();
        stnu.add_requirement(2, 3, 0.0, 1.0).unwrap();

        let result = dc_check(&stnu);
        assert!(!result.controllable);
        let conflict = result.conflict.unwrap();
        for (i, j) in conflict.requirement.keys() {
            let e = stnu.edge(*i, *j).unwrap();
            assert!(!e.is_contingent());
        }
        for (i, j) in conflict.contingent.keys() {
            let e = stnu.edge(*i, *j).unwrap();
            assert!(e.is_contingent());
        }
        assert!(conflict.cycle_weight < 0.0);
    }

    #[test]
    fn test_contingent_interval_is_captured() {
        let mut stnu = Stnu::new();
        for v in 0..3 {
            stnu.add_vertex(v);
        }
        stnu.add_contingent(0, 1, 1.0, 7.0).unwrap();
        stnu.add_requirement(1, 2, 0.0, 1.0).unwrap();
        stnu.add_requirement(0, 2, 0.0, 3.0).unwrap();

        let conflict = dc_check(&stnu).conflict.expect("not controllable");
        let bound = conflict.contingent.get(&(0, 1)).expect("contingent blamed");
        assert_eq!(bound.lb, 1.0);
        assert_eq!(bound.ub, 7.0);
        assert_eq!(bound.length(), 6.0);
    }
}
