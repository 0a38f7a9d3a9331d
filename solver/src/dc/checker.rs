//! Dynamic-controllability check.
//!
//! An STNU is dynamically controllable iff its normal-form labeled graph
//! has no semi-reducible negative cycle. The check runs a modified Dijkstra
//! backwards from every negative node; encountering another negative node
//! recurses into it first, and a start node reached again while it is still
//! on the recursion stack closes a cycle. The recursion is unrolled onto an
//! owned frame stack so that pathological networks cannot exhaust the call
//! stack.

use crate::collections::IdxHeap;
use crate::dc::conflict::{self, Conflict};
use crate::dc::labeled::{EdgeId, EdgeKind, LabeledGraph, NodeIdx, Provenance};
use crate::model::Stnu;
use crate::NodeId;
use hashbrown::HashMap;
use itertools::Itertools;
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Outcome of a DC check.
#[derive(Debug)]
pub struct DcResult {
    pub controllable: bool,
    /// The lifted conflict when the network is not controllable.
    pub conflict: Option<Conflict>,
}

/// An element of a traversal frontier: a node together with the case label
/// of the path that reached it (the parent of the labeled edge through
/// which the path enters the start node, if any).
#[derive(Copy, Clone, Debug, PartialEq)]
struct QueueElem {
    weight: f64,
    node: NodeIdx,
    label: Option<NodeId>,
}

/// Distance-table entry: the best known weight of a path from this node to
/// the start of the frame, plus the first edge of that path.
#[derive(Copy, Clone, Debug)]
pub(crate) struct DistEntry {
    pub dist: f64,
    pub edge: Option<EdgeId>,
}

pub(crate) type DistTable = HashMap<NodeIdx, DistEntry>;

/// Distance tables of a finished (or aborted) traversal, kept for novel
/// edge resolution.
pub(crate) type Preds = HashMap<NodeIdx, (DistTable, DistTable)>;

/// One suspended traversal: a start node, its two distance tables (paths
/// entered through a labeled edge vs. a plain one) and the frontier.
struct Frame {
    start: NodeIdx,
    label_dist: DistTable,
    unlabel_dist: DistTable,
    queue: IdxHeap<(NodeIdx, Option<NodeId>), f64>,
    /// The queue element this frame was interrupted on, either to recurse
    /// into another negative node or because a cycle was detected there.
    suspended: Option<QueueElem>,
}

impl Frame {
    fn new(g: &LabeledGraph, start: NodeIdx) -> Frame {
        let mut frame = Frame {
            start,
            label_dist: DistTable::new(),
            unlabel_dist: DistTable::new(),
            queue: IdxHeap::new(),
            suspended: None,
        };
        frame.label_dist.insert(start, DistEntry { dist: 0.0, edge: None });
        frame.unlabel_dist.insert(start, DistEntry { dist: 0.0, edge: None });
        for id in g.incoming(start) {
            let e = g.edge(id);
            if e.weight < 0.0 {
                frame.record(e.src, e.kind.parent(), e.weight, id);
            }
        }
        frame
    }

    fn table(&mut self, label: Option<NodeId>) -> &mut DistTable {
        if label.is_some() {
            &mut self.label_dist
        } else {
            &mut self.unlabel_dist
        }
    }

    /// Updates the table for `label` if `weight` improves on the recorded
    /// distance of `node`, pushing or re-prioritizing it on the frontier.
    fn record(&mut self, node: NodeIdx, label: Option<NodeId>, weight: f64, edge: EdgeId) {
        let table = self.table(label);
        let better = table.get(&node).is_none_or(|entry| weight < entry.dist);
        if better {
            table.insert(node, DistEntry { dist: weight, edge: Some(edge) });
            self.queue.add_or_decrease_key((node, label), weight);
        }
    }

    fn pop(&mut self) -> Option<QueueElem> {
        self.queue
            .pop()
            .map(|((node, label), weight)| QueueElem { weight, node, label })
    }
}

/// Checks dynamic controllability of the network, returning the lifted
/// conflict on failure.
pub fn dc_check(stnu: &Stnu) -> DcResult {
    let mut g = LabeledGraph::normal_form(stnu);
    let mut negative = g.negative_nodes();
    let mut preds: Preds = Preds::new();
    debug!(nodes = g.num_nodes(), negative = negative.len(), "starting DC check");

    let starts = negative.iter().copied().collect_vec();
    for start in starts {
        if !negative.contains(&start) {
            // already cleared by a deeper traversal
            continue;
        }
        if let Err(cycle) = traverse(&mut g, start, &mut preds, &mut negative) {
            debug!(edges = cycle.len(), "found a semi-reducible negative cycle");
            let resolved = conflict::resolve_cycle(&g, &preds, &cycle);
            let lifted = conflict::lift(stnu, &g, &resolved);
            return DcResult {
                controllable: false,
                conflict: Some(lifted),
            };
        }
    }
    DcResult {
        controllable: true,
        conflict: None,
    }
}

/// Runs the recursive traversal from `start` with an explicit frame stack.
/// `Ok` means no cycle goes through any node visited; `Err` carries the
/// cycle evidence (graph edges, novel shortcuts included).
fn traverse(
    g: &mut LabeledGraph,
    start: NodeIdx,
    preds: &mut Preds,
    negative: &mut BTreeSet<NodeIdx>,
) -> Result<(), Vec<EdgeId>> {
    let mut stack: Vec<Frame> = vec![Frame::new(g, start)];
    // the element whose relaxation is pending on the top frame (set when a
    // recursion into it just finished)
    let mut resume: Option<QueueElem> = None;

    loop {
        let elem = match resume.take() {
            Some(elem) => Some(elem),
            None => stack.last_mut().expect("at least one frame").pop(),
        };

        match elem {
            Some(elem) if elem.weight >= 0.0 => {
                // a non-negative shortest path becomes a shortcut edge
                let top = stack.last().expect("at least one frame").start;
                if elem.weight.is_finite() && elem.node != top {
                    let id = g.add_edge(
                        elem.node,
                        top,
                        elem.weight,
                        EdgeKind::Normal,
                        Provenance::Novel { label: elem.label },
                    );
                    trace!(src = elem.node, tgt = top, weight = elem.weight, id, "novel edge");
                }
            }
            Some(elem) if negative.contains(&elem.node) => {
                stack.last_mut().expect("at least one frame").suspended = Some(elem);
                if stack.iter().any(|f| f.start == elem.node) {
                    // the node is already being traversed below us: the
                    // negative paths between the two occurrences close a cycle
                    return Err(unwind(g, stack, elem.node, preds));
                }
                let child = Frame::new(g, elem.node);
                stack.push(child);
            }
            Some(elem) => relax(g, stack.last_mut().expect("at least one frame"), elem),
            None => {
                // frame exhausted with no cycle: the start node is cleared
                let done = stack.pop().expect("frame being processed");
                negative.remove(&done.start);
                preds.insert(done.start, (done.label_dist, done.unlabel_dist));
                match stack.last_mut() {
                    None => return Ok(()),
                    Some(parent) => {
                        // the parent still relaxes the element it recursed on
                        resume = parent.suspended.take();
                        debug_assert!(resume.is_some());
                    }
                }
            }
        }
    }
}

/// Relaxes every non-negative incoming edge of `elem.node`, skipping a
/// lower-case edge whose parent matches the path label (that contingent
/// cannot resolve at its minimum twice along one path).
fn relax(g: &LabeledGraph, frame: &mut Frame, elem: QueueElem) {
    let incoming = g.incoming(elem.node).collect_vec();
    for id in incoming {
        let e = g.edge(id);
        if e.weight < 0.0 {
            continue;
        }
        if let EdgeKind::Lower { parent } = e.kind {
            if Some(parent) == elem.label {
                continue;
            }
        }
        let weight = e.weight + elem.weight;
        if weight.is_finite() {
            frame.record(e.src, elem.label, weight, id);
        }
    }
}

/// Pops every frame of an interrupted traversal, collecting the cycle
/// edges: each frame contributes the path between its start node and the
/// node it recursed on, until the frame that started at the repeated node
/// closes the cycle. All distance tables are preserved for novel-edge
/// resolution.
fn unwind(g: &LabeledGraph, mut stack: Vec<Frame>, repeated: NodeIdx, preds: &mut Preds) -> Vec<EdgeId> {
    let mut end = Some(repeated);
    let mut edges = Vec::new();
    while let Some(frame) = stack.pop() {
        if let Some(elem) = frame.suspended {
            if end.is_some() {
                edges.extend(extract_edge_path(g, &frame, elem));
            }
        }
        if end == Some(frame.start) {
            end = None;
        }
        preds.insert(frame.start, (frame.label_dist, frame.unlabel_dist));
    }
    edges
}

/// Reads the path from `elem.node` back to the frame's start node out of
/// the distance table matching the path label.
fn extract_edge_path(g: &LabeledGraph, frame: &Frame, elem: QueueElem) -> Vec<EdgeId> {
    let table = if elem.label.is_some() {
        &frame.label_dist
    } else {
        &frame.unlabel_dist
    };
    path_from_table(g, table, elem.node, frame.start)
}

/// Follows recorded first-edges from `from` until `to`. The walk is
/// bounded by the table size; a missing entry truncates the path (it can
/// only happen on a table that was never written for `from`).
pub(crate) fn path_from_table(g: &LabeledGraph, table: &DistTable, from: NodeIdx, to: NodeIdx) -> Vec<EdgeId> {
    let mut edges = Vec::new();
    let mut current = from;
    loop {
        let Some(entry) = table.get(&current) else { break };
        let Some(edge) = entry.edge else { break };
        edges.push(edge);
        current = g.edge(edge).tgt;
        if current == to || edges.len() > table.len() {
            break;
        }
    }
    edges
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dc::Polarity;
    use crate::model::Stnu;

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
    fn test_single_contingent_is_dc() {
        let mut stnu = Stnu::new();
        stnu.add_vertex(0);
        stnu.add_vertex(1);
        stnu.add_contingent(0, 1, 1.0, 3.0).unwrap();
        let result = dc_check(&stnu);
        assert!(result.controllable);
        assert!(result.conflict.is_none());
    }

    #[test]
    fn test_requirement_chain_is_dc() {
        let mut stnu = Stnu::new();
        for v in 0..3 {
            stnu.add_vertex(v);
        }
        stnu.add_requirement(0, 1, 2.0, 5.0).unwrap();
        stnu.add_requirement(1, 2, 1.0, 4.0).unwrap();
        assert!(dc_check(&stnu).controllable);
    }

    #[test]
    fn test_uncontrollable_diamond_is_not_dc() {
        let result = dc_check(&diamond());
        assert!(!result.controllable);
        let conflict = result.conflict.expect("conflict evidence");
        assert!(conflict.cycle_weight < 0.0);
        // both contingents race into 3; at least one of them is blamed
        assert!(!conflict.contingent.is_empty());
        for key in conflict.contingent.keys() {
            assert!(key == &(0, 1) || key == &(0, 2));
        }
        // every lifted constraint maps back to a source edge
        for (i, j) in conflict.requirement.keys() {
            assert!(diamond().edge(*i, *j).is_some());
        }
    }

    #[test]
    fn test_diamond_conflict_weight() {
        // the tightest cycle runs over both waits: 2 + 2 - 4 - 4 = -4
        let conflict = dc_check(&diamond()).conflict.unwrap();
        assert_eq!(conflict.cycle_weight, -4.0);
        for bound in conflict.contingent.values() {
            assert_eq!(bound.polarity, Polarity::Upper);
        }
    }

    #[test]
    fn test_wide_diamond_is_dc() {
        // loose requirements absorb the contingent spread
        let mut stnu = Stnu::new();
        for v in 0..4 {
            stnu.add_vertex(v);
        }
        stnu.add_contingent(0, 1, 1.0, 5.0).unwrap();
        stnu.add_contingent(0, 2, 1.0, 5.0).unwrap();
        stnu.add_requirement(1, 3, 0.0, 10.0).unwrap();
        stnu.add_requirement(2, 3, 0.0, 10.0).unwrap();
        assert!(dc_check(&stnu).controllable);
    }

    #[test]
    fn test_dc_preserved_under_clone() {
        let stnu = diamond();
        assert_eq!(dc_check(&stnu).controllable, dc_check(&stnu.clone()).controllable);
    }
}
