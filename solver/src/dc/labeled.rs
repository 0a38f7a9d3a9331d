use crate::model::Stnu;
use crate::NodeId;
use hashbrown::HashMap;
use std::collections::BTreeSet;

/// A node of the labeled distance graph.
///
/// Keeping the auxiliary waypoints as a distinct variant (instead of
/// allocating fresh integer ids) means lifting a conflict back to the
/// source network never has to guess whether an id is synthetic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LgNode {
    /// A timepoint of the source network.
    Original(NodeId),
    /// The waypoint splitting the contingent `(src, sink)` at its lower bound.
    Aux { src: NodeId, sink: NodeId },
}

/// Role of an edge in the labeled graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    Normal,
    /// Lower-case edge: the contingent into `parent` may resolve at its minimum.
    Lower { parent: NodeId },
    /// Upper-case edge: a wait against the contingent into `parent`.
    Upper { parent: NodeId },
}

impl EdgeKind {
    pub fn parent(self) -> Option<NodeId> {
        match self {
            EdgeKind::Normal => None,
            EdgeKind::Lower { parent } | EdgeKind::Upper { parent } => Some(parent),
        }
    }

    pub fn is_lower(self) -> bool {
        matches!(self, EdgeKind::Lower { .. })
    }

    pub fn is_upper(self) -> bool {
        matches!(self, EdgeKind::Upper { .. })
    }
}

/// Whether an edge came from the network transform or was derived as a
/// shortcut during the controllability traversal. A novel edge remembers
/// the label of the paths it summarizes so it can be expanded back.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Provenance {
    Original,
    Novel { label: Option<NodeId> },
}

pub type NodeIdx = usize;
pub type EdgeId = usize;

#[derive(Clone, Debug)]
pub struct LgEdge {
    pub src: NodeIdx,
    pub tgt: NodeIdx,
    pub weight: f64,
    pub kind: EdgeKind,
    pub origin: Provenance,
    /// Cleared when a wait edge is discharged during dispatch.
    pub alive: bool,
}

impl LgEdge {
    pub fn is_novel(&self) -> bool {
        matches!(self.origin, Provenance::Novel { .. })
    }
}

/// The labeled distance graph of an STNU.
///
/// Edges live in an arena; each node carries per-role adjacency lists so
/// that the dispatcher can walk waits without scanning, and removal is a
/// tombstone on the arena entry.
#[derive(Clone, Debug, Default)]
pub struct LabeledGraph {
    nodes: Vec<LgNode>,
    index: HashMap<LgNode, NodeIdx>,
    edges: Vec<LgEdge>,
    in_normal: Vec<Vec<EdgeId>>,
    out_normal: Vec<Vec<EdgeId>>,
    in_lower: Vec<Vec<EdgeId>>,
    out_lower: Vec<Vec<EdgeId>>,
    in_upper: Vec<Vec<EdgeId>>,
    out_upper: Vec<Vec<EdgeId>>,
}

impl LabeledGraph {
    /// The normal-form graph used by the DC check: every contingent with a
    /// positive lower bound `l` is split through an auxiliary waypoint `v'`
    /// sitting exactly `l` after its source, and the case labels attach to
    /// the `v' <-> sink` pair. A contingent whose lower bound is not
    /// positive keeps its labels directly on the source/sink pair.
    pub fn normal_form(stnu: &Stnu) -> LabeledGraph {
        let mut g = LabeledGraph::default();
        for v in stnu.verts() {
            g.ensure_node(LgNode::Original(v));
        }
        for e in stnu.edges() {
            let i = g.ensure_node(LgNode::Original(e.from));
            let j = g.ensure_node(LgNode::Original(e.to));
            let lb = e.min_weight();
            let ub = e.max_weight();
            if e.is_contingent() && lb > 0.0 {
                // the waypoint sits exactly `lb` after the source
                let aux = g.ensure_node(LgNode::Aux { src: e.from, sink: e.to });
                g.add_edge(i, aux, lb, EdgeKind::Normal, Provenance::Original);
                g.add_edge(aux, i, -lb, EdgeKind::Normal, Provenance::Original);
                g.add_edge(aux, j, ub - lb, EdgeKind::Normal, Provenance::Original);
                g.add_edge(j, aux, 0.0, EdgeKind::Normal, Provenance::Original);
                g.add_edge(aux, j, 0.0, EdgeKind::Lower { parent: e.to }, Provenance::Original);
                g.add_edge(j, aux, lb - ub, EdgeKind::Upper { parent: e.to }, Provenance::Original);
            } else {
                g.add_edge(i, j, e.cij.to_f64(), EdgeKind::Normal, Provenance::Original);
                g.add_edge(j, i, e.cji.to_f64(), EdgeKind::Normal, Provenance::Original);
                if e.is_contingent() {
                    g.add_edge(i, j, lb, EdgeKind::Lower { parent: e.to }, Provenance::Original);
                    g.add_edge(j, i, -ub, EdgeKind::Upper { parent: e.to }, Provenance::Original);
                }
            }
        }
        g
    }

    /// The flat labeled graph used by the dispatcher: ordinary edges in both
    /// directions plus the case labels attached straight to every contingent
    /// pair, with no auxiliary waypoints.
    pub fn direct(stnu: &Stnu) -> LabeledGraph {
        let mut g = LabeledGraph::default();
        for v in stnu.verts() {
            g.ensure_node(LgNode::Original(v));
        }
        for e in stnu.edges() {
            let i = g.ensure_node(LgNode::Original(e.from));
            let j = g.ensure_node(LgNode::Original(e.to));
            g.add_edge(i, j, e.cij.to_f64(), EdgeKind::Normal, Provenance::Original);
            g.add_edge(j, i, e.cji.to_f64(), EdgeKind::Normal, Provenance::Original);
            if e.is_contingent() {
                g.add_edge(i, j, e.min_weight(), EdgeKind::Lower { parent: e.to }, Provenance::Original);
                g.add_edge(j, i, -e.max_weight(), EdgeKind::Upper { parent: e.to }, Provenance::Original);
            }
        }
        g
    }

    pub fn ensure_node(&mut self, node: LgNode) -> NodeIdx {
        if let Some(&idx) = self.index.get(&node) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(node);
        self.index.insert(node, idx);
        for list in [
            &mut self.in_normal,
            &mut self.out_normal,
            &mut self.in_lower,
            &mut self.out_lower,
            &mut self.in_upper,
            &mut self.out_upper,
        ] {
            list.push(Vec::new());
        }
        idx
    }

    pub fn node_idx(&self, node: LgNode) -> Option<NodeIdx> {
        self.index.get(&node).copied()
    }

    pub fn node(&self, idx: NodeIdx) -> LgNode {
        self.nodes[idx]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn add_edge(&mut self, src: NodeIdx, tgt: NodeIdx, weight: f64, kind: EdgeKind, origin: Provenance) -> EdgeId {
        let id = self.edges.len();
        self.edges.push(LgEdge {
            src,
            tgt,
            weight,
            kind,
            origin,
            alive: true,
        });
        let (ins, outs) = match kind {
            EdgeKind::Normal => (&mut self.in_normal, &mut self.out_normal),
            EdgeKind::Lower { .. } => (&mut self.in_lower, &mut self.out_lower),
            EdgeKind::Upper { .. } => (&mut self.in_upper, &mut self.out_upper),
        };
        ins[tgt].push(id);
        outs[src].push(id);
        id
    }

    pub fn edge(&self, id: EdgeId) -> &LgEdge {
        &self.edges[id]
    }

    /// Tombstones an edge (used to discharge waits once their contingent
    /// has resolved).
    pub fn remove_edge(&mut self, id: EdgeId) {
        self.edges[id].alive = false;
    }

    /// Live incoming edges of every role, normal edges first.
    pub fn incoming(&self, n: NodeIdx) -> impl Iterator<Item = EdgeId> + '_ {
        self.in_normal[n]
            .iter()
            .chain(self.in_lower[n].iter())
            .chain(self.in_upper[n].iter())
            .copied()
            .filter(move |&id| self.edges[id].alive)
    }

    pub fn outgoing_normal(&self, n: NodeIdx) -> impl Iterator<Item = &LgEdge> + '_ {
        self.out_normal[n].iter().map(|&id| &self.edges[id]).filter(|e| e.alive)
    }

    pub fn incoming_normal(&self, n: NodeIdx) -> impl Iterator<Item = &LgEdge> + '_ {
        self.in_normal[n].iter().map(|&id| &self.edges[id]).filter(|e| e.alive)
    }

    pub fn outgoing_upper(&self, n: NodeIdx) -> impl Iterator<Item = &LgEdge> + '_ {
        self.out_upper[n].iter().map(|&id| &self.edges[id]).filter(|e| e.alive)
    }

    /// Ids of all live upper-case edges.
    pub fn upper_edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.alive && e.kind.is_upper())
            .map(|(id, _)| id)
    }

    /// Nodes with at least one incoming negative edge, in index order.
    pub fn negative_nodes(&self) -> BTreeSet<NodeIdx> {
        let mut neg = BTreeSet::new();
        for e in &self.edges {
            if e.alive && e.weight < 0.0 {
                neg.insert(e.tgt);
            }
        }
        neg
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Stnu;

    fn two_node() -> Stnu {
        let mut stnu = Stnu::new();
        stnu.add_vertex(0);
        stnu.add_vertex(1);
        stnu.add_contingent(0, 1, 1.0, 3.0).unwrap();
        stnu
    }

    #[test]
    fn test_normal_form_splits_positive_lower_bound() {
        let g = LabeledGraph::normal_form(&two_node());
        let aux = g.node_idx(LgNode::Aux { src: 0, sink: 1 }).expect("aux waypoint");
        let one = g.node_idx(LgNode::Original(1)).unwrap();
        // 6 edges total: 2 normal on the original pair would be replaced by
        // the 4 waypoint normals + 2 labeled edges
        let incoming: Vec<_> = g.incoming(one).map(|id| g.edge(id)).collect();
        assert!(incoming.iter().any(|e| e.src == aux && e.kind == EdgeKind::Lower { parent: 1 }));
        assert!(incoming.iter().any(|e| e.src == aux && e.kind == EdgeKind::Normal && e.weight == 2.0));
        // the upper-case wait is the only negative edge into the waypoint
        // besides the source link
        let neg = g.negative_nodes();
        assert!(neg.contains(&aux));
    }

    #[test]
    fn test_normal_form_zero_lower_bound_attaches_directly() {
        let mut stnu = Stnu::new();
        stnu.add_vertex(0);
        stnu.add_vertex(1);
        stnu.add_contingent(0, 1, 0.0, 3.0).unwrap();
        let g = LabeledGraph::normal_form(&stnu);
        assert!(g.node_idx(LgNode::Aux { src: 0, sink: 1 }).is_none());
        let one = g.node_idx(LgNode::Original(1)).unwrap();
        let lower: Vec<_> = g
            .incoming(one)
            .map(|id| g.edge(id))
            .filter(|e| e.kind.is_lower())
            .collect();
        assert_eq!(lower.len(), 1);
        assert_eq!(lower[0].weight, 0.0);
    }

    #[test]
    fn test_direct_graph_has_no_waypoints() {
        let g = LabeledGraph::direct(&two_node());
        assert_eq!(g.num_nodes(), 2);
        let zero = g.node_idx(LgNode::Original(0)).unwrap();
        let upper: Vec<_> = g
            .incoming(zero)
            .map(|id| g.edge(id))
            .filter(|e| e.kind.is_upper())
            .collect();
        assert_eq!(upper.len(), 1);
        assert_eq!(upper[0].weight, -3.0);
    }

    #[test]
    fn test_remove_edge_tombstones() {
        let mut g = LabeledGraph::direct(&two_node());
        let wait = g.upper_edges().next().unwrap();
        g.remove_edge(wait);
        assert_eq!(g.upper_edges().count(), 0);
        let zero = g.node_idx(LgNode::Original(0)).unwrap();
        assert!(g.incoming(zero).all(|id| !g.edge(id).kind.is_upper()));
    }
}
