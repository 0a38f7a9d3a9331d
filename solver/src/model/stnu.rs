use crate::model::{ModelError, Weight};
use crate::{NodeId, ZERO_ID};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The kind of a temporal constraint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EdgeType {
    /// The planner chooses the realized duration.
    Requirement,
    /// The environment draws the realized duration from the interval.
    Contingent,
}

/// A directed constraint `(i, j)` restricting `time(j) - time(i)` to the
/// interval `[-Cji, Cij]`.
#[derive(Clone, Debug)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    /// Maximum delay from `from` to `to`.
    pub cij: Weight,
    /// Negated minimum delay (kept negated so both bounds read as shortest
    /// path weights).
    pub cji: Weight,
    pub kind: EdgeType,
    /// Name of the duration distribution, for contingent edges loaded from
    /// probabilistic datasets.
    pub distribution: Option<String>,
}

impl Edge {
    pub fn is_contingent(&self) -> bool {
        self.kind == EdgeType::Contingent
    }

    /// The lower bound of the interval (`-Cji`).
    pub fn min_weight(&self) -> f64 {
        -self.cji.to_f64()
    }

    /// The upper bound of the interval (`Cij`).
    pub fn max_weight(&self) -> f64 {
        self.cij.to_f64()
    }

    /// Length of the interval, `Cij + Cji`.
    pub fn length(&self) -> f64 {
        (self.cij + self.cji).to_f64()
    }

    pub fn is_empty_interval(&self) -> bool {
        match self.cij + self.cji {
            Weight::Finite(len) => len < 0.0,
            Weight::PosInf => false,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Edge {} => {} [{}, {}] ({:?})",
            self.from,
            self.to,
            self.min_weight(),
            self.cij,
            self.kind
        )
    }
}

/// A Simple Temporal Network with Uncertainty.
///
/// Vertices are integer timepoints (node `0` is the temporal origin), edges
/// are interval constraints on timepoint differences. Every map is ordered
/// by node id so that all iterations (and therefore all the analyses
/// built on top) are deterministic.
#[derive(Clone, Debug, Default)]
pub struct Stnu {
    verts: BTreeSet<NodeId>,
    edges: BTreeMap<(NodeId, NodeId), Edge>,
    /// Keys of `edges` that are contingent.
    contingent: BTreeSet<(NodeId, NodeId)>,
    /// Source of the unique contingent edge into each uncontrollable sink.
    parent: BTreeMap<NodeId, NodeId>,
    makespan: Option<f64>,
}

impl Stnu {
    pub fn new() -> Self {
        Stnu::default()
    }

    // ------------------------------------------------------------------
    // Vertices
    // ------------------------------------------------------------------

    /// Idempotent vertex insertion.
    pub fn add_vertex(&mut self, id: NodeId) {
        self.verts.insert(id);
    }

    pub fn has_vertex(&self, id: NodeId) -> bool {
        self.verts.contains(&id)
    }

    pub fn verts(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.verts.iter().copied()
    }

    pub fn num_verts(&self) -> usize {
        self.verts.len()
    }

    /// Removes a vertex together with all its incident edges.
    pub fn remove_vertex(&mut self, id: NodeId) {
        if !self.verts.remove(&id) {
            return;
        }
        let incident: Vec<(NodeId, NodeId)> = self
            .edges
            .keys()
            .filter(|(i, j)| *i == id || *j == id)
            .copied()
            .collect();
        for key in incident {
            self.edges.remove(&key);
            if self.contingent.remove(&key) {
                self.parent.remove(&key.1);
            }
        }
        self.parent.remove(&id);
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    /// Adds the constraint `time(j) - time(i) in [lb, ub]`.
    ///
    /// `lb` may be `-inf` and `ub` may be `+inf` for requirement edges;
    /// contingent edges must be fully bounded (their realized duration is
    /// drawn from the interval). The endpoints must already be vertices and
    /// no edge may exist between them in either orientation.
    pub fn add_edge(
        &mut self,
        i: NodeId,
        j: NodeId,
        lb: f64,
        ub: f64,
        kind: EdgeType,
        distribution: Option<String>,
    ) -> Result<(), ModelError> {
        if !self.verts.contains(&i) || !self.verts.contains(&j) {
            return Err(ModelError::UnknownVertex { i, j });
        }
        if lb.is_nan() || ub.is_nan() {
            return Err(ModelError::MalformedInput(format!("NaN bound on edge ({i}, {j})")));
        }
        if lb > ub || lb == f64::INFINITY || ub == f64::NEG_INFINITY {
            return Err(ModelError::EmptyInterval { i, j });
        }
        if self.edges.contains_key(&(i, j)) || self.edges.contains_key(&(j, i)) {
            return Err(ModelError::DuplicateEdge { i, j });
        }
        if kind == EdgeType::Contingent {
            if !lb.is_finite() || !ub.is_finite() {
                return Err(ModelError::UnboundedContingent { i, j });
            }
            if self.parent.contains_key(&j) {
                return Err(ModelError::DuplicateContingent { sink: j });
            }
            self.contingent.insert((i, j));
            self.parent.insert(j, i);
        }
        self.edges.insert(
            (i, j),
            Edge {
                from: i,
                to: j,
                cij: Weight::from(ub),
                cji: Weight::from(-lb),
                kind,
                distribution,
            },
        );
        Ok(())
    }

    pub fn add_requirement(&mut self, i: NodeId, j: NodeId, lb: f64, ub: f64) -> Result<(), ModelError> {
        self.add_edge(i, j, lb, ub, EdgeType::Requirement, None)
    }

    pub fn add_contingent(&mut self, i: NodeId, j: NodeId, lb: f64, ub: f64) -> Result<(), ModelError> {
        self.add_edge(i, j, lb, ub, EdgeType::Contingent, None)
    }

    /// The edge between `i` and `j`, regardless of orientation.
    pub fn edge(&self, i: NodeId, j: NodeId) -> Option<&Edge> {
        self.edges.get(&(i, j)).or_else(|| self.edges.get(&(j, i)))
    }

    pub fn edge_exists(&self, i: NodeId, j: NodeId) -> bool {
        self.edge(i, j).is_some()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.values()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn contingent_edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.contingent.iter().map(|key| &self.edges[key])
    }

    pub fn requirement_edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.values().filter(|e| !e.is_contingent())
    }

    /// All edges incident to `id`, in key order.
    pub fn edges_of(&self, id: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.values().filter(move |e| e.from == id || e.to == id)
    }

    /// The directed weight from `i` to `j`: `Cij` when `(i, j)` is stored,
    /// `Cji` when `(j, i)` is stored, `0` on the diagonal, `+inf` otherwise.
    pub fn get_edge_weight(&self, i: NodeId, j: NodeId) -> Weight {
        if let Some(e) = self.edges.get(&(i, j)) {
            e.cij
        } else if let Some(e) = self.edges.get(&(j, i)) {
            e.cji
        } else if i == j && self.verts.contains(&i) {
            Weight::ZERO
        } else {
            Weight::PosInf
        }
    }

    /// Tightens the directed bound from `i` to `j` to `w`.
    ///
    /// Returns `true` iff the stored weight strictly decreased, or, with
    /// `equality`, when `w` does not exceed the stored weight.
    pub fn update_edge(&mut self, i: NodeId, j: NodeId, w: f64, equality: bool) -> bool {
        let w = Weight::from(w);
        let (stored, forward) = if self.edges.contains_key(&(i, j)) {
            (self.edges.get_mut(&(i, j)).unwrap(), true)
        } else if self.edges.contains_key(&(j, i)) {
            (self.edges.get_mut(&(j, i)).unwrap(), false)
        } else {
            return false;
        };
        let bound = if forward { &mut stored.cij } else { &mut stored.cji };
        if w < *bound {
            *bound = w;
            true
        } else if equality {
            w <= *bound
        } else {
            false
        }
    }

    /// Replaces the directed bound from `i` to `j` with `w`, loosening or
    /// tightening alike. Used by the relaxation loop to shrink contingent
    /// intervals. Returns `false` when no such edge exists.
    pub fn modify_edge(&mut self, i: NodeId, j: NodeId, w: f64) -> bool {
        if let Some(e) = self.edges.get_mut(&(i, j)) {
            e.cij = Weight::from(w);
            true
        } else if let Some(e) = self.edges.get_mut(&(j, i)) {
            e.cji = Weight::from(w);
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Contingency bookkeeping
    // ------------------------------------------------------------------

    pub fn uncontrollables(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.parent.keys().copied()
    }

    pub fn is_uncontrollable(&self, id: NodeId) -> bool {
        self.parent.contains_key(&id)
    }

    /// The source of the contingent edge into `sink`, if any.
    pub fn parent_of(&self, sink: NodeId) -> Option<NodeId> {
        self.parent.get(&sink).copied()
    }

    /// The unique contingent edge into an uncontrollable sink.
    pub fn incoming_contingent(&self, sink: NodeId) -> Option<&Edge> {
        let src = self.parent_of(sink)?;
        self.edges.get(&(src, sink))
    }

    // ------------------------------------------------------------------
    // Makespan
    // ------------------------------------------------------------------

    pub fn makespan(&self) -> Option<f64> {
        self.makespan
    }

    /// Sets a total horizon: every vertex receives an upper bound of
    /// `makespan` relative to the origin. Existing finite horizons are kept
    /// (they are tighter); missing or infinite `(0, v)` bounds become the
    /// makespan.
    pub fn set_makespan(&mut self, makespan: f64) {
        self.makespan = Some(makespan);
        let verts: Vec<NodeId> = self.verts.iter().copied().filter(|&v| v != ZERO_ID).collect();
        if !verts.is_empty() {
            self.add_vertex(ZERO_ID);
        }
        for v in verts {
            if let Some(e) = self.edges.get_mut(&(ZERO_ID, v)) {
                if !e.cij.is_finite() {
                    e.cij = Weight::Finite(makespan);
                }
            } else if let Some(e) = self.edges.get_mut(&(v, ZERO_ID)) {
                if !e.cji.is_finite() {
                    e.cji = Weight::Finite(makespan);
                }
            } else {
                // fresh horizon constraint
                let _ = self.add_requirement(ZERO_ID, v, 0.0, makespan);
            }
        }
    }

    // ------------------------------------------------------------------
    // Derived networks
    // ------------------------------------------------------------------

    /// The restriction of the network to the given vertices, keeping every
    /// edge whose both endpoints are retained.
    pub fn sub_network(&self, keep: &[NodeId]) -> Stnu {
        let kept: BTreeSet<NodeId> = keep.iter().copied().collect();
        let mut sub = Stnu::new();
        for &v in &kept {
            if self.verts.contains(&v) {
                sub.add_vertex(v);
            }
        }
        for (&(i, j), e) in &self.edges {
            if kept.contains(&i) && kept.contains(&j) {
                sub.edges.insert((i, j), e.clone());
                if e.is_contingent() {
                    sub.contingent.insert((i, j));
                    sub.parent.insert(j, i);
                }
            }
        }
        sub.makespan = self.makespan;
        sub
    }

    /// All-pairs shortest distances over the directed weights, by
    /// Floyd-Warshall with saturating additions.
    pub fn distance_matrix(&self) -> DistanceMatrix {
        let ids: Vec<NodeId> = self.verts.iter().copied().collect();
        let n = ids.len();
        let mut dist = vec![vec![Weight::PosInf; n]; n];
        for (x, &i) in ids.iter().enumerate() {
            for (y, &j) in ids.iter().enumerate() {
                dist[x][y] = self.get_edge_weight(i, j);
            }
        }
        for k in 0..n {
            for x in 0..n {
                if !dist[x][k].is_finite() {
                    continue;
                }
                for y in 0..n {
                    let via = dist[x][k] + dist[k][y];
                    if via < dist[x][y] {
                        dist[x][y] = via;
                    }
                }
            }
        }
        DistanceMatrix { ids, dist }
    }

    /// The minimal network: a copy with every stored edge tightened to its
    /// all-pairs shortest distance. `None` when the network is inconsistent
    /// (a negative self-distance or an emptied interval).
    pub fn minimal(&self) -> Option<Stnu> {
        let m = self.distance_matrix();
        if m.has_negative_diagonal() {
            return None;
        }
        let mut out = self.clone();
        for (x, &i) in m.ids.iter().enumerate() {
            for (y, &j) in m.ids.iter().enumerate() {
                if let Weight::Finite(w) = m.dist[x][y] {
                    out.update_edge(i, j, w, false);
                }
            }
        }
        if out.edges.values().any(|e| e.is_empty_interval()) {
            return None;
        }
        Some(out)
    }

    pub fn is_consistent(&self) -> bool {
        self.minimal().is_some()
    }

    // ------------------------------------------------------------------
    // Strong controllability
    // ------------------------------------------------------------------

    /// Projects every requirement edge onto the controllable timepoints,
    /// substituting each uncontrollable endpoint by its contingent source
    /// with the worst-case correction of Vidal et al.: an edge `(u, v)`
    /// becomes `[lb + u_i - l_j, ub + l_i - u_j]` between the sources.
    ///
    /// Returns the reduced network when it is consistent (a single
    /// schedule of its solutions then works for every realization) and
    /// `None` otherwise.
    pub fn strongly_controllable_network(&self) -> Option<Stnu> {
        if !self.is_consistent() {
            return None;
        }
        let mut reduced = Stnu::new();
        for v in self.verts() {
            if !self.is_uncontrollable(v) {
                reduced.add_vertex(v);
            }
        }
        for e in self.requirement_edges() {
            let (i, l_i, u_i) = self.projected_endpoint(e.from)?;
            let (j, l_j, u_j) = self.projected_endpoint(e.to)?;

            let lower = e.min_weight() + u_i - l_j;
            let upper = e.max_weight() + l_i - u_j;

            if i == j {
                // the projected constraint binds a timepoint against itself
                if lower > 0.0 || upper < 0.0 {
                    return None;
                }
            } else if reduced.edge_exists(i, j) {
                reduced.update_edge(i, j, upper, false);
                reduced.update_edge(j, i, -lower, false);
            } else if reduced.add_requirement(i, j, lower, upper).is_err() {
                return None;
            }
        }
        if reduced.is_consistent() {
            Some(reduced)
        } else {
            None
        }
    }

    pub fn is_strongly_controllable(&self) -> bool {
        self.strongly_controllable_network().is_some()
    }

    /// The contingent source of an endpoint together with the bounds of its
    /// incoming contingent edge; controllable endpoints project onto
    /// themselves with a `[0, 0]` correction.
    fn projected_endpoint(&self, v: NodeId) -> Option<(NodeId, f64, f64)> {
        if self.is_uncontrollable(v) {
            let c = self.incoming_contingent(v)?;
            Some((c.from, c.min_weight(), c.max_weight()))
        } else {
            Some((v, 0.0, 0.0))
        }
    }
}

impl fmt::Display for Stnu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in self.edges.values() {
            if e.from == ZERO_ID {
                writeln!(f, "Vertex {}: [{}, {}]", e.to, e.min_weight(), e.cij)?;
            } else {
                writeln!(f, "Edge {} => {}: [{}, {}]", e.from, e.to, e.min_weight(), e.cij)?;
            }
        }
        Ok(())
    }
}

/// All-pairs shortest distances of an STNU, indexed by node id.
#[derive(Clone, Debug)]
pub struct DistanceMatrix {
    ids: Vec<NodeId>,
    dist: Vec<Vec<Weight>>,
}

impl DistanceMatrix {
    pub fn get(&self, i: NodeId, j: NodeId) -> Weight {
        match (self.pos(i), self.pos(j)) {
            (Some(x), Some(y)) => self.dist[x][y],
            _ => Weight::PosInf,
        }
    }

    pub fn has_negative_diagonal(&self) -> bool {
        (0..self.ids.len()).any(|x| self.dist[x][x] < Weight::ZERO)
    }

    fn pos(&self, id: NodeId) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn chain() -> Stnu {
        let mut stnu = Stnu::new();
        for v in 0..3 {
            stnu.add_vertex(v);
        }
        stnu.add_requirement(0, 1, 2.0, 5.0).unwrap();
        stnu.add_requirement(1, 2, 1.0, 4.0).unwrap();
        stnu.add_requirement(0, 2, 0.0, 6.0).unwrap();
        stnu
    }

    #[test]
    fn test_edge_weights() {
        let stnu = chain();
        assert_eq!(stnu.get_edge_weight(0, 1), Weight::Finite(5.0));
        assert_eq!(stnu.get_edge_weight(1, 0), Weight::Finite(-2.0));
        assert_eq!(stnu.get_edge_weight(1, 1), Weight::ZERO);
        assert_eq!(stnu.get_edge_weight(2, 17), Weight::PosInf);
    }

    #[test]
    fn test_update_edge() {
        let mut stnu = chain();
        assert!(stnu.update_edge(0, 1, 4.0, false));
        assert!(!stnu.update_edge(0, 1, 4.0, false));
        assert!(stnu.update_edge(0, 1, 4.0, true));
        // reverse direction updates Cji
        assert!(stnu.update_edge(1, 0, -3.0, false));
        assert_eq!(stnu.edge(0, 1).unwrap().min_weight(), 3.0);
    }

    #[test]
    fn test_rejects_empty_interval() {
        let mut stnu = Stnu::new();
        stnu.add_vertex(0);
        stnu.add_vertex(1);
        assert!(matches!(
            stnu.add_requirement(0, 1, 3.0, 1.0),
            Err(ModelError::EmptyInterval { .. })
        ));
    }

    #[test]
    fn test_rejects_second_contingent_into_sink() {
        let mut stnu = Stnu::new();
        for v in 0..3 {
            stnu.add_vertex(v);
        }
        stnu.add_contingent(0, 2, 1.0, 3.0).unwrap();
        assert!(matches!(
            stnu.add_contingent(1, 2, 1.0, 3.0),
            Err(ModelError::DuplicateContingent { sink: 2 })
        ));
        assert_eq!(stnu.uncontrollables().collect::<Vec<_>>(), vec![2]);
        assert_eq!(stnu.parent_of(2), Some(0));
    }

    #[test]
    fn test_minimal_tightens() {
        let stnu = chain();
        let min = stnu.minimal().expect("consistent");
        // 0 -> 2 is tightened through 1: ub = min(6, 5 + 4) = 6, lb = max(0, 2 + 1) = 3
        assert_eq!(min.get_edge_weight(0, 2), Weight::Finite(6.0));
        assert_eq!(min.get_edge_weight(2, 0), Weight::Finite(-3.0));
    }

    #[test]
    fn test_minimal_idempotent() {
        let min = chain().minimal().unwrap();
        let again = min.minimal().unwrap();
        for e in min.edges() {
            let other = again.edge(e.from, e.to).unwrap();
            assert_eq!(e.cij, other.cij);
            assert_eq!(e.cji, other.cji);
        }
    }

    #[test]
    fn test_inconsistent_network() {
        let mut stnu = chain();
        // forces 2 to happen before 1 ever can
        stnu.update_edge(0, 2, 1.0, false);
        assert!(!stnu.is_consistent());
        assert!(stnu.minimal().is_none());
    }

    #[test]
    fn test_strong_controllability_without_contingents() {
        let stnu = chain();
        let reduced = stnu.strongly_controllable_network().expect("controllable");
        // without contingents the projection is the identity: same minimal network
        let m1 = stnu.minimal().unwrap();
        let m2 = reduced.minimal().unwrap();
        for e in m1.edges() {
            let other = m2.edge(e.from, e.to).unwrap();
            assert_eq!(e.cij, other.cij);
            assert_eq!(e.cji, other.cji);
        }
    }

    #[test]
    fn test_strong_controllability_under_uncertainty() {
        // a contingent [1, 5] into 1 followed by a requirement on 2: the
        // projection onto the sources is [5 - 0, 2 + 1] = [5, 3], empty, so
        // no fixed schedule survives every realization
        let mut stnu = Stnu::new();
        for v in 0..3 {
            stnu.add_vertex(v);
        }
        stnu.add_contingent(0, 1, 1.0, 5.0).unwrap();
        stnu.add_requirement(1, 2, 0.0, 2.0).unwrap();
        assert!(!stnu.is_strongly_controllable());

        // widening the requirement to absorb the uncertainty fixes it:
        // projection becomes [0 + 5, 10 + 1] = [5, 11]
        let mut wide = Stnu::new();
        for v in 0..3 {
            wide.add_vertex(v);
        }
        wide.add_contingent(0, 1, 1.0, 5.0).unwrap();
        wide.add_requirement(1, 2, 0.0, 10.0).unwrap();
        assert!(wide.is_strongly_controllable());
    }

    #[test]
    fn test_sub_network() {
        let stnu = chain();
        let sub = stnu.sub_network(&[0, 1]);
        assert_eq!(sub.num_verts(), 2);
        assert_eq!(sub.num_edges(), 1);
        assert!(sub.edge(0, 1).is_some());
    }

    #[test]
    fn test_remove_vertex() {
        let mut stnu = Stnu::new();
        for v in 0..3 {
            stnu.add_vertex(v);
        }
        stnu.add_contingent(0, 1, 1.0, 3.0).unwrap();
        stnu.add_requirement(1, 2, 0.0, 2.0).unwrap();
        stnu.remove_vertex(1);
        assert!(!stnu.has_vertex(1));
        assert_eq!(stnu.num_edges(), 0);
        assert_eq!(stnu.uncontrollables().count(), 0);
    }

    #[test]
    fn test_set_makespan() {
        let mut stnu = Stnu::new();
        for v in 0..3 {
            stnu.add_vertex(v);
        }
        stnu.add_requirement(0, 1, 0.0, f64::INFINITY).unwrap();
        stnu.set_makespan(100.0);
        assert_eq!(stnu.get_edge_weight(0, 1), Weight::Finite(100.0));
        assert_eq!(stnu.get_edge_weight(0, 2), Weight::Finite(100.0));
    }
}
