//! Integer programs whose solutions are identifying codes.
//!
//! For every target node `t` and every pair of targets `(t1, t2)`,
//! a placement `P` must satisfy
//!
//! * coverage: at least one neighbor of `t` is in `P`,
//! * separation: at least one node adjacent to exactly one of `t1` and `t2`
//!   is in `P`.
//!
//! Together these give every target a distinct, non-empty set of observing
//! sensors. [`CoverModel`] encodes both as linear constraints over one binary
//! variable per candidate node, either once or for several disjoint copies
//! at the same time.

use std::fmt;

use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::graph::{Degeneracy, Graph, NodeId, Roles};
use crate::solver::{Assignment, LinearExpr, Model, QuadExpr, Sense, Var};

/// Index of a copy of the variable set in a replicated model.
pub type Replica = u32;

/// A set of sensor nodes, sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Placement {
    nodes: Vec<NodeId>,
}

impl Placement {
    pub fn new(mut nodes: Vec<NodeId>) -> Self {
        nodes.sort_unstable();
        nodes.dedup();
        Placement { nodes }
    }

    #[inline]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.binary_search(&node).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item=NodeId> + '_ {
        self.nodes.iter().copied()
    }

    /// Returns `true` if no node is part of both placements.
    pub fn is_disjoint(&self, other: &Placement) -> bool {
        self.iter().all(|n| !other.contains(n))
    }

    /// Check coverage and separation of all targets directly on the graph.
    pub fn is_identifying(&self, graph: &Graph, roles: &Roles) -> bool {
        let observed: Vec<Vec<NodeId>> = roles.targets().iter()
            .map(|&t| graph.neighbors(t).iter().copied().filter(|&n| self.contains(n)).collect())
            .collect();
        observed.iter().all(|o| !o.is_empty())
            && observed.iter().enumerate().all(|(i, a)| observed[i + 1..].iter().all(|b| a != b))
    }
}

impl From<Vec<NodeId>> for Placement {
    fn from(nodes: Vec<NodeId>) -> Self {
        Placement::new(nodes)
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, n) in self.nodes.iter().enumerate() {
            if i == 0 {
                write!(f, "{n}")?;
            } else {
                write!(f, ", {n}")?;
            }
        }
        write!(f, "}}")
    }
}


/// A restriction added to the base model between enumeration rounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    /// The node may not host a sensor.
    Pin(NodeId),
    /// This exact placement may not be chosen again.
    Forbid(Placement),
}

/// Ordered list of exclusions. Only ever grows; its version is its length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    items: Vec<Exclusion>,
}

impl Exclusions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, exclusion: Exclusion) {
        self.items.push(exclusion);
    }

    /// Pin every node of `placement` to zero, skipping nodes pinned before.
    pub fn pin_all(&mut self, placement: &Placement) {
        for n in placement.iter() {
            if !self.is_pinned(n) {
                self.push(Exclusion::Pin(n));
            }
        }
    }

    pub fn is_pinned(&self, node: NodeId) -> bool {
        self.items.iter().any(|e| *e == Exclusion::Pin(node))
    }

    #[inline]
    pub fn version(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item=&Exclusion> {
        self.items.iter()
    }
}


/// Identifying code program built from a graph, ready to be handed to a solver.
#[derive(Debug, Clone)]
pub struct CoverModel {
    model: Model,
    vars: FxHashMap<(NodeId, Replica), Var>,
    candidates: Vec<NodeId>,
    replicas: u32,
    // Shared size variable of a replicated model
    size: Option<Var>,
    degeneracies: Vec<Degeneracy>,
}

impl CoverModel {
    /// Model for a single minimum placement.
    pub fn build(graph: &Graph, roles: &Roles) -> Self {
        let mut cover = Self::variables(graph, roles, 1);
        let objective = LinearExpr::sum(cover.replica_vars(0));
        cover.model.set_objective(objective);
        cover
    }

    /// Model for `k` pairwise disjoint placements of the same, minimal size.
    ///
    /// Each copy gets its own coverage and separation constraints.
    /// An integer variable `opt_size` equals the size of every copy, and for
    /// every two copies `a` and `b` the quadratic constraint
    /// `sum_i (x_i_a - x_i_b)^2 == 2 * opt_size` makes them disjoint:
    /// the left side counts nodes chosen by exactly one of the two copies.
    ///
    /// # Panics
    ///
    /// Panics if `k == 0`.
    pub fn build_replicated(graph: &Graph, roles: &Roles, k: u32) -> Self {
        assert!(k > 0, "At least one replica is required");
        let mut cover = Self::variables(graph, roles, k);
        let n = cover.candidates.len() as i64;
        let size = cover.model.add_integer("opt_size", 0, n);

        for replica in 0..k {
            let mut expr = LinearExpr::sum(cover.replica_vars(replica));
            expr.add_term(size, -1);
            cover.model.add_named_constraint(format!("size_{replica}"), expr, Sense::Eq, 0);
        }
        for a in 0..k {
            for b in a + 1..k {
                let mut quad = QuadExpr::new();
                for &node in &cover.candidates {
                    quad.add_squared_difference(cover.vars[&(node, a)], cover.vars[&(node, b)]);
                }
                quad.linear.add_term(size, -2);
                cover.model.add_quadratic_constraint(quad, Sense::Eq, 0);
            }
        }

        cover.model.set_objective(size.into());
        cover.size = Some(size);
        cover
    }

    // Variables plus coverage and separation constraints for each replica
    fn variables(graph: &Graph, roles: &Roles, k: u32) -> Self {
        let name = if k == 1 { "IdentifyingCodes".to_string() } else { format!("IdentifyingCodes_k{k}") };
        let mut model = Model::new(&name);
        let candidates = roles.candidates().to_vec();
        let mut vars = FxHashMap::default();
        for replica in 0..k {
            for &node in &candidates {
                vars.insert((node, replica), model.add_binary(&format!("x_{node}_{replica}")));
            }
        }

        let degeneracies = graph.degeneracies(roles);
        for d in &degeneracies {
            warn!("Unsatisfiable monitoring requirement: {d}");
        }

        let targets = roles.targets();
        let coverage: Vec<(NodeId, Vec<NodeId>)> = targets.iter()
            .map(|&t| (t, graph.candidate_neighbors(t, roles).collect()))
            .collect();
        let mut separation = Vec::with_capacity(targets.len() * targets.len().saturating_sub(1) / 2);
        for (i, &t1) in targets.iter().enumerate() {
            for &t2 in &targets[i + 1..] {
                separation.push((t1, t2, graph.separating_nodes(t1, t2, roles)));
            }
        }

        // Distinct non-empty codes for all targets need at least this many sensors
        let min_size = min_code_size(targets.len());
        for replica in 0..k {
            if min_size > 1 {
                model.add_named_constraint(format!("min_size_{replica}"),
                    LinearExpr::sum(candidates.iter().map(|n| vars[&(*n, replica)])), Sense::Ge, min_size);
            }
            for (t, neighbors) in &coverage {
                let expr = LinearExpr::sum(neighbors.iter().map(|n| vars[&(*n, replica)]));
                model.add_named_constraint(format!("cover_{t}_{replica}"), expr, Sense::Ge, 1);
            }
            for (t1, t2, separating) in &separation {
                let expr = LinearExpr::sum(separating.iter().map(|n| vars[&(*n, replica)]));
                model.add_named_constraint(format!("separate_{t1}_{t2}_{replica}"), expr, Sense::Ge, 1);
            }
        }
        debug!("Built model `{name}`: {} variables, {} coverage and {} separation constraints per replica",
               model.n_vars(), coverage.len(), separation.len());

        CoverModel {
            model,
            vars,
            candidates,
            replicas: k,
            size: None,
            degeneracies,
        }
    }

    fn replica_vars(&self, replica: Replica) -> impl Iterator<Item=Var> + '_ {
        self.candidates.iter().map(move |n| self.vars[&(*n, replica)])
    }

    #[inline]
    pub fn model(&self) -> &Model {
        &self.model
    }

    #[inline]
    pub fn replicas(&self) -> u32 {
        self.replicas
    }

    /// The variable deciding whether `node` hosts a sensor in copy `replica`.
    pub fn var(&self, node: NodeId, replica: Replica) -> Option<Var> {
        self.vars.get(&(node, replica)).copied()
    }

    /// The shared size variable of a replicated model.
    pub fn size_var(&self) -> Option<Var> {
        self.size
    }

    /// Requirements found while building that no placement can meet.
    pub fn degeneracies(&self) -> &[Degeneracy] {
        &self.degeneracies
    }

    pub fn is_degenerate(&self) -> bool {
        !self.degeneracies.is_empty()
    }

    /// The base model with all `exclusions` added as constraints.
    pub fn with_exclusions(&self, exclusions: &Exclusions) -> Model {
        let mut model = self.model.clone();
        for exclusion in exclusions.iter() {
            match exclusion {
                Exclusion::Pin(node) => {
                    for replica in 0..self.replicas {
                        if let Some(var) = self.var(*node, replica) {
                            model.add_named_constraint(
                                format!("pin_{node}_{replica}"), var.into(), Sense::Eq, 0);
                        }
                    }
                },
                Exclusion::Forbid(placement) => {
                    let vars: Vec<Var> = placement.iter()
                        .filter_map(|n| self.var(n, 0))
                        .collect();
                    let bound = vars.len() as i64 - 1;
                    model.add_constraint(LinearExpr::sum(vars), Sense::Le, bound);
                },
            }
        }
        model
    }

    /// The placement chosen for copy `replica`.
    pub fn placement(&self, assignment: &Assignment, replica: Replica) -> Placement {
        Placement::new(self.candidates.iter()
            .copied()
            .filter(|&n| assignment.is_set(self.vars[&(n, replica)]))
            .collect())
    }

    /// The placements of all copies.
    pub fn placements(&self, assignment: &Assignment) -> Vec<Placement> {
        (0..self.replicas).map(|r| self.placement(assignment, r)).collect()
    }
}

/// Smallest `k` with `2^k - 1 >= n_targets`.
pub(crate) fn min_code_size(n_targets: usize) -> i64 {
    let mut size = 0;
    while (1u128 << size) - 1 < n_targets as u128 {
        size += 1;
    }
    size
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{BranchAndBound, Solver, SolveStatus};

    // Target1 - Candidate1 - Target2 - Candidate2 - Target3
    fn path() -> (Graph, Roles) {
        (Graph::from(vec![(1, 4), (4, 2), (2, 5), (5, 3)]), Roles::by_convention(5, 3))
    }

    #[test]
    fn model_shape() {
        let (graph, roles) = path();
        let cover = CoverModel::build(&graph, &roles);
        assert_eq!(cover.model().n_vars(), 2);
        // 3 coverage, 3 separation, at least 2 sensors for 3 distinct codes
        assert_eq!(cover.model().n_constraints(), 7);
        let min_size = &cover.model().linear_constraints()[0];
        assert_eq!(min_size.name.as_deref(), Some("min_size_0"));
        assert_eq!(min_size.rhs, 2);
        assert!(!cover.is_degenerate());
        let x4 = cover.var(4, 0).unwrap();
        let x5 = cover.var(5, 0).unwrap();
        assert_eq!(cover.model().var_name(x4), "x_4_0");
        assert_eq!(cover.model().objective(), &LinearExpr::sum([x4, x5]));
        assert_eq!(cover.var(1, 0), None, "Targets host no sensors");
    }

    #[test]
    fn path_minimum() {
        let (graph, roles) = path();
        let cover = CoverModel::build(&graph, &roles);
        let status = BranchAndBound::new().solve(cover.model(), None).status;
        let solution = status.optimal().unwrap();
        let placement = cover.placement(solution, 0);
        assert_eq!(placement, Placement::from(vec![4, 5]));
        assert!(placement.is_identifying(&graph, &roles));
    }

    #[test]
    fn star_is_infeasible() {
        let graph = Graph::from(vec![(1, 5), (2, 5), (3, 5), (4, 5)]);
        let roles = Roles::by_convention(5, 4);
        let cover = CoverModel::build(&graph, &roles);
        assert!(cover.degeneracies().contains(&Degeneracy::Inseparable(1, 2)));
        let status = BranchAndBound::new().solve(cover.model(), None).status;
        assert_eq!(status, SolveStatus::Infeasible);
    }

    #[test]
    fn exclusions_become_constraints() {
        let (graph, roles) = path();
        let cover = CoverModel::build(&graph, &roles);
        let mut exclusions = Exclusions::new();
        exclusions.push(Exclusion::Forbid(Placement::from(vec![4, 5])));
        let model = cover.with_exclusions(&exclusions);
        assert_eq!(model.n_constraints(), cover.model().n_constraints() + 1);
        let status = BranchAndBound::new().solve(&model, None).status;
        assert_eq!(status, SolveStatus::Infeasible, "{{4, 5}} is the only identifying code");

        let mut exclusions = Exclusions::new();
        exclusions.pin_all(&Placement::from(vec![4]));
        exclusions.pin_all(&Placement::from(vec![4, 5]));
        assert_eq!(exclusions.version(), 2, "Node 4 is pinned only once");
        assert!(exclusions.is_pinned(5));
    }

    // Target 1 sees candidates 3 to 6, target 2 only 3 and 5.
    // Each code needs one of {3, 5} and one of {4, 6}.
    fn double() -> (Graph, Roles) {
        let graph = Graph::from(vec![
            (1, 3), (1, 4), (2, 3),
            (1, 5), (1, 6), (2, 5),
        ]);
        (graph, Roles::by_convention(6, 2))
    }

    #[test]
    fn replicated_model() {
        let (graph, roles) = double();
        let cover = CoverModel::build_replicated(&graph, &roles, 2);
        assert_eq!(cover.replicas(), 2);
        assert_eq!(cover.model().n_vars(), 4 * 2 + 1);
        assert_eq!(cover.model().quadratic_constraints().len(), 1);

        let status = BranchAndBound::new().solve(cover.model(), None).status;
        let solution = status.optimal().unwrap();
        assert_eq!(solution.value(cover.size_var().unwrap()), 2);
        let placements = cover.placements(solution);
        assert_eq!(placements.len(), 2);
        assert!(placements[0].is_disjoint(&placements[1]));
        for p in &placements {
            assert_eq!(p.len(), 2);
            assert!(p.is_identifying(&graph, &roles));
        }
    }

    #[test]
    fn too_many_replicas() {
        let (graph, roles) = double();
        let cover = CoverModel::build_replicated(&graph, &roles, 3);
        let status = BranchAndBound::new().solve(cover.model(), None).status;
        assert_eq!(status, SolveStatus::Infeasible);
    }

    #[test]
    fn code_size_lower_bound() {
        assert_eq!(min_code_size(0), 0);
        assert_eq!(min_code_size(1), 1);
        assert_eq!(min_code_size(3), 2);
        assert_eq!(min_code_size(4), 3);
        assert_eq!(min_code_size(7), 3);
        assert_eq!(min_code_size(50), 6);

        // A single target needs no extra row, coverage already asks for one sensor
        let graph = Graph::from(vec![(1, 2), (1, 3)]);
        let cover = CoverModel::build(&graph, &Roles::by_convention(3, 1));
        assert_eq!(cover.model().n_constraints(), 1);
        let (graph, roles) = double();
        let cover = CoverModel::build_replicated(&graph, &roles, 2);
        let names: Vec<_> = cover.model().linear_constraints().iter()
            .filter_map(|c| c.name.as_deref())
            .filter(|n| n.starts_with("min_size"))
            .collect();
        assert_eq!(names, vec!["min_size_0", "min_size_1"]);
    }

    #[test]
    fn placement_display() {
        assert_eq!(Placement::from(vec![5, 4, 5]).to_string(), "{4, 5}");
        assert_eq!(Placement::default().to_string(), "{}");
    }
}
