//! The monitored network and the roles its nodes play.

use std::cmp::Ordering;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead};
use std::path::Path;
use std::result;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, ParseError, ParseErrorKind};

/// Integer identifier of a node, as used in the edge-list file.
pub type NodeId = u32;

type Edge = (NodeId, NodeId);

/// Undirected graph represented by sorted adjacency lists.
///
/// Node ids index directly into the adjacency table, so ids that never
/// appear in an edge simply have no neighbors.
/// The graph is immutable once built.
///
/// ```
/// use monitorgame::Graph;
///
/// let graph = Graph::from(vec![(1, 4), (4, 2), (2, 5), (5, 3)]);
/// assert_eq!(graph.neighbors(2), &[4, 5]);
/// assert!(graph.neighbors(9).is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Graph {
    adj: Vec<Vec<NodeId>>,
}

impl Graph {
    /// One more than the highest node id mentioned by any edge.
    #[inline]
    pub fn n_vertices(&self) -> u32 {
        self.adj.len() as u32
    }

    /// Number of undirected edges.
    pub fn n_edges(&self) -> usize {
        let (loops, other) = self.adj.iter()
            .enumerate()
            .flat_map(|(v, adj)| adj.iter().map(move |&w| w as usize == v))
            .fold((0, 0), |(l, o), is_loop| if is_loop { (l + 1, o) } else { (l, o + 1) });
        loops + other / 2
    }

    /// All nodes with at least one incident edge, in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item=NodeId> + '_ {
        self.adj.iter()
            .enumerate()
            .filter(|(_, adj)| !adj.is_empty())
            .map(|(v, _)| v as NodeId)
    }

    /// Sorted list of nodes adjacent to `v`. Empty for unknown nodes.
    #[inline]
    pub fn neighbors(&self, v: NodeId) -> &[NodeId] {
        match self.adj.get(v as usize) {
            Some(adj) => adj,
            None => &[],
        }
    }

    /// Build a graph from an edge-list file.
    ///
    /// Each line holds two whitespace separated node ids, for example
    ///
    /// ```text
    /// 1 15
    /// ```
    ///
    /// Blank lines and lines starting with `#` are skipped.
    /// Anything after the second id is ignored, so edge lists carrying edge
    /// data can be read as well.
    ///
    /// # Errors
    ///
    /// A [`ParseError`] is returned if a line contains fewer than two fields,
    /// if a field can not be parsed as an unsigned integer,
    /// or if there were problems reading the file.
    pub fn from_edge_list_file<P: AsRef<Path>>(path: P) -> result::Result<Self, ParseError> {
        let file = File::open(path)?;
        let lines = io::BufReader::new(file).lines();
        Self::from_edge_list_lines(lines)
    }

    /// Like [`from_edge_list_file()`](Graph::from_edge_list_file), but
    /// rejects node ids above `max_node` while reading.
    ///
    /// The adjacency table is indexed by node id, so this is the variant to
    /// use for untrusted input when the number of nodes is known up front.
    pub fn from_edge_list_file_within<P: AsRef<Path>>(path: P, max_node: NodeId
    ) -> result::Result<Self, ParseError> {
        let file = File::open(path)?;
        let lines = io::BufReader::new(file).lines();
        Self::from_edge_list_lines_within(lines, max_node)
    }

    /// Build a graph from an iterator of edge-list lines.
    /// The format is described at [`from_edge_list_file()`](Graph::from_edge_list_file).
    pub fn from_edge_list_lines(lines: impl Iterator<Item=io::Result<String>>
    ) -> result::Result<Self, ParseError> {
        parse_edges(lines, NodeId::MAX)
    }

    /// Build a graph from edge-list lines, with every node id at most `max_node`.
    pub fn from_edge_list_lines_within(lines: impl Iterator<Item=io::Result<String>>, max_node: NodeId
    ) -> result::Result<Self, ParseError> {
        parse_edges(lines, max_node)
    }

    /// Neighbors of `v` that are allowed to host a sensor.
    pub fn candidate_neighbors<'a>(&'a self, v: NodeId, roles: &'a Roles
    ) -> impl Iterator<Item=NodeId> + 'a {
        self.neighbors(v).iter()
            .copied()
            .filter(|&w| roles.is_candidate(w))
    }

    /// Candidate nodes adjacent to exactly one of `a` and `b`.
    ///
    /// A sensor on any of these nodes gives `a` and `b` different codes.
    pub fn separating_nodes(&self, a: NodeId, b: NodeId, roles: &Roles) -> Vec<NodeId> {
        symmetric_difference(self.neighbors(a), self.neighbors(b))
            .into_iter()
            .filter(|&w| roles.is_candidate(w))
            .collect()
    }

    /// Requirements that no placement can ever satisfy.
    ///
    /// A target without candidate neighbors can not be covered, and targets
    /// with identical candidate neighborhoods can never be told apart.
    pub fn degeneracies(&self, roles: &Roles) -> Vec<Degeneracy> {
        let mut found: Vec<Degeneracy> = roles.targets().iter()
            .copied()
            .filter(|&t| self.candidate_neighbors(t, roles).next().is_none())
            .map(Degeneracy::Uncoverable)
            .collect();
        for class in self.twin_classes(roles) {
            for (i, &a) in class.iter().enumerate() {
                for &b in &class[i + 1..] {
                    found.push(Degeneracy::Inseparable(a, b));
                }
            }
        }
        found
    }

    /// Groups of at least two target nodes sharing the same candidate neighborhood.
    ///
    /// Classes and their members are sorted ascending.
    pub fn twin_classes(&self, roles: &Roles) -> Vec<Vec<NodeId>> {
        let mut partition: FxHashMap<Box<[NodeId]>, Vec<NodeId>> = FxHashMap::default();
        for &t in roles.targets() {
            let neighborhood: Vec<NodeId> = self.candidate_neighbors(t, roles).collect();
            if let Some(twins) = partition.get_mut(neighborhood.as_slice()) {
                twins.push(t);
            } else {
                partition.insert(neighborhood.into_boxed_slice(), vec![t]);
            }
        }
        let mut classes: Vec<Vec<NodeId>> = partition.into_values()
            .filter(|class| class.len() > 1)
            .collect();
        classes.sort_unstable();
        classes
    }

    /// Create a graph from adjacency lists, ensuring that they are sorted
    /// and free of duplicates.
    pub fn from_adj(mut adj: Vec<Vec<NodeId>>) -> Self {
        for row in &mut adj {
            row.sort_unstable();
            row.dedup();
        }
        Graph { adj }
    }

    /// Return a reference to the inner adjacency lists.
    #[inline]
    pub fn inner(&self) -> &[Vec<NodeId>] {
        &self.adj
    }
}

impl From<Vec<Edge>> for Graph {
    fn from(edges: Vec<Edge>) -> Self {
        edges.into_iter().collect()
    }
}

impl FromIterator<Edge> for Graph {
    fn from_iter<I: IntoIterator<Item=Edge>>(iter: I) -> Self {
        let mut adj = vec![];
        for (a, b) in iter {
            // If necessary, grow adjacency table to accommodate both endpoints
            let max_node = a.max(b) as usize;
            if max_node >= adj.len() {
                adj.resize(max_node + 1, vec![]);
            }
            adj[a as usize].push(b);
            if a != b {
                adj[b as usize].push(a);
            }
        }
        Graph::from_adj(adj)
    }
}

fn parse_edges(lines: impl Iterator<Item=io::Result<String>>, max_node: NodeId
) -> result::Result<Graph, ParseError> {
    let mut edges = Vec::new();
    for (i, l) in lines.enumerate() {
        let l = l.map_err(|e| ParseError::from(e).at(i + 1))?;
        let l = l.trim();
        if l.is_empty() || l.starts_with('#') {
            continue;
        }
        let mut parts = l.split_whitespace();
        let mut field = || -> result::Result<NodeId, ParseError> {
            let raw = parts.next()
                .ok_or(ParseError::new(i + 1, ParseErrorKind::MissingField))?;
            let node = raw.parse().map_err(|e| ParseError::from(e).at(i + 1))?;
            if node > max_node {
                return Err(ParseError::new(i + 1, ParseErrorKind::NodeOutOfRange { node, max: max_node }));
            }
            Ok(node)
        };
        let from = field()?;
        let to = field()?;
        edges.push((from, to));
    }
    Ok(edges.into_iter().collect())
}

// Merge two sorted lists, keeping elements contained in only one of them.
fn symmetric_difference(a: &[NodeId], b: &[NodeId]) -> Vec<NodeId> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut a_ptr = 0;
    let mut b_ptr = 0;
    while a_ptr < a.len() && b_ptr < b.len() {
        match a[a_ptr].cmp(&b[b_ptr]) {
            Ordering::Equal => {
                a_ptr += 1;
                b_ptr += 1;
            },
            Ordering::Less => {
                out.push(a[a_ptr]);
                a_ptr += 1;
            },
            Ordering::Greater => {
                out.push(b[b_ptr]);
                b_ptr += 1;
            },
        }
    }
    // At most one of these is non-empty
    out.extend_from_slice(&a[a_ptr..]);
    out.extend_from_slice(&b[b_ptr..]);
    out
}


/// Which nodes must be uniquely monitored and which may host a sensor.
///
/// The two sets may overlap.
#[derive(Debug, Clone, Default)]
pub struct Roles {
    targets: Vec<NodeId>,
    candidates: Vec<NodeId>,
    candidate_set: FxHashSet<NodeId>,
}

impl Roles {
    pub fn new(mut targets: Vec<NodeId>, mut candidates: Vec<NodeId>) -> Self {
        targets.sort_unstable();
        targets.dedup();
        candidates.sort_unstable();
        candidates.dedup();
        let candidate_set = candidates.iter().copied().collect();
        Roles {
            targets,
            candidates,
            candidate_set,
        }
    }

    /// The numbering convention of the input files: nodes `1..=n_targets`
    /// are targets, nodes `n_targets+1..=n_nodes` are candidates.
    pub fn by_convention(n_nodes: u32, n_targets: u32) -> Self {
        let n_targets = n_targets.min(n_nodes);
        Roles::new(
            (1..=n_targets).collect(),
            (n_targets + 1..=n_nodes).collect(),
        )
    }

    /// Same targets, but every node of the universe may host a sensor.
    pub fn all_placeable(&self) -> Self {
        let all = self.targets.iter().chain(&self.candidates).copied().collect();
        Roles::new(self.targets.clone(), all)
    }

    /// Target nodes in ascending order.
    #[inline]
    pub fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    /// Candidate nodes in ascending order.
    #[inline]
    pub fn candidates(&self) -> &[NodeId] {
        &self.candidates
    }

    #[inline]
    pub fn is_candidate(&self, v: NodeId) -> bool {
        self.candidate_set.contains(&v)
    }

    /// Ensure every node of `graph` has a role.
    pub fn validate(&self, graph: &Graph) -> crate::Result<()> {
        for v in graph.nodes() {
            if !self.is_candidate(v) && self.targets.binary_search(&v).is_err() {
                return Err(Error::UnknownNode(v));
            }
        }
        Ok(())
    }
}


/// A monitoring requirement that can never be met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Degeneracy {
    /// Target without any candidate neighbor.
    Uncoverable(NodeId),
    /// Two targets whose candidate neighborhoods are identical.
    Inseparable(NodeId, NodeId),
}

impl fmt::Display for Degeneracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degeneracy::Uncoverable(t) => write!(f, "target {t} has no candidate neighbor"),
            Degeneracy::Inseparable(a, b) => write!(f, "targets {a} and {b} share all candidate neighbors"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn star() -> (Graph, Roles) {
        let graph = Graph::from(vec![(1, 5), (2, 5), (3, 5), (4, 5)]);
        (graph, Roles::by_convention(5, 4))
    }

    #[test]
    fn adjacency_is_symmetric_and_sorted() {
        let graph = Graph::from(vec![(3, 1), (1, 2), (2, 1), (3, 3)]);
        assert_eq!(graph.n_vertices(), 4);
        assert_eq!(graph.neighbors(1), &[2, 3]);
        assert_eq!(graph.neighbors(2), &[1], "Duplicate edge is merged");
        assert_eq!(graph.neighbors(3), &[1, 3], "Self loop makes a node its own neighbor");
        assert!(graph.neighbors(0).is_empty());
        assert_eq!(graph.n_edges(), 3);
        assert_eq!(graph.nodes().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn parse_edge_list() {
        let input = "# 14 bus\n1 4\n\n  2 4 {'weight': 3}\n4\t3\n";
        let graph = Graph::from_edge_list_lines(input.lines().map(|l| Ok(l.to_string()))).unwrap();
        assert_eq!(graph.neighbors(4), &[1, 2, 3]);

        let err = Graph::from_edge_list_lines(["1 2", "3"].iter().map(|l| Ok(l.to_string())))
            .unwrap_err();
        assert_eq!(err.line, 2);
        assert!(matches!(err.kind, ParseErrorKind::MissingField));

        let err = Graph::from_edge_list_lines(["1 x"].iter().map(|l| Ok(l.to_string())))
            .unwrap_err();
        assert_eq!(err.line, 1);
        assert!(matches!(err.kind, ParseErrorKind::InvalidInt(_)));
    }

    #[test]
    fn huge_node_id_is_rejected() {
        // Would otherwise size the adjacency table by the id
        let input = ["1 4", "2 4294967295"];
        let err = Graph::from_edge_list_lines_within(input.iter().map(|l| Ok(l.to_string())), 5)
            .unwrap_err();
        assert_eq!(err.line, 2);
        assert!(matches!(err.kind, ParseErrorKind::NodeOutOfRange { node: 4294967295, max: 5 }));
        assert!(err.to_string().starts_with("line 2: node 4294967295 is out of range"));

        let graph = Graph::from_edge_list_lines_within(input[..1].iter().map(|l| Ok(l.to_string())), 5)
            .unwrap();
        assert_eq!(graph.neighbors(4), &[1]);
        let err = Graph::from_edge_list_lines_within(["6 1"].iter().map(|l| Ok(l.to_string())), 5)
            .unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::NodeOutOfRange { node: 6, max: 5 }));
    }

    #[test]
    fn test_symmetric_difference() {
        assert_eq!(symmetric_difference(&[1, 3, 5], &[3, 4]), vec![1, 4, 5]);
        assert_eq!(symmetric_difference(&[], &[2, 7]), vec![2, 7]);
        assert!(symmetric_difference(&[5], &[5]).is_empty());
    }

    #[test]
    fn separating_nodes_respect_roles() {
        // 1 - 4 - 2 - 5 - 3, plus a target-target edge 1 - 3
        let graph = Graph::from(vec![(1, 4), (4, 2), (2, 5), (5, 3), (1, 3)]);
        let roles = Roles::by_convention(5, 3);
        assert_eq!(graph.separating_nodes(1, 3, &roles), vec![4, 5]);
        assert_eq!(graph.separating_nodes(1, 3, &roles.all_placeable()), vec![1, 3, 4, 5]);
    }

    #[test]
    fn star_leaves_are_twins() {
        let (graph, roles) = star();
        assert_eq!(graph.twin_classes(&roles), vec![vec![1, 2, 3, 4]]);
        let degenerate = graph.degeneracies(&roles);
        assert_eq!(degenerate.len(), 6);
        assert!(degenerate.contains(&Degeneracy::Inseparable(1, 2)));
        assert!(degenerate.contains(&Degeneracy::Inseparable(3, 4)));
    }

    #[test]
    fn isolated_target_is_uncoverable() {
        let graph = Graph::from(vec![(1, 3)]);
        let roles = Roles::by_convention(3, 2);
        assert_eq!(graph.degeneracies(&roles), vec![Degeneracy::Uncoverable(2)]);
    }

    #[test]
    fn roles_validation() {
        let (graph, roles) = star();
        assert!(roles.validate(&graph).is_ok());
        let small = Roles::by_convention(4, 4);
        assert!(matches!(small.validate(&graph), Err(Error::UnknownNode(5))));
    }
}
