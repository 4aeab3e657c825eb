//! Importance weights of target nodes.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;
use std::result;

use rand::Rng;

use crate::error::{Error, ParseError, ParseErrorKind};
use crate::graph::NodeId;

/// Mapping from target node to a positive integer weight.
///
/// Iteration is always in ascending node order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeWeights {
    weights: BTreeMap<NodeId, u64>,
}

impl NodeWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeId, weight: u64) {
        self.weights.insert(node, weight);
    }

    #[inline]
    pub fn get(&self, node: NodeId) -> Option<u64> {
        self.weights.get(&node).copied()
    }

    /// Weight of `node`, failing if there is none.
    pub fn require(&self, node: NodeId) -> crate::Result<u64> {
        self.get(node).ok_or(Error::MissingWeight(node))
    }

    /// Sum of the weights of `targets`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingWeight`] for the first target without a weight.
    pub fn total(&self, targets: &[NodeId]) -> crate::Result<u64> {
        targets.iter().map(|&t| self.require(t)).sum()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item=(NodeId, u64)> + '_ {
        self.weights.iter().map(|(&n, &w)| (n, w))
    }

    /// Draw a weight for each target uniformly from `1..=max(targets) + 10`.
    pub fn generate<R: Rng + ?Sized>(targets: &[NodeId], rng: &mut R) -> Self {
        let upper = targets.iter().copied().max().unwrap_or(0) as u64 + 10;
        targets.iter()
            .map(|&t| (t, rng.gen_range(1..=upper)))
            .collect()
    }

    /// Read weights from a file with one `<node> <weight>` pair per line.
    ///
    /// Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// A [`ParseError`] is returned if a line does not contain exactly two
    /// unsigned integers, if a weight is zero, or if there were problems
    /// reading the file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> result::Result<Self, ParseError> {
        let file = File::open(path)?;
        Self::from_lines(io::BufReader::new(file).lines())
    }

    /// Read weights from an iterator of lines.
    /// The format is described at [`from_file()`](NodeWeights::from_file).
    pub fn from_lines(lines: impl Iterator<Item=io::Result<String>>
    ) -> result::Result<Self, ParseError> {
        let mut weights = NodeWeights::new();
        for (i, l) in lines.enumerate() {
            let line_no = i + 1;
            let l = l.map_err(|e| ParseError::from(e).at(line_no))?;
            if l.trim().is_empty() {
                continue;
            }
            let mut parts = l.split_whitespace();
            let node: NodeId = parts.next()
                .ok_or(ParseError::new(line_no, ParseErrorKind::MissingField))?
                .parse().map_err(|e| ParseError::from(e).at(line_no))?;
            let weight: u64 = parts.next()
                .ok_or(ParseError::new(line_no, ParseErrorKind::MissingField))?
                .parse().map_err(|e| ParseError::from(e).at(line_no))?;
            if parts.next().is_some() {
                return Err(ParseError::new(line_no, ParseErrorKind::TrailingField));
            }
            if weight == 0 {
                return Err(ParseError::new(line_no, ParseErrorKind::Syntax(
                    format!("weight of node {node} must be positive"))));
            }
            weights.insert(node, weight);
        }
        Ok(weights)
    }

    /// Write all weights in the format read by [`from_file()`](NodeWeights::from_file).
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for (node, weight) in self.iter() {
            writeln!(writer, "{node} {weight}")?;
        }
        writer.flush()
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.write_to(BufWriter::new(File::create(path)?))
    }
}

impl FromIterator<(NodeId, u64)> for NodeWeights {
    fn from_iter<I: IntoIterator<Item=(NodeId, u64)>>(iter: I) -> Self {
        NodeWeights { weights: iter.into_iter().collect() }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn lines(input: &str) -> impl Iterator<Item=io::Result<String>> + '_ {
        input.lines().map(|l| Ok(l.to_string()))
    }

    #[test]
    fn parse_weights() {
        let weights = NodeWeights::from_lines(lines("1 3\n2 5\n\n3 2\n")).unwrap();
        assert_eq!(weights.len(), 3);
        assert_eq!(weights.get(2), Some(5));
        assert_eq!(weights.total(&[1, 2, 3]).unwrap(), 10);
        assert!(matches!(weights.total(&[1, 4]), Err(Error::MissingWeight(4))));
    }

    #[test]
    fn malformed_weights() {
        let err = NodeWeights::from_lines(lines("1 3\n2\n")).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(matches!(err.kind, ParseErrorKind::MissingField));

        let err = NodeWeights::from_lines(lines("1 3 7\n")).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::TrailingField));

        let err = NodeWeights::from_lines(lines("1 -3\n")).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::InvalidInt(_)));

        let err = NodeWeights::from_lines(lines("1 3\n2 0\n")).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(matches!(err.kind, ParseErrorKind::Syntax(_)));
        assert_eq!(err.to_string(), "line 2: weight of node 2 must be positive");
    }

    #[test]
    fn generated_weights_are_in_range() {
        let targets: Vec<NodeId> = (1..=14).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let weights = NodeWeights::generate(&targets, &mut rng);
        assert_eq!(weights.len(), 14);
        assert!(weights.iter().all(|(_, w)| (1..=24).contains(&w)));

        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(weights, NodeWeights::generate(&targets, &mut rng), "Same seed, same weights");
    }

    #[test]
    fn write_and_read_back() {
        let weights: NodeWeights = vec![(2, 5), (1, 3)].into_iter().collect();
        let mut out = Vec::new();
        weights.write_to(&mut out).unwrap();
        assert_eq!(String::from_utf8(out.clone()).unwrap(), "1 3\n2 5\n");
        let read = NodeWeights::from_lines(io::Cursor::new(out).lines()).unwrap();
        assert_eq!(read, weights);
    }
}
