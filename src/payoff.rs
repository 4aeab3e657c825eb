//! Bimatrix security game between sensor placements and single-sensor attacks.
//!
//! The defender picks one of the enumerated placements, the attacker picks
//! a node whose sensor fails. The defender earns the weight of every target
//! that is still uniquely identified, the attacker earns the rest.

use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::thread;

use log::{debug, info};
use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::coloring::{color, Coloring};
use crate::error::Result;
use crate::graph::{Graph, NodeId};
use crate::model::Placement;
use crate::weights::NodeWeights;

/// Payoffs of one strategy pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Payoff {
    pub defender: i64,
    pub attacker: i64,
}

impl fmt::Display for Payoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.defender, self.attacker)
    }
}

/// Optional cost of attacking, charged to the attacker only.
///
/// Any cost other than [`AttackerCost::None`] turns the zero-sum game into
/// a general-sum game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttackerCost {
    #[default]
    None,
    /// One cost per attack, drawn uniformly from `0..=total_weight`.
    Random {
        seed: u64,
    },
}

/// Score a single coloring.
///
/// If every target has a distinct non-empty code the defender receives
/// `total`. Otherwise the defender receives the weights of the targets that
/// remain uniquely identified. The attacker receives the remainder.
pub fn score(coloring: &Coloring, weights: &NodeWeights, total: u64) -> Result<Payoff> {
    let defender = if coloring.is_identifying() {
        total
    } else {
        coloring.uniquely_identified()
            .map(|t| weights.require(t))
            .sum::<Result<u64>>()?
    };
    Ok(Payoff {
        defender: defender as i64,
        attacker: total as i64 - defender as i64,
    })
}

/// Every node used by any placement, in ascending order.
pub fn default_attacks(placements: &[Placement]) -> Vec<NodeId> {
    placements.iter()
        .flat_map(Placement::iter)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Payoffs for every pair of defender placement (row) and attacked node (column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoffMatrix {
    payoffs: Array2<Payoff>,
    attacks: Vec<NodeId>,
    total_weight: u64,
    zero_sum: bool,
}

impl PayoffMatrix {
    /// Color and score every strategy pair.
    ///
    /// Rows are split into contiguous blocks that are computed on up to
    /// `threads` threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingWeight`](crate::Error::MissingWeight) if a
    /// target node has no weight.
    pub fn generate(
        placements: &[Placement],
        attacks: &[NodeId],
        graph: &Graph,
        targets: &[NodeId],
        weights: &NodeWeights,
        threads: usize,
    ) -> Result<Self> {
        let total = weights.total(targets)?;
        let rows = placements.len();
        let cols = attacks.len();
        let block = rows.div_ceil(threads.max(1)).max(1);
        debug!("Computing {rows}x{cols} payoffs in blocks of {block} rows");

        let row_block = |block: &[Placement]| -> Result<Vec<Payoff>> {
            let mut out = Vec::with_capacity(block.len() * cols);
            for placement in block {
                for &attack in attacks {
                    let coloring = color(placement, Some(attack), graph, targets);
                    out.push(score(&coloring, weights, total)?);
                }
            }
            Ok(out)
        };

        let blocks: Vec<Result<Vec<Payoff>>> = thread::scope(|scope| {
            let handles: Vec<_> = placements.chunks(block)
                .map(|chunk| scope.spawn(move || row_block(chunk)))
                .collect();
            handles.into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });

        let mut payoffs = Array2::from_elem((rows, cols), Payoff::default());
        let mut row = 0;
        for block in blocks {
            for cells in block?.chunks(cols.max(1)) {
                if cols > 0 {
                    payoffs.row_mut(row).iter_mut()
                        .zip(cells)
                        .for_each(|(cell, &p)| *cell = p);
                }
                row += 1;
            }
        }

        Ok(PayoffMatrix {
            payoffs,
            attacks: attacks.to_vec(),
            total_weight: total,
            zero_sum: true,
        })
    }

    /// Subtract a cost per attack from the attacker's payoffs.
    pub fn apply_attacker_cost(&mut self, cost: AttackerCost) {
        let AttackerCost::Random { seed } = cost else {
            return;
        };
        let mut rng = StdRng::seed_from_u64(seed);
        for (mut column, attack) in self.payoffs.axis_iter_mut(Axis(1)).zip(&self.attacks) {
            let c = rng.gen_range(0..=self.total_weight) as i64;
            debug!("Attacking node {attack} costs {c}");
            column.iter_mut().for_each(|p| p.attacker -= c);
        }
        self.zero_sum = false;
    }

    #[inline]
    pub fn n_defender_actions(&self) -> usize {
        self.payoffs.nrows()
    }

    #[inline]
    pub fn n_attacker_actions(&self) -> usize {
        self.payoffs.ncols()
    }

    /// The attacked nodes labelling the columns.
    #[inline]
    pub fn attacks(&self) -> &[NodeId] {
        &self.attacks
    }

    #[inline]
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Returns `false` once attacker costs were applied.
    #[inline]
    pub fn is_zero_sum(&self) -> bool {
        self.zero_sum
    }

    pub fn get(&self, defender: usize, attacker: usize) -> Option<Payoff> {
        self.payoffs.get((defender, attacker)).copied()
    }

    pub fn row(&self, defender: usize) -> ArrayView1<'_, Payoff> {
        self.payoffs.row(defender)
    }

    #[inline]
    pub fn inner(&self) -> &Array2<Payoff> {
        &self.payoffs
    }

    /// Write the game in the text format read by bimatrix equilibrium solvers:
    ///
    /// ```text
    /// <number of defender actions>
    /// 1
    /// 1
    /// <number of attacker actions>
    /// <attack 1>|<attack 2>|...
    /// <d>,<a> <d>,<a> ...
    /// ```
    ///
    /// with one payoff line per defender action.
    pub fn write_game<W: Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(w, "{}", self.n_defender_actions())?;
        writeln!(w, "1")?;
        writeln!(w, "1")?;
        writeln!(w, "{}", self.n_attacker_actions())?;
        let labels: Vec<String> = self.attacks.iter().map(NodeId::to_string).collect();
        writeln!(w, "{}", labels.join("|"))?;
        for row in self.payoffs.rows() {
            for payoff in row {
                write!(w, "{payoff} ")?;
            }
            writeln!(w)?;
        }
        Ok(())
    }

    /// Write the game file to `path`.
    ///
    /// The game is first written to a temporary file next to `path`, which
    /// then replaces `path`. An error never leaves a partially written game
    /// at `path`.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        let name = path.file_name().ok_or_else(|| io::Error::new(
            io::ErrorKind::InvalidInput, format!("not a file path: {}", path.display())))?;
        let mut tmp_name = name.to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        let written = File::create(&tmp).and_then(|file| {
            let mut writer = BufWriter::new(file);
            self.write_game(&mut writer)?;
            let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&tmp, path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        info!("Wrote {}x{} game to {}", self.n_defender_actions(), self.n_attacker_actions(), path.display());
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    // Target1 - Candidate1 - Target2 - Candidate2 - Target3
    fn path() -> (Graph, NodeWeights) {
        let graph = Graph::from(vec![(1, 4), (4, 2), (2, 5), (5, 3)]);
        let weights = [(1, 3), (2, 5), (3, 2)].into_iter().collect();
        (graph, weights)
    }

    #[test]
    fn scores() {
        let (graph, weights) = path();
        let placement = Placement::from(vec![4, 5]);
        let intact = color(&placement, None, &graph, &[1, 2, 3]);
        assert_eq!(score(&intact, &weights, 10).unwrap(), Payoff { defender: 10, attacker: 0 });

        // Codes "0", "5", "5": nobody is identified
        let broken = color(&placement, Some(4), &graph, &[1, 2, 3]);
        assert_eq!(score(&broken, &weights, 10).unwrap(), Payoff { defender: 0, attacker: 10 });
    }

    #[test]
    fn partial_identification() {
        // Sensors 4 and 6 both see target 1, 5 sees targets 2 and 3
        let graph = Graph::from(vec![(1, 4), (1, 6), (2, 5), (3, 5), (2, 4)]);
        let weights: NodeWeights = [(1, 3), (2, 5), (3, 2)].into_iter().collect();
        let placement = Placement::from(vec![4, 5, 6]);
        // Without 4: codes "6", "5", "5"
        let coloring = color(&placement, Some(4), &graph, &[1, 2, 3]);
        assert_eq!(score(&coloring, &weights, 10).unwrap(), Payoff { defender: 3, attacker: 7 });
    }

    #[test]
    fn generate_matrix() {
        let (graph, weights) = path();
        let placements = vec![Placement::from(vec![4, 5])];
        let attacks = default_attacks(&placements);
        assert_eq!(attacks, vec![4, 5]);
        for threads in [1, 4] {
            let matrix = PayoffMatrix::generate(&placements, &attacks, &graph, &[1, 2, 3], &weights, threads)
                .unwrap();
            assert_eq!(matrix.n_defender_actions(), 1);
            assert_eq!(matrix.n_attacker_actions(), 2);
            assert_eq!(matrix.total_weight(), 10);
            // Without 5: codes "4", "4", "0"
            assert_eq!(matrix.get(0, 0), Some(Payoff { defender: 0, attacker: 10 }));
            assert_eq!(matrix.get(0, 1), Some(Payoff { defender: 0, attacker: 10 }));
            assert!(matrix.is_zero_sum());
        }
    }

    #[test]
    fn parallel_matches_sequential() {
        let graph = Graph::from(vec![
            (1, 5), (1, 6), (2, 6), (2, 7), (3, 7), (3, 8), (4, 8), (4, 5), (1, 9), (3, 9),
        ]);
        let weights: NodeWeights = (1..=4).map(|t| (t, t as u64 * 2)).collect();
        let placements: Vec<Placement> = vec![
            vec![5, 6, 7], vec![6, 7, 8], vec![5, 7, 9], vec![5, 6, 7, 8, 9], vec![8, 9],
        ].into_iter().map(Placement::from).collect();
        let attacks = default_attacks(&placements);
        let targets = [1, 2, 3, 4];
        let sequential = PayoffMatrix::generate(&placements, &attacks, &graph, &targets, &weights, 1).unwrap();
        let parallel = PayoffMatrix::generate(&placements, &attacks, &graph, &targets, &weights, 3).unwrap();
        assert_eq!(sequential, parallel);
        for p in sequential.inner() {
            assert_eq!(p.defender + p.attacker, 20);
        }
    }

    #[test]
    fn missing_weight() {
        let (graph, _) = path();
        let weights: NodeWeights = [(1, 3), (3, 2)].into_iter().collect();
        let placements = vec![Placement::from(vec![4, 5])];
        let result = PayoffMatrix::generate(&placements, &[4], &graph, &[1, 2, 3], &weights, 1);
        assert!(matches!(result, Err(Error::MissingWeight(2))));
    }

    #[test]
    fn attacker_cost() {
        let (graph, weights) = path();
        let placements = vec![Placement::from(vec![4, 5])];
        let mut matrix = PayoffMatrix::generate(&placements, &[1, 4, 5], &graph, &[1, 2, 3], &weights, 1)
            .unwrap();
        let before = matrix.clone();
        matrix.apply_attacker_cost(AttackerCost::None);
        assert_eq!(matrix, before);

        matrix.apply_attacker_cost(AttackerCost::Random { seed: 7 });
        assert!(!matrix.is_zero_sum());
        for (a, b) in before.inner().iter().zip(matrix.inner()) {
            assert_eq!(a.defender, b.defender, "Defender payoffs are unchanged");
            assert!(b.attacker <= a.attacker && b.attacker >= a.attacker - 10);
        }

        let mut again = before.clone();
        again.apply_attacker_cost(AttackerCost::Random { seed: 7 });
        assert_eq!(again, matrix, "Costs depend only on the seed");
    }

    #[test]
    fn game_file_format() {
        let (graph, weights) = path();
        let placements = vec![Placement::from(vec![4, 5]), Placement::from(vec![4, 5])];
        let matrix = PayoffMatrix::generate(&placements, &[1, 4], &graph, &[1, 2, 3], &weights, 2).unwrap();
        let mut out = Vec::new();
        matrix.write_game(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "2\n1\n1\n2\n1|4\n10,0 0,10 \n10,0 0,10 \n");

        let row = matrix.row(1);
        assert_eq!(row.len(), 2);
        assert_eq!(row[1], Payoff { defender: 0, attacker: 10 });
    }

    #[test]
    fn write_file_replaces_target() {
        let (graph, weights) = path();
        let placements = vec![Placement::from(vec![4, 5])];
        let matrix = PayoffMatrix::generate(&placements, &[4], &graph, &[1, 2, 3], &weights, 1).unwrap();
        let dir = std::env::temp_dir().join(format!("monitorgame-payoff-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let target = dir.join("out.game");
        fs::write(&target, "old contents").unwrap();
        matrix.write_to_file(&target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "1\n1\n1\n1\n4\n0,10 \n");
        assert!(!dir.join("out.game.tmp").exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
