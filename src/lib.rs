//! Minimum identifying codes on networks and the security games built from them.
//!
//! Given a graph whose nodes are split into *targets* that must be monitored
//! and *candidates* that may host a sensor, this crate finds the smallest
//! sensor placements under which every target is observed by a distinct,
//! non-empty set of sensors (an *identifying code*).
//! It then searches for alternate placements of the same size and turns
//! them into a bimatrix game: the defender picks a placement, the attacker
//! disables a single sensor, and each side is paid by the weight of the
//! targets that are (or are no longer) uniquely identified.
//!
//! # Usage
//!
//! ```
//! use monitorgame::{Graph, NodeWeights, Roles};
//! use monitorgame::enumerate::{Enumerator, Policy};
//! use monitorgame::payoff::{default_attacks, PayoffMatrix};
//! use monitorgame::solver::BranchAndBound;
//!
//! // Target1 - Candidate1 - Target2 - Candidate2 - Target3
//! let graph = Graph::from(vec![(1, 4), (4, 2), (2, 5), (5, 3)]);
//! let roles = Roles::by_convention(5, 3);
//! let weights: NodeWeights = [(1, 3), (2, 5), (3, 2)].into_iter().collect();
//!
//! let pool = Enumerator::new(&graph, &roles, BranchAndBound::new(), Policy::DisjointAlternate).run();
//! let placements = pool.require_nonempty().unwrap();
//! assert_eq!(placements[0].nodes(), &[4, 5]);
//!
//! let attacks = default_attacks(placements);
//! let game = PayoffMatrix::generate(placements, &attacks, &graph, roles.targets(), &weights, 1).unwrap();
//! assert_eq!(game.n_attacker_actions(), 2);
//! ```
//!
//! The whole pipeline, driven by a configuration file, is available as [`run()`].
//!
//! # Solvers
//!
//! Placements are found by solving integer programs through the
//! [`Solver`](solver::Solver) trait.
//! The included [`BranchAndBound`](solver::BranchAndBound) solver is exact
//! and dependency-free, other backends can be plugged in by implementing
//! the trait.
//!
//! # Features
//!
//! * `serde`: Derive `Serialize` and `Deserialize` for the graph, placements,
//!   weights, payoffs and enumeration policies.

pub mod coloring;
pub mod config;
pub mod enumerate;
pub mod model;
pub mod payoff;
pub mod solver;
mod error;
mod graph;
mod weights;

// Re-exports
pub use error::*;
pub use graph::*;
pub use weights::NodeWeights;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use config::Config;
use enumerate::{Enumerator, SolutionPool};
use payoff::{AttackerCost, PayoffMatrix};
use solver::BranchAndBound;

/// Everything produced by a configured run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub weights: NodeWeights,
    pub pool: SolutionPool,
    pub game: PayoffMatrix,
}

/// Read all inputs named by `config`, enumerate placements, and write the
/// resulting game file.
///
/// With `generate_weights` set, fresh weights are drawn from the configured
/// seed and written to the weights file first.
///
/// # Errors
///
/// Fails on unreadable or malformed input files, nodes outside the
/// configured range, missing weights, graphs that no placement can monitor,
/// a solver timeout before the first placement, and problems writing the
/// output files.
pub fn run(config: &Config) -> Result<RunOutput> {
    let graph = Graph::from_edge_list_file_within(&config.edge_file, config.num_nodes)?;
    let roles = config.roles();
    roles.validate(&graph)?;
    info!("Loaded graph with {} edges, {} targets and {} candidates",
          graph.n_edges(), roles.targets().len(), roles.candidates().len());

    let mut rng = StdRng::seed_from_u64(config.seed);
    let weights = if config.generate_weights {
        let weights = NodeWeights::generate(roles.targets(), &mut rng);
        weights.write_to_file(&config.weights_file)?;
        weights
    } else {
        NodeWeights::from_file(&config.weights_file)?
    };

    let pool = Enumerator::new(&graph, &roles, BranchAndBound::new(), config.policy)
        .with_timeout(config.timeout, config.timeout_retries)
        .run();
    let placements = pool.require_nonempty()?;
    if placements.is_empty() {
        warn!("No placement found: {}", pool.termination());
    }

    let attacks = payoff::default_attacks(placements);
    info!("Number of defender strategies: {}", placements.len());
    info!("Number of attacker strategies: {}", attacks.len());
    let mut game = PayoffMatrix::generate(
        placements, &attacks, &graph, roles.targets(), &weights, config.threads)?;
    if config.attacker_cost {
        game.apply_attacker_cost(AttackerCost::Random { seed: rng.gen() });
    }
    game.write_to_file(&config.write_file)?;

    Ok(RunOutput { weights, pool, game })
}
