//! Search for several minimum identifying codes.
//!
//! An [`Enumerator`] solves the cover model, records the placement it finds
//! and restricts the next solve according to its [`Policy`], until the
//! model becomes infeasible or only larger placements remain.
//!
//! ```
//! use monitorgame::{Graph, Roles};
//! use monitorgame::enumerate::{Enumerator, Policy, Termination};
//! use monitorgame::solver::BranchAndBound;
//!
//! let graph = Graph::from(vec![(1, 4), (4, 2), (2, 5), (5, 3)]);
//! let roles = Roles::by_convention(5, 3);
//! let pool = Enumerator::new(&graph, &roles, BranchAndBound::new(), Policy::PureAlternate).run();
//! assert_eq!(pool.placements().len(), 1);
//! assert_eq!(pool.placements()[0].nodes(), &[4, 5]);
//! assert_eq!(pool.termination(), &Termination::Exhausted);
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::graph::{Degeneracy, Graph, Roles};
use crate::model::{CoverModel, Exclusion, Exclusions, Placement};
use crate::solver::{SolveStatus, Solver};

/// How later placements are kept apart from earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Policy {
    /// Forbid each found placement as a whole. Later placements may
    /// overlap with earlier ones.
    PureAlternate,
    /// No node of a found placement may be used again.
    DisjointAlternate,
    /// Solve for `K` disjoint placements at once, for `K = 1, 2, ...`,
    /// keeping the largest feasible family.
    SimultaneousK {
        /// Stop after this many replicas. Without a limit, `K` never
        /// exceeds the number of candidate nodes.
        max_replicas: Option<u32>,
    },
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::PureAlternate => write!(f, "pure alternates"),
            Policy::DisjointAlternate => write!(f, "disjoint alternates"),
            Policy::SimultaneousK { max_replicas: None } => write!(f, "simultaneous"),
            Policy::SimultaneousK { max_replicas: Some(k) } => write!(f, "simultaneous (at most {k})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The next solve can run.
    Ready,
    /// A solution was recorded, exclusions are still to be applied.
    Solved,
    /// Enumeration is over.
    Exhausted,
}

/// Why enumeration stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The solver proved that no further placement exists.
    Exhausted,
    /// The first solve was infeasible because of requirements that no
    /// placement can meet.
    Degenerate(Vec<Degeneracy>),
    /// The next placement was larger than the first one. It was discarded.
    SizeExceeded {
        optimal: usize,
        found: usize,
    },
    /// The configured number of replicas was reached.
    ReplicaLimit(u32),
    /// The solver ran out of time on every attempt.
    TimedOut,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exhausted => write!(f, "no further placement exists"),
            Termination::Degenerate(d) => write!(f, "graph is degenerate ({} unsatisfiable requirements)", d.len()),
            Termination::SizeExceeded { optimal, found } =>
                write!(f, "next placement has size {found}, optimum is {optimal}"),
            Termination::ReplicaLimit(k) => write!(f, "replica limit {k} reached"),
            Termination::TimedOut => write!(f, "solver timed out"),
        }
    }
}

/// Summary numbers of a finished enumeration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnumerationReport {
    pub solutions: usize,
    /// Size of every placement in the pool.
    pub optimal_size: Option<usize>,
    pub targets: usize,
    pub solves: u32,
    pub elapsed: Duration,
}

impl EnumerationReport {
    /// Share of target nodes that need no sensor of their own, in percent.
    pub fn savings(&self) -> Option<f64> {
        let size = self.optimal_size?;
        if self.targets == 0 {
            return None;
        }
        Some(100.0 * (self.targets as f64 - size as f64) / self.targets as f64)
    }
}

impl fmt::Display for EnumerationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} alternate solutions", self.solutions)?;
        if let Some(size) = self.optimal_size {
            write!(f, ", {size} sensors for {} targets", self.targets)?;
        }
        if let Some(savings) = self.savings() {
            write!(f, " ({savings:.1}% savings)")?;
        }
        write!(f, ", {} solves in {:.3}s", self.solves, self.elapsed.as_secs_f64())
    }
}

/// Placements in the order they were found, with the reason enumeration ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionPool {
    placements: Vec<Placement>,
    termination: Termination,
    report: EnumerationReport,
}

impl SolutionPool {
    #[inline]
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    #[inline]
    pub fn termination(&self) -> &Termination {
        &self.termination
    }

    #[inline]
    pub fn report(&self) -> &EnumerationReport {
        &self.report
    }

    pub fn into_placements(self) -> Vec<Placement> {
        self.placements
    }

    /// The placements, or an error if no placement was found at all.
    ///
    /// An empty pool caused by degenerate requirements becomes
    /// [`Error::DegenerateGraph`], one caused by the solver running out of
    /// time becomes [`Error::TimedOut`].
    pub fn require_nonempty(&self) -> Result<&[Placement]> {
        if !self.placements.is_empty() {
            return Ok(&self.placements);
        }
        match &self.termination {
            Termination::Degenerate(degeneracies) => Err(Error::DegenerateGraph(degeneracies.clone())),
            Termination::TimedOut => Err(Error::TimedOut),
            _ => Ok(&self.placements),
        }
    }
}


/// Iterative search for alternate minimum placements.
///
/// Every solve works on a fresh copy of the base model with the current
/// [`Exclusions`] applied, so a single iteration can be reproduced from the
/// base model and the exclusion list alone.
pub struct Enumerator<'a, S> {
    graph: &'a Graph,
    roles: &'a Roles,
    solver: S,
    policy: Policy,
    timeout: Option<Duration>,
    timeout_retries: u32,

    base: CoverModel,
    exclusions: Exclusions,
    replicas: u32,
    state: State,
    placements: Vec<Placement>,
    optimal_size: Option<usize>,
    termination: Option<Termination>,
    solves: u32,
    start: Instant,
}

impl<'a, S: Solver> Enumerator<'a, S> {
    pub fn new(graph: &'a Graph, roles: &'a Roles, solver: S, policy: Policy) -> Self {
        let base = match policy {
            Policy::SimultaneousK { .. } => CoverModel::build_replicated(graph, roles, 1),
            _ => CoverModel::build(graph, roles),
        };
        Enumerator {
            graph,
            roles,
            solver,
            policy,
            timeout: None,
            timeout_retries: 0,
            base,
            exclusions: Exclusions::new(),
            replicas: 1,
            state: State::Ready,
            placements: Vec::new(),
            optimal_size: None,
            termination: None,
            solves: 0,
            start: Instant::now(),
        }
    }

    /// Limit every solve to `timeout`. A solve that runs out of time is
    /// repeated up to `retries` times, doubling the budget each time.
    pub fn with_timeout(mut self, timeout: Option<Duration>, retries: u32) -> Self {
        self.timeout = timeout;
        self.timeout_retries = retries;
        self
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    #[inline]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Restrictions applied so far.
    #[inline]
    pub fn exclusions(&self) -> &Exclusions {
        &self.exclusions
    }

    /// The model the next solve will see.
    #[inline]
    pub fn base_model(&self) -> &CoverModel {
        &self.base
    }

    /// Placements recorded so far.
    #[inline]
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    /// Perform a single state transition and return the new state.
    pub fn step(&mut self) -> State {
        self.state = match self.state {
            State::Ready => self.solve(),
            State::Solved => self.exclude(),
            State::Exhausted => State::Exhausted,
        };
        self.state
    }

    /// Step until exhausted and collect the result.
    pub fn run(mut self) -> SolutionPool {
        info!("Enumerating placements with policy: {}", self.policy);
        while self.step() != State::Exhausted {}
        let report = EnumerationReport {
            solutions: self.placements.len(),
            optimal_size: self.optimal_size,
            targets: self.roles.targets().len(),
            solves: self.solves,
            elapsed: self.start.elapsed(),
        };
        let termination = self.termination.unwrap_or(Termination::Exhausted);
        info!("Found {report}; stopped because {termination}");
        SolutionPool {
            placements: self.placements,
            termination,
            report,
        }
    }

    fn finish(&mut self, termination: Termination) -> State {
        debug!("Enumeration finished: {termination}");
        self.termination = Some(termination);
        State::Exhausted
    }

    // Ready -> Solved | Exhausted
    fn solve(&mut self) -> State {
        let model = self.base.with_exclusions(&self.exclusions);
        let mut budget = self.timeout;
        let mut attempt = 0;
        let status = loop {
            self.solves += 1;
            let outcome = self.solver.solve(&model, budget);
            debug!("Solve {} ({} exclusions, {} replicas) with {}: {} after {} nodes",
                   self.solves, self.exclusions.version(), self.replicas,
                   self.solver.name(), outcome.status, outcome.statistics.nodes);
            match outcome.status {
                SolveStatus::TimedOut { .. } if attempt < self.timeout_retries => {
                    attempt += 1;
                    budget = budget.map(|b| b * 2);
                    warn!("Solver timed out, retrying ({attempt}/{}) with {:?}",
                          self.timeout_retries, budget);
                },
                status => break status,
            }
        };

        let solution = match status {
            SolveStatus::Optimal(solution) => solution,
            SolveStatus::TimedOut { .. } => {
                warn!("Solver timed out after {} retries", self.timeout_retries);
                return self.finish(Termination::TimedOut);
            },
            SolveStatus::Infeasible | SolveStatus::Unbounded => {
                return if self.placements.is_empty() && self.base.is_degenerate() {
                    self.finish(Termination::Degenerate(self.base.degeneracies().to_vec()))
                } else {
                    self.finish(Termination::Exhausted)
                };
            },
        };

        let found = self.base.placements(&solution);
        let size = found.first().map_or(0, Placement::len);
        // Discard and stop once only larger placements are left
        if let Some(optimal) = self.optimal_size {
            if size > optimal {
                return self.finish(Termination::SizeExceeded { optimal, found: size });
            }
        }
        self.optimal_size = Some(size);

        match self.policy {
            Policy::SimultaneousK { .. } => {
                debug!("{} disjoint placements of size {size}", found.len());
                self.placements = found;
            },
            Policy::PureAlternate | Policy::DisjointAlternate => {
                debug!("Placement {}: {}", self.placements.len() + 1, found[0]);
                self.placements.extend(found);
            },
        }
        State::Solved
    }

    // Solved -> Ready | Exhausted
    fn exclude(&mut self) -> State {
        match self.policy {
            Policy::PureAlternate => {
                if let Some(last) = self.placements.last() {
                    self.exclusions.push(Exclusion::Forbid(last.clone()));
                }
            },
            Policy::DisjointAlternate => {
                let version = self.exclusions.version();
                if let Some(last) = self.placements.last() {
                    self.exclusions.pin_all(last);
                }
                // An empty placement pins nothing and would be found again
                if self.exclusions.version() == version {
                    return self.finish(Termination::Exhausted);
                }
            },
            Policy::SimultaneousK { max_replicas } => {
                let limit = max_replicas.unwrap_or_else(|| self.roles.candidates().len().max(1) as u32);
                if self.replicas >= limit {
                    return self.finish(Termination::ReplicaLimit(self.replicas));
                }
                self.replicas += 1;
                self.base = CoverModel::build_replicated(self.graph, self.roles, self.replicas);
            },
        }
        State::Ready
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{BranchAndBound, Model, SolveOutcome, SolveStatistics};

    // Two targets with three interchangeable pairs of candidates
    //   target 1: 3, 5, 7 plus 4, 6, 8
    //   target 2: 3, 5, 7
    fn pairs() -> (Graph, Roles) {
        let graph = Graph::from(vec![
            (1, 3), (1, 4), (2, 3),
            (1, 5), (1, 6), (2, 5),
            (1, 7), (1, 8), (2, 7),
        ]);
        (graph, Roles::by_convention(8, 2))
    }

    fn enumerate(policy: Policy) -> SolutionPool {
        let (graph, roles) = pairs();
        Enumerator::new(&graph, &roles, BranchAndBound::new(), policy).run()
    }

    #[test]
    fn disjoint_alternates() {
        let pool = enumerate(Policy::DisjointAlternate);
        let placements = pool.placements();
        assert_eq!(placements.len(), 3);
        for (i, a) in placements.iter().enumerate() {
            assert_eq!(a.len(), 2);
            for b in &placements[i + 1..] {
                assert!(a.is_disjoint(b));
            }
        }
        assert_eq!(pool.termination(), &Termination::Exhausted);
        assert_eq!(pool.report().optimal_size, Some(2));
        assert_eq!(pool.report().solves, 4);
    }

    #[test]
    fn pure_alternates() {
        // Any of {3, 5, 7} with any of {4, 6, 8}
        let pool = enumerate(Policy::PureAlternate);
        assert_eq!(pool.placements().len(), 9);
        let mut unique = pool.placements().to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 9);
        assert_eq!(pool.termination(), &Termination::Exhausted);
    }

    #[test]
    fn simultaneous() {
        let pool = enumerate(Policy::SimultaneousK { max_replicas: None });
        assert_eq!(pool.placements().len(), 3);
        assert_eq!(pool.termination(), &Termination::Exhausted);

        let pool = enumerate(Policy::SimultaneousK { max_replicas: Some(2) });
        assert_eq!(pool.placements().len(), 2);
        assert_eq!(pool.termination(), &Termination::ReplicaLimit(2));
    }

    #[test]
    fn larger_placement_is_discarded() {
        // 1 - 4 - 2 - 5 - 3 with a private candidate for each target.
        // {4, 5} is the only placement of size 2, without 4 and 5 only {6, 7, 8} is left.
        let graph = Graph::from(vec![(1, 4), (4, 2), (2, 5), (5, 3), (1, 6), (2, 7), (3, 8)]);
        let roles = Roles::by_convention(8, 3);
        let pool = Enumerator::new(&graph, &roles, BranchAndBound::new(), Policy::DisjointAlternate).run();
        assert_eq!(pool.placements(), &[Placement::from(vec![4, 5])]);
        assert_eq!(pool.termination(), &Termination::SizeExceeded { optimal: 2, found: 3 });
    }

    #[test]
    fn degenerate_graph() {
        let graph = Graph::from(vec![(1, 5), (2, 5), (3, 5), (4, 5)]);
        let roles = Roles::by_convention(5, 4);
        let pool = Enumerator::new(&graph, &roles, BranchAndBound::new(), Policy::DisjointAlternate).run();
        assert!(pool.placements().is_empty());
        assert!(matches!(pool.termination(), Termination::Degenerate(d) if d.len() == 6));
        assert!(matches!(pool.require_nonempty(), Err(Error::DegenerateGraph(_))));
    }

    #[test]
    fn nothing_to_monitor() {
        let graph = Graph::from(vec![(1, 2)]);
        let roles = Roles::new(vec![], vec![1, 2]);
        for policy in [Policy::PureAlternate, Policy::DisjointAlternate] {
            let pool = Enumerator::new(&graph, &roles, BranchAndBound::new(), policy).run();
            assert_eq!(pool.placements(), &[Placement::default()]);
            assert_eq!(pool.termination(), &Termination::Exhausted);
            assert_eq!(pool.report().savings(), None);
        }
    }

    #[test]
    fn single_steps() {
        let (graph, roles) = pairs();
        let mut enumerator = Enumerator::new(&graph, &roles, BranchAndBound::new(), Policy::DisjointAlternate);
        assert_eq!(enumerator.state(), State::Ready);
        assert_eq!(enumerator.step(), State::Solved);
        assert_eq!(enumerator.placements().len(), 1);
        assert_eq!(enumerator.exclusions().version(), 0);
        assert_eq!(enumerator.step(), State::Ready);
        assert_eq!(enumerator.exclusions().version(), 2);
        let first = enumerator.placements()[0].clone();
        assert!(first.iter().all(|n| enumerator.exclusions().is_pinned(n)));
    }

    // Always runs out of time
    struct Stalling {
        calls: Vec<Option<Duration>>,
    }

    impl Solver for Stalling {
        fn solve(&mut self, _: &Model, time_limit: Option<Duration>) -> SolveOutcome {
            self.calls.push(time_limit);
            SolveOutcome {
                status: SolveStatus::TimedOut { best: None },
                statistics: SolveStatistics::default(),
            }
        }

        fn name(&self) -> &str {
            "stalling"
        }
    }

    #[test]
    fn timeouts_are_retried() {
        let (graph, roles) = pairs();
        let mut solver = Stalling { calls: Vec::new() };
        let pool = Enumerator::new(&graph, &roles, &mut solver, Policy::PureAlternate)
            .with_timeout(Some(Duration::from_secs(1)), 2)
            .run();
        assert_eq!(pool.termination(), &Termination::TimedOut);
        assert!(pool.placements().is_empty());
        assert!(matches!(pool.require_nonempty(), Err(Error::TimedOut)));
        assert_eq!(solver.calls, vec![
            Some(Duration::from_secs(1)),
            Some(Duration::from_secs(2)),
            Some(Duration::from_secs(4)),
        ]);
    }

    #[test]
    fn report_savings() {
        let report = EnumerationReport {
            solutions: 2,
            optimal_size: Some(5),
            targets: 14,
            solves: 3,
            elapsed: Duration::ZERO,
        };
        let savings = report.savings().unwrap();
        assert!((savings - 64.2857).abs() < 1e-3);
    }
}
