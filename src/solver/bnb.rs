use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::Level::Trace;
use log::{debug, trace, log_enabled};

use super::*;

/// Exact depth-first branch and bound solver.
///
/// Each search node propagates variable bounds through the linear
/// constraints, checks quadratic constraints with interval arithmetic and
/// is cut off as soon as the objective can no longer beat the incumbent.
///
/// The objective bound counts a greedy set of open covering rows
/// (`sum(x) >= 1` over binaries) that share no free variable, since each of
/// them still needs a variable of its own. The same count bounds integer
/// variables tied to a sum of binaries by an equality, such as a common
/// placement size.
/// Branching follows the shortest open covering row and tries 1 first, so
/// the first leaf is a greedy cover.
#[derive(Debug, Clone)]
pub struct BranchAndBound {
    check_interval: u64,
}

impl BranchAndBound {
    /// Clock is read every this many nodes when a time limit is set.
    pub const DEFAULT_CHECK_INTERVAL: u64 = 1024;

    pub fn new() -> Self {
        Self::with_check_interval(Self::DEFAULT_CHECK_INTERVAL)
    }

    /// A higher interval reduces overhead but may overshoot the time limit further.
    pub fn with_check_interval(check_interval: u64) -> Self {
        BranchAndBound { check_interval: check_interval.max(1) }
    }
}

impl Default for BranchAndBound {
    fn default() -> Self {
        BranchAndBound::new()
    }
}

impl Solver for BranchAndBound {
    fn solve(&mut self, model: &Model, time_limit: Option<Duration>) -> SolveOutcome {
        debug!("Solving model `{}`: {} variables, {} constraints",
               model.name(), model.n_vars(), model.n_constraints());
        let mut search = Search::new(model, time_limit, self.check_interval);
        let status = search.run();
        let statistics = SolveStatistics {
            nodes: search.nodes,
            pruned: search.pruned,
            elapsed: search.start.elapsed(),
        };
        debug!("Model `{}` is {status} after {} nodes in {:.3}s",
               model.name(), statistics.nodes, statistics.elapsed.as_secs_f64());
        SolveOutcome { status, statistics }
    }

    fn name(&self) -> &str {
        "branch-and-bound"
    }
}


type Domains = Vec<(i64, i64)>;

struct Search<'m> {
    model: &'m Model,
    // Linear constraints each variable appears in
    occurrences: Vec<Vec<usize>>,
    // Static branching order, used once no covering row is open
    order: Vec<Var>,
    // `sum(x) >= 1` over binaries, shortest first
    covering: Vec<usize>,
    // `sum(x) >= r` over binaries with `r > 1`
    cardinality: Vec<usize>,
    // Objective coefficient of each binary that is never negative
    cost: Vec<Option<i64>>,
    has_costs: bool,
    sizes: Vec<SizeLink>,
    incumbent: Option<Assignment>,

    nodes: u64,
    pruned: u64,
    start: Instant,
    time_limit: Option<Duration>,
    check_interval: u64,
    timed_out: bool,
}

// Objective variable tied to sums of binaries by `sum(members) - size == 0`
struct SizeLink {
    size: Var,
    coef: i64,
    groups: Vec<Group>,
}

struct Group {
    members: Vec<Var>,
    mask: Vec<bool>,
}

impl<'m> Search<'m> {
    fn new(model: &'m Model, time_limit: Option<Duration>, check_interval: u64) -> Self {
        let mut occurrences = vec![Vec::new(); model.n_vars()];
        for (c, constraint) in model.linear_constraints().iter().enumerate() {
            for &(v, _) in &constraint.expr.terms {
                // Avoid duplicates when a variable is mentioned twice
                if occurrences[v.index()].last() != Some(&c) {
                    occurrences[v.index()].push(c);
                }
            }
        }
        let mut quad_occurrences = vec![0usize; model.n_vars()];
        for constraint in model.quadratic_constraints() {
            for &(a, b, _) in &constraint.expr.quad {
                quad_occurrences[a.index()] += 1;
                quad_occurrences[b.index()] += 1;
            }
        }

        // Wide domains first: they usually carry aggregate quantities that
        // decide a lot at once. Then the most constrained variables.
        let mut order: Vec<Var> = (0..model.n_vars() as u32).map(Var).collect();
        order.sort_by_key(|&v| {
            let (lo, hi) = model.bounds(v);
            let degree = occurrences[v.index()].len() + quad_occurrences[v.index()];
            (std::cmp::Reverse(hi - lo > 1), std::cmp::Reverse(degree), v)
        });

        let is_binary = |v: Var| model.bounds(v) == (0, 1);
        let mut coefs = vec![0i64; model.n_vars()];
        for &(v, c) in &model.objective().terms {
            coefs[v.index()] += c;
        }
        let cost: Vec<Option<i64>> = (0..model.n_vars())
            .map(|i| (is_binary(Var(i as u32)) && coefs[i] >= 0).then_some(coefs[i]))
            .collect();
        let has_costs = cost.iter().any(|c| matches!(c, Some(c) if *c > 0));

        let mut covering = Vec::new();
        let mut cardinality = Vec::new();
        let mut sizes: Vec<SizeLink> = Vec::new();
        for (c, constraint) in model.linear_constraints().iter().enumerate() {
            let expr = &constraint.expr;
            if expr.constant != 0 || expr.terms.is_empty() {
                continue;
            }
            let unit_binaries = |terms: &[(Var, i64)]| terms.iter().all(|&(v, k)| k == 1 && is_binary(v));
            match constraint.sense {
                Sense::Ge if constraint.rhs == 1 && unit_binaries(&expr.terms) => covering.push(c),
                Sense::Ge if constraint.rhs > 1 && unit_binaries(&expr.terms) => cardinality.push(c),
                Sense::Eq if constraint.rhs == 0 => {
                    let mut negative = expr.terms.iter().filter(|&&(_, k)| k == -1);
                    let (Some(&(size, _)), None) = (negative.next(), negative.next()) else {
                        continue;
                    };
                    let members: Vec<Var> = expr.terms.iter()
                        .filter(|&&(v, _)| v != size)
                        .map(|&(v, _)| v)
                        .collect();
                    let linked = coefs[size.index()] > 0 && !is_binary(size)
                        && members.len() + 1 == expr.terms.len()
                        && expr.terms.iter().all(|&(v, k)| v == size || (k == 1 && is_binary(v)));
                    if !linked {
                        continue;
                    }
                    let mut mask = vec![false; model.n_vars()];
                    for v in &members {
                        mask[v.index()] = true;
                    }
                    let group = Group { members, mask };
                    match sizes.iter_mut().find(|link| link.size == size) {
                        Some(link) => link.groups.push(group),
                        None => sizes.push(SizeLink { size, coef: coefs[size.index()], groups: vec![group] }),
                    }
                },
                _ => {},
            }
        }
        // Short rows first lets the greedy packing pick more of them
        covering.sort_by_key(|&c| model.linear_constraints()[c].expr.terms.len());

        Search {
            model,
            occurrences,
            order,
            covering,
            cardinality,
            cost,
            has_costs,
            sizes,
            incumbent: None,
            nodes: 0,
            pruned: 0,
            start: Instant::now(),
            time_limit,
            check_interval,
            timed_out: false,
        }
    }

    fn run(&mut self) -> SolveStatus {
        let mut domains = self.model.domains();
        let all: Vec<usize> = (0..self.model.linear_constraints().len()).collect();
        if self.propagate(&mut domains, all) {
            self.descend(domains);
        }
        if self.timed_out {
            SolveStatus::TimedOut { best: self.incumbent.take() }
        } else {
            match self.incumbent.take() {
                Some(solution) => SolveStatus::Optimal(solution),
                None => SolveStatus::Infeasible,
            }
        }
    }

    // The first node always reads the clock, so a zero limit stops at once
    fn out_of_time(&mut self) -> bool {
        if !self.timed_out && (self.nodes == 1 || self.nodes % self.check_interval == 0) {
            if let Some(limit) = self.time_limit {
                self.timed_out = self.start.elapsed() >= limit;
            }
        }
        self.timed_out
    }

    // `domains` is already propagated
    fn descend(&mut self, domains: Domains) {
        self.nodes += 1;
        if self.out_of_time() {
            return;
        }
        if !self.quadratic_feasible(&domains) {
            return;
        }
        let Some(bound) = self.lower_bound(&domains) else {
            self.pruned += 1;
            return;
        };
        if let Some(best) = &self.incumbent {
            if bound >= best.objective() {
                self.pruned += 1;
                return;
            }
        }

        let Some((var, values)) = self.branch(&domains) else {
            // Everything fixed, and all constraints held during propagation
            let values: Vec<i64> = domains.iter().map(|&(lo, _)| lo).collect();
            let solution = Assignment::new(values, self.model);
            if log_enabled!(Trace) {
                trace!("New incumbent with objective {} at node {}", solution.objective(), self.nodes);
            }
            self.incumbent = Some(solution);
            return;
        };

        for value in values {
            let mut child = domains.clone();
            child[var.index()] = (value, value);
            let touched = self.occurrences[var.index()].clone();
            if self.propagate(&mut child, touched) {
                self.descend(child);
            }
            if self.timed_out {
                return;
            }
        }
    }

    // Variable to branch on and its values in the order to try them.
    // Wide domains go first. Then a variable of the shortest open covering
    // row, set to 1 first so that the first leaf is a greedy cover.
    fn branch(&self, domains: &[(i64, i64)]) -> Option<(Var, Vec<i64>)> {
        let unfixed = |v: &Var| {
            let (lo, hi) = domains[v.index()];
            lo < hi
        };
        let wide = self.order.iter()
            .find(|v| {
                let (lo, hi) = domains[v.index()];
                hi - lo > 1
            });
        let var = match wide {
            Some(&var) => var,
            None => match self.shortest_open_row(domains) {
                Some(var) => return Some((var, vec![1, 0])),
                None => *self.order.iter().find(|v| unfixed(*v))?,
            },
        };
        let (lo, hi) = domains[var.index()];
        let values = if self.objective_coef(var) >= 0 {
            (lo..=hi).collect()
        } else {
            (lo..=hi).rev().collect()
        };
        Some((var, values))
    }

    fn shortest_open_row(&self, domains: &[(i64, i64)]) -> Option<Var> {
        let constraints = self.model.linear_constraints();
        let mut best: Option<(usize, Var)> = None;
        for &c in &self.covering {
            let terms = &constraints[c].expr.terms;
            if terms.iter().any(|(v, _)| domains[v.index()].0 >= 1) {
                continue;
            }
            let free = terms.iter().filter(|(v, _)| domains[v.index()].1 >= 1);
            let count = free.clone().count();
            if count == 0 || best.is_some_and(|(n, _)| count >= n) {
                continue;
            }
            // Prefer the variable that settles the most other rows
            if let Some(&(var, _)) = free.max_by_key(|(v, _)| self.occurrences[v.index()].len()) {
                best = Some((count, var));
            }
        }
        best.map(|(_, var)| var)
    }

    // Lower bound on the objective below this node, `None` if no
    // assignment below it can be feasible.
    fn lower_bound(&self, domains: &[(i64, i64)]) -> Option<i64> {
        let (mut bound, _) = self.model.objective().bounds(domains);
        if self.has_costs {
            let cost = |v: Var| self.cost[v.index()];
            bound += self.packing(domains, cost).max(self.cardinality(domains, cost));
        }
        for link in &self.sizes {
            let (lo, hi) = domains[link.size.index()];
            let mut needed = lo;
            for group in &link.groups {
                let ones = group.members.iter().filter(|v| domains[v.index()].0 >= 1).count() as i64;
                let member = |v: Var| group.mask[v.index()].then_some(1);
                needed = needed.max(ones + self.packing(domains, member));
            }
            if needed > hi {
                return None;
            }
            bound += link.coef * (needed - lo);
        }
        Some(bound)
    }

    // Greedy set of open covering rows without a free variable in common.
    // Each of them raises the objective by at least its cheapest free
    // variable. Rows with a variable that has no cost are left out.
    fn packing(&self, domains: &[(i64, i64)], cost: impl Fn(Var) -> Option<i64>) -> i64 {
        let constraints = self.model.linear_constraints();
        let mut used = vec![false; domains.len()];
        let mut total = 0;
        'rows: for &c in &self.covering {
            let terms = &constraints[c].expr.terms;
            let mut cheapest = None;
            for &(v, _) in terms {
                let (lo, hi) = domains[v.index()];
                if lo >= 1 {
                    continue 'rows;
                }
                if hi < 1 {
                    continue;
                }
                if used[v.index()] {
                    continue 'rows;
                }
                let Some(w) = cost(v) else {
                    continue 'rows;
                };
                cheapest = Some(cheapest.map_or(w, |m: i64| m.min(w)));
            }
            // A row without free variables is left to propagation
            let Some(cheapest) = cheapest else {
                continue;
            };
            for &(v, _) in terms {
                used[v.index()] = true;
            }
            total += cheapest;
        }
        total
    }

    // Largest increase forced by a single `sum(x) >= r` row
    fn cardinality(&self, domains: &[(i64, i64)], cost: impl Fn(Var) -> Option<i64>) -> i64 {
        let constraints = self.model.linear_constraints();
        let mut best = 0;
        'rows: for &c in &self.cardinality {
            let constraint = &constraints[c];
            let mut ones = 0;
            let mut cheapest = i64::MAX;
            for &(v, _) in &constraint.expr.terms {
                let (lo, hi) = domains[v.index()];
                if lo >= 1 {
                    ones += 1;
                } else if hi >= 1 {
                    let Some(w) = cost(v) else {
                        continue 'rows;
                    };
                    cheapest = cheapest.min(w);
                }
            }
            let missing = constraint.rhs - ones;
            if missing > 0 && cheapest < i64::MAX {
                best = best.max(missing * cheapest);
            }
        }
        best
    }

    fn objective_coef(&self, var: Var) -> i64 {
        self.model.objective().terms.iter()
            .filter(|(v, _)| *v == var)
            .map(|&(_, c)| c)
            .sum()
    }

    fn quadratic_feasible(&self, domains: &[(i64, i64)]) -> bool {
        self.model.quadratic_constraints().iter().all(|c| {
            let (min, max) = c.expr.bounds(domains);
            c.sense.satisfiable(min, max, c.rhs)
        })
    }

    // Tighten domains until nothing changes. Returns `false` if some
    // linear constraint can no longer be satisfied.
    fn propagate(&self, domains: &mut Domains, start: Vec<usize>) -> bool {
        let constraints = self.model.linear_constraints();
        let mut queued = vec![false; constraints.len()];
        for &c in &start {
            queued[c] = true;
        }
        let mut queue = VecDeque::from(start);
        while let Some(c) = queue.pop_front() {
            queued[c] = false;
            let constraint = &constraints[c];
            let (min, max) = constraint.expr.bounds(domains);
            if !constraint.sense.satisfiable(min, max, constraint.rhs) {
                return false;
            }
            let need_lower = matches!(constraint.sense, Sense::Ge | Sense::Eq);
            let need_upper = matches!(constraint.sense, Sense::Le | Sense::Eq);

            for &(v, coef) in &constraint.expr.terms {
                if coef == 0 {
                    continue;
                }
                let (lo, hi) = domains[v.index()];
                if lo == hi {
                    continue;
                }
                let (term_min, term_max) = term_bounds(coef, (lo, hi));
                let (mut new_lo, mut new_hi) = (lo, hi);
                if need_lower {
                    // coef * x >= rhs - (max of all other terms)
                    let r = constraint.rhs - (max - term_max);
                    if coef > 0 {
                        new_lo = new_lo.max(div_ceil(r, coef));
                    } else {
                        new_hi = new_hi.min(div_floor(r, coef));
                    }
                }
                if need_upper {
                    // coef * x <= rhs - (min of all other terms)
                    let r = constraint.rhs - (min - term_min);
                    if coef > 0 {
                        new_hi = new_hi.min(div_floor(r, coef));
                    } else {
                        new_lo = new_lo.max(div_ceil(r, coef));
                    }
                }
                if new_lo > new_hi {
                    return false;
                }
                if (new_lo, new_hi) != (lo, hi) {
                    domains[v.index()] = (new_lo, new_hi);
                    for &other in &self.occurrences[v.index()] {
                        if !queued[other] {
                            queued[other] = true;
                            queue.push_back(other);
                        }
                    }
                }
            }
        }
        true
    }
}

fn div_floor(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && (a < 0) != (b < 0) { q - 1 } else { q }
}

fn div_ceil(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && (a < 0) == (b < 0) { q + 1 } else { q }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_division() {
        assert_eq!(div_floor(7, 2), 3);
        assert_eq!(div_floor(-7, 2), -4);
        assert_eq!(div_floor(7, -2), -4);
        assert_eq!(div_floor(-7, -2), 3);
        assert_eq!(div_ceil(7, 2), 4);
        assert_eq!(div_ceil(-7, 2), -3);
        assert_eq!(div_ceil(7, -2), -3);
        assert_eq!(div_ceil(-7, -2), 4);
        assert_eq!(div_ceil(6, 3), 2);
    }

    // Three rows `x_0 + x_1 >= 1`, `x_2 + x_3 >= 1`, `x_4 + x_5 >= 1`
    fn pairs(model: &mut Model) -> Vec<Var> {
        let x: Vec<Var> = (0..6).map(|i| model.add_binary(&format!("x_{i}"))).collect();
        for pair in x.chunks(2) {
            model.add_constraint(LinearExpr::sum(pair.iter().copied()), Sense::Ge, 1);
        }
        x
    }

    #[test]
    fn disjoint_rows_bound_the_objective() {
        let mut model = Model::new("weighted pairs");
        let x = pairs(&mut model);
        let mut objective = LinearExpr::new();
        for (i, &v) in x.iter().enumerate() {
            objective.add_term(v, i as i64 + 1);
        }
        model.set_objective(objective);
        let search = Search::new(&model, None, 1);
        let mut domains = model.domains();
        // Cheapest of each pair: 1 + 3 + 5
        assert_eq!(search.lower_bound(&domains), Some(9));
        domains[x[3].index()] = (1, 1);
        assert_eq!(search.lower_bound(&domains), Some(4 + 1 + 5));
        domains[x[0].index()] = (0, 0);
        assert_eq!(search.lower_bound(&domains), Some(4 + 2 + 5));
    }

    #[test]
    fn cardinality_row_bounds_the_objective() {
        let mut model = Model::new("at least four");
        let x = pairs(&mut model);
        model.add_constraint(LinearExpr::sum(x.iter().copied()), Sense::Ge, 4);
        model.set_objective(LinearExpr::sum(x.iter().copied()));
        let search = Search::new(&model, None, 1);
        assert_eq!(search.lower_bound(&model.domains()), Some(4), "Three disjoint rows, but four ones");

        let status = BranchAndBound::new().solve(&model, None).status;
        assert_eq!(status.optimal().map(Assignment::objective), Some(4));
    }

    #[test]
    fn size_needs_a_variable_per_disjoint_row() {
        let mut model = Model::new("sized pairs");
        let size = model.add_integer("size", 0, 10);
        let x = pairs(&mut model);
        let mut expr = LinearExpr::sum(x.iter().copied());
        expr.add_term(size, -1);
        model.add_constraint(expr, Sense::Eq, 0);
        model.set_objective(size.into());

        let search = Search::new(&model, None, 1);
        let mut domains = model.domains();
        assert_eq!(search.lower_bound(&domains), Some(3));
        domains[x[0].index()] = (1, 1);
        domains[x[1].index()] = (1, 1);
        assert_eq!(search.lower_bound(&domains), Some(4));

        // Propagation alone accepts a size of two here
        let mut domains = model.domains();
        domains[size.index()] = (0, 2);
        assert!(search.propagate(&mut domains, (0..4).collect()));
        assert_eq!(search.lower_bound(&domains), None);
    }

    #[test]
    fn first_leaf_is_optimal_cover() {
        let mut model = Model::new("pairs");
        let x = pairs(&mut model);
        model.set_objective(LinearExpr::sum(x.iter().copied()));
        let outcome = BranchAndBound::new().solve(&model, None);
        assert_eq!(outcome.status.optimal().map(Assignment::objective), Some(3));
        // One path down to the first cover, then every sibling is cut by the bound
        assert!(outcome.statistics.nodes <= 13, "{} nodes", outcome.statistics.nodes);
        assert!(outcome.statistics.pruned >= 6);
    }
}
