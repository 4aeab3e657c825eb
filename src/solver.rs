//! Integer programming models and the solvers that optimize them.
//!
//! A [`Model`] holds bounded integer variables, linear and quadratic
//! constraints and a linear objective that is always minimized.
//! All coefficients are integers.
//! Anything implementing [`Solver`] can optimize a model;
//! [`BranchAndBound`] is an exact backend included with this crate.
//!
//! ```
//! use monitorgame::solver::*;
//!
//! let mut model = Model::new("cover");
//! let a = model.add_binary("a");
//! let b = model.add_binary("b");
//! model.add_constraint(LinearExpr::sum([a, b]), Sense::Ge, 1);
//! model.set_objective(LinearExpr::from(vec![(a, 2), (b, 3)]));
//!
//! let outcome = BranchAndBound::new().solve(&model, None);
//! let solution = outcome.status.optimal().unwrap();
//! assert_eq!(solution.objective(), 2);
//! assert!(solution.is_set(a) && !solution.is_set(b));
//! ```

mod bnb;


use std::fmt;
use std::time::Duration;

pub use bnb::BranchAndBound;

/// Handle of a variable inside the [`Model`] that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Var(u32);

impl Var {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Ge,
    Le,
    Eq,
}

impl Sense {
    #[inline]
    pub fn holds(self, activity: i64, rhs: i64) -> bool {
        match self {
            Sense::Ge => activity >= rhs,
            Sense::Le => activity <= rhs,
            Sense::Eq => activity == rhs,
        }
    }

    // Whether some value in [min, max] can satisfy the constraint
    fn satisfiable(self, min: i64, max: i64, rhs: i64) -> bool {
        match self {
            Sense::Ge => max >= rhs,
            Sense::Le => min <= rhs,
            Sense::Eq => min <= rhs && rhs <= max,
        }
    }
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sense::Ge => ">=",
            Sense::Le => "<=",
            Sense::Eq => "==",
        })
    }
}

/// Weighted sum of variables plus a constant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinearExpr {
    pub terms: Vec<(Var, i64)>,
    pub constant: i64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all `vars` with coefficient 1.
    pub fn sum(vars: impl IntoIterator<Item=Var>) -> Self {
        vars.into_iter().map(|v| (v, 1)).collect::<Vec<_>>().into()
    }

    pub fn add_term(&mut self, var: Var, coef: i64) -> &mut Self {
        self.terms.push((var, coef));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn eval(&self, values: &[i64]) -> i64 {
        self.constant + self.terms.iter()
            .map(|&(v, c)| c * values[v.index()])
            .sum::<i64>()
    }

    /// Smallest and largest value over the given variable domains.
    pub(crate) fn bounds(&self, domains: &[(i64, i64)]) -> (i64, i64) {
        self.terms.iter().fold((self.constant, self.constant), |(min, max), &(v, c)| {
            let (lo, hi) = term_bounds(c, domains[v.index()]);
            (min + lo, max + hi)
        })
    }
}

impl From<Vec<(Var, i64)>> for LinearExpr {
    fn from(terms: Vec<(Var, i64)>) -> Self {
        LinearExpr { terms, constant: 0 }
    }
}

impl From<Var> for LinearExpr {
    fn from(var: Var) -> Self {
        LinearExpr::from(vec![(var, 1)])
    }
}

#[inline]
fn term_bounds(coef: i64, (lo, hi): (i64, i64)) -> (i64, i64) {
    if coef >= 0 {
        (coef * lo, coef * hi)
    } else {
        (coef * hi, coef * lo)
    }
}

/// Sum of weighted variable products plus a linear part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuadExpr {
    pub quad: Vec<(Var, Var, i64)>,
    pub linear: LinearExpr,
}

impl QuadExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_product(&mut self, a: Var, b: Var, coef: i64) -> &mut Self {
        self.quad.push((a, b, coef));
        self
    }

    /// Add `(a - b)^2`, expanded as `a*a - 2*a*b + b*b`.
    pub fn add_squared_difference(&mut self, a: Var, b: Var) -> &mut Self {
        self.add_product(a, a, 1)
            .add_product(a, b, -2)
            .add_product(b, b, 1)
    }

    pub fn eval(&self, values: &[i64]) -> i64 {
        self.linear.eval(values) + self.quad.iter()
            .map(|&(a, b, c)| c * values[a.index()] * values[b.index()])
            .sum::<i64>()
    }

    // Interval arithmetic over the domains. Loose, but never excludes a feasible value.
    // Products of two variables with at most two values each are evaluated
    // exactly, together with the squares of both, so that `(a - b)^2` over
    // binaries stays within `[0, 1]`.
    pub(crate) fn bounds(&self, domains: &[(i64, i64)]) -> (i64, i64) {
        let two_valued = |v: Var| {
            let (lo, hi) = domains[v.index()];
            hi - lo <= 1
        };
        let (mut min, mut max) = self.linear.bounds(domains);
        let mut grouped = vec![false; self.quad.len()];
        for (i, &(a, b, _)) in self.quad.iter().enumerate() {
            if grouped[i] || a == b || !two_valued(a) || !two_valued(b) {
                continue;
            }
            let mut group = Vec::new();
            for (j, &(x, y, c)) in self.quad.iter().enumerate() {
                if !grouped[j] && (x == a || x == b) && (y == a || y == b) {
                    grouped[j] = true;
                    group.push((x, y, c));
                }
            }
            let (lo, hi) = pair_bounds(&group, a, b, domains);
            min += lo;
            max += hi;
        }
        for (i, &(a, b, c)) in self.quad.iter().enumerate() {
            if grouped[i] {
                continue;
            }
            let (plo, phi) = product_bounds(a, b, domains);
            let (lo, hi) = if c >= 0 { (c * plo, c * phi) } else { (c * phi, c * plo) };
            min += lo;
            max += hi;
        }
        (min, max)
    }
}

// Exact range of products over `a` and `b` by trying all value combinations
fn pair_bounds(terms: &[(Var, Var, i64)], a: Var, b: Var, domains: &[(i64, i64)]) -> (i64, i64) {
    let (alo, ahi) = domains[a.index()];
    let (blo, bhi) = domains[b.index()];
    let mut range = (i64::MAX, i64::MIN);
    for va in [alo, ahi] {
        for vb in [blo, bhi] {
            let value = |v: Var| if v == a { va } else { vb };
            let total: i64 = terms.iter().map(|&(x, y, c)| c * value(x) * value(y)).sum();
            range = (range.0.min(total), range.1.max(total));
        }
    }
    range
}

fn product_bounds(a: Var, b: Var, domains: &[(i64, i64)]) -> (i64, i64) {
    let (alo, ahi) = domains[a.index()];
    if a == b {
        let (lo2, hi2) = (alo * alo, ahi * ahi);
        return if alo >= 0 {
            (lo2, hi2)
        } else if ahi <= 0 {
            (hi2, lo2)
        } else {
            (0, lo2.max(hi2))
        };
    }
    let (blo, bhi) = domains[b.index()];
    let corners = [alo * blo, alo * bhi, ahi * blo, ahi * bhi];
    (corners.iter().copied().min().unwrap_or(0), corners.iter().copied().max().unwrap_or(0))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint<E> {
    pub expr: E,
    pub sense: Sense,
    pub rhs: i64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VarDef {
    name: String,
    lb: i64,
    ub: i64,
}

/// An integer program: minimize a linear objective subject to constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    name: String,
    vars: Vec<VarDef>,
    linear: Vec<Constraint<LinearExpr>>,
    quadratic: Vec<Constraint<QuadExpr>>,
    objective: LinearExpr,
}

impl Model {
    pub fn new(name: &str) -> Self {
        Model {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_binary(&mut self, name: &str) -> Var {
        self.add_integer(name, 0, 1)
    }

    /// # Panics
    ///
    /// Panics if `lb > ub`.
    pub fn add_integer(&mut self, name: &str, lb: i64, ub: i64) -> Var {
        assert!(lb <= ub, "Empty domain for variable {name}");
        let var = Var(self.vars.len() as u32);
        self.vars.push(VarDef { name: name.to_string(), lb, ub });
        var
    }

    pub fn add_constraint(&mut self, expr: LinearExpr, sense: Sense, rhs: i64) {
        self.linear.push(Constraint { expr, sense, rhs, name: None });
    }

    pub fn add_named_constraint(&mut self, name: String, expr: LinearExpr, sense: Sense, rhs: i64) {
        self.linear.push(Constraint { expr, sense, rhs, name: Some(name) });
    }

    pub fn add_quadratic_constraint(&mut self, expr: QuadExpr, sense: Sense, rhs: i64) {
        self.quadratic.push(Constraint { expr, sense, rhs, name: None });
    }

    /// Set the linear objective to be minimized.
    pub fn set_objective(&mut self, objective: LinearExpr) {
        self.objective = objective;
    }

    #[inline]
    pub fn n_vars(&self) -> usize {
        self.vars.len()
    }

    #[inline]
    pub fn n_constraints(&self) -> usize {
        self.linear.len() + self.quadratic.len()
    }

    pub fn var_name(&self, var: Var) -> &str {
        &self.vars[var.index()].name
    }

    pub fn bounds(&self, var: Var) -> (i64, i64) {
        let def = &self.vars[var.index()];
        (def.lb, def.ub)
    }

    pub fn linear_constraints(&self) -> &[Constraint<LinearExpr>] {
        &self.linear
    }

    pub fn quadratic_constraints(&self) -> &[Constraint<QuadExpr>] {
        &self.quadratic
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    /// Returns `true` if `values` respects all bounds and constraints.
    pub fn is_feasible(&self, values: &[i64]) -> bool {
        values.len() == self.vars.len()
            && self.vars.iter().zip(values).all(|(def, &x)| def.lb <= x && x <= def.ub)
            && self.linear.iter().all(|c| c.sense.holds(c.expr.eval(values), c.rhs))
            && self.quadratic.iter().all(|c| c.sense.holds(c.expr.eval(values), c.rhs))
    }

    fn domains(&self) -> Vec<(i64, i64)> {
        self.vars.iter().map(|def| (def.lb, def.ub)).collect()
    }
}


/// Values for all variables of a model, as found by a solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    values: Vec<i64>,
    objective: i64,
}

impl Assignment {
    pub fn new(values: Vec<i64>, model: &Model) -> Self {
        let objective = model.objective().eval(&values);
        Assignment { values, objective }
    }

    #[inline]
    pub fn value(&self, var: Var) -> i64 {
        self.values[var.index()]
    }

    /// For binary variables: whether the variable was chosen.
    #[inline]
    pub fn is_set(&self, var: Var) -> bool {
        self.value(var) == 1
    }

    #[inline]
    pub fn objective(&self) -> i64 {
        self.objective
    }

    #[inline]
    pub fn values(&self) -> &[i64] {
        &self.values
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal(Assignment),
    Infeasible,
    Unbounded,
    /// The time budget ran out before optimality or infeasibility was proven.
    TimedOut {
        best: Option<Assignment>,
    },
}

impl SolveStatus {
    pub fn optimal(&self) -> Option<&Assignment> {
        match self {
            SolveStatus::Optimal(solution) => Some(solution),
            _ => None,
        }
    }

    pub fn is_optimal(&self) -> bool {
        matches!(self, SolveStatus::Optimal(_))
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Optimal(solution) => write!(f, "optimal (objective {})", solution.objective),
            SolveStatus::Infeasible => write!(f, "infeasible"),
            SolveStatus::Unbounded => write!(f, "unbounded"),
            SolveStatus::TimedOut { .. } => write!(f, "timed out"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolveStatistics {
    /// Search nodes entered.
    pub nodes: u64,
    /// Nodes cut off by the objective bound.
    pub pruned: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    pub statistics: SolveStatistics,
}

/// Common interface for integer program solvers.
pub trait Solver {
    /// Minimize the objective of `model`.
    ///
    /// With a `time_limit`, the solver gives up with [`SolveStatus::TimedOut`]
    /// once the limit is exceeded.
    fn solve(&mut self, model: &Model, time_limit: Option<Duration>) -> SolveOutcome;

    /// The solver name for logging.
    fn name(&self) -> &str;
}

impl<S: Solver + ?Sized> Solver for &mut S {
    fn solve(&mut self, model: &Model, time_limit: Option<Duration>) -> SolveOutcome {
        (**self).solve(model, time_limit)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
