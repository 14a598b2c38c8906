//! Constrained nonlinear optimization.
//!
//! The managers depend only on the small surface here: box bounds, per-coordinate
//! absolute x-tolerances, eval/time budgets, at most one (in)equality
//! constraint, an objective to maximize, and optional chaining of a local
//! algorithm into a global one. Any solver honoring this surface can be
//! plugged in.
//!
//! The built-in local core solves each constrained problem as a sequence of
//! box-penalized unconstrained subproblems driven through `argmin`'s L-BFGS
//! with a More-Thuente line search; an augmented-Lagrangian outer loop
//! escalates the penalty and updates the multiplier until the constraint
//! holds, and the iterate is projected onto the box afterwards. The global
//! algorithm tags run seeded random-search / multistart cores on top of it.
//!
//! Result taxonomy matches what callers branch on: `XtolReached` and
//! `RoundoffLimited` are acceptable successes, budget exhaustion is reported
//! distinctly, and invalid arguments are always an error.

use std::cell::RefCell;
use std::time::{Duration, Instant};

use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::FloatType;

/// Closed set of algorithm tags accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Slsqp,
    Mma,
    Ccsaq,
    Lbfgs,
    Tnewton,
    TnewtonRestart,
    TnewtonPrecond,
    TnewtonPrecondRestart,
    Var1,
    Var2,
    Bobyqa,
    Cobyla,
    Isres,
    Direct,
    DirectLocal,
    Crs,
    Esch,
    Mlsl,
    MlslLowDiscrepancy,
    Stogo,
    StogoRand,
    AugmentedLagrangian,
}

impl Algorithm {
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "slsqp" => Self::Slsqp,
            "mma" => Self::Mma,
            "ccsaq" => Self::Ccsaq,
            "lbfgs" => Self::Lbfgs,
            "tnewton" => Self::Tnewton,
            "tnewton_restart" => Self::TnewtonRestart,
            "tnewton_precond" => Self::TnewtonPrecond,
            "tnewton_precond_restart" => Self::TnewtonPrecondRestart,
            "var1" => Self::Var1,
            "var2" => Self::Var2,
            "bobyqa" => Self::Bobyqa,
            "cobyla" => Self::Cobyla,
            "isres" => Self::Isres,
            "direct" => Self::Direct,
            "direct_local" => Self::DirectLocal,
            "crs" => Self::Crs,
            "esch" => Self::Esch,
            "mlsl" => Self::Mlsl,
            "mlsl_low_discrepancy" => Self::MlslLowDiscrepancy,
            "stogo" => Self::Stogo,
            "stogo_rand" => Self::StogoRand,
            "augmented_lagrangian" => Self::AugmentedLagrangian,
            _ => return None,
        })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Slsqp => "slsqp",
            Self::Mma => "mma",
            Self::Ccsaq => "ccsaq",
            Self::Lbfgs => "lbfgs",
            Self::Tnewton => "tnewton",
            Self::TnewtonRestart => "tnewton_restart",
            Self::TnewtonPrecond => "tnewton_precond",
            Self::TnewtonPrecondRestart => "tnewton_precond_restart",
            Self::Var1 => "var1",
            Self::Var2 => "var2",
            Self::Bobyqa => "bobyqa",
            Self::Cobyla => "cobyla",
            Self::Isres => "isres",
            Self::Direct => "direct",
            Self::DirectLocal => "direct_local",
            Self::Crs => "crs",
            Self::Esch => "esch",
            Self::Mlsl => "mlsl",
            Self::MlslLowDiscrepancy => "mlsl_low_discrepancy",
            Self::Stogo => "stogo",
            Self::StogoRand => "stogo_rand",
            Self::AugmentedLagrangian => "augmented_lagrangian",
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(
            self,
            Self::Isres
                | Self::Direct
                | Self::DirectLocal
                | Self::Crs
                | Self::Esch
                | Self::Mlsl
                | Self::MlslLowDiscrepancy
                | Self::Stogo
                | Self::StogoRand
        )
    }

    fn is_multistart(&self) -> bool {
        matches!(self, Self::Mlsl | Self::MlslLowDiscrepancy)
    }
}

/// Terminal state of an `optimize` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationResult {
    Success,
    FtolReached,
    XtolReached,
    MaxevalReached,
    MaxtimeReached,
    RoundoffLimited,
    ForcedStop,
}

impl OptimizationResult {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Success => "generic success",
            Self::FtolReached => "stopped because ftol was reached",
            Self::XtolReached => "stopped because xtol was reached",
            Self::MaxevalReached => "stopped because maxeval was reached",
            Self::MaxtimeReached => "stopped because maxtime was reached",
            Self::RoundoffLimited => "roundoff errors limited progress",
            Self::ForcedStop => "forced stop",
        }
    }
}

/// Hard failures; unlike budget exhaustion these abort the call.
#[derive(Debug, thiserror::Error)]
pub enum OptimizationError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("optimization failure: {0}")]
    Failure(String),
}

/// The problem surface the solver evaluates. Objective is maximized; the
/// equality constraint targets 0, the inequality constraint targets <= 0.
/// Gradients are written into `grad` when requested.
pub trait Problem {
    fn max_objective(&mut self, x: &[FloatType], grad: Option<&mut [FloatType]>) -> FloatType;

    fn equality_constraint(
        &mut self,
        _x: &[FloatType],
        _grad: Option<&mut [FloatType]>,
    ) -> FloatType {
        0.0
    }

    fn inequality_constraint(
        &mut self,
        _x: &[FloatType],
        _grad: Option<&mut [FloatType]>,
    ) -> FloatType {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConstraintKind {
    None,
    Equality,
    Inequality,
}

/// One optimizer instance. Mirrors the minimal builder surface the managers
/// use; `set_local_algorithm` chains a local solver into a global one.
pub struct Optimization {
    algorithm: Algorithm,
    dim: usize,
    lower: Vec<FloatType>,
    upper: Vec<FloatType>,
    xtol_abs: Vec<FloatType>,
    maxeval: usize,
    maxtime: Option<Duration>,
    constraint: ConstraintKind,
    constraint_tol: FloatType,
    population: usize,
    seed: u64,
    local: Option<Box<Optimization>>,
    last_result: OptimizationResult,
    optimized_value: FloatType,
}

impl Optimization {
    pub fn new(algorithm: Algorithm, dim: usize) -> Self {
        Self {
            algorithm,
            dim,
            lower: vec![FloatType::NEG_INFINITY; dim],
            upper: vec![FloatType::INFINITY; dim],
            xtol_abs: vec![1e-9; dim],
            maxeval: usize::MAX,
            maxtime: None,
            constraint: ConstraintKind::None,
            constraint_tol: 0.0,
            population: 0,
            seed: 0,
            local: None,
            last_result: OptimizationResult::Success,
            optimized_value: 0.0,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn xtol(&mut self, v: Vec<FloatType>) {
        debug_assert_eq!(v.len(), self.dim);
        self.xtol_abs = v;
    }

    pub fn lower_bounds(&mut self, v: Vec<FloatType>) {
        debug_assert_eq!(v.len(), self.dim);
        self.lower = v;
    }

    pub fn upper_bounds(&mut self, v: Vec<FloatType>) {
        debug_assert_eq!(v.len(), self.dim);
        self.upper = v;
    }

    pub fn maxeval(&mut self, v: usize) {
        self.maxeval = v;
    }

    /// Timeout in seconds.
    pub fn maxtime(&mut self, secs: FloatType) {
        self.maxtime = Some(Duration::from_secs_f64(secs));
    }

    pub fn add_equality_constraint(&mut self, tolerance: FloatType) {
        self.constraint = ConstraintKind::Equality;
        self.constraint_tol = tolerance.max(1e-12);
    }

    pub fn add_inequality_constraint(&mut self, tolerance: FloatType) {
        self.constraint = ConstraintKind::Inequality;
        self.constraint_tol = tolerance.max(1e-12);
    }

    /// Number of sampling points for the stochastic global cores.
    pub fn population(&mut self, v: usize) {
        self.population = v;
    }

    pub fn seed(&mut self, v: u64) {
        self.seed = v;
    }

    pub fn set_local_algorithm(&mut self, local: Optimization) {
        self.local = Some(Box::new(local));
    }

    pub fn optimized_value(&self) -> FloatType {
        self.optimized_value
    }

    pub fn last_result(&self) -> OptimizationResult {
        self.last_result
    }

    pub fn last_result_description(&self) -> &'static str {
        self.last_result.description()
    }

    pub fn xtol_reached(&self) -> bool {
        self.last_result == OptimizationResult::XtolReached
    }

    pub fn roundoff_limited(&self) -> bool {
        self.last_result == OptimizationResult::RoundoffLimited
    }

    pub fn maxeval_reached(&self) -> bool {
        self.last_result == OptimizationResult::MaxevalReached
    }

    pub fn maxtime_reached(&self) -> bool {
        self.last_result == OptimizationResult::MaxtimeReached
    }

    /// Runs the configured algorithm on `x` in place. Returns `Ok(true)` only
    /// for generic success; acceptable terminations are queried afterwards.
    pub fn optimize<P: Problem>(
        &mut self,
        problem: &mut P,
        x: &mut [FloatType],
    ) -> Result<bool, OptimizationError> {
        if x.len() != self.dim {
            return Err(OptimizationError::InvalidArgs(format!(
                "dimension mismatch: {} vs {}",
                x.len(),
                self.dim
            )));
        }
        for i in 0..self.dim {
            if self.lower[i] > self.upper[i] {
                return Err(OptimizationError::InvalidArgs(format!(
                    "lower bound above upper bound at coordinate {i}"
                )));
            }
            x[i] = x[i].clamp(self.lower[i], self.upper[i]);
        }
        let deadline = self.maxtime.map(|t| Instant::now() + t);
        let mut budget = Budget {
            evals_left: self.maxeval,
            deadline,
        };
        let result = if self.algorithm.is_multistart() {
            self.run_multistart(problem, x, &mut budget)?
        } else if self.algorithm.is_global() {
            self.run_random_search(problem, x, &mut budget)?
        } else {
            // Local algorithms share the SLSQP-equivalent core: with a
            // constraint the augmented-Lagrangian outer loop lifts it, the
            // `augmented_lagrangian` tag additionally forwards inner solves
            // to the chained algorithm.
            self.run_constrained(problem, x, &mut budget)?
        };
        self.last_result = result;
        self.optimized_value = evaluate_objective(problem, x, None);
        Ok(result == OptimizationResult::Success)
    }

    fn run_constrained<P: Problem>(
        &mut self,
        problem: &mut P,
        x: &mut [FloatType],
        budget: &mut Budget,
    ) -> Result<OptimizationResult, OptimizationError> {
        if self.constraint == ConstraintKind::None {
            return self.inner_solve(problem, x, 0.0, 0.0, ConstraintKind::None, budget);
        }
        let mut lambda = 0.0;
        let mut mu = 10.0;
        let mut result = OptimizationResult::Success;
        for _ in 0..12 {
            result = self.inner_solve(problem, x, lambda, mu, self.constraint, budget)?;
            let c = constraint_value(problem, self.constraint, x);
            let violation = match self.constraint {
                ConstraintKind::Equality => c.abs(),
                ConstraintKind::Inequality => c.max(0.0),
                ConstraintKind::None => 0.0,
            };
            if violation <= self.constraint_tol {
                return Ok(result);
            }
            if matches!(
                result,
                OptimizationResult::MaxevalReached | OptimizationResult::MaxtimeReached
            ) {
                return Ok(result);
            }
            lambda += mu * c;
            mu *= 10.0;
        }
        Ok(result)
    }

    /// One augmented-Lagrangian subproblem: maximize
    /// `f(x) − λ·c(x) − μ/2·c(x)²` (inequality uses the clipped form) over the
    /// box. Forwards to the chained local algorithm when one is configured.
    fn inner_solve<P: Problem>(
        &mut self,
        problem: &mut P,
        x: &mut [FloatType],
        lambda: FloatType,
        mu: FloatType,
        kind: ConstraintKind,
        budget: &mut Budget,
    ) -> Result<OptimizationResult, OptimizationError> {
        let mut augmented = AugmentedProblem {
            problem,
            lambda,
            mu,
            kind,
        };
        if let Some(local) = self.local.take() {
            let mut local = *local;
            local.lower_bounds(self.lower.clone());
            local.upper_bounds(self.upper.clone());
            local.xtol(self.xtol_abs.clone());
            let res = if local.algorithm.is_multistart() {
                local.run_multistart(&mut augmented, x, budget)?
            } else if local.algorithm.is_global() {
                let r = local.run_random_search(&mut augmented, x, budget)?;
                // Polish the sampled point with the local core.
                let polish = self.lbfgs_subproblem(&mut augmented, x, mu, budget);
                if r == OptimizationResult::Success {
                    polish
                } else {
                    r
                }
            } else {
                self.lbfgs_subproblem(&mut augmented, x, mu, budget)
            };
            self.local = Some(Box::new(local));
            Ok(res)
        } else {
            Ok(self.lbfgs_subproblem(&mut augmented, x, mu, budget))
        }
    }

    /// One penalized unconstrained subproblem: L-BFGS with a More-Thuente
    /// line search on the negated objective plus quadratic box-violation
    /// penalties, the best iterate taken and projected onto the box. A
    /// solver error means the line search could not improve the iterate at
    /// machine scale; the current point stays useful.
    fn lbfgs_subproblem<P: Problem>(
        &self,
        problem: &mut P,
        x: &mut [FloatType],
        penalty: FloatType,
        budget: &mut Budget,
    ) -> OptimizationResult {
        if budget.time_exhausted() {
            return OptimizationResult::MaxtimeReached;
        }
        if budget.evals_exhausted() {
            return OptimizationResult::MaxevalReached;
        }
        let max_iters = budget.evals_left as u64;
        let adapter = BoxPenalizedProblem {
            problem: RefCell::new(problem),
            lower: &self.lower,
            upper: &self.upper,
            penalty: penalty.max(BOUND_PENALTY_FLOOR),
        };
        let linesearch = MoreThuenteLineSearch::new();
        let solver = LBFGS::new(linesearch, LBFGS_MEMORY);
        let executor = Executor::new(adapter, solver)
            .configure(|state| state.param(x.to_vec()).max_iters(max_iters));
        let result = match executor.run() {
            Ok(res) => {
                let used = res.state().get_iter().max(1);
                budget.spend_many(used as usize);
                if let Some(best) = res.state().get_best_param() {
                    x.copy_from_slice(best);
                }
                if used >= max_iters {
                    OptimizationResult::MaxevalReached
                } else {
                    OptimizationResult::XtolReached
                }
            }
            Err(_) => {
                budget.spend();
                OptimizationResult::RoundoffLimited
            }
        };
        for i in 0..x.len() {
            x[i] = x[i].clamp(self.lower[i], self.upper[i]);
        }
        result
    }

    /// Controlled random search shared by the population-based global tags.
    /// Constraints are folded in as a quadratic penalty; the result is the
    /// best sampled point, to be polished by a local algorithm.
    fn run_random_search<P: Problem>(
        &mut self,
        problem: &mut P,
        x: &mut [FloatType],
        budget: &mut Budget,
    ) -> Result<OptimizationResult, OptimizationError> {
        let dim = self.dim;
        for i in 0..dim {
            if !self.lower[i].is_finite() || !self.upper[i].is_finite() {
                return Err(OptimizationError::InvalidArgs(
                    "global algorithms require finite bounds".into(),
                ));
            }
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let np = if self.population > 0 {
            self.population
        } else {
            10 * (dim + 1)
        };
        let kind = self.constraint;
        let tol = self.constraint_tol;
        let mut score = |problem: &mut P, point: &[FloatType]| -> FloatType {
            let f = evaluate_objective(problem, point, None);
            let c = constraint_value(problem, kind, point);
            let violation = match kind {
                ConstraintKind::Equality => c.abs(),
                ConstraintKind::Inequality => c.max(0.0),
                ConstraintKind::None => 0.0,
            };
            if violation > tol {
                f - 1e3 * violation * violation
            } else {
                f
            }
        };

        let mut population: Vec<(Vec<FloatType>, FloatType)> = Vec::with_capacity(np);
        population.push((x.to_vec(), score(problem, x)));
        for _ in 1..np {
            if budget.exhausted() {
                break;
            }
            budget.spend();
            let point: Vec<FloatType> = (0..dim)
                .map(|i| rng.random_range(self.lower[i]..=self.upper[i]))
                .collect();
            let s = score(problem, &point);
            population.push((point, s));
        }

        let mut result = OptimizationResult::Success;
        loop {
            if budget.evals_exhausted() {
                result = OptimizationResult::MaxevalReached;
                break;
            }
            if budget.time_exhausted() {
                result = OptimizationResult::MaxtimeReached;
                break;
            }
            budget.spend();
            // Reflect the worst point over the centroid of a random subset.
            let worst = population
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.1.total_cmp(&b.1.1))
                .map(|(i, _)| i)
                .unwrap();
            let mut centroid = vec![0.0; dim];
            let subset = (dim + 1).min(population.len());
            for _ in 0..subset {
                let pick = rng.random_range(0..population.len());
                for i in 0..dim {
                    centroid[i] += population[pick].0[i] / subset as FloatType;
                }
            }
            let trial: Vec<FloatType> = (0..dim)
                .map(|i| {
                    (2.0 * centroid[i] - population[worst].0[i]).clamp(self.lower[i], self.upper[i])
                })
                .collect();
            let s = score(problem, &trial);
            if s > population[worst].1 {
                population[worst] = (trial, s);
            }
            let best = population
                .iter()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap();
            let spread: FloatType = (0..dim)
                .map(|i| {
                    population
                        .iter()
                        .map(|(p, _)| (p[i] - best.0[i]).abs())
                        .fold(0.0, FloatType::max)
                })
                .fold(0.0, FloatType::max);
            if spread < self.xtol_abs.iter().cloned().fold(FloatType::MAX, FloatType::min) {
                result = OptimizationResult::XtolReached;
                break;
            }
        }
        let best = population
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap();
        x.copy_from_slice(&best.0);
        Ok(result)
    }

    /// Multi-level single-linkage: random starts, each polished by the chained
    /// local algorithm (or the built-in core when none is chained).
    fn run_multistart<P: Problem>(
        &mut self,
        problem: &mut P,
        x: &mut [FloatType],
        budget: &mut Budget,
    ) -> Result<OptimizationResult, OptimizationError> {
        let dim = self.dim;
        for i in 0..dim {
            if !self.lower[i].is_finite() || !self.upper[i].is_finite() {
                return Err(OptimizationError::InvalidArgs(
                    "global algorithms require finite bounds".into(),
                ));
            }
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let starts = if self.population > 0 {
            self.population
        } else {
            4 * (dim + 1)
        };
        let mut best = x.to_vec();
        let mut best_value = FloatType::NEG_INFINITY;
        let mut result = OptimizationResult::Success;
        for start in 0..starts {
            if budget.exhausted() {
                result = if budget.time_exhausted() {
                    OptimizationResult::MaxtimeReached
                } else {
                    OptimizationResult::MaxevalReached
                };
                break;
            }
            let mut point: Vec<FloatType> = if start == 0 {
                x.to_vec()
            } else {
                (0..dim)
                    .map(|i| rng.random_range(self.lower[i]..=self.upper[i]))
                    .collect()
            };
            let res = self.run_constrained(problem, &mut point, budget)?;
            let value = evaluate_objective(problem, &point, None);
            let c = constraint_value(problem, self.constraint, &point);
            let feasible = match self.constraint {
                ConstraintKind::Equality => c.abs() <= self.constraint_tol,
                ConstraintKind::Inequality => c <= self.constraint_tol,
                ConstraintKind::None => true,
            };
            if feasible && value > best_value {
                best_value = value;
                best.copy_from_slice(&point);
                result = res;
            }
        }
        x.copy_from_slice(&best);
        Ok(result)
    }
}

struct Budget {
    evals_left: usize,
    deadline: Option<Instant>,
}

impl Budget {
    fn spend(&mut self) {
        self.evals_left = self.evals_left.saturating_sub(1);
    }

    fn spend_many(&mut self, count: usize) {
        self.evals_left = self.evals_left.saturating_sub(count);
    }

    fn evals_exhausted(&self) -> bool {
        self.evals_left == 0
    }

    fn time_exhausted(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn exhausted(&self) -> bool {
        self.evals_exhausted() || self.time_exhausted()
    }
}

fn evaluate_objective<P: Problem>(
    problem: &mut P,
    x: &[FloatType],
    grad: Option<&mut [FloatType]>,
) -> FloatType {
    problem.max_objective(x, grad)
}

fn constraint_value<P: Problem>(problem: &mut P, kind: ConstraintKind, x: &[FloatType]) -> FloatType {
    match kind {
        ConstraintKind::Equality => problem.equality_constraint(x, None),
        ConstraintKind::Inequality => problem.inequality_constraint(x, None),
        ConstraintKind::None => 0.0,
    }
}

/// Augmented objective for one outer iteration.
struct AugmentedProblem<'a, P: Problem> {
    problem: &'a mut P,
    lambda: FloatType,
    mu: FloatType,
    kind: ConstraintKind,
}

impl<P: Problem> Problem for AugmentedProblem<'_, P> {
    fn max_objective(&mut self, x: &[FloatType], grad: Option<&mut [FloatType]>) -> FloatType {
        match self.kind {
            ConstraintKind::None => self.problem.max_objective(x, grad),
            ConstraintKind::Equality => {
                let n = x.len();
                match grad {
                    Some(grad) => {
                        let mut cgrad = vec![0.0; n];
                        let f = self.problem.max_objective(x, Some(grad));
                        let c = self.problem.equality_constraint(x, Some(&mut cgrad));
                        let factor = self.lambda + self.mu * c;
                        for i in 0..n {
                            grad[i] -= factor * cgrad[i];
                        }
                        f - self.lambda * c - 0.5 * self.mu * c * c
                    }
                    None => {
                        let f = self.problem.max_objective(x, None);
                        let c = self.problem.equality_constraint(x, None);
                        f - self.lambda * c - 0.5 * self.mu * c * c
                    }
                }
            }
            ConstraintKind::Inequality => {
                let n = x.len();
                match grad {
                    Some(grad) => {
                        let mut cgrad = vec![0.0; n];
                        let f = self.problem.max_objective(x, Some(grad));
                        let c = self.problem.inequality_constraint(x, Some(&mut cgrad));
                        let shifted = c + self.lambda / self.mu;
                        if shifted > 0.0 {
                            let factor = self.mu * shifted;
                            for i in 0..n {
                                grad[i] -= factor * cgrad[i];
                            }
                            f - 0.5 * self.mu * shifted * shifted
                        } else {
                            f
                        }
                    }
                    None => {
                        let f = self.problem.max_objective(x, None);
                        let c = self.problem.inequality_constraint(x, None);
                        let shifted = c + self.lambda / self.mu;
                        if shifted > 0.0 {
                            f - 0.5 * self.mu * shifted * shifted
                        } else {
                            f
                        }
                    }
                }
            }
        }
    }
}

const LBFGS_MEMORY: usize = 7;
/// Penalty floor for box violations in the unconstrained subproblems; the
/// iterate is additionally projected onto the box after each subproblem.
const BOUND_PENALTY_FLOOR: FloatType = 1e3;

/// argmin adapter for one unconstrained subproblem: minimizes the negated
/// objective plus exterior quadratic penalties for box violations. Gradients
/// come analytically from the wrapped problem.
struct BoxPenalizedProblem<'a, P: Problem> {
    problem: RefCell<&'a mut P>,
    lower: &'a [FloatType],
    upper: &'a [FloatType],
    penalty: FloatType,
}

impl<P: Problem> CostFunction for BoxPenalizedProblem<'_, P> {
    type Param = Vec<FloatType>;
    type Output = FloatType;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let objective = self.problem.borrow_mut().max_objective(x, None);
        let mut cost = -objective;
        for i in 0..x.len() {
            if x[i] < self.lower[i] {
                let violation = self.lower[i] - x[i];
                cost += self.penalty * violation * violation;
            }
            if x[i] > self.upper[i] {
                let violation = x[i] - self.upper[i];
                cost += self.penalty * violation * violation;
            }
        }
        Ok(cost)
    }
}

impl<P: Problem> Gradient for BoxPenalizedProblem<'_, P> {
    type Param = Vec<FloatType>;
    type Gradient = Vec<FloatType>;

    fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let mut grad = vec![0.0; x.len()];
        self.problem.borrow_mut().max_objective(x, Some(&mut grad));
        for g in grad.iter_mut() {
            *g = -*g;
        }
        for i in 0..x.len() {
            if x[i] < self.lower[i] {
                grad[i] -= 2.0 * self.penalty * (self.lower[i] - x[i]);
            }
            if x[i] > self.upper[i] {
                grad[i] += 2.0 * self.penalty * (x[i] - self.upper[i]);
            }
        }
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// max −Σ (x_i − t_i)² subject to Σ x_i = budget.
    struct Quadratic {
        targets: Vec<FloatType>,
        budget: FloatType,
    }

    impl Problem for Quadratic {
        fn max_objective(&mut self, x: &[FloatType], grad: Option<&mut [FloatType]>) -> FloatType {
            if let Some(grad) = grad {
                for i in 0..x.len() {
                    grad[i] = -2.0 * (x[i] - self.targets[i]);
                }
            }
            -x.iter()
                .zip(&self.targets)
                .map(|(x, t)| (x - t) * (x - t))
                .sum::<FloatType>()
        }

        fn equality_constraint(
            &mut self,
            x: &[FloatType],
            grad: Option<&mut [FloatType]>,
        ) -> FloatType {
            if let Some(grad) = grad {
                grad.fill(1.0);
            }
            x.iter().sum::<FloatType>() - self.budget
        }
    }

    #[test]
    fn unconstrained_maximum_found() {
        let mut problem = Quadratic {
            targets: vec![1.0, -2.0, 0.5],
            budget: 0.0,
        };
        let mut opt = Optimization::new(Algorithm::Lbfgs, 3);
        opt.lower_bounds(vec![-10.0; 3]);
        opt.upper_bounds(vec![10.0; 3]);
        opt.xtol(vec![1e-8; 3]);
        opt.maxeval(10_000);
        let mut x = vec![0.0; 3];
        opt.optimize(&mut problem, &mut x).unwrap();
        assert!(opt.xtol_reached() || opt.roundoff_limited());
        for (xi, ti) in x.iter().zip(&problem.targets) {
            assert!((xi - ti).abs() < 1e-4, "{xi} vs {ti}");
        }
    }

    #[test]
    fn equality_constraint_is_honored() {
        let mut problem = Quadratic {
            targets: vec![1.0, 1.0],
            budget: 1.0,
        };
        let mut opt = Optimization::new(Algorithm::Slsqp, 2);
        opt.lower_bounds(vec![0.0; 2]);
        opt.upper_bounds(vec![2.0; 2]);
        opt.xtol(vec![1e-8; 2]);
        opt.maxeval(50_000);
        opt.add_equality_constraint(1e-6);
        let mut x = vec![0.2, 0.2];
        opt.optimize(&mut problem, &mut x).unwrap();
        let sum: FloatType = x.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "sum {sum}");
        // Symmetric problem: the constrained optimum splits evenly.
        assert!((x[0] - 0.5).abs() < 1e-3);
        assert!((x[1] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn bounds_are_respected() {
        let mut problem = Quadratic {
            targets: vec![5.0],
            budget: 0.0,
        };
        let mut opt = Optimization::new(Algorithm::Slsqp, 1);
        opt.lower_bounds(vec![0.0]);
        opt.upper_bounds(vec![1.0]);
        opt.xtol(vec![1e-9]);
        opt.maxeval(1000);
        let mut x = vec![0.5];
        opt.optimize(&mut problem, &mut x).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn maxeval_is_reported() {
        let mut problem = Quadratic {
            targets: vec![1.0; 4],
            budget: 0.0,
        };
        let mut opt = Optimization::new(Algorithm::Lbfgs, 4);
        opt.lower_bounds(vec![-10.0; 4]);
        opt.upper_bounds(vec![10.0; 4]);
        opt.maxeval(2);
        let mut x = vec![-9.0; 4];
        opt.optimize(&mut problem, &mut x).unwrap();
        assert!(opt.maxeval_reached());
    }

    #[test]
    fn global_then_local_chain() {
        let mut problem = Quadratic {
            targets: vec![0.3, 0.7],
            budget: 1.0,
        };
        let mut outer = Optimization::new(Algorithm::AugmentedLagrangian, 2);
        outer.lower_bounds(vec![0.0; 2]);
        outer.upper_bounds(vec![1.0; 2]);
        outer.xtol(vec![1e-7; 2]);
        outer.maxeval(50_000);
        outer.add_equality_constraint(1e-6);
        let mut inner = Optimization::new(Algorithm::Crs, 2);
        inner.maxeval(500);
        inner.seed(7);
        outer.set_local_algorithm(inner);
        let mut x = vec![0.5, 0.5];
        outer.optimize(&mut problem, &mut x).unwrap();
        assert!((x[0] - 0.3).abs() < 5e-3, "x0 = {}", x[0]);
        assert!((x[1] - 0.7).abs() < 5e-3, "x1 = {}", x[1]);
    }

    #[test]
    fn unknown_tag_rejected_known_tags_roundtrip() {
        assert!(Algorithm::from_tag("nonsense").is_none());
        for tag in [
            "slsqp",
            "mma",
            "ccsaq",
            "lbfgs",
            "tnewton",
            "tnewton_restart",
            "tnewton_precond",
            "tnewton_precond_restart",
            "var1",
            "var2",
            "bobyqa",
            "cobyla",
            "isres",
            "direct",
            "direct_local",
            "crs",
            "esch",
            "mlsl",
            "mlsl_low_discrepancy",
            "stogo",
            "stogo_rand",
            "augmented_lagrangian",
        ] {
            let alg = Algorithm::from_tag(tag).unwrap();
            assert_eq!(alg.tag(), tag);
        }
    }

    #[test]
    fn invalid_bounds_are_fatal() {
        let mut problem = Quadratic {
            targets: vec![0.0],
            budget: 0.0,
        };
        let mut opt = Optimization::new(Algorithm::Slsqp, 1);
        opt.lower_bounds(vec![1.0]);
        opt.upper_bounds(vec![0.0]);
        let mut x = vec![0.5];
        assert!(matches!(
            opt.optimize(&mut problem, &mut x),
            Err(OptimizationError::InvalidArgs(_))
        ));
    }
}
