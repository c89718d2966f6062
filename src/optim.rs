//! Thin wrappers around the `argmin` solvers used by the mixed-model fit.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
// `Vec<f64>` math backend for the solvers.
use argmin_math as _;

use crate::error::FitError;

/// Objective to minimise.
pub trait ObjectiveFunction: Send + Sync {
    /// Value at `params`.
    fn eval(&self, params: &[f64]) -> Result<f64, FitError>;

    /// Gradient at `params`; central differences unless overridden.
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>, FitError> {
        let mut shifted = params.to_vec();
        params
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let eps = 1e-6 * x.abs().max(1.0);
                set(&mut shifted, i, x + eps);
                let f_plus = self.eval(&shifted)?;
                set(&mut shifted, i, x - eps);
                let f_minus = self.eval(&shifted)?;
                set(&mut shifted, i, x);
                Ok((f_plus - f_minus) / (2.0 * eps))
            })
            .collect()
    }
}

fn set(v: &mut [f64], i: usize, x: f64) {
    if let Some(slot) = v.get_mut(i) {
        *slot = x;
    }
}

/// Outcome of a minimisation.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best parameters found.
    pub parameters: Vec<f64>,
    /// Objective at `parameters`.
    pub fval: f64,
    /// Solver iterations.
    pub n_iter: u64,
    /// Objective evaluations.
    pub n_fev: usize,
    /// Gradient evaluations.
    pub n_gev: usize,
    /// Whether the solver met its own stopping criterion.
    pub converged: bool,
    /// Termination status as reported by the solver.
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

struct Problem<'a> {
    objective: &'a dyn ObjectiveFunction,
    counts: Arc<FuncCounts>,
}

impl CostFunction for Problem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        self.objective
            .eval(params)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for Problem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        self.objective
            .gradient(params)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

fn optimizer_error(e: impl fmt::Display) -> FitError {
    FitError::Optimizer(e.to_string())
}

fn solver_converged(status: &TerminationStatus) -> bool {
    matches!(
        status,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
            | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
    )
}

/// L-BFGS with a More–Thuente line search.
#[derive(Debug, Clone)]
pub struct Lbfgs {
    /// Iteration budget.
    pub max_iter: u64,
    /// Gradient-norm tolerance.
    pub tol: f64,
    /// Stored correction pairs.
    pub m: usize,
}

impl Default for Lbfgs {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-6,
            m: 10,
        }
    }
}

impl Lbfgs {
    /// Minimise `objective` from `init`.
    pub fn minimize(&self, objective: &dyn ObjectiveFunction, init: &[f64]) -> Result<OptimizationResult, FitError> {
        let counts = Arc::new(FuncCounts::default());
        let problem = Problem {
            objective,
            counts: Arc::clone(&counts),
        };

        let tol_cost = if self.tol == 0.0 { 0.0 } else { (0.1 * self.tol).max(1e-12) };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.m)
            .with_tolerance_grad(self.tol)
            .and_then(|s| s.with_tolerance_cost(tol_cost))
            .map_err(optimizer_error)?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init.to_vec()).max_iters(self.max_iter))
            .run()
            .map_err(optimizer_error)?;

        let state = res.state();
        let parameters = state
            .get_best_param()
            .cloned()
            .ok_or_else(|| FitError::Optimizer("no best parameters found".into()))?;
        let status = state.get_termination_status();

        Ok(OptimizationResult {
            parameters,
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: counts.grad.load(Ordering::Relaxed),
            converged: solver_converged(status),
            message: status.to_string(),
        })
    }
}

/// Derivative-free Nelder–Mead simplex search.
#[derive(Debug, Clone)]
pub struct NelderMeadSearch {
    /// Iteration budget.
    pub max_iter: u64,
    /// Standard deviation of simplex values at which to stop.
    pub sd_tolerance: f64,
    /// Offset of the initial simplex vertices from the start point.
    pub step: f64,
}

impl Default for NelderMeadSearch {
    fn default() -> Self {
        Self {
            max_iter: 200_000,
            sd_tolerance: 1e-10,
            step: 0.25,
        }
    }
}

impl NelderMeadSearch {
    /// Minimise `objective` from `init`.
    pub fn minimize(&self, objective: &dyn ObjectiveFunction, init: &[f64]) -> Result<OptimizationResult, FitError> {
        let simplex: Vec<Vec<f64>> = std::iter::once(init.to_vec())
            .chain(init.iter().enumerate().map(|(i, &x)| {
                let mut vertex = init.to_vec();
                set(&mut vertex, i, x + self.step * x.abs().max(1.0));
                vertex
            }))
            .collect();

        let counts = Arc::new(FuncCounts::default());
        let problem = Problem {
            objective,
            counts: Arc::clone(&counts),
        };
        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(self.sd_tolerance)
            .map_err(optimizer_error)?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.max_iters(self.max_iter))
            .run()
            .map_err(optimizer_error)?;

        let state = res.state();
        let parameters = state
            .get_best_param()
            .cloned()
            .ok_or_else(|| FitError::Optimizer("no best parameters found".into()))?;
        let status = state.get_termination_status();

        Ok(OptimizationResult {
            parameters,
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: 0,
            converged: solver_converged(status),
            message: status.to_string(),
        })
    }
}
