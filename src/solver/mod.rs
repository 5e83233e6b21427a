// This module is the solver abstraction layer. SolverBackend is the seam between a Model and
// the search procedure that solves it; the two implementations differ in almost every respect
// (a seeded local search that can only report "no evidence found" versus an exhaustive
// finite-domain search whose failure is a proof), but both consume the same Model and return
// the same immutable Solution. solve() is the single dispatch point on the model's backend.
// Solutions are stamped with the id of the model they came from and refuse to evaluate
// expressions from any other model.

//! Solver abstraction layer.

pub mod finite;
pub mod interval;
pub mod local;

use std::time::Duration;

use log::info;

use crate::core::error::{PlanError, PlanResult};
use crate::core::expr::{Expr, ModelId, VarId};
use crate::core::model::{BackendKind, Model, ObjectiveMode, Sense};
use crate::core::policy::SolvePolicy;
use crate::core::ratio::Ratio;

pub use finite::FiniteSearch;
pub use local::LocalSearch;

/// A search procedure that can solve a [`Model`].
pub trait SolverBackend {
    fn kind(&self) -> BackendKind;

    /// Solve `model` or report why no solution was produced.
    fn solve(&mut self, model: &Model) -> PlanResult<Solution>;
}

/// Counters reported by a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveStats {
    /// Search nodes (finite) or moves (local).
    pub steps: u64,
    pub restarts: u32,
    /// Improving solutions found.
    pub solutions: u32,
    pub elapsed: Duration,
}

/// Values chosen for every variable of one model.
#[derive(Debug, Clone)]
pub struct Solution {
    model: ModelId,
    backend: BackendKind,
    values: Vec<i64>,
    objectives: Vec<Ratio>,
    stats: SolveStats,
}

impl Solution {
    pub(crate) fn new(
        model: &Model,
        values: Vec<i64>,
        objectives: Vec<Ratio>,
        stats: SolveStats,
    ) -> Self {
        Self {
            model: model.id(),
            backend: model.backend(),
            values,
            objectives,
            stats,
        }
    }

    pub fn model_id(&self) -> ModelId {
        self.model
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn stats(&self) -> &SolveStats {
        &self.stats
    }

    /// Objective values in registration order.
    pub fn objective_values(&self) -> &[Ratio] {
        &self.objectives
    }

    pub fn value(&self, var: VarId) -> PlanResult<i64> {
        if var.model() != self.model {
            return Err(PlanError::ModelMismatch {
                expected: self.model,
                found: var.model(),
            });
        }
        self.values
            .get(var.index())
            .copied()
            .ok_or_else(|| PlanError::Contract {
                device: "solution".into(),
                reason: format!("unknown variable index {}", var.index()),
            })
    }

    /// Exact value of `expr` under this solution.
    pub fn extract(&self, expr: &Expr) -> PlanResult<Ratio> {
        expr.check_model(self.model)?;
        expr.eval(&|v| self.values.get(v.index()).map(|x| Ratio::from_int(*x)))
            .ok_or_else(|| PlanError::overflow(format!("value of {expr}")))
    }

    /// As [`Solution::extract`], requiring an integral result.
    pub fn extract_int(&self, expr: &Expr) -> PlanResult<i64> {
        let v = self.extract(expr)?;
        v.to_integer().ok_or_else(|| PlanError::NonInteger {
            quantity: expr.to_string(),
            value: v.to_string(),
        })
    }
}

/// Free-function form of [`Solution::extract`].
pub fn extract(solution: &Solution, expr: &Expr) -> PlanResult<Ratio> {
    solution.extract(expr)
}

/// Backend implementation for `kind`.
pub fn backend_for(kind: BackendKind, policy: &SolvePolicy) -> Box<dyn SolverBackend + '_> {
    match kind {
        BackendKind::Local => Box::new(LocalSearch::new(policy)),
        BackendKind::Finite => Box::new(FiniteSearch::new(policy)),
    }
}

/// Solve `model` with the backend it was built for.
pub fn solve(model: &Model, policy: &SolvePolicy) -> PlanResult<Solution> {
    if model.objective_mode() == ObjectiveMode::Single && model.objectives().len() > 1 {
        return Err(PlanError::Contract {
            device: "model".into(),
            reason: format!(
                "{} objectives registered in single-objective mode",
                model.objectives().len()
            ),
        });
    }
    info!(
        "solving model {} with {} backend: {} vars, {} constraints, {} objectives",
        model.id(),
        model.backend(),
        model.vars().len(),
        model.constraints().len(),
        model.objectives().len()
    );
    let mut backend = backend_for(model.backend(), policy);
    let solution = backend.solve(model)?;
    info!(
        "model {} solved in {:?} ({} steps, {} restarts)",
        model.id(),
        solution.stats.elapsed,
        solution.stats.steps,
        solution.stats.restarts
    );
    Ok(solution)
}

/// Objective values as a minimisation vector (maximised terms negated).
pub(crate) fn objective_costs(model: &Model, values: &[i64]) -> Option<Vec<Ratio>> {
    model
        .objectives()
        .iter()
        .map(|o| {
            let v = o
                .expr
                .eval(&|id| values.get(id.index()).map(|x| Ratio::from_int(*x)))?;
            Some(match o.sense {
                Sense::Minimize => v,
                Sense::Maximize => Ratio::ZERO.checked_sub(&v)?,
            })
        })
        .collect()
}

/// Raw objective values, in registration order.
pub(crate) fn objective_values(model: &Model, values: &[i64]) -> Vec<Ratio> {
    model
        .objectives()
        .iter()
        .filter_map(|o| {
            o.expr
                .eval(&|id| values.get(id.index()).map(|x| Ratio::from_int(*x)))
        })
        .collect()
}
