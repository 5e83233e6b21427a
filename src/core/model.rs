// This module provides Model, the aggregate that one solve attempt is built into. A model is
// created for a fixed backend and owns every variable, constraint and objective contributed
// while composing a system; it is discarded after the solve and a fresh one is built for the
// next attempt. Each model draws a process-unique id from an atomic counter and stamps it into
// every VarId it hands out, so expressions and constraints from another model are rejected as
// soon as they are registered. Variables are only created through the domain encoder, which
// picks the primitive (integer range, finite set or one-hot selection) the backend supports;
// the model itself never inspects which backend it serves beyond recording it.

//! Constraint models.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::core::constraint::Constraint;
use crate::core::domain::Domain;
use crate::core::encoder;
use crate::core::error::{PlanError, PlanResult};
use crate::core::expr::{Expr, ModelId, VarId};
use crate::core::policy::SolvePolicy;
use crate::solver::{self, Solution};

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// Solver backend a model is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Seeded local search; heuristic.
    Local,
    /// Exhaustive finite-domain search with propagation.
    Finite,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local-search"),
            BackendKind::Finite => write!(f, "finite-domain"),
        }
    }
}

/// Solver primitive backing a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarKind {
    /// Every integer in `lb..=ub`.
    Integer { lb: i64, ub: i64 },
    /// Arbitrary sorted finite set.
    Finite(Vec<i64>),
    /// Selection of exactly one literal value.
    OneHot(Vec<i64>),
}

impl VarKind {
    pub fn contains(&self, value: i64) -> bool {
        match self {
            VarKind::Integer { lb, ub } => value >= *lb && value <= *ub,
            VarKind::Finite(v) | VarKind::OneHot(v) => v.binary_search(&value).is_ok(),
        }
    }

    pub fn min(&self) -> i64 {
        match self {
            VarKind::Integer { lb, .. } => *lb,
            VarKind::Finite(v) | VarKind::OneHot(v) => v[0],
        }
    }

    pub fn max(&self) -> i64 {
        match self {
            VarKind::Integer { ub, .. } => *ub,
            VarKind::Finite(v) | VarKind::OneHot(v) => v[v.len() - 1],
        }
    }
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub kind: VarKind,
    /// Starting value for local search.
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sense {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone)]
pub struct Objective {
    pub expr: Expr,
    pub sense: Sense,
    pub owner: String,
}

/// How several objectives combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveMode {
    /// At most one objective.
    Single,
    /// Objectives in registration order, earlier ones dominating.
    Lexicographic,
}

/// Variables, constraints and objectives of one solve attempt.
pub struct Model {
    id: ModelId,
    backend: BackendKind,
    vars: Vec<VarDecl>,
    names: HashMap<String, VarId>,
    constraints: Vec<Constraint>,
    objectives: Vec<Objective>,
    mode: ObjectiveMode,
}

impl Model {
    pub fn new(backend: BackendKind) -> Self {
        let id = NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed);
        debug!("model {id}: new {backend} model");
        Self {
            id,
            backend,
            vars: Vec::new(),
            names: HashMap::new(),
            constraints: Vec::new(),
            objectives: Vec::new(),
            mode: ObjectiveMode::Single,
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn vars(&self) -> &[VarDecl] {
        &self.vars
    }

    pub fn var(&self, id: VarId) -> PlanResult<&VarDecl> {
        self.check_var(id)?;
        Ok(&self.vars[id.index()])
    }

    /// Look a variable up by its (possibly suffixed) name.
    pub fn var_named(&self, name: &str) -> Option<VarId> {
        self.names.get(name).copied()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    pub fn objective_mode(&self) -> ObjectiveMode {
        self.mode
    }

    pub fn set_objective_mode(&mut self, mode: ObjectiveMode) {
        self.mode = mode;
    }

    /// Encode `domain` as the cheapest primitive for this model's backend.
    pub fn new_variable(&mut self, domain: &Domain) -> PlanResult<Expr> {
        encoder::encode(self, domain, None)
    }

    /// As [`Model::new_variable`] with an explicit local-search seed.
    pub fn new_variable_seeded(&mut self, domain: &Domain, seed: i64) -> PlanResult<Expr> {
        encoder::encode(self, domain, Some(seed))
    }

    pub(crate) fn declare(&mut self, name: &str, kind: VarKind, seed: Option<i64>) -> VarId {
        let id = VarId::new(self.id, self.vars.len());
        let mut unique = name.to_string();
        let mut n = 1;
        while self.names.contains_key(&unique) {
            n += 1;
            unique = format!("{name}#{n}");
        }
        trace!("model {}: declare {unique} as {kind:?}", self.id);
        self.names.insert(unique.clone(), id);
        self.vars.push(VarDecl {
            name: unique,
            kind,
            seed,
        });
        id
    }

    /// Register constraints raised by `owner`. Returns the index of the first one.
    pub fn equation(
        &mut self,
        owner: &str,
        constraints: impl IntoIterator<Item = Constraint>,
    ) -> PlanResult<usize> {
        let first = self.constraints.len();
        for mut c in constraints {
            c.owner = owner.to_string();
            c.check_model(self.id)?;
            for v in c.vars() {
                self.check_var(v)?;
            }
            trace!("model {}: {owner}: {c}", self.id);
            self.constraints.push(c);
        }
        Ok(first)
    }

    pub fn objective(&mut self, owner: &str, expr: Expr, sense: Sense) -> PlanResult<()> {
        expr.check_model(self.id)?;
        debug!("model {}: {owner} objective {sense:?} {expr}", self.id);
        self.objectives.push(Objective {
            expr,
            sense,
            owner: owner.to_string(),
        });
        Ok(())
    }

    /// Solve with the backend fixed at construction.
    pub fn solve(&self, policy: &SolvePolicy) -> PlanResult<Solution> {
        solver::solve(self, policy)
    }

    pub fn var_name(&self, id: VarId) -> &str {
        self.vars
            .get(id.index())
            .map(|v| v.name.as_str())
            .unwrap_or("?")
    }

    fn check_var(&self, id: VarId) -> PlanResult<()> {
        if id.model() != self.id {
            return Err(PlanError::ModelMismatch {
                expected: self.id,
                found: id.model(),
            });
        }
        if id.index() >= self.vars.len() {
            return Err(PlanError::Contract {
                device: "model".into(),
                reason: format!("unknown variable index {}", id.index()),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("vars", &self.vars.len())
            .field("constraints", &self.constraints.len())
            .field("objectives", &self.objectives.len())
            .field("mode", &self.mode)
            .finish()
    }
}
