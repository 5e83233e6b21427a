// This module implements the local-search backend. The search starts from the seed of every
// variable (the domain minimum unless a contributor overrides it) and repeatedly applies the
// move that most reduces total constraint violation. Candidate moves are neighbours at
// exponentially growing distances plus projection moves that solve a violated constraint for
// the moved variable when the constraint is a monomial in it, rounded to both neighbouring
// integers. A projection that breaks a second constraint may be paired with a projection of
// another variable that repairs it. When no move improves, the state is perturbed with a seeded RNG and
// the search restarts, up to the policy's restart budget. Once a feasible point is reached,
// objectives are improved greedily by moves that keep every constraint satisfied. Feasibility
// is always checked with exact rational arithmetic; floats only rank candidate moves. A
// failure is reported as non-convergence, which says nothing about whether a plan exists.

//! Seeded local-search backend.

use std::time::Instant;

use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::constraint::Constraint;
use crate::core::error::{FailureReason, PlanError, PlanResult};
use crate::core::expr::VarId;
use crate::core::model::{BackendKind, Model, VarKind};
use crate::core::policy::SolvePolicy;
use crate::core::ratio::Ratio;
use crate::solver::{objective_costs, objective_values, SolveStats, Solution, SolverBackend};

/// Penalty for a constraint that cannot be evaluated (e.g. division by zero).
const UNDEFINED_PENALTY: f64 = 1.0;
/// Smallest penalty of a violated constraint.
const MIN_PENALTY: f64 = 1e-12;

/// Heuristic search from explicit seeds.
pub struct LocalSearch<'p> {
    policy: &'p SolvePolicy,
}

impl<'p> LocalSearch<'p> {
    pub fn new(policy: &'p SolvePolicy) -> Self {
        Self { policy }
    }
}

impl SolverBackend for LocalSearch<'_> {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn solve(&mut self, model: &Model) -> PlanResult<Solution> {
        if model.backend() != BackendKind::Local {
            return Err(PlanError::Contract {
                device: "local-search backend".into(),
                reason: format!("model {} was built for the {} backend", model.id(), model.backend()),
            });
        }
        let start = Instant::now();
        let mut walk = Walk::new(model, self.policy, start)?;
        let outcome = walk.run();
        let stats = SolveStats {
            steps: walk.iterations,
            restarts: walk.restarts,
            solutions: u32::from(outcome),
            elapsed: start.elapsed(),
        };
        if outcome {
            walk.improve_objectives();
            let objectives = objective_values(model, &walk.values);
            return Ok(Solution::new(model, walk.values, objectives, stats));
        }
        let (residual, culprit) = walk.worst_of_best();
        warn!(
            "local search gave up after {} iterations and {} restarts (residual {residual:.3e})",
            walk.iterations, walk.restarts
        );
        Err(PlanError::NoSolution {
            backend: BackendKind::Local,
            reason: FailureReason::NotConverged {
                iterations: walk.iterations,
                residual,
            },
            culprit,
        })
    }
}

#[derive(Debug)]
struct Move {
    first: (usize, i64),
    second: Option<(usize, i64)>,
    gain: f64,
}

struct Walk<'a> {
    model: &'a Model,
    var_cons: Vec<Vec<usize>>,
    cons_vars: Vec<Vec<usize>>,
    seeds: Vec<i64>,
    values: Vec<i64>,
    best: (f64, Vec<i64>),
    rng: StdRng,
    iterations: u64,
    restarts: u32,
    max_iterations: u64,
    max_restarts: u32,
    deadline: Option<Instant>,
}

fn violation(c: &Constraint, values: &[i64]) -> f64 {
    let lookup = |v: VarId| values.get(v.index()).map(|x| Ratio::from_int(*x));
    if let Some(g) = &c.guard {
        if let Some(sel) = g.selector.eval(&lookup) {
            if sel != Ratio::from_int(g.value) {
                return 0.0;
            }
        }
    }
    match (c.lhs.eval(&lookup), c.rhs.eval(&lookup)) {
        (Some(l), Some(r)) if c.rel.holds(l, r) => 0.0,
        (Some(l), Some(r)) => {
            let (lf, rf) = (l.to_f64(), r.to_f64());
            let scale = lf.abs().max(rf.abs()).max(1.0);
            ((lf - rf).abs() / scale).max(MIN_PENALTY)
        }
        _ => UNDEFINED_PENALTY,
    }
}

impl<'a> Walk<'a> {
    fn new(model: &'a Model, policy: &SolvePolicy, start: Instant) -> PlanResult<Self> {
        let mut seeds = Vec::with_capacity(model.vars().len());
        for decl in model.vars() {
            let seed = match &decl.kind {
                VarKind::Integer { lb, ub } => decl.seed.unwrap_or(*lb).clamp(*lb, *ub),
                VarKind::OneHot(v) => decl.seed.filter(|s| v.contains(s)).unwrap_or(v[0]),
                VarKind::Finite(v) => {
                    return Err(PlanError::DomainTooIrregular {
                        domain: decl.name.clone(),
                        size: v.len(),
                        backend: BackendKind::Local,
                    })
                }
            };
            seeds.push(seed);
        }
        let mut var_cons = vec![Vec::new(); seeds.len()];
        let mut cons_vars = Vec::with_capacity(model.constraints().len());
        for (ci, c) in model.constraints().iter().enumerate() {
            let vars: Vec<usize> = c.vars().iter().map(|v| v.index()).collect();
            for v in &vars {
                var_cons[*v].push(ci);
            }
            cons_vars.push(vars);
        }
        let values = seeds.clone();
        let cost = model
            .constraints()
            .iter()
            .map(|c| violation(c, &values))
            .sum();
        Ok(Self {
            model,
            var_cons,
            cons_vars,
            seeds,
            best: (cost, values.clone()),
            values,
            rng: StdRng::seed_from_u64(policy.seed),
            iterations: 0,
            restarts: 0,
            max_iterations: policy.max_iterations,
            max_restarts: policy.restarts,
            deadline: policy.deadline(start),
        })
    }

    fn kind(&self, v: usize) -> &VarKind {
        &self.model.vars()[v].kind
    }

    fn total(&self) -> f64 {
        self.model
            .constraints()
            .iter()
            .map(|c| violation(c, &self.values))
            .sum()
    }

    /// Violation of the constraints touching `v` if it took `value`.
    fn local_cost(&mut self, v: usize, value: i64) -> f64 {
        let old = self.values[v];
        self.values[v] = value;
        let cost = self.var_cons[v]
            .iter()
            .map(|ci| violation(&self.model.constraints()[*ci], &self.values))
            .sum();
        self.values[v] = old;
        cost
    }

    fn timed_out(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Search for a feasible point. Returns whether one was found.
    fn run(&mut self) -> bool {
        loop {
            let cost = self.total();
            if cost < self.best.0 {
                self.best = (cost, self.values.clone());
            }
            if cost == 0.0 {
                debug!(
                    "local search converged after {} iterations, {} restarts",
                    self.iterations, self.restarts
                );
                return true;
            }
            if self.iterations >= self.max_iterations || self.timed_out() {
                return false;
            }
            self.iterations += 1;

            match self.best_move() {
                Some(m) => {
                    trace!("iteration {}: {m:?}", self.iterations);
                    self.values[m.first.0] = m.first.1;
                    if let Some((u, p)) = m.second {
                        self.values[u] = p;
                    }
                }
                None => {
                    if self.restarts >= self.max_restarts {
                        return false;
                    }
                    self.restarts += 1;
                    debug!("local search stalled at {cost:.3e}; restart {}", self.restarts);
                    self.perturb();
                }
            }
        }
    }

    /// Violation of every constraint touching any of `vars`.
    fn region_cost(&self, vars: &[usize]) -> f64 {
        let mut seen: Vec<usize> = vars
            .iter()
            .flat_map(|v| self.var_cons[*v].iter().copied())
            .collect();
        seen.sort_unstable();
        seen.dedup();
        seen.iter()
            .map(|ci| violation(&self.model.constraints()[*ci], &self.values))
            .sum()
    }

    /// Best strictly improving move. A projection that breaks another
    /// constraint is paired with a projection repairing it.
    fn best_move(&mut self) -> Option<Move> {
        let violated: Vec<usize> = (0..self.cons_vars.len())
            .filter(|ci| violation(&self.model.constraints()[*ci], &self.values) > 0.0)
            .collect();
        let mut movable: Vec<usize> = violated
            .iter()
            .flat_map(|ci| self.cons_vars[*ci].iter().copied())
            .collect();
        movable.sort_unstable();
        movable.dedup();

        let mut best: Option<Move> = None;
        let mut consider = |m: Move| {
            if m.gain > 0.0 && best.as_ref().is_none_or(|b| m.gain > b.gain) {
                best = Some(m);
            }
        };
        for v in movable {
            let current = self.local_cost(v, self.values[v]);
            let mut projected = Vec::new();
            for ci in &violated {
                if self.cons_vars[*ci].contains(&v) {
                    projected.extend(self.projections(*ci, v));
                }
            }
            let mut candidates = self.neighbours(v);
            candidates.extend(projected.iter().copied());
            candidates.sort_unstable();
            candidates.dedup();
            for cand in candidates {
                if cand == self.values[v] || !self.kind(v).contains(cand) {
                    continue;
                }
                let gain = current - self.local_cost(v, cand);
                consider(Move {
                    first: (v, cand),
                    second: None,
                    gain,
                });
                if gain <= 0.0 && projected.contains(&cand) {
                    for m in self.repairs(v, cand) {
                        consider(m);
                    }
                }
            }
        }
        best
    }

    /// Pairs `(v = cand, u = p)` where `p` re-satisfies a constraint broken by `v`.
    fn repairs(&mut self, v: usize, cand: i64) -> Vec<Move> {
        let old = self.values[v];
        let mut out = Vec::new();
        let partners: Vec<usize> = self.var_cons[v]
            .iter()
            .flat_map(|ci| self.cons_vars[*ci].iter().copied())
            .filter(|u| *u != v)
            .collect();
        let mut partners = partners;
        partners.sort_unstable();
        partners.dedup();
        for u in partners {
            let before = self.region_cost(&[v, u]);
            self.values[v] = cand;
            let broken: Vec<usize> = self.var_cons[v]
                .iter()
                .copied()
                .filter(|ci| {
                    self.cons_vars[*ci].contains(&u)
                        && violation(&self.model.constraints()[*ci], &self.values) > 0.0
                })
                .collect();
            let held = self.values[u];
            for ci in broken {
                for p in self.projections(ci, u) {
                    if p == held || !self.kind(u).contains(p) {
                        continue;
                    }
                    self.values[u] = p;
                    let gain = before - self.region_cost(&[v, u]);
                    self.values[u] = held;
                    out.push(Move {
                        first: (v, cand),
                        second: Some((u, p)),
                        gain,
                    });
                }
            }
            self.values[v] = old;
        }
        out
    }

    fn neighbours(&self, v: usize) -> Vec<i64> {
        let x = self.values[v];
        match self.kind(v) {
            VarKind::Integer { lb, ub } => {
                let mut out = vec![*lb, *ub];
                let mut step: i64 = 1;
                while step <= ub - lb {
                    out.push((x - step).max(*lb));
                    out.push((x + step).min(*ub));
                    step = step.saturating_mul(2);
                }
                out
            }
            VarKind::OneHot(values) | VarKind::Finite(values) => values.clone(),
        }
    }

    /// Integers near the value of `v` that would satisfy constraint `ci` with
    /// every other variable held.
    fn projections(&self, ci: usize, v: usize) -> Vec<i64> {
        let c = &self.model.constraints()[ci];
        let id = VarId::new(self.model.id(), v);
        let Some(e) = c.lhs.exponent_of(id).zip(c.rhs.exponent_of(id)).map(|(a, b)| a - b) else {
            return Vec::new();
        };
        let x0 = self.values[v];
        if e == 0 || x0 == 0 {
            return Vec::new();
        }
        let lookup = |u: VarId| self.values.get(u.index()).map(|x| Ratio::from_int(*x));
        let (Some(l), Some(r)) = (c.lhs.eval(&lookup), c.rhs.eval(&lookup)) else {
            return Vec::new();
        };
        let q = l.to_f64() / r.to_f64();
        if !(q.is_finite() && q > 0.0) {
            return Vec::new();
        }
        let target = x0 as f64 * q.powf(-1.0 / e as f64);
        if !target.is_finite() {
            return Vec::new();
        }
        let snap = |t: f64| -> i64 {
            match self.kind(v) {
                VarKind::Integer { lb, ub } => (t as i64).clamp(*lb, *ub),
                VarKind::OneHot(vals) | VarKind::Finite(vals) => *vals
                    .iter()
                    .min_by_key(|x| ((**x as f64) - t).abs() as i64)
                    .unwrap_or(&x0),
            }
        };
        vec![snap(target.floor()), snap(target.ceil()), snap(target.round())]
    }

    fn perturb(&mut self) {
        for v in 0..self.values.len() {
            if self.rng.random_bool(0.5) {
                self.values[v] = self.seeds[v];
                continue;
            }
            self.values[v] = match &self.model.vars()[v].kind {
                VarKind::Integer { lb, ub } => self.rng.random_range(*lb..=*ub),
                VarKind::OneHot(vals) | VarKind::Finite(vals) => {
                    vals[self.rng.random_range(0..vals.len())]
                }
            };
        }
    }

    /// Steepest objective descent that never leaves the feasible region.
    fn improve_objectives(&mut self) {
        if self.model.objectives().is_empty() {
            return;
        }
        let Some(mut costs) = objective_costs(self.model, &self.values) else {
            return;
        };
        let mut improved = true;
        while improved && self.iterations < self.max_iterations && !self.timed_out() {
            improved = false;
            self.iterations += 1;
            for v in 0..self.values.len() {
                let old = self.values[v];
                let mut step: Option<(i64, Vec<Ratio>)> = None;
                for cand in self.neighbours(v) {
                    if cand == old || self.local_cost(v, cand) > 0.0 {
                        continue;
                    }
                    self.values[v] = cand;
                    if let Some(new) = objective_costs(self.model, &self.values) {
                        let better = match &step {
                            Some((_, b)) => new < *b,
                            None => new < costs,
                        };
                        if better {
                            step = Some((cand, new));
                        }
                    }
                    self.values[v] = old;
                }
                if let Some((cand, new)) = step {
                    trace!("objective step: {} {old} -> {cand}", self.model.vars()[v].name);
                    self.values[v] = cand;
                    costs = new;
                    improved = true;
                }
            }
        }
        debug!("local search objectives {costs:?}");
    }

    /// Residual and worst constraint of the best point visited.
    fn worst_of_best(&self) -> (f64, Option<String>) {
        let (cost, values) = &self.best;
        let worst = self
            .model
            .constraints()
            .iter()
            .map(|c| (violation(c, values), c))
            .filter(|(p, _)| *p > 0.0)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, c)| c.describe());
        (*cost, worst)
    }
}
