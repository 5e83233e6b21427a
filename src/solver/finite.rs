// This module implements the finite-domain backend: an exhaustive depth-first search over the
// explicit value sets of every variable, so a failure here is a proof that no plan exists
// under the given domains. Each node runs constraint propagation to a fixed point before
// branching. Propagation checks each active constraint against the interval bounds of its
// variables, tightens the bounds of every variable that appears as a pure power in the
// constraint (clock relations are products and quotients of dividers, so this is the common
// case), and filters the domain of the last open variable exactly. Guarded constraints whose
// selector is still open prune the selector value instead of failing. Variables that only
// occur in disabled constraints are not branched on. Objectives are handled by branch and
// bound in single or lexicographic mode, and the search stops early at the policy's node and
// time limits, returning the best solution found so far.

//! Finite-domain search backend.

use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

use log::{debug, trace, warn};

use crate::core::constraint::Relation;
use crate::core::error::{FailureReason, PlanError, PlanResult};
use crate::core::expr::{Expr, VarId};
use crate::core::model::{BackendKind, Model, Sense, VarKind};
use crate::core::policy::SolvePolicy;
use crate::core::ratio::Ratio;
use crate::solver::interval::{may_hold, Interval};
use crate::solver::{objective_costs, objective_values, SolveStats, Solution, SolverBackend};

/// Domains larger than this are bisected instead of enumerated.
const SPLIT_THRESHOLD: usize = 16;
/// Largest domain filtered value by value when it is the last open variable.
const FILTER_LIMIT: usize = 256;
/// Revisions per propagation call before giving up on the fixed point.
const REVISION_LIMIT: usize = 200_000;
/// Integer domains larger than this cannot be enumerated.
const MAX_EXPANDED: i64 = 1 << 20;

/// Window `values[lo..hi]` into a shared sorted value list.
#[derive(Debug, Clone)]
struct Dom {
    values: Rc<[i64]>,
    lo: usize,
    hi: usize,
}

impl Dom {
    fn new(values: Vec<i64>) -> Self {
        let hi = values.len();
        Self {
            values: values.into(),
            lo: 0,
            hi,
        }
    }

    fn active(&self) -> &[i64] {
        &self.values[self.lo..self.hi]
    }

    fn len(&self) -> usize {
        self.hi - self.lo
    }

    fn is_empty(&self) -> bool {
        self.hi <= self.lo
    }

    fn is_fixed(&self) -> bool {
        self.len() == 1
    }

    fn min(&self) -> i64 {
        self.values[self.lo]
    }

    fn max(&self) -> i64 {
        self.values[self.hi - 1]
    }

    fn contains(&self, v: i64) -> bool {
        self.active().binary_search(&v).is_ok()
    }

    /// Keep values within `[min, max]`. Returns whether anything was removed.
    fn clamp(&mut self, min: Option<i128>, max: Option<i128>) -> bool {
        let (old_lo, old_hi) = (self.lo, self.hi);
        if let Some(min) = min {
            self.lo += self.active().partition_point(|x| (*x as i128) < min);
        }
        if let Some(max) = max {
            if self.lo < self.hi {
                self.hi = self.lo + self.active().partition_point(|x| (*x as i128) <= max);
            }
        }
        (self.lo, self.hi) != (old_lo, old_hi)
    }

    fn retain(&mut self, keep: impl Fn(i64) -> bool) -> bool {
        let kept: Vec<i64> = self.active().iter().copied().filter(|v| keep(*v)).collect();
        if kept.len() == self.len() {
            return false;
        }
        *self = Dom::new(kept);
        true
    }

    fn split(&self) -> (Dom, Dom) {
        let mid = self.lo + self.len() / 2;
        let mut low = self.clone();
        low.hi = mid;
        let mut high = self.clone();
        high.lo = mid;
        (low, high)
    }

    fn fixed_to(&self, v: i64) -> Dom {
        Dom::new(vec![v])
    }
}

/// Activation of a guarded constraint under the current domains.
enum GuardState {
    Active,
    Inactive,
    Open { selector: usize, value: i64 },
}

enum Selector {
    Const(Ratio),
    Var(usize),
}

/// Per-constraint data precomputed once per solve.
struct ConsInfo {
    /// Variables of both sides.
    vars: Vec<usize>,
    /// Power of each variable in `lhs / rhs`, when the constraint is a monomial in it.
    exps: Vec<Option<i32>>,
    guard: Option<(Selector, i64)>,
}

/// Exhaustive search over finite domains.
pub struct FiniteSearch<'p> {
    policy: &'p SolvePolicy,
}

impl<'p> FiniteSearch<'p> {
    pub fn new(policy: &'p SolvePolicy) -> Self {
        Self { policy }
    }
}

impl SolverBackend for FiniteSearch<'_> {
    fn kind(&self) -> BackendKind {
        BackendKind::Finite
    }

    fn solve(&mut self, model: &Model) -> PlanResult<Solution> {
        if model.backend() != BackendKind::Finite {
            return Err(PlanError::Contract {
                device: "finite-domain backend".into(),
                reason: format!("model {} was built for the {} backend", model.id(), model.backend()),
            });
        }
        let start = Instant::now();
        let mut search = Search::new(model, self.policy, start)?;
        let root = search.initial_domains()?;
        let all: Vec<usize> = (0..model.constraints().len()).collect();
        search.dfs(root, &all);

        let stats = SolveStats {
            steps: search.nodes,
            restarts: 0,
            solutions: search.solutions,
            elapsed: start.elapsed(),
        };
        match search.best.take() {
            Some((values, _)) => {
                if search.limit_hit {
                    warn!(
                        "finite-domain search stopped at {} nodes; returning best of {} solutions",
                        search.nodes, search.solutions
                    );
                }
                let objectives = objective_values(model, &values);
                Ok(Solution::new(model, values, objectives, stats))
            }
            None => {
                let reason = if search.limit_hit {
                    FailureReason::LimitReached {
                        nodes: search.nodes,
                    }
                } else {
                    FailureReason::Exhausted {
                        nodes: search.nodes,
                    }
                };
                debug!("finite-domain search failed: {reason}");
                Err(PlanError::NoSolution {
                    backend: BackendKind::Finite,
                    reason,
                    culprit: search.culprit(),
                })
            }
        }
    }
}

struct Search<'a> {
    model: &'a Model,
    info: Vec<ConsInfo>,
    watchers: Vec<Vec<usize>>,
    in_objective: Vec<bool>,
    prefer_high: Vec<bool>,
    fail_counts: Vec<u64>,
    best: Option<(Vec<i64>, Vec<Ratio>)>,
    solutions: u32,
    nodes: u64,
    max_nodes: u64,
    deadline: Option<Instant>,
    optimize: bool,
    limit_hit: bool,
    finished: bool,
}

impl<'a> Search<'a> {
    fn new(model: &'a Model, policy: &SolvePolicy, start: Instant) -> PlanResult<Self> {
        let nvars = model.vars().len();
        let mut info = Vec::with_capacity(model.constraints().len());
        let mut watchers = vec![Vec::new(); nvars];
        for (ci, c) in model.constraints().iter().enumerate() {
            let mut vars = Vec::new();
            c.lhs.collect_vars(&mut vars);
            c.rhs.collect_vars(&mut vars);
            let exps = vars
                .iter()
                .map(|v| Some(c.lhs.exponent_of(*v)? - c.rhs.exponent_of(*v)?))
                .collect();
            let guard = match &c.guard {
                None => None,
                Some(g) => match &g.selector {
                    Expr::Const(v) => Some((Selector::Const(*v), g.value)),
                    Expr::Var(v) => Some((Selector::Var(v.index()), g.value)),
                    other => {
                        return Err(PlanError::Contract {
                            device: c.owner.clone(),
                            reason: format!("guard selector {other} is not a variable"),
                        })
                    }
                },
            };
            let mut watched: Vec<usize> = vars.iter().map(|v| v.index()).collect();
            if let Some((Selector::Var(s), _)) = &guard {
                if !watched.contains(s) {
                    watched.push(*s);
                }
            }
            for v in watched {
                watchers[v].push(ci);
            }
            info.push(ConsInfo {
                vars: vars.iter().map(|v| v.index()).collect(),
                exps,
                guard,
            });
        }

        let mut in_objective = vec![false; nvars];
        let mut prefer_high = vec![false; nvars];
        for o in model.objectives().iter().rev() {
            for v in o.expr.vars() {
                in_objective[v.index()] = true;
                if let Some(e) = o.expr.exponent_of(v) {
                    // Walk toward the better objective value first.
                    let grows = e > 0;
                    prefer_high[v.index()] = match o.sense {
                        Sense::Minimize => !grows,
                        Sense::Maximize => grows,
                    };
                }
            }
        }

        Ok(Self {
            model,
            info,
            watchers,
            in_objective,
            prefer_high,
            fail_counts: vec![0; model.constraints().len()],
            best: None,
            solutions: 0,
            nodes: 0,
            max_nodes: policy.max_nodes,
            deadline: policy.deadline(start),
            optimize: policy.optimize,
            limit_hit: false,
            finished: false,
        })
    }

    fn initial_domains(&self) -> PlanResult<Vec<Dom>> {
        self.model
            .vars()
            .iter()
            .map(|decl| match &decl.kind {
                VarKind::Finite(v) | VarKind::OneHot(v) => Ok(Dom::new(v.clone())),
                VarKind::Integer { lb, ub } if ub - lb < MAX_EXPANDED => {
                    Ok(Dom::new((*lb..=*ub).collect()))
                }
                VarKind::Integer { lb, ub } => Err(PlanError::DomainTooIrregular {
                    domain: decl.name.clone(),
                    size: usize::try_from(ub - lb + 1).unwrap_or(usize::MAX),
                    backend: BackendKind::Finite,
                }),
            })
            .collect()
    }

    fn culprit(&self) -> Option<String> {
        let (ci, count) = self
            .fail_counts
            .iter()
            .enumerate()
            .max_by_key(|(i, c)| (**c, std::cmp::Reverse(*i)))?;
        if *count == 0 {
            return None;
        }
        Some(self.model.constraints()[ci].describe())
    }

    fn out_of_budget(&mut self) -> bool {
        if self.nodes >= self.max_nodes {
            self.limit_hit = true;
        } else if self.nodes % 256 == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    self.limit_hit = true;
                }
            }
        }
        self.limit_hit
    }

    fn dfs(&mut self, mut doms: Vec<Dom>, seeds: &[usize]) {
        if self.finished || self.out_of_budget() {
            return;
        }
        self.nodes += 1;
        if !self.propagate(&mut doms, seeds) || !self.bound_allows(&doms) {
            return;
        }
        let Some(var) = self.pick_var(&doms) else {
            self.record(&doms);
            return;
        };
        trace!(
            "node {}: branch on {} ({} values)",
            self.nodes,
            self.model.vars()[var].name,
            doms[var].len()
        );

        let high_first = self.prefer_high[var];
        let branches: Vec<Dom> = if doms[var].len() > SPLIT_THRESHOLD {
            let (low, high) = doms[var].split();
            if high_first {
                vec![high, low]
            } else {
                vec![low, high]
            }
        } else {
            let mut vals: Vec<i64> = doms[var].active().to_vec();
            if high_first {
                vals.reverse();
            }
            vals.into_iter().map(|v| doms[var].fixed_to(v)).collect()
        };
        let seeds = self.watchers[var].clone();
        for branch in branches {
            if self.finished || self.limit_hit {
                return;
            }
            let mut child = doms.clone();
            child[var] = branch;
            self.dfs(child, &seeds);
        }
    }

    fn propagate(&mut self, doms: &mut [Dom], seeds: &[usize]) -> bool {
        let mut queue: VecDeque<usize> = seeds.iter().copied().collect();
        let mut queued = vec![false; self.info.len()];
        for ci in seeds {
            queued[*ci] = true;
        }
        let mut revisions = 0;
        let mut changed = Vec::new();
        while let Some(ci) = queue.pop_front() {
            queued[ci] = false;
            revisions += 1;
            if revisions > REVISION_LIMIT {
                break;
            }
            changed.clear();
            if !self.revise(ci, doms, &mut changed) {
                self.fail_counts[ci] += 1;
                return false;
            }
            for v in &changed {
                for cj in &self.watchers[*v] {
                    if !queued[*cj] {
                        queued[*cj] = true;
                        queue.push_back(*cj);
                    }
                }
            }
        }
        true
    }

    fn guard_state(&self, ci: usize, doms: &[Dom]) -> GuardState {
        match &self.info[ci].guard {
            None => GuardState::Active,
            Some((Selector::Const(v), value)) => {
                if *v == Ratio::from_int(*value) {
                    GuardState::Active
                } else {
                    GuardState::Inactive
                }
            }
            Some((Selector::Var(s), value)) => {
                if !doms[*s].contains(*value) {
                    GuardState::Inactive
                } else if doms[*s].is_fixed() {
                    GuardState::Active
                } else {
                    GuardState::Open {
                        selector: *s,
                        value: *value,
                    }
                }
            }
        }
    }

    /// Revise one constraint. Returns false on a wipe-out.
    fn revise(&self, ci: usize, doms: &mut [Dom], changed: &mut Vec<usize>) -> bool {
        match self.guard_state(ci, doms) {
            GuardState::Inactive => true,
            GuardState::Open { selector, value } => {
                if !self.may_be_satisfied(ci, doms) {
                    doms[selector].retain(|x| x != value);
                    changed.push(selector);
                    return !doms[selector].is_empty();
                }
                true
            }
            GuardState::Active => self.enforce(ci, doms, changed),
        }
    }

    fn bounds_of(doms: &[Dom]) -> impl Fn(VarId) -> Option<(i64, i64)> + '_ {
        move |v: VarId| doms.get(v.index()).map(|d| (d.min(), d.max()))
    }

    fn may_be_satisfied(&self, ci: usize, doms: &[Dom]) -> bool {
        let c = &self.model.constraints()[ci];
        let info = &self.info[ci];
        if info.vars.iter().all(|v| doms[*v].is_fixed()) {
            return self.exact(ci, doms, None);
        }
        let bounds = Self::bounds_of(doms);
        match (
            Interval::eval(&c.lhs, &bounds),
            Interval::eval(&c.rhs, &bounds),
        ) {
            (Some(l), Some(r)) => may_hold(c.rel, &l, &r),
            _ => true,
        }
    }

    /// Exact check with every variable fixed, `over` replacing one of them.
    fn exact(&self, ci: usize, doms: &[Dom], over: Option<(usize, i64)>) -> bool {
        let c = &self.model.constraints()[ci];
        let lookup = |v: VarId| {
            let i = v.index();
            match over {
                Some((o, val)) if o == i => Some(Ratio::from_int(val)),
                _ => doms.get(i).map(|d| Ratio::from_int(d.min())),
            }
        };
        match (c.lhs.eval(&lookup), c.rhs.eval(&lookup)) {
            (Some(l), Some(r)) => c.rel.holds(l, r),
            _ => false,
        }
    }

    fn enforce(&self, ci: usize, doms: &mut [Dom], changed: &mut Vec<usize>) -> bool {
        let c = &self.model.constraints()[ci];
        let info = &self.info[ci];

        let open: Vec<usize> = info
            .vars
            .iter()
            .copied()
            .filter(|v| !doms[*v].is_fixed())
            .collect();
        if open.is_empty() {
            return self.exact(ci, doms, None);
        }
        if !self.may_be_satisfied(ci, doms) {
            return false;
        }

        for (k, &v) in info.vars.iter().enumerate() {
            let e = match info.exps[k] {
                Some(e) if e != 0 => e,
                _ => continue,
            };
            if doms[v].is_fixed() || doms[v].min() <= 0 {
                continue;
            }
            let Some((xlo, xhi)) = self.monomial_bounds(c.rel, &c.lhs, &c.rhs, v, e, doms) else {
                continue;
            };
            if doms[v].clamp(xlo, xhi) {
                changed.push(v);
                if doms[v].is_empty() {
                    return false;
                }
            }
        }

        // Exact filtering once a single variable is left open.
        let open: Vec<usize> = open.into_iter().filter(|v| !doms[*v].is_fixed()).collect();
        if let [v] = open[..] {
            if doms[v].len() <= FILTER_LIMIT {
                let snapshot: Vec<Dom> = doms.to_vec();
                if doms[v].retain(|x| self.exact(ci, &snapshot, Some((v, x)))) {
                    changed.push(v);
                }
                return !doms[v].is_empty();
            }
        } else if open.is_empty() {
            return self.exact(ci, doms, None);
        }
        true
    }

    /// Bounds on `var` implied by `lhs REL rhs` when both sides are positive
    /// monomials and `var` appears with net power `e`.
    fn monomial_bounds(
        &self,
        rel: Relation,
        lhs: &Expr,
        rhs: &Expr,
        var: usize,
        e: i32,
        doms: &[Dom],
    ) -> Option<(Option<i128>, Option<i128>)> {
        let bounds = |v: VarId| {
            let i = v.index();
            if i == var {
                Some((1, 1))
            } else {
                doms.get(i).map(|d| (d.min(), d.max()))
            }
        };
        let kl = Interval::eval(lhs, &bounds)?;
        let kr = Interval::eval(rhs, &bounds)?;
        if !kl.is_positive() || !kr.is_positive() {
            return None;
        }
        // lhs/rhs = K * x^e with K in [klo, khi]; the relation becomes K * x^e REL 1.
        let klo = kl.lo.checked_div(&kr.hi)?;
        let khi = kl.hi.checked_div(&kr.lo)?;
        let (ylo, yhi) = match rel {
            Relation::Eq => (khi.recip(), klo.recip()),
            Relation::Le | Relation::Lt => (None, klo.recip()),
            Relation::Ge | Relation::Gt => (khi.recip(), None),
        };
        let n = e.unsigned_abs();
        if e > 0 {
            Some((
                ylo.and_then(|y| root_ceil(y, n)),
                yhi.and_then(|y| root_floor(y, n)),
            ))
        } else {
            Some((
                yhi.and_then(|y| y.recip()).and_then(|y| root_ceil(y, n)),
                ylo.and_then(|y| y.recip()).and_then(|y| root_floor(y, n)),
            ))
        }
    }

    /// Objectives that cannot strictly improve on the incumbent prune the node.
    fn bound_allows(&self, doms: &[Dom]) -> bool {
        let Some((_, best)) = &self.best else {
            return true;
        };
        let bounds = Self::bounds_of(doms);
        for (o, incumbent) in self.model.objectives().iter().zip(best) {
            let Some(iv) = Interval::eval(&o.expr, &bounds) else {
                return true;
            };
            let (lb, ub) = match o.sense {
                Sense::Minimize => (iv.lo, iv.hi),
                Sense::Maximize => match (
                    Ratio::ZERO.checked_sub(&iv.hi),
                    Ratio::ZERO.checked_sub(&iv.lo),
                ) {
                    (Some(a), Some(b)) => (a, b),
                    _ => return true,
                },
            };
            if lb > *incumbent {
                return false;
            }
            if lb < *incumbent || ub != *incumbent {
                return true;
            }
        }
        false
    }

    fn pick_var(&self, doms: &[Dom]) -> Option<usize> {
        let mut relevant = self.in_objective.clone();
        for (ci, info) in self.info.iter().enumerate() {
            match self.guard_state(ci, doms) {
                GuardState::Inactive => {}
                GuardState::Active => info.vars.iter().for_each(|v| relevant[*v] = true),
                GuardState::Open { selector, .. } => {
                    relevant[selector] = true;
                    info.vars.iter().for_each(|v| relevant[*v] = true);
                }
            }
        }
        (0..doms.len())
            .filter(|v| relevant[*v] && !doms[*v].is_fixed())
            .min_by_key(|v| (!self.in_objective[*v], doms[*v].len(), *v))
    }

    fn record(&mut self, doms: &[Dom]) {
        let values: Vec<i64> = doms.iter().map(|d| d.min()).collect();
        let lookup = |v: VarId| values.get(v.index()).map(|x| Ratio::from_int(*x));
        for (ci, c) in self.model.constraints().iter().enumerate() {
            if c.is_satisfied(&lookup) != Some(true) {
                trace!("candidate rejected by {}", c.describe());
                self.fail_counts[ci] += 1;
                return;
            }
        }
        let Some(costs) = objective_costs(self.model, &values) else {
            return;
        };
        let improves = match &self.best {
            None => true,
            Some((_, best)) => costs < *best,
        };
        if improves {
            debug!("solution {} at node {}: objectives {costs:?}", self.solutions + 1, self.nodes);
            self.best = Some((values, costs));
            self.solutions += 1;
        }
        if self.model.objectives().is_empty() || !self.optimize {
            self.finished = true;
        }
    }
}

/// Smallest non-negative integer `x` with `x^n >= y`.
fn root_ceil(y: Ratio, n: u32) -> Option<i128> {
    if y <= Ratio::ZERO {
        return Some(0);
    }
    if n == 1 {
        return Some(y.ceil());
    }
    let approx = y.to_f64().powf(1.0 / n as f64);
    let mut x = (approx.floor() as i128 - 2).max(0);
    if pow_at_least(x, n, &y)? {
        return None;
    }
    for _ in 0..8 {
        x += 1;
        if pow_at_least(x, n, &y)? {
            return Some(x);
        }
    }
    None
}

/// Largest non-negative integer `x` with `x^n <= y`.
fn root_floor(y: Ratio, n: u32) -> Option<i128> {
    if y < Ratio::ZERO {
        return None;
    }
    if n == 1 {
        return Some(y.floor());
    }
    let approx = y.to_f64().powf(1.0 / n as f64);
    let mut x = approx.ceil() as i128 + 2;
    if !pow_above(x, n, &y)? {
        return None;
    }
    for _ in 0..8 {
        x -= 1;
        if !pow_above(x, n, &y)? {
            return Some(x);
        }
    }
    None
}

fn pow_at_least(x: i128, n: u32, y: &Ratio) -> Option<bool> {
    let p = Ratio::new(x.checked_pow(n)?, 1)?;
    Some(p >= *y)
}

fn pow_above(x: i128, n: u32, y: &Ratio) -> Option<bool> {
    let p = Ratio::new(x.checked_pow(n)?, 1)?;
    Some(p > *y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::Domain;
    use crate::core::model::ObjectiveMode;

    fn policy() -> SolvePolicy {
        SolvePolicy::default()
    }

    #[test]
    fn test_roots() {
        assert_eq!(root_ceil(Ratio::new(7, 2).unwrap(), 1), Some(4));
        assert_eq!(root_floor(Ratio::new(7, 2).unwrap(), 1), Some(3));
        assert_eq!(root_ceil(Ratio::from_int(10), 2), Some(4));
        assert_eq!(root_floor(Ratio::from_int(10), 2), Some(3));
        assert_eq!(root_floor(Ratio::from_int(16), 2), Some(4));
        assert_eq!(root_ceil(Ratio::from_int(16), 2), Some(4));
    }

    #[test]
    fn test_divider_equation() {
        let mut m = Model::new(BackendKind::Finite);
        let n = m.new_variable(&Domain::range("n", 8, 200, 1).unwrap()).unwrap();
        let d = m.new_variable(&Domain::range("d", 1, 1023, 1).unwrap()).unwrap();
        let vco = Expr::from(125_000_000i64) * &n;
        m.equation("t", vco.within(2_940_000_000i64, 3_100_000_000i64)).unwrap();
        m.equation("t", [(&vco / &d).eq_to(7_812_500i64)]).unwrap();
        let sol = m.solve(&policy()).unwrap();
        assert_eq!(sol.extract_int(&n).unwrap(), 24);
        assert_eq!(sol.extract_int(&d).unwrap(), 384);
    }

    #[test]
    fn test_infeasible_is_exhausted() {
        let mut m = Model::new(BackendKind::Finite);
        let d = m.new_variable(&Domain::range("d", 1, 1023, 1).unwrap()).unwrap();
        m.equation("t", [(Expr::from(3_000_000_000i64) / &d).eq_to(7_812_501i64)])
            .unwrap();
        let err = m.solve(&policy()).unwrap_err();
        assert!(matches!(
            err,
            PlanError::NoSolution {
                reason: FailureReason::Exhausted { .. },
                ..
            }
        ));
        assert!(err.culprit().unwrap().starts_with("t:"));
    }

    #[test]
    fn test_irregular_domain_membership() {
        let mut m = Model::new(BackendKind::Finite);
        let dom = Domain::set("n", [16, 20, 32, 40, 64, 66, 80, 100]).unwrap();
        let n = m.new_variable(&dom).unwrap();
        m.equation("t", [n.above(41i64), n.below(70i64)]).unwrap();
        m.objective("t", n.clone(), Sense::Maximize).unwrap();
        let sol = m.solve(&policy()).unwrap();
        assert_eq!(sol.extract_int(&n).unwrap(), 66);
    }

    #[test]
    fn test_guard_selects_variant() {
        let mut m = Model::new(BackendKind::Finite);
        let sel = m.new_variable(&Domain::range("sel", 0, 1, 1).unwrap()).unwrap();
        let x = m.new_variable(&Domain::range("x", 1, 10, 1).unwrap()).unwrap();
        m.equation(
            "t",
            [
                x.eq_to(20i64).when(&sel, 0),
                x.eq_to(7i64).when(&sel, 1),
            ],
        )
        .unwrap();
        let sol = m.solve(&policy()).unwrap();
        assert_eq!(sol.extract_int(&sel).unwrap(), 1);
        assert_eq!(sol.extract_int(&x).unwrap(), 7);
    }

    #[test]
    fn test_lexicographic_objectives() {
        let mut m = Model::new(BackendKind::Finite);
        let a = m.new_variable(&Domain::range("a", 1, 6, 1).unwrap()).unwrap();
        let b = m.new_variable(&Domain::range("b", 1, 6, 1).unwrap()).unwrap();
        m.equation("t", [(&a * &b).eq_to(12i64)]).unwrap();
        m.objective("t", a.clone(), Sense::Minimize).unwrap();
        m.objective("t", b.clone(), Sense::Minimize).unwrap();
        m.set_objective_mode(ObjectiveMode::Lexicographic);
        let sol = m.solve(&policy()).unwrap();
        assert_eq!(sol.extract_int(&a).unwrap(), 2);
        assert_eq!(sol.extract_int(&b).unwrap(), 6);
        assert_eq!(sol.objective_values(), &[Ratio::from_int(2), Ratio::from_int(6)]);
    }

    #[test]
    fn test_node_limit_without_solution() {
        let mut m = Model::new(BackendKind::Finite);
        let a = m.new_variable(&Domain::range("a", 1, 1000, 1).unwrap()).unwrap();
        let b = m.new_variable(&Domain::range("b", 1, 1000, 1).unwrap()).unwrap();
        m.equation("t", [(&a + &b).eq_to(1999i64), (&a - &b).eq_to(3i64)]).unwrap();
        let tight = SolvePolicy {
            max_nodes: 3,
            ..SolvePolicy::default()
        };
        let err = m.solve(&tight).unwrap_err();
        assert!(matches!(
            err,
            PlanError::NoSolution {
                reason: FailureReason::LimitReached { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_local_model() {
        let m = Model::new(BackendKind::Local);
        let p = policy();
        let mut backend = FiniteSearch::new(&p);
        assert!(backend.solve(&m).is_err());
    }
}
