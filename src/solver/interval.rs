//! Exact interval evaluation of expressions over variable bounds.

use crate::core::constraint::Relation;
use crate::core::expr::{Expr, VarId};
use crate::core::ratio::Ratio;

/// Closed interval `[lo, hi]` over exact rationals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub lo: Ratio,
    pub hi: Ratio,
}

impl Interval {
    pub fn new(lo: Ratio, hi: Ratio) -> Self {
        Self { lo, hi }
    }

    pub fn point(v: Ratio) -> Self {
        Self { lo: v, hi: v }
    }

    pub fn is_positive(&self) -> bool {
        self.lo.is_positive()
    }

    pub fn is_point(&self) -> bool {
        self.lo == self.hi
    }

    fn contains_zero(&self) -> bool {
        self.lo <= Ratio::ZERO && self.hi >= Ratio::ZERO
    }

    fn from_candidates(c: [Option<Ratio>; 4]) -> Option<Self> {
        let mut lo: Option<Ratio> = None;
        let mut hi: Option<Ratio> = None;
        for v in c {
            let v = v?;
            lo = Some(lo.map_or(v, |l| l.min(v)));
            hi = Some(hi.map_or(v, |h| h.max(v)));
        }
        Some(Self::new(lo?, hi?))
    }

    pub fn add(&self, o: &Self) -> Option<Self> {
        Some(Self::new(self.lo.checked_add(&o.lo)?, self.hi.checked_add(&o.hi)?))
    }

    pub fn sub(&self, o: &Self) -> Option<Self> {
        Some(Self::new(self.lo.checked_sub(&o.hi)?, self.hi.checked_sub(&o.lo)?))
    }

    pub fn mul(&self, o: &Self) -> Option<Self> {
        Self::from_candidates([
            self.lo.checked_mul(&o.lo),
            self.lo.checked_mul(&o.hi),
            self.hi.checked_mul(&o.lo),
            self.hi.checked_mul(&o.hi),
        ])
    }

    pub fn div(&self, o: &Self) -> Option<Self> {
        if o.contains_zero() {
            return None;
        }
        Self::from_candidates([
            self.lo.checked_div(&o.lo),
            self.lo.checked_div(&o.hi),
            self.hi.checked_div(&o.lo),
            self.hi.checked_div(&o.hi),
        ])
    }

    /// Bound `expr` given per-variable integer bounds. `None` when unbounded.
    pub fn eval<F>(expr: &Expr, bounds: &F) -> Option<Self>
    where
        F: Fn(VarId) -> Option<(i64, i64)>,
    {
        match expr {
            Expr::Const(v) => Some(Self::point(*v)),
            Expr::Var(v) => {
                let (lo, hi) = bounds(*v)?;
                Some(Self::new(Ratio::from_int(lo), Ratio::from_int(hi)))
            }
            Expr::Add(a, b) => Self::eval(a, bounds)?.add(&Self::eval(b, bounds)?),
            Expr::Sub(a, b) => Self::eval(a, bounds)?.sub(&Self::eval(b, bounds)?),
            Expr::Mul(a, b) => Self::eval(a, bounds)?.mul(&Self::eval(b, bounds)?),
            Expr::Div(a, b) => Self::eval(a, bounds)?.div(&Self::eval(b, bounds)?),
        }
    }
}

/// Whether `lhs REL rhs` can hold for some pair of points in the intervals.
pub fn may_hold(rel: Relation, lhs: &Interval, rhs: &Interval) -> bool {
    match rel {
        Relation::Eq => lhs.lo <= rhs.hi && rhs.lo <= lhs.hi,
        Relation::Le => lhs.lo <= rhs.hi,
        Relation::Lt => lhs.lo < rhs.hi,
        Relation::Ge => lhs.hi >= rhs.lo,
        Relation::Gt => lhs.hi > rhs.lo,
    }
}
