// This module defines Expr, the frequency-expression handle every contributor builds its
// relations from. An expression is a small tree over exact rational constants and solver
// variables combined with +, -, * and /. Variables are VarId handles stamped with the id of
// the model that created them, so mixing handles from two models is caught when the
// expression reaches Model::equation or Solution::extract. Operator overloads cover owned,
// borrowed and scalar operands and fold constant subtrees eagerly. The analysis helpers
// (vars, exponent_of, eval) are what both solver backends use: exponent_of reports the power
// a variable appears with when the expression is a pure product/quotient in it, which drives
// bounds propagation in the finite-domain backend and projection moves in the local search.

//! Frequency expressions.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use crate::core::constraint::{Constraint, Relation};
use crate::core::error::{PlanError, PlanResult};
use crate::core::ratio::Ratio;

/// Identifier of a model; unique within the process.
pub type ModelId = u64;

/// Handle to one solver variable of one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId {
    model: ModelId,
    index: u32,
}

impl VarId {
    pub(crate) fn new(model: ModelId, index: usize) -> Self {
        Self {
            model,
            index: index as u32,
        }
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// A known rate or an unresolved solver quantity.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Ratio),
    Var(VarId),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn constant(value: impl Into<Ratio>) -> Self {
        Expr::Const(value.into())
    }

    pub fn as_const(&self) -> Option<Ratio> {
        match self {
            Expr::Const(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<VarId> {
        match self {
            Expr::Var(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Const(_))
    }

    /// Append every distinct variable to `out`.
    pub fn collect_vars(&self, out: &mut Vec<VarId>) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(v) => {
                if !out.contains(v) {
                    out.push(*v);
                }
            }
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }

    pub fn vars(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    /// Fail unless every variable belongs to `model`.
    pub fn check_model(&self, model: ModelId) -> PlanResult<()> {
        match self {
            Expr::Const(_) => Ok(()),
            Expr::Var(v) if v.model == model => Ok(()),
            Expr::Var(v) => Err(PlanError::ModelMismatch {
                expected: model,
                found: v.model,
            }),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                a.check_model(model)?;
                b.check_model(model)
            }
        }
    }

    /// Power of `var` when the expression is a monomial in it.
    ///
    /// Returns `Some(0)` when `var` does not occur and `None` when it occurs
    /// under a sum or difference.
    pub fn exponent_of(&self, var: VarId) -> Option<i32> {
        match self {
            Expr::Const(_) => Some(0),
            Expr::Var(v) => Some(if *v == var { 1 } else { 0 }),
            Expr::Add(a, b) | Expr::Sub(a, b) => {
                match (a.exponent_of(var), b.exponent_of(var)) {
                    (Some(0), Some(0)) => Some(0),
                    _ => None,
                }
            }
            Expr::Mul(a, b) => Some(a.exponent_of(var)? + b.exponent_of(var)?),
            Expr::Div(a, b) => Some(a.exponent_of(var)? - b.exponent_of(var)?),
        }
    }

    /// Evaluate exactly. `None` on an unassigned variable, division by zero or overflow.
    pub fn eval<F>(&self, lookup: &F) -> Option<Ratio>
    where
        F: Fn(VarId) -> Option<Ratio>,
    {
        match self {
            Expr::Const(v) => Some(*v),
            Expr::Var(v) => lookup(*v),
            Expr::Add(a, b) => a.eval(lookup)?.checked_add(&b.eval(lookup)?),
            Expr::Sub(a, b) => a.eval(lookup)?.checked_sub(&b.eval(lookup)?),
            Expr::Mul(a, b) => a.eval(lookup)?.checked_mul(&b.eval(lookup)?),
            Expr::Div(a, b) => a.eval(lookup)?.checked_div(&b.eval(lookup)?),
        }
    }

    fn relate(&self, rel: Relation, rhs: impl Into<Expr>) -> Constraint {
        Constraint::new(self.clone(), rel, rhs.into())
    }

    pub fn eq_to(&self, rhs: impl Into<Expr>) -> Constraint {
        self.relate(Relation::Eq, rhs)
    }

    pub fn at_most(&self, rhs: impl Into<Expr>) -> Constraint {
        self.relate(Relation::Le, rhs)
    }

    pub fn at_least(&self, rhs: impl Into<Expr>) -> Constraint {
        self.relate(Relation::Ge, rhs)
    }

    pub fn below(&self, rhs: impl Into<Expr>) -> Constraint {
        self.relate(Relation::Lt, rhs)
    }

    pub fn above(&self, rhs: impl Into<Expr>) -> Constraint {
        self.relate(Relation::Gt, rhs)
    }

    /// `lo <= self <= hi` as two constraints.
    pub fn within(&self, lo: impl Into<Expr>, hi: impl Into<Expr>) -> [Constraint; 2] {
        [self.at_least(lo), self.at_most(hi)]
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{v}"),
            Expr::Var(v) => write!(f, "v{}", v.index),
            Expr::Add(a, b) => write!(f, "({a} + {b})"),
            Expr::Sub(a, b) => write!(f, "({a} - {b})"),
            Expr::Mul(a, b) => write!(f, "{a}*{b}"),
            Expr::Div(a, b) => write!(f, "{a}/({b})"),
        }
    }
}

impl From<Ratio> for Expr {
    fn from(v: Ratio) -> Self {
        Expr::Const(v)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Const(Ratio::from_int(v))
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::Const(Ratio::from_int(v as i64))
    }
}

impl From<u32> for Expr {
    fn from(v: u32) -> Self {
        Expr::Const(Ratio::from_int(v as i64))
    }
}

impl From<VarId> for Expr {
    fn from(v: VarId) -> Self {
        Expr::Var(v)
    }
}

impl From<&Expr> for Expr {
    fn from(v: &Expr) -> Self {
        v.clone()
    }
}

fn fold(
    a: Expr,
    b: Expr,
    op: fn(&Ratio, &Ratio) -> Option<Ratio>,
    node: fn(Box<Expr>, Box<Expr>) -> Expr,
) -> Expr {
    if let (Expr::Const(x), Expr::Const(y)) = (&a, &b) {
        if let Some(v) = op(x, y) {
            return Expr::Const(v);
        }
    }
    node(Box::new(a), Box::new(b))
}

fn mul(a: Expr, b: Expr) -> Expr {
    if a.as_const() == Some(Ratio::ONE) {
        return b;
    }
    if b.as_const() == Some(Ratio::ONE) {
        return a;
    }
    fold(a, b, Ratio::checked_mul, Expr::Mul)
}

fn div(a: Expr, b: Expr) -> Expr {
    if b.as_const() == Some(Ratio::ONE) {
        return a;
    }
    fold(a, b, Ratio::checked_div, Expr::Div)
}

fn add(a: Expr, b: Expr) -> Expr {
    fold(a, b, Ratio::checked_add, Expr::Add)
}

fn sub(a: Expr, b: Expr) -> Expr {
    fold(a, b, Ratio::checked_sub, Expr::Sub)
}

macro_rules! expr_binop {
    ($trait:ident, $method:ident, $func:ident) => {
        impl $trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $func(self, rhs)
            }
        }
        impl $trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                $func(self, rhs.clone())
            }
        }
        impl $trait<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $func(self.clone(), rhs)
            }
        }
        impl $trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                $func(self.clone(), rhs.clone())
            }
        }
        impl $trait<Ratio> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Ratio) -> Expr {
                $func(self, Expr::Const(rhs))
            }
        }
        impl $trait<Ratio> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Ratio) -> Expr {
                $func(self.clone(), Expr::Const(rhs))
            }
        }
        impl $trait<i64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: i64) -> Expr {
                $func(self, Expr::from(rhs))
            }
        }
        impl $trait<i64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: i64) -> Expr {
                $func(self.clone(), Expr::from(rhs))
            }
        }
        impl $trait<Expr> for Ratio {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $func(Expr::Const(self), rhs)
            }
        }
        impl $trait<&Expr> for Ratio {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                $func(Expr::Const(self), rhs.clone())
            }
        }
        impl $trait<Expr> for i64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $func(Expr::from(self), rhs)
            }
        }
        impl $trait<&Expr> for i64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                $func(Expr::from(self), rhs.clone())
            }
        }
    };
}

expr_binop!(Add, add, add);
expr_binop!(Sub, sub, sub);
expr_binop!(Mul, mul, mul);
expr_binop!(Div, div, div);

#[cfg(test)]
mod tests {
    use super::*;

    fn var(i: usize) -> Expr {
        Expr::Var(VarId::new(1, i))
    }

    #[test]
    fn test_constant_folding() {
        let e = Expr::from(125_000_000i64) * 24i64 / 3i64;
        assert_eq!(e.as_const(), Some(Ratio::from_int(1_000_000_000)));
        let x = var(0);
        assert_eq!(&x * 1i64, x);
    }

    #[test]
    fn test_exponent_of_monomials() {
        let (r, n, d) = (var(0), var(1), var(2));
        let out = Expr::from(125_000_000i64) * &n / (&r * &d);
        assert_eq!(out.exponent_of(n.as_var().unwrap()), Some(1));
        assert_eq!(out.exponent_of(r.as_var().unwrap()), Some(-1));
        assert_eq!(out.exponent_of(VarId::new(1, 9)), Some(0));

        let sq = Expr::from(1000i64) / (&d * &d);
        assert_eq!(sq.exponent_of(d.as_var().unwrap()), Some(-2));

        let sum = &n + &d;
        assert_eq!(sum.exponent_of(n.as_var().unwrap()), None);
    }

    #[test]
    fn test_eval_and_missing_values() {
        let (a, b) = (var(0), var(1));
        let e = (&a + 1i64) / &b;
        let vals = |v: VarId| match v.index() {
            0 => Some(Ratio::from_int(5)),
            1 => Some(Ratio::from_int(4)),
            _ => None,
        };
        assert_eq!(e.eval(&vals), Ratio::new(3, 2));
        let zero = |v: VarId| if v.index() == 0 { Some(Ratio::ONE) } else { Some(Ratio::ZERO) };
        assert_eq!(e.eval(&zero), None);
    }

    #[test]
    fn test_model_check() {
        let mixed = var(0) + Expr::Var(VarId::new(2, 0));
        let err = mixed.check_model(1).unwrap_err();
        assert!(matches!(err, PlanError::ModelMismatch { expected: 1, found: 2 }));
    }
}
