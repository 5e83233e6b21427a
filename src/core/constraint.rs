//! Relations between frequency expressions.

use std::fmt;

use crate::core::error::{PlanError, PlanResult};
use crate::core::expr::{Expr, ModelId, VarId};
use crate::core::ratio::Ratio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Le,
    Lt,
    Ge,
    Gt,
}

impl Relation {
    pub fn holds(self, lhs: Ratio, rhs: Ratio) -> bool {
        match self {
            Relation::Eq => lhs == rhs,
            Relation::Le => lhs <= rhs,
            Relation::Lt => lhs < rhs,
            Relation::Ge => lhs >= rhs,
            Relation::Gt => lhs > rhs,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Relation::Eq => "==",
            Relation::Le => "<=",
            Relation::Lt => "<",
            Relation::Ge => ">=",
            Relation::Gt => ">",
        }
    }
}

/// Activation condition: the constraint only applies while `selector == value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    pub selector: Expr,
    pub value: i64,
}

/// `lhs REL rhs`, optionally guarded, owned by the contributor that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub lhs: Expr,
    pub rel: Relation,
    pub rhs: Expr,
    pub guard: Option<Guard>,
    pub owner: String,
    pub label: Option<String>,
}

impl Constraint {
    pub fn new(lhs: Expr, rel: Relation, rhs: Expr) -> Self {
        Self {
            lhs,
            rel,
            rhs,
            guard: None,
            owner: String::new(),
            label: None,
        }
    }

    /// Only enforce while `selector` takes `value`.
    pub fn when(mut self, selector: &Expr, value: i64) -> Self {
        self.guard = Some(Guard {
            selector: selector.clone(),
            value,
        });
        self
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Variables of both sides and the guard selector.
    pub fn vars(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        self.lhs.collect_vars(&mut out);
        self.rhs.collect_vars(&mut out);
        if let Some(g) = &self.guard {
            g.selector.collect_vars(&mut out);
        }
        out
    }

    pub fn check_model(&self, model: ModelId) -> PlanResult<()> {
        self.lhs.check_model(model)?;
        self.rhs.check_model(model)?;
        if let Some(g) = &self.guard {
            g.selector.check_model(model)?;
            if !matches!(g.selector, Expr::Var(_) | Expr::Const(_)) {
                return Err(PlanError::Contract {
                    device: self.owner.clone(),
                    reason: format!("guard selector {} is not a variable", g.selector),
                });
            }
        }
        Ok(())
    }

    /// Exact check under a full assignment. `None` when something is unassigned.
    pub fn is_satisfied<F>(&self, lookup: &F) -> Option<bool>
    where
        F: Fn(VarId) -> Option<Ratio>,
    {
        if let Some(g) = &self.guard {
            if g.selector.eval(lookup)? != Ratio::from_int(g.value) {
                return Some(true);
            }
        }
        match (self.lhs.eval(lookup), self.rhs.eval(lookup)) {
            (Some(l), Some(r)) => Some(self.rel.holds(l, r)),
            // Division by zero never satisfies a relation.
            _ if self.vars().iter().all(|v| lookup(*v).is_some()) => Some(false),
            _ => None,
        }
    }

    /// Short description for diagnostics.
    pub fn describe(&self) -> String {
        match &self.label {
            Some(l) => format!("{}: {l}", self.owner),
            None => format!("{}: {} {} {}", self.owner, self.lhs, self.rel.symbol(), self.rhs),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.rel.symbol(), self.rhs)?;
        if let Some(g) = &self.guard {
            write!(f, " if {} == {}", g.selector, g.value)?;
        }
        Ok(())
    }
}
