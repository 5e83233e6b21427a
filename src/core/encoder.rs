// This module implements the domain encoder, the single place that decides how a legal-value
// domain becomes a solver variable. The rules are checked in order: a singleton becomes a
// constant and creates no variable; the finite-domain backend always receives a native
// finite-set variable; the local-search backend receives a bounded integer with an explicit
// seed for contiguous ranges, a one-hot selection for small sets, and an explicit
// DomainTooIrregular error for anything else. No rule relaxes membership: every value a
// solution can take is a member of the original domain.

//! Domain to solver-variable encoding.

use log::debug;

use crate::core::domain::{Domain, Shape};
use crate::core::error::{PlanError, PlanResult};
use crate::core::expr::Expr;
use crate::core::model::{BackendKind, Model, VarKind};
use crate::core::ratio::Ratio;

/// Largest set the local-search backend accepts as a one-hot selection.
pub const ONE_HOT_LIMIT: usize = 5;

/// Encode `domain` into `model`, returning a constant or a variable expression.
pub fn encode(model: &mut Model, domain: &Domain, seed: Option<i64>) -> PlanResult<Expr> {
    if let Some(seed) = seed {
        domain.check(seed)?;
    }
    let shape = domain.shape();
    if let Shape::Singleton(v) = shape {
        debug!("encode {domain}: constant {v}");
        return Ok(Expr::Const(Ratio::from_int(v)));
    }

    let kind = match (model.backend(), shape) {
        (BackendKind::Finite, _) => VarKind::Finite(domain.to_vec()),
        (BackendKind::Local, Shape::Contiguous { min, max }) => VarKind::Integer { lb: min, ub: max },
        (BackendKind::Local, _) if domain.len() <= ONE_HOT_LIMIT => VarKind::OneHot(domain.to_vec()),
        (backend, _) => {
            return Err(PlanError::DomainTooIrregular {
                domain: domain.name().to_string(),
                size: domain.len(),
                backend,
            })
        }
    };
    let seed = match &kind {
        VarKind::Integer { lb, .. } => Some(seed.unwrap_or(*lb)),
        _ => seed,
    };
    debug!("encode {domain}: {kind:?} seed {seed:?}");
    let id = model.declare(domain.name(), kind, seed);
    Ok(Expr::Var(id))
}
