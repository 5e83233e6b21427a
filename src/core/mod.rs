// This module serves as the central hub for the engine's core infrastructure, the pieces
// every contributor and both solver backends share. It exports exact rational arithmetic
// (Ratio), legal-value domains with shape classification, frequency expressions and the
// constraints built from them, the Model that one solve attempt is assembled into, the domain
// encoder that turns domains into backend-appropriate variables, the solve policy, and the
// error taxonomy. Nothing in here knows about clock chips, converters or JESD links.

//! Core clock-plan infrastructure.
//!
//! # Key Components
//!
//! ## Expressions (`expr`, `constraint`)
//! - Exact rational constants and model-stamped variables
//! - Operator overloads for building rate relations
//! - Guarded constraints for variant selection
//!
//! ## Models (`model`, `encoder`)
//! - One model per solve attempt, backend fixed at construction
//! - Domain encoding is the only place variables are created
//!
//! ## Errors (`error`)
//! - Structural, composition and solve failures in one enum

pub mod constraint;
pub mod domain;
pub mod encoder;
pub mod error;
pub mod expr;
pub mod model;
pub mod policy;
pub mod ratio;

pub use constraint::{Constraint, Guard, Relation};
pub use domain::{Domain, DomainValues, Shape};
pub use error::{ErrorKind, FailureReason, PlanError, PlanResult, Stage};
pub use expr::{Expr, ModelId, VarId};
pub use model::{BackendKind, Model, Objective, ObjectiveMode, Sense, VarDecl, VarKind};
pub use policy::SolvePolicy;
pub use ratio::Ratio;
