// This module defines error types for the clock-plan engine using the thiserror crate for
// idiomatic Rust error handling. PlanError is the single error enum for every failure the
// engine can report: values outside a legal domain, non-integer JESD ratios, request-list
// length mismatches, irregular domains, unbound or ambiguous clocks, expressions used with
// the wrong model, and solver failures. Each variant carries the device, domain or clock
// involved so failures can be traced to the contributor that raised them. ErrorKind splits
// the variants into the structural / composition / solve taxonomy, and the Failed variant
// wraps an inner error with the orchestrator stage and contributor it was raised in. The
// module also provides PlanResult<T> as a convenience alias for Result<T, PlanError>.

//! Error types for the clock-plan engine.
//!
//! Using thiserror for more idiomatic error handling.

use std::fmt;

use thiserror::Error;

use crate::core::model::BackendKind;

/// Coarse classification of a [`PlanError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected before any solve; never retried.
    Structural,
    /// Wiring or handle misuse; a programming error.
    Composition,
    /// The backend found no solution.
    Solve,
}

/// Orchestrator stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Composed,
    Solved,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Composed => write!(f, "compose"),
            Stage::Solved => write!(f, "solve"),
        }
    }
}

/// Why a backend gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// Local search ran out of iterations and restarts.
    NotConverged { iterations: u64, residual: f64 },
    /// The finite-domain search space was exhausted.
    Exhausted { nodes: u64 },
    /// A node or time limit stopped the finite-domain search before any solution.
    LimitReached { nodes: u64 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotConverged { iterations, residual } => write!(
                f,
                "no convergence after {iterations} iterations (residual {residual:.3e})"
            ),
            FailureReason::Exhausted { nodes } => {
                write!(f, "search space exhausted after {nodes} nodes")
            }
            FailureReason::LimitReached { nodes } => {
                write!(f, "limit reached after {nodes} nodes")
            }
        }
    }
}

/// Main error type for planning.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("{domain}: {value} is not a legal setting")]
    OutOfDomain { domain: String, value: String },

    #[error("non-integer {quantity}: {value}")]
    NonInteger { quantity: String, value: String },

    #[error("request length mismatch: {left} {left_len} vs {right} {right_len}")]
    LengthMismatch {
        left: &'static str,
        left_len: usize,
        right: &'static str,
        right_len: usize,
    },

    #[error("invalid configuration for {device}: {reason}")]
    InvalidConfig { device: String, reason: String },

    #[error("domain {domain} ({size} values) is too irregular for the {backend} backend")]
    DomainTooIrregular {
        domain: String,
        size: usize,
        backend: BackendKind,
    },

    #[error("arithmetic overflow while computing {context}")]
    Arithmetic { context: String },

    #[error("malformed record: {0}")]
    Record(#[from] serde_json::Error),

    #[error("clock {clock} required by {consumer} has no producer")]
    UnboundClock { consumer: String, clock: String },

    #[error("clock {clock} required by {consumer} is advertised by both {first} and {second}")]
    AmbiguousClock {
        consumer: String,
        clock: String,
        first: String,
        second: String,
    },

    #[error("{producer} has no free output channel for {clock}")]
    OutputsExhausted { producer: String, clock: String },

    #[error("handle belongs to model {found}, expected model {expected}")]
    ModelMismatch { expected: u64, found: u64 },

    #[error("{device} has not been built against a model")]
    NotBuilt { device: String },

    #[error("contract violation by {device}: {reason}")]
    Contract { device: String, reason: String },

    #[error("cannot {action} while {state}")]
    InvalidState { state: String, action: &'static str },

    #[error("no solution from the {backend} backend: {reason}")]
    NoSolution {
        backend: BackendKind,
        reason: FailureReason,
        culprit: Option<String>,
    },

    #[error("{stage} failed{}: {source}", .contributor.as_ref().map(|c| format!(" at {c}")).unwrap_or_default())]
    Failed {
        stage: Stage,
        contributor: Option<String>,
        #[source]
        source: Box<PlanError>,
    },
}

impl PlanError {
    /// Classify the error, looking through stage wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::OutOfDomain { .. }
            | PlanError::NonInteger { .. }
            | PlanError::LengthMismatch { .. }
            | PlanError::InvalidConfig { .. }
            | PlanError::DomainTooIrregular { .. }
            | PlanError::Arithmetic { .. }
            | PlanError::Record(_) => ErrorKind::Structural,
            PlanError::UnboundClock { .. }
            | PlanError::AmbiguousClock { .. }
            | PlanError::OutputsExhausted { .. }
            | PlanError::ModelMismatch { .. }
            | PlanError::NotBuilt { .. }
            | PlanError::Contract { .. }
            | PlanError::InvalidState { .. } => ErrorKind::Composition,
            PlanError::NoSolution { .. } => ErrorKind::Solve,
            PlanError::Failed { source, .. } => source.kind(),
        }
    }

    /// Only local-search non-convergence is worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            PlanError::NoSolution { reason, .. } => {
                matches!(reason, FailureReason::NotConverged { .. })
            }
            PlanError::Failed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Stage the error was raised in, if it passed through the orchestrator.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PlanError::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// First contributor (or constraint owner) that could not be satisfied.
    pub fn culprit(&self) -> Option<&str> {
        match self {
            PlanError::Failed {
                contributor: Some(c),
                ..
            } => Some(c),
            PlanError::Failed { source, .. } => source.culprit(),
            PlanError::NoSolution { culprit, .. } => culprit.as_deref(),
            _ => None,
        }
    }

    /// Innermost error, with stage wrappers removed.
    pub fn root(&self) -> &PlanError {
        match self {
            PlanError::Failed { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn out_of_domain(domain: &str, value: impl fmt::Display) -> Self {
        PlanError::OutOfDomain {
            domain: domain.to_string(),
            value: value.to_string(),
        }
    }

    pub(crate) fn invalid(device: &str, reason: impl Into<String>) -> Self {
        PlanError::InvalidConfig {
            device: device.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn overflow(context: impl Into<String>) -> Self {
        PlanError::Arithmetic {
            context: context.into(),
        }
    }
}

/// Result type alias for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_looks_through_stage() {
        let inner = PlanError::NoSolution {
            backend: BackendKind::Local,
            reason: FailureReason::NotConverged {
                iterations: 10,
                residual: 0.5,
            },
            culprit: Some("clock".into()),
        };
        let err = PlanError::Failed {
            stage: Stage::Solved,
            contributor: None,
            source: Box::new(inner),
        };
        assert_eq!(err.kind(), ErrorKind::Solve);
        assert!(err.is_retryable());
        assert_eq!(err.stage(), Some(Stage::Solved));
        assert_eq!(err.culprit(), Some("clock"));
    }

    #[test]
    fn test_exhaustion_is_not_retryable() {
        let err = PlanError::NoSolution {
            backend: BackendKind::Finite,
            reason: FailureReason::Exhausted { nodes: 3 },
            culprit: None,
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn test_failed_message_names_contributor() {
        let err = PlanError::Failed {
            stage: Stage::Composed,
            contributor: Some("AD9680".into()),
            source: Box::new(PlanError::UnboundClock {
                consumer: "AD9680".into(),
                clock: "AD9680_ref_clk".into(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("compose failed at AD9680"), "{msg}");
        assert_eq!(err.kind(), ErrorKind::Composition);
    }
}
