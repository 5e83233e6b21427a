//! Solve limits.
//!
//! A [`SolvePolicy`] bounds one blocking solve call. Every field has a
//! default so partial JSON documents are accepted.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::error::PlanResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvePolicy {
    /// Search nodes the finite-domain backend may visit.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: u64,

    /// Moves the local-search backend may make across all restarts.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,

    /// Random restarts after the local search stalls.
    #[serde(default = "default_restarts")]
    pub restarts: u32,

    /// Seed for the local-search restarts.
    #[serde(default)]
    pub seed: u64,

    /// Wall-clock limit in milliseconds; `None` for no limit.
    #[serde(default = "default_time_limit_ms")]
    pub time_limit_ms: Option<u64>,

    /// Keep searching for better objective values after the first solution.
    #[serde(default = "default_optimize")]
    pub optimize: bool,
}

fn default_max_nodes() -> u64 {
    200_000
}

fn default_max_iterations() -> u64 {
    20_000
}

fn default_restarts() -> u32 {
    16
}

fn default_time_limit_ms() -> Option<u64> {
    Some(30_000)
}

fn default_optimize() -> bool {
    true
}

impl Default for SolvePolicy {
    fn default() -> Self {
        Self {
            max_nodes: default_max_nodes(),
            max_iterations: default_max_iterations(),
            restarts: default_restarts(),
            seed: 0,
            time_limit_ms: default_time_limit_ms(),
            optimize: default_optimize(),
        }
    }
}

impl SolvePolicy {
    pub fn from_json(text: &str) -> PlanResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub(crate) fn deadline(&self, start: Instant) -> Option<Instant> {
        self.time_limit_ms
            .map(|ms| start + Duration::from_millis(ms))
    }
}
