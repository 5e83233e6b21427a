// This module defines the contract every hardware block implements to take part in a clock
// plan. A DeviceContributor names the clocks it needs, builds its internal relations into a
// model it is handed (never one it owns), returns the rate it demands on each input port so
// the orchestrator can equate demand with supply, and reads its configuration back out of a
// solution. ClockSource is the extra interface of blocks that can feed other blocks: they
// advertise clock names and produce a fresh divided output for each one requested.
//
// Contributors keep only handles into the model they were last built against, stamped with
// that model's id. Extracting from a solution of another model is a ModelMismatch, and
// extracting before any build is NotBuilt. Contributors are generic over capability records
// (plain serde data), so one implementation serves every chip of a role.

//! Device constraint contract and the generic contributors.

pub mod clock_chip;
pub mod converter;
pub mod fpga;
pub mod pll;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::error::{PlanError, PlanResult};
use crate::core::expr::{Expr, ModelId};
use crate::core::model::{BackendKind, Model};
use crate::core::policy::SolvePolicy;
use crate::core::ratio::Ratio;
use crate::solver::Solution;
use crate::system::configuration::Configuration;

pub use clock_chip::{ChipDivider, ClockChip, ClockChipSpec, ClockObjective, Reference};
pub use converter::{Clocking, Converter, ConverterKind, ConverterSpec, SysrefRule};
pub use fpga::{
    reported_out_clk, DeviceClockRelation, DeviceClockSource, Fpga, FpgaSpec, OutClkSelect,
    RefClockConstraint, TransceiverPll,
};
pub use pll::{ExternalPll, PllSpec};

/// What an input clock is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockPurpose {
    Reference,
    Sysref,
    LinkClock,
}

/// A named input placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockPort {
    pub name: String,
    pub purpose: ClockPurpose,
}

impl ClockPort {
    pub fn new(name: impl Into<String>, purpose: ClockPurpose) -> Self {
        Self {
            name: name.into(),
            purpose,
        }
    }
}

/// A hardware block that contributes constraints to a shared model.
pub trait DeviceContributor {
    fn name(&self) -> &str;

    /// Input clocks in port order.
    fn required_input_clocks(&self) -> Vec<ClockPort>;

    /// Register internal relations in `model`. `inputs` are the producer
    /// expressions bound to each port; the result is the rate demanded on
    /// each port, in the same order.
    fn build(&mut self, model: &mut Model, inputs: &[Expr]) -> PlanResult<Vec<Expr>>;

    /// Configuration selected by `solution`.
    fn extract(&self, solution: &Solution) -> PlanResult<Configuration>;
}

/// A contributor whose outputs can feed other contributors.
pub trait ClockSource: DeviceContributor {
    fn advertises(&self, clock: &str) -> bool;

    /// New output named `clock` at a rate the solver picks.
    fn output(&mut self, model: &mut Model, clock: &str) -> PlanResult<Expr>;
}

/// Handles stamped with the model they belong to.
#[derive(Debug, Clone)]
pub(crate) struct Built<T> {
    model: ModelId,
    handles: T,
}

impl<T> Built<T> {
    pub(crate) fn new(model: &Model, handles: T) -> Self {
        Self {
            model: model.id(),
            handles,
        }
    }

    pub(crate) fn model(&self) -> ModelId {
        self.model
    }

    pub(crate) fn handles_mut(&mut self) -> &mut T {
        &mut self.handles
    }
}

/// Handles of `built` if they belong to the model `solution` came from.
pub(crate) fn handles_for<'a, T>(
    device: &str,
    built: &'a Option<Built<T>>,
    solution: &Solution,
) -> PlanResult<&'a T> {
    let b = built.as_ref().ok_or_else(|| PlanError::NotBuilt {
        device: device.to_string(),
    })?;
    if b.model != solution.model_id() {
        return Err(PlanError::ModelMismatch {
            expected: b.model,
            found: solution.model_id(),
        });
    }
    Ok(&b.handles)
}

/// Fail unless `inputs` has one expression per required port.
pub(crate) fn check_inputs(device: &str, ports: &[ClockPort], inputs: &[Expr]) -> PlanResult<()> {
    if ports.len() != inputs.len() {
        return Err(PlanError::Contract {
            device: device.to_string(),
            reason: format!("{} input clocks for {} ports", inputs.len(), ports.len()),
        });
    }
    Ok(())
}

/// Constrain a known rate to a window, or register the window when it is unknown.
pub(crate) fn bound(
    model: &mut Model,
    owner: &str,
    label: &str,
    rate: &Expr,
    lo: Option<Ratio>,
    hi: Option<Ratio>,
) -> PlanResult<()> {
    if let Some(v) = rate.as_const() {
        let below = lo.is_some_and(|lo| v < lo);
        let above = hi.is_some_and(|hi| v > hi);
        if below || above {
            return Err(PlanError::invalid(
                owner,
                format!("{label} {v} outside [{}, {}]", fmt_opt(lo), fmt_opt(hi)),
            ));
        }
        return Ok(());
    }
    let mut cs = Vec::new();
    if let Some(lo) = lo {
        cs.push(rate.at_least(lo).labeled(format!("{label} >= {lo}")));
    }
    if let Some(hi) = hi {
        cs.push(rate.at_most(hi).labeled(format!("{label} <= {hi}")));
    }
    model.equation(owner, cs)?;
    Ok(())
}

fn fmt_opt(v: Option<Ratio>) -> String {
    v.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Solve one contributor on its own, with every input port held at a fixed rate.
pub fn solve_standalone<D>(
    device: &mut D,
    backend: BackendKind,
    inputs: &[Ratio],
    policy: &SolvePolicy,
) -> PlanResult<Configuration>
where
    D: DeviceContributor + ?Sized,
{
    let ports = device.required_input_clocks();
    if ports.len() != inputs.len() {
        return Err(PlanError::LengthMismatch {
            left: "input clocks",
            left_len: ports.len(),
            right: "rates",
            right_len: inputs.len(),
        });
    }
    let mut model = Model::new(backend);
    let exprs: Vec<Expr> = inputs.iter().map(|r| Expr::Const(*r)).collect();
    let demands = device.build(&mut model, &exprs)?;
    let owner = device.name().to_string();
    for ((port, demand), supply) in ports.iter().zip(&demands).zip(inputs) {
        model.equation(&owner, [demand.eq_to(*supply).labeled(port.name.clone())])?;
    }
    debug!("standalone solve of {owner}: {model:?}");
    let solution = model.solve(policy)?;
    device.extract(&solution)
}
