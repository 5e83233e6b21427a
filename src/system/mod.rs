// This module provides System, the orchestrator that composes independently written device
// contributors into one model, solves it once and merges the per-device configurations. It
// walks a fixed state machine: Unbuilt, Composed, Solved and Extracted, with Failed as the
// second terminal state. Composition asks each downstream contributor (inline PLLs, then
// converters, then the FPGA) for its required input clocks, finds the single upstream source
// advertising each name, asks that source for an output and equates supply with demand. Every
// such equation is recorded in the binding ledger so the result can be audited.
//
// The model lives only inside the system between compose and extract; an error while
// Composed or Solved discards it and leaves the system Failed. Errors raised on the way are
// wrapped with the stage and the contributor that raised them.

//! Composition and solve orchestration.

pub mod configuration;

use std::fmt;

use hashbrown::HashSet;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::error::{PlanError, PlanResult, Stage};
use crate::core::expr::Expr;
use crate::core::model::{BackendKind, Model, ObjectiveMode, Sense};
use crate::core::policy::SolvePolicy;
use crate::device::{
    ClockChip, ClockPort, ClockPurpose, ClockSource, Converter, DeviceContributor, ExternalPll,
    Fpga,
};
use crate::solver::Solution;

pub use configuration::{ConfigValue, Configuration};

/// Generator output every converter's SYSREF binds to in common mode.
pub const COMMON_SYSREF: &str = "common_sysref";

fn yes() -> bool {
    true
}

/// System-wide switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemOptions {
    /// Prefer the slowest legal SYSREF for every converter.
    #[serde(default = "yes")]
    pub minimize_sysref: bool,

    /// Drive every converter's SYSREF from one generator output.
    #[serde(default)]
    pub use_common_sysref: bool,
}

impl Default for SystemOptions {
    fn default() -> Self {
        Self {
            minimize_sysref: true,
            use_common_sysref: false,
        }
    }
}

impl SystemOptions {
    pub fn from_json(text: &str) -> PlanResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Unbuilt,
    Composed,
    Solved,
    Extracted,
    Failed,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemState::Unbuilt => "unbuilt",
            SystemState::Composed => "composed",
            SystemState::Solved => "solved",
            SystemState::Extracted => "extracted",
            SystemState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One consumer input tied to one producer output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub consumer: String,
    /// Port name the consumer declared.
    pub clock: String,
    pub producer: String,
    /// Output name requested from the producer.
    pub output: String,
    /// Index of the equality constraint in the model.
    pub constraint: usize,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} <- {}.{} (#{})",
            self.consumer, self.clock, self.producer, self.output, self.constraint
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Producer {
    Generator,
    Pll(usize),
}

struct Supply {
    producer: String,
    output: String,
    rate: Expr,
}

/// A clock generator, its converters, an optional FPGA and optional inline PLLs.
pub struct System {
    backend: BackendKind,
    policy: SolvePolicy,
    options: SystemOptions,
    clock: ClockChip,
    converters: Vec<Converter>,
    fpga: Option<Fpga>,
    plls: Vec<ExternalPll>,
    state: SystemState,
    model: Option<Model>,
    solution: Option<Solution>,
    bindings: Vec<Binding>,
}

impl System {
    pub fn new(clock: ClockChip, backend: BackendKind) -> Self {
        Self {
            backend,
            policy: SolvePolicy::default(),
            options: SystemOptions::default(),
            clock,
            converters: Vec::new(),
            fpga: None,
            plls: Vec::new(),
            state: SystemState::Unbuilt,
            model: None,
            solution: None,
            bindings: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: SystemOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_policy(mut self, policy: SolvePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn options(&self) -> &SystemOptions {
        &self.options
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// The merged model, between compose and extract.
    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    pub fn converters(&self) -> &[Converter] {
        &self.converters
    }

    /// Add a converter, connecting it to the FPGA if one is set.
    pub fn add_converter(&mut self, converter: Converter) -> PlanResult<()> {
        self.require(SystemState::Unbuilt, "add a converter")?;
        let name = converter.name().to_string();
        if self.contributor_names().contains(name.as_str()) {
            return Err(PlanError::invalid(&name, "duplicate contributor name"));
        }
        if let Some(fpga) = self.fpga.as_mut() {
            fpga.connect(&converter)?;
        }
        debug!("system: added converter {name}");
        self.converters.push(converter);
        Ok(())
    }

    /// Set the FPGA and connect every converter added so far.
    pub fn set_fpga(&mut self, mut fpga: Fpga) -> PlanResult<()> {
        self.require(SystemState::Unbuilt, "set the FPGA")?;
        if self.fpga.is_some() {
            return Err(PlanError::invalid(fpga.name(), "system already has an FPGA"));
        }
        if self.contributor_names().contains(fpga.name()) {
            return Err(PlanError::invalid(fpga.name(), "duplicate contributor name"));
        }
        for c in &self.converters {
            fpga.connect(c)?;
        }
        self.fpga = Some(fpga);
        Ok(())
    }

    /// Route `consumer`'s reference clock through `pll`.
    pub fn add_pll_inline(&mut self, mut pll: ExternalPll, consumer: &str) -> PlanResult<()> {
        self.require(SystemState::Unbuilt, "add an inline PLL")?;
        if self.contributor_names().contains(pll.name()) {
            return Err(PlanError::invalid(pll.name(), "duplicate contributor name"));
        }
        let conv = self
            .converters
            .iter()
            .find(|c| c.name() == consumer)
            .ok_or_else(|| {
                PlanError::invalid(pll.name(), format!("no converter named {consumer}"))
            })?;
        pll.route(conv.reference_port());
        debug!("system: {} routed through {}", conv.reference_port(), pll.name());
        self.plls.push(pll);
        Ok(())
    }

    fn contributor_names(&self) -> HashSet<&str> {
        let mut names: HashSet<&str> = HashSet::new();
        names.insert(self.clock.name());
        names.extend(self.converters.iter().map(|c| c.name()));
        names.extend(self.plls.iter().map(|p| p.name()));
        names.extend(self.fpga.iter().map(|f| f.name()));
        names
    }

    fn require(&self, state: SystemState, action: &'static str) -> PlanResult<()> {
        if self.state != state {
            return Err(PlanError::InvalidState {
                state: self.state.to_string(),
                action,
            });
        }
        Ok(())
    }

    /// Move to Failed, dropping the model, and wrap `err` with where it happened.
    fn fail(&mut self, stage: Stage, contributor: Option<String>, err: PlanError) -> PlanError {
        warn!("system: {stage} failed: {err}");
        self.state = SystemState::Failed;
        self.model = None;
        self.solution = None;
        self.bindings.clear();
        PlanError::Failed {
            stage,
            contributor,
            source: Box::new(err),
        }
    }

    /// Build every contributor into one fresh model and bind each input to its producer.
    pub fn compose(&mut self) -> PlanResult<()> {
        self.require(SystemState::Unbuilt, "compose")?;
        let mut model = Model::new(self.backend);
        let mut at = None;
        match self.compose_into(&mut model, &mut at) {
            Ok(()) => {
                info!(
                    "system: composed model {} ({} variables, {} constraints, {} bindings)",
                    model.id(),
                    model.vars().len(),
                    model.constraints().len(),
                    self.bindings.len()
                );
                self.model = Some(model);
                self.state = SystemState::Composed;
                Ok(())
            }
            Err(e) => Err(self.fail(Stage::Composed, at, e)),
        }
    }

    fn compose_into(&mut self, model: &mut Model, at: &mut Option<String>) -> PlanResult<()> {
        if self.options.use_common_sysref {
            self.check_common_lmfc()?;
        }

        *at = Some(self.clock.name().to_string());
        self.clock.build(model, &[])?;

        for i in 0..self.plls.len() {
            let name = self.plls[i].name().to_string();
            *at = Some(name.clone());
            let ports = self.plls[i].required_input_clocks();
            let supplies = self.supply(model, &name, &ports)?;
            let inputs: Vec<Expr> = supplies.iter().map(|s| s.rate.clone()).collect();
            let demands = self.plls[i].build(model, &inputs)?;
            self.bind(model, &name, &ports, supplies, &demands)?;
        }

        let mut sysref_objective = false;
        for i in 0..self.converters.len() {
            let name = self.converters[i].name().to_string();
            *at = Some(name.clone());
            let ports = self.converters[i].required_input_clocks();
            let supplies = self.supply(model, &name, &ports)?;
            let inputs: Vec<Expr> = supplies.iter().map(|s| s.rate.clone()).collect();
            let demands = self.converters[i].build(model, &inputs)?;
            if self.options.minimize_sysref && !(self.options.use_common_sysref && sysref_objective)
            {
                let sysref = ports
                    .iter()
                    .zip(&demands)
                    .find(|(p, _)| p.purpose == ClockPurpose::Sysref)
                    .map(|(_, d)| d.clone());
                if let Some(sysref) = sysref {
                    model.objective(&name, sysref, Sense::Minimize)?;
                    sysref_objective = true;
                }
            }
            self.bind(model, &name, &ports, supplies, &demands)?;
        }

        if let Some(mut fpga) = self.fpga.take() {
            let name = fpga.name().to_string();
            *at = Some(name.clone());
            let ports = fpga.required_input_clocks();
            let built = self.supply(model, &name, &ports).and_then(|supplies| {
                let inputs: Vec<Expr> = supplies.iter().map(|s| s.rate.clone()).collect();
                let demands = fpga.build(model, &inputs)?;
                self.bind(model, &name, &ports, supplies, &demands)
            });
            self.fpga = Some(fpga);
            built?;
        }

        *at = None;
        if model.objectives().len() > 1 {
            model.set_objective_mode(ObjectiveMode::Lexicographic);
        }
        Ok(())
    }

    fn check_common_lmfc(&self) -> PlanResult<()> {
        let mut first: Option<(&str, _)> = None;
        for c in &self.converters {
            let lmfc = c.link().lmfc()?;
            match first {
                None => first = Some((c.name(), lmfc)),
                Some((other, expected)) if expected != lmfc => {
                    return Err(PlanError::invalid(
                        c.name(),
                        format!(
                            "common SYSREF needs one LMFC; {} runs at {lmfc}, {other} at {expected}",
                            c.name()
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// The single source advertising `clock`.
    fn producer_of(&self, consumer: &str, clock: &str) -> PlanResult<Producer> {
        let mut found: Vec<(Producer, &str)> = self
            .plls
            .iter()
            .enumerate()
            .filter(|(_, p)| p.advertises(clock))
            .map(|(i, p)| (Producer::Pll(i), p.name()))
            .collect();
        // A generator without an explicit output list stands behind every name no PLL claims.
        let generator = self.clock.advertises(clock)
            && (self.clock.has_explicit_outputs() || found.is_empty());
        if generator {
            found.insert(0, (Producer::Generator, self.clock.name()));
        }
        match found.as_slice() {
            [] => Err(PlanError::UnboundClock {
                consumer: consumer.to_string(),
                clock: clock.to_string(),
            }),
            [(p, _)] => Ok(*p),
            [(_, first), (_, second), ..] => Err(PlanError::AmbiguousClock {
                consumer: consumer.to_string(),
                clock: clock.to_string(),
                first: first.to_string(),
                second: second.to_string(),
            }),
        }
    }

    /// Ask the producer of each port for an output.
    fn supply(
        &mut self,
        model: &mut Model,
        consumer: &str,
        ports: &[ClockPort],
    ) -> PlanResult<Vec<Supply>> {
        let mut supplies = Vec::with_capacity(ports.len());
        for port in ports {
            let output = if self.options.use_common_sysref && port.purpose == ClockPurpose::Sysref
            {
                COMMON_SYSREF.to_string()
            } else {
                port.name.clone()
            };
            let (producer, rate) = match self.producer_of(consumer, &output)? {
                Producer::Generator => (
                    self.clock.name().to_string(),
                    self.clock.output(model, &output)?,
                ),
                Producer::Pll(i) => (
                    self.plls[i].name().to_string(),
                    self.plls[i].output(model, &output)?,
                ),
            };
            supplies.push(Supply {
                producer,
                output,
                rate,
            });
        }
        Ok(supplies)
    }

    /// Equate each demand with its supply and record the binding.
    fn bind(
        &mut self,
        model: &mut Model,
        consumer: &str,
        ports: &[ClockPort],
        supplies: Vec<Supply>,
        demands: &[Expr],
    ) -> PlanResult<()> {
        if demands.len() != ports.len() {
            return Err(PlanError::Contract {
                device: consumer.to_string(),
                reason: format!("{} demands for {} ports", demands.len(), ports.len()),
            });
        }
        for ((port, supply), demand) in ports.iter().zip(supplies).zip(demands) {
            let label = format!("{} from {}.{}", port.name, supply.producer, supply.output);
            let constraint = model.equation(consumer, [demand.eq_to(supply.rate).labeled(label)])?;
            let binding = Binding {
                consumer: consumer.to_string(),
                clock: port.name.clone(),
                producer: supply.producer,
                output: supply.output,
                constraint,
            };
            debug!("system: bound {binding}");
            self.bindings.push(binding);
        }
        Ok(())
    }

    /// Solve the composed model once.
    pub fn solve(&mut self) -> PlanResult<()> {
        self.require(SystemState::Composed, "solve")?;
        let Some(model) = self.model.as_ref() else {
            return Err(PlanError::InvalidState {
                state: self.state.to_string(),
                action: "solve",
            });
        };
        match model.solve(&self.policy) {
            Ok(solution) => {
                info!(
                    "system: solved model {} with the {} backend in {:?}",
                    model.id(),
                    solution.backend(),
                    solution.stats().elapsed
                );
                self.solution = Some(solution);
                self.state = SystemState::Solved;
                Ok(())
            }
            Err(e) => {
                // Culprits read "owner: label".
                let owner = e
                    .culprit()
                    .map(|c| c.split(':').next().unwrap_or(c).trim().to_string());
                Err(self.fail(Stage::Solved, owner, e))
            }
        }
    }

    /// Read every contributor's settings out of the solution.
    pub fn extract(&mut self) -> PlanResult<Configuration> {
        self.require(SystemState::Solved, "extract")?;
        let mut at = None;
        match self.collect(&mut at) {
            Ok(cfg) => {
                info!("system: extracted {} entries", cfg.len());
                self.state = SystemState::Extracted;
                self.model = None;
                Ok(cfg)
            }
            Err(e) => Err(self.fail(Stage::Solved, at, e)),
        }
    }

    fn collect(&self, at: &mut Option<String>) -> PlanResult<Configuration> {
        let solution = self.solution.as_ref().ok_or_else(|| PlanError::InvalidState {
            state: self.state.to_string(),
            action: "extract",
        })?;
        let mut cfg = Configuration::new();
        *at = Some(self.clock.name().to_string());
        cfg.insert("clock", self.clock.extract(solution)?);
        for pll in &self.plls {
            *at = Some(pll.name().to_string());
            cfg.insert(format!("pll_{}", pll.name()), pll.extract(solution)?);
        }
        for c in &self.converters {
            *at = Some(c.name().to_string());
            cfg.insert(format!("converter_{}", c.name()), c.extract(solution)?);
            cfg.insert(format!("jesd_{}", c.name()), c.jesd_configuration()?);
        }
        if let Some(fpga) = &self.fpga {
            *at = Some(fpga.name().to_string());
            let links = fpga.extract(solution)?;
            for c in &self.converters {
                if let Some(link) = links.map(&[c.name()]) {
                    cfg.insert(format!("fpga_{}", c.name()), link.clone());
                }
            }
        }
        Ok(cfg)
    }

    /// Compose, solve and extract.
    pub fn run(&mut self) -> PlanResult<Configuration> {
        self.compose()?;
        self.solve()?;
        self.extract()
    }
}
