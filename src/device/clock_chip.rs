// This module implements the clock-generator contributor, one implementation for every chip
// of the role, parameterized by a ClockChipSpec capability record. The chip multiplies its
// reference by an optional doubler, divides it by r2 into the phase detector, multiplies by
// the feedback divider n2 into the VCO, and derives each output as VCO / (m1 * d) with a
// per-output divider d. It is the root clock source of a system: other contributors ask it
// for outputs by name and it creates a new divided channel for each until its channel count
// runs out. Used standalone it accepts a list of requested rates and solves a private model.

//! Clock-generator contributor.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::domain::Domain;
use crate::core::error::{PlanError, PlanResult};
use crate::core::expr::Expr;
use crate::core::model::{BackendKind, Model, Sense};
use crate::core::policy::SolvePolicy;
use crate::core::ratio::Ratio;
use crate::device::{bound, handles_for, solve_standalone, Built, ClockPort, ClockSource, DeviceContributor};
use crate::solver::Solution;
use crate::system::configuration::Configuration;

/// Which divider the generator prefers small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockObjective {
    None,
    #[default]
    MinimizeReferenceDivider,
    MinimizeFeedbackDivider,
}

fn unit_doubler() -> Domain {
    Domain::singleton("reference_doubler", 1)
}

/// Capability record of a clock-generator chip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockChipSpec {
    pub name: String,
    #[serde(default = "unit_doubler")]
    pub reference_doubler: Domain,
    /// r2
    pub reference_divider: Domain,
    /// n2
    pub feedback_divider: Domain,
    /// m1; absent on chips without a VCO prescaler.
    #[serde(default)]
    pub vco_divider: Option<Domain>,
    /// d
    pub output_divider: Domain,
    #[serde(default)]
    pub reference_min: Option<Ratio>,
    #[serde(default)]
    pub reference_max: Option<Ratio>,
    pub pfd_max: Ratio,
    pub vco_min: Ratio,
    pub vco_max: Ratio,
    pub output_channels: usize,
    #[serde(default)]
    pub objective: ClockObjective,
}

impl ClockChipSpec {
    pub fn from_json(text: &str) -> PlanResult<Self> {
        let spec: Self = serde_json::from_str(text)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> PlanResult<()> {
        if self.vco_min >= self.vco_max {
            return Err(PlanError::invalid(
                &self.name,
                format!("empty VCO window [{}, {}]", self.vco_min, self.vco_max),
            ));
        }
        if !self.pfd_max.is_positive() {
            return Err(PlanError::invalid(&self.name, "PFD maximum must be positive"));
        }
        if self.output_channels == 0 {
            return Err(PlanError::invalid(&self.name, "no output channels"));
        }
        let positive = [
            &self.reference_doubler,
            &self.reference_divider,
            &self.feedback_divider,
            &self.output_divider,
        ]
        .into_iter()
        .chain(self.vco_divider.as_ref())
        .all(|d| d.min() > 0);
        if !positive {
            return Err(PlanError::invalid(&self.name, "dividers must be positive"));
        }
        Ok(())
    }
}

/// Reference oscillator feeding the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reference {
    Fixed(Ratio),
    /// Any integer rate of the domain, chosen by the solver.
    Range(Domain),
}

impl From<Ratio> for Reference {
    fn from(v: Ratio) -> Self {
        Reference::Fixed(v)
    }
}

impl From<i64> for Reference {
    fn from(v: i64) -> Self {
        Reference::Fixed(Ratio::from_int(v))
    }
}

/// Divider groups whose domains can be narrowed per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipDivider {
    ReferenceDoubler,
    ReferenceDivider,
    FeedbackDivider,
    VcoDivider,
    OutputDivider,
}

#[derive(Debug, Clone)]
struct Output {
    name: String,
    divider: Expr,
    rate: Expr,
}

#[derive(Debug, Clone)]
struct ChipHandles {
    reference: Expr,
    doubler: Expr,
    r2: Expr,
    n2: Expr,
    m1: Expr,
    vcxod: Expr,
    vco: Expr,
    outputs: Vec<Output>,
}

/// A clock generator instance.
#[derive(Debug, Clone)]
pub struct ClockChip {
    spec: ClockChipSpec,
    reference: Reference,
    output_names: Option<Vec<String>>,
    requested: Vec<(String, Ratio)>,
    built: Option<Built<ChipHandles>>,
}

impl ClockChip {
    pub fn new(spec: ClockChipSpec, reference: impl Into<Reference>) -> PlanResult<Self> {
        spec.validate()?;
        let reference = reference.into();
        match &reference {
            Reference::Fixed(r) => {
                let low = spec.reference_min.is_some_and(|lo| *r < lo);
                let high = spec.reference_max.is_some_and(|hi| *r > hi);
                if low || high || !r.is_positive() {
                    return Err(PlanError::invalid(
                        &spec.name,
                        format!("reference {r} outside the chip's reference window"),
                    ));
                }
            }
            Reference::Range(d) if d.min() <= 0 => {
                return Err(PlanError::invalid(&spec.name, "reference range must be positive"))
            }
            Reference::Range(_) => {}
        }
        Ok(Self {
            spec,
            reference,
            output_names: None,
            requested: Vec::new(),
            built: None,
        })
    }

    pub fn spec(&self) -> &ClockChipSpec {
        &self.spec
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// Restrict the advertised outputs to `names`.
    pub fn with_outputs<I, S>(mut self, names: I) -> PlanResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.len() > self.spec.output_channels {
            return Err(PlanError::invalid(
                &self.spec.name,
                format!(
                    "{} outputs named but only {} channels",
                    names.len(),
                    self.spec.output_channels
                ),
            ));
        }
        self.output_names = Some(names);
        Ok(self)
    }

    /// Whether outputs were restricted with [`ClockChip::with_outputs`].
    pub fn has_explicit_outputs(&self) -> bool {
        self.output_names.is_some()
    }

    /// Outputs to produce when solved on its own.
    pub fn set_requested_clocks(&mut self, rates: &[Ratio], names: &[&str]) -> PlanResult<()> {
        if rates.len() != names.len() {
            return Err(PlanError::LengthMismatch {
                left: "rates",
                left_len: rates.len(),
                right: "names",
                right_len: names.len(),
            });
        }
        if rates.len() > self.spec.output_channels {
            return Err(PlanError::invalid(
                &self.spec.name,
                format!(
                    "{} clocks requested but only {} channels",
                    rates.len(),
                    self.spec.output_channels
                ),
            ));
        }
        if let Some(bad) = rates.iter().find(|r| !r.is_positive()) {
            return Err(PlanError::invalid(
                &self.spec.name,
                format!("requested rate {bad} is not positive"),
            ));
        }
        self.requested = names
            .iter()
            .map(|n| n.to_string())
            .zip(rates.iter().copied())
            .collect();
        Ok(())
    }

    /// Narrow one divider domain. Every value must already be legal.
    pub fn restrict(&mut self, which: ChipDivider, values: &[i64]) -> PlanResult<()> {
        let domain = match which {
            ChipDivider::ReferenceDoubler => &mut self.spec.reference_doubler,
            ChipDivider::ReferenceDivider => &mut self.spec.reference_divider,
            ChipDivider::FeedbackDivider => &mut self.spec.feedback_divider,
            ChipDivider::OutputDivider => &mut self.spec.output_divider,
            ChipDivider::VcoDivider => match &mut self.spec.vco_divider {
                Some(d) => d,
                None => {
                    return Err(PlanError::invalid(&self.spec.name, "chip has no VCO divider"))
                }
            },
        };
        *domain = domain.restrict(values.iter().copied())?;
        Ok(())
    }

    /// Solve the requested clocks in a private model.
    pub fn solve(&mut self, backend: BackendKind, policy: &SolvePolicy) -> PlanResult<Configuration> {
        if self.requested.is_empty() {
            return Err(PlanError::invalid(&self.spec.name, "no clocks requested"));
        }
        info!("solving {} standalone for {} clocks", self.spec.name, self.requested.len());
        solve_standalone(self, backend, &[], policy)
    }

    fn var(&self, model: &mut Model, domain: &Domain, label: &str) -> PlanResult<Expr> {
        model.new_variable(&domain.renamed(format!("{}.{label}", self.spec.name)))
    }
}

impl DeviceContributor for ClockChip {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn required_input_clocks(&self) -> Vec<ClockPort> {
        Vec::new()
    }

    fn build(&mut self, model: &mut Model, inputs: &[Expr]) -> PlanResult<Vec<Expr>> {
        super::check_inputs(&self.spec.name, &[], inputs)?;
        let name = self.spec.name.clone();
        let reference = match &self.reference {
            Reference::Fixed(r) => Expr::Const(*r),
            Reference::Range(d) => self.var(model, d, "reference")?,
        };
        bound(
            model,
            &name,
            "reference",
            &reference,
            self.spec.reference_min,
            self.spec.reference_max,
        )?;
        let doubler = self.var(model, &self.spec.reference_doubler, "doubler")?;
        let r2 = self.var(model, &self.spec.reference_divider, "r2")?;
        let n2 = self.var(model, &self.spec.feedback_divider, "n2")?;
        let m1 = match &self.spec.vco_divider {
            Some(d) => self.var(model, d, "m1")?,
            None => Expr::from(1i64),
        };

        let vcxod = &reference * &doubler;
        let feedback = &vcxod * &n2;
        model.equation(
            &name,
            [vcxod
                .at_most(self.spec.pfd_max * &r2)
                .labeled(format!("pfd <= {}", self.spec.pfd_max))],
        )?;
        let [lo, hi] = feedback.within(self.spec.vco_min * &r2, self.spec.vco_max * &r2);
        model.equation(
            &name,
            [
                lo.labeled(format!("vco >= {}", self.spec.vco_min)),
                hi.labeled(format!("vco <= {}", self.spec.vco_max)),
            ],
        )?;
        match self.spec.objective {
            ClockObjective::None => {}
            ClockObjective::MinimizeReferenceDivider => {
                model.objective(&name, r2.clone(), Sense::Minimize)?
            }
            ClockObjective::MinimizeFeedbackDivider => {
                model.objective(&name, n2.clone(), Sense::Minimize)?
            }
        }
        let vco = &feedback / &r2;
        debug!("{name}: vco = {vco}");
        self.built = Some(Built::new(
            model,
            ChipHandles {
                reference,
                doubler,
                r2,
                n2,
                m1,
                vcxod,
                vco,
                outputs: Vec::new(),
            },
        ));

        let requested = self.requested.clone();
        for (clock, rate) in requested {
            let out = self.output(model, &clock)?;
            model.equation(&name, [out.eq_to(rate).labeled(format!("{clock} == {rate}"))])?;
        }
        Ok(Vec::new())
    }

    fn extract(&self, solution: &Solution) -> PlanResult<Configuration> {
        let h = handles_for(&self.spec.name, &self.built, solution)?;
        let r2 = solution.extract(&h.r2)?;
        let pfd = solution
            .extract(&h.vcxod)?
            .checked_div(&r2)
            .ok_or_else(|| PlanError::overflow("pfd"))?;
        let mut dividers = Vec::with_capacity(h.outputs.len());
        let mut clocks = Configuration::new();
        for out in &h.outputs {
            let d = solution.extract_int(&out.divider)?;
            dividers.push(d);
            clocks.insert(
                out.name.clone(),
                Configuration::new()
                    .with("rate", solution.extract(&out.rate)?)
                    .with("divider", d),
            );
        }
        Ok(Configuration::new()
            .with("part", self.spec.name.clone())
            .with("reference", solution.extract(&h.reference)?)
            .with("reference_doubler", solution.extract_int(&h.doubler)?)
            .with("r2", solution.extract_int(&h.r2)?)
            .with("n2", solution.extract_int(&h.n2)?)
            .with("m1", solution.extract_int(&h.m1)?)
            .with("pfd", pfd)
            .with("vco", solution.extract(&h.vco)?)
            .with("out_dividers", dividers)
            .with("output_clocks", clocks))
    }
}

impl ClockSource for ClockChip {
    fn advertises(&self, clock: &str) -> bool {
        match &self.output_names {
            Some(names) => names.iter().any(|n| n == clock),
            None => true,
        }
    }

    /// An output requested twice is shared.
    fn output(&mut self, model: &mut Model, clock: &str) -> PlanResult<Expr> {
        let name = self.spec.name.clone();
        let domain = self
            .spec
            .output_divider
            .renamed(format!("{name}.{clock}.d"));
        let channels = self.spec.output_channels;
        let advertised = self.advertises(clock);
        let built = self.built.as_mut().ok_or_else(|| PlanError::NotBuilt {
            device: name.clone(),
        })?;
        if built.model() != model.id() {
            return Err(PlanError::ModelMismatch {
                expected: built.model(),
                found: model.id(),
            });
        }
        if !advertised {
            return Err(PlanError::Contract {
                device: name,
                reason: format!("{clock} is not one of the generator's outputs"),
            });
        }
        let h = built.handles_mut();
        if let Some(existing) = h.outputs.iter().find(|o| o.name == clock) {
            return Ok(existing.rate.clone());
        }
        if h.outputs.len() >= channels {
            return Err(PlanError::OutputsExhausted {
                producer: name,
                clock: clock.to_string(),
            });
        }
        let divider = model.new_variable(&domain)?;
        let rate = &h.vco / (&h.m1 * &divider);
        debug!("{name}: output {clock} = {rate}");
        h.outputs.push(Output {
            name: clock.to_string(),
            divider,
            rate: rate.clone(),
        });
        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::FailureReason;

    fn chip() -> ClockChipSpec {
        ClockChipSpec {
            name: "gen".into(),
            reference_doubler: unit_doubler(),
            reference_divider: Domain::range("r2", 1, 31, 1).unwrap(),
            feedback_divider: Domain::set("n2", [12, 16, 17, 20, 21, 22, 24, 25, 26])
                .unwrap(),
            vco_divider: Some(Domain::set("m1", [3, 4, 5]).unwrap()),
            output_divider: Domain::range("d", 1, 1023, 1).unwrap(),
            reference_min: None,
            reference_max: None,
            pfd_max: Ratio::from_int(259_000_000),
            vco_min: Ratio::from_int(2_940_000_000),
            vco_max: Ratio::from_int(3_100_000_000),
            output_channels: 4,
            objective: ClockObjective::MinimizeReferenceDivider,
        }
    }

    #[test]
    fn test_standalone_solve_factors_vco() {
        let mut gen = ClockChip::new(chip(), 125_000_000).unwrap();
        gen.set_requested_clocks(
            &[Ratio::from_int(1_000_000_000), Ratio::from_int(7_812_500)],
            &["dev", "sysref"],
        )
        .unwrap();
        let cfg = gen.solve(BackendKind::Finite, &SolvePolicy::default()).unwrap();
        assert_eq!(cfg.int(&["r2"]), Some(1));
        assert_eq!(cfg.int(&["n2"]), Some(24));
        assert_eq!(cfg.int(&["vco"]), Some(3_000_000_000));
        assert_eq!(cfg.int(&["m1"]), Some(3));
        assert_eq!(cfg.int(&["output_clocks", "dev", "divider"]), Some(1));
        assert_eq!(cfg.int(&["output_clocks", "sysref", "divider"]), Some(128));
        assert_eq!(cfg.int(&["output_clocks", "sysref", "rate"]), Some(7_812_500));
    }

    #[test]
    fn test_unreachable_rate_is_a_solve_failure() {
        let mut gen = ClockChip::new(chip(), 125_000_000).unwrap();
        gen.set_requested_clocks(&[Ratio::from_int(7_812_501)], &["sysref"])
            .unwrap();
        let err = gen.solve(BackendKind::Finite, &SolvePolicy::default()).unwrap_err();
        assert!(matches!(
            err,
            PlanError::NoSolution {
                reason: FailureReason::Exhausted { .. },
                ..
            }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_requested_lengths_must_match() {
        let mut gen = ClockChip::new(chip(), 125_000_000).unwrap();
        let err = gen
            .set_requested_clocks(&[Ratio::from_int(1)], &["a", "b"])
            .unwrap_err();
        assert!(matches!(err, PlanError::LengthMismatch { .. }));
    }

    #[test]
    fn test_restrict_rejects_illegal_values() {
        let mut gen = ClockChip::new(chip(), 125_000_000).unwrap();
        assert!(gen.restrict(ChipDivider::VcoDivider, &[3]).is_ok());
        assert!(matches!(
            gen.restrict(ChipDivider::FeedbackDivider, &[23]),
            Err(PlanError::OutOfDomain { .. })
        ));
    }

    #[test]
    fn test_outputs_exhaust_channels() {
        let mut spec = chip();
        spec.output_channels = 1;
        let mut gen = ClockChip::new(spec, 125_000_000).unwrap();
        let mut model = Model::new(BackendKind::Finite);
        gen.build(&mut model, &[]).unwrap();
        gen.output(&mut model, "a").unwrap();
        assert!(gen.output(&mut model, "a").is_ok());
        assert!(matches!(
            gen.output(&mut model, "b"),
            Err(PlanError::OutputsExhausted { .. })
        ));
    }

    #[test]
    fn test_output_before_build() {
        let mut gen = ClockChip::new(chip(), 125_000_000).unwrap();
        let mut model = Model::new(BackendKind::Finite);
        assert!(matches!(
            gen.output(&mut model, "a"),
            Err(PlanError::NotBuilt { .. })
        ));
    }

    #[test]
    fn test_extract_rejects_foreign_solution() {
        let mut gen = ClockChip::new(chip(), 125_000_000).unwrap();
        let mut model = Model::new(BackendKind::Finite);
        gen.build(&mut model, &[]).unwrap();
        let mut other = Model::new(BackendKind::Finite);
        other
            .new_variable(&Domain::range("x", 1, 2, 1).unwrap())
            .unwrap();
        let foreign = other.solve(&SolvePolicy::default()).unwrap();
        assert!(matches!(
            gen.extract(&foreign),
            Err(PlanError::ModelMismatch { .. })
        ));
    }

    #[test]
    fn test_spec_from_json() {
        let spec = ClockChipSpec::from_json(
            r#"{
                "name": "gen",
                "reference_divider": {"name": "r2", "values": {"start": 1, "end": 31}},
                "feedback_divider": {"name": "n2", "values": [12, 16, 24]},
                "output_divider": {"name": "d", "values": {"start": 1, "end": 1023}},
                "pfd_max": 259000000,
                "vco_min": 2940000000,
                "vco_max": 3100000000,
                "output_channels": 14
            }"#,
        )
        .unwrap();
        assert_eq!(spec.reference_divider.len(), 31);
        assert_eq!(spec.objective, ClockObjective::MinimizeReferenceDivider);
        assert!(spec.vco_divider.is_none());
    }
}
