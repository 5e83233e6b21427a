// This module implements the inline external PLL: an integer-N synthesizer that sits between
// the clock generator and one consumer. It takes one reference from the generator, multiplies
// it by an optional doubler and the feedback divider over the reference divider into its VCO,
// and produces each routed consumer clock as VCO / d. It is both a contributor (it needs a
// reference) and a clock source (it advertises exactly the clock names routed through it).

//! Inline external PLL contributor.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::domain::Domain;
use crate::core::error::{PlanError, PlanResult};
use crate::core::expr::Expr;
use crate::core::model::Model;
use crate::core::ratio::Ratio;
use crate::device::{
    bound, check_inputs, handles_for, Built, ClockPort, ClockPurpose, ClockSource, DeviceContributor,
};
use crate::solver::Solution;
use crate::system::configuration::Configuration;

fn unit_doubler() -> Domain {
    Domain::singleton("reference_doubler", 1)
}

/// Capability record of an integer-N PLL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PllSpec {
    pub name: String,
    #[serde(default = "unit_doubler")]
    pub reference_doubler: Domain,
    pub reference_divider: Domain,
    pub feedback_divider: Domain,
    pub output_divider: Domain,
    #[serde(default)]
    pub reference_min: Option<Ratio>,
    #[serde(default)]
    pub reference_max: Option<Ratio>,
    #[serde(default)]
    pub pfd_min: Option<Ratio>,
    pub pfd_max: Ratio,
    pub vco_min: Ratio,
    pub vco_max: Ratio,
}

impl PllSpec {
    pub fn from_json(text: &str) -> PlanResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone)]
struct Routed {
    name: String,
    divider: Expr,
    rate: Expr,
}

#[derive(Debug, Clone)]
struct PllHandles {
    reference: Expr,
    doubler: Expr,
    r: Expr,
    n: Expr,
    pfd: Expr,
    vco: Expr,
    outputs: Vec<Routed>,
}

/// An external PLL instance.
#[derive(Debug, Clone)]
pub struct ExternalPll {
    spec: PllSpec,
    routes: Vec<String>,
    built: Option<Built<PllHandles>>,
}

impl ExternalPll {
    pub fn new(spec: PllSpec) -> PlanResult<Self> {
        if spec.vco_min >= spec.vco_max {
            return Err(PlanError::invalid(&spec.name, "empty VCO window"));
        }
        Ok(Self {
            spec,
            routes: Vec::new(),
            built: None,
        })
    }

    pub fn spec(&self) -> &PllSpec {
        &self.spec
    }

    /// Produce `clock` from this PLL.
    pub fn route(&mut self, clock: impl Into<String>) {
        let clock = clock.into();
        if !self.routes.contains(&clock) {
            self.routes.push(clock);
        }
    }

    pub fn routes(&self) -> &[String] {
        &self.routes
    }

    pub fn reference_port(&self) -> String {
        format!("{}_ref_clk", self.spec.name)
    }

    fn var(&self, model: &mut Model, domain: &Domain, label: &str) -> PlanResult<Expr> {
        model.new_variable(&domain.renamed(format!("{}.{label}", self.spec.name)))
    }
}

impl DeviceContributor for ExternalPll {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn required_input_clocks(&self) -> Vec<ClockPort> {
        vec![ClockPort::new(self.reference_port(), ClockPurpose::Reference)]
    }

    fn build(&mut self, model: &mut Model, inputs: &[Expr]) -> PlanResult<Vec<Expr>> {
        check_inputs(&self.spec.name, &self.required_input_clocks(), inputs)?;
        let name = self.spec.name.clone();
        let reference = inputs[0].clone();
        bound(
            model,
            &name,
            "reference",
            &reference,
            self.spec.reference_min,
            self.spec.reference_max,
        )?;
        let doubler = self.var(model, &self.spec.reference_doubler, "doubler")?;
        let r = self.var(model, &self.spec.reference_divider, "r")?;
        let n = self.var(model, &self.spec.feedback_divider, "n")?;
        let pfd = &reference * &doubler / &r;
        bound(model, &name, "pfd", &pfd, self.spec.pfd_min, Some(self.spec.pfd_max))?;
        let vco = &pfd * &n;
        bound(
            model,
            &name,
            "vco",
            &vco,
            Some(self.spec.vco_min),
            Some(self.spec.vco_max),
        )?;
        debug!("{name}: vco = {vco}");
        self.built = Some(Built::new(
            model,
            PllHandles {
                reference: reference.clone(),
                doubler,
                r,
                n,
                pfd,
                vco,
                outputs: Vec::new(),
            },
        ));
        Ok(vec![reference])
    }

    fn extract(&self, solution: &Solution) -> PlanResult<Configuration> {
        let h = handles_for(&self.spec.name, &self.built, solution)?;
        let mut outputs = Configuration::new();
        for out in &h.outputs {
            outputs.insert(
                out.name.clone(),
                Configuration::new()
                    .with("rate", solution.extract(&out.rate)?)
                    .with("divider", solution.extract_int(&out.divider)?),
            );
        }
        Ok(Configuration::new()
            .with("part", self.spec.name.clone())
            .with("reference", solution.extract(&h.reference)?)
            .with("reference_doubler", solution.extract_int(&h.doubler)?)
            .with("r", solution.extract_int(&h.r)?)
            .with("n", solution.extract_int(&h.n)?)
            .with("pfd", solution.extract(&h.pfd)?)
            .with("vco", solution.extract(&h.vco)?)
            .with("output_clocks", outputs))
    }
}

impl ClockSource for ExternalPll {
    fn advertises(&self, clock: &str) -> bool {
        self.routes.iter().any(|r| r == clock)
    }

    fn output(&mut self, model: &mut Model, clock: &str) -> PlanResult<Expr> {
        let name = self.spec.name.clone();
        if !self.advertises(clock) {
            return Err(PlanError::Contract {
                device: name,
                reason: format!("{clock} is not routed through this PLL"),
            });
        }
        let domain = self.spec.output_divider.renamed(format!("{name}.{clock}.d"));
        let built = self
            .built
            .as_mut()
            .ok_or_else(|| PlanError::NotBuilt { device: name })?;
        if built.model() != model.id() {
            return Err(PlanError::ModelMismatch {
                expected: built.model(),
                found: model.id(),
            });
        }
        let h = built.handles_mut();
        if let Some(existing) = h.outputs.iter().find(|o| o.name == clock) {
            return Ok(existing.rate.clone());
        }
        let divider = model.new_variable(&domain)?;
        let rate = &h.vco / &divider;
        h.outputs.push(Routed {
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
    use crate::core::model::BackendKind;
    use crate::core::policy::SolvePolicy;
    use crate::device::solve_standalone;

    fn adf4371_like() -> PllSpec {
        PllSpec {
            name: "pll".into(),
            reference_doubler: unit_doubler(),
            reference_divider: Domain::range("r", 1, 32, 1).unwrap(),
            feedback_divider: Domain::range("n", 20, 200, 1).unwrap(),
            output_divider: Domain::set("d", [1, 2, 4, 8, 16]).unwrap(),
            reference_min: Some(Ratio::from_int(10_000_000)),
            reference_max: Some(Ratio::from_int(600_000_000)),
            pfd_min: None,
            pfd_max: Ratio::from_int(160_000_000),
            vco_min: Ratio::from_int(4_000_000_000),
            vco_max: Ratio::from_int(8_000_000_000),
        }
    }

    #[test]
    fn test_advertises_only_routed_clocks() {
        let mut pll = ExternalPll::new(adf4371_like()).unwrap();
        pll.route("adc_ref_clk");
        pll.route("adc_ref_clk");
        assert_eq!(pll.routes().len(), 1);
        assert!(pll.advertises("adc_ref_clk"));
        assert!(!pll.advertises("adc_sysref"));
        assert_eq!(pll.required_input_clocks()[0].name, "pll_ref_clk");
    }

    #[test]
    fn test_standalone_reference_in_window() {
        let mut pll = ExternalPll::new(adf4371_like()).unwrap();
        let err = solve_standalone(
            &mut pll,
            BackendKind::Finite,
            &[Ratio::from_int(5_000_000)],
            &SolvePolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidConfig { .. }));
    }

    #[test]
    fn test_output_rate_divides_vco() {
        let mut pll = ExternalPll::new(adf4371_like()).unwrap();
        pll.route("out");
        let mut model = Model::new(BackendKind::Finite);
        let reference = Expr::from(100_000_000i64);
        pll.build(&mut model, &[reference]).unwrap();
        let out = pll.output(&mut model, "out").unwrap();
        model
            .equation("test", [out.eq_to(1_500_000_000i64)])
            .unwrap();
        let sol = model.solve(&SolvePolicy::default()).unwrap();
        let cfg = pll.extract(&sol).unwrap();
        let vco = cfg.rate(&["vco"]).unwrap();
        let d = cfg.int(&["output_clocks", "out", "divider"]).unwrap();
        assert_eq!(vco, Ratio::from_int(1_500_000_000 * d));
        assert!(vco >= Ratio::from_int(4_000_000_000));
    }
}
