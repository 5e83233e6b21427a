// This module implements the data-converter contributor (ADC or DAC), parameterized by a
// ConverterSpec capability record. A converter runs at a known sample clock; its JESD204
// link is validated when the converter is created, so every link quantity is an exact
// constant before any model exists. Inside a model the converter contributes the converter
// clock (sample clock times the decimation or interpolation factor), the relation between
// that clock and the reference it needs (a plain input divider, or an integrated PLL with
// its own PFD and VCO windows), and the SYSREF rate its multiframe clock allows. It demands
// two clocks, `<name>_ref_clk` and `<name>_sysref`.

//! Data-converter contributor.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::domain::Domain;
use crate::core::error::{PlanError, PlanResult};
use crate::core::expr::Expr;
use crate::core::model::Model;
use crate::core::ratio::Ratio;
use crate::device::{bound, check_inputs, handles_for, Built, ClockPort, ClockPurpose, DeviceContributor};
use crate::jesd::{AllowedParams, JesdClass, JesdLink, LinkParams};
use crate::solver::Solution;
use crate::system::configuration::Configuration;

fn unit(name: &str) -> Domain {
    Domain::singleton(name, 1)
}

fn unit_divider() -> Domain {
    unit("input_divider")
}

fn unit_vco_divider() -> Domain {
    unit("vco_divider")
}

fn unit_decimation() -> Domain {
    unit("decimation")
}

fn one() -> i64 {
    1
}

/// Direction of the converter's link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConverterKind {
    /// Transmits samples to the FPGA.
    Adc,
    /// Receives samples from the FPGA.
    Dac,
}

/// How the converter clock is derived from the reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Clocking {
    /// `ref_clk = converter_clock * input_divider`
    Direct {
        #[serde(default = "unit_divider")]
        input_divider: Domain,
        #[serde(default)]
        input_clock_max: Option<Ratio>,
    },
    /// `ref_clk = converter_clock * ref_div / (feedback * scale)`
    IntegratedPll {
        reference_divider: Domain,
        feedback_divider: Domain,
        #[serde(default = "one")]
        feedback_scale: i64,
        #[serde(default = "unit_vco_divider")]
        vco_divider: Domain,
        #[serde(default)]
        pfd_min: Option<Ratio>,
        pfd_max: Ratio,
        #[serde(default)]
        reference_min: Option<Ratio>,
        #[serde(default)]
        reference_max: Option<Ratio>,
        vco_min: Ratio,
        vco_max: Ratio,
    },
}

impl Clocking {
    fn label(&self) -> &'static str {
        match self {
            Clocking::Direct { .. } => "direct",
            Clocking::IntegratedPll { .. } => "integrated_pll",
        }
    }
}

/// SYSREF is `lmfc / k`, or `lmfc / k^2` when `squared`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysrefRule {
    pub divisor: Domain,
    #[serde(default)]
    pub squared: bool,
}

/// Capability record of a data converter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverterSpec {
    pub part: String,
    pub kind: ConverterKind,
    pub jesd_class: JesdClass,
    pub allowed: AllowedParams,
    #[serde(default)]
    pub lane_rate_min: Option<Ratio>,
    #[serde(default)]
    pub lane_rate_max: Option<Ratio>,
    pub converter_clock_min: Ratio,
    pub converter_clock_max: Ratio,
    #[serde(default = "unit_decimation")]
    pub decimation: Domain,
    pub clocking: Clocking,
    pub sysref: SysrefRule,
}

impl ConverterSpec {
    pub fn from_json(text: &str) -> PlanResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone)]
enum ClockHandles {
    Direct {
        input_divider: Expr,
    },
    Pll {
        reference_divider: Expr,
        feedback_divider: Expr,
        vco_divider: Expr,
        pfd: Expr,
        vco: Expr,
    },
}

#[derive(Debug, Clone)]
struct ConverterHandles {
    decimation: Expr,
    converter_clock: Expr,
    reference: Expr,
    clocking: ClockHandles,
    sysref_divisor: Expr,
    sysref: Expr,
}

/// A converter instance with a validated link.
#[derive(Debug, Clone)]
pub struct Converter {
    name: String,
    spec: ConverterSpec,
    link: JesdLink,
    built: Option<Built<ConverterHandles>>,
}

impl Converter {
    pub fn new(
        name: impl Into<String>,
        spec: ConverterSpec,
        sample_clock: impl Into<Ratio>,
        params: LinkParams,
    ) -> PlanResult<Self> {
        let name = name.into();
        let owned = |e: PlanError| match e {
            PlanError::InvalidConfig { reason, .. } => PlanError::InvalidConfig {
                device: name.clone(),
                reason,
            },
            other => other,
        };
        let link = JesdLink::new(spec.jesd_class, params, sample_clock.into()).map_err(owned)?;
        spec.allowed.check(&name, link.params(), link.s())?;
        let (lo, hi) = spec.jesd_class.lane_rate_window();
        link.check_bit_clock(
            spec.lane_rate_min.map_or(lo, |m| m.max(lo)),
            spec.lane_rate_max.map_or(hi, |m| m.min(hi)),
        )
        .map_err(owned)?;
        if spec.decimation.min() <= 0 || spec.sysref.divisor.min() <= 0 {
            return Err(PlanError::invalid(&name, "divider domains must be positive"));
        }
        debug!(
            "{name}: {} link at {} bps per lane",
            spec.jesd_class,
            link.bit_clock()?
        );
        Ok(Self {
            name,
            spec,
            link,
            built: None,
        })
    }

    pub fn spec(&self) -> &ConverterSpec {
        &self.spec
    }

    pub fn kind(&self) -> ConverterKind {
        self.spec.kind
    }

    pub fn link(&self) -> &JesdLink {
        &self.link
    }

    pub fn lanes(&self) -> i64 {
        self.link.lanes()
    }

    pub fn reference_port(&self) -> String {
        format!("{}_ref_clk", self.name)
    }

    pub fn sysref_port(&self) -> String {
        format!("{}_sysref", self.name)
    }

    /// Narrow the decimation (or interpolation) domain.
    pub fn restrict_decimation(&mut self, values: &[i64]) -> PlanResult<()> {
        self.spec.decimation = self.spec.decimation.restrict(values.iter().copied())?;
        Ok(())
    }

    /// Link parameters and derived clocks, keyed for the `jesd_<name>` entry.
    pub fn jesd_configuration(&self) -> PlanResult<Configuration> {
        Ok(self.link.configuration()?.with("converter", self.name.clone()))
    }

    fn var(&self, model: &mut Model, domain: &Domain, label: &str) -> PlanResult<Expr> {
        model.new_variable(&domain.renamed(format!("{}.{label}", self.name)))
    }
}

impl DeviceContributor for Converter {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_input_clocks(&self) -> Vec<ClockPort> {
        vec![
            ClockPort::new(self.reference_port(), ClockPurpose::Reference),
            ClockPort::new(self.sysref_port(), ClockPurpose::Sysref),
        ]
    }

    fn build(&mut self, model: &mut Model, inputs: &[Expr]) -> PlanResult<Vec<Expr>> {
        check_inputs(&self.name, &self.required_input_clocks(), inputs)?;
        let name = self.name.clone();
        let decimation = self.var(model, &self.spec.decimation, "decimation")?;
        let converter_clock = self.link.sample_clock() * &decimation;
        bound(
            model,
            &name,
            "converter clock",
            &converter_clock,
            Some(self.spec.converter_clock_min),
            Some(self.spec.converter_clock_max),
        )?;

        let (reference, clocking) = match &self.spec.clocking {
            Clocking::Direct {
                input_divider,
                input_clock_max,
            } => {
                let div = self.var(model, input_divider, "input_divider")?;
                let reference = &converter_clock * &div;
                bound(model, &name, "input clock", &reference, None, *input_clock_max)?;
                (reference, ClockHandles::Direct { input_divider: div })
            }
            Clocking::IntegratedPll {
                reference_divider,
                feedback_divider,
                feedback_scale,
                vco_divider,
                pfd_min,
                pfd_max,
                reference_min,
                reference_max,
                vco_min,
                vco_max,
            } => {
                let r = self.var(model, reference_divider, "pll_reference_divider")?;
                let fb = self.var(model, feedback_divider, "pll_feedback_divider")?;
                let vd = self.var(model, vco_divider, "pll_vco_divider")?;
                let reference = &converter_clock * &r / (&fb * *feedback_scale);
                let pfd = &reference / &r;
                let vco = &converter_clock * &vd;
                bound(model, &name, "pll reference", &reference, *reference_min, *reference_max)?;
                bound(model, &name, "pll pfd", &pfd, *pfd_min, Some(*pfd_max))?;
                bound(model, &name, "pll vco", &vco, Some(*vco_min), Some(*vco_max))?;
                (
                    reference,
                    ClockHandles::Pll {
                        reference_divider: r,
                        feedback_divider: fb,
                        vco_divider: vd,
                        pfd,
                        vco,
                    },
                )
            }
        };

        let k = self.var(model, &self.spec.sysref.divisor, "sysref_divisor")?;
        let lmfc = Expr::Const(self.link.lmfc()?);
        let sysref = if self.spec.sysref.squared {
            &lmfc / (&k * &k)
        } else {
            &lmfc / &k
        };
        debug!("{name}: ref_clk = {reference}, sysref = {sysref}");
        self.built = Some(Built::new(
            model,
            ConverterHandles {
                decimation,
                converter_clock,
                reference: reference.clone(),
                clocking,
                sysref_divisor: k,
                sysref: sysref.clone(),
            },
        ));
        Ok(vec![reference, sysref])
    }

    fn extract(&self, solution: &Solution) -> PlanResult<Configuration> {
        let h = handles_for(&self.name, &self.built, solution)?;
        let mut cfg = Configuration::new()
            .with("part", self.spec.part.clone())
            .with(
                "kind",
                match self.spec.kind {
                    ConverterKind::Adc => "adc",
                    ConverterKind::Dac => "dac",
                },
            )
            .with("clocking", self.spec.clocking.label())
            .with("sample_clock", self.link.sample_clock())
            .with("decimation", solution.extract_int(&h.decimation)?)
            .with("converter_clock", solution.extract(&h.converter_clock)?)
            .with("reference_clock", solution.extract(&h.reference)?)
            .with("sysref_divisor", solution.extract_int(&h.sysref_divisor)?)
            .with("sysref", solution.extract(&h.sysref)?);
        match &h.clocking {
            ClockHandles::Direct { input_divider } => {
                cfg.insert("input_divider", solution.extract_int(input_divider)?);
            }
            ClockHandles::Pll {
                reference_divider,
                feedback_divider,
                vco_divider,
                pfd,
                vco,
            } => {
                cfg.insert("pll_reference_divider", solution.extract_int(reference_divider)?);
                cfg.insert("pll_feedback_divider", solution.extract_int(feedback_divider)?);
                cfg.insert("pll_vco_divider", solution.extract_int(vco_divider)?);
                cfg.insert("pll_pfd", solution.extract(pfd)?);
                cfg.insert("pll_vco", solution.extract(vco)?);
            }
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::BackendKind;
    use crate::core::policy::SolvePolicy;
    use crate::device::solve_standalone;
    use crate::jesd::Encoding;

    fn spec(clocking: Clocking) -> ConverterSpec {
        ConverterSpec {
            part: "adc-part".into(),
            kind: ConverterKind::Adc,
            jesd_class: JesdClass::Jesd204b,
            allowed: AllowedParams {
                l: vec![1, 2, 4],
                m: vec![1, 2],
                f: vec![1, 2, 4],
                s: vec![1, 2],
                k: vec![16, 32],
                np: vec![16],
                encodings: vec![Encoding::B8b10b],
            },
            lane_rate_min: Some(Ratio::from_int(3_125_000_000)),
            lane_rate_max: Some(Ratio::from_int(12_500_000_000)),
            converter_clock_min: Ratio::from_int(300_000_000),
            converter_clock_max: Ratio::from_int(1_300_000_000),
            decimation: unit_decimation(),
            clocking,
            sysref: SysrefRule {
                divisor: Domain::range("k", 1, 8, 1).unwrap(),
                squared: true,
            },
        }
    }

    fn direct() -> Clocking {
        Clocking::Direct {
            input_divider: Domain::set("input_divider", [1, 2, 4]).unwrap(),
            input_clock_max: Some(Ratio::from_int(2_000_000_000)),
        }
    }

    fn params(l: i64) -> LinkParams {
        LinkParams {
            l,
            m: 2,
            f: 4 / l,
            s: None,
            k: 32,
            n: 14,
            np: 16,
            hd: 0,
            cs: 0,
            encoding: Encoding::B8b10b,
        }
    }

    #[test]
    fn test_link_validated_at_construction() {
        let c = Converter::new("adc", spec(direct()), 500_000_000i64, params(4)).unwrap();
        assert_eq!(c.link().bit_clock().unwrap(), Ratio::from_int(5_000_000_000));
        // Two lanes double the lane rate; one lane exceeds the device maximum.
        assert!(Converter::new("adc", spec(direct()), 500_000_000i64, params(2)).is_ok());
        let err = Converter::new("adc", spec(direct()), 500_000_000i64, params(1)).unwrap_err();
        assert!(matches!(err, PlanError::InvalidConfig { ref device, .. } if device == "adc"));
    }

    #[test]
    fn test_rejects_parameters_outside_allowed_set() {
        let mut p = params(4);
        p.k = 4;
        assert!(matches!(
            Converter::new("adc", spec(direct()), 500_000_000i64, p),
            Err(PlanError::OutOfDomain { .. })
        ));
    }

    #[test]
    fn test_standalone_direct_clocking() {
        let mut c = Converter::new("adc", spec(direct()), 500_000_000i64, params(4)).unwrap();
        let cfg = solve_standalone(
            &mut c,
            BackendKind::Finite,
            &[
                Ratio::from_int(1_000_000_000),
                Ratio::new(15_625_000, 9).unwrap(),
            ],
            &SolvePolicy::default(),
        )
        .unwrap();
        assert_eq!(cfg.int(&["input_divider"]), Some(2));
        assert_eq!(cfg.int(&["sysref_divisor"]), Some(3));
        assert_eq!(cfg.text(&["clocking"]), Some("direct"));
    }

    #[test]
    fn test_standalone_integrated_pll() {
        let pll = Clocking::IntegratedPll {
            reference_divider: Domain::range("r", 1, 4, 1).unwrap(),
            feedback_divider: Domain::range("fb", 1, 64, 1).unwrap(),
            feedback_scale: 1,
            vco_divider: Domain::set("vd", [4, 6, 8]).unwrap(),
            pfd_min: Some(Ratio::from_int(25_000_000)),
            pfd_max: Ratio::from_int(750_000_000),
            reference_min: None,
            reference_max: None,
            vco_min: Ratio::from_int(3_000_000_000),
            vco_max: Ratio::from_int(6_000_000_000),
        };
        let mut c = Converter::new("dac", spec(pll), 500_000_000i64, params(4)).unwrap();
        let cfg = solve_standalone(
            &mut c,
            BackendKind::Finite,
            &[Ratio::from_int(100_000_000), Ratio::from_int(15_625_000)],
            &SolvePolicy::default(),
        )
        .unwrap();
        let r = cfg.int(&["pll_reference_divider"]).unwrap();
        let fb = cfg.int(&["pll_feedback_divider"]).unwrap();
        assert_eq!(Ratio::from_int(500_000_000 * r), Ratio::from_int(100_000_000 * fb));
        assert_eq!(cfg.int(&["sysref_divisor"]), Some(1));
    }

    #[test]
    fn test_jesd_configuration() {
        let c = Converter::new("adc", spec(direct()), 500_000_000i64, params(4)).unwrap();
        let j = c.jesd_configuration().unwrap();
        assert_eq!(j.int(&["L"]), Some(4));
        assert_eq!(j.int(&["S"]), Some(1));
        assert_eq!(j.int(&["bit_clock"]), Some(5_000_000_000));
        assert_eq!(j.text(&["encoding"]), Some("8b10b"));
    }
}
