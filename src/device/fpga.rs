// This module implements the FPGA contributor, parameterized by an FpgaSpec capability
// record. For every connected converter the FPGA receives a transceiver reference clock and,
// optionally, a separate link clock, and has to produce the converter's lane rate from the
// reference with one of its transceiver PLL variants (a CPLL, or a QPLL band). Variant
// selection, the link-layer output clock selection and the device clock source are all
// selector variables created through the domain encoder; every variant-specific relation is
// registered as a constraint guarded by its selector value, so the solver picks the variant
// together with the dividers. Lane rates and link-layer clocks come from the converter's
// already validated JESD link and enter the model as constants.
//
// Three board-level options narrow the search further. The reference clock can be tied to the
// core clock (lane rate over the protocol divisor) or half of it, the reference can be tied to
// the link output clock, and each converter can be pinned to one transceiver PLL family. A
// pinned converter only gets the variables of the variants it may use.

//! FPGA transceiver contributor.

use std::fmt;

use hashbrown::HashMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::domain::Domain;
use crate::core::error::{PlanError, PlanResult};
use crate::core::expr::Expr;
use crate::core::model::Model;
use crate::core::ratio::Ratio;
use crate::device::converter::{Converter, ConverterKind};
use crate::device::{bound, check_inputs, handles_for, Built, ClockPort, ClockPurpose, DeviceContributor};
use crate::solver::Solution;
use crate::system::configuration::{ConfigValue, Configuration};

fn one() -> i64 {
    1
}

fn yes() -> bool {
    true
}

/// One transceiver PLL variant: `vco = ref * prod(feedback) / m`, `lane_rate * d = vco * mult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransceiverPll {
    pub name: String,
    #[serde(default)]
    pub band: Option<String>,
    pub reference_divider: Domain,
    pub feedback_dividers: Vec<Domain>,
    pub output_divider: Domain,
    pub vco_min: Ratio,
    pub vco_max: Ratio,
    #[serde(default = "one")]
    pub rate_multiplier: i64,
}

/// Source of the link-layer input clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutClkSelect {
    /// `ref == link_in`
    Refclk,
    /// `ref == 2 * link_in`
    RefclkDiv2,
    /// `bit_clock == link_in * progdiv`
    Progdiv,
}

impl OutClkSelect {
    const ALL: [OutClkSelect; 3] = [OutClkSelect::Refclk, OutClkSelect::RefclkDiv2, OutClkSelect::Progdiv];

    fn code(self) -> i64 {
        self as i64
    }

    fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.code() == code)
    }
}

impl fmt::Display for OutClkSelect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutClkSelect::Refclk => write!(f, "XCVR_REFCLK"),
            OutClkSelect::RefclkDiv2 => write!(f, "XCVR_REFCLK_DIV2"),
            OutClkSelect::Progdiv => write!(f, "XCVR_PROGDIV_CLK"),
        }
    }
}

/// Where the FPGA's device clock comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClockSource {
    /// `link_out == device_clock`
    External,
    /// `link_in == device_clock`
    LinkClock,
    /// `ref == link_out`
    RefClock,
}

impl DeviceClockSource {
    const ALL: [DeviceClockSource; 3] = [
        DeviceClockSource::External,
        DeviceClockSource::LinkClock,
        DeviceClockSource::RefClock,
    ];

    fn code(self) -> i64 {
        self as i64
    }

    fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.code() == code)
    }
}

impl fmt::Display for DeviceClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClockSource::External => write!(f, "external"),
            DeviceClockSource::LinkClock => write!(f, "link_clock"),
            DeviceClockSource::RefClock => write!(f, "ref_clock"),
        }
    }
}

/// Fixed relation between the transceiver reference and the core clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefClockConstraint {
    /// `ref == lane_rate / protocol_divisor`
    CoreClock,
    /// `2 * ref == lane_rate / protocol_divisor`
    CoreClockDiv2,
    #[default]
    Unconstrained,
}

/// Fixed relation between the transceiver reference and the link output clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClockRelation {
    #[default]
    Unrelated,
    /// `ref == 2 * link_out`
    RefClock2xDeviceClock,
    /// `ref == link_out`
    RefClockEqDeviceClock,
}

fn all_out_clk() -> Vec<OutClkSelect> {
    OutClkSelect::ALL.to_vec()
}

fn all_sources() -> Vec<DeviceClockSource> {
    DeviceClockSource::ALL.to_vec()
}

fn default_progdiv() -> Domain {
    Domain::set(
        "progdiv_times2",
        [2, 8, 10, 16, 20, 32, 33, 40, 64, 66, 80, 128, 132, 160, 200, 256, 264],
    )
    .unwrap_or_else(|_| Domain::singleton("progdiv_times2", 2))
}

/// Capability record of an FPGA's transceivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FpgaSpec {
    pub part: String,
    pub transceivers: Vec<TransceiverPll>,
    pub reference_min: Ratio,
    pub reference_max: Ratio,
    pub max_serdes_lanes: i64,
    #[serde(default = "all_out_clk")]
    pub out_clk_select: Vec<OutClkSelect>,
    #[serde(default = "all_sources")]
    pub device_clock_source: Vec<DeviceClockSource>,
    /// Twice the PROGDIV ratio, so half-integer dividers stay integral.
    #[serde(default = "default_progdiv")]
    pub progdiv_times2: Domain,
    /// Whether the link clock is a separate generator output.
    #[serde(default = "yes")]
    pub separate_link_clock: bool,
    #[serde(default)]
    pub ref_clock_constraint: RefClockConstraint,
    #[serde(default)]
    pub device_clock_relation: DeviceClockRelation,
    /// Transceiver PLL every converter must use, unless overridden per converter.
    #[serde(default)]
    pub force_pll: Option<String>,
}

impl FpgaSpec {
    pub fn from_json(text: &str) -> PlanResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Indices of the transceiver variants named `pll`.
    fn variants_named(&self, pll: &str) -> Vec<i64> {
        self.transceivers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.name == pll)
            .map(|(i, _)| i as i64)
            .collect()
    }
}

/// Out clock selection to report, and the PROGDIV ratio when one is still needed.
///
/// A PROGDIV of 1 or 2 is reported as the plain reference or half-reference selection
/// when that selection is allowed.
pub fn reported_out_clk(
    selected: OutClkSelect,
    progdiv_times2: Option<i64>,
    allowed: &[OutClkSelect],
) -> PlanResult<(OutClkSelect, Option<Ratio>)> {
    let (OutClkSelect::Progdiv, Some(times2)) = (selected, progdiv_times2) else {
        return Ok((selected, None));
    };
    match times2 {
        2 if allowed.contains(&OutClkSelect::Refclk) => Ok((OutClkSelect::Refclk, None)),
        4 if allowed.contains(&OutClkSelect::RefclkDiv2) => Ok((OutClkSelect::RefclkDiv2, None)),
        _ => {
            let progdiv = Ratio::from_int(times2)
                .div_int(2)
                .ok_or_else(|| PlanError::overflow("progdiv"))?;
            Ok((OutClkSelect::Progdiv, Some(progdiv)))
        }
    }
}

/// Link facts copied from a connected converter.
#[derive(Debug, Clone)]
struct FpgaLink {
    converter: String,
    kind: ConverterKind,
    lanes: i64,
    bit_clock: Ratio,
    link_in: Ratio,
    device_clock: Ratio,
    protocol_divisor: i64,
}

#[derive(Debug, Clone)]
struct VariantHandles {
    m: Expr,
    feedback: Vec<Expr>,
    d: Expr,
    vco: Expr,
}

#[derive(Debug, Clone)]
struct LinkHandles {
    reference: Expr,
    link_out: Expr,
    variant: Expr,
    variants: Vec<Option<VariantHandles>>,
    out_clk: Expr,
    progdiv: Option<Expr>,
    source: Expr,
}

/// An FPGA instance and the converters connected to it.
#[derive(Debug, Clone)]
pub struct Fpga {
    name: String,
    spec: FpgaSpec,
    links: Vec<FpgaLink>,
    forced: HashMap<String, String>,
    built: Option<Built<Vec<LinkHandles>>>,
}

impl Fpga {
    pub fn new(name: impl Into<String>, spec: FpgaSpec) -> PlanResult<Self> {
        let name = name.into();
        if spec.transceivers.is_empty() {
            return Err(PlanError::invalid(&name, "no transceiver PLLs"));
        }
        if spec.out_clk_select.is_empty() || spec.device_clock_source.is_empty() {
            return Err(PlanError::invalid(&name, "no clock selections allowed"));
        }
        if let Some(t) = spec
            .transceivers
            .iter()
            .find(|t| t.feedback_dividers.is_empty() || t.vco_min >= t.vco_max)
        {
            return Err(PlanError::invalid(
                &name,
                format!("transceiver {} is malformed", t.name),
            ));
        }
        if let Some(pll) = &spec.force_pll {
            if spec.variants_named(pll).is_empty() {
                return Err(PlanError::invalid(&name, format!("no transceiver PLL named {pll}")));
            }
        }
        Ok(Self {
            name,
            spec,
            links: Vec::new(),
            forced: HashMap::new(),
            built: None,
        })
    }

    /// Pin `converter`'s link to the transceiver PLL family named `pll`.
    pub fn force_pll(&mut self, converter: &str, pll: &str) -> PlanResult<()> {
        if self.spec.variants_named(pll).is_empty() {
            return Err(PlanError::invalid(
                &self.name,
                format!("no transceiver PLL named {pll}"),
            ));
        }
        debug!("{}: {converter} forced onto {pll}", self.name);
        self.forced.insert(converter.to_string(), pll.to_string());
        Ok(())
    }

    /// Variant indices `converter` may use.
    fn allowed_variants(&self, converter: &str) -> Vec<i64> {
        let forced = self
            .forced
            .get(converter)
            .or(self.spec.force_pll.as_ref());
        match forced {
            Some(pll) => self.spec.variants_named(pll),
            None => (0..self.spec.transceivers.len() as i64).collect(),
        }
    }

    pub fn spec(&self) -> &FpgaSpec {
        &self.spec
    }

    /// Names of the connected converters, in connection order.
    pub fn converters(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(|l| l.converter.as_str())
    }

    /// Lanes in use per direction, (receive, transmit).
    pub fn lanes_in_use(&self) -> (i64, i64) {
        self.links.iter().fold((0, 0), |(rx, tx), l| match l.kind {
            ConverterKind::Adc => (rx + l.lanes, tx),
            ConverterKind::Dac => (rx, tx + l.lanes),
        })
    }

    /// Attach `converter`'s link to a transceiver quad.
    pub fn connect(&mut self, converter: &Converter) -> PlanResult<()> {
        let conv = converter.name().to_string();
        if self.links.iter().any(|l| l.converter == conv) {
            return Err(PlanError::invalid(
                &self.name,
                format!("converter {conv} is already connected"),
            ));
        }
        let link = converter.link();
        let link_in = link.device_clock()?;
        let fl = FpgaLink {
            converter: conv,
            kind: converter.kind(),
            lanes: link.lanes(),
            bit_clock: link.bit_clock()?,
            link_in,
            device_clock: link.transport_clock()?,
            protocol_divisor: link.params().encoding.protocol_divisor(),
        };
        let (rx, tx) = self.lanes_in_use();
        let (rx, tx) = match fl.kind {
            ConverterKind::Adc => (rx + fl.lanes, tx),
            ConverterKind::Dac => (rx, tx + fl.lanes),
        };
        if rx > self.spec.max_serdes_lanes || tx > self.spec.max_serdes_lanes {
            return Err(PlanError::invalid(
                &self.name,
                format!(
                    "{} needs {} lanes; {rx} receive and {tx} transmit exceed {}",
                    fl.converter, fl.lanes, self.spec.max_serdes_lanes
                ),
            ));
        }
        debug!(
            "{}: connected {} ({} lanes at {})",
            self.name, fl.converter, fl.lanes, fl.bit_clock
        );
        self.links.push(fl);
        Ok(())
    }

    pub fn reference_port(&self, converter: &str) -> String {
        format!("{}_{converter}_ref_clk", self.name)
    }

    pub fn link_clock_port(&self, converter: &str) -> String {
        format!("{}_{converter}_link_out_clk", self.name)
    }

    fn var(&self, model: &mut Model, domain: &Domain, label: &str) -> PlanResult<Expr> {
        model.new_variable(&domain.renamed(format!("{}.{label}", self.name)))
    }

    fn build_link(
        &self,
        model: &mut Model,
        link: &FpgaLink,
        reference: Expr,
        link_out: Expr,
    ) -> PlanResult<LinkHandles> {
        let owner = format!("{}.{}", self.name, link.converter);
        bound(
            model,
            &owner,
            "reference",
            &reference,
            Some(self.spec.reference_min),
            Some(self.spec.reference_max),
        )?;
        let conv = &link.converter;
        let bit = Expr::Const(link.bit_clock);
        let link_in = Expr::Const(link.link_in);
        let device_clock = Expr::Const(link.device_clock);

        let core_clock = Expr::Const(
            link.bit_clock
                .div_int(link.protocol_divisor)
                .ok_or_else(|| PlanError::overflow("core clock"))?,
        );
        match self.spec.ref_clock_constraint {
            RefClockConstraint::CoreClock => {
                model.equation(&owner, [reference.eq_to(&core_clock).labeled("ref == core clock")])?;
            }
            RefClockConstraint::CoreClockDiv2 => {
                model.equation(
                    &owner,
                    [(&reference * 2i64).eq_to(&core_clock).labeled("ref == core clock / 2")],
                )?;
            }
            RefClockConstraint::Unconstrained => {}
        }
        match self.spec.device_clock_relation {
            DeviceClockRelation::RefClock2xDeviceClock => {
                model.equation(
                    &owner,
                    [reference.eq_to(&link_out * 2i64).labeled("ref == 2 * link out")],
                )?;
            }
            DeviceClockRelation::RefClockEqDeviceClock => {
                model.equation(&owner, [reference.eq_to(&link_out).labeled("ref == link out")])?;
            }
            DeviceClockRelation::Unrelated => {}
        }

        let allowed = self.allowed_variants(conv);
        let variant = self.var(model, &Domain::set("pll", allowed.iter().copied())?, &format!("{conv}.pll"))?;
        let mut variants = Vec::with_capacity(self.spec.transceivers.len());
        for (i, t) in self.spec.transceivers.iter().enumerate() {
            if !allowed.contains(&(i as i64)) {
                variants.push(None);
                continue;
            }
            let tag = format!("{conv}.{}", t.name);
            let m = self.var(model, &t.reference_divider, &format!("{tag}.m"))?;
            let mut feedback = Vec::with_capacity(t.feedback_dividers.len());
            for (j, fb) in t.feedback_dividers.iter().enumerate() {
                feedback.push(self.var(model, fb, &format!("{tag}.n{}", j + 1))?);
            }
            let d = self.var(model, &t.output_divider, &format!("{tag}.d"))?;
            let vco = feedback.iter().fold(reference.clone(), |acc, fb| acc * fb) / &m;
            let [lo, hi] = vco.within(t.vco_min, t.vco_max);
            let i = i as i64;
            model.equation(
                &owner,
                [
                    lo.when(&variant, i).labeled(format!("{} vco >= {}", t.name, t.vco_min)),
                    hi.when(&variant, i).labeled(format!("{} vco <= {}", t.name, t.vco_max)),
                    (&bit * &d)
                        .eq_to(&vco * t.rate_multiplier)
                        .when(&variant, i)
                        .labeled(format!("{} lane rate", t.name)),
                ],
            )?;
            variants.push(Some(VariantHandles { m, feedback, d, vco }));
        }

        let out_clk = self.var(
            model,
            &Domain::set(
                "out_clk_select",
                self.spec.out_clk_select.iter().map(|o| o.code()),
            )?,
            &format!("{conv}.out_clk_select"),
        )?;
        let mut progdiv = None;
        for sel in &self.spec.out_clk_select {
            let c = match sel {
                OutClkSelect::Refclk => reference.eq_to(&link_in),
                OutClkSelect::RefclkDiv2 => reference.eq_to(&link_in * 2i64),
                OutClkSelect::Progdiv => {
                    let p = self.var(model, &self.spec.progdiv_times2, &format!("{conv}.progdiv_times2"))?;
                    let c = (&bit * 2i64).eq_to(&link_in * &p);
                    progdiv = Some(p);
                    c
                }
            };
            model.equation(&owner, [c.when(&out_clk, sel.code()).labeled(sel.to_string())])?;
        }

        let source = self.var(
            model,
            &Domain::set(
                "device_clock_source",
                self.spec.device_clock_source.iter().map(|s| s.code()),
            )?,
            &format!("{conv}.device_clock_source"),
        )?;
        for src in &self.spec.device_clock_source {
            let c = match src {
                DeviceClockSource::External => link_out.eq_to(&device_clock),
                DeviceClockSource::LinkClock => link_in.eq_to(&device_clock),
                DeviceClockSource::RefClock => reference.eq_to(&link_out),
            };
            model.equation(&owner, [c.when(&source, src.code()).labeled(src.to_string())])?;
        }

        Ok(LinkHandles {
            reference,
            link_out,
            variant,
            variants,
            out_clk,
            progdiv,
            source,
        })
    }

    fn extract_link(
        &self,
        solution: &Solution,
        link: &FpgaLink,
        h: &LinkHandles,
    ) -> PlanResult<Configuration> {
        let index = solution.extract_int(&h.variant)?;
        let (t, v) = usize::try_from(index)
            .ok()
            .and_then(|i| Some((self.spec.transceivers.get(i)?, h.variants.get(i)?.as_ref()?)))
            .ok_or_else(|| PlanError::Contract {
                device: self.name.clone(),
                reason: format!("variant index {index} out of range"),
            })?;
        let feedback = v
            .feedback
            .iter()
            .map(|f| solution.extract_int(f).map(ConfigValue::Int))
            .collect::<PlanResult<Vec<_>>>()?;
        let out_code = solution.extract_int(&h.out_clk)?;
        let out_clk = OutClkSelect::from_code(out_code).ok_or_else(|| PlanError::Contract {
            device: self.name.clone(),
            reason: format!("out clock selection {out_code} unknown"),
        })?;
        let progdiv_times2 = match (out_clk, &h.progdiv) {
            (OutClkSelect::Progdiv, Some(p)) => Some(solution.extract_int(p)?),
            _ => None,
        };
        let (out_clk, progdiv) = reported_out_clk(out_clk, progdiv_times2, &self.spec.out_clk_select)?;
        let src_code = solution.extract_int(&h.source)?;
        let source = DeviceClockSource::from_code(src_code).ok_or_else(|| PlanError::Contract {
            device: self.name.clone(),
            reason: format!("device clock source {src_code} unknown"),
        })?;
        let mut cfg = Configuration::new()
            .with("part", self.spec.part.clone())
            .with("type", t.name.clone())
            .with("m", solution.extract_int(&v.m)?)
            .with("feedback", ConfigValue::List(feedback))
            .with("d", solution.extract_int(&v.d)?)
            .with("vco", solution.extract(&v.vco)?)
            .with("reference_clock", solution.extract(&h.reference)?)
            .with("link_out_clock", solution.extract(&h.link_out)?)
            .with("lane_rate", link.bit_clock)
            .with("link_in_clock", link.link_in)
            .with("device_clock", link.device_clock)
            .with("out_clk_select", out_clk.to_string())
            .with("device_clock_source", source.to_string());
        if let Some(band) = &t.band {
            cfg.insert("band", band.clone());
        }
        if let Some(progdiv) = progdiv {
            cfg.insert("progdiv", progdiv);
        }
        Ok(cfg)
    }
}

impl DeviceContributor for Fpga {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_input_clocks(&self) -> Vec<ClockPort> {
        let mut ports = Vec::new();
        for l in &self.links {
            ports.push(ClockPort::new(self.reference_port(&l.converter), ClockPurpose::Reference));
            if self.spec.separate_link_clock {
                ports.push(ClockPort::new(
                    self.link_clock_port(&l.converter),
                    ClockPurpose::LinkClock,
                ));
            }
        }
        ports
    }

    fn build(&mut self, model: &mut Model, inputs: &[Expr]) -> PlanResult<Vec<Expr>> {
        check_inputs(&self.name, &self.required_input_clocks(), inputs)?;
        if self.links.is_empty() {
            return Err(PlanError::invalid(&self.name, "no converters connected"));
        }
        let per_link = if self.spec.separate_link_clock { 2 } else { 1 };
        let mut handles = Vec::with_capacity(self.links.len());
        for (link, ins) in self.links.iter().zip(inputs.chunks(per_link)) {
            let reference = ins[0].clone();
            let link_out = ins.get(1).cloned().unwrap_or_else(|| reference.clone());
            handles.push(self.build_link(model, link, reference, link_out)?);
        }
        self.built = Some(Built::new(model, handles));
        Ok(inputs.to_vec())
    }

    /// One entry per connected converter.
    fn extract(&self, solution: &Solution) -> PlanResult<Configuration> {
        let handles = handles_for(&self.name, &self.built, solution)?;
        let mut cfg = Configuration::new();
        for (link, h) in self.links.iter().zip(handles) {
            cfg.insert(link.converter.clone(), self.extract_link(solution, link, h)?);
        }
        Ok(cfg)
    }
}
