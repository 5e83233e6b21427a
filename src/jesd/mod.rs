// This module holds the JESD204 link algebra: pure formulas that derive frame, multiframe,
// serial bit and device clocks from a link's parameters, plus the validated JesdLink record a
// converter carries. The formulas work on Frequency Expressions so they can be applied to
// both known rates and solver quantities; JesdLink evaluates them eagerly over exact
// rationals because the sample clock of a link is always known. Validation happens once, at
// construction: the samples-per-frame value derived from F, M, Np, L and the encoding must be
// an integer and agree with any declared S, and the resulting lane rate must fall inside the
// window of the JESD class and of the device. None of this touches a solver.

//! JESD204 link algebra.

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::error::{PlanError, PlanResult};
use crate::core::expr::Expr;
use crate::core::ratio::Ratio;
use crate::system::configuration::Configuration;

/// Line encoding of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "8b10b")]
    B8b10b,
    #[serde(rename = "64b66b")]
    B64b66b,
}

impl Encoding {
    /// Payload bits per code group.
    pub fn n(self) -> i64 {
        match self {
            Encoding::B8b10b => 8,
            Encoding::B64b66b => 64,
        }
    }

    /// Line bits per code group.
    pub fn d(self) -> i64 {
        match self {
            Encoding::B8b10b => 10,
            Encoding::B64b66b => 66,
        }
    }

    /// Lane rate to link-layer clock ratio.
    pub fn protocol_divisor(self) -> i64 {
        match self {
            Encoding::B8b10b => 32 * self.d() / self.n(),
            Encoding::B64b66b => 64 * self.d() / self.n(),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::B8b10b => write!(f, "8b10b"),
            Encoding::B64b66b => write!(f, "64b66b"),
        }
    }
}

/// JESD204 revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JesdClass {
    Jesd204b,
    Jesd204c,
}

impl JesdClass {
    /// Data path width used by the samples-per-clock rule.
    pub fn data_path_width(self) -> i64 {
        match self {
            JesdClass::Jesd204b => 32,
            JesdClass::Jesd204c => 64,
        }
    }

    /// Legal lane rate window in bits per second.
    pub fn lane_rate_window(self) -> (Ratio, Ratio) {
        let min = Ratio::from_int(312_500_000);
        match self {
            JesdClass::Jesd204b => (min, Ratio::from_int(12_500_000_000)),
            JesdClass::Jesd204c => (min, Ratio::from_int(32_000_000_000)),
        }
    }

    pub fn supports(self, encoding: Encoding) -> bool {
        matches!(
            (self, encoding),
            (JesdClass::Jesd204b, Encoding::B8b10b) | (JesdClass::Jesd204c, _)
        )
    }
}

impl fmt::Display for JesdClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JesdClass::Jesd204b => write!(f, "jesd204b"),
            JesdClass::Jesd204c => write!(f, "jesd204c"),
        }
    }
}

fn default_zero() -> i64 {
    0
}

/// Transport-layer parameters of one link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct LinkParams {
    /// Lanes.
    pub l: i64,
    /// Converters.
    pub m: i64,
    /// Octets per frame per lane.
    pub f: i64,
    /// Samples per converter per frame; derived when absent.
    #[serde(default)]
    pub s: Option<i64>,
    /// Frames per multiframe.
    pub k: i64,
    /// Converter resolution.
    pub n: i64,
    /// Bits per sample.
    #[serde(rename = "Np")]
    pub np: i64,
    #[serde(default = "default_zero")]
    pub hd: i64,
    #[serde(default = "default_zero")]
    pub cs: i64,
    #[serde(rename = "encoding")]
    pub encoding: Encoding,
}

/// Parameter values a converter accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedParams {
    pub l: Vec<i64>,
    pub m: Vec<i64>,
    pub f: Vec<i64>,
    #[serde(default)]
    pub s: Vec<i64>,
    pub k: Vec<i64>,
    pub np: Vec<i64>,
    pub encodings: Vec<Encoding>,
}

impl AllowedParams {
    /// Fail on the first parameter outside its allowed set. Empty sets accept anything.
    pub fn check(&self, device: &str, params: &LinkParams, s: i64) -> PlanResult<()> {
        let checks: [(&str, &[i64], i64); 6] = [
            ("L", &self.l, params.l),
            ("M", &self.m, params.m),
            ("F", &self.f, params.f),
            ("S", &self.s, s),
            ("K", &self.k, params.k),
            ("Np", &self.np, params.np),
        ];
        for (name, allowed, value) in checks {
            if !allowed.is_empty() && !allowed.contains(&value) {
                return Err(PlanError::out_of_domain(&format!("{device}.{name}"), value));
            }
        }
        if !self.encodings.is_empty() && !self.encodings.contains(&params.encoding) {
            return Err(PlanError::out_of_domain(
                &format!("{device}.encoding"),
                params.encoding,
            ));
        }
        Ok(())
    }
}

/// `S = F / (M * Np) * encoding_n * L`, required to be an integer.
pub fn derive_s(p: &LinkParams) -> PlanResult<i64> {
    if p.m <= 0 || p.np <= 0 || p.l <= 0 || p.f <= 0 || p.k <= 0 {
        return Err(PlanError::invalid(
            "jesd",
            format!("link parameters must be positive: {p:?}"),
        ));
    }
    let s = Ratio::from_int(p.f)
        .div_int(p.m * p.np)
        .and_then(|r| r.mul_int(p.encoding.n() * p.l))
        .ok_or_else(|| PlanError::overflow("samples per frame"))?;
    s.to_integer().ok_or_else(|| PlanError::NonInteger {
        quantity: "S".into(),
        value: s.to_string(),
    })
}

/// sample clock / S
pub fn frame_clock(sample_clock: &Expr, s: i64) -> Expr {
    sample_clock / s
}

/// frame clock / K
pub fn multiframe_clock(frame_clock: &Expr, k: i64) -> Expr {
    frame_clock / k
}

/// `M * S * Np * (d / n) * frame_clock / L`
pub fn bit_clock(p: &LinkParams, s: i64, frame_clock: &Expr) -> Expr {
    let e = p.encoding;
    frame_clock * (p.m * s * p.np * e.d()) / (e.n() * p.l)
}

/// Per-lane link-layer clock.
pub fn device_clock(bit_clock: &Expr, encoding: Encoding) -> Expr {
    bit_clock / encoding.protocol_divisor()
}

fn fold(e: Expr, quantity: &str) -> PlanResult<Ratio> {
    e.as_const()
        .ok_or_else(|| PlanError::overflow(format!("link {quantity}")))
}

/// A validated JESD204 link running at a known sample clock.
#[derive(Debug, Clone, PartialEq)]
pub struct JesdLink {
    class: JesdClass,
    params: LinkParams,
    s: i64,
    sample_clock: Ratio,
}

impl JesdLink {
    pub fn new(class: JesdClass, params: LinkParams, sample_clock: Ratio) -> PlanResult<Self> {
        if !class.supports(params.encoding) {
            return Err(PlanError::invalid(
                "jesd",
                format!("{class} does not use {} encoding", params.encoding),
            ));
        }
        if !sample_clock.is_positive() {
            return Err(PlanError::invalid(
                "jesd",
                format!("sample clock must be positive, got {sample_clock}"),
            ));
        }
        let s = derive_s(&params)?;
        if let Some(declared) = params.s {
            if declared != s {
                return Err(PlanError::invalid(
                    "jesd",
                    format!("declared S={declared} but F, M, Np and L give S={s}"),
                ));
            }
        }
        let link = Self {
            class,
            params: LinkParams { s: Some(s), ..params },
            s,
            sample_clock,
        };
        let (lo, hi) = class.lane_rate_window();
        link.check_bit_clock(lo, hi)?;
        debug!(
            "jesd link {class} L={} M={} F={} S={s} K={}: bit clock {}",
            link.params.l,
            link.params.m,
            link.params.f,
            link.params.k,
            link.bit_clock()?
        );
        Ok(link)
    }

    pub fn class(&self) -> JesdClass {
        self.class
    }

    pub fn params(&self) -> &LinkParams {
        &self.params
    }

    pub fn s(&self) -> i64 {
        self.s
    }

    pub fn lanes(&self) -> i64 {
        self.params.l
    }

    pub fn sample_clock(&self) -> Ratio {
        self.sample_clock
    }

    pub fn frame_clock(&self) -> PlanResult<Ratio> {
        fold(frame_clock(&Expr::Const(self.sample_clock), self.s), "frame clock")
    }

    /// Multiframe (LMFC) rate, `sample_clock / (S * K)`.
    pub fn multiframe_clock(&self) -> PlanResult<Ratio> {
        let frame = Expr::Const(self.frame_clock()?);
        fold(multiframe_clock(&frame, self.params.k), "multiframe clock")
    }

    pub fn lmfc(&self) -> PlanResult<Ratio> {
        self.multiframe_clock()
    }

    pub fn bit_clock(&self) -> PlanResult<Ratio> {
        let frame = Expr::Const(self.frame_clock()?);
        fold(bit_clock(&self.params, self.s, &frame), "bit clock")
    }

    pub fn device_clock(&self) -> PlanResult<Ratio> {
        let bit = Expr::Const(self.bit_clock()?);
        fold(device_clock(&bit, self.params.encoding), "device clock")
    }

    /// `L * W / (M * Np)` with W the class data path width.
    pub fn samples_per_device_clock(&self) -> PlanResult<Ratio> {
        Ratio::from_int(self.params.l * self.class.data_path_width())
            .div_int(self.params.m * self.params.np)
            .ok_or_else(|| PlanError::overflow("samples per clock"))
    }

    /// Transport-layer clock, `sample_clock / samples_per_device_clock`.
    pub fn transport_clock(&self) -> PlanResult<Ratio> {
        self.sample_clock
            .checked_div(&self.samples_per_device_clock()?)
            .ok_or_else(|| PlanError::overflow("transport clock"))
    }

    /// Fail unless the lane rate is inside `[lo, hi]`.
    pub fn check_bit_clock(&self, lo: Ratio, hi: Ratio) -> PlanResult<()> {
        let bit = self.bit_clock()?;
        if bit < lo || bit > hi {
            return Err(PlanError::invalid(
                "jesd",
                format!("lane rate {bit} outside [{lo}, {hi}]"),
            ));
        }
        Ok(())
    }

    /// Parameters and derived clocks.
    pub fn configuration(&self) -> PlanResult<Configuration> {
        let p = &self.params;
        Ok(Configuration::new()
            .with("jesd_class", self.class.to_string())
            .with("L", p.l)
            .with("M", p.m)
            .with("F", p.f)
            .with("S", self.s)
            .with("K", p.k)
            .with("N", p.n)
            .with("Np", p.np)
            .with("HD", p.hd)
            .with("CS", p.cs)
            .with("encoding", p.encoding.to_string())
            .with("sample_clock", self.sample_clock)
            .with("frame_clock", self.frame_clock()?)
            .with("multiframe_clock", self.multiframe_clock()?)
            .with("bit_clock", self.bit_clock()?)
            .with("device_clock", self.device_clock()?)
            .with("transport_clock", self.transport_clock()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(l: i64, m: i64, f: i64, np: i64, encoding: Encoding) -> LinkParams {
        LinkParams {
            l,
            m,
            f,
            s: None,
            k: 32,
            n: 16,
            np,
            hd: 0,
            cs: 0,
            encoding,
        }
    }

    #[test]
    fn test_protocol_divisor() {
        assert_eq!(Encoding::B8b10b.protocol_divisor(), 40);
        assert_eq!(Encoding::B64b66b.protocol_divisor(), 66);
    }

    #[test]
    fn test_derive_s() {
        assert_eq!(derive_s(&params(4, 2, 1, 16, Encoding::B8b10b)).unwrap(), 1);
        assert_eq!(derive_s(&params(8, 4, 2, 16, Encoding::B8b10b)).unwrap(), 2);
    }

    #[test]
    fn test_non_integer_s_fails_fast() {
        let err = derive_s(&params(1, 3, 1, 16, Encoding::B8b10b)).unwrap_err();
        assert!(matches!(err, PlanError::NonInteger { .. }));
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Structural);
    }

    #[test]
    fn test_link_clocks() {
        let link = JesdLink::new(
            JesdClass::Jesd204b,
            params(4, 2, 1, 16, Encoding::B8b10b),
            Ratio::from_int(500_000_000),
        )
        .unwrap();
        assert_eq!(link.s(), 1);
        assert_eq!(link.bit_clock().unwrap(), Ratio::from_int(5_000_000_000));
        assert_eq!(link.device_clock().unwrap(), Ratio::from_int(125_000_000));
        assert_eq!(link.lmfc().unwrap(), Ratio::from_int(15_625_000));
        assert_eq!(link.samples_per_device_clock().unwrap(), Ratio::from_int(4));
        assert_eq!(link.transport_clock().unwrap(), Ratio::from_int(125_000_000));
    }

    #[test]
    fn test_declared_s_must_match() {
        let mut p = params(4, 2, 1, 16, Encoding::B8b10b);
        p.s = Some(2);
        let err = JesdLink::new(JesdClass::Jesd204b, p, Ratio::from_int(500_000_000)).unwrap_err();
        assert!(matches!(err, PlanError::InvalidConfig { .. }));
    }

    #[test]
    fn test_lane_rate_window() {
        // 4 GSPS on four lanes puts 40 Gbps on each lane.
        let err = JesdLink::new(
            JesdClass::Jesd204b,
            params(4, 2, 1, 16, Encoding::B8b10b),
            Ratio::from_int(4_000_000_000),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidConfig { .. }));
    }

    #[test]
    fn test_204c_shares_minimum_lane_rate() {
        assert_eq!(
            JesdClass::Jesd204c.lane_rate_window().0,
            JesdClass::Jesd204b.lane_rate_window().0
        );
        // 10 MSPS on eight 64b66b lanes is about 20.6 Mbps per lane.
        let err = JesdLink::new(
            JesdClass::Jesd204c,
            params(8, 1, 1, 16, Encoding::B64b66b),
            Ratio::from_int(10_000_000),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidConfig { .. }));
    }

    #[test]
    fn test_204b_rejects_64b66b() {
        assert!(JesdLink::new(
            JesdClass::Jesd204b,
            params(4, 2, 8, 16, Encoding::B64b66b),
            Ratio::from_int(500_000_000),
        )
        .is_err());
    }

    #[test]
    fn test_formulas_accept_unknown_rates() {
        let mut model = crate::core::model::Model::new(crate::core::model::BackendKind::Finite);
        let fs = model
            .new_variable(&crate::core::domain::Domain::range("fs", 1, 4, 1).unwrap())
            .unwrap();
        let p = params(4, 2, 1, 16, Encoding::B8b10b);
        let bit = bit_clock(&p, 1, &frame_clock(&fs, 1));
        assert!(!bit.is_const());
        assert_eq!(bit.vars().len(), 1);
    }

    #[test]
    fn test_allowed_params() {
        let allowed = AllowedParams {
            l: vec![1, 2, 4],
            m: vec![1, 2],
            f: vec![1, 2],
            s: vec![],
            k: vec![32],
            np: vec![16],
            encodings: vec![Encoding::B8b10b],
        };
        let p = params(4, 2, 1, 16, Encoding::B8b10b);
        assert!(allowed.check("adc", &p, 1).is_ok());
        let p = params(8, 2, 1, 16, Encoding::B8b10b);
        assert!(matches!(
            allowed.check("adc", &p, 2),
            Err(PlanError::OutOfDomain { .. })
        ));
    }
}
