//! Shared fixtures for the integration tests.
//!
//! Capability records live in `tests/data` as JSON, the way a chip table
//! would hand them over.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use clockplan::core::Domain;
use clockplan::device::{
    ClockChip, ClockChipSpec, Converter, ConverterKind, ConverterSpec, ExternalPll, Fpga, FpgaSpec,
    PllSpec,
};
use clockplan::{Encoding, LinkParams, Ratio};

pub const REFERENCE: i64 = 125_000_000;
pub const SAMPLE_RATE: i64 = 500_000_000;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Read a record from the test data directory.
pub fn load(filename: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(filename);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()))
}

pub fn r(v: i64) -> Ratio {
    Ratio::from_int(v)
}

pub fn ad9523_spec() -> ClockChipSpec {
    ClockChipSpec::from_json(&load("ad9523_1.json")).unwrap()
}

pub fn ad9523() -> ClockChip {
    ClockChip::new(ad9523_spec(), REFERENCE).unwrap()
}

/// Same chip with a contiguous feedback divider, which the local-search backend can encode.
pub fn ad9523_contiguous() -> ClockChip {
    let mut spec = ad9523_spec();
    spec.feedback_divider = Domain::range("n2", 12, 26, 1).unwrap();
    ClockChip::new(spec, REFERENCE).unwrap()
}

pub fn ad9680_spec() -> ConverterSpec {
    ConverterSpec::from_json(&load("ad9680.json")).unwrap()
}

pub fn link_params(lanes: i64) -> LinkParams {
    LinkParams {
        l: lanes,
        m: 2,
        f: 4 / lanes,
        s: None,
        k: 32,
        n: 14,
        np: 16,
        hd: 0,
        cs: 0,
        encoding: Encoding::B8b10b,
    }
}

/// 500 MSPS, L=4 M=2 F=1: 5 Gbps lanes and a 15.625 MHz LMFC.
pub fn ad9680(name: &str) -> Converter {
    Converter::new(name, ad9680_spec(), SAMPLE_RATE, link_params(4)).unwrap()
}

/// The same part on the transmit side of the link.
pub fn ad9680_as_dac(name: &str) -> Converter {
    let mut spec = ad9680_spec();
    spec.kind = ConverterKind::Dac;
    Converter::new(name, spec, SAMPLE_RATE, link_params(4)).unwrap()
}

pub fn zc706_spec() -> FpgaSpec {
    FpgaSpec::from_json(&load("zc706.json")).unwrap()
}

pub fn zc706() -> Fpga {
    Fpga::new("fpga", zc706_spec()).unwrap()
}

pub fn adf4371(name: &str) -> ExternalPll {
    let mut spec = PllSpec::from_json(&load("adf4371.json")).unwrap();
    spec.name = name.to_string();
    ExternalPll::new(spec).unwrap()
}
