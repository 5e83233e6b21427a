//! clockplan - JESD204 clock-plan constraint engine.
//!
//! Given a reference oscillator and a set of hardware blocks (a clock
//! generator, data converters, an FPGA and optional inline PLLs), clockplan
//! composes each block's legal divider relations into one constraint model,
//! solves it once and extracts the selected settings as a nested
//! configuration.
//!
//! # Primary Usage
//!
//! ```ignore
//! use clockplan::{BackendKind, ClockChip, ClockChipSpec, Converter, System};
//!
//! let clock = ClockChip::new(ClockChipSpec::from_json(record)?, 125_000_000i64)?;
//! let mut system = System::new(clock, BackendKind::Finite);
//! system.add_converter(Converter::new("adc", converter_spec, 1_000_000_000i64, params)?)?;
//! let config = system.run()?;
//! println!("{}", config.to_json()?);
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Rationals, domains, expressions, models and errors
//! - [`solver`] - Local-search and finite-domain backends
//! - [`jesd`] - JESD204B/C link-rate algebra
//! - [`device`] - Contributor contract and the generic device roles
//! - [`system`] - Composition, solve and extraction
//! - [`search`] - Brute-force divider enumeration

pub mod core;
pub mod device;
pub mod jesd;
pub mod search;
pub mod solver;
pub mod system;

pub use core::{
    BackendKind, Domain, ErrorKind, Expr, Model, PlanError, PlanResult, Ratio, SolvePolicy, Stage,
};
pub use device::{
    ClockChip, ClockChipSpec, ClockSource, Converter, ConverterSpec, DeviceContributor,
    ExternalPll, Fpga, FpgaSpec, PllSpec,
};
pub use jesd::{Encoding, JesdClass, JesdLink, LinkParams};
pub use solver::Solution;
pub use system::{Binding, ConfigValue, Configuration, System, SystemOptions, SystemState};
