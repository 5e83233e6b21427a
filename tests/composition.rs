// These tests compose whole systems: a clock generator feeding a converter and an FPGA, with
// and without an inline PLL. They check the unification law through the binding ledger (every
// declared input has exactly one equation tying it to a producer output), the orchestrator's
// state machine, rejection of expressions from another model, the FPGA lane budget, common
// SYSREF routing, the selected transceiver PLL and the JSON export of the merged result. The
// local-search backend is run through the orchestrator too, with a retry over seeds.

//! End-to-end composition tests.

mod common;

use std::collections::HashMap;

use clockplan::core::{ErrorKind, Model, ObjectiveMode, Sense, Stage};
use clockplan::device::{DeviceClockRelation, DeviceContributor, Fpga, RefClockConstraint};
use clockplan::search::{determine_sysref, find_transceiver_pll};
use clockplan::system::COMMON_SYSREF;
use clockplan::{
    BackendKind, Configuration, Domain, PlanError, Ratio, SolvePolicy, System, SystemOptions,
    SystemState,
};

use common::*;

fn full_system() -> System {
    let mut system = System::new(ad9523(), BackendKind::Finite);
    system.set_fpga(zc706()).unwrap();
    system.add_converter(ad9680("adc")).unwrap();
    system
}

/// Every declared port of every consumer is bound exactly once, by a constraint that exists.
fn check_unification(system: &System, consumers: &[(&str, Vec<String>)]) {
    let model = system.model().unwrap();
    let mut seen: HashMap<(&str, &str), usize> = HashMap::new();
    for b in system.bindings() {
        *seen.entry((b.consumer.as_str(), b.clock.as_str())).or_default() += 1;
        let c = &model.constraints()[b.constraint];
        assert_eq!(c.owner, b.consumer);
    }
    let declared: usize = consumers.iter().map(|(_, ports)| ports.len()).sum();
    assert_eq!(system.bindings().len(), declared);
    for (consumer, ports) in consumers {
        for port in ports {
            assert_eq!(seen.get(&(*consumer, port.as_str())), Some(&1), "{consumer}.{port}");
        }
    }
}

fn ports(contributor: &dyn DeviceContributor) -> Vec<String> {
    contributor
        .required_input_clocks()
        .into_iter()
        .map(|p| p.name)
        .collect()
}

#[test]
fn test_full_system_unification() {
    init_logging();
    let mut system = full_system();
    let adc_ports = ports(&ad9680("adc"));
    let mut fpga = zc706();
    fpga.connect(&ad9680("adc")).unwrap();
    let fpga_ports = ports(&fpga);
    system.compose().unwrap();
    assert_eq!(system.state(), SystemState::Composed);
    check_unification(&system, &[("adc", adc_ports), ("fpga", fpga_ports)]);
    assert!(system.bindings().iter().all(|b| b.producer == "ad9523_1"));
}

#[test]
fn test_full_system_solve() {
    init_logging();
    let mut system = full_system();
    let cfg = system.run().unwrap();
    assert_eq!(system.state(), SystemState::Extracted);
    assert!(system.model().is_none());
    let keys: Vec<&str> = cfg.keys().collect();
    assert_eq!(keys, vec!["clock", "converter_adc", "fpga_adc", "jesd_adc"]);

    // Generator
    assert_eq!(cfg.int(&["clock", "r2"]), Some(1));
    assert_eq!(cfg.int(&["clock", "vco"]), Some(3_000_000_000));
    assert_eq!(cfg.int(&["clock", "m1"]), Some(3));

    // Converter: the slowest SYSREF the generator reaches is 15.625 MHz / 9.
    let reference = cfg.rate(&["converter_adc", "reference_clock"]).unwrap();
    let divider = cfg.int(&["converter_adc", "input_divider"]).unwrap();
    assert_eq!(r(SAMPLE_RATE).mul_int(divider), Some(reference));
    assert!(reference == r(500_000_000) || reference == r(1_000_000_000));
    assert_eq!(cfg.int(&["converter_adc", "sysref_divisor"]), Some(3));
    assert_eq!(
        cfg.rate(&["converter_adc", "sysref"]),
        Ratio::new(15_625_000, 9)
    );
    assert_eq!(
        cfg.int(&["clock", "output_clocks", "adc_sysref", "divider"]),
        Some(576)
    );

    // JESD
    assert_eq!(cfg.int(&["jesd_adc", "bit_clock"]), Some(5_000_000_000));
    assert_eq!(cfg.int(&["jesd_adc", "multiframe_clock"]), Some(15_625_000));

    // FPGA
    let pll = cfg.text(&["fpga_adc", "type"]).unwrap();
    assert!(pll == "CPLL" || pll == "QPLL", "unexpected PLL {pll}");
    let vco = cfg.rate(&["fpga_adc", "vco"]).unwrap();
    let d = cfg.int(&["fpga_adc", "d"]).unwrap();
    let mult = if pll == "CPLL" { 2 } else { 1 };
    assert_eq!(r(5_000_000_000).mul_int(d), vco.mul_int(mult));
    let reference = cfg.rate(&["fpga_adc", "reference_clock"]).unwrap();
    let candidates = find_transceiver_pll(
        &clockplan::FpgaSpec::from_json(&load("zc706.json")).unwrap(),
        reference,
        r(5_000_000_000),
    );
    assert!(candidates.iter().any(|c| c.pll == pll && c.vco == vco && c.d == d));
    assert_eq!(cfg.int(&["fpga_adc", "link_in_clock"]), Some(125_000_000));
}

#[test]
fn test_full_system_json_export() {
    init_logging();
    let mut system = full_system();
    let cfg = system.run().unwrap();
    let json = cfg.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(value["clock"]["vco"].is_u64());
    assert_eq!(value["clock"]["vco"].as_u64(), Some(3_000_000_000));
    assert!(value["converter_adc"]["sysref"].is_f64());
    assert_eq!(value["jesd_adc"]["encoding"], "8b10b");
    let back: Configuration = serde_json::from_str(&json).unwrap();
    assert_eq!(back.int(&["clock", "r2"]), Some(1));
}

#[test]
fn test_sysref_without_objective() {
    init_logging();
    let mut system = System::new(ad9523(), BackendKind::Finite).with_options(SystemOptions {
        minimize_sysref: false,
        use_common_sysref: false,
    });
    system.add_converter(ad9680("adc")).unwrap();
    let cfg = system.run().unwrap();
    let sysref = cfg.rate(&["converter_adc", "sysref"]).unwrap();
    let lmfc = cfg.rate(&["jesd_adc", "multiframe_clock"]).unwrap();
    let k = cfg.int(&["converter_adc", "sysref_divisor"]).unwrap();
    assert_eq!(lmfc.div_int(k * k), Some(sysref));
    // The doubling search finds a SYSREF among the generator's reachable rates.
    let reachable: Vec<Ratio> = (1..=1023).filter_map(|d| r(1_000_000_000).div_int(d)).collect();
    assert_eq!(determine_sysref(lmfc, &reachable, 1, 1024), Some(lmfc));
}

#[test]
fn test_state_machine_misuse() {
    init_logging();
    let mut system = full_system();
    assert!(matches!(
        system.extract(),
        Err(PlanError::InvalidState { action: "extract", .. })
    ));
    system.compose().unwrap();
    let err = system.compose().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Composition);
    assert_eq!(system.state(), SystemState::Composed);
    system.solve().unwrap();
    assert!(system.solve().is_err());
    system.extract().unwrap();
    assert_eq!(system.state(), SystemState::Extracted);
    assert!(matches!(system.extract(), Err(PlanError::InvalidState { .. })));
    assert!(matches!(system.run(), Err(PlanError::InvalidState { .. })));
}

#[test]
fn test_failed_is_terminal() {
    init_logging();
    let mut gen = ad9523_spec();
    gen.output_channels = 1;
    let clock = clockplan::ClockChip::new(gen, REFERENCE).unwrap();
    let mut system = System::new(clock, BackendKind::Finite);
    system.add_converter(ad9680("adc")).unwrap();
    let err = system.compose().unwrap_err();
    assert!(matches!(err.root(), PlanError::OutputsExhausted { .. }));
    assert_eq!(err.culprit(), Some("adc"));
    assert_eq!(system.state(), SystemState::Failed);
    assert!(system.bindings().is_empty());
    assert!(matches!(system.compose(), Err(PlanError::InvalidState { .. })));
}

#[test]
fn test_solve_failure_names_contributor() {
    init_logging();
    let mut spec = ad9680_spec();
    // No input divider reaches a rate the generator can produce.
    spec.clocking = clockplan::device::Clocking::Direct {
        input_divider: Domain::set("input_divider", [7]).unwrap(),
        input_clock_max: None,
    };
    let conv = clockplan::Converter::new("adc", spec, SAMPLE_RATE, link_params(4)).unwrap();
    let mut system = System::new(ad9523(), BackendKind::Finite);
    system.add_converter(conv).unwrap();
    system.compose().unwrap();
    let err = system.solve().unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Solved));
    assert_eq!(err.kind(), ErrorKind::Solve);
    assert!(err.culprit().is_some());
    assert_eq!(system.state(), SystemState::Failed);
    assert!(system.model().is_none());
}

#[test]
fn test_model_mismatch() {
    init_logging();
    let mut a = Model::new(BackendKind::Finite);
    let mut b = Model::new(BackendKind::Finite);
    let x = a.new_variable(&Domain::range("x", 1, 4, 1).unwrap()).unwrap();
    let y = b.new_variable(&Domain::range("y", 1, 4, 1).unwrap()).unwrap();
    let err = b.equation("test", [y.eq_to(&x + 1i64)]).unwrap_err();
    assert!(matches!(err, PlanError::ModelMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::Composition);

    let mut system = full_system();
    system.run().unwrap();
    let foreign = a.solve(&SolvePolicy::default()).unwrap();
    let adc = &system.converters()[0];
    assert!(matches!(
        adc.extract(&foreign),
        Err(PlanError::ModelMismatch { .. })
    ));
}

#[test]
fn test_lane_budget() {
    init_logging();
    let mut system = System::new(ad9523(), BackendKind::Finite);
    system.set_fpga(zc706()).unwrap();
    system.add_converter(ad9680("adc0")).unwrap();
    system.add_converter(ad9680("adc1")).unwrap();
    let err = system.add_converter(ad9680("adc2")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structural);
    assert_eq!(system.converters().len(), 2);

    // Connecting after the fact hits the same budget.
    let mut late = System::new(ad9523(), BackendKind::Finite);
    for name in ["adc0", "adc1", "adc2"] {
        late.add_converter(ad9680(name)).unwrap();
    }
    assert!(matches!(
        late.set_fpga(zc706()),
        Err(PlanError::InvalidConfig { .. })
    ));
}

#[test]
fn test_lane_budget_per_direction() {
    init_logging();
    let mut system = System::new(ad9523(), BackendKind::Finite);
    system.set_fpga(zc706()).unwrap();
    system.add_converter(ad9680("adc0")).unwrap();
    system.add_converter(ad9680("adc1")).unwrap();
    // Receive lanes are full; transmit lanes are a separate budget.
    system.add_converter(ad9680_as_dac("dac0")).unwrap();
    system.add_converter(ad9680_as_dac("dac1")).unwrap();
    let err = system.add_converter(ad9680_as_dac("dac2")).unwrap_err();
    assert!(matches!(err, PlanError::InvalidConfig { .. }));
    assert_eq!(system.converters().len(), 4);
}

#[test]
fn test_objectives_are_lexicographic() {
    init_logging();
    let mut system = full_system();
    system.compose().unwrap();
    let model = system.model().unwrap();
    assert_eq!(model.objective_mode(), ObjectiveMode::Lexicographic);
    let owners: Vec<&str> = model.objectives().iter().map(|o| o.owner.as_str()).collect();
    assert_eq!(owners, ["ad9523_1", "adc"]);
    assert!(model.objectives().iter().all(|o| o.sense == Sense::Minimize));
    let first = model.objectives()[0].expr.as_var().unwrap();
    assert!(model.var_name(first).ends_with("r2"));

    let mut single = System::new(ad9523(), BackendKind::Finite).with_options(SystemOptions {
        minimize_sysref: false,
        use_common_sysref: false,
    });
    single.add_converter(ad9680("adc")).unwrap();
    single.compose().unwrap();
    let model = single.model().unwrap();
    assert_eq!(model.objective_mode(), ObjectiveMode::Single);
    assert_eq!(model.objectives().len(), 1);
}

#[test]
fn test_local_backend_runs_system() {
    init_logging();
    let mut solved = 0;
    for seed in 0..5 {
        let mut system = System::new(ad9523_contiguous(), BackendKind::Local)
            .with_policy(SolvePolicy::default().with_seed(seed));
        system.add_converter(ad9680("adc")).unwrap();
        let cfg = match system.run() {
            Ok(cfg) => cfg,
            Err(e) => {
                assert!(e.is_retryable(), "seed {seed}: {e}");
                continue;
            }
        };
        solved += 1;
        assert_eq!(system.state(), SystemState::Extracted);
        let reference = cfg.rate(&["converter_adc", "reference_clock"]).unwrap();
        let divider = cfg.int(&["converter_adc", "input_divider"]).unwrap();
        assert_eq!(r(SAMPLE_RATE).mul_int(divider), Some(reference));
        assert_eq!(
            cfg.rate(&["clock", "output_clocks", "adc_ref_clk", "rate"]),
            Some(reference)
        );
        let vco = cfg.rate(&["clock", "vco"]).unwrap();
        let n2 = cfg.int(&["clock", "n2"]).unwrap();
        let r2 = cfg.int(&["clock", "r2"]).unwrap();
        assert_eq!(r(REFERENCE).mul_int(n2).and_then(|v| v.div_int(r2)), Some(vco));
        let lmfc = cfg.rate(&["jesd_adc", "multiframe_clock"]).unwrap();
        let k = cfg.int(&["converter_adc", "sysref_divisor"]).unwrap();
        assert_eq!(lmfc.div_int(k * k), cfg.rate(&["converter_adc", "sysref"]));
    }
    assert!(solved > 0, "no seed converged");
}

#[test]
fn test_fpga_reference_tied_to_link_clocks() {
    init_logging();
    let mut spec = zc706_spec();
    spec.ref_clock_constraint = RefClockConstraint::CoreClock;
    spec.device_clock_relation = DeviceClockRelation::RefClockEqDeviceClock;
    let mut fpga = Fpga::new("fpga", spec).unwrap();
    fpga.force_pll("adc", "QPLL").unwrap();
    let mut system = System::new(ad9523(), BackendKind::Finite);
    system.set_fpga(fpga).unwrap();
    system.add_converter(ad9680("adc")).unwrap();
    let cfg = system.run().unwrap();
    let core_clock = r(5_000_000_000).div_int(40);
    assert_eq!(cfg.rate(&["fpga_adc", "reference_clock"]), core_clock);
    assert_eq!(cfg.rate(&["fpga_adc", "link_out_clock"]), core_clock);
    assert_eq!(cfg.text(&["fpga_adc", "type"]), Some("QPLL"));
    assert_eq!(cfg.rate(&["fpga_adc", "vco"]), Some(r(10_000_000_000)));
    assert_eq!(
        cfg.rate(&["clock", "output_clocks", "fpga_adc_ref_clk", "rate"]),
        core_clock
    );
}

#[test]
fn test_common_sysref() {
    init_logging();
    let options = SystemOptions {
        use_common_sysref: true,
        ..SystemOptions::default()
    };
    let mut system = System::new(ad9523(), BackendKind::Finite).with_options(options);
    system.add_converter(ad9680("adc0")).unwrap();
    system.add_converter(ad9680("adc1")).unwrap();
    system.compose().unwrap();
    let sysref: Vec<_> = system
        .bindings()
        .iter()
        .filter(|b| b.clock.ends_with("_sysref"))
        .collect();
    assert_eq!(sysref.len(), 2);
    assert!(sysref.iter().all(|b| b.output == COMMON_SYSREF));
    system.solve().unwrap();
    let cfg = system.extract().unwrap();
    assert_eq!(
        cfg.rate(&["converter_adc0", "sysref"]),
        cfg.rate(&["converter_adc1", "sysref"])
    );
    let outputs = cfg.map(&["clock", "output_clocks"]).unwrap();
    assert_eq!(outputs.len(), 3);
    assert!(outputs.get(COMMON_SYSREF).is_some());
}

#[test]
fn test_common_sysref_requires_one_lmfc() {
    init_logging();
    let options = SystemOptions {
        use_common_sysref: true,
        ..SystemOptions::default()
    };
    let mut other = link_params(4);
    other.k = 16;
    let conv = clockplan::Converter::new("adc1", ad9680_spec(), SAMPLE_RATE, other).unwrap();
    let mut system = System::new(ad9523(), BackendKind::Finite).with_options(options);
    system.add_converter(ad9680("adc0")).unwrap();
    system.add_converter(conv).unwrap();
    let err = system.compose().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structural);
    assert_eq!(err.stage(), Some(Stage::Composed));
}

#[test]
fn test_inline_pll() {
    init_logging();
    let mut system = System::new(ad9523(), BackendKind::Finite);
    system.add_converter(ad9680("adc")).unwrap();
    system.add_pll_inline(adf4371("pll"), "adc").unwrap();
    system.compose().unwrap();
    let by_clock: HashMap<&str, &str> = system
        .bindings()
        .iter()
        .map(|b| (b.clock.as_str(), b.producer.as_str()))
        .collect();
    assert_eq!(by_clock.get("adc_ref_clk"), Some(&"pll"));
    assert_eq!(by_clock.get("adc_sysref"), Some(&"ad9523_1"));
    assert_eq!(by_clock.get("pll_ref_clk"), Some(&"ad9523_1"));

    system.solve().unwrap();
    let cfg = system.extract().unwrap();
    let vco = cfg.rate(&["pll_pll", "vco"]).unwrap();
    let d = cfg.int(&["pll_pll", "output_clocks", "adc_ref_clk", "divider"]).unwrap();
    let reference = cfg.rate(&["converter_adc", "reference_clock"]).unwrap();
    assert_eq!(vco.div_int(d), Some(reference));
    assert!(vco >= r(4_000_000_000) && vco <= r(8_000_000_000));
    let pll_ref = cfg.rate(&["pll_pll", "reference"]).unwrap();
    assert_eq!(
        cfg.rate(&["clock", "output_clocks", "pll_ref_clk", "rate"]),
        Some(pll_ref)
    );
}

#[test]
fn test_two_producers_are_ambiguous() {
    init_logging();
    let mut system = System::new(ad9523(), BackendKind::Finite);
    system.add_converter(ad9680("adc")).unwrap();
    system.add_pll_inline(adf4371("pll_a"), "adc").unwrap();
    system.add_pll_inline(adf4371("pll_b"), "adc").unwrap();
    let err = system.compose().unwrap_err();
    assert!(matches!(
        err.root(),
        PlanError::AmbiguousClock { first, second, .. } if first == "pll_a" && second == "pll_b"
    ));

    let mut system = System::new(ad9523(), BackendKind::Finite);
    system.add_converter(ad9680("adc")).unwrap();
    assert!(system.add_pll_inline(adf4371("pll"), "dac").is_err());
}
