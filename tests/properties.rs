//! Property tests for domain encoding and the JESD link algebra.

use clockplan::core::{Model, VarKind};
use clockplan::{BackendKind, Domain, Encoding, JesdClass, JesdLink, LinkParams, Ratio, SolvePolicy};
use proptest::prelude::*;

fn link(l: i64, m: i64, np: i64, s: i64, sample: i64) -> Option<JesdLink> {
    let octets = s * m * np;
    if octets % (8 * l) != 0 {
        return None;
    }
    let params = LinkParams {
        l,
        m,
        f: octets / (8 * l),
        s: Some(s),
        k: 32,
        n: np,
        np,
        hd: 0,
        cs: 0,
        encoding: Encoding::B8b10b,
    };
    JesdLink::new(JesdClass::Jesd204b, params, Ratio::from_int(sample)).ok()
}

proptest! {
    #[test]
    fn local_contiguous_domain_keeps_exact_bounds(lo in 1i64..1_000, span in 1i64..500, pick in 0i64..500) {
        let hi = lo + span;
        let floor = lo + pick % (span + 1);
        let mut model = Model::new(BackendKind::Local);
        let x = model.new_variable(&Domain::range("x", lo, hi, 1).unwrap()).unwrap();
        prop_assert_eq!(&model.vars()[0].kind, &VarKind::Integer { lb: lo, ub: hi });
        model.equation("test", [x.at_least(floor)]).unwrap();
        let sol = model.solve(&SolvePolicy::default()).unwrap();
        let v = sol.extract_int(&x).unwrap();
        prop_assert!(v >= floor && v <= hi);
    }

    #[test]
    fn local_small_set_stays_in_domain(values in proptest::collection::btree_set(1i64..100_000, 2..=5), pick in 0usize..5) {
        let values: Vec<i64> = values.into_iter().collect();
        let target = values[pick % values.len()];
        let domain = Domain::set("m1", values.iter().copied()).unwrap();
        let mut model = Model::new(BackendKind::Local);
        let x = model.new_variable(&domain).unwrap();
        model.equation("test", [x.eq_to(target)]).unwrap();
        let sol = model.solve(&SolvePolicy::default()).unwrap();
        prop_assert_eq!(sol.extract_int(&x).unwrap(), target);
    }

    #[test]
    fn finite_solution_is_domain_member(values in proptest::collection::btree_set(1i64..10_000, 1..12), pick in 0usize..12) {
        let values: Vec<i64> = values.into_iter().collect();
        let floor = values[pick % values.len()];
        let domain = Domain::set("n", values.iter().copied()).unwrap();
        let mut model = Model::new(BackendKind::Finite);
        let x = model.new_variable(&domain).unwrap();
        model.equation("test", [x.at_least(floor)]).unwrap();
        let sol = model.solve(&SolvePolicy::default()).unwrap();
        let v = sol.extract_int(&x).unwrap();
        prop_assert!(domain.contains(v));
        prop_assert!(v >= floor);
    }

    #[test]
    fn jesd_bit_clock_recomputes_from_configuration(
        l in prop::sample::select(vec![1i64, 2, 4, 8]),
        m in prop::sample::select(vec![1i64, 2, 4]),
        np in prop::sample::select(vec![8i64, 16]),
        s in prop::sample::select(vec![1i64, 2]),
        mhz in 50i64..1_000,
    ) {
        let link = link(l, m, np, s, mhz * 1_000_000);
        prop_assume!(link.is_some());
        let cfg = link.unwrap().configuration().unwrap();

        let encoding: Encoding = serde_json::from_value(
            serde_json::Value::String(cfg.text(&["encoding"]).unwrap().to_string()),
        )
        .unwrap();
        let frame = cfg.rate(&["frame_clock"]).unwrap();
        let factor = cfg.int(&["S"]).unwrap()
            * cfg.int(&["M"]).unwrap()
            * cfg.int(&["Np"]).unwrap()
            * encoding.d();
        let bit = frame
            .mul_int(factor)
            .and_then(|v| v.div_int(encoding.n() * cfg.int(&["L"]).unwrap()))
            .unwrap();
        prop_assert_eq!(Some(bit), cfg.rate(&["bit_clock"]));
        let expected = Ratio::from_int(mhz * 1_000_000 * m * np * 10)
            .div_int(8 * l)
            .unwrap();
        prop_assert_eq!(bit, expected);
    }
}
