// This module provides exhaustive enumeration over the same capability records the solver
// contributors use. It does not build a model: it walks the divider domains directly and
// keeps the settings that land every rate exactly. It serves as a cross-check for the solver
// backends and as a quick answer for small single-device questions. Nothing here returns an
// error; candidates whose arithmetic overflows or that leave a window are skipped, and an
// empty result means nothing was found.

//! Brute-force divider search.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::core::domain::Domain;
use crate::core::ratio::Ratio;
use crate::device::{ClockChipSpec, FpgaSpec};

/// One clock-generator setting that produces every requested rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DividerSet {
    pub doubler: i64,
    pub r2: i64,
    pub n2: i64,
    pub m1: i64,
    pub vco: Ratio,
    /// Output divider per requested rate, in request order.
    pub dividers: Vec<i64>,
}

/// One transceiver PLL setting that reaches a lane rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PllCandidate {
    /// Transceiver PLL variant name.
    pub pll: String,
    pub band: Option<String>,
    pub m: i64,
    pub feedback: Vec<i64>,
    pub d: i64,
    pub vco: Ratio,
}

/// Generator settings producing all of `rates` from `reference`, smallest `r2` first.
pub fn find_clock_dividers(
    spec: &ClockChipSpec,
    reference: Ratio,
    rates: &[Ratio],
    limit: usize,
) -> Vec<DividerSet> {
    let mut found = Vec::new();
    if limit == 0 || rates.iter().any(|r| !r.is_positive()) {
        return found;
    }
    let prescalers = spec.vco_divider.as_ref().map_or_else(|| vec![1], |d| d.to_vec());
    for r2 in spec.reference_divider.iter() {
        for doubler in spec.reference_doubler.iter() {
            let Some(pfd) = reference.mul_int(doubler).and_then(|v| v.div_int(r2)) else {
                continue;
            };
            if pfd > spec.pfd_max {
                continue;
            }
            for n2 in spec.feedback_divider.iter() {
                let Some(vco) = pfd.mul_int(n2) else {
                    continue;
                };
                if vco < spec.vco_min || vco > spec.vco_max {
                    continue;
                }
                for &m1 in &prescalers {
                    let Some(dividers) = output_dividers(spec, vco, m1, rates) else {
                        continue;
                    };
                    trace!("r2={r2} n2={n2} m1={m1}: vco {vco}, dividers {dividers:?}");
                    found.push(DividerSet {
                        doubler,
                        r2,
                        n2,
                        m1,
                        vco,
                        dividers,
                    });
                    if found.len() >= limit {
                        return found;
                    }
                }
            }
        }
    }
    debug!("{}: {} divider sets for {} rates", spec.name, found.len(), rates.len());
    found
}

fn output_dividers(spec: &ClockChipSpec, vco: Ratio, m1: i64, rates: &[Ratio]) -> Option<Vec<i64>> {
    let channel = vco.div_int(m1)?;
    rates
        .iter()
        .map(|rate| {
            let d = channel.checked_div(rate)?.to_integer()?;
            spec.output_divider.contains(d).then_some(d)
        })
        .collect()
}

/// Every transceiver PLL setting reaching `bit_clock` from `ref_clock`, in variant order.
pub fn find_transceiver_pll(spec: &FpgaSpec, ref_clock: Ratio, bit_clock: Ratio) -> Vec<PllCandidate> {
    let mut found = Vec::new();
    if ref_clock < spec.reference_min || ref_clock > spec.reference_max {
        debug!("{}: reference {ref_clock} outside the transceiver window", spec.part);
        return found;
    }
    let forced = spec.force_pll.as_deref();
    for pll in spec.transceivers.iter().filter(|t| forced.map_or(true, |f| f == t.name)) {
        let Some(target) = bit_clock.div_int(pll.rate_multiplier) else {
            continue;
        };
        for feedback in feedback_products(&pll.feedback_dividers) {
            let product = feedback.iter().try_fold(1i64, |acc, v| acc.checked_mul(*v));
            let Some(product) = product else {
                continue;
            };
            for m in pll.reference_divider.iter() {
                let Some(vco) = ref_clock.mul_int(product).and_then(|v| v.div_int(m)) else {
                    continue;
                };
                if vco < pll.vco_min || vco > pll.vco_max {
                    continue;
                }
                for d in pll.output_divider.iter() {
                    if target.mul_int(d) == Some(vco) {
                        found.push(PllCandidate {
                            pll: pll.name.clone(),
                            band: pll.band.clone(),
                            m,
                            feedback: feedback.clone(),
                            d,
                            vco,
                        });
                    }
                }
            }
        }
    }
    debug!("{}: {} transceiver settings for {bit_clock}", spec.part, found.len());
    found
}

/// Cartesian product of the feedback divider domains.
fn feedback_products(domains: &[Domain]) -> Vec<Vec<i64>> {
    domains.iter().fold(vec![Vec::new()], |acc, domain| {
        acc.iter()
            .flat_map(|prefix| {
                domain.iter().map(move |v| {
                    let mut next = prefix.clone();
                    next.push(v);
                    next
                })
            })
            .collect()
    })
}

/// First `lmfc / div` present in `references`, doubling `div` from `min_div` while below `max_div`.
pub fn determine_sysref(
    lmfc: Ratio,
    references: &[Ratio],
    min_div: i64,
    max_div: i64,
) -> Option<Ratio> {
    let mut div = min_div;
    while div > 0 && div < max_div {
        let rate = lmfc.div_int(div)?;
        if references.contains(&rate) {
            return Some(rate);
        }
        div = div.checked_mul(2)?;
    }
    None
}
