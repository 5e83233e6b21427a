// This module defines Domain, the immutable description of the legal settings of a divider,
// multiplier or mode selector. A domain is either an inclusive range with a positive stride or
// an explicit sorted set of integers, and always carries a name for diagnostics. Besides
// membership and iteration, a domain reports its Shape (singleton, contiguous, constant
// stride, irregular), which is what the domain encoder dispatches on. Domains are plain data:
// they are cloned freely, reused across models, and deserialized from capability records
// either as {"start", "end", "step"} ranges or as value lists. Overrides narrow a domain with
// restrict(), which rejects any value the original domain does not contain.

//! Legal-value domains.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{PlanError, PlanResult};

/// Allowed values of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DomainValues {
    /// Inclusive range `start..=end` visiting every `step`-th value.
    Range {
        start: i64,
        end: i64,
        #[serde(default = "default_step")]
        step: i64,
    },
    /// Sorted, deduplicated explicit values.
    Set(Vec<i64>),
}

fn default_step() -> i64 {
    1
}

/// Structure of a domain as seen by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Singleton(i64),
    /// Every integer in `min..=max`.
    Contiguous { min: i64, max: i64 },
    /// Arithmetic sequence with a step above one.
    Strided { start: i64, step: i64, len: usize },
    /// Anything else.
    Irregular { len: usize },
}

/// A named set of legal integer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DomainRecord")]
pub struct Domain {
    name: String,
    values: DomainValues,
}

#[derive(Deserialize)]
struct DomainRecord {
    name: String,
    values: DomainValues,
}

impl TryFrom<DomainRecord> for Domain {
    type Error = PlanError;

    fn try_from(record: DomainRecord) -> PlanResult<Self> {
        match record.values {
            DomainValues::Range { start, end, step } => Domain::range(record.name, start, end, step),
            DomainValues::Set(values) => Domain::set(record.name, values),
        }
    }
}

impl Domain {
    /// Inclusive range with a stride.
    pub fn range(name: impl Into<String>, start: i64, end: i64, step: i64) -> PlanResult<Self> {
        let name = name.into();
        if step <= 0 || start > end {
            return Err(PlanError::invalid(
                &name,
                format!("empty range {start}..={end} step {step}"),
            ));
        }
        Ok(Self {
            name,
            values: DomainValues::Range { start, end, step },
        })
    }

    /// Explicit set; duplicates are removed.
    pub fn set(name: impl Into<String>, values: impl IntoIterator<Item = i64>) -> PlanResult<Self> {
        let name = name.into();
        let mut values: Vec<i64> = values.into_iter().collect();
        values.sort_unstable();
        values.dedup();
        if values.is_empty() {
            return Err(PlanError::invalid(&name, "empty value set"));
        }
        Ok(Self {
            name,
            values: DomainValues::Set(values),
        })
    }

    pub fn singleton(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            values: DomainValues::Set(vec![value]),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same values under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: self.values.clone(),
        }
    }

    pub fn values(&self) -> &DomainValues {
        &self.values
    }

    pub fn len(&self) -> usize {
        match &self.values {
            DomainValues::Range { start, end, step } => ((end - start) / step + 1) as usize,
            DomainValues::Set(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn min(&self) -> i64 {
        match &self.values {
            DomainValues::Range { start, .. } => *start,
            DomainValues::Set(v) => v[0],
        }
    }

    pub fn max(&self) -> i64 {
        match &self.values {
            DomainValues::Range { start, end, step } => start + (end - start) / step * step,
            DomainValues::Set(v) => v[v.len() - 1],
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        match &self.values {
            DomainValues::Range { start, end, step } => {
                value >= *start && value <= *end && (value - start) % step == 0
            }
            DomainValues::Set(v) => v.binary_search(&value).is_ok(),
        }
    }

    /// Ascending iterator over every legal value.
    pub fn iter(&self) -> Box<dyn Iterator<Item = i64> + '_> {
        match &self.values {
            DomainValues::Range { start, end, step } => {
                Box::new((*start..=*end).step_by(*step as usize))
            }
            DomainValues::Set(v) => Box::new(v.iter().copied()),
        }
    }

    pub fn to_vec(&self) -> Vec<i64> {
        self.iter().collect()
    }

    pub fn shape(&self) -> Shape {
        match &self.values {
            DomainValues::Range { start, step, .. } => {
                let len = self.len();
                if len == 1 {
                    Shape::Singleton(*start)
                } else if *step == 1 {
                    Shape::Contiguous {
                        min: *start,
                        max: self.max(),
                    }
                } else {
                    Shape::Strided {
                        start: *start,
                        step: *step,
                        len,
                    }
                }
            }
            DomainValues::Set(v) => {
                if v.len() == 1 {
                    return Shape::Singleton(v[0]);
                }
                let step = v[1] - v[0];
                if v.windows(2).all(|w| w[1] - w[0] == step) {
                    if step == 1 {
                        Shape::Contiguous {
                            min: v[0],
                            max: v[v.len() - 1],
                        }
                    } else {
                        Shape::Strided {
                            start: v[0],
                            step,
                            len: v.len(),
                        }
                    }
                } else {
                    Shape::Irregular { len: v.len() }
                }
            }
        }
    }

    /// Narrow to `values`, every one of which must already be legal.
    pub fn restrict(&self, values: impl IntoIterator<Item = i64>) -> PlanResult<Self> {
        let values: Vec<i64> = values.into_iter().collect();
        if let Some(bad) = values.iter().find(|v| !self.contains(**v)) {
            return Err(PlanError::out_of_domain(&self.name, bad));
        }
        Domain::set(self.name.clone(), values)
    }

    /// Fail with `OutOfDomain` unless `value` is legal.
    pub fn check(&self, value: i64) -> PlanResult<()> {
        if self.contains(value) {
            Ok(())
        } else {
            Err(PlanError::out_of_domain(&self.name, value))
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.values {
            DomainValues::Range { start, end, step: 1 } => {
                write!(f, "{}[{start}..={end}]", self.name)
            }
            DomainValues::Range { start, end, step } => {
                write!(f, "{}[{start}..={end} step {step}]", self.name)
            }
            DomainValues::Set(v) if v.len() <= 8 => write!(f, "{}{v:?}", self.name),
            DomainValues::Set(v) => write!(f, "{}{{{} values}}", self.name, v.len()),
        }
    }
}
