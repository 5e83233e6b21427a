//! Exact rational numbers for clock rates and divider ratios.
//!
//! Every rate in a plan is a ratio of integers (a reference in Hz scaled by
//! integer multipliers and dividers), so the engine never compares floats when
//! deciding whether a plan holds. All arithmetic is checked; callers decide
//! how to report overflow.

use std::fmt;

use num_integer::Integer;
use num_rational::Ratio as Rational;
use num_traits::{CheckedAdd, CheckedDiv, CheckedMul, CheckedSub, Signed, Zero};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A reduced fraction `num / den` with `den > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ratio(Rational<i128>);

impl Ratio {
    pub const ZERO: Ratio = Ratio(Rational::new_raw(0, 1));
    pub const ONE: Ratio = Ratio(Rational::new_raw(1, 1));

    /// Build a reduced ratio. Returns `None` for a zero denominator.
    pub fn new(num: i128, den: i128) -> Option<Self> {
        if den == 0 {
            return None;
        }
        Some(Self(Rational::new(num, den)))
    }

    pub const fn from_int(v: i64) -> Self {
        Self(Rational::new_raw(v as i128, 1))
    }

    /// Convert a float that is an exact decimal (e.g. `122.88e6`, `0.5`).
    ///
    /// Values needing more than nine fractional digits are rejected rather
    /// than approximated.
    pub fn from_f64(v: f64) -> Option<Self> {
        if !v.is_finite() || v.abs() > 1e18 {
            return None;
        }
        let mut scale: i128 = 1;
        for _ in 0..=9 {
            let scaled = v * scale as f64;
            let rounded = scaled.round();
            if (scaled - rounded).abs() <= 1e-9 * scaled.abs().max(1.0) {
                return Self::new(rounded as i128, scale);
            }
            scale *= 10;
        }
        None
    }

    pub fn numer(&self) -> i128 {
        *self.0.numer()
    }

    pub fn denom(&self) -> i128 {
        *self.0.denom()
    }

    pub fn is_integer(&self) -> bool {
        self.0.is_integer()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_positive()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// The value as an `i64` when it is integral and in range.
    pub fn to_integer(&self) -> Option<i64> {
        if self.0.is_integer() {
            i64::try_from(self.numer()).ok()
        } else {
            None
        }
    }

    pub fn floor(&self) -> i128 {
        Integer::div_floor(&self.numer(), &self.denom())
    }

    pub fn ceil(&self) -> i128 {
        Integer::div_ceil(&self.numer(), &self.denom())
    }

    pub fn to_f64(&self) -> f64 {
        self.numer() as f64 / self.denom() as f64
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn recip(&self) -> Option<Self> {
        if self.0.is_zero() {
            return None;
        }
        Some(Self(self.0.recip()))
    }

    pub fn checked_add(&self, rhs: &Self) -> Option<Self> {
        self.0.checked_add(&rhs.0).map(Self)
    }

    pub fn checked_sub(&self, rhs: &Self) -> Option<Self> {
        self.0.checked_sub(&rhs.0).map(Self)
    }

    pub fn checked_mul(&self, rhs: &Self) -> Option<Self> {
        self.0.checked_mul(&rhs.0).map(Self)
    }

    pub fn checked_div(&self, rhs: &Self) -> Option<Self> {
        if rhs.is_zero() {
            return None;
        }
        self.0.checked_div(&rhs.0).map(Self)
    }

    pub fn checked_pow(&self, exp: i32) -> Option<Self> {
        let base = if exp < 0 { self.recip()? } else { *self };
        let mut acc = Ratio::ONE;
        for _ in 0..exp.unsigned_abs() {
            acc = acc.checked_mul(&base)?;
        }
        Some(acc)
    }

    pub fn mul_int(&self, v: i64) -> Option<Self> {
        self.checked_mul(&Ratio::from_int(v))
    }

    pub fn div_int(&self, v: i64) -> Option<Self> {
        self.checked_div(&Ratio::from_int(v))
    }
}

impl Default for Ratio {
    fn default() -> Self {
        Ratio::ZERO
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_integer() {
            write!(f, "{}", self.numer())
        } else {
            write!(f, "{}/{}", self.numer(), self.denom())
        }
    }
}

impl From<i64> for Ratio {
    fn from(v: i64) -> Self {
        Ratio::from_int(v)
    }
}

impl From<i32> for Ratio {
    fn from(v: i32) -> Self {
        Ratio::from_int(v as i64)
    }
}

impl From<u32> for Ratio {
    fn from(v: u32) -> Self {
        Ratio::from_int(v as i64)
    }
}

impl Serialize for Ratio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.to_integer() {
            Some(v) => serializer.serialize_i64(v),
            None => serializer.serialize_f64(self.to_f64()),
        }
    }
}

struct RatioVisitor;

impl<'de> Visitor<'de> for RatioVisitor {
    type Value = Ratio;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer, an exact decimal or a \"num/den\" string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Ratio, E> {
        Ok(Ratio::from_int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Ratio, E> {
        Ratio::new(v as i128, 1).ok_or_else(|| E::custom("bad ratio"))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Ratio, E> {
        Ratio::from_f64(v).ok_or_else(|| E::custom(format!("{v} is not an exact decimal")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Ratio, E> {
        let parse = |s: &str| s.trim().parse::<i128>().map_err(E::custom);
        let (n, d) = match v.split_once('/') {
            Some((n, d)) => (parse(n)?, parse(d)?),
            None => (parse(v)?, 1),
        };
        Ratio::new(n, d).ok_or_else(|| E::custom("zero denominator"))
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RatioVisitor)
    }
}
