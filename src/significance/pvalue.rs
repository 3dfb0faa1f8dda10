//! p-values held as `-log10(p)`.
//!
//! Large permutation counts and analytic tests produce p-values far below
//! what a linear `f64` resolves comfortably next to 1.0. Keeping the
//! negative log10 makes small p-values large, well-conditioned numbers and
//! turns correction factors into subtractions.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// `-log10(p)` for a p-value in `(0, 1]`. Always finite and `>= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NegLog10(f64);

impl NegLog10 {
    /// p = 1
    pub const ONE: NegLog10 = NegLog10(0.0);

    /// Convert a linear p-value. Values a hair above 1 from rounding are
    /// clamped; zero, negative, or non-finite input is an overflow error.
    pub fn from_p(p: f64) -> Result<Self> {
        if !p.is_finite() || p <= 0.0 || p > 1.0 + 1e-9 {
            return Err(Error::NumericOverflow(format!("p-value {p} outside (0, 1]")));
        }
        Ok(Self(non_negative(-p.log10())))
    }

    /// Wrap an existing `-log10` value.
    pub fn from_log10(value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(Error::NumericOverflow(format!("-log10(p) value {value} is not representable")));
        }
        Ok(Self(value))
    }

    /// Add-one smoothed empirical p-value `(1 + extreme) / (1 + valid)`.
    /// Its floor is `1 / (valid + 1)`.
    pub fn from_counts(extreme: u32, valid: u32) -> Self {
        let x = (f64::from(valid) + 1.0).log10() - (f64::from(extreme.min(valid)) + 1.0).log10();
        Self(non_negative(x))
    }

    /// Multiply the p-value by `factor >= 1`, capping at p = 1.
    pub fn scaled(self, factor: f64) -> Self {
        Self(non_negative(self.0 - factor.log10()))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Back to a linear p-value.
    pub fn p_value(self) -> f64 {
        10f64.powf(-self.0)
    }

    /// `p <= alpha`
    pub fn is_significant(self, alpha: f64) -> bool {
        self.0 >= -alpha.log10() - 1e-12
    }
}

/// Clamp to `+0.0` (never `-0.0`, which `total_cmp` orders apart).
fn non_negative(x: f64) -> f64 {
    if x > 0.0 { x } else { 0.0 }
}

impl Eq for NegLog10 {}

impl Ord for NegLog10 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for NegLog10 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NegLog10 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}
