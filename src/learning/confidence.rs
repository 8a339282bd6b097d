// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Confidence curve mapping sample counts to rule confidence

use serde::{Deserialize, Serialize};

/// Step-then-asymptotic confidence curve. Confidence never decreases as
/// samples accumulate and is capped below 1.0. The breakpoints are
/// configuration, not law; the defaults are the compatible behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfidencePolicy {
    #[serde(default = "default_low_samples")]
    pub low_samples: u32,
    #[serde(default = "default_mid_samples")]
    pub mid_samples: u32,
    #[serde(default = "default_high_samples")]
    pub high_samples: u32,

    #[serde(default = "default_low")]
    pub low: f64,
    #[serde(default = "default_mid")]
    pub mid: f64,
    #[serde(default = "default_high")]
    pub high: f64,
    #[serde(default = "default_cap")]
    pub cap: f64,

    /// Samples per unit of confidence gained past the high breakpoint
    #[serde(default = "default_growth_divisor")]
    pub growth_divisor: f64,
}

fn default_low_samples() -> u32 { 10 }
fn default_mid_samples() -> u32 { 50 }
fn default_high_samples() -> u32 { 100 }
fn default_low() -> f64 { 0.3 }
fn default_mid() -> f64 { 0.5 }
fn default_high() -> f64 { 0.7 }
fn default_cap() -> f64 { 0.9 }
fn default_growth_divisor() -> f64 { 1000.0 }

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            low_samples: default_low_samples(),
            mid_samples: default_mid_samples(),
            high_samples: default_high_samples(),
            low: default_low(),
            mid: default_mid(),
            high: default_high(),
            cap: default_cap(),
            growth_divisor: default_growth_divisor(),
        }
    }
}

impl ConfidencePolicy {
    /// Confidence for a rule with `sample_count` reinforcements.
    ///
    /// Only meaningful for rules that exist; an absent rule yields no
    /// suggestion rather than a floor-confidence one.
    pub fn confidence(&self, sample_count: u32) -> f64 {
        if sample_count < self.low_samples {
            self.low
        } else if sample_count < self.mid_samples {
            self.mid
        } else if sample_count < self.high_samples {
            self.high
        } else {
            let extra = (sample_count - self.high_samples) as f64 / self.growth_divisor;
            (self.high + extra).min(self.cap)
        }
    }
}
