//! Core data types shared by every stage of the monitor.
//!
//! All fee values are integers in wei per unit of gas. Conversion to gwei
//! happens only when an alert is rendered or a log line is written.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wei in one gwei.
pub const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Convert a wei amount to gwei for display.
pub fn wei_to_gwei(wei: u64) -> f64 {
    wei as f64 / WEI_PER_GWEI as f64
}

/// Convert a gwei amount (as configured by operators) to wei.
pub fn gwei_to_wei(gwei: f64) -> u64 {
    (gwei * WEI_PER_GWEI as f64).round() as u64
}

/// The percentile set requested from `eth_feeHistory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Percentile {
    P10,
    P25,
    P50,
    P75,
    P90,
}

impl Percentile {
    /// All percentiles, in the order the RPC returns them.
    pub const ALL: [Percentile; 5] = [
        Percentile::P10,
        Percentile::P25,
        Percentile::P50,
        Percentile::P75,
        Percentile::P90,
    ];

    /// Numeric value passed to `eth_feeHistory`.
    pub fn value(self) -> u8 {
        match self {
            Percentile::P10 => 10,
            Percentile::P25 => 25,
            Percentile::P50 => 50,
            Percentile::P75 => 75,
            Percentile::P90 => 90,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Percentile::P10 => "p10",
            Percentile::P25 => "p25",
            Percentile::P50 => "p50",
            Percentile::P75 => "p75",
            Percentile::P90 => "p90",
        }
    }
}

impl fmt::Display for Percentile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Percentile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p10" | "10" => Ok(Percentile::P10),
            "p25" | "25" => Ok(Percentile::P25),
            "p50" | "50" => Ok(Percentile::P50),
            "p75" | "75" => Ok(Percentile::P75),
            "p90" | "90" => Ok(Percentile::P90),
            other => Err(format!("Invalid percentile '{}'", other)),
        }
    }
}

/// One fee value per percentile, in wei per gas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercentileFees {
    pub p10: u64,
    pub p25: u64,
    pub p50: u64,
    pub p75: u64,
    pub p90: u64,
}

impl PercentileFees {
    pub fn get(&self, percentile: Percentile) -> u64 {
        match percentile {
            Percentile::P10 => self.p10,
            Percentile::P25 => self.p25,
            Percentile::P50 => self.p50,
            Percentile::P75 => self.p75,
            Percentile::P90 => self.p90,
        }
    }

    fn slot(&mut self, percentile: Percentile) -> &mut u64 {
        match percentile {
            Percentile::P10 => &mut self.p10,
            Percentile::P25 => &mut self.p25,
            Percentile::P50 => &mut self.p50,
            Percentile::P75 => &mut self.p75,
            Percentile::P90 => &mut self.p90,
        }
    }

    pub fn set(&mut self, percentile: Percentile, value: u64) {
        *self.slot(percentile) = value;
    }

    /// Build from a function evaluated once per percentile.
    pub fn from_fn(mut f: impl FnMut(Percentile) -> u64) -> Self {
        let mut fees = Self::default();
        for percentile in Percentile::ALL {
            fees.set(percentile, f(percentile));
        }
        fees
    }
}

/// A fully-formed fee reading for one network at one point in time.
///
/// Constructed once by the fee calculator and never mutated afterwards.
/// `base_fee` and `priority_fees` are L2-only on rollups; `total_fees`
/// additionally include `l1_surcharge` when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasSample {
    pub network: String,
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
    pub base_fee: u64,
    pub priority_fees: PercentileFees,
    pub total_fees: PercentileFees,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l1_surcharge: Option<u64>,
}

impl GasSample {
    /// Total fee at `percentile`, optionally without the L1 surcharge.
    pub fn fee_at(&self, percentile: Percentile, include_l1_surcharge: bool) -> u64 {
        let total = self.total_fees.get(percentile);
        if include_l1_surcharge {
            total
        } else {
            total.saturating_sub(self.l1_surcharge.unwrap_or(0))
        }
    }
}

/// Alert severity, ordered from least to most severe.
///
/// The derived `Ord` is the severity order: a greater level is "more
/// severe" and bypasses the cooldown of a lesser one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    UltraLow,
    Low,
    Medium,
    High,
    UltraHigh,
}

impl AlertLevel {
    /// All levels from least to most severe.
    pub const ALL: [AlertLevel; 5] = [
        AlertLevel::UltraLow,
        AlertLevel::Low,
        AlertLevel::Medium,
        AlertLevel::High,
        AlertLevel::UltraHigh,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::UltraLow => "ultra_low",
            AlertLevel::Low => "low",
            AlertLevel::Medium => "medium",
            AlertLevel::High => "high",
            AlertLevel::UltraHigh => "ultra_high",
        }
    }

    /// Human-readable advice attached to every alert of this level.
    pub fn recommendation(self) -> &'static str {
        match self {
            AlertLevel::UltraLow => "Great time for transactions!",
            AlertLevel::Low => "Good time for transactions",
            AlertLevel::Medium => "Moderate fees, you can wait",
            AlertLevel::High => "High fees, avoid if possible",
            AlertLevel::UltraHigh => "Very high fees, please wait",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ultra_low" => Ok(AlertLevel::UltraLow),
            "low" => Ok(AlertLevel::Low),
            "medium" => Ok(AlertLevel::Medium),
            "high" => Ok(AlertLevel::High),
            "ultra_high" => Ok(AlertLevel::UltraHigh),
            other => Err(format!("Invalid alert level '{}'", other)),
        }
    }
}

/// A one-shot alert produced by the alert engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub network: String,
    pub level: AlertLevel,
    /// Fee value (wei per gas) compared against the threshold.
    pub fee: u64,
    /// Threshold (wei per gas) the fee was at or below.
    pub threshold: u64,
    pub percentile: Percentile,
    pub sample: GasSample,
    pub generated_at: DateTime<Utc>,
}
