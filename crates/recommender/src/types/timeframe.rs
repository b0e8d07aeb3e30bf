//! Evaluation timeframes and their cross-timeframe weighting defaults.
//!
//! Two weighting layers sit on top of the per-timeframe scores: a
//! *conviction* layer that favours longer timeframes for direction, and an
//! *urgency* layer that favours shorter ones for WATCH-level alerts. The
//! defaults below are only seeds; the engine reads both layers from config.

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported analysis timeframes.
///
/// Ordered from shortest to longest; `Ord` follows that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// All timeframes in ascending order (shortest to longest).
    pub const ALL: [Timeframe; 9] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::D1,
    ];

    /// Interval string used on the wire and in config (`"15m"`, `"4h"`).
    #[must_use]
    pub const fn as_interval(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::D1 => "1d",
        }
    }

    #[must_use]
    pub fn from_interval(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tf| tf.as_interval() == s)
    }

    /// Duration in seconds.
    #[must_use]
    pub const fn duration_secs(&self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::M30 => 1800,
            Self::H1 => 3600,
            Self::H2 => 7200,
            Self::H4 => 14400,
            Self::H6 => 21600,
            Self::D1 => 86400,
        }
    }

    /// Recommendation lifetime for this timeframe.
    #[must_use]
    pub fn ttl(&self, multiplier: u32) -> Duration {
        Duration::seconds(self.duration_secs() * i64::from(multiplier.max(1)))
    }

    /// Default weight in the conviction layer. Strictly increasing with
    /// timeframe length; sums to 1.00 over [`Timeframe::ALL`].
    #[must_use]
    pub fn default_conviction_weight(&self) -> Decimal {
        match self {
            Self::M1 => dec!(0.02),
            Self::M5 => dec!(0.03),
            Self::M15 => dec!(0.05),
            Self::M30 => dec!(0.08),
            Self::H1 => dec!(0.11),
            Self::H2 => dec!(0.13),
            Self::H4 => dec!(0.16),
            Self::H6 => dec!(0.20),
            Self::D1 => dec!(0.22),
        }
    }

    /// Default weight in the urgency layer. Strictly decreasing with
    /// timeframe length; sums to 1.00 over [`Timeframe::ALL`].
    #[must_use]
    pub fn default_urgency_weight(&self) -> Decimal {
        match self {
            Self::M1 => dec!(0.22),
            Self::M5 => dec!(0.20),
            Self::M15 => dec!(0.16),
            Self::M30 => dec!(0.13),
            Self::H1 => dec!(0.11),
            Self::H2 => dec!(0.08),
            Self::H4 => dec!(0.05),
            Self::H6 => dec!(0.03),
            Self::D1 => dec!(0.02),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_interval())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_interval(s).ok_or_else(|| format!("unknown timeframe: {s}"))
    }
}
