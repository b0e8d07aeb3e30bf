use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::signal::SourceId;

/// Lifecycle of a published BUY/SELL recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationState {
    Published,
    TargetHit,
    StopHit,
    Expired,
}

impl RecommendationState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Published)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Published => "PUBLISHED",
            Self::TargetHit => "TARGET_HIT",
            Self::StopHit => "STOP_HIT",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for RecommendationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market event fed into the outcome state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutcomeEvent {
    /// A traded price. Crossing the target or stop resolves the
    /// recommendation; otherwise only the last seen price is remembered.
    PriceObserved {
        #[serde(with = "rust_decimal::serde::str")]
        price: Decimal,
        at: DateTime<Utc>,
    },
    /// Upstream already knows the target filled.
    TargetHit {
        #[serde(with = "rust_decimal::serde::str")]
        price: Decimal,
        at: DateTime<Utc>,
    },
    /// Upstream already knows the stop filled.
    StopHit {
        #[serde(with = "rust_decimal::serde::str")]
        price: Decimal,
        at: DateTime<Utc>,
    },
    /// Clock tick; expires the recommendation when past its TTL.
    Tick { at: DateTime<Utc> },
}

impl OutcomeEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::PriceObserved { at, .. }
            | Self::TargetHit { at, .. }
            | Self::StopHit { at, .. }
            | Self::Tick { at } => *at,
        }
    }
}

/// Realized outcome of one source's contribution to one recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub recommendation_id: String,
    pub source: SourceId,
    pub realized_direction_correct: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub realized_return: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Terminal transition reported back to callers of `record_outcome`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeTransition {
    pub recommendation_id: String,
    pub state: RecommendationState,
    #[serde(with = "rust_decimal::serde::str")]
    pub exit_price: Decimal,
    pub samples: Vec<PerformanceSample>,
    /// Version of the weight snapshot published by this transition.
    pub weights_version: u64,
}

/// Audit-log aggregate of a source's realized accuracy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAccuracyStats {
    pub source: SourceId,
    pub samples: u32,
    pub correct: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub hit_rate: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_return: Decimal,
}
