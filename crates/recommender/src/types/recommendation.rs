use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::signal::{Direction, Signal, SourceId};
use crate::errors::EngineError;
use super::timeframe::Timeframe;

/// Terminal action of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
    Watch,
}

impl Action {
    #[must_use]
    pub const fn is_executable(&self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }

    /// Direction a BUY/SELL commits to; `None` for HOLD and WATCH.
    #[must_use]
    pub const fn direction(&self) -> Option<Direction> {
        match self {
            Self::Buy => Some(Direction::Buy),
            Self::Sell => Some(Direction::Sell),
            Self::Hold | Self::Watch => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
            Self::Watch => "WATCH",
        }
    }
}

impl From<Direction> for Action {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Buy => Self::Buy,
            Direction::Sell => Self::Sell,
            Direction::Hold => Self::Hold,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    OpposingDirection,
    TimeframeDivergence,
    LowConsensus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictResolution {
    /// A risk-override source blocked the majority action.
    Vetoed,
    /// Majority kept, action sizing capped.
    Discounted,
    /// Majority kept, dissent only lowers confidence.
    AcceptedMajority,
    /// No majority strong enough; fell back to HOLD.
    Unresolved,
}

/// Audit entry describing one detected conflict and how it was settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub signal_a: Signal,
    pub signal_b: Signal,
    pub kind: ConflictKind,
    pub resolution: ConflictResolution,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Fused score
// ---------------------------------------------------------------------------

/// Share of the final magnitude attributable to one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub source: SourceId,
    pub timeframe: Timeframe,
    pub direction: Direction,
    /// Signed contribution to `FusedScore::magnitude`.
    #[serde(with = "rust_decimal::serde::str")]
    pub value: Decimal,
    /// Weight the source carried within its timeframe.
    #[serde(with = "rust_decimal::serde::str")]
    pub weight: Decimal,
}

/// Output of the ensemble fusion step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedScore {
    pub symbol: String,
    pub direction: Direction,
    /// Conviction-weighted score in [-1, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub magnitude: Decimal,
    /// Urgency-weighted score in [-1, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub urgency: Decimal,
    pub per_timeframe: BTreeMap<Timeframe, Decimal>,
    pub contributions: Vec<Contribution>,
    pub contributing_signals: Vec<Signal>,
    pub conflicts: Vec<ConflictRecord>,
}

// ---------------------------------------------------------------------------
// Recommendation
// ---------------------------------------------------------------------------

/// Why a recommendation was degraded to HOLD or WATCH.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Degradation {
    InsufficientSignals { responded: usize, required: usize },
    UnresolvedConflict {
        #[serde(with = "rust_decimal::serde::str")]
        consensus: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        minimum: Decimal,
    },
    RiskOverrideVeto { source: SourceId },
    InvalidRiskContext { detail: String },
    RiskRewardBelowMinimum {
        #[serde(with = "rust_decimal::serde::str")]
        ratio: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        minimum: Decimal,
    },
    RiskBudgetExhausted,
    NoMarketQuote,
    /// Quote present but stop or target would not be a positive price.
    UnplaceableExits { detail: String },
    BelowActionConfidence {
        #[serde(with = "rust_decimal::serde::str")]
        confidence: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        minimum: Decimal,
    },
}

impl Degradation {
    /// The absorbed engine error this degradation stands for, when it has
    /// one. Sizing and quote downgrades are not errors.
    pub fn to_engine_error(&self) -> Option<EngineError> {
        match self {
            Self::InsufficientSignals {
                responded,
                required,
            } => Some(EngineError::InsufficientSignals {
                responded: *responded,
                required: *required,
            }),
            Self::UnresolvedConflict { consensus, minimum } => Some(EngineError::UnresolvedConflict {
                consensus: consensus.round_dp(4).to_string(),
                minimum: minimum.to_string(),
            }),
            Self::InvalidRiskContext { detail } => Some(EngineError::InvalidRiskContext {
                reason: detail.clone(),
            }),
            _ => None,
        }
    }
}

/// Terminal artifact of one evaluation. Immutable once assembled; a newer
/// recommendation for the same symbol supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    #[serde(with = "rust_decimal::serde::str")]
    pub confidence: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub stop_loss: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub take_profit: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str")]
    pub position_size_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub risk_reward_ratio: Option<Decimal>,
    pub reasoning: Vec<String>,
    pub contributing_signals: Vec<Signal>,
    pub conflicts: Vec<ConflictRecord>,
    pub degradation: Option<Degradation>,
    pub timeframes: Vec<Timeframe>,
    pub expires_at: DateTime<Utc>,
}

impl Recommendation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Sources that contributed, deduplicated, with their net direction.
    pub fn source_votes(&self) -> BTreeMap<SourceId, Direction> {
        let mut net: BTreeMap<SourceId, Decimal> = BTreeMap::new();
        for signal in &self.contributing_signals {
            *net.entry(signal.source.clone()).or_default() += signal.signed_strength();
        }
        net.into_iter()
            .map(|(id, score)| (id, Direction::of_sign(score)))
            .collect()
    }
}
