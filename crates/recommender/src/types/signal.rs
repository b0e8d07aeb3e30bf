use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::timeframe::Timeframe;

/// Stable identifier of a configured signal source, e.g. `"technical"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Analysis domain a source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Technical,
    Pattern,
    Sentiment,
    MlModel,
    Volume,
}

impl SourceKind {
    /// Whether the underlying service answers per timeframe. Sentiment is a
    /// symbol-level reading and is fetched once per evaluation.
    #[must_use]
    pub const fn is_timeframe_scoped(&self) -> bool {
        !matches!(self, Self::Sentiment)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Pattern => "pattern",
            Self::Sentiment => "sentiment",
            Self::MlModel => "ml_model",
            Self::Volume => "volume",
        }
    }
}

/// A source's directional opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

impl Direction {
    /// `+1` for BUY, `-1` for SELL, `0` for HOLD.
    #[must_use]
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
            Self::Hold => Decimal::ZERO,
        }
    }

    /// Direction of a signed score; `|score| < epsilon` is HOLD.
    #[must_use]
    pub fn from_score(score: Decimal, epsilon: Decimal) -> Self {
        if score.abs() < epsilon {
            Self::Hold
        } else if score > Decimal::ZERO {
            Self::Buy
        } else {
            Self::Sell
        }
    }

    /// Direction of the sign alone; exactly zero is HOLD.
    #[must_use]
    pub fn of_sign(value: Decimal) -> Self {
        match value.cmp(&Decimal::ZERO) {
            std::cmp::Ordering::Greater => Self::Buy,
            std::cmp::Ordering::Less => Self::Sell,
            std::cmp::Ordering::Equal => Self::Hold,
        }
    }

    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
            Self::Hold => Self::Hold,
        }
    }

    #[must_use]
    pub const fn is_directional(&self) -> bool {
        !matches!(self, Self::Hold)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One source's opinion at one timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub source: SourceId,
    pub kind: SourceKind,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    /// Strength in [0, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub strength: Decimal,
    /// Source-reported confidence in [0, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub confidence: Decimal,
    pub computed_at: DateTime<Utc>,
    pub explanation: String,
}

impl Signal {
    /// Build a signal, clamping strength and confidence into [0, 1].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: SourceId,
        kind: SourceKind,
        symbol: &str,
        timeframe: Timeframe,
        direction: Direction,
        strength: Decimal,
        confidence: Decimal,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            source,
            kind,
            symbol: symbol.to_string(),
            timeframe,
            direction,
            strength: clamp_unit(strength),
            confidence: clamp_unit(confidence),
            computed_at: Utc::now(),
            explanation: explanation.into(),
        }
    }

    /// `strength × sign(direction)`, in [-1, 1].
    #[must_use]
    pub fn signed_strength(&self) -> Decimal {
        self.strength * self.direction.sign()
    }

    /// Deterministic ordering key used before any fold over signals.
    pub(crate) fn sort_key(&self) -> (Timeframe, &SourceId) {
        (self.timeframe, &self.source)
    }
}

/// Result of one adapter call within an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Responded(Signal),
    TimedOut {
        source: SourceId,
        timeframe: Timeframe,
    },
    Failed {
        source: SourceId,
        timeframe: Timeframe,
        reason: String,
    },
}

impl SourceOutcome {
    pub fn source(&self) -> &SourceId {
        match self {
            Self::Responded(signal) => &signal.source,
            Self::TimedOut { source, .. } | Self::Failed { source, .. } => source,
        }
    }

    pub fn signal(&self) -> Option<&Signal> {
        match self {
            Self::Responded(signal) => Some(signal),
            _ => None,
        }
    }
}

pub(crate) fn clamp_unit(value: Decimal) -> Decimal {
    value.clamp(Decimal::ZERO, Decimal::ONE)
}
