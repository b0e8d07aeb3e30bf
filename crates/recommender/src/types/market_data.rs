use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::Direction;

/// Current price and volatility for a symbol (`MarketDataProvider`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    /// Average True Range over the provider's default lookback.
    #[serde(with = "rust_decimal::serde::str")]
    pub atr: Decimal,
    /// Closest support level below price, when the provider knows one.
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub nearest_support: Option<Decimal>,
    /// Closest resistance level above price, when the provider knows one.
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub nearest_resistance: Option<Decimal>,
}

/// Indicator values for one symbol and timeframe. Any indicator the service
/// could not compute is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub rsi: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub macd_histogram: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub ema_fast: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub ema_slow: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub bb_upper: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub bb_lower: Option<Decimal>,
}

/// Chart pattern bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternBias {
    Bullish,
    Bearish,
    Neutral,
}

impl PatternBias {
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Bullish => Decimal::ONE,
            Self::Bearish => Decimal::NEGATIVE_ONE,
            Self::Neutral => Decimal::ZERO,
        }
    }
}

/// A detected chart pattern (`PatternRecognitionService`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    pub bias: PatternBias,
    /// Historical reliability of this pattern type, [0, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub reliability: Decimal,
    /// How far the pattern has formed, [0, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub completion: Decimal,
}

/// Symbol-level sentiment (`SentimentService`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    /// Polarity in [-1, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub score: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub confidence: Decimal,
}

/// Model output for a horizon (`MlPredictionService`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlPrediction {
    pub direction: Direction,
    /// Model probability that `direction` is right, [0, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub probability: Decimal,
}

/// Volume and support/resistance analysis (`VolumeAnalysisService`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeProfile {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    /// Current volume over its rolling average.
    #[serde(with = "rust_decimal::serde::str")]
    pub volume_ratio: Decimal,
    /// Price change over the bar as a fraction (0.01 = +1%).
    #[serde(with = "rust_decimal::serde::str")]
    pub price_change_pct: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub support: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub resistance: Option<Decimal>,
}

/// Portfolio risk budget (`PortfolioContextProvider`). Fractions of equity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskContext {
    #[serde(with = "rust_decimal::serde::str")]
    pub available_risk_budget_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_position_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub open_correlated_exposure_pct: Decimal,
}
