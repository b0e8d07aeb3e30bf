use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::types::{SourceKind, Timeframe};

// ---------------------------------------------------------------------------
// Top-level aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub app: AppConfig,
    pub engine: EngineTuning,
    pub sources: Vec<SourceConfig>,
    pub services: ServicesConfig,
}

// ---------------------------------------------------------------------------
// app.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    #[serde(default)]
    pub watchlist: WatchlistConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub file_name: String,
    /// Optional `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_log_file() -> String {
    "recommender.log".into()
}

/// Symbols the binary evaluates on a fixed interval.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchlistConfig {
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,
    #[serde(default = "default_portfolio")]
    pub portfolio_id: String,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
}

fn default_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::H1]
}

fn default_portfolio() -> String {
    "default".into()
}

fn default_interval() -> u64 {
    60
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            timeframes: default_timeframes(),
            portfolio_id: default_portfolio(),
            interval_seconds: default_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// engine.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineTuning {
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub conflict: ConflictConfig,
    #[serde(default)]
    pub uncertainty: UncertaintyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    /// End-to-end fan-out deadline.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_min_sources")]
    pub min_responding_sources: usize,
    /// Recommendation TTL as a multiple of the shortest requested timeframe.
    #[serde(default = "default_ttl_multiplier")]
    pub ttl_multiplier: u32,
    #[serde(default = "default_bulk_concurrency")]
    pub bulk_concurrency: usize,
    /// Confidence move that counts as a material change for stream pushes.
    #[serde(with = "rust_decimal::serde::str", default = "default_stream_delta")]
    pub stream_confidence_delta: Decimal,
}

fn default_deadline_ms() -> u64 {
    150
}

fn default_min_sources() -> usize {
    1
}

fn default_ttl_multiplier() -> u32 {
    4
}

fn default_bulk_concurrency() -> usize {
    8
}

fn default_stream_delta() -> Decimal {
    dec!(0.05)
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            min_responding_sources: default_min_sources(),
            ttl_multiplier: default_ttl_multiplier(),
            bulk_concurrency: default_bulk_concurrency(),
            stream_confidence_delta: default_stream_delta(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FusionConfig {
    /// `|magnitude| < hold_epsilon` maps to HOLD.
    #[serde(with = "rust_decimal::serde::str", default = "default_epsilon")]
    pub hold_epsilon: Decimal,
    #[serde(default = "default_timeframe_weights")]
    pub timeframe_weights: Vec<TimeframeWeightEntry>,
}

/// Cross-timeframe weights for one timeframe.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimeframeWeightEntry {
    pub timeframe: Timeframe,
    #[serde(with = "rust_decimal::serde::str")]
    pub conviction: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub urgency: Decimal,
}

fn default_epsilon() -> Decimal {
    dec!(0.1)
}

fn default_timeframe_weights() -> Vec<TimeframeWeightEntry> {
    Timeframe::ALL
        .iter()
        .map(|tf| TimeframeWeightEntry {
            timeframe: *tf,
            conviction: tf.default_conviction_weight(),
            urgency: tf.default_urgency_weight(),
        })
        .collect()
}

impl FusionConfig {
    /// `(conviction, urgency)` for a timeframe. Timeframes missing from
    /// config use the built-in defaults.
    pub fn layer_weights(&self, tf: Timeframe) -> (Decimal, Decimal) {
        self.timeframe_weights
            .iter()
            .find(|e| e.timeframe == tf)
            .map_or(
                (tf.default_conviction_weight(), tf.default_urgency_weight()),
                |e| (e.conviction, e.urgency),
            )
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            hold_epsilon: default_epsilon(),
            timeframe_weights: default_timeframe_weights(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConflictConfig {
    /// Both sides of an OPPOSING_DIRECTION conflict must exceed this strength.
    #[serde(with = "rust_decimal::serde::str", default = "default_half")]
    pub opposing_strength_threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str", default = "default_low_consensus")]
    pub low_consensus: Decimal,
    #[serde(with = "rust_decimal::serde::str", default = "default_strong_consensus")]
    pub strong_consensus: Decimal,
    #[serde(with = "rust_decimal::serde::str", default = "default_half")]
    pub risk_override_min_strength: Decimal,
    /// Size multiplier applied inside the moderate-consensus band.
    #[serde(with = "rust_decimal::serde::str", default = "default_half")]
    pub reduced_size_factor: Decimal,
    #[serde(with = "rust_decimal::serde::str", default = "default_half")]
    pub dissent_confidence_discount: Decimal,
}

fn default_half() -> Decimal {
    dec!(0.5)
}

fn default_low_consensus() -> Decimal {
    dec!(0.6)
}

fn default_strong_consensus() -> Decimal {
    dec!(0.8)
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            opposing_strength_threshold: default_half(),
            low_consensus: default_low_consensus(),
            strong_consensus: default_strong_consensus(),
            risk_override_min_strength: default_half(),
            reduced_size_factor: default_half(),
            dissent_confidence_discount: default_half(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UncertaintyConfig {
    #[serde(with = "rust_decimal::serde::str", default = "default_single_source_ceiling")]
    pub single_source_ceiling: Decimal,
    #[serde(with = "rust_decimal::serde::str", default = "default_half")]
    pub unresolved_conflict_penalty: Decimal,
}

fn default_single_source_ceiling() -> Decimal {
    dec!(0.6)
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self {
            single_source_ceiling: default_single_source_ceiling(),
            unresolved_conflict_penalty: default_half(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(with = "rust_decimal::serde::str", default = "default_kelly")]
    pub kelly_fraction: Decimal,
    /// Stop distance in ATRs (`k`).
    #[serde(with = "rust_decimal::serde::str", default = "default_atr_stop")]
    pub atr_stop_multiplier: Decimal,
    /// Reward multiple of the stop distance used to place take-profit.
    #[serde(with = "rust_decimal::serde::str", default = "default_min_rr")]
    pub target_risk_reward: Decimal,
    #[serde(with = "rust_decimal::serde::str", default = "default_min_rr")]
    pub min_risk_reward: Decimal,
    /// BUY/SELL below this confidence is downgraded to WATCH.
    #[serde(with = "rust_decimal::serde::str", default)]
    pub min_action_confidence: Decimal,
}

fn default_kelly() -> Decimal {
    dec!(0.25)
}

fn default_atr_stop() -> Decimal {
    dec!(1.5)
}

fn default_min_rr() -> Decimal {
    dec!(2.0)
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: default_kelly(),
            atr_stop_multiplier: default_atr_stop(),
            target_risk_reward: default_min_rr(),
            min_risk_reward: default_min_rr(),
            min_action_confidence: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackConfig {
    #[serde(with = "rust_decimal::serde::str", default = "default_alpha")]
    pub ema_alpha: Decimal,
    #[serde(with = "rust_decimal::serde::str", default = "default_half")]
    pub initial_accuracy: Decimal,
    /// Lower bound on a source's raw weight before normalization.
    #[serde(with = "rust_decimal::serde::str", default = "default_accuracy_floor")]
    pub accuracy_floor: Decimal,
    #[serde(default = "default_poll_interval")]
    pub outcome_poll_interval_seconds: u64,
    /// SQLite audit database; audit logging is off when unset.
    #[serde(default)]
    pub audit_db_path: Option<String>,
    /// Consumed samples kept in memory for inspection.
    #[serde(default = "default_sample_history")]
    pub sample_history: usize,
    /// Resolved ids remembered so a repeated outcome reports
    /// `AlreadyResolved` rather than `UnknownRecommendation`.
    #[serde(default = "default_resolved_retention")]
    pub resolved_retention: usize,
}

fn default_alpha() -> Decimal {
    dec!(0.1)
}

fn default_accuracy_floor() -> Decimal {
    dec!(0.05)
}

fn default_poll_interval() -> u64 {
    30
}

fn default_sample_history() -> usize {
    1000
}

fn default_resolved_retention() -> usize {
    10_000
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            ema_alpha: default_alpha(),
            initial_accuracy: default_half(),
            accuracy_floor: default_accuracy_floor(),
            outcome_poll_interval_seconds: default_poll_interval(),
            audit_db_path: None,
            sample_history: default_sample_history(),
            resolved_retention: default_resolved_retention(),
        }
    }
}

// ---------------------------------------------------------------------------
// sources.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesFile {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// A SELL/HOLD from this source vetoes any BUY.
    #[serde(default)]
    pub risk_override: bool,
    /// Historical accuracy used as the confidence of derived signals.
    #[serde(with = "rust_decimal::serde::str", default = "default_calibration")]
    pub calibration: Decimal,
    /// Scores inside `±neutral_band` map to HOLD.
    #[serde(with = "rust_decimal::serde::str", default = "default_neutral_band")]
    pub neutral_band: Decimal,
}

fn default_true() -> bool {
    true
}

fn default_calibration() -> Decimal {
    dec!(0.6)
}

fn default_neutral_band() -> Decimal {
    dec!(0.1)
}

// ---------------------------------------------------------------------------
// services.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    /// Base URL of the analysis gateway (quotes, indicators, patterns,
    /// sentiment, volume, portfolios).
    pub base_url: String,
    /// Base URL of the model-serving service; defaults to `base_url`.
    #[serde(default)]
    pub ml_base_url: Option<String>,
    #[serde(default = "default_true")]
    pub ml_enabled: bool,
    #[serde(default = "default_http_timeout")]
    pub timeout_ms: u64,
}

fn default_http_timeout() -> u64 {
    500
}
