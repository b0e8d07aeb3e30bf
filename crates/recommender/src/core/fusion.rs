//! Weighted ensemble fusion of normalized signals.
//!
//! Two layers:
//!   Layer 1: per timeframe, `Σ(weight_i × strength_i × sign_i)` with
//!             source weights renormalized over that timeframe's responders.
//!   Layer 2: across timeframes, a conviction layer (long timeframes heavy)
//!             gives the directional magnitude and an urgency layer (short
//!             timeframes heavy) gives the WATCH-level urgency score.
//!
//! Fusion is a pure function of the signal set and the weight snapshot:
//! signals are sorted by `(timeframe, source)` before any fold.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

use crate::config::FusionConfig;
use crate::types::{
    Contribution, Direction, FusedScore, Signal, SourceId, Timeframe, WeightSnapshot,
};

// ═══════════════════════════════════════════════════════════════════════════
// EnsembleFusionEngine
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct EnsembleFusionEngine {
    config: FusionConfig,
}

impl EnsembleFusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn hold_epsilon(&self) -> Decimal {
        self.config.hold_epsilon
    }

    /// Fuse a (possibly partial) signal set into one score.
    ///
    /// An empty set yields HOLD with zero magnitude.
    pub fn fuse(&self, symbol: &str, signals: &[Signal], weights: &WeightSnapshot) -> FusedScore {
        let mut ordered: Vec<Signal> = signals.to_vec();
        ordered.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut by_timeframe: BTreeMap<Timeframe, Vec<&Signal>> = BTreeMap::new();
        for signal in &ordered {
            by_timeframe.entry(signal.timeframe).or_default().push(signal);
        }

        // -- Layer 1: per-timeframe weighted score ---------------------------
        let mut per_timeframe: BTreeMap<Timeframe, Decimal> = BTreeMap::new();
        let mut source_weights: BTreeMap<Timeframe, BTreeMap<SourceId, Decimal>> = BTreeMap::new();
        for (tf, group) in &by_timeframe {
            let renormalized = weights.renormalized_over(group.iter().map(|s| &s.source));
            let score: Decimal = group
                .iter()
                .map(|s| renormalized.get(&s.source).copied().unwrap_or_default() * s.signed_strength())
                .sum();
            per_timeframe.insert(*tf, clamp_score(score));
            source_weights.insert(*tf, renormalized);
        }

        // -- Layer 2: cross-timeframe conviction and urgency -----------------
        let conviction = self.layer_shares(per_timeframe.keys().copied(), |(c, _)| c);
        let urgency_shares = self.layer_shares(per_timeframe.keys().copied(), |(_, u)| u);

        let magnitude = clamp_score(
            per_timeframe
                .iter()
                .map(|(tf, score)| conviction.get(tf).copied().unwrap_or_default() * score)
                .sum(),
        );
        let urgency = clamp_score(
            per_timeframe
                .iter()
                .map(|(tf, score)| urgency_shares.get(tf).copied().unwrap_or_default() * score)
                .sum(),
        );

        let contributions = ordered
            .iter()
            .map(|s| {
                let weight = source_weights
                    .get(&s.timeframe)
                    .and_then(|w| w.get(&s.source))
                    .copied()
                    .unwrap_or_default();
                let layer = conviction.get(&s.timeframe).copied().unwrap_or_default();
                Contribution {
                    source: s.source.clone(),
                    timeframe: s.timeframe,
                    direction: s.direction,
                    value: weight * layer * s.signed_strength(),
                    weight,
                }
            })
            .collect();

        FusedScore {
            symbol: symbol.to_string(),
            direction: Direction::from_score(magnitude, self.config.hold_epsilon),
            magnitude,
            urgency,
            per_timeframe,
            contributions,
            contributing_signals: ordered,
            conflicts: Vec::new(),
        }
    }

    /// Layer weights of the present timeframes, normalized to sum to one.
    /// Equal shares when the configured weights of every present timeframe
    /// are zero.
    fn layer_shares<I, F>(&self, timeframes: I, pick: F) -> BTreeMap<Timeframe, Decimal>
    where
        I: Iterator<Item = Timeframe>,
        F: Fn((Decimal, Decimal)) -> Decimal,
    {
        let raw: Vec<(Timeframe, Decimal)> = timeframes
            .map(|tf| (tf, pick(self.config.layer_weights(tf)).max(Decimal::ZERO)))
            .collect();
        if raw.is_empty() {
            return BTreeMap::new();
        }
        let total: Decimal = raw.iter().map(|(_, w)| *w).sum();
        if total.is_zero() {
            let share = Decimal::ONE / Decimal::from(raw.len());
            return raw.into_iter().map(|(tf, _)| (tf, share)).collect();
        }
        raw.into_iter().map(|(tf, w)| (tf, w / total)).collect()
    }
}

fn clamp_score(score: Decimal) -> Decimal {
    score.clamp(dec!(-1), Decimal::ONE)
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
