//! Source weight snapshots.
//!
//! A [`WeightSnapshot`] is immutable once built. The feedback tracker builds a
//! new one for every learning step and publishes it behind an `Arc`; fusion
//! only ever reads.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::signal::SourceId;

/// Learned weight of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceWeight {
    pub source: SourceId,
    /// Normalized weight in [0, 1]; all weights of a snapshot sum to 1.
    #[serde(with = "rust_decimal::serde::str")]
    pub weight: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub accuracy_ema: Decimal,
    pub last_updated: DateTime<Utc>,
}

/// Immutable, normalized set of source weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSnapshot {
    pub version: u64,
    pub published_at: DateTime<Utc>,
    weights: BTreeMap<SourceId, SourceWeight>,
}

impl WeightSnapshot {
    /// Build a snapshot from per-source accuracy EMAs.
    ///
    /// Raw weights are `max(ema, floor)`; they are then normalized so the
    /// snapshot sums to exactly one. The last source (in id order) absorbs
    /// the rounding remainder of the division.
    pub fn from_accuracy(
        version: u64,
        accuracy: &BTreeMap<SourceId, (Decimal, DateTime<Utc>)>,
        floor: Decimal,
        published_at: DateTime<Utc>,
    ) -> Self {
        let raw: Vec<(&SourceId, Decimal)> = accuracy
            .iter()
            .map(|(id, (ema, _))| (id, (*ema).max(floor).max(Decimal::ZERO)))
            .collect();

        let normalized = normalize(&raw);
        let weights = normalized
            .into_iter()
            .map(|(id, weight)| {
                let (ema, updated) = accuracy[id];
                (
                    id.clone(),
                    SourceWeight {
                        source: id.clone(),
                        weight,
                        accuracy_ema: ema,
                        last_updated: updated,
                    },
                )
            })
            .collect();

        Self {
            version,
            published_at,
            weights,
        }
    }

    /// Equal weights over `sources`, every EMA seeded at `initial_accuracy`.
    pub fn uniform(sources: &[SourceId], initial_accuracy: Decimal, now: DateTime<Utc>) -> Self {
        let accuracy = sources
            .iter()
            .map(|id| (id.clone(), (initial_accuracy, now)))
            .collect();
        Self::from_accuracy(0, &accuracy, Decimal::ZERO, now)
    }

    pub fn get(&self, source: &SourceId) -> Option<&SourceWeight> {
        self.weights.get(source)
    }

    /// Weight of a source, zero when unknown.
    pub fn weight_of(&self, source: &SourceId) -> Decimal {
        self.weights
            .get(source)
            .map_or(Decimal::ZERO, |w| w.weight)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceWeight> {
        self.weights.values()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total(&self) -> Decimal {
        self.weights.values().map(|w| w.weight).sum()
    }

    /// Weights renormalized over the sources that actually responded.
    ///
    /// Missing sources are excluded rather than counted as zero. If every
    /// responder carries zero weight, responders share equally.
    pub fn renormalized_over<'a, I>(&self, responders: I) -> BTreeMap<SourceId, Decimal>
    where
        I: IntoIterator<Item = &'a SourceId>,
    {
        let mut ids: Vec<&SourceId> = responders.into_iter().collect();
        ids.sort();
        ids.dedup();
        let raw: Vec<(&SourceId, Decimal)> =
            ids.into_iter().map(|id| (id, self.weight_of(id))).collect();
        normalize(&raw)
            .into_iter()
            .map(|(id, w)| (id.clone(), w))
            .collect()
    }
}

/// Normalize raw non-negative weights to sum to one. An all-zero input
/// becomes uniform. The final entry takes `1 - Σ(rest)` so the sum is exact.
fn normalize<'a>(raw: &[(&'a SourceId, Decimal)]) -> Vec<(&'a SourceId, Decimal)> {
    if raw.is_empty() {
        return Vec::new();
    }

    let total: Decimal = raw.iter().map(|(_, w)| *w).sum();
    let count = Decimal::from(raw.len());
    let mut out: Vec<(&SourceId, Decimal)> = raw
        .iter()
        .map(|(id, w)| {
            let share = if total > Decimal::ZERO {
                *w / total
            } else {
                Decimal::ONE / count
            };
            (*id, share)
        })
        .collect();

    let head: Decimal = out[..out.len() - 1].iter().map(|(_, w)| *w).sum();
    if let Some(last) = out.last_mut() {
        last.1 = (Decimal::ONE - head).max(Decimal::ZERO);
    }
    out
}
