//! Confidence from aleatoric and epistemic uncertainty.
//!
//! aleatoric = weighted mean of `(1 - confidence_i)`
//! epistemic = population variance of `strength_i × sign_i`
//! confidence = 1 - clamp(aleatoric + epistemic, 0, 1), then discounted by
//! dissent and unresolved conflicts, and capped when a single source spoke.

use rust_decimal::Decimal;
use std::collections::BTreeSet;

use crate::config::{ConflictConfig, UncertaintyConfig};
use crate::core::conflict::Resolution;
use crate::types::{Signal, SourceId, WeightSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub struct UncertaintyEstimate {
    pub aleatoric: Decimal,
    pub epistemic: Decimal,
    pub confidence: Decimal,
    /// True when the single-source ceiling was applied.
    pub single_source_capped: bool,
}

impl UncertaintyEstimate {
    pub fn none_available() -> Self {
        Self {
            aleatoric: Decimal::ONE,
            epistemic: Decimal::ZERO,
            confidence: Decimal::ZERO,
            single_source_capped: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UncertaintyQuantifier {
    config: UncertaintyConfig,
    dissent_confidence_discount: Decimal,
}

impl UncertaintyQuantifier {
    pub fn new(config: UncertaintyConfig, conflict: &ConflictConfig) -> Self {
        Self {
            config,
            dissent_confidence_discount: conflict.dissent_confidence_discount,
        }
    }

    pub fn quantify(
        &self,
        signals: &[Signal],
        weights: &WeightSnapshot,
        resolution: &Resolution,
    ) -> UncertaintyEstimate {
        if signals.is_empty() {
            return UncertaintyEstimate::none_available();
        }

        let renormalized = weights.renormalized_over(signals.iter().map(|s| &s.source));
        let aleatoric = aleatoric(signals, |s| {
            renormalized.get(&s.source).copied().unwrap_or_default()
        });
        let epistemic = epistemic(signals);

        let mut confidence = combine(aleatoric, epistemic);
        confidence *= Decimal::ONE - resolution.dissent_share * self.dissent_confidence_discount;
        if resolution.unresolved {
            confidence *= Decimal::ONE - self.config.unresolved_conflict_penalty;
        }

        let distinct: BTreeSet<&SourceId> = signals.iter().map(|s| &s.source).collect();
        let single_source_capped =
            distinct.len() == 1 && confidence > self.config.single_source_ceiling;
        if distinct.len() == 1 {
            confidence = confidence.min(self.config.single_source_ceiling);
        }

        UncertaintyEstimate {
            aleatoric,
            epistemic,
            confidence: confidence.clamp(Decimal::ZERO, Decimal::ONE),
            single_source_capped,
        }
    }
}

/// `1 - clamp(aleatoric + epistemic, 0, 1)`.
pub fn combine(aleatoric: Decimal, epistemic: Decimal) -> Decimal {
    Decimal::ONE - (aleatoric + epistemic).clamp(Decimal::ZERO, Decimal::ONE)
}

fn aleatoric<F>(signals: &[Signal], weight_of: F) -> Decimal
where
    F: Fn(&Signal) -> Decimal,
{
    let total: Decimal = signals.iter().map(&weight_of).sum();
    if total.is_zero() {
        let n = Decimal::from(signals.len());
        return signals
            .iter()
            .map(|s| Decimal::ONE - s.confidence)
            .sum::<Decimal>()
            / n;
    }
    signals
        .iter()
        .map(|s| weight_of(s) * (Decimal::ONE - s.confidence))
        .sum::<Decimal>()
        / total
}

fn epistemic(signals: &[Signal]) -> Decimal {
    let n = Decimal::from(signals.len());
    let mean = signals.iter().map(Signal::signed_strength).sum::<Decimal>() / n;
    signals
        .iter()
        .map(|s| {
            let d = s.signed_strength() - mean;
            d * d
        })
        .sum::<Decimal>()
        / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conflict::SizingPolicy;
    use crate::core::fusion::tests::{equal_weights, signal};
    use crate::types::{Direction, Timeframe};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn clean_resolution() -> Resolution {
        Resolution {
            direction: Direction::Buy,
            sizing: SizingPolicy::Full,
            consensus: Decimal::ONE,
            dissent_share: Decimal::ZERO,
            unresolved: false,
            vetoed_by: None,
            degradation: None,
            notes: Vec::new(),
        }
    }

    fn quantifier() -> UncertaintyQuantifier {
        UncertaintyQuantifier::new(UncertaintyConfig::default(), &ConflictConfig::default())
    }

    #[test]
    fn test_agreeing_confident_sources() {
        let signals = vec![
            signal("a", Timeframe::H1, Direction::Buy, dec!(0.8), dec!(0.9)),
            signal("b", Timeframe::H1, Direction::Buy, dec!(0.8), dec!(0.9)),
        ];
        let est = quantifier().quantify(&signals, &equal_weights(&["a", "b"]), &clean_resolution());
        assert_eq!(est.epistemic, Decimal::ZERO);
        assert_eq!(est.aleatoric, dec!(0.1));
        assert_eq!(est.confidence, dec!(0.9));
    }

    #[test]
    fn test_single_source_is_capped() {
        let signals = vec![signal("a", Timeframe::H1, Direction::Buy, dec!(0.9), dec!(0.95))];
        let est = quantifier().quantify(&signals, &equal_weights(&["a", "b"]), &clean_resolution());
        assert!(est.single_source_capped);
        assert_eq!(est.confidence, dec!(0.6));
    }

    #[test]
    fn test_unresolved_penalty_halves_confidence() {
        let signals = vec![
            signal("a", Timeframe::H1, Direction::Buy, dec!(0.5), dec!(0.9)),
            signal("b", Timeframe::H1, Direction::Buy, dec!(0.5), dec!(0.9)),
        ];
        let mut resolution = clean_resolution();
        resolution.unresolved = true;
        let est = quantifier().quantify(&signals, &equal_weights(&["a", "b"]), &resolution);
        assert_eq!(est.confidence, dec!(0.45));
    }

    #[test]
    fn test_dissent_discounts_confidence() {
        let signals = vec![
            signal("a", Timeframe::H1, Direction::Buy, dec!(0.5), dec!(1)),
            signal("b", Timeframe::H1, Direction::Buy, dec!(0.5), dec!(1)),
        ];
        let mut resolution = clean_resolution();
        resolution.dissent_share = dec!(0.2);
        let est = quantifier().quantify(&signals, &equal_weights(&["a", "b"]), &resolution);
        // 1 × (1 - 0.2 × 0.5)
        assert_eq!(est.confidence, dec!(0.9));
    }

    #[test]
    fn test_no_signals_zero_confidence() {
        let est = quantifier().quantify(&[], &equal_weights(&["a"]), &clean_resolution());
        assert_eq!(est.confidence, Decimal::ZERO);
    }

    fn unit() -> impl Strategy<Value = Decimal> {
        (0u32..=1000).prop_map(|v| Decimal::new(v as i64, 3))
    }

    proptest! {
        #[test]
        fn confidence_never_rises_with_uncertainty(
            a in unit(),
            e in unit(),
            da in unit(),
            de in unit(),
        ) {
            let base = combine(a, e);
            prop_assert!(combine(a + da, e) <= base);
            prop_assert!(combine(a, e + de) <= base);
            prop_assert!(base >= Decimal::ZERO && base <= Decimal::ONE);
        }
    }
}
