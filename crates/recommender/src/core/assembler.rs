//! Final assembly of a [`Recommendation`].
//!
//! Pure: no I/O and no clocks beyond the `now` handed in. Builds the
//! reasoning trace, stamps id and expiry, and enforces the entry/stop/target
//! ordering before anything leaves the engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::error;
use uuid::Uuid;

use crate::core::conflict::Resolution;
use crate::core::position_sizing::SizingDecision;
use crate::core::uncertainty::UncertaintyEstimate;
use crate::errors::EngineError;
use crate::types::{
    Action, Contribution, Degradation, Direction, FusedScore, Recommendation, Signal,
    SourceOutcome, Timeframe,
};

/// Everything one evaluation produced, ready to be assembled.
#[derive(Debug, Clone)]
pub struct AssemblyInput<'a> {
    pub symbol: &'a str,
    pub timeframes: &'a [Timeframe],
    pub fused: FusedScore,
    pub resolution: Resolution,
    pub uncertainty: UncertaintyEstimate,
    pub sizing: SizingDecision,
    pub outcomes: &'a [SourceOutcome],
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RecommendationAssembler {
    ttl_multiplier: u32,
    min_risk_reward: Decimal,
    hold_epsilon: Decimal,
}

impl RecommendationAssembler {
    pub fn new(ttl_multiplier: u32, min_risk_reward: Decimal, hold_epsilon: Decimal) -> Self {
        Self {
            ttl_multiplier,
            min_risk_reward,
            hold_epsilon,
        }
    }

    pub fn assemble(&self, input: AssemblyInput<'_>) -> Result<Recommendation, EngineError> {
        let AssemblyInput {
            symbol,
            timeframes,
            fused,
            resolution,
            uncertainty,
            sizing,
            outcomes,
            now,
        } = input;

        let mut action = sizing.action;
        let degradation = resolution
            .degradation
            .clone()
            .or_else(|| sizing.degradation.clone());

        let mut reasoning = factor_lines(&fused.contributions, resolution.direction);
        reasoning.extend(resolution.notes.iter().cloned());
        reasoning.extend(sizing.notes.iter().cloned());

        if action == Action::Hold && degradation.is_none() {
            if fused.urgency.abs() >= self.hold_epsilon {
                action = Action::Watch;
                reasoning.push(format!(
                    "no directional conviction but short-term urgency {} ({}): watch",
                    fused.urgency.round_dp(3),
                    Direction::of_sign(fused.urgency)
                ));
            } else {
                reasoning.push(format!(
                    "fused magnitude {} inside hold band ±{}",
                    fused.magnitude.round_dp(3),
                    self.hold_epsilon
                ));
            }
        }

        if uncertainty.single_source_capped {
            reasoning.push(format!(
                "single responding source: confidence capped at {}",
                uncertainty.confidence
            ));
        }
        reasoning.push(format!(
            "uncertainty: aleatoric {}, epistemic {}",
            uncertainty.aleatoric.round_dp(3),
            uncertainty.epistemic.round_dp(3)
        ));
        reasoning.extend(outcome_lines(outcomes));

        let recommendation = Recommendation {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            timestamp: now,
            action,
            confidence: uncertainty.confidence,
            entry_price: sizing.entry_price,
            stop_loss: sizing.stop_loss,
            take_profit: sizing.take_profit,
            position_size_pct: if action.is_executable() {
                sizing.position_size_pct
            } else {
                Decimal::ZERO
            },
            risk_reward_ratio: sizing.risk_reward_ratio,
            reasoning,
            contributing_signals: fused.contributing_signals,
            conflicts: fused.conflicts,
            degradation,
            timeframes: normalized_timeframes(timeframes),
            expires_at: self.expiry(timeframes, now),
        };

        self.check_invariants(&recommendation)?;
        Ok(recommendation)
    }

    /// WATCH with zero confidence when too few sources answered.
    #[allow(clippy::too_many_arguments)]
    pub fn insufficient(
        &self,
        symbol: &str,
        timeframes: &[Timeframe],
        signals: Vec<Signal>,
        required: usize,
        outcomes: &[SourceOutcome],
        entry_price: Decimal,
        now: DateTime<Utc>,
    ) -> Recommendation {
        let responded = outcomes
            .iter()
            .filter_map(SourceOutcome::signal)
            .map(|s| &s.source)
            .collect::<std::collections::BTreeSet<_>>()
            .len();
        let mut reasoning = vec![format!(
            "low confidence: insufficient data ({responded} of {required} required sources responded)"
        )];
        reasoning.extend(outcome_lines(outcomes));

        Recommendation {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            timestamp: now,
            action: Action::Watch,
            confidence: Decimal::ZERO,
            entry_price,
            stop_loss: None,
            take_profit: None,
            position_size_pct: Decimal::ZERO,
            risk_reward_ratio: None,
            reasoning,
            contributing_signals: signals,
            conflicts: Vec::new(),
            degradation: Some(Degradation::InsufficientSignals {
                responded,
                required,
            }),
            timeframes: normalized_timeframes(timeframes),
            expires_at: self.expiry(timeframes, now),
        }
    }

    fn expiry(&self, timeframes: &[Timeframe], now: DateTime<Utc>) -> DateTime<Utc> {
        let shortest = timeframes.iter().min().copied().unwrap_or(Timeframe::H1);
        now + shortest.ttl(self.ttl_multiplier)
    }

    /// Entry/stop/target ordering and the risk/reward floor for executable
    /// actions.
    pub fn check_invariants(&self, rec: &Recommendation) -> Result<(), EngineError> {
        let violation = |reason: String| {
            error!(symbol = %rec.symbol, id = %rec.id, %reason, "recommendation invariant violated");
            Err(EngineError::InternalInvariantViolation {
                symbol: rec.symbol.clone(),
                reason,
            })
        };

        if rec.reasoning.is_empty() {
            return violation("empty reasoning".into());
        }
        if rec.confidence < Decimal::ZERO || rec.confidence > Decimal::ONE {
            return violation(format!("confidence {} outside [0, 1]", rec.confidence));
        }
        if !rec.action.is_executable() {
            if !rec.position_size_pct.is_zero() {
                return violation(format!("{} carries size {}", rec.action, rec.position_size_pct));
            }
            return Ok(());
        }

        let (Some(sl), Some(tp), Some(rr)) = (rec.stop_loss, rec.take_profit, rec.risk_reward_ratio)
        else {
            return violation(format!("{} without stop, target and ratio", rec.action));
        };
        if sl <= Decimal::ZERO || tp <= Decimal::ZERO {
            return violation(format!(
                "{} with non-positive exit: stop {sl}, target {tp}",
                rec.action
            ));
        }
        let entry = rec.entry_price;
        let ordered = match rec.action {
            Action::Buy => sl < entry && entry < tp,
            Action::Sell => tp < entry && entry < sl,
            Action::Hold | Action::Watch => true,
        };
        if !ordered {
            return violation(format!(
                "{} levels out of order: stop {sl}, entry {entry}, target {tp}",
                rec.action
            ));
        }
        if rr < self.min_risk_reward {
            return violation(format!(
                "{} with risk/reward {rr} below minimum {}",
                rec.action, self.min_risk_reward
            ));
        }
        if rec.position_size_pct <= Decimal::ZERO {
            return violation(format!("{} with non-positive size", rec.action));
        }
        Ok(())
    }
}

/// One line per contribution, largest absolute contribution first.
fn factor_lines(contributions: &[Contribution], resolved: Direction) -> Vec<String> {
    let mut ordered: Vec<&Contribution> = contributions.iter().collect();
    ordered.sort_by(|a, b| {
        b.value
            .abs()
            .cmp(&a.value.abs())
            .then_with(|| a.timeframe.cmp(&b.timeframe))
            .then_with(|| a.source.cmp(&b.source))
    });
    ordered
        .into_iter()
        .map(|c| {
            let dissent = resolved.is_directional() && c.direction == resolved.opposite();
            format!(
                "{} {} {}: contribution {:+} (weight {}){}",
                c.source,
                c.timeframe,
                c.direction,
                c.value.round_dp(4),
                c.weight.round_dp(3),
                if dissent {
                    format!(", dissents from {resolved}")
                } else {
                    String::new()
                }
            )
        })
        .collect()
}

fn outcome_lines(outcomes: &[SourceOutcome]) -> Vec<String> {
    outcomes
        .iter()
        .filter_map(|o| match o {
            SourceOutcome::Responded(_) => None,
            SourceOutcome::TimedOut { source, timeframe } => {
                Some(format!("{source} {timeframe} timed out: excluded"))
            }
            SourceOutcome::Failed {
                source,
                timeframe,
                reason,
            } => Some(format!("{source} {timeframe} unavailable ({reason}): excluded")),
        })
        .collect()
}

fn normalized_timeframes(timeframes: &[Timeframe]) -> Vec<Timeframe> {
    let mut out = timeframes.to_vec();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conflict::SizingPolicy;
    use crate::types::SourceId;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn assembler() -> RecommendationAssembler {
        RecommendationAssembler::new(4, dec!(2), dec!(0.1))
    }

    fn fused(magnitude: Decimal, urgency: Decimal) -> FusedScore {
        FusedScore {
            symbol: "AAPL".into(),
            direction: Direction::from_score(magnitude, dec!(0.1)),
            magnitude,
            urgency,
            per_timeframe: BTreeMap::new(),
            contributions: vec![
                Contribution {
                    source: SourceId::from("small"),
                    timeframe: Timeframe::H1,
                    direction: Direction::Buy,
                    value: dec!(0.05),
                    weight: dec!(0.5),
                },
                Contribution {
                    source: SourceId::from("big"),
                    timeframe: Timeframe::H1,
                    direction: Direction::Sell,
                    value: dec!(-0.3),
                    weight: dec!(0.5),
                },
            ],
            contributing_signals: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    fn resolution(direction: Direction) -> Resolution {
        Resolution {
            direction,
            sizing: SizingPolicy::Full,
            consensus: Decimal::ONE,
            dissent_share: Decimal::ZERO,
            unresolved: false,
            vetoed_by: None,
            degradation: None,
            notes: Vec::new(),
        }
    }

    fn estimate(confidence: Decimal) -> UncertaintyEstimate {
        UncertaintyEstimate {
            aleatoric: dec!(0.2),
            epistemic: dec!(0.1),
            confidence,
            single_source_capped: false,
        }
    }

    fn sizing(action: Action, sl: Decimal, tp: Decimal, rr: Decimal) -> SizingDecision {
        SizingDecision {
            action,
            entry_price: dec!(100),
            stop_loss: Some(sl),
            take_profit: Some(tp),
            risk_reward_ratio: Some(rr),
            position_size_pct: dec!(0.05),
            degradation: None,
            notes: Vec::new(),
        }
    }

    #[test]
    fn test_reasoning_sorted_by_contribution() {
        let now = Utc::now();
        let rec = assembler()
            .assemble(AssemblyInput {
                symbol: "AAPL",
                timeframes: &[Timeframe::H4, Timeframe::H1],
                fused: fused(dec!(-0.25), dec!(-0.2)),
                resolution: resolution(Direction::Sell),
                uncertainty: estimate(dec!(0.7)),
                sizing: sizing(Action::Sell, dec!(103), dec!(94), dec!(2)),
                outcomes: &[],
                now,
            })
            .unwrap();

        assert!(rec.reasoning[0].starts_with("big 1h SELL"));
        assert!(rec.reasoning[1].contains("dissents from SELL"));
        assert_eq!(rec.timeframes, vec![Timeframe::H1, Timeframe::H4]);
        // Shortest requested timeframe (1h) × 4
        assert_eq!(rec.expires_at, now + chrono::Duration::hours(4));
        assert!(Uuid::parse_str(&rec.id).is_ok());
    }

    #[test]
    fn test_misordered_buy_is_invariant_violation() {
        let err = assembler()
            .assemble(AssemblyInput {
                symbol: "AAPL",
                timeframes: &[Timeframe::H1],
                fused: fused(dec!(0.5), dec!(0.5)),
                resolution: resolution(Direction::Buy),
                uncertainty: estimate(dec!(0.7)),
                sizing: sizing(Action::Buy, dec!(103), dec!(94), dec!(2)),
                outcomes: &[],
                now: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::InternalInvariantViolation { .. }));
    }

    #[test]
    fn test_sell_with_negative_target_is_violation() {
        let err = assembler()
            .assemble(AssemblyInput {
                symbol: "AAPL",
                timeframes: &[Timeframe::H1],
                fused: fused(dec!(-0.5), dec!(-0.5)),
                resolution: resolution(Direction::Sell),
                uncertainty: estimate(dec!(0.7)),
                sizing: sizing(Action::Sell, dec!(160), dec!(-20), dec!(2)),
                outcomes: &[],
                now: Utc::now(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("non-positive exit"));
    }

    #[test]
    fn test_executable_below_rr_floor_is_violation() {
        let err = assembler()
            .assemble(AssemblyInput {
                symbol: "AAPL",
                timeframes: &[Timeframe::H1],
                fused: fused(dec!(0.5), dec!(0.5)),
                resolution: resolution(Direction::Buy),
                uncertainty: estimate(dec!(0.7)),
                sizing: sizing(Action::Buy, dec!(97), dec!(104), dec!(1.33)),
                outcomes: &[],
                now: Utc::now(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("risk/reward"));
    }

    #[test]
    fn test_hold_with_urgency_becomes_watch() {
        let mut s = sizing(Action::Hold, dec!(0), dec!(0), dec!(0));
        s.stop_loss = None;
        s.take_profit = None;
        s.risk_reward_ratio = None;
        let rec = assembler()
            .assemble(AssemblyInput {
                symbol: "AAPL",
                timeframes: &[Timeframe::M5, Timeframe::D1],
                fused: fused(dec!(0.05), dec!(-0.4)),
                resolution: resolution(Direction::Hold),
                uncertainty: estimate(dec!(0.4)),
                sizing: s,
                outcomes: &[],
                now: Utc::now(),
            })
            .unwrap();
        assert_eq!(rec.action, Action::Watch);
        assert_eq!(rec.position_size_pct, Decimal::ZERO);
        assert!(rec.reasoning.iter().any(|r| r.contains("urgency")));
    }

    #[test]
    fn test_insufficient_lists_timeouts() {
        let outcomes = vec![
            SourceOutcome::TimedOut {
                source: "technical".into(),
                timeframe: Timeframe::H1,
            },
            SourceOutcome::Failed {
                source: "ml".into(),
                timeframe: Timeframe::H1,
                reason: "offline".into(),
            },
        ];
        let rec = assembler().insufficient(
            "AAPL",
            &[Timeframe::H1],
            Vec::new(),
            1,
            &outcomes,
            dec!(100),
            Utc::now(),
        );
        assert_eq!(rec.action, Action::Watch);
        assert_eq!(rec.confidence, Decimal::ZERO);
        assert!(rec.reasoning[0].contains("insufficient data"));
        assert!(rec.reasoning.iter().any(|r| r.contains("technical 1h timed out")));
        assert_eq!(
            rec.degradation,
            Some(Degradation::InsufficientSignals {
                responded: 0,
                required: 1
            })
        );
        assert!(assembler().check_invariants(&rec).is_ok());
    }
}
