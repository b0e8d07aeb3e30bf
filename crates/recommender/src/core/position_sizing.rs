//! Risk-adjusted position sizing and exit levels.
//!
//! Implements:
//! - Fractional Kelly-style sizing scaled by confidence and fused magnitude
//! - ATR-based stop loss with a risk/reward-multiple take profit
//! - Support/resistance capping of the take-profit distance
//! - Portfolio risk budget clamping
//!
//! A recommendation never leaves here as BUY/SELL with a risk/reward below
//! the configured minimum: such cases come back as WATCH with zero size.
//!
//! References:
//! - Kelly (1956): "A New Interpretation of Information Rate"
//! - Thorp (2008): "The Kelly Criterion in Blackjack, Sports Betting, and the Stock Market"
//! - Welles Wilder (1978): "New Concepts in Technical Trading Systems" (ATR)

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::config::RiskConfig;
use crate::core::conflict::SizingPolicy;
use crate::errors::EngineError;
use crate::types::{Action, Degradation, Direction, Quote, RiskContext};

const SIZE_DP: u32 = 8;

// ═══════════════════════════════════════════════════════════════════════════
// Inputs / outputs
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SizingInput<'a> {
    /// Direction after conflict resolution.
    pub direction: Direction,
    pub magnitude: Decimal,
    pub confidence: Decimal,
    pub sizing: SizingPolicy,
    pub quote: Option<&'a Quote>,
    /// `None` when the portfolio provider could not answer.
    pub risk: Option<&'a RiskContext>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizingDecision {
    pub action: Action,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub risk_reward_ratio: Option<Decimal>,
    pub position_size_pct: Decimal,
    pub degradation: Option<Degradation>,
    pub notes: Vec<String>,
}

impl SizingDecision {
    fn flat(action: Action, entry_price: Decimal) -> Self {
        Self {
            action,
            entry_price,
            stop_loss: None,
            take_profit: None,
            risk_reward_ratio: None,
            position_size_pct: Decimal::ZERO,
            degradation: None,
            notes: Vec::new(),
        }
    }

    fn downgrade(mut self, degradation: Degradation, note: String) -> Self {
        self.action = Action::Watch;
        self.position_size_pct = Decimal::ZERO;
        self.degradation = Some(degradation);
        self.notes.push(note);
        self
    }
}

/// Exit levels for one directional trade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitLevels {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_reward_ratio: Decimal,
}

// ═══════════════════════════════════════════════════════════════════════════
// RiskAdjustedSizer
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct RiskAdjustedSizer {
    pub config: RiskConfig,
}

impl RiskAdjustedSizer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn size(&self, input: &SizingInput<'_>) -> SizingDecision {
        let entry = input.quote.map_or(Decimal::ZERO, |q| q.price);

        if !input.direction.is_directional() {
            return SizingDecision::flat(Action::Hold, entry);
        }

        let Some(quote) = input.quote else {
            return SizingDecision::flat(Action::Watch, entry).downgrade(
                Degradation::NoMarketQuote,
                "no market quote: cannot place entry or exits".into(),
            );
        };

        let risk = match input.risk {
            Some(risk) => risk,
            None => {
                return SizingDecision::flat(Action::Watch, entry).downgrade(
                    Degradation::InvalidRiskContext {
                        detail: "risk context unavailable".into(),
                    },
                    "risk context unavailable: size zeroed".into(),
                )
            }
        };
        if let Err(e) = validate_risk_context(risk) {
            warn!(symbol = %quote.symbol, error = %e, "invalid risk context");
            let detail = match e {
                EngineError::InvalidRiskContext { reason } => reason,
                other => other.to_string(),
            };
            return SizingDecision::flat(Action::Watch, entry).downgrade(
                Degradation::InvalidRiskContext {
                    detail: detail.clone(),
                },
                format!("invalid risk context: {detail}"),
            );
        }

        let is_long = input.direction == Direction::Buy;
        let levels = match self.exit_levels(quote, is_long) {
            Ok(levels) => levels,
            Err(reason) => {
                debug!(symbol = %quote.symbol, %reason, "exit levels rejected");
                return SizingDecision::flat(Action::Watch, entry).downgrade(
                    Degradation::UnplaceableExits {
                        detail: reason.clone(),
                    },
                    format!("cannot place exits: {reason}"),
                );
            }
        };

        let mut decision = SizingDecision {
            action: Action::from(input.direction),
            entry_price: quote.price,
            stop_loss: Some(levels.stop_loss),
            take_profit: Some(levels.take_profit),
            risk_reward_ratio: Some(levels.risk_reward_ratio),
            position_size_pct: Decimal::ZERO,
            degradation: None,
            notes: Vec::new(),
        };

        if levels.risk_reward_ratio < self.config.min_risk_reward {
            let ratio = levels.risk_reward_ratio.round_dp(2);
            return decision.downgrade(
                Degradation::RiskRewardBelowMinimum {
                    ratio: levels.risk_reward_ratio,
                    minimum: self.config.min_risk_reward,
                },
                format!(
                    "risk/reward {ratio} below minimum {}: downgraded to WATCH",
                    self.config.min_risk_reward
                ),
            );
        }

        if input.confidence < self.config.min_action_confidence {
            return decision.downgrade(
                Degradation::BelowActionConfidence {
                    confidence: input.confidence,
                    minimum: self.config.min_action_confidence,
                },
                format!(
                    "confidence {} below action minimum {}",
                    input.confidence.round_dp(3),
                    self.config.min_action_confidence
                ),
            );
        }

        let headroom = risk.available_risk_budget_pct - risk.open_correlated_exposure_pct;
        let cap = risk.max_position_pct.min(headroom);
        if cap <= Decimal::ZERO {
            return decision.downgrade(
                Degradation::RiskBudgetExhausted,
                format!(
                    "risk budget exhausted: {} available, {} already correlated",
                    risk.available_risk_budget_pct, risk.open_correlated_exposure_pct
                ),
            );
        }

        let raw = self.kelly_size(input.confidence, input.magnitude) * input.sizing.factor();
        let size = raw.min(cap).max(Decimal::ZERO).round_dp(SIZE_DP);
        if size.is_zero() {
            return decision.downgrade(
                Degradation::BelowActionConfidence {
                    confidence: input.confidence,
                    minimum: self.config.min_action_confidence,
                },
                "position size rounds to zero".into(),
            );
        }
        if raw > cap {
            decision
                .notes
                .push(format!("size capped at {cap} by portfolio limits"));
        }
        if let SizingPolicy::Reduced(factor) = input.sizing {
            decision
                .notes
                .push(format!("size reduced ×{factor} for non-aggressive entry"));
        }
        decision.position_size_pct = size;

        debug!(
            symbol = %quote.symbol,
            action = %decision.action,
            size = %size,
            rr = %levels.risk_reward_ratio,
            "position sized"
        );
        decision
    }

    /// `confidence × |magnitude| × kelly_fraction`.
    pub fn kelly_size(&self, confidence: Decimal, magnitude: Decimal) -> Decimal {
        (confidence * magnitude.abs() * self.config.kelly_fraction).max(Decimal::ZERO)
    }

    /// Stop at `k × ATR`; target at `target_rr × stop distance`, pulled in
    /// to the nearest resistance (long) or support (short) when closer.
    pub fn exit_levels(&self, quote: &Quote, is_long: bool) -> Result<ExitLevels, String> {
        let entry = quote.price;
        if entry <= Decimal::ZERO {
            return Err(format!("non-positive price {entry}"));
        }
        if quote.atr <= Decimal::ZERO {
            return Err(format!("non-positive ATR {}", quote.atr));
        }

        let stop_loss = self.calculate_stop_loss(entry, quote.atr, is_long);
        if stop_loss <= Decimal::ZERO {
            return Err(format!("ATR stop {stop_loss} is not a valid price"));
        }

        let mut take_profit = self.calculate_take_profit(entry, stop_loss, is_long);
        let level = if is_long {
            quote.nearest_resistance.filter(|r| *r > entry && *r < take_profit)
        } else {
            quote.nearest_support.filter(|s| *s < entry && *s > take_profit)
        };
        if let Some(level) = level {
            take_profit = level;
        }
        if take_profit <= Decimal::ZERO {
            return Err(format!("target {take_profit} is not a valid price"));
        }

        Ok(ExitLevels {
            stop_loss,
            take_profit,
            risk_reward_ratio: calculate_risk_reward_ratio(entry, stop_loss, take_profit),
        })
    }

    pub fn calculate_stop_loss(&self, entry_price: Decimal, atr: Decimal, is_long: bool) -> Decimal {
        let stop_distance = atr * self.config.atr_stop_multiplier;
        if is_long {
            entry_price - stop_distance
        } else {
            entry_price + stop_distance
        }
    }

    pub fn calculate_take_profit(
        &self,
        entry_price: Decimal,
        stop_loss: Decimal,
        is_long: bool,
    ) -> Decimal {
        let risk = (entry_price - stop_loss).abs();
        let reward = risk * self.config.target_risk_reward;
        if is_long {
            entry_price + reward
        } else {
            entry_price - reward
        }
    }
}

/// Reward distance over risk distance; zero when risk is zero.
pub fn calculate_risk_reward_ratio(
    entry_price: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
) -> Decimal {
    let risk = (entry_price - stop_loss).abs();
    let reward = (take_profit - entry_price).abs();
    if risk > Decimal::ZERO {
        reward / risk
    } else {
        Decimal::ZERO
    }
}

/// Reject negative budgets and a zero available budget.
pub fn validate_risk_context(risk: &RiskContext) -> Result<(), EngineError> {
    let fields = [
        ("available_risk_budget_pct", risk.available_risk_budget_pct),
        ("max_position_pct", risk.max_position_pct),
        ("open_correlated_exposure_pct", risk.open_correlated_exposure_pct),
    ];
    for (name, value) in fields {
        if value < Decimal::ZERO {
            return Err(EngineError::InvalidRiskContext {
                reason: format!("{name} is negative ({value})"),
            });
        }
    }
    if risk.available_risk_budget_pct.is_zero() {
        return Err(EngineError::InvalidRiskContext {
            reason: "available_risk_budget_pct is zero".into(),
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::testing::{ample_risk, quote};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn sizer() -> RiskAdjustedSizer {
        RiskAdjustedSizer::new(RiskConfig::default())
    }

    fn input<'a>(direction: Direction, q: &'a Quote, risk: &'a RiskContext) -> SizingInput<'a> {
        SizingInput {
            direction,
            magnitude: dec!(0.6),
            confidence: dec!(0.8),
            sizing: SizingPolicy::Full,
            quote: Some(q),
            risk: Some(risk),
        }
    }

    #[test]
    fn test_long_levels_and_size() {
        let q = quote("AAPL", dec!(100), dec!(2));
        let risk = ample_risk();
        let d = sizer().size(&input(Direction::Buy, &q, &risk));

        assert_eq!(d.action, Action::Buy);
        assert_eq!(d.stop_loss, Some(dec!(97)));
        assert_eq!(d.take_profit, Some(dec!(106)));
        assert_eq!(d.risk_reward_ratio, Some(dec!(2)));
        // 0.8 × 0.6 × 0.25
        assert_eq!(d.position_size_pct, dec!(0.12));
    }

    #[test]
    fn test_short_levels_mirror() {
        let q = quote("AAPL", dec!(100), dec!(2));
        let risk = ample_risk();
        let d = sizer().size(&input(Direction::Sell, &q, &risk));
        assert_eq!(d.action, Action::Sell);
        assert_eq!(d.stop_loss, Some(dec!(103)));
        assert_eq!(d.take_profit, Some(dec!(94)));
    }

    #[test]
    fn test_size_clamped_to_budget_headroom() {
        let q = quote("AAPL", dec!(100), dec!(2));
        let risk = RiskContext {
            available_risk_budget_pct: dec!(0.10),
            max_position_pct: dec!(0.05),
            open_correlated_exposure_pct: dec!(0.07),
        };
        let d = sizer().size(&input(Direction::Buy, &q, &risk));
        assert_eq!(d.position_size_pct, dec!(0.03));
        assert!(d.notes.iter().any(|n| n.contains("capped")));
    }

    #[test]
    fn test_reduced_policy_halves_size() {
        let q = quote("AAPL", dec!(100), dec!(2));
        let risk = ample_risk();
        let mut i = input(Direction::Buy, &q, &risk);
        i.sizing = SizingPolicy::Reduced(dec!(0.5));
        assert_eq!(sizer().size(&i).position_size_pct, dec!(0.06));
    }

    #[test]
    fn test_zero_budget_downgrades_to_watch() {
        let q = quote("AAPL", dec!(100), dec!(2));
        let risk = RiskContext {
            available_risk_budget_pct: Decimal::ZERO,
            max_position_pct: dec!(0.05),
            open_correlated_exposure_pct: Decimal::ZERO,
        };
        let mut i = input(Direction::Buy, &q, &risk);
        i.magnitude = Decimal::ONE;
        i.confidence = Decimal::ONE;
        let d = sizer().size(&i);
        assert_eq!(d.action, Action::Watch);
        assert_eq!(d.position_size_pct, Decimal::ZERO);
        assert!(matches!(d.degradation, Some(Degradation::InvalidRiskContext { .. })));
    }

    #[test]
    fn test_negative_budget_is_invalid() {
        let risk = RiskContext {
            available_risk_budget_pct: dec!(0.1),
            max_position_pct: dec!(-0.01),
            open_correlated_exposure_pct: Decimal::ZERO,
        };
        let err = validate_risk_context(&risk).unwrap_err();
        assert!(err.to_string().contains("max_position_pct"));
    }

    #[test]
    fn test_exhausted_budget_is_watch() {
        let q = quote("AAPL", dec!(100), dec!(2));
        let risk = RiskContext {
            available_risk_budget_pct: dec!(0.05),
            max_position_pct: dec!(0.05),
            open_correlated_exposure_pct: dec!(0.05),
        };
        let d = sizer().size(&input(Direction::Buy, &q, &risk));
        assert_eq!(d.action, Action::Watch);
        assert_eq!(d.degradation, Some(Degradation::RiskBudgetExhausted));
    }

    #[test]
    fn test_nearby_resistance_breaks_rr_floor() {
        let mut q = quote("AAPL", dec!(100), dec!(2));
        q.nearest_resistance = Some(dec!(103));
        let risk = ample_risk();
        let d = sizer().size(&input(Direction::Buy, &q, &risk));

        assert_eq!(d.action, Action::Watch);
        assert_eq!(d.position_size_pct, Decimal::ZERO);
        assert_eq!(d.risk_reward_ratio, Some(dec!(1)));
        assert!(matches!(
            d.degradation,
            Some(Degradation::RiskRewardBelowMinimum { .. })
        ));
    }

    #[test]
    fn test_missing_quote_is_watch() {
        let risk = ample_risk();
        let i = SizingInput {
            direction: Direction::Sell,
            magnitude: dec!(0.5),
            confidence: dec!(0.5),
            sizing: SizingPolicy::Full,
            quote: None,
            risk: Some(&risk),
        };
        let d = sizer().size(&i);
        assert_eq!(d.action, Action::Watch);
        assert_eq!(d.degradation, Some(Degradation::NoMarketQuote));
    }

    #[test]
    fn test_short_target_below_zero_is_watch() {
        // Stop 160, target 100 - 2 × 60 = -20.
        let q = quote("AAPL", dec!(100), dec!(40));
        let risk = ample_risk();
        let d = sizer().size(&input(Direction::Sell, &q, &risk));

        assert_eq!(d.action, Action::Watch);
        assert_eq!(d.position_size_pct, Decimal::ZERO);
        assert!(matches!(d.degradation, Some(Degradation::UnplaceableExits { .. })));
        assert!(d.notes.iter().any(|n| n.contains("cannot place exits")));
    }

    #[test]
    fn test_long_stop_below_zero_is_watch() {
        let q = quote("AAPL", dec!(100), dec!(80));
        let risk = ample_risk();
        let d = sizer().size(&input(Direction::Buy, &q, &risk));
        assert_eq!(d.action, Action::Watch);
        assert!(matches!(d.degradation, Some(Degradation::UnplaceableExits { .. })));
    }

    #[test]
    fn test_hold_passes_through() {
        let q = quote("AAPL", dec!(100), dec!(2));
        let risk = ample_risk();
        let d = sizer().size(&input(Direction::Hold, &q, &risk));
        assert_eq!(d.action, Action::Hold);
        assert!(d.stop_loss.is_none());
    }

    fn price() -> impl Strategy<Value = Decimal> {
        (100u32..=1_000_000).prop_map(|v| Decimal::new(v as i64, 2))
    }

    proptest! {
        #[test]
        fn executable_sizing_respects_order_and_rr_floor(
            entry in price(),
            atr_bp in 1u32..=6000,
            level_bp in 1u32..=3000,
            long in any::<bool>(),
            with_level in any::<bool>(),
            conf in 0u32..=100,
            mag in 0u32..=100,
        ) {
            let atr = entry * Decimal::new(atr_bp as i64, 4);
            let mut q = quote("X", entry, atr);
            if with_level {
                let offset = entry * Decimal::new(level_bp as i64, 4);
                q.nearest_resistance = Some(entry + offset);
                q.nearest_support = Some(entry - offset);
            }
            let risk = ample_risk();
            let i = SizingInput {
                direction: if long { Direction::Buy } else { Direction::Sell },
                magnitude: Decimal::new(mag as i64, 2),
                confidence: Decimal::new(conf as i64, 2),
                sizing: SizingPolicy::Full,
                quote: Some(&q),
                risk: Some(&risk),
            };
            let d = sizer().size(&i);
            if d.action.is_executable() {
                let sl = d.stop_loss.unwrap();
                let tp = d.take_profit.unwrap();
                prop_assert!(sl > Decimal::ZERO && tp > Decimal::ZERO);
                if d.action == Action::Buy {
                    prop_assert!(sl < d.entry_price && d.entry_price < tp);
                } else {
                    prop_assert!(tp < d.entry_price && d.entry_price < sl);
                }
                prop_assert!(d.risk_reward_ratio.unwrap() >= dec!(2));
                prop_assert!(d.position_size_pct > Decimal::ZERO);
            } else {
                prop_assert_eq!(d.position_size_pct, Decimal::ZERO);
            }
        }
    }
}
