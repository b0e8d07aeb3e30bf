//! Pure mappings from collaborator payloads to `(direction, strength,
//! confidence)`.
//!
//! Pure helper functions (no I/O) so every threshold is unit-testable.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::constants::{RSI_OVERBOUGHT, RSI_OVERSOLD, RSI_SPAN, SR_PROXIMITY};
use crate::types::{
    Direction, IndicatorSet, MlPrediction, Pattern, SentimentReading, VolumeProfile,
};

/// Normalized opinion before it is stamped into a `Signal`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub direction: Direction,
    pub strength: Decimal,
    pub confidence: Decimal,
    pub explanation: String,
}

impl Reading {
    fn from_score(score: Decimal, neutral_band: Decimal, confidence: Decimal, explanation: String) -> Self {
        let score = score.clamp(dec!(-1), dec!(1));
        let direction = Direction::from_score(score, neutral_band);
        Self {
            direction,
            strength: score.abs(),
            confidence,
            explanation,
        }
    }

    fn neutral(confidence: Decimal, explanation: &str) -> Self {
        Self {
            direction: Direction::Hold,
            strength: Decimal::ZERO,
            confidence,
            explanation: explanation.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Technical
// ---------------------------------------------------------------------------

/// RSI extremes dominate: RSI > 70 is SELL with strength `(rsi-70)/30`,
/// RSI < 30 is BUY with strength `(30-rsi)/30`. Otherwise EMA alignment,
/// MACD histogram, mild RSI, and Bollinger position are summed.
pub fn map_indicators(ind: &IndicatorSet, calibration: Decimal, neutral_band: Decimal) -> Reading {
    if let Some(rsi) = ind.rsi {
        if rsi > RSI_OVERBOUGHT {
            return Reading {
                direction: Direction::Sell,
                strength: ((rsi - RSI_OVERBOUGHT) / RSI_SPAN).min(Decimal::ONE),
                confidence: calibration,
                explanation: format!("RSI {} overbought", rsi.round_dp(1)),
            };
        }
        if rsi < RSI_OVERSOLD {
            return Reading {
                direction: Direction::Buy,
                strength: ((RSI_OVERSOLD - rsi) / RSI_SPAN).min(Decimal::ONE),
                confidence: calibration,
                explanation: format!("RSI {} oversold", rsi.round_dp(1)),
            };
        }
    }

    let mut score = Decimal::ZERO;
    let mut parts: Vec<&str> = Vec::new();

    if let (Some(fast), Some(slow)) = (ind.ema_fast, ind.ema_slow) {
        if fast > slow {
            score += dec!(0.3);
            parts.push("EMA bullish");
        } else if fast < slow {
            score -= dec!(0.3);
            parts.push("EMA bearish");
        }
    }

    if let Some(hist) = ind.macd_histogram {
        if hist > Decimal::ZERO {
            score += dec!(0.2);
            parts.push("MACD positive");
        } else if hist < Decimal::ZERO {
            score -= dec!(0.2);
            parts.push("MACD negative");
        }
    }

    if let Some(rsi) = ind.rsi {
        if rsi < dec!(40) {
            score += dec!(0.1);
        } else if rsi > dec!(60) {
            score -= dec!(0.1);
        }
    }

    if let (Some(price), Some(upper), Some(lower)) = (ind.price, ind.bb_upper, ind.bb_lower) {
        let range = upper - lower;
        if range > Decimal::ZERO {
            let position = (price - lower) / range;
            score += (dec!(0.5) - position) * dec!(0.5);
            parts.push("BB position");
        }
    }

    if parts.is_empty() && ind.rsi.is_none() {
        return Reading::neutral(calibration, "no indicators available");
    }

    let explanation = if parts.is_empty() {
        "RSI neutral".to_string()
    } else {
        parts.join(", ")
    };
    Reading::from_score(score, neutral_band, calibration, explanation)
}

// ---------------------------------------------------------------------------
// Pattern
// ---------------------------------------------------------------------------

/// Mean of `bias × reliability × completion` over detected patterns.
pub fn map_patterns(patterns: &[Pattern], calibration: Decimal, neutral_band: Decimal) -> Reading {
    if patterns.is_empty() {
        return Reading::neutral(calibration, "no patterns detected");
    }

    let net: Decimal = patterns
        .iter()
        .map(|p| p.bias.sign() * p.reliability * p.completion)
        .sum::<Decimal>()
        / Decimal::from(patterns.len());

    let strongest = patterns
        .iter()
        .max_by(|a, b| {
            (a.reliability * a.completion)
                .cmp(&(b.reliability * b.completion))
                .then_with(|| b.name.cmp(&a.name))
        })
        .map(|p| p.name.as_str())
        .unwrap_or("pattern");

    Reading::from_score(
        net,
        neutral_band,
        calibration,
        format!("{} pattern(s), strongest {strongest}", patterns.len()),
    )
}

// ---------------------------------------------------------------------------
// Sentiment
// ---------------------------------------------------------------------------

/// Polarity maps to direction; the service's own confidence is kept.
pub fn map_sentiment(reading: &SentimentReading, neutral_band: Decimal) -> Reading {
    Reading::from_score(
        reading.score,
        neutral_band,
        reading.confidence.clamp(Decimal::ZERO, Decimal::ONE),
        format!("sentiment score {}", reading.score.round_dp(2)),
    )
}

// ---------------------------------------------------------------------------
// ML model
// ---------------------------------------------------------------------------

/// Strength is the edge over a coin flip, `2p - 1`; confidence is the
/// model probability.
pub fn map_prediction(pred: &MlPrediction, neutral_band: Decimal) -> Reading {
    let probability = pred.probability.clamp(Decimal::ZERO, Decimal::ONE);
    let edge = ((probability - dec!(0.5)) * dec!(2)).max(Decimal::ZERO);
    let score = edge * pred.direction.sign();
    Reading::from_score(
        score,
        neutral_band,
        probability,
        format!("model predicts {} p={}", pred.direction, probability.round_dp(2)),
    )
}

// ---------------------------------------------------------------------------
// Volume / support-resistance
// ---------------------------------------------------------------------------

/// Above-average volume confirms the bar's direction; a nearby support or
/// resistance level tilts the score toward a bounce.
pub fn map_volume(profile: &VolumeProfile, calibration: Decimal, neutral_band: Decimal) -> Reading {
    let confirmation = ((profile.volume_ratio - Decimal::ONE) / dec!(2))
        .clamp(Decimal::ZERO, Decimal::ONE);
    let momentum = Direction::of_sign(profile.price_change_pct).sign() * confirmation;
    let mut score = momentum * dec!(0.7);
    let mut notes = vec![format!("volume {}x avg", profile.volume_ratio.round_dp(2))];

    if profile.price > Decimal::ZERO {
        if let Some(support) = profile.support {
            if support <= profile.price && (profile.price - support) / profile.price <= SR_PROXIMITY {
                score += dec!(0.3);
                notes.push(format!("near support {support}"));
            }
        }
        if let Some(resistance) = profile.resistance {
            if resistance >= profile.price
                && (resistance - profile.price) / profile.price <= SR_PROXIMITY
            {
                score -= dec!(0.3);
                notes.push(format!("near resistance {resistance}"));
            }
        }
    }

    Reading::from_score(score, neutral_band, calibration, notes.join(", "))
}
