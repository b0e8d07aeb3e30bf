//! Conflict detection and deterministic resolution.
//!
//! Detection looks for opposing strong signals within a timeframe, a sign
//! split between the shortest and longest timeframe, and low consensus with
//! the fused direction. Resolution is applied in a fixed order: risk-override
//! veto, strong consensus, moderate consensus, otherwise HOLD. Every
//! detected conflict is stamped with the resolution that was applied.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::ConflictConfig;
use crate::types::{
    ConflictKind, ConflictRecord, ConflictResolution, Degradation, Direction, FusedScore, Signal,
    SourceId, WeightSnapshot,
};

/// Position sizing allowed by the resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingPolicy {
    Full,
    /// Size is multiplied by the factor.
    Reduced(Decimal),
}

impl SizingPolicy {
    pub fn factor(&self) -> Decimal {
        match self {
            Self::Full => Decimal::ONE,
            Self::Reduced(factor) => *factor,
        }
    }
}

/// Outcome of conflict resolution for one fused score.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Direction after the policy; HOLD when vetoed or unresolved.
    pub direction: Direction,
    pub sizing: SizingPolicy,
    /// Unweighted fraction of responding sources voting with the majority.
    pub consensus: Decimal,
    /// Dissenters' share of responding weight.
    pub dissent_share: Decimal,
    pub unresolved: bool,
    pub vetoed_by: Option<SourceId>,
    pub degradation: Option<Degradation>,
    /// Reasoning lines describing what the resolver did.
    pub notes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConflictResolver {
    config: ConflictConfig,
}

impl ConflictResolver {
    pub fn new(config: ConflictConfig) -> Self {
        Self { config }
    }

    /// Detect conflicts in `fused`, attach them with their resolution, and
    /// return the resolved direction and sizing.
    ///
    /// `risk_overrides` names the sources allowed to veto a BUY.
    pub fn resolve(
        &self,
        fused: &mut FusedScore,
        weights: &WeightSnapshot,
        risk_overrides: &BTreeSet<SourceId>,
    ) -> Resolution {
        let majority = fused.direction;
        let votes = net_votes(&fused.contributing_signals);
        let consensus = consensus(&votes, majority);
        let dissent_share = dissent_share(&votes, majority, weights);

        let mut detected = self.detect(fused, &votes, majority, consensus);
        let mut notes = Vec::new();

        // -- (1) risk-override veto -----------------------------------------
        if majority == Direction::Buy {
            if let Some(veto) = self.firing_override(&fused.contributing_signals, risk_overrides) {
                if let Some(buy) = strongest(&fused.contributing_signals, Direction::Buy) {
                    detected.push(ConflictRecord {
                        signal_a: buy.clone(),
                        signal_b: veto.clone(),
                        kind: ConflictKind::OpposingDirection,
                        resolution: ConflictResolution::Vetoed,
                        detail: format!("risk override {} fired {}", veto.source, veto.direction),
                    });
                }
                stamp(&mut detected, ConflictResolution::Vetoed);
                notes.push(format!(
                    "risk override {} ({} strength {}) vetoed BUY",
                    veto.source,
                    veto.direction,
                    veto.strength.round_dp(2)
                ));
                let source = veto.source.clone();
                debug!(symbol = %fused.symbol, source = %source, "BUY vetoed by risk override");
                fused.conflicts = detected;
                return Resolution {
                    direction: Direction::Hold,
                    sizing: SizingPolicy::Full,
                    consensus,
                    dissent_share,
                    unresolved: false,
                    vetoed_by: Some(source.clone()),
                    degradation: Some(Degradation::RiskOverrideVeto { source }),
                    notes,
                };
            }
        }

        // -- fused HOLD: nothing to accept -----------------------------------
        if !majority.is_directional() {
            let unresolved = !detected.is_empty();
            stamp(&mut detected, ConflictResolution::Unresolved);
            if unresolved {
                notes.push(format!(
                    "unresolved conflict: {} conflict(s) with no directional majority",
                    detected.len()
                ));
            }
            fused.conflicts = detected;
            return Resolution {
                direction: Direction::Hold,
                sizing: SizingPolicy::Full,
                consensus,
                dissent_share,
                unresolved,
                vetoed_by: None,
                degradation: None,
                notes,
            };
        }

        let diverging = detected
            .iter()
            .any(|c| c.kind == ConflictKind::TimeframeDivergence);

        // -- (2)/(3)/(4) consensus bands --------------------------------------
        let resolution = if consensus >= self.config.strong_consensus {
            let mut sizing = SizingPolicy::Full;
            stamp(&mut detected, ConflictResolution::AcceptedMajority);
            if diverging {
                sizing = SizingPolicy::Reduced(self.config.reduced_size_factor);
                for c in detected
                    .iter_mut()
                    .filter(|c| c.kind == ConflictKind::TimeframeDivergence)
                {
                    c.resolution = ConflictResolution::Discounted;
                }
                notes.push("short and long timeframes diverge: size reduced".to_string());
            }
            if dissent_share > Decimal::ZERO {
                notes.push(format!(
                    "strong consensus {}%: dissent discounts confidence only",
                    pct(consensus)
                ));
            }
            Resolution {
                direction: majority,
                sizing,
                consensus,
                dissent_share,
                unresolved: false,
                vetoed_by: None,
                degradation: None,
                notes,
            }
        } else if consensus >= self.config.low_consensus {
            stamp(&mut detected, ConflictResolution::Discounted);
            notes.push(format!(
                "moderate consensus {}%: {} kept at reduced size",
                pct(consensus),
                majority
            ));
            Resolution {
                direction: majority,
                sizing: SizingPolicy::Reduced(self.config.reduced_size_factor),
                consensus,
                dissent_share,
                unresolved: false,
                vetoed_by: None,
                degradation: None,
                notes,
            }
        } else {
            stamp(&mut detected, ConflictResolution::Unresolved);
            notes.push(format!(
                "unresolved conflict: consensus {}% below {}%",
                pct(consensus),
                pct(self.config.low_consensus)
            ));
            Resolution {
                direction: Direction::Hold,
                sizing: SizingPolicy::Full,
                consensus,
                dissent_share,
                unresolved: true,
                vetoed_by: None,
                degradation: Some(Degradation::UnresolvedConflict {
                    consensus,
                    minimum: self.config.low_consensus,
                }),
                notes,
            }
        };

        debug!(
            symbol = %fused.symbol,
            majority = %majority,
            consensus = %consensus,
            conflicts = detected.len(),
            resolved = %resolution.direction,
            "conflicts resolved"
        );
        fused.conflicts = detected;
        resolution
    }

    // -----------------------------------------------------------------------
    // Detection
    // -----------------------------------------------------------------------

    fn detect(
        &self,
        fused: &FusedScore,
        votes: &BTreeMap<SourceId, Direction>,
        majority: Direction,
        consensus: Decimal,
    ) -> Vec<ConflictRecord> {
        let signals = &fused.contributing_signals;
        let mut out = Vec::new();

        // OPPOSING_DIRECTION: strong opposite calls within one timeframe.
        let threshold = self.config.opposing_strength_threshold;
        for (i, a) in signals.iter().enumerate() {
            for b in &signals[i + 1..] {
                if a.timeframe == b.timeframe
                    && a.source != b.source
                    && a.direction.is_directional()
                    && b.direction == a.direction.opposite()
                    && a.strength > threshold
                    && b.strength > threshold
                {
                    let (with, against) = if b.direction == majority { (b, a) } else { (a, b) };
                    out.push(record(
                        with,
                        against,
                        ConflictKind::OpposingDirection,
                        format!(
                            "{} {} {} vs {} {} {}",
                            with.source,
                            with.direction,
                            with.strength.round_dp(2),
                            against.source,
                            against.direction,
                            against.strength.round_dp(2)
                        ),
                    ));
                }
            }
        }

        // TIMEFRAME_DIVERGENCE: shortest and longest timeframe disagree.
        let shortest = fused.per_timeframe.iter().next();
        let longest = fused.per_timeframe.iter().next_back();
        if let (Some((&short_tf, &short)), Some((&long_tf, &long))) = (shortest, longest) {
            let short_dir = Direction::of_sign(short);
            let long_dir = Direction::of_sign(long);
            if short_dir.is_directional() && long_dir == short_dir.opposite() {
                let a = strongest_in(signals, short_tf, short_dir);
                let b = strongest_in(signals, long_tf, long_dir);
                if let (Some(a), Some(b)) = (a, b) {
                    out.push(record(
                        a,
                        b,
                        ConflictKind::TimeframeDivergence,
                        format!(
                            "{short_tf} scores {} but {long_tf} scores {}",
                            short.round_dp(3),
                            long.round_dp(3)
                        ),
                    ));
                }
            }
        }

        // LOW_CONSENSUS: too few sources side with the majority.
        if majority.is_directional() && consensus < self.config.low_consensus {
            let dissent_dir = majority.opposite();
            let dissenter = votes
                .iter()
                .find(|(_, d)| **d == dissent_dir)
                .and_then(|(id, _)| strongest_of_source(signals, id));
            if let (Some(a), Some(b)) = (strongest(signals, majority), dissenter) {
                out.push(record(
                    a,
                    b,
                    ConflictKind::LowConsensus,
                    format!(
                        "{}% of sources agree with {majority}",
                        pct(consensus)
                    ),
                ));
            }
        }

        out
    }

    /// First risk-override signal that fires. A HOLD fires at any strength;
    /// a SELL must reach `risk_override_min_strength`.
    fn firing_override<'a>(
        &self,
        signals: &'a [Signal],
        risk_overrides: &BTreeSet<SourceId>,
    ) -> Option<&'a Signal> {
        signals.iter().find(|s| {
            risk_overrides.contains(&s.source)
                && match s.direction {
                    Direction::Hold => true,
                    Direction::Sell => s.strength >= self.config.risk_override_min_strength,
                    Direction::Buy => false,
                }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Free helpers
// ═══════════════════════════════════════════════════════════════════════════

/// Net vote per source: the sign of its summed signed strength.
pub fn net_votes(signals: &[Signal]) -> BTreeMap<SourceId, Direction> {
    let mut net: BTreeMap<SourceId, Decimal> = BTreeMap::new();
    for s in signals {
        *net.entry(s.source.clone()).or_default() += s.signed_strength();
    }
    net.into_iter()
        .map(|(id, score)| (id, Direction::of_sign(score)))
        .collect()
}

/// Fraction of responding sources that agree with `majority`. HOLD voters
/// count as responders that do not agree. Zero when nobody responded or the
/// majority is HOLD.
pub fn consensus(votes: &BTreeMap<SourceId, Direction>, majority: Direction) -> Decimal {
    if !majority.is_directional() || votes.is_empty() {
        return Decimal::ZERO;
    }
    let agreeing = votes.values().filter(|d| **d == majority).count();
    Decimal::from(agreeing) / Decimal::from(votes.len())
}

fn dissent_share(
    votes: &BTreeMap<SourceId, Direction>,
    majority: Direction,
    weights: &WeightSnapshot,
) -> Decimal {
    if !majority.is_directional() {
        return Decimal::ZERO;
    }
    let renormalized = weights.renormalized_over(votes.keys());
    votes
        .iter()
        .filter(|(_, d)| **d == majority.opposite())
        .map(|(id, _)| renormalized.get(id).copied().unwrap_or_default())
        .sum()
}

fn record(a: &Signal, b: &Signal, kind: ConflictKind, detail: String) -> ConflictRecord {
    ConflictRecord {
        signal_a: a.clone(),
        signal_b: b.clone(),
        kind,
        resolution: ConflictResolution::Unresolved,
        detail,
    }
}

fn stamp(records: &mut [ConflictRecord], resolution: ConflictResolution) {
    for r in records {
        r.resolution = resolution;
    }
}

fn strongest(signals: &[Signal], direction: Direction) -> Option<&Signal> {
    signals
        .iter()
        .filter(|s| s.direction == direction)
        .max_by(|a, b| a.strength.cmp(&b.strength).then_with(|| b.sort_key().cmp(&a.sort_key())))
}

fn strongest_in(
    signals: &[Signal],
    tf: crate::types::Timeframe,
    direction: Direction,
) -> Option<&Signal> {
    signals
        .iter()
        .filter(|s| s.timeframe == tf && s.direction == direction)
        .max_by(|a, b| a.strength.cmp(&b.strength).then_with(|| b.source.cmp(&a.source)))
}

fn strongest_of_source<'a>(signals: &'a [Signal], source: &SourceId) -> Option<&'a Signal> {
    signals
        .iter()
        .filter(|s| &s.source == source)
        .max_by(|a, b| a.strength.cmp(&b.strength).then_with(|| b.timeframe.cmp(&a.timeframe)))
}

fn pct(fraction: Decimal) -> Decimal {
    (fraction * Decimal::ONE_HUNDRED).round_dp(0)
}
