//! Outcome tracking and source-weight learning.
//!
//! Every published BUY/SELL recommendation moves through
//! `PUBLISHED → {TARGET_HIT, STOP_HIT, EXPIRED}`. A terminal transition emits
//! one [`PerformanceSample`] per contributing source, folds it into that
//! source's accuracy EMA, and publishes a fresh [`WeightSnapshot`].
//!
//! The tracker is the only writer of weights. Readers hold a [`WeightHandle`]
//! and clone the current `Arc` out of a `watch` channel; a snapshot already
//! in use by an in-flight fusion is never touched.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::FeedbackConfig;
use crate::core::audit_log::AuditLog;
use crate::errors::EngineError;
use crate::types::{
    Direction, OutcomeEvent, OutcomeTransition, PerformanceSample, Recommendation,
    RecommendationState, SourceId, WeightSnapshot,
};

// ═══════════════════════════════════════════════════════════════════════════
// Weight handle
// ═══════════════════════════════════════════════════════════════════════════

/// Read side of the current weight snapshot.
#[derive(Debug, Clone)]
pub struct WeightHandle {
    rx: watch::Receiver<Arc<WeightSnapshot>>,
}

impl WeightHandle {
    /// The snapshot current at the time of the call.
    pub fn current(&self) -> Arc<WeightSnapshot> {
        self.rx.borrow().clone()
    }

    /// Receiver that wakes on every publish.
    pub fn subscribe(&self) -> watch::Receiver<Arc<WeightSnapshot>> {
        self.rx.clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tracker
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct Tracked {
    symbol: String,
    direction: Direction,
    entry: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    expires_at: DateTime<Utc>,
    votes: BTreeMap<SourceId, Direction>,
    last_price: Option<Decimal>,
}

#[derive(Debug, Default)]
struct TrackerState {
    accuracy: BTreeMap<SourceId, (Decimal, DateTime<Utc>)>,
    open: HashMap<String, Tracked>,
    /// Terminal states of recently resolved ids, for `AlreadyResolved`.
    /// Bounded by `resolved_retention`; older ids report as unknown.
    resolved: HashMap<String, RecommendationState>,
    resolved_order: VecDeque<String>,
    history: VecDeque<PerformanceSample>,
    version: u64,
}

pub struct PerformanceFeedbackTracker {
    config: FeedbackConfig,
    state: Mutex<TrackerState>,
    weights_tx: watch::Sender<Arc<WeightSnapshot>>,
    audit: Option<AuditLog>,
}

impl PerformanceFeedbackTracker {
    /// Start with every configured source at `initial_accuracy`, i.e. equal
    /// weights, as snapshot version 0.
    pub fn new(config: FeedbackConfig, sources: &[SourceId], audit: Option<AuditLog>) -> Self {
        let now = Utc::now();
        let accuracy: BTreeMap<SourceId, (Decimal, DateTime<Utc>)> = sources
            .iter()
            .map(|id| (id.clone(), (config.initial_accuracy, now)))
            .collect();
        let snapshot = WeightSnapshot::from_accuracy(0, &accuracy, config.accuracy_floor, now);
        let (weights_tx, _) = watch::channel(Arc::new(snapshot));

        Self {
            config,
            state: Mutex::new(TrackerState {
                accuracy,
                ..Default::default()
            }),
            weights_tx,
            audit,
        }
    }

    pub fn weights(&self) -> WeightHandle {
        WeightHandle {
            rx: self.weights_tx.subscribe(),
        }
    }

    pub fn current_weights(&self) -> Arc<WeightSnapshot> {
        self.weights_tx.borrow().clone()
    }

    /// Seed accuracy from a previously published snapshot. Sources that are
    /// no longer configured are ignored.
    pub async fn restore(&self, snapshot: &WeightSnapshot) {
        let mut state = self.state.lock().await;
        for saved in snapshot.iter() {
            if let Some(entry) = state.accuracy.get_mut(&saved.source) {
                *entry = (saved.accuracy_ema, saved.last_updated);
            }
        }
        state.version = snapshot.version;
        let restored = WeightSnapshot::from_accuracy(
            state.version,
            &state.accuracy,
            self.config.accuracy_floor,
            Utc::now(),
        );
        self.weights_tx.send_replace(Arc::new(restored));
        info!(version = snapshot.version, "weights restored from audit log");
    }

    /// Start tracking a published recommendation. Only BUY/SELL with
    /// complete exit levels are tracked; returns whether it was accepted.
    pub async fn track(&self, rec: &Recommendation) -> bool {
        let (Some(direction), Some(stop_loss), Some(take_profit)) =
            (rec.action.direction(), rec.stop_loss, rec.take_profit)
        else {
            return false;
        };

        let tracked = Tracked {
            symbol: rec.symbol.clone(),
            direction,
            entry: rec.entry_price,
            stop_loss,
            take_profit,
            expires_at: rec.expires_at,
            votes: rec.source_votes(),
            last_price: None,
        };
        self.state.lock().await.open.insert(rec.id.clone(), tracked);
        debug!(id = %rec.id, symbol = %rec.symbol, action = %rec.action, "tracking recommendation");
        true
    }

    /// `(id, symbol)` of every recommendation still in PUBLISHED.
    pub async fn open_recommendations(&self) -> Vec<(String, String)> {
        let state = self.state.lock().await;
        let mut open: Vec<(String, String)> = state
            .open
            .iter()
            .map(|(id, t)| (id.clone(), t.symbol.clone()))
            .collect();
        open.sort();
        open
    }

    /// Most recent consumed samples, oldest first.
    pub async fn recent_samples(&self) -> Vec<PerformanceSample> {
        self.state.lock().await.history.iter().cloned().collect()
    }

    /// Feed one market event into a recommendation's state machine.
    ///
    /// Returns the terminal transition when the event resolved it, `None`
    /// when it is still PUBLISHED.
    pub async fn record_outcome(
        &self,
        id: &str,
        event: OutcomeEvent,
    ) -> Result<Option<OutcomeTransition>, EngineError> {
        let (transition, snapshot) = {
            let mut state = self.state.lock().await;

            let Some(tracked) = state.open.get_mut(id) else {
                return Err(match state.resolved.get(id) {
                    Some(done) => EngineError::AlreadyResolved {
                        id: id.to_string(),
                        state: done.to_string(),
                    },
                    None => EngineError::UnknownRecommendation { id: id.to_string() },
                });
            };

            let at = event.at();
            let Some((terminal, exit_price)) = advance(tracked, &event) else {
                return Ok(None);
            };
            let Some(tracked) = state.open.remove(id) else {
                return Ok(None);
            };

            let realized = realized_direction(&tracked, terminal, exit_price);
            let realized_return = if tracked.entry.is_zero() {
                Decimal::ZERO
            } else {
                (exit_price - tracked.entry) / tracked.entry * tracked.direction.sign()
            };

            let samples: Vec<PerformanceSample> = tracked
                .votes
                .iter()
                .map(|(source, vote)| PerformanceSample {
                    recommendation_id: id.to_string(),
                    source: source.clone(),
                    realized_direction_correct: *vote == realized,
                    realized_return,
                    observed_at: at,
                })
                .collect();

            learn(&mut state.accuracy, &samples, self.config.ema_alpha);
            state.version += 1;
            let snapshot = Arc::new(WeightSnapshot::from_accuracy(
                state.version,
                &state.accuracy,
                self.config.accuracy_floor,
                at,
            ));
            self.weights_tx.send_replace(snapshot.clone());

            for sample in &samples {
                if state.history.len() >= self.config.sample_history.max(1) {
                    state.history.pop_front();
                }
                state.history.push_back(sample.clone());
            }
            remember_resolved(&mut state, id, terminal, self.config.resolved_retention.max(1));

            info!(
                id,
                symbol = %tracked.symbol,
                state = %terminal,
                exit = %exit_price,
                realized = %realized,
                weights_version = state.version,
                "recommendation resolved"
            );

            (
                OutcomeTransition {
                    recommendation_id: id.to_string(),
                    state: terminal,
                    exit_price,
                    samples,
                    weights_version: state.version,
                },
                snapshot,
            )
        };

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record_outcome(&transition, Utc::now()).await {
                warn!(id, error = %e, "failed to audit outcome");
            }
            if let Err(e) = audit.record_snapshot(&snapshot).await {
                warn!(version = snapshot.version, error = %e, "failed to audit weight snapshot");
            }
        }

        Ok(Some(transition))
    }
}

/// Record a terminal state, evicting the oldest entries past `retention`.
fn remember_resolved(state: &mut TrackerState, id: &str, terminal: RecommendationState, retention: usize) {
    if state.resolved.insert(id.to_string(), terminal).is_none() {
        state.resolved_order.push_back(id.to_string());
    }
    while state.resolved_order.len() > retention {
        if let Some(evicted) = state.resolved_order.pop_front() {
            state.resolved.remove(&evicted);
        }
    }
}

// ---------------------------------------------------------------------------
// State machine (pure)
// ---------------------------------------------------------------------------

/// Apply one event. Returns the terminal state and exit price on
/// resolution; otherwise remembers the last seen price.
fn advance(tracked: &mut Tracked, event: &OutcomeEvent) -> Option<(RecommendationState, Decimal)> {
    match *event {
        OutcomeEvent::TargetHit { price, .. } => Some((RecommendationState::TargetHit, price)),
        OutcomeEvent::StopHit { price, .. } => Some((RecommendationState::StopHit, price)),
        OutcomeEvent::Tick { at } => expired(tracked, at),
        OutcomeEvent::PriceObserved { price, at } => {
            if let Some(expiry) = expired(tracked, at) {
                return Some(expiry);
            }
            let (hit_target, hit_stop) = match tracked.direction {
                Direction::Buy => (price >= tracked.take_profit, price <= tracked.stop_loss),
                Direction::Sell => (price <= tracked.take_profit, price >= tracked.stop_loss),
                Direction::Hold => (false, false),
            };
            if hit_stop {
                Some((RecommendationState::StopHit, price))
            } else if hit_target {
                Some((RecommendationState::TargetHit, price))
            } else {
                tracked.last_price = Some(price);
                None
            }
        }
    }
}

fn expired(tracked: &Tracked, at: DateTime<Utc>) -> Option<(RecommendationState, Decimal)> {
    (at > tracked.expires_at).then(|| {
        (
            RecommendationState::Expired,
            tracked.last_price.unwrap_or(tracked.entry),
        )
    })
}

/// Direction the market actually took.
fn realized_direction(tracked: &Tracked, state: RecommendationState, exit: Decimal) -> Direction {
    match state {
        RecommendationState::TargetHit => tracked.direction,
        RecommendationState::StopHit => tracked.direction.opposite(),
        RecommendationState::Expired | RecommendationState::Published => {
            Direction::of_sign(exit - tracked.entry)
        }
    }
}

/// `ema = α × correct + (1 − α) × ema` for every sampled source that is
/// still configured.
fn learn(
    accuracy: &mut BTreeMap<SourceId, (Decimal, DateTime<Utc>)>,
    samples: &[PerformanceSample],
    alpha: Decimal,
) {
    for sample in samples {
        let Some((ema, updated)) = accuracy.get_mut(&sample.source) else {
            debug!(source = %sample.source, "sample for unconfigured source skipped");
            continue;
        };
        let correct = if sample.realized_direction_correct {
            Decimal::ONE
        } else {
            Decimal::ZERO
        };
        *ema = alpha * correct + (Decimal::ONE - alpha) * *ema;
        *updated = sample.observed_at;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
