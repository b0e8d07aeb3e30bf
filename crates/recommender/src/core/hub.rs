//! Latest recommendation per symbol and the push stream built on it.
//!
//! Each symbol owns a `watch` channel. The stored value is always the newest
//! recommendation; subscribers are only woken when it changed materially.

use chrono::Duration;
use futures::stream::{self, BoxStream, StreamExt};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::debug;

use crate::types::Recommendation;

type Slot = Option<Arc<Recommendation>>;

/// What `publish` did with a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stored and pushed to subscribers.
    Pushed,
    /// Stored as latest; subscribers not woken.
    Stored,
}

pub struct RecommendationHub {
    channels: RwLock<HashMap<String, watch::Sender<Slot>>>,
    confidence_delta: Decimal,
}

impl RecommendationHub {
    pub fn new(confidence_delta: Decimal) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            confidence_delta,
        }
    }

    /// Make `rec` the latest for its symbol.
    ///
    /// Timestamps per symbol are kept strictly increasing: a recommendation
    /// stamped at or before the current latest is moved one microsecond past
    /// it. Returns the stored recommendation.
    pub async fn publish(&self, mut rec: Recommendation) -> (Arc<Recommendation>, PublishOutcome) {
        let mut channels = self.channels.write().await;
        let sender = channels
            .entry(rec.symbol.clone())
            .or_insert_with(|| watch::channel(None).0);

        let previous = sender.borrow().clone();
        if let Some(prev) = &previous {
            if rec.timestamp <= prev.timestamp {
                let bumped = prev.timestamp + Duration::microseconds(1);
                rec.expires_at += bumped - rec.timestamp;
                rec.timestamp = bumped;
            }
        }

        let material = previous
            .as_deref()
            .map_or(true, |prev| self.is_material(prev, &rec));
        let stored = Arc::new(rec);
        let slot = stored.clone();
        sender.send_if_modified(move |current| {
            *current = Some(slot);
            material
        });

        debug!(
            symbol = %stored.symbol,
            action = %stored.action,
            pushed = material,
            "recommendation published to hub"
        );
        let outcome = if material {
            PublishOutcome::Pushed
        } else {
            PublishOutcome::Stored
        };
        (stored, outcome)
    }

    pub async fn latest(&self, symbol: &str) -> Option<Arc<Recommendation>> {
        self.channels
            .read()
            .await
            .get(symbol)
            .and_then(|tx| tx.borrow().clone())
    }

    /// Receiver for `symbol`, created on first use. Starts out holding the
    /// current latest (or `None`).
    pub async fn subscribe(&self, symbol: &str) -> watch::Receiver<Slot> {
        if let Some(tx) = self.channels.read().await.get(symbol) {
            return tx.subscribe();
        }
        self.channels
            .write()
            .await
            .entry(symbol.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Stream of materially changed recommendations for `symbol`. The current
    /// latest, if any, is yielded first.
    pub async fn stream(&self, symbol: &str) -> BoxStream<'static, Arc<Recommendation>> {
        let mut rx = self.subscribe(symbol).await;
        rx.mark_changed();
        stream::unfold(rx, |mut rx| async move {
            loop {
                rx.changed().await.ok()?;
                let next = rx.borrow_and_update().clone();
                if let Some(rec) = next {
                    return Some((rec, rx));
                }
            }
        })
        .boxed()
    }

    fn is_material(&self, prev: &Recommendation, next: &Recommendation) -> bool {
        prev.action != next.action
            || (prev.confidence - next.confidence).abs() >= self.confidence_delta
            || prev.position_size_pct != next.position_size_pct
            || prev.is_expired(next.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, Timeframe};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn rec(action: Action, confidence: Decimal) -> Recommendation {
        let now = Utc::now();
        Recommendation {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: "AAPL".into(),
            timestamp: now,
            action,
            confidence,
            entry_price: dec!(100),
            stop_loss: None,
            take_profit: None,
            position_size_pct: Decimal::ZERO,
            risk_reward_ratio: None,
            reasoning: vec!["fused magnitude inside hold band".into()],
            contributing_signals: Vec::new(),
            conflicts: Vec::new(),
            degradation: None,
            timeframes: vec![Timeframe::H1],
            expires_at: now + Duration::hours(4),
        }
    }

    fn hub() -> RecommendationHub {
        RecommendationHub::new(dec!(0.05))
    }

    #[tokio::test]
    async fn test_small_confidence_move_not_pushed() {
        let hub = hub();
        let (_, first) = hub.publish(rec(Action::Hold, dec!(0.40))).await;
        let (_, second) = hub.publish(rec(Action::Hold, dec!(0.42))).await;
        let (_, third) = hub.publish(rec(Action::Hold, dec!(0.50))).await;
        assert_eq!(first, PublishOutcome::Pushed);
        assert_eq!(second, PublishOutcome::Stored);
        assert_eq!(third, PublishOutcome::Pushed);
    }

    #[tokio::test]
    async fn test_latest_is_newest_even_when_not_pushed() {
        let hub = hub();
        hub.publish(rec(Action::Hold, dec!(0.40))).await;
        let (stored, _) = hub.publish(rec(Action::Hold, dec!(0.41))).await;
        assert_eq!(hub.latest("AAPL").await.unwrap().id, stored.id);
        assert!(hub.latest("MSFT").await.is_none());
    }

    #[tokio::test]
    async fn test_timestamps_strictly_increase() {
        let hub = hub();
        let first = rec(Action::Hold, dec!(0.4));
        let mut stale = rec(Action::Watch, dec!(0.4));
        stale.timestamp = first.timestamp - Duration::seconds(5);
        let (a, _) = hub.publish(first).await;
        let (b, _) = hub.publish(stale).await;
        assert!(b.timestamp > a.timestamp);
        assert!(b.expires_at > b.timestamp);
    }

    #[tokio::test]
    async fn test_stream_yields_latest_then_changes() {
        let hub = hub();
        hub.publish(rec(Action::Hold, dec!(0.4))).await;
        let mut stream = hub.stream("AAPL").await;

        let first = stream.next().await.unwrap();
        assert_eq!(first.action, Action::Hold);

        hub.publish(rec(Action::Watch, dec!(0.4))).await;
        let second = stream.next().await.unwrap();
        assert_eq!(second.action, Action::Watch);
    }

    #[tokio::test]
    async fn test_stream_before_first_publish_waits() {
        let hub = hub();
        let mut stream = hub.stream("AAPL").await;
        hub.publish(rec(Action::Watch, dec!(0.3))).await;
        assert_eq!(stream.next().await.unwrap().action, Action::Watch);
    }
}
