//! Outcome monitor: drives open recommendations to a terminal state.
//!
//! Periodically quotes every symbol with a PUBLISHED recommendation and feeds
//! the price into the feedback tracker, which resolves target/stop crossings
//! and expiries. When a quote is unavailable a clock tick is sent instead, so
//! expiry never depends on market data. Stops on its `CancellationToken`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::feedback::PerformanceFeedbackTracker;
use crate::sources::MarketDataProvider;
use crate::types::{OutcomeEvent, OutcomeTransition};

/// Consecutive all-quotes-failed polls before escalating to `error!`.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

pub struct OutcomeMonitor {
    tracker: Arc<PerformanceFeedbackTracker>,
    market: Arc<dyn MarketDataProvider>,
    interval: Duration,
    shutdown: CancellationToken,
    consecutive_failures: AtomicU32,
}

impl OutcomeMonitor {
    pub fn new(
        tracker: Arc<PerformanceFeedbackTracker>,
        market: Arc<dyn MarketDataProvider>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            tracker,
            market,
            interval,
            shutdown,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Main polling loop. Runs until the CancellationToken is cancelled.
    pub async fn run(&self) -> Result<()> {
        info!(interval_secs = self.interval.as_secs(), "outcome monitor started");

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("outcome monitor shutting down");
                    break;
                }
                () = tokio::time::sleep(self.interval) => {
                    let resolved = self.poll_once().await;
                    if !resolved.is_empty() {
                        debug!(resolved = resolved.len(), "outcome poll resolved recommendations");
                    }
                }
            }
        }

        Ok(())
    }

    /// One poll over every open recommendation. Returns the transitions it
    /// caused.
    pub async fn poll_once(&self) -> Vec<OutcomeTransition> {
        let open = self.tracker.open_recommendations().await;
        if open.is_empty() {
            return Vec::new();
        }

        let mut by_symbol: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (id, symbol) in open {
            by_symbol.entry(symbol).or_default().push(id);
        }

        let mut transitions = Vec::new();
        let mut quote_failures = 0usize;
        let symbols = by_symbol.len();

        for (symbol, ids) in by_symbol {
            let now = Utc::now();
            let event = match self.market.get_quote(&symbol).await {
                Ok(quote) => OutcomeEvent::PriceObserved {
                    price: quote.price,
                    at: now,
                },
                Err(e) => {
                    quote_failures += 1;
                    warn!(%symbol, error = %e, "quote failed during outcome poll");
                    OutcomeEvent::Tick { at: now }
                }
            };

            for id in ids {
                match self.tracker.record_outcome(&id, event.clone()).await {
                    Ok(Some(transition)) => transitions.push(transition),
                    Ok(None) => {}
                    Err(e) => debug!(%id, error = %e, "outcome event not applied"),
                }
            }
        }

        if quote_failures == symbols {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if failures >= MAX_CONSECUTIVE_FAILURES {
                error!(
                    consecutive_failures = failures,
                    "market data unavailable for every open recommendation"
                );
            }
        } else {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        }

        transitions
    }
}
