//! Public entry points of the recommendation engine.
//!
//! [`RecommendationService`] wires the evaluation pipeline, the per-symbol
//! hub, the feedback tracker and the optional audit log together and exposes
//! the four operations callers use:
//!
//! - `generate_recommendation`: one symbol, request/response
//! - `bulk_generate`: many symbols, per-symbol failures isolated
//! - `recommendation_stream`: push updates for one symbol
//! - `record_outcome`: feedback ingestion

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::core::audit_log::AuditLog;
use crate::core::engine::{EvaluationRequest, RecommendationEngine};
use crate::core::feedback::PerformanceFeedbackTracker;
use crate::core::hub::RecommendationHub;
use crate::core::outcome_monitor::OutcomeMonitor;
use crate::errors::EngineError;
use crate::sources::{Collaborators, SignalSource};
use crate::types::{
    OutcomeEvent, OutcomeTransition, Recommendation, SourceAccuracyStats, Timeframe,
    WeightSnapshot,
};

/// Per-symbol results of a bulk evaluation, in request order.
#[derive(Debug)]
pub struct BulkReport {
    pub results: Vec<(String, Result<Recommendation, EngineError>)>,
}

impl BulkReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &Recommendation> {
        self.results.iter().filter_map(|(_, r)| r.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &EngineError)> {
        self.results
            .iter()
            .filter_map(|(symbol, r)| r.as_ref().err().map(|e| (symbol.as_str(), e)))
    }

    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }
}

pub struct RecommendationService {
    engine: Arc<RecommendationEngine>,
    hub: Arc<RecommendationHub>,
    tracker: Arc<PerformanceFeedbackTracker>,
    audit: Option<AuditLog>,
    bulk_concurrency: usize,
}

impl RecommendationService {
    pub fn new(
        engine: Arc<RecommendationEngine>,
        hub: Arc<RecommendationHub>,
        tracker: Arc<PerformanceFeedbackTracker>,
        audit: Option<AuditLog>,
        bulk_concurrency: usize,
    ) -> Self {
        Self {
            engine,
            hub,
            tracker,
            audit,
            bulk_concurrency: bulk_concurrency.max(1),
        }
    }

    /// Build the full service from loaded config and collaborator handles.
    ///
    /// Opens the audit log when `feedback.audit_db_path` is set and restores
    /// the last published weights from it.
    pub async fn from_config(config: &EngineConfig, collaborators: Collaborators) -> Result<Self> {
        let tuning = &config.engine;
        let sources = SignalSource::build_all(&config.sources, &collaborators);
        let ids: Vec<_> = sources.iter().map(|s| s.id().clone()).collect();

        let audit = match &tuning.feedback.audit_db_path {
            Some(path) => Some(AuditLog::new(path).await.context("failed to open audit log")?),
            None => None,
        };

        let tracker = Arc::new(PerformanceFeedbackTracker::new(
            tuning.feedback.clone(),
            &ids,
            audit.clone(),
        ));
        if let Some(audit) = &audit {
            if let Some(snapshot) = audit
                .latest_snapshot()
                .await
                .context("failed to read weight snapshots")?
            {
                tracker.restore(&snapshot).await;
            }
        }

        let engine = Arc::new(RecommendationEngine::new(
            tuning,
            sources,
            collaborators.market.clone(),
            collaborators.portfolio.clone(),
            tracker.weights(),
        ));
        let hub = Arc::new(RecommendationHub::new(tuning.evaluation.stream_confidence_delta));

        info!(
            sources = ids.len(),
            audit = audit.is_some(),
            deadline_ms = tuning.evaluation.deadline_ms,
            "recommendation service ready"
        );
        Ok(Self::new(
            engine,
            hub,
            tracker,
            audit,
            tuning.evaluation.bulk_concurrency,
        ))
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Evaluate, publish to the hub, audit, and start outcome tracking.
    pub async fn generate_recommendation(
        &self,
        request: &EvaluationRequest,
        cancel: &CancellationToken,
    ) -> Result<Recommendation, EngineError> {
        let rec = self.engine.generate(request, cancel).await?;
        let (published, _) = self.hub.publish(rec).await;
        let rec = Recommendation::clone(&published);

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record_recommendation(&rec).await {
                warn!(id = %rec.id, error = %e, "failed to audit recommendation");
            }
        }
        self.tracker.track(&rec).await;
        Ok(rec)
    }

    /// Evaluate many symbols with at most `bulk_concurrency` in flight.
    pub async fn bulk_generate(
        &self,
        symbols: &[String],
        timeframes: &[Timeframe],
        portfolio_id: &str,
        cancel: &CancellationToken,
    ) -> BulkReport {
        let results = stream::iter(symbols.iter().cloned())
            .map(|symbol: String| async move {
                let request = EvaluationRequest::new(symbol.clone(), timeframes.to_vec(), portfolio_id);
                let result = self.generate_recommendation(&request, cancel).await;
                (symbol.clone(), result)
            })
            .buffered(self.bulk_concurrency)
            .collect::<Vec<_>>()
            .await;

        let report = BulkReport { results };
        let failures = report.failure_count();
        if failures > 0 {
            warn!(symbols = symbols.len(), failures, "bulk evaluation had failures");
        } else {
            info!(symbols = symbols.len(), "bulk evaluation complete");
        }
        report
    }

    /// Materially changed recommendations for `symbol`, latest first.
    pub async fn recommendation_stream(&self, symbol: &str) -> BoxStream<'static, Arc<Recommendation>> {
        self.hub.stream(symbol).await
    }

    pub async fn latest(&self, symbol: &str) -> Option<Arc<Recommendation>> {
        self.hub.latest(symbol).await
    }

    pub async fn record_outcome(
        &self,
        recommendation_id: &str,
        event: OutcomeEvent,
    ) -> Result<Option<OutcomeTransition>, EngineError> {
        self.tracker.record_outcome(recommendation_id, event).await
    }

    // -----------------------------------------------------------------------
    // Introspection / runtime
    // -----------------------------------------------------------------------

    pub fn weights(&self) -> Arc<WeightSnapshot> {
        self.tracker.current_weights()
    }

    /// Audited per-source accuracy; empty without an audit log.
    pub async fn source_accuracy(&self, window_days: Option<u32>) -> Result<Vec<SourceAccuracyStats>> {
        match &self.audit {
            Some(audit) => audit.source_accuracy(window_days).await,
            None => Ok(Vec::new()),
        }
    }

    pub fn outcome_monitor(&self, interval: Duration, shutdown: CancellationToken) -> OutcomeMonitor {
        OutcomeMonitor::new(
            self.tracker.clone(),
            self.engine.market().clone(),
            interval,
            shutdown,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineTuning, LoggingConfig, ServicesConfig, SourceConfig, AppConfig, WatchlistConfig};
    use crate::sources::testing::FakeMarket;
    use crate::types::{Action, Direction, RecommendationState, SourceKind};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn config(audit_db_path: Option<String>) -> EngineConfig {
        let mut engine = EngineTuning::default();
        engine.feedback.audit_db_path = audit_db_path;
        EngineConfig {
            app: AppConfig {
                logging: LoggingConfig {
                    log_dir: "logs".into(),
                    file_name: "recommender.log".into(),
                    filter: None,
                },
                watchlist: WatchlistConfig::default(),
            },
            engine,
            sources: vec![
                SourceConfig {
                    id: "technical".into(),
                    kind: SourceKind::Technical,
                    enabled: true,
                    risk_override: false,
                    calibration: dec!(0.7),
                    neutral_band: dec!(0.1),
                },
                SourceConfig {
                    id: "ml".into(),
                    kind: SourceKind::MlModel,
                    enabled: true,
                    risk_override: false,
                    calibration: dec!(0.6),
                    neutral_band: dec!(0.1),
                },
            ],
            services: ServicesConfig {
                base_url: "http://127.0.0.1:1".into(),
                ml_base_url: None,
                ml_enabled: true,
                timeout_ms: 100,
            },
        }
    }

    fn bullish(symbol: &str) -> FakeMarket {
        FakeMarket::new()
            .with_quote(symbol, dec!(100), dec!(2))
            .with_rsi(symbol, dec!(15))
            .with_prediction(symbol, Direction::Buy, dec!(0.9))
    }

    fn request(symbol: &str) -> EvaluationRequest {
        EvaluationRequest::new(symbol, vec![Timeframe::H1], "main")
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_publishes_and_tracks() {
        let market = bullish("AAPL");
        let service = RecommendationService::from_config(&config(None), market.collaborators())
            .await
            .unwrap();

        let rec = service
            .generate_recommendation(&request("AAPL"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rec.action, Action::Buy);
        assert_eq!(service.latest("AAPL").await.unwrap().id, rec.id);

        let transition = service
            .record_outcome(
                &rec.id,
                OutcomeEvent::TargetHit {
                    price: dec!(106),
                    at: Utc::now(),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(transition.state, RecommendationState::TargetHit);
        assert_eq!(service.weights().version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_receives_new_recommendation() {
        let market = bullish("AAPL");
        let service = RecommendationService::from_config(&config(None), market.collaborators())
            .await
            .unwrap();
        let mut updates = service.recommendation_stream("AAPL").await;

        let rec = service
            .generate_recommendation(&request("AAPL"), &CancellationToken::new())
            .await
            .unwrap();
        let pushed = updates.next().await.unwrap();
        assert_eq!(pushed.id, rec.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_keeps_request_order() {
        let market = bullish("AAPL").with_quote("MSFT", dec!(300), dec!(6));
        let service = RecommendationService::from_config(&config(None), market.collaborators())
            .await
            .unwrap();
        let symbols: Vec<String> = ["MSFT", "AAPL", "NVDA"].iter().map(|s| s.to_string()).collect();

        let report = service
            .bulk_generate(&symbols, &[Timeframe::H1], "main", &CancellationToken::new())
            .await;

        let order: Vec<&str> = report.results.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(order, vec!["MSFT", "AAPL", "NVDA"]);
        assert_eq!(report.failure_count(), 0);
        assert_eq!(report.succeeded().count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_isolates_cancelled_symbols() {
        let market = bullish("AAPL");
        let service = RecommendationService::from_config(&config(None), market.collaborators())
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = service
            .bulk_generate(&["AAPL".to_string(), "MSFT".to_string()], &[Timeframe::H1], "main", &cancel)
            .await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.failure_count(), 2);
        assert!(report
            .failed()
            .all(|(_, e)| matches!(e, EngineError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_audit_log_restores_weights_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("audit.db").to_string_lossy().into_owned();

        {
            let market = bullish("AAPL");
            let service = RecommendationService::from_config(&config(Some(db.clone())), market.collaborators())
                .await
                .unwrap();
            let rec = service
                .generate_recommendation(&request("AAPL"), &CancellationToken::new())
                .await
                .unwrap();
            service
                .record_outcome(
                    &rec.id,
                    OutcomeEvent::StopHit {
                        price: dec!(97),
                        at: Utc::now(),
                    },
                )
                .await
                .unwrap();

            let stats = service.source_accuracy(None).await.unwrap();
            assert_eq!(stats.len(), 2);
            assert!(stats.iter().all(|s| s.correct == 0));
        }

        let market = bullish("AAPL");
        let restarted = RecommendationService::from_config(&config(Some(db)), market.collaborators())
            .await
            .unwrap();
        assert_eq!(restarted.weights().version, 1);
    }
}
