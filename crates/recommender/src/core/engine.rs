//! Evaluation pipeline for one symbol.
//!
//! Fan-out: every enabled source × requested timeframe, the market quote and
//! the portfolio risk context are requested concurrently against one shared
//! deadline. Fan-in keeps whatever answered in time. The rest of the
//! pipeline is synchronous:
//!
//!   fuse → resolve conflicts → quantify uncertainty → size → assemble
//!
//! Cancellation is only observed during fan-out; once every call has settled
//! the evaluation runs to completion.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineTuning;
use crate::core::assembler::{AssemblyInput, RecommendationAssembler};
use crate::core::conflict::ConflictResolver;
use crate::core::feedback::WeightHandle;
use crate::core::fusion::EnsembleFusionEngine;
use crate::core::position_sizing::{RiskAdjustedSizer, SizingInput};
use crate::core::uncertainty::UncertaintyQuantifier;
use crate::errors::{EngineError, SourceError};
use crate::sources::{MarketDataProvider, PortfolioContextProvider, SignalSource};
use crate::types::{
    Quote, Recommendation, RiskContext, Signal, SourceId, SourceKind, SourceOutcome, Timeframe,
    WeightSnapshot,
};

/// One `GenerateRecommendation` call.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub symbol: String,
    pub timeframes: Vec<Timeframe>,
    pub portfolio_id: String,
    /// Overrides the configured fan-out deadline.
    pub deadline: Option<Duration>,
}

impl EvaluationRequest {
    pub fn new(symbol: impl Into<String>, timeframes: Vec<Timeframe>, portfolio_id: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframes,
            portfolio_id: portfolio_id.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Requested timeframes, sorted and deduplicated; 1h when none given.
    pub fn normalized_timeframes(&self) -> Vec<Timeframe> {
        let mut tfs = self.timeframes.clone();
        tfs.sort();
        tfs.dedup();
        if tfs.is_empty() {
            tfs.push(Timeframe::H1);
        }
        tfs
    }
}

/// Everything fan-in collected before the deadline.
#[derive(Debug, Clone, Default)]
pub struct Gathered {
    pub outcomes: Vec<SourceOutcome>,
    pub quote: Option<Quote>,
    pub risk: Option<RiskContext>,
}

impl Gathered {
    /// Responding signals in canonical `(timeframe, source)` order.
    pub fn signals(&self) -> Vec<Signal> {
        let mut signals: Vec<Signal> = self
            .outcomes
            .iter()
            .filter_map(SourceOutcome::signal)
            .cloned()
            .collect();
        signals.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        signals
    }

    pub fn responders(&self) -> BTreeSet<&SourceId> {
        self.outcomes
            .iter()
            .filter_map(SourceOutcome::signal)
            .map(|s| &s.source)
            .collect()
    }
}

pub struct RecommendationEngine {
    sources: Vec<SignalSource>,
    market: Arc<dyn MarketDataProvider>,
    portfolio: Arc<dyn PortfolioContextProvider>,
    weights: WeightHandle,
    fusion: EnsembleFusionEngine,
    resolver: ConflictResolver,
    quantifier: UncertaintyQuantifier,
    sizer: RiskAdjustedSizer,
    assembler: RecommendationAssembler,
    risk_overrides: BTreeSet<SourceId>,
    deadline: Duration,
    min_responding_sources: usize,
}

impl RecommendationEngine {
    pub fn new(
        tuning: &EngineTuning,
        sources: Vec<SignalSource>,
        market: Arc<dyn MarketDataProvider>,
        portfolio: Arc<dyn PortfolioContextProvider>,
        weights: WeightHandle,
    ) -> Self {
        let risk_overrides = sources
            .iter()
            .filter(|s| s.is_risk_override())
            .map(|s| s.id().clone())
            .collect();

        Self {
            sources,
            market,
            portfolio,
            weights,
            fusion: EnsembleFusionEngine::new(tuning.fusion.clone()),
            resolver: ConflictResolver::new(tuning.conflict.clone()),
            quantifier: UncertaintyQuantifier::new(tuning.uncertainty.clone(), &tuning.conflict),
            sizer: RiskAdjustedSizer::new(tuning.risk.clone()),
            assembler: RecommendationAssembler::new(
                tuning.evaluation.ttl_multiplier,
                tuning.risk.min_risk_reward,
                tuning.fusion.hold_epsilon,
            ),
            risk_overrides,
            deadline: Duration::from_millis(tuning.evaluation.deadline_ms),
            min_responding_sources: tuning.evaluation.min_responding_sources.max(1),
        }
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(|s| s.id().clone()).collect()
    }

    pub fn market(&self) -> &Arc<dyn MarketDataProvider> {
        &self.market
    }

    /// Evaluate one symbol.
    ///
    /// Always returns a recommendation unless the caller cancels during
    /// fan-out or the assembled result breaks an ordering invariant.
    pub async fn generate(
        &self,
        request: &EvaluationRequest,
        cancel: &CancellationToken,
    ) -> Result<Recommendation, EngineError> {
        let started = Instant::now();
        let deadline = started + request.deadline.unwrap_or(self.deadline);
        let timeframes = request.normalized_timeframes();

        let gathered = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(symbol = %request.symbol, "evaluation cancelled during fan-out");
                return Err(EngineError::Cancelled { symbol: request.symbol.clone() });
            }
            gathered = self.gather(request, &timeframes, deadline) => gathered,
        };

        let weights = self.weights.current();
        let rec = self.evaluate(&request.symbol, &timeframes, &gathered, &weights, Utc::now())?;

        let elapsed = started.elapsed();
        if let Some(degradation) = &rec.degradation {
            let absorbed = degradation.to_engine_error();
            warn!(
                symbol = %rec.symbol,
                action = %rec.action,
                ?degradation,
                error = absorbed.as_ref().map(tracing::field::display),
                ?elapsed,
                "degraded recommendation"
            );
        } else {
            info!(
                symbol = %rec.symbol,
                action = %rec.action,
                confidence = %rec.confidence,
                size = %rec.position_size_pct,
                ?elapsed,
                "recommendation generated"
            );
        }
        Ok(rec)
    }

    // -----------------------------------------------------------------------
    // Fan-out / fan-in
    // -----------------------------------------------------------------------

    async fn gather(&self, request: &EvaluationRequest, timeframes: &[Timeframe], deadline: Instant) -> Gathered {
        let symbol = request.symbol.as_str();
        let plan = fetch_plan(&self.sources, timeframes);

        let signal_calls = plan.into_iter().map(|(source, timeframe)| async move {
            match source.fetch(symbol, timeframe, deadline).await {
                Ok(signal) => SourceOutcome::Responded(signal),
                Err(err) => {
                    let error = err.to_engine_error(source.id().as_str());
                    match err {
                        SourceError::Timeout => {
                            debug!(%timeframe, symbol, %error, "source timed out");
                            SourceOutcome::TimedOut {
                                source: source.id().clone(),
                                timeframe,
                            }
                        }
                        SourceError::Unavailable(reason) => {
                            warn!(%timeframe, symbol, %error, "source unavailable");
                            SourceOutcome::Failed {
                                source: source.id().clone(),
                                timeframe,
                                reason,
                            }
                        }
                    }
                }
            }
        });

        let quote_call = async {
            match timeout_at(deadline, self.market.get_quote(symbol)).await {
                Ok(Ok(quote)) => Some(quote),
                Ok(Err(e)) => {
                    warn!(symbol, error = %e, "market quote unavailable");
                    None
                }
                Err(_) => {
                    warn!(symbol, "market quote timed out");
                    None
                }
            }
        };

        let portfolio_id = request.portfolio_id.as_str();
        let risk_call = async {
            match timeout_at(deadline, self.portfolio.get_risk_context(portfolio_id)).await {
                Ok(Ok(risk)) => Some(risk),
                Ok(Err(e)) => {
                    warn!(portfolio_id, error = %e, "risk context unavailable");
                    None
                }
                Err(_) => {
                    warn!(portfolio_id, "risk context timed out");
                    None
                }
            }
        };

        let (outcomes, quote, risk) = tokio::join!(join_all(signal_calls), quote_call, risk_call);
        Gathered {
            outcomes,
            quote,
            risk,
        }
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    /// Turn fan-in results into a recommendation. Deterministic given the
    /// same inputs apart from `id`.
    pub fn evaluate(
        &self,
        symbol: &str,
        timeframes: &[Timeframe],
        gathered: &Gathered,
        weights: &WeightSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Recommendation, EngineError> {
        let signals = gathered.signals();
        let responded = gathered.responders().len();
        let entry_price = gathered.quote.as_ref().map(|q| q.price).unwrap_or_default();

        if responded < self.min_responding_sources {
            return Ok(self.assembler.insufficient(
                symbol,
                timeframes,
                signals,
                self.min_responding_sources,
                &gathered.outcomes,
                entry_price,
                now,
            ));
        }

        let mut fused = self.fusion.fuse(symbol, &signals, weights);
        let resolution = self.resolver.resolve(&mut fused, weights, &self.risk_overrides);
        let uncertainty = self.quantifier.quantify(&signals, weights, &resolution);
        let sizing = self.sizer.size(&SizingInput {
            direction: resolution.direction,
            magnitude: fused.magnitude,
            confidence: uncertainty.confidence,
            sizing: resolution.sizing,
            quote: gathered.quote.as_ref(),
            risk: gathered.risk.as_ref(),
        });

        self.assembler.assemble(AssemblyInput {
            symbol,
            timeframes,
            fused,
            resolution,
            uncertainty,
            sizing,
            outcomes: &gathered.outcomes,
            now,
        })
    }
}

/// `(source, timeframe)` pairs to request. Sentiment is symbol-level and is
/// asked once, tagged with the longest timeframe.
fn fetch_plan<'a>(sources: &'a [SignalSource], timeframes: &[Timeframe]) -> Vec<(&'a SignalSource, Timeframe)> {
    let Some(&longest) = timeframes.iter().max() else {
        return Vec::new();
    };
    sources
        .iter()
        .flat_map(|source| {
            let tfs: Vec<Timeframe> = if source.kind() == SourceKind::Sentiment {
                vec![longest]
            } else {
                timeframes.to_vec()
            };
            tfs.into_iter().map(move |tf| (source, tf))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
