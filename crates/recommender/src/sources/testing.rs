//! Deterministic in-process collaborators for tests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::providers::*;
use crate::errors::SourceError;
use crate::types::{
    Direction, IndicatorSet, MlPrediction, Pattern, Quote, RiskContext, SentimentReading,
    SourceKind, Timeframe, VolumeProfile,
};

#[derive(Default)]
struct State {
    quotes: HashMap<String, Quote>,
    indicators: HashMap<String, IndicatorSet>,
    patterns: HashMap<String, Vec<Pattern>>,
    sentiment: HashMap<String, SentimentReading>,
    predictions: HashMap<String, MlPrediction>,
    volume: HashMap<String, VolumeProfile>,
    risk: Option<RiskContext>,
    failing: HashSet<SourceKind>,
    latency: HashMap<SourceKind, Duration>,
    quote_missing: bool,
}

/// One fake backing every collaborator trait. Cloning shares state, so a
/// test can move prices after the engine is built.
#[derive(Clone, Default)]
pub struct FakeMarket {
    state: Arc<Mutex<State>>,
    calls: Arc<Mutex<HashMap<SourceKind, Arc<AtomicUsize>>>>,
}

impl FakeMarket {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_quote(self, symbol: &str, price: Decimal, atr: Decimal) -> Self {
        self.update(|s| {
            s.quotes.insert(symbol.into(), quote(symbol, price, atr));
        })
    }

    pub fn with_levels(self, symbol: &str, support: Option<Decimal>, resistance: Option<Decimal>) -> Self {
        self.update(|s| {
            let q = s
                .quotes
                .entry(symbol.into())
                .or_insert_with(|| quote(symbol, dec!(100), dec!(2)));
            q.nearest_support = support;
            q.nearest_resistance = resistance;
        })
    }

    pub fn without_quotes(self) -> Self {
        self.update(|s| s.quote_missing = true)
    }

    pub fn with_rsi(self, symbol: &str, rsi: Decimal) -> Self {
        self.with_indicators(
            symbol,
            IndicatorSet {
                rsi: Some(rsi),
                ..Default::default()
            },
        )
    }

    pub fn with_indicators(self, symbol: &str, indicators: IndicatorSet) -> Self {
        self.update(|s| {
            s.indicators.insert(symbol.into(), indicators);
        })
    }

    pub fn with_patterns(self, symbol: &str, patterns: Vec<Pattern>) -> Self {
        self.update(|s| {
            s.patterns.insert(symbol.into(), patterns);
        })
    }

    pub fn with_sentiment(self, symbol: &str, score: Decimal, confidence: Decimal) -> Self {
        self.update(|s| {
            s.sentiment
                .insert(symbol.into(), SentimentReading { score, confidence });
        })
    }

    pub fn with_prediction(self, symbol: &str, direction: Direction, probability: Decimal) -> Self {
        self.update(|s| {
            s.predictions.insert(
                symbol.into(),
                MlPrediction {
                    direction,
                    probability,
                },
            );
        })
    }

    pub fn with_volume(self, symbol: &str, profile: VolumeProfile) -> Self {
        self.update(|s| {
            s.volume.insert(symbol.into(), profile);
        })
    }

    pub fn with_risk(self, risk: RiskContext) -> Self {
        self.update(|s| s.risk = Some(risk))
    }

    /// Delay every signal-producing service by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.update(|s| {
            for kind in ALL_KINDS {
                s.latency.insert(kind, latency);
            }
        })
    }

    pub fn with_kind_latency(self, kind: SourceKind, latency: Duration) -> Self {
        self.update(|s| {
            s.latency.insert(kind, latency);
        })
    }

    pub fn failing(self, kind: SourceKind) -> Self {
        self.update(|s| {
            s.failing.insert(kind);
        })
    }

    /// Move the quoted price of an existing symbol.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        let mut s = self.state.lock().unwrap();
        let q = s
            .quotes
            .entry(symbol.into())
            .or_insert_with(|| quote(symbol, price, dec!(2)));
        q.price = price;
    }

    /// Number of calls a service kind has received.
    pub fn calls(&self, kind: SourceKind) -> usize {
        self.counter(kind).load(Ordering::SeqCst)
    }

    pub fn collaborators(&self) -> Collaborators {
        let shared = Arc::new(self.clone());
        Collaborators {
            market: shared.clone(),
            technical: shared.clone(),
            patterns: shared.clone(),
            sentiment: shared.clone(),
            ml: shared.clone(),
            volume: shared.clone(),
            portfolio: shared,
        }
    }

    fn counter(&self, kind: SourceKind) -> Arc<AtomicUsize> {
        self.calls
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .clone()
    }

    async fn enter(&self, kind: SourceKind) -> Result<(), SourceError> {
        self.counter(kind).fetch_add(1, Ordering::SeqCst);
        let (latency, failing) = {
            let s = self.state.lock().unwrap();
            (s.latency.get(&kind).copied(), s.failing.contains(&kind))
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if failing {
            return Err(SourceError::Unavailable(format!("{} offline", kind.as_str())));
        }
        Ok(())
    }
}

const ALL_KINDS: [SourceKind; 5] = [
    SourceKind::Technical,
    SourceKind::Pattern,
    SourceKind::Sentiment,
    SourceKind::MlModel,
    SourceKind::Volume,
];

pub fn quote(symbol: &str, price: Decimal, atr: Decimal) -> Quote {
    Quote {
        symbol: symbol.into(),
        price,
        volume: dec!(1000000),
        atr,
        nearest_support: None,
        nearest_resistance: None,
    }
}

pub fn ample_risk() -> RiskContext {
    RiskContext {
        available_risk_budget_pct: dec!(0.5),
        max_position_pct: dec!(0.25),
        open_correlated_exposure_pct: Decimal::ZERO,
    }
}

#[async_trait]
impl MarketDataProvider for FakeMarket {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, SourceError> {
        let s = self.state.lock().unwrap();
        if s.quote_missing {
            return Err(SourceError::Unavailable("no quote".into()));
        }
        Ok(s
            .quotes
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| quote(symbol, dec!(100), dec!(2))))
    }
}

#[async_trait]
impl TechnicalIndicatorService for FakeMarket {
    async fn compute(&self, symbol: &str, _tf: Timeframe) -> Result<IndicatorSet, SourceError> {
        self.enter(SourceKind::Technical).await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .indicators
            .get(symbol)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl PatternRecognitionService for FakeMarket {
    async fn detect(&self, symbol: &str, _tf: Timeframe) -> Result<Vec<Pattern>, SourceError> {
        self.enter(SourceKind::Pattern).await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .patterns
            .get(symbol)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SentimentService for FakeMarket {
    async fn score(&self, symbol: &str) -> Result<SentimentReading, SourceError> {
        self.enter(SourceKind::Sentiment).await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .sentiment
            .get(symbol)
            .cloned()
            .unwrap_or(SentimentReading {
                score: Decimal::ZERO,
                confidence: dec!(0.5),
            }))
    }
}

#[async_trait]
impl MlPredictionService for FakeMarket {
    async fn predict(&self, symbol: &str, _horizon: Timeframe) -> Result<MlPrediction, SourceError> {
        self.enter(SourceKind::MlModel).await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .predictions
            .get(symbol)
            .cloned()
            .unwrap_or(MlPrediction {
                direction: Direction::Hold,
                probability: dec!(0.5),
            }))
    }
}

#[async_trait]
impl VolumeAnalysisService for FakeMarket {
    async fn analyze(&self, symbol: &str, _tf: Timeframe) -> Result<VolumeProfile, SourceError> {
        self.enter(SourceKind::Volume).await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .volume
            .get(symbol)
            .cloned()
            .unwrap_or(VolumeProfile {
                price: dec!(100),
                volume_ratio: Decimal::ONE,
                price_change_pct: Decimal::ZERO,
                support: None,
                resistance: None,
            }))
    }
}

#[async_trait]
impl PortfolioContextProvider for FakeMarket {
    async fn get_risk_context(&self, _portfolio_id: &str) -> Result<RiskContext, SourceError> {
        Ok(self.state.lock().unwrap().risk.clone().unwrap_or_else(ample_risk))
    }
}
