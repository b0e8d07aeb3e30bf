//! Interfaces of the external analysis collaborators.
//!
//! The engine never computes indicators, patterns, sentiment, or model
//! predictions itself; it consumes them through these traits. Production
//! wiring uses the HTTP clients in [`crate::clients`].

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::SourceError;
use crate::types::{
    IndicatorSet, MlPrediction, Pattern, Quote, RiskContext, SentimentReading, Timeframe,
    VolumeProfile,
};

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, SourceError>;
}

#[async_trait]
pub trait TechnicalIndicatorService: Send + Sync {
    async fn compute(&self, symbol: &str, timeframe: Timeframe)
        -> Result<IndicatorSet, SourceError>;
}

#[async_trait]
pub trait PatternRecognitionService: Send + Sync {
    async fn detect(&self, symbol: &str, timeframe: Timeframe)
        -> Result<Vec<Pattern>, SourceError>;
}

#[async_trait]
pub trait SentimentService: Send + Sync {
    async fn score(&self, symbol: &str) -> Result<SentimentReading, SourceError>;
}

#[async_trait]
pub trait MlPredictionService: Send + Sync {
    async fn predict(&self, symbol: &str, horizon: Timeframe)
        -> Result<MlPrediction, SourceError>;
}

#[async_trait]
pub trait VolumeAnalysisService: Send + Sync {
    async fn analyze(&self, symbol: &str, timeframe: Timeframe)
        -> Result<VolumeProfile, SourceError>;
}

#[async_trait]
pub trait PortfolioContextProvider: Send + Sync {
    async fn get_risk_context(&self, portfolio_id: &str) -> Result<RiskContext, SourceError>;
}

/// Handles to every collaborator, shared by all adapters.
#[derive(Clone)]
pub struct Collaborators {
    pub market: Arc<dyn MarketDataProvider>,
    pub technical: Arc<dyn TechnicalIndicatorService>,
    pub patterns: Arc<dyn PatternRecognitionService>,
    pub sentiment: Arc<dyn SentimentService>,
    pub ml: Arc<dyn MlPredictionService>,
    pub volume: Arc<dyn VolumeAnalysisService>,
    pub portfolio: Arc<dyn PortfolioContextProvider>,
}
