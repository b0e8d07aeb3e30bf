//! HTTP client for the analysis gateway.
//!
//! One gateway fronts quotes, indicators, patterns, sentiment, volume
//! profiles and portfolio risk. Bodies are the JSON form of the engine's
//! own types, decimals encoded as strings.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::errors::{EngineError, SourceError};
use crate::sources::{
    MarketDataProvider, PatternRecognitionService, PortfolioContextProvider, SentimentService,
    TechnicalIndicatorService, VolumeAnalysisService,
};
use crate::types::{
    IndicatorSet, Pattern, Quote, RiskContext, SentimentReading, Timeframe, VolumeProfile,
};

pub struct AnalysisClient {
    client: Client,
    base_url: String,
}

impl AnalysisClient {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| {
                EngineError::Config(format!("failed to create analysis HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("GET {path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!("GET {path} returned {status}")));
        }

        let body = response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Unavailable(format!("GET {path}: bad body: {e}")))?;
        debug!(%url, "analysis gateway response");
        Ok(body)
    }
}

#[async_trait]
impl MarketDataProvider for AnalysisClient {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, SourceError> {
        self.get_json(&format!("quotes/{symbol}"), &[]).await
    }
}

#[async_trait]
impl TechnicalIndicatorService for AnalysisClient {
    async fn compute(&self, symbol: &str, timeframe: Timeframe) -> Result<IndicatorSet, SourceError> {
        self.get_json(
            &format!("indicators/{symbol}"),
            &[("timeframe", timeframe.as_interval())],
        )
        .await
    }
}

#[async_trait]
impl PatternRecognitionService for AnalysisClient {
    async fn detect(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Pattern>, SourceError> {
        self.get_json(
            &format!("patterns/{symbol}"),
            &[("timeframe", timeframe.as_interval())],
        )
        .await
    }
}

#[async_trait]
impl SentimentService for AnalysisClient {
    async fn score(&self, symbol: &str) -> Result<SentimentReading, SourceError> {
        self.get_json(&format!("sentiment/{symbol}"), &[]).await
    }
}

#[async_trait]
impl VolumeAnalysisService for AnalysisClient {
    async fn analyze(&self, symbol: &str, timeframe: Timeframe) -> Result<VolumeProfile, SourceError> {
        self.get_json(
            &format!("volume/{symbol}"),
            &[("timeframe", timeframe.as_interval())],
        )
        .await
    }
}

#[async_trait]
impl PortfolioContextProvider for AnalysisClient {
    async fn get_risk_context(&self, portfolio_id: &str) -> Result<RiskContext, SourceError> {
        self.get_json(&format!("portfolios/{portfolio_id}/risk"), &[])
            .await
    }
}
