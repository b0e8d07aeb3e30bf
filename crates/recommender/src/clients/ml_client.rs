/*
 * ML Client - HTTP client for the model-serving prediction service
 *
 * Answers the ML model signal source. The service is expected to return a
 * directional call with a calibrated probability for a symbol and horizon.
 */

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::errors::{EngineError, SourceError};
use crate::sources::MlPredictionService;
use crate::types::{Direction, MlPrediction, Timeframe};

/// Latency above which a prediction is logged as slow.
const SLOW_PREDICTION: Duration = Duration::from_millis(50);

/// ML prediction request
#[derive(Debug, Serialize)]
pub struct PredictionRequest {
    pub symbol: String,
    /// Prediction horizon as an interval string, e.g. `"4h"`.
    pub horizon: String,
}

/// ML prediction response
#[derive(Debug, Deserialize)]
pub struct PredictionResponse {
    pub direction: String, // "LONG", "SHORT" or "NEUTRAL"
    pub probability: f64,  // 0.0 to 1.0

    pub model_version: String,
    #[serde(default)]
    pub latency_ms: f64,
}

impl PredictionResponse {
    fn into_prediction(self) -> Result<MlPrediction, SourceError> {
        let direction = match self.direction.to_ascii_uppercase().as_str() {
            "LONG" | "BUY" => Direction::Buy,
            "SHORT" | "SELL" => Direction::Sell,
            "NEUTRAL" | "HOLD" => Direction::Hold,
            other => {
                return Err(SourceError::Unavailable(format!(
                    "unknown prediction direction {other:?}"
                )))
            }
        };
        let probability = Decimal::try_from(self.probability)
            .map_err(|e| SourceError::Unavailable(format!("bad probability: {e}")))?;
        Ok(MlPrediction {
            direction,
            probability,
        })
    }
}

/// Health check response
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub model_version: String,
    #[serde(default)]
    pub uptime_seconds: f64,
}

/// ML service client
pub struct MlClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    enabled: bool,
}

impl MlClient {
    /// Create new ML client
    ///
    /// # Arguments
    /// * `base_url` - ML service URL (e.g., "http://localhost:8000")
    /// * `timeout_ms` - Request timeout in milliseconds
    /// * `enabled` - When false every prediction fails fast as unavailable
    pub fn new(base_url: String, timeout_ms: u64, enabled: bool) -> Result<Self, EngineError> {
        let timeout = Duration::from_millis(timeout_ms);

        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(10)))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| EngineError::Config(format!("failed to create ML HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            enabled,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Raw prediction call.
    pub async fn request_prediction(
        &self,
        request: &PredictionRequest,
    ) -> Result<PredictionResponse, SourceError> {
        if !self.enabled {
            return Err(SourceError::Unavailable("ML service disabled".into()));
        }

        let start = Instant::now();
        let url = format!("{}/predict", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Unavailable(format!(
                        "ML service timeout after {}ms",
                        self.timeout.as_millis()
                    ))
                } else if e.is_connect() {
                    SourceError::Unavailable(format!("ML service connection failed: {e}"))
                } else {
                    SourceError::Unavailable(format!("ML service request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(SourceError::Unavailable(format!(
                "ML service returned {status}: {body}"
            )));
        }

        let prediction = response
            .json::<PredictionResponse>()
            .await
            .map_err(|e| SourceError::Unavailable(format!("failed to parse ML response: {e}")))?;

        let elapsed = start.elapsed();
        if elapsed > SLOW_PREDICTION {
            warn!(
                ?elapsed,
                service_ms = prediction.latency_ms,
                "slow ML prediction"
            );
        }
        debug!(
            symbol = %request.symbol,
            direction = %prediction.direction,
            probability = prediction.probability,
            model = %prediction.model_version,
            "ML prediction"
        );

        Ok(prediction)
    }

    /// Health check - verify ML service is available
    pub async fn health_check(&self) -> Result<HealthResponse, SourceError> {
        if !self.enabled {
            return Err(SourceError::Unavailable("ML service disabled".into()));
        }

        let url = format!("{}/health", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("health check failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "health check returned status: {}",
                response.status()
            )));
        }

        response
            .json::<HealthResponse>()
            .await
            .map_err(|e| SourceError::Unavailable(format!("failed to parse health response: {e}")))
    }
}

#[async_trait]
impl MlPredictionService for MlClient {
    async fn predict(&self, symbol: &str, horizon: Timeframe) -> Result<MlPrediction, SourceError> {
        let request = PredictionRequest {
            symbol: symbol.to_string(),
            horizon: horizon.as_interval().to_string(),
        };
        self.request_prediction(&request).await?.into_prediction()
    }
}
