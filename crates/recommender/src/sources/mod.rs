//! Signal source adapters.
//!
//! Each configured source wraps one collaborator and turns its payload into a
//! normalized [`Signal`]. Sources are a closed set, so dispatch is a `match`
//! over [`SignalSource`] rather than a trait object.

pub mod mapping;
pub mod providers;

#[cfg(test)]
pub mod testing;

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::Instant;

use crate::config::SourceConfig;
use crate::errors::SourceError;
use crate::types::{Signal, SourceId, SourceKind, Timeframe};

use mapping::Reading;
pub use providers::{
    Collaborators, MarketDataProvider, MlPredictionService, PatternRecognitionService,
    PortfolioContextProvider, SentimentService, TechnicalIndicatorService, VolumeAnalysisService,
};

/// Per-source settings shared by every adapter variant.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub id: SourceId,
    pub calibration: Decimal,
    pub neutral_band: Decimal,
    pub risk_override: bool,
}

impl From<&SourceConfig> for SourceSettings {
    fn from(cfg: &SourceConfig) -> Self {
        Self {
            id: SourceId::new(cfg.id.clone()),
            calibration: cfg.calibration,
            neutral_band: cfg.neutral_band,
            risk_override: cfg.risk_override,
        }
    }
}

/// A configured signal source.
#[derive(Clone)]
pub enum SignalSource {
    Technical {
        settings: SourceSettings,
        service: Arc<dyn TechnicalIndicatorService>,
    },
    Pattern {
        settings: SourceSettings,
        service: Arc<dyn PatternRecognitionService>,
    },
    Sentiment {
        settings: SourceSettings,
        service: Arc<dyn SentimentService>,
    },
    MlModel {
        settings: SourceSettings,
        service: Arc<dyn MlPredictionService>,
    },
    Volume {
        settings: SourceSettings,
        service: Arc<dyn VolumeAnalysisService>,
    },
}

impl SignalSource {
    /// Bind a source config entry to its collaborator.
    pub fn from_config(cfg: &SourceConfig, collaborators: &Collaborators) -> Self {
        let settings = SourceSettings::from(cfg);
        match cfg.kind {
            SourceKind::Technical => Self::Technical {
                settings,
                service: Arc::clone(&collaborators.technical),
            },
            SourceKind::Pattern => Self::Pattern {
                settings,
                service: Arc::clone(&collaborators.patterns),
            },
            SourceKind::Sentiment => Self::Sentiment {
                settings,
                service: Arc::clone(&collaborators.sentiment),
            },
            SourceKind::MlModel => Self::MlModel {
                settings,
                service: Arc::clone(&collaborators.ml),
            },
            SourceKind::Volume => Self::Volume {
                settings,
                service: Arc::clone(&collaborators.volume),
            },
        }
    }

    /// Build every enabled source from config, in config order.
    pub fn build_all(configs: &[SourceConfig], collaborators: &Collaborators) -> Vec<Self> {
        configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| Self::from_config(c, collaborators))
            .collect()
    }

    pub fn settings(&self) -> &SourceSettings {
        match self {
            Self::Technical { settings, .. }
            | Self::Pattern { settings, .. }
            | Self::Sentiment { settings, .. }
            | Self::MlModel { settings, .. }
            | Self::Volume { settings, .. } => settings,
        }
    }

    pub fn id(&self) -> &SourceId {
        &self.settings().id
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Technical { .. } => SourceKind::Technical,
            Self::Pattern { .. } => SourceKind::Pattern,
            Self::Sentiment { .. } => SourceKind::Sentiment,
            Self::MlModel { .. } => SourceKind::MlModel,
            Self::Volume { .. } => SourceKind::Volume,
        }
    }

    pub fn is_risk_override(&self) -> bool {
        self.settings().risk_override
    }

    /// Fetch and normalize this source's opinion, failing with
    /// [`SourceError::Timeout`] once `deadline` passes.
    ///
    /// The returned signal is stamped with the requested `timeframe` even for
    /// symbol-level sources, so fusion can weight it within that timeframe.
    pub async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        deadline: Instant,
    ) -> Result<Signal, SourceError> {
        match tokio::time::timeout_at(deadline, self.read(symbol, timeframe)).await {
            Ok(result) => {
                let reading = result?;
                Ok(Signal::new(
                    self.id().clone(),
                    self.kind(),
                    symbol,
                    timeframe,
                    reading.direction,
                    reading.strength,
                    reading.confidence,
                    reading.explanation,
                ))
            }
            Err(_) => Err(SourceError::Timeout),
        }
    }

    async fn read(&self, symbol: &str, timeframe: Timeframe) -> Result<Reading, SourceError> {
        match self {
            Self::Technical { settings, service } => {
                let indicators = service.compute(symbol, timeframe).await?;
                Ok(mapping::map_indicators(
                    &indicators,
                    settings.calibration,
                    settings.neutral_band,
                ))
            }
            Self::Pattern { settings, service } => {
                let patterns = service.detect(symbol, timeframe).await?;
                Ok(mapping::map_patterns(
                    &patterns,
                    settings.calibration,
                    settings.neutral_band,
                ))
            }
            Self::Sentiment { settings, service } => {
                let reading = service.score(symbol).await?;
                Ok(mapping::map_sentiment(&reading, settings.neutral_band))
            }
            Self::MlModel { settings, service } => {
                let prediction = service.predict(symbol, timeframe).await?;
                Ok(mapping::map_prediction(&prediction, settings.neutral_band))
            }
            Self::Volume { settings, service } => {
                let profile = service.analyze(symbol, timeframe).await?;
                Ok(mapping::map_volume(
                    &profile,
                    settings.calibration,
                    settings.neutral_band,
                ))
            }
        }
    }
}

impl std::fmt::Debug for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSource")
            .field("kind", &self.kind())
            .field("settings", self.settings())
            .finish()
    }
}
