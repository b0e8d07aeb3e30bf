pub mod analysis_client;
pub mod ml_client;

pub use analysis_client::AnalysisClient;
pub use ml_client::MlClient;

use std::sync::Arc;

use crate::config::ServicesConfig;
use crate::errors::EngineError;
use crate::sources::Collaborators;

/// Wire every collaborator to the HTTP services named in `services.json`.
pub fn http_collaborators(services: &ServicesConfig) -> Result<Collaborators, EngineError> {
    let gateway = Arc::new(AnalysisClient::new(&services.base_url, services.timeout_ms)?);
    let ml_url = services
        .ml_base_url
        .clone()
        .unwrap_or_else(|| services.base_url.clone());
    let ml = Arc::new(MlClient::new(ml_url, services.timeout_ms, services.ml_enabled)?);

    Ok(Collaborators {
        market: gateway.clone(),
        technical: gateway.clone(),
        patterns: gateway.clone(),
        sentiment: gateway.clone(),
        ml,
        volume: gateway.clone(),
        portfolio: gateway,
    })
}
