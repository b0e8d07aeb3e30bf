use thiserror::Error;

/// Typed error hierarchy for the recommendation engine.
///
/// Library-internal errors use specific variants; application code wraps with
/// `anyhow::Context` for propagation. Most of the taxonomy is absorbed by the
/// engine and surfaced as a degraded recommendation; only
/// [`EngineError::InternalInvariantViolation`] and [`EngineError::Cancelled`]
/// reach a `generate_recommendation` caller.
#[derive(Error, Debug)]
pub enum EngineError {
    // -- Sources ------------------------------------------------------------
    #[error("signal source unavailable: {source_id} ({reason})")]
    SourceUnavailable { source_id: String, reason: String },

    #[error("insufficient signals: {responded} of {required} required sources responded")]
    InsufficientSignals { responded: usize, required: usize },

    // -- Resolution ---------------------------------------------------------
    #[error("unresolved conflict: consensus {consensus} below minimum {minimum}")]
    UnresolvedConflict { consensus: String, minimum: String },

    // -- Risk ---------------------------------------------------------------
    #[error("invalid risk context: {reason}")]
    InvalidRiskContext { reason: String },

    #[error("internal invariant violated for {symbol}: {reason}")]
    InternalInvariantViolation { symbol: String, reason: String },

    // -- Request lifecycle --------------------------------------------------
    #[error("evaluation cancelled for {symbol}")]
    Cancelled { symbol: String },

    // -- Feedback -----------------------------------------------------------
    #[error("unknown recommendation: {id}")]
    UnknownRecommendation { id: String },

    #[error("recommendation {id} already resolved as {state}")]
    AlreadyResolved { id: String, state: String },

    // -- Configuration ------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    // -- Forwarded errors ---------------------------------------------------
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure of a single adapter call.
///
/// Never surfaced to callers: the engine records it as a [`SourceOutcome`]
/// and excludes the source from fusion.
///
/// [`SourceOutcome`]: crate::types::SourceOutcome
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("deadline elapsed")]
    Timeout,

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    /// The engine-level view of this failure, used when logging the exclusion.
    pub fn to_engine_error(&self, source_id: &str) -> EngineError {
        EngineError::SourceUnavailable {
            source_id: source_id.to_string(),
            reason: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_maps_to_source_unavailable() {
        let err = SourceError::Timeout.to_engine_error("technical");
        assert_eq!(
            err.to_string(),
            "signal source unavailable: technical (deadline elapsed)"
        );
    }

    #[test]
    fn invariant_violation_message_names_symbol() {
        let err = EngineError::InternalInvariantViolation {
            symbol: "AAPL".into(),
            reason: "stop above entry".into(),
        };
        assert!(err.to_string().contains("AAPL"));
    }
}
