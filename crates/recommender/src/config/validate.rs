use anyhow::{bail, Result};
use rust_decimal::Decimal;
use std::collections::HashSet;

use super::types::EngineConfig;

/// Validate invariants across the merged config that serde alone cannot
/// enforce. Called automatically by [`super::load_config`].
///
/// Every failing rule is collected so one run reports all problems.
pub fn validate_config(config: &EngineConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    validate_evaluation_config(config, &mut errors);
    validate_fusion_config(config, &mut errors);
    validate_conflict_config(config, &mut errors);
    validate_uncertainty_config(config, &mut errors);
    validate_risk_config(config, &mut errors);
    validate_feedback_config(config, &mut errors);
    validate_sources(config, &mut errors);
    validate_services(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = format!(
            "Configuration validation failed ({} error{}):\n  - {}",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" },
            errors.join("\n  - ")
        );
        bail!("{msg}");
    }
}

fn check_unit(name: &str, value: Decimal, errors: &mut Vec<String>) {
    if value < Decimal::ZERO || value > Decimal::ONE {
        errors.push(format!("{name} must be in [0, 1], got {value}"));
    }
}

// ---------------------------------------------------------------------------
// Engine sections
// ---------------------------------------------------------------------------

fn validate_evaluation_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let eval = &config.engine.evaluation;

    if eval.deadline_ms == 0 {
        errors.push("evaluation: deadline_ms must be > 0".into());
    }
    if eval.bulk_concurrency == 0 {
        errors.push("evaluation: bulk_concurrency must be > 0".into());
    }
    if eval.ttl_multiplier == 0 {
        errors.push("evaluation: ttl_multiplier must be > 0".into());
    }
    check_unit(
        "evaluation.stream_confidence_delta",
        eval.stream_confidence_delta,
        errors,
    );
}

fn validate_fusion_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let fusion = &config.engine.fusion;

    check_unit("fusion.hold_epsilon", fusion.hold_epsilon, errors);

    let mut seen = HashSet::new();
    for entry in &fusion.timeframe_weights {
        if !seen.insert(entry.timeframe) {
            errors.push(format!(
                "fusion.timeframe_weights: duplicate timeframe {}",
                entry.timeframe
            ));
        }
        if entry.conviction < Decimal::ZERO || entry.urgency < Decimal::ZERO {
            errors.push(format!(
                "fusion.timeframe_weights.{}: weights must be non-negative",
                entry.timeframe
            ));
        }
    }

    let conviction: Decimal = fusion.timeframe_weights.iter().map(|e| e.conviction).sum();
    let urgency: Decimal = fusion.timeframe_weights.iter().map(|e| e.urgency).sum();
    if !fusion.timeframe_weights.is_empty() {
        if conviction <= Decimal::ZERO {
            errors.push("fusion.timeframe_weights: conviction layer sums to zero".into());
        }
        if urgency <= Decimal::ZERO {
            errors.push("fusion.timeframe_weights: urgency layer sums to zero".into());
        }
    }
}

fn validate_conflict_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let c = &config.engine.conflict;

    check_unit("conflict.opposing_strength_threshold", c.opposing_strength_threshold, errors);
    check_unit("conflict.low_consensus", c.low_consensus, errors);
    check_unit("conflict.strong_consensus", c.strong_consensus, errors);
    check_unit("conflict.risk_override_min_strength", c.risk_override_min_strength, errors);
    check_unit("conflict.reduced_size_factor", c.reduced_size_factor, errors);
    check_unit("conflict.dissent_confidence_discount", c.dissent_confidence_discount, errors);

    if c.low_consensus >= c.strong_consensus {
        errors.push(format!(
            "conflict: low_consensus ({}) must be < strong_consensus ({})",
            c.low_consensus, c.strong_consensus
        ));
    }
}

fn validate_uncertainty_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let u = &config.engine.uncertainty;
    check_unit("uncertainty.single_source_ceiling", u.single_source_ceiling, errors);
    check_unit("uncertainty.unresolved_conflict_penalty", u.unresolved_conflict_penalty, errors);
}

fn validate_risk_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let r = &config.engine.risk;

    if r.kelly_fraction <= Decimal::ZERO || r.kelly_fraction > Decimal::ONE {
        errors.push(format!(
            "risk: kelly_fraction must be in (0, 1], got {}",
            r.kelly_fraction
        ));
    }
    if r.atr_stop_multiplier <= Decimal::ZERO {
        errors.push("risk: atr_stop_multiplier must be > 0".into());
    }
    if r.min_risk_reward <= Decimal::ZERO {
        errors.push("risk: min_risk_reward must be > 0".into());
    }
    if r.target_risk_reward < r.min_risk_reward {
        errors.push(format!(
            "risk: target_risk_reward ({}) must be >= min_risk_reward ({})",
            r.target_risk_reward, r.min_risk_reward
        ));
    }
    check_unit("risk.min_action_confidence", r.min_action_confidence, errors);
}

fn validate_feedback_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let f = &config.engine.feedback;

    if f.ema_alpha <= Decimal::ZERO || f.ema_alpha > Decimal::ONE {
        errors.push(format!("feedback: ema_alpha must be in (0, 1], got {}", f.ema_alpha));
    }
    check_unit("feedback.initial_accuracy", f.initial_accuracy, errors);
    check_unit("feedback.accuracy_floor", f.accuracy_floor, errors);
    if f.outcome_poll_interval_seconds == 0 {
        errors.push("feedback: outcome_poll_interval_seconds must be > 0".into());
    }
    if f.resolved_retention == 0 {
        errors.push("feedback: resolved_retention must be > 0".into());
    }
}

// ---------------------------------------------------------------------------
// Sources and services
// ---------------------------------------------------------------------------

fn validate_sources(config: &EngineConfig, errors: &mut Vec<String>) {
    let enabled = config.sources.iter().filter(|s| s.enabled).count();
    if enabled == 0 {
        errors.push("sources: at least one source must be enabled".into());
    }

    let mut ids = HashSet::new();
    for source in &config.sources {
        if source.id.trim().is_empty() {
            errors.push("sources: id must not be empty".into());
        }
        if !ids.insert(source.id.as_str()) {
            errors.push(format!("sources: duplicate id {}", source.id));
        }
        check_unit(&format!("sources.{}.calibration", source.id), source.calibration, errors);
        check_unit(&format!("sources.{}.neutral_band", source.id), source.neutral_band, errors);
    }

    if config.engine.evaluation.min_responding_sources > enabled.max(1) {
        errors.push(format!(
            "evaluation: min_responding_sources ({}) exceeds enabled sources ({enabled})",
            config.engine.evaluation.min_responding_sources
        ));
    }
}

fn validate_services(config: &EngineConfig, errors: &mut Vec<String>) {
    let s = &config.services;
    if !(s.base_url.starts_with("http://") || s.base_url.starts_with("https://")) {
        errors.push(format!("services: base_url must be http(s), got {:?}", s.base_url));
    }
    if let Some(ml) = &s.ml_base_url {
        if !(ml.starts_with("http://") || ml.starts_with("https://")) {
            errors.push(format!("services: ml_base_url must be http(s), got {ml:?}"));
        }
    }
    if s.timeout_ms == 0 {
        errors.push("services: timeout_ms must be > 0".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::*;
    use crate::types::SourceKind;
    use rust_decimal_macros::dec;

    fn valid_config() -> EngineConfig {
        EngineConfig {
            app: AppConfig {
                logging: LoggingConfig {
                    log_dir: "logs".into(),
                    file_name: "recommender.log".into(),
                    filter: None,
                },
                watchlist: WatchlistConfig::default(),
            },
            engine: EngineTuning::default(),
            sources: vec![SourceConfig {
                id: "technical".into(),
                kind: SourceKind::Technical,
                enabled: true,
                risk_override: false,
                calibration: dec!(0.6),
                neutral_band: dec!(0.1),
            }],
            services: ServicesConfig {
                base_url: "http://localhost:8080".into(),
                ml_base_url: None,
                ml_enabled: true,
                timeout_ms: 500,
            },
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_inverted_consensus_bands_rejected() {
        let mut config = valid_config();
        config.engine.conflict.low_consensus = dec!(0.85);
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("low_consensus"), "got: {err}");
    }

    #[test]
    fn test_errors_are_aggregated() {
        let mut config = valid_config();
        config.engine.feedback.ema_alpha = Decimal::ZERO;
        config.engine.risk.min_risk_reward = Decimal::ZERO;
        config.sources[0].enabled = false;
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("3 errors") || err.contains("4 errors"), "got: {err}");
        assert!(err.contains("ema_alpha"));
        assert!(err.contains("at least one source"));
    }

    #[test]
    fn test_duplicate_source_ids_rejected() {
        let mut config = valid_config();
        let dup = config.sources[0].clone();
        config.sources.push(dup);
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("duplicate id technical"), "got: {err}");
    }

    #[test]
    fn test_zero_conviction_layer_rejected() {
        let mut config = valid_config();
        for entry in &mut config.engine.fusion.timeframe_weights {
            entry.conviction = Decimal::ZERO;
        }
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("conviction layer"), "got: {err}");
    }

    #[test]
    fn test_non_http_base_url_rejected() {
        let mut config = valid_config();
        config.services.base_url = "localhost:8080".into();
        assert!(validate_config(&config).is_err());
    }
}
