pub mod types;
pub mod validate;

pub use types::*;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Load and merge all config JSON files into a single [`EngineConfig`],
/// then apply environment variable overrides and validate.
///
/// Expected directory layout:
/// ```text
/// config/
///   app.json
///   engine.json
///   sources.json
///   services.json
/// ```
///
/// # Environment variable overrides
///
/// | Env Var                          | Config Field                          |
/// |----------------------------------|---------------------------------------|
/// | `RECOMMENDER_DEADLINE_MS`        | `engine.evaluation.deadline_ms`       |
/// | `RECOMMENDER_MIN_RISK_REWARD`    | `engine.risk.min_risk_reward`         |
/// | `RECOMMENDER_KELLY_FRACTION`     | `engine.risk.kelly_fraction`          |
/// | `RECOMMENDER_EMA_ALPHA`          | `engine.feedback.ema_alpha`           |
/// | `RECOMMENDER_AUDIT_DB`           | `engine.feedback.audit_db_path`       |
/// | `RECOMMENDER_SERVICES_URL`       | `services.base_url`                   |
pub fn load_config(config_dir: &Path) -> Result<EngineConfig> {
    let read = |name: &str| -> Result<String> {
        let path = config_dir.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))
    };

    let app: AppConfig = serde_json::from_str(&read("app.json")?).context("parsing app.json")?;

    let engine: EngineTuning =
        serde_json::from_str(&read("engine.json")?).context("parsing engine.json")?;

    let sources: SourcesFile =
        serde_json::from_str(&read("sources.json")?).context("parsing sources.json")?;

    let services: ServicesConfig =
        serde_json::from_str(&read("services.json")?).context("parsing services.json")?;

    let mut config = EngineConfig {
        app,
        engine,
        sources: sources.sources,
        services,
    };

    apply_env_overrides(&mut config);
    validate::validate_config(&config)?;

    Ok(config)
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides to the loaded config.
///
/// Only non-empty env vars take effect. Parse failures are skipped and the
/// JSON value remains.
fn apply_env_overrides(config: &mut EngineConfig) {
    if let Some(val) = env_parse::<u64>("RECOMMENDER_DEADLINE_MS") {
        info!(val, "env override: RECOMMENDER_DEADLINE_MS");
        config.engine.evaluation.deadline_ms = val;
    }

    if let Some(val) = env_decimal("RECOMMENDER_MIN_RISK_REWARD") {
        info!(%val, "env override: RECOMMENDER_MIN_RISK_REWARD");
        config.engine.risk.min_risk_reward = val;
    }

    if let Some(val) = env_decimal("RECOMMENDER_KELLY_FRACTION") {
        info!(%val, "env override: RECOMMENDER_KELLY_FRACTION");
        config.engine.risk.kelly_fraction = val;
    }

    if let Some(val) = env_decimal("RECOMMENDER_EMA_ALPHA") {
        info!(%val, "env override: RECOMMENDER_EMA_ALPHA");
        config.engine.feedback.ema_alpha = val;
    }

    if let Some(val) = env_string("RECOMMENDER_AUDIT_DB") {
        info!(path = %val, "env override: RECOMMENDER_AUDIT_DB");
        config.engine.feedback.audit_db_path = Some(val);
    }

    if let Some(val) = env_string("RECOMMENDER_SERVICES_URL") {
        info!("env override: RECOMMENDER_SERVICES_URL");
        config.services.base_url = val;
    }
}

/// Read a non-empty env var as a `String`.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read a non-empty env var and parse it as `T`.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// Read a non-empty env var and parse it as `Decimal`.
fn env_decimal(key: &str) -> Option<Decimal> {
    env_string(key).and_then(|v| Decimal::from_str(&v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SourceKind, Timeframe};
    use rust_decimal_macros::dec;
    use serial_test::serial;
    use std::path::PathBuf;

    fn project_config_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("config")
    }

    // -----------------------------------------------------------------------
    // Helper: write a minimal set of config JSON files to a temp dir.
    // -----------------------------------------------------------------------

    fn write_test_configs(dir: &Path) {
        std::fs::write(
            dir.join("app.json"),
            r#"{
                "logging": { "log_dir": "logs" },
                "watchlist": { "symbols": ["AAPL", "MSFT"], "timeframes": ["15m", "4h"] }
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("engine.json"),
            r#"{
                "evaluation": { "deadline_ms": 200 },
                "risk": { "kelly_fraction": "0.30" }
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("sources.json"),
            r#"{
                "sources": [
                    { "id": "technical", "kind": "technical", "calibration": "0.65" },
                    { "id": "ml", "kind": "ml_model" },
                    { "id": "sentiment", "kind": "sentiment" },
                    { "id": "vol_spike", "kind": "volume", "risk_override": true }
                ]
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("services.json"),
            r#"{ "base_url": "http://localhost:8080" }"#,
        )
        .unwrap();
    }

    // -----------------------------------------------------------------------
    // Env cleanup helper, run before and after each env test.
    // -----------------------------------------------------------------------

    fn clean_recommender_env() {
        for key in [
            "RECOMMENDER_DEADLINE_MS",
            "RECOMMENDER_MIN_RISK_REWARD",
            "RECOMMENDER_KELLY_FRACTION",
            "RECOMMENDER_EMA_ALPHA",
            "RECOMMENDER_AUDIT_DB",
            "RECOMMENDER_SERVICES_URL",
        ] {
            std::env::remove_var(key);
        }
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[test]
    #[serial]
    fn test_load_real_configs() {
        clean_recommender_env();
        let dir = project_config_dir();
        if !dir.exists() {
            eprintln!("skipping: config dir not found at {}", dir.display());
            return;
        }
        let config = load_config(&dir).expect("config should load and validate");
        assert!(!config.sources.is_empty());
        assert_eq!(config.engine.fusion.hold_epsilon, dec!(0.1));
        clean_recommender_env();
    }

    #[test]
    #[serial]
    fn test_load_test_configs_with_defaults() {
        clean_recommender_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        let config = load_config(tmp.path()).expect("test config should load");

        assert_eq!(config.engine.evaluation.deadline_ms, 200);
        assert_eq!(config.engine.evaluation.min_responding_sources, 1);
        assert_eq!(config.engine.risk.kelly_fraction, dec!(0.30));
        assert_eq!(config.engine.risk.atr_stop_multiplier, dec!(1.5));
        assert_eq!(config.engine.risk.min_risk_reward, dec!(2.0));
        assert_eq!(config.engine.conflict.low_consensus, dec!(0.6));
        assert_eq!(config.engine.conflict.strong_consensus, dec!(0.8));
        assert_eq!(config.engine.uncertainty.single_source_ceiling, dec!(0.6));
        assert_eq!(config.engine.feedback.ema_alpha, dec!(0.1));
        assert_eq!(config.app.logging.file_name, "recommender.log");
        assert_eq!(
            config.app.watchlist.timeframes,
            vec![Timeframe::M15, Timeframe::H4]
        );

        assert_eq!(config.sources.len(), 4);
        assert_eq!(config.sources[0].calibration, dec!(0.65));
        assert_eq!(config.sources[1].kind, SourceKind::MlModel);
        assert!(config.sources[3].risk_override);
        assert!(config.services.ml_enabled);
        clean_recommender_env();
    }

    #[test]
    #[serial]
    fn test_missing_config_file_errors() {
        clean_recommender_env();
        let tmp = tempfile::tempdir().unwrap();
        let err = load_config(tmp.path()).unwrap_err();
        assert!(
            err.to_string().contains("failed to read config file"),
            "expected file-not-found error, got: {err}"
        );
    }

    #[test]
    #[serial]
    fn test_env_override_deadline_and_services() {
        clean_recommender_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("RECOMMENDER_DEADLINE_MS", "90");
        std::env::set_var("RECOMMENDER_SERVICES_URL", "http://gateway.internal:9000");
        std::env::set_var("RECOMMENDER_AUDIT_DB", "data/audit.db");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.engine.evaluation.deadline_ms, 90);
        assert_eq!(config.services.base_url, "http://gateway.internal:9000");
        assert_eq!(
            config.engine.feedback.audit_db_path.as_deref(),
            Some("data/audit.db")
        );
        clean_recommender_env();
    }

    #[test]
    #[serial]
    fn test_env_override_decimal() {
        clean_recommender_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("RECOMMENDER_MIN_RISK_REWARD", "2.5");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.engine.risk.min_risk_reward, dec!(2.5));
        clean_recommender_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_and_invalid_ignored() {
        clean_recommender_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("RECOMMENDER_DEADLINE_MS", "");
        std::env::set_var("RECOMMENDER_KELLY_FRACTION", "not_a_number");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.engine.evaluation.deadline_ms, 200);
        assert_eq!(config.engine.risk.kelly_fraction, dec!(0.30));
        clean_recommender_env();
    }

    #[test]
    #[serial]
    fn test_invalid_alpha_from_env_fails_validation() {
        clean_recommender_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("RECOMMENDER_EMA_ALPHA", "1.5");
        let err = load_config(tmp.path()).unwrap_err();
        assert!(
            err.to_string().contains("ema_alpha"),
            "expected ema_alpha error, got: {err}"
        );
        clean_recommender_env();
    }
}
