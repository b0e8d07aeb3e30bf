use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use signal_recommender::clients;
use signal_recommender::config::{self, WatchlistConfig};
use signal_recommender::constants::{CONFIG_DIR_ENV, DEFAULT_CONFIG_DIR, SHUTDOWN_GRACE_SECS};
use signal_recommender::logging;
use signal_recommender::service::RecommendationService;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    let config_dir = std::env::var(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR));

    let config = config::load_config(&config_dir)?;

    // Initialize tracing; the guard lives for the process lifetime.
    let _guard = logging::init_tracing(&config.app.logging)?;

    info!(
        config_dir = %config_dir.display(),
        sources = config.sources.iter().filter(|s| s.enabled).count(),
        deadline_ms = config.engine.evaluation.deadline_ms,
        watchlist = config.app.watchlist.symbols.len(),
        "signal recommender starting"
    );

    // -----------------------------------------------------------------------
    // Component construction
    // -----------------------------------------------------------------------

    let collaborators =
        clients::http_collaborators(&config.services).context("failed to build HTTP clients")?;

    if let Some(path) = &config.engine.feedback.audit_db_path {
        ensure_parent_dir(Path::new(path))?;
    }

    let service = Arc::new(
        RecommendationService::from_config(&config, collaborators)
            .await
            .context("failed to initialize recommendation service")?,
    );

    info!(weights_version = service.weights().version, "all components initialized");

    // -----------------------------------------------------------------------
    // Runtime actors
    // -----------------------------------------------------------------------

    let shutdown = CancellationToken::new();

    let monitor = service.outcome_monitor(
        Duration::from_secs(config.engine.feedback.outcome_poll_interval_seconds.max(1)),
        shutdown.clone(),
    );
    let monitor_handle = tokio::spawn(async move {
        if let Err(e) = monitor.run().await {
            error!(error = %e, "outcome monitor exited with error");
        }
    });

    let mut handles: Vec<JoinHandle<()>> = vec![monitor_handle];
    handles.extend(spawn_stream_loggers(&service, &config.app.watchlist, &shutdown));

    if config.app.watchlist.symbols.is_empty() {
        warn!("watchlist empty, serving outcome monitoring only");
    } else {
        handles.push(spawn_watchlist_loop(
            service.clone(),
            config.app.watchlist.clone(),
            shutdown.clone(),
        ));
    }

    info!("all tasks running, press Ctrl+C to shutdown");

    // -----------------------------------------------------------------------
    // Wait for shutdown signal
    // -----------------------------------------------------------------------

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("shutdown signal received, stopping gracefully...");
    shutdown.cancel();

    let joined = tokio::time::timeout(
        Duration::from_secs(SHUTDOWN_GRACE_SECS),
        futures::future::join_all(handles),
    )
    .await;

    match joined {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    error!(error = %e, "runtime task panicked");
                }
            }
        }
        Err(_) => warn!(grace_secs = SHUTDOWN_GRACE_SECS, "tasks did not stop in time"),
    }

    info!("shutdown complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Runtime tasks
// ---------------------------------------------------------------------------

/// Re-evaluate the watchlist every `interval_seconds`.
fn spawn_watchlist_loop(
    service: Arc<RecommendationService>,
    watchlist: WatchlistConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(watchlist.interval_seconds.max(1)));
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("watchlist loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let report = service
                        .bulk_generate(
                            &watchlist.symbols,
                            &watchlist.timeframes,
                            &watchlist.portfolio_id,
                            &shutdown,
                        )
                        .await;
                    for (symbol, error) in report.failed() {
                        warn!(symbol, error = %error, "evaluation failed");
                    }
                }
            }
        }
    })
}

/// Log every pushed recommendation for the watchlist symbols.
fn spawn_stream_loggers(
    service: &Arc<RecommendationService>,
    watchlist: &WatchlistConfig,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    watchlist
        .symbols
        .iter()
        .map(|symbol| {
            let service = service.clone();
            let shutdown = shutdown.clone();
            let symbol = symbol.clone();
            tokio::spawn(async move {
                let mut updates = service.recommendation_stream(&symbol).await;
                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        next = updates.next() => match next {
                            Some(rec) => info!(
                                symbol = %rec.symbol,
                                action = %rec.action,
                                confidence = %rec.confidence,
                                size = %rec.position_size_pct,
                                entry = %rec.entry_price,
                                reasoning = ?rec.reasoning,
                                "recommendation update"
                            ),
                            None => break,
                        },
                    }
                }
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Initialization helpers
// ---------------------------------------------------------------------------

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}
