//! Append-only audit log of recommendations and their outcomes.
//!
//! SQLite-backed. Published recommendations are stored with their full JSON
//! payload; consumed performance samples and every published weight snapshot
//! are kept so a source's realized accuracy can be reconstructed later.
//!
//! Uses `sqlx::query()` runtime queries (not compile-time `query!` macros)
//! since the database schema is created via `sqlx::migrate!`.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::types::{
    OutcomeTransition, Recommendation, SourceAccuracyStats, SourceId, WeightSnapshot,
};

/// SQLite-backed audit store.
#[derive(Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    /// Open (or create, `mode=rwc`) the database at `db_path` and run
    /// migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        let log = Self::connect(&format!("sqlite:{db_path}?mode=rwc"))
            .await
            .with_context(|| format!("failed to open audit log at {db_path}"))?;
        info!(db_path, "audit log initialized");
        Ok(log)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1) // SQLite is single-writer
            .connect(url)
            .await
            .context("failed to connect to SQLite database")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        Ok(Self { pool })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub async fn record_recommendation(&self, rec: &Recommendation) -> Result<()> {
        let payload = serde_json::to_string(rec).context("failed to encode recommendation")?;

        sqlx::query(
            "INSERT OR IGNORE INTO recommendations \
             (id, symbol, action, confidence, entry_price, stop_loss, take_profit, \
              position_size, created_at, expires_at, payload) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&rec.id)
        .bind(&rec.symbol)
        .bind(rec.action.as_str())
        .bind(rec.confidence.to_string())
        .bind(rec.entry_price.to_string())
        .bind(rec.stop_loss.map(|d| d.to_string()))
        .bind(rec.take_profit.map(|d| d.to_string()))
        .bind(rec.position_size_pct.to_string())
        .bind(rec.timestamp.timestamp_millis())
        .bind(rec.expires_at.timestamp_millis())
        .bind(payload)
        .execute(&self.pool)
        .await?;

        debug!(id = %rec.id, symbol = %rec.symbol, action = %rec.action, "recommendation audited");
        Ok(())
    }

    /// Record a terminal transition and its samples atomically.
    pub async fn record_outcome(
        &self,
        transition: &OutcomeTransition,
        resolved_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO outcomes \
             (recommendation_id, state, exit_price, resolved_at, weights_version) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&transition.recommendation_id)
        .bind(transition.state.as_str())
        .bind(transition.exit_price.to_string())
        .bind(resolved_at.timestamp_millis())
        .bind(i64::try_from(transition.weights_version).unwrap_or(i64::MAX))
        .execute(&mut *tx)
        .await?;

        for sample in &transition.samples {
            sqlx::query(
                "INSERT INTO performance_samples \
                 (recommendation_id, source, direction_correct, realized_return, observed_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&sample.recommendation_id)
            .bind(sample.source.as_str())
            .bind(sample.realized_direction_correct)
            .bind(sample.realized_return.to_string())
            .bind(sample.observed_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            id = %transition.recommendation_id,
            state = %transition.state,
            samples = transition.samples.len(),
            "outcome audited"
        );
        Ok(())
    }

    pub async fn record_snapshot(&self, snapshot: &WeightSnapshot) -> Result<()> {
        let payload = serde_json::to_string(snapshot).context("failed to encode weights")?;
        sqlx::query(
            "INSERT OR REPLACE INTO weight_snapshots (version, published_at, payload) \
             VALUES (?, ?, ?)",
        )
        .bind(i64::try_from(snapshot.version).unwrap_or(i64::MAX))
        .bind(snapshot.published_at.timestamp_millis())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_recommendation(&self, id: &str) -> Result<Option<Recommendation>> {
        let row = sqlx::query("SELECT payload FROM recommendations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            serde_json::from_str(&r.get::<String, _>("payload"))
                .context("corrupt recommendation payload")
        })
        .transpose()
    }

    /// Most recent snapshot, used to restore learned weights on startup.
    pub async fn latest_snapshot(&self) -> Result<Option<WeightSnapshot>> {
        let row = sqlx::query("SELECT payload FROM weight_snapshots ORDER BY version DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            serde_json::from_str(&r.get::<String, _>("payload"))
                .context("corrupt weight snapshot payload")
        })
        .transpose()
    }

    /// Per-source hit rate and mean realized return.
    ///
    /// `window_days = None` aggregates all samples.
    pub async fn source_accuracy(&self, window_days: Option<u32>) -> Result<Vec<SourceAccuracyStats>> {
        let cutoff = window_days
            .map(|days| (Utc::now() - Duration::days(i64::from(days))).timestamp_millis())
            .unwrap_or(i64::MIN);

        let rows = sqlx::query(
            "SELECT source, direction_correct, realized_return FROM performance_samples \
             WHERE observed_at >= ? ORDER BY source",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut acc: BTreeMap<SourceId, (u32, u32, Decimal)> = BTreeMap::new();
        for row in rows {
            let source = SourceId::new(row.get::<String, _>("source"));
            let correct: bool = row.get("direction_correct");
            let ret: Decimal = row
                .get::<String, _>("realized_return")
                .parse()
                .unwrap_or(Decimal::ZERO);
            let entry = acc.entry(source).or_insert((0, 0, Decimal::ZERO));
            entry.0 += 1;
            entry.1 += u32::from(correct);
            entry.2 += ret;
        }

        Ok(acc
            .into_iter()
            .map(|(source, (samples, correct, total_return))| {
                let n = Decimal::from(samples);
                SourceAccuracyStats {
                    source,
                    samples,
                    correct,
                    hit_rate: Decimal::from(correct) / n,
                    avg_return: total_return / n,
                }
            })
            .collect())
    }

    /// Count of audited recommendations for a symbol.
    pub async fn recommendation_count(&self, symbol: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM recommendations WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
