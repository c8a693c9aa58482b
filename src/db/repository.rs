use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::db::models::ListingRow;
use crate::error::Result;
use crate::state::HistoryStore;
use crate::types::{Alert, Identity, ListingObservation, Provenance};

/// Opens (creating if needed) the SQLite database and applies migrations.
pub async fn connect(db_path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {db_path}");
    Ok(pool)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SaveStats {
    pub upserted: usize,
    pub deleted: usize,
}

/// Persisted history: read-all, write-all per cycle, and identity upsert.
pub struct HistoryRepository {
    pool: SqlitePool,
}

impl HistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn load_history(&self, retention_days: i64) -> Result<HistoryStore> {
        let rows: Vec<ListingRow> = sqlx::query_as(
            r#"
            SELECT source, link, title, price, km, year, region, brand, model, image_url,
                   observed_at, last_drop_alert_price, last_margin_alert_price
            FROM listings
            ORDER BY source, link
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        debug!("Loaded {} history rows", rows.len());
        Ok(HistoryStore::from_rows(retention_days, rows.into_iter().map(ListingObservation::from)))
    }

    /// Replaces the stored table with `history` in one transaction: every row
    /// is upserted, identities missing from the snapshot are deleted.
    pub async fn save_history(&self, history: &HistoryStore) -> Result<SaveStats> {
        let mut tx = self.pool.begin().await?;

        let existing: Vec<(String, String)> = sqlx::query_as("SELECT source, link FROM listings")
            .fetch_all(&mut *tx)
            .await?;
        let keep: HashSet<&Identity> = history.rows().map(|row| &row.identity).collect();

        let mut stats = SaveStats::default();
        for (source, link) in existing {
            if !keep.contains(&Identity::new(source.clone(), link.clone())) {
                sqlx::query("DELETE FROM listings WHERE source = ? AND link = ?")
                    .bind(source)
                    .bind(link)
                    .execute(&mut *tx)
                    .await?;
                stats.deleted += 1;
            }
        }

        for row in history.sorted_rows() {
            upsert_listing(&mut *tx, row).await?;
            stats.upserted += 1;
        }

        tx.commit().await?;
        Ok(stats)
    }

    pub async fn upsert(&self, row: &ListingObservation) -> Result<()> {
        upsert_listing(&self.pool, row).await
    }

    /// Appends delivered alerts to the `alerts` log.
    pub async fn record_alerts(&self, alerts: &[Alert], at: DateTime<Utc>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for alert in alerts {
            let provenance = alert
                .reference
                .map(|r| r.provenance)
                .unwrap_or(Provenance::Unavailable)
                .to_string();
            sqlx::query(
                r#"
                INSERT INTO alerts (
                    source, link, title, price, region,
                    reference_value, reference_provenance, reference_samples,
                    is_deal, is_drop, previous_price, drop_pct, drop_abs,
                    priority_region, score, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&alert.identity.source)
            .bind(&alert.identity.link)
            .bind(&alert.title)
            .bind(alert.price)
            .bind(&alert.region)
            .bind(alert.reference.map(|r| r.value))
            .bind(provenance)
            .bind(alert.reference.map_or(0, |r| r.samples as i64))
            .bind(alert.deal)
            .bind(alert.is_drop())
            .bind(alert.drop.map(|d| d.previous_price))
            .bind(alert.drop.map(|d| d.pct))
            .bind(alert.drop.map(|d| d.abs))
            .bind(alert.priority_region)
            .bind(alert.score)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(alerts.len())
    }
}

/// Inserts or replaces the row for `row.identity`.
pub async fn upsert_listing<'e, E>(executor: E, row: &ListingObservation) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO listings (
            source, link, title, price, km, year, region, brand, model, image_url,
            observed_at, last_drop_alert_price, last_margin_alert_price
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source, link) DO UPDATE SET
            title = excluded.title,
            price = excluded.price,
            km = excluded.km,
            year = excluded.year,
            region = excluded.region,
            brand = excluded.brand,
            model = excluded.model,
            image_url = excluded.image_url,
            observed_at = excluded.observed_at,
            last_drop_alert_price = excluded.last_drop_alert_price,
            last_margin_alert_price = excluded.last_margin_alert_price
        "#,
    )
    .bind(&row.identity.source)
    .bind(&row.identity.link)
    .bind(&row.title)
    .bind(row.price)
    .bind(row.km.map(i64::from))
    .bind(row.year.map(i64::from))
    .bind(&row.region)
    .bind(&row.brand)
    .bind(&row.model)
    .bind(&row.image_url)
    .bind(row.observed_at)
    .bind(row.last_drop_alert_price)
    .bind(row.last_margin_alert_price)
    .execute(executor)
    .await?;
    Ok(())
}

/// Single-connection in-memory database with migrations applied.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").expect("valid sqlite url");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
    pool
}
