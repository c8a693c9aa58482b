use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{AlertRow, ListingRow};
use crate::error::AppError;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/listings", get(get_listings))
        .route("/alerts/recent", get(get_recent_alerts))
        .route("/stats/summary", get(get_stats_summary))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ListingsQuery {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct RecentAlertsQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ListingResponse {
    pub source: String,
    pub link: String,
    pub title: String,
    pub price: f64,
    pub km: Option<i64>,
    pub year: Option<i64>,
    pub region: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub observed_at: String,
    pub last_drop_alert_price: Option<f64>,
    pub last_margin_alert_price: Option<f64>,
}

impl From<ListingRow> for ListingResponse {
    fn from(r: ListingRow) -> Self {
        Self {
            source: r.source,
            link: r.link,
            title: r.title,
            price: r.price,
            km: r.km,
            year: r.year,
            region: r.region,
            brand: r.brand,
            model: r.model,
            observed_at: r.observed_at.to_rfc3339(),
            last_drop_alert_price: r.last_drop_alert_price,
            last_margin_alert_price: r.last_margin_alert_price,
        }
    }
}

#[derive(Serialize)]
pub struct SummaryResponse {
    pub listings: i64,
    pub segments: i64,
    pub alerts_24h: i64,
    pub deals_24h: i64,
    pub drops_24h: i64,
    pub last_observed_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn get_listings(
    State(state): State<ApiState>,
    Query(params): Query<ListingsQuery>,
) -> Result<Json<Vec<ListingResponse>>, AppError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1_000);

    let rows: Vec<ListingRow> = sqlx::query_as(
        r#"
        SELECT source, link, title, price, km, year, region, brand, model, image_url,
               observed_at, last_drop_alert_price, last_margin_alert_price
        FROM listings
        WHERE (? IS NULL OR lower(brand) = lower(?))
          AND (? IS NULL OR lower(model) = lower(?))
        ORDER BY observed_at DESC
        LIMIT ?
        "#,
    )
    .bind(&params.brand)
    .bind(&params.brand)
    .bind(&params.model)
    .bind(&params.model)
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows.into_iter().map(ListingResponse::from).collect()))
}

async fn get_recent_alerts(
    State(state): State<ApiState>,
    Query(params): Query<RecentAlertsQuery>,
) -> Result<Json<Vec<AlertRow>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    let rows: Vec<AlertRow> = sqlx::query_as(
        r#"
        SELECT id, source, link, title, price, region,
               reference_value, reference_provenance, reference_samples,
               is_deal, is_drop, previous_price, drop_pct, drop_abs,
               priority_region, score, created_at
        FROM alerts
        ORDER BY created_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows))
}

async fn get_stats_summary(State(state): State<ApiState>) -> Result<Json<SummaryResponse>, AppError> {
    let since = Utc::now() - Duration::hours(24);

    let (listings, segments): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COUNT(DISTINCT CASE WHEN brand IS NOT NULL AND model IS NOT NULL
                                   THEN lower(brand) || '/' || lower(model) END)
        FROM listings
        "#,
    )
    .fetch_one(&state.pool)
    .await?;

    let (alerts_24h, deals_24h, drops_24h): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(is_deal), 0),
               COALESCE(SUM(is_drop), 0)
        FROM alerts
        WHERE created_at > ?
        "#,
    )
    .bind(since)
    .fetch_one(&state.pool)
    .await?;

    let (last_observed_at,): (Option<String>,) = sqlx::query_as("SELECT MAX(observed_at) FROM listings")
        .fetch_one(&state.pool)
        .await?;

    Ok(Json(SummaryResponse {
        listings,
        segments,
        alerts_24h,
        deals_24h,
        drops_24h,
        last_observed_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::{test_pool, HistoryRepository};
    use crate::state::HistoryStore;
    use crate::types::{Identity, ListingObservation};

    async fn seeded_state() -> ApiState {
        let pool = test_pool().await;
        let repo = HistoryRepository::new(pool.clone());
        let now = Utc::now();
        let rows = ["a", "b"].iter().map(|link| ListingObservation {
            identity: Identity::new("olx", *link),
            title: format!("Clio {link}"),
            price: 9_000.0,
            km: None,
            year: Some(2014),
            region: None,
            brand: Some("Renault".to_string()),
            model: Some("Clio".to_string()),
            image_url: None,
            observed_at: now,
            last_drop_alert_price: None,
            last_margin_alert_price: None,
        });
        let mut history = HistoryStore::new(30);
        history.merge(rows, now);
        repo.save_history(&history).await.unwrap();
        ApiState { pool }
    }

    #[tokio::test]
    async fn listings_filter_by_brand_case_insensitively() {
        let state = seeded_state().await;
        let Json(rows) = get_listings(
            State(state.clone()),
            Query(ListingsQuery { brand: Some("RENAULT".to_string()), model: None, limit: None }),
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 2);

        let Json(rows) = get_listings(
            State(state),
            Query(ListingsQuery { brand: Some("Fiat".to_string()), model: None, limit: None }),
        )
        .await
        .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn summary_counts_listings_and_segments() {
        let state = seeded_state().await;
        let Json(summary) = get_stats_summary(State(state)).await.unwrap();
        assert_eq!(summary.listings, 2);
        assert_eq!(summary.segments, 1);
        assert_eq!(summary.alerts_24h, 0);
        assert!(summary.last_observed_at.is_some());
    }
}
