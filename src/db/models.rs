//! Database row types for the `listings` and `alerts` tables (see `migrations/`).
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{Identity, ListingObservation};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ListingRow {
    pub source: String,
    pub link: String,
    pub title: String,
    pub price: f64,
    pub km: Option<i64>,
    pub year: Option<i64>,
    pub region: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub image_url: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub last_drop_alert_price: Option<f64>,
    pub last_margin_alert_price: Option<f64>,
}

impl From<ListingRow> for ListingObservation {
    fn from(row: ListingRow) -> Self {
        Self {
            identity: Identity::new(row.source, row.link),
            title: row.title,
            price: row.price,
            km: row.km.and_then(|k| u32::try_from(k).ok()),
            year: row.year.and_then(|y| i32::try_from(y).ok()),
            region: row.region,
            brand: row.brand,
            model: row.model,
            image_url: row.image_url,
            observed_at: row.observed_at,
            last_drop_alert_price: row.last_drop_alert_price,
            last_margin_alert_price: row.last_margin_alert_price,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AlertRow {
    pub id: i64,
    pub source: String,
    pub link: String,
    pub title: String,
    pub price: f64,
    pub region: Option<String>,
    pub reference_value: Option<f64>,
    pub reference_provenance: String,
    pub reference_samples: i64,
    pub is_deal: bool,
    pub is_drop: bool,
    pub previous_price: Option<f64>,
    pub drop_pct: Option<f64>,
    pub drop_abs: Option<f64>,
    pub priority_region: bool,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}
