//! Scraper hand-off: raw listing records in, validated and filtered observations out.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::FilterConfig;
use crate::error::{AppError, Result};
use crate::types::{Identity, ListingObservation};

/// One record as written by a scraper.
#[derive(Debug, Clone, Deserialize)]
pub struct RawListing {
    pub source: String,
    #[serde(alias = "url")]
    pub link: String,
    #[serde(default)]
    pub title: String,
    pub price: Option<f64>,
    pub km: Option<f64>,
    pub year: Option<i32>,
    pub region: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    #[serde(alias = "image")]
    pub image_url: Option<String>,
    #[serde(alias = "ts")]
    pub observed_at: Option<DateTime<Utc>>,
}

impl RawListing {
    /// Validates the record. A missing or non-positive price, negative mileage,
    /// or blank identity is rejected. A missing timestamp is stamped with `cycle_at`.
    pub fn into_observation(self, cycle_at: DateTime<Utc>) -> Result<ListingObservation> {
        let identity = Identity::new(self.source.trim(), self.link.trim());
        let invalid = |reason: &str| AppError::InvalidObservation {
            identity: identity.to_string(),
            reason: reason.to_string(),
        };

        if identity.source.is_empty() || identity.link.is_empty() {
            return Err(invalid("blank source or link"));
        }
        let price = match self.price {
            Some(p) if p.is_finite() && p > 0.0 => p,
            Some(_) => return Err(invalid("price must be a positive amount")),
            None => return Err(invalid("missing price")),
        };
        let km = match self.km {
            Some(k) if k.is_finite() && k >= 0.0 => Some(k.round().min(u32::MAX as f64) as u32),
            Some(_) => return Err(invalid("mileage must be non-negative")),
            None => None,
        };

        Ok(ListingObservation {
            title: self.title.trim().to_string(),
            price,
            km,
            year: self.year,
            region: non_blank(self.region),
            brand: non_blank(self.brand),
            model: non_blank(self.model),
            image_url: non_blank(self.image_url),
            observed_at: self.observed_at.unwrap_or(cycle_at),
            last_drop_alert_price: None,
            last_margin_alert_price: None,
            identity,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Price within bounds and mileage within bounds or unknown.
pub fn passes_filter(obs: &ListingObservation, filter: &FilterConfig) -> bool {
    let price_ok = obs.price >= filter.min_price && obs.price <= filter.max_price;
    let km_ok = obs.km.map_or(true, |km| km <= filter.max_km);
    price_ok && km_ok
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub read: usize,
    pub rejected: usize,
    pub filtered: usize,
    pub accepted: usize,
}

/// Parses a JSON array or JSON Lines document.
pub fn parse_batch(raw: &str) -> Result<Vec<RawListing>> {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(AppError::from))
        .collect()
}

/// Reads the hand-off file. A missing file is an empty batch.
pub async fn load_batch(path: impl AsRef<Path>) -> Result<Vec<RawListing>> {
    let path = path.as_ref();
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => parse_batch(&raw),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No input batch at {}", path.display());
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Validates and filters a raw batch. Invalid records are logged and dropped.
pub fn prepare_batch(
    raw: Vec<RawListing>,
    filter: &FilterConfig,
    cycle_at: DateTime<Utc>,
) -> (Vec<ListingObservation>, IngestStats) {
    let mut stats = IngestStats { read: raw.len(), ..Default::default() };
    let mut out = Vec::with_capacity(raw.len());

    for record in raw {
        match record.into_observation(cycle_at) {
            Ok(obs) if passes_filter(&obs, filter) => out.push(obs),
            Ok(_) => stats.filtered += 1,
            Err(e) => {
                warn!("Rejected record: {e}");
                stats.rejected += 1;
            }
        }
    }

    stats.accepted = out.len();
    (out, stats)
}
