use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PRICE_EPSILON;

// ---------------------------------------------------------------------------
// Identity / Segment
// ---------------------------------------------------------------------------

/// `(source, link)`: one physical ad across observations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub source: String,
    pub link: String,
}

impl Identity {
    pub fn new(source: impl Into<String>, link: impl Into<String>) -> Self {
        Self { source: source.into(), link: link.into() }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.link)
    }
}

/// Pricing group key. Brand and model are stored normalised (trimmed, lowercase).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    pub brand: String,
    pub model: String,
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.brand, self.model)
    }
}

pub fn normalize_key(raw: &str) -> Option<String> {
    let key = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

// ---------------------------------------------------------------------------
// ListingObservation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingObservation {
    pub identity: Identity,
    pub title: String,
    /// Asking price in euros. Always positive once validated.
    pub price: f64,
    pub km: Option<u32>,
    pub year: Option<i32>,
    pub region: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub image_url: Option<String>,
    pub observed_at: DateTime<Utc>,
    /// Price at which the last drop alert fired for this identity.
    pub last_drop_alert_price: Option<f64>,
    /// Price at which the last deal alert fired for this identity.
    pub last_margin_alert_price: Option<f64>,
}

impl ListingObservation {
    /// `None` unless both brand and model are resolved.
    pub fn segment(&self) -> Option<Segment> {
        let brand = self.brand.as_deref().and_then(normalize_key)?;
        let model = self.model.as_deref().and_then(normalize_key)?;
        Some(Segment { brand, model })
    }

    pub fn brand_key(&self) -> Option<String> {
        self.brand.as_deref().and_then(normalize_key)
    }

    /// Year and mileage, when both are known. Rows without them never enter
    /// the nearest-neighbour pool.
    pub fn profile(&self) -> Option<(i32, u32)> {
        Some((self.year?, self.km?))
    }
}

/// Last-alerted price markers for one identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bookkeeping {
    pub last_drop_alert_price: Option<f64>,
    pub last_margin_alert_price: Option<f64>,
}

impl ListingObservation {
    pub fn bookkeeping(&self) -> Bookkeeping {
        Bookkeeping {
            last_drop_alert_price: self.last_drop_alert_price,
            last_margin_alert_price: self.last_margin_alert_price,
        }
    }

    pub fn set_bookkeeping(&mut self, bookkeeping: Bookkeeping) {
        self.last_drop_alert_price = bookkeeping.last_drop_alert_price;
        self.last_margin_alert_price = bookkeeping.last_margin_alert_price;
    }
}

pub fn same_price(a: f64, b: f64) -> bool {
    (a - b).abs() < PRICE_EPSILON
}

// ---------------------------------------------------------------------------
// Reference estimate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Median of the exact (brand, model) segment.
    SegmentMedian,
    /// Median of all rows sharing the brand.
    BroadMedian,
    /// Median of the K nearest rows by year and mileage.
    KnnFallback,
    Unavailable,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Provenance::SegmentMedian => "segment-median",
            Provenance::BroadMedian => "broad-median",
            Provenance::KnnFallback => "knn-fallback",
            Provenance::Unavailable => "unavailable",
        };
        write!(f, "{s}")
    }
}

/// Per-evaluation market reference. Never persisted with the listing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEstimate {
    pub value: f64,
    pub provenance: Provenance,
    pub samples: usize,
}

impl ReferenceEstimate {
    pub fn unavailable() -> Self {
        Self { value: 0.0, provenance: Provenance::Unavailable, samples: 0 }
    }

    /// The reference price, or `None` when no tier produced one.
    pub fn usable_value(&self) -> Option<f64> {
        match self.provenance {
            Provenance::Unavailable => None,
            _ if self.value > 0.0 => Some(self.value),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceDrop {
    pub previous_price: f64,
    /// Fraction of the previous price.
    pub pct: f64,
    /// Euros.
    pub abs: f64,
}

/// One alert handed to the notifier. Produced by the pipeline, ordered by the ranker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub identity: Identity,
    pub title: String,
    pub price: f64,
    pub region: Option<String>,
    pub image_url: Option<String>,
    pub reference: Option<ReferenceEstimate>,
    pub deal: bool,
    pub drop: Option<PriceDrop>,
    pub priority_region: bool,
    pub score: f64,
}

impl Alert {
    pub fn is_drop(&self) -> bool {
        self.drop.is_some()
    }

    /// `1 - price / reference`, when a reference exists.
    pub fn discount(&self) -> Option<f64> {
        let reference = self.reference.as_ref()?.usable_value()?;
        Some(1.0 - self.price / reference)
    }

    pub fn kind(&self) -> &'static str {
        match (self.deal, self.is_drop()) {
            (true, true) => "deal+drop",
            (true, false) => "deal",
            (false, true) => "drop",
            (false, false) => "none",
        }
    }

    /// One plain line for logs and chat delivery.
    pub fn summary_line(&self) -> String {
        let mut line = format!("[{}] {} | €{:.0}", self.kind(), self.title, self.price);
        if let (Some(reference), Some(discount)) = (self.reference, self.discount()) {
            line.push_str(&format!(
                " | ref €{:.0} ({}) {:+.1}%",
                reference.value,
                reference.provenance,
                -discount * 100.0
            ));
        }
        if let Some(drop) = self.drop {
            line.push_str(&format!(
                " | was €{:.0} (-{:.1}%, -€{:.0})",
                drop.previous_price,
                drop.pct * 100.0,
                drop.abs
            ));
        }
        if let Some(region) = &self.region {
            line.push_str(&format!(" | {region}"));
        }
        line.push_str(&format!(" | {}", self.identity.link));
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(brand: Option<&str>, model: Option<&str>) -> ListingObservation {
        ListingObservation {
            identity: Identity::new("olx", "https://olx.pt/a/1"),
            title: "Test car".to_string(),
            price: 9_000.0,
            km: Some(120_000),
            year: None,
            region: None,
            brand: brand.map(str::to_string),
            model: model.map(str::to_string),
            image_url: None,
            observed_at: Utc::now(),
            last_drop_alert_price: None,
            last_margin_alert_price: None,
        }
    }

    #[test]
    fn segment_is_normalized() {
        let a = listing(Some(" Renault "), Some("CLIO  IV"));
        let seg = a.segment().unwrap();
        assert_eq!(seg.brand, "renault");
        assert_eq!(seg.model, "clio iv");
    }

    #[test]
    fn blank_model_means_no_segment() {
        let a = listing(Some("Renault"), Some("  "));
        assert!(a.segment().is_none());
        assert_eq!(a.brand_key().as_deref(), Some("renault"));
    }

    #[test]
    fn profile_requires_year_and_km() {
        let mut a = listing(None, None);
        assert!(a.profile().is_none());
        a.year = Some(2016);
        assert_eq!(a.profile(), Some((2016, 120_000)));
    }

    #[test]
    fn unavailable_reference_has_no_value() {
        assert!(ReferenceEstimate::unavailable().usable_value().is_none());
        assert_eq!(Provenance::KnnFallback.to_string(), "knn-fallback");
    }
}
