use std::cmp::Ordering;

use crate::estimator::stats::{median, span};
use crate::types::{Identity, ListingObservation, Provenance, ReferenceEstimate, Segment};

/// What the estimator needs to know about the listing being priced.
#[derive(Debug, Clone, Default)]
pub struct ReferenceQuery<'a> {
    pub segment: Option<Segment>,
    pub brand: Option<String>,
    pub year: Option<i32>,
    pub km: Option<u32>,
    /// Row left out of every pool, normally the listing itself.
    pub exclude: Option<&'a Identity>,
}

impl<'a> ReferenceQuery<'a> {
    pub fn for_listing(listing: &'a ListingObservation) -> Self {
        Self {
            segment: listing.segment(),
            brand: listing.brand_key(),
            year: listing.year,
            km: listing.km,
            exclude: Some(&listing.identity),
        }
    }

    fn admits(&self, row: &ListingObservation) -> bool {
        self.exclude.map_or(true, |id| *id != row.identity)
    }
}

/// One fallback tier. Returns `None` when its pool is below the minimum sample size.
pub trait ReferenceTier {
    fn provenance(&self) -> Provenance;

    fn estimate(&self, pool: &[&ListingObservation], query: &ReferenceQuery<'_>) -> Option<ReferenceEstimate>;
}

fn median_estimate(mut prices: Vec<f64>, min_samples: usize, provenance: Provenance) -> Option<ReferenceEstimate> {
    if prices.is_empty() || prices.len() < min_samples {
        return None;
    }
    let samples = prices.len();
    let value = median(&mut prices)?;
    Some(ReferenceEstimate { value, provenance, samples })
}

// ---------------------------------------------------------------------------
// Tier 1: exact (brand, model)
// ---------------------------------------------------------------------------

pub struct SegmentMedian {
    pub min_samples: usize,
}

impl ReferenceTier for SegmentMedian {
    fn provenance(&self) -> Provenance {
        Provenance::SegmentMedian
    }

    fn estimate(&self, pool: &[&ListingObservation], query: &ReferenceQuery<'_>) -> Option<ReferenceEstimate> {
        let segment = query.segment.as_ref()?;
        let prices = pool
            .iter()
            .filter(|row| query.admits(row))
            .filter(|row| row.segment().as_ref() == Some(segment))
            .map(|row| row.price)
            .collect();
        median_estimate(prices, self.min_samples, self.provenance())
    }
}

// ---------------------------------------------------------------------------
// Tier 2: brand only
// ---------------------------------------------------------------------------

pub struct BroadMedian {
    pub min_samples: usize,
}

impl ReferenceTier for BroadMedian {
    fn provenance(&self) -> Provenance {
        Provenance::BroadMedian
    }

    fn estimate(&self, pool: &[&ListingObservation], query: &ReferenceQuery<'_>) -> Option<ReferenceEstimate> {
        let brand = query.brand.as_deref()?;
        let prices = pool
            .iter()
            .filter(|row| query.admits(row))
            .filter(|row| row.brand_key().as_deref() == Some(brand))
            .map(|row| row.price)
            .collect();
        median_estimate(prices, self.min_samples, self.provenance())
    }
}

// ---------------------------------------------------------------------------
// Tier 3: nearest neighbours by year and mileage
// ---------------------------------------------------------------------------

/// Median price of the `k` rows closest in (year, mileage), regardless of segment.
///
/// Distance is squared Euclidean over min-max normalised year and mileage of
/// the candidate pool; a dimension with zero spread contributes nothing. Equal
/// distances are ordered by identity.
pub struct KnnFallback {
    pub k: usize,
    pub min_samples: usize,
}

impl KnnFallback {
    /// Selected neighbours, nearest first.
    pub fn neighbors<'p>(
        &self,
        pool: &[&'p ListingObservation],
        query: &ReferenceQuery<'_>,
    ) -> Vec<&'p ListingObservation> {
        let (Some(year), Some(km)) = (query.year, query.km) else {
            return Vec::new();
        };

        let candidates: Vec<(&ListingObservation, i32, u32)> = pool
            .iter()
            .filter(|row| query.admits(row))
            .filter_map(|row| row.profile().map(|(y, k)| (*row, y, k)))
            .collect();

        let year_range = span(candidates.iter().map(|c| c.1 as f64)).map_or(0.0, |(lo, hi)| hi - lo);
        let km_range = span(candidates.iter().map(|c| c.2 as f64)).map_or(0.0, |(lo, hi)| hi - lo);

        let component = |diff: f64, range: f64| if range > 0.0 { (diff / range).powi(2) } else { 0.0 };

        let mut scored: Vec<(f64, &ListingObservation)> = candidates
            .into_iter()
            .map(|(row, y, k)| {
                let d = component((y - year) as f64, year_range) + component(k as f64 - km as f64, km_range);
                (d, row)
            })
            .collect();

        scored.sort_by(|a, b| match a.0.total_cmp(&b.0) {
            Ordering::Equal => a.1.identity.cmp(&b.1.identity),
            other => other,
        });
        scored.into_iter().take(self.k).map(|(_, row)| row).collect()
    }
}

impl ReferenceTier for KnnFallback {
    fn provenance(&self) -> Provenance {
        Provenance::KnnFallback
    }

    fn estimate(&self, pool: &[&ListingObservation], query: &ReferenceQuery<'_>) -> Option<ReferenceEstimate> {
        let prices = self.neighbors(pool, query).iter().map(|row| row.price).collect();
        median_estimate(prices, self.min_samples, self.provenance())
    }
}
