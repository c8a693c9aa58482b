use tracing::trace;

use crate::config::EstimatorConfig;
use crate::estimator::tiers::{BroadMedian, KnnFallback, ReferenceQuery, ReferenceTier, SegmentMedian};
use crate::types::{ListingObservation, ReferenceEstimate};

/// Ordered fallback chain: exact segment, brand, then nearest neighbours.
/// The first tier that meets its minimum sample size wins.
pub struct ReferenceEstimator {
    tiers: Vec<Box<dyn ReferenceTier + Send + Sync>>,
}

impl ReferenceEstimator {
    pub fn new(cfg: &EstimatorConfig) -> Self {
        Self {
            tiers: vec![
                Box::new(SegmentMedian { min_samples: cfg.min_segment_samples }),
                Box::new(BroadMedian { min_samples: cfg.min_broad_samples }),
                Box::new(KnnFallback { k: cfg.knn_neighbors, min_samples: cfg.min_knn_samples }),
            ],
        }
    }

    pub fn estimate(&self, pool: &[&ListingObservation], query: &ReferenceQuery<'_>) -> ReferenceEstimate {
        for tier in &self.tiers {
            if let Some(estimate) = tier.estimate(pool, query) {
                return estimate;
            }
            trace!(tier = %tier.provenance(), "tier had insufficient data");
        }
        ReferenceEstimate::unavailable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Identity, Provenance};
    use chrono::Utc;

    fn row(link: &str, brand: Option<&str>, model: Option<&str>, year: Option<i32>, km: Option<u32>, price: f64) -> ListingObservation {
        ListingObservation {
            identity: Identity::new("olx", link),
            title: link.to_string(),
            price,
            km,
            year,
            region: None,
            brand: brand.map(str::to_string),
            model: model.map(str::to_string),
            image_url: None,
            observed_at: Utc::now(),
            last_drop_alert_price: None,
            last_margin_alert_price: None,
        }
    }

    fn cfg(min_segment: usize, min_broad: usize) -> EstimatorConfig {
        EstimatorConfig {
            min_segment_samples: min_segment,
            min_broad_samples: min_broad,
            min_knn_samples: 1,
            knn_neighbors: 20,
        }
    }

    #[test]
    fn exact_segment_wins_when_large_enough() {
        let rows = vec![
            row("a", Some("VW"), Some("Golf"), None, None, 10_000.0),
            row("b", Some("VW"), Some("Golf"), None, None, 12_000.0),
            row("c", Some("VW"), Some("Golf"), None, None, 14_000.0),
            row("d", Some("VW"), Some("Polo"), None, None, 6_000.0),
        ];
        let pool: Vec<_> = rows.iter().collect();
        let target = row("t", Some("VW"), Some("Golf"), None, None, 9_000.0);

        let est = ReferenceEstimator::new(&cfg(3, 3)).estimate(&pool, &ReferenceQuery::for_listing(&target));
        assert_eq!(est.provenance, Provenance::SegmentMedian);
        assert_eq!(est.value, 12_000.0);
    }

    #[test]
    fn falls_back_to_brand_then_knn() {
        let rows = vec![
            row("a", Some("VW"), Some("Golf"), Some(2015), Some(100_000), 10_000.0),
            row("b", Some("VW"), Some("Polo"), Some(2016), Some(90_000), 8_000.0),
            row("c", Some("Kia"), Some("Rio"), Some(2016), Some(95_000), 7_000.0),
        ];
        let pool: Vec<_> = rows.iter().collect();
        let estimator = ReferenceEstimator::new(&cfg(2, 2));

        let vw = row("t", Some("VW"), Some("Golf"), Some(2016), Some(95_000), 9_000.0);
        let est = estimator.estimate(&pool, &ReferenceQuery::for_listing(&vw));
        assert_eq!(est.provenance, Provenance::BroadMedian);
        assert_eq!(est.value, 9_000.0);

        let unknown = row("u", None, None, Some(2016), Some(95_000), 9_000.0);
        let est = estimator.estimate(&pool, &ReferenceQuery::for_listing(&unknown));
        assert_eq!(est.provenance, Provenance::KnnFallback);
        assert_eq!(est.samples, 3);
    }

    #[test]
    fn unavailable_when_every_tier_is_empty() {
        let est = ReferenceEstimator::new(&cfg(5, 5)).estimate(
            &[],
            &ReferenceQuery::for_listing(&row("t", Some("VW"), Some("Golf"), Some(2016), Some(95_000), 9_000.0)),
        );
        assert_eq!(est.provenance, Provenance::Unavailable);
        assert!(est.usable_value().is_none());
    }

    #[test]
    fn unknown_profile_and_segment_is_unavailable() {
        let rows = vec![row("a", Some("VW"), Some("Golf"), Some(2015), Some(100_000), 10_000.0)];
        let pool: Vec<_> = rows.iter().collect();
        let target = row("t", None, None, None, Some(95_000), 9_000.0);
        let est = ReferenceEstimator::new(&cfg(1, 1)).estimate(&pool, &ReferenceQuery::for_listing(&target));
        assert_eq!(est.provenance, Provenance::Unavailable);
    }
}
