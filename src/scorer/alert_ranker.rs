use crate::config::{RankerConfig, MAX_PRIORITY_BOOST};
use crate::types::Alert;

/// Orders a cycle's alerts by discount strength plus a bounded regional boost.
pub struct AlertRanker {
    priority_regions: Vec<String>,
    boost: f64,
}

impl AlertRanker {
    pub fn new(cfg: &RankerConfig) -> Self {
        Self {
            priority_regions: cfg.priority_regions.iter().map(|r| fold(r)).filter(|r| !r.is_empty()).collect(),
            boost: cfg.priority_boost.clamp(0.0, MAX_PRIORITY_BOOST),
        }
    }

    /// True when the listing's region names one of the priority regions.
    /// Matching is case and accent insensitive, by substring ("Lisboa - Sintra" matches "Lisboa").
    pub fn is_priority(&self, region: Option<&str>) -> bool {
        let Some(region) = region.map(fold) else {
            return false;
        };
        self.priority_regions.iter().any(|p| region.contains(p.as_str()))
    }

    /// Fills `priority_region` and `score` on each alert and sorts best first.
    ///
    /// Discount strength orders first; the regional boost only separates equal
    /// discounts, so it never lifts a listing above a strictly larger discount.
    /// Remaining ties fall back to identity order so the output is reproducible.
    pub fn rank(&self, alerts: Vec<Alert>) -> Vec<Alert> {
        let mut keyed: Vec<(f64, Alert)> = alerts
            .into_iter()
            .map(|mut alert| {
                alert.priority_region = self.is_priority(alert.region.as_deref());
                let strength = discount_strength(&alert);
                let boost = if alert.priority_region { self.boost } else { 0.0 };
                alert.score = strength + boost;
                (strength, alert)
            })
            .collect();

        keyed.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| b.priority_region.cmp(&a.priority_region))
                .then_with(|| a.identity.cmp(&b.identity))
        });
        keyed.into_iter().map(|(_, alert)| alert).collect()
    }
}

/// `1 - price / reference`; drop percentage for alerts without a usable reference.
pub fn discount_strength(alert: &Alert) -> f64 {
    alert
        .discount()
        .or_else(|| alert.drop.map(|d| d.pct))
        .unwrap_or(0.0)
}

fn fold(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Identity, PriceDrop, Provenance, ReferenceEstimate};

    fn alert(link: &str, price: f64, reference: Option<f64>, region: Option<&str>) -> Alert {
        Alert {
            identity: Identity::new("olx", link),
            title: link.to_string(),
            price,
            region: region.map(str::to_string),
            image_url: None,
            reference: reference.map(|value| ReferenceEstimate {
                value,
                provenance: Provenance::SegmentMedian,
                samples: 5,
            }),
            deal: reference.is_some(),
            drop: None,
            priority_region: false,
            score: 0.0,
        }
    }

    fn ranker() -> AlertRanker {
        AlertRanker::new(&RankerConfig::default())
    }

    #[test]
    fn equal_discount_priority_region_first() {
        let ranked = ranker().rank(vec![
            alert("a-porto", 8_000.0, Some(10_000.0), Some("Porto")),
            alert("b-lisboa", 8_000.0, Some(10_000.0), Some("Lisboa")),
        ]);
        assert_eq!(ranked[0].identity.link, "b-lisboa");
        assert!(ranked[0].priority_region);
        assert!(!ranked[1].priority_region);
    }

    #[test]
    fn larger_discount_outranks_priority_boost() {
        let ranked = ranker().rank(vec![
            alert("lisboa", 8_400.0, Some(10_000.0), Some("Lisboa")),
            alert("braga", 7_000.0, Some(10_000.0), Some("Braga")),
        ]);
        assert_eq!(ranked[0].identity.link, "braga");
    }

    #[test]
    fn boost_never_beats_a_slightly_larger_discount() {
        let ranked = ranker().rank(vec![
            alert("lisboa", 8_000.0, Some(10_000.0), Some("Lisboa")),
            alert("braga", 7_900.0, Some(10_000.0), Some("Braga")),
        ]);
        assert_eq!(ranked[0].identity.link, "braga");
        assert_eq!(ranked[1].identity.link, "lisboa");
        assert!(ranked[1].priority_region);
        assert!((ranked[1].score - 0.22).abs() < 1e-9);
    }

    #[test]
    fn drop_without_reference_uses_drop_pct() {
        let mut drop_only = alert("drop", 9_000.0, None, None);
        drop_only.drop = Some(PriceDrop { previous_price: 10_000.0, pct: 0.10, abs: 1_000.0 });
        let ranked = ranker().rank(vec![alert("deal", 9_200.0, Some(10_000.0), None), drop_only]);

        assert_eq!(ranked[0].identity.link, "drop");
        assert!((ranked[0].score - 0.10).abs() < 1e-9);
        assert!((ranked[1].score - 0.08).abs() < 1e-9);
    }

    #[test]
    fn region_matching_ignores_case_and_accents() {
        let r = ranker();
        assert!(r.is_priority(Some("setubal")));
        assert!(r.is_priority(Some("Lisboa - Sintra")));
        assert!(r.is_priority(Some("SANTAREM")));
        assert!(!r.is_priority(Some("Faro")));
        assert!(!r.is_priority(None));
    }

    #[test]
    fn ties_are_ordered_by_identity() {
        let ranked = ranker().rank(vec![
            alert("z", 8_000.0, Some(10_000.0), None),
            alert("a", 8_000.0, Some(10_000.0), None),
        ]);
        assert_eq!(ranked[0].identity.link, "a");
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(ranker().rank(Vec::new()).is_empty());
    }
}
