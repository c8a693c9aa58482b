//! One evaluation pass: purge, merge, estimate, classify, rank.
//!
//! Pure and synchronous. The binary does the I/O around it: load the
//! previous snapshot, read the scraped batch, persist the returned history,
//! deliver the returned alerts.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{ClassifierConfig, Config};
use crate::detector::{classify, Classification};
use crate::estimator::{ReferenceEstimator, ReferenceQuery};
use crate::scorer::AlertRanker;
use crate::state::{HistoryStore, MergeStats};
use crate::types::{Alert, Identity, ListingObservation, Provenance, ReferenceEstimate};

/// Per-cycle counters, logged by the binary.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub fresh: usize,
    pub merge: MergeStats,
    pub purged: usize,
    pub history_rows: usize,
    pub evaluated: usize,
    pub deals: usize,
    pub drops: usize,
    pub suppressed: usize,
    /// Alerts cut by `max_alerts`; they are not marked and may fire next cycle.
    pub deferred: usize,
    pub by_provenance: ProvenanceCounts,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProvenanceCounts {
    pub segment_median: usize,
    pub broad_median: usize,
    pub knn_fallback: usize,
    pub unavailable: usize,
}

impl ProvenanceCounts {
    fn record(&mut self, provenance: Provenance) {
        match provenance {
            Provenance::SegmentMedian => self.segment_median += 1,
            Provenance::BroadMedian => self.broad_median += 1,
            Provenance::KnnFallback => self.knn_fallback += 1,
            Provenance::Unavailable => self.unavailable += 1,
        }
    }
}

pub struct CycleOutcome {
    pub history: HistoryStore,
    /// Ranked best first.
    pub alerts: Vec<Alert>,
    pub report: CycleReport,
}

pub struct Pipeline {
    estimator: ReferenceEstimator,
    classifier: ClassifierConfig,
    ranker: AlertRanker,
    /// 0 = unlimited.
    max_alerts: usize,
}

impl Pipeline {
    pub fn new(cfg: &Config) -> Self {
        Self {
            estimator: ReferenceEstimator::new(&cfg.estimator),
            classifier: cfg.classifier.clone(),
            ranker: AlertRanker::new(&cfg.ranker),
            max_alerts: cfg.max_alerts_per_cycle,
        }
    }

    pub fn run_cycle(
        &self,
        mut history: HistoryStore,
        batch: Vec<ListingObservation>,
        cycle_at: DateTime<Utc>,
    ) -> CycleOutcome {
        let mut report = CycleReport { fresh: batch.len(), ..Default::default() };

        // Expired rows go first so they never serve as a prior or pass on markers.
        report.purged = history.purge(cycle_at);

        let batch = newest_per_identity(batch);
        let priors: HashMap<Identity, ListingObservation> = batch
            .iter()
            .filter_map(|obs| history.get(&obs.identity).cloned())
            .map(|row| (row.identity.clone(), row))
            .collect();

        report.merge = history.merge(batch, cycle_at);
        report.purged += history.purge(cycle_at);
        report.history_rows = history.len();

        let mut evaluated: Vec<(Alert, Classification)> = Vec::new();
        {
            let pool = history.sorted_rows();
            for identity in &report.merge.accepted {
                let Some(current) = history.get(identity) else {
                    continue;
                };
                let reference = self.estimator.estimate(&pool, &ReferenceQuery::for_listing(current));
                report.by_provenance.record(reference.provenance);
                report.evaluated += 1;

                let c = classify(current, &reference, priors.get(identity), &self.classifier);
                if (c.is_deal && !c.deal_alert) || (c.is_drop && !c.drop_alert) {
                    report.suppressed += 1;
                }
                if c.should_alert() {
                    debug!(identity = %identity, deal = c.deal_alert, drop = c.drop_alert, "alert eligible");
                    evaluated.push((build_alert(current, reference, &c), c));
                }
            }
        }

        let mut bookkeeping: HashMap<Identity, Classification> = evaluated
            .iter()
            .map(|(alert, c)| (alert.identity.clone(), c.clone()))
            .collect();

        let mut alerts = self.ranker.rank(evaluated.into_iter().map(|(alert, _)| alert).collect());
        if self.max_alerts > 0 && alerts.len() > self.max_alerts {
            report.deferred = alerts.len() - self.max_alerts;
            alerts.truncate(self.max_alerts);
        }

        for alert in &alerts {
            if let Some(c) = bookkeeping.remove(&alert.identity) {
                history.apply_bookkeeping(&alert.identity, c.bookkeeping);
            }
            if alert.deal {
                report.deals += 1;
            }
            if alert.is_drop() {
                report.drops += 1;
            }
        }

        CycleOutcome { history, alerts, report }
    }
}

/// Collapses duplicates within one batch, keeping the newest observation per identity.
fn newest_per_identity(batch: Vec<ListingObservation>) -> Vec<ListingObservation> {
    let mut newest: BTreeMap<Identity, ListingObservation> = BTreeMap::new();
    for obs in batch {
        match newest.get(&obs.identity) {
            Some(kept) if kept.observed_at > obs.observed_at => {}
            _ => {
                newest.insert(obs.identity.clone(), obs);
            }
        }
    }
    newest.into_values().collect()
}

fn build_alert(current: &ListingObservation, reference: ReferenceEstimate, c: &Classification) -> Alert {
    Alert {
        identity: current.identity.clone(),
        title: current.title.clone(),
        price: current.price,
        region: current.region.clone(),
        image_url: current.image_url.clone(),
        reference: reference.usable_value().map(|_| reference),
        deal: c.deal_alert,
        drop: if c.drop_alert { c.drop } else { None },
        priority_region: false,
        score: 0.0,
    }
}
