use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::types::{Bookkeeping, Identity, ListingObservation};

/// Counters from one `merge` call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeStats {
    /// Identities whose stored row is now the incoming observation.
    pub accepted: Vec<Identity>,
    pub inserted: usize,
    pub replaced: usize,
    /// Incoming rows older than the stored row for the same identity.
    pub superseded: usize,
    /// Accepted rows whose timestamp was already outside the window.
    pub refreshed: usize,
}

// ---------------------------------------------------------------------------
// HistoryStore
// ---------------------------------------------------------------------------

/// Rolling, identity-keyed listing history. At most one row per identity.
///
/// The store is a value: a cycle takes the previous snapshot, merges the fresh
/// batch, purges, and hands the result to persistence.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    rows: HashMap<Identity, ListingObservation>,
    retention: Duration,
}

impl HistoryStore {
    pub fn new(retention_days: i64) -> Self {
        Self {
            rows: HashMap::new(),
            retention: Duration::days(retention_days),
        }
    }

    /// Rebuilds the store from persisted rows. Duplicate identities keep the newest row.
    pub fn from_rows(retention_days: i64, rows: impl IntoIterator<Item = ListingObservation>) -> Self {
        let mut store = Self::new(retention_days);
        for row in rows {
            match store.rows.get(&row.identity) {
                Some(existing) if existing.observed_at > row.observed_at => {}
                _ => {
                    store.rows.insert(row.identity.clone(), row);
                }
            }
        }
        store
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.retention
    }

    pub fn get(&self, identity: &Identity) -> Option<&ListingObservation> {
        self.rows.get(identity)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &ListingObservation> {
        self.rows.values()
    }

    /// All rows ordered by identity, for deterministic persistence and pooling.
    pub fn sorted_rows(&self) -> Vec<&ListingObservation> {
        let mut rows: Vec<_> = self.rows.values().collect();
        rows.sort_by(|a, b| a.identity.cmp(&b.identity));
        rows
    }

    /// Upserts fresh observations by identity.
    ///
    /// A replacing row inherits the stored row's bookkeeping; a new identity
    /// starts with none. An incoming row older than the stored one is ignored,
    /// compared on its own timestamp. An accepted row whose timestamp is already
    /// outside the window is stamped with `cycle_at`, so a later purge never
    /// drops a row seen this cycle.
    pub fn merge(
        &mut self,
        observations: impl IntoIterator<Item = ListingObservation>,
        cycle_at: DateTime<Utc>,
    ) -> MergeStats {
        let cutoff = self.cutoff(cycle_at);
        let mut stats = MergeStats::default();

        for mut obs in observations {
            let inherited = match self.rows.get(&obs.identity) {
                Some(existing) if existing.observed_at > obs.observed_at => {
                    debug!(identity = %obs.identity, "older observation superseded by stored row");
                    stats.superseded += 1;
                    continue;
                }
                Some(existing) => Some(existing.bookkeeping()),
                None => None,
            };

            if obs.observed_at < cutoff {
                obs.observed_at = cycle_at;
                stats.refreshed += 1;
            }

            match inherited {
                Some(bookkeeping) => {
                    obs.set_bookkeeping(bookkeeping);
                    stats.accepted.push(obs.identity.clone());
                    self.rows.insert(obs.identity.clone(), obs);
                    stats.replaced += 1;
                }
                None => {
                    obs.set_bookkeeping(Bookkeeping::default());
                    stats.accepted.push(obs.identity.clone());
                    self.rows.insert(obs.identity.clone(), obs);
                    stats.inserted += 1;
                }
            }
        }

        stats
    }

    /// Records the classifier's updated markers on the stored row.
    /// Returns false when the identity is not in the store.
    pub fn apply_bookkeeping(&mut self, identity: &Identity, bookkeeping: Bookkeeping) -> bool {
        match self.rows.get_mut(identity) {
            Some(row) => {
                row.set_bookkeeping(bookkeeping);
                true
            }
            None => false,
        }
    }

    /// Drops rows older than the retention window. Bookkeeping goes with the row.
    pub fn purge(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        let before = self.rows.len();
        self.rows.retain(|_, row| row.observed_at >= cutoff);
        before - self.rows.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(link: &str, price: f64, observed_at: DateTime<Utc>) -> ListingObservation {
        ListingObservation {
            identity: Identity::new("olx", link),
            title: format!("car {link}"),
            price,
            km: Some(100_000),
            year: Some(2015),
            region: None,
            brand: Some("Renault".to_string()),
            model: Some("Clio".to_string()),
            image_url: None,
            observed_at,
            last_drop_alert_price: None,
            last_margin_alert_price: None,
        }
    }

    #[test]
    fn merge_inserts_new_identity_without_bookkeeping() {
        let now = Utc::now();
        let mut store = HistoryStore::new(30);
        let mut incoming = obs("a", 9_000.0, now);
        incoming.last_drop_alert_price = Some(1.0);

        let stats = store.merge(vec![incoming], now);
        assert_eq!(stats.inserted, 1);
        let row = store.get(&Identity::new("olx", "a")).unwrap();
        assert_eq!(row.bookkeeping(), Bookkeeping::default());
    }

    #[test]
    fn merge_replaces_and_carries_bookkeeping_forward() {
        let now = Utc::now();
        let mut store = HistoryStore::new(30);
        store.merge(vec![obs("a", 10_000.0, now - Duration::hours(1))], now);
        store.apply_bookkeeping(
            &Identity::new("olx", "a"),
            Bookkeeping { last_drop_alert_price: Some(9_400.0), last_margin_alert_price: None },
        );

        let stats = store.merge(vec![obs("a", 9_000.0, now)], now);
        assert_eq!(stats.replaced, 1);
        assert_eq!(store.len(), 1);
        let row = store.get(&Identity::new("olx", "a")).unwrap();
        assert_eq!(row.price, 9_000.0);
        assert_eq!(row.last_drop_alert_price, Some(9_400.0));
    }

    #[test]
    fn merge_is_idempotent() {
        let now = Utc::now();
        let mut store = HistoryStore::new(30);
        let o = obs("a", 9_000.0, now);
        store.merge(vec![o.clone()], now);
        store.apply_bookkeeping(
            &o.identity,
            Bookkeeping { last_drop_alert_price: None, last_margin_alert_price: Some(9_000.0) },
        );
        store.merge(vec![o.clone()], now);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&o.identity).unwrap().last_margin_alert_price, Some(9_000.0));
    }

    #[test]
    fn older_observation_does_not_overwrite_newer_row() {
        let now = Utc::now();
        let mut store = HistoryStore::new(30);
        store.merge(vec![obs("a", 9_000.0, now)], now);
        let stats = store.merge(vec![obs("a", 12_000.0, now - Duration::days(1))], now);

        assert_eq!(stats.superseded, 1);
        assert!(stats.accepted.is_empty());
        assert_eq!(store.get(&Identity::new("olx", "a")).unwrap().price, 9_000.0);
    }

    #[test]
    fn out_of_window_replay_does_not_overwrite_recent_row() {
        let now = Utc::now();
        let mut store = HistoryStore::new(30);
        store.merge(vec![obs("a", 9_000.0, now - Duration::days(1))], now);
        let stats = store.merge(vec![obs("a", 12_000.0, now - Duration::days(45))], now);

        assert_eq!(stats.superseded, 1);
        assert_eq!(stats.replaced, 0);
        assert_eq!(stats.refreshed, 0);
        let row = store.get(&Identity::new("olx", "a")).unwrap();
        assert_eq!(row.price, 9_000.0);
        assert_eq!(row.observed_at, now - Duration::days(1));
    }

    #[test]
    fn purge_drops_rows_outside_window() {
        let now = Utc::now();
        let mut store = HistoryStore::from_rows(
            30,
            vec![
                obs("old", 9_000.0, now - Duration::days(31)),
                obs("edge", 9_000.0, now - Duration::days(30)),
                obs("fresh", 9_000.0, now - Duration::days(2)),
            ],
        );

        let removed = store.purge(now);
        assert_eq!(removed, 1);
        assert!(store.get(&Identity::new("olx", "old")).is_none());
        for row in store.rows() {
            assert!(now - row.observed_at <= store.retention());
        }
    }

    #[test]
    fn purge_keeps_row_merged_this_cycle_even_with_stale_timestamp() {
        let now = Utc::now();
        let mut store = HistoryStore::new(30);
        let stats = store.merge(vec![obs("late", 9_000.0, now - Duration::days(45))], now);
        assert_eq!(stats.refreshed, 1);

        assert_eq!(store.purge(now), 0);
        assert_eq!(store.get(&Identity::new("olx", "late")).unwrap().observed_at, now);
    }

    #[test]
    fn purge_expires_bookkeeping_with_the_row() {
        let now = Utc::now();
        let mut store = HistoryStore::new(30);
        store.merge(vec![obs("a", 9_000.0, now)], now);
        store.apply_bookkeeping(
            &Identity::new("olx", "a"),
            Bookkeeping { last_drop_alert_price: Some(9_000.0), last_margin_alert_price: None },
        );
        store.purge(now + Duration::days(31));

        store.merge(vec![obs("a", 9_000.0, now + Duration::days(31))], now + Duration::days(31));
        let row = store.get(&Identity::new("olx", "a")).unwrap();
        assert!(row.last_drop_alert_price.is_none());
    }

    #[test]
    fn from_rows_keeps_newest_duplicate() {
        let now = Utc::now();
        let store = HistoryStore::from_rows(
            30,
            vec![obs("a", 10_000.0, now), obs("a", 11_000.0, now - Duration::hours(3))],
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&Identity::new("olx", "a")).unwrap().price, 10_000.0);
    }
}
