use crate::config::ClassifierConfig;
use crate::types::{same_price, Bookkeeping, ListingObservation, PriceDrop, ReferenceEstimate};

/// Outcome of evaluating one fresh observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Price is at least `alert_margin` below a usable reference.
    pub is_deal: bool,
    /// Price fell by the relative or absolute threshold since the prior observation.
    pub is_drop: bool,
    /// Deal condition met and not already alerted at this price.
    pub deal_alert: bool,
    /// Drop condition met and not already alerted at this price.
    pub drop_alert: bool,
    /// `1 - price / reference`; `None` without a usable reference.
    pub discount: Option<f64>,
    /// Present whenever the price went down since the prior observation.
    pub drop: Option<PriceDrop>,
    pub bookkeeping: Bookkeeping,
}

impl Classification {
    pub fn should_alert(&self) -> bool {
        self.deal_alert || self.drop_alert
    }
}

/// Deal and drop tests for one observation.
///
/// `observation` carries the bookkeeping inherited from its stored row; `prior`
/// is the stored row as it was before this cycle's merge. Suppression compares
/// the current price to the last alerted price, so an unchanged price never
/// re-alerts while any new price can.
pub fn classify(
    observation: &ListingObservation,
    reference: &ReferenceEstimate,
    prior: Option<&ListingObservation>,
    cfg: &ClassifierConfig,
) -> Classification {
    let price = observation.price;
    let mut bookkeeping = observation.bookkeeping();

    let discount = reference.usable_value().map(|value| 1.0 - price / value);
    let is_deal = reference
        .usable_value()
        .map_or(false, |value| price / value - 1.0 <= -cfg.alert_margin);

    let deal_alert = is_deal && !already_alerted(bookkeeping.last_margin_alert_price, price);
    if deal_alert {
        bookkeeping.last_margin_alert_price = Some(price);
    }

    let drop = prior.and_then(|p| price_drop(p.price, price));
    let is_drop = drop.map_or(false, |d| d.pct >= cfg.drop_threshold_pct || d.abs >= cfg.drop_threshold_abs);

    let drop_alert = is_drop && !already_alerted(bookkeeping.last_drop_alert_price, price);
    if drop_alert {
        bookkeeping.last_drop_alert_price = Some(price);
    }

    Classification {
        is_deal,
        is_drop,
        deal_alert,
        drop_alert,
        discount,
        drop,
        bookkeeping,
    }
}

fn already_alerted(last: Option<f64>, price: f64) -> bool {
    last.map_or(false, |p| same_price(p, price))
}

/// `None` when the price did not go down or the previous price is unusable.
fn price_drop(previous_price: f64, price: f64) -> Option<PriceDrop> {
    if previous_price.is_nan() || previous_price <= 0.0 {
        return None;
    }
    let abs = previous_price - price;
    if abs <= 0.0 {
        return None;
    }
    Some(PriceDrop { previous_price, pct: abs / previous_price, abs })
}
