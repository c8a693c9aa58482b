use std::str::FromStr;

use crate::error::{AppError, Result};

/// Telegram Bot API base URL.
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Upper bound for the regional priority boost. Keeps the boost additive:
/// a listing outside the priority set with a discount more than this many
/// points larger always ranks first.
pub const MAX_PRIORITY_BOOST: f64 = 0.05;

/// Two prices closer than this (in euros) are treated as the same price when
/// checking the last-alerted markers.
pub const PRICE_EPSILON: f64 = 0.005;

/// Default capital-region priority set.
pub const DEFAULT_PRIORITY_REGIONS: &str = "Lisboa,Setúbal,Santarém";

/// Thresholds for the reference estimator tiers.
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    /// Minimum rows in an exact (brand, model) segment (MIN_SEGMENT_SAMPLES)
    pub min_segment_samples: usize,
    /// Minimum rows in a brand-only pool (MIN_BROAD_SAMPLES)
    pub min_broad_samples: usize,
    /// Minimum neighbours for the year/mileage fallback (MIN_KNN_SAMPLES)
    pub min_knn_samples: usize,
    /// Neighbour count K (KNN_NEIGHBORS)
    pub knn_neighbors: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_segment_samples: 5,
            min_broad_samples: 5,
            min_knn_samples: 1,
            knn_neighbors: 20,
        }
    }
}

/// Deal and drop thresholds.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Fraction below reference that makes a deal (ALERT_MARGIN)
    pub alert_margin: f64,
    /// Relative drop since last observation (DROP_THRESHOLD_PCT)
    pub drop_threshold_pct: f64,
    /// Absolute drop in euros since last observation (DROP_THRESHOLD_ABS)
    pub drop_threshold_abs: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            alert_margin: 0.15,
            drop_threshold_pct: 0.05,
            drop_threshold_abs: 250.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankerConfig {
    /// Regions that receive the priority boost (PRIORITY_REGIONS, comma-separated)
    pub priority_regions: Vec<String>,
    /// Additive score boost, clamped to MAX_PRIORITY_BOOST (PRIORITY_BOOST)
    pub priority_boost: f64,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            priority_regions: split_list(DEFAULT_PRIORITY_REGIONS),
            priority_boost: 0.02,
        }
    }
}

/// Pre-filter applied to scraped records before they reach the core.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub min_price: f64,
    pub max_price: f64,
    pub max_km: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_price: 5_000.0,
            max_price: 15_000.0,
            max_km: 200_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    /// Scraper hand-off file, JSON array or JSON Lines (INPUT_PATH)
    pub input_path: String,
    pub api_port: u16,
    /// Retention window in days (ROLLING_DAYS)
    pub rolling_days: i64,
    /// Cap on delivered alerts per cycle, 0 = unlimited (MAX_ALERTS_PER_CYCLE)
    pub max_alerts_per_cycle: usize,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub estimator: EstimatorConfig,
    pub classifier: ClassifierConfig,
    pub ranker: RankerConfig,
    pub filter: FilterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "market_watch.db".to_string(),
            input_path: "data/incoming.json".to_string(),
            api_port: 3000,
            rolling_days: 30,
            max_alerts_per_cycle: 0,
            telegram_token: None,
            telegram_chat_id: None,
            estimator: EstimatorConfig::default(),
            classifier: ClassifierConfig::default(),
            ranker: RankerConfig::default(),
            filter: FilterConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source. `from_env` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Config::default();
        let cfg = Self {
            log_level: lookup("LOG_LEVEL").unwrap_or(d.log_level),
            db_path: lookup("DB_PATH").unwrap_or(d.db_path),
            input_path: lookup("INPUT_PATH").unwrap_or(d.input_path),
            api_port: parse_var(&lookup, "API_PORT", d.api_port)?,
            rolling_days: parse_var(&lookup, "ROLLING_DAYS", d.rolling_days)?,
            max_alerts_per_cycle: parse_var(&lookup, "MAX_ALERTS_PER_CYCLE", d.max_alerts_per_cycle)?,
            telegram_token: lookup("TELEGRAM_TOKEN").filter(|s| !s.trim().is_empty()),
            telegram_chat_id: lookup("TELEGRAM_CHAT_ID").filter(|s| !s.trim().is_empty()),
            estimator: EstimatorConfig {
                min_segment_samples: parse_var(&lookup, "MIN_SEGMENT_SAMPLES", d.estimator.min_segment_samples)?,
                min_broad_samples: parse_var(&lookup, "MIN_BROAD_SAMPLES", d.estimator.min_broad_samples)?,
                min_knn_samples: parse_var(&lookup, "MIN_KNN_SAMPLES", d.estimator.min_knn_samples)?,
                knn_neighbors: parse_var(&lookup, "KNN_NEIGHBORS", d.estimator.knn_neighbors)?,
            },
            classifier: ClassifierConfig {
                alert_margin: parse_var(&lookup, "ALERT_MARGIN", d.classifier.alert_margin)?,
                drop_threshold_pct: parse_var(&lookup, "DROP_THRESHOLD_PCT", d.classifier.drop_threshold_pct)?,
                drop_threshold_abs: parse_var(&lookup, "DROP_THRESHOLD_ABS", d.classifier.drop_threshold_abs)?,
            },
            ranker: RankerConfig {
                priority_regions: lookup("PRIORITY_REGIONS")
                    .map(|s| split_list(&s))
                    .unwrap_or(d.ranker.priority_regions),
                priority_boost: parse_var(&lookup, "PRIORITY_BOOST", d.ranker.priority_boost)?
                    .clamp(0.0, MAX_PRIORITY_BOOST),
            },
            filter: FilterConfig {
                min_price: parse_var(&lookup, "MIN_PRICE", d.filter.min_price)?,
                max_price: parse_var(&lookup, "MAX_PRICE", d.filter.max_price)?,
                max_km: parse_var(&lookup, "MAX_KM", d.filter.max_km)?,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let fraction = |name: &str, v: f64| {
            if v > 0.0 && v < 1.0 {
                Ok(())
            } else {
                Err(AppError::Config(format!("{name} must be between 0 and 1, got {v}")))
            }
        };
        fraction("ALERT_MARGIN", self.classifier.alert_margin)?;
        fraction("DROP_THRESHOLD_PCT", self.classifier.drop_threshold_pct)?;

        if self.rolling_days < 1 {
            return Err(AppError::Config("ROLLING_DAYS must be at least 1".to_string()));
        }
        if self.estimator.knn_neighbors == 0 {
            return Err(AppError::Config("KNN_NEIGHBORS must be at least 1".to_string()));
        }
        if self.filter.min_price > self.filter.max_price {
            return Err(AppError::Config(format!(
                "MIN_PRICE ({}) exceeds MAX_PRICE ({})",
                self.filter.min_price, self.filter.max_price
            )));
        }
        Ok(())
    }

    /// Telegram delivery is enabled only when both credentials are present.
    pub fn telegram_credentials(&self) -> Option<(&str, &str)> {
        match (&self.telegram_token, &self.telegram_chat_id) {
            (Some(token), Some(chat)) => Some((token.as_str(), chat.as_str())),
            _ => None,
        }
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw:?}"))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
