pub mod alert_ranker;

pub use alert_ranker::AlertRanker;
