pub mod reference;
pub mod stats;
pub mod tiers;

pub use reference::ReferenceEstimator;
pub use tiers::ReferenceQuery;
