pub mod api;
pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod estimator;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod scorer;
pub mod state;
pub mod types;
