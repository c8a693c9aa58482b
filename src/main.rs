use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use market_watch::config::Config;
use market_watch::db::{self, HistoryRepository};
use market_watch::error::Result;
use market_watch::ingest;
use market_watch::notify::Notifier;
use market_watch::pipeline::Pipeline;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

/// One scheduled cycle: load history, ingest the scraped batch, evaluate,
/// persist, notify.
async fn run(cfg: Config) -> Result<()> {
    let cycle_at = Utc::now();

    // --- Database + previous snapshot ---
    let pool = db::connect(&cfg.db_path).await?;
    let repo = HistoryRepository::new(pool);
    let history = repo.load_history(cfg.rolling_days).await?;
    info!("Loaded {} history rows (window {}d)", history.len(), cfg.rolling_days);

    // --- Scraped batch ---
    let raw = ingest::load_batch(&cfg.input_path).await?;
    let (batch, ingest_stats) = ingest::prepare_batch(raw, &cfg.filter, cycle_at);
    info!(
        "[INGEST] read={} rejected={} filtered={} accepted={}",
        ingest_stats.read, ingest_stats.rejected, ingest_stats.filtered, ingest_stats.accepted,
    );

    // --- Evaluate ---
    let pipeline = Pipeline::new(&cfg);
    let outcome = pipeline.run_cycle(history, batch, cycle_at);
    let report = &outcome.report;

    // Bookkeeping is persisted before delivery so a crash mid-send cannot re-fire.
    let saved = repo.save_history(&outcome.history).await?;

    // --- Notify ---
    let notifier = Notifier::from_config(&cfg)?;
    let delivery = notifier.deliver(&outcome.alerts).await;
    if let Err(e) = repo.record_alerts(&outcome.alerts, cycle_at).await {
        warn!("Could not record alert log: {e}");
    }

    info!(
        event = "CYCLE_DONE",
        fresh = report.fresh,
        inserted = report.merge.inserted,
        replaced = report.merge.replaced,
        superseded = report.merge.superseded,
        refreshed = report.merge.refreshed,
        purged = report.purged,
        history_rows = report.history_rows,
        evaluated = report.evaluated,
        segment_median = report.by_provenance.segment_median,
        broad_median = report.by_provenance.broad_median,
        knn_fallback = report.by_provenance.knn_fallback,
        unavailable = report.by_provenance.unavailable,
        deals = report.deals,
        drops = report.drops,
        suppressed = report.suppressed,
        deferred = report.deferred,
        sent = delivery.sent,
        failed = delivery.failed,
        deleted = saved.deleted,
        "Cycle complete: {} alerts",
        outcome.alerts.len(),
    );
    Ok(())
}
