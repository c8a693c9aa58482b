use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use market_watch::api::routes::{router, ApiState};
use market_watch::config::Config;
use market_watch::db;
use market_watch::error::Result;

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

    if let Err(e) = serve(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let pool = db::connect(&cfg.db_path).await?;

    let app = router(ApiState { pool });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
