use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use backoffice::{
    auth::jwt::JwtService, config::AppConfig, db, default_handlers, intelligence,
    s3::build_buckets, state::AppState, Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 2,
        receipts_bucket = %config.receipts_bucket,
        document_intelligence_enabled = config.document_intelligence_endpoint.is_some(),
        "loaded backoffice configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 2)?;
    let buckets = build_buckets(&config).await?;
    let jwt = JwtService::from_config(&config)?;
    let analyzer = intelligence::from_config(&config)?;
    if !analyzer.is_enabled() {
        tracing::warn!("document intelligence is not configured, receipt analysis jobs will fail");
    }

    let state = Arc::new(AppState::new(pool, config, buckets, jwt, analyzer));
    let worker = Worker::new(state, default_handlers(), Duration::from_secs(2));

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
