use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use isbndump::consumer::{Consumer, ConsumerSettings};
use isbndump::isbndb::IsbndbClient;
use isbndump::limiter::RateLimiter;
use isbndump::quota::{FileQuotaStore, QuotaTracker};
use isbndump::{config, db};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/isbndump.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let limiter = Arc::new(RateLimiter::new(cfg.app.max_calls_per_sec));
    let client = IsbndbClient::new(
        &cfg.isbndb.base_url,
        cfg.isbndb.api_key.clone(),
        limiter,
        Duration::from_secs(cfg.app.request_timeout_secs),
    )?;
    let quota = QuotaTracker::new(
        Box::new(FileQuotaStore::new(&cfg.app.state_file)),
        cfg.app.max_calls_per_day,
    )?;

    let consumer = Consumer::new(
        pool,
        Arc::new(client),
        Arc::new(quota),
        ConsumerSettings {
            batch_size: cfg.app.batch_size,
            max_concurrent_requests: cfg.app.max_concurrent_requests,
            throttle: Duration::from_secs(cfg.app.throttle_secs),
            archive_dir: PathBuf::from(&cfg.app.data_dir),
        },
    );

    info!("starting ISBNdb dump");
    consumer.run().await?;
    info!("all ISBNs scraped; shutting down");

    Ok(())
}
