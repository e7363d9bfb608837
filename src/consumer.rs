//! The consumer orchestrator: claims batches from the queue, dispatches them
//! to a bounded worker pool, and routes failures to the right backoff path.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::db::{self, Pool};
use crate::isbndb::{ApiError, BookApi};
use crate::quota::QuotaTracker;
use crate::{archive, ingest};

/// Batch-level failure, routed by the dispatch loop.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("archive failure: {0}")]
    Archive(#[source] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub batch_size: u32,
    pub max_concurrent_requests: usize,
    /// Global cooldown applied after an upstream 429.
    pub throttle: Duration,
    pub archive_dir: PathBuf,
}

/// What the dispatch loop should do after settling one batch outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routing {
    Continue,
    /// Pause the whole loop for the throttle interval (upstream 429).
    Cooldown,
    /// Upstream reported the daily cap; sleep until the UTC reset.
    QuotaBlocked,
}

struct BatchOutcome {
    isbns: Vec<String>,
    result: Result<usize, BatchError>,
}

pub struct Consumer {
    pool: Pool,
    api: Arc<dyn BookApi>,
    quota: Arc<QuotaTracker>,
    settings: ConsumerSettings,
}

impl Consumer {
    pub fn new(
        pool: Pool,
        api: Arc<dyn BookApi>,
        quota: Arc<QuotaTracker>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            pool,
            api,
            quota,
            settings,
        }
    }

    /// Drain the queue. Returns once a claim comes back empty and every
    /// in-flight unit of work has been awaited. Storage failures abort.
    pub async fn run(&self) -> Result<()> {
        let total = db::count_pending(&self.pool).await?;
        info!(total, "starting queue drain");
        let progress = drain_progress_bar(total as u64);

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_requests));
        let mut in_flight: JoinSet<BatchOutcome> = JoinSet::new();
        let mut cooldown = false;
        let mut quota_blocked = false;

        loop {
            // Settle finished units first so failure routing and the quota
            // check stay current.
            while let Some(joined) = in_flight.try_join_next() {
                match self.settle(joined?, &progress).await? {
                    Routing::Continue => {}
                    Routing::Cooldown => cooldown = true,
                    Routing::QuotaBlocked => quota_blocked = true,
                }
            }

            if cooldown {
                warn!(
                    secs = self.settings.throttle.as_secs(),
                    "rate limit exceeded; pausing dispatch"
                );
                tokio::time::sleep(self.settings.throttle).await;
                cooldown = false;
                continue;
            }

            if quota_blocked || self.quota.exhausted().await {
                // Let in-flight work finish before sleeping off the day.
                while let Some(joined) = in_flight.join_next().await {
                    self.settle(joined?, &progress).await?;
                }
                if self.quota.exhausted().await || quota_blocked {
                    self.quota.wait_for_reset().await?;
                }
                quota_blocked = false;
                continue;
            }

            let batch = db::claim_batch(&self.pool, self.settings.batch_size).await?;
            if batch.is_empty() {
                info!("no more pending ISBNs");
                break;
            }

            let permit = semaphore.clone().acquire_owned().await?;
            self.spawn_unit(&mut in_flight, batch, permit);
        }

        while let Some(joined) = in_flight.join_next().await {
            self.settle(joined?, &progress).await?;
        }
        progress.finish_and_clear();
        info!(calls_today = self.quota.calls_today().await, "queue drained");
        Ok(())
    }

    /// Launch one unit of work: limiter-gated fetch, archive, parse, persist,
    /// mark done. The semaphore permit is dropped and the quota counter is
    /// recorded on every exit path, success or failure.
    fn spawn_unit(
        &self,
        in_flight: &mut JoinSet<BatchOutcome>,
        isbns: Vec<String>,
        permit: OwnedSemaphorePermit,
    ) {
        let pool = self.pool.clone();
        let api = self.api.clone();
        let quota = self.quota.clone();
        let archive_dir = self.settings.archive_dir.clone();
        in_flight.spawn(async move {
            let _permit = permit;
            let result = process_batch(&pool, api.as_ref(), &isbns, &archive_dir).await;
            if let Err(e) = quota.record_call().await {
                warn!(%e, "failed to persist quota state");
            }
            BatchOutcome { isbns, result }
        });
    }

    async fn settle(&self, outcome: BatchOutcome, progress: &ProgressBar) -> Result<Routing> {
        match outcome.result {
            Ok(records) => {
                // Progress advances by the true number of committed records,
                // which can be fewer than the claimed batch size.
                progress.inc(records as u64);
                Ok(Routing::Continue)
            }
            Err(BatchError::Api(ApiError::RateLimited)) => Ok(Routing::Cooldown),
            Err(BatchError::Api(ApiError::QuotaExceeded)) => {
                warn!("upstream reports daily quota exhausted");
                Ok(Routing::QuotaBlocked)
            }
            Err(BatchError::Storage(e)) => {
                error!(%e, "storage failure; aborting run");
                Err(e.into())
            }
            Err(err) => {
                // Failed batches stay in `processing`; there is deliberately
                // no automatic requeue (see DESIGN.md).
                warn!(%err, batch = outcome.isbns.len(), "batch failed; rows left in processing");
                Ok(Routing::Continue)
            }
        }
    }
}

async fn process_batch(
    pool: &Pool,
    api: &dyn BookApi,
    isbns: &[String],
    archive_dir: &Path,
) -> Result<usize, BatchError> {
    let raw = api.fetch_batch(isbns).await?;
    archive::archive_books(&raw, archive_dir)
        .await
        .map_err(BatchError::Archive)?;
    let books = ingest::parse_books(&raw);
    db::insert_books(pool, &books).await?;
    db::mark_done(pool, isbns).await?;
    Ok(books.len())
}

fn drain_progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({per_sec})")
            .expect("valid progress template")
            .progress_chars("=> "),
    );
    bar.set_message("isbns");
    bar
}
