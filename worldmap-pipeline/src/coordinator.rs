//! Per-chunk task scheduling.
//!
//! Each submitted chunk moves through
//! `PENDING -> (SKIPPED | IN_FLIGHT) -> (DELIVERED | FAILED)`:
//! 1. Skip if the ledger already has it
//! 2. Wait for a worker slot (at most [`WORKER_POOL_SIZE`] chunks at once)
//! 3. Load the chunk and build its record on the blocking pool
//! 4. Deliver it; on success mark the ledger
//!
//! Callers must not submit the same key twice in one run. If they do, the
//! chunk may be sent twice but the ledger stays consistent.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinError, JoinSet};
use worldmap_metrics::PipelineMetrics;
use worldmap_storage::Ledger;
use worldmap_world::{ChunkFetch, ChunkKey};

use crate::delivery::{Delivery, DeliveryClient};
use crate::record::{ChunkRecord, RecordBuilder};

pub const WORKER_POOL_SIZE: usize = 10;
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);
const PROGRESS_INTERVAL: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// Already delivered in this or an earlier run.
    Skipped,
    /// The coordinator is shutting down.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Delivered,
    Failed,
    Skipped,
    /// The source could not load the chunk.
    Missing,
    /// Shutdown closed the pool before the chunk started.
    Abandoned,
}

struct Shared {
    world_id: String,
    ledger: Arc<Ledger>,
    builder: RecordBuilder,
    delivery: DeliveryClient,
    metrics: Arc<PipelineMetrics>,
    workers: Semaphore,
    active: AtomicUsize,
    idle: Notify,
    debug: bool,
}

/// Decrements the active count when a chunk task ends, however it ends.
struct ActiveGuard(Arc<Shared>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

pub struct Coordinator {
    shared: Arc<Shared>,
    tasks: Mutex<JoinSet<ChunkOutcome>>,
    accepting: AtomicBool,
    grace: Duration,
}

impl Coordinator {
    pub fn new(
        world_id: impl Into<String>,
        ledger: Arc<Ledger>,
        builder: RecordBuilder,
        delivery: DeliveryClient,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                world_id: world_id.into(),
                ledger,
                builder,
                delivery,
                metrics,
                workers: Semaphore::new(WORKER_POOL_SIZE),
                active: AtomicUsize::new(0),
                idle: Notify::new(),
                debug: false,
            }),
            tasks: Mutex::new(JoinSet::new()),
            accepting: AtomicBool::new(true),
            grace: SHUTDOWN_GRACE,
        }
    }

    /// Log full error chains. Must be set before the first submit.
    pub fn with_debug(mut self, debug: bool) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.debug = debug;
        }
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.shared.ledger
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.shared.metrics
    }

    pub fn processed_count(&self) -> usize {
        self.shared.metrics.processed()
    }

    pub fn failed_count(&self) -> usize {
        self.shared.metrics.failed()
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<ChunkOutcome>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of chunk tasks still running.
    pub fn pending(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Queue one chunk. Never blocks; must be called inside a tokio runtime.
    pub fn submit(&self, key: ChunkKey, fetch: ChunkFetch) -> Submission {
        // Held until the task is spawned so shutdown cannot miss it
        let mut tasks = self.tasks();
        if !self.accepting.load(Ordering::SeqCst) {
            return Submission::Rejected;
        }

        let shared = &self.shared;
        if shared.ledger.is_processed(key) {
            log::debug!("Chunk ({}) already processed, skipping", key);
            shared.metrics.record_skipped();
            return Submission::Skipped;
        }

        shared.metrics.record_queued();
        shared.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(Arc::clone(shared));

        // Collect whatever already finished so the set does not grow with the world
        while let Some(result) = tasks.try_join_next() {
            shared.collect(result);
        }
        tasks.spawn(async move {
            let shared = Arc::clone(&guard.0);
            let outcome = match AssertUnwindSafe(Arc::clone(&shared).process(key, fetch))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic) => {
                    shared.panicked(key, panic);
                    ChunkOutcome::Failed
                }
            };
            // Counters are final before wait_idle can observe the task as done
            drop(guard);
            outcome
        });
        Submission::Queued
    }

    /// Wait until no chunk task is running. New submissions are still
    /// accepted, and dropping this future leaves running tasks alone.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.active.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
        let mut tasks = self.tasks();
        while let Some(result) = tasks.try_join_next() {
            self.shared.collect(result);
        }
    }

    /// Stop accepting work, give running chunks up to the grace period, then
    /// cancel the rest and write the ledger one final time.
    pub async fn shutdown(&self) {
        let mut tasks = {
            let mut tasks = self.tasks();
            self.accepting.store(false, Ordering::SeqCst);
            std::mem::take(&mut *tasks)
        };
        let running = tasks.len();
        if running > 0 {
            log::info!("Waiting up to {:?} for {} chunk tasks", self.grace, running);
        }

        let drain = async {
            while let Some(result) = tasks.join_next().await {
                self.shared.collect(result);
            }
        };
        if tokio::time::timeout(self.grace, drain).await.is_err() {
            log::warn!("{} chunk tasks still running after {:?}, cancelling", tasks.len(), self.grace);
            self.shared.delivery.cancel();
            self.shared.workers.close();
            tasks.abort_all();
            while let Some(result) = tasks.join_next().await {
                self.shared.collect(result);
            }
        }

        let ledger = Arc::clone(&self.shared.ledger);
        if let Err(e) = tokio::task::spawn_blocking(move || ledger.persist()).await {
            log::error!("Final ledger save did not run: {}", e);
        }
        log::info!(
            "Chunk processing stopped: {} delivered, {} failed",
            self.processed_count(),
            self.failed_count()
        );
    }
}

impl Shared {
    async fn process(self: Arc<Self>, key: ChunkKey, fetch: ChunkFetch) -> ChunkOutcome {
        let Ok(_permit) = self.workers.acquire().await else {
            return ChunkOutcome::Abandoned;
        };

        // The key may have been delivered while this task waited
        if self.ledger.is_processed(key) {
            log::debug!("Chunk ({}) already processed, skipping", key);
            self.metrics.record_skipped();
            return ChunkOutcome::Skipped;
        }

        let view = match fetch.await {
            Ok(Some(view)) => view,
            Ok(None) => {
                log::debug!("Chunk ({}) is not loadable, skipping", key);
                self.metrics.record_missing();
                return ChunkOutcome::Missing;
            }
            Err(e) => {
                self.report(&format!("Error loading chunk ({})", key), &e);
                self.metrics.record_missing();
                return ChunkOutcome::Missing;
            }
        };

        let record = match self.extract(key, view).await {
            Ok(record) => record,
            Err(e) => {
                log::error!("Error processing chunk ({}): extraction task failed: {}", key, e);
                self.fail();
                return ChunkOutcome::Failed;
            }
        };

        match self.delivery.send(&record).await {
            Delivery::Delivered { .. } => {}
            Delivery::Exhausted { attempts } => {
                log::warn!("Giving up on chunk ({}) after {} attempts", key, attempts);
                self.fail();
                return ChunkOutcome::Failed;
            }
            Delivery::Cancelled => {
                log::info!("Delivery of chunk ({}) cancelled", key);
                self.fail();
                return ChunkOutcome::Failed;
            }
        }
        drop(record);

        let ledger = Arc::clone(&self.ledger);
        if let Err(e) = tokio::task::spawn_blocking(move || ledger.mark_processed(key)).await {
            log::error!("Error processing chunk ({}): ledger update failed: {}", key, e);
            self.fail();
            return ChunkOutcome::Failed;
        }

        let count = self.metrics.record_processed();
        if count % PROGRESS_INTERVAL == 0 {
            log::info!("Processed {} chunks (failed: {})", count, self.metrics.failed());
        }
        ChunkOutcome::Delivered
    }

    /// Build the record off the async workers. Extraction errors degrade to a
    /// minimal record; only a panic is an error here.
    async fn extract(&self, key: ChunkKey, view: worldmap_world::BoxedChunk) -> Result<ChunkRecord, JoinError> {
        let builder = self.builder.clone();
        let world_id = self.world_id.clone();
        let started = Instant::now();

        let built = tokio::task::spawn_blocking(move || builder.build(view.as_ref(), &world_id, key)).await?;
        self.metrics.record_build(started.elapsed());

        Ok(match built {
            Ok(record) => record,
            Err(e) => {
                self.report(&format!("Error extracting chunk data for ({})", key), &anyhow::Error::new(e));
                self.metrics.record_extraction_fallback();
                ChunkRecord::minimal(&self.world_id, key)
            }
        })
    }

    fn fail(&self) {
        self.metrics.record_failed();
    }

    fn report(&self, context: &str, error: &anyhow::Error) {
        if self.debug {
            log::error!("{}: {:?}", context, error);
        } else {
            log::error!("{}: {}", context, error);
        }
    }

    fn panicked(&self, key: ChunkKey, panic: Box<dyn Any + Send>) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        log::error!("Error processing chunk ({}): task panicked: {}", key, message);
        self.fail();
    }

    fn collect(&self, result: Result<ChunkOutcome, JoinError>) {
        match result {
            Ok(_) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                log::error!("Chunk task panicked: {}", e);
                self.fail();
            }
        }
    }
}
