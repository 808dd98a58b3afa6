//! Batch executor - bounded-concurrency dispatch of images to the classifier
//!
//! # Architecture
//!
//! ```text
//!   Vec<WorkItem> ──► dispatch loop ──(Semaphore, C permits)──► JoinSet
//!                                                             │
//!        ┌───────────────────────┬────────────────────────────┘
//!        ▼                       ▼
//!   ┌──────────┐            ┌──────────┐
//!   │ worker 1 │    ...     │ worker C │   read → classify → filter
//!   └────┬─────┘            └────┬─────┘
//!        │   write_burst         │
//!        └──────────┬────────────┘
//!                   ▼
//!          ResultSink (Mutex)          BatchStats (atomics) ◄── ProgressReporter
//! ```
//!
//! Each worker holds one permit from acquisition until its counters are
//! updated, so at most C classifier calls are ever in flight. A failing image
//! becomes an [`ItemOutcome::Failed`] and is counted; it never stops the
//! dispatch loop.

use crate::classifier::{Classifier, ImagePayload};
use crate::discovery::{discover_images, DiscoveryOptions};
use crate::error::{ClassifyError, ItemError, ItemOutcome, Result, WorkerError};
use crate::model::{Violation, WorkItem};
use crate::progress::{BatchStats, ProgressReporter, ProgressSnapshot, DEFAULT_REPORT_INTERVAL};
use crate::sink::ResultSink;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Aggregate counts printed at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub total: u64,
    /// Images that reached a terminal outcome (success or failure)
    pub processed: u64,
    pub errors: u64,
}

impl BatchSummary {
    pub fn succeeded(&self) -> u64 {
        self.processed.saturating_sub(self.errors)
    }
}

impl From<&ProgressSnapshot> for BatchSummary {
    fn from(s: &ProgressSnapshot) -> Self {
        Self {
            total: s.total,
            processed: s.processed,
            errors: s.errors,
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} processed={} errors={}",
            self.total, self.processed, self.errors
        )
    }
}

/// Result of a completed batch
#[derive(Debug)]
pub struct BatchResult {
    pub summary: BatchSummary,
    /// Final counter snapshot, including records and bytes read
    pub snapshot: ProgressSnapshot,
    /// Number of images handed to a worker
    pub dispatched: u64,
    /// Images that failed, when the path is known
    pub failed: Vec<PathBuf>,
    pub duration: Duration,
    /// False when shutdown stopped dispatch early
    pub completed: bool,
}

/// Drives a batch of images through a classifier into a sink
pub struct BatchExecutor<C, W = File>
where
    C: Classifier + 'static,
    W: Write + Send + 'static,
{
    classifier: Arc<C>,
    sink: Arc<ResultSink<W>>,
    concurrency: usize,
    classify_timeout: Option<Duration>,
    report_interval: Option<Duration>,
    shutdown: Arc<AtomicBool>,
}

impl<C, W> BatchExecutor<C, W>
where
    C: Classifier + 'static,
    W: Write + Send + 'static,
{
    /// Create an executor with at most `concurrency` calls in flight
    ///
    /// A concurrency of zero is treated as one.
    pub fn new(classifier: Arc<C>, sink: Arc<ResultSink<W>>, concurrency: usize) -> Self {
        Self {
            classifier,
            sink,
            concurrency: concurrency.max(1),
            classify_timeout: None,
            report_interval: Some(DEFAULT_REPORT_INTERVAL),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Deadline for each classifier call
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.classify_timeout = timeout;
        self
    }

    /// Progress log interval; None disables the reporter
    pub fn with_progress_interval(mut self, interval: Option<Duration>) -> Self {
        self.report_interval = interval;
        self
    }

    /// Get shutdown flag for signal handlers
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Discover images under `root` and run them
    ///
    /// Discovery failure is the only error surfaced before dispatch.
    pub async fn discover_and_run(
        &self,
        root: &Path,
        options: &DiscoveryOptions,
    ) -> Result<BatchResult> {
        let root_owned = root.to_path_buf();
        let options = options.clone();
        let items = tokio::task::spawn_blocking(move || discover_images(&root_owned, &options))
            .await
            .map_err(|e| WorkerError::Panicked(e.to_string()))??;
        self.run(items).await
    }

    /// Classify every item, at most `concurrency` at a time
    pub async fn run(&self, items: Vec<WorkItem>) -> Result<BatchResult> {
        let start_time = Instant::now();
        let total = items.len() as u64;
        let stats = Arc::new(BatchStats::new(total));

        info!(
            images = total,
            concurrency = self.concurrency,
            "Starting batch"
        );

        let reporter = match self.report_interval {
            Some(interval) if total > 0 => {
                Some(ProgressReporter::spawn(Arc::clone(&stats), interval))
            }
            _ => None,
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<ItemOutcome> = JoinSet::new();
        let mut failed = Vec::new();
        let mut dispatched = 0u64;

        for item in items {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            // Acquire semaphore permit to limit concurrency
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::SemaphoreClosed)?;

            // Shutdown may have been requested while waiting for a slot
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let classifier = Arc::clone(&self.classifier);
            let sink = Arc::clone(&self.sink);
            let task_stats = Arc::clone(&stats);
            let timeout = self.classify_timeout;
            dispatched += 1;

            tasks.spawn(async move {
                let outcome =
                    process_item(classifier.as_ref(), &sink, &task_stats, timeout, item).await;
                settle(&task_stats, &outcome);
                // Release the slot only after counters are updated
                drop(permit);
                outcome
            });

            // Reap finished tasks so the set does not grow with the batch
            while let Some(joined) = tasks.try_join_next() {
                collect(joined, &stats, &mut failed);
            }
        }

        if self.shutdown.load(Ordering::Relaxed) {
            warn!(
                dispatched = dispatched,
                remaining = total - dispatched,
                "Shutdown requested, waiting for in-flight images"
            );
        }

        // Wait for all in-flight tasks to complete
        debug!("Waiting for in-flight tasks to complete");
        while let Some(joined) = tasks.join_next().await {
            collect(joined, &stats, &mut failed);
        }

        if let Some(reporter) = reporter {
            reporter.finish().await;
        }

        let snapshot = stats.snapshot();
        let summary = BatchSummary::from(&snapshot);
        let duration = start_time.elapsed();
        let completed = dispatched == total;

        info!(
            total = summary.total,
            processed = summary.processed,
            errors = summary.errors,
            records = snapshot.records,
            duration_secs = duration.as_secs(),
            "Batch completed"
        );

        Ok(BatchResult {
            summary,
            snapshot,
            dispatched,
            failed,
            duration,
            completed,
        })
    }
}

/// Update counters and log the outcome of one image
fn settle(stats: &BatchStats, outcome: &ItemOutcome) {
    match outcome {
        ItemOutcome::Succeeded { path, records } => {
            stats.record_records(*records as u64);
            debug!(path = %path.display(), records = records, "Image processed");
        }
        ItemOutcome::Failed { path, error } => {
            stats.record_error();
            warn!(
                path = %path.display(),
                transient = is_transient(error),
                "Error processing image: {}",
                error
            );
        }
    }
    stats.record_processed();
}

/// Fold a joined task into the failure list
fn collect(
    joined: std::result::Result<ItemOutcome, JoinError>,
    stats: &BatchStats,
    failed: &mut Vec<PathBuf>,
) {
    match joined {
        Ok(ItemOutcome::Failed { path, .. }) => failed.push(path),
        Ok(ItemOutcome::Succeeded { .. }) => {}
        Err(e) => {
            // The task died before settling its own outcome
            stats.record_error();
            stats.record_processed();
            error!(error = %e, "Worker task failed");
        }
    }
}

fn is_transient(error: &ItemError) -> bool {
    match error {
        ItemError::Classify(e) => e.is_transient(),
        _ => false,
    }
}

/// Run one image through classify → filter → write
async fn process_item<C, W>(
    classifier: &C,
    sink: &Arc<ResultSink<W>>,
    stats: &BatchStats,
    timeout: Option<Duration>,
    item: WorkItem,
) -> ItemOutcome
where
    C: Classifier + ?Sized,
    W: Write + Send + 'static,
{
    match classify_and_store(classifier, sink, stats, timeout, &item).await {
        Ok(records) => ItemOutcome::Succeeded {
            path: item.into_path(),
            records,
        },
        Err(error) => ItemOutcome::Failed {
            path: item.into_path(),
            error,
        },
    }
}

async fn classify_and_store<C, W>(
    classifier: &C,
    sink: &Arc<ResultSink<W>>,
    stats: &BatchStats,
    timeout: Option<Duration>,
    item: &WorkItem,
) -> std::result::Result<usize, ItemError>
where
    C: Classifier + ?Sized,
    W: Write + Send + 'static,
{
    debug!(path = %item, "Processing image");

    let payload = ImagePayload::read(item.path()).await?;
    stats.record_bytes(payload.len() as u64);

    let call = classifier.classify(&payload);
    let violations = match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| ClassifyError::Timeout(limit))??,
        None => call.await?,
    };
    drop(payload);

    let flagged: Vec<Violation> = violations.into_iter().filter(Violation::is_flagged).collect();
    if flagged.is_empty() {
        return Ok(0);
    }

    let image_name = item.image_name();
    let sink = Arc::clone(sink);
    let written = tokio::task::spawn_blocking(move || sink.write_burst(&image_name, &flagged))
        .await
        .map_err(|e| WorkerError::WriterJoin(e.to_string()))??;

    Ok(written)
}
