//! Progress tracking and reporting for a batch run
//!
//! [`BatchStats`] holds lock-free counters shared by every worker.
//! [`ProgressReporter`] is a background task that periodically logs the
//! completion percentage and stops as soon as the batch is done.

use console::style;
use humansize::{format_size, BINARY};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Default reporting interval
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(4);

/// Counters for one batch run
#[derive(Debug, Default)]
pub struct BatchStats {
    total: u64,
    processed: AtomicU64,
    errors: AtomicU64,
    records: AtomicU64,
    bytes_read: AtomicU64,
}

impl BatchStats {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Record that an image reached a terminal outcome
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_records(&self, count: u64) {
        self.records.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: u64,
    /// Images with a terminal outcome, successful or not
    pub processed: u64,
    pub errors: u64,
    pub records: u64,
    pub bytes_read: u64,
}

impl ProgressSnapshot {
    pub fn succeeded(&self) -> u64 {
        self.processed.saturating_sub(self.errors)
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed as f64 / self.total as f64 * 100.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({:.1}%)",
            self.processed,
            self.total,
            self.percent()
        )
    }
}

/// Background task that logs progress on a fixed interval
pub struct ProgressReporter {
    stop: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl ProgressReporter {
    /// Spawn the reporter on the current tokio runtime
    pub fn spawn(stats: Arc<BatchStats>, interval: Duration) -> Self {
        let (stop, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it
            ticker.tick().await;
            let mut emitted = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                }
                if *stop_rx.borrow() {
                    break;
                }

                let snapshot = stats.snapshot();
                if snapshot.is_complete() {
                    break;
                }
                info!(
                    processed = snapshot.processed,
                    total = snapshot.total,
                    errors = snapshot.errors,
                    "Progress: {}",
                    snapshot
                );
                emitted += 1;
            }
            emitted
        });

        Self { stop, handle }
    }

    /// Stop the reporter and wait for it to exit
    ///
    /// Returns the number of progress lines emitted.
    pub async fn finish(self) -> u64 {
        let _ = self.stop.send(true);
        self.handle.await.unwrap_or(0)
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a styled summary of the batch
pub fn print_summary(
    snapshot: &ProgressSnapshot,
    write_failures: u64,
    duration: Duration,
    output: &str,
    completed: bool,
) {
    let duration_secs = duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        snapshot.processed as f64 / duration_secs
    } else {
        0.0
    };

    println!();
    if completed {
        println!("{}", style("Batch Complete").green().bold());
    } else {
        println!("{}", style("Batch Interrupted").yellow().bold());
    }
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Images:").bold(), format_number(snapshot.total));
    println!(
        "  {} {}",
        style("Processed:").bold(),
        format_number(snapshot.processed)
    );
    if snapshot.errors > 0 {
        println!(
            "  {} {}",
            style("Errors:").yellow().bold(),
            format_number(snapshot.errors)
        );
    }
    if write_failures > 0 {
        println!(
            "  {} {}",
            style("Write Failures:").red().bold(),
            format_number(write_failures)
        );
    }
    println!(
        "  {} {}",
        style("Records:").bold(),
        format_number(snapshot.records)
    );
    println!(
        "  {} {}",
        style("Image Data:").bold(),
        format_size(snapshot.bytes_read, BINARY)
    );
    println!(
        "  {} {:.1}s ({:.1} images/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    println!("  {} {}", style("Output:").bold(), output);
    println!();
}

/// Print a header at the start of the run
pub fn print_header(image_dir: &str, model: &str, concurrency: usize, output: &str) {
    println!();
    println!(
        "{} {}",
        style("image-moderator").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Images:").bold(), image_dir);
    println!("  {} {}", style("Model:").bold(), model);
    println!("  {} {}", style("Concurrency:").bold(), concurrency);
    println!("  {} {}", style("Output:").bold(), output);
    println!();
}
