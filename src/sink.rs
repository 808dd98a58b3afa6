//! Append-only result sink
//!
//! Every completed image produces one *burst*: all of its flagged
//! violations as consecutive lines. Bursts from concurrent workers must never
//! interleave, so the whole burst is rendered into one buffer first and then
//! written and flushed while holding a single mutex.
//!
//! # Output format
//!
//! ```text
//! image_name|category|risk_score|reason
//! cat.png|Sexuality and Nudity|0.35|swimsuit artwork
//! ```
//!
//! The file is opened with create + append, so earlier runs are kept.

use crate::error::{SinkError, SinkResult};
use crate::model::{ResultRecord, Violation};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about write operations
#[derive(Debug, Default)]
pub struct SinkStats {
    /// Total records written
    pub records_written: AtomicU64,

    /// Total bursts committed (including empty ones)
    pub bursts_written: AtomicU64,

    /// Bursts that failed to write
    pub write_failures: AtomicU64,
}

impl SinkStats {
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn bursts_written(&self) -> u64 {
        self.bursts_written.load(Ordering::Relaxed)
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }
}

/// Shared record writer
#[derive(Debug)]
pub struct ResultSink<W: Write + Send = File> {
    writer: Mutex<W>,
    stats: SinkStats,
}

impl ResultSink<File> {
    /// Open (or create) the output file for appending
    pub fn open(path: &Path) -> SinkResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| SinkError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            writer: Mutex::new(file),
            stats: SinkStats::default(),
        })
    }
}

impl<W: Write + Send> ResultSink<W> {
    /// Wrap an arbitrary writer
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            stats: SinkStats::default(),
        }
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    /// Write the flagged violations of one image as a single burst
    ///
    /// Violations with `risk_score <= 0` are dropped. An image with nothing
    /// flagged writes nothing and returns `Ok(0)`.
    pub fn write_burst(&self, image_name: &str, violations: &[Violation]) -> SinkResult<usize> {
        let buf = render_burst(image_name, violations);
        let count = violations.iter().filter(|v| v.is_flagged()).count();
        if count == 0 {
            self.stats.bursts_written.fetch_add(1, Ordering::Relaxed);
            return Ok(0);
        }

        let result = {
            let mut writer = self.writer.lock();
            writer
                .write_all(buf.as_bytes())
                .and_then(|()| writer.flush())
        };

        match result {
            Ok(()) => {
                self.stats
                    .records_written
                    .fetch_add(count as u64, Ordering::Relaxed);
                self.stats.bursts_written.fetch_add(1, Ordering::Relaxed);
                Ok(count)
            }
            Err(source) => {
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                Err(SinkError::Write {
                    image: image_name.to_string(),
                    source,
                })
            }
        }
    }

    /// Consume the sink and return the writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Render all flagged records of one image, newline-terminated
pub fn render_burst(image_name: &str, violations: &[Violation]) -> String {
    let mut buf = String::new();
    for violation in violations.iter().filter(|v| v.is_flagged()) {
        // Writing into a String cannot fail
        let _ = writeln!(buf, "{}", ResultRecord::from_violation(image_name, violation));
    }
    buf
}
