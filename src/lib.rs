//! image-moderator - Batch Image Moderation
//!
//! Scans a directory of images, submits each one to a multimodal model for
//! policy-violation scoring, and appends per-image violation records to a
//! results file.
//!
//! # Features
//!
//! - **Bounded Concurrency**: At most C classifier calls in flight, gated by
//!   a counting semaphore, independent of how many images are queued.
//!
//! - **Failure Isolation**: A bad image, a network error or a malformed
//!   model reply is logged and counted; the rest of the batch keeps going.
//!
//! - **Uninterleaved Output**: All records for one image are written as a
//!   single burst under one lock, so concurrent workers never mix lines.
//!
//! - **Live Progress**: Lock-free counters with a background reporter that
//!   stops when the batch is done.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌───────────────────────────────────────────┐
//! │  Image Discovery │────►│              Batch Executor               │
//! │  (walkdir, sort) │     │  Semaphore(C) ─► worker tasks (JoinSet)   │
//! └──────────────────┘     └─────────┬──────────────────────┬──────────┘
//!                                    │ classify             │ write_burst
//!                                    ▼                      ▼
//!                          ┌──────────────────┐   ┌──────────────────┐
//!                          │    Classifier    │   │    ResultSink    │
//!                          │ (Gemini/Vertex)  │   │ (Mutex, append)  │
//!                          └──────────────────┘   └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Moderate a directory with 8 concurrent requests
//! image-moderator ./uploads --project my-proj -c 8 -o result.csv
//!
//! # Inspect high-risk records
//! awk -F'|' '$3 > 0.6' result.csv
//! ```

pub mod classifier;
pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod model;
pub mod progress;
pub mod sink;

pub use classifier::{Classifier, GeminiClassifier, GeminiConfig, ImagePayload};
pub use config::{CliArgs, RunConfig};
pub use discovery::{discover_images, DiscoveryOptions};
pub use error::{ItemOutcome, ModeratorError, Result};
pub use executor::{BatchExecutor, BatchResult, BatchSummary};
pub use model::{ResultRecord, Violation, WorkItem};
pub use sink::ResultSink;
