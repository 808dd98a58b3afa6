//! Configuration types for image-moderator
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros, with every option also
//!   readable from the environment
//! - Optional `.env` file loading into the environment before parsing
//! - Runtime configuration with validation

use crate::classifier::GeminiConfig;
use crate::discovery::DiscoveryOptions;
use crate::error::ConfigError;
use crate::progress::DEFAULT_REPORT_INTERVAL;
use clap::Parser;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum reasonable concurrency limit
const MAX_CONCURRENCY: usize = 512;

/// Temperature range accepted by Gemini models
const MAX_TEMPERATURE: f32 = 2.0;

/// Environment file read from the working directory at startup
pub const ENV_FILE: &str = ".env";

/// Load `KEY=VALUE` lines from an environment file into the process
/// environment
///
/// Variables that are already set keep their value. Returns false when the
/// file does not exist.
pub fn load_env_file(path: &Path) -> Result<bool, ConfigError> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(ConfigError::InvalidEnvFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// Batch image moderation against a Gemini model on Vertex AI
#[derive(Parser, Debug, Clone)]
#[command(
    name = "image-moderator",
    version,
    about = "Batch image moderation against a Gemini model on Vertex AI",
    long_about = "Scans a directory for images, scores each one against the moderation \
                  policy with a multimodal model, and appends flagged violations to a \
                  pipe-delimited results file.\n\n\
                  Every option can also be set through the environment variable shown.",
    after_help = "EXAMPLES:\n    \
        image-moderator ./uploads --project my-proj -o result.csv\n    \
        IMAGE_DIR=./uploads CONCURRENT=8 image-moderator --project my-proj\n    \
        image-moderator ./uploads --project my-proj --exclude '\\.thumbs' -c 4 -q"
)]
pub struct CliArgs {
    /// Directory to scan for images
    #[arg(env = "IMAGE_DIR", value_name = "IMAGE_DIR")]
    pub image_dir: PathBuf,

    /// Results file (appended to, created if missing)
    #[arg(short, long, env = "TARGET", default_value = "result.csv", value_name = "FILE")]
    pub output: PathBuf,

    /// Maximum number of images classified at once
    #[arg(
        short = 'c',
        long,
        env = "CONCURRENT",
        default_value_t = default_concurrency(),
        value_name = "NUM"
    )]
    pub concurrency: usize,

    /// Gemini model identifier
    #[arg(long, env = "MODEL", default_value = "gemini-2.0-flash")]
    pub model: String,

    /// Google Cloud project
    #[arg(long, env = "PROJECT")]
    pub project: String,

    /// Vertex AI location
    #[arg(long, env = "LOCATION", default_value = "us-central1")]
    pub location: String,

    /// Sampling temperature
    #[arg(long, env = "TEMPERATURE")]
    pub temperature: Option<f32>,

    /// OAuth access token (e.g. from `gcloud auth print-access-token`)
    #[arg(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,

    /// Override the Vertex AI base URL
    #[arg(long, env = "VERTEX_ENDPOINT", value_name = "URL")]
    pub endpoint: Option<String>,

    /// Per-image classification deadline in seconds (0 disables)
    #[arg(long, env = "CLASSIFY_TIMEOUT", default_value = "120", value_name = "SECS")]
    pub timeout: u64,

    /// Maximum directory depth (unlimited if not set)
    #[arg(short = 'd', long, value_name = "NUM")]
    pub max_depth: Option<usize>,

    /// Exclude paths matching pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Seconds between progress lines
    #[arg(long, default_value_t = DEFAULT_REPORT_INTERVAL.as_secs(), value_name = "SECS")]
    pub progress_interval: u64,

    /// Quiet mode - suppress header, progress and styled summary
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_concurrency() -> usize {
    // Classification is network bound
    num_cpus::get() * 2
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root directory to scan
    pub image_dir: PathBuf,

    /// Results file
    pub output_path: PathBuf,

    /// Concurrency limit
    pub concurrency: usize,

    /// Classifier settings
    pub gemini: GeminiConfig,

    /// Per-call deadline
    pub classify_timeout: Option<Duration>,

    /// Discovery options
    pub max_depth: Option<usize>,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// Progress interval
    pub progress_interval: Duration,

    /// Show header, progress and summary
    pub show_progress: bool,
}

impl RunConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        // Validate concurrency
        if args.concurrency == 0 || args.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::InvalidConcurrency {
                count: args.concurrency,
                max: MAX_CONCURRENCY,
            });
        }

        if let Some(t) = args.temperature {
            if !(0.0..=MAX_TEMPERATURE).contains(&t) {
                return Err(ConfigError::InvalidTemperature { value: t });
            }
        }

        if args.progress_interval == 0 {
            return Err(ConfigError::InvalidProgressInterval {
                secs: args.progress_interval,
            });
        }

        if args.project.trim().is_empty() {
            return Err(ConfigError::Missing("project"));
        }
        if args.model.trim().is_empty() {
            return Err(ConfigError::Missing("model"));
        }
        if args.access_token.trim().is_empty() {
            return Err(ConfigError::Missing("access token"));
        }

        // Validate image directory
        if !args.image_dir.exists() {
            return Err(ConfigError::InvalidImageDir {
                path: args.image_dir,
                reason: "does not exist".to_string(),
            });
        }
        if !args.image_dir.is_dir() {
            return Err(ConfigError::InvalidImageDir {
                path: args.image_dir,
                reason: "not a directory".to_string(),
            });
        }

        // Validate output path
        if let Some(parent) = args.output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::InvalidOutputPath {
                    path: args.output.clone(),
                    reason: format!("Parent directory '{}' does not exist", parent.display()),
                });
            }
        }
        if args.output.is_dir() {
            return Err(ConfigError::InvalidOutputPath {
                path: args.output.clone(),
                reason: "is a directory".to_string(),
            });
        }

        // Compile exclude patterns
        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let endpoint = args
            .endpoint
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| GeminiConfig::default_endpoint(&args.location));

        Ok(Self {
            image_dir: args.image_dir,
            output_path: args.output,
            concurrency: args.concurrency,
            gemini: GeminiConfig {
                endpoint,
                project: args.project,
                location: args.location,
                model: args.model,
                access_token: args.access_token,
                temperature: args.temperature,
            },
            classify_timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
            max_depth: args.max_depth,
            exclude_patterns,
            progress_interval: Duration::from_secs(args.progress_interval),
            show_progress: !args.quiet,
        })
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            max_depth: self.max_depth,
            exclude_patterns: self.exclude_patterns.clone(),
        }
    }
}
