//! Core data types shared by discovery, the classifier and the sink

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// One image queued for classification
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkItem {
    path: PathBuf,
}

impl WorkItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name used as the record key in the output
    pub fn image_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// One policy judgment returned by the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub category: String,

    /// Conventionally 0.0..=1.0 but not enforced
    #[serde(alias = "risk_num")]
    pub risk_score: f64,

    #[serde(default)]
    pub reason: String,
}

impl Violation {
    pub fn new(category: impl Into<String>, risk_score: f64, reason: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            risk_score,
            reason: reason.into(),
        }
    }

    /// Only positive scores are persisted
    pub fn is_flagged(&self) -> bool {
        self.risk_score > 0.0
    }
}

/// A flattened output line: `image_name|category|risk_score|reason`
///
/// Fields are pipe-delimited without escaping, so a `|` inside `reason`
/// makes the line ambiguous to split. Line breaks inside fields are
/// replaced with spaces to keep one record per line.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord<'a> {
    pub image_name: &'a str,
    pub category: &'a str,
    pub risk_score: f64,
    pub reason: &'a str,
}

impl<'a> ResultRecord<'a> {
    pub fn from_violation(image_name: &'a str, violation: &'a Violation) -> Self {
        Self {
            image_name,
            category: &violation.category,
            risk_score: violation.risk_score,
            reason: &violation.reason,
        }
    }
}

impl fmt::Display for ResultRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{:.2}|{}",
            single_line(self.image_name),
            single_line(self.category),
            self.risk_score,
            single_line(self.reason)
        )
    }
}

fn single_line(s: &str) -> std::borrow::Cow<'_, str> {
    if s.contains(['\n', '\r']) {
        s.replace("\r\n", " ").replace(['\n', '\r'], " ").into()
    } else {
        s.into()
    }
}
