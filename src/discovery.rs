//! Image discovery
//!
//! Walks a local directory tree and collects every file with a supported
//! image extension. Unreadable entries below the root are skipped so a
//! single bad directory never hides the rest of the tree; only a root that
//! cannot be opened fails the walk.

use crate::error::DiscoveryError;
use crate::model::WorkItem;
use regex::Regex;
use std::path::Path;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

/// Extensions accepted as images (compared lowercased, without the dot)
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// Walk options
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Maximum depth below the root (unlimited if None)
    pub max_depth: Option<usize>,

    /// Paths matching any of these are skipped, directories with their subtree
    pub exclude_patterns: Vec<Regex>,
}

impl DiscoveryOptions {
    fn is_excluded(&self, path: &Path) -> bool {
        if self.exclude_patterns.is_empty() {
            return false;
        }
        let path = path.to_string_lossy();
        self.exclude_patterns.iter().any(|re| re.is_match(&path))
    }
}

/// Check whether a path has an image extension (case-insensitive)
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Collect all images under `root`, sorted by path
pub fn discover_images(
    root: &Path,
    options: &DiscoveryOptions,
) -> Result<Vec<WorkItem>, DiscoveryError> {
    let meta = std::fs::metadata(root).map_err(|source| DiscoveryError::RootUnreadable {
        path: root.to_path_buf(),
        source,
    })?;
    if !meta.is_dir() {
        return Err(DiscoveryError::NotADirectory {
            path: root.to_path_buf(),
        });
    }
    // Listing the root up front surfaces permission errors as fatal
    std::fs::read_dir(root).map_err(|source| DiscoveryError::RootUnreadable {
        path: root.to_path_buf(),
        source,
    })?;

    let mut walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
    if let Some(depth) = options.max_depth {
        walker = walker.max_depth(depth.saturating_add(1));
    }

    let mut skipped = 0u64;
    let mut items: Vec<WorkItem> = walker
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !options.is_excluded(entry.path()))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                skipped += 1;
                debug!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(is_image_entry)
        .map(|entry| WorkItem::new(entry.into_path()))
        .collect();

    items.sort();

    info!(
        root = %root.display(),
        images = items.len(),
        skipped = skipped,
        "Image discovery finished"
    );

    Ok(items)
}

fn is_image_entry(entry: &DirEntry) -> bool {
    entry.file_type().is_file() && is_image_file(entry.path())
}
