//! Image MIME type detection
//!
//! Uses the `infer` crate to detect the type from magic bytes, so a PNG
//! saved as `.jpg` is still sent with the right inline-data type. Falls back
//! to the file extension when the header is not recognised.

use std::path::Path;

/// Fallback when neither content nor extension identify the image
pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Detect the MIME type of image content from its header bytes
///
/// Returns None for unknown content and for non-image content.
pub fn detect_image_type(header: &[u8]) -> Option<&'static str> {
    infer::get(header)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map(|kind| kind.mime_type())
}

/// MIME type implied by a file extension
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Best-effort MIME type for an image payload
pub fn image_mime_type(bytes: &[u8], path: &Path) -> &'static str {
    detect_image_type(bytes)
        .or_else(|| mime_from_extension(path))
        .unwrap_or(DEFAULT_IMAGE_MIME)
}
