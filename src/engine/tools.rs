//! Path filters and time helpers

use chrono::{DateTime, TimeDelta, Utc};
use std::path::Path;

/// Check if a file should be excluded based on OS-specific hidden files
pub fn is_os_hidden_file(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        match name {
            // macOS
            ".DS_Store" | ".AppleDouble" | ".LSOverride" => true,
            // Windows
            "Thumbs.db" | "ehthumbs.db" | "Desktop.ini" => true,
            // Linux
            ".directory" => true,
            _ => {
                // macOS resource fork files start with ._
                name.starts_with("._")
            }
        }
    } else {
        false
    }
}

/// Returns true if `path` is a unit for a source filtering on `suffix`.
/// The match is on the whole path string, so a suffix may span the extension (`_EHZ.h5`).
pub fn should_include_unit(path: &Path, suffix: &str) -> bool {
    if is_os_hidden_file(path) {
        return false;
    }
    path.to_string_lossy().ends_with(suffix)
}

/// Largest multiple of `interval` (counted from the Unix epoch) not after `t`.
/// Returns `t` unchanged for a non-positive interval.
pub fn align_down(t: DateTime<Utc>, interval: TimeDelta) -> DateTime<Utc> {
    let step = interval.num_seconds();
    if step <= 0 {
        return t;
    }
    let secs = t.timestamp();
    let aligned = secs - secs.rem_euclid(step);
    DateTime::from_timestamp(aligned, 0).unwrap_or(t)
}
