//! Default destination paths for documents enqueued without one.
//!
//! Layout: `<library_dir>/<source>/<filename>`, where the filename comes from
//! the last URL path segment and both components are made safe for Linux.

mod filename;

use std::path::{Path, PathBuf};

pub use filename::{filename_from_url_path, sanitize_filename_for_linux, sanitize_source_dir};

/// Used when the URL path yields nothing usable.
const DEFAULT_FILENAME: &str = "document.bin";

/// Safe filename for `url`, falling back to a generic name.
pub fn derive_filename(url: &str) -> String {
    filename_from_url_path(url)
        .map(|raw| sanitize_filename_for_linux(&raw))
        .filter(|s| !s.is_empty() && s != "." && s != "..")
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

/// `<library_dir>/<source>/<filename-from-url>`.
pub fn default_destination(library_dir: &Path, source_id: &str, url: &str) -> PathBuf {
    library_dir
        .join(sanitize_source_dir(source_id))
        .join(derive_filename(url))
}
