//! The partial file: `<destination>.part`, appended to in order and renamed
//! over the destination once complete.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const PARTIAL_SUFFIX: &str = ".part";

/// `report.pdf` → `report.pdf.part`.
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut o = destination.as_os_str().to_owned();
    o.push(PARTIAL_SUFFIX);
    PathBuf::from(o)
}

/// Current length of the partial file (0 if absent).
pub fn existing_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Remove the partial file if present.
pub fn discard(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[derive(Debug)]
pub(crate) struct PartialFile {
    file: File,
    path: PathBuf,
    len: u64,
}

impl PartialFile {
    /// Create or truncate; parent directories are created as needed.
    pub(crate) fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len: 0,
        })
    }

    /// Open for appending. Fails if the file is not exactly `expected_len` long.
    pub(crate) fn append(path: &Path, expected_len: u64) -> io::Result<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        let len = file.metadata()?.len();
        if len != expected_len {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "{} changed during resume: {} bytes, expected {}",
                    path.display(),
                    len,
                    expected_len
                ),
            ));
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
        })
    }

    pub(crate) fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.len += data.len() as u64;
        Ok(())
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }

    /// fsync, then atomically rename over `destination`.
    pub(crate) fn finalize(mut self, destination: &Path) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        drop(self.file);
        finalize_path(&self.path, destination)
    }
}

/// Rename an already complete partial file over `destination`.
pub(crate) fn finalize_path(partial: &Path, destination: &Path) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    File::open(partial)?.sync_all()?;
    fs::rename(partial, destination)
}
