//! Filesystem utilities for database placement
//!
//! Thin wrappers over `std::fs` that map failures into [`StorageError`].

use std::fs;
use std::path::Path;

use crate::error::{Result, StorageError};

/// Suffixes of the SQLite companion files that travel with a database
pub const SIDECAR_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(StorageError::Io)
}

/// Create the parent directory of `path` if it does not exist yet
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            create_dir_all(parent)
        }
        _ => Ok(()),
    }
}

/// Move a file
pub fn move_path(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(StorageError::Io)
}

/// Copy a file, creating the destination directory first
///
/// # Returns
/// The number of bytes copied
pub fn copy_file(from: &Path, to: &Path) -> Result<u64> {
    ensure_parent_dir(to)?;
    fs::copy(from, to).map_err(StorageError::Io)
}

/// Companion path for a database file (`-wal`, `-shm`, `.tmp`)
pub fn sidecar_path(db_path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(suffix);
    name.into()
}
