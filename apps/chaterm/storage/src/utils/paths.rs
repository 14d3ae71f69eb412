//! Path utilities
//!
//! Helpers for paths that come from user-controlled configuration.

use std::path::{Path, PathBuf};

/// Expand a leading `~` to the user's home directory
///
/// # Returns
/// The expanded path, or the input unchanged when it has no tilde or the
/// home directory cannot be determined
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match home_dir() {
        Some(home) if rest.as_os_str().is_empty() => home,
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}
