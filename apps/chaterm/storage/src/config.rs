//! Storage configuration
//!
//! Resolves where per-user databases live, where the packaged seed databases
//! are searched for, and the timing knobs of the legacy migration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::models::{StoreKind, UserId};
use crate::error::{Result, StorageError};
use crate::utils::paths::expand_tilde;

/// Default wait for one legacy data response from the renderer
pub const DEFAULT_BRIDGE_TIMEOUT_MS: u64 = 30_000;

/// Default number of whole-batch legacy migration attempts
pub const DEFAULT_LEGACY_MAX_ATTEMPTS: u32 = 3;

/// Base delay between legacy migration attempts
pub const DEFAULT_LEGACY_RETRY_DELAY_MS: u64 = 1_000;

const DEFAULT_STORE_DIR: &str = "databases";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// Application data root
    pub app_data_dir: PathBuf,
    /// Directory under `app_data_dir` holding per-user database folders
    pub store_dir: String,
    /// Ordered list of directories searched for seed databases
    pub seed_dirs: Vec<PathBuf>,
    pub bridge_timeout_ms: u64,
    pub legacy_max_attempts: u32,
    pub legacy_retry_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            app_data_dir: default_app_data_dir(),
            store_dir: DEFAULT_STORE_DIR.to_string(),
            seed_dirs: default_seed_dirs(None),
            bridge_timeout_ms: DEFAULT_BRIDGE_TIMEOUT_MS,
            legacy_max_attempts: DEFAULT_LEGACY_MAX_ATTEMPTS,
            legacy_retry_delay_ms: DEFAULT_LEGACY_RETRY_DELAY_MS,
        }
    }
}

impl StorageConfig {
    /// Create a config rooted at an explicit data directory
    pub fn new(app_data_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_data_dir: app_data_dir.into(),
            ..Self::default()
        }
    }

    /// Build the config from defaults plus environment overrides
    ///
    /// - `CHATERM_DATA_DIR`: application data root
    /// - `CHATERM_RESOURCES_DIR`: packaged resources directory (seeds live in `db/`)
    /// - `CHATERM_BRIDGE_TIMEOUT_MS`: renderer response timeout
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("CHATERM_DATA_DIR") {
            config.app_data_dir = expand_tilde(Path::new(&dir));
        }

        if let Ok(dir) = std::env::var("CHATERM_RESOURCES_DIR") {
            config.seed_dirs = default_seed_dirs(Some(&expand_tilde(Path::new(&dir))));
        }

        if let Ok(raw) = std::env::var("CHATERM_BRIDGE_TIMEOUT_MS") {
            config.bridge_timeout_ms = raw.parse().map_err(|_| {
                StorageError::config(format!("CHATERM_BRIDGE_TIMEOUT_MS is not a number: {}", raw))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file; missing fields fall back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.app_data_dir = expand_tilde(&config.app_data_dir);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_data_dir.as_os_str().is_empty() {
            return Err(StorageError::config("app data directory is empty"));
        }
        if self.store_dir.is_empty() || self.store_dir.contains(['/', '\\']) {
            return Err(StorageError::config(format!(
                "store dir must be a single path component, got '{}'",
                self.store_dir
            )));
        }
        if self.legacy_max_attempts == 0 {
            return Err(StorageError::config("legacy max attempts must be at least 1"));
        }
        Ok(())
    }

    pub fn with_seed_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.seed_dirs = dirs;
        self
    }

    pub fn with_bridge_timeout(mut self, timeout: Duration) -> Self {
        self.bridge_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_legacy_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.legacy_max_attempts = max_attempts;
        self.legacy_retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }

    pub fn legacy_retry_delay(&self) -> Duration {
        Duration::from_millis(self.legacy_retry_delay_ms)
    }

    /// `<app-data>/<store-dir>`
    pub fn store_root(&self) -> PathBuf {
        self.app_data_dir.join(&self.store_dir)
    }

    /// `<app-data>/<store-dir>/<userId>`
    pub fn user_dir(&self, user_id: UserId) -> PathBuf {
        self.store_root().join(user_id.to_string())
    }

    /// `<app-data>/<store-dir>/<userId>/<file>`
    pub fn user_database_path(&self, user_id: UserId, kind: StoreKind) -> PathBuf {
        self.user_dir(user_id).join(kind.file_name())
    }

    /// Single-file location used before databases were split per user
    pub fn legacy_database_path(&self, kind: StoreKind) -> PathBuf {
        self.store_root().join(kind.file_name())
    }
}

fn default_app_data_dir() -> PathBuf {
    ProjectDirs::from("com", "chaterm", "chaterm")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".chaterm"))
}

/// Packaged resources first, then the source tree, then the working directory.
fn default_seed_dirs(resources_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(resources) = resources_dir {
        dirs.push(resources.join("db"));
    }
    dirs.push(Path::new(env!("CARGO_MANIFEST_DIR")).join("resources").join("db"));
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.join("resources").join("db"));
    }
    dirs
}
