//! Core types shared by the bootstrap pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, StorageError};

/// Positive identifier of a logged-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Validate a raw identifier. Absent and non-positive ids are rejected.
    pub fn new(raw: Option<i64>) -> Result<Self> {
        match raw {
            None => Err(StorageError::invalid_user("no user id supplied")),
            Some(id) if id <= 0 => Err(StorageError::invalid_user(format!(
                "user id must be positive, got {}",
                id
            ))),
            Some(id) => Ok(Self(id)),
        }
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for UserId {
    type Error = StorageError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(Some(value))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two independently versioned database files kept per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    /// Chat, asset and agent data
    Interactive,
    /// Shell command history and autocomplete data
    TerminalHistory,
}

impl StoreKind {
    pub const ALL: [StoreKind; 2] = [StoreKind::Interactive, StoreKind::TerminalHistory];

    /// File name of the per-user database
    pub fn file_name(&self) -> &'static str {
        match self {
            StoreKind::Interactive => "complete_data.db",
            StoreKind::TerminalHistory => "chaterm_data.db",
        }
    }

    /// File name of the packaged seed database
    pub fn seed_file_name(&self) -> &'static str {
        match self {
            StoreKind::Interactive => "init_data.db",
            StoreKind::TerminalHistory => "init_chaterm.db",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Interactive => "interactive",
            StoreKind::TerminalHistory => "terminal-history",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named legacy collections migrated out of the renderer's key/value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSource {
    #[serde(rename = "aliases")]
    Aliases,
    #[serde(rename = "userConfig")]
    UserConfig,
    #[serde(rename = "keyValueStore")]
    KeyValueStore,
}

impl DataSource {
    /// Migration order within one attempt
    pub const ALL: [DataSource; 3] = [
        DataSource::Aliases,
        DataSource::UserConfig,
        DataSource::KeyValueStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Aliases => "aliases",
            DataSource::UserConfig => "userConfig",
            DataSource::KeyValueStore => "keyValueStore",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "aliases" => Some(DataSource::Aliases),
            "userConfig" => Some(DataSource::UserConfig),
            "keyValueStore" => Some(DataSource::KeyValueStore),
            _ => None,
        }
    }

    /// Relational table that receives this source's records
    pub fn destination_table(&self) -> &'static str {
        match self {
            DataSource::Aliases => "t_aliases",
            DataSource::UserConfig => "user_config",
            DataSource::KeyValueStore => "key_value_store",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `indexdb_migration_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatusRecord {
    pub data_source: String,
    pub migrated: bool,
    /// Unix epoch milliseconds
    pub migrated_at: Option<i64>,
    pub record_count: Option<i64>,
    pub error_message: Option<String>,
}

impl MigrationStatusRecord {
    /// Parsed data source, if the stored name is one we know
    pub fn source(&self) -> Option<DataSource> {
        DataSource::from_str(&self.data_source)
    }
}
