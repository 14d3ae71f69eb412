pub mod migrations;
pub mod models;
pub mod relocate;
pub mod repository;
pub mod schema;
pub mod seed;

// Re-export for convenience
pub use models::*;
pub use repository::*;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::utils::fs::{copy_file, move_path, sidecar_path};
use relocate::relocate_legacy_database;
use schema::SyncReport;
use seed::SeedDatabase;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How the user's database file came to exist during bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Already present in the per-user layout
    Existing,
    /// Moved from the pre-multi-user single-file location
    Relocated,
    /// Copied verbatim from the packaged seed
    CreatedFromSeed,
}

#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub placement: Placement,
    pub sync: SyncReport,
}

/// An open connection to one user's store
pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
    kind: StoreKind,
    user_id: UserId,
}

impl Database {
    /// Open an existing database file with the connection settings every
    /// handle uses. Does not touch the schema.
    pub fn open(path: &Path, kind: StoreKind, user_id: UserId) -> Result<Self> {
        let conn = Connection::open(path)?;
        configure_connection(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            kind,
            user_id,
        })
    }

    /// Place, synchronize and open the database for `user_id`
    ///
    /// File placement relocates a legacy single-file database when one exists,
    /// otherwise copies the seed for a brand-new user. A missing seed is only
    /// fatal when there is no existing file to fall back on.
    pub fn bootstrap(
        config: &StorageConfig,
        user_id: UserId,
        kind: StoreKind,
    ) -> Result<(Self, BootstrapOutcome)> {
        let target = config.user_database_path(user_id, kind);

        let placement = if relocate_legacy_database(config, user_id, kind) {
            Placement::Relocated
        } else if target.exists() {
            Placement::Existing
        } else {
            Placement::CreatedFromSeed
        };

        let seed = match SeedDatabase::locate(config, kind) {
            Ok(seed) => Some(seed),
            Err(e) if placement != Placement::CreatedFromSeed => {
                tracing::warn!("Opening existing {} database without a seed: {}", kind, e);
                None
            }
            Err(e) => return Err(e),
        };

        if let (Placement::CreatedFromSeed, Some(seed)) = (placement, &seed) {
            // Staged so an interrupted copy never sits at the target path
            let staging = sidecar_path(&target, ".tmp");
            let bytes = copy_file(&seed.path, &staging)?;
            move_path(&staging, &target)?;
            tracing::info!(
                "Created {} database for user {} from seed ({} bytes)",
                kind,
                user_id,
                bytes
            );
        }

        let db = Self::open(&target, kind, user_id)?;
        let sync = {
            let conn = db.connection()?;
            schema::synchronize(&conn, kind, seed.as_ref())?
        };

        Ok((db, BootstrapOutcome { placement, sync }))
    }

    /// Lock the connection for a batch of statements
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::lock(format!("database connection poisoned: {}", e)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn migration_status(&self, data_source: &str) -> Result<Option<MigrationStatusRecord>> {
        let conn = self.connection()?;
        repository::get_migration_status(&conn, data_source)
    }

    pub fn all_migration_statuses(&self) -> Result<Vec<MigrationStatusRecord>> {
        let conn = self.connection()?;
        repository::get_all_migration_statuses(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("user_id", &self.user_id)
            .finish()
    }
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::debug!("journal_mode stayed {}", mode);
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

/// Create an in-memory interactive-store connection for testing
///
/// The seed schema and all migration steps are applied.
#[cfg(test)]
pub fn create_test_connection() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    conn.execute_batch(seed::seed_sql(StoreKind::Interactive))
        .expect("Failed to apply seed schema");
    schema::synchronize(&conn, StoreKind::Interactive, None).expect("Failed to run migrations");
    conn
}

/// Wrap [`create_test_connection`] in a handle owned by user 1
#[cfg(test)]
pub fn create_test_database() -> Database {
    Database {
        conn: Mutex::new(create_test_connection()),
        path: PathBuf::from(":memory:"),
        kind: StoreKind::Interactive,
        user_id: UserId::new(Some(1)).expect("valid test user"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_with_seeds(dir: &Path) -> StorageConfig {
        let seeds = dir.join("seeds");
        for kind in StoreKind::ALL {
            seed::materialize(kind, &seeds.join(kind.seed_file_name())).unwrap();
        }
        StorageConfig::new(dir.join("data")).with_seed_dirs(vec![seeds])
    }

    #[test]
    fn test_bootstrap_new_user_from_seed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_seeds(dir.path());
        let user = UserId::new(Some(11)).unwrap();

        let (db, outcome) = Database::bootstrap(&config, user, StoreKind::Interactive).unwrap();

        assert_eq!(outcome.placement, Placement::CreatedFromSeed);
        assert!(outcome.sync.steps_failed.is_empty());
        assert_eq!(db.path(), config.user_database_path(user, StoreKind::Interactive));
        assert!(db.all_migration_statuses().unwrap().is_empty());
    }

    #[test]
    fn test_bootstrap_existing_user_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_seeds(dir.path());
        let user = UserId::new(Some(11)).unwrap();

        {
            let (db, _) = Database::bootstrap(&config, user, StoreKind::TerminalHistory).unwrap();
            db.connection()
                .unwrap()
                .execute("INSERT INTO linux_commands_history (command, ip) VALUES ('ls -la', '10.0.0.5')", [])
                .unwrap();
        }

        let (db, outcome) = Database::bootstrap(&config, user, StoreKind::TerminalHistory).unwrap();
        assert_eq!(outcome.placement, Placement::Existing);
        let count: i64 = db
            .connection()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM linux_commands_history", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_interrupted_seed_copy_is_not_an_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_seeds(dir.path());
        let user = UserId::new(Some(14)).unwrap();
        let target = config.user_database_path(user, StoreKind::Interactive);
        let staging = sidecar_path(&target, ".tmp");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&staging, b"SQLite format 3\0trunc").unwrap();

        let (db, outcome) = Database::bootstrap(&config, user, StoreKind::Interactive).unwrap();

        assert_eq!(outcome.placement, Placement::CreatedFromSeed);
        assert!(!staging.exists());
        assert!(outcome.sync.steps_failed.is_empty());
        assert!(db.all_migration_statuses().unwrap().is_empty());
    }

    #[test]
    fn test_bootstrap_without_seed_fails_for_new_user() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::new(dir.path()).with_seed_dirs(vec![dir.path().join("none")]);
        let user = UserId::new(Some(2)).unwrap();

        let err = Database::bootstrap(&config, user, StoreKind::Interactive).unwrap_err();
        assert!(matches!(err, StorageError::SeedMissing { .. }));
        assert!(!config.user_database_path(user, StoreKind::Interactive).exists());
    }

    #[test]
    fn test_bootstrap_without_seed_keeps_existing_user() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_seeds(dir.path());
        let user = UserId::new(Some(2)).unwrap();
        drop(Database::bootstrap(&config, user, StoreKind::Interactive).unwrap());

        fs::remove_dir_all(dir.path().join("seeds")).unwrap();
        let (_db, outcome) = Database::bootstrap(&config, user, StoreKind::Interactive).unwrap();
        assert_eq!(outcome.placement, Placement::Existing);
    }
}
