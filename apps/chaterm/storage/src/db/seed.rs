//! Packaged seed databases
//!
//! A seed is a read-only reference database shipped with the application.
//! New user databases are copied from it verbatim, and schema sync treats it
//! as the source of truth for which tables should exist.

use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

use super::models::StoreKind;
use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::utils::fs::ensure_parent_dir;

const INIT_DATA_SQL: &str = include_str!("../../resources/db/init_data.sql");
const INIT_CHATERM_SQL: &str = include_str!("../../resources/db/init_chaterm.sql");

/// Schema source the packaged seed file is built from
pub fn seed_sql(kind: StoreKind) -> &'static str {
    match kind {
        StoreKind::Interactive => INIT_DATA_SQL,
        StoreKind::TerminalHistory => INIT_CHATERM_SQL,
    }
}

/// `CREATE` statement of one schema object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub name: String,
    pub table: String,
    pub sql: String,
}

#[derive(Debug, Clone)]
pub struct SeedDatabase {
    pub kind: StoreKind,
    pub path: PathBuf,
}

impl SeedDatabase {
    /// Find the packaged seed for `kind`, searching `config.seed_dirs` in order
    pub fn locate(config: &StorageConfig, kind: StoreKind) -> Result<Self> {
        let searched: Vec<PathBuf> = config
            .seed_dirs
            .iter()
            .map(|dir| dir.join(kind.seed_file_name()))
            .collect();

        match searched.iter().find(|candidate| candidate.is_file()) {
            Some(path) => {
                tracing::debug!("Using {} seed database at {}", kind, path.display());
                Ok(Self {
                    kind,
                    path: path.clone(),
                })
            }
            None => Err(StorageError::SeedMissing { kind, searched }),
        }
    }

    /// Open the seed without any write access
    pub fn open_read_only(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    /// Tables defined by the seed, in creation order
    pub fn tables(&self) -> Result<Vec<SchemaObject>> {
        let conn = self.open_read_only()?;
        schema_objects(&conn, "table")
    }

    /// Indexes defined by the seed
    pub fn indexes(&self) -> Result<Vec<SchemaObject>> {
        let conn = self.open_read_only()?;
        schema_objects(&conn, "index")
    }
}

/// Build a seed database file for `kind` at `path`
///
/// Used by the packaging step and by tests. An existing file is replaced.
pub fn materialize(kind: StoreKind, path: &Path) -> Result<()> {
    ensure_parent_dir(path)?;
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let conn = Connection::open(path)?;
    conn.execute_batch(seed_sql(kind))?;
    Ok(())
}

/// User-visible schema objects of one type, excluding SQLite internals and
/// auto-created constraint indexes (those have no SQL)
pub fn schema_objects(conn: &Connection, object_type: &str) -> Result<Vec<SchemaObject>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT name, tbl_name, sql FROM sqlite_master
        WHERE type = ?1 AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL
        ORDER BY rowid
        "#,
    )?;

    let objects = stmt
        .query_map([object_type], |row| {
            Ok(SchemaObject {
                name: row.get(0)?,
                table: row.get(1)?,
                sql: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(objects)
}
