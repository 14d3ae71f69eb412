//! Schema synchronization pipeline
//!
//! Brings an opened database up to the current schema:
//! 1. create every table the seed has but the database lacks (using the
//!    seed's own `CREATE` statement, plus the seed's indexes on that table)
//! 2. run the store's migration steps in their fixed order
//!
//! Non-critical failures are logged and skipped so the application can start
//! on a partially upgraded schema. Critical steps propagate.

use rusqlite::Connection;
use std::collections::HashSet;

use super::migrations::{steps_for, table_exists};
use super::models::StoreKind;
use super::seed::{schema_objects, SeedDatabase};
use crate::error::{Result, StorageError};

/// What one synchronization pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Tables copied over from the seed definition
    pub tables_created: Vec<String>,
    /// Steps that ran to completion (including ones with nothing to do)
    pub steps_completed: Vec<&'static str>,
    /// Non-critical steps that failed and were skipped
    pub steps_failed: Vec<&'static str>,
}

/// Run the full pipeline against `conn`
///
/// `seed` is optional so an existing user can still start when the packaged
/// seed is missing; table reconciliation is skipped in that case.
pub fn synchronize(
    conn: &Connection,
    kind: StoreKind,
    seed: Option<&SeedDatabase>,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    match seed {
        Some(seed) => match create_missing_tables(conn, seed) {
            Ok(created) => report.tables_created = created,
            Err(e) => tracing::error!("Seed table reconciliation failed for {} store: {}", kind, e),
        },
        None => tracing::warn!("No seed available for {} store, skipping table reconciliation", kind),
    }

    for step in steps_for(kind) {
        match (step.run)(conn) {
            Ok(()) => {
                tracing::debug!("Migration step '{}' done", step.name);
                report.steps_completed.push(step.name);
            }
            Err(source) if step.critical => {
                tracing::error!("Critical migration step '{}' failed: {}", step.name, source);
                return Err(StorageError::SchemaStep {
                    step: step.name,
                    source,
                });
            }
            Err(e) => {
                tracing::error!("Migration step '{}' failed, continuing: {}", step.name, e);
                report.steps_failed.push(step.name);
            }
        }
    }

    tracing::info!(
        "Schema sync for {} store: {} tables created, {} steps done, {} failed",
        kind,
        report.tables_created.len(),
        report.steps_completed.len(),
        report.steps_failed.len()
    );
    Ok(report)
}

/// Create tables present in the seed but absent from `conn`
///
/// # Returns
/// Names of the tables created
pub fn create_missing_tables(conn: &Connection, seed: &SeedDatabase) -> Result<Vec<String>> {
    let seed_tables = seed.tables()?;
    let mut created = Vec::new();

    for table in &seed_tables {
        if table_exists(conn, &table.name)? {
            continue;
        }
        match conn.execute_batch(&table.sql) {
            Ok(()) => {
                tracing::info!("Created missing table {} from seed", table.name);
                created.push(table.name.clone());
            }
            Err(e) => tracing::error!("Failed to create table {} from seed: {}", table.name, e),
        }
    }

    if created.is_empty() {
        return Ok(created);
    }

    let created_set: HashSet<&str> = created.iter().map(String::as_str).collect();
    let existing: HashSet<String> = schema_objects(conn, "index")?
        .into_iter()
        .map(|index| index.name)
        .collect();

    for index in seed.indexes()? {
        if !created_set.contains(index.table.as_str()) || existing.contains(&index.name) {
            continue;
        }
        if let Err(e) = conn.execute_batch(&index.sql) {
            tracing::error!("Failed to create index {} from seed: {}", index.name, e);
        }
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::{column_exists, index_exists};
    use crate::db::seed::materialize;

    fn seed_in(dir: &std::path::Path, kind: StoreKind) -> SeedDatabase {
        let path = dir.join(kind.seed_file_name());
        materialize(kind, &path).unwrap();
        SeedDatabase { kind, path }
    }

    fn schema_snapshot(conn: &Connection) -> Vec<(String, String, Option<String>)> {
        conn.prepare("SELECT type, name, sql FROM sqlite_master ORDER BY type, name")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_synchronize_twice_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        for kind in StoreKind::ALL {
            let seed = seed_in(dir.path(), kind);
            let conn = Connection::open_in_memory().unwrap();
            conn.execute_batch(crate::db::seed::seed_sql(kind)).unwrap();

            let first = synchronize(&conn, kind, Some(&seed)).unwrap();
            assert!(first.steps_failed.is_empty());
            let after_first = schema_snapshot(&conn);

            let second = synchronize(&conn, kind, Some(&seed)).unwrap();
            assert!(second.steps_failed.is_empty());
            assert!(second.tables_created.is_empty());
            assert_eq!(after_first, schema_snapshot(&conn));
        }
    }

    #[test]
    fn test_missing_table_recreated_from_seed() {
        let dir = tempfile::tempdir().unwrap();
        let seed = seed_in(dir.path(), StoreKind::Interactive);
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(crate::db::seed::seed_sql(StoreKind::Interactive))
            .unwrap();
        conn.execute_batch("DROP TABLE agent_ui_messages;").unwrap();

        let report = synchronize(&conn, StoreKind::Interactive, Some(&seed)).unwrap();

        assert_eq!(report.tables_created, vec!["agent_ui_messages".to_string()]);
        assert!(index_exists(&conn, "idx_ui_messages_task").unwrap());
        // Steps still run on the recreated table
        assert!(column_exists(&conn, "agent_ui_messages", "mcp_tool_call_data").unwrap());
    }

    #[test]
    fn test_broken_step_is_skipped() {
        // No seed and no agent_task_metadata table: that step fails, others run
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(crate::db::seed::seed_sql(StoreKind::Interactive))
            .unwrap();
        conn.execute_batch("DROP TABLE agent_task_metadata;").unwrap();

        let report = synchronize(&conn, StoreKind::Interactive, None).unwrap();
        assert_eq!(report.steps_failed, vec!["task_metadata_add_title"]);
        assert!(table_exists(&conn, "indexdb_migration_status").unwrap());
        assert!(index_exists(&conn, "idx_assets_unique").unwrap());
    }

    #[test]
    fn test_critical_step_failure_propagates() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(crate::db::seed::seed_sql(StoreKind::Interactive))
            .unwrap();
        conn.execute_batch("DROP TABLE t_assets;").unwrap();

        let err = synchronize(&conn, StoreKind::Interactive, None).unwrap_err();
        assert!(matches!(
            err,
            StorageError::SchemaStep {
                step: "assets_unique_index",
                ..
            }
        ));
    }
}
