//! Repository for `indexdb_migration_status`
//!
//! Only the legacy store migrator writes these rows; everything else reads
//! them for diagnostics.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{DataSource, MigrationStatusRecord};
use crate::error::Result;

fn map_record(row: &Row<'_>) -> rusqlite::Result<MigrationStatusRecord> {
    Ok(MigrationStatusRecord {
        data_source: row.get(0)?,
        migrated: row.get::<_, i64>(1)? != 0,
        migrated_at: row.get(2)?,
        record_count: row.get(3)?,
        error_message: row.get(4)?,
    })
}

/// Get the status row of one data source
pub fn get_migration_status(
    conn: &Connection,
    data_source: &str,
) -> Result<Option<MigrationStatusRecord>> {
    let record = conn
        .query_row(
            r#"
            SELECT data_source, migrated, migrated_at, record_count, error_message
            FROM indexdb_migration_status WHERE data_source = ?1
            "#,
            [data_source],
            map_record,
        )
        .optional()?;
    Ok(record)
}

/// Get every status row, ordered by data source name
pub fn get_all_migration_statuses(conn: &Connection) -> Result<Vec<MigrationStatusRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT data_source, migrated, migrated_at, record_count, error_message
        FROM indexdb_migration_status ORDER BY data_source
        "#,
    )?;
    let records = stmt
        .query_map([], map_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// Write the status of one source, replacing any previous row
pub fn upsert_migration_status(
    conn: &Connection,
    source: DataSource,
    migrated: bool,
    record_count: i64,
    error_message: Option<&str>,
) -> Result<()> {
    let migrated_at = migrated.then(|| chrono::Utc::now().timestamp_millis());
    conn.execute(
        r#"
        INSERT OR REPLACE INTO indexdb_migration_status
            (data_source, migrated, migrated_at, record_count, error_message)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            source.as_str(),
            migrated as i64,
            migrated_at,
            record_count,
            error_message
        ],
    )?;
    Ok(())
}

/// Delete the status row of one source so it is migrated again
pub fn delete_migration_status(conn: &Connection, source: DataSource) -> Result<()> {
    conn.execute(
        "DELETE FROM indexdb_migration_status WHERE data_source = ?1",
        [source.as_str()],
    )?;
    Ok(())
}

/// Delete every status row
///
/// # Returns
/// Number of rows removed
pub fn clear_migration_statuses(conn: &Connection) -> Result<usize> {
    let removed = conn.execute("DELETE FROM indexdb_migration_status", [])?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_connection;

    #[test]
    fn test_upsert_and_get() {
        let conn = create_test_connection();
        upsert_migration_status(&conn, DataSource::Aliases, true, 4, None).unwrap();

        let record = get_migration_status(&conn, "aliases").unwrap().unwrap();
        assert!(record.migrated);
        assert_eq!(record.record_count, Some(4));
        assert!(record.migrated_at.is_some());
        assert_eq!(record.source(), Some(DataSource::Aliases));
    }

    #[test]
    fn test_upsert_overwrites() {
        let conn = create_test_connection();
        upsert_migration_status(&conn, DataSource::UserConfig, false, 0, Some("timeout"))
            .unwrap();
        upsert_migration_status(&conn, DataSource::UserConfig, true, 1, None).unwrap();

        let all = get_all_migration_statuses(&conn).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].migrated);
        assert_eq!(all[0].error_message, None);
    }

    #[test]
    fn test_failed_status_has_no_timestamp() {
        let conn = create_test_connection();
        upsert_migration_status(&conn, DataSource::KeyValueStore, false, 0, Some("boom"))
            .unwrap();
        let record = get_migration_status(&conn, "keyValueStore").unwrap().unwrap();
        assert_eq!(record.migrated_at, None);
        assert_eq!(record.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_delete_and_clear() {
        let conn = create_test_connection();
        for source in DataSource::ALL {
            upsert_migration_status(&conn, source, true, 0, None).unwrap();
        }

        delete_migration_status(&conn, DataSource::Aliases).unwrap();
        assert!(get_migration_status(&conn, "aliases").unwrap().is_none());

        assert_eq!(clear_migration_statuses(&conn).unwrap(), 2);
        assert!(get_all_migration_statuses(&conn).unwrap().is_empty());
    }
}
