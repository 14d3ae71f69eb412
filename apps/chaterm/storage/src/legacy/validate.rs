//! Post-migration checks
//!
//! A status row saying "migrated" is only trusted once the destination table
//! agrees with it. Any failed check deletes the row so the source is migrated
//! again on the next attempt.

use rusqlite::Connection;

use crate::db::models::DataSource;
use crate::db::repository::{delete_migration_status, get_migration_status};
use crate::error::Result;

/// Validate one source against the record count it should have
///
/// Checks, in order: the status row exists and is migrated, its recorded
/// count equals `expected`, the destination is non-empty when `expected` is
/// non-zero, and for aliases no row lacks a required field.
pub fn validate_source(conn: &Connection, source: DataSource, expected: i64) -> Result<bool> {
    match failed_check(conn, source, expected)? {
        None => Ok(true),
        Some(reason) => {
            tracing::warn!("Legacy source '{}' failed validation: {}", source, reason);
            delete_migration_status(conn, source)?;
            Ok(false)
        }
    }
}

fn failed_check(conn: &Connection, source: DataSource, expected: i64) -> Result<Option<String>> {
    let record = match get_migration_status(conn, source.as_str())? {
        Some(record) if record.migrated => record,
        Some(_) => return Ok(Some("status row is not marked migrated".to_string())),
        None => return Ok(Some("no status row".to_string())),
    };

    let recorded = record.record_count.unwrap_or(0);
    if recorded != expected {
        return Ok(Some(format!(
            "recorded count {} does not match expected {}",
            recorded, expected
        )));
    }

    if expected > 0 {
        let actual = destination_count(conn, source)?;
        if actual == 0 {
            return Ok(Some(format!(
                "{} is empty but {} records were migrated",
                source.destination_table(),
                expected
            )));
        }
    }

    if source == DataSource::Aliases {
        let incomplete: i64 = conn.query_row(
            "SELECT COUNT(*) FROM t_aliases WHERE alias IS NULL OR command IS NULL",
            [],
            |row| row.get(0),
        )?;
        if incomplete > 0 {
            return Ok(Some(format!("{} aliases lack alias or command", incomplete)));
        }
    }

    Ok(None)
}

/// Rows currently in the destination table of `source`
pub fn destination_count(conn: &Connection, source: DataSource) -> Result<i64> {
    let count = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", source.destination_table()),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
