//! Migration step library
//!
//! There is no version table: each step inspects the current structure and only
//! acts when its change is missing, so re-running every step against an
//! up-to-date database is a no-op. Steps are additive. They add columns,
//! create tables and indexes, and backfill values into rows that lack them.

use rusqlite::{params, Connection, Result};

use super::models::StoreKind;

/// Rows updated per transaction when backfilling generated values
const BACKFILL_BATCH_SIZE: usize = 500;

/// One self-describing, idempotent schema change
pub struct MigrationStep {
    pub name: &'static str,
    /// A failing critical step aborts schema sync instead of being skipped
    pub critical: bool,
    pub run: fn(&Connection) -> Result<()>,
}

/// Steps for the interactive store, in the order they must run
pub const INTERACTIVE_STEPS: &[MigrationStep] = &[
    MigrationStep {
        name: "assets_add_uuid",
        critical: false,
        run: assets_add_uuid,
    },
    // Needs the uuid column from the step above
    MigrationStep {
        name: "assets_uuid_index",
        critical: false,
        run: assets_uuid_index,
    },
    MigrationStep {
        name: "assets_add_proxy_columns",
        critical: false,
        run: assets_add_proxy_columns,
    },
    MigrationStep {
        name: "snippets_add_sort_order",
        critical: false,
        run: snippets_add_sort_order,
    },
    MigrationStep {
        name: "ui_messages_add_mcp_data",
        critical: false,
        run: ui_messages_add_mcp_data,
    },
    MigrationStep {
        name: "task_metadata_add_title",
        critical: false,
        run: task_metadata_add_title,
    },
    MigrationStep {
        name: "create_key_value_store",
        critical: false,
        run: create_key_value_store,
    },
    MigrationStep {
        name: "create_user_config",
        critical: false,
        run: create_user_config,
    },
    MigrationStep {
        name: "create_migration_status",
        critical: false,
        run: create_migration_status,
    },
    MigrationStep {
        name: "assets_unique_index",
        critical: true,
        run: assets_unique_index,
    },
];

/// Steps for the terminal-history store, in the order they must run
pub const HISTORY_STEPS: &[MigrationStep] = &[
    MigrationStep {
        name: "history_add_ip",
        critical: false,
        run: history_add_ip,
    },
    // Needs the ip column from the step above
    MigrationStep {
        name: "history_command_ip_index",
        critical: false,
        run: history_command_ip_index,
    },
    MigrationStep {
        name: "create_eviction_config",
        critical: false,
        run: create_eviction_config,
    },
];

pub fn steps_for(kind: StoreKind) -> &'static [MigrationStep] {
    match kind {
        StoreKind::Interactive => INTERACTIVE_STEPS,
        StoreKind::TerminalHistory => HISTORY_STEPS,
    }
}

// =========================================================================
// Structure inspection
// =========================================================================

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn index_exists(conn: &Connection, index: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
        [index],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    conn.prepare(&format!("PRAGMA table_info({})", table))?
        .query_map([], |row| row.get::<_, String>(1))?
        .collect()
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    Ok(table_columns(conn, table)?.iter().any(|c| c == column))
}

/// `ALTER TABLE .. ADD COLUMN` unless the column is already there
///
/// # Returns
/// true if the column was added
fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<bool> {
    if column_exists(conn, table, column)? {
        return Ok(false);
    }
    conn.execute_batch(&format!(
        "ALTER TABLE {} ADD COLUMN {} {};",
        table, column, definition
    ))?;
    tracing::info!("Added column {}.{}", table, column);
    Ok(true)
}

/// Give every row of `table` whose `column` is NULL a fresh UUID
///
/// Each batch runs in its own transaction.
///
/// # Returns
/// Number of rows backfilled
fn backfill_uuids(conn: &Connection, table: &str, column: &str) -> Result<usize> {
    let select = format!(
        "SELECT rowid FROM {} WHERE {} IS NULL LIMIT {}",
        table, column, BACKFILL_BATCH_SIZE
    );
    let update = format!("UPDATE {} SET {} = ?1 WHERE rowid = ?2", table, column);
    let mut total = 0;

    loop {
        let ids: Vec<i64> = conn
            .prepare(&select)?
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        if ids.is_empty() {
            break;
        }

        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&update)?;
            for id in &ids {
                stmt.execute(params![uuid::Uuid::new_v4().to_string(), id])?;
            }
        }
        tx.commit()?;
        total += ids.len();
    }

    if total > 0 {
        tracing::info!("Backfilled {} {}.{} values", total, table, column);
    }
    Ok(total)
}

// =========================================================================
// Interactive store steps
// =========================================================================

fn assets_add_uuid(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "t_assets", "uuid", "TEXT")?;
    backfill_uuids(conn, "t_assets", "uuid")?;
    Ok(())
}

fn assets_uuid_index(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_assets_uuid ON t_assets(uuid);")
}

fn assets_add_proxy_columns(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "t_assets", "need_proxy", "INTEGER DEFAULT 0")?;
    add_column_if_missing(conn, "t_assets", "proxy_name", "TEXT")?;
    Ok(())
}

/// Adds `sort_order` and numbers existing snippets by creation time
///
/// When the column already exists, only unnumbered rows are filled, placed
/// after the current highest position so a user's custom order survives.
fn snippets_add_sort_order(conn: &Connection) -> Result<()> {
    let added = add_column_if_missing(conn, "user_snippet_v1", "sort_order", "INTEGER")?;
    let (filter, base) = if added {
        ("", 0)
    } else {
        let missing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM user_snippet_v1 WHERE sort_order IS NULL",
            [],
            |row| row.get(0),
        )?;
        if missing == 0 {
            return Ok(());
        }
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order), 0) FROM user_snippet_v1",
            [],
            |row| row.get(0),
        )?;
        ("WHERE sort_order IS NULL", max)
    };

    let tx = conn.unchecked_transaction()?;
    {
        let ids: Vec<i64> = tx
            .prepare(&format!(
                "SELECT id FROM user_snippet_v1 {} ORDER BY created_at ASC, id ASC",
                filter
            ))?
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;

        let mut stmt = tx.prepare("UPDATE user_snippet_v1 SET sort_order = ?1 WHERE id = ?2")?;
        for (position, id) in ids.iter().enumerate() {
            stmt.execute(params![base + (position as i64 + 1) * 10, id])?;
        }
    }
    tx.commit()
}

fn ui_messages_add_mcp_data(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "agent_ui_messages", "mcp_tool_call_data", "TEXT")?;
    Ok(())
}

fn task_metadata_add_title(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "agent_task_metadata", "title", "TEXT")?;
    add_column_if_missing(conn, "agent_task_metadata", "favorite", "INTEGER DEFAULT 0")?;
    Ok(())
}

fn create_key_value_store(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS key_value_store (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at INTEGER
        );
        "#,
    )
}

fn create_user_config(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS user_config (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            config TEXT NOT NULL,
            updated_at INTEGER
        );
        "#,
    )
}

fn create_migration_status(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS indexdb_migration_status (
            data_source TEXT PRIMARY KEY,
            migrated INTEGER NOT NULL DEFAULT 0,
            migrated_at INTEGER,
            record_count INTEGER,
            error_message TEXT
        );
        "#,
    )
}

/// Collapses duplicate assets to the highest id per group, then enforces
/// uniqueness on (asset_ip, username, port, label, asset_type)
fn assets_unique_index(conn: &Connection) -> Result<()> {
    if index_exists(conn, "idx_assets_unique")? {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    let removed = tx.execute(
        r#"
        DELETE FROM t_assets
        WHERE id NOT IN (
            SELECT MAX(id) FROM t_assets
            GROUP BY asset_ip, username, port, label, asset_type
        )
        "#,
        [],
    )?;
    if removed > 0 {
        tracing::warn!("Removed {} duplicate asset rows before adding unique index", removed);
    }
    tx.execute_batch(
        r#"
        CREATE UNIQUE INDEX idx_assets_unique
            ON t_assets(asset_ip, username, port, label, asset_type);
        "#,
    )?;
    tx.commit()
}

// =========================================================================
// Terminal-history store steps
// =========================================================================

fn history_add_ip(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "linux_commands_history", "ip", "TEXT")?;
    Ok(())
}

fn history_command_ip_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_history_command_ip ON linux_commands_history(command, ip);",
    )
}

fn create_eviction_config(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS eviction_config (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            enabled INTEGER NOT NULL DEFAULT 1,
            max_history_rows INTEGER NOT NULL DEFAULT 10000,
            max_age_days INTEGER NOT NULL DEFAULT 180,
            updated_at INTEGER
        );

        INSERT OR IGNORE INTO eviction_config (id) VALUES (1);
        "#,
    )
}
