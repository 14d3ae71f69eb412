//! Writers for the three legacy collections
//!
//! Each writer takes the raw payload the renderer sent and stores it in its
//! destination table inside a single transaction. Nothing is visible until
//! every record of the payload has been written. Key/value entries are
//! stored as JSON text so strings and numbers stay distinguishable.

use std::collections::HashSet;

use rusqlite::{params, Connection};
use serde_json::{Map, Value};

use crate::db::models::DataSource;
use crate::error::{Result, StorageError};

/// Empty legacy state: nothing was ever stored under this source
pub fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Write a non-empty payload for `source`
///
/// # Returns
/// Number of distinct rows written. Records repeating an alias or key
/// overwrite the earlier one and are counted once.
pub fn write_source(conn: &Connection, source: DataSource, payload: &Value) -> Result<i64> {
    match source {
        DataSource::Aliases => write_aliases(conn, payload),
        DataSource::UserConfig => write_user_config(conn, payload),
        DataSource::KeyValueStore => write_key_value_store(conn, payload),
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn write_aliases(conn: &Connection, payload: &Value) -> Result<i64> {
    let records = payload.as_array().ok_or_else(|| {
        StorageError::validation(format!(
            "aliases payload must be an array, got {}",
            type_name(payload)
        ))
    })?;

    let now = now_millis();
    let tx = conn.unchecked_transaction()?;
    let mut written = HashSet::new();
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO t_aliases (alias, command, created_at) VALUES (?1, ?2, ?3)",
        )?;
        for record in records {
            let alias = record.get("alias").and_then(Value::as_str);
            let command = record.get("command").and_then(Value::as_str);
            let (Some(alias), Some(command)) = (alias, command) else {
                tracing::warn!("Skipping legacy alias without alias/command: {}", record);
                continue;
            };
            let created_at = match record.get("createdAt") {
                None | Some(Value::Null) => now,
                Some(value) => value.as_i64().unwrap_or_else(|| {
                    tracing::warn!(
                        "Alias '{}' has unusable createdAt {}, using current time",
                        alias,
                        value
                    );
                    now
                }),
            };
            stmt.execute(params![alias, command, created_at])?;
            written.insert(alias);
        }
    }
    tx.commit()?;
    Ok(written.len() as i64)
}

fn write_user_config(conn: &Connection, payload: &Value) -> Result<i64> {
    if !payload.is_object() {
        return Err(StorageError::validation(format!(
            "userConfig payload must be an object, got {}",
            type_name(payload)
        )));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT OR REPLACE INTO user_config (id, config, updated_at) VALUES (1, ?1, ?2)",
        params![serde_json::to_string(payload)?, now_millis()],
    )?;
    tx.commit()?;
    Ok(1)
}

fn write_key_value_store(conn: &Connection, payload: &Value) -> Result<i64> {
    let entries: Vec<(String, &Value)> = match payload {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item.get("key").and_then(Value::as_str) {
                Some(key) => Some((key.to_string(), item.get("value").unwrap_or(&Value::Null))),
                None => {
                    tracing::warn!("Skipping legacy key/value record without key: {}", item);
                    None
                }
            })
            .collect(),
        Value::Object(map) => object_entries(map),
        other => {
            return Err(StorageError::validation(format!(
                "keyValueStore payload must be an array or object, got {}",
                type_name(other)
            )))
        }
    };

    let now = now_millis();
    let tx = conn.unchecked_transaction()?;
    let mut written = HashSet::new();
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO key_value_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
        )?;
        for (key, value) in &entries {
            stmt.execute(params![key, serde_json::to_string(value)?, now])?;
            written.insert(key.as_str());
        }
    }
    tx.commit()?;
    Ok(written.len() as i64)
}

fn object_entries(map: &Map<String, Value>) -> Vec<(String, &Value)> {
    map.iter().map(|(k, v)| (k.clone(), v)).collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_connection;
    use serde_json::json;

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_empty_payloads() {
        assert!(is_empty_payload(&Value::Null));
        assert!(is_empty_payload(&json!([])));
        assert!(is_empty_payload(&json!({})));
        assert!(!is_empty_payload(&json!([{ "key": "a" }])));
        assert!(!is_empty_payload(&json!(0)));
    }

    #[test]
    fn test_aliases_skip_incomplete_records() {
        let conn = create_test_connection();
        let payload = json!([
            { "alias": "ll", "command": "ls -la", "createdAt": 1700000000000i64 },
            { "alias": "gs" },
            { "alias": "k", "command": "kubectl" }
        ]);

        assert_eq!(write_source(&conn, DataSource::Aliases, &payload).unwrap(), 2);
        assert_eq!(count(&conn, "t_aliases"), 2);
        let created_at: i64 = conn
            .query_row("SELECT created_at FROM t_aliases WHERE alias = 'll'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(created_at, 1700000000000);
    }

    #[test]
    fn test_rewriting_aliases_replaces_rows() {
        let conn = create_test_connection();
        let payload = json!([{ "alias": "ll", "command": "ls -la" }]);
        write_source(&conn, DataSource::Aliases, &payload).unwrap();
        write_source(&conn, DataSource::Aliases, &payload).unwrap();
        assert_eq!(count(&conn, "t_aliases"), 1);
    }

    #[test]
    fn test_user_config_single_row() {
        let conn = create_test_connection();
        let payload = json!({ "theme": "dark", "fontSize": 14 });
        assert_eq!(write_source(&conn, DataSource::UserConfig, &payload).unwrap(), 1);

        let stored: String = conn
            .query_row("SELECT config FROM user_config WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(serde_json::from_str::<Value>(&stored).unwrap(), payload);
        assert!(write_source(&conn, DataSource::UserConfig, &json!([1])).is_err());
    }

    #[test]
    fn test_key_value_store_shapes() {
        let conn = create_test_connection();
        let as_array = json!([
            { "key": "lang", "value": "en" },
            { "key": "recent", "value": [1, 2] }
        ]);
        assert_eq!(write_source(&conn, DataSource::KeyValueStore, &as_array).unwrap(), 2);

        let as_map = json!({ "lang": "de", "zoom": 1.5 });
        assert_eq!(write_source(&conn, DataSource::KeyValueStore, &as_map).unwrap(), 2);

        let values: Vec<(String, String)> = conn
            .prepare("SELECT key, value FROM key_value_store ORDER BY key")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(
            values,
            vec![
                ("lang".to_string(), r#""de""#.to_string()),
                ("recent".to_string(), "[1,2]".to_string()),
                ("zoom".to_string(), "1.5".to_string()),
            ]
        );
    }

    #[test]
    fn test_key_value_types_survive_storage() {
        let conn = create_test_connection();
        let payload = json!({ "asText": "1.5", "asNumber": 1.5 });
        write_source(&conn, DataSource::KeyValueStore, &payload).unwrap();

        let read = |key: &str| -> Value {
            let raw: String = conn
                .query_row("SELECT value FROM key_value_store WHERE key = ?1", [key], |r| r.get(0))
                .unwrap();
            serde_json::from_str(&raw).unwrap()
        };
        assert_eq!(read("asText"), json!("1.5"));
        assert_eq!(read("asNumber"), json!(1.5));
    }

    #[test]
    fn test_repeated_aliases_and_keys_counted_once() {
        let conn = create_test_connection();
        let aliases = json!([
            { "alias": "ll", "command": "ls" },
            { "alias": "ll", "command": "ls -la" },
            { "alias": "gs", "command": "git status" }
        ]);
        assert_eq!(write_source(&conn, DataSource::Aliases, &aliases).unwrap(), 2);
        assert_eq!(count(&conn, "t_aliases"), 2);
        let command: String = conn
            .query_row("SELECT command FROM t_aliases WHERE alias = 'll'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(command, "ls -la");

        let entries = json!([
            { "key": "lang", "value": "en" },
            { "key": "lang", "value": "de" }
        ]);
        assert_eq!(write_source(&conn, DataSource::KeyValueStore, &entries).unwrap(), 1);
        assert_eq!(count(&conn, "key_value_store"), 1);
    }

    #[test]
    fn test_unusable_created_at_falls_back_to_now() {
        let conn = create_test_connection();
        let before = now_millis();
        let payload = json!([
            { "alias": "iso", "command": "date", "createdAt": "2024-01-01T00:00:00Z" },
            { "alias": "float", "command": "uptime", "createdAt": 1.5 }
        ]);
        assert_eq!(write_source(&conn, DataSource::Aliases, &payload).unwrap(), 2);

        let oldest: i64 = conn
            .query_row("SELECT MIN(created_at) FROM t_aliases", [], |r| r.get(0))
            .unwrap();
        assert!(oldest >= before);
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let conn = create_test_connection();
        conn.execute_batch(
            r#"
            CREATE TRIGGER fail_third BEFORE INSERT ON key_value_store
            WHEN NEW.key = 'k3' BEGIN SELECT RAISE(ABORT, 'disk full'); END;
            "#,
        )
        .unwrap();
        let payload = json!((1..=5).map(|i| json!({ "key": format!("k{}", i), "value": i })).collect::<Vec<_>>());

        assert!(write_source(&conn, DataSource::KeyValueStore, &payload).is_err());
        assert_eq!(count(&conn, "key_value_store"), 0);
    }
}
