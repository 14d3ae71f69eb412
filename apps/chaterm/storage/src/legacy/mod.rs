//! Legacy Store Migrator
//!
//! Moves the three collections the renderer used to keep in its browser-side
//! key/value store (`aliases`, `userConfig`, `keyValueStore`) into the
//! interactive database. Runs once per user: every source gets a row in
//! `indexdb_migration_status`, and a source is only considered done while
//! that row passes validation against the destination table.
//!
//! One attempt walks check-complete, then each source in order, then
//! re-checks. Any failure clears every status row so the next attempt starts
//! from a clean slate.

pub mod sources;
pub mod validate;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use serde_json::Value;

use crate::bridge::LegacyDataBridge;
use crate::config::DEFAULT_LEGACY_RETRY_DELAY_MS;
use crate::db::models::DataSource;
use crate::db::repository::{
    clear_migration_statuses, get_migration_status, upsert_migration_status,
};
use crate::db::Database;
use crate::error::{Result, StorageError};
use crate::events::RendererMessage;
use sources::{is_empty_payload, write_source};
use validate::validate_source;

/// Result of one successful attempt
#[derive(Debug)]
enum AttemptOutcome {
    AlreadyComplete,
    /// Record counts of the sources migrated during this attempt
    Migrated(BTreeMap<String, i64>),
}

/// Why an attempt failed, and on which source if any
#[derive(Debug)]
struct AttemptFailure {
    source: Option<DataSource>,
    error: StorageError,
}

impl AttemptFailure {
    fn general(error: StorageError) -> Self {
        Self {
            source: None,
            error,
        }
    }
}

pub struct LegacyStoreMigrator {
    db: Arc<Database>,
    bridge: Arc<LegacyDataBridge>,
    retry_delay: Duration,
}

impl LegacyStoreMigrator {
    pub fn new(db: Arc<Database>, bridge: Arc<LegacyDataBridge>) -> Self {
        Self {
            db,
            bridge,
            retry_delay: Duration::from_millis(DEFAULT_LEGACY_RETRY_DELAY_MS),
        }
    }

    /// Base delay between attempts; attempt `n` waits `n * delay`
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Whether every source is marked migrated and still passes validation
    ///
    /// Sources failing validation lose their status row.
    pub fn check_all_migrations_complete(&self) -> Result<bool> {
        let conn = self.db.connection()?;
        check_all(&conn)
    }

    /// Run the whole migration, retrying up to `max_attempts` times
    ///
    /// # Returns
    /// true once every source is migrated and validated; false when all
    /// attempts failed, in which case the legacy store stays authoritative
    /// for this session
    pub async fn migrate_all_with_retry(&self, max_attempts: u32) -> bool {
        let max_attempts = max_attempts.max(1);
        let mut last_failure = None;

        for attempt in 1..=max_attempts {
            match self.run_attempt().await {
                Ok(AttemptOutcome::AlreadyComplete) => {
                    tracing::debug!("Legacy data already migrated for user {}", self.db.user_id());
                    return true;
                }
                Ok(AttemptOutcome::Migrated(counts)) => {
                    tracing::info!(
                        "Legacy data migrated for user {} on attempt {}: {:?}",
                        self.db.user_id(),
                        attempt,
                        counts
                    );
                    self.notify_complete(counts);
                    return true;
                }
                Err(failure) => {
                    tracing::warn!(
                        "Legacy migration attempt {}/{} failed{}: {}",
                        attempt,
                        max_attempts,
                        failure
                            .source
                            .map(|s| format!(" on '{}'", s))
                            .unwrap_or_default(),
                        failure.error
                    );
                    if let Err(e) = self.clear_statuses() {
                        tracing::error!("Failed to clear migration status rows: {}", e);
                    }
                    last_failure = Some(failure);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }
        }

        if let Some(failure) = last_failure {
            self.record_failure(&failure);
        }
        tracing::error!(
            "Legacy migration gave up for user {} after {} attempts",
            self.db.user_id(),
            max_attempts
        );
        false
    }

    async fn run_attempt(&self) -> std::result::Result<AttemptOutcome, AttemptFailure> {
        if self
            .check_all_migrations_complete()
            .map_err(AttemptFailure::general)?
        {
            return Ok(AttemptOutcome::AlreadyComplete);
        }

        let mut counts = BTreeMap::new();
        for source in DataSource::ALL {
            let migrated = self
                .migrate_source(source)
                .await
                .map_err(|error| AttemptFailure {
                    source: Some(source),
                    error,
                })?;
            if let Some(count) = migrated {
                counts.insert(source.as_str().to_string(), count);
            }
        }

        if !self
            .check_all_migrations_complete()
            .map_err(AttemptFailure::general)?
        {
            return Err(AttemptFailure::general(StorageError::validation(
                "sources incomplete after migration",
            )));
        }
        Ok(AttemptOutcome::Migrated(counts))
    }

    /// Migrate one source unless it is already marked migrated
    ///
    /// # Returns
    /// The number of records written, or None when the source was skipped
    async fn migrate_source(&self, source: DataSource) -> Result<Option<i64>> {
        if self.is_marked_migrated(source)? {
            tracing::debug!("Legacy source '{}' already migrated, skipping", source);
            return Ok(None);
        }

        let payload = self.bridge.request_legacy_data(source.as_str()).await?;
        self.store_payload(source, &payload).map(Some)
    }

    fn is_marked_migrated(&self, source: DataSource) -> Result<bool> {
        let conn = self.db.connection()?;
        Ok(get_migration_status(&conn, source.as_str())?.is_some_and(|r| r.migrated))
    }

    fn store_payload(&self, source: DataSource, payload: &Value) -> Result<i64> {
        let conn = self.db.connection()?;

        let count = if is_empty_payload(payload) {
            tracing::info!("Legacy source '{}' is empty", source);
            0
        } else {
            write_source(&conn, source, payload)?
        };

        upsert_migration_status(&conn, source, true, count, None)?;
        if !validate_source(&conn, source, count)? {
            return Err(StorageError::validation(format!(
                "'{}' failed validation right after migration",
                source
            )));
        }

        tracing::info!("Migrated {} legacy '{}' records", count, source);
        Ok(count)
    }

    fn clear_statuses(&self) -> Result<()> {
        let conn = self.db.connection()?;
        let removed = clear_migration_statuses(&conn)?;
        tracing::debug!("Cleared {} migration status rows", removed);
        Ok(())
    }

    /// Leave a failed row for the source that failed last
    fn record_failure(&self, failure: &AttemptFailure) {
        let Some(source) = failure.source else {
            return;
        };
        let message = failure.error.to_string();
        let result = self
            .db
            .connection()
            .and_then(|conn| upsert_migration_status(&conn, source, false, 0, Some(&message)));
        if let Err(e) = result {
            tracing::error!("Failed to record migration failure for '{}': {}", source, e);
        }
    }

    fn notify_complete(&self, record_counts: BTreeMap<String, i64>) {
        if record_counts.values().sum::<i64>() == 0 {
            return;
        }
        self.bridge
            .bus()
            .emit(RendererMessage::LegacyMigrationComplete {
                user_id: self.db.user_id().get(),
                record_counts,
            });
    }
}

/// Validate every source against its own recorded count
fn check_all(conn: &Connection) -> Result<bool> {
    let mut complete = true;
    for source in DataSource::ALL {
        let expected = match get_migration_status(conn, source.as_str())? {
            Some(record) if record.migrated => record.record_count.unwrap_or(0),
            _ => {
                complete = false;
                continue;
            }
        };
        if !validate_source(conn, source, expected)? {
            complete = false;
        }
    }
    Ok(complete)
}
