//! Database Instance Registry
//!
//! Hands out one shared [`Database`] per (user, store kind). The first caller
//! for a key starts the bootstrap; callers arriving while it runs await the
//! same shared future and see the same result. The in-flight slot is cleared
//! when the bootstrap ends, whether it succeeded, failed or panicked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::bridge::LegacyDataBridge;
use crate::config::StorageConfig;
use crate::db::models::{MigrationStatusRecord, StoreKind, UserId};
use crate::db::Database;
use crate::error::{Result, StorageError};
use crate::legacy::LegacyStoreMigrator;

type SlotKey = (UserId, StoreKind);
type InitFuture = Shared<BoxFuture<'static, std::result::Result<Arc<Database>, Arc<StorageError>>>>;

enum Slot {
    Ready(Arc<Database>),
    Initializing(InitFuture),
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Bootstraps actually run
    pub bootstraps_started: u64,
    /// Acquires answered from the cache
    pub cache_hits: u64,
    /// Acquires that awaited someone else's bootstrap
    pub joined_in_flight: u64,
}

struct RegistryInner {
    config: StorageConfig,
    bridge: Option<Arc<LegacyDataBridge>>,
    slots: Mutex<HashMap<SlotKey, Slot>>,
    bootstraps_started: AtomicU64,
    cache_hits: AtomicU64,
    joined_in_flight: AtomicU64,
}

impl RegistryInner {
    fn lock_slots(&self) -> Result<MutexGuard<'_, HashMap<SlotKey, Slot>>> {
        self.slots
            .lock()
            .map_err(|e| StorageError::lock(format!("registry slots poisoned: {}", e)))
    }
}

#[derive(Clone)]
pub struct DatabaseRegistry {
    inner: Arc<RegistryInner>,
}

impl DatabaseRegistry {
    /// Registry without a renderer: legacy migration is skipped
    pub fn new(config: StorageConfig) -> Self {
        Self::build(config, None)
    }

    /// Registry that runs the legacy migration through `bridge` on first
    /// access to an interactive database
    pub fn with_bridge(config: StorageConfig, bridge: Arc<LegacyDataBridge>) -> Self {
        Self::build(config, Some(bridge))
    }

    fn build(config: StorageConfig, bridge: Option<Arc<LegacyDataBridge>>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                bridge,
                slots: Mutex::new(HashMap::new()),
                bootstraps_started: AtomicU64::new(0),
                cache_hits: AtomicU64::new(0),
                joined_in_flight: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    pub fn bridge(&self) -> Option<&Arc<LegacyDataBridge>> {
        self.inner.bridge.as_ref()
    }

    /// Get the database for `user_id`, bootstrapping it on first use
    pub async fn acquire(&self, user_id: UserId, kind: StoreKind) -> Result<Arc<Database>> {
        let init = {
            let mut slots = self.inner.lock_slots()?;
            match slots.get(&(user_id, kind)) {
                Some(Slot::Ready(db)) => {
                    self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Arc::clone(db));
                }
                Some(Slot::Initializing(init)) => {
                    self.inner.joined_in_flight.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Joining in-flight {} bootstrap for user {}", kind, user_id);
                    init.clone()
                }
                None => {
                    self.inner.bootstraps_started.fetch_add(1, Ordering::Relaxed);
                    let init = self.start_bootstrap(user_id, kind);
                    slots.insert((user_id, kind), Slot::Initializing(init.clone()));
                    init
                }
            }
        };

        init.await.map_err(StorageError::from_shared)
    }

    pub async fn acquire_interactive_database(&self, user_id: Option<i64>) -> Result<Arc<Database>> {
        self.acquire(UserId::new(user_id)?, StoreKind::Interactive)
            .await
    }

    pub async fn acquire_history_database(&self, user_id: Option<i64>) -> Result<Arc<Database>> {
        self.acquire(UserId::new(user_id)?, StoreKind::TerminalHistory)
            .await
    }

    pub async fn get_migration_status(
        &self,
        user_id: Option<i64>,
        data_source: &str,
    ) -> Result<Option<MigrationStatusRecord>> {
        let db = self.acquire_interactive_database(user_id).await?;
        db.migration_status(data_source)
    }

    pub async fn get_all_migration_statuses(
        &self,
        user_id: Option<i64>,
    ) -> Result<Vec<MigrationStatusRecord>> {
        let db = self.acquire_interactive_database(user_id).await?;
        db.all_migration_statuses()
    }

    /// Cached handle, without starting a bootstrap
    pub fn cached(&self, user_id: UserId, kind: StoreKind) -> Option<Arc<Database>> {
        let slots = self.inner.lock_slots().ok()?;
        match slots.get(&(user_id, kind)) {
            Some(Slot::Ready(db)) => Some(Arc::clone(db)),
            _ => None,
        }
    }

    /// Drop the cached handle so the next acquire bootstraps again
    ///
    /// # Returns
    /// true if a ready handle was removed. In-flight bootstraps are left alone.
    pub fn invalidate(&self, user_id: UserId, kind: StoreKind) -> bool {
        let Ok(mut slots) = self.inner.lock_slots() else {
            return false;
        };
        if matches!(slots.get(&(user_id, kind)), Some(Slot::Ready(_))) {
            slots.remove(&(user_id, kind));
            tracing::info!("Invalidated {} database for user {}", kind, user_id);
            true
        } else {
            false
        }
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            bootstraps_started: self.inner.bootstraps_started.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            joined_in_flight: self.inner.joined_in_flight.load(Ordering::Relaxed),
        }
    }

    /// Spawn the bootstrap so it completes even if every caller goes away
    fn start_bootstrap(&self, user_id: UserId, kind: StoreKind) -> InitFuture {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let mut guard = InitGuard {
                inner: Arc::clone(&inner),
                key: (user_id, kind),
                ready: None,
            };
            let db = bootstrap(&inner, user_id, kind).await?;
            guard.ready = Some(Arc::clone(&db));
            Ok::<_, StorageError>(db)
        });

        async move {
            match task.await {
                Ok(result) => result.map_err(Arc::new),
                Err(e) => Err(Arc::new(StorageError::task(format!(
                    "{} bootstrap for user {} did not finish: {}",
                    kind, user_id, e
                )))),
            }
        }
        .boxed()
        .shared()
    }
}

impl std::fmt::Debug for DatabaseRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseRegistry")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Settles the slot of one bootstrap: cached on success, removed otherwise
struct InitGuard {
    inner: Arc<RegistryInner>,
    key: SlotKey,
    ready: Option<Arc<Database>>,
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        let mut slots = match self.inner.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        match self.ready.take() {
            Some(db) => {
                slots.insert(self.key, Slot::Ready(db));
            }
            None => {
                slots.remove(&self.key);
            }
        }
    }
}

/// File placement, schema sync and open, then legacy migration for the
/// interactive store when a renderer is attached
async fn bootstrap(inner: &RegistryInner, user_id: UserId, kind: StoreKind) -> Result<Arc<Database>> {
    tracing::info!("Bootstrapping {} database for user {}", kind, user_id);

    let config = inner.config.clone();
    let (db, outcome) =
        tokio::task::spawn_blocking(move || Database::bootstrap(&config, user_id, kind))
            .await
            .map_err(|e| StorageError::task(format!("bootstrap task failed: {}", e)))??;

    tracing::info!(
        "{} database for user {} ready at {} ({:?}, {} steps failed)",
        kind,
        user_id,
        db.path().display(),
        outcome.placement,
        outcome.sync.steps_failed.len()
    );
    let db = Arc::new(db);

    if kind == StoreKind::Interactive {
        match &inner.bridge {
            Some(bridge) => {
                let migrator = LegacyStoreMigrator::new(Arc::clone(&db), Arc::clone(bridge))
                    .with_retry_delay(inner.config.legacy_retry_delay());
                if !migrator
                    .migrate_all_with_retry(inner.config.legacy_max_attempts)
                    .await
                {
                    tracing::warn!(
                        "Legacy store stays authoritative for user {} this session",
                        user_id
                    );
                }
            }
            None => tracing::debug!("No renderer attached, legacy migration skipped"),
        }
    }

    Ok(db)
}

static GLOBAL_REGISTRY: OnceCell<DatabaseRegistry> = OnceCell::new();

/// Install the process-wide registry used by the free entry points
pub fn install(registry: DatabaseRegistry) -> Result<()> {
    GLOBAL_REGISTRY
        .set(registry)
        .map_err(|_| StorageError::config("database registry already installed"))
}

pub fn global() -> Result<&'static DatabaseRegistry> {
    GLOBAL_REGISTRY
        .get()
        .ok_or_else(|| StorageError::config("database registry not installed"))
}

pub async fn acquire_interactive_database(user_id: Option<i64>) -> Result<Arc<Database>> {
    global()?.acquire_interactive_database(user_id).await
}

pub async fn acquire_history_database(user_id: Option<i64>) -> Result<Arc<Database>> {
    global()?.acquire_history_database(user_id).await
}

pub async fn get_migration_status(
    user_id: Option<i64>,
    data_source: &str,
) -> Result<Option<MigrationStatusRecord>> {
    global()?.get_migration_status(user_id, data_source).await
}

pub async fn get_all_migration_statuses(user_id: Option<i64>) -> Result<Vec<MigrationStatusRecord>> {
    global()?.get_all_migration_statuses(user_id).await
}
