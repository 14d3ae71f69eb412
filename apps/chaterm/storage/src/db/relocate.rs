//! Legacy path relocation
//!
//! Before databases were split per user, each store was a single file directly
//! under the store root. On first access for a user, that file is moved into
//! the user's directory. Any failure degrades to "treat as a new install".

use crate::config::StorageConfig;
use crate::db::models::{StoreKind, UserId};
use crate::utils::fs::{create_dir_all, move_path, sidecar_path, SIDECAR_SUFFIXES};

/// Move a legacy single-file database into the per-user layout
///
/// # Returns
/// true if a relocation happened; false when there was nothing to move, the
/// per-user file already exists, or the move failed
pub fn relocate_legacy_database(config: &StorageConfig, user_id: UserId, kind: StoreKind) -> bool {
    let legacy_path = config.legacy_database_path(kind);
    let target_path = config.user_database_path(user_id, kind);

    if !legacy_path.is_file() {
        return false;
    }
    if target_path.exists() {
        tracing::debug!(
            "Legacy {} database left in place: {} already exists",
            kind,
            target_path.display()
        );
        return false;
    }

    if let Err(e) = create_dir_all(&config.user_dir(user_id)) {
        tracing::error!("Failed to create user directory for legacy {} database: {}", kind, e);
        return false;
    }

    if let Err(e) = move_path(&legacy_path, &target_path) {
        tracing::error!(
            "Failed to move legacy {} database {} -> {}: {}",
            kind,
            legacy_path.display(),
            target_path.display(),
            e
        );
        return false;
    }

    // Uncheckpointed WAL content belongs to the moved file
    for suffix in SIDECAR_SUFFIXES {
        let from = sidecar_path(&legacy_path, suffix);
        if from.is_file() {
            if let Err(e) = move_path(&from, &sidecar_path(&target_path, suffix)) {
                tracing::warn!("Failed to move {}: {}", from.display(), e);
            }
        }
    }

    tracing::info!(
        "Relocated legacy {} database to {}",
        kind,
        target_path.display()
    );
    true
}
