//! Chaterm storage engine
//!
//! Opens exactly one database per user and store kind, keeps its schema
//! current, relocates databases from the pre-multi-user layout and moves
//! legacy renderer-side data into the relational store.

pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod legacy;
pub mod logging;
pub mod registry;
pub mod utils;

pub use bridge::LegacyDataBridge;
pub use config::StorageConfig;
pub use db::{Database, DataSource, MigrationStatusRecord, StoreKind, UserId};
pub use error::{Result, StorageError};
pub use events::{DataResponse, EventBus, RendererMessage};
pub use legacy::LegacyStoreMigrator;
pub use registry::{DatabaseRegistry, RegistryStats};
