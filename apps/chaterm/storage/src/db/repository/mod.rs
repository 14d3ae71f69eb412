pub mod migration_status_repo;

pub use migration_status_repo::*;
