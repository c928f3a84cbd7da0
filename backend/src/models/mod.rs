//! Domain models.

pub mod audit_log;
pub mod backup;
pub mod backup_settings;
pub mod snapshot;
pub mod user;
