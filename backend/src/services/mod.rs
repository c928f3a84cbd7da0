//! Business logic services.

pub mod audit_service;
pub mod auth_service;
pub mod backup_service;
pub mod metrics_service;
pub mod scheduler_service;
