//! Heritage Keeper - Backend Library
//!
//! Realm-isolated backup, restore, scheduling and audit service behind the
//! family-tree and CMS admin dashboards.

#[macro_use]
mod macros;

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
