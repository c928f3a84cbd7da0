//! Persistence seams.
//!
//! Services only see these traits. Two implementations exist:
//! [`postgres`] for deployments and [`memory`] for tests and demos.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::BackupDefaults;
use crate::error::Result;
use crate::models::audit_log::{AuditLog, AuditQuery};
use crate::models::backup::{Backup, BackupCounts, BackupRealm, BackupStatus, BackupSummary};
use crate::models::backup_settings::{BackupSettings, RealmBackupSchedule};
use crate::models::snapshot::Document;
use crate::models::user::AdminUser;

/// Result of a best-effort bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: u64,
    pub failed: u64,
}

/// Live content collections.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Every document in a collection, in insertion order
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>>;

    async fn count(&self, collection: &str) -> Result<u64>;

    /// Remove every document in a collection, returning how many went
    async fn delete_all(&self, collection: &str) -> Result<u64>;

    /// Unordered insert. A rejected document is counted, not fatal.
    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<InsertOutcome>;

    /// Cheap liveness probe for the health endpoint
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Backup records. Every lookup is scoped by realm.
#[async_trait]
pub trait BackupRepository: Send + Sync {
    async fn insert(&self, backup: &Backup) -> Result<()>;

    /// Overwrite an existing record, matched by `backup_id`
    async fn update(&self, backup: &Backup) -> Result<()>;

    async fn find(&self, realm: BackupRealm, backup_id: &str) -> Result<Option<Backup>>;

    /// Newest first, never loading `data`
    async fn list(
        &self,
        realm: BackupRealm,
        status: Option<BackupStatus>,
        limit: i64,
    ) -> Result<Vec<BackupSummary>>;

    async fn completed_newest_first(&self, realm: BackupRealm) -> Result<Vec<BackupSummary>>;

    async fn delete(&self, realm: BackupRealm, backup_id: &str) -> Result<bool>;

    async fn delete_many(&self, realm: BackupRealm, backup_ids: &[String]) -> Result<u64>;

    /// Ids of records in `statuses` created before `older_than`
    async fn stale(
        &self,
        realm: BackupRealm,
        statuses: &[BackupStatus],
        older_than: DateTime<Utc>,
    ) -> Result<Vec<String>>;

    async fn summary_counts(&self, realm: BackupRealm) -> Result<BackupCounts>;
}

/// The backup settings singleton.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Current settings, seeded from defaults on first read
    async fn load(&self) -> Result<BackupSettings>;

    async fn save(&self, settings: &BackupSettings) -> Result<()>;

    /// Write the operator-editable fields of one realm, leaving
    /// `last_auto_backup` untouched
    async fn update_schedule(&self, realm: BackupRealm, schedule: &RealmBackupSchedule)
        -> Result<()>;

    async fn touch_last_backup(&self, realm: BackupRealm, at: DateTime<Utc>) -> Result<()>;

    /// Claim a realm for one scheduler run. Succeeds for at most one caller
    /// per `min_gap` window.
    async fn try_claim_realm(
        &self,
        realm: BackupRealm,
        now: DateTime<Utc>,
        min_gap: Duration,
    ) -> Result<bool>;
}

/// Append-only audit sink.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, entry: &AuditLog) -> Result<()>;

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLog>>;
}

/// One realm's admin accounts.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<AdminUser>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AdminUser>>;

    async fn insert(&self, user: &AdminUser) -> Result<()>;

    async fn count(&self) -> Result<u64>;

    /// Increment the failure counter, returning its new value
    async fn register_failed_login(&self, id: Uuid) -> Result<i32>;

    /// Lock until `until` and reset the failure counter
    async fn lock_account(&self, id: Uuid, until: DateTime<Utc>) -> Result<()>;

    /// Clear counter and lock, stamp `last_login_at`
    async fn record_successful_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

/// Every repository the services need, behind trait objects.
#[derive(Clone)]
pub struct Stores {
    pub content: Arc<dyn ContentStore>,
    pub backups: Arc<dyn BackupRepository>,
    pub settings: Arc<dyn SettingsRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub cms_users: Arc<dyn UserRepository>,
    pub family_tree_users: Arc<dyn UserRepository>,
}

impl Stores {
    pub fn memory(defaults: &BackupDefaults) -> Self {
        Self {
            content: Arc::new(memory::MemoryContentStore::new()),
            backups: Arc::new(memory::MemoryBackupRepository::new()),
            settings: Arc::new(memory::MemorySettingsRepository::new(defaults.clone())),
            audit: Arc::new(memory::MemoryAuditRepository::new()),
            cms_users: Arc::new(memory::MemoryUserRepository::new()),
            family_tree_users: Arc::new(memory::MemoryUserRepository::new()),
        }
    }

    pub fn postgres(pool: PgPool, defaults: &BackupDefaults) -> Self {
        Self {
            content: Arc::new(postgres::PgContentStore::new(pool.clone())),
            backups: Arc::new(postgres::PgBackupRepository::new(pool.clone())),
            settings: Arc::new(postgres::PgSettingsRepository::new(
                pool.clone(),
                defaults.clone(),
            )),
            audit: Arc::new(postgres::PgAuditRepository::new(pool.clone())),
            cms_users: Arc::new(postgres::PgUserRepository::new(
                pool.clone(),
                BackupRealm::Cms,
            )),
            family_tree_users: Arc::new(postgres::PgUserRepository::new(
                pool,
                BackupRealm::FamilyTree,
            )),
        }
    }

    pub fn users(&self, realm: BackupRealm) -> Arc<dyn UserRepository> {
        match realm {
            BackupRealm::Cms => self.cms_users.clone(),
            BackupRealm::FamilyTree => self.family_tree_users.clone(),
        }
    }
}
