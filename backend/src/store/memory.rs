//! In-process store backed by tokio `RwLock` maps.
//!
//! Used by the test suite and by `STORE_BACKEND=memory`. Nothing survives a
//! restart.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AuditRepository, BackupRepository, ContentStore, InsertOutcome, SettingsRepository,
    UserRepository,
};
use crate::config::BackupDefaults;
use crate::error::{AppError, Result};
use crate::models::audit_log::{AuditLog, AuditQuery};
use crate::models::backup::{Backup, BackupCounts, BackupRealm, BackupStatus, BackupSummary};
use crate::models::backup_settings::{BackupSettings, RealmBackupSchedule};
use crate::models::snapshot::Document;
use crate::models::user::AdminUser;

#[derive(Default)]
pub struct MemoryContentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map_or(0, |docs| docs.len() as u64))
    }

    async fn delete_all(&self, collection: &str) -> Result<u64> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .remove(collection)
            .map_or(0, |docs| docs.len() as u64))
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<InsertOutcome> {
        let mut collections = self.collections.write().await;
        let existing = collections.entry(collection.to_string()).or_default();
        let mut seen: HashSet<String> = existing
            .iter()
            .filter_map(|d| d.get("_id").and_then(Value::as_str).map(str::to_string))
            .collect();

        let mut outcome = InsertOutcome::default();
        for mut doc in docs {
            let id = match doc.get("_id") {
                Some(Value::String(id)) => id.clone(),
                Some(_) => {
                    outcome.failed += 1;
                    continue;
                }
                None => {
                    let id = Uuid::new_v4().to_string();
                    doc.insert("_id".into(), Value::String(id.clone()));
                    id
                }
            };
            if !seen.insert(id) {
                outcome.failed += 1;
                continue;
            }
            existing.push(doc);
            outcome.inserted += 1;
        }
        Ok(outcome)
    }
}

#[derive(Default)]
pub struct MemoryBackupRepository {
    // Insertion order; newest-first views sort a copy.
    backups: RwLock<Vec<Backup>>,
}

impl MemoryBackupRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<'a>(backups: impl DoubleEndedIterator<Item = &'a Backup>) -> Vec<&'a Backup> {
    // Later inserts win ties on created_at.
    let mut out: Vec<&Backup> = backups.rev().collect();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    out
}

#[async_trait]
impl BackupRepository for MemoryBackupRepository {
    async fn insert(&self, backup: &Backup) -> Result<()> {
        let mut backups = self.backups.write().await;
        if backups.iter().any(|b| b.backup_id == backup.backup_id) {
            return Err(AppError::Conflict(format!(
                "Backup {} already exists",
                backup.backup_id
            )));
        }
        backups.push(backup.clone());
        Ok(())
    }

    async fn update(&self, backup: &Backup) -> Result<()> {
        let mut backups = self.backups.write().await;
        let slot = backups
            .iter_mut()
            .find(|b| b.backup_id == backup.backup_id)
            .ok_or_else(|| AppError::NotFound(format!("Backup {}", backup.backup_id)))?;
        *slot = backup.clone();
        Ok(())
    }

    async fn find(&self, realm: BackupRealm, backup_id: &str) -> Result<Option<Backup>> {
        let backups = self.backups.read().await;
        Ok(backups
            .iter()
            .find(|b| b.backup_type == realm && b.backup_id == backup_id)
            .cloned())
    }

    async fn list(
        &self,
        realm: BackupRealm,
        status: Option<BackupStatus>,
        limit: i64,
    ) -> Result<Vec<BackupSummary>> {
        let backups = self.backups.read().await;
        let matching = backups
            .iter()
            .filter(|b| b.backup_type == realm && status.map_or(true, |s| b.status == s));
        Ok(newest_first(matching)
            .into_iter()
            .take(limit.max(0) as usize)
            .map(Backup::summary)
            .collect())
    }

    async fn completed_newest_first(&self, realm: BackupRealm) -> Result<Vec<BackupSummary>> {
        let backups = self.backups.read().await;
        let completed = backups
            .iter()
            .filter(|b| b.backup_type == realm && b.status == BackupStatus::Completed);
        Ok(newest_first(completed)
            .into_iter()
            .map(Backup::summary)
            .collect())
    }

    async fn delete(&self, realm: BackupRealm, backup_id: &str) -> Result<bool> {
        let mut backups = self.backups.write().await;
        let before = backups.len();
        backups.retain(|b| !(b.backup_type == realm && b.backup_id == backup_id));
        Ok(backups.len() < before)
    }

    async fn delete_many(&self, realm: BackupRealm, backup_ids: &[String]) -> Result<u64> {
        let ids: HashSet<&str> = backup_ids.iter().map(String::as_str).collect();
        let mut backups = self.backups.write().await;
        let before = backups.len();
        backups.retain(|b| !(b.backup_type == realm && ids.contains(b.backup_id.as_str())));
        Ok((before - backups.len()) as u64)
    }

    async fn stale(
        &self,
        realm: BackupRealm,
        statuses: &[BackupStatus],
        older_than: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let backups = self.backups.read().await;
        Ok(backups
            .iter()
            .filter(|b| {
                b.backup_type == realm && statuses.contains(&b.status) && b.created_at < older_than
            })
            .map(|b| b.backup_id.clone())
            .collect())
    }

    async fn summary_counts(&self, realm: BackupRealm) -> Result<BackupCounts> {
        let backups = self.backups.read().await;
        let mut counts = BackupCounts::default();
        for backup in backups.iter().filter(|b| b.backup_type == realm) {
            counts.total += 1;
            match backup.status {
                BackupStatus::Completed => {
                    counts.completed += 1;
                    if counts.last_backup_at.map_or(true, |t| backup.created_at > t) {
                        counts.last_backup_at = Some(backup.created_at);
                    }
                }
                BackupStatus::Failed => counts.failed += 1,
                BackupStatus::InProgress => counts.in_progress += 1,
            }
        }
        Ok(counts)
    }
}

struct SettingsState {
    settings: Option<BackupSettings>,
    claims: HashMap<BackupRealm, DateTime<Utc>>,
}

pub struct MemorySettingsRepository {
    defaults: BackupDefaults,
    state: RwLock<SettingsState>,
}

impl MemorySettingsRepository {
    pub fn new(defaults: BackupDefaults) -> Self {
        Self {
            defaults,
            state: RwLock::new(SettingsState {
                settings: None,
                claims: HashMap::new(),
            }),
        }
    }
}

#[async_trait]
impl SettingsRepository for MemorySettingsRepository {
    async fn load(&self) -> Result<BackupSettings> {
        let mut state = self.state.write().await;
        let settings = state
            .settings
            .get_or_insert_with(|| BackupSettings::from_defaults(&self.defaults));
        Ok(settings.clone())
    }

    async fn save(&self, settings: &BackupSettings) -> Result<()> {
        settings.validate()?;
        let mut state = self.state.write().await;
        state.settings = Some(settings.clone());
        Ok(())
    }

    async fn update_schedule(
        &self,
        realm: BackupRealm,
        schedule: &RealmBackupSchedule,
    ) -> Result<()> {
        schedule.validate()?;
        let mut state = self.state.write().await;
        let settings = state
            .settings
            .get_or_insert_with(|| BackupSettings::from_defaults(&self.defaults));
        let current = settings.for_realm_mut(realm);
        current.enabled = schedule.enabled;
        current.interval_hours = schedule.interval_hours;
        current.max_backups_to_keep = schedule.max_backups_to_keep;
        Ok(())
    }

    async fn touch_last_backup(&self, realm: BackupRealm, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let settings = state
            .settings
            .get_or_insert_with(|| BackupSettings::from_defaults(&self.defaults));
        settings.for_realm_mut(realm).last_auto_backup = Some(at);
        Ok(())
    }

    async fn try_claim_realm(
        &self,
        realm: BackupRealm,
        now: DateTime<Utc>,
        min_gap: Duration,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.claims.get(&realm) {
            Some(claimed) if *claimed > now - min_gap => Ok(false),
            _ => {
                state.claims.insert(realm, now);
                Ok(true)
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryAuditRepository {
    entries: RwLock<Vec<AuditLog>>,
}

impl MemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditRepository for MemoryAuditRepository {
    async fn append(&self, entry: &AuditLog) -> Result<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLog>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.matches(query))
            .take(query.limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashMap<Uuid, AdminUser>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, id: Uuid, f: F) -> Result<AdminUser>
    where
        F: FnOnce(&mut AdminUser),
    {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("User {}", id)))?;
        f(user);
        Ok(user.clone())
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_username(&self, username: &str) -> Result<Option<AdminUser>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AdminUser>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn insert(&self, user: &AdminUser) -> Result<()> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.username == user.username) {
            return Err(AppError::Conflict(format!(
                "User {} already exists",
                user.username
            )));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.users.read().await.len() as u64)
    }

    async fn register_failed_login(&self, id: Uuid) -> Result<i32> {
        let user = self
            .modify(id, |u| u.failed_login_attempts += 1)
            .await?;
        Ok(user.failed_login_attempts)
    }

    async fn lock_account(&self, id: Uuid, until: DateTime<Utc>) -> Result<()> {
        self.modify(id, |u| {
            u.locked_until = Some(until);
            u.failed_login_attempts = 0;
        })
        .await?;
        Ok(())
    }

    async fn record_successful_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.modify(id, |u| {
            u.failed_login_attempts = 0;
            u.locked_until = None;
            u.last_login_at = Some(at);
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backup::TriggerType;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn completed_at(realm: BackupRealm, created_at: DateTime<Utc>) -> Backup {
        let mut b = Backup::in_progress(realm, TriggerType::Manual, "cms", "t", created_at);
        b.status = BackupStatus::Completed;
        b
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_rejects_duplicates() {
        let store = MemoryContentStore::new();
        let outcome = store
            .insert_many(
                "news",
                vec![
                    doc(json!({"title": "a"})),
                    doc(json!({"_id": "x", "title": "b"})),
                    doc(json!({"_id": "x", "title": "c"})),
                    doc(json!({"_id": 5, "title": "d"})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome { inserted: 2, failed: 2 });

        let docs = store.fetch_all("news").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.contains_key("_id")));
        assert_eq!(store.delete_all("news").await.unwrap(), 2);
        assert_eq!(store.count("news").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_backup_listing_is_realm_scoped_and_newest_first() {
        let repo = MemoryBackupRepository::new();
        let now = Utc::now();
        let old = completed_at(BackupRealm::Cms, now - Duration::hours(2));
        let new = completed_at(BackupRealm::Cms, now);
        let other = completed_at(BackupRealm::FamilyTree, now);
        for b in [&old, &new, &other] {
            repo.insert(b).await.unwrap();
        }

        let listed = repo.completed_newest_first(BackupRealm::Cms).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.backup_id.as_str()).collect();
        assert_eq!(ids, vec![new.backup_id.as_str(), old.backup_id.as_str()]);

        assert!(repo
            .find(BackupRealm::FamilyTree, &new.backup_id)
            .await
            .unwrap()
            .is_none());
        assert!(!repo.delete(BackupRealm::FamilyTree, &new.backup_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_blocks_within_gap() {
        let repo = MemorySettingsRepository::new(BackupDefaults::default());
        let now = Utc::now();
        let gap = Duration::minutes(30);
        assert!(repo.try_claim_realm(BackupRealm::Cms, now, gap).await.unwrap());
        assert!(!repo
            .try_claim_realm(BackupRealm::Cms, now + Duration::minutes(5), gap)
            .await
            .unwrap());
        assert!(repo
            .try_claim_realm(BackupRealm::FamilyTree, now, gap)
            .await
            .unwrap());
        assert!(repo
            .try_claim_realm(BackupRealm::Cms, now + Duration::minutes(31), gap)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_update_schedule_keeps_last_backup() {
        let repo = MemorySettingsRepository::new(BackupDefaults::default());
        let at = Utc::now();
        repo.touch_last_backup(BackupRealm::Cms, at).await.unwrap();
        let mut schedule = repo.load().await.unwrap().cms_backup;
        schedule.interval_hours = 6;
        schedule.last_auto_backup = None;
        repo.update_schedule(BackupRealm::Cms, &schedule).await.unwrap();

        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded.cms_backup.interval_hours, 6);
        assert_eq!(loaded.cms_backup.last_auto_backup, Some(at));
    }

    #[tokio::test]
    async fn test_failed_login_counter_and_reset() {
        let repo = MemoryUserRepository::new();
        let user = AdminUser::new("amina", "h", "editor", vec![]);
        repo.insert(&user).await.unwrap();
        assert_eq!(repo.register_failed_login(user.id).await.unwrap(), 1);
        assert_eq!(repo.register_failed_login(user.id).await.unwrap(), 2);
        repo.record_successful_login(user.id, Utc::now()).await.unwrap();
        let reloaded = repo.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.failed_login_attempts, 0);
        assert!(reloaded.last_login_at.is_some());
        assert!(repo.insert(&AdminUser::new("amina", "h", "x", vec![])).await.is_err());
    }
}
