//! Backup and restore service.
//!
//! Creates realm snapshots, enforces retention, purges stale records and
//! performs destructive restores. A restore always takes a fresh safety
//! snapshot of the live data before deleting anything.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::error::{AppError, Result};
use crate::models::backup::{
    Backup, BackupRealm, BackupStatus, BackupSummary, CollectionCount, TriggerType,
};
use crate::models::backup_settings::{RealmBackupSchedule, UpdateScheduleRequest};
use crate::models::snapshot::{
    self, realm_collections, strip_identity, CmsSnapshot, CollectionData, Document,
    SnapshotPayload,
};
use crate::services::audit_service::{AuditAction, AuditContext, AuditEntry, AuditService};
use crate::services::metrics_service;
use crate::store::{BackupRepository, ContentStore, InsertOutcome, SettingsRepository, Stores};

/// `created_by` of the snapshot taken right before a restore.
pub const PRE_RESTORE_CREATOR: &str = "system-pre-restore";

/// `created_by` of scheduled backups.
pub const SYSTEM_CREATOR: &str = "system";

pub const DEFAULT_LIST_LIMIT: i64 = 20;
pub const MAX_LIST_LIMIT: i64 = 100;

/// Structured result of a backup run. Creation never returns `Err`.
#[derive(Debug, Clone)]
pub enum BackupOutcome {
    Completed(BackupSummary),
    Failed { backup_id: String, message: String },
}

impl BackupOutcome {
    pub fn backup_id(&self) -> &str {
        match self {
            BackupOutcome::Completed(summary) => &summary.backup_id,
            BackupOutcome::Failed { backup_id, .. } => backup_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, BackupOutcome::Completed(_))
    }
}

/// Per-collection restore counts.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RestoredCollection {
    pub name: String,
    pub removed: u64,
    pub restored: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RestoreResult {
    pub backup_id: String,
    pub restored_records: u64,
    pub failed_records: u64,
    pub pre_restore_backup_id: String,
    pub collections: Vec<RestoredCollection>,
}

/// Aggregate counts plus live dataset sizes for dashboard display.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BackupStatsReport {
    pub realm: BackupRealm,
    pub total_backups: u64,
    pub completed_backups: u64,
    pub failed_backups: u64,
    pub in_progress_backups: u64,
    pub last_backup_at: Option<DateTime<Utc>>,
    pub live_total_records: u64,
    pub live_collections: Vec<CollectionCount>,
}

/// Age limits for records that retention never touches.
#[derive(Debug, Clone, Copy)]
pub struct StaleTtl {
    pub failed: Duration,
    pub stuck: Duration,
}

pub struct BackupService {
    content: Arc<dyn ContentStore>,
    backups: Arc<dyn BackupRepository>,
    settings: Arc<dyn SettingsRepository>,
    audit: Arc<AuditService>,
}

impl BackupService {
    pub fn new(stores: &Stores, audit: Arc<AuditService>) -> Self {
        Self {
            content: stores.content.clone(),
            backups: stores.backups.clone(),
            settings: stores.settings.clone(),
            audit,
        }
    }

    /// Snapshot a realm.
    ///
    /// The placeholder record is written before any data is read, so a run
    /// that dies midway is still visible. Every failure after that point
    /// marks the record failed and is returned as [`BackupOutcome::Failed`].
    pub async fn create_backup(
        &self,
        realm: BackupRealm,
        trigger: TriggerType,
        created_by: &str,
        ctx: &AuditContext,
    ) -> BackupOutcome {
        let start = Instant::now();
        let placeholder =
            Backup::in_progress(realm, trigger, ctx.dashboard.as_str(), created_by, Utc::now());
        let backup_id = placeholder.backup_id.clone();

        self.audit
            .record(
                AuditEntry::new(AuditAction::BackupInitiated)
                    .resource(&backup_id)
                    .context(ctx)
                    .details(json!({
                        "status": "initiated",
                        "realm": realm.as_str(),
                        "trigger_type": trigger.as_str(),
                        "created_by": created_by,
                    })),
            )
            .await;

        if let Err(e) = self.backups.insert(&placeholder).await {
            error!(realm = %realm, backup_id = %backup_id, error = %e, "Failed to record backup placeholder");
            return self
                .finish_failed(realm, &backup_id, ctx, e.to_string(), start)
                .await;
        }

        let completed = match self.capture(placeholder.clone()).await {
            Ok(completed) => completed,
            Err(e) => {
                let message = e.to_string();
                let mut failed = placeholder;
                match failed.fail(message.clone(), Some(format!("{:?}", e)), Utc::now()) {
                    Ok(()) => {
                        if let Err(mark_err) = self.backups.update(&failed).await {
                            error!(
                                realm = %realm,
                                backup_id = %backup_id,
                                error = %mark_err,
                                "Failed to mark backup as failed"
                            );
                        }
                    }
                    Err(state_err) => {
                        error!(backup_id = %backup_id, error = %state_err, "Unexpected backup state")
                    }
                }
                return self
                    .finish_failed(realm, &backup_id, ctx, message, start)
                    .await;
            }
        };

        // The record is terminal from here on; housekeeping problems are
        // reported but cannot turn it back into a failure.
        let warnings = self.after_completion(realm, completed.created_at).await;

        let summary = completed.summary();
        let records = summary.stats.as_ref().map_or(0, |s| s.total_records);
        self.audit
            .record(
                AuditEntry::new(AuditAction::BackupCompleted)
                    .resource(&backup_id)
                    .context(ctx)
                    .details(json!({
                        "status": "completed",
                        "realm": realm.as_str(),
                        "trigger_type": trigger.as_str(),
                        "stats": summary.stats,
                        "checksum_sha256": summary.metadata.checksum_sha256,
                        "warnings": warnings,
                    })),
            )
            .await;

        metrics_service::record_backup(realm.as_str(), true, start.elapsed().as_secs_f64());
        info!(
            realm = %realm,
            backup_id = %backup_id,
            records,
            trigger = %trigger,
            "Backup completed"
        );
        BackupOutcome::Completed(summary)
    }

    /// Fetch, fingerprint and persist. Returns the completed record.
    async fn capture(&self, mut backup: Backup) -> Result<Backup> {
        let payload = self.fetch_payload(backup.backup_type).await?;
        let (stats, checksum) = payload.fingerprint()?;
        backup.complete(payload, stats, checksum, Utc::now())?;
        self.backups.update(&backup).await?;
        Ok(backup)
    }

    async fn fetch_payload(&self, realm: BackupRealm) -> Result<SnapshotPayload> {
        let c = &self.content;
        match realm {
            BackupRealm::FamilyTree => Ok(SnapshotPayload::FamilyTree {
                persons: c.fetch_all(snapshot::PERSONS).await?,
            }),
            BackupRealm::Cms => {
                let (
                    news,
                    articles,
                    conversations,
                    palestine,
                    gallery,
                    contacts,
                    comments,
                    ticker_news,
                    ticker_settings,
                    hero_slides,
                ) = tokio::try_join!(
                    c.fetch_all(snapshot::NEWS),
                    c.fetch_all(snapshot::ARTICLES),
                    c.fetch_all(snapshot::CONVERSATIONS),
                    c.fetch_all(snapshot::PALESTINE),
                    c.fetch_all(snapshot::GALLERY),
                    c.fetch_all(snapshot::CONTACTS),
                    c.fetch_all(snapshot::COMMENTS),
                    c.fetch_all(snapshot::TICKER_NEWS),
                    c.fetch_all(snapshot::TICKER_SETTINGS),
                    c.fetch_all(snapshot::HERO_SLIDES),
                )?;
                Ok(SnapshotPayload::Cms(CmsSnapshot {
                    news,
                    articles,
                    conversations,
                    palestine,
                    gallery,
                    contacts,
                    comments,
                    ticker_news,
                    ticker_settings: singleton(snapshot::TICKER_SETTINGS, ticker_settings),
                    hero_slides,
                }))
            }
        }
    }

    /// Reset the realm's backup clock and apply retention.
    async fn after_completion(&self, realm: BackupRealm, at: DateTime<Utc>) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = self.settings.touch_last_backup(realm, at).await {
            warn!(realm = %realm, error = %e, "Failed to update last backup time");
            warnings.push(format!("last_auto_backup not updated: {}", e));
        }

        let keep = match self.settings.load().await {
            Ok(settings) => Some(settings.for_realm(realm).max_backups_to_keep),
            Err(e) => {
                warn!(realm = %realm, error = %e, "Failed to load settings for retention");
                warnings.push(format!("retention skipped: {}", e));
                None
            }
        };
        if let Some(keep) = keep {
            if let Err(e) = self.cleanup_old_backups(realm, keep).await {
                warn!(realm = %realm, error = %e, "Retention cleanup failed");
                warnings.push(format!("retention failed: {}", e));
            }
        }

        warnings
    }

    async fn finish_failed(
        &self,
        realm: BackupRealm,
        backup_id: &str,
        ctx: &AuditContext,
        message: String,
        start: Instant,
    ) -> BackupOutcome {
        self.audit
            .record(
                AuditEntry::new(AuditAction::BackupFailed)
                    .resource(backup_id)
                    .context(ctx)
                    .details(json!({
                        "status": "failed",
                        "realm": realm.as_str(),
                        "error": message,
                    }))
                    .failed(),
            )
            .await;
        metrics_service::record_backup(realm.as_str(), false, start.elapsed().as_secs_f64());
        error!(realm = %realm, backup_id = %backup_id, error = %message, "Backup failed");
        BackupOutcome::Failed {
            backup_id: backup_id.to_string(),
            message,
        }
    }

    /// Keep the `max_to_keep` newest completed backups and delete the rest.
    /// In-progress and failed records are not counted or touched.
    pub async fn cleanup_old_backups(&self, realm: BackupRealm, max_to_keep: i64) -> Result<u64> {
        let keep = max_to_keep.max(1) as usize;
        let completed = self.backups.completed_newest_first(realm).await?;
        if completed.len() <= keep {
            return Ok(0);
        }

        let expired: Vec<String> = completed[keep..]
            .iter()
            .map(|b| b.backup_id.clone())
            .collect();
        let deleted = self.backups.delete_many(realm, &expired).await?;

        if deleted > 0 {
            self.audit
                .record(
                    AuditEntry::new(AuditAction::BackupCleanup)
                        .resource(realm.as_str())
                        .details(json!({
                            "realm": realm.as_str(),
                            "deleted_count": deleted,
                            "max_to_keep": keep,
                            "backup_ids": expired,
                        })),
                )
                .await;
            metrics_service::record_cleanup("retention", deleted);
            info!(realm = %realm, deleted, keep, "Old backups removed");
        }
        Ok(deleted)
    }

    /// Delete failed records older than `ttl.failed` and in-progress
    /// records older than `ttl.stuck`.
    pub async fn cleanup_stale_backups(&self, realm: BackupRealm, ttl: StaleTtl) -> Result<u64> {
        let now = Utc::now();
        let mut stale = self
            .backups
            .stale(realm, &[BackupStatus::Failed], now - ttl.failed)
            .await?;
        stale.extend(
            self.backups
                .stale(realm, &[BackupStatus::InProgress], now - ttl.stuck)
                .await?,
        );
        if stale.is_empty() {
            return Ok(0);
        }

        let deleted = self.backups.delete_many(realm, &stale).await?;
        if deleted > 0 {
            self.audit
                .record(
                    AuditEntry::new(AuditAction::BackupStalePurged)
                        .resource(realm.as_str())
                        .details(json!({
                            "realm": realm.as_str(),
                            "deleted_count": deleted,
                            "backup_ids": stale,
                        })),
                )
                .await;
            metrics_service::record_cleanup("stale", deleted);
            info!(realm = %realm, deleted, "Stale backup records purged");
        }
        Ok(deleted)
    }

    /// Replace the realm's live content with a backup's payload.
    ///
    /// Sequence: audit, look up and verify the backup, take a safety
    /// snapshot, then delete and reinsert collection by collection. Nothing
    /// is deleted unless the safety snapshot completed.
    pub async fn restore_backup(
        &self,
        realm: BackupRealm,
        backup_id: &str,
        ctx: &AuditContext,
    ) -> Result<RestoreResult> {
        self.audit
            .record(
                AuditEntry::new(AuditAction::RestoreInitiated)
                    .resource(backup_id)
                    .context(ctx)
                    .details(json!({ "realm": realm.as_str() })),
            )
            .await;

        let backup = match self.load_restorable(realm, backup_id).await {
            Ok(backup) => backup,
            Err(e) => {
                self.audit_restore_failed(backup_id, ctx, &e.to_string(), "lookup", None)
                    .await;
                metrics_service::record_restore(realm.as_str(), false, 0);
                return Err(e);
            }
        };
        let payload = match verify_integrity(realm, &backup) {
            Ok(payload) => payload,
            Err(e) => {
                self.audit_restore_failed(backup_id, ctx, &e.to_string(), "integrity", None)
                    .await;
                metrics_service::record_restore(realm.as_str(), false, 0);
                return Err(e);
            }
        };

        let pre_restore_backup_id = match self
            .create_backup(realm, TriggerType::Manual, PRE_RESTORE_CREATOR, ctx)
            .await
        {
            BackupOutcome::Completed(summary) => summary.backup_id,
            BackupOutcome::Failed {
                backup_id: failed_id,
                message,
            } => {
                let message = format!("Pre-restore safety backup failed: {}", message);
                self.audit_restore_failed(backup_id, ctx, &message, "pre-restore-backup", None)
                    .await;
                metrics_service::record_restore(realm.as_str(), false, 0);
                warn!(realm = %realm, backup_id, safety_backup_id = %failed_id, "Restore aborted before any mutation");
                return Err(AppError::RestoreFailed {
                    message,
                    pre_restore_backup_id: None,
                });
            }
        };

        match self.apply_payload(payload).await {
            Ok(collections) => {
                let restored_records: u64 = collections.iter().map(|c| c.restored).sum();
                let failed_records: u64 = collections.iter().map(|c| c.failed).sum();
                self.audit
                    .record(
                        AuditEntry::new(AuditAction::RestoreCompleted)
                            .resource(backup_id)
                            .context(ctx)
                            .details(json!({
                                "realm": realm.as_str(),
                                "restored_records": restored_records,
                                "failed_records": failed_records,
                                "pre_restore_backup_id": pre_restore_backup_id,
                            })),
                    )
                    .await;
                metrics_service::record_restore(realm.as_str(), true, restored_records);
                info!(
                    realm = %realm,
                    backup_id,
                    records = restored_records,
                    failed_records,
                    pre_restore_backup_id = %pre_restore_backup_id,
                    "Restore completed"
                );
                Ok(RestoreResult {
                    backup_id: backup_id.to_string(),
                    restored_records,
                    failed_records,
                    pre_restore_backup_id,
                    collections,
                })
            }
            Err(e) => {
                let message = e.to_string();
                self.audit_restore_failed(
                    backup_id,
                    ctx,
                    &message,
                    "apply",
                    Some(&pre_restore_backup_id),
                )
                .await;
                metrics_service::record_restore(realm.as_str(), false, 0);
                error!(
                    realm = %realm,
                    backup_id,
                    pre_restore_backup_id = %pre_restore_backup_id,
                    error = %message,
                    "Restore failed partway; recover from the pre-restore backup"
                );
                Err(AppError::RestoreFailed {
                    message,
                    pre_restore_backup_id: Some(pre_restore_backup_id),
                })
            }
        }
    }

    async fn load_restorable(&self, realm: BackupRealm, backup_id: &str) -> Result<Backup> {
        let backup = self
            .backups
            .find(realm, backup_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", backup_id)))?;
        if backup.status != BackupStatus::Completed {
            return Err(AppError::Validation(format!(
                "Backup {} is {} and cannot be restored",
                backup_id, backup.status
            )));
        }
        Ok(backup)
    }

    async fn apply_payload(&self, payload: SnapshotPayload) -> Result<Vec<RestoredCollection>> {
        let mut restored = Vec::new();
        for (name, data) in payload.collections() {
            let removed = self.content.delete_all(name).await?;
            let docs: Vec<Document> = match data {
                CollectionData::Many(docs) => docs.iter().cloned().map(strip_identity).collect(),
                CollectionData::One(doc) => doc.cloned().map(strip_identity).into_iter().collect(),
            };
            let outcome = if docs.is_empty() {
                InsertOutcome::default()
            } else {
                self.content.insert_many(name, docs).await?
            };
            if outcome.failed > 0 {
                warn!(collection = name, failed = outcome.failed, "Some documents were not restored");
            }
            restored.push(RestoredCollection {
                name: name.to_string(),
                removed,
                restored: outcome.inserted,
                failed: outcome.failed,
            });
        }
        Ok(restored)
    }

    async fn audit_restore_failed(
        &self,
        backup_id: &str,
        ctx: &AuditContext,
        message: &str,
        stage: &str,
        pre_restore_backup_id: Option<&str>,
    ) {
        self.audit
            .record(
                AuditEntry::new(AuditAction::RestoreFailed)
                    .resource(backup_id)
                    .context(ctx)
                    .details(json!({
                        "error": message,
                        "stage": stage,
                        "pre_restore_backup_id": pre_restore_backup_id,
                    }))
                    .failed(),
            )
            .await;
    }

    /// Newest first, without payloads. `limit` is clamped to 1..=100.
    pub async fn list_backups(
        &self,
        realm: BackupRealm,
        status: Option<BackupStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<BackupSummary>> {
        let limit = limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        self.backups.list(realm, status, limit).await
    }

    pub async fn get_backup(
        &self,
        realm: BackupRealm,
        backup_id: &str,
        include_data: bool,
    ) -> Result<Backup> {
        let mut backup = self
            .backups
            .find(realm, backup_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", backup_id)))?;
        if !include_data {
            backup.data = None;
        }
        Ok(backup)
    }

    pub async fn delete_backup(
        &self,
        realm: BackupRealm,
        backup_id: &str,
        ctx: &AuditContext,
    ) -> Result<()> {
        if !self.backups.delete(realm, backup_id).await? {
            return Err(AppError::NotFound(format!("Backup {} not found", backup_id)));
        }
        self.audit
            .record(
                AuditEntry::new(AuditAction::BackupDeleted)
                    .resource(backup_id)
                    .context(ctx)
                    .details(json!({ "realm": realm.as_str() })),
            )
            .await;
        info!(realm = %realm, backup_id, user = %ctx.user, "Backup deleted");
        Ok(())
    }

    pub async fn stats(&self, realm: BackupRealm) -> Result<BackupStatsReport> {
        let counts = self.backups.summary_counts(realm).await?;
        let mut live_collections = Vec::new();
        for name in realm_collections(realm) {
            live_collections.push(CollectionCount {
                name: (*name).to_string(),
                count: self.content.count(name).await?,
            });
        }
        Ok(BackupStatsReport {
            realm,
            total_backups: counts.total,
            completed_backups: counts.completed,
            failed_backups: counts.failed,
            in_progress_backups: counts.in_progress,
            last_backup_at: counts.last_backup_at,
            live_total_records: live_collections.iter().map(|c| c.count).sum(),
            live_collections,
        })
    }

    pub async fn schedule(&self, realm: BackupRealm) -> Result<RealmBackupSchedule> {
        Ok(self.settings.load().await?.for_realm(realm).clone())
    }

    pub async fn update_schedule(
        &self,
        realm: BackupRealm,
        request: &UpdateScheduleRequest,
        ctx: &AuditContext,
    ) -> Result<RealmBackupSchedule> {
        let current = self.schedule(realm).await?;
        let next = request.apply(&current)?;
        self.settings.update_schedule(realm, &next).await?;
        self.audit
            .record(
                AuditEntry::new(AuditAction::SettingsUpdated)
                    .resource(realm.as_str())
                    .context(ctx)
                    .details(json!({
                        "realm": realm.as_str(),
                        "previous": current,
                        "current": next,
                    })),
            )
            .await;
        Ok(next)
    }
}

/// Check that a stored payload belongs to `realm` and still matches the
/// checksum recorded at capture time.
pub fn verify_integrity(realm: BackupRealm, backup: &Backup) -> Result<SnapshotPayload> {
    let payload = backup
        .data
        .clone()
        .ok_or_else(|| AppError::Validation(format!("Backup {} has no data", backup.backup_id)))?;
    if payload.realm() != realm || backup.backup_type != realm {
        return Err(AppError::Validation(format!(
            "Backup {} does not belong to realm {}",
            backup.backup_id, realm
        )));
    }
    let expected = backup.metadata.checksum_sha256.as_deref().ok_or_else(|| {
        AppError::Validation(format!("Backup {} has no checksum", backup.backup_id))
    })?;
    let actual = payload.checksum_sha256()?;
    if actual != expected {
        return Err(AppError::Validation(format!(
            "Backup {} failed integrity check: checksum mismatch",
            backup.backup_id
        )));
    }
    Ok(payload)
}

/// Keep the first document of a singleton collection.
fn singleton(collection: &str, docs: Vec<Document>) -> Option<Document> {
    if docs.len() > 1 {
        warn!(
            collection,
            dropped = docs.len() - 1,
            "Singleton collection holds several documents, keeping the first"
        );
    }
    docs.into_iter().next()
}
