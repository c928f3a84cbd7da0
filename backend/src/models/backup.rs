//! Backup snapshot record and its status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{AppError, Result};
use crate::models::snapshot::SnapshotPayload;

/// The two administrative realms. Each owns its own backups and users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum BackupRealm {
    FamilyTree,
    Cms,
}

impl BackupRealm {
    /// Scheduler check order.
    pub const ALL: [BackupRealm; 2] = [BackupRealm::FamilyTree, BackupRealm::Cms];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupRealm::FamilyTree => "family-tree",
            BackupRealm::Cms => "cms",
        }
    }

    /// Value of the `type` claim carried by tokens of this realm.
    pub fn token_type(&self) -> &'static str {
        match self {
            BackupRealm::FamilyTree => "family-tree-token",
            BackupRealm::Cms => "cms-token",
        }
    }
}

impl fmt::Display for BackupRealm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupRealm {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "family-tree" => Ok(BackupRealm::FamilyTree),
            "cms" => Ok(BackupRealm::Cms),
            other => Err(AppError::Validation(format!("Unknown realm '{}'", other))),
        }
    }
}

/// What started a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Auto,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Auto => "auto",
            TriggerType::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(TriggerType::Auto),
            "manual" => Ok(TriggerType::Manual),
            other => Err(AppError::Validation(format!("Unknown trigger type '{}'", other))),
        }
    }
}

/// `InProgress -> Completed | Failed`. Both outcomes are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::InProgress => "in-progress",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BackupStatus::InProgress)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in-progress" => Ok(BackupStatus::InProgress),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(AppError::Validation(format!("Unknown backup status '{}'", other))),
        }
    }
}

/// Record count of one collection inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CollectionCount {
    pub name: String,
    pub count: u64,
}

/// Computed once at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BackupStats {
    pub total_records: u64,
    pub collections: Vec<CollectionCount>,
    pub size_in_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BackupMetadata {
    pub server_timestamp: DateTime<Utc>,
    pub checksum_sha256: Option<String>,
    pub runtime_version: String,
}

/// Present only on failed backups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorInfo {
    pub message: String,
    pub trace: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A point-in-time copy of one realm's dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub backup_id: String,
    pub backup_type: BackupRealm,
    pub trigger_type: TriggerType,
    pub source_dashboard: String,
    pub created_by: String,
    pub status: BackupStatus,
    pub data: Option<SnapshotPayload>,
    pub stats: Option<BackupStats>,
    pub metadata: BackupMetadata,
    pub error_info: Option<ErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Generate `{realm}-{trigger}-{unix_millis}-{random6hex}`.
pub fn generate_backup_id(realm: BackupRealm, trigger: TriggerType, now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::rng().random::<u32>() & 0x00FF_FFFF;
    format!(
        "{}-{}-{}-{:06x}",
        realm,
        trigger,
        now.timestamp_millis(),
        suffix
    )
}

impl Backup {
    /// A fresh placeholder in the `InProgress` state.
    pub fn in_progress(
        realm: BackupRealm,
        trigger: TriggerType,
        source_dashboard: impl Into<String>,
        created_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            backup_id: generate_backup_id(realm, trigger, now),
            backup_type: realm,
            trigger_type: trigger,
            source_dashboard: source_dashboard.into(),
            created_by: created_by.into(),
            status: BackupStatus::InProgress,
            data: None,
            stats: None,
            metadata: BackupMetadata {
                server_timestamp: now,
                checksum_sha256: None,
                runtime_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            error_info: None,
            created_at: now,
            completed_at: None,
        }
    }

    fn ensure_in_progress(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Backup {} is already {}",
                self.backup_id, self.status
            )));
        }
        Ok(())
    }

    /// Move to `Completed`, attaching the payload and its fingerprint.
    pub fn complete(
        &mut self,
        data: SnapshotPayload,
        stats: BackupStats,
        checksum: String,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_in_progress()?;
        self.data = Some(data);
        self.stats = Some(stats);
        self.metadata.checksum_sha256 = Some(checksum);
        self.status = BackupStatus::Completed;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Move to `Failed` with captured error details.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        trace: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_in_progress()?;
        self.status = BackupStatus::Failed;
        self.error_info = Some(ErrorInfo {
            message: message.into(),
            trace,
            timestamp: at,
        });
        self.completed_at = Some(at);
        Ok(())
    }

    /// The same record without its payload.
    pub fn summary(&self) -> BackupSummary {
        BackupSummary {
            backup_id: self.backup_id.clone(),
            backup_type: self.backup_type,
            trigger_type: self.trigger_type,
            source_dashboard: self.source_dashboard.clone(),
            created_by: self.created_by.clone(),
            status: self.status,
            stats: self.stats.clone(),
            metadata: self.metadata.clone(),
            error_info: self.error_info.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// List projection of a backup: every field except `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BackupSummary {
    pub backup_id: String,
    pub backup_type: BackupRealm,
    pub trigger_type: TriggerType,
    pub source_dashboard: String,
    pub created_by: String,
    pub status: BackupStatus,
    pub stats: Option<BackupStats>,
    pub metadata: BackupMetadata,
    pub error_info: Option<ErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-realm aggregate counts kept by the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct BackupCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_progress: u64,
    pub last_backup_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::snapshot::SnapshotPayload;

    fn placeholder() -> Backup {
        Backup::in_progress(
            BackupRealm::FamilyTree,
            TriggerType::Manual,
            "family-tree",
            "alice",
            Utc::now(),
        )
    }

    fn empty_stats() -> BackupStats {
        BackupStats {
            total_records: 0,
            collections: vec![],
            size_in_bytes: 0,
        }
    }

    #[test]
    fn test_backup_id_format() {
        let now = Utc::now();
        let id = generate_backup_id(BackupRealm::FamilyTree, TriggerType::Auto, now);
        let prefix = format!("family-tree-auto-{}-", now.timestamp_millis());
        assert!(id.starts_with(&prefix), "unexpected id {}", id);
        let suffix = &id[prefix.len()..];
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_backup_ids_differ_within_same_millisecond() {
        let now = Utc::now();
        let ids: std::collections::HashSet<String> = (0..50)
            .map(|_| generate_backup_id(BackupRealm::Cms, TriggerType::Manual, now))
            .collect();
        assert!(ids.len() > 1);
    }

    #[test]
    fn test_complete_from_in_progress() {
        let mut backup = placeholder();
        let payload = SnapshotPayload::FamilyTree { persons: vec![] };
        backup
            .complete(payload, empty_stats(), "abc".into(), Utc::now())
            .unwrap();
        assert_eq!(backup.status, BackupStatus::Completed);
        assert_eq!(backup.metadata.checksum_sha256.as_deref(), Some("abc"));
        assert!(backup.completed_at.is_some());
        assert!(backup.error_info.is_none());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut backup = placeholder();
        backup.fail("store down", None, Utc::now()).unwrap();
        assert_eq!(backup.status, BackupStatus::Failed);

        let payload = SnapshotPayload::FamilyTree { persons: vec![] };
        let err = backup
            .complete(payload, empty_stats(), "abc".into(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(backup.fail("again", None, Utc::now()).is_err());
        assert_eq!(backup.error_info.unwrap().message, "store down");
    }

    #[test]
    fn test_enum_wire_forms() {
        assert_eq!(
            serde_json::to_value(BackupRealm::FamilyTree).unwrap(),
            serde_json::json!("family-tree")
        );
        assert_eq!(
            serde_json::to_value(BackupStatus::InProgress).unwrap(),
            serde_json::json!("in-progress")
        );
        assert_eq!("cms".parse::<BackupRealm>().unwrap(), BackupRealm::Cms);
        assert!("tree".parse::<BackupRealm>().is_err());
        assert_eq!(BackupRealm::Cms.token_type(), "cms-token");
    }

    #[test]
    fn test_summary_omits_payload() {
        let backup = placeholder();
        let value = serde_json::to_value(backup.summary()).unwrap();
        assert!(value.get("data").is_none());
        assert_eq!(value["status"], "in-progress");
    }
}
