//! Audit logging service.
//!
//! Every state-changing backup operation and every authentication denial
//! lands here. Entries are append-only.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::models::audit_log::{AuditLog, AuditQuery};
use crate::models::backup::BackupRealm;
use crate::store::AuditRepository;

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    // Backups
    BackupInitiated,
    BackupCompleted,
    BackupFailed,
    BackupCleanup,
    BackupDeleted,
    BackupStalePurged,

    // Restores
    RestoreInitiated,
    RestoreCompleted,
    RestoreFailed,

    // Authentication
    Login,
    LoginFailed,
    AccountLocked,
    AccessDenied,

    // Configuration
    SettingsUpdated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::BackupInitiated => "BACKUP_INITIATED",
            AuditAction::BackupCompleted => "BACKUP_COMPLETED",
            AuditAction::BackupFailed => "BACKUP_FAILED",
            AuditAction::BackupCleanup => "BACKUP_CLEANUP",
            AuditAction::BackupDeleted => "BACKUP_DELETED",
            AuditAction::BackupStalePurged => "BACKUP_STALE_PURGED",
            AuditAction::RestoreInitiated => "RESTORE_INITIATED",
            AuditAction::RestoreCompleted => "RESTORE_COMPLETED",
            AuditAction::RestoreFailed => "RESTORE_FAILED",
            AuditAction::Login => "LOGIN",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::AccountLocked => "ACCOUNT_LOCKED",
            AuditAction::AccessDenied => "ACCESS_DENIED",
            AuditAction::SettingsUpdated => "SETTINGS_UPDATED",
        }
    }

    /// The category an action is filed under by default.
    pub fn category(&self) -> AuditCategory {
        match self {
            AuditAction::BackupInitiated
            | AuditAction::BackupCompleted
            | AuditAction::BackupFailed
            | AuditAction::BackupCleanup
            | AuditAction::BackupDeleted
            | AuditAction::BackupStalePurged => AuditCategory::Backup,
            AuditAction::RestoreInitiated
            | AuditAction::RestoreCompleted
            | AuditAction::RestoreFailed => AuditCategory::Restore,
            AuditAction::Login
            | AuditAction::LoginFailed
            | AuditAction::AccountLocked
            | AuditAction::AccessDenied => AuditCategory::Security,
            AuditAction::SettingsUpdated => AuditCategory::Settings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditCategory {
    Backup,
    Restore,
    Security,
    Settings,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::Backup => "backup",
            AuditCategory::Restore => "restore",
            AuditCategory::Security => "security",
            AuditCategory::Settings => "settings",
        }
    }
}

/// Who performed an action, and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditContext {
    pub user: String,
    pub user_role: String,
    pub dashboard: String,
    pub ip: Option<String>,
}

impl AuditContext {
    pub fn new(
        user: impl Into<String>,
        user_role: impl Into<String>,
        realm: BackupRealm,
        ip: Option<String>,
    ) -> Self {
        Self {
            user: user.into(),
            user_role: user_role.into(),
            dashboard: realm.as_str().to_string(),
            ip,
        }
    }

    /// The scheduler's identity.
    pub fn system() -> Self {
        Self {
            user: "system".into(),
            user_role: "system".into(),
            dashboard: "system".into(),
            ip: None,
        }
    }

    /// A caller that has not authenticated.
    pub fn anonymous(realm: BackupRealm, ip: Option<String>) -> Self {
        Self::new("anonymous", "none", realm, ip)
    }
}

/// Audit log entry builder
pub struct AuditEntry {
    action: AuditAction,
    category: AuditCategory,
    resource: Option<String>,
    context: AuditContext,
    details: Value,
    success: bool,
}

impl AuditEntry {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            category: action.category(),
            resource: None,
            context: AuditContext::system(),
            details: json!({}),
            success: true,
        }
    }

    pub fn category(mut self, category: AuditCategory) -> Self {
        self.category = category;
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn context(mut self, context: &AuditContext) -> Self {
        self.context = context.clone();
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    fn into_log(self) -> AuditLog {
        AuditLog {
            id: Uuid::new_v4(),
            action: self.action.as_str().to_string(),
            category: self.category.as_str().to_string(),
            resource: self.resource,
            user: self.context.user,
            user_role: self.context.user_role,
            dashboard: self.context.dashboard,
            details: self.details,
            success: self.success,
            timestamp: Utc::now(),
            ip: self.context.ip,
        }
    }
}

/// Audit service
pub struct AuditService {
    repo: Arc<dyn AuditRepository>,
}

impl AuditService {
    pub fn new(repo: Arc<dyn AuditRepository>) -> Self {
        Self { repo }
    }

    /// Log an audit entry
    pub async fn log(&self, entry: AuditEntry) -> Result<Uuid> {
        let log = entry.into_log();
        self.repo.append(&log).await?;
        tracing::debug!(
            action = %log.action,
            resource = ?log.resource,
            user = %log.user,
            success = log.success,
            "Audit entry written"
        );
        Ok(log.id)
    }

    /// Log an entry, downgrading a sink failure to a warning.
    pub async fn record(&self, entry: AuditEntry) {
        let action = entry.action;
        if let Err(e) = self.log(entry).await {
            tracing::warn!(action = action.as_str(), error = %e, "Failed to write audit entry");
        }
    }

    /// Query audit logs, newest first
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLog>> {
        self.repo.query(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::store::memory::MemoryAuditRepository;
    use async_trait::async_trait;

    struct BrokenSink;

    #[async_trait]
    impl AuditRepository for BrokenSink {
        async fn append(&self, _entry: &AuditLog) -> Result<()> {
            Err(AppError::Storage("audit sink offline".into()))
        }

        async fn query(&self, _query: &AuditQuery) -> Result<Vec<AuditLog>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_action_strings() {
        assert_eq!(AuditAction::BackupStalePurged.as_str(), "BACKUP_STALE_PURGED");
        assert_eq!(AuditAction::AccessDenied.category(), AuditCategory::Security);
        assert_eq!(AuditAction::RestoreFailed.category().as_str(), "restore");
    }

    #[tokio::test]
    async fn test_log_and_query_by_resource() {
        let service = AuditService::new(Arc::new(MemoryAuditRepository::new()));
        let ctx = AuditContext::new("amina", "admin", BackupRealm::Cms, Some("10.0.0.1".into()));
        service
            .log(
                AuditEntry::new(AuditAction::BackupFailed)
                    .resource("cms-manual-1-000001")
                    .context(&ctx)
                    .details(json!({"error": "boom"}))
                    .failed(),
            )
            .await
            .unwrap();
        service
            .log(AuditEntry::new(AuditAction::Login).context(&ctx))
            .await
            .unwrap();

        let found = service
            .query(&AuditQuery {
                resource: Some("cms-manual-1-000001".into()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].action, "BACKUP_FAILED");
        assert_eq!(found[0].category, "backup");
        assert_eq!(found[0].dashboard, "cms");
        assert_eq!(found[0].ip.as_deref(), Some("10.0.0.1"));
        assert!(!found[0].success);
    }

    #[tokio::test]
    async fn test_record_swallows_sink_failure() {
        let service = AuditService::new(Arc::new(BrokenSink));
        assert!(service
            .log(AuditEntry::new(AuditAction::BackupCleanup))
            .await
            .is_err());
        service.record(AuditEntry::new(AuditAction::BackupCleanup)).await;
    }
}
