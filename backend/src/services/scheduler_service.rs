//! Automatic backup scheduler.
//!
//! A single polling task per process. Each check walks both realms in turn
//! and backs up the ones whose interval has elapsed. A failure in one realm
//! is reported and the next realm is still checked.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use utoipa::ToSchema;

use crate::config::SchedulerConfig;
use crate::models::backup::{BackupRealm, TriggerType};
use crate::services::audit_service::AuditContext;
use crate::services::backup_service::{
    BackupOutcome, BackupService, StaleTtl, SYSTEM_CREATOR,
};
use crate::store::SettingsRepository;

/// What one check did for one realm.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TickAction {
    Skipped { reason: String },
    BackedUp { backup_id: String },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RealmTickOutcome {
    pub realm: BackupRealm,
    #[serde(flatten)]
    pub action: TickAction,
    pub stale_purged: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub realms: Vec<RealmTickOutcome>,
}

impl TickReport {
    pub fn for_realm(&self, realm: BackupRealm) -> Option<&RealmTickOutcome> {
        self.realms.iter().find(|r| r.realm == realm)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchedulerStatus {
    pub running: bool,
    pub check_interval_secs: u64,
    pub initial_delay_secs: u64,
}

pub struct BackupScheduler {
    backups: Arc<BackupService>,
    settings: Arc<dyn SettingsRepository>,
    config: SchedulerConfig,
    ttl: StaleTtl,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackupScheduler {
    pub fn new(
        backups: Arc<BackupService>,
        settings: Arc<dyn SettingsRepository>,
        config: SchedulerConfig,
        ttl: StaleTtl,
    ) -> Self {
        Self {
            backups,
            settings,
            config,
            ttl,
            handle: Mutex::new(None),
        }
    }

    fn handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the polling task. Returns `false` if one is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut slot = self.handle();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::debug!("Backup scheduler already running");
            return false;
        }

        let this = Arc::clone(self);
        let initial_delay = Duration::from_secs(self.config.initial_delay_secs);
        let period = Duration::from_secs(self.config.check_interval_secs);
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let report = this.trigger_now().await;
                tracing::debug!(realms = report.realms.len(), "Backup scheduler check finished");
            }
        }));

        tracing::info!(
            initial_delay_secs = self.config.initial_delay_secs,
            check_interval_secs = self.config.check_interval_secs,
            "Backup scheduler started"
        );
        true
    }

    /// Abort the polling task. Returns whether one was running.
    pub fn stop(&self) -> bool {
        match self.handle().take() {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                tracing::info!("Backup scheduler stopped");
                was_running
            }
            None => false,
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.handle().as_ref().is_some_and(|h| !h.is_finished()),
            check_interval_secs: self.config.check_interval_secs,
            initial_delay_secs: self.config.initial_delay_secs,
        }
    }

    /// Run one check inline over every realm.
    pub async fn trigger_now(&self) -> TickReport {
        let started_at = Utc::now();
        let mut realms = Vec::with_capacity(BackupRealm::ALL.len());
        for realm in BackupRealm::ALL {
            realms.push(self.check_and_sweep(realm).await);
        }
        TickReport { started_at, realms }
    }

    /// Run one check inline for a single realm. The other realm's
    /// backups and settings are not touched.
    pub async fn trigger_realm(&self, realm: BackupRealm) -> TickReport {
        let started_at = Utc::now();
        let outcome = self.check_and_sweep(realm).await;
        TickReport {
            started_at,
            realms: vec![outcome],
        }
    }

    async fn check_and_sweep(&self, realm: BackupRealm) -> RealmTickOutcome {
        let action = self.check_realm(realm).await;
        let stale_purged = match self.backups.cleanup_stale_backups(realm, self.ttl).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(realm = %realm, error = %e, "Stale backup sweep failed");
                0
            }
        };
        RealmTickOutcome {
            realm,
            action,
            stale_purged,
        }
    }

    async fn check_realm(&self, realm: BackupRealm) -> TickAction {
        let now = Utc::now();
        let schedule = match self.settings.load().await {
            Ok(settings) => settings.for_realm(realm).clone(),
            Err(e) => {
                tracing::warn!(realm = %realm, error = %e, "Failed to load backup settings");
                return TickAction::Failed {
                    message: e.to_string(),
                };
            }
        };
        if !schedule.enabled {
            return TickAction::Skipped {
                reason: "disabled".into(),
            };
        }
        if !schedule.is_due(now) {
            return TickAction::Skipped {
                reason: "not due".into(),
            };
        }

        let gap = chrono::Duration::seconds(self.config.claim_gap_secs as i64);
        match self.settings.try_claim_realm(realm, now, gap).await {
            Ok(true) => {}
            Ok(false) => {
                return TickAction::Skipped {
                    reason: "claimed by another instance".into(),
                }
            }
            Err(e) => {
                tracing::warn!(realm = %realm, error = %e, "Failed to claim realm for backup");
                return TickAction::Failed {
                    message: e.to_string(),
                };
            }
        }

        // Another instance may have finished a run between our read and claim.
        match self.settings.load().await {
            Ok(settings) if !settings.for_realm(realm).is_due(Utc::now()) => {
                return TickAction::Skipped {
                    reason: "not due".into(),
                }
            }
            Ok(_) => {}
            Err(e) => {
                return TickAction::Failed {
                    message: e.to_string(),
                }
            }
        }

        tracing::info!(realm = %realm, "Automatic backup due");
        match self
            .backups
            .create_backup(realm, TriggerType::Auto, SYSTEM_CREATOR, &AuditContext::system())
            .await
        {
            BackupOutcome::Completed(summary) => TickAction::BackedUp {
                backup_id: summary.backup_id,
            },
            BackupOutcome::Failed { message, .. } => TickAction::Failed { message },
        }
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_action_serialization() {
        let outcome = RealmTickOutcome {
            realm: BackupRealm::FamilyTree,
            action: TickAction::BackedUp {
                backup_id: "family-tree-auto-1-000000".into(),
            },
            stale_purged: 0,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["realm"], "family-tree");
        assert_eq!(value["action"], "backed_up");
        assert_eq!(value["backup_id"], "family-tree-auto-1-000000");
    }
}
