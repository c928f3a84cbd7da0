//! Automatic backup schedule, one entry per realm.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::BackupDefaults;
use crate::error::{AppError, Result};
use crate::models::backup::BackupRealm;

/// Upper bound on `interval_hours`: ten years.
pub const MAX_INTERVAL_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RealmBackupSchedule {
    pub enabled: bool,
    pub interval_hours: i64,
    pub max_backups_to_keep: i64,
    pub last_auto_backup: Option<DateTime<Utc>>,
}

impl RealmBackupSchedule {
    pub fn from_defaults(defaults: &BackupDefaults) -> Self {
        Self {
            enabled: true,
            interval_hours: defaults.interval_hours,
            max_backups_to_keep: defaults.max_backups_to_keep,
            last_auto_backup: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_hours <= 0 {
            return Err(AppError::Validation(
                "interval_hours must be greater than 0".into(),
            ));
        }
        if self.interval_hours > MAX_INTERVAL_HOURS {
            return Err(AppError::Validation(format!(
                "interval_hours must be at most {}",
                MAX_INTERVAL_HOURS
            )));
        }
        if self.max_backups_to_keep < 1 {
            return Err(AppError::Validation(
                "max_backups_to_keep must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Earliest instant the next automatic backup may run. `None` when the
    /// schedule never ran or the interval does not fit in a timestamp.
    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        let last = self.last_auto_backup?;
        Duration::try_hours(self.interval_hours).and_then(|d| last.checked_add_signed(d))
    }

    /// Enabled, and either never run or the interval has fully elapsed.
    /// An interval too large to represent is never due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if self.last_auto_backup.is_none() {
            return true;
        }
        self.next_due_at().is_some_and(|due| now >= due)
    }
}

/// The settings singleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BackupSettings {
    pub family_tree_backup: RealmBackupSchedule,
    pub cms_backup: RealmBackupSchedule,
}

impl BackupSettings {
    pub fn from_defaults(defaults: &BackupDefaults) -> Self {
        Self {
            family_tree_backup: RealmBackupSchedule::from_defaults(defaults),
            cms_backup: RealmBackupSchedule::from_defaults(defaults),
        }
    }

    pub fn for_realm(&self, realm: BackupRealm) -> &RealmBackupSchedule {
        match realm {
            BackupRealm::FamilyTree => &self.family_tree_backup,
            BackupRealm::Cms => &self.cms_backup,
        }
    }

    pub fn for_realm_mut(&mut self, realm: BackupRealm) -> &mut RealmBackupSchedule {
        match realm {
            BackupRealm::FamilyTree => &mut self.family_tree_backup,
            BackupRealm::Cms => &mut self.cms_backup,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.family_tree_backup.validate()?;
        self.cms_backup.validate()
    }
}

/// Partial update from the settings screen. `last_auto_backup` is owned by
/// the backup service and cannot be set here.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateScheduleRequest {
    pub enabled: Option<bool>,
    pub interval_hours: Option<i64>,
    pub max_backups_to_keep: Option<i64>,
}

impl UpdateScheduleRequest {
    /// Apply onto a copy of `current`, returning the validated result.
    pub fn apply(&self, current: &RealmBackupSchedule) -> Result<RealmBackupSchedule> {
        let mut next = current.clone();
        if let Some(enabled) = self.enabled {
            next.enabled = enabled;
        }
        if let Some(hours) = self.interval_hours {
            next.interval_hours = hours;
        }
        if let Some(keep) = self.max_backups_to_keep {
            next.max_backups_to_keep = keep;
        }
        next.validate()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(hours: i64, last: Option<DateTime<Utc>>) -> RealmBackupSchedule {
        RealmBackupSchedule {
            enabled: true,
            interval_hours: hours,
            max_backups_to_keep: 5,
            last_auto_backup: last,
        }
    }

    #[test]
    fn test_never_run_is_due() {
        assert!(schedule(24, None).is_due(Utc::now()));
    }

    #[test]
    fn test_due_after_interval_elapsed() {
        let now = Utc::now();
        assert!(schedule(48, Some(now - Duration::hours(50))).is_due(now));
        assert!(!schedule(48, Some(now - Duration::hours(47))).is_due(now));
        assert!(schedule(48, Some(now - Duration::hours(48))).is_due(now));
    }

    #[test]
    fn test_disabled_is_never_due() {
        let mut s = schedule(1, None);
        s.enabled = false;
        assert!(!s.is_due(Utc::now()));
    }

    #[test]
    fn test_validate_bounds() {
        assert!(schedule(0, None).validate().is_err());
        let mut s = schedule(1, None);
        s.max_backups_to_keep = 0;
        assert!(s.validate().is_err());
        assert!(schedule(1, None).validate().is_ok());
        assert!(schedule(MAX_INTERVAL_HOURS, None).validate().is_ok());
        assert!(matches!(
            schedule(MAX_INTERVAL_HOURS + 1, None).validate(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_oversized_interval_is_not_due() {
        let now = Utc::now();
        let s = schedule(10_000_000_000, Some(now - Duration::hours(1)));
        assert_eq!(s.next_due_at(), None);
        assert!(!s.is_due(now));
        assert!(!schedule(i64::MAX, Some(now)).is_due(now));
    }

    #[test]
    fn test_update_request_rejects_oversized_interval() {
        let current = schedule(24, Some(Utc::now()));
        let rejected = UpdateScheduleRequest {
            interval_hours: Some(10_000_000_000),
            ..Default::default()
        }
        .apply(&current);
        assert!(matches!(rejected, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_update_request_keeps_last_run_and_validates() {
        let now = Utc::now();
        let current = schedule(24, Some(now));
        let next = UpdateScheduleRequest {
            interval_hours: Some(12),
            ..Default::default()
        }
        .apply(&current)
        .unwrap();
        assert_eq!(next.interval_hours, 12);
        assert_eq!(next.last_auto_backup, Some(now));

        let rejected = UpdateScheduleRequest {
            max_backups_to_keep: Some(0),
            ..Default::default()
        }
        .apply(&current);
        assert!(rejected.is_err());
    }

    #[test]
    fn test_defaults_seed_both_realms() {
        let settings = BackupSettings::from_defaults(&BackupDefaults::default());
        assert_eq!(settings.for_realm(BackupRealm::Cms).interval_hours, 24);
        assert_eq!(
            settings.for_realm(BackupRealm::FamilyTree).max_backups_to_keep,
            10
        );
        assert!(settings.validate().is_ok());
    }
}
