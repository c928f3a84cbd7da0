//! Admin user model, stored separately per realm.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

pub const ROLE_SUPER_ADMIN: &str = "super-admin";
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_EDITOR: &str = "editor";

pub const PERM_CREATE_BACKUPS: &str = "create-backups";
pub const PERM_VIEW_BACKUPS: &str = "view-backups";
/// Also covers deleting backups.
pub const PERM_RESTORE_BACKUPS: &str = "restore-backups";
pub const PERM_MANAGE_BACKUP_SETTINGS: &str = "manage-backup-settings";

/// Admin account in either `cms_users` or `family_tree_users`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AdminUser {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AdminUser {
    pub fn new(
        username: impl Into<String>,
        password_hash: impl Into<String>,
        role: impl Into<String>,
        permissions: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            password_hash: password_hash.into(),
            role: role.into(),
            permissions,
            is_active: true,
            failed_login_attempts: 0,
            locked_until: None,
            password_changed_at: None,
            last_login_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }
}

/// Public view of an account, as returned by `/auth/me` and login.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&AdminUser> for UserProfile {
    fn from(user: &AdminUser) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role.clone(),
            permissions: user.permissions.clone(),
            last_login_at: user.last_login_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_lock_window() {
        let now = Utc::now();
        let mut user = AdminUser::new("amina", "hash", ROLE_EDITOR, vec![]);
        assert!(!user.is_locked(now));
        user.locked_until = Some(now + Duration::minutes(5));
        assert!(user.is_locked(now));
        user.locked_until = Some(now - Duration::seconds(1));
        assert!(!user.is_locked(now));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = AdminUser::new("amina", "$2b$secret", ROLE_ADMIN, vec![]);
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("$2b$secret"));
    }
}
