//! PostgreSQL implementation of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{
    AuditRepository, BackupRepository, ContentStore, InsertOutcome, SettingsRepository,
    UserRepository,
};
use crate::config::BackupDefaults;
use crate::error::{AppError, Result};
use crate::models::audit_log::{AuditLog, AuditQuery};
use crate::models::backup::{
    Backup, BackupCounts, BackupMetadata, BackupRealm, BackupStats, BackupStatus, BackupSummary,
    ErrorInfo,
};
use crate::models::backup_settings::{BackupSettings, RealmBackupSchedule};
use crate::models::snapshot::{Document, SnapshotPayload};
use crate::models::user::AdminUser;

pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>> {
        let rows: Vec<(Uuid, Json<Document>)> = sqlx::query_as(
            "SELECT id, body FROM content_documents WHERE collection = $1 ORDER BY seq",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, Json(mut body))| {
                body.insert("_id".into(), Value::String(id.to_string()));
                body
            })
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM content_documents WHERE collection = $1")
                .bind(collection)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn delete_all(&self, collection: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM content_documents WHERE collection = $1")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<InsertOutcome> {
        if docs.is_empty() {
            return Ok(InsertOutcome::default());
        }
        let (ids, bodies) = content_rows(docs);

        let bulk = sqlx::query(
            "INSERT INTO content_documents (id, collection, body) \
             SELECT id, $2, body FROM UNNEST($1::uuid[], $3::jsonb[]) AS t(id, body)",
        )
        .bind(&ids)
        .bind(collection)
        .bind(&bodies)
        .execute(&self.pool)
        .await;

        match bulk {
            Ok(result) => Ok(InsertOutcome {
                inserted: result.rows_affected(),
                failed: 0,
            }),
            Err(e) => {
                // One bad row fails the whole statement; retry row by row.
                tracing::warn!(collection, error = %e, "Bulk insert rejected, inserting per document");
                self.insert_each(collection, ids, bodies).await
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

impl PgContentStore {
    async fn insert_each(
        &self,
        collection: &str,
        ids: Vec<Uuid>,
        bodies: Vec<Value>,
    ) -> Result<InsertOutcome> {
        let mut outcome = InsertOutcome::default();
        for (id, body) in ids.into_iter().zip(bodies) {
            let inserted = sqlx::query(
                "INSERT INTO content_documents (id, collection, body) VALUES ($1, $2, $3)",
            )
            .bind(id)
            .bind(collection)
            .bind(Json(&body))
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(_) => outcome.inserted += 1,
                Err(e) => {
                    tracing::warn!(collection, error = %e, "Document insert rejected");
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }
}

/// Fresh row ids and bodies for a batch. The row id is the identity, so an
/// `_id` in the body is never stored.
fn content_rows(docs: Vec<Document>) -> (Vec<Uuid>, Vec<Value>) {
    docs.into_iter()
        .map(|mut doc| {
            doc.remove("_id");
            (Uuid::new_v4(), Value::Object(doc))
        })
        .unzip()
}

#[derive(FromRow)]
struct BackupRow {
    backup_id: String,
    backup_type: String,
    trigger_type: String,
    source_dashboard: String,
    created_by: String,
    status: String,
    #[sqlx(default)]
    data: Option<Json<SnapshotPayload>>,
    stats: Option<Json<BackupStats>>,
    metadata: Json<BackupMetadata>,
    error_info: Option<Json<ErrorInfo>>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<BackupRow> for Backup {
    type Error = AppError;

    fn try_from(row: BackupRow) -> Result<Self> {
        Ok(Backup {
            backup_id: row.backup_id,
            backup_type: row.backup_type.parse()?,
            trigger_type: row.trigger_type.parse()?,
            source_dashboard: row.source_dashboard,
            created_by: row.created_by,
            status: row.status.parse()?,
            data: row.data.map(|Json(d)| d),
            stats: row.stats.map(|Json(s)| s),
            metadata: row.metadata.0,
            error_info: row.error_info.map(|Json(e)| e),
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

const SUMMARY_COLUMNS: &str = "backup_id, backup_type, trigger_type, source_dashboard, \
     created_by, status, stats, metadata, error_info, created_at, completed_at";

pub struct PgBackupRepository {
    pool: PgPool,
}

impl PgBackupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn rows_to_summaries(rows: Vec<BackupRow>) -> Result<Vec<BackupSummary>> {
    rows.into_iter()
        .map(|row| Backup::try_from(row).map(|b| b.summary()))
        .collect()
}

#[async_trait]
impl BackupRepository for PgBackupRepository {
    async fn insert(&self, backup: &Backup) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backups (backup_id, backup_type, trigger_type, source_dashboard,
                                 created_by, status, data, stats, metadata, error_info,
                                 created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&backup.backup_id)
        .bind(backup.backup_type.as_str())
        .bind(backup.trigger_type.as_str())
        .bind(&backup.source_dashboard)
        .bind(&backup.created_by)
        .bind(backup.status.as_str())
        .bind(backup.data.as_ref().map(Json))
        .bind(backup.stats.as_ref().map(Json))
        .bind(Json(&backup.metadata))
        .bind(backup.error_info.as_ref().map(Json))
        .bind(backup.created_at)
        .bind(backup.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, backup: &Backup) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE backups
            SET status = $2, data = $3, stats = $4, metadata = $5, error_info = $6,
                completed_at = $7
            WHERE backup_id = $1
            "#,
        )
        .bind(&backup.backup_id)
        .bind(backup.status.as_str())
        .bind(backup.data.as_ref().map(Json))
        .bind(backup.stats.as_ref().map(Json))
        .bind(Json(&backup.metadata))
        .bind(backup.error_info.as_ref().map(Json))
        .bind(backup.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Backup {}", backup.backup_id)));
        }
        Ok(())
    }

    async fn find(&self, realm: BackupRealm, backup_id: &str) -> Result<Option<Backup>> {
        let row: Option<BackupRow> = sqlx::query_as(
            "SELECT * FROM backups WHERE backup_id = $1 AND backup_type = $2",
        )
        .bind(backup_id)
        .bind(realm.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Backup::try_from).transpose()
    }

    async fn list(
        &self,
        realm: BackupRealm,
        status: Option<BackupStatus>,
        limit: i64,
    ) -> Result<Vec<BackupSummary>> {
        let sql = format!(
            "SELECT {} FROM backups WHERE backup_type = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC LIMIT $3",
            SUMMARY_COLUMNS
        );
        let rows: Vec<BackupRow> = sqlx::query_as(&sql)
            .bind(realm.as_str())
            .bind(status.map(|s| s.as_str()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows_to_summaries(rows)
    }

    async fn completed_newest_first(&self, realm: BackupRealm) -> Result<Vec<BackupSummary>> {
        let sql = format!(
            "SELECT {} FROM backups WHERE backup_type = $1 AND status = 'completed' \
             ORDER BY created_at DESC",
            SUMMARY_COLUMNS
        );
        let rows: Vec<BackupRow> = sqlx::query_as(&sql)
            .bind(realm.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows_to_summaries(rows)
    }

    async fn delete(&self, realm: BackupRealm, backup_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM backups WHERE backup_id = $1 AND backup_type = $2")
            .bind(backup_id)
            .bind(realm.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_many(&self, realm: BackupRealm, backup_ids: &[String]) -> Result<u64> {
        if backup_ids.is_empty() {
            return Ok(0);
        }
        let result =
            sqlx::query("DELETE FROM backups WHERE backup_type = $1 AND backup_id = ANY($2)")
                .bind(realm.as_str())
                .bind(backup_ids)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn stale(
        &self,
        realm: BackupRealm,
        statuses: &[BackupStatus],
        older_than: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT backup_id FROM backups \
             WHERE backup_type = $1 AND status = ANY($2) AND created_at < $3",
        )
        .bind(realm.as_str())
        .bind(&statuses)
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn summary_counts(&self, realm: BackupRealm) -> Result<BackupCounts> {
        let (total, completed, failed, in_progress, last_backup_at): (
            i64,
            i64,
            i64,
            i64,
            Option<DateTime<Utc>>,
        ) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE status = 'completed'),
                   COUNT(*) FILTER (WHERE status = 'failed'),
                   COUNT(*) FILTER (WHERE status = 'in-progress'),
                   MAX(created_at) FILTER (WHERE status = 'completed')
            FROM backups WHERE backup_type = $1
            "#,
        )
        .bind(realm.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(BackupCounts {
            total: total as u64,
            completed: completed as u64,
            failed: failed as u64,
            in_progress: in_progress as u64,
            last_backup_at,
        })
    }
}

#[derive(FromRow)]
struct ScheduleRow {
    realm: String,
    enabled: bool,
    interval_hours: i64,
    max_backups_to_keep: i64,
    last_auto_backup: Option<DateTime<Utc>>,
}

pub struct PgSettingsRepository {
    pool: PgPool,
    defaults: BackupDefaults,
}

impl PgSettingsRepository {
    pub fn new(pool: PgPool, defaults: BackupDefaults) -> Self {
        Self { pool, defaults }
    }

    async fn seed(&self) -> Result<()> {
        for realm in BackupRealm::ALL {
            sqlx::query(
                "INSERT INTO backup_settings (realm, enabled, interval_hours, max_backups_to_keep) \
                 VALUES ($1, TRUE, $2, $3) ON CONFLICT (realm) DO NOTHING",
            )
            .bind(realm.as_str())
            .bind(self.defaults.interval_hours)
            .bind(self.defaults.max_backups_to_keep)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn write_schedule(
        &self,
        realm: BackupRealm,
        schedule: &RealmBackupSchedule,
        include_last_run: bool,
    ) -> Result<()> {
        self.seed().await?;
        let sql = if include_last_run {
            "UPDATE backup_settings SET enabled = $2, interval_hours = $3, \
             max_backups_to_keep = $4, last_auto_backup = $5, updated_at = NOW() WHERE realm = $1"
        } else {
            "UPDATE backup_settings SET enabled = $2, interval_hours = $3, \
             max_backups_to_keep = $4, updated_at = NOW() WHERE realm = $1"
        };
        let mut query = sqlx::query(sql)
            .bind(realm.as_str())
            .bind(schedule.enabled)
            .bind(schedule.interval_hours)
            .bind(schedule.max_backups_to_keep);
        if include_last_run {
            query = query.bind(schedule.last_auto_backup);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsRepository for PgSettingsRepository {
    async fn load(&self) -> Result<BackupSettings> {
        self.seed().await?;
        let rows: Vec<ScheduleRow> = sqlx::query_as(
            "SELECT realm, enabled, interval_hours, max_backups_to_keep, last_auto_backup \
             FROM backup_settings",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut settings = BackupSettings::from_defaults(&self.defaults);
        for row in rows {
            let realm: BackupRealm = row.realm.parse()?;
            *settings.for_realm_mut(realm) = RealmBackupSchedule {
                enabled: row.enabled,
                interval_hours: row.interval_hours,
                max_backups_to_keep: row.max_backups_to_keep,
                last_auto_backup: row.last_auto_backup,
            };
        }
        Ok(settings)
    }

    async fn save(&self, settings: &BackupSettings) -> Result<()> {
        settings.validate()?;
        for realm in BackupRealm::ALL {
            self.write_schedule(realm, settings.for_realm(realm), true)
                .await?;
        }
        Ok(())
    }

    async fn update_schedule(
        &self,
        realm: BackupRealm,
        schedule: &RealmBackupSchedule,
    ) -> Result<()> {
        schedule.validate()?;
        self.write_schedule(realm, schedule, false).await
    }

    async fn touch_last_backup(&self, realm: BackupRealm, at: DateTime<Utc>) -> Result<()> {
        self.seed().await?;
        sqlx::query(
            "UPDATE backup_settings SET last_auto_backup = $2, updated_at = NOW() WHERE realm = $1",
        )
        .bind(realm.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_claim_realm(
        &self,
        realm: BackupRealm,
        now: DateTime<Utc>,
        min_gap: Duration,
    ) -> Result<bool> {
        self.seed().await?;
        let result = sqlx::query(
            "UPDATE backup_settings SET scheduler_claimed_at = $2 \
             WHERE realm = $1 AND (scheduler_claimed_at IS NULL OR scheduler_claimed_at <= $3)",
        )
        .bind(realm.as_str())
        .bind(now)
        .bind(now - min_gap)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(FromRow)]
struct AuditRow {
    id: Uuid,
    action: String,
    category: String,
    resource: Option<String>,
    username: String,
    user_role: String,
    dashboard: String,
    details: Json<Value>,
    success: bool,
    ip: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditLog {
    fn from(row: AuditRow) -> Self {
        AuditLog {
            id: row.id,
            action: row.action,
            category: row.category,
            resource: row.resource,
            user: row.username,
            user_role: row.user_role,
            dashboard: row.dashboard,
            details: row.details.0,
            success: row.success,
            timestamp: row.created_at,
            ip: row.ip,
        }
    }
}

pub struct PgAuditRepository {
    pool: PgPool,
}

impl PgAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn append(&self, entry: &AuditLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, action, category, resource, username, user_role,
                                   dashboard, details, success, ip, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.action)
        .bind(&entry.category)
        .bind(&entry.resource)
        .bind(&entry.user)
        .bind(&entry.user_role)
        .bind(&entry.dashboard)
        .bind(Json(&entry.details))
        .bind(entry.success)
        .bind(&entry.ip)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLog>> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, action, category, resource, username, user_role, dashboard, details,
                   success, ip, created_at
            FROM audit_log
            WHERE ($1::text IS NULL OR dashboard = $1)
              AND ($2::text IS NULL OR action = $2)
              AND ($3::text IS NULL OR resource = $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#,
        )
        .bind(&query.dashboard)
        .bind(&query.action)
        .bind(&query.resource)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AuditLog::from).collect())
    }
}

/// Admin accounts of one realm. The table is fixed by the realm.
pub struct PgUserRepository {
    pool: PgPool,
    table: &'static str,
}

impl PgUserRepository {
    pub fn new(pool: PgPool, realm: BackupRealm) -> Self {
        let table = match realm {
            BackupRealm::Cms => "cms_users",
            BackupRealm::FamilyTree => "family_tree_users",
        };
        Self { pool, table }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_username(&self, username: &str) -> Result<Option<AdminUser>> {
        let sql = format!("SELECT * FROM {} WHERE username = $1", self.table);
        let user = sqlx::query_as::<_, AdminUser>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AdminUser>> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", self.table);
        let user = sqlx::query_as::<_, AdminUser>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn insert(&self, user: &AdminUser) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, username, password_hash, role, permissions, is_active, \
             failed_login_attempts, locked_until, password_changed_at, last_login_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            self.table
        );
        sqlx::query(&sql)
            .bind(user.id)
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(&user.role)
            .bind(&user.permissions)
            .bind(user.is_active)
            .bind(user.failed_login_attempts)
            .bind(user.locked_until)
            .bind(user.password_changed_at)
            .bind(user.last_login_at)
            .bind(user.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    AppError::Conflict(format!("User {} already exists", user.username))
                }
                other => AppError::from(other),
            })?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn register_failed_login(&self, id: Uuid) -> Result<i32> {
        let sql = format!(
            "UPDATE {} SET failed_login_attempts = failed_login_attempts + 1 \
             WHERE id = $1 RETURNING failed_login_attempts",
            self.table
        );
        let attempts: Option<i32> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        attempts.ok_or_else(|| AppError::NotFound(format!("User {}", id)))
    }

    async fn lock_account(&self, id: Uuid, until: DateTime<Utc>) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET locked_until = $2, failed_login_attempts = 0 WHERE id = $1",
            self.table
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(until)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_successful_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET failed_login_attempts = 0, locked_until = NULL, last_login_at = $2 \
             WHERE id = $1",
            self.table
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_rows_drop_body_id() {
        let docs = vec![
            json!({"_id": "a1", "title": "Olive harvest"}).as_object().cloned().unwrap(),
            json!({"title": "Wedding songs"}).as_object().cloned().unwrap(),
        ];
        let (ids, bodies) = content_rows(docs);
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(bodies[0], json!({"title": "Olive harvest"}));
        assert_eq!(bodies[1], json!({"title": "Wedding songs"}));
    }
}
