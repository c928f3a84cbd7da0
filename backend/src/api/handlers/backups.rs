//! Backup handlers: manual runs, listing, restore, settings and scheduler
//! control. Every route is realm-scoped through the router's realm
//! extension; permission checks happen here so that denials are audited
//! with the caller's identity.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::api::middleware::auth::AuthExtension;
use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::backup::{Backup, BackupStatus, BackupSummary, TriggerType};
use crate::models::backup_settings::{RealmBackupSchedule, UpdateScheduleRequest};
use crate::models::user::{
    PERM_CREATE_BACKUPS, PERM_MANAGE_BACKUP_SETTINGS, PERM_RESTORE_BACKUPS, PERM_VIEW_BACKUPS,
};
use crate::services::backup_service::{BackupOutcome, BackupStatsReport, RestoreResult};
use crate::services::scheduler_service::{SchedulerStatus, TickReport};

/// Create backup routes
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/backups", get(list_backups).post(create_backup))
        .route("/backups/stats", get(get_stats))
        .route("/backups/settings", get(get_settings).put(update_settings))
        .route("/backups/scheduler", get(get_scheduler_status))
        .route("/backups/scheduler/trigger", post(trigger_scheduler))
        .route("/backups/:id", get(get_backup).delete(delete_backup))
        .route("/backups/:id/restore", post(restore_backup))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListBackupsQuery {
    /// `completed` (default), `failed`, `in-progress` or `all`
    pub status: Option<String>,
    /// Page size, 1..=100 (default 20)
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct GetBackupQuery {
    #[serde(default)]
    pub include_data: bool,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RestoreRequest {
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BackupListResponse {
    pub items: Vec<BackupSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteBackupResponse {
    pub backup_id: String,
    pub deleted: bool,
}

/// `None` selects every status.
pub(crate) fn parse_status_filter(raw: Option<&str>) -> Result<Option<BackupStatus>> {
    match raw {
        None => Ok(Some(BackupStatus::Completed)),
        Some("all") => Ok(None),
        Some(s) => s.parse().map(Some),
    }
}

/// Create a manual backup
#[utoipa::path(
    post,
    path = "/backups",
    context_path = "/api/v1/{realm}",
    tag = "backups",
    params(("realm" = String, Path, description = "`cms` or `family-tree`")),
    responses(
        (status = 201, description = "Backup completed", body = BackupSummary),
        (status = 403, description = "Missing create-backups permission", body = crate::api::openapi::ErrorResponse),
        (status = 500, description = "Backup failed; the body carries backup_id", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_backup(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
) -> Result<(StatusCode, Json<BackupSummary>)> {
    let realm = auth.realm();
    let ctx = auth.audit_context();
    state
        .auth(realm)
        .require_permission(&auth.principal, PERM_CREATE_BACKUPS, &ctx)
        .await?;

    match state
        .backup_service
        .create_backup(realm, TriggerType::Manual, &auth.principal.username, &ctx)
        .await
    {
        BackupOutcome::Completed(summary) => Ok((StatusCode::CREATED, Json(summary))),
        BackupOutcome::Failed { backup_id, message } => {
            Err(AppError::BackupFailed { backup_id, message })
        }
    }
}

/// List backups, newest first, without payloads
#[utoipa::path(
    get,
    path = "/backups",
    context_path = "/api/v1/{realm}",
    tag = "backups",
    params(
        ("realm" = String, Path, description = "`cms` or `family-tree`"),
        ListBackupsQuery
    ),
    responses(
        (status = 200, description = "Backups of this realm", body = BackupListResponse),
        (status = 400, description = "Unknown status filter", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_backups(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
    Query(query): Query<ListBackupsQuery>,
) -> Result<Json<BackupListResponse>> {
    let realm = auth.realm();
    state
        .auth(realm)
        .require_permission(&auth.principal, PERM_VIEW_BACKUPS, &auth.audit_context())
        .await?;

    let status = parse_status_filter(query.status.as_deref())?;
    let items = state
        .backup_service
        .list_backups(realm, status, query.limit)
        .await?;
    Ok(Json(BackupListResponse {
        total: items.len(),
        items,
    }))
}

/// Aggregate backup counts and live collection sizes
#[utoipa::path(
    get,
    path = "/backups/stats",
    context_path = "/api/v1/{realm}",
    tag = "backups",
    params(("realm" = String, Path, description = "`cms` or `family-tree`")),
    responses(
        (status = 200, description = "Backup statistics", body = BackupStatsReport),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_stats(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
) -> Result<Json<BackupStatsReport>> {
    let realm = auth.realm();
    state
        .auth(realm)
        .require_permission(&auth.principal, PERM_VIEW_BACKUPS, &auth.audit_context())
        .await?;
    Ok(Json(state.backup_service.stats(realm).await?))
}

/// Get this realm's automatic backup schedule
#[utoipa::path(
    get,
    path = "/backups/settings",
    context_path = "/api/v1/{realm}",
    tag = "backups",
    params(("realm" = String, Path, description = "`cms` or `family-tree`")),
    responses(
        (status = 200, description = "Schedule", body = RealmBackupSchedule),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_settings(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
) -> Result<Json<RealmBackupSchedule>> {
    let realm = auth.realm();
    state
        .auth(realm)
        .require_permission(&auth.principal, PERM_VIEW_BACKUPS, &auth.audit_context())
        .await?;
    Ok(Json(state.backup_service.schedule(realm).await?))
}

/// Update this realm's automatic backup schedule
#[utoipa::path(
    put,
    path = "/backups/settings",
    context_path = "/api/v1/{realm}",
    tag = "backups",
    params(("realm" = String, Path, description = "`cms` or `family-tree`")),
    request_body = UpdateScheduleRequest,
    responses(
        (status = 200, description = "Updated schedule", body = RealmBackupSchedule),
        (status = 400, description = "Out-of-range value", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_settings(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
    Json(payload): Json<UpdateScheduleRequest>,
) -> Result<Json<RealmBackupSchedule>> {
    let realm = auth.realm();
    let ctx = auth.audit_context();
    state
        .auth(realm)
        .require_permission(&auth.principal, PERM_MANAGE_BACKUP_SETTINGS, &ctx)
        .await?;
    let schedule = state
        .backup_service
        .update_schedule(realm, &payload, &ctx)
        .await?;
    Ok(Json(schedule))
}

/// Scheduler status
#[utoipa::path(
    get,
    path = "/backups/scheduler",
    context_path = "/api/v1/{realm}",
    tag = "backups",
    params(("realm" = String, Path, description = "`cms` or `family-tree`")),
    responses(
        (status = 200, description = "Whether the polling task is running", body = SchedulerStatus),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_scheduler_status(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
) -> Result<Json<SchedulerStatus>> {
    state
        .auth(auth.realm())
        .require_permission(&auth.principal, PERM_VIEW_BACKUPS, &auth.audit_context())
        .await?;
    Ok(Json(state.scheduler.status()))
}

/// Run one scheduler check immediately for this realm
#[utoipa::path(
    post,
    path = "/backups/scheduler/trigger",
    context_path = "/api/v1/{realm}",
    tag = "backups",
    params(("realm" = String, Path, description = "`cms` or `family-tree`")),
    responses(
        (status = 200, description = "Outcome of the check for this realm"),
        (status = 403, description = "Missing restore-backups permission", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn trigger_scheduler(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
) -> Result<Json<TickReport>> {
    let ctx = auth.audit_context();
    state
        .auth(auth.realm())
        .require_permission(&auth.principal, PERM_RESTORE_BACKUPS, &ctx)
        .await?;
    tracing::info!(realm = %auth.realm(), user = %ctx.user, "Scheduler check triggered manually");
    Ok(Json(state.scheduler.trigger_realm(auth.realm()).await))
}

/// Get a backup, optionally with its payload
#[utoipa::path(
    get,
    path = "/backups/{id}",
    context_path = "/api/v1/{realm}",
    tag = "backups",
    params(
        ("realm" = String, Path, description = "`cms` or `family-tree`"),
        ("id" = String, Path, description = "Backup ID"),
        GetBackupQuery
    ),
    responses(
        (status = 200, description = "Backup; `data` is present when include_data=true", body = BackupSummary),
        (status = 404, description = "No such backup in this realm", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_backup(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
    Path(id): Path<String>,
    Query(query): Query<GetBackupQuery>,
) -> Result<Json<Backup>> {
    let realm = auth.realm();
    state
        .auth(realm)
        .require_permission(&auth.principal, PERM_VIEW_BACKUPS, &auth.audit_context())
        .await?;
    let backup = state
        .backup_service
        .get_backup(realm, &id, query.include_data)
        .await?;
    Ok(Json(backup))
}

/// Delete a backup
#[utoipa::path(
    delete,
    path = "/backups/{id}",
    context_path = "/api/v1/{realm}",
    tag = "backups",
    params(
        ("realm" = String, Path, description = "`cms` or `family-tree`"),
        ("id" = String, Path, description = "Backup ID"),
    ),
    responses(
        (status = 200, description = "Backup deleted", body = DeleteBackupResponse),
        (status = 404, description = "No such backup in this realm", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_backup(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
    Path(id): Path<String>,
) -> Result<Json<DeleteBackupResponse>> {
    let realm = auth.realm();
    let ctx = auth.audit_context();
    state
        .auth(realm)
        .require_permission(&auth.principal, PERM_RESTORE_BACKUPS, &ctx)
        .await?;
    state.backup_service.delete_backup(realm, &id, &ctx).await?;
    Ok(Json(DeleteBackupResponse {
        backup_id: id,
        deleted: true,
    }))
}

/// Restore a backup over the realm's live content
#[utoipa::path(
    post,
    path = "/backups/{id}/restore",
    context_path = "/api/v1/{realm}",
    tag = "backups",
    params(
        ("realm" = String, Path, description = "`cms` or `family-tree`"),
        ("id" = String, Path, description = "Backup ID"),
    ),
    request_body = RestoreRequest,
    responses(
        (status = 200, description = "Restore finished", body = RestoreResult),
        (status = 400, description = "Not confirmed, not restorable, or failed integrity check", body = crate::api::openapi::ErrorResponse),
        (status = 404, description = "No such backup in this realm", body = crate::api::openapi::ErrorResponse),
        (status = 500, description = "Restore aborted; the body carries pre_restore_backup_id when one was taken", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn restore_backup(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
    Path(id): Path<String>,
    payload: Option<Json<RestoreRequest>>,
) -> Result<Json<RestoreResult>> {
    let realm = auth.realm();
    let ctx = auth.audit_context();
    state
        .auth(realm)
        .require_permission(&auth.principal, PERM_RESTORE_BACKUPS, &ctx)
        .await?;

    let confirmed = payload.map(|Json(req)| req.confirm).unwrap_or(false);
    if !confirmed {
        return Err(AppError::Validation(
            "Restore replaces live data; send {\"confirm\": true} to proceed".into(),
        ));
    }

    let result = state
        .backup_service
        .restore_backup(realm, &id, &ctx)
        .await?;
    Ok(Json(result))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        create_backup,
        list_backups,
        get_stats,
        get_settings,
        update_settings,
        get_scheduler_status,
        trigger_scheduler,
        get_backup,
        delete_backup,
        restore_backup,
    ),
    components(schemas(
        BackupSummary,
        BackupListResponse,
        BackupStatsReport,
        DeleteBackupResponse,
        RealmBackupSchedule,
        RestoreRequest,
        RestoreResult,
        SchedulerStatus,
        UpdateScheduleRequest,
    ))
)]
pub struct BackupsApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_filter_defaults_to_completed() {
        assert_eq!(parse_status_filter(None).unwrap(), Some(BackupStatus::Completed));
    }

    #[test]
    fn test_status_filter_all() {
        assert_eq!(parse_status_filter(Some("all")).unwrap(), None);
        assert_eq!(
            parse_status_filter(Some("in-progress")).unwrap(),
            Some(BackupStatus::InProgress)
        );
    }

    #[test]
    fn test_status_filter_rejects_unknown() {
        assert!(matches!(
            parse_status_filter(Some("pending")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_restore_request_defaults_unconfirmed() {
        let req: RestoreRequest = serde_json::from_str("{}").unwrap();
        assert!(!req.confirm);
    }
}
