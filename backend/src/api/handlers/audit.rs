//! Audit trail listing. Each realm only ever sees its own dashboard's
//! entries.

use axum::{
    extract::{Extension, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::api::middleware::auth::AuthExtension;
use crate::api::SharedState;
use crate::error::Result;
use crate::models::audit_log::{AuditLog, AuditQuery};
use crate::models::user::PERM_RESTORE_BACKUPS;

const DEFAULT_AUDIT_LIMIT: i64 = 50;
const MAX_AUDIT_LIMIT: i64 = 500;

pub fn router() -> Router<SharedState> {
    Router::new().route("/audit", get(list_audit_logs))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditListQuery {
    /// Filter by action, e.g. `RESTORE_COMPLETED`
    pub action: Option<String>,
    /// Filter by resource, e.g. a backup id
    pub resource: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditListResponse {
    pub items: Vec<AuditLog>,
    pub total: usize,
}

/// List audit entries for this realm, newest first
#[utoipa::path(
    get,
    path = "/audit",
    context_path = "/api/v1/{realm}",
    tag = "audit",
    params(
        ("realm" = String, Path, description = "`cms` or `family-tree`"),
        AuditListQuery
    ),
    responses(
        (status = 200, description = "Audit entries", body = AuditListResponse),
        (status = 403, description = "Missing restore-backups permission", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_audit_logs(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
    Query(params): Query<AuditListQuery>,
) -> Result<Json<AuditListResponse>> {
    let realm = auth.realm();
    state
        .auth(realm)
        .require_permission(&auth.principal, PERM_RESTORE_BACKUPS, &auth.audit_context())
        .await?;

    let query = AuditQuery {
        dashboard: Some(realm.as_str().to_string()),
        action: params.action,
        resource: params.resource,
        limit: params
            .limit
            .unwrap_or(DEFAULT_AUDIT_LIMIT)
            .clamp(1, MAX_AUDIT_LIMIT),
    };
    let items = state.audit.query(&query).await?;
    Ok(Json(AuditListResponse {
        total: items.len(),
        items,
    }))
}

#[derive(OpenApi)]
#[openapi(
    paths(list_audit_logs),
    components(schemas(AuditLog, AuditListResponse))
)]
pub struct AuditApiDoc;
