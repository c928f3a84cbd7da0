//! OpenAPI specification generated from handler annotations via utoipa.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Top-level OpenAPI document.
///
/// Both dashboards share one set of handlers, so every realm route is
/// documented once under `/api/v1/{realm}`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Heritage Keeper Backup API",
        description = "Realm-isolated backup, restore and audit for the family-tree and CMS dashboards.",
        version = "0.1.0",
    ),
    servers(
        (url = "/", description = "Current server"),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Per-realm login"),
        (name = "backups", description = "Backup, restore, retention and scheduling"),
        (name = "audit", description = "Realm-scoped audit trail"),
        (name = "health", description = "Health and readiness checks"),
    ),
    components(schemas(ErrorResponse))
)]
pub struct ApiDoc;

/// Standard error response body returned by all endpoints on failure.
#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g. "WRONG_REALM", "VALIDATION_ERROR")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Set when a backup run failed
    pub backup_id: Option<String>,
    /// Set when a restore aborted after its safety snapshot
    pub pre_restore_backup_id: Option<String>,
}

/// Adds Bearer JWT security scheme to the OpenAPI spec.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Build the merged OpenAPI document from all handler modules.
pub fn build_openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.merge(super::handlers::auth::AuthApiDoc::openapi());
    doc.merge(super::handlers::backups::BackupsApiDoc::openapi());
    doc.merge(super::handlers::audit::AuditApiDoc::openapi());
    doc.merge(super::handlers::health::HealthApiDoc::openapi());
    doc
}
