//! Route definitions for the API.

use axum::http::{header, HeaderValue, Method};
use axum::{middleware, routing::get, Extension, Json, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::handlers;
use super::middleware::auth::realm_auth_middleware;
use super::middleware::security_headers::security_headers_middleware;
use super::SharedState;
use crate::models::backup::BackupRealm;
use crate::services::metrics_service::metrics_middleware;

/// Create the main API router
pub fn create_router(state: SharedState) -> Router {
    // Build OpenAPI spec once at startup
    let openapi = super::openapi::build_openapi();

    Router::new()
        // Health endpoints (no auth required)
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .route("/api-docs/openapi.json", get(move || async move { Json(openapi) }))
        .nest("/api/v1/cms", realm_routes(state.clone(), BackupRealm::Cms))
        .nest(
            "/api/v1/family-tree",
            realm_routes(state.clone(), BackupRealm::FamilyTree),
        )
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(metrics_middleware))
        .with_state(state)
}

/// One dashboard's routes. The realm extension is the outermost layer so
/// the auth middleware and every handler can read it.
fn realm_routes(state: SharedState, realm: BackupRealm) -> Router<SharedState> {
    let public = Router::new().nest("/auth", handlers::auth::public_router());

    let protected = Router::new()
        .nest("/auth", handlers::auth::protected_router())
        .merge(handlers::backups::router())
        .merge(handlers::audit::router())
        .layer(middleware::from_fn_with_state(state, realm_auth_middleware));

    public.merge(protected).layer(Extension(realm))
}

/// CORS policy: an explicit origin list when configured, otherwise any.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
            .allow_credentials(true)
    }
}
