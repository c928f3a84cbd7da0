//! Authentication handlers, mounted once per realm.

use axum::{
    extract::{Extension, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::{OpenApi, ToSchema};

use crate::api::middleware::auth::{AuthExtension, ClientIp};
use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::backup::BackupRealm;
use crate::models::user::UserProfile;
use crate::services::auth_service::TokenResponse;

/// Create public auth routes (no auth required)
pub fn public_router() -> Router<SharedState> {
    Router::new().route("/login", post(login))
}

/// Create protected auth routes (auth required)
pub fn protected_router() -> Router<SharedState> {
    Router::new().route("/me", get(get_current_user))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Log in to one dashboard
#[utoipa::path(
    post,
    path = "/auth/login",
    context_path = "/api/v1/{realm}",
    tag = "auth",
    params(("realm" = String, Path, description = "`cms` or `family-tree`")),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed token for this realm", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = crate::api::openapi::ErrorResponse),
        (status = 423, description = "Account locked", body = crate::api::openapi::ErrorResponse),
    )
)]
pub async fn login(
    State(state): State<SharedState>,
    Extension(realm): Extension<BackupRealm>,
    ClientIp(ip): ClientIp,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>> {
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::Validation(
            "username and password are required".into(),
        ));
    }
    let token = state
        .auth(realm)
        .authenticate(payload.username.trim(), &payload.password, ip)
        .await?;
    Ok(Json(token))
}

/// Get the authenticated user
#[utoipa::path(
    get,
    path = "/auth/me",
    context_path = "/api/v1/{realm}",
    tag = "auth",
    params(("realm" = String, Path, description = "`cms` or `family-tree`")),
    responses(
        (status = 200, description = "Current user", body = UserProfile),
        (status = 401, description = "Not authenticated", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_current_user(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
) -> Result<Json<UserProfile>> {
    let profile = state
        .auth(auth.realm())
        .current_user(&auth.principal)
        .await?;
    Ok(Json(profile))
}

#[derive(OpenApi)]
#[openapi(
    paths(login, get_current_user),
    components(schemas(LoginRequest, TokenResponse, UserProfile))
)]
pub struct AuthApiDoc;
