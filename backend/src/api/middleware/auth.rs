//! Realm authentication middleware.
//!
//! Each realm router carries an `Extension<BackupRealm>` naming the realm it
//! serves. The middleware resolves the bearer token against that realm's
//! auth service only, so a token from the other dashboard is rejected with
//! `WRONG_REALM` before any handler runs. Every rejection is audited.
//!
//! Supported authentication method:
//! - `Authorization: Bearer <jwt_token>`

use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, OriginalUri, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::SharedState;
use crate::error::AppError;
use crate::models::backup::BackupRealm;
use crate::services::audit_service::AuditContext;
use crate::services::auth_service::{AuthFailure, Principal};

/// Extension that holds the authenticated principal
#[derive(Debug, Clone)]
pub struct AuthExtension {
    pub principal: Principal,
    pub ip: Option<String>,
}

impl AuthExtension {
    pub fn realm(&self) -> BackupRealm {
        self.principal.realm
    }

    pub fn audit_context(&self) -> AuditContext {
        self.principal.audit_context(self.ip.clone())
    }
}

/// Token extraction result
#[derive(Debug, PartialEq)]
enum ExtractedToken<'a> {
    Bearer(&'a str),
    None,
    Invalid,
}

fn extract_token(headers: &HeaderMap) -> ExtractedToken<'_> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return ExtractedToken::None;
    };
    let Ok(value) = value.to_str() else {
        return ExtractedToken::Invalid;
    };
    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => ExtractedToken::Bearer(token.trim()),
        _ => ExtractedToken::Invalid,
    }
}

/// First `X-Forwarded-For` hop, else the peer address when known.
pub fn client_ip(parts_headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    parts_headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
}

/// Client address for handlers that run before authentication.
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts.extensions.get::<ConnectInfo<SocketAddr>>();
        Ok(ClientIp(client_ip(&parts.headers, peer)))
    }
}

/// Authentication middleware function - requires a valid token of the
/// router's realm
pub async fn realm_auth_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(realm) = request.extensions().get::<BackupRealm>().copied() else {
        return AppError::Internal("Route is missing its realm".into()).into_response();
    };
    let auth = state.auth(realm);
    let ip = client_ip(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
    );
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let result = match extract_token(request.headers()) {
        ExtractedToken::Bearer(token) => auth.authorize(token).await,
        ExtractedToken::None => Err(AuthFailure::NoToken.into()),
        ExtractedToken::Invalid => Err(AuthFailure::InvalidAuthHeader.into()),
    };

    match result {
        Ok(principal) => {
            request
                .extensions_mut()
                .insert(AuthExtension { principal, ip });
            next.run(request).await
        }
        Err(AppError::Auth(failure)) => {
            let ctx = AuditContext::anonymous(realm, ip);
            auth.record_denial(&ctx, failure, &path).await;
            tracing::debug!(realm = %realm, code = failure.code(), path = %path, "Request denied");
            AppError::Auth(failure).into_response()
        }
        Err(e) => e.into_response(),
    }
}
