//! Authentication realms.
//!
//! One [`RealmAuthService`] is built per realm. Each has its own signing
//! secret and its own user collection, and every token it issues carries a
//! `type` claim naming the realm. A token is only ever accepted by the realm
//! that issued it.

use std::sync::Arc;

use axum::http::StatusCode;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::RealmAuthConfig;
use crate::error::{AppError, Result};
use crate::models::backup::BackupRealm;
use crate::models::user::{AdminUser, UserProfile, ROLE_SUPER_ADMIN};
use crate::services::audit_service::{AuditAction, AuditContext, AuditEntry, AuditService};
use crate::services::metrics_service;
use crate::store::UserRepository;

/// Why a request was refused at the auth boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("No authentication token provided")]
    NoToken,
    #[error("Authorization header must use the Bearer scheme")]
    InvalidAuthHeader,
    #[error("Token has expired, please log in again")]
    TokenExpired,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token was not issued for this dashboard")]
    WrongRealm,
    #[error("User no longer exists")]
    UserNotFound,
    #[error("Account is inactive")]
    AccountInactive,
    #[error("Account is temporarily locked")]
    AccountLocked,
    #[error("Password was changed, please log in again")]
    PasswordChanged,
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Insufficient permissions")]
    InsufficientPermission,
}

impl AuthFailure {
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::NoToken => "NO_TOKEN",
            AuthFailure::InvalidAuthHeader => "INVALID_AUTH_HEADER",
            AuthFailure::TokenExpired => "TOKEN_EXPIRED",
            AuthFailure::InvalidToken => "INVALID_TOKEN",
            AuthFailure::WrongRealm => "WRONG_REALM",
            AuthFailure::UserNotFound => "USER_NOT_FOUND",
            AuthFailure::AccountInactive => "ACCOUNT_INACTIVE",
            AuthFailure::AccountLocked => "ACCOUNT_LOCKED",
            AuthFailure::PasswordChanged => "PASSWORD_CHANGED",
            AuthFailure::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthFailure::InsufficientPermission => "INSUFFICIENT_PERMISSION",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthFailure::InsufficientPermission => StatusCode::FORBIDDEN,
            AuthFailure::AccountLocked => StatusCode::LOCKED,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    pub username: String,
    pub role: String,
    pub permissions: Vec<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Realm discriminator, `cms-token` or `family-tree-token`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserProfile,
}

/// An authenticated caller of one realm.
#[derive(Debug, Clone)]
pub struct Principal {
    pub realm: BackupRealm,
    pub user_id: Uuid,
    pub username: String,
    pub role: String,
    pub permissions: Vec<String>,
}

impl Principal {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.role == ROLE_SUPER_ADMIN || self.permissions.iter().any(|p| p == permission)
    }

    pub fn audit_context(&self, ip: Option<String>) -> AuditContext {
        AuditContext::new(&self.username, &self.role, self.realm, ip)
    }
}

/// Read the `type` claim without verifying the signature.
/// `None` means the token is not even structurally a JWT.
fn peek_token_type(token: &str) -> Option<Option<String>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    Some(
        value
            .get("type")
            .and_then(|t| t.as_str())
            .map(str::to_string),
    )
}

/// Authentication for one realm
pub struct RealmAuthService {
    realm: BackupRealm,
    config: RealmAuthConfig,
    users: Arc<dyn UserRepository>,
    audit: Arc<AuditService>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl RealmAuthService {
    pub fn new(
        config: RealmAuthConfig,
        users: Arc<dyn UserRepository>,
        audit: Arc<AuditService>,
    ) -> Self {
        Self {
            realm: config.realm,
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            config,
            users,
            audit,
        }
    }

    pub fn realm(&self) -> BackupRealm {
        self.realm
    }

    /// Sign a token for `user` with this realm's secret and type claim.
    pub fn issue_token(&self, user: &AdminUser) -> Result<TokenResponse> {
        let now = Utc::now();
        let expires_in = Duration::minutes(self.config.token_expiry_minutes);
        let claims = RealmClaims {
            sub: user.id,
            username: user.username.clone(),
            role: user.role.clone(),
            permissions: user.permissions.clone(),
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
            token_type: Some(self.realm.token_type().to_string()),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))?;

        Ok(TokenResponse {
            token,
            token_type: "Bearer".to_string(),
            expires_in: expires_in.num_seconds(),
            user: UserProfile::from(user),
        })
    }

    /// Verify a token against this realm only.
    pub fn decode(&self, token: &str) -> std::result::Result<RealmClaims, AuthFailure> {
        let expected = self.realm.token_type();
        let validation = Validation::new(Algorithm::HS256);

        match decode::<RealmClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => {
                if data.claims.token_type.as_deref() != Some(expected) {
                    return Err(AuthFailure::WrongRealm);
                }
                Ok(data.claims)
            }
            Err(e) => {
                // A token naming another realm, or no realm at all, is a
                // wrong-realm rejection whatever else is wrong with it.
                if let Some(token_type) = peek_token_type(token) {
                    if token_type.as_deref() != Some(expected) {
                        return Err(AuthFailure::WrongRealm);
                    }
                }
                match e.kind() {
                    ErrorKind::ExpiredSignature => Err(AuthFailure::TokenExpired),
                    _ => Err(AuthFailure::InvalidToken),
                }
            }
        }
    }

    /// Resolve a bearer token to a live principal of this realm.
    pub async fn authorize(&self, token: &str) -> Result<Principal> {
        let claims = self.decode(token)?;
        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthFailure::UserNotFound)?;

        if !user.is_active {
            return Err(AuthFailure::AccountInactive.into());
        }
        if user.is_locked(Utc::now()) {
            return Err(AuthFailure::AccountLocked.into());
        }
        if let Some(changed) = user.password_changed_at {
            if changed.timestamp() > claims.iat {
                return Err(AuthFailure::PasswordChanged.into());
            }
        }

        Ok(Principal {
            realm: self.realm,
            user_id: user.id,
            username: user.username,
            role: user.role,
            permissions: user.permissions,
        })
    }

    /// Password login with lockout after repeated failures.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        ip: Option<String>,
    ) -> Result<TokenResponse> {
        let Some(user) = self.users.find_by_username(username).await? else {
            let ctx = AuditContext::new(username, "unknown", self.realm, ip);
            self.login_failed(&ctx, username, "unknown user", None).await;
            return Err(AuthFailure::InvalidCredentials.into());
        };
        let ctx = AuditContext::new(&user.username, &user.role, self.realm, ip);
        let now = Utc::now();

        if user.is_locked(now) {
            self.login_failed(&ctx, username, AuthFailure::AccountLocked.code(), None)
                .await;
            return Err(AuthFailure::AccountLocked.into());
        }
        if !user.is_active {
            self.login_failed(&ctx, username, AuthFailure::AccountInactive.code(), None)
                .await;
            return Err(AuthFailure::AccountInactive.into());
        }

        if !Self::verify_password(password, &user.password_hash)? {
            let attempts = self.users.register_failed_login(user.id).await?;
            if attempts >= self.config.max_failed_attempts {
                let until = now + Duration::minutes(self.config.lockout_minutes);
                self.users.lock_account(user.id, until).await?;
                self.audit
                    .record(
                        AuditEntry::new(AuditAction::AccountLocked)
                            .resource(username)
                            .context(&ctx)
                            .details(json!({
                                "failed_attempts": attempts,
                                "locked_until": until,
                            }))
                            .failed(),
                    )
                    .await;
                tracing::warn!(realm = %self.realm, username, attempts, "Account locked after repeated failures");
                return Err(AuthFailure::AccountLocked.into());
            }
            self.login_failed(&ctx, username, "wrong password", Some(attempts))
                .await;
            return Err(AuthFailure::InvalidCredentials.into());
        }

        self.users.record_successful_login(user.id, now).await?;
        self.audit
            .record(
                AuditEntry::new(AuditAction::Login)
                    .resource(username)
                    .context(&ctx),
            )
            .await;

        let mut user = user;
        user.last_login_at = Some(now);
        user.failed_login_attempts = 0;
        self.issue_token(&user)
    }

    async fn login_failed(
        &self,
        ctx: &AuditContext,
        username: &str,
        reason: &str,
        attempts: Option<i32>,
    ) {
        metrics_service::record_auth_denied(self.realm.as_str(), "LOGIN_FAILED");
        self.audit
            .record(
                AuditEntry::new(AuditAction::LoginFailed)
                    .resource(username)
                    .context(ctx)
                    .details(json!({ "reason": reason, "failed_attempts": attempts }))
                    .failed(),
            )
            .await;
    }

    /// Record a rejected request.
    pub async fn record_denial(&self, ctx: &AuditContext, failure: AuthFailure, path: &str) {
        metrics_service::record_auth_denied(self.realm.as_str(), failure.code());
        self.audit
            .record(
                AuditEntry::new(AuditAction::AccessDenied)
                    .resource(path)
                    .context(ctx)
                    .details(json!({ "reason": failure.code() }))
                    .failed(),
            )
            .await;
    }

    /// Permission guard. Denials are audited.
    pub async fn require_permission(
        &self,
        principal: &Principal,
        permission: &str,
        ctx: &AuditContext,
    ) -> Result<()> {
        if principal.has_permission(permission) {
            return Ok(());
        }
        metrics_service::record_auth_denied(
            self.realm.as_str(),
            AuthFailure::InsufficientPermission.code(),
        );
        self.audit
            .record(
                AuditEntry::new(AuditAction::AccessDenied)
                    .resource(permission)
                    .context(ctx)
                    .details(json!({
                        "reason": AuthFailure::InsufficientPermission.code(),
                        "required_permission": permission,
                    }))
                    .failed(),
            )
            .await;
        Err(AuthFailure::InsufficientPermission.into())
    }

    pub async fn current_user(&self, principal: &Principal) -> Result<UserProfile> {
        let user = self
            .users
            .find_by_id(principal.user_id)
            .await?
            .ok_or(AuthFailure::UserNotFound)?;
        Ok(UserProfile::from(&user))
    }

    /// Create the `admin` super-admin when the realm has no accounts yet.
    pub async fn provision_admin(&self, password: &str) -> Result<bool> {
        if self.users.count().await? > 0 {
            return Ok(false);
        }
        let admin = AdminUser::new("admin", Self::hash_password(password)?, ROLE_SUPER_ADMIN, vec![]);
        self.users.insert(&admin).await?;
        tracing::info!(realm = %self.realm, "Provisioned initial admin account");
        Ok(true)
    }

    /// Hash a password with bcrypt
    pub fn hash_password(password: &str) -> Result<String> {
        Self::hash_password_with_cost(password, DEFAULT_COST)
    }

    pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String> {
        hash(password, cost)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
    }

    /// Verify a password against a bcrypt hash
    pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
        verify(password, hash)
            .map_err(|e| AppError::Internal(format!("Failed to verify password: {}", e)))
    }
}
