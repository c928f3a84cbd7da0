//! Common test utilities for service and HTTP tests
//!
//! This module provides shared infrastructure for testing:
//! - Config and app state on the in-memory store
//! - Admin user fixtures for both realms
//! - A content store wrapper that fails on demand

#![allow(dead_code)]
#![allow(unused_imports)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use heritage_keeper_backend::api::{routes, AppState, SharedState};
use heritage_keeper_backend::config::Config;
use heritage_keeper_backend::error::{AppError, Result};
use heritage_keeper_backend::models::backup::BackupRealm;
use heritage_keeper_backend::models::snapshot::Document;
use heritage_keeper_backend::models::user::AdminUser;
use heritage_keeper_backend::services::auth_service::RealmAuthService;
use heritage_keeper_backend::store::{ContentStore, InsertOutcome, Stores};

pub const CMS_SECRET: &str = "cms-test-secret";
pub const FAMILY_TREE_SECRET: &str = "family-tree-test-secret";
pub const PASSWORD: &str = "correct horse battery staple";

/// Memory-backed config. The scheduler never fires on its own and claims
/// do not block back-to-back checks.
pub fn test_config() -> Config {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("STORE_BACKEND", "memory"),
        ("CMS_JWT_SECRET", CMS_SECRET),
        ("FAMILY_TREE_JWT_SECRET", FAMILY_TREE_SECRET),
        ("BACKUP_SCHEDULER_INITIAL_DELAY_SECS", "3600"),
        ("BACKUP_SCHEDULER_CLAIM_SECS", "0"),
    ]);
    Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
        .expect("test config is valid")
}

/// Content store wrapper with switchable failures.
pub struct FailingContentStore {
    inner: Arc<dyn ContentStore>,
    pub fail_fetch: AtomicBool,
    pub fail_insert: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl FailingContentStore {
    pub fn new(inner: Arc<dyn ContentStore>) -> Self {
        Self {
            inner,
            fail_fetch: AtomicBool::new(false),
            fail_insert: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        }
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_insert(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for FailingContentStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(AppError::Storage(format!("fetch of {} refused", collection)));
        }
        self.inner.fetch_all(collection).await
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        self.inner.count(collection).await
    }

    async fn delete_all(&self, collection: &str) -> Result<u64> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(AppError::Storage(format!("delete of {} refused", collection)));
        }
        self.inner.delete_all(collection).await
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<InsertOutcome> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(AppError::Storage(format!("insert into {} refused", collection)));
        }
        self.inner.insert_many(collection, docs).await
    }
}

/// Test context: app state over memory stores with a fault-injecting
/// content store.
pub struct TestContext {
    pub state: SharedState,
    pub content: Arc<FailingContentStore>,
}

impl TestContext {
    pub fn new() -> Self {
        let config = test_config();
        let mut stores = Stores::memory(&config.backup_defaults);
        let content = Arc::new(FailingContentStore::new(stores.content.clone()));
        stores.content = content.clone();
        let state = Arc::new(AppState::new(config, stores));
        Self { state, content }
    }

    pub fn stores(&self) -> &Stores {
        &self.state.stores
    }

    pub fn router(&self) -> Router {
        routes::create_router(self.state.clone())
    }

    /// Insert an account with a cheap bcrypt cost.
    pub async fn create_user(
        &self,
        realm: BackupRealm,
        username: &str,
        role: &str,
        permissions: &[&str],
    ) -> AdminUser {
        let hash = RealmAuthService::hash_password_with_cost(PASSWORD, 4).expect("hash");
        let user = AdminUser::new(
            username,
            hash,
            role,
            permissions.iter().map(|p| p.to_string()).collect(),
        );
        self.stores()
            .users(realm)
            .insert(&user)
            .await
            .expect("insert user");
        user
    }

    /// Signed token for `user` from `realm`'s auth service.
    pub fn token_for(&self, realm: BackupRealm, user: &AdminUser) -> String {
        self.state
            .auth(realm)
            .issue_token(user)
            .expect("issue token")
            .token
    }

    pub async fn seed_persons(&self, names: &[&str]) {
        let docs = names
            .iter()
            .map(|name| doc(json!({ "name": name, "generation": 1 })))
            .collect();
        self.stores()
            .content
            .insert_many("persons", docs)
            .await
            .expect("seed persons");
    }

    pub async fn seed_news(&self, titles: &[&str]) {
        let docs = titles
            .iter()
            .map(|title| doc(json!({ "title": title })))
            .collect();
        self.stores()
            .content
            .insert_many("news", docs)
            .await
            .expect("seed news");
    }
}

pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Send one request through the router and decode the JSON body.
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}
