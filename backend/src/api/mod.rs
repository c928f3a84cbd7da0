//! API module - HTTP handlers and middleware.

pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod routes;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;
use crate::models::backup::BackupRealm;
use crate::services::audit_service::AuditService;
use crate::services::auth_service::RealmAuthService;
use crate::services::backup_service::{BackupService, StaleTtl};
use crate::services::scheduler_service::BackupScheduler;
use crate::store::Stores;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub stores: Stores,
    pub audit: Arc<AuditService>,
    pub backup_service: Arc<BackupService>,
    pub scheduler: Arc<BackupScheduler>,
    pub cms_auth: Arc<RealmAuthService>,
    pub family_tree_auth: Arc<RealmAuthService>,
    pub metrics_handle: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    /// Wire every service on top of `stores`. The scheduler is built but
    /// not started.
    pub fn new(config: Config, stores: Stores) -> Self {
        let audit = Arc::new(AuditService::new(stores.audit.clone()));
        let backup_service = Arc::new(BackupService::new(&stores, audit.clone()));
        let ttl = StaleTtl {
            failed: chrono::Duration::days(config.backup_defaults.failed_ttl_days),
            stuck: chrono::Duration::hours(config.backup_defaults.stuck_ttl_hours),
        };
        let scheduler = Arc::new(BackupScheduler::new(
            backup_service.clone(),
            stores.settings.clone(),
            config.scheduler.clone(),
            ttl,
        ));
        let cms_auth = Arc::new(RealmAuthService::new(
            config.cms_auth.clone(),
            stores.users(BackupRealm::Cms),
            audit.clone(),
        ));
        let family_tree_auth = Arc::new(RealmAuthService::new(
            config.family_tree_auth.clone(),
            stores.users(BackupRealm::FamilyTree),
            audit.clone(),
        ));

        Self {
            config,
            stores,
            audit,
            backup_service,
            scheduler,
            cms_auth,
            family_tree_auth,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus handle served at `/metrics`.
    pub fn set_metrics_handle(&mut self, handle: PrometheusHandle) {
        self.metrics_handle = Some(Arc::new(handle));
    }

    /// The auth service guarding `realm`.
    pub fn auth(&self, realm: BackupRealm) -> &Arc<RealmAuthService> {
        match realm {
            BackupRealm::Cms => &self.cms_auth,
            BackupRealm::FamilyTree => &self.family_tree_auth,
        }
    }
}

pub type SharedState = Arc<AppState>;
