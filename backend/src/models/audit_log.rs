//! Audit log model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Audit log entry. Never updated or deleted once written.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditLog {
    pub id: Uuid,
    pub action: String,
    pub category: String,
    pub resource: Option<String>,
    pub user: String,
    pub user_role: String,
    pub dashboard: String,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub ip: Option<String>,
}

/// Filter for listing audit entries, newest first.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub dashboard: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub limit: i64,
}

impl AuditLog {
    pub fn matches(&self, query: &AuditQuery) -> bool {
        let dashboard_ok = match &query.dashboard {
            Some(d) => &self.dashboard == d,
            None => true,
        };
        let action_ok = match &query.action {
            Some(a) => &self.action == a,
            None => true,
        };
        let resource_ok = match &query.resource {
            Some(r) => self.resource.as_ref() == Some(r),
            None => true,
        };
        dashboard_ok && action_ok && resource_ok
    }
}
