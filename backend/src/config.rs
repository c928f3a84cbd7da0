//! Application configuration loaded from environment variables.

use crate::error::{AppError, Result};
use crate::models::backup::BackupRealm;
use crate::models::backup_settings::MAX_INTERVAL_HOURS;
use std::env;
use std::str::FromStr;

/// Which persistence implementation backs the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(AppError::Config(format!(
                "STORE_BACKEND must be 'postgres' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

/// Signing and lockout parameters for one authentication realm.
#[derive(Clone)]
pub struct RealmAuthConfig {
    pub realm: BackupRealm,
    pub jwt_secret: String,
    pub token_expiry_minutes: i64,
    pub max_failed_attempts: i32,
    pub lockout_minutes: i64,
}

redacted_debug!(RealmAuthConfig {
    show realm,
    redact jwt_secret,
    show token_expiry_minutes,
    show max_failed_attempts,
    show lockout_minutes,
});

/// Scheduler timing
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay before the first check after start
    pub initial_delay_secs: u64,
    /// Period between checks
    pub check_interval_secs: u64,
    /// Window during which a claimed realm cannot be claimed again
    pub claim_gap_secs: u64,
}

/// Defaults seeded into the settings record and stale-record TTLs.
#[derive(Debug, Clone)]
pub struct BackupDefaults {
    pub interval_hours: i64,
    pub max_backups_to_keep: i64,
    pub failed_ttl_days: i64,
    pub stuck_ttl_hours: i64,
}

impl Default for BackupDefaults {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            max_backups_to_keep: 10,
            failed_ttl_days: 30,
            stuck_ttl_hours: 6,
        }
    }
}

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// Database connection URL (required for the postgres store)
    pub database_url: Option<String>,

    /// Store implementation
    pub store_backend: StoreBackend,

    /// Server bind address (host:port)
    pub bind_address: String,

    pub cms_auth: RealmAuthConfig,
    pub family_tree_auth: RealmAuthConfig,

    pub scheduler: SchedulerConfig,
    pub backup_defaults: BackupDefaults,

    /// First-boot password for the CMS `admin` account
    pub cms_admin_password: Option<String>,

    /// First-boot password for the family-tree `admin` account
    pub family_tree_admin_password: Option<String>,

    /// Allowed browser origins; empty allows any origin
    pub cors_origins: Vec<String>,
}

redacted_debug!(Config {
    redact_option database_url,
    show store_backend,
    show bind_address,
    show cms_auth,
    show family_tree_auth,
    show scheduler,
    show backup_defaults,
    redact_option cms_admin_password,
    redact_option family_tree_admin_password,
    show cors_origins,
});

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store_backend: StoreBackend = lookup("STORE_BACKEND")
            .unwrap_or_else(|| "postgres".into())
            .parse()?;

        let database_url = lookup("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config("DATABASE_URL not set".into()));
        }

        let max_failed_attempts = parse_or(lookup("AUTH_MAX_FAILED_ATTEMPTS"), 5);
        let lockout_minutes = parse_or(lookup("AUTH_LOCKOUT_MINUTES"), 30);

        let cms_auth = RealmAuthConfig {
            realm: BackupRealm::Cms,
            jwt_secret: lookup("CMS_JWT_SECRET")
                .ok_or_else(|| AppError::Config("CMS_JWT_SECRET not set".into()))?,
            token_expiry_minutes: parse_or(lookup("CMS_JWT_EXPIRY_MINUTES"), 480),
            max_failed_attempts,
            lockout_minutes,
        };
        let family_tree_auth = RealmAuthConfig {
            realm: BackupRealm::FamilyTree,
            jwt_secret: lookup("FAMILY_TREE_JWT_SECRET")
                .ok_or_else(|| AppError::Config("FAMILY_TREE_JWT_SECRET not set".into()))?,
            token_expiry_minutes: parse_or(lookup("FAMILY_TREE_JWT_EXPIRY_MINUTES"), 480),
            max_failed_attempts,
            lockout_minutes,
        };

        let defaults = BackupDefaults::default();
        let config = Self {
            database_url,
            store_backend,
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".into()),
            cms_auth,
            family_tree_auth,
            scheduler: SchedulerConfig {
                initial_delay_secs: parse_or(lookup("BACKUP_SCHEDULER_INITIAL_DELAY_SECS"), 30),
                check_interval_secs: parse_or(lookup("BACKUP_SCHEDULER_INTERVAL_SECS"), 3600),
                claim_gap_secs: parse_or(lookup("BACKUP_SCHEDULER_CLAIM_SECS"), 600),
            },
            backup_defaults: BackupDefaults {
                interval_hours: parse_or(
                    lookup("BACKUP_DEFAULT_INTERVAL_HOURS"),
                    defaults.interval_hours,
                ),
                max_backups_to_keep: parse_or(
                    lookup("BACKUP_DEFAULT_MAX_KEEP"),
                    defaults.max_backups_to_keep,
                ),
                failed_ttl_days: parse_or(lookup("BACKUP_FAILED_TTL_DAYS"), defaults.failed_ttl_days),
                stuck_ttl_hours: parse_or(lookup("BACKUP_STUCK_TTL_HOURS"), defaults.stuck_ttl_hours),
            },
            cms_admin_password: lookup("CMS_ADMIN_PASSWORD"),
            family_tree_admin_password: lookup("FAMILY_TREE_ADMIN_PASSWORD"),
            cors_origins: lookup("CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that a single variable cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.cms_auth.jwt_secret.is_empty() || self.family_tree_auth.jwt_secret.is_empty() {
            return Err(AppError::Config("JWT secrets must not be empty".into()));
        }
        if self.cms_auth.jwt_secret == self.family_tree_auth.jwt_secret {
            return Err(AppError::Config(
                "CMS_JWT_SECRET and FAMILY_TREE_JWT_SECRET must differ".into(),
            ));
        }
        if self.backup_defaults.interval_hours <= 0
            || self.backup_defaults.interval_hours > MAX_INTERVAL_HOURS
        {
            return Err(AppError::Config(format!(
                "BACKUP_DEFAULT_INTERVAL_HOURS must be between 1 and {}",
                MAX_INTERVAL_HOURS
            )));
        }
        if self.backup_defaults.max_backups_to_keep < 1 {
            return Err(AppError::Config(
                "BACKUP_DEFAULT_MAX_KEEP must be at least 1".into(),
            ));
        }
        if self.scheduler.check_interval_secs == 0 {
            return Err(AppError::Config(
                "BACKUP_SCHEDULER_INTERVAL_SECS must be positive".into(),
            ));
        }
        Ok(())
    }
}
