//! Startup self-checks
//!
//! Run before the server starts accepting requests:
//! - Database connectivity and schema
//! - Data directory exists and is writable
//! - Push notification keys, when push is enabled

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::notifications::VapidKeys;
use crate::DbPool;

/// Tables every request path depends on
const ESSENTIAL_TABLES: [&str; 8] = [
    "users",
    "customers",
    "sessions",
    "products",
    "orders",
    "rental_orders",
    "print_orders",
    "reward_policies",
];

/// Result of a single startup check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    /// Failure should abort startup
    pub critical: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            critical: false,
            message: message.into(),
            details: None,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>, critical: bool) -> Self {
        Self {
            name: name.into(),
            passed: false,
            critical,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartupCheckReport {
    pub checks: Vec<CheckResult>,
    pub all_critical_passed: bool,
    pub all_passed: bool,
    pub summary: String,
}

impl StartupCheckReport {
    pub fn new(checks: Vec<CheckResult>) -> Self {
        let all_critical_passed = checks.iter().filter(|c| c.critical).all(|c| c.passed);
        let all_passed = checks.iter().all(|c| c.passed);

        let failed_critical = checks.iter().filter(|c| c.critical && !c.passed).count();
        let failed_non_critical = checks.iter().filter(|c| !c.critical && !c.passed).count();
        let total = checks.len();
        let passed = checks.iter().filter(|c| c.passed).count();

        let summary = if all_passed {
            format!("All {} startup checks passed", total)
        } else if all_critical_passed {
            format!(
                "{}/{} checks passed ({} non-critical warnings)",
                passed, total, failed_non_critical
            )
        } else {
            format!(
                "{}/{} checks passed ({} critical failures)",
                passed, total, failed_critical
            )
        };

        Self {
            checks,
            all_critical_passed,
            all_passed,
            summary,
        }
    }
}

pub async fn run_startup_checks(config: &Config, db: &DbPool) -> StartupCheckReport {
    info!("Running startup self-checks...");

    let checks = vec![
        check_database_connectivity(db).await,
        check_database_schema(db).await,
        check_data_directory(config),
        check_push_keys(config),
    ];

    let report = StartupCheckReport::new(checks);

    for check in &report.checks {
        if check.passed {
            info!(check = %check.name, message = %check.message, "Startup check PASSED");
        } else if check.critical {
            error!(
                check = %check.name,
                message = %check.message,
                details = ?check.details,
                "Startup check FAILED (CRITICAL)"
            );
        } else {
            warn!(
                check = %check.name,
                message = %check.message,
                details = ?check.details,
                "Startup check FAILED (non-critical)"
            );
        }
    }

    info!(
        summary = %report.summary,
        all_passed = report.all_passed,
        all_critical_passed = report.all_critical_passed,
        "Startup checks completed"
    );

    report
}

async fn check_database_connectivity(db: &DbPool) -> CheckResult {
    match sqlx::query("SELECT 1").fetch_one(db).await {
        Ok(_) => CheckResult::pass("database_connectivity", "Database connection successful"),
        Err(e) => CheckResult::fail("database_connectivity", "Failed to connect to database", true)
            .with_details(e.to_string()),
    }
}

async fn check_database_schema(db: &DbPool) -> CheckResult {
    let result: Result<Vec<(String,)>, _> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(db)
    .await;

    match result {
        Ok(tables) => {
            let table_names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
            let missing: Vec<&str> = ESSENTIAL_TABLES
                .iter()
                .filter(|t| !table_names.contains(*t))
                .copied()
                .collect();

            if missing.is_empty() {
                CheckResult::pass(
                    "database_schema",
                    format!("Database schema valid ({} tables)", tables.len()),
                )
            } else {
                CheckResult::fail("database_schema", "Missing essential database tables", true)
                    .with_details(format!("Missing: {}", missing.join(", ")))
            }
        }
        Err(e) => CheckResult::fail("database_schema", "Failed to query database schema", true)
            .with_details(e.to_string()),
    }
}

/// Data directory must exist and accept writes; a missing static dir only warns
fn check_data_directory(config: &Config) -> CheckResult {
    let data_dir = &config.server.data_dir;
    if !data_dir.exists() {
        return CheckResult::fail("data_directory", "Data directory does not exist", true)
            .with_details(data_dir.display().to_string());
    }

    let test_file = data_dir.join(".oxistore_write_test");
    if let Err(e) = std::fs::write(&test_file, "test") {
        return CheckResult::fail("data_directory", "Data directory is not writable", true)
            .with_details(format!("{}: {}", data_dir.display(), e));
    }
    let _ = std::fs::remove_file(&test_file);

    match &config.server.static_dir {
        Some(dir) if !dir.exists() => CheckResult::fail(
            "data_directory",
            "Static directory not found (storefront assets will not be served)",
            false,
        )
        .with_details(dir.display().to_string()),
        _ => CheckResult::pass("data_directory", "Data directory is writable")
            .with_details(format!("Path: {}", data_dir.display())),
    }
}

fn check_push_keys(config: &Config) -> CheckResult {
    if !config.push.enabled {
        return CheckResult::pass("push_keys", "Push notifications disabled");
    }
    let Some(path) = &config.push.private_key_path else {
        return CheckResult::fail("push_keys", "push.private_key_path is not set", false);
    };
    match VapidKeys::load(path) {
        Ok(_) => CheckResult::pass("push_keys", "VAPID key loaded")
            .with_details(path.display().to_string()),
        Err(e) => CheckResult::fail("push_keys", "Failed to load VAPID key", false)
            .with_details(format!("{}: {}", path.display(), e)),
    }
}

/// Health summary served at `/health`
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealthStatus {
    pub healthy: bool,
    pub database_healthy: bool,
    pub push_enabled: bool,
    pub checks: Vec<CheckResult>,
    pub version: String,
}

pub async fn get_system_health(config: &Config, db: &DbPool, push_enabled: bool) -> SystemHealthStatus {
    let db_check = check_database_connectivity(db).await;
    let database_healthy = db_check.passed;

    SystemHealthStatus {
        healthy: database_healthy,
        database_healthy,
        push_enabled,
        checks: vec![db_check, check_data_directory(config)],
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_critical_failures() {
        let report = StartupCheckReport::new(vec![
            CheckResult::pass("database_connectivity", "ok"),
            CheckResult::fail("database_schema", "missing", true),
        ]);
        assert!(!report.all_passed);
        assert!(!report.all_critical_passed);
        assert_eq!(report.summary, "1/2 checks passed (1 critical failures)");
    }

    #[test]
    fn test_report_non_critical_failure_still_starts() {
        let report = StartupCheckReport::new(vec![
            CheckResult::pass("database_connectivity", "ok"),
            CheckResult::fail("push_keys", "no key", false),
        ]);
        assert!(!report.all_passed);
        assert!(report.all_critical_passed);
    }

    #[test]
    fn test_push_check_passes_when_disabled() {
        let config = Config::default();
        assert!(check_push_keys(&config).passed);

        let mut enabled = Config::default();
        enabled.push.enabled = true;
        let check = check_push_keys(&enabled);
        assert!(!check.passed);
        assert!(!check.critical);
    }

    #[tokio::test]
    async fn test_schema_check_on_migrated_database() {
        let db = crate::db::init_in_memory().await.unwrap();
        assert!(check_database_connectivity(&db).await.passed);
        let schema = check_database_schema(&db).await;
        assert!(schema.passed, "{:?}", schema.details);
    }
}
