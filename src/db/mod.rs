mod models;
pub(crate) mod seeders;

pub use models::*;
pub use seeders::{ensure_admin_user, ensure_reward_policy, upsert_staff_user};

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub type DbPool = SqlitePool;

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("oxistore.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing database at {}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// Open a private in-memory database with the full schema.
///
/// A single connection is used because every SQLite in-memory connection
/// is its own database.
pub async fn init_in_memory() -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let found: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Accounts, sessions, catalog, inventory, carts
    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;

    // Migration 002: Orders with rental and print sub-orders
    if !table_exists(pool, "orders").await? {
        execute_sql(pool, include_str!("../../migrations/002_orders.sql")).await?;
    }

    // Migration 003: Loyalty reward policy
    if !table_exists(pool, "reward_policies").await? {
        execute_sql(pool, include_str!("../../migrations/003_loyalty.sql")).await?;
    }

    // Migration 004: Web push subscriptions
    if !table_exists(pool, "push_subscriptions").await? {
        execute_sql(pool, include_str!("../../migrations/004_push_subscriptions.sql")).await?;
    }

    // Migration 005: Audit trail for back-office actions
    if !table_exists(pool, "audit_logs").await? {
        execute_sql(pool, include_str!("../../migrations/005_audit_logs.sql")).await?;
    }

    seeders::ensure_reward_policy(pool).await?;

    info!("Migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_schema_has_all_tables() {
        let pool = init_in_memory().await.unwrap();
        for table in [
            "users",
            "customers",
            "sessions",
            "categories",
            "products",
            "inventory_units",
            "carts",
            "cart_items",
            "wishlists",
            "contact_messages",
            "orders",
            "rental_orders",
            "rental_items",
            "print_orders",
            "reward_policies",
            "push_subscriptions",
            "audit_logs",
        ] {
            assert!(table_exists(&pool, table).await.unwrap(), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let policies: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reward_policies")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(policies.0, 1);
    }
}
