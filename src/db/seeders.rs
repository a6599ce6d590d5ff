//! Built-in rows the shop cannot run without: the default reward policy
//! and the bootstrap admin account.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use super::Role;
use crate::utils::now_rfc3339;

pub const DEFAULT_EARNING_RATE: f64 = 1.0;
pub const DEFAULT_REDEMPTION_RATE: i64 = 10_000;
pub const DEFAULT_MIN_REDEEM: i64 = 500;

/// Insert the default reward policy when no active policy exists
pub async fn ensure_reward_policy(pool: &SqlitePool) -> Result<()> {
    let active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reward_policies WHERE is_active = 1")
        .fetch_one(pool)
        .await?;
    if active > 0 {
        return Ok(());
    }

    let now = now_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO reward_policies (id, earning_rate, redemption_rate, min_redeem, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(DEFAULT_EARNING_RATE)
    .bind(DEFAULT_REDEMPTION_RATE)
    .bind(DEFAULT_MIN_REDEEM)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    info!("Seeded default reward policy");
    Ok(())
}

/// Create a staff account, or reset the password and role of an existing one.
/// Returns the user id.
pub async fn upsert_staff_user(
    pool: &SqlitePool,
    username: &str,
    name: &str,
    password: &str,
    role: Role,
) -> Result<String> {
    let hash = crate::api::auth::hash_password(password)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))?;
    let now = now_rfc3339();

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    if let Some((id,)) = existing {
        sqlx::query(
            "UPDATE users SET name = ?, password_hash = ?, role = ?, is_active = 1, updated_at = ? WHERE id = ?",
        )
        .bind(name)
        .bind(&hash)
        .bind(role.to_string())
        .bind(&now)
        .bind(&id)
        .execute(pool)
        .await?;
        return Ok(id);
    }

    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO users (id, username, name, password_hash, role, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(username)
    .bind(name)
    .bind(&hash)
    .bind(role.to_string())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .with_context(|| format!("failed to create user {}", username))?;

    Ok(id)
}

/// Create the configured admin account when the users table is empty.
/// Returns true when an account was created.
pub async fn ensure_admin_user(
    pool: &SqlitePool,
    username: &str,
    name: &str,
    password: &str,
) -> Result<bool> {
    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    if users > 0 {
        return Ok(false);
    }

    upsert_staff_user(pool, username, name, password, Role::Admin).await?;
    info!(username = username, "Created bootstrap admin account");
    Ok(true)
}
