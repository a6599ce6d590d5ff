//! Audit trail for back-office changes.

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub resource_name: Option<String>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub details: Option<String>,
    pub created_at: String,
}

/// A change about to be recorded
#[derive(Debug, Clone, Default)]
pub struct AuditEntry<'a> {
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_id: Option<&'a str>,
    pub resource_name: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub ip_address: Option<&'a str>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogListResponse {
    pub items: Vec<AuditLog>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditLogQuery {
    /// e.g. `product.update`
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub user_id: Option<String>,
    /// RFC 3339 lower bound
    pub start_date: Option<String>,
    /// RFC 3339 upper bound
    pub end_date: Option<String>,
    /// 1-indexed, defaults to 1
    pub page: Option<i64>,
    /// Defaults to 50, max 100
    pub per_page: Option<i64>,
}

pub mod actions {
    pub const CATEGORY_CREATE: &str = "category.create";
    pub const CATEGORY_DELETE: &str = "category.delete";

    pub const PRODUCT_CREATE: &str = "product.create";
    pub const PRODUCT_UPDATE: &str = "product.update";
    pub const PRODUCT_DELETE: &str = "product.delete";

    pub const INVENTORY_SAVE: &str = "inventory.save";
    pub const INVENTORY_DELETE: &str = "inventory.delete";

    pub const ORDER_STATUS: &str = "order.status";
    pub const RENTAL_STATUS: &str = "rental.status";
    pub const PRINT_STATUS: &str = "print.status";

    pub const MEMBER_POINTS: &str = "member.points";
    pub const REWARD_POLICY_UPDATE: &str = "reward_policy.update";

    pub const CONTACT_DELETE: &str = "contact.delete";
    pub const PUSH_SEND: &str = "push.send";

    pub const AUTH_LOGIN: &str = "auth.login";
    pub const AUTH_LOGOUT: &str = "auth.logout";

    pub const USER_SAVE: &str = "user.save";
}

pub mod resource_types {
    pub const CATEGORY: &str = "category";
    pub const PRODUCT: &str = "product";
    pub const INVENTORY_UNIT: &str = "inventory_unit";
    pub const ORDER: &str = "order";
    pub const RENTAL_ORDER: &str = "rental_order";
    pub const PRINT_ORDER: &str = "print_order";
    pub const CUSTOMER: &str = "customer";
    pub const REWARD_POLICY: &str = "reward_policy";
    pub const CONTACT_MESSAGE: &str = "contact_message";
    pub const PUSH_SUBSCRIPTION: &str = "push_subscription";
    pub const USER: &str = "user";
}

pub async fn log_audit(db: &SqlitePool, entry: AuditEntry<'_>) -> Result<(), sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = crate::utils::now_rfc3339();
    let details = entry.details.as_ref().map(|d| d.to_string());

    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, action, resource_type, resource_id, resource_name, user_id, ip_address, details, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(entry.action)
    .bind(entry.resource_type)
    .bind(entry.resource_id)
    .bind(entry.resource_name)
    .bind(entry.user_id)
    .bind(entry.ip_address)
    .bind(&details)
    .bind(&now)
    .execute(db)
    .await?;

    tracing::debug!(
        action = entry.action,
        resource_type = entry.resource_type,
        resource_id = entry.resource_id,
        user_id = entry.user_id,
        "Audit log recorded"
    );

    Ok(())
}

fn push_filters<'q>(builder: &mut QueryBuilder<'q, Sqlite>, query: &'q AuditLogQuery) {
    let mut first = true;
    let mut clause = |builder: &mut QueryBuilder<'q, Sqlite>, sql: &str| {
        builder.push(if first { " WHERE " } else { " AND " });
        builder.push(sql);
        first = false;
    };

    if let Some(action) = &query.action {
        clause(builder, "action = ");
        builder.push_bind(action);
    }
    if let Some(resource_type) = &query.resource_type {
        clause(builder, "resource_type = ");
        builder.push_bind(resource_type);
    }
    if let Some(resource_id) = &query.resource_id {
        clause(builder, "resource_id = ");
        builder.push_bind(resource_id);
    }
    if let Some(user_id) = &query.user_id {
        clause(builder, "user_id = ");
        builder.push_bind(user_id);
    }
    if let Some(start) = &query.start_date {
        clause(builder, "created_at >= ");
        builder.push_bind(start);
    }
    if let Some(end) = &query.end_date {
        clause(builder, "created_at <= ");
        builder.push_bind(end);
    }
}

/// Newest-first page of audit entries matching the filters
pub async fn list_audit_logs(
    db: &SqlitePool,
    query: &AuditLogQuery,
) -> Result<AuditLogListResponse, sqlx::Error> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(50).clamp(1, 100);
    let offset = (page - 1) * per_page;

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM audit_logs");
    push_filters(&mut count, query);
    let total: i64 = count.build_query_scalar().fetch_one(db).await?;

    let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM audit_logs");
    push_filters(&mut select, query);
    select.push(" ORDER BY created_at DESC LIMIT ");
    select.push_bind(per_page);
    select.push(" OFFSET ");
    select.push_bind(offset);
    let items = select.build_query_as::<AuditLog>().fetch_all(db).await?;

    let total_pages = (total + per_page - 1) / per_page;

    Ok(AuditLogListResponse {
        items,
        total,
        page,
        per_page,
        total_pages,
    })
}
