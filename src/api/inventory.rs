//! Physical rental units (cameras, tripods, ...) tracked per product.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::audit::{audit_log, ClientIp};
use super::auth::StaffUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_optional_date, validate_required, validate_unit_code};
use crate::db::{
    actions, resource_types, AuditEntry, InventorySummary, InventoryUnit, InventoryUnitWithProduct,
    SaveInventoryUnitRequest, UnitCondition, UnitStatus,
};
use crate::utils::{non_empty, now_rfc3339};
use crate::{AppState, DbPool};

const UNIT_SELECT: &str = r#"
    SELECT u.*, p.name AS product_name, p.code AS product_code, p.image_url AS product_image_url
    FROM inventory_units u
    JOIN products p ON p.id = u.product_id
"#;

async fn find_unit(db: &DbPool, id: &str) -> Result<InventoryUnitWithProduct, ApiError> {
    sqlx::query_as::<_, InventoryUnitWithProduct>(&format!("{} WHERE u.id = ?", UNIT_SELECT))
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Inventory unit not found"))
}

/// GET /api/admin/inventory
pub async fn list_units(
    State(state): State<Arc<AppState>>,
    _staff: StaffUser,
) -> Result<Json<Vec<InventoryUnitWithProduct>>, ApiError> {
    let units = sqlx::query_as::<_, InventoryUnitWithProduct>(&format!(
        "{} ORDER BY u.updated_at DESC, u.rowid DESC",
        UNIT_SELECT
    ))
    .fetch_all(&state.db)
    .await?;
    Ok(Json(units))
}

/// GET /api/admin/inventory/summary
pub async fn summary(
    State(state): State<Arc<AppState>>,
    _staff: StaffUser,
) -> Result<Json<InventorySummary>, ApiError> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM inventory_units GROUP BY status")
            .fetch_all(&state.db)
            .await?;

    let mut summary = InventorySummary::default();
    for (status, count) in rows {
        summary.total += count;
        match status.parse::<UnitStatus>() {
            Ok(UnitStatus::Available) => summary.available = count,
            Ok(UnitStatus::Rented) => summary.rented = count,
            Ok(UnitStatus::Maintenance) => summary.maintenance = count,
            Ok(UnitStatus::Sold) => summary.sold = count,
            Err(_) => tracing::warn!(status = %status, "Inventory unit with unknown status"),
        }
    }
    Ok(Json(summary))
}

/// POST /api/admin/inventory: create, or update when `id` is present
pub async fn save_unit(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Json(req): Json<SaveInventoryUnitRequest>,
) -> Result<(StatusCode, Json<InventoryUnitWithProduct>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_unit_code(&req.unit_code) {
        errors.add("unit_code", e);
    }
    if let Err(e) = validate_required(&req.product_id, "Product") {
        errors.add("product_id", e);
    }
    let condition = match non_empty(req.condition.clone()) {
        None => UnitCondition::default(),
        Some(c) => c.parse().unwrap_or_else(|e: String| {
            errors.add("condition", e);
            UnitCondition::default()
        }),
    };
    let status = match non_empty(req.status.clone()) {
        None => UnitStatus::default(),
        Some(s) => s.parse().unwrap_or_else(|e: String| {
            errors.add("status", e);
            UnitStatus::default()
        }),
    };
    if let Err(e) = validate_optional_date(&req.last_service, "Last service") {
        errors.add("last_service", e);
    }
    errors.finish()?;

    let product_exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE id = ?")
        .bind(&req.product_id)
        .fetch_one(&state.db)
        .await?;
    if product_exists == 0 {
        return Err(ApiError::validation_field("product_id", "Product does not exist"));
    }

    let unit_code = req.unit_code.trim();
    let taken: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM inventory_units WHERE unit_code = ? AND id != COALESCE(?, '')",
    )
    .bind(unit_code)
    .bind(&req.id)
    .fetch_one(&state.db)
    .await?;
    if taken > 0 {
        return Err(ApiError::conflict(format!("Unit code {} is already in use", unit_code)));
    }

    let now = now_rfc3339();
    let location = non_empty(req.location.clone());
    let last_service = non_empty(req.last_service.clone());

    let (id, created) = match non_empty(req.id.clone()) {
        Some(id) => {
            let result = sqlx::query(
                r#"
                UPDATE inventory_units
                SET unit_code = ?, product_id = ?, condition = ?, status = ?,
                    location = ?, last_service = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(unit_code)
            .bind(&req.product_id)
            .bind(condition.as_str())
            .bind(status.as_str())
            .bind(&location)
            .bind(&last_service)
            .bind(&now)
            .bind(&id)
            .execute(&state.db)
            .await?;
            if result.rows_affected() == 0 {
                return Err(ApiError::not_found("Inventory unit not found"));
            }
            (id, false)
        }
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO inventory_units (id, product_id, unit_code, condition, status,
                                             location, last_service, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&req.product_id)
            .bind(unit_code)
            .bind(condition.as_str())
            .bind(status.as_str())
            .bind(&location)
            .bind(&last_service)
            .bind(&now)
            .bind(&now)
            .execute(&state.db)
            .await?;
            (id, true)
        }
    };

    audit_log(
        &state,
        AuditEntry {
            action: actions::INVENTORY_SAVE,
            resource_type: resource_types::INVENTORY_UNIT,
            resource_id: Some(&id),
            resource_name: Some(unit_code),
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: Some(serde_json::json!({
                "created": created,
                "condition": condition.as_str(),
                "status": status.as_str(),
            })),
        },
    )
    .await;

    let status_code = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status_code, Json(find_unit(&state.db, &id).await?)))
}

/// DELETE /api/admin/inventory/:id
pub async fn delete_unit(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let unit: InventoryUnit = sqlx::query_as("SELECT * FROM inventory_units WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Inventory unit not found"))?;

    sqlx::query("DELETE FROM inventory_units WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    audit_log(
        &state,
        AuditEntry {
            action: actions::INVENTORY_DELETE,
            resource_type: resource_types::INVENTORY_UNIT,
            resource_id: Some(&id),
            resource_name: Some(&unit.unit_code),
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: None,
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
