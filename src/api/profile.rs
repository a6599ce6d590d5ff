//! Customer self-service: profile, password and order history.

use axum::{extract::State, Json};
use std::sync::Arc;

use super::auth::{hash_password, verify_password, CurrentCustomer, MessageResponse};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    normalize_whatsapp, validate_email, validate_name, validate_password, validate_whatsapp,
};
use crate::db::{ChangePasswordRequest, Customer, CustomerResponse, OrderDetail, UpdateProfileRequest};
use crate::engine::orders;
use crate::utils::{non_empty, now_rfc3339};
use crate::AppState;

/// GET /api/profile
pub async fn get_profile(CurrentCustomer(customer): CurrentCustomer) -> Json<CustomerResponse> {
    Json(customer.into())
}

/// PUT /api/profile
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    CurrentCustomer(customer): CurrentCustomer,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<CustomerResponse>, ApiError> {
    let name = req.name.trim().to_string();
    let phone = normalize_whatsapp(&req.phone);
    let email = non_empty(req.email.clone());

    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_name(&name) {
        errors.add("name", e);
    }
    if req.phone.trim().is_empty() {
        errors.add("phone", "Phone number is required");
    } else if let Err(e) = validate_whatsapp(&phone) {
        errors.add("phone", e);
    }
    if let Err(e) = validate_email(&email) {
        errors.add("email", e);
    }
    errors.finish()?;

    let taken: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM customers WHERE whatsapp = ? AND id != ?",
    )
    .bind(&phone)
    .bind(&customer.id)
    .fetch_one(&state.db)
    .await?;
    if taken > 0 {
        return Err(ApiError::conflict("Phone number is already registered"));
    }

    if let Some(email) = &email {
        let taken: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM customers WHERE email = ? AND id != ?")
                .bind(email)
                .bind(&customer.id)
                .fetch_one(&state.db)
                .await?;
        if taken > 0 {
            return Err(ApiError::conflict("Email is already registered"));
        }
    }

    sqlx::query("UPDATE customers SET name = ?, whatsapp = ?, email = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&phone)
        .bind(&email)
        .bind(now_rfc3339())
        .bind(&customer.id)
        .execute(&state.db)
        .await?;

    let updated: Customer = sqlx::query_as("SELECT * FROM customers WHERE id = ?")
        .bind(&customer.id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(customer_id = %customer.id, "Profile updated");
    Ok(Json(updated.into()))
}

/// POST /api/profile/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    CurrentCustomer(customer): CurrentCustomer,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let current_ok = customer
        .password_hash
        .as_deref()
        .map(|hash| verify_password(&req.current_password, hash))
        .unwrap_or(false);
    if !current_ok {
        return Err(ApiError::validation_field(
            "current_password",
            "Current password is incorrect",
        ));
    }
    if let Err(e) = validate_password(&req.new_password) {
        return Err(ApiError::validation_field("new_password", e));
    }

    let hash = hash_password(&req.new_password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;

    sqlx::query("UPDATE customers SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(&hash)
        .bind(now_rfc3339())
        .bind(&customer.id)
        .execute(&state.db)
        .await?;

    tracing::info!(customer_id = %customer.id, "Customer password changed");
    Ok(Json(MessageResponse {
        message: "Password updated".to_string(),
    }))
}

/// GET /api/profile/orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Result<Json<Vec<OrderDetail>>, ApiError> {
    Ok(Json(orders::customer_orders(&state.db, &customer.id).await?))
}
