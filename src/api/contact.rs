//! Public contact form and its admin inbox.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::audit::{audit_log, ClientIp};
use super::auth::StaffUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email, validate_required};
use crate::db::{actions, resource_types, AuditEntry, ContactMessage, ContactRequest};
use crate::utils::{non_empty, now_rfc3339};
use crate::AppState;

const DEFAULT_SUBJECT: &str = "No subject";

/// POST /api/contact
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ContactRequest>,
) -> Result<(StatusCode, Json<ContactMessage>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_required(&req.name, "Name") {
        errors.add("name", e);
    }
    if let Err(e) = validate_required(&req.email, "Email") {
        errors.add("email", e);
    } else if let Err(e) = validate_email(&Some(req.email.clone())) {
        errors.add("email", e);
    }
    if let Err(e) = validate_required(&req.message, "Message") {
        errors.add("message", e);
    }
    errors.finish()?;

    let message = ContactMessage {
        id: uuid::Uuid::new_v4().to_string(),
        name: req.name.trim().to_string(),
        email: req.email.trim().to_string(),
        subject: non_empty(req.subject.clone()).unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
        message: req.message.trim().to_string(),
        created_at: now_rfc3339(),
    };

    sqlx::query(
        "INSERT INTO contact_messages (id, name, email, subject, message, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&message.id)
    .bind(&message.name)
    .bind(&message.email)
    .bind(&message.subject)
    .bind(&message.message)
    .bind(&message.created_at)
    .execute(&state.db)
    .await?;

    tracing::info!(message_id = %message.id, "Contact message received");
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/admin/contact
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    _staff: StaffUser,
) -> Result<Json<Vec<ContactMessage>>, ApiError> {
    let messages = sqlx::query_as::<_, ContactMessage>(
        "SELECT * FROM contact_messages ORDER BY created_at DESC, rowid DESC",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(Json(messages))
}

/// DELETE /api/admin/contact/:id
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let result = sqlx::query("DELETE FROM contact_messages WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Message not found"));
    }

    audit_log(
        &state,
        AuditEntry {
            action: actions::CONTACT_DELETE,
            resource_type: resource_types::CONTACT_MESSAGE,
            resource_id: Some(&id),
            resource_name: None,
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: None,
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
