//! Push subscription management and admin-triggered notifications.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use super::audit::{audit_log, ClientIp};
use super::auth::{Principal, StaffUser};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_push_endpoint, validate_required};
use crate::db::{
    actions, resource_types, AuditEntry, BroadcastRequest, CustomerNotificationRequest,
    SubscribeRequest, UnsubscribeRequest,
};
use crate::notifications::{DispatchReport, PushTemplate};
use crate::utils::now_rfc3339;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct PublicKeyResponse {
    pub public_key: String,
}

/// GET /api/push/public-key
pub async fn public_key(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PublicKeyResponse>, ApiError> {
    let key = state
        .push
        .public_key()
        .ok_or_else(|| ApiError::service_unavailable("Push notifications are not configured"))?;
    Ok(Json(PublicKeyResponse {
        public_key: key.to_string(),
    }))
}

/// POST /api/push/subscribe
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(req): Json<SubscribeRequest>,
) -> Result<StatusCode, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_push_endpoint(&req.endpoint) {
        errors.add("endpoint", e);
    }
    if let Err(e) = validate_required(&req.keys.p256dh, "Key p256dh") {
        errors.add("keys.p256dh", e);
    }
    if let Err(e) = validate_required(&req.keys.auth, "Key auth") {
        errors.add("keys.auth", e);
    }
    errors.finish()?;

    let (customer_id, user_id) = match &principal {
        Principal::Customer(c) => (Some(c.id.as_str()), None),
        Principal::User(u) => (None, Some(u.id.as_str())),
    };

    sqlx::query(
        r#"
        INSERT INTO push_subscriptions (id, endpoint, p256dh, auth, customer_id, user_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(endpoint) DO UPDATE SET
            p256dh = excluded.p256dh,
            auth = excluded.auth,
            customer_id = excluded.customer_id,
            user_id = excluded.user_id
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(req.endpoint.trim())
    .bind(req.keys.p256dh.trim())
    .bind(req.keys.auth.trim())
    .bind(customer_id)
    .bind(user_id)
    .bind(now_rfc3339())
    .execute(&state.db)
    .await?;

    tracing::info!(
        principal_type = principal.kind().as_str(),
        principal_id = %principal.id(),
        "Push subscription saved"
    );
    Ok(StatusCode::CREATED)
}

/// POST /api/push/unsubscribe
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    Json(req): Json<UnsubscribeRequest>,
) -> Result<StatusCode, ApiError> {
    if req.endpoint.trim().is_empty() {
        return Err(ApiError::validation_field("endpoint", "Endpoint is required"));
    }
    sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = ?")
        .bind(req.endpoint.trim())
        .execute(&state.db)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/admin/notifications: reminder, thank-you or custom message to one customer
pub async fn notify_customer(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Json(req): Json<CustomerNotificationRequest>,
) -> Result<Json<DispatchReport>, ApiError> {
    let name: String = sqlx::query_scalar("SELECT name FROM customers WHERE id = ?")
        .bind(req.customer_id())
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Customer not found"))?;

    let (kind, template) = match &req {
        CustomerNotificationRequest::Reminder { date, .. } => (
            "reminder",
            PushTemplate::Reminder {
                name,
                date: date.clone(),
            },
        ),
        CustomerNotificationRequest::ThankYou { .. } => ("thank_you", PushTemplate::ThankYou { name }),
        CustomerNotificationRequest::Custom { title, message, .. } => {
            let mut errors = ValidationErrorBuilder::new();
            if let Err(e) = validate_required(title, "Title") {
                errors.add("title", e);
            }
            if let Err(e) = validate_required(message, "Message") {
                errors.add("message", e);
            }
            errors.finish()?;
            (
                "custom",
                PushTemplate::Custom {
                    title: title.clone(),
                    message: message.clone(),
                    url: None,
                },
            )
        }
    };

    let report = state.push.send_to_customer(req.customer_id(), &template).await?;

    audit_log(
        &state,
        AuditEntry {
            action: actions::PUSH_SEND,
            resource_type: resource_types::CUSTOMER,
            resource_id: Some(req.customer_id()),
            resource_name: None,
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: Some(serde_json::json!({ "template": kind, "sent": report.sent })),
        },
    )
    .await;

    Ok(Json(report))
}

/// POST /api/admin/push/send: custom message to every staff device
pub async fn broadcast(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<DispatchReport>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_required(&req.title, "Title") {
        errors.add("title", e);
    }
    if let Err(e) = validate_required(&req.message, "Message") {
        errors.add("message", e);
    }
    errors.finish()?;

    let template = PushTemplate::Custom {
        title: req.title.clone(),
        message: req.message.clone(),
        url: req.url.clone(),
    };
    let report = state.push.send_to_staff(&template).await?;

    audit_log(
        &state,
        AuditEntry {
            action: actions::PUSH_SEND,
            resource_type: resource_types::PUSH_SUBSCRIPTION,
            resource_id: None,
            resource_name: Some(&req.title),
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: Some(serde_json::json!({ "sent": report.sent, "failed": report.failed })),
        },
    )
    .await;

    Ok(Json(report))
}
