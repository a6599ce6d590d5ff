//! Back-office order management and rental monitoring.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use super::audit::{audit_log, ClientIp};
use super::auth::StaffUser;
use super::error::ApiError;
use crate::db::{
    actions, resource_types, AuditEntry, MonitoringResponse, Order, OrderDetail, OrderQuery,
    OrderWithCustomer, PrintOrder, RentalOrder, UpdateStatusRequest,
};
use crate::engine::orders;
use crate::AppState;

/// GET /api/admin/orders?status=
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    _staff: StaffUser,
    Query(query): Query<OrderQuery>,
) -> Result<Json<Vec<OrderWithCustomer>>, ApiError> {
    Ok(Json(
        orders::list_orders(&state.db, query.status.as_deref()).await?,
    ))
}

/// GET /api/admin/orders/:id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    _staff: StaffUser,
    Path(id): Path<String>,
) -> Result<Json<OrderDetail>, ApiError> {
    Ok(Json(orders::get_order(&state.db, &id).await?))
}

/// PUT /api/admin/orders/:id/status
pub async fn update_order_status(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let order = orders::update_order_status(&state.db, &id, &req.status).await?;

    audit_log(
        &state,
        AuditEntry {
            action: actions::ORDER_STATUS,
            resource_type: resource_types::ORDER,
            resource_id: Some(&order.id),
            resource_name: None,
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: Some(serde_json::json!({ "status": order.status })),
        },
    )
    .await;

    Ok(Json(order))
}

/// PUT /api/admin/rentals/:id/status
pub async fn update_rental_status(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<RentalOrder>, ApiError> {
    let rental = orders::update_rental_status(&state.db, &state.push, &id, &req.status).await?;

    audit_log(
        &state,
        AuditEntry {
            action: actions::RENTAL_STATUS,
            resource_type: resource_types::RENTAL_ORDER,
            resource_id: Some(&rental.id),
            resource_name: Some(&rental.invoice_code),
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: Some(serde_json::json!({ "status": rental.status })),
        },
    )
    .await;

    Ok(Json(rental))
}

/// PUT /api/admin/prints/:id/status
pub async fn update_print_status(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<PrintOrder>, ApiError> {
    let print = orders::update_print_status(&state.db, &id, &req.status).await?;

    audit_log(
        &state,
        AuditEntry {
            action: actions::PRINT_STATUS,
            resource_type: resource_types::PRINT_ORDER,
            resource_id: Some(&print.id),
            resource_name: Some(&print.invoice_code),
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: Some(serde_json::json!({ "status": print.status })),
        },
    )
    .await;

    Ok(Json(print))
}

/// GET /api/admin/monitoring
pub async fn monitoring(
    State(state): State<Arc<AppState>>,
    _staff: StaffUser,
) -> Result<Json<MonitoringResponse>, ApiError> {
    Ok(Json(orders::monitoring(&state.db).await?))
}
