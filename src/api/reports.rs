//! Finance reports and the admin dashboard.

use axum::{extract::State, Json};
use std::sync::Arc;

use super::auth::StaffUser;
use super::error::ApiError;
use crate::db::{DashboardStats, FinanceReport, FinancialSummary};
use crate::engine::finance;
use crate::AppState;

/// GET /api/admin/reports/summary
pub async fn summary(
    State(state): State<Arc<AppState>>,
    _staff: StaffUser,
) -> Result<Json<FinancialSummary>, ApiError> {
    Ok(Json(finance::financial_summary(&state.db).await?))
}

/// GET /api/admin/reports/finance
pub async fn finance_report(
    State(state): State<Arc<AppState>>,
    _staff: StaffUser,
) -> Result<Json<FinanceReport>, ApiError> {
    Ok(Json(finance::finance_report(&state.db).await?))
}

/// GET /api/admin/reports/dashboard
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    _staff: StaffUser,
) -> Result<Json<DashboardStats>, ApiError> {
    Ok(Json(finance::dashboard(&state.db).await?))
}
