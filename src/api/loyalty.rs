//! Loyalty members and the reward policy.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use super::audit::{audit_log, ClientIp};
use super::auth::{AdminUser, StaffUser};
use super::error::ApiError;
use crate::db::{
    actions, resource_types, AdjustPointsRequest, AuditEntry, Member, RewardPolicy,
    SetPointsRequest, UpdateRewardPolicyRequest,
};
use crate::engine::loyalty;
use crate::AppState;

/// GET /api/admin/members
pub async fn list_members(
    State(state): State<Arc<AppState>>,
    _staff: StaffUser,
) -> Result<Json<Vec<Member>>, ApiError> {
    Ok(Json(loyalty::list_members(&state.db).await?))
}

/// PUT /api/admin/members/:id/points
pub async fn set_points(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
    Json(req): Json<SetPointsRequest>,
) -> Result<Json<Member>, ApiError> {
    let member = loyalty::set_member_points(&state.db, &id, req.points).await?;
    log_points_change(&state, &user.id, ip.as_deref(), &member, "set", req.points).await;
    Ok(Json(member))
}

/// POST /api/admin/members/:id/points
pub async fn adjust_points(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
    Json(req): Json<AdjustPointsRequest>,
) -> Result<Json<Member>, ApiError> {
    let member = loyalty::adjust_member_points(&state.db, &id, req.delta).await?;
    log_points_change(&state, &user.id, ip.as_deref(), &member, "adjust", req.delta).await;
    Ok(Json(member))
}

async fn log_points_change(
    state: &AppState,
    user_id: &str,
    ip: Option<&str>,
    member: &Member,
    mode: &str,
    amount: i64,
) {
    audit_log(
        state,
        AuditEntry {
            action: actions::MEMBER_POINTS,
            resource_type: resource_types::CUSTOMER,
            resource_id: Some(&member.id),
            resource_name: Some(&member.name),
            user_id: Some(user_id),
            ip_address: ip,
            details: Some(serde_json::json!({
                "mode": mode,
                "amount": amount,
                "balance": member.total_points,
            })),
        },
    )
    .await;
}

/// GET /api/admin/reward-policy
pub async fn get_policy(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Json<RewardPolicy>, ApiError> {
    Ok(Json(loyalty::get_policy(&state.db).await?))
}

/// PUT /api/admin/reward-policy
pub async fn update_policy(
    State(state): State<Arc<AppState>>,
    AdminUser(user): AdminUser,
    ClientIp(ip): ClientIp,
    Json(req): Json<UpdateRewardPolicyRequest>,
) -> Result<Json<RewardPolicy>, ApiError> {
    let policy = loyalty::update_policy(&state.db, &req).await?;

    audit_log(
        &state,
        AuditEntry {
            action: actions::REWARD_POLICY_UPDATE,
            resource_type: resource_types::REWARD_POLICY,
            resource_id: Some(&policy.id),
            resource_name: None,
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: Some(serde_json::json!({
                "earning_rate": policy.earning_rate,
                "redemption_rate": policy.redemption_rate,
                "min_redeem": policy.min_redeem,
            })),
        },
    )
    .await;

    Ok(Json(policy))
}
