use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Points earning and redemption settings
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RewardPolicy {
    pub id: String,
    /// Points per Rp 1.000 spent
    pub earning_rate: f64,
    /// Rupiah value of 100 points
    pub redemption_rate: i64,
    /// Minimum points per redemption
    pub min_redeem: i64,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRewardPolicyRequest {
    pub earning_rate: f64,
    pub redemption_rate: i64,
    pub min_redeem: i64,
}

/// Loyalty member row for the admin list
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Member {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub whatsapp: String,
    pub total_points: i64,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetPointsRequest {
    pub points: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdjustPointsRequest {
    pub delta: i64,
}
