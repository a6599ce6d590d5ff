//! Web Push subscription models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PushSubscription {
    pub id: String,
    pub endpoint: String,
    /// Browser's P-256 public key, base64url
    pub p256dh: String,
    /// 16-byte auth secret, base64url
    pub auth: String,
    pub customer_id: Option<String>,
    pub user_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionKeys {
    #[serde(default)]
    pub p256dh: String,
    #[serde(default)]
    pub auth: String,
}

/// Body posted by the browser's `PushManager.subscribe()` result
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

/// Notification aimed at one customer
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CustomerNotificationRequest {
    Reminder { customer_id: String, date: String },
    ThankYou { customer_id: String },
    Custom { customer_id: String, title: String, message: String },
}

impl CustomerNotificationRequest {
    pub fn customer_id(&self) -> &str {
        match self {
            Self::Reminder { customer_id, .. }
            | Self::ThankYou { customer_id }
            | Self::Custom { customer_id, .. } => customer_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    pub url: Option<String>,
}
