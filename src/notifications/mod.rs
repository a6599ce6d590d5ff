//! Browser push notifications for customers and staff.
//!
//! Messages are rendered from a small set of templates, then fanned out to
//! every subscription the recipient registered. Subscriptions whose endpoint
//! has expired are removed as they are discovered.

pub mod webpush;

use anyhow::Result;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;

use crate::config::PushConfig;
use crate::crypto::MAX_PLAINTEXT_LENGTH;
use crate::db::PushSubscription;
use crate::engine::ShopError;
use crate::DbPool;

pub use webpush::{DeliveryOutcome, PushTransport, VapidKeys, WebPushClient};

pub const PUSH_SENT_TOTAL: &str = "oxistore_push_sent_total";

/// JSON body the service worker receives
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PushMessage {
    pub title: String,
    pub message: String,
    pub url: String,
}

impl PushMessage {
    /// Serialized body, refused when it cannot fit in one encrypted record
    pub fn payload(&self) -> Result<Vec<u8>, ShopError> {
        let payload = serde_json::to_vec(self).map_err(anyhow::Error::from)?;
        if payload.len() > MAX_PLAINTEXT_LENGTH {
            return Err(ShopError::invalid(
                "message",
                format!(
                    "Notification is too long ({} bytes, limit {})",
                    payload.len(),
                    MAX_PLAINTEXT_LENGTH
                ),
            ));
        }
        Ok(payload)
    }
}

/// Message templates
#[derive(Debug, Clone)]
pub enum PushTemplate {
    /// Rental due soon
    Reminder { name: String, date: String },
    /// Rental returned
    ThankYou { name: String },
    Custom { title: String, message: String, url: Option<String> },
}

impl PushTemplate {
    pub fn render(&self) -> PushMessage {
        match self {
            Self::Reminder { name, date } => PushMessage {
                title: "Rental reminder".to_string(),
                message: format!(
                    "Hi {}, your rental is due on {}. Please return it on time.",
                    name, date
                ),
                url: "/profile/orders".to_string(),
            },
            Self::ThankYou { name } => PushMessage {
                title: "Thank you!".to_string(),
                message: format!(
                    "Thanks {}, your rental has been returned. We hope to see you again soon.",
                    name
                ),
                url: "/products".to_string(),
            },
            Self::Custom { title, message, url } => PushMessage {
                title: title.clone(),
                message: message.clone(),
                url: url.clone().unwrap_or_else(|| "/".to_string()),
            },
        }
    }
}

/// Per-dispatch counts
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    pub removed: usize,
}

pub struct PushService {
    db: DbPool,
    transport: Option<Arc<dyn PushTransport>>,
    public_key: Option<String>,
}

impl PushService {
    /// Service that stores subscriptions but never sends
    pub fn disabled(db: DbPool) -> Self {
        Self {
            db,
            transport: None,
            public_key: None,
        }
    }

    pub fn with_transport(db: DbPool, transport: Arc<dyn PushTransport>, public_key: String) -> Self {
        Self {
            db,
            transport: Some(transport),
            public_key: Some(public_key),
        }
    }

    /// Build from config. Push stays disabled when turned off or when the key cannot be loaded.
    pub fn from_config(db: DbPool, config: &PushConfig) -> Self {
        if !config.enabled {
            return Self::disabled(db);
        }
        let Some(path) = config.private_key_path.as_ref() else {
            tracing::warn!("Push enabled without push.private_key_path; notifications disabled");
            return Self::disabled(db);
        };

        match VapidKeys::load(path).and_then(|keys| WebPushClient::new(keys, &config.subject, config.ttl)) {
            Ok(client) => {
                let derived = client.public_key_base64();
                if !config.public_key.is_empty() && config.public_key != derived {
                    tracing::warn!("push.public_key does not match the private key; advertising the derived key");
                }
                Self::with_transport(db, Arc::new(client), derived)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load VAPID key; notifications disabled");
                Self::disabled(db)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    /// Send to every device of one customer
    pub async fn send_to_customer(
        &self,
        customer_id: &str,
        template: &PushTemplate,
    ) -> Result<DispatchReport, ShopError> {
        let message = template.render();
        let payload = message.payload()?;
        let subscriptions: Vec<PushSubscription> =
            sqlx::query_as("SELECT * FROM push_subscriptions WHERE customer_id = ?")
                .bind(customer_id)
                .fetch_all(&self.db)
                .await?;

        if subscriptions.is_empty() {
            return Err(ShopError::NoSubscriptions);
        }

        self.dispatch(&subscriptions, &message, &payload).await
    }

    /// Send to every staff device
    pub async fn send_to_staff(&self, template: &PushTemplate) -> Result<DispatchReport, ShopError> {
        let message = template.render();
        let payload = message.payload()?;
        let subscriptions: Vec<PushSubscription> =
            sqlx::query_as("SELECT * FROM push_subscriptions WHERE user_id IS NOT NULL")
                .fetch_all(&self.db)
                .await?;

        if subscriptions.is_empty() {
            return Err(ShopError::NoSubscriptions);
        }

        self.dispatch(&subscriptions, &message, &payload).await
    }

    async fn dispatch(
        &self,
        subscriptions: &[PushSubscription],
        message: &PushMessage,
        payload: &[u8],
    ) -> Result<DispatchReport, ShopError> {
        let transport = self.transport.as_ref().ok_or(ShopError::PushDisabled)?;

        let outcomes = futures::future::join_all(
            subscriptions
                .iter()
                .map(|subscription| transport.deliver(subscription, payload)),
        )
        .await;

        let mut report = DispatchReport::default();
        for (subscription, outcome) in subscriptions.iter().zip(outcomes) {
            match outcome {
                DeliveryOutcome::Delivered => {
                    report.sent += 1;
                    counter!(PUSH_SENT_TOTAL, "outcome" => "delivered").increment(1);
                }
                DeliveryOutcome::Gone => {
                    self.remove_endpoint(&subscription.endpoint).await?;
                    report.removed += 1;
                    counter!(PUSH_SENT_TOTAL, "outcome" => "gone").increment(1);
                    tracing::info!(subscription_id = %subscription.id, "Removed expired push subscription");
                }
                DeliveryOutcome::Failed(reason) => {
                    report.failed += 1;
                    counter!(PUSH_SENT_TOTAL, "outcome" => "failed").increment(1);
                    tracing::warn!(
                        subscription_id = %subscription.id,
                        error = %reason,
                        "Push delivery failed"
                    );
                }
            }
        }

        tracing::info!(
            title = %message.title,
            sent = report.sent,
            failed = report.failed,
            removed = report.removed,
            "Push notification dispatched"
        );
        Ok(report)
    }

    async fn remove_endpoint(&self, endpoint: &str) -> Result<()> {
        sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = ?")
            .bind(endpoint)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every delivery and answers from a fixed per-endpoint script
    #[derive(Default)]
    pub struct RecordingTransport {
        pub delivered: Mutex<Vec<(String, serde_json::Value)>>,
        pub gone: Vec<String>,
        pub failing: Vec<String>,
    }

    #[async_trait]
    impl PushTransport for RecordingTransport {
        async fn deliver(&self, subscription: &PushSubscription, payload: &[u8]) -> DeliveryOutcome {
            if self.gone.contains(&subscription.endpoint) {
                return DeliveryOutcome::Gone;
            }
            if self.failing.contains(&subscription.endpoint) {
                return DeliveryOutcome::Failed("boom".to_string());
            }
            let value = serde_json::from_slice(payload).unwrap();
            self.delivered
                .lock()
                .unwrap()
                .push((subscription.endpoint.clone(), value));
            DeliveryOutcome::Delivered
        }
    }

    pub async fn insert_subscription(
        pool: &DbPool,
        endpoint: &str,
        customer_id: Option<&str>,
        user_id: Option<&str>,
    ) {
        sqlx::query(
            "INSERT INTO push_subscriptions (id, endpoint, p256dh, auth, customer_id, user_id, created_at) VALUES (?, ?, 'k', 'a', ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(endpoint)
        .bind(customer_id)
        .bind(user_id)
        .bind(crate::utils::now_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::engine::testing::seed_customer;

    #[test]
    fn test_templates_render() {
        let reminder = PushTemplate::Reminder {
            name: "Budi".into(),
            date: "2026-10-16".into(),
        }
        .render();
        assert_eq!(reminder.title, "Rental reminder");
        assert!(reminder.message.contains("Budi"));
        assert!(reminder.message.contains("due on 2026-10-16"));
        // The lead time is configurable, so the text names the date only
        assert!(!reminder.message.contains("tomorrow"));
        assert_eq!(reminder.url, "/profile/orders");

        let thanks = PushTemplate::ThankYou { name: "Sari".into() }.render();
        assert_eq!(thanks.url, "/products");

        let custom = PushTemplate::Custom {
            title: "Promo".into(),
            message: "Diskon 10%".into(),
            url: None,
        }
        .render();
        assert_eq!(custom.title, "Promo");
        assert_eq!(custom.url, "/");
    }

    #[test]
    fn test_oversized_message_is_rejected_before_sending() {
        let fits = PushTemplate::Custom {
            title: "Promo".into(),
            message: "a".repeat(1_000),
            url: None,
        }
        .render();
        assert!(fits.payload().unwrap().len() <= MAX_PLAINTEXT_LENGTH);

        let huge = PushTemplate::Custom {
            title: "Promo".into(),
            message: "a".repeat(MAX_PLAINTEXT_LENGTH),
            url: None,
        }
        .render();
        match huge.payload() {
            Err(ShopError::Validation { field, .. }) => assert_eq!(field, "message"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_customer_without_devices_is_reported() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let customer = seed_customer(&pool, "Budi", "+628111", 0).await;
        let service = PushService::with_transport(
            pool.clone(),
            Arc::new(RecordingTransport::default()),
            "pub".into(),
        );

        let err = service
            .send_to_customer(&customer, &PushTemplate::ThankYou { name: "Budi".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::NoSubscriptions));
    }

    #[tokio::test]
    async fn test_dispatch_counts_and_prunes_gone_endpoints() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let customer = seed_customer(&pool, "Budi", "+628111", 0).await;
        insert_subscription(&pool, "https://push.example/ok", Some(&customer), None).await;
        insert_subscription(&pool, "https://push.example/gone", Some(&customer), None).await;
        insert_subscription(&pool, "https://push.example/fail", Some(&customer), None).await;

        let transport = Arc::new(RecordingTransport {
            gone: vec!["https://push.example/gone".into()],
            failing: vec!["https://push.example/fail".into()],
            ..Default::default()
        });
        let service = PushService::with_transport(pool.clone(), transport.clone(), "pub".into());

        let report = service
            .send_to_customer(&customer, &PushTemplate::ThankYou { name: "Budi".into() })
            .await
            .unwrap();
        assert_eq!(
            report,
            DispatchReport {
                sent: 1,
                failed: 1,
                removed: 1
            }
        );

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered[0].0, "https://push.example/ok");
        assert_eq!(delivered[0].1["title"], "Thank you!");
        drop(delivered);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM push_subscriptions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 2);
    }

    #[tokio::test]
    async fn test_disabled_service_refuses_to_send() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let customer = seed_customer(&pool, "Budi", "+628111", 0).await;
        insert_subscription(&pool, "https://push.example/ok", Some(&customer), None).await;

        let service = PushService::disabled(pool);
        assert!(!service.is_enabled());
        let err = service
            .send_to_customer(&customer, &PushTemplate::ThankYou { name: "Budi".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::PushDisabled));
    }

    #[tokio::test]
    async fn test_staff_broadcast_skips_customer_devices() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let customer = seed_customer(&pool, "Budi", "+628111", 0).await;
        let admin = crate::db::upsert_staff_user(&pool, "admin", "Admin", "password1", crate::db::Role::Admin)
            .await
            .unwrap();
        insert_subscription(&pool, "https://push.example/customer", Some(&customer), None).await;
        insert_subscription(&pool, "https://push.example/admin", None, Some(&admin)).await;

        let transport = Arc::new(RecordingTransport::default());
        let service = PushService::with_transport(pool, transport.clone(), "pub".into());
        let report = service
            .send_to_staff(&PushTemplate::Custom {
                title: "Test".into(),
                message: "Hello".into(),
                url: None,
            })
            .await
            .unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(transport.delivered.lock().unwrap()[0].0, "https://push.example/admin");
    }
}
