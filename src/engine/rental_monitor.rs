//! Background task that flags overdue rentals and reminds customers before
//! their rental is due back.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;

use super::{ShopError, ShopResult};
use crate::config::MonitorConfig;
use crate::db::RentalWithCustomer;
use crate::notifications::{PushService, PushTemplate};
use crate::utils::to_rfc3339;
use crate::DbPool;

/// Result of a single monitor pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub marked_late: u64,
    pub reminded: u64,
}

pub struct RentalMonitor {
    db: DbPool,
    push: Arc<PushService>,
    config: MonitorConfig,
}

impl RentalMonitor {
    pub fn new(db: DbPool, push: Arc<PushService>, config: MonitorConfig) -> Self {
        Self { db, push, config }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> ShopResult<MonitorReport> {
        let marked_late = self.mark_overdue(now).await?;
        let reminded = self.send_reminders(now).await?;

        if marked_late > 0 || reminded > 0 {
            tracing::info!(marked_late, reminded, "Rental monitor pass complete");
        } else {
            tracing::debug!("Rental monitor pass complete, nothing to do");
        }

        Ok(MonitorReport {
            marked_late,
            reminded,
        })
    }

    /// Rented rentals past their due date become late, along with a rented parent order
    async fn mark_overdue(&self, now: DateTime<Utc>) -> ShopResult<u64> {
        let now = to_rfc3339(now);
        let mut tx = self.db.begin().await?;

        let overdue: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, order_id FROM rental_orders WHERE status = 'rented' AND due_date < ?",
        )
        .bind(&now)
        .fetch_all(&mut *tx)
        .await?;

        for (rental_id, order_id) in &overdue {
            sqlx::query("UPDATE rental_orders SET status = 'late', updated_at = ? WHERE id = ?")
                .bind(&now)
                .bind(rental_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE orders SET status = 'late', updated_at = ? WHERE id = ? AND status = 'rented'")
                .bind(&now)
                .bind(order_id)
                .execute(&mut *tx)
                .await?;
            tracing::info!(rental_id = %rental_id, order_id = %order_id, "Rental is overdue");
        }

        tx.commit().await?;
        Ok(overdue.len() as u64)
    }

    async fn send_reminders(&self, now: DateTime<Utc>) -> ShopResult<u64> {
        if !self.push.is_enabled() {
            return Ok(0);
        }

        let horizon = now + chrono::Duration::hours(self.config.reminder_lead_hours);
        let due_soon: Vec<RentalWithCustomer> = sqlx::query_as(
            r#"
            SELECT r.*, c.name AS customer_name, c.whatsapp AS customer_whatsapp
            FROM rental_orders r
            JOIN customers c ON c.id = r.customer_id
            WHERE r.status = 'rented' AND r.reminded_at IS NULL
              AND r.due_date >= ? AND r.due_date <= ?
            ORDER BY r.due_date ASC
            "#,
        )
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(horizon))
        .fetch_all(&self.db)
        .await?;

        let mut reminded = 0;
        for entry in due_soon {
            let rental = &entry.rental;
            let template = PushTemplate::Reminder {
                name: entry.customer_name.clone(),
                date: rental.due_date.chars().take(10).collect(),
            };

            match self.push.send_to_customer(&rental.customer_id, &template).await {
                Ok(report) => {
                    tracing::debug!(rental_id = %rental.id, sent = report.sent, "Reminder sent");
                    reminded += 1;
                }
                // Nobody to notify; do not retry every pass
                Err(ShopError::NoSubscriptions) => {}
                Err(ShopError::PushDisabled) => return Ok(reminded),
                Err(e) => {
                    tracing::warn!(rental_id = %rental.id, error = %e, "Reminder push failed");
                    continue;
                }
            }

            sqlx::query("UPDATE rental_orders SET reminded_at = ? WHERE id = ?")
                .bind(to_rfc3339(now))
                .bind(&rental.id)
                .execute(&self.db)
                .await?;
        }

        Ok(reminded)
    }
}

/// Spawn the background rental monitor
pub fn spawn_rental_monitor(db: DbPool, push: Arc<PushService>, config: MonitorConfig) {
    if !config.enabled {
        tracing::info!("Rental monitor is disabled");
        return;
    }

    let interval_secs = config.interval_seconds.max(1);
    tracing::info!(
        interval_secs = interval_secs,
        reminder_lead_hours = config.reminder_lead_hours,
        "Starting rental monitor"
    );

    let monitor = RentalMonitor::new(db, push, config);

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            if let Err(e) = monitor.run_once(Utc::now()).await {
                tracing::error!(error = %e, "Rental monitor pass failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::*;
    use crate::notifications::testing::{insert_subscription, RecordingTransport};
    use crate::utils::now_rfc3339;

    async fn seed_rental(pool: &DbPool, customer: &str, status: &str, due: DateTime<Utc>) -> (String, String) {
        let order_id = uuid::Uuid::new_v4().to_string();
        let rental_id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO orders (id, customer_id, total_amount, sender_name, proof_image, payment_method, status, created_at, updated_at) VALUES (?, ?, 100000, 'x', 'p', 'transfer', ?, ?, ?)",
        )
        .bind(&order_id)
        .bind(customer)
        .bind(status)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO rental_orders (id, invoice_code, customer_id, order_id, start_date, due_date, total_price, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, 100000, ?, ?, ?)",
        )
        .bind(&rental_id)
        .bind(format!("RENT-{}", &rental_id[..8]))
        .bind(customer)
        .bind(&order_id)
        .bind(&now)
        .bind(to_rfc3339(due))
        .bind(status)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
        (order_id, rental_id)
    }

    async fn status_of(pool: &DbPool, table: &str, id: &str) -> String {
        sqlx::query_scalar(&format!("SELECT status FROM {} WHERE id = ?", table))
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn monitor(pool: &DbPool, push: PushService) -> RentalMonitor {
        RentalMonitor::new(pool.clone(), Arc::new(push), MonitorConfig::default())
    }

    #[tokio::test]
    async fn test_overdue_rentals_become_late() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let customer = seed_customer(&pool, "Budi", "+628111", 0).await;
        let now = Utc::now();
        let (late_order, late_rental) = seed_rental(&pool, &customer, "rented", now - chrono::Duration::hours(2)).await;
        let (_, ok_rental) = seed_rental(&pool, &customer, "rented", now + chrono::Duration::days(3)).await;
        let (_, pending_rental) = seed_rental(&pool, &customer, "pending", now - chrono::Duration::days(1)).await;

        let report = monitor(&pool, PushService::disabled(pool.clone()))
            .run_once(now)
            .await
            .unwrap();

        assert_eq!(report, MonitorReport { marked_late: 1, reminded: 0 });
        assert_eq!(status_of(&pool, "rental_orders", &late_rental).await, "late");
        assert_eq!(status_of(&pool, "orders", &late_order).await, "late");
        assert_eq!(status_of(&pool, "rental_orders", &ok_rental).await, "rented");
        assert_eq!(status_of(&pool, "rental_orders", &pending_rental).await, "pending");
    }

    #[tokio::test]
    async fn test_reminds_each_rental_once() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let budi = seed_customer(&pool, "Budi", "+628111", 0).await;
        let sari = seed_customer(&pool, "Sari", "+628222", 0).await;
        insert_subscription(&pool, "https://push.example/budi", Some(&budi), None).await;
        let now = Utc::now();
        let (_, due_soon) = seed_rental(&pool, &budi, "rented", now + chrono::Duration::hours(6)).await;
        seed_rental(&pool, &budi, "rented", now + chrono::Duration::days(4)).await;
        let (_, unsubscribed) = seed_rental(&pool, &sari, "rented", now + chrono::Duration::hours(3)).await;

        let transport = Arc::new(RecordingTransport::default());
        let push = PushService::with_transport(pool.clone(), transport.clone(), "pub".into());
        let monitor = monitor(&pool, push);

        let first = monitor.run_once(now).await.unwrap();
        assert_eq!(first.reminded, 1);
        let second = monitor.run_once(now).await.unwrap();
        assert_eq!(second.reminded, 0);

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1["title"], "Rental reminder");
        drop(delivered);

        for id in [&due_soon, &unsubscribed] {
            let stamped: Option<String> = sqlx::query_scalar("SELECT reminded_at FROM rental_orders WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
            assert!(stamped.is_some());
        }
    }

    #[tokio::test]
    async fn test_disabled_push_leaves_rentals_unreminded() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let budi = seed_customer(&pool, "Budi", "+628111", 0).await;
        let (_, rental) = seed_rental(&pool, &budi, "rented", Utc::now() + chrono::Duration::hours(6)).await;

        monitor(&pool, PushService::disabled(pool.clone()))
            .run_once(Utc::now())
            .await
            .unwrap();

        let stamped: Option<String> = sqlx::query_scalar("SELECT reminded_at FROM rental_orders WHERE id = ?")
            .bind(&rental)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(stamped.is_none());
    }
}
