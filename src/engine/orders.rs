//! Order lifecycle: status changes on orders and their rental and print
//! sub-orders, order history and the rental monitoring view.

use sqlx::SqliteConnection;

use super::{loyalty, ShopError, ShopResult};
use crate::db::{
    MonitoredRental, MonitoringResponse, Order, OrderDetail, OrderStatus, OrderWithCustomer,
    PrintOrder, PrintStatus, RentalItemWithProduct, RentalOrder, RentalOrderDetail, RentalStatus,
    RentalWithCustomer,
};
use crate::notifications::{PushService, PushTemplate};
use crate::utils::now_rfc3339;
use crate::DbPool;

const RENTAL_WITH_CUSTOMER_SQL: &str = r#"
    SELECT r.*, c.name AS customer_name, c.whatsapp AS customer_whatsapp
    FROM rental_orders r
    JOIN customers c ON c.id = r.customer_id
"#;

async fn fetch_order(conn: &mut SqliteConnection, order_id: &str) -> ShopResult<Order> {
    sqlx::query_as("SELECT * FROM orders WHERE id = ?")
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ShopError::not_found("Order"))
}

async fn rental_items(conn: &mut SqliteConnection, rental_id: &str) -> ShopResult<Vec<RentalItemWithProduct>> {
    Ok(sqlx::query_as(
        r#"
        SELECT ri.*, p.name AS product_name
        FROM rental_items ri JOIN products p ON p.id = ri.product_id
        WHERE ri.rental_order_id = ?
        "#,
    )
    .bind(rental_id)
    .fetch_all(&mut *conn)
    .await?)
}

async fn order_detail(conn: &mut SqliteConnection, order: Order) -> ShopResult<OrderDetail> {
    let customer_name: String = sqlx::query_scalar("SELECT name FROM customers WHERE id = ?")
        .bind(&order.customer_id)
        .fetch_one(&mut *conn)
        .await?;

    let rentals: Vec<RentalOrder> =
        sqlx::query_as("SELECT * FROM rental_orders WHERE order_id = ? ORDER BY created_at")
            .bind(&order.id)
            .fetch_all(&mut *conn)
            .await?;
    let mut rental_orders = Vec::with_capacity(rentals.len());
    for rental in rentals {
        let items = rental_items(conn, &rental.id).await?;
        rental_orders.push(RentalOrderDetail { rental, items });
    }

    let print_orders: Vec<PrintOrder> =
        sqlx::query_as("SELECT * FROM print_orders WHERE order_id = ? ORDER BY created_at, rowid")
            .bind(&order.id)
            .fetch_all(&mut *conn)
            .await?;

    Ok(OrderDetail {
        order,
        customer_name,
        rental_orders,
        print_orders,
    })
}

pub async fn list_orders(db: &DbPool, status: Option<&str>) -> ShopResult<Vec<OrderWithCustomer>> {
    let status = match status.filter(|s| !s.is_empty() && *s != "all") {
        Some(s) => Some(
            s.parse::<OrderStatus>()
                .map_err(|e| ShopError::invalid("status", e))?,
        ),
        None => None,
    };

    let orders = sqlx::query_as(
        r#"
        SELECT o.*, c.name AS customer_name
        FROM orders o JOIN customers c ON c.id = o.customer_id
        WHERE (?1 IS NULL OR o.status = ?1)
        ORDER BY o.created_at DESC, o.rowid DESC
        "#,
    )
    .bind(status.map(|s| s.as_str()))
    .fetch_all(db)
    .await?;
    Ok(orders)
}

pub async fn get_order(db: &DbPool, order_id: &str) -> ShopResult<OrderDetail> {
    let mut conn = db.acquire().await?;
    let order = fetch_order(&mut conn, order_id).await?;
    order_detail(&mut conn, order).await
}

/// A customer's order history, newest first
pub async fn customer_orders(db: &DbPool, customer_id: &str) -> ShopResult<Vec<OrderDetail>> {
    let mut conn = db.acquire().await?;
    let orders: Vec<Order> =
        sqlx::query_as("SELECT * FROM orders WHERE customer_id = ? ORDER BY created_at DESC, rowid DESC")
            .bind(customer_id)
            .fetch_all(&mut *conn)
            .await?;

    let mut details = Vec::with_capacity(orders.len());
    for order in orders {
        details.push(order_detail(&mut conn, order).await?);
    }
    Ok(details)
}

/// Move an order to `next`, crediting points the first time it becomes paid
/// and returning redeemed points when it is cancelled.
async fn apply_order_status(
    conn: &mut SqliteConnection,
    order: &Order,
    next: OrderStatus,
) -> ShopResult<()> {
    let current = order.get_status();
    if current == next {
        return Ok(());
    }
    if current.is_terminal() {
        return Err(ShopError::Conflict(format!("Order is already {}", current)));
    }

    let now = now_rfc3339();
    sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ?")
        .bind(next.as_str())
        .bind(&now)
        .bind(&order.id)
        .execute(&mut *conn)
        .await?;

    if next.is_paid() && !current.is_paid() {
        loyalty::credit_order_points(conn, &order.id).await?;
    }

    if next == OrderStatus::Cancelled {
        if order.points_redeemed > 0 {
            sqlx::query("UPDATE customers SET total_points = total_points + ?, updated_at = ? WHERE id = ?")
                .bind(order.points_redeemed)
                .bind(&now)
                .bind(&order.customer_id)
                .execute(&mut *conn)
                .await?;
        }
        sqlx::query(
            "UPDATE rental_orders SET status = 'cancelled', updated_at = ? WHERE order_id = ? AND status NOT IN ('completed', 'cancelled')",
        )
        .bind(&now)
        .bind(&order.id)
        .execute(&mut *conn)
        .await?;
        sqlx::query(
            "UPDATE print_orders SET status = 'cancelled', updated_at = ? WHERE order_id = ? AND status NOT IN ('completed', 'cancelled')",
        )
        .bind(&now)
        .bind(&order.id)
        .execute(&mut *conn)
        .await?;
    }

    tracing::info!(order_id = %order.id, from = %current, to = %next, "Order status changed");
    Ok(())
}

pub async fn update_order_status(db: &DbPool, order_id: &str, status: &str) -> ShopResult<Order> {
    let next: OrderStatus = status.parse().map_err(|e| ShopError::invalid("status", e))?;

    let mut tx = db.begin().await?;
    let order = fetch_order(&mut tx, order_id).await?;
    apply_order_status(&mut tx, &order, next).await?;
    let updated = fetch_order(&mut tx, order_id).await?;
    tx.commit().await?;
    Ok(updated)
}

/// Change a rental's status. The parent order follows it into rented, late
/// and completed. A completed rental triggers a thank-you push.
pub async fn update_rental_status(
    db: &DbPool,
    push: &PushService,
    rental_id: &str,
    status: &str,
) -> ShopResult<RentalOrder> {
    let next: RentalStatus = status.parse().map_err(|e| ShopError::invalid("status", e))?;

    let mut tx = db.begin().await?;
    let rental: RentalOrder = sqlx::query_as("SELECT * FROM rental_orders WHERE id = ?")
        .bind(rental_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ShopError::not_found("Rental order"))?;

    let current: RentalStatus = rental
        .status
        .parse()
        .map_err(|e: String| ShopError::Internal(anyhow::anyhow!(e)))?;
    if current == next {
        tx.commit().await?;
        return Ok(rental);
    }
    if matches!(current, RentalStatus::Completed | RentalStatus::Cancelled) {
        return Err(ShopError::Conflict(format!("Rental is already {}", current)));
    }

    sqlx::query("UPDATE rental_orders SET status = ?, updated_at = ? WHERE id = ?")
        .bind(next.as_str())
        .bind(now_rfc3339())
        .bind(rental_id)
        .execute(&mut *tx)
        .await?;

    let parent = fetch_order(&mut tx, &rental.order_id).await?;
    let mirrored = match next {
        RentalStatus::Rented => Some(OrderStatus::Rented),
        RentalStatus::Late => Some(OrderStatus::Late),
        RentalStatus::Completed => {
            let open_prints: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM print_orders WHERE order_id = ? AND status IN ('pending', 'processing')",
            )
            .bind(&parent.id)
            .fetch_one(&mut *tx)
            .await?;
            (open_prints == 0).then_some(OrderStatus::Completed)
        }
        RentalStatus::Pending | RentalStatus::Cancelled => None,
    };
    if let Some(order_status) = mirrored {
        if !parent.get_status().is_terminal() {
            apply_order_status(&mut tx, &parent, order_status).await?;
        }
    }

    let updated: RentalOrder = sqlx::query_as("SELECT * FROM rental_orders WHERE id = ?")
        .bind(rental_id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(rental_id = %rental_id, from = %current, to = %next, "Rental status changed");

    if next == RentalStatus::Completed {
        send_thank_you(db, push, &updated.customer_id).await;
    }

    Ok(updated)
}

async fn send_thank_you(db: &DbPool, push: &PushService, customer_id: &str) {
    let name: Option<String> = match sqlx::query_scalar("SELECT name FROM customers WHERE id = ?")
        .bind(customer_id)
        .fetch_optional(db)
        .await
    {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(customer_id = %customer_id, error = %e, "Could not load customer for thank-you push");
            return;
        }
    };
    let Some(name) = name else { return };

    match push.send_to_customer(customer_id, &PushTemplate::ThankYou { name }).await {
        Ok(report) => tracing::debug!(customer_id = %customer_id, sent = report.sent, "Thank-you push sent"),
        Err(ShopError::NoSubscriptions) | Err(ShopError::PushDisabled) => {}
        Err(e) => tracing::warn!(customer_id = %customer_id, error = %e, "Thank-you push failed"),
    }
}

pub async fn update_print_status(db: &DbPool, print_id: &str, status: &str) -> ShopResult<PrintOrder> {
    let next: PrintStatus = status.parse().map_err(|e| ShopError::invalid("status", e))?;

    let print: PrintOrder = sqlx::query_as("SELECT * FROM print_orders WHERE id = ?")
        .bind(print_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ShopError::not_found("Print order"))?;

    if print.status != next.as_str()
        && matches!(print.status.as_str(), "completed" | "cancelled")
    {
        return Err(ShopError::Conflict(format!("Print order is already {}", print.status)));
    }

    sqlx::query("UPDATE print_orders SET status = ?, updated_at = ? WHERE id = ?")
        .bind(next.as_str())
        .bind(now_rfc3339())
        .bind(print_id)
        .execute(db)
        .await?;

    tracing::info!(print_id = %print_id, from = %print.status, to = %next, "Print status changed");

    Ok(sqlx::query_as("SELECT * FROM print_orders WHERE id = ?")
        .bind(print_id)
        .fetch_one(db)
        .await?)
}

/// Rentals currently out (rented or late) by due date, and the five most recently returned
pub async fn monitoring(db: &DbPool) -> ShopResult<MonitoringResponse> {
    let mut conn = db.acquire().await?;

    let active: Vec<RentalWithCustomer> = sqlx::query_as(&format!(
        "{} WHERE r.status IN ('rented', 'late') ORDER BY r.due_date ASC",
        RENTAL_WITH_CUSTOMER_SQL
    ))
    .fetch_all(&mut *conn)
    .await?;

    let mut monitored = Vec::with_capacity(active.len());
    for rental in active {
        let items = rental_items(&mut conn, &rental.rental.id).await?;
        monitored.push(MonitoredRental { rental, items });
    }

    let recent_completed = sqlx::query_as(&format!(
        "{} WHERE r.status = 'completed' ORDER BY r.updated_at DESC LIMIT 5",
        RENTAL_WITH_CUSTOMER_SQL
    ))
    .fetch_all(&mut *conn)
    .await?;

    Ok(MonitoringResponse {
        active: monitored,
        recent_completed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckoutConfig;
    use crate::db::{CheckoutItem, CheckoutRequest, CheckoutResponse};
    use crate::engine::checkout::place_order;
    use crate::engine::testing::*;
    use crate::notifications::testing::{insert_subscription, RecordingTransport};
    use std::sync::Arc;

    async fn order_with(pool: &DbPool, customer: &str, products: &[&str], redeem: Option<i64>) -> CheckoutResponse {
        let items = products
            .iter()
            .map(|p| CheckoutItem {
                product_id: p.to_string(),
                quantity: 1,
                file_url: None,
                start_date: None,
                end_date: None,
                notes: None,
            })
            .collect();
        place_order(
            pool,
            &CheckoutConfig::default(),
            customer,
            &CheckoutRequest {
                sender_name: "Budi".into(),
                proof_image: "proof.jpg".into(),
                payment_method: "transfer".into(),
                items,
                redeem_points: redeem,
            },
        )
        .await
        .unwrap()
    }

    async fn rental_of(pool: &DbPool, order_id: &str) -> RentalOrder {
        sqlx::query_as("SELECT * FROM rental_orders WHERE order_id = ?")
            .bind(order_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_paying_credits_points_once() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let customer = seed_customer(&pool, "Budi", "+628111", 0).await;
        let cat = seed_category(&pool, "Kamera").await;
        let camera = seed_product(&pool, &cat, "Canon", 150_000).await;
        let order = order_with(&pool, &customer, &[&camera], None).await;

        update_order_status(&pool, &order.order_id, "paid").await.unwrap();
        assert_eq!(customer_points(&pool, &customer).await, 150);

        update_order_status(&pool, &order.order_id, "processing").await.unwrap();
        update_order_status(&pool, &order.order_id, "rented").await.unwrap();
        assert_eq!(customer_points(&pool, &customer).await, 150);

        let done = update_order_status(&pool, &order.order_id, "completed").await.unwrap();
        assert_eq!(done.points_awarded, 150);
        assert!(matches!(
            update_order_status(&pool, &order.order_id, "pending").await,
            Err(ShopError::Conflict(_))
        ));
        assert!(matches!(
            update_order_status(&pool, &order.order_id, "shipped").await,
            Err(ShopError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_refunds_redeemed_points_and_cancels_sub_orders() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let customer = seed_customer(&pool, "Budi", "+628111", 700).await;
        let cat = seed_category(&pool, "Kamera").await;
        let camera = seed_product(&pool, &cat, "Canon", 150_000).await;
        let order = order_with(&pool, &customer, &[&camera], Some(500)).await;
        assert_eq!(customer_points(&pool, &customer).await, 200);

        update_order_status(&pool, &order.order_id, "cancelled").await.unwrap();
        assert_eq!(customer_points(&pool, &customer).await, 700);
        assert_eq!(rental_of(&pool, &order.order_id).await.status, "cancelled");
    }

    #[tokio::test]
    async fn test_rental_status_drives_parent_and_thanks_customer() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let customer = seed_customer(&pool, "Budi", "+628111", 0).await;
        insert_subscription(&pool, "https://push.example/budi", Some(&customer), None).await;
        let cat = seed_category(&pool, "Kamera").await;
        let camera = seed_product(&pool, &cat, "Canon", 150_000).await;
        let order = order_with(&pool, &customer, &[&camera], None).await;
        let rental = rental_of(&pool, &order.order_id).await;

        let transport = Arc::new(RecordingTransport::default());
        let push = PushService::with_transport(pool.clone(), transport.clone(), "pub".into());

        update_rental_status(&pool, &push, &rental.id, "rented").await.unwrap();
        let parent = get_order(&pool, &order.order_id).await.unwrap();
        assert_eq!(parent.order.status, "rented");
        // Entering a paid state through the rental credits points too
        assert_eq!(customer_points(&pool, &customer).await, 150);

        update_rental_status(&pool, &push, &rental.id, "completed").await.unwrap();
        let parent = get_order(&pool, &order.order_id).await.unwrap();
        assert_eq!(parent.order.status, "completed");
        assert_eq!(parent.rental_orders[0].items[0].product_name, "Canon");

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1["title"], "Thank you!");
        drop(delivered);

        assert!(matches!(
            update_rental_status(&pool, &push, &rental.id, "rented").await,
            Err(ShopError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_completed_rental_leaves_order_open_while_prints_pending() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let customer = seed_customer(&pool, "Budi", "+628111", 0).await;
        let cameras = seed_category(&pool, "Kamera").await;
        let prints = seed_category(&pool, "Cetak Dokumen").await;
        let camera = seed_product(&pool, &cameras, "Canon", 150_000).await;
        let a4 = seed_product(&pool, &prints, "Print A4", 500).await;
        let order = order_with(&pool, &customer, &[&camera, &a4], None).await;
        let rental = rental_of(&pool, &order.order_id).await;
        let push = PushService::disabled(pool.clone());

        update_rental_status(&pool, &push, &rental.id, "rented").await.unwrap();
        update_rental_status(&pool, &push, &rental.id, "completed").await.unwrap();
        let detail = get_order(&pool, &order.order_id).await.unwrap();
        assert_eq!(detail.order.status, "rented");

        let print_id = detail.print_orders[0].id.clone();
        let print = update_print_status(&pool, &print_id, "completed").await.unwrap();
        assert_eq!(print.status, "completed");
        assert!(matches!(
            update_print_status(&pool, &print_id, "pending").await,
            Err(ShopError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_lists_and_monitoring() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let budi = seed_customer(&pool, "Budi", "+628111", 0).await;
        let sari = seed_customer(&pool, "Sari", "+628222", 0).await;
        let cat = seed_category(&pool, "Kamera").await;
        let camera = seed_product(&pool, &cat, "Canon", 150_000).await;
        let first = order_with(&pool, &budi, &[&camera], None).await;
        let second = order_with(&pool, &sari, &[&camera], None).await;
        let push = PushService::disabled(pool.clone());

        update_order_status(&pool, &first.order_id, "paid").await.unwrap();

        assert_eq!(list_orders(&pool, None).await.unwrap().len(), 2);
        let paid = list_orders(&pool, Some("paid")).await.unwrap();
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].customer_name, "Budi");
        assert!(list_orders(&pool, Some("bogus")).await.is_err());

        assert_eq!(customer_orders(&pool, &sari).await.unwrap().len(), 1);

        let r1 = rental_of(&pool, &first.order_id).await;
        let r2 = rental_of(&pool, &second.order_id).await;
        update_rental_status(&pool, &push, &r1.id, "rented").await.unwrap();
        update_rental_status(&pool, &push, &r2.id, "rented").await.unwrap();
        update_rental_status(&pool, &push, &r2.id, "completed").await.unwrap();

        let view = monitoring(&pool).await.unwrap();
        assert_eq!(view.active.len(), 1);
        assert_eq!(view.active[0].rental.customer_name, "Budi");
        assert_eq!(view.active[0].items.len(), 1);
        assert_eq!(view.recent_completed.len(), 1);
        assert_eq!(view.recent_completed[0].customer_name, "Sari");
    }
}
