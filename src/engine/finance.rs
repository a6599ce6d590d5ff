//! Revenue reports and dashboard counters.

use super::ShopResult;
use crate::db::{
    DashboardStats, FinanceReport, FinancialSummary, LatestRental, MonthlyRevenue, OrderStatus,
    TopProduct,
};
use crate::utils::format_rupiah;
use crate::DbPool;

const TOP_PRODUCT_LIMIT: i64 = 5;

/// `('paid', 'processing', ...)` for use in an `IN` clause
fn valid_status_list() -> String {
    let quoted: Vec<String> = OrderStatus::paid_statuses()
        .iter()
        .map(|s| format!("'{}'", s))
        .collect();
    format!("({})", quoted.join(", "))
}

pub async fn financial_summary(db: &DbPool) -> ShopResult<FinancialSummary> {
    let (revenue, total_orders, pending_orders): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN status = 'paid' THEN total_amount ELSE 0 END), 0),
            COUNT(*),
            COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0)
        FROM orders
        "#,
    )
    .fetch_one(db)
    .await?;

    let total_customers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
        .fetch_one(db)
        .await?;

    Ok(FinancialSummary {
        revenue,
        total_orders,
        pending_orders,
        total_customers,
    })
}

pub async fn finance_report(db: &DbPool) -> ShopResult<FinanceReport> {
    let valid = valid_status_list();

    let (total_revenue, order_count): (i64, i64) = sqlx::query_as(&format!(
        "SELECT COALESCE(SUM(total_amount), 0), COUNT(*) FROM orders WHERE status IN {}",
        valid
    ))
    .fetch_one(db)
    .await?;

    let potential_revenue: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(total_amount), 0) FROM orders WHERE status = 'pending'",
    )
    .fetch_one(db)
    .await?;

    let top_products: Vec<TopProduct> = sqlx::query_as(&format!(
        r#"
        SELECT p.name AS name, SUM(ri.quantity * ri.price_at_rental) AS revenue
        FROM rental_items ri
        JOIN rental_orders r ON r.id = ri.rental_order_id
        JOIN orders o ON o.id = r.order_id
        JOIN products p ON p.id = ri.product_id
        WHERE o.status IN {valid}
        GROUP BY p.id
        UNION ALL
        SELECT 'Print service: ' || po.service_type AS name, SUM(po.total_price) AS revenue
        FROM print_orders po
        JOIN orders o ON o.id = po.order_id
        WHERE o.status IN {valid}
        GROUP BY po.service_type
        ORDER BY revenue DESC, name ASC
        LIMIT {TOP_PRODUCT_LIMIT}
        "#
    ))
    .fetch_all(db)
    .await?;

    let monthly: Vec<MonthlyRevenue> = sqlx::query_as(&format!(
        r#"
        SELECT substr(created_at, 1, 7) AS month, SUM(total_amount) AS total
        FROM orders
        WHERE status IN {}
        GROUP BY month
        ORDER BY month ASC
        "#,
        valid
    ))
    .fetch_all(db)
    .await?;

    Ok(FinanceReport {
        total_revenue,
        potential_revenue,
        order_count,
        total_revenue_display: format_rupiah(total_revenue),
        top_products,
        monthly,
    })
}

pub async fn dashboard(db: &DbPool) -> ShopResult<DashboardStats> {
    let (product_count, total_stock): (i64, i64) =
        sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(stock), 0) FROM products")
            .fetch_one(db)
            .await?;

    let active_rentals: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM rental_orders WHERE status IN ('rented', 'late')",
    )
    .fetch_one(db)
    .await?;

    let latest_rentals: Vec<LatestRental> = sqlx::query_as(
        r#"
        SELECT r.id, r.invoice_code, r.status, r.total_price, r.due_date,
               c.name AS customer_name, r.created_at
        FROM rental_orders r
        JOIN customers c ON c.id = r.customer_id
        ORDER BY r.created_at DESC, r.rowid DESC
        LIMIT 5
        "#,
    )
    .fetch_all(db)
    .await?;

    Ok(DashboardStats {
        product_count,
        total_stock,
        active_rentals,
        latest_rentals,
    })
}
