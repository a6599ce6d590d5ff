//! Report DTOs for the finance and dashboard pages.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinancialSummary {
    pub revenue: i64,
    pub total_orders: i64,
    pub pending_orders: i64,
    pub total_customers: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TopProduct {
    pub name: String,
    pub revenue: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MonthlyRevenue {
    /// `YYYY-MM`
    pub month: String,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinanceReport {
    pub total_revenue: i64,
    pub potential_revenue: i64,
    pub order_count: i64,
    pub total_revenue_display: String,
    pub top_products: Vec<TopProduct>,
    pub monthly: Vec<MonthlyRevenue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LatestRental {
    pub id: String,
    pub invoice_code: String,
    pub status: String,
    pub total_price: i64,
    pub due_date: String,
    pub customer_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub product_count: i64,
    pub total_stock: i64,
    pub active_rentals: i64,
    pub latest_rentals: Vec<LatestRental>,
}
