//! Order, rental order and print order models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Status of a master order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Rented,
    Completed,
    Late,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Processing => "processing",
            Self::Rented => "rented",
            Self::Completed => "completed",
            Self::Late => "late",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses that count as revenue
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Processing | Self::Rented | Self::Completed | Self::Late
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Statuses whose orders are included in revenue reports
    pub fn paid_statuses() -> [&'static str; 5] {
        ["paid", "processing", "rented", "completed", "late"]
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "processing" => Ok(Self::Processing),
            "rented" => Ok(Self::Rented),
            "completed" => Ok(Self::Completed),
            "late" => Ok(Self::Late),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown order status: {}", s)),
        }
    }
}

impl From<String> for OrderStatus {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(Self::Pending)
    }
}

/// Status of a rental sub-order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RentalStatus {
    Pending,
    Rented,
    Completed,
    Late,
    Cancelled,
}

impl RentalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Rented => "rented",
            Self::Completed => "completed",
            Self::Late => "late",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RentalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "rented" => Ok(Self::Rented),
            "completed" => Ok(Self::Completed),
            "late" => Ok(Self::Late),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown rental status: {}", s)),
        }
    }
}

/// Status of a print job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PrintStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
}

impl PrintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PrintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PrintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown print status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub total_amount: i64,
    pub discount_amount: i64,
    pub points_redeemed: i64,
    pub points_awarded: i64,
    pub sender_name: String,
    pub proof_image: String,
    pub payment_method: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Order {
    pub fn get_status(&self) -> OrderStatus {
        OrderStatus::from(self.status.clone())
    }
}

/// Order row for the admin list
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderWithCustomer {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub order: Order,
    pub customer_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RentalOrder {
    pub id: String,
    pub invoice_code: String,
    pub customer_id: String,
    pub order_id: String,
    pub start_date: String,
    pub due_date: String,
    pub total_price: i64,
    pub status: String,
    pub reminded_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RentalItem {
    pub id: String,
    pub rental_order_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub price_at_rental: i64,
}

/// Rental line with its product name
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RentalItemWithProduct {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub item: RentalItem,
    pub product_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PrintOrder {
    pub id: String,
    pub invoice_code: String,
    pub customer_id: String,
    pub order_id: String,
    pub file_url: String,
    pub service_type: String,
    pub page_count: i64,
    pub copies: i64,
    pub total_price: i64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RentalOrderDetail {
    #[serde(flatten)]
    pub rental: RentalOrder,
    pub items: Vec<RentalItemWithProduct>,
}

/// Order with everything hanging off it
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub customer_name: String,
    pub rental_orders: Vec<RentalOrderDetail>,
    pub print_orders: Vec<PrintOrder>,
}

/// Rental row for the monitoring page
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RentalWithCustomer {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub rental: RentalOrder,
    pub customer_name: String,
    pub customer_whatsapp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoredRental {
    #[serde(flatten)]
    pub rental: RentalWithCustomer,
    pub items: Vec<RentalItemWithProduct>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringResponse {
    pub active: Vec<MonitoredRental>,
    pub recent_completed: Vec<RentalWithCustomer>,
}

/// One line of a checkout request
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutItem {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    pub file_url: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub notes: Option<String>,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub proof_image: String,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub items: Vec<CheckoutItem>,
    #[serde(default)]
    pub redeem_points: Option<i64>,
}

/// Checkout from the stored cart; items come from the cart itself
#[derive(Debug, Clone, Deserialize)]
pub struct CartCheckoutRequest {
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub proof_image: String,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub redeem_points: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub order_id: String,
    pub status: String,
    pub total_amount: i64,
    pub discount_amount: i64,
    pub points_redeemed: i64,
    pub points_awarded: i64,
    pub rental_invoice: Option<String>,
    pub print_invoices: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct OrderQuery {
    pub status: Option<String>,
}
