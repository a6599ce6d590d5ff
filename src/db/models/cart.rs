//! Cart and wishlist models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kind of cart line
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CartItemType {
    Product,
    Rental,
    Service,
}

impl CartItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Rental => "rental",
            Self::Service => "service",
        }
    }

    /// Product lines are merged by product; rental and service lines always stand alone.
    pub fn merges(&self) -> bool {
        matches!(self, Self::Product)
    }
}

impl Default for CartItemType {
    fn default() -> Self {
        Self::Product
    }
}

impl std::fmt::Display for CartItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CartItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "product" => Ok(Self::Product),
            "rental" => Ok(Self::Rental),
            "service" => Ok(Self::Service),
            _ => Err(format!("Unknown cart item type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Cart {
    pub id: String,
    pub customer_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CartItem {
    pub id: String,
    pub cart_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub item_type: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub file_url: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Cart line joined with the product it refers to
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CartItemWithProduct {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub item: CartItem,
    pub product_name: String,
    pub product_slug: String,
    pub product_price: i64,
    pub product_image_url: Option<String>,
}

impl CartItemWithProduct {
    /// Saturates rather than wrapping; checkout recomputes totals strictly
    pub fn line_total(&self) -> i64 {
        self.product_price.saturating_mul(self.item.quantity)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CartResponse {
    pub id: String,
    pub items: Vec<CartItemWithProduct>,
    pub item_count: i64,
    pub subtotal: i64,
}

/// A line to add, either from the storefront or from a guest cart being synced
#[derive(Debug, Clone, Deserialize)]
pub struct AddToCartRequest {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default, rename = "type")]
    pub item_type: CartItemType,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub file_url: Option<String>,
    pub notes: Option<String>,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct SyncCartRequest {
    #[serde(default)]
    pub items: Vec<AddToCartRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WishlistEntry {
    pub id: String,
    pub customer_id: String,
    pub product_id: String,
    pub created_at: String,
}

/// Wishlist entry with product details
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WishlistItem {
    pub id: String,
    pub product_id: String,
    pub product_name: String,
    pub product_slug: String,
    pub product_price: i64,
    pub product_image_url: Option<String>,
    pub created_at: String,
}
