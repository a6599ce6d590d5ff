//! Category and product models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub created_at: String,
}

/// Category with the number of products filed under it
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CategoryWithCount {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub category: Category,
    pub product_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: String,
    pub category_id: String,
    pub name: String,
    pub code: String,
    pub slug: String,
    pub description: Option<String>,
    pub specifications: Option<String>,
    /// Price in Rupiah
    pub price: i64,
    pub stock: i64,
    pub image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Product joined with its category, for catalog listings
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProductWithCategory {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub product: Product,
    pub category_name: String,
    pub category_slug: String,
}

/// Lightweight product entry for pickers (inventory form)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProductOption {
    pub id: String,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub stock: i64,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub specifications: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub code: Option<String>,
    pub category_id: Option<String>,
    pub price: Option<i64>,
    pub stock: Option<i64>,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub specifications: Option<String>,
}

/// Query parameters for the public product listing
#[derive(Debug, Deserialize, Default)]
pub struct ProductQuery {
    /// Category slug, or `all`
    pub category: Option<String>,
}
