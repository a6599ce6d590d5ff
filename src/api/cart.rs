//! Customer cart, checkout and wishlist handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::auth::CurrentCustomer;
use super::error::ApiError;
use crate::db::{
    AddToCartRequest, CartCheckoutRequest, CartResponse, CheckoutRequest, CheckoutResponse,
    SyncCartRequest, UpdateQuantityRequest, WishlistItem,
};
use crate::engine::{cart, checkout};
use crate::utils::now_rfc3339;
use crate::AppState;

/// GET /api/cart
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Result<Json<CartResponse>, ApiError> {
    Ok(Json(cart::get_cart(&state.db, &customer.id).await?))
}

/// POST /api/cart
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    CurrentCustomer(customer): CurrentCustomer,
    Json(req): Json<AddToCartRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    Ok(Json(cart::add_item(&state.db, &customer.id, &req).await?))
}

/// PUT /api/cart/quantity
pub async fn update_quantity(
    State(state): State<Arc<AppState>>,
    CurrentCustomer(customer): CurrentCustomer,
    Json(req): Json<UpdateQuantityRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let cart =
        cart::update_quantity(&state.db, &customer.id, &req.product_id, req.quantity).await?;
    Ok(Json(cart))
}

/// DELETE /api/cart/items/:id
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(item_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    Ok(Json(cart::remove_item(&state.db, &customer.id, &item_id).await?))
}

/// DELETE /api/cart
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Result<StatusCode, ApiError> {
    cart::clear(&state.db, &customer.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/cart/sync
pub async fn sync_cart(
    State(state): State<Arc<AppState>>,
    CurrentCustomer(customer): CurrentCustomer,
    Json(req): Json<SyncCartRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    Ok(Json(
        cart::sync_local_cart(&state.db, &customer.id, &req.items).await?,
    ))
}

/// POST /api/cart/checkout
pub async fn checkout_cart(
    State(state): State<Arc<AppState>>,
    CurrentCustomer(customer): CurrentCustomer,
    Json(req): Json<CartCheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let response =
        checkout::checkout_cart(&state.db, &state.config.checkout, &customer.id, &req).await?;
    tracing::info!(
        order_id = %response.order_id,
        customer_id = %customer.id,
        total = response.total_amount,
        "Cart checked out"
    );
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/checkout
pub async fn place_order(
    State(state): State<Arc<AppState>>,
    CurrentCustomer(customer): CurrentCustomer,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let response =
        checkout::place_order(&state.db, &state.config.checkout, &customer.id, &req).await?;
    tracing::info!(
        order_id = %response.order_id,
        customer_id = %customer.id,
        total = response.total_amount,
        status = %response.status,
        "Order placed"
    );
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Serialize)]
pub struct WishlistToggleResponse {
    pub is_wishlisted: bool,
}

/// GET /api/wishlist
pub async fn list_wishlist(
    State(state): State<Arc<AppState>>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Result<Json<Vec<WishlistItem>>, ApiError> {
    let items = sqlx::query_as::<_, WishlistItem>(
        r#"
        SELECT w.id, w.product_id, p.name AS product_name, p.slug AS product_slug,
               p.price AS product_price, p.image_url AS product_image_url, w.created_at
        FROM wishlists w
        JOIN products p ON p.id = w.product_id
        WHERE w.customer_id = ?
        ORDER BY w.created_at DESC, w.rowid DESC
        "#,
    )
    .bind(&customer.id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(items))
}

/// POST /api/wishlist/:product_id: add when absent, remove when present
pub async fn toggle_wishlist(
    State(state): State<Arc<AppState>>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(product_id): Path<String>,
) -> Result<Json<WishlistToggleResponse>, ApiError> {
    let removed = sqlx::query("DELETE FROM wishlists WHERE customer_id = ? AND product_id = ?")
        .bind(&customer.id)
        .bind(&product_id)
        .execute(&state.db)
        .await?;
    if removed.rows_affected() > 0 {
        return Ok(Json(WishlistToggleResponse {
            is_wishlisted: false,
        }));
    }

    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE id = ?")
        .bind(&product_id)
        .fetch_one(&state.db)
        .await?;
    if exists == 0 {
        return Err(ApiError::not_found("Product not found"));
    }

    sqlx::query("INSERT INTO wishlists (id, customer_id, product_id, created_at) VALUES (?, ?, ?, ?)")
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&customer.id)
        .bind(&product_id)
        .bind(now_rfc3339())
        .execute(&state.db)
        .await?;

    Ok(Json(WishlistToggleResponse {
        is_wishlisted: true,
    }))
}
