//! Persistent customer cart.
//!
//! Plain product lines are merged by product; rental and service lines always
//! get their own row because their dates, files and notes differ.

use sqlx::SqliteConnection;

use super::{check_quantity, ShopError, ShopResult, MAX_QUANTITY};
use crate::db::{AddToCartRequest, Cart, CartItem, CartItemWithProduct, CartResponse};
use crate::utils::{non_empty, now_rfc3339};
use crate::DbPool;

const CART_ITEMS_SQL: &str = r#"
    SELECT ci.*, p.name AS product_name, p.slug AS product_slug,
           p.price AS product_price, p.image_url AS product_image_url
    FROM cart_items ci
    JOIN products p ON p.id = ci.product_id
    WHERE ci.cart_id = ?
    ORDER BY ci.created_at DESC, ci.rowid DESC
"#;

pub(crate) async fn cart_for(conn: &mut SqliteConnection, customer_id: &str) -> ShopResult<Cart> {
    let existing: Option<Cart> = sqlx::query_as("SELECT * FROM carts WHERE customer_id = ?")
        .bind(customer_id)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(cart) = existing {
        return Ok(cart);
    }

    let now = now_rfc3339();
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO carts (id, customer_id, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(customer_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;

    Ok(Cart {
        id,
        customer_id: customer_id.to_string(),
        created_at: now.clone(),
        updated_at: now,
    })
}

pub(crate) async fn cart_items(
    conn: &mut SqliteConnection,
    cart_id: &str,
) -> ShopResult<Vec<CartItemWithProduct>> {
    Ok(sqlx::query_as(CART_ITEMS_SQL)
        .bind(cart_id)
        .fetch_all(&mut *conn)
        .await?)
}

async fn snapshot(conn: &mut SqliteConnection, cart: &Cart) -> ShopResult<CartResponse> {
    let items = cart_items(conn, &cart.id).await?;
    Ok(CartResponse {
        id: cart.id.clone(),
        item_count: items
            .iter()
            .fold(0i64, |acc, i| acc.saturating_add(i.item.quantity)),
        subtotal: items
            .iter()
            .fold(0i64, |acc, i| acc.saturating_add(i.line_total())),
        items,
    })
}

pub async fn get_cart(db: &DbPool, customer_id: &str) -> ShopResult<CartResponse> {
    let mut conn = db.acquire().await?;
    let cart = cart_for(&mut conn, customer_id).await?;
    snapshot(&mut conn, &cart).await
}

async fn add_line(conn: &mut SqliteConnection, cart_id: &str, req: &AddToCartRequest) -> ShopResult<()> {
    check_quantity(req.quantity)?;

    let product: Option<(String,)> = sqlx::query_as("SELECT id FROM products WHERE id = ?")
        .bind(&req.product_id)
        .fetch_optional(&mut *conn)
        .await?;
    if product.is_none() {
        return Err(ShopError::not_found("Product"));
    }

    let now = now_rfc3339();

    if req.item_type.merges() {
        let existing: Option<CartItem> = sqlx::query_as(
            "SELECT * FROM cart_items WHERE cart_id = ? AND product_id = ? AND item_type = 'product' LIMIT 1",
        )
        .bind(cart_id)
        .bind(&req.product_id)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(line) = existing {
            if line.quantity.saturating_add(req.quantity) > MAX_QUANTITY {
                return Err(ShopError::invalid(
                    "quantity",
                    format!("Quantity cannot exceed {}", MAX_QUANTITY),
                ));
            }
            sqlx::query("UPDATE cart_items SET quantity = quantity + ?, updated_at = ? WHERE id = ?")
                .bind(req.quantity)
                .bind(&now)
                .bind(&line.id)
                .execute(&mut *conn)
                .await?;
            return Ok(());
        }
    }

    sqlx::query(
        r#"
        INSERT INTO cart_items (id, cart_id, product_id, quantity, item_type, start_date, end_date, file_url, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(cart_id)
    .bind(&req.product_id)
    .bind(req.quantity)
    .bind(req.item_type.as_str())
    .bind(non_empty(req.start_date.clone()))
    .bind(non_empty(req.end_date.clone()))
    .bind(non_empty(req.file_url.clone()))
    .bind(non_empty(req.notes.clone()))
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn add_item(db: &DbPool, customer_id: &str, req: &AddToCartRequest) -> ShopResult<CartResponse> {
    let mut tx = db.begin().await?;
    let cart = cart_for(&mut tx, customer_id).await?;
    add_line(&mut tx, &cart.id, req).await?;
    let response = snapshot(&mut tx, &cart).await?;
    tx.commit().await?;
    Ok(response)
}

/// Set the quantity of a product. Zero or less removes every line of that product.
pub async fn update_quantity(
    db: &DbPool,
    customer_id: &str,
    product_id: &str,
    quantity: i64,
) -> ShopResult<CartResponse> {
    let mut tx = db.begin().await?;
    let cart = cart_for(&mut tx, customer_id).await?;

    if quantity <= 0 {
        sqlx::query("DELETE FROM cart_items WHERE cart_id = ? AND product_id = ?")
            .bind(&cart.id)
            .bind(product_id)
            .execute(&mut *tx)
            .await?;
    } else {
        check_quantity(quantity)?;
        let first: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM cart_items WHERE cart_id = ? AND product_id = ? ORDER BY created_at ASC, rowid ASC LIMIT 1",
        )
        .bind(&cart.id)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (item_id,) = first.ok_or_else(|| ShopError::not_found("Cart item"))?;

        sqlx::query("UPDATE cart_items SET quantity = ?, updated_at = ? WHERE id = ?")
            .bind(quantity)
            .bind(now_rfc3339())
            .bind(&item_id)
            .execute(&mut *tx)
            .await?;
    }

    let response = snapshot(&mut tx, &cart).await?;
    tx.commit().await?;
    Ok(response)
}

pub async fn remove_item(db: &DbPool, customer_id: &str, item_id: &str) -> ShopResult<CartResponse> {
    let mut tx = db.begin().await?;
    let cart = cart_for(&mut tx, customer_id).await?;
    let result = sqlx::query("DELETE FROM cart_items WHERE id = ? AND cart_id = ?")
        .bind(item_id)
        .bind(&cart.id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ShopError::not_found("Cart item"));
    }
    let response = snapshot(&mut tx, &cart).await?;
    tx.commit().await?;
    Ok(response)
}

pub async fn clear(db: &DbPool, customer_id: &str) -> ShopResult<()> {
    sqlx::query("DELETE FROM cart_items WHERE cart_id IN (SELECT id FROM carts WHERE customer_id = ?)")
        .bind(customer_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Merge a guest cart kept in browser storage into the customer's cart, all or nothing
pub async fn sync_local_cart(
    db: &DbPool,
    customer_id: &str,
    items: &[AddToCartRequest],
) -> ShopResult<CartResponse> {
    let mut tx = db.begin().await?;
    let cart = cart_for(&mut tx, customer_id).await?;
    for item in items {
        add_line(&mut tx, &cart.id, item).await?;
    }
    let response = snapshot(&mut tx, &cart).await?;
    tx.commit().await?;

    if !items.is_empty() {
        tracing::info!(customer_id = %customer_id, lines = items.len(), "Guest cart merged");
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CartItemType;
    use crate::engine::testing::*;

    fn line(product_id: &str, quantity: i64, item_type: CartItemType) -> AddToCartRequest {
        AddToCartRequest {
            product_id: product_id.to_string(),
            quantity,
            item_type,
            start_date: None,
            end_date: None,
            file_url: None,
            notes: None,
        }
    }

    async fn setup() -> (DbPool, String, String, String) {
        let pool = crate::db::init_in_memory().await.unwrap();
        let customer = seed_customer(&pool, "Budi", "+628111", 0).await;
        let category = seed_category(&pool, "Kamera").await;
        let camera = seed_product(&pool, &category, "Canon EOS", 150_000).await;
        let tripod = seed_product(&pool, &category, "Tripod", 25_000).await;
        (pool, customer, camera, tripod)
    }

    #[tokio::test]
    async fn test_product_lines_merge_by_product() {
        let (pool, customer, camera, tripod) = setup().await;

        add_item(&pool, &customer, &line(&camera, 1, CartItemType::Product)).await.unwrap();
        add_item(&pool, &customer, &line(&camera, 2, CartItemType::Product)).await.unwrap();
        let cart = add_item(&pool, &customer, &line(&tripod, 1, CartItemType::Product))
            .await
            .unwrap();

        assert_eq!(cart.items.len(), 2);
        let camera_line = cart.items.iter().find(|i| i.item.product_id == camera).unwrap();
        assert_eq!(camera_line.item.quantity, 3);
        assert_eq!(cart.item_count, 4);
        assert_eq!(cart.subtotal, 3 * 150_000 + 25_000);
    }

    #[tokio::test]
    async fn test_rental_and_service_lines_never_merge() {
        let (pool, customer, camera, _) = setup().await;

        add_item(&pool, &customer, &line(&camera, 1, CartItemType::Rental)).await.unwrap();
        add_item(&pool, &customer, &line(&camera, 1, CartItemType::Rental)).await.unwrap();
        let cart = add_item(&pool, &customer, &line(&camera, 1, CartItemType::Service))
            .await
            .unwrap();
        assert_eq!(cart.items.len(), 3);

        // A plain product line does not fold into a rental line either
        let cart = add_item(&pool, &customer, &line(&camera, 1, CartItemType::Product))
            .await
            .unwrap();
        assert_eq!(cart.items.len(), 4);
    }

    #[tokio::test]
    async fn test_add_rejects_bad_quantity_and_unknown_product() {
        let (pool, customer, camera, _) = setup().await;
        assert!(matches!(
            add_item(&pool, &customer, &line(&camera, 0, CartItemType::Product)).await,
            Err(ShopError::Validation { .. })
        ));
        assert!(matches!(
            add_item(&pool, &customer, &line("nope", 1, CartItemType::Product)).await,
            Err(ShopError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_quantity_is_capped_on_add_merge_and_update() {
        let (pool, customer, camera, _) = setup().await;
        assert!(matches!(
            add_item(&pool, &customer, &line(&camera, 100_000_000_000_000, CartItemType::Product)).await,
            Err(ShopError::Validation { .. })
        ));

        add_item(&pool, &customer, &line(&camera, MAX_QUANTITY, CartItemType::Product))
            .await
            .unwrap();
        // Merging one more would push the line past the cap
        assert!(matches!(
            add_item(&pool, &customer, &line(&camera, 1, CartItemType::Product)).await,
            Err(ShopError::Validation { .. })
        ));
        assert!(matches!(
            update_quantity(&pool, &customer, &camera, i64::MAX).await,
            Err(ShopError::Validation { .. })
        ));

        let cart = get_cart(&pool, &customer).await.unwrap();
        assert_eq!(cart.item_count, MAX_QUANTITY);
        assert_eq!(cart.subtotal, MAX_QUANTITY * 150_000);
    }

    #[tokio::test]
    async fn test_update_quantity_and_remove() {
        let (pool, customer, camera, tripod) = setup().await;
        add_item(&pool, &customer, &line(&camera, 1, CartItemType::Product)).await.unwrap();
        add_item(&pool, &customer, &line(&camera, 1, CartItemType::Rental)).await.unwrap();
        add_item(&pool, &customer, &line(&tripod, 1, CartItemType::Product)).await.unwrap();

        let cart = update_quantity(&pool, &customer, &tripod, 4).await.unwrap();
        let tripod_line = cart.items.iter().find(|i| i.item.product_id == tripod).unwrap();
        assert_eq!(tripod_line.item.quantity, 4);

        // Zero drops every line of the product, rental lines included
        let cart = update_quantity(&pool, &customer, &camera, 0).await.unwrap();
        assert_eq!(cart.items.len(), 1);

        let item_id = cart.items[0].item.id.clone();
        let cart = remove_item(&pool, &customer, &item_id).await.unwrap();
        assert!(cart.items.is_empty());
        assert!(matches!(
            remove_item(&pool, &customer, &item_id).await,
            Err(ShopError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_is_all_or_nothing() {
        let (pool, customer, camera, tripod) = setup().await;
        add_item(&pool, &customer, &line(&camera, 1, CartItemType::Product)).await.unwrap();

        let bad = vec![line(&tripod, 1, CartItemType::Product), line("ghost", 1, CartItemType::Product)];
        assert!(sync_local_cart(&pool, &customer, &bad).await.is_err());
        assert_eq!(get_cart(&pool, &customer).await.unwrap().items.len(), 1);

        let good = vec![line(&camera, 2, CartItemType::Product), line(&tripod, 1, CartItemType::Product)];
        let cart = sync_local_cart(&pool, &customer, &good).await.unwrap();
        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.item_count, 4);

        let unchanged = sync_local_cart(&pool, &customer, &[]).await.unwrap();
        assert_eq!(unchanged.item_count, 4);

        clear(&pool, &customer).await.unwrap();
        assert!(get_cart(&pool, &customer).await.unwrap().items.is_empty());
    }
}
