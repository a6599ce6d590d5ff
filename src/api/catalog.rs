//! Categories and products: public browsing and staff maintenance.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::audit::{audit_log, ClientIp};
use super::auth::StaffUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_non_negative, validate_required};
use crate::db::{
    actions, resource_types, AuditEntry, Category, CategoryWithCount, CreateCategoryRequest,
    CreateProductRequest, Product, ProductOption, ProductQuery, ProductWithCategory,
    UpdateProductRequest,
};
use crate::utils::{non_empty, now_rfc3339, random_suffix, slugify};
use crate::{AppState, DbPool};

const PRODUCT_SELECT: &str = r#"
    SELECT p.*, c.name AS category_name, c.slug AS category_slug
    FROM products p
    JOIN categories c ON c.id = p.category_id
"#;

/// GET /api/categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CategoryWithCount>>, ApiError> {
    let categories = sqlx::query_as::<_, CategoryWithCount>(
        r#"
        SELECT c.*, (SELECT COUNT(*) FROM products p WHERE p.category_id = c.id) AS product_count
        FROM categories c
        ORDER BY c.name ASC
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(categories))
}

/// POST /api/admin/categories
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation_field("name", "Category name is required"));
    }
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(ApiError::validation_field(
            "name",
            "Category name must contain letters or digits",
        ));
    }

    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE slug = ?")
        .bind(&slug)
        .fetch_one(&state.db)
        .await?;
    if exists > 0 {
        return Err(ApiError::conflict("A category with this name already exists"));
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO categories (id, name, slug, created_at) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(&slug)
        .bind(now_rfc3339())
        .execute(&state.db)
        .await?;

    let category: Category = sqlx::query_as("SELECT * FROM categories WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    audit_log(
        &state,
        AuditEntry {
            action: actions::CATEGORY_CREATE,
            resource_type: resource_types::CATEGORY,
            resource_id: Some(&category.id),
            resource_name: Some(&category.name),
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: None,
        },
    )
    .await;

    Ok((StatusCode::CREATED, Json(category)))
}

/// DELETE /api/admin/categories/:id
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let category: Category = sqlx::query_as("SELECT * FROM categories WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Category not found"))?;

    let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE category_id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;
    if in_use > 0 {
        return Err(ApiError::conflict(format!(
            "Category still has {} product(s)",
            in_use
        )));
    }

    sqlx::query("DELETE FROM categories WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    audit_log(
        &state,
        AuditEntry {
            action: actions::CATEGORY_DELETE,
            resource_type: resource_types::CATEGORY,
            resource_id: Some(&id),
            resource_name: Some(&category.name),
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: None,
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/products?category=slug
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<Vec<ProductWithCategory>>, ApiError> {
    let category = query
        .category
        .filter(|c| !c.is_empty() && c != "all");

    let products = sqlx::query_as::<_, ProductWithCategory>(&format!(
        "{} WHERE (?1 IS NULL OR c.slug = ?1) ORDER BY p.created_at DESC, p.rowid DESC",
        PRODUCT_SELECT
    ))
    .bind(category)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(products))
}

async fn find_product(db: &DbPool, id_or_slug: &str) -> Result<ProductWithCategory, ApiError> {
    sqlx::query_as::<_, ProductWithCategory>(&format!(
        "{} WHERE p.id = ?1 OR p.slug = ?1",
        PRODUCT_SELECT
    ))
    .bind(id_or_slug)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("Product not found"))
}

/// GET /api/products/:id (id or slug)
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProductWithCategory>, ApiError> {
    Ok(Json(find_product(&state.db, &id).await?))
}

/// GET /api/admin/products/options
pub async fn list_product_options(
    State(state): State<Arc<AppState>>,
    _staff: StaffUser,
) -> Result<Json<Vec<ProductOption>>, ApiError> {
    let options = sqlx::query_as::<_, ProductOption>(
        "SELECT id, name, code FROM products ORDER BY name ASC",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(Json(options))
}

async fn ensure_category(db: &DbPool, category_id: &str) -> Result<(), ApiError> {
    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE id = ?")
        .bind(category_id)
        .fetch_one(db)
        .await?;
    if exists == 0 {
        return Err(ApiError::validation_field("category_id", "Category does not exist"));
    }
    Ok(())
}

/// POST /api/admin/products
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductWithCategory>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_required(&req.name, "Name") {
        errors.add("name", e);
    }
    if let Err(e) = validate_required(&req.code, "Code") {
        errors.add("code", e);
    }
    if let Err(e) = validate_required(&req.category_id, "Category") {
        errors.add("category_id", e);
    }
    if let Err(e) = validate_non_negative(req.price, "Price") {
        errors.add("price", e);
    }
    if let Err(e) = validate_non_negative(req.stock, "Stock") {
        errors.add("stock", e);
    }
    errors.finish()?;
    ensure_category(&state.db, &req.category_id).await?;

    let name = req.name.trim();
    let id = Uuid::new_v4().to_string();
    let slug = format!("{}-{}", slugify(name), random_suffix(5));
    let now = now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO products (id, category_id, name, code, slug, description, specifications,
                              price, stock, image_url, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&req.category_id)
    .bind(name)
    .bind(req.code.trim())
    .bind(&slug)
    .bind(non_empty(req.description.clone()))
    .bind(non_empty(req.specifications.clone()))
    .bind(req.price)
    .bind(req.stock)
    .bind(non_empty(req.image_url.clone()))
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    tracing::info!(product_id = %id, code = %req.code.trim(), "Product created");

    audit_log(
        &state,
        AuditEntry {
            action: actions::PRODUCT_CREATE,
            resource_type: resource_types::PRODUCT,
            resource_id: Some(&id),
            resource_name: Some(name),
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: None,
        },
    )
    .await;

    Ok((StatusCode::CREATED, Json(find_product(&state.db, &id).await?)))
}

/// PUT /api/admin/products/:id
pub async fn update_product(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
    Json(req): Json<UpdateProductRequest>,
) -> Result<Json<ProductWithCategory>, ApiError> {
    let existing: Product = sqlx::query_as("SELECT * FROM products WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Product not found"))?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &req.name {
        if let Err(e) = validate_required(name, "Name") {
            errors.add("name", e);
        }
    }
    if let Some(code) = &req.code {
        if let Err(e) = validate_required(code, "Code") {
            errors.add("code", e);
        }
    }
    if let Some(price) = req.price {
        if let Err(e) = validate_non_negative(price, "Price") {
            errors.add("price", e);
        }
    }
    if let Some(stock) = req.stock {
        if let Err(e) = validate_non_negative(stock, "Stock") {
            errors.add("stock", e);
        }
    }
    errors.finish()?;
    if let Some(category_id) = &req.category_id {
        ensure_category(&state.db, category_id).await?;
    }

    // Optional text fields: absent keeps the value, blank clears it
    let text = |new: &Option<String>, old: &Option<String>| match new {
        Some(v) => non_empty(Some(v.clone())),
        None => old.clone(),
    };

    sqlx::query(
        r#"
        UPDATE products SET
            name = ?, code = ?, category_id = ?, price = ?, stock = ?,
            image_url = ?, description = ?, specifications = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(req.name.as_deref().map(str::trim).unwrap_or(&existing.name))
    .bind(req.code.as_deref().map(str::trim).unwrap_or(&existing.code))
    .bind(req.category_id.as_deref().unwrap_or(&existing.category_id))
    .bind(req.price.unwrap_or(existing.price))
    .bind(req.stock.unwrap_or(existing.stock))
    .bind(text(&req.image_url, &existing.image_url))
    .bind(text(&req.description, &existing.description))
    .bind(text(&req.specifications, &existing.specifications))
    .bind(now_rfc3339())
    .bind(&id)
    .execute(&state.db)
    .await?;

    let product = find_product(&state.db, &id).await?;

    audit_log(
        &state,
        AuditEntry {
            action: actions::PRODUCT_UPDATE,
            resource_type: resource_types::PRODUCT,
            resource_id: Some(&id),
            resource_name: Some(&product.product.name),
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: None,
        },
    )
    .await;

    Ok(Json(product))
}

/// DELETE /api/admin/products/:id
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let product: Product = sqlx::query_as("SELECT * FROM products WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Product not found"))?;

    let ordered: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rental_items WHERE product_id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;
    if ordered > 0 {
        return Err(ApiError::conflict(
            "Product appears in rental orders and cannot be deleted",
        ));
    }

    sqlx::query("DELETE FROM products WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    audit_log(
        &state,
        AuditEntry {
            action: actions::PRODUCT_DELETE,
            resource_type: resource_types::PRODUCT,
            resource_id: Some(&id),
            resource_name: Some(&product.name),
            user_id: Some(&user.id),
            ip_address: ip.as_deref(),
            details: None,
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
