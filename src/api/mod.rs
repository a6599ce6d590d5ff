pub mod audit;
pub mod auth;
mod cart;
mod catalog;
mod contact;
pub mod error;
mod inventory;
mod loyalty;
pub mod metrics;
mod orders;
mod profile;
mod push;
pub mod rate_limit;
mod reports;
pub mod validation;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::startup::get_system_health;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Credential endpoints get the strict tier
    let auth_limited = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/forgot-password", post(auth::forgot_password))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    let auth_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/session", get(auth::session))
        .merge(auth_limited);

    // Storefront: public reads plus customer-only routes guarded by extractors
    let shop_routes = Router::new()
        .route("/categories", get(catalog::list_categories))
        .route("/products", get(catalog::list_products))
        .route("/products/:id", get(catalog::get_product))
        .route("/contact", post(contact::submit))
        .route("/push/public-key", get(push::public_key))
        .route("/push/subscribe", post(push::subscribe))
        .route("/push/unsubscribe", post(push::unsubscribe))
        // Cart
        .route(
            "/cart",
            get(cart::get_cart).post(cart::add_item).delete(cart::clear_cart),
        )
        .route("/cart/quantity", put(cart::update_quantity))
        .route("/cart/items/:id", delete(cart::remove_item))
        .route("/cart/sync", post(cart::sync_cart))
        .route("/cart/checkout", post(cart::checkout_cart))
        .route("/checkout", post(cart::place_order))
        // Wishlist
        .route("/wishlist", get(cart::list_wishlist))
        .route("/wishlist/:product_id", post(cart::toggle_wishlist))
        // Profile
        .route("/profile", get(profile::get_profile).put(profile::update_profile))
        .route("/profile/password", post(profile::change_password))
        .route("/profile/orders", get(profile::list_orders));

    // Back office: every handler takes StaffUser or AdminUser
    let admin_routes = Router::new()
        // Catalog
        .route(
            "/categories",
            get(catalog::list_categories).post(catalog::create_category),
        )
        .route("/categories/:id", delete(catalog::delete_category))
        .route(
            "/products",
            get(catalog::list_products).post(catalog::create_product),
        )
        .route("/products/options", get(catalog::list_product_options))
        .route(
            "/products/:id",
            put(catalog::update_product).delete(catalog::delete_product),
        )
        // Inventory
        .route(
            "/inventory",
            get(inventory::list_units).post(inventory::save_unit),
        )
        .route("/inventory/summary", get(inventory::summary))
        .route("/inventory/:id", delete(inventory::delete_unit))
        // Orders
        .route("/orders", get(orders::list_orders))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/status", put(orders::update_order_status))
        .route("/rentals/:id/status", put(orders::update_rental_status))
        .route("/prints/:id/status", put(orders::update_print_status))
        .route("/monitoring", get(orders::monitoring))
        // Loyalty
        .route("/members", get(loyalty::list_members))
        .route(
            "/members/:id/points",
            put(loyalty::set_points).post(loyalty::adjust_points),
        )
        .route(
            "/reward-policy",
            get(loyalty::get_policy).put(loyalty::update_policy),
        )
        // Notifications
        .route("/notifications", post(push::notify_customer))
        .route("/push/send", post(push::broadcast))
        // Reports
        .route("/reports/summary", get(reports::summary))
        .route("/reports/finance", get(reports::finance_report))
        .route("/reports/dashboard", get(reports::dashboard))
        // Inbox, audit and staff accounts
        .route("/contact", get(contact::list_messages))
        .route("/contact/:id", delete(contact::delete_message))
        .route("/audit", get(audit::list_logs))
        .route("/users", get(auth::list_users).post(auth::save_user));

    let api_routes = Router::new()
        .merge(shop_routes)
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes);

    // Storefront bundle with SPA fallback
    if let Some(static_dir) = state.config.server.static_dir.clone() {
        let index_file = static_dir.join("index.html");
        router = router.fallback_service(
            ServeDir::new(&static_dir).not_found_service(ServeFile::new(index_file)),
        );
    }

    router
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = get_system_health(&state.config, &state.db, state.push.is_enabled()).await;
    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::testing::{seed_category, seed_customer, seed_product};
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_app() -> (Router, Arc<AppState>) {
        let db = crate::db::init_in_memory().await.unwrap();
        let mut config = Config::default();
        config.rate_limit.enabled = false;
        let state = Arc::new(AppState::new(config, db));
        (create_router(state.clone()), state)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn register_customer(app: &Router) -> String {
        let (status, body) = send(
            app,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({
                    "name": "Siti Aminah",
                    "whatsapp": "081234567890",
                    "password": "rahasia123",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["token"].as_str().unwrap().to_string()
    }

    async fn staff_token(app: &Router, state: &AppState, role: crate::db::Role) -> String {
        let username = format!("staff-{}", role);
        crate::db::upsert_staff_user(&state.db, &username, "Staff Member", "staff-pass-1", role)
            .await
            .unwrap();
        let (status, body) = send(
            app,
            json_request(
                "POST",
                "/api/auth/login",
                None,
                json!({ "identifier": username, "password": "staff-pass-1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_reports_database() {
        let (app, _) = test_app().await;
        let (status, body) = send(&app, get_request("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database_healthy"], true);
        assert_eq!(body["push_enabled"], false);
    }

    #[tokio::test]
    async fn test_catalog_is_public() {
        let (app, state) = test_app().await;
        let category = seed_category(&state.db, "Kamera").await;
        seed_product(&state.db, &category, "Sony A7 III", 250_000).await;

        let (status, body) = send(&app, get_request("/api/products?category=kamera", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(&app, get_request("/api/categories", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["product_count"], 1);
    }

    #[tokio::test]
    async fn test_customer_routes_require_session() {
        let (app, _) = test_app().await;
        let (status, body) = send(&app, get_request("/api/cart", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");
    }

    #[tokio::test]
    async fn test_admin_routes_reject_customers() {
        let (app, _) = test_app().await;
        let token = register_customer(&app).await;
        let (status, _) = send(&app, get_request("/api/admin/orders", Some(&token))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_reward_policy_is_admin_only() {
        let (app, state) = test_app().await;
        let staff = staff_token(&app, &state, crate::db::Role::Staff).await;
        let (status, _) = send(&app, get_request("/api/admin/reward-policy", Some(&staff))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = staff_token(&app, &state, crate::db::Role::Admin).await;
        let (status, body) =
            send(&app, get_request("/api/admin/reward-policy", Some(&admin))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["min_redeem"], 500);
    }

    #[tokio::test]
    async fn test_cart_checkout_flow() {
        let (app, state) = test_app().await;
        let category = seed_category(&state.db, "Kamera").await;
        let product = seed_product(&state.db, &category, "Canon EOS R", 200_000).await;
        let token = register_customer(&app).await;

        for _ in 0..2 {
            let (status, _) = send(
                &app,
                json_request(
                    "POST",
                    "/api/cart",
                    Some(&token),
                    json!({ "product_id": product, "quantity": 1 }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (_, cart) = send(&app, get_request("/api/cart", Some(&token))).await;
        assert_eq!(cart["items"].as_array().unwrap().len(), 1);
        assert_eq!(cart["subtotal"], 400_000);

        let (status, order) = send(
            &app,
            json_request(
                "POST",
                "/api/cart/checkout",
                Some(&token),
                json!({
                    "sender_name": "Siti",
                    "proof_image": "uploads/proof.jpg",
                    "payment_method": "transfer",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", order);
        assert_eq!(order["status"], "pending");
        assert!(order["rental_invoice"].as_str().unwrap().starts_with("RENT-"));

        let (_, cart) = send(&app, get_request("/api/cart", Some(&token))).await;
        assert_eq!(cart["items"].as_array().unwrap().len(), 0);

        let (status, orders) = send(&app, get_request("/api/profile/orders", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(orders.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wishlist_toggles() {
        let (app, state) = test_app().await;
        let category = seed_category(&state.db, "Kamera").await;
        let product = seed_product(&state.db, &category, "Tripod", 50_000).await;
        let token = register_customer(&app).await;
        let uri = format!("/api/wishlist/{}", product);

        let (_, body) = send(&app, json_request("POST", &uri, Some(&token), json!({}))).await;
        assert_eq!(body["is_wishlisted"], true);
        let (_, list) = send(&app, get_request("/api/wishlist", Some(&token))).await;
        assert_eq!(list[0]["product_name"], "Tripod");

        let (_, body) = send(&app, json_request("POST", &uri, Some(&token), json!({}))).await;
        assert_eq!(body["is_wishlisted"], false);
    }

    #[tokio::test]
    async fn test_contact_defaults_subject() {
        let (app, state) = test_app().await;
        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/contact",
                None,
                json!({ "name": "Andi", "email": "andi@example.com", "message": "Buka hari Minggu?" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["subject"], "No subject");

        let (status, body) = send(
            &app,
            json_request("POST", "/api/contact", None, json!({ "name": "Andi" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["details"]["email"].is_array());

        let staff = staff_token(&app, &state, crate::db::Role::Staff).await;
        let (_, inbox) = send(&app, get_request("/api/admin/contact", Some(&staff))).await;
        assert_eq!(inbox.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_profile_update_rejects_taken_phone() {
        let (app, state) = test_app().await;
        seed_customer(&state.db, "Budi", "+628111111111", 0).await;
        let token = register_customer(&app).await;

        let (status, _) = send(
            &app,
            json_request(
                "PUT",
                "/api/profile",
                Some(&token),
                json!({ "name": "Siti Aminah", "phone": "08111111111" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(
            &app,
            json_request(
                "PUT",
                "/api/profile",
                Some(&token),
                json!({ "name": "Siti A.", "phone": "081299998888", "email": "" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["whatsapp"], "+6281299998888");
        assert!(body["email"].is_null());
    }

    #[tokio::test]
    async fn test_inventory_save_and_duplicate_code() {
        let (app, state) = test_app().await;
        let category = seed_category(&state.db, "Kamera").await;
        let product = seed_product(&state.db, &category, "Sony A7 III", 250_000).await;
        let staff = staff_token(&app, &state, crate::db::Role::Staff).await;

        let unit = json!({ "unit_code": "CAM-001", "product_id": product, "last_service": "" });
        let (status, body) =
            send(&app, json_request("POST", "/api/admin/inventory", Some(&staff), unit.clone())).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert!(body["last_service"].is_null());
        assert_eq!(body["product_name"], "Sony A7 III");

        let (status, _) =
            send(&app, json_request("POST", "/api/admin/inventory", Some(&staff), unit)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, summary) = send(&app, get_request("/api/admin/inventory/summary", Some(&staff))).await;
        assert_eq!(summary["total"], 1);
        assert_eq!(summary["available"], 1);
    }

    #[tokio::test]
    async fn test_push_public_key_unavailable_when_disabled() {
        let (app, _) = test_app().await;
        let (status, _) = send(&app, get_request("/api/push/public-key", None)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_notify_customer_without_subscriptions() {
        let (app, state) = test_app().await;
        let customer = seed_customer(&state.db, "Budi", "+628111111111", 0).await;
        let staff = staff_token(&app, &state, crate::db::Role::Staff).await;

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/admin/notifications",
                Some(&staff),
                json!({ "type": "thank_you", "customer_id": customer }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["message"], "customer has not enabled notifications");
    }

    #[tokio::test]
    async fn test_broadcast_rejects_oversized_message() {
        let (app, state) = test_app().await;
        let staff = staff_token(&app, &state, crate::db::Role::Staff).await;

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/admin/push/send",
                Some(&staff),
                json!({ "title": "Stock opname", "message": "x".repeat(5_000) }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(body["error"]["code"], "validation_error");
        assert!(body["error"]["details"]["message"].is_array());
    }

    #[tokio::test]
    async fn test_subscribe_then_unsubscribe() {
        let (app, state) = test_app().await;
        let token = register_customer(&app).await;
        let endpoint = "https://push.example.com/send/abc";

        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/api/push/subscribe",
                Some(&token),
                json!({ "endpoint": endpoint, "keys": { "p256dh": "BPk", "auth": "c2VjcmV0" } }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let owner: Option<String> =
            sqlx::query_scalar("SELECT customer_id FROM push_subscriptions WHERE endpoint = ?")
                .bind(endpoint)
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert!(owner.is_some());

        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/api/push/unsubscribe",
                Some(&token),
                json!({ "endpoint": endpoint }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}
