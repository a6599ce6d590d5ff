//! Order creation.
//!
//! A checkout produces one master order plus, depending on the products,
//! one rental sub-order carrying every rental line and one print sub-order
//! per print line. Everything is written in a single transaction.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use metrics::counter;
use sqlx::{FromRow, SqliteConnection};

use super::{cart, check_quantity, line_amount, loyalty, sum_amounts, ShopError, ShopResult};
use crate::config::CheckoutConfig;
use crate::db::{CartCheckoutRequest, CheckoutItem, CheckoutRequest, CheckoutResponse, OrderStatus};
use crate::utils::{non_empty, now_rfc3339, random_code, to_rfc3339};
use crate::DbPool;

pub const ORDERS_CREATED_TOTAL: &str = "oxistore_orders_created_total";

/// File reference stored for print jobs whose file has not been uploaded yet
pub const PENDING_UPLOAD: &str = "pending-upload";

#[derive(Debug, FromRow)]
struct PricedProduct {
    id: String,
    name: String,
    price: i64,
    category_name: String,
}

#[derive(Debug)]
struct Line<'a> {
    item: &'a CheckoutItem,
    product: PricedProduct,
}

impl Line<'_> {
    fn total(&self) -> ShopResult<i64> {
        line_amount(self.product.price, self.item.quantity)
    }
}

/// `RENT-20261015-7QX2KD`
pub fn invoice_code(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}-{}", prefix, at.format("%Y%m%d"), random_code(6))
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DD`; a bare date resolves to `time_of_day` UTC.
pub(crate) fn parse_when(value: &str, time_of_day: NaiveTime) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(time_of_day).and_utc())
}

fn start_of_day() -> NaiveTime {
    NaiveTime::MIN
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

fn parse_item_date(value: &Option<String>, field: &str, time_of_day: NaiveTime) -> ShopResult<Option<DateTime<Utc>>> {
    match non_empty(value.clone()) {
        None => Ok(None),
        Some(v) => parse_when(&v, time_of_day)
            .map(Some)
            .ok_or_else(|| ShopError::invalid(field, format!("Invalid date: {}", v))),
    }
}

/// Checkout fields shared by both entry points
struct Payment<'a> {
    sender_name: &'a str,
    proof_image: &'a str,
    payment_method: &'a str,
    redeem_points: Option<i64>,
}

fn validate_payment(payment: &Payment<'_>) -> ShopResult<()> {
    if payment.sender_name.trim().is_empty() {
        return Err(ShopError::invalid("sender_name", "Sender name is required"));
    }
    if payment.proof_image.trim().is_empty() {
        return Err(ShopError::invalid("proof_image", "Proof of payment is required"));
    }
    if payment.payment_method.trim().is_empty() {
        return Err(ShopError::invalid("payment_method", "Payment method is required"));
    }
    Ok(())
}

pub async fn place_order(
    db: &DbPool,
    config: &CheckoutConfig,
    customer_id: &str,
    req: &CheckoutRequest,
) -> ShopResult<CheckoutResponse> {
    let payment = Payment {
        sender_name: &req.sender_name,
        proof_image: &req.proof_image,
        payment_method: &req.payment_method,
        redeem_points: req.redeem_points,
    };
    validate_payment(&payment)?;

    let mut tx = db.begin().await?;
    let response = create_order(&mut tx, config, customer_id, &payment, &req.items).await?;
    tx.commit().await?;

    counter!(ORDERS_CREATED_TOTAL).increment(1);
    Ok(response)
}

/// Check out whatever is in the customer's cart, emptying it on success
pub async fn checkout_cart(
    db: &DbPool,
    config: &CheckoutConfig,
    customer_id: &str,
    req: &CartCheckoutRequest,
) -> ShopResult<CheckoutResponse> {
    let payment = Payment {
        sender_name: &req.sender_name,
        proof_image: &req.proof_image,
        payment_method: &req.payment_method,
        redeem_points: req.redeem_points,
    };
    validate_payment(&payment)?;

    let mut tx = db.begin().await?;
    let cart = cart::cart_for(&mut tx, customer_id).await?;
    let items: Vec<CheckoutItem> = cart::cart_items(&mut tx, &cart.id)
        .await?
        .into_iter()
        .map(|line| CheckoutItem {
            product_id: line.item.product_id,
            quantity: line.item.quantity,
            file_url: line.item.file_url,
            start_date: line.item.start_date,
            end_date: line.item.end_date,
            notes: line.item.notes,
        })
        .collect();

    let response = create_order(&mut tx, config, customer_id, &payment, &items).await?;

    sqlx::query("DELETE FROM cart_items WHERE cart_id = ?")
        .bind(&cart.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    counter!(ORDERS_CREATED_TOTAL).increment(1);
    Ok(response)
}

async fn create_order(
    conn: &mut SqliteConnection,
    config: &CheckoutConfig,
    customer_id: &str,
    payment: &Payment<'_>,
    items: &[CheckoutItem],
) -> ShopResult<CheckoutResponse> {
    if items.is_empty() {
        return Err(ShopError::invalid("items", "Cart is empty"));
    }

    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        check_quantity(item.quantity)?;
        let product: PricedProduct = sqlx::query_as(
            r#"
            SELECT p.id, p.name, p.price, c.name AS category_name
            FROM products p JOIN categories c ON c.id = p.category_id
            WHERE p.id = ?
            "#,
        )
        .bind(&item.product_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ShopError::invalid("items", format!("Unknown product: {}", item.product_id)))?;
        lines.push(Line { item, product });
    }

    let keyword = config.print_keyword.to_lowercase();
    let (print_lines, rental_lines): (Vec<Line>, Vec<Line>) = lines
        .into_iter()
        .partition(|line| line.product.category_name.to_lowercase().contains(&keyword));

    let gross = sum_amounts(print_lines.iter().chain(rental_lines.iter()).map(Line::total))?;

    let balance: i64 = sqlx::query_scalar("SELECT total_points FROM customers WHERE id = ?")
        .bind(customer_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ShopError::not_found("Customer"))?;

    let redemption = match payment.redeem_points {
        Some(points) if points > 0 => {
            let policy = loyalty::active_policy(conn).await?;
            Some(loyalty::redeem(&policy, points, balance, gross)?)
        }
        _ => None,
    };
    let (points_redeemed, discount) = redemption
        .map(|r| (r.points_used, r.discount))
        .unwrap_or((0, 0));
    let total = gross - discount;

    let status = if payment.proof_image == config.instant_payment_marker {
        OrderStatus::Paid
    } else {
        OrderStatus::Pending
    };

    let now = Utc::now();
    let now_str = to_rfc3339(now);
    let order_id = uuid::Uuid::new_v4().to_string();

    sqlx::query(
        r#"
        INSERT INTO orders (id, customer_id, total_amount, discount_amount, points_redeemed, points_awarded,
                            sender_name, proof_image, payment_method, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&order_id)
    .bind(customer_id)
    .bind(total)
    .bind(discount)
    .bind(points_redeemed)
    .bind(payment.sender_name.trim())
    .bind(payment.proof_image)
    .bind(payment.payment_method.trim())
    .bind(status.as_str())
    .bind(&now_str)
    .bind(&now_str)
    .execute(&mut *conn)
    .await?;

    let rental_invoice = if rental_lines.is_empty() {
        None
    } else {
        Some(create_rental(conn, config, customer_id, &order_id, &rental_lines, now).await?)
    };

    let mut print_invoices = Vec::with_capacity(print_lines.len());
    for line in &print_lines {
        let invoice = invoice_code("PRT", now);
        let file_url = non_empty(line.item.file_url.clone()).unwrap_or_else(|| PENDING_UPLOAD.to_string());
        sqlx::query(
            r#"
            INSERT INTO print_orders (id, invoice_code, customer_id, order_id, file_url, service_type,
                                      page_count, copies, total_price, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, 'pending', ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&invoice)
        .bind(customer_id)
        .bind(&order_id)
        .bind(&file_url)
        .bind(&line.product.name)
        .bind(line.item.quantity)
        .bind(line.total()?)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&mut *conn)
        .await?;
        print_invoices.push(invoice);
    }

    if points_redeemed > 0 {
        let result = sqlx::query(
            "UPDATE customers SET total_points = total_points - ?, updated_at = ? WHERE id = ? AND total_points >= ?",
        )
        .bind(points_redeemed)
        .bind(now_rfc3339())
        .bind(customer_id)
        .bind(points_redeemed)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ShopError::Conflict("Point balance changed, please retry".to_string()));
        }
    }

    let points_awarded = if status.is_paid() {
        loyalty::credit_order_points(conn, &order_id).await?
    } else {
        0
    };

    tracing::info!(
        order_id = %order_id,
        customer_id = %customer_id,
        total = total,
        discount = discount,
        rental_lines = rental_lines.len(),
        print_lines = print_lines.len(),
        status = %status,
        "Order created"
    );

    Ok(CheckoutResponse {
        order_id,
        status: status.to_string(),
        total_amount: total,
        discount_amount: discount,
        points_redeemed,
        points_awarded,
        rental_invoice,
        print_invoices,
    })
}

async fn create_rental(
    conn: &mut SqliteConnection,
    config: &CheckoutConfig,
    customer_id: &str,
    order_id: &str,
    lines: &[Line<'_>],
    now: DateTime<Utc>,
) -> ShopResult<String> {
    let mut start: Option<DateTime<Utc>> = None;
    let mut due: Option<DateTime<Utc>> = None;
    for line in lines {
        if let Some(s) = parse_item_date(&line.item.start_date, "start_date", start_of_day())? {
            start = Some(start.map_or(s, |cur| cur.min(s)));
        }
        if let Some(e) = parse_item_date(&line.item.end_date, "end_date", end_of_day())? {
            due = Some(due.map_or(e, |cur| cur.max(e)));
        }
    }
    let start = start.unwrap_or(now);
    let due = due.unwrap_or_else(|| start + Duration::days(config.default_rental_days.max(1)));
    if due < start {
        return Err(ShopError::invalid("end_date", "Return date is before the start date"));
    }

    let rental_id = uuid::Uuid::new_v4().to_string();
    let invoice = invoice_code("RENT", now);
    let total = sum_amounts(lines.iter().map(Line::total))?;
    let now_str = to_rfc3339(now);

    sqlx::query(
        r#"
        INSERT INTO rental_orders (id, invoice_code, customer_id, order_id, start_date, due_date,
                                   total_price, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(&rental_id)
    .bind(&invoice)
    .bind(customer_id)
    .bind(order_id)
    .bind(to_rfc3339(start))
    .bind(to_rfc3339(due))
    .bind(total)
    .bind(&now_str)
    .bind(&now_str)
    .execute(&mut *conn)
    .await?;

    for line in lines {
        sqlx::query(
            "INSERT INTO rental_items (id, rental_order_id, product_id, quantity, price_at_rental) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&rental_id)
        .bind(&line.product.id)
        .bind(line.item.quantity)
        .bind(line.product.price)
        .execute(&mut *conn)
        .await?;
    }

    Ok(invoice)
}
