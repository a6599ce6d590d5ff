//! Shop business rules: cart merging, checkout, order lifecycle, loyalty
//! points, finance reports and the background rental monitor.

pub mod cart;
pub mod checkout;
pub mod finance;
pub mod loyalty;
pub mod orders;
mod rental_monitor;

pub use rental_monitor::*;

use thiserror::Error;

/// Failure of a shop operation, mapped onto an API error at the HTTP edge
#[derive(Debug, Error)]
pub enum ShopError {
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("customer has not enabled notifications")]
    NoSubscriptions,

    #[error("push notifications are not configured")]
    PushDisabled,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ShopError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

pub type ShopResult<T> = Result<T, ShopError>;

/// Largest quantity accepted on a single cart or order line
pub const MAX_QUANTITY: i64 = 10_000;

pub(crate) fn check_quantity(quantity: i64) -> ShopResult<()> {
    if quantity < 1 {
        return Err(ShopError::invalid("quantity", "Quantity must be at least 1"));
    }
    if quantity > MAX_QUANTITY {
        return Err(ShopError::invalid(
            "quantity",
            format!("Quantity cannot exceed {}", MAX_QUANTITY),
        ));
    }
    Ok(())
}

/// `price × quantity`, refusing amounts that do not fit in an `i64`
pub(crate) fn line_amount(price: i64, quantity: i64) -> ShopResult<i64> {
    price
        .checked_mul(quantity)
        .ok_or_else(|| ShopError::invalid("quantity", "Order total is too large"))
}

pub(crate) fn sum_amounts(amounts: impl IntoIterator<Item = ShopResult<i64>>) -> ShopResult<i64> {
    amounts.into_iter().try_fold(0i64, |acc, amount| {
        acc.checked_add(amount?)
            .ok_or_else(|| ShopError::invalid("quantity", "Order total is too large"))
    })
}
