//! Loyalty points: earning on paid orders, redemption at checkout, and
//! admin maintenance of member balances.

use sqlx::SqliteConnection;

use super::{ShopError, ShopResult};
use crate::db::{Member, RewardPolicy, UpdateRewardPolicyRequest};
use crate::utils::now_rfc3339;
use crate::DbPool;

/// Active policy, creating the default one if none exists
pub async fn get_policy(db: &DbPool) -> ShopResult<RewardPolicy> {
    let mut conn = db.acquire().await?;
    active_policy(&mut conn).await
}

pub(crate) async fn active_policy(conn: &mut SqliteConnection) -> ShopResult<RewardPolicy> {
    let policy: Option<RewardPolicy> = sqlx::query_as(
        "SELECT * FROM reward_policies WHERE is_active = 1 ORDER BY updated_at DESC LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(policy) = policy {
        return Ok(policy);
    }

    let now = now_rfc3339();
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO reward_policies (id, earning_rate, redemption_rate, min_redeem, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(&id)
    .bind(crate::db::seeders::DEFAULT_EARNING_RATE)
    .bind(crate::db::seeders::DEFAULT_REDEMPTION_RATE)
    .bind(crate::db::seeders::DEFAULT_MIN_REDEEM)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    Ok(sqlx::query_as("SELECT * FROM reward_policies WHERE id = ?")
        .bind(&id)
        .fetch_one(&mut *conn)
        .await?)
}

pub async fn update_policy(db: &DbPool, req: &UpdateRewardPolicyRequest) -> ShopResult<RewardPolicy> {
    if !(req.earning_rate > 0.0) || !req.earning_rate.is_finite() {
        return Err(ShopError::invalid("earning_rate", "Earning rate must be greater than 0"));
    }
    if req.redemption_rate <= 0 {
        return Err(ShopError::invalid(
            "redemption_rate",
            "Redemption rate must be greater than 0",
        ));
    }
    if req.min_redeem < 0 {
        return Err(ShopError::invalid("min_redeem", "Minimum redemption cannot be negative"));
    }

    let policy = get_policy(db).await?;
    sqlx::query(
        "UPDATE reward_policies SET earning_rate = ?, redemption_rate = ?, min_redeem = ?, updated_at = ? WHERE id = ?",
    )
    .bind(req.earning_rate)
    .bind(req.redemption_rate)
    .bind(req.min_redeem)
    .bind(now_rfc3339())
    .bind(&policy.id)
    .execute(db)
    .await?;

    tracing::info!(
        earning_rate = req.earning_rate,
        redemption_rate = req.redemption_rate,
        min_redeem = req.min_redeem,
        "Reward policy updated"
    );

    get_policy(db).await
}

/// Points earned for spending `amount` Rupiah: floor(amount / 1000 × earning_rate)
pub fn points_earned(policy: &RewardPolicy, amount: i64) -> i64 {
    if amount <= 0 {
        return 0;
    }
    ((amount as f64 / 1000.0) * policy.earning_rate).floor() as i64
}

/// Outcome of redeeming points against an order total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redemption {
    pub points_used: i64,
    pub discount: i64,
}

/// Work out how many of `requested` points are consumed against `total`.
///
/// The discount is `points × redemption_rate / 100`, capped at the total. When
/// capped, only the points needed to cover the total are consumed.
pub fn redeem(
    policy: &RewardPolicy,
    requested: i64,
    balance: i64,
    total: i64,
) -> ShopResult<Redemption> {
    if requested < policy.min_redeem {
        return Err(ShopError::invalid(
            "redeem_points",
            format!("At least {} points must be redeemed", policy.min_redeem),
        ));
    }
    if requested > balance {
        return Err(ShopError::invalid(
            "redeem_points",
            format!("Only {} points available", balance),
        ));
    }

    // Widened so large balances or rates cannot wrap
    let rate = i128::from(policy.redemption_rate);
    let discount = i128::from(requested) * rate / 100;
    if discount <= i128::from(total) {
        return Ok(Redemption {
            points_used: requested,
            discount: discount as i64,
        });
    }

    let total = total.max(0);
    let points_used = (i128::from(total) * 100 + rate - 1) / rate;
    Ok(Redemption {
        points_used: points_used.min(i128::from(requested)) as i64,
        discount: total,
    })
}

/// Credit the points an order earns, once. Returns the points credited.
pub(crate) async fn credit_order_points(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> ShopResult<i64> {
    let (customer_id, total, awarded): (String, i64, i64) = sqlx::query_as(
        "SELECT customer_id, total_amount, points_awarded FROM orders WHERE id = ?",
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ShopError::not_found("Order"))?;

    if awarded > 0 {
        return Ok(0);
    }

    let policy = active_policy(conn).await?;
    let earned = points_earned(&policy, total);
    if earned == 0 {
        return Ok(0);
    }

    sqlx::query("UPDATE orders SET points_awarded = ? WHERE id = ?")
        .bind(earned)
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE customers SET total_points = total_points + ?, updated_at = ? WHERE id = ?")
        .bind(earned)
        .bind(now_rfc3339())
        .bind(&customer_id)
        .execute(&mut *conn)
        .await?;

    tracing::info!(order_id = %order_id, customer_id = %customer_id, points = earned, "Loyalty points credited");
    Ok(earned)
}

pub async fn list_members(db: &DbPool) -> ShopResult<Vec<Member>> {
    Ok(sqlx::query_as(
        "SELECT id, name, email, whatsapp, total_points, is_active FROM customers ORDER BY total_points DESC, name ASC",
    )
    .fetch_all(db)
    .await?)
}

async fn member(db: &DbPool, customer_id: &str) -> ShopResult<Member> {
    sqlx::query_as("SELECT id, name, email, whatsapp, total_points, is_active FROM customers WHERE id = ?")
        .bind(customer_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ShopError::not_found("Member"))
}

pub async fn set_member_points(db: &DbPool, customer_id: &str, points: i64) -> ShopResult<Member> {
    if points < 0 {
        return Err(ShopError::invalid("points", "Points cannot be negative"));
    }
    let result = sqlx::query("UPDATE customers SET total_points = ?, updated_at = ? WHERE id = ?")
        .bind(points)
        .bind(now_rfc3339())
        .bind(customer_id)
        .execute(db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ShopError::not_found("Member"));
    }
    member(db, customer_id).await
}

/// Add (or with a negative delta, remove) points. The balance never goes below zero.
pub async fn adjust_member_points(db: &DbPool, customer_id: &str, delta: i64) -> ShopResult<Member> {
    let current = member(db, customer_id).await?;
    if current.total_points + delta < 0 {
        return Err(ShopError::invalid(
            "delta",
            format!("Member only has {} points", current.total_points),
        ));
    }
    sqlx::query("UPDATE customers SET total_points = total_points + ?, updated_at = ? WHERE id = ?")
        .bind(delta)
        .bind(now_rfc3339())
        .bind(customer_id)
        .execute(db)
        .await?;
    member(db, customer_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::*;

    fn policy(earning_rate: f64, redemption_rate: i64, min_redeem: i64) -> RewardPolicy {
        RewardPolicy {
            id: "p".into(),
            earning_rate,
            redemption_rate,
            min_redeem,
            is_active: true,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_points_earned_floors() {
        let p = policy(1.0, 10_000, 500);
        assert_eq!(points_earned(&p, 150_000), 150);
        assert_eq!(points_earned(&p, 1_999), 1);
        assert_eq!(points_earned(&p, 999), 0);
        assert_eq!(points_earned(&policy(0.5, 10_000, 500), 15_000), 7);
        assert_eq!(points_earned(&p, -5), 0);
    }

    #[test]
    fn test_redeem_within_total() {
        let p = policy(1.0, 10_000, 500);
        // 500 points × Rp 10.000 / 100 = Rp 50.000
        let r = redeem(&p, 500, 800, 200_000).unwrap();
        assert_eq!(r, Redemption { points_used: 500, discount: 50_000 });
    }

    #[test]
    fn test_redeem_caps_at_total_and_keeps_excess_points() {
        let p = policy(1.0, 10_000, 500);
        // 1000 points would be worth Rp 100.000 but the order is Rp 45.500
        let r = redeem(&p, 1_000, 1_000, 45_500).unwrap();
        assert_eq!(r.discount, 45_500);
        assert_eq!(r.points_used, 455);
    }

    #[test]
    fn test_redeem_huge_balance_caps_without_wrapping() {
        let p = policy(1.0, 10_000, 500);
        let r = redeem(&p, i64::MAX, i64::MAX, 150_000).unwrap();
        assert_eq!(r.discount, 150_000);
        assert_eq!(r.points_used, 1_500);
    }

    #[test]
    fn test_redeem_rejects_below_minimum_and_over_balance() {
        let p = policy(1.0, 10_000, 500);
        assert!(matches!(
            redeem(&p, 499, 1_000, 100_000),
            Err(ShopError::Validation { .. })
        ));
        assert!(matches!(
            redeem(&p, 600, 550, 100_000),
            Err(ShopError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_policy_update_validates_and_persists() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let default = get_policy(&pool).await.unwrap();
        assert_eq!(default.redemption_rate, 10_000);
        assert_eq!(default.min_redeem, 500);

        let bad = UpdateRewardPolicyRequest {
            earning_rate: 0.0,
            redemption_rate: 10_000,
            min_redeem: 0,
        };
        assert!(update_policy(&pool, &bad).await.is_err());

        let updated = update_policy(
            &pool,
            &UpdateRewardPolicyRequest {
                earning_rate: 2.5,
                redemption_rate: 5_000,
                min_redeem: 100,
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.id, default.id);
        assert_eq!(updated.earning_rate, 2.5);
        assert_eq!(updated.min_redeem, 100);
    }

    #[tokio::test]
    async fn test_member_points_set_and_adjust() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let a = seed_customer(&pool, "Ani", "+62811", 10).await;
        let b = seed_customer(&pool, "Budi", "+62812", 300).await;

        let members = list_members(&pool).await.unwrap();
        assert_eq!(members[0].id, b);

        assert_eq!(set_member_points(&pool, &a, 1_000).await.unwrap().total_points, 1_000);
        assert!(set_member_points(&pool, &a, -1).await.is_err());
        assert!(matches!(
            set_member_points(&pool, "missing", 5).await,
            Err(ShopError::NotFound(_))
        ));

        assert_eq!(adjust_member_points(&pool, &b, -100).await.unwrap().total_points, 200);
        assert!(adjust_member_points(&pool, &b, -201).await.is_err());
        assert_eq!(customer_points(&pool, &b).await, 200);
    }
}
