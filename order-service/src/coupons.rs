use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::{CouponEvaluation, CouponRejection, OrderStatus};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::*;
use crate::schema::*;

async fn find_by_code(conn: &mut AsyncPgConnection, code: &str) -> Result<Coupon, EngineError> {
    coupons::table
        .filter(coupons::code.eq(code))
        .first::<Coupon>(conn)
        .await
        .optional()?
        .ok_or(EngineError::CouponRejected(CouponRejection::Unknown))
}

async fn buyer_redemptions(conn: &mut AsyncPgConnection, coupon_id: Uuid, buyer_id: Uuid) -> Result<i64, EngineError> {
    Ok(coupon_usages::table
        .filter(coupon_usages::coupon_id.eq(coupon_id))
        .filter(coupon_usages::user_id.eq(buyer_id))
        .count()
        .get_result::<i64>(conn)
        .await?)
}

// Orders still in PLACED carry a claim on the coupon that is not yet in
// `used_count` or `coupon_usages`.
async fn pending_claims(conn: &mut AsyncPgConnection, coupon_id: Uuid) -> Result<i64, EngineError> {
    Ok(orders::table
        .filter(orders::coupon_id.eq(coupon_id))
        .filter(orders::order_status.eq(OrderStatus::Placed.as_str()))
        .count()
        .get_result::<i64>(conn)
        .await?)
}

async fn buyer_pending_claims(conn: &mut AsyncPgConnection, coupon_id: Uuid, buyer_id: Uuid) -> Result<i64, EngineError> {
    Ok(orders::table
        .filter(orders::coupon_id.eq(coupon_id))
        .filter(orders::buyer_id.eq(buyer_id))
        .filter(orders::order_status.eq(OrderStatus::Placed.as_str()))
        .count()
        .get_result::<i64>(conn)
        .await?)
}

/// Checks `coupon` against its limits, counting redemptions and claims by
/// unconfirmed orders alike.
async fn check(
    conn: &mut AsyncPgConnection,
    coupon: &Coupon,
    buyer_id: Uuid,
    subtotal: &BigDecimal,
    now: DateTime<Utc>,
) -> Result<BigDecimal, EngineError> {
    let redemptions = buyer_redemptions(conn, coupon.id, buyer_id).await?
        + buyer_pending_claims(conn, coupon.id, buyer_id).await?;
    let pending = pending_claims(conn, coupon.id).await?;

    let mut terms = coupon.terms()?;
    terms.used_count = terms
        .used_count
        .saturating_add(i32::try_from(pending).unwrap_or(i32::MAX));
    Ok(terms.evaluate(subtotal, redemptions, now)?)
}

/// Resolves `code` to a coupon and the discount it grants on `subtotal`.
pub async fn evaluate(
    conn: &mut AsyncPgConnection,
    code: &str,
    buyer_id: Uuid,
    subtotal: &BigDecimal,
    now: DateTime<Utc>,
) -> Result<(Coupon, BigDecimal), EngineError> {
    let coupon = find_by_code(conn, code).await?;
    let discount = check(conn, &coupon, buyer_id, subtotal, now).await?;
    Ok((coupon, discount))
}

/// Re-checks the limits under the coupon row lock before an order takes a
/// claim on it, so concurrent checkouts cannot oversubscribe the coupon.
/// Must run before the order row referencing the coupon is inserted.
pub async fn claim(
    conn: &mut AsyncPgConnection,
    coupon_id: Uuid,
    buyer_id: Uuid,
    subtotal: &BigDecimal,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let coupon = lock(conn, coupon_id).await?;
    check(conn, &coupon, buyer_id, subtotal, now).await?;
    Ok(())
}

// FOR NO KEY UPDATE: orders referencing the coupon hold FOR KEY SHARE on it,
// which a plain FOR UPDATE would wait on.
async fn lock(conn: &mut AsyncPgConnection, coupon_id: Uuid) -> Result<Coupon, EngineError> {
    coupons::table
        .find(coupon_id)
        .for_no_key_update()
        .first::<Coupon>(conn)
        .await
        .optional()?
        .ok_or_else(|| EngineError::not_found(format!("coupon {coupon_id}")))
}

/// Same check as `evaluate`, answered as a preview instead of an error.
pub async fn validate(
    conn: &mut AsyncPgConnection,
    code: &str,
    buyer_id: Uuid,
    subtotal: &BigDecimal,
    now: DateTime<Utc>,
) -> Result<CouponEvaluation, EngineError> {
    match evaluate(conn, code, buyer_id, subtotal, now).await {
        Ok((_, discount)) => Ok(Ok(discount).into()),
        Err(EngineError::CouponRejected(rejection)) => Ok(Err(rejection).into()),
        Err(e) => Err(e),
    }
}

/// Records one redemption and bumps the counter under the coupon row lock.
/// A second redemption for the same order is rejected.
pub async fn record_usage(
    conn: &mut AsyncPgConnection,
    coupon_id: Uuid,
    buyer_id: Uuid,
    order_id: Uuid,
    discount_amount: &BigDecimal,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let coupon = lock(conn, coupon_id).await?;

    let inserted = diesel::insert_into(coupon_usages::table)
        .values(&CouponUsage {
            id: Uuid::new_v4(),
            coupon_id,
            user_id: buyer_id,
            order_id,
            discount_amount: discount_amount.clone(),
            created_at: now,
        })
        .on_conflict((coupon_usages::coupon_id, coupon_usages::order_id))
        .do_nothing()
        .execute(conn)
        .await?;

    if inserted == 0 {
        return Err(EngineError::DuplicateCouponUsage { coupon_id, order_id });
    }

    if coupon.usage_limit.is_some_and(|limit| coupon.used_count >= limit) {
        // Evaluated under the limit at checkout; the buyer already paid for this price.
        warn!(coupon = %coupon.code, used = coupon.used_count, "Coupon redeemed past its usage limit");
    }

    diesel::update(coupons::table.find(coupon_id))
        .set(coupons::used_count.eq(coupons::used_count + 1))
        .execute(conn)
        .await?;

    info!(coupon = %coupon.code, order_id = %order_id, discount = %discount_amount, "Recorded coupon usage");
    Ok(())
}
