use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::ReservationStatus;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;
use crate::inventory;
use crate::models::*;
use crate::schema::*;
use crate::DbPool;

// Lock order inside a transaction is order row, then reservation rows, then
// inventory rows. Callers holding an order lock call these after taking it.

/// Carves `quantity` out of available stock and records an active hold.
pub async fn create(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    product_id: Uuid,
    quantity: &BigDecimal,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<StockReservation, EngineError> {
    inventory::reserve(conn, product_id, quantity, now).await?;

    let reservation = diesel::insert_into(stock_reservations::table)
        .values(&NewStockReservation {
            id: Uuid::new_v4(),
            order_id,
            product_id,
            reserved_quantity: quantity.clone(),
            status: ReservationStatus::Active.to_string(),
            expires_at,
        })
        .get_result::<StockReservation>(conn)
        .await?;

    debug!(reservation_id = %reservation.id, order_id = %order_id, product_id = %product_id, quantity = %quantity, "Reserved stock");
    Ok(reservation)
}

pub async fn lock(conn: &mut AsyncPgConnection, reservation_id: Uuid) -> Result<StockReservation, EngineError> {
    stock_reservations::table
        .find(reservation_id)
        .for_update()
        .first::<StockReservation>(conn)
        .await
        .optional()?
        .ok_or_else(|| EngineError::not_found(format!("reservation {reservation_id}")))
}

/// Every reservation of an order, locked, in product order.
pub async fn lock_for_order(conn: &mut AsyncPgConnection, order_id: Uuid) -> Result<Vec<StockReservation>, EngineError> {
    Ok(stock_reservations::table
        .filter(stock_reservations::order_id.eq(order_id))
        .order((stock_reservations::product_id.asc(), stock_reservations::id.asc()))
        .for_update()
        .load::<StockReservation>(conn)
        .await?)
}

/// Moves an active reservation to `target` and settles the ledger. Returns
/// false when the reservation was no longer active, so repeats are no-ops.
async fn settle(
    conn: &mut AsyncPgConnection,
    reservation: &StockReservation,
    target: ReservationStatus,
    now: DateTime<Utc>,
) -> Result<bool, EngineError> {
    let Some(next) = reservation.status()?.settle(target) else {
        return Ok(false);
    };

    let updated = diesel::update(
        stock_reservations::table
            .find(reservation.id)
            .filter(stock_reservations::status.eq(ReservationStatus::Active.as_str())),
    )
    .set((
        stock_reservations::status.eq(next.as_str()),
        stock_reservations::updated_at.eq(now),
    ))
    .execute(conn)
    .await?;

    if updated == 0 {
        return Ok(false);
    }

    match next {
        ReservationStatus::Released => {
            inventory::release(conn, reservation.product_id, &reservation.reserved_quantity, now).await?;
        }
        ReservationStatus::Consumed => {
            inventory::consume(conn, reservation.product_id, &reservation.reserved_quantity, now).await?;
        }
        ReservationStatus::Active => return Ok(false),
    }

    debug!(reservation_id = %reservation.id, status = %next, "Settled reservation");
    Ok(true)
}

pub async fn release(conn: &mut AsyncPgConnection, reservation_id: Uuid, now: DateTime<Utc>) -> Result<bool, EngineError> {
    let reservation = lock(conn, reservation_id).await?;
    settle(conn, &reservation, ReservationStatus::Released, now).await
}

pub async fn consume(conn: &mut AsyncPgConnection, reservation_id: Uuid, now: DateTime<Utc>) -> Result<bool, EngineError> {
    let reservation = lock(conn, reservation_id).await?;
    settle(conn, &reservation, ReservationStatus::Consumed, now).await
}

/// Releases the reservation only if it is still active and past its expiry
/// at `now`; an extension that landed first wins.
pub async fn release_if_expired(
    conn: &mut AsyncPgConnection,
    reservation_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, EngineError> {
    let reservation = lock(conn, reservation_id).await?;
    if reservation.expires_at >= now {
        return Ok(false);
    }
    settle(conn, &reservation, ReservationStatus::Released, now).await
}

/// Pushes expiry forward; never shortens it and never revives a settled hold.
pub async fn extend(
    conn: &mut AsyncPgConnection,
    reservation_id: Uuid,
    until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool, EngineError> {
    let updated = diesel::update(
        stock_reservations::table
            .find(reservation_id)
            .filter(stock_reservations::status.eq(ReservationStatus::Active.as_str()))
            .filter(stock_reservations::expires_at.lt(until)),
    )
    .set((
        stock_reservations::expires_at.eq(until),
        stock_reservations::updated_at.eq(now),
    ))
    .execute(conn)
    .await?;
    Ok(updated > 0)
}

pub async fn release_for_order(conn: &mut AsyncPgConnection, order_id: Uuid, now: DateTime<Utc>) -> Result<usize, EngineError> {
    let mut released = 0;
    for reservation in lock_for_order(conn, order_id).await? {
        if settle(conn, &reservation, ReservationStatus::Released, now).await? {
            released += 1;
        }
    }
    Ok(released)
}

pub async fn consume_for_order(conn: &mut AsyncPgConnection, order_id: Uuid, now: DateTime<Utc>) -> Result<usize, EngineError> {
    let mut consumed = 0;
    for reservation in lock_for_order(conn, order_id).await? {
        if settle(conn, &reservation, ReservationStatus::Consumed, now).await? {
            consumed += 1;
        }
    }
    Ok(consumed)
}

pub async fn extend_for_order(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<usize, EngineError> {
    let updated = diesel::update(
        stock_reservations::table
            .filter(stock_reservations::order_id.eq(order_id))
            .filter(stock_reservations::status.eq(ReservationStatus::Active.as_str()))
            .filter(stock_reservations::expires_at.lt(until)),
    )
    .set((
        stock_reservations::expires_at.eq(until),
        stock_reservations::updated_at.eq(now),
    ))
    .execute(conn)
    .await?;
    Ok(updated)
}

pub async fn for_order(conn: &mut AsyncPgConnection, order_id: Uuid) -> Result<Vec<StockReservation>, EngineError> {
    Ok(stock_reservations::table
        .filter(stock_reservations::order_id.eq(order_id))
        .order(stock_reservations::product_id.asc())
        .load::<StockReservation>(conn)
        .await?)
}

/// Active reservations whose expiry is before `now`, oldest first.
pub async fn expired(conn: &mut AsyncPgConnection, now: DateTime<Utc>, limit: i64) -> Result<Vec<StockReservation>, EngineError> {
    Ok(stock_reservations::table
        .filter(stock_reservations::status.eq(ReservationStatus::Active.as_str()))
        .filter(stock_reservations::expires_at.lt(now))
        .order(stock_reservations::expires_at.asc())
        .limit(limit)
        .load::<StockReservation>(conn)
        .await?)
}

/// Sum of active holds on a product; equals the ledger's reserved count.
pub async fn active_total(conn: &mut AsyncPgConnection, product_id: Uuid) -> Result<BigDecimal, EngineError> {
    let total = stock_reservations::table
        .filter(stock_reservations::product_id.eq(product_id))
        .filter(stock_reservations::status.eq(ReservationStatus::Active.as_str()))
        .select(diesel::dsl::sum(stock_reservations::reserved_quantity))
        .first::<Option<BigDecimal>>(conn)
        .await?;
    Ok(total.unwrap_or_else(|| BigDecimal::from(0)))
}

/// Standalone reservation operations, each in its own transaction.
#[derive(Clone)]
pub struct ReservationManager {
    pool: DbPool,
}

impl ReservationManager {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create_reservation(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        quantity: BigDecimal,
        ttl: chrono::Duration,
    ) -> Result<StockReservation, EngineError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        conn.transaction::<_, EngineError, _>(|conn| {
            Box::pin(async move { create(conn, order_id, product_id, &quantity, now + ttl, now).await })
        })
        .await
    }

    pub async fn release_reservation(&self, reservation_id: Uuid) -> Result<bool, EngineError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let released = conn
            .transaction::<_, EngineError, _>(|conn| Box::pin(async move { release(conn, reservation_id, now).await }))
            .await?;
        if released {
            info!(reservation_id = %reservation_id, "Released reservation");
        }
        Ok(released)
    }

    pub async fn consume_reservation(&self, reservation_id: Uuid) -> Result<bool, EngineError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let consumed = conn
            .transaction::<_, EngineError, _>(|conn| Box::pin(async move { consume(conn, reservation_id, now).await }))
            .await?;
        if consumed {
            info!(reservation_id = %reservation_id, "Consumed reservation");
        }
        Ok(consumed)
    }

    pub async fn extend_reservation(&self, reservation_id: Uuid, until: DateTime<Utc>) -> Result<bool, EngineError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        conn.transaction::<_, EngineError, _>(|conn| Box::pin(async move { extend(conn, reservation_id, until, now).await }))
            .await
    }

    pub async fn get(&self, reservation_id: Uuid) -> Result<StockReservation, EngineError> {
        let mut conn = self.pool.get().await?;
        stock_reservations::table
            .find(reservation_id)
            .first::<StockReservation>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| EngineError::not_found(format!("reservation {reservation_id}")))
    }

    pub async fn for_order(&self, order_id: Uuid) -> Result<Vec<StockReservation>, EngineError> {
        let mut conn = self.pool.get().await?;
        for_order(&mut conn, order_id).await
    }

    pub async fn expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<StockReservation>, EngineError> {
        let mut conn = self.pool.get().await?;
        expired(&mut conn, now, limit).await
    }

    pub async fn active_total(&self, product_id: Uuid) -> Result<BigDecimal, EngineError> {
        let mut conn = self.pool.get().await?;
        active_total(&mut conn, product_id).await
    }
}
