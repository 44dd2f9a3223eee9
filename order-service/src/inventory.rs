use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::*;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::*;
use crate::outbox;
use crate::schema::*;
use crate::DbPool;

// Every function taking a connection must run inside a transaction: the
// inventory row stays locked until that transaction ends.

/// Locks one product's inventory row for the rest of the transaction.
pub async fn lock(conn: &mut AsyncPgConnection, product_id: Uuid) -> Result<Inventory, EngineError> {
    inventory::table
        .filter(inventory::product_id.eq(product_id))
        .for_update()
        .first::<Inventory>(conn)
        .await
        .optional()?
        .ok_or_else(|| EngineError::not_found(format!("inventory for product {product_id}")))
}

/// Fails with `InsufficientStock` when the locked row cannot cover `quantity`.
pub async fn reserve(
    conn: &mut AsyncPgConnection,
    product_id: Uuid,
    quantity: &BigDecimal,
    now: DateTime<Utc>,
) -> Result<Inventory, EngineError> {
    let row = lock(conn, product_id).await?;
    let mut level = row.level();
    level
        .reserve(quantity)
        .map_err(|e| EngineError::insufficient(product_id, e))?;
    store(conn, &row, level, now).await
}

pub async fn release(
    conn: &mut AsyncPgConnection,
    product_id: Uuid,
    quantity: &BigDecimal,
    now: DateTime<Utc>,
) -> Result<Inventory, EngineError> {
    let row = lock(conn, product_id).await?;
    let mut level = row.level();
    level.release(quantity)?;
    store(conn, &row, level, now).await
}

pub async fn consume(
    conn: &mut AsyncPgConnection,
    product_id: Uuid,
    quantity: &BigDecimal,
    now: DateTime<Utc>,
) -> Result<Inventory, EngineError> {
    let row = lock(conn, product_id).await?;
    let mut level = row.level();
    level.consume(quantity)?;
    store(conn, &row, level, now).await
}

pub async fn adjust(
    conn: &mut AsyncPgConnection,
    product_id: Uuid,
    delta: &BigDecimal,
    now: DateTime<Utc>,
) -> Result<Inventory, EngineError> {
    let row = lock(conn, product_id).await?;
    let mut level = row.level();
    level.adjust(delta)?;
    store(conn, &row, level, now).await
}

async fn store(
    conn: &mut AsyncPgConnection,
    row: &Inventory,
    level: StockLevel,
    now: DateTime<Utc>,
) -> Result<Inventory, EngineError> {
    let was_low = row.level().is_low(&row.low_stock_threshold);

    let updated = diesel::update(inventory::table.find(row.id))
        .set((
            inventory::available_quantity.eq(level.available),
            inventory::reserved_quantity.eq(level.reserved),
            inventory::updated_at.eq(now),
        ))
        .get_result::<Inventory>(conn)
        .await?;

    if !was_low && updated.level().is_low(&updated.low_stock_threshold) {
        warn!(
            product_id = %updated.product_id,
            available = %updated.available_quantity,
            threshold = %updated.low_stock_threshold,
            "Stock fell to low-stock threshold"
        );
        outbox::enqueue(
            conn,
            &EngineEvent::LowStock {
                product_id: updated.product_id,
                available: updated.available_quantity.clone(),
                threshold: updated.low_stock_threshold.clone(),
            },
        )
        .await?;
    }

    Ok(updated)
}

/// Read-side and vendor-facing access to the ledger.
#[derive(Clone)]
pub struct InventoryLedger {
    pool: DbPool,
}

impl InventoryLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn level(&self, product_id: Uuid) -> Result<Inventory, EngineError> {
        let mut conn = self.pool.get().await?;
        inventory::table
            .filter(inventory::product_id.eq(product_id))
            .first::<Inventory>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| EngineError::not_found(format!("inventory for product {product_id}")))
    }

    /// Manual stock correction by the owning vendor, serialized through the
    /// same row lock as reservations.
    pub async fn adjust_stock(
        &self,
        actor: &Actor,
        product_id: Uuid,
        delta: BigDecimal,
    ) -> Result<Inventory, EngineError> {
        let mut conn = self.pool.get().await?;

        let product = products::table
            .find(product_id)
            .first::<Product>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| EngineError::not_found(format!("product {product_id}")))?;

        if !Policy::ManageStock.permits(actor, &Parties::vendor(product.vendor_id)) {
            return Err(EngineError::Forbidden(Policy::ManageStock.name()));
        }

        let now = Utc::now();
        let delta_for_log = delta.clone();
        let updated = conn
            .transaction::<_, EngineError, _>(|conn| {
                Box::pin(async move { adjust(conn, product_id, &delta, now).await })
            })
            .await?;

        info!(
            product_id = %product_id,
            delta = %delta_for_log,
            available = %updated.available_quantity,
            actor = %actor.label(),
            "Stock adjusted"
        );
        Ok(updated)
    }
}
