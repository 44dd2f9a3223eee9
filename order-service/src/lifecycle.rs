use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_traits::Zero;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use shared::*;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::inventory::InventoryLedger;
use crate::models::*;
use crate::reservations::{self, ReservationManager};
use crate::schema::*;
use crate::{coupons, outbox, DbPool};

pub const PAYMENT_TIMEOUT_REASON: &str = "payment timeout";
pub const UNACCEPTED_REASON: &str = "vendor did not accept the order in time";
pub const REVIEW_LAPSED_REASON: &str = "payment review was not completed in time";

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub reservations: Vec<StockReservation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdvanceRequest {
    pub to: OrderStatus,
    #[serde(default)]
    pub delivery_partner_id: Option<Uuid>,
    #[serde(default)]
    pub otp: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventOutcome {
    Duplicate,
    SessionRecorded,
    Confirmed,
    AlreadyCaptured,
    FailureRecorded,
    RefundRecorded,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    Skipped,
    Released,
    OrderCancelled,
}

/// What a capture did to the order; errors are raised only after the
/// transaction commits so the bookkeeping survives.
enum Capture {
    Confirmed,
    AlreadyCaptured,
    Held { expected: BigDecimal, captured: BigDecimal },
    Late,
    Ignored,
}

enum Applied {
    Outcome(PaymentEventOutcome),
    Capture(Capture),
}

struct PricedLine {
    product: Product,
    unit: ProductUnit,
    quantity: BigDecimal,
}

/// Owns every order state change. Each public operation runs in one
/// transaction and takes row locks in the order: order, reservations,
/// coupon, inventory.
pub struct OrderLifecycle {
    pool: DbPool,
    config: EngineConfig,
    reservations: ReservationManager,
    ledger: InventoryLedger,
}

impl OrderLifecycle {
    pub fn new(pool: DbPool, config: EngineConfig) -> Self {
        Self {
            reservations: ReservationManager::new(pool.clone()),
            ledger: InventoryLedger::new(pool.clone()),
            pool,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn reservations(&self) -> &ReservationManager {
        &self.reservations
    }

    pub fn ledger(&self) -> &InventoryLedger {
        &self.ledger
    }

    pub async fn place_order(&self, actor: &Actor, checkout: Checkout) -> Result<OrderDetails, EngineError> {
        let Actor::Buyer(buyer_id) = *actor else {
            return Err(EngineError::Forbidden(Policy::PlaceOrder.name()));
        };
        let lines = checkout.normalized_lines()?;
        let now = Utc::now();
        let mut conn = self.pool.get().await?;

        let unit_ids: Vec<Uuid> = lines.iter().map(|line| line.sell_unit_id).collect();
        let mut catalog: HashMap<Uuid, (ProductUnit, Product)> = product_units::table
            .inner_join(products::table)
            .filter(product_units::id.eq_any(&unit_ids))
            .load::<(ProductUnit, Product)>(&mut conn)
            .await?
            .into_iter()
            .map(|(unit, product)| (unit.id, (unit, product)))
            .collect();

        let mut vendor_id = None;
        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            let (unit, product) = catalog
                .remove(&line.sell_unit_id)
                .ok_or_else(|| EngineError::not_found(format!("sell unit {}", line.sell_unit_id)))?;
            if unit.product_id != line.product_id {
                return Err(EngineError::Validation(format!(
                    "sell unit {} does not belong to product {}",
                    unit.id, line.product_id
                )));
            }
            if !unit.is_active || !product.is_active {
                return Err(EngineError::Validation(format!("{} ({}) is no longer sold", product.name, unit.label)));
            }
            match vendor_id {
                None => vendor_id = Some(product.vendor_id),
                Some(id) if id != product.vendor_id => {
                    return Err(EngineError::Validation("all items in an order must come from one vendor".to_string()));
                }
                Some(_) => {}
            }
            priced.push(PricedLine {
                product,
                unit,
                quantity: line.quantity,
            });
        }
        let vendor_id = vendor_id.ok_or(CartError::Empty)?;

        let vendor = vendors::table
            .find(vendor_id)
            .first::<Vendor>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| EngineError::not_found(format!("vendor {vendor_id}")))?;
        if !vendor.is_accepting_orders {
            return Err(EngineError::Validation(format!("{} is not accepting orders", vendor.name)));
        }

        let order_id = Uuid::new_v4();
        let items: Vec<OrderItem> = priced
            .into_iter()
            .map(|line| OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_id: line.product.id,
                product_unit_id: line.unit.id,
                line_total: line_total(&line.unit.price, &line.quantity),
                product_name: line.product.name,
                unit_label: line.unit.label,
                quantity: line.quantity,
                unit_price: line.unit.price,
                return_window_days: line.product.return_window_days,
                created_at: now,
            })
            .collect();
        let subtotal = items.iter().fold(BigDecimal::zero(), |sum, item| sum + &item.line_total);

        let address = &checkout.delivery_address;
        let quote = self.config.delivery.quote(
            (vendor.latitude, vendor.longitude),
            (address.latitude, address.longitude),
            &subtotal,
        )?;

        let coupon = match checkout.coupon_code() {
            Some(code) => Some(coupons::evaluate(&mut conn, &code, buyer_id, &subtotal, now).await?),
            None => None,
        };
        let discount = coupon
            .as_ref()
            .map(|(_, discount)| discount.clone())
            .unwrap_or_else(BigDecimal::zero);
        let totals = OrderTotals::compute(&subtotal, &quote.fee, &discount, &self.config.tax_rate)?;

        let otp = DeliveryOtp::generate();
        let new_order = NewOrder {
            id: order_id,
            order_number: order_number(now),
            buyer_id,
            vendor_id,
            delivery_address: serde_json::to_value(&checkout.delivery_address)?,
            subtotal: totals.subtotal,
            delivery_fee: totals.delivery_fee,
            discount_amount: totals.discount_amount,
            tax_amount: totals.tax_amount,
            total_amount: totals.total_amount,
            delivery_distance_km: quote.distance_km,
            payment_mode: checkout.payment_mode.to_string(),
            payment_status: PaymentStatus::Pending.to_string(),
            order_status: OrderStatus::Placed.to_string(),
            coupon_id: coupon.map(|(coupon, _)| coupon.id),
            delivery_otp: otp.as_str().to_string(),
            placed_at: now,
            updated_at: now,
        };

        let expires_at = now + self.config.reservation_ttl();
        let payment_mode = checkout.payment_mode;
        let currency = self.config.currency.clone();
        let rows = items.clone();

        let order = conn
            .transaction::<_, EngineError, _>(|conn| {
                Box::pin(async move {
                    if let Some(coupon_id) = new_order.coupon_id {
                        coupons::claim(conn, coupon_id, buyer_id, &new_order.subtotal, now).await?;
                    }
                    diesel::insert_into(orders::table)
                        .values(&new_order)
                        .execute(conn)
                        .await?;
                    diesel::insert_into(order_items::table)
                        .values(&rows)
                        .execute(conn)
                        .await?;

                    // Items are sorted by product, so inventory rows lock in a stable order.
                    for item in &rows {
                        reservations::create(conn, order_id, item.product_id, &item.quantity, expires_at, now).await?;
                    }

                    outbox::enqueue(
                        conn,
                        &EngineEvent::DeliveryOtpIssued {
                            order_id,
                            buyer_id,
                            otp: otp.as_str().to_string(),
                        },
                    )
                    .await?;
                    outbox::enqueue(
                        conn,
                        &EngineEvent::OrderStatusChanged {
                            order_id,
                            from: None,
                            to: OrderStatus::Placed,
                            actor: Actor::Buyer(buyer_id).label(),
                            at: now,
                        },
                    )
                    .await?;

                    let order = lock_order(conn, order_id).await?;
                    match payment_mode {
                        PaymentMode::Cod => confirm_in_tx(conn, &order, now).await,
                        PaymentMode::Online => {
                            outbox::enqueue(
                                conn,
                                &EngineEvent::PaymentSessionRequested {
                                    order_id,
                                    request_id: Uuid::new_v4(),
                                    amount: order.total_amount.clone(),
                                    currency,
                                },
                            )
                            .await?;
                            Ok(order)
                        }
                    }
                })
            })
            .await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            status = %order.order_status,
            total = %order.total_amount,
            "Order placed"
        );

        let reservations = reservations::for_order(&mut conn, order.id).await?;
        Ok(OrderDetails {
            order,
            items,
            reservations,
        })
    }

    pub async fn get_order(&self, actor: &Actor, order_id: Uuid) -> Result<OrderDetails, EngineError> {
        let mut conn = self.pool.get().await?;
        let order = orders::table
            .find(order_id)
            .first::<Order>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| EngineError::not_found(format!("order {order_id}")))?;

        if !Policy::ViewOrder.permits(actor, &order.parties()) {
            // Indistinguishable from a missing order for outsiders.
            return Err(EngineError::not_found(format!("order {order_id}")));
        }

        let items = order_items::table
            .filter(order_items::order_id.eq(order_id))
            .order(order_items::product_id.asc())
            .load::<OrderItem>(&mut conn)
            .await?;
        let reservations = reservations::for_order(&mut conn, order_id).await?;

        Ok(OrderDetails {
            order,
            items,
            reservations,
        })
    }

    /// Applies one gateway report. Reports are deduplicated by `event_id`
    /// in the same transaction that applies them.
    pub async fn handle_payment_event(&self, event: PaymentGatewayEvent) -> Result<PaymentEventOutcome, EngineError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let hold_until = now + self.config.manual_review_hold();
        let order_id = event.order_id;
        let event_id = event.event_id.clone();

        let applied = conn
            .transaction::<_, EngineError, _>(|conn| {
                Box::pin(async move {
                    let inserted = diesel::insert_into(processed_payment_events::table)
                        .values(&ProcessedPaymentEvent {
                            event_id: event.event_id,
                            order_id: event.order_id,
                            processed_at: now,
                        })
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;
                    if inserted == 0 {
                        return Ok(Applied::Outcome(PaymentEventOutcome::Duplicate));
                    }

                    let applied = match event.report {
                        PaymentReport::SessionCreated { session_id, expires_at } => Applied::Outcome(
                            session_created_in_tx(conn, order_id, &session_id, expires_at, now).await?,
                        ),
                        PaymentReport::Captured {
                            payment_reference,
                            amount,
                        } => Applied::Capture(
                            capture_in_tx(conn, order_id, &amount, &payment_reference, hold_until, now).await?,
                        ),
                        PaymentReport::Failed { reason } => {
                            Applied::Outcome(payment_failed_in_tx(conn, order_id, &reason, now).await?)
                        }
                        PaymentReport::Refunded { amount } => {
                            Applied::Outcome(refunded_in_tx(conn, order_id, &amount, now).await?)
                        }
                    };
                    Ok(applied)
                })
            })
            .await?;

        let outcome = match applied {
            Applied::Outcome(outcome) => outcome,
            Applied::Capture(capture) => settle_capture(order_id, capture)?,
        };
        info!(event_id = %event_id, order_id = %order_id, outcome = ?outcome, "Applied payment event");
        Ok(outcome)
    }

    /// Confirms an online order once the gateway reports a capture for it.
    /// Replays of the same capture are no-ops.
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        amount: BigDecimal,
        payment_reference: String,
    ) -> Result<PaymentEventOutcome, EngineError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let hold_until = now + self.config.manual_review_hold();

        let capture = conn
            .transaction::<_, EngineError, _>(|conn| {
                Box::pin(async move { capture_in_tx(conn, order_id, &amount, &payment_reference, hold_until, now).await })
            })
            .await?;
        settle_capture(order_id, capture)
    }

    /// Accepts a capture that was held for review and confirms the order.
    pub async fn approve_held_payment(&self, actor: &Actor, order_id: Uuid) -> Result<Order, EngineError> {
        if !Policy::ReviewPayment.permits(actor, &Parties::default()) {
            return Err(EngineError::Forbidden(Policy::ReviewPayment.name()));
        }
        let mut conn = self.pool.get().await?;
        let now = Utc::now();

        let order = conn
            .transaction::<_, EngineError, _>(|conn| {
                Box::pin(async move {
                    let order = lock_order(conn, order_id).await?;
                    if !order.requires_manual_review || order.payment_status()? != PaymentStatus::Captured {
                        return Err(EngineError::Validation(format!("order {order_id} has no payment held for review")));
                    }
                    if order.status()? != OrderStatus::Placed {
                        return Err(EngineError::InvalidStateTransition {
                            order_id,
                            from: order.status()?,
                            to: OrderStatus::Confirmed,
                        });
                    }
                    let order = diesel::update(orders::table.find(order_id))
                        .set((orders::requires_manual_review.eq(false), orders::updated_at.eq(now)))
                        .get_result::<Order>(conn)
                        .await?;
                    confirm_in_tx(conn, &order, now).await
                })
            })
            .await?;

        info!(order_id = %order_id, reviewer = %actor.label(), "Held payment approved");
        Ok(order)
    }

    /// Asks the gateway for a fresh checkout session for an unpaid order.
    pub async fn retry_payment_session(&self, actor: &Actor, order_id: Uuid) -> Result<Order, EngineError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let actor = *actor;
        let currency = self.config.currency.clone();

        conn.transaction::<_, EngineError, _>(|conn| {
            Box::pin(async move {
                let order = lock_order(conn, order_id).await?;
                if !Policy::RetryPayment.permits(&actor, &order.parties()) {
                    return Err(EngineError::Forbidden(Policy::RetryPayment.name()));
                }
                if order.payment_mode()? != PaymentMode::Online {
                    return Err(EngineError::Validation("cash-on-delivery orders have no payment session".to_string()));
                }
                if order.status()? != OrderStatus::Placed || !order.payment_status()?.awaiting_payment() {
                    return Err(EngineError::Validation(format!("order {order_id} is not awaiting payment")));
                }
                if order.requires_manual_review {
                    return Err(EngineError::Validation(format!("order {order_id} is held for payment review")));
                }

                let held = reservations::lock_for_order(conn, order_id).await?;
                for reservation in &held {
                    if reservation.status()? != ReservationStatus::Active {
                        return Err(EngineError::ReservationExpired { order_id });
                    }
                }

                let order = diesel::update(orders::table.find(order_id))
                    .set((
                        orders::payment_status.eq(PaymentStatus::Pending.as_str()),
                        orders::updated_at.eq(now),
                    ))
                    .get_result::<Order>(conn)
                    .await?;
                outbox::enqueue(
                    conn,
                    &EngineEvent::PaymentSessionRequested {
                        order_id,
                        request_id: Uuid::new_v4(),
                        amount: order.total_amount.clone(),
                        currency,
                    },
                )
                .await?;
                Ok(order)
            })
        })
        .await
    }

    pub async fn cancel_order(&self, actor: &Actor, order_id: Uuid, reason: String) -> Result<Order, EngineError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let actor = *actor;

        let order = conn
            .transaction::<_, EngineError, _>(|conn| {
                Box::pin(async move {
                    let order = lock_order(conn, order_id).await?;
                    if !Policy::CancelOrder.permits(&actor, &order.parties()) {
                        return Err(EngineError::Forbidden(Policy::CancelOrder.name()));
                    }
                    cancel_in_tx(conn, &order, &actor, &reason, now).await
                })
            })
            .await?;

        info!(order_id = %order_id, actor = %actor.label(), "Order cancelled");
        Ok(order)
    }

    /// Moves a confirmed order one step along the fulfilment path.
    pub async fn advance_order(&self, actor: &Actor, order_id: Uuid, request: AdvanceRequest) -> Result<Order, EngineError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let actor = *actor;
        let to = request.to;

        let order = conn
            .transaction::<_, EngineError, _>(|conn| {
                Box::pin(async move {
                    let order = lock_order(conn, order_id).await?;
                    let from = order.status()?;

                    // Confirmation comes from payment, exits have their own operations.
                    let forward = !matches!(to, OrderStatus::Placed | OrderStatus::Confirmed | OrderStatus::Cancelled | OrderStatus::Returned);
                    if !forward || from.next() != Some(to) {
                        return Err(EngineError::InvalidStateTransition { order_id, from, to });
                    }

                    let policy = if to == OrderStatus::Delivered {
                        Policy::ConfirmDelivery
                    } else {
                        Policy::AdvanceOrder
                    };
                    if !policy.permits(&actor, &order.parties()) {
                        return Err(EngineError::Forbidden(policy.name()));
                    }

                    match to {
                        OrderStatus::OutForDelivery => {
                            if let Some(partner) = request.delivery_partner_id {
                                diesel::update(orders::table.find(order_id))
                                    .set(orders::delivery_partner_id.eq(partner))
                                    .execute(conn)
                                    .await?;
                            }
                        }
                        OrderStatus::Delivered => {
                            let matches = request
                                .otp
                                .as_deref()
                                .zip(DeliveryOtp::parse(&order.delivery_otp))
                                .is_some_and(|(candidate, otp)| otp.verify(candidate));
                            if !matches {
                                warn!(order_id = %order_id, actor = %actor.label(), "Delivery code rejected");
                                return Err(EngineError::OtpMismatch);
                            }
                            if order.payment_mode()? == PaymentMode::Cod {
                                diesel::update(orders::table.find(order_id))
                                    .set((
                                        orders::payment_status.eq(PaymentStatus::Captured.as_str()),
                                        orders::payment_reference.eq(format!("cod:{}", order.order_number)),
                                        orders::captured_amount.eq(&order.total_amount),
                                    ))
                                    .execute(conn)
                                    .await?;
                            }
                        }
                        _ => {}
                    }

                    set_status(conn, &order, to, &actor, now).await
                })
            })
            .await?;

        info!(order_id = %order_id, status = %to, actor = %actor.label(), "Order advanced");
        Ok(order)
    }

    pub async fn return_order(&self, actor: &Actor, order_id: Uuid, reason: String) -> Result<Order, EngineError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let actor = *actor;

        let order = conn
            .transaction::<_, EngineError, _>(|conn| {
                Box::pin(async move {
                    let order = lock_order(conn, order_id).await?;
                    if !Policy::ReturnOrder.permits(&actor, &order.parties()) {
                        return Err(EngineError::Forbidden(Policy::ReturnOrder.name()));
                    }
                    let from = order.status()?;
                    if from != OrderStatus::Delivered {
                        return Err(EngineError::InvalidStateTransition {
                            order_id,
                            from,
                            to: OrderStatus::Returned,
                        });
                    }

                    // The shortest snapshotted window among the items governs the order.
                    let window_days = order_items::table
                        .filter(order_items::order_id.eq(order_id))
                        .select(diesel::dsl::min(order_items::return_window_days))
                        .first::<Option<i32>>(conn)
                        .await?
                        .unwrap_or(0);
                    let delivered_at = order.delivered_at.unwrap_or(order.updated_at);
                    if window_days <= 0 || now > delivered_at + Duration::days(i64::from(window_days)) {
                        return Err(EngineError::ReturnWindowClosed(order_id));
                    }

                    diesel::update(orders::table.find(order_id))
                        .set(orders::return_reason.eq(&reason))
                        .execute(conn)
                        .await?;
                    let returned = set_status(conn, &order, OrderStatus::Returned, &actor, now).await?;

                    if order.payment_status()? == PaymentStatus::Captured {
                        outbox::enqueue(
                            conn,
                            &EngineEvent::RefundRequested {
                                order_id,
                                amount: order.refundable_amount(),
                                reason: format!("return: {reason}"),
                            },
                        )
                        .await?;
                    }
                    Ok(returned)
                })
            })
            .await?;

        info!(order_id = %order_id, actor = %actor.label(), "Order returned");
        Ok(order)
    }

    /// Pushes the expiry of an unpaid order's reservations forward.
    pub async fn extend_reservations(&self, actor: &Actor, order_id: Uuid, until: DateTime<Utc>) -> Result<usize, EngineError> {
        if !Policy::ManageReservations.permits(actor, &Parties::default()) {
            return Err(EngineError::Forbidden(Policy::ManageReservations.name()));
        }
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        if until <= now {
            return Err(EngineError::Validation("new expiry must be in the future".to_string()));
        }

        conn.transaction::<_, EngineError, _>(|conn| {
            Box::pin(async move {
                let order = lock_order(conn, order_id).await?;
                if order.status()? != OrderStatus::Placed {
                    return Err(EngineError::Validation(format!("order {order_id} no longer holds reservations")));
                }
                reservations::extend_for_order(conn, order_id, until, now).await
            })
        })
        .await
    }

    /// Active reservations past their expiry at `now`.
    pub async fn expired_reservations(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<StockReservation>, EngineError> {
        self.reservations.expired(now, limit).await
    }

    /// Releases one expired reservation and cancels its order if that order
    /// is still waiting to be paid or held for payment review. Safe to run
    /// from overlapping sweeps.
    pub async fn expire_reservation(&self, reservation: &StockReservation, now: DateTime<Utc>) -> Result<ExpiryOutcome, EngineError> {
        let mut conn = self.pool.get().await?;
        let order_id = reservation.order_id;
        let reservation_id = reservation.id;

        conn.transaction::<_, EngineError, _>(|conn| {
            Box::pin(async move {
                let order = lock_order(conn, order_id).await?;
                if !reservations::release_if_expired(conn, reservation_id, now).await? {
                    return Ok(ExpiryOutcome::Skipped);
                }

                if order.status()? != OrderStatus::Placed {
                    return Ok(ExpiryOutcome::Released);
                }
                // A held capture cannot be confirmed without its stock, so it is refunded.
                let reason = if order.requires_manual_review {
                    REVIEW_LAPSED_REASON
                } else if order.payment_status()?.awaiting_payment() {
                    PAYMENT_TIMEOUT_REASON
                } else {
                    return Ok(ExpiryOutcome::Released);
                };

                cancel_in_tx(conn, &order, &Actor::System, reason, now).await?;
                Ok(ExpiryOutcome::OrderCancelled)
            })
        })
        .await
    }

    /// Orders placed before `cutoff` that nobody has confirmed.
    pub async fn unaccepted_orders(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, EngineError> {
        let mut conn = self.pool.get().await?;
        Ok(orders::table
            .filter(orders::order_status.eq(OrderStatus::Placed.as_str()))
            .filter(orders::placed_at.lt(cutoff))
            .filter(orders::requires_manual_review.eq(false))
            .order(orders::placed_at.asc())
            .select(orders::id)
            .limit(limit)
            .load::<Uuid>(&mut conn)
            .await?)
    }

    /// Cancels the order if it is still unaccepted under the lock.
    pub async fn cancel_unaccepted(&self, order_id: Uuid, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, EngineError, _>(|conn| {
            Box::pin(async move {
                let order = lock_order(conn, order_id).await?;
                if order.status()? != OrderStatus::Placed || order.placed_at >= cutoff || order.requires_manual_review {
                    return Ok(false);
                }
                cancel_in_tx(conn, &order, &Actor::System, UNACCEPTED_REASON, now).await?;
                Ok(true)
            })
        })
        .await
    }

    /// Preview of a coupon against a subtotal, without redeeming it.
    pub async fn evaluate_coupon(&self, actor: &Actor, code: &str, subtotal: &BigDecimal) -> Result<CouponEvaluation, EngineError> {
        let Actor::Buyer(buyer_id) = *actor else {
            return Err(EngineError::Forbidden(Policy::PlaceOrder.name()));
        };
        let mut conn = self.pool.get().await?;
        let code = code.trim().to_ascii_uppercase();
        coupons::validate(&mut conn, &code, buyer_id, subtotal, Utc::now()).await
    }
}

fn order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix.to_ascii_uppercase())
}

fn settle_capture(order_id: Uuid, capture: Capture) -> Result<PaymentEventOutcome, EngineError> {
    match capture {
        Capture::Confirmed => Ok(PaymentEventOutcome::Confirmed),
        Capture::AlreadyCaptured => Ok(PaymentEventOutcome::AlreadyCaptured),
        Capture::Ignored => Ok(PaymentEventOutcome::Ignored),
        Capture::Held { expected, captured } => {
            warn!(order_id = %order_id, expected = %expected, captured = %captured, "Captured amount differs from order total; held for review");
            Err(EngineError::PaymentMismatch {
                order_id,
                expected,
                captured,
            })
        }
        Capture::Late => {
            warn!(order_id = %order_id, "Payment captured after reservations lapsed; refund requested");
            Err(EngineError::ReservationExpired { order_id })
        }
    }
}

async fn lock_order(conn: &mut AsyncPgConnection, order_id: Uuid) -> Result<Order, EngineError> {
    orders::table
        .find(order_id)
        .for_update()
        .first::<Order>(conn)
        .await
        .optional()?
        .ok_or_else(|| EngineError::not_found(format!("order {order_id}")))
}

/// Writes a validated status change with its timestamp and announces it.
async fn set_status(
    conn: &mut AsyncPgConnection,
    order: &Order,
    to: OrderStatus,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Order, EngineError> {
    let from = order.status()?;
    if !from.can_transition_to(to) {
        return Err(EngineError::InvalidStateTransition {
            order_id: order.id,
            from,
            to,
        });
    }

    let target = diesel::update(orders::table.find(order.id));
    let status = orders::order_status.eq(to.as_str());
    let touched = orders::updated_at.eq(now);
    let updated = match to {
        OrderStatus::Placed => {
            return Err(EngineError::InvalidStateTransition {
                order_id: order.id,
                from,
                to,
            })
        }
        OrderStatus::Confirmed => {
            target
                .set((status, touched, orders::confirmed_at.eq(now)))
                .get_result::<Order>(conn)
                .await?
        }
        OrderStatus::Picked => {
            target
                .set((status, touched, orders::picked_at.eq(now)))
                .get_result::<Order>(conn)
                .await?
        }
        OrderStatus::Packed => {
            target
                .set((status, touched, orders::packed_at.eq(now)))
                .get_result::<Order>(conn)
                .await?
        }
        OrderStatus::OutForDelivery => {
            target
                .set((
                    status,
                    touched,
                    orders::out_for_delivery_at.eq(now),
                    orders::is_cancellable.eq(false),
                ))
                .get_result::<Order>(conn)
                .await?
        }
        OrderStatus::Delivered => {
            target
                .set((status, touched, orders::delivered_at.eq(now)))
                .get_result::<Order>(conn)
                .await?
        }
        OrderStatus::Cancelled => {
            target
                .set((
                    status,
                    touched,
                    orders::cancelled_at.eq(now),
                    orders::is_cancellable.eq(false),
                ))
                .get_result::<Order>(conn)
                .await?
        }
        OrderStatus::Returned => {
            target
                .set((status, touched, orders::returned_at.eq(now)))
                .get_result::<Order>(conn)
                .await?
        }
    };

    outbox::enqueue(
        conn,
        &EngineEvent::OrderStatusChanged {
            order_id: order.id,
            from: Some(from),
            to,
            actor: actor.label(),
            at: now,
        },
    )
    .await?;

    Ok(updated)
}

/// Consumes the order's holds, redeems its coupon and marks it confirmed.
/// Fails with `ReservationExpired` before writing anything if a hold lapsed.
async fn confirm_in_tx(conn: &mut AsyncPgConnection, order: &Order, now: DateTime<Utc>) -> Result<Order, EngineError> {
    let held = reservations::lock_for_order(conn, order.id).await?;
    if held.is_empty() {
        return Err(EngineError::ReservationExpired { order_id: order.id });
    }
    for reservation in &held {
        if reservation.status()? == ReservationStatus::Released {
            return Err(EngineError::ReservationExpired { order_id: order.id });
        }
    }

    // Coupon before inventory, the same order placement takes them in.
    if let Some(coupon_id) = order.coupon_id {
        coupons::record_usage(conn, coupon_id, order.buyer_id, order.id, &order.discount_amount, now).await?;
    }

    reservations::consume_for_order(conn, order.id, now).await?;

    set_status(conn, order, OrderStatus::Confirmed, &Actor::System, now).await
}

/// Releases what the order still holds, records why, and raises a refund
/// when money was already taken.
async fn cancel_in_tx(
    conn: &mut AsyncPgConnection,
    order: &Order,
    actor: &Actor,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Order, EngineError> {
    let from = order.status()?;
    if !from.can_transition_to(OrderStatus::Cancelled) {
        return Err(EngineError::InvalidStateTransition {
            order_id: order.id,
            from,
            to: OrderStatus::Cancelled,
        });
    }
    if !from.within_cancellation_window() || !order.is_cancellable {
        return Err(EngineError::NotCancellable(order.id));
    }

    let released = reservations::release_for_order(conn, order.id, now).await?;

    diesel::update(orders::table.find(order.id))
        .set(orders::cancellation_reason.eq(reason))
        .execute(conn)
        .await?;
    let cancelled = set_status(conn, order, OrderStatus::Cancelled, actor, now).await?;

    if order.payment_status()? == PaymentStatus::Captured {
        outbox::enqueue(
            conn,
            &EngineEvent::RefundRequested {
                order_id: order.id,
                amount: order.refundable_amount(),
                reason: reason.to_string(),
            },
        )
        .await?;
    }

    info!(order_id = %order.id, from = %from, released, reason = %reason, "Cancelled order");
    Ok(cancelled)
}

async fn mark_captured(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    amount: &BigDecimal,
    payment_reference: &str,
    held_for_review: bool,
    now: DateTime<Utc>,
) -> Result<Order, EngineError> {
    Ok(diesel::update(orders::table.find(order_id))
        .set((
            orders::payment_status.eq(PaymentStatus::Captured.as_str()),
            orders::payment_reference.eq(payment_reference),
            orders::captured_amount.eq(amount),
            orders::requires_manual_review.eq(held_for_review),
            orders::updated_at.eq(now),
        ))
        .get_result::<Order>(conn)
        .await?)
}

async fn capture_in_tx(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    amount: &BigDecimal,
    payment_reference: &str,
    hold_until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Capture, EngineError> {
    let order = lock_order(conn, order_id).await?;

    if order.payment_mode()? == PaymentMode::Cod {
        warn!(order_id = %order_id, "Ignoring online capture for a cash-on-delivery order");
        return Ok(Capture::Ignored);
    }
    if matches!(order.payment_status()?, PaymentStatus::Captured | PaymentStatus::Refunded) {
        return Ok(Capture::AlreadyCaptured);
    }

    match order.status()? {
        OrderStatus::Placed => {}
        OrderStatus::Cancelled => {
            mark_captured(conn, order_id, amount, payment_reference, false, now).await?;
            outbox::enqueue(
                conn,
                &EngineEvent::RefundRequested {
                    order_id,
                    amount: amount.clone(),
                    reason: "payment captured after the order was cancelled".to_string(),
                },
            )
            .await?;
            return Ok(Capture::Late);
        }
        from => {
            return Err(EngineError::InvalidStateTransition {
                order_id,
                from,
                to: OrderStatus::Confirmed,
            })
        }
    }

    if amount != &order.total_amount {
        mark_captured(conn, order_id, amount, payment_reference, true, now).await?;
        reservations::extend_for_order(conn, order_id, hold_until, now).await?;
        return Ok(Capture::Held {
            expected: order.total_amount.clone(),
            captured: amount.clone(),
        });
    }

    let captured = mark_captured(conn, order_id, amount, payment_reference, false, now).await?;
    match confirm_in_tx(conn, &captured, now).await {
        Ok(_) => Ok(Capture::Confirmed),
        Err(EngineError::ReservationExpired { .. }) => {
            cancel_in_tx(conn, &captured, &Actor::System, PAYMENT_TIMEOUT_REASON, now).await?;
            Ok(Capture::Late)
        }
        Err(e) => Err(e),
    }
}

async fn session_created_in_tx(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    session_id: &str,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<PaymentEventOutcome, EngineError> {
    let order = lock_order(conn, order_id).await?;
    if order.status()? != OrderStatus::Placed || !order.payment_status()?.awaiting_payment() {
        return Ok(PaymentEventOutcome::Ignored);
    }

    diesel::update(orders::table.find(order_id))
        .set((
            orders::payment_status.eq(PaymentStatus::Created.as_str()),
            orders::payment_reference.eq(session_id),
            orders::updated_at.eq(now),
        ))
        .execute(conn)
        .await?;

    // Hold stock at least as long as the buyer can still pay.
    if let Some(expires_at) = expires_at {
        reservations::extend_for_order(conn, order_id, expires_at, now).await?;
    }
    Ok(PaymentEventOutcome::SessionRecorded)
}

async fn payment_failed_in_tx(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<PaymentEventOutcome, EngineError> {
    let order = lock_order(conn, order_id).await?;
    if order.status()? != OrderStatus::Placed || !order.payment_status()?.awaiting_payment() {
        return Ok(PaymentEventOutcome::Ignored);
    }

    diesel::update(orders::table.find(order_id))
        .set((
            orders::payment_status.eq(PaymentStatus::Failed.as_str()),
            orders::updated_at.eq(now),
        ))
        .execute(conn)
        .await?;
    info!(order_id = %order_id, reason = %reason, "Payment attempt failed");
    Ok(PaymentEventOutcome::FailureRecorded)
}

async fn refunded_in_tx(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    amount: &BigDecimal,
    now: DateTime<Utc>,
) -> Result<PaymentEventOutcome, EngineError> {
    let order = lock_order(conn, order_id).await?;
    if order.payment_status()? != PaymentStatus::Captured {
        warn!(order_id = %order_id, status = %order.payment_status, "Refund reported for an order that was not captured");
        return Ok(PaymentEventOutcome::Ignored);
    }

    diesel::update(orders::table.find(order_id))
        .set((
            orders::payment_status.eq(PaymentStatus::Refunded.as_str()),
            orders::updated_at.eq(now),
        ))
        .execute(conn)
        .await?;
    info!(order_id = %order_id, amount = %amount, "Refund completed");
    Ok(PaymentEventOutcome::RefundRecorded)
}
