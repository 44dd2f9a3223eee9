use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;

use crate::error::EngineError;

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = crate::schema::vendors)]
pub struct Vendor {
    pub id: Uuid,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub is_accepting_orders: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = crate::schema::products)]
pub struct Product {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub return_window_days: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = crate::schema::product_units)]
pub struct ProductUnit {
    pub id: Uuid,
    pub product_id: Uuid,
    pub label: String,
    pub price: BigDecimal,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::inventory)]
pub struct Inventory {
    pub id: Uuid,
    pub product_id: Uuid,
    pub available_quantity: BigDecimal,
    pub reserved_quantity: BigDecimal,
    pub low_stock_threshold: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Inventory {
    pub fn level(&self) -> StockLevel {
        StockLevel::new(
            self.available_quantity.clone(),
            self.reserved_quantity.clone(),
        )
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stock_reservations)]
pub struct StockReservation {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub reserved_quantity: BigDecimal,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockReservation {
    pub fn status(&self) -> Result<ReservationStatus, EngineError> {
        Ok(self.status.parse()?)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_reservations)]
pub struct NewStockReservation {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub reserved_quantity: BigDecimal,
    pub status: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = crate::schema::orders)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub buyer_id: Uuid,
    pub vendor_id: Uuid,
    pub delivery_partner_id: Option<Uuid>,
    pub delivery_address: serde_json::Value,
    pub subtotal: BigDecimal,
    pub delivery_fee: BigDecimal,
    pub discount_amount: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total_amount: BigDecimal,
    pub delivery_distance_km: BigDecimal,
    pub payment_mode: String,
    pub payment_status: String,
    pub payment_reference: Option<String>,
    pub captured_amount: Option<BigDecimal>,
    pub order_status: String,
    pub coupon_id: Option<Uuid>,
    #[serde(skip_serializing)]
    pub delivery_otp: String,
    pub is_cancellable: bool,
    pub requires_manual_review: bool,
    pub cancellation_reason: Option<String>,
    pub return_reason: Option<String>,
    pub placed_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub picked_at: Option<DateTime<Utc>>,
    pub packed_at: Option<DateTime<Utc>>,
    pub out_for_delivery_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn status(&self) -> Result<OrderStatus, EngineError> {
        Ok(self.order_status.parse()?)
    }

    pub fn payment_status(&self) -> Result<PaymentStatus, EngineError> {
        Ok(self.payment_status.parse()?)
    }

    pub fn payment_mode(&self) -> Result<PaymentMode, EngineError> {
        Ok(self.payment_mode.parse()?)
    }

    /// What was actually taken from the buyer.
    pub fn refundable_amount(&self) -> BigDecimal {
        self.captured_amount
            .clone()
            .unwrap_or_else(|| self.total_amount.clone())
    }

    pub fn parties(&self) -> Parties {
        Parties {
            buyer: Some(self.buyer_id),
            vendor: Some(self.vendor_id),
            delivery_partner: self.delivery_partner_id,
        }
    }

    pub fn totals(&self) -> OrderTotals {
        OrderTotals {
            subtotal: self.subtotal.clone(),
            delivery_fee: self.delivery_fee.clone(),
            discount_amount: self.discount_amount.clone(),
            tax_amount: self.tax_amount.clone(),
            total_amount: self.total_amount.clone(),
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub id: Uuid,
    pub order_number: String,
    pub buyer_id: Uuid,
    pub vendor_id: Uuid,
    pub delivery_address: serde_json::Value,
    pub subtotal: BigDecimal,
    pub delivery_fee: BigDecimal,
    pub discount_amount: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total_amount: BigDecimal,
    pub delivery_distance_km: BigDecimal,
    pub payment_mode: String,
    pub payment_status: String,
    pub order_status: String,
    pub coupon_id: Option<Uuid>,
    pub delivery_otp: String,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable, Identifiable, Serialize)]
#[diesel(table_name = crate::schema::order_items)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_unit_id: Uuid,
    pub product_name: String,
    pub unit_label: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub line_total: BigDecimal,
    pub return_window_days: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::coupons)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub discount_kind: String,
    pub discount_value: BigDecimal,
    pub max_discount: Option<BigDecimal>,
    pub min_order_value: BigDecimal,
    pub usage_limit: Option<i32>,
    pub per_user_limit: Option<i32>,
    pub used_count: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Coupon {
    pub fn terms(&self) -> Result<CouponTerms, EngineError> {
        Ok(CouponTerms {
            code: self.code.clone(),
            kind: self.discount_kind.parse()?,
            value: self.discount_value.clone(),
            max_discount: self.max_discount.clone(),
            min_order_value: self.min_order_value.clone(),
            usage_limit: self.usage_limit,
            per_user_limit: self.per_user_limit,
            used_count: self.used_count,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            is_active: self.is_active,
        })
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::coupon_usages)]
pub struct CouponUsage {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub discount_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl TryFrom<&EngineEvent> for NewOutboxEvent {
    type Error = serde_json::Error;

    fn try_from(event: &EngineEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id: event.aggregate_id(),
            event_type: event.event_type().to_string(),
            event_data: serde_json::to_value(event)?,
        })
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::processed_payment_events)]
pub struct ProcessedPaymentEvent {
    pub event_id: String,
    pub order_id: Uuid,
    pub processed_at: DateTime<Utc>,
}
