use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::OrderStatus;

/// Side effects the engine hands to collaborators through the outbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    PaymentSessionRequested {
        order_id: Uuid,
        request_id: Uuid,
        amount: BigDecimal,
        currency: String,
    },
    RefundRequested {
        order_id: Uuid,
        amount: BigDecimal,
        reason: String,
    },
    DeliveryOtpIssued {
        order_id: Uuid,
        buyer_id: Uuid,
        otp: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        from: Option<OrderStatus>,
        to: OrderStatus,
        actor: String,
        at: DateTime<Utc>,
    },
    LowStock {
        product_id: Uuid,
        available: BigDecimal,
        threshold: BigDecimal,
    },
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::PaymentSessionRequested { .. } => "PaymentSessionRequested",
            EngineEvent::RefundRequested { .. } => "RefundRequested",
            EngineEvent::DeliveryOtpIssued { .. } => "DeliveryOtpIssued",
            EngineEvent::OrderStatusChanged { .. } => "OrderStatusChanged",
            EngineEvent::LowStock { .. } => "LowStock",
        }
    }

    pub fn aggregate_id(&self) -> Uuid {
        match self {
            EngineEvent::PaymentSessionRequested { order_id, .. }
            | EngineEvent::RefundRequested { order_id, .. }
            | EngineEvent::DeliveryOtpIssued { order_id, .. }
            | EngineEvent::OrderStatusChanged { order_id, .. } => *order_id,
            EngineEvent::LowStock { product_id, .. } => *product_id,
        }
    }
}

/// A report from the payment gateway adapter, delivered over Kafka or the
/// webhook endpoint. `event_id` is the adapter's idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentGatewayEvent {
    pub event_id: String,
    pub order_id: Uuid,
    #[serde(flatten)]
    pub report: PaymentReport,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentReport {
    SessionCreated {
        session_id: String,
        expires_at: Option<DateTime<Utc>>,
    },
    Captured {
        payment_reference: String,
        amount: BigDecimal,
    },
    Failed {
        reason: String,
    },
    Refunded {
        amount: BigDecimal,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_gateway_event_wire_format() {
        let order_id = Uuid::new_v4();
        let raw = serde_json::json!({
            "event_id": "evt_1",
            "order_id": order_id,
            "type": "captured",
            "payment_reference": "pay_9",
            "amount": "480.00",
            "occurred_at": "2026-01-05T10:00:00Z",
        });

        let event: PaymentGatewayEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.order_id, order_id);
        match event.report {
            PaymentReport::Captured { amount, payment_reference } => {
                assert_eq!(amount, BigDecimal::from_str("480").unwrap());
                assert_eq!(payment_reference, "pay_9");
            }
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[test]
    fn test_engine_event_is_tagged() {
        let order_id = Uuid::new_v4();
        let event = EngineEvent::RefundRequested {
            order_id,
            amount: BigDecimal::from(10),
            reason: "buyer cancelled".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RefundRequested");
        assert_eq!(event.aggregate_id(), order_id);
    }
}
