use bigdecimal::BigDecimal;
use std::time::Duration;

use crate::delivery::ZoneFeeSchedule;

/// Kafka topics the engine publishes to and consumes from.
#[derive(Debug, Clone)]
pub struct Topics {
    pub payment_commands: String,
    pub payment_events: String,
    pub refund_requests: String,
    pub notifications: String,
    pub order_events: String,
    pub inventory_events: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            payment_commands: "payment-commands".to_string(),
            payment_events: "payment-events".to_string(),
            refund_requests: "refund-requests".to_string(),
            notifications: "notifications".to_string(),
            order_events: "order-events".to_string(),
            inventory_events: "inventory-events".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lifetime of a fresh reservation; must outlive an online checkout.
    pub reservation_ttl: Duration,
    pub reservation_sweep_interval: Duration,
    pub unaccepted_sweep_interval: Duration,
    /// How long an order may sit in PLACED before it is auto-cancelled.
    pub unaccepted_timeout: Duration,
    /// How long reservations are held while a mismatched capture is reviewed.
    pub manual_review_hold: Duration,
    pub sweep_batch_size: i64,
    pub cancellation_reason_min_len: usize,
    pub tax_rate: BigDecimal,
    pub currency: String,
    pub delivery: ZoneFeeSchedule,
    pub webhook_secret: Option<String>,
    pub topics: Topics,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::from_secs(30 * 60),
            reservation_sweep_interval: Duration::from_secs(60),
            unaccepted_sweep_interval: Duration::from_secs(5 * 60),
            unaccepted_timeout: Duration::from_secs(15 * 60),
            manual_review_hold: Duration::from_secs(24 * 60 * 60),
            sweep_batch_size: 200,
            cancellation_reason_min_len: 10,
            tax_rate: BigDecimal::from(0),
            currency: "INR".to_string(),
            delivery: ZoneFeeSchedule::default(),
            webhook_secret: None,
            topics: Topics::default(),
        }
    }
}

impl EngineConfig {
    pub fn reservation_ttl(&self) -> chrono::Duration {
        to_chrono(self.reservation_ttl)
    }

    pub fn unaccepted_timeout(&self) -> chrono::Duration {
        to_chrono(self.unaccepted_timeout)
    }

    pub fn manual_review_hold(&self) -> chrono::Duration {
        to_chrono(self.manual_review_hold)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
