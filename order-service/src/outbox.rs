use anyhow::Result;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::EngineEvent;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info};

use crate::config::Topics;
use crate::error::EngineError;
use crate::models::*;
use crate::schema::*;
use crate::DbPool;

const BATCH_SIZE: i64 = 100;

/// Records `event` in the caller's transaction; it is published only if that
/// transaction commits.
pub async fn enqueue(conn: &mut AsyncPgConnection, event: &EngineEvent) -> Result<(), EngineError> {
    let row = NewOutboxEvent::try_from(event)?;
    diesel::insert_into(outbox_events::table)
        .values(&row)
        .execute(conn)
        .await?;
    debug!(event_type = %row.event_type, aggregate_id = %row.aggregate_id, "Queued outbox event");
    Ok(())
}

pub struct OutboxProcessor {
    pool: DbPool,
    producer: FutureProducer,
    topics: Topics,
    interval: Duration,
}

impl OutboxProcessor {
    pub fn new(pool: DbPool, producer: FutureProducer, topics: Topics) -> Self {
        Self {
            pool,
            producer,
            topics,
            interval: Duration::from_secs(5),
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.process_outbox_events().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    async fn process_outbox_events(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;

        let unprocessed_events = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(BATCH_SIZE)
            .load::<DbOutboxEvent>(&mut conn)
            .await?;

        for event in unprocessed_events {
            if let Err(e) = self.publish_event(&event).await {
                // Stop here so later events for the same aggregate keep their order.
                error!("Failed to publish event {}: {}", event.id, e);
                break;
            }

            diesel::update(outbox_events::table.find(event.id))
                .set(outbox_events::processed.eq(true))
                .execute(&mut conn)
                .await?;

            info!(event_type = %event.event_type, "Published outbox event: {}", event.id);
        }

        Ok(())
    }

    async fn publish_event(&self, event: &DbOutboxEvent) -> Result<()> {
        let topic = topic_for(&self.topics, &event.event_type);
        let json = serde_json::to_string(&event.event_data)?;
        let key = event.aggregate_id.to_string();
        let record = FutureRecord::to(topic).payload(&json).key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

        Ok(())
    }
}

fn topic_for<'a>(topics: &'a Topics, event_type: &str) -> &'a str {
    match event_type {
        "PaymentSessionRequested" => &topics.payment_commands,
        "RefundRequested" => &topics.refund_requests,
        "DeliveryOtpIssued" => &topics.notifications,
        "LowStock" => &topics.inventory_events,
        _ => &topics.order_events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_routing() {
        let topics = Topics::default();
        assert_eq!(topic_for(&topics, "PaymentSessionRequested"), "payment-commands");
        assert_eq!(topic_for(&topics, "RefundRequested"), "refund-requests");
        assert_eq!(topic_for(&topics, "DeliveryOtpIssued"), "notifications");
        assert_eq!(topic_for(&topics, "LowStock"), "inventory-events");
        assert_eq!(topic_for(&topics, "OrderStatusChanged"), "order-events");
    }
}
