use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use shared::PaymentGatewayEvent;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::EngineError;
use crate::lifecycle::OrderLifecycle;

/// Applies gateway reports arriving on the payment events topic.
pub struct PaymentEventConsumer {
    lifecycle: Arc<OrderLifecycle>,
}

impl PaymentEventConsumer {
    pub fn new(lifecycle: Arc<OrderLifecycle>) -> Self {
        Self { lifecycle }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    if let Some(payload) = m.payload_view::<str>() {
                        match payload {
                            Ok(json_str) => match serde_json::from_str::<PaymentGatewayEvent>(json_str) {
                                Ok(event) => {
                                    if let Err(e) = self.handle(event).await {
                                        // Leave the offset uncommitted so the report is redelivered.
                                        error!("Error applying payment event: {}", e);
                                        continue;
                                    }
                                }
                                Err(e) => warn!("Skipping malformed payment event: {}", e),
                            },
                            Err(e) => error!("Error parsing payload: {}", e),
                        }
                    }
                    if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                        error!("Error committing message: {}", e);
                    }
                }
                Err(e) => error!("Error receiving message: {}", e),
            }
        }
    }

    /// Business rejections are final and acknowledged; only transient
    /// failures ask for redelivery.
    async fn handle(&self, event: PaymentGatewayEvent) -> Result<(), EngineError> {
        let event_id = event.event_id.clone();
        match self.lifecycle.handle_payment_event(event).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                warn!(event_id = %event_id, "Payment event rejected: {}", e);
                Ok(())
            }
        }
    }
}
