use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Domain writes have already committed by the time events go out.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Domain events emitted by the storefront services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CartItemAdded {
        identity_id: String,
        product_id: Uuid,
        quantity: i32,
    },
    CartsMerged {
        from_identity: String,
        into_identity: String,
        lines: usize,
    },
    CheckoutIntentCreated {
        session_id: Uuid,
        payment_intent_id: String,
        amount: Decimal,
    },
    PaymentFailed {
        session_id: Uuid,
        payment_intent_id: String,
        reason: String,
    },
    DiscountRedeemed {
        code: String,
        order_id: Uuid,
        amount: Decimal,
    },
    OrderPlaced {
        order_id: Uuid,
        order_number: String,
        identity_id: String,
        total: Decimal,
    },
    OrderPersistFailed {
        payment_intent_id: String,
        identity_id: String,
        amount: Decimal,
        reason: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderRefunded {
        order_id: Uuid,
        amount: Decimal,
    },
    LowStock {
        product_id: Uuid,
        remaining: i32,
    },
    CheckoutSessionsExpired {
        count: usize,
        at: DateTime<Utc>,
    },
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderPlaced {
                order_id,
                order_number,
                identity_id,
                total,
            } => {
                info!(%order_id, %order_number, %identity_id, %total, "Order placed");
            }
            Event::OrderPersistFailed {
                payment_intent_id,
                identity_id,
                amount,
                reason,
            } => {
                error!(
                    %payment_intent_id,
                    %identity_id,
                    %amount,
                    %reason,
                    "Payment confirmed without an order; manual reconciliation required"
                );
            }
            Event::PaymentFailed {
                session_id,
                payment_intent_id,
                reason,
            } => {
                warn!(%session_id, %payment_intent_id, %reason, "Payment failed");
            }
            Event::LowStock {
                product_id,
                remaining,
            } => {
                warn!(%product_id, remaining, "Low inventory");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "Order status changed");
            }
            other => {
                info!(event = ?other, "Domain event");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        drop(rx);

        let result = sender
            .send(Event::LowStock {
                product_id: Uuid::new_v4(),
                remaining: 1,
            })
            .await;
        assert!(result.is_err());

        // does not panic or propagate
        sender
            .send_or_log(Event::OrderRefunded {
                order_id: Uuid::new_v4(),
                amount: Decimal::ONE,
            })
            .await;
    }

    #[tokio::test]
    async fn processing_loop_ends_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(process_events(rx));
        EventSender::new(tx.clone())
            .send(Event::CheckoutSessionsExpired {
                count: 2,
                at: Utc::now(),
            })
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();
    }
}
