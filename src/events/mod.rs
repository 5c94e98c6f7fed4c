use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::entities::payment_transaction::ProviderKind;

/// Cloneable handle for publishing domain events
#[derive(Clone, Debug)]
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

    /// Sends an event, logging instead of failing when the processor is gone.
    ///
    /// Used after a transaction has committed, where the caller cannot undo anything.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event dropped");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        total: Decimal,
        customer_phone: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        order_number: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PromoCodeRedeemed {
        promo_code_id: Uuid,
        code: String,
        order_id: Uuid,
        discount_amount: Decimal,
    },
    PaymentInitiated {
        transaction_id: Uuid,
        order_id: Uuid,
        provider: ProviderKind,
        amount: Decimal,
    },
    PaymentCompleted {
        transaction_id: Uuid,
        order_id: Uuid,
        provider: ProviderKind,
        amount: Decimal,
    },
    PaymentFailed {
        transaction_id: Uuid,
        order_id: Uuid,
        provider: ProviderKind,
        reason: Option<String>,
    },
}

impl Event {
    /// Customer-facing notification text, if the event warrants one
    pub fn notification(&self) -> Option<String> {
        match self {
            Event::OrderCreated {
                order_number,
                total,
                ..
            } => Some(format!(
                "Thank you for shopping with Household Planet Kenya. Order {} received, total KES {}.",
                order_number, total
            )),
            Event::OrderStatusChanged {
                order_number,
                new_status,
                ..
            } => Some(format!("Order {} is now {}.", order_number, new_status)),
            Event::PaymentCompleted { amount, .. } => {
                Some(format!("Payment of KES {} received.", amount))
            }
            Event::PaymentFailed { reason, .. } => Some(format!(
                "Your payment could not be completed{}. Please try again.",
                reason
                    .as_deref()
                    .map(|r| format!(": {}", r))
                    .unwrap_or_default()
            )),
            Event::PromoCodeRedeemed { .. } | Event::PaymentInitiated { .. } => None,
        }
    }
}

/// Drains the event channel until every sender is dropped
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                customer_phone,
                ..
            } => {
                info!(%order_id, recipient = %customer_phone, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
                ..
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::PromoCodeRedeemed {
                code,
                order_id,
                discount_amount,
                ..
            } => {
                info!(%code, %order_id, %discount_amount, "promo code redeemed");
            }
            Event::PaymentInitiated {
                transaction_id,
                provider,
                amount,
                ..
            } => {
                info!(%transaction_id, %provider, %amount, "payment initiated");
            }
            Event::PaymentCompleted {
                transaction_id,
                order_id,
                provider,
                amount,
            } => {
                info!(%transaction_id, %order_id, %provider, %amount, "payment completed");
            }
            Event::PaymentFailed {
                transaction_id,
                order_id,
                provider,
                reason,
            } => {
                error!(%transaction_id, %order_id, %provider, reason = ?reason, "payment failed");
            }
        }

        if let Some(message) = event.notification() {
            info!(target: "notifications", %message, "customer notification queued");
        }
    }

    info!("Event processing loop stopped");
}
