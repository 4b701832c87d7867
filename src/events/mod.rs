use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the settlement flow and its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderReused(Uuid),
    OrderStageChanged {
        order_id: Uuid,
        old_stage: String,
        new_stage: String,
    },

    // Payment events
    PaymentIntentCreated {
        order_id: Uuid,
        gateway_order_id: String,
    },
    PaymentVerified(Uuid),
    PaymentVerificationFailed(Uuid),

    // Inventory events
    StockDecremented {
        variant_id: Uuid,
        quantity: i32,
    },
    StockDecrementFailed {
        order_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    },

    // Coupon events
    CouponRedeemed {
        coupon_id: Uuid,
        customer_id: Uuid,
        order_id: Uuid,
    },

    // Cart events
    CartCleared(Uuid),

    // Return events
    ReturnRequested(Uuid),
    ReturnStatusChanged {
        return_id: Uuid,
        old_status: String,
        new_status: String,
    },
}

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

    /// Fire-and-forget send: settlement side effects must never fail
    /// because an observer queue is full.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Drains the event channel, logging each event. Runs until every sender
/// is dropped at shutdown.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(?event, "event");
    }
    info!("Event channel closed; processor exiting");
}
