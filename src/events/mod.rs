use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
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

    /// Creates a bounded channel and returns both ends
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event after a committed write. Delivery failures are logged
    /// and never surface to the caller.
    pub async fn publish(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            metrics::counter!("returns_engine_event_send_failures_total", 1, "event" => name);
            warn!(event = name, error = %e, "Failed to publish domain event");
        }
    }
}

/// Domain events raised by return, refund and exchange workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ReturnOpened {
        return_id: Uuid,
        order_id: Uuid,
        return_number: String,
        degraded_barcodes: bool,
    },
    ReturnQualityChecked {
        return_id: Uuid,
        passed: bool,
    },
    ReturnApproved {
        return_id: Uuid,
        total_refund_amount: Decimal,
    },
    ReturnRejected {
        return_id: Uuid,
        reason: String,
    },
    ReturnProcessed {
        return_id: Uuid,
        inventory_restored: bool,
    },
    ReturnCompleted {
        return_id: Uuid,
    },
    InventoryRestored {
        return_id: Uuid,
        units_restored: i64,
        warnings: Vec<String>,
    },
    RefundAllocated {
        return_id: Uuid,
        refund_ids: Vec<Uuid>,
        amount: Decimal,
    },
    RefundStatusChanged {
        return_id: Uuid,
        refund_id: Uuid,
        status: String,
    },
    ReturnRefunded {
        return_id: Uuid,
    },
    ExchangeStepCompleted {
        return_id: Uuid,
        step: String,
    },
    ExchangeLinked {
        return_id: Uuid,
        new_order_id: Uuid,
        net_amount: Decimal,
    },
    ExchangeFailed {
        return_id: Uuid,
        refund_id: Uuid,
        stage: String,
        reason: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ReturnOpened { .. } => "return_opened",
            Event::ReturnQualityChecked { .. } => "return_quality_checked",
            Event::ReturnApproved { .. } => "return_approved",
            Event::ReturnRejected { .. } => "return_rejected",
            Event::ReturnProcessed { .. } => "return_processed",
            Event::ReturnCompleted { .. } => "return_completed",
            Event::InventoryRestored { .. } => "inventory_restored",
            Event::RefundAllocated { .. } => "refund_allocated",
            Event::RefundStatusChanged { .. } => "refund_status_changed",
            Event::ReturnRefunded { .. } => "return_refunded",
            Event::ExchangeStepCompleted { .. } => "exchange_step_completed",
            Event::ExchangeLinked { .. } => "exchange_linked",
            Event::ExchangeFailed { .. } => "exchange_failed",
        }
    }

    pub fn return_id(&self) -> Uuid {
        match self {
            Event::ReturnOpened { return_id, .. }
            | Event::ReturnQualityChecked { return_id, .. }
            | Event::ReturnApproved { return_id, .. }
            | Event::ReturnRejected { return_id, .. }
            | Event::ReturnProcessed { return_id, .. }
            | Event::ReturnCompleted { return_id }
            | Event::InventoryRestored { return_id, .. }
            | Event::RefundAllocated { return_id, .. }
            | Event::RefundStatusChanged { return_id, .. }
            | Event::ReturnRefunded { return_id }
            | Event::ExchangeStepCompleted { return_id, .. }
            | Event::ExchangeLinked { return_id, .. }
            | Event::ExchangeFailed { return_id, .. } => *return_id,
        }
    }
}

/// Consumes domain events until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let name = event.name();
        metrics::counter!("returns_engine_events_total", 1, "event" => name);

        match &event {
            Event::ExchangeFailed {
                return_id,
                refund_id,
                stage,
                reason,
            } => {
                warn!(
                    %return_id,
                    %refund_id,
                    stage = %stage,
                    reason = %reason,
                    "Exchange stalled after refund settlement"
                );
            }
            Event::InventoryRestored { warnings, .. } if !warnings.is_empty() => {
                warn!(
                    return_id = %event.return_id(),
                    warnings = ?warnings,
                    "Inventory restored with warnings"
                );
            }
            _ => {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                info!(event = name, return_id = %event.return_id(), payload = %payload, "Domain event");
            }
        }
    }

    info!("Event processing loop stopped");
}
