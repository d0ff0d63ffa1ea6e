//! Typed domain events carried on per-area pub/sub channels.
//!
//! # Architecture
//!
//! ```text
//! mutation handler ──► CacheSystem::record_mutation(&event)
//!                         ├─ invalidate event.affected_tags()
//!                         └─ PUBLISH stockpile:events:<area> {type, timestamp, ..}
//!                                             │
//!                          other instances ◄──┘  EventPublisher::subscribe::<E>()
//! ```
//!
//! Delivery is best-effort: a subscriber that is not connected when an event
//! is published never sees it.

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::StoreClient;
use crate::cache::bus::unix_millis;
use crate::cache::tags::names;

/// Pub/sub channel names.
pub mod channels {
    pub const INVENTORY: &str = "stockpile:events:inventory";
    pub const ORDERS: &str = "stockpile:events:orders";
    pub const FINANCE: &str = "stockpile:events:finance";
}

/// An event describing a mutation in one business area.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + 'static {
    /// Channel the event is published on.
    const CHANNEL: &'static str;

    /// Cache tags made stale by the mutation this event describes.
    fn affected_tags(&self) -> Vec<String>;
}

/// Wire form of a domain event: the event's own fields plus a `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    #[serde(flatten)]
    pub event: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(event: E) -> Self {
        Self {
            timestamp: unix_millis(),
            event,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InventoryEvent {
    StockAdjusted {
        product_id: String,
        warehouse_id: Option<String>,
        delta: i64,
        quantity: i64,
    },
    LowStock {
        product_id: String,
        quantity: i64,
        threshold: i64,
    },
    ProductUpdated {
        product_id: String,
    },
}

impl DomainEvent for InventoryEvent {
    const CHANNEL: &'static str = channels::INVENTORY;

    fn affected_tags(&self) -> Vec<String> {
        match self {
            InventoryEvent::StockAdjusted { .. } => vec![names::INVENTORY.to_string()],
            // Notification only; stock levels were cleared by the adjustment.
            InventoryEvent::LowStock { .. } => Vec::new(),
            InventoryEvent::ProductUpdated { .. } => vec![names::PRODUCTS.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OrderEvent {
    Created {
        order_id: String,
        customer_id: String,
        total_cents: i64,
    },
    StatusChanged {
        order_id: String,
        from: String,
        to: String,
    },
    Cancelled {
        order_id: String,
        reason: Option<String>,
    },
}

impl DomainEvent for OrderEvent {
    const CHANNEL: &'static str = channels::ORDERS;

    fn affected_tags(&self) -> Vec<String> {
        vec![names::ORDERS.to_string()]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum FinanceEvent {
    PaymentRecorded {
        payment_id: String,
        order_id: Option<String>,
        amount_cents: i64,
    },
    PaymentRefunded {
        payment_id: String,
        amount_cents: i64,
    },
    InvoiceIssued {
        invoice_id: String,
        order_id: Option<String>,
        amount_cents: i64,
    },
}

impl DomainEvent for FinanceEvent {
    const CHANNEL: &'static str = channels::FINANCE;

    fn affected_tags(&self) -> Vec<String> {
        match self {
            FinanceEvent::PaymentRecorded { .. } | FinanceEvent::PaymentRefunded { .. } => {
                vec![names::PAYMENTS.to_string()]
            }
            FinanceEvent::InvoiceIssued { .. } => vec![names::FINANCE.to_string()],
        }
    }
}

/// Publishes and subscribes to domain events over the shared store.
#[derive(Clone)]
pub struct EventPublisher {
    store: StoreClient,
}

impl EventPublisher {
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }

    /// Publish `event` on its channel, stamped with the current time.
    pub async fn publish<E: DomainEvent>(&self, event: &E) {
        let envelope = EventEnvelope::new(event);
        self.store.publish_json(E::CHANNEL, &envelope).await;
    }

    /// Stream of events of type `E`. Undecodable payloads are logged and skipped.
    ///
    /// Returns `None` if the store refused the subscription.
    pub async fn subscribe<E: DomainEvent>(&self) -> Option<BoxStream<'static, EventEnvelope<E>>> {
        let subscription = self.store.subscribe(E::CHANNEL).await?;
        let events = subscription.into_stream().filter_map(|payload| async move {
            match serde_json::from_str::<EventEnvelope<E>>(&payload) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    warn!(channel = E::CHANNEL, error = %e, "failed to parse domain event");
                    None
                }
            }
        });
        Some(events.boxed())
    }
}
