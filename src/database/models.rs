//! Persisted entities shared by both store implementations.

use crate::payments::types::ProviderName;
use crate::services::state_machine::{OrderStatus, PaymentStatus};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuestContact {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Order {
    pub id: i64,
    pub reference: String,
    /// Registered customer; `None` for guest and walk-in orders.
    pub user_id: Option<Uuid>,
    pub guest: Option<GuestContact>,
    pub branch: String,
    pub subtotal: BigDecimal,
    pub tax: BigDecimal,
    pub total: BigDecimal,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_name: String,
    pub size: Option<String>,
    pub modifiers: Vec<String>,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub line_total: BigDecimal,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_name: String,
    pub size: Option<String>,
    pub modifiers: Vec<String>,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub line_total: BigDecimal,
}

/// Fully priced order ready for insertion. Totals are computed once by the
/// order service and stored as given.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub reference: String,
    pub user_id: Option<Uuid>,
    pub guest: Option<GuestContact>,
    pub branch: String,
    pub subtotal: BigDecimal,
    pub tax: BigDecimal,
    pub total: BigDecimal,
    pub items: Vec<NewOrderItem>,
}

/// Partial status write for an order. `expected_order_status` turns the write
/// into a compare-and-set.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderStatusUpdate {
    pub order_status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub expected_order_status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentRecord {
    pub id: i64,
    pub order_id: i64,
    pub provider: ProviderName,
    pub intent_id: String,
    pub link_id: Option<String>,
    pub external_reference: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_url: Option<String>,
    pub status: PaymentStatus,
    /// Raw provider payloads kept for audit.
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn matches_key(&self, key: &str) -> bool {
        self.intent_id == key
            || self.link_id.as_deref() == Some(key)
            || self.external_reference.as_deref() == Some(key)
    }
}

#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub order_id: i64,
    pub provider: ProviderName,
    pub intent_id: String,
    pub link_id: Option<String>,
    pub external_reference: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_url: Option<String>,
    pub metadata: JsonValue,
}

/// Result of applying a gateway-reported status under lock.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// No payment record carries the key.
    UnknownKey,
    /// A status moved; `record` and `order` are the post-write state.
    Applied {
        record: PaymentRecord,
        order: Order,
        previous: PaymentStatus,
    },
    /// Nothing moved (duplicate, terminal, or intermediate report).
    Unchanged { record: PaymentRecord, order: Order },
}

impl ApplyOutcome {
    pub fn state(&self) -> Option<(&PaymentRecord, &Order)> {
        match self {
            ApplyOutcome::UnknownKey => None,
            ApplyOutcome::Applied { record, order, .. } | ApplyOutcome::Unchanged { record, order } => {
                Some((record, order))
            }
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

/// Shallow merge of `update` into `base`. Non-object bases are replaced.
pub fn merge_metadata(base: &mut JsonValue, update: JsonValue) {
    match (base.as_object_mut(), update) {
        (Some(existing), JsonValue::Object(incoming)) => {
            for (key, value) in incoming {
                existing.insert(key, value);
            }
        }
        (_, JsonValue::Null) => {}
        (_, other) => *base = other,
    }
}
