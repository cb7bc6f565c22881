//! Order and payment status model.
//!
//! `plan_transition` is the single place that decides what a gateway-reported
//! status does to a payment record and its order. Both stores call it while
//! holding their locks, so the decision and the write are atomic.

use crate::payments::types::GatewayStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Approved,
    Processing,
    Ready,
    OutForDelivery,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Approved => "approved",
            OrderStatus::Processing => "processing",
            OrderStatus::Ready => "ready",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::Approved),
            OrderStatus::Approved => Some(OrderStatus::Processing),
            OrderStatus::Processing => Some(OrderStatus::Ready),
            OrderStatus::Ready => Some(OrderStatus::OutForDelivery),
            OrderStatus::OutForDelivery => Some(OrderStatus::Completed),
            OrderStatus::Completed | OrderStatus::Cancelled => None,
        }
    }

    /// Staff moves: one step forward, `Ready -> Completed` for pickups, or
    /// cancellation of anything not yet terminal.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match target {
            OrderStatus::Cancelled => true,
            OrderStatus::Completed if *self == OrderStatus::Ready => true,
            _ => self.next() == Some(target),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "approved" => Ok(OrderStatus::Approved),
            "processing" => Ok(OrderStatus::Processing),
            "ready" => Ok(OrderStatus::Ready),
            "out_for_delivery" => Ok(OrderStatus::OutForDelivery),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// Writes required to apply one gateway report. `None` fields stay untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionPlan {
    pub record_status: Option<PaymentStatus>,
    pub order_payment_status: Option<PaymentStatus>,
    pub order_status: Option<OrderStatus>,
    /// Provider metadata is recorded even when no status moves.
    pub merge_metadata: bool,
}

impl TransitionPlan {
    pub fn changes_status(&self) -> bool {
        self.record_status.is_some()
            || self.order_payment_status.is_some()
            || self.order_status.is_some()
    }

    pub fn is_noop(&self) -> bool {
        !self.changes_status() && !self.merge_metadata
    }
}

/// Decides the effect of `reported` on a record currently in `record_status`
/// whose order is in (`order_payment_status`, `order_status`).
pub fn plan_transition(
    record_status: PaymentStatus,
    order_payment_status: PaymentStatus,
    order_status: OrderStatus,
    reported: GatewayStatus,
) -> TransitionPlan {
    if record_status == PaymentStatus::Paid {
        return TransitionPlan::default();
    }

    match reported {
        GatewayStatus::Paid if record_status == PaymentStatus::Pending => TransitionPlan {
            record_status: Some(PaymentStatus::Paid),
            order_payment_status: (order_payment_status != PaymentStatus::Paid)
                .then_some(PaymentStatus::Paid),
            order_status: (order_status == OrderStatus::Pending).then_some(OrderStatus::Approved),
            merge_metadata: true,
        },
        GatewayStatus::Failed if record_status == PaymentStatus::Pending => TransitionPlan {
            record_status: Some(PaymentStatus::Failed),
            order_payment_status: (order_payment_status == PaymentStatus::Pending)
                .then_some(PaymentStatus::Failed),
            order_status: None,
            merge_metadata: true,
        },
        GatewayStatus::Failed => TransitionPlan::default(),
        // A failed attempt stays failed; the report is kept for review.
        GatewayStatus::Paid | GatewayStatus::Pending | GatewayStatus::Unknown => TransitionPlan {
            merge_metadata: true,
            ..TransitionPlan::default()
        },
    }
}
