//! Services module for business logic

pub mod order_service;
pub mod reconciliation;
pub mod state_machine;
pub mod webhook_processor;

pub use order_service::{OrderService, PlaceOrderCommand};
pub use reconciliation::{
    CashSettlement, CreatePaymentCommand, PaymentAttempt, PaymentState, ReconciliationEngine,
    VerifyLookup,
};
pub use state_machine::{OrderStatus, PaymentStatus};
pub use webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};
