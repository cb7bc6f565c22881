//! Payment provider integrations.
//!
//! Everything provider-specific lives behind [`provider::PaymentGateway`];
//! the reconciliation engine never sees provider wire formats.

pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use factory::{PaymentFactoryConfig, PaymentProviderFactory};
pub use provider::PaymentGateway;
pub use types::{
    CreateIntentRequest, CustomerContact, GatewayStatus, IntentHandle, Money, ProviderName,
    StatusReport, WebhookEvent, WebhookVerificationResult,
};
