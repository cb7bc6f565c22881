use crate::payments::error::PaymentError;
use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Payment rails the shop accepts. `Cash` is settled at the counter and has no
/// provider client behind it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Paymongo,
    Xendit,
    Cash,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Paymongo => "paymongo",
            ProviderName::Xendit => "xendit",
            ProviderName::Cash => "cash",
        }
    }

    pub fn is_gateway(&self) -> bool {
        !matches!(self, ProviderName::Cash)
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "paymongo" => Ok(ProviderName::Paymongo),
            "xendit" => Ok(ProviderName::Xendit),
            "cash" => Ok(ProviderName::Cash),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Provider-reported status normalised to the three outcomes the
/// reconciliation engine understands. `Unknown` covers provider states we do
/// not recognise and is never treated as a failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Paid,
    Failed,
    Pending,
    Unknown,
}

impl GatewayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Paid => "paid",
            GatewayStatus::Failed => "failed",
            GatewayStatus::Pending => "pending",
            GatewayStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: BigDecimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        if self.amount <= BigDecimal::zero() {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }

    /// Amount in the currency's minor unit (centavos for PHP). Rejects amounts
    /// carrying more precision than two decimal places.
    pub fn to_minor_units(&self) -> Result<i64, PaymentError> {
        let scaled = &self.amount * BigDecimal::from(100);
        if !scaled.is_integer() {
            return Err(PaymentError::ValidationError {
                message: format!("amount {} has more than two decimal places", self.amount),
                field: Some("amount".to_string()),
            });
        }
        scaled.to_i64().ok_or_else(|| PaymentError::ValidationError {
            message: format!("amount {} is out of range", self.amount),
            field: Some("amount".to_string()),
        })
    }

    /// Amount in major units as a JSON number, for APIs that take decimals.
    /// Whole amounts are sent as integers.
    pub fn to_json_amount(&self) -> Result<JsonValue, PaymentError> {
        let minor = self.to_minor_units()?;
        if minor % 100 == 0 {
            return Ok(JsonValue::from(minor / 100));
        }
        serde_json::Number::from_f64(minor as f64 / 100.0)
            .map(JsonValue::Number)
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("amount {} is not representable", self.amount),
                field: Some("amount".to_string()),
            })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerContact {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Request to open a provider-side payment handle for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateIntentRequest {
    pub amount: Money,
    /// Our external reference for this attempt; echoed back by the provider.
    pub reference: String,
    pub description: String,
    pub customer: CustomerContact,
    pub success_url: Option<String>,
    pub failure_url: Option<String>,
    pub metadata: Option<JsonValue>,
}

/// Provider-side handle returned by a successful create call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentHandle {
    pub intent_id: String,
    pub link_id: Option<String>,
    pub external_reference: String,
    pub payment_url: String,
    pub provider_data: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: GatewayStatus,
    pub provider_status: Option<String>,
    pub provider_data: Option<JsonValue>,
}

impl StatusReport {
    pub fn unknown(provider_data: Option<JsonValue>) -> Self {
        Self {
            status: GatewayStatus::Unknown,
            provider_status: None,
            provider_data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

impl WebhookVerificationResult {
    pub fn accepted() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: ProviderName,
    pub event_type: String,
    /// Identifier the event is primarily keyed by (intent, link or invoice id).
    pub gateway_key: Option<String>,
    /// Our external reference, when the provider echoes it back.
    pub secondary_key: Option<String>,
    pub status: GatewayStatus,
    pub payload: JsonValue,
    pub received_at: String,
}
