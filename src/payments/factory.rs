use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{PaymongoProvider, XenditProvider};
use crate::payments::types::ProviderName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PaymentFactoryConfig {
    pub default_provider: ProviderName,
    pub enabled_providers: Vec<ProviderName>,
}

impl Default for PaymentFactoryConfig {
    fn default() -> Self {
        Self {
            default_provider: ProviderName::Paymongo,
            enabled_providers: vec![ProviderName::Paymongo, ProviderName::Xendit],
        }
    }
}

impl PaymentFactoryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let default_provider =
            std::env::var("DEFAULT_PAYMENT_PROVIDER").unwrap_or_else(|_| "paymongo".to_string());
        let default_provider = ProviderName::from_str(&default_provider)?;

        let enabled_raw = std::env::var("ENABLED_PAYMENT_PROVIDERS")
            .unwrap_or_else(|_| "paymongo,xendit".to_string());
        let mut enabled_providers = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let provider = ProviderName::from_str(value)?;
            if !provider.is_gateway() {
                return Err(PaymentError::ValidationError {
                    message: format!("{} is not a gateway provider", provider),
                    field: Some("ENABLED_PAYMENT_PROVIDERS".to_string()),
                });
            }
            if !enabled_providers.contains(&provider) {
                enabled_providers.push(provider);
            }
        }

        let config = Self {
            default_provider,
            enabled_providers,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PaymentResult<()> {
        if !self.enabled_providers.contains(&self.default_provider) {
            return Err(PaymentError::ValidationError {
                message: "default provider must be enabled".to_string(),
                field: Some("DEFAULT_PAYMENT_PROVIDER".to_string()),
            });
        }
        Ok(())
    }
}

/// Registry of constructed gateway clients, keyed by provider. Clients are
/// built once at startup and shared by the API, webhook and sweeper paths.
pub struct PaymentProviderFactory {
    default_provider: ProviderName,
    gateways: HashMap<ProviderName, Arc<dyn PaymentGateway>>,
}

impl PaymentProviderFactory {
    pub fn from_env() -> PaymentResult<Self> {
        Self::from_config(PaymentFactoryConfig::from_env()?)
    }

    /// Builds every enabled provider from its environment configuration.
    /// Providers whose credentials are missing are skipped with a warning
    /// unless they are the default.
    pub fn from_config(config: PaymentFactoryConfig) -> PaymentResult<Self> {
        config.validate()?;
        let mut gateways: HashMap<ProviderName, Arc<dyn PaymentGateway>> = HashMap::new();

        for provider in &config.enabled_providers {
            let built: PaymentResult<Arc<dyn PaymentGateway>> = match provider {
                ProviderName::Paymongo => {
                    PaymongoProvider::from_env().map(|p| Arc::new(p) as Arc<dyn PaymentGateway>)
                }
                ProviderName::Xendit => {
                    XenditProvider::from_env().map(|p| Arc::new(p) as Arc<dyn PaymentGateway>)
                }
                ProviderName::Cash => continue,
            };

            match built {
                Ok(gateway) => {
                    info!(provider = %provider, "payment provider initialized");
                    gateways.insert(*provider, gateway);
                }
                Err(e) if *provider != config.default_provider => {
                    warn!(provider = %provider, error = %e, "payment provider disabled");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            default_provider: config.default_provider,
            gateways,
        })
    }

    pub fn with_gateways(
        default_provider: ProviderName,
        gateways: Vec<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let gateways = gateways
            .into_iter()
            .map(|gateway| (gateway.name(), gateway))
            .collect();
        Self {
            default_provider,
            gateways,
        }
    }

    pub fn get_provider(&self, provider: ProviderName) -> PaymentResult<Arc<dyn PaymentGateway>> {
        if !provider.is_gateway() {
            return Err(PaymentError::ValidationError {
                message: "cash payments are recorded by staff, not through a gateway".to_string(),
                field: Some("provider".to_string()),
            });
        }
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("provider {} is disabled", provider),
                field: Some("provider".to_string()),
            })
    }

    pub fn get_default_provider(&self) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.get_provider(self.default_provider)
    }

    pub fn default_provider(&self) -> ProviderName {
        self.default_provider
    }

    /// Finds the provider whose webhook credential header is present.
    pub fn detect_by_header(
        &self,
        headers: &axum::http::HeaderMap,
    ) -> Option<Arc<dyn PaymentGateway>> {
        let mut providers: Vec<_> = self.gateways.values().collect();
        providers.sort_by_key(|g| g.name().as_str());
        providers
            .into_iter()
            .find(|g| headers.contains_key(g.signature_header()))
            .cloned()
    }

    pub fn list_available_providers(&self) -> Vec<ProviderName> {
        let mut providers: Vec<_> = self.gateways.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::providers::{PaymongoConfig, XenditConfig};

    fn factory() -> PaymentProviderFactory {
        let paymongo = PaymongoProvider::new(PaymongoConfig {
            secret_key: "sk_test_x".to_string(),
            webhook_secret: Some("whsk_x".to_string()),
            ..PaymongoConfig::default()
        })
        .expect("paymongo init");
        let xendit = XenditProvider::new(XenditConfig {
            secret_key: "xnd_x".to_string(),
            callback_token: "tok".to_string(),
            ..XenditConfig::default()
        })
        .expect("xendit init");
        PaymentProviderFactory::with_gateways(
            ProviderName::Paymongo,
            vec![Arc::new(paymongo), Arc::new(xendit)],
        )
    }

    #[test]
    fn provider_name_parsing_works() {
        assert!(matches!(
            ProviderName::from_str("PayMongo"),
            Ok(ProviderName::Paymongo)
        ));
        assert!(ProviderName::from_str("paystack").is_err());
    }

    #[test]
    fn cash_is_never_a_gateway() {
        let factory = factory();
        assert!(matches!(
            factory.get_provider(ProviderName::Cash),
            Err(PaymentError::ValidationError { .. })
        ));
    }

    #[test]
    fn default_must_be_enabled() {
        let config = PaymentFactoryConfig {
            default_provider: ProviderName::Xendit,
            enabled_providers: vec![ProviderName::Paymongo],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn webhook_provider_detected_from_header() {
        let factory = factory();
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-callback-token", "tok".parse().unwrap());
        let detected = factory.detect_by_header(&headers).expect("xendit detected");
        assert_eq!(detected.name(), ProviderName::Xendit);

        let empty = axum::http::HeaderMap::new();
        assert!(factory.detect_by_header(&empty).is_none());
    }

    #[test]
    fn list_available_providers_returns_built() {
        let providers = factory().list_available_providers();
        assert_eq!(providers, vec![ProviderName::Paymongo, ProviderName::Xendit]);
    }
}
