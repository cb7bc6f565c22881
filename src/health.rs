//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::database::repository::OrderPaymentStore;
use crate::payments::factory::PaymentProviderFactory;

const STORE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn OrderPaymentStore>,
    gateways: Arc<PaymentProviderFactory>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn OrderPaymentStore>, gateways: Arc<PaymentProviderFactory>) -> Self {
        Self { store, gateways }
    }

    /// The store is required; a missing gateway only degrades the service
    /// since cash settlement still works.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut store_up = true;

        match timeout(STORE_CHECK_TIMEOUT, check_store_health(self.store.as_ref())).await {
            Ok(Ok(response_time)) => {
                health_status
                    .checks
                    .insert("store".to_string(), ComponentHealth::up(Some(response_time)));
                info!("Store health check: OK ({}ms)", response_time);
            }
            Ok(Err(e)) => {
                store_up = false;
                health_status
                    .checks
                    .insert("store".to_string(), ComponentHealth::down(Some(e)));
                error!("Store health check failed");
            }
            Err(_) => {
                store_up = false;
                health_status.checks.insert(
                    "store".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!("Store health check timed out");
            }
        }

        let providers = self.gateways.list_available_providers();
        let gateways_up = !providers.is_empty();
        let gateway_health = if gateways_up {
            let names: Vec<&str> = providers.iter().map(|p| p.as_str()).collect();
            ComponentHealth {
                status: ComponentState::Up,
                response_time_ms: None,
                details: Some(names.join(",")),
            }
        } else {
            warn!("No payment gateways configured");
            ComponentHealth::warning(None, Some("no payment gateways configured".to_string()))
        };
        health_status
            .checks
            .insert("payment_gateways".to_string(), gateway_health);

        health_status.status = match (store_up, gateways_up) {
            (false, _) => HealthState::Unhealthy,
            (true, false) => HealthState::Degraded,
            (true, true) => HealthState::Healthy,
        };

        health_status
    }
}

pub async fn check_store_health(store: &dyn OrderPaymentStore) -> Result<u128, String> {
    let start = Instant::now();
    store
        .health_check()
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| e.to_string())
}
