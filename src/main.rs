use anyhow::Context;
use sipline_backend::api::{self, AppState};
use sipline_backend::config::AppConfig;
use sipline_backend::database::{self, InMemoryStore, OrderPaymentStore, PgStore};
use sipline_backend::health::HealthChecker;
use sipline_backend::logging::init_tracing;
use sipline_backend::middleware::auth::TokenVerifier;
use sipline_backend::payments::factory::{PaymentFactoryConfig, PaymentProviderFactory};
use sipline_backend::services::{OrderService, ReconciliationEngine, WebhookProcessor};
use sipline_backend::workers::payment_sweeper::PaymentSweeperWorker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config.logging);
    config.validate().context("invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        skip_externals = config.server.skip_externals,
        "Starting Sipline backend service"
    );

    let store: Arc<dyn OrderPaymentStore> = match &config.database {
        Some(db_config) => {
            info!("Initializing database connection pool...");
            let pool = database::init_pool_from_config(db_config)
                .await
                .context("failed to initialize database pool")?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "Database connection pool initialized"
            );
            Arc::new(PgStore::new(pool))
        }
        None => {
            warn!("Using in-memory store (SKIP_EXTERNALS=true); data is lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let gateways = match PaymentProviderFactory::from_env() {
        Ok(factory) => factory,
        Err(e) if config.server.skip_externals => {
            warn!(error = %e, "No payment gateways configured; only cash settlement is available");
            PaymentProviderFactory::with_gateways(
                PaymentFactoryConfig::default().default_provider,
                Vec::new(),
            )
        }
        Err(e) => return Err(e).context("failed to initialize payment providers"),
    };
    info!(
        default_provider = %gateways.default_provider(),
        providers = ?gateways.list_available_providers(),
        "Payment providers initialized"
    );
    let gateways = Arc::new(gateways);

    let engine = Arc::new(ReconciliationEngine::new(
        store.clone(),
        gateways.clone(),
        config.payments.clone(),
    ));
    let orders = Arc::new(OrderService::new(store.clone(), config.orders.clone()));
    let webhooks = Arc::new(WebhookProcessor::new(gateways.clone(), engine.clone()));
    let health_checker = HealthChecker::new(store.clone(), gateways.clone());
    let token_verifier = Arc::new(TokenVerifier::new(&config.auth));

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let sweeper_handle = if config.sweeper.enabled {
        let worker = PaymentSweeperWorker::new(engine.clone(), config.sweeper.clone());
        Some(tokio::spawn(worker.run(worker_shutdown_rx)))
    } else {
        info!("Payment sweeper worker disabled (SWEEPER_ENABLED=false)");
        None
    };

    let app = api::router(AppState {
        engine,
        orders,
        webhooks,
        health_checker,
        token_verifier,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid HOST/PORT")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    info!(address = %addr, "Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await
        .context("server error")?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = sweeper_handle {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            error!("Timed out waiting for payment sweeper shutdown");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
