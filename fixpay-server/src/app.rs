//! Application assembly and serving

use crate::config::AppConfig;
use crate::error::ServerError;
use crate::routes;
use crate::state::AppState;
use axum::Router;
use fixpay_payments::{
    CallbackVerifier, HttpOrderClient, InMemoryOrderDirectory, InMemoryPaymentStore,
    MidtransGateway, OrderCollaborator, PaymentGateway, PaymentService, Reconciler,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Wire the payment service from configuration
pub fn build_state(config: &AppConfig) -> Result<AppState, ServerError> {
    let gateway = MidtransGateway::new(config.gateway_config())?;

    let orders: Arc<dyn OrderCollaborator> = match &config.orders.base_url {
        Some(url) => Arc::new(HttpOrderClient::new(url.as_str(), config.order_timeout())?),
        None => {
            warn!("No order service configured, using an empty in-process order directory");
            Arc::new(InMemoryOrderDirectory::new())
        }
    };

    Ok(build_state_with(config, Arc::new(gateway), orders))
}

/// Wire the payment service around given collaborators
pub fn build_state_with(
    config: &AppConfig,
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<dyn OrderCollaborator>,
) -> AppState {
    let verifier = CallbackVerifier::new(
        config.gateway.server_key.clone(),
        config.gateway.signature_scheme,
    );
    let service = Arc::new(
        PaymentService::new(
            Arc::new(InMemoryPaymentStore::new()),
            gateway,
            orders,
            verifier,
        )
        .with_options(config.service_options()),
    );
    let reconciler = Arc::new(Reconciler::new(service.clone(), config.reconcile_config()));

    AppState::new(service, reconciler, config.webhook_timeout())
}

pub fn router(state: AppState) -> Router {
    routes::routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind, start reconciliation and serve until a shutdown signal arrives
pub async fn serve(config: AppConfig) -> Result<(), ServerError> {
    let state = build_state(&config)?;
    let reconciler = state.reconciler.clone();

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(
        address = %listener.local_addr()?,
        gateway = state.service.gateway_name(),
        production = config.gateway.production,
        "fixpay server listening"
    );

    if config.reconcile.enabled {
        reconciler.start().await?;
    } else {
        info!("Reconciliation disabled");
    }

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if reconciler.is_running().await {
        reconciler.stop().await?;
    }
    served?;

    info!("fixpay server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Could not listen for SIGTERM");
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
    info!("Shutdown signal received");
}
