//! Route table

use crate::handlers;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};

/// Payment API and webhook
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/payments",
            post(handlers::create_payment).get(handlers::list_payments),
        )
        .route("/payments/callback", post(handlers::payment_callback))
        .route("/payments/invoice/:invoice_number", get(handlers::payment_by_invoice))
        .route("/payments/order/:order_id", get(handlers::payments_by_order))
        .route("/payments/:id", get(handlers::get_payment))
        .route("/payments/:id/history", get(handlers::payment_history))
        .route("/payments/:id/invoice", get(handlers::payment_invoice))
        .route("/payments/:id/process", post(handlers::process_payment))
        .route("/payments/:id/refund", post(handlers::refund_payment))
}

/// Manual review and reconciliation
pub fn operator_routes() -> Router<AppState> {
    Router::new()
        .route("/payments/anomalies", get(handlers::list_anomalies))
        .route("/payments/reconcile", post(handlers::reconcile_now))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(health_routes())
        .merge(payment_routes())
        .merge(operator_routes())
}
