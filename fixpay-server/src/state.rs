//! Shared handler state

use fixpay_payments::{PaymentService, Reconciler};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PaymentService>,
    pub reconciler: Arc<Reconciler>,
    /// Upper bound on answering a gateway callback
    pub webhook_timeout: Duration,
}

impl AppState {
    pub fn new(
        service: Arc<PaymentService>,
        reconciler: Arc<Reconciler>,
        webhook_timeout: Duration,
    ) -> Self {
        Self {
            service,
            reconciler,
            webhook_timeout,
        }
    }
}
