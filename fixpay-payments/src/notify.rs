//! Settlement side effects

use crate::error::PaymentResult;
use crate::orders::OrderCollaborator;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::types::Payment;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Receives settled payments for customer-facing notification
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn payment_settled(&self, payment: &Payment);
}

/// Default sink; emits an `info` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn payment_settled(&self, payment: &Payment) {
        info!(
            payment_id = %payment.id,
            order_id = %payment.order_id,
            invoice_number = %payment.invoice_number,
            amount = payment.amount.amount,
            method = %payment.method,
            "Payment settled"
        );
    }
}

/// Pushes settlement to the order service with backoff
#[derive(Clone)]
pub struct SettlementNotifier {
    orders: Arc<dyn OrderCollaborator>,
    policy: RetryPolicy,
}

impl SettlementNotifier {
    pub fn new(orders: Arc<dyn OrderCollaborator>, policy: RetryPolicy) -> Self {
        Self { orders, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn notify(&self, order_id: Uuid, payment_id: Uuid) -> PaymentResult<()> {
        retry_with_backoff(&self.policy, "notify_payment_settled", || {
            self.orders.notify_payment_settled(order_id, payment_id)
        })
        .await
    }
}
