//! Order collaborator
//!
//! Orders live in another service. Payments only need to confirm an order
//! exists, read its number, and tell it when money has settled.

use crate::error::{PaymentError, PaymentResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Order as seen by payments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub order_number: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl Order {
    pub fn new(customer_id: Uuid, order_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            order_number: order_number.into(),
            status: None,
        }
    }
}

#[async_trait]
pub trait OrderCollaborator: Send + Sync {
    /// Fetch an order; `OrderNotFound` when it does not exist
    async fn get_order(&self, order_id: Uuid) -> PaymentResult<Order>;

    /// Tell the order service a payment for this order has settled
    async fn notify_payment_settled(&self, order_id: Uuid, payment_id: Uuid) -> PaymentResult<()>;
}

#[derive(Serialize)]
struct SettledBody {
    payment_id: Uuid,
}

/// Order service over HTTP
pub struct HttpOrderClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOrderClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> PaymentResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        url::Url::parse(&base_url).map_err(|e| {
            PaymentError::Config(format!("invalid order service URL {base_url}: {e}"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Config(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    fn unavailable(err: reqwest::Error) -> PaymentError {
        PaymentError::OrderService(err.to_string())
    }
}

#[async_trait]
impl OrderCollaborator for HttpOrderClient {
    async fn get_order(&self, order_id: Uuid) -> PaymentResult<Order> {
        let response = self
            .client
            .get(format!("{}/orders/{}", self.base_url, order_id))
            .send()
            .await
            .map_err(Self::unavailable)?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(PaymentError::OrderNotFound(order_id)),
            status if status.is_success() => response.json::<Order>().await.map_err(|e| {
                PaymentError::Serialization(format!("order {order_id}: {e}"))
            }),
            status => Err(PaymentError::OrderService(format!(
                "GET order {order_id}: HTTP {status}"
            ))),
        }
    }

    async fn notify_payment_settled(&self, order_id: Uuid, payment_id: Uuid) -> PaymentResult<()> {
        let response = self
            .client
            .post(format!("{}/orders/{}/payment-settled", self.base_url, order_id))
            .json(&SettledBody { payment_id })
            .send()
            .await
            .map_err(Self::unavailable)?;

        match response.status() {
            status if status.is_success() => {
                debug!(order_id = %order_id, payment_id = %payment_id, "Order notified of settlement");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(PaymentError::OrderNotFound(order_id)),
            status => Err(PaymentError::OrderService(format!(
                "settle order {order_id}: HTTP {status}"
            ))),
        }
    }
}

/// In-process order directory for tests and local runs
#[derive(Debug, Default)]
pub struct InMemoryOrderDirectory {
    orders: RwLock<HashMap<Uuid, Order>>,
    settlements: RwLock<Vec<(Uuid, Uuid)>>,
}

impl InMemoryOrderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: Order) -> Order {
        self.orders.write().insert(order.id, order.clone());
        order
    }

    /// Number of settlement notices received for an order
    pub fn settlements_for(&self, order_id: Uuid) -> usize {
        self.settlements
            .read()
            .iter()
            .filter(|(order, _)| *order == order_id)
            .count()
    }

    pub fn order_status(&self, order_id: Uuid) -> Option<String> {
        self.orders.read().get(&order_id).and_then(|o| o.status.clone())
    }
}

#[async_trait]
impl OrderCollaborator for InMemoryOrderDirectory {
    async fn get_order(&self, order_id: Uuid) -> PaymentResult<Order> {
        self.orders
            .read()
            .get(&order_id)
            .cloned()
            .ok_or(PaymentError::OrderNotFound(order_id))
    }

    async fn notify_payment_settled(&self, order_id: Uuid, payment_id: Uuid) -> PaymentResult<()> {
        let mut orders = self.orders.write();
        let order = orders
            .get_mut(&order_id)
            .ok_or(PaymentError::OrderNotFound(order_id))?;
        order.status = Some("paid".to_string());
        self.settlements.write().push((order_id, payment_id));
        Ok(())
    }
}
