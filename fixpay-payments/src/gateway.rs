//! Payment gateway trait and common functionality

use crate::error::{PaymentError, PaymentResult};
use crate::method::{Bank, ChargeScheme};
use crate::money::Money;
use crate::types::PaymentInstructions;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Midtrans sandbox API
pub const SANDBOX_BASE_URL: &str = "https://api.sandbox.midtrans.com";
/// Midtrans production API
pub const PRODUCTION_BASE_URL: &str = "https://api.midtrans.com";

/// Payment gateway trait
///
/// Implement this trait for each external gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Get gateway name
    fn name(&self) -> &'static str;

    /// Send a charge
    async fn charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResult>;

    /// Query the state of a transaction
    async fn status(&self, transaction_id: &str) -> PaymentResult<StatusResult>;

    /// Refund a settled transaction in full
    async fn refund(
        &self,
        transaction_id: &str,
        request: RefundRequest,
    ) -> PaymentResult<RefundResult>;
}

/// Outbound charge
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    /// Gateway order id; the invoice number
    pub order_id: String,
    pub gross_amount: Money,
    pub scheme: ChargeScheme,
    pub expiry: Option<ChargeExpiry>,
}

/// Custom expiry window attached to a charge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeExpiry {
    pub order_time: DateTime<Utc>,
    pub duration: u32,
    pub unit: ExpiryUnit,
}

impl ChargeExpiry {
    pub fn hours(order_time: DateTime<Utc>, hours: u32) -> Self {
        Self {
            order_time,
            duration: hours,
            unit: ExpiryUnit::Hour,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryUnit {
    Minute,
    Hour,
    Day,
}

/// Accepted charge. Acceptance is not settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeResult {
    pub transaction_id: String,
    /// Raw `transaction_status` returned with the charge
    pub gateway_status: String,
    pub instructions: Option<PaymentInstructions>,
    pub status_message: Option<String>,
}

/// Gateway view of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResult {
    pub transaction_id: String,
    pub order_id: String,
    pub transaction_status: String,
    pub fraud_status: Option<String>,
    pub gross_amount: Option<String>,
}

/// Outbound refund
#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    /// Idempotency key; repeats of the same key refund once
    pub refund_key: String,
    pub amount: Money,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundResult {
    pub transaction_id: String,
    pub refund_key: String,
    pub gateway_status: String,
}

/// Gateway adapter configuration, passed to the adapter constructor
#[derive(Clone)]
pub struct GatewayConfig {
    pub server_key: SecretString,
    pub client_key: Option<String>,
    pub is_production: bool,
    /// Overrides the sandbox/production URL
    pub base_url: Option<String>,
    /// Per-call timeout
    pub timeout: Duration,
    /// Where e-wallet apps return the customer
    pub callback_url: Option<String>,
    pub default_bank: Bank,
    pub qris_acquirer: String,
    pub expiry_hours: u32,
}

impl GatewayConfig {
    /// Sandbox configuration with defaults
    pub fn sandbox(server_key: impl Into<String>) -> Self {
        Self {
            server_key: SecretString::new(server_key.into().into()),
            client_key: None,
            is_production: false,
            base_url: None,
            timeout: Duration::from_secs(30),
            callback_url: None,
            default_bank: Bank::Bca,
            qris_acquirer: "gopay".to_string(),
            expiry_hours: 24,
        }
    }

    /// Point at a specific base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL in effect
    pub fn endpoint(&self) -> &str {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/'),
            None if self.is_production => PRODUCTION_BASE_URL,
            None => SANDBOX_BASE_URL,
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("server_key", &"[REDACTED]")
            .field("is_production", &self.is_production)
            .field("endpoint", &self.endpoint())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Common HTTP client for gateways using HTTP Basic auth with the server key
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    server_key: SecretString,
}

impl GatewayClient {
    /// Create a new gateway client
    pub fn new(config: &GatewayConfig) -> PaymentResult<Self> {
        let base_url = config.endpoint().to_string();
        url::Url::parse(&base_url)
            .map_err(|e| PaymentError::Config(format!("invalid gateway URL {base_url}: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            server_key: config.server_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET request
    pub async fn get(&self, path: &str) -> PaymentResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        Ok(self
            .client
            .get(&url)
            .basic_auth(self.server_key.expose_secret(), Some(""))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?)
    }

    /// POST request with JSON body
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> PaymentResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        Ok(self
            .client
            .post(&url)
            .basic_auth(self.server_key.expose_secret(), Some(""))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?)
    }
}
