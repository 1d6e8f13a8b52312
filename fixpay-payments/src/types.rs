//! Payment records and the values passed around them

use crate::error::{INVALID_PAGINATION, PaymentError, PaymentResult};
use crate::method::PaymentMethod;
use crate::money::Money;
use crate::status::PaymentStatus;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Largest page size accepted by list queries
pub const MAX_PAGE_LIMIT: u32 = 100;

/// A payment against an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    /// Customer taken from the order
    pub payer_id: Uuid,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// Gateway transaction id, set once the charge is accepted
    pub transaction_id: Option<String>,
    pub invoice_number: String,
    /// What the customer needs to complete the payment
    pub instructions: Option<PaymentInstructions>,
    pub notes: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Create a pending payment
    pub fn new(
        order_id: Uuid,
        payer_id: Uuid,
        amount: Money,
        method: PaymentMethod,
        invoice_number: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            payer_id,
            amount,
            method,
            status: PaymentStatus::Pending,
            transaction_id: None,
            invoice_number: invoice_number.into(),
            instructions: None,
            notes: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach notes
    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes.filter(|n| !n.trim().is_empty());
        self
    }

    /// Whether the charge has been accepted by the gateway
    pub fn is_dispatched(&self) -> bool {
        self.transaction_id.is_some()
    }
}

/// Display payload returned by the gateway for the customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentInstructions {
    VirtualAccount { bank: String, number: String },
    BillPayment { biller_code: String, bill_key: String },
    QrString { value: String },
    Redirect { url: String },
    PaymentCode { store: String, code: String },
}

/// What caused a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionSource {
    CashSettlement,
    ChargeResponse,
    Webhook,
    Reconciliation,
    Refund,
}

impl TransitionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CashSettlement => "cash_settlement",
            Self::ChargeResponse => "charge_response",
            Self::Webhook => "webhook",
            Self::Reconciliation => "reconciliation",
            Self::Refund => "refund",
        }
    }
}

impl fmt::Display for TransitionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a payment's audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub source: TransitionSource,
    /// Raw gateway status that triggered the change
    pub gateway_status: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn new(from: PaymentStatus, to: PaymentStatus, source: TransitionSource) -> Self {
        Self {
            from,
            to,
            source,
            gateway_status: None,
            at: Utc::now(),
        }
    }

    pub fn with_gateway_status(mut self, status: Option<&str>) -> Self {
        self.gateway_status = status.map(str::to_string);
        self
    }
}

/// Gateway-reported state of one transaction, from a webhook or a status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReport {
    pub transaction_id: Option<String>,
    pub transaction_status: String,
    pub fraud_status: Option<String>,
    pub gross_amount: Option<String>,
}

/// Result of feeding a gateway report through the state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StatusOutcome {
    /// Status changed
    Applied {
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    /// Already in the reported status
    Unchanged {
        payment_id: Uuid,
        status: PaymentStatus,
    },
    /// Report not understood; recorded as an anomaly
    Ignored { payment_id: Uuid, reported: String },
}

/// Input for creating a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePayment {
    pub order_id: Uuid,
    #[serde(rename = "payment_method")]
    pub method: PaymentMethod,
    /// Amount in minor units of the configured currency
    pub amount: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Optional filters for listing payments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
    pub method: Option<PaymentMethod>,
    pub order_id: Option<Uuid>,
}

impl PaymentFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.status.is_none_or(|s| s == payment.status)
            && self.method.is_none_or(|m| m == payment.method)
            && self.order_id.is_none_or(|o| o == payment.order_id)
    }
}

/// Validated page coordinates, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> PaymentResult<Self> {
        if page == 0 {
            return Err(PaymentError::invalid(
                INVALID_PAGINATION,
                "page must be at least 1",
            ));
        }
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(PaymentError::invalid(
                INVALID_PAGINATION,
                format!("limit must be between 1 and {MAX_PAGE_LIMIT}"),
            ));
        }
        Ok(Self { page, limit })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

/// One page of results with the overall count
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        let total_pages = total.div_ceil(request.limit as u64) as u32;
        Self {
            items,
            page: request.page,
            limit: request.limit,
            total,
            total_pages,
        }
    }
}

/// Printable invoice for a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_number: String,
    pub order_number: String,
    pub payment_id: Uuid,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
}

impl Invoice {
    /// Time a customer has to settle an invoice
    pub const DUE_AFTER_HOURS: i64 = 24;

    pub fn for_payment(payment: &Payment, order_number: impl Into<String>) -> Self {
        Self {
            invoice_number: payment.invoice_number.clone(),
            order_number: order_number.into(),
            payment_id: payment.id,
            amount: payment.amount,
            method: payment.method,
            status: payment.status,
            created_at: payment.created_at,
            due_date: payment.created_at + Duration::hours(Self::DUE_AFTER_HOURS),
        }
    }
}

/// Generate an invoice number: `INV-YYYYMMDD-XXXXXXXX`
pub fn generate_invoice_number(now: DateTime<Utc>) -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect();
    format!("INV-{}-{}", now.format("%Y%m%d"), suffix.to_uppercase())
}
