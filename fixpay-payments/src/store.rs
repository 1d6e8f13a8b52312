//! Payment persistence
//!
//! The store is the only shared mutable state in the subsystem. Status
//! changes go through [`PaymentStore::compare_and_set_status`], which commits
//! only when the stored status still equals the one the caller decided from,
//! and appends the audit entry in the same step.

use crate::error::{PaymentError, PaymentResult};
use crate::status::PaymentStatus;
use crate::types::{Page, PageRequest, Payment, PaymentFilter, PaymentInstructions, StatusChange};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Result of a conditional write
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// Write committed; the updated record
    Swapped(Payment),
    /// Precondition failed; the record as currently stored
    Mismatch(Payment),
}

/// Storage backend for payments
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new payment. Fails with `Duplicate` on an invoice number or
    /// transaction id already in use.
    async fn insert(&self, payment: Payment) -> PaymentResult<Payment>;

    async fn get(&self, id: Uuid) -> PaymentResult<Option<Payment>>;

    async fn find_by_transaction_id(&self, transaction_id: &str)
    -> PaymentResult<Option<Payment>>;

    async fn find_by_invoice(&self, invoice_number: &str) -> PaymentResult<Option<Payment>>;

    /// Matching payments, newest first
    async fn list(&self, filter: &PaymentFilter, page: PageRequest)
    -> PaymentResult<Page<Payment>>;

    /// Pending payments with a transaction id not touched since `updated_before`.
    /// Never-checked payments come first, then the least recently checked,
    /// so a payment that keeps failing cannot hold the head of every batch.
    async fn stale_pending(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> PaymentResult<Vec<Payment>>;

    /// Set the status to `change.to` if it is still `change.from`
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        change: StatusChange,
    ) -> PaymentResult<CasOutcome>;

    /// Record that reconciliation looked at a payment
    async fn mark_checked(&self, id: Uuid, at: DateTime<Utc>) -> PaymentResult<()>;

    /// Record the gateway transaction on a payment that has none yet, in any
    /// status. Repeating the same transaction id is a no-op apart from
    /// filling in missing instructions; a different id is a `Mismatch`.
    async fn attach_charge(
        &self,
        id: Uuid,
        transaction_id: &str,
        instructions: Option<PaymentInstructions>,
    ) -> PaymentResult<CasOutcome>;

    /// Audit trail, oldest first
    async fn history(&self, id: Uuid) -> PaymentResult<Vec<StatusChange>>;
}

#[derive(Default)]
struct Inner {
    payments: HashMap<Uuid, Payment>,
    by_transaction: HashMap<String, Uuid>,
    by_invoice: HashMap<String, Uuid>,
    history: HashMap<Uuid, Vec<StatusChange>>,
    checked: HashMap<Uuid, DateTime<Utc>>,
}

impl Inner {
    fn get_mut(&mut self, id: Uuid) -> PaymentResult<&mut Payment> {
        self.payments
            .get_mut(&id)
            .ok_or_else(|| PaymentError::PaymentNotFound(id.to_string()))
    }
}

/// In-process store backed by hash maps
#[derive(Default)]
pub struct InMemoryPaymentStore {
    inner: RwLock<Inner>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().payments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> PaymentResult<Payment> {
        let mut inner = self.inner.write();

        if inner.payments.contains_key(&payment.id) {
            return Err(PaymentError::Duplicate(format!("payment id {}", payment.id)));
        }
        if inner.by_invoice.contains_key(&payment.invoice_number) {
            return Err(PaymentError::Duplicate(format!(
                "invoice number {}",
                payment.invoice_number
            )));
        }
        if let Some(txid) = &payment.transaction_id {
            if inner.by_transaction.contains_key(txid) {
                return Err(PaymentError::Duplicate(format!("transaction id {txid}")));
            }
            inner.by_transaction.insert(txid.clone(), payment.id);
        }

        inner
            .by_invoice
            .insert(payment.invoice_number.clone(), payment.id);
        inner.history.insert(payment.id, Vec::new());
        inner.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: Uuid) -> PaymentResult<Option<Payment>> {
        Ok(self.inner.read().payments.get(&id).cloned())
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> PaymentResult<Option<Payment>> {
        let inner = self.inner.read();
        Ok(inner
            .by_transaction
            .get(transaction_id)
            .and_then(|id| inner.payments.get(id))
            .cloned())
    }

    async fn find_by_invoice(&self, invoice_number: &str) -> PaymentResult<Option<Payment>> {
        let inner = self.inner.read();
        Ok(inner
            .by_invoice
            .get(invoice_number)
            .and_then(|id| inner.payments.get(id))
            .cloned())
    }

    async fn list(
        &self,
        filter: &PaymentFilter,
        page: PageRequest,
    ) -> PaymentResult<Page<Payment>> {
        let inner = self.inner.read();
        let mut matching: Vec<&Payment> =
            inner.payments.values().filter(|p| filter.matches(p)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset())
            .take(page.limit() as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, page, total))
    }

    async fn stale_pending(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> PaymentResult<Vec<Payment>> {
        let inner = self.inner.read();
        let mut stale: Vec<&Payment> = inner
            .payments
            .values()
            .filter(|p| {
                p.status == PaymentStatus::Pending
                    && p.transaction_id.is_some()
                    && p.updated_at <= updated_before
            })
            .collect();
        stale.sort_by_key(|p| (inner.checked.get(&p.id).copied(), p.updated_at));
        Ok(stale.into_iter().take(limit).cloned().collect())
    }

    async fn mark_checked(&self, id: Uuid, at: DateTime<Utc>) -> PaymentResult<()> {
        let mut inner = self.inner.write();
        inner.get_mut(id)?;
        inner.checked.insert(id, at);
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        change: StatusChange,
    ) -> PaymentResult<CasOutcome> {
        let mut inner = self.inner.write();
        let payment = inner.get_mut(id)?;

        if payment.status != change.from {
            return Ok(CasOutcome::Mismatch(payment.clone()));
        }

        payment.status = change.to;
        payment.updated_at = change.at;
        if change.to == PaymentStatus::Paid {
            payment.paid_at = Some(change.at);
        }
        let updated = payment.clone();
        inner.history.entry(id).or_default().push(change);
        Ok(CasOutcome::Swapped(updated))
    }

    async fn attach_charge(
        &self,
        id: Uuid,
        transaction_id: &str,
        instructions: Option<PaymentInstructions>,
    ) -> PaymentResult<CasOutcome> {
        let mut inner = self.inner.write();

        if let Some(owner) = inner.by_transaction.get(transaction_id) {
            if *owner != id {
                return Err(PaymentError::Duplicate(format!(
                    "transaction id {transaction_id}"
                )));
            }
        }

        let payment = inner.get_mut(id)?;
        match payment.transaction_id.as_deref() {
            Some(existing) if existing != transaction_id => {
                return Ok(CasOutcome::Mismatch(payment.clone()));
            }
            Some(_) => {
                if payment.instructions.is_none() {
                    payment.instructions = instructions;
                }
                return Ok(CasOutcome::Swapped(payment.clone()));
            }
            None => {}
        }

        payment.transaction_id = Some(transaction_id.to_string());
        payment.instructions = instructions;
        payment.updated_at = Utc::now();
        let updated = payment.clone();
        inner.by_transaction.insert(transaction_id.to_string(), id);
        Ok(CasOutcome::Swapped(updated))
    }

    async fn history(&self, id: Uuid) -> PaymentResult<Vec<StatusChange>> {
        self.inner
            .read()
            .history
            .get(&id)
            .cloned()
            .ok_or_else(|| PaymentError::PaymentNotFound(id.to_string()))
    }
}
