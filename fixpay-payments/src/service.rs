//! Payment service
//!
//! Orchestrates creation, dispatch, callbacks, refunds and queries. It is the
//! only writer of payment status: every change funnels through
//! [`PaymentService::transition`], which decides with the pure state machine
//! and commits with the store's compare-and-set. Side effects of settlement
//! run only for the caller whose compare-and-set moved the payment to `paid`.

use crate::anomaly::{Anomaly, AnomalyKind, AnomalyLog};
use crate::error::{
    INVALID_AMOUNT, INVALID_PAYMENT_METHOD, PARTIAL_REFUND_UNSUPPORTED, PAYMENT_METHOD_MISMATCH,
    PaymentError, PaymentResult,
};
use crate::gateway::{ChargeExpiry, ChargeRequest, ChargeResult, PaymentGateway, RefundRequest};
use crate::method::{Bank, Channel, PaymentMethod, SchemeContext};
use crate::money::{Currency, Money};
use crate::notify::{NotificationSink, SettlementNotifier, TracingNotificationSink};
use crate::orders::OrderCollaborator;
use crate::retry::RetryPolicy;
use crate::status::{Decision, GatewayStatus, PaymentStatus, decide};
use crate::store::{CasOutcome, PaymentStore};
use crate::types::{
    CreatePayment, GatewayReport, Invoice, Page, PageRequest, Payment, PaymentFilter,
    StatusChange, StatusOutcome, TransitionSource, generate_invoice_number,
};
use crate::webhook::{CallbackPayload, CallbackVerifier};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Attempts at finding a free invoice number
const INVOICE_ATTEMPTS: usize = 5;
/// Re-reads after losing a compare-and-set before giving up
const CAS_ATTEMPTS: usize = 8;

/// Service options
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Currency new payments are created in
    pub currency: Currency,
    pub default_bank: Bank,
    /// Return URL for e-wallet apps
    pub callback_url: Option<String>,
    pub qris_acquirer: String,
    /// Charge expiry window
    pub expiry_hours: u32,
    /// Backoff for order settlement notices
    pub notify_retry: RetryPolicy,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            currency: Currency::IDR,
            default_bank: Bank::Bca,
            callback_url: None,
            qris_acquirer: "gopay".to_string(),
            expiry_hours: 24,
            notify_retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one call to the transition function
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied { payment: Payment, from: PaymentStatus },
    Unchanged(Payment),
}

impl Transition {
    pub fn payment(&self) -> &Payment {
        match self {
            Self::Applied { payment, .. } | Self::Unchanged(payment) => payment,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            Self::Applied { payment, .. } | Self::Unchanged(payment) => payment,
        }
    }
}

/// Dispatched charge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeOutcome {
    pub payment: Payment,
    pub charge: ChargeResult,
}

/// Payment service
pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<dyn OrderCollaborator>,
    settlement: SettlementNotifier,
    notifications: Arc<dyn NotificationSink>,
    anomalies: Arc<AnomalyLog>,
    verifier: CallbackVerifier,
    options: ServiceOptions,
    dispatching: Mutex<HashSet<Uuid>>,
}

impl PaymentService {
    /// Create a new payment service
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<dyn OrderCollaborator>,
        verifier: CallbackVerifier,
    ) -> Self {
        let options = ServiceOptions::default();
        Self {
            settlement: SettlementNotifier::new(orders.clone(), options.notify_retry.clone()),
            store,
            gateway,
            orders,
            notifications: Arc::new(TracingNotificationSink),
            anomalies: Arc::new(AnomalyLog::new()),
            verifier,
            options,
            dispatching: Mutex::new(HashSet::new()),
        }
    }

    /// Set options
    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.settlement = SettlementNotifier::new(self.orders.clone(), options.notify_retry.clone());
        self.options = options;
        self
    }

    /// Set the notification sink
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = sink;
        self
    }

    /// Share an anomaly log
    pub fn with_anomaly_log(mut self, anomalies: Arc<AnomalyLog>) -> Self {
        self.anomalies = anomalies;
        self
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn gateway_name(&self) -> &'static str {
        self.gateway.name()
    }

    // Operations

    /// Create a payment for an order.
    ///
    /// Cash settles immediately; online methods stay pending until
    /// [`process_payment`](Self::process_payment) dispatches them.
    pub async fn create_payment(&self, request: CreatePayment) -> PaymentResult<Payment> {
        if request.amount <= 0 {
            return Err(PaymentError::invalid(
                INVALID_AMOUNT,
                "amount must be greater than zero",
            ));
        }

        let order = self.orders.get_order(request.order_id).await?;
        let amount = Money::new(request.amount, self.options.currency);
        let mut payment = Payment::new(
            order.id,
            order.customer_id,
            amount,
            request.method,
            generate_invoice_number(Utc::now()),
        )
        .with_notes(request.notes);

        let mut stored = None;
        for _ in 0..INVOICE_ATTEMPTS {
            match self.store.insert(payment.clone()).await {
                Ok(p) => {
                    stored = Some(p);
                    break;
                }
                Err(PaymentError::Duplicate(what)) => {
                    debug!(%what, "Invoice number collision, regenerating");
                    payment.invoice_number = generate_invoice_number(Utc::now());
                }
                Err(e) => return Err(e),
            }
        }
        let payment = stored.ok_or_else(|| {
            PaymentError::Internal("could not allocate a unique invoice number".into())
        })?;

        info!(
            payment_id = %payment.id,
            order_id = %payment.order_id,
            invoice_number = %payment.invoice_number,
            method = %payment.method,
            amount = payment.amount.amount,
            "Payment created"
        );

        if payment.method.is_cash() {
            let settled = self
                .transition(
                    payment,
                    PaymentStatus::Paid,
                    TransitionSource::CashSettlement,
                    None,
                )
                .await?;
            return Ok(settled.into_payment());
        }

        Ok(payment)
    }

    /// Dispatch a pending online payment to the gateway.
    ///
    /// A failed dispatch marks the payment failed and is not retried; the
    /// customer starts a new payment instead.
    pub async fn process_payment(
        &self,
        payment_id: Uuid,
        method: PaymentMethod,
    ) -> PaymentResult<ChargeOutcome> {
        let payment = self.load(payment_id).await?;

        if payment.method.is_cash() || method.is_cash() {
            return Err(PaymentError::invalid(
                INVALID_PAYMENT_METHOD,
                "cash payments are settled at the counter",
            ));
        }
        if method != payment.method {
            return Err(PaymentError::invalid(
                PAYMENT_METHOD_MISMATCH,
                format!(
                    "payment was created for {}, not {}",
                    payment.method, method
                ),
            ));
        }
        if payment.status != PaymentStatus::Pending {
            return Err(PaymentError::conflict(
                payment.id,
                format!("payment is {}, only pending payments are dispatched", payment.status),
            ));
        }
        if payment.is_dispatched() {
            return Err(PaymentError::conflict(
                payment.id,
                "charge already sent to the gateway",
            ));
        }

        let _claim = DispatchClaim::acquire(&self.dispatching, payment.id)?;

        let order = self.orders.get_order(payment.order_id).await?;
        let ctx = SchemeContext {
            order_number: order.order_number,
            default_bank: self.options.default_bank,
            callback_url: self.options.callback_url.clone(),
            qris_acquirer: self.options.qris_acquirer.clone(),
        };
        let Channel::Gateway(scheme) = method.channel(&ctx) else {
            return Err(PaymentError::invalid(
                INVALID_PAYMENT_METHOD,
                "method is not charged through the gateway",
            ));
        };

        let request = ChargeRequest {
            order_id: payment.invoice_number.clone(),
            gross_amount: payment.amount,
            scheme,
            expiry: Some(ChargeExpiry::hours(Utc::now(), self.options.expiry_hours)),
        };

        match self.gateway.charge(request).await {
            Ok(charge) => {
                let outcome = self
                    .store
                    .attach_charge(payment.id, &charge.transaction_id, charge.instructions.clone())
                    .await?;
                match outcome {
                    CasOutcome::Swapped(payment) => {
                        if payment.status == PaymentStatus::Pending {
                            info!(
                                payment_id = %payment.id,
                                transaction_id = %charge.transaction_id,
                                gateway = self.gateway.name(),
                                gateway_status = %charge.gateway_status,
                                "Charge accepted by gateway"
                            );
                        } else {
                            // A callback settled or failed the payment while
                            // the charge was in flight.
                            info!(
                                payment_id = %payment.id,
                                transaction_id = %charge.transaction_id,
                                status = %payment.status,
                                "Charge response arrived after the callback"
                            );
                        }
                        Ok(ChargeOutcome { payment, charge })
                    }
                    CasOutcome::Mismatch(current) => {
                        warn!(
                            payment_id = %current.id,
                            stored = ?current.transaction_id,
                            transaction_id = %charge.transaction_id,
                            "Charge response names a different transaction"
                        );
                        Err(PaymentError::conflict(
                            current.id,
                            "payment already carries another gateway transaction",
                        ))
                    }
                }
            }
            Err(err) => {
                match &err {
                    PaymentError::GatewayRejected { code, message } => warn!(
                        payment_id = %payment.id,
                        code = %code,
                        message = %message,
                        "Gateway rejected charge"
                    ),
                    PaymentError::GatewayTransient(reason) => error!(
                        payment_id = %payment.id,
                        reason = %reason,
                        "Gateway unavailable during charge, outcome unknown"
                    ),
                    other => error!(
                        payment_id = %payment.id,
                        error = %other,
                        "Charge failed"
                    ),
                }

                if let Err(mark_err) = self
                    .transition(
                        payment,
                        PaymentStatus::Failed,
                        TransitionSource::ChargeResponse,
                        None,
                    )
                    .await
                {
                    warn!(payment_id = %payment_id, error = %mark_err, "Could not mark payment failed");
                }
                Err(err)
            }
        }
    }

    /// Handle a gateway callback body.
    ///
    /// The signature is verified before any lookup. `signature` is the value
    /// of the signature header, if present.
    pub async fn handle_callback(
        &self,
        raw: &[u8],
        signature: Option<&str>,
    ) -> PaymentResult<StatusOutcome> {
        let payload = CallbackPayload::parse(raw)?;

        if let Err(err) = self.verifier.verify(raw, &payload, signature) {
            warn!(
                order_id = %payload.order_id,
                transaction_id = ?payload.transaction_id,
                "Rejected callback with invalid signature"
            );
            return Err(err);
        }

        let payment = self.locate(&payload).await?;
        debug!(
            payment_id = %payment.id,
            transaction_status = %payload.transaction_status,
            "Callback received"
        );
        self.apply_gateway_report(payment, &payload.report(), TransitionSource::Webhook)
            .await
    }

    /// Query the gateway for one payment and apply what it reports
    pub async fn reconcile_payment(&self, payment: Payment) -> PaymentResult<StatusOutcome> {
        let Some(transaction_id) = payment.transaction_id.clone() else {
            return Ok(StatusOutcome::Unchanged {
                payment_id: payment.id,
                status: payment.status,
            });
        };

        // Rotate before querying so a failing payment moves to the back.
        self.store.mark_checked(payment.id, Utc::now()).await?;
        let status = self.gateway.status(&transaction_id).await?;
        let report = GatewayReport {
            transaction_id: Some(status.transaction_id),
            transaction_status: status.transaction_status,
            fraud_status: status.fraud_status,
            gross_amount: status.gross_amount,
        };
        self.apply_gateway_report(payment, &report, TransitionSource::Reconciliation)
            .await
    }

    /// Refund a settled payment in full
    pub async fn refund_payment(
        &self,
        payment_id: Uuid,
        amount: i64,
        reason: &str,
    ) -> PaymentResult<Payment> {
        let payment = self.load(payment_id).await?;

        if payment.status != PaymentStatus::Paid {
            return Err(PaymentError::transition_conflict(
                payment.id,
                payment.status,
                PaymentStatus::Refunded,
            ));
        }
        if amount != payment.amount.amount {
            return Err(PaymentError::invalid(
                PARTIAL_REFUND_UNSUPPORTED,
                format!(
                    "refund must equal the paid amount {}",
                    payment.amount.amount
                ),
            ));
        }

        if !payment.method.is_cash() {
            let transaction_id = payment.transaction_id.clone().ok_or_else(|| {
                PaymentError::conflict(payment.id, "no gateway transaction to refund")
            })?;
            let result = self
                .gateway
                .refund(
                    &transaction_id,
                    RefundRequest {
                        refund_key: format!("{}-refund", payment.invoice_number),
                        amount: payment.amount,
                        reason: reason.to_string(),
                    },
                )
                .await?;
            info!(
                payment_id = %payment.id,
                transaction_id = %transaction_id,
                refund_key = %result.refund_key,
                "Gateway refund accepted"
            );
        }

        let refunded = self
            .transition(
                payment,
                PaymentStatus::Refunded,
                TransitionSource::Refund,
                None,
            )
            .await?;
        Ok(refunded.into_payment())
    }

    // Queries

    pub async fn get_payment(&self, payment_id: Uuid) -> PaymentResult<Payment> {
        self.load(payment_id).await
    }

    pub async fn get_payment_by_invoice(&self, invoice_number: &str) -> PaymentResult<Payment> {
        self.store
            .find_by_invoice(invoice_number)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(invoice_number.to_string()))
    }

    /// Payments for an order, newest first
    pub async fn list_payments_by_order(&self, order_id: Uuid) -> PaymentResult<Vec<Payment>> {
        let filter = PaymentFilter {
            order_id: Some(order_id),
            ..Default::default()
        };
        let mut all = Vec::new();
        let mut page = PageRequest::new(1, crate::types::MAX_PAGE_LIMIT)?;
        loop {
            let batch = self.store.list(&filter, page).await?;
            let last = batch.page >= batch.total_pages;
            all.extend(batch.items);
            if last {
                return Ok(all);
            }
            page = PageRequest::new(page.page() + 1, page.limit())?;
        }
    }

    pub async fn list_payments(
        &self,
        filter: &PaymentFilter,
        page: PageRequest,
    ) -> PaymentResult<Page<Payment>> {
        self.store.list(filter, page).await
    }

    /// Audit trail of a payment, oldest first
    pub async fn payment_history(&self, payment_id: Uuid) -> PaymentResult<Vec<StatusChange>> {
        self.store.history(payment_id).await
    }

    pub async fn generate_invoice(&self, payment_id: Uuid) -> PaymentResult<Invoice> {
        let payment = self.load(payment_id).await?;
        let order = self.orders.get_order(payment.order_id).await?;
        Ok(Invoice::for_payment(&payment, order.order_number))
    }

    /// Recorded anomalies, newest first
    pub fn list_anomalies(&self) -> Vec<Anomaly> {
        self.anomalies.list()
    }

    /// Pending dispatched payments not updated since `updated_before`
    pub async fn reconcile_candidates(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> PaymentResult<Vec<Payment>> {
        self.store.stale_pending(updated_before, limit).await
    }

    // Internals

    async fn load(&self, payment_id: Uuid) -> PaymentResult<Payment> {
        self.store
            .get(payment_id)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(payment_id.to_string()))
    }

    /// Find the payment a callback refers to. The callback can outrun the
    /// charge response, so fall back to the invoice number.
    ///
    /// A payment found by invoice takes the callback's transaction id when it
    /// has none yet, so it stays refundable and later callbacks find it.
    async fn locate(&self, payload: &CallbackPayload) -> PaymentResult<Payment> {
        let txid = payload.transaction_id.as_deref().filter(|t| !t.is_empty());
        if let Some(txid) = txid {
            if let Some(payment) = self.store.find_by_transaction_id(txid).await? {
                return Ok(payment);
            }
        }
        let payment = self
            .store
            .find_by_invoice(&payload.order_id)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(payload.order_id.clone()))?;

        match txid {
            Some(txid) if payment.transaction_id.is_none() => {
                match self.store.attach_charge(payment.id, txid, None).await? {
                    CasOutcome::Swapped(attached) => {
                        debug!(
                            payment_id = %attached.id,
                            transaction_id = %txid,
                            "Transaction id taken from callback"
                        );
                        Ok(attached)
                    }
                    CasOutcome::Mismatch(current) => Ok(current),
                }
            }
            _ => Ok(payment),
        }
    }

    /// Feed a gateway report through the state machine
    pub async fn apply_gateway_report(
        &self,
        payment: Payment,
        report: &GatewayReport,
        source: TransitionSource,
    ) -> PaymentResult<StatusOutcome> {
        if let Some(gross) = report.gross_amount.as_deref() {
            let matches = Money::parse(gross, payment.amount.currency)
                .map(|reported| reported == payment.amount)
                .unwrap_or(false);
            if !matches {
                self.anomalies.record(
                    payment.id,
                    AnomalyKind::AmountMismatch {
                        expected: payment.amount.amount,
                        reported: gross.to_string(),
                    },
                    source,
                );
                return Err(PaymentError::conflict(
                    payment.id,
                    format!(
                        "gateway reported {gross}, stored amount is {}",
                        payment.amount.amount
                    ),
                ));
            }
        }

        let gateway_status = GatewayStatus::parse(&report.transaction_status);
        let Some(target) = gateway_status.to_payment_status(report.fraud_status.as_deref())
        else {
            self.anomalies.record(
                payment.id,
                AnomalyKind::UnknownGatewayStatus {
                    raw: report.transaction_status.clone(),
                },
                source,
            );
            return Ok(StatusOutcome::Ignored {
                payment_id: payment.id,
                reported: report.transaction_status.clone(),
            });
        };

        let payment_id = payment.id;
        match self
            .transition(payment, target, source, Some(&report.transaction_status))
            .await?
        {
            Transition::Applied { payment, from } => Ok(StatusOutcome::Applied {
                payment_id,
                from,
                to: payment.status,
            }),
            Transition::Unchanged(payment) => Ok(StatusOutcome::Unchanged {
                payment_id,
                status: payment.status,
            }),
        }
    }

    /// The single transition function.
    ///
    /// Decides from the payment as read, commits with compare-and-set, and
    /// re-decides from the stored record when another writer got there
    /// first. Settlement side effects run only on the winning swap to `paid`.
    pub async fn transition(
        &self,
        mut payment: Payment,
        target: PaymentStatus,
        source: TransitionSource,
        gateway_status: Option<&str>,
    ) -> PaymentResult<Transition> {
        for _ in 0..CAS_ATTEMPTS {
            match decide(payment.status, target) {
                Decision::Unchanged => {
                    debug!(
                        payment_id = %payment.id,
                        status = %payment.status,
                        source = %source,
                        "Status unchanged"
                    );
                    return Ok(Transition::Unchanged(payment));
                }
                Decision::Stale => {
                    debug!(
                        payment_id = %payment.id,
                        status = %payment.status,
                        reported = %target,
                        source = %source,
                        "Ignoring out-of-order report for settled payment"
                    );
                    return Ok(Transition::Unchanged(payment));
                }
                Decision::Conflict => {
                    self.anomalies.record(
                        payment.id,
                        AnomalyKind::StateConflict {
                            current: payment.status,
                            reported: target,
                        },
                        source,
                    );
                    return Err(PaymentError::transition_conflict(
                        payment.id,
                        payment.status,
                        target,
                    ));
                }
                Decision::Apply => {
                    let from = payment.status;
                    let change = StatusChange::new(from, target, source)
                        .with_gateway_status(gateway_status);
                    match self.store.compare_and_set_status(payment.id, change).await? {
                        CasOutcome::Swapped(updated) => {
                            info!(
                                payment_id = %updated.id,
                                from = %from,
                                to = %target,
                                source = %source,
                                "Payment status changed"
                            );
                            if target == PaymentStatus::Paid {
                                self.on_settled(&updated).await;
                            }
                            return Ok(Transition::Applied {
                                payment: updated,
                                from,
                            });
                        }
                        CasOutcome::Mismatch(current) => {
                            debug!(
                                payment_id = %current.id,
                                expected = %from,
                                found = %current.status,
                                "Lost status race, re-deciding"
                            );
                            payment = current;
                        }
                    }
                }
            }
        }

        Err(PaymentError::Internal(format!(
            "payment {} kept changing under transition to {}",
            payment.id, target
        )))
    }

    async fn on_settled(&self, payment: &Payment) {
        if let Err(err) = self.settlement.notify(payment.order_id, payment.id).await {
            error!(
                payment_id = %payment.id,
                order_id = %payment.order_id,
                error = %err,
                "Order service was not told about settlement"
            );
        }
        self.notifications.payment_settled(payment).await;
    }
}

/// Marks a payment as being dispatched; released on drop
struct DispatchClaim<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl<'a> DispatchClaim<'a> {
    fn acquire(set: &'a Mutex<HashSet<Uuid>>, id: Uuid) -> PaymentResult<Self> {
        if !set.lock().insert(id) {
            return Err(PaymentError::conflict(id, "charge already in flight"));
        }
        Ok(Self { set, id })
    }
}

impl Drop for DispatchClaim<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}
