//! Shared fixtures for payment integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use fixpay_payments::*;
use parking_lot::Mutex;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

pub const SERVER_KEY: &str = "SB-Mid-server-fixture";

/// Holds charges in flight until released
#[derive(Clone, Default)]
pub struct ChargeHold {
    /// Signalled when a charge reaches the gateway
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// Scriptable gateway
#[derive(Default)]
pub struct FakeGateway {
    next_charge_error: Mutex<Option<PaymentError>>,
    statuses: Mutex<HashMap<String, PaymentResult<StatusResult>>>,
    charge_requests: Mutex<Vec<ChargeRequest>>,
    pub charges: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub refunds: AtomicUsize,
    status_delay: Mutex<Option<Duration>>,
    hold: Mutex<Option<ChargeHold>>,
}

impl FakeGateway {
    pub fn fail_next_charge(&self, err: PaymentError) {
        *self.next_charge_error.lock() = Some(err);
    }

    pub fn report(&self, transaction_id: &str, status: &str, gross_amount: &str) {
        self.statuses.lock().insert(
            transaction_id.to_string(),
            Ok(StatusResult {
                transaction_id: transaction_id.to_string(),
                order_id: String::new(),
                transaction_status: status.to_string(),
                fraud_status: None,
                gross_amount: Some(gross_amount.to_string()),
            }),
        );
    }

    pub fn fail_status(&self, transaction_id: &str, err: PaymentError) {
        self.statuses
            .lock()
            .insert(transaction_id.to_string(), Err(err));
    }

    pub fn delay_status(&self, delay: Duration) {
        *self.status_delay.lock() = Some(delay);
    }

    /// Make every following charge wait for `release`
    pub fn hold_charges(&self) -> ChargeHold {
        let hold = ChargeHold::default();
        *self.hold.lock() = Some(hold.clone());
        hold
    }

    pub fn last_charge(&self) -> Option<ChargeRequest> {
        self.charge_requests.lock().last().cloned()
    }

    pub fn charge_count(&self) -> usize {
        self.charges.load(Ordering::SeqCst)
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResult> {
        let n = self.charges.fetch_add(1, Ordering::SeqCst) + 1;
        self.charge_requests.lock().push(request.clone());
        let hold = self.hold.lock().clone();
        if let Some(hold) = hold {
            hold.entered.notify_one();
            hold.release.notified().await;
        }
        if let Some(err) = self.next_charge_error.lock().take() {
            return Err(err);
        }

        let instructions = match &request.scheme {
            ChargeScheme::VirtualAccount { bank } => PaymentInstructions::VirtualAccount {
                bank: bank.code().to_string(),
                number: format!("8800{n:07}"),
            },
            ChargeScheme::Qris { .. } => PaymentInstructions::QrString {
                value: format!("00020101021226{n}"),
            },
            _ => PaymentInstructions::Redirect {
                url: format!("https://gateway.test/pay/{n}"),
            },
        };

        Ok(ChargeResult {
            transaction_id: format!("tx-{n}"),
            gateway_status: "pending".to_string(),
            instructions: Some(instructions),
            status_message: Some("Success, transaction is created".to_string()),
        })
    }

    async fn status(&self, transaction_id: &str) -> PaymentResult<StatusResult> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.statuses.lock().get(transaction_id).cloned();
        result.unwrap_or_else(|| {
            Err(PaymentError::GatewayRejected {
                code: "404".into(),
                message: "Transaction doesn't exist.".into(),
            })
        })
    }

    async fn refund(&self, transaction_id: &str, request: RefundRequest) -> PaymentResult<RefundResult> {
        self.refunds.fetch_add(1, Ordering::SeqCst);
        Ok(RefundResult {
            transaction_id: transaction_id.to_string(),
            refund_key: request.refund_key,
            gateway_status: "refund".to_string(),
        })
    }
}

/// Sink that counts settled payments
#[derive(Default)]
pub struct RecordingSink {
    pub settled: Mutex<Vec<Uuid>>,
}

impl RecordingSink {
    pub fn count(&self, payment_id: Uuid) -> usize {
        self.settled.lock().iter().filter(|id| **id == payment_id).count()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn payment_settled(&self, payment: &Payment) {
        self.settled.lock().push(payment.id);
    }
}

pub struct Harness {
    pub service: Arc<PaymentService>,
    pub gateway: Arc<FakeGateway>,
    pub orders: Arc<InMemoryOrderDirectory>,
    pub sink: Arc<RecordingSink>,
    pub verifier: CallbackVerifier,
}

impl Harness {
    pub fn new() -> Self {
        let gateway = Arc::new(FakeGateway::default());
        let orders = Arc::new(InMemoryOrderDirectory::new());
        let sink = Arc::new(RecordingSink::default());
        let verifier = CallbackVerifier::new(
            SecretString::new(SERVER_KEY.into()),
            SignatureScheme::BodyDigest,
        );
        let service = PaymentService::new(
            Arc::new(InMemoryPaymentStore::new()),
            gateway.clone(),
            orders.clone(),
            verifier.clone(),
        )
        .with_options(ServiceOptions {
            callback_url: Some("https://pos.test/payments/callback".into()),
            notify_retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
            ..Default::default()
        })
        .with_notification_sink(sink.clone());

        Self {
            service: Arc::new(service),
            gateway,
            orders,
            sink,
            verifier,
        }
    }

    pub fn order(&self) -> Order {
        self.orders.insert(Order::new(
            Uuid::new_v4(),
            format!("ORD-{}", &Uuid::new_v4().simple().to_string()[..6]),
        ))
    }

    pub async fn create(&self, order: &Order, method: PaymentMethod, amount: i64) -> Payment {
        self.service
            .create_payment(CreatePayment {
                order_id: order.id,
                method,
                amount,
                notes: None,
            })
            .await
            .expect("create payment")
    }

    /// Create and dispatch an online payment
    pub async fn dispatched(&self, order: &Order, method: PaymentMethod, amount: i64) -> Payment {
        let payment = self.create(order, method, amount).await;
        self.service
            .process_payment(payment.id, method)
            .await
            .expect("process payment")
            .payment
    }

    /// Signed body-digest callback body
    pub fn callback(
        &self,
        invoice_number: &str,
        transaction_id: Option<&str>,
        status: &str,
        gross_amount: &str,
    ) -> Vec<u8> {
        let mut payload = CallbackPayload {
            order_id: invoice_number.to_string(),
            transaction_id: transaction_id.map(str::to_string),
            status_code: "200".to_string(),
            gross_amount: gross_amount.to_string(),
            transaction_status: status.to_string(),
            fraud_status: None,
            payment_type: None,
            signature_key: None,
        };
        payload.signature_key = Some(self.verifier.body_digest(
            &payload.order_id,
            &payload.status_code,
            &payload.gross_amount,
        ));
        serde_json::to_vec(&payload).expect("serialize callback")
    }

    pub fn callback_for(&self, payment: &Payment, status: &str) -> Vec<u8> {
        self.callback(
            &payment.invoice_number,
            payment.transaction_id.as_deref(),
            status,
            &format!("{}.00", payment.amount.amount),
        )
    }
}
