//! Payment lifecycle for the fixpay point-of-sale backend
//!
//! Creates payments against repair orders, dispatches them to an external
//! gateway under per-method charge schemes, accepts signed callbacks that may
//! arrive late, twice or never, and reconciles gateway truth against local
//! state on a schedule.
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        PaymentService                            │
//! │  create | process | handle_callback | refund | queries           │
//! │                            │                                     │
//! │                  transition() ── decide() ── CAS                 │
//! │                            │                                     │
//! │    ┌───────────────┬───────┴────────┬──────────────────┐         │
//! │    ▼               ▼                ▼                  ▼         │
//! │ PaymentStore  PaymentGateway  OrderCollaborator   AnomalyLog     │
//! │               (Midtrans)      (HTTP / in-memory)                 │
//! │                    ▲                                             │
//! │               Reconciler ── status() every interval              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fixpay_payments::*;
//!
//! let gateway = MidtransGateway::new(GatewayConfig::sandbox("SB-Mid-server-..."))?;
//! let service = PaymentService::new(
//!     Arc::new(InMemoryPaymentStore::new()),
//!     Arc::new(gateway),
//!     Arc::new(HttpOrderClient::new("http://orders.internal", Duration::from_secs(5))?),
//!     CallbackVerifier::new(server_key, SignatureScheme::BodyDigest),
//! );
//!
//! let payment = service.create_payment(CreatePayment {
//!     order_id,
//!     method: PaymentMethod::BankTransfer,
//!     amount: 500_000,
//!     notes: None,
//! }).await?;
//! let charge = service.process_payment(payment.id, PaymentMethod::BankTransfer).await?;
//! ```

pub mod anomaly;
pub mod error;
pub mod gateway;
pub mod method;
pub mod money;
pub mod notify;
pub mod orders;
pub mod reconcile;
pub mod retry;
pub mod service;
pub mod status;
pub mod store;
pub mod types;
pub mod webhook;

pub mod providers;

pub use anomaly::*;
pub use error::*;
pub use gateway::*;
pub use method::*;
pub use money::*;
pub use notify::*;
pub use orders::*;
pub use reconcile::*;
pub use retry::*;
pub use service::*;
pub use status::*;
pub use store::*;
pub use types::*;
pub use webhook::*;

#[cfg(feature = "midtrans")]
pub use providers::MidtransGateway;
