// fixpay - payment lifecycle for a repair-service point of sale
//
// This crate bundles the payment core and, with the `server` feature, the
// HTTP surface that exposes it.

// Re-export the payment core
pub use fixpay_payments as payments;
pub use fixpay_payments::*;

#[cfg(feature = "server")]
pub use fixpay_server as server;

#[cfg(feature = "server")]
pub use fixpay_server::{AppConfig, AppState, build_state, build_state_with, router, serve};

/// Prelude for common imports
///
/// ```
/// use fixpay::prelude::*;
/// ```
pub mod prelude {
    pub use fixpay_payments::{
        CallbackVerifier, CreatePayment, InMemoryOrderDirectory, InMemoryPaymentStore, Money,
        OrderCollaborator, Payment, PaymentError, PaymentGateway, PaymentMethod, PaymentResult,
        PaymentService, PaymentStatus, Reconciler, SignatureScheme,
    };

    #[cfg(feature = "server")]
    pub use fixpay_server::{ApiError, AppConfig, AppState, router};
}
