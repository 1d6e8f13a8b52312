//! Error types for the payment lifecycle

use crate::status::PaymentStatus;
use thiserror::Error;
use uuid::Uuid;

/// Reason code: amount is zero or negative.
pub const INVALID_AMOUNT: &str = "invalid_amount";
/// Reason code: method cannot be used for this operation.
pub const INVALID_PAYMENT_METHOD: &str = "invalid_payment_method";
/// Reason code: requested method differs from the stored one.
pub const PAYMENT_METHOD_MISMATCH: &str = "payment_method_mismatch";
/// Reason code: refund amount differs from the paid amount.
pub const PARTIAL_REFUND_UNSUPPORTED: &str = "partial_refund_unsupported";
/// Reason code: body could not be parsed.
pub const INVALID_PAYLOAD: &str = "invalid_payload";
/// Reason code: paging arguments out of range.
pub const INVALID_PAGINATION: &str = "invalid_pagination";

/// Payment error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentError {
    /// Order unknown to the order collaborator
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    /// Payment unknown to the store
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// Caller supplied an invalid value
    #[error("Invalid input ({code}): {message}")]
    InvalidInput { code: &'static str, message: String },

    /// Callback signature did not verify
    #[error("Invalid callback signature")]
    InvalidSignature,

    /// Network failure, timeout or 5xx from the gateway
    #[error("Gateway unavailable: {0}")]
    GatewayTransient(String),

    /// Gateway explicitly denied the request
    #[error("Gateway rejected the request ({code}): {message}")]
    GatewayRejected { code: String, message: String },

    /// Transition not allowed, or a report that contradicts stored state
    #[error("State conflict on payment {payment_id}: {message}")]
    StateConflict { payment_id: Uuid, message: String },

    /// Uniqueness violation in the store
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Order service could not be reached
    #[error("Order service unavailable: {0}")]
    OrderService(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// Build an `InvalidInput` error with a reason code
    pub fn invalid(code: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            code,
            message: message.into(),
        }
    }

    /// Build a `StateConflict` for an illegal transition
    pub fn transition_conflict(
        payment_id: Uuid,
        current: PaymentStatus,
        attempted: PaymentStatus,
    ) -> Self {
        Self::StateConflict {
            payment_id,
            message: format!("cannot move from {} to {}", current, attempted),
        }
    }

    /// Build a `StateConflict` with a free-form message
    pub fn conflict(payment_id: Uuid, message: impl Into<String>) -> Self {
        Self::StateConflict {
            payment_id,
            message: message.into(),
        }
    }

    /// Stable reason code exposed to API callers
    pub fn code(&self) -> &'static str {
        match self {
            Self::OrderNotFound(_) => "order_not_found",
            Self::PaymentNotFound(_) => "payment_not_found",
            Self::InvalidInput { code, .. } => *code,
            Self::InvalidSignature => "invalid_signature",
            Self::GatewayTransient(_) => "gateway_unavailable",
            Self::GatewayRejected { .. } => "gateway_rejected",
            Self::StateConflict { .. } => "state_conflict",
            Self::Duplicate(_) => "duplicate",
            Self::OrderService(_) => "order_service_unavailable",
            Self::Config(_) => "configuration_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the same call may succeed if repeated later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayTransient(_) | Self::OrderService(_))
    }

    /// Whether the error was caused by the caller
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::OrderNotFound(_) | Self::PaymentNotFound(_) | Self::InvalidInput { .. }
        )
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PaymentError::Serialization(err.to_string())
        } else {
            PaymentError::GatewayTransient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::Serialization(err.to_string())
    }
}

/// Result type for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        let err = PaymentError::invalid(INVALID_AMOUNT, "amount must be positive");
        assert_eq!(err.code(), "invalid_amount");
        assert!(err.is_client_error());
        assert!(!err.is_retryable());

        assert_eq!(PaymentError::InvalidSignature.code(), "invalid_signature");
        assert_eq!(
            PaymentError::OrderNotFound(Uuid::nil()).code(),
            "order_not_found"
        );
    }

    #[test]
    fn test_transition_conflict_message() {
        let id = Uuid::new_v4();
        let err =
            PaymentError::transition_conflict(id, PaymentStatus::Paid, PaymentStatus::Failed);
        assert_eq!(err.code(), "state_conflict");
        assert!(err.to_string().contains("cannot move from paid to failed"));
    }

    #[test]
    fn test_retryable() {
        assert!(PaymentError::GatewayTransient("timeout".into()).is_retryable());
        assert!(PaymentError::OrderService("502".into()).is_retryable());
        assert!(
            !PaymentError::GatewayRejected {
                code: "202".into(),
                message: "denied".into()
            }
            .is_retryable()
        );
    }
}
