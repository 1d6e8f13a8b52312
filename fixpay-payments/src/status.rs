//! Payment state machine and gateway status mapping
//!
//! Every status mutation in the crate is decided here. [`decide`] is a pure
//! function of the stored status and the status a caller wants to reach;
//! the service commits its verdict with a compare-and-set in the store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created, waiting for money to move
    Pending,
    /// Settled
    Paid,
    /// Denied, expired or failed to dispatch
    Failed,
    /// Cancelled before settlement
    Cancelled,
    /// Money returned after settlement
    Refunded,
}

impl PaymentStatus {
    /// All states, in lifecycle order
    pub const ALL: [PaymentStatus; 5] = [
        Self::Pending,
        Self::Paid,
        Self::Failed,
        Self::Cancelled,
        Self::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Parse from the wire name
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Whether the state is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of the state machine for one requested transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Commit the new status
    Apply,
    /// Already there; succeed without side effects
    Unchanged,
    /// A late non-terminal report for a payment that has moved on; dropped
    /// without an anomaly
    Stale,
    /// Not a legal move; reject and record an anomaly
    Conflict,
}

/// Decide what to do when `target` is requested for a payment in `current`.
pub fn decide(current: PaymentStatus, target: PaymentStatus) -> Decision {
    use PaymentStatus::*;

    if current == target {
        return Decision::Unchanged;
    }
    match (current, target) {
        (Pending, Paid | Failed | Cancelled) => Decision::Apply,
        (Paid, Refunded) => Decision::Apply,
        (_, Pending) => Decision::Stale,
        _ => Decision::Conflict,
    }
}

/// `transaction_status` values reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Capture,
    Settlement,
    Pending,
    Authorize,
    Deny,
    Expire,
    Failure,
    Cancel,
    Refund,
    PartialRefund,
    Unknown(String),
}

impl GatewayStatus {
    /// Parse a raw gateway status
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "capture" => Self::Capture,
            "settlement" => Self::Settlement,
            "pending" => Self::Pending,
            "authorize" => Self::Authorize,
            "deny" => Self::Deny,
            "expire" => Self::Expire,
            "failure" => Self::Failure,
            "cancel" => Self::Cancel,
            "refund" => Self::Refund,
            "partial_refund" => Self::PartialRefund,
            _ => Self::Unknown(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Capture => "capture",
            Self::Settlement => "settlement",
            Self::Pending => "pending",
            Self::Authorize => "authorize",
            Self::Deny => "deny",
            Self::Expire => "expire",
            Self::Failure => "failure",
            Self::Cancel => "cancel",
            Self::Refund => "refund",
            Self::PartialRefund => "partial_refund",
            Self::Unknown(s) => s,
        }
    }

    /// Map to an internal status.
    ///
    /// `None` means the report is not understood and must not move the
    /// payment. A captured card held for fraud review stays pending.
    pub fn to_payment_status(&self, fraud_status: Option<&str>) -> Option<PaymentStatus> {
        match self {
            Self::Capture => match fraud_status.map(str::to_lowercase).as_deref() {
                Some("challenge") => Some(PaymentStatus::Pending),
                _ => Some(PaymentStatus::Paid),
            },
            Self::Settlement => Some(PaymentStatus::Paid),
            Self::Pending | Self::Authorize => Some(PaymentStatus::Pending),
            Self::Deny | Self::Expire | Self::Failure => Some(PaymentStatus::Failed),
            Self::Cancel => Some(PaymentStatus::Cancelled),
            Self::Refund => Some(PaymentStatus::Refunded),
            Self::PartialRefund | Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
