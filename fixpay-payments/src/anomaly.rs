//! Anomalies kept for manual review

use crate::status::PaymentStatus;
use crate::types::TransitionSource;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;
use uuid::Uuid;

/// Default number of anomalies retained
pub const DEFAULT_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyKind {
    /// A report that would move a payment somewhere it cannot go
    StateConflict {
        current: PaymentStatus,
        reported: PaymentStatus,
    },
    /// A gateway status with no mapping
    UnknownGatewayStatus { raw: String },
    /// Gateway amount differs from the stored amount
    AmountMismatch { expected: i64, reported: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    pub id: Uuid,
    pub payment_id: Uuid,
    #[serde(flatten)]
    pub kind: AnomalyKind,
    pub source: TransitionSource,
    pub recorded_at: DateTime<Utc>,
}

/// Bounded in-memory anomaly log; oldest entries fall off first
#[derive(Debug)]
pub struct AnomalyLog {
    entries: RwLock<VecDeque<Anomaly>>,
    capacity: usize,
}

impl Default for AnomalyLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl AnomalyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    /// Record an anomaly and emit it at `warn`
    pub fn record(&self, payment_id: Uuid, kind: AnomalyKind, source: TransitionSource) -> Anomaly {
        let anomaly = Anomaly {
            id: Uuid::new_v4(),
            payment_id,
            kind,
            source,
            recorded_at: Utc::now(),
        };
        warn!(
            payment_id = %payment_id,
            source = %source,
            anomaly = ?anomaly.kind,
            "Payment anomaly recorded"
        );

        let mut entries = self.entries.write();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(anomaly.clone());
        anomaly
    }

    /// All retained anomalies, newest first
    pub fn list(&self) -> Vec<Anomaly> {
        self.entries.read().iter().rev().cloned().collect()
    }

    pub fn for_payment(&self, payment_id: Uuid) -> Vec<Anomaly> {
        self.entries
            .read()
            .iter()
            .rev()
            .filter(|a| a.payment_id == payment_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
