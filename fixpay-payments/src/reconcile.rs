//! Reconciliation loop
//!
//! Webhooks get lost. On a fixed interval the reconciler asks the gateway
//! about every dispatched payment that has sat in `pending` past a grace
//! period and feeds the answer through the same transition function the
//! webhook uses.

use crate::error::PaymentError;
use crate::service::PaymentService;
use crate::types::StatusOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Reconciler already running")]
    AlreadyRunning,

    #[error("Reconciler not running")]
    NotRunning,

    #[error("Invalid reconciler configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Time between passes
    pub interval: Duration,

    /// How long a dispatched payment may stay pending before it is checked
    pub grace_period: Duration,

    /// Payments examined per pass
    pub batch_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            grace_period: Duration::from_secs(600),
            batch_size: 100,
        }
    }
}

/// Counters for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Unknown gateway statuses
    pub ignored: usize,
    pub failed: usize,
    pub conflicts: usize,
    /// Pass not run because another was in flight
    pub skipped: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ReconcileReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

/// One reconciliation pass; cheap to clone into the loop task
#[derive(Clone)]
struct Pass {
    service: Arc<PaymentService>,
    config: ReconcileConfig,
    in_flight: Arc<Mutex<()>>,
    last_report: Arc<RwLock<Option<ReconcileReport>>>,
}

impl Pass {
    async fn run(&self) -> ReconcileResult<ReconcileReport> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Reconciliation pass already in flight, skipping");
            return Ok(ReconcileReport::skipped());
        };

        let grace = chrono::Duration::from_std(self.config.grace_period)
            .map_err(|e| ReconcileError::Config(e.to_string()))?;
        let cutoff = Utc::now() - grace;

        let mut report = ReconcileReport {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        let candidates = self
            .service
            .reconcile_candidates(cutoff, self.config.batch_size)
            .await?;

        for payment in candidates {
            report.checked += 1;
            let payment_id = payment.id;
            match self.service.reconcile_payment(payment).await {
                Ok(StatusOutcome::Applied { .. }) => report.updated += 1,
                Ok(StatusOutcome::Unchanged { .. }) => report.unchanged += 1,
                Ok(StatusOutcome::Ignored { .. }) => report.ignored += 1,
                Err(PaymentError::StateConflict { .. }) => report.conflicts += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(payment_id = %payment_id, error = %err, "Reconciliation failed for payment");
                }
            }
        }

        report.finished_at = Some(Utc::now());
        if report.checked > 0 {
            info!(
                checked = report.checked,
                updated = report.updated,
                unchanged = report.unchanged,
                ignored = report.ignored,
                failed = report.failed,
                conflicts = report.conflicts,
                "Reconciliation pass complete"
            );
        }
        *self.last_report.write().await = Some(report.clone());
        Ok(report)
    }
}

/// Background reconciler.
pub struct Reconciler {
    pass: Pass,
    running: Arc<RwLock<bool>>,
    shutdown: parking_lot::Mutex<Option<watch::Sender<bool>>>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Reconciler {
    pub fn new(service: Arc<PaymentService>, config: ReconcileConfig) -> Self {
        debug!(
            interval = ?config.interval,
            grace_period = ?config.grace_period,
            batch_size = config.batch_size,
            "Reconciler configured"
        );
        Self {
            pass: Pass {
                service,
                config,
                in_flight: Arc::new(Mutex::new(())),
                last_report: Arc::new(RwLock::new(None)),
            },
            running: Arc::new(RwLock::new(false)),
            shutdown: parking_lot::Mutex::new(None),
            handle: parking_lot::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.pass.config
    }

    /// Run one pass now. Returns a skipped report if a pass is in flight.
    pub async fn run_once(&self) -> ReconcileResult<ReconcileReport> {
        self.pass.run().await
    }

    /// Start the loop on the current runtime.
    pub async fn start(&self) -> ReconcileResult<()> {
        if self.pass.config.interval.is_zero() {
            return Err(ReconcileError::Config("interval must be non-zero".into()));
        }

        let mut running = self.running.write().await;
        if *running {
            warn!("Reconciler already running");
            return Err(ReconcileError::AlreadyRunning);
        }
        *running = true;
        drop(running);

        let (tx, mut rx) = watch::channel(false);
        let pass = self.pass.clone();
        let interval = pass.config.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; wait a full interval.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = pass.run().await {
                            error!(error = %err, "Reconciliation pass failed");
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Reconciliation loop exited");
        });

        *self.shutdown.lock() = Some(tx);
        *self.handle.lock() = Some(handle);
        info!(interval = ?interval, "Reconciler started");
        Ok(())
    }

    /// Stop the loop, letting an in-flight pass finish.
    pub async fn stop(&self) -> ReconcileResult<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Err(ReconcileError::NotRunning);
        }
        *running = false;
        drop(running);

        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "Reconciliation task ended abnormally");
            }
        }

        info!("Reconciler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Report of the most recent completed pass
    pub async fn last_report(&self) -> Option<ReconcileReport> {
        self.pass.last_report.read().await.clone()
    }
}
