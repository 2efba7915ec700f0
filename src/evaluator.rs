//! # Alert Evaluation
//!
//! One evaluation pass, invoked once per scheduler tick:
//!
//! 1. Snapshot the alert store. No alerts, no network request.
//! 2. Fetch current attraction states once. A failed fetch requests a retry and
//!    leaves the store untouched.
//! 3. Walk the alerts in attraction-code order. An alert whose attraction is open
//!    with a wait at or below the target is notified, then removed. Alerts whose
//!    attraction is missing from the fetch are skipped and kept.
//!
//! A store failure midway through requests a retry as well. Removals completed
//! before the failure stay in place; the next tick re-evaluates whatever is left.

use crate::notifier::Notifier;
use crate::store::{AlertStore, StoreError};
use crate::wait_times::{FetchError, WaitTimeSource};
use crate::{Alert, AttractionState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a pass ended without completing.
#[derive(Error, Debug)]
pub enum EvaluationError {
    /// Wait times could not be fetched; the store was not touched
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The store failed; earlier removals in this pass persist
    #[error("alert store failed: {0}")]
    Store(#[from] StoreError),
}

/// What a run tells its scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The pass completed; zero or more alerts may have fired
    Success,
    /// Run again later per the scheduler's backoff policy
    Retry,
}

/// A unit of background work the scheduler can run.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self) -> RunOutcome;
}

/// An alert that fired during a pass, with the wait that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triggered {
    pub alert: Alert,
    pub wait_time_minutes: u32,
}

/// Summary of one successful pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationReport {
    pub checked_at: DateTime<Utc>,
    /// False when the store was empty and nothing was fetched
    pub fetched: bool,
    pub triggered: Vec<Triggered>,
    /// Matched an attraction but the condition did not hold
    pub pending: Vec<Alert>,
    /// Attraction codes absent from the fetched states
    pub unmatched: Vec<String>,
}

impl EvaluationReport {
    fn idle(checked_at: DateTime<Utc>) -> Self {
        EvaluationReport {
            checked_at,
            fetched: false,
            triggered: Vec::new(),
            pending: Vec::new(),
            unmatched: Vec::new(),
        }
    }
}

/// Matches stored alerts against live wait times.
pub struct AlertEvaluator {
    store: Arc<dyn AlertStore>,
    source: Arc<dyn WaitTimeSource>,
    notifier: Arc<dyn Notifier>,
}

impl AlertEvaluator {
    pub fn new(
        store: Arc<dyn AlertStore>,
        source: Arc<dyn WaitTimeSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        AlertEvaluator {
            store,
            source,
            notifier,
        }
    }

    /// Run one pass and report in detail.
    pub async fn evaluate(&self) -> Result<EvaluationReport, EvaluationError> {
        let checked_at = Utc::now();

        let mut alerts = self.store.get_all()?;
        if alerts.is_empty() {
            debug!("no active alerts, skipping fetch");
            return Ok(EvaluationReport::idle(checked_at));
        }
        alerts.sort_by(|a, b| a.attraction_code.cmp(&b.attraction_code));

        let states = self.source.fetch_current().await?;
        // First record wins when the provider repeats a code
        let mut by_code: HashMap<&str, &AttractionState> = HashMap::new();
        for state in &states {
            by_code.entry(state.code.as_str()).or_insert(state);
        }

        let mut report = EvaluationReport {
            fetched: true,
            ..EvaluationReport::idle(checked_at)
        };

        for alert in alerts {
            let Some(state) = by_code.get(alert.attraction_code.as_str()) else {
                debug!(
                    code = %alert.attraction_code,
                    "attraction missing from wait times, keeping alert"
                );
                report.unmatched.push(alert.attraction_code);
                continue;
            };

            if !alert.is_triggered_by(state) {
                report.pending.push(alert);
                continue;
            }

            info!(
                code = %alert.attraction_code,
                name = %alert.attraction_name,
                wait = state.wait_time_minutes,
                target_minutes = alert.target_time_minutes,
                "alert_triggered"
            );
            self.notifier.notify(&alert, state.wait_time_minutes);
            self.store.remove(&alert.attraction_code)?;
            report.triggered.push(Triggered {
                alert,
                wait_time_minutes: state.wait_time_minutes,
            });
        }

        Ok(report)
    }
}

#[async_trait]
impl Job for AlertEvaluator {
    async fn run(&self) -> RunOutcome {
        match self.evaluate().await {
            Ok(report) => {
                info!(
                    fetched = report.fetched,
                    triggered = report.triggered.len(),
                    pending = report.pending.len(),
                    unmatched = report.unmatched.len(),
                    "evaluation_complete"
                );
                RunOutcome::Success
            }
            Err(failure) => {
                warn!(error = %failure, "evaluation failed, requesting retry");
                RunOutcome::Retry
            }
        }
    }
}
