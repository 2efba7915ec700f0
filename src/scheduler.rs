//! # Background Job Scheduling
//!
//! A small in-process stand-in for a platform work manager:
//!
//! - **Identities**: every job is registered under a name. Submitting a job under
//!   a name that is already scheduled replaces (aborts) the previous one.
//! - **Recurring jobs** run immediately and then once per interval. A tick whose
//!   precondition is unmet is skipped.
//! - **One-shot jobs** run as soon as their precondition holds.
//! - **Retries**: a run that returns [`RunOutcome::Retry`] is re-attempted with
//!   exponential backoff, up to [`BackoffPolicy::max_attempts`] attempts per tick.
//! - **Exclusivity**: runs from every identity pass through one gate, so at most
//!   one job body executes at a time.
//!
//! Each attempt runs in its own task. A panicking job is reported as a retry
//! instead of taking the scheduler down, and cancelling an identity aborts its
//! in-flight attempt at the next suspension point.

use crate::config::ScheduleConfig;
use crate::evaluator::{Job, RunOutcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Identity of the recurring wait-time check
pub const PERIODIC_JOB: &str = "wait_time_check";
/// Identity of the on-demand wait-time check
pub const IMMEDIATE_JOB: &str = "wait_time_check_immediate";

/// Condition that must hold before a job body runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precondition {
    None,
    NetworkConnected,
}

/// Answers "is the network usable right now?".
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn is_connected(&self) -> bool;
}

/// Probe that reports connectivity when a TCP connection to the provider opens.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    /// Probe the host and port of `base_url`. `None` if the URL has no host.
    pub fn for_base_url(base_url: &str, timeout: Duration) -> Option<Self> {
        let url = reqwest::Url::parse(base_url).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(TcpProbe {
            addr: format!("{host}:{port}"),
            timeout,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl NetworkProbe for TcpProbe {
    async fn is_connected(&self) -> bool {
        matches!(
            time::timeout(self.timeout, TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        )
    }
}

/// Probe that always reports a connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeConnected;

#[async_trait]
impl NetworkProbe for AssumeConnected {
    async fn is_connected(&self) -> bool {
        true
    }
}

/// Exponential retry backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Attempts per tick, including the first
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        BackoffPolicy {
            initial: Duration::from_secs(config.retry_initial_secs),
            max: Duration::from_secs(config.retry_max_secs),
            max_attempts: config.retry_max_attempts.max(1),
        }
    }

    /// Delay before retry number `retry` (0-based): `initial * 2^retry`, capped at `max`.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&ScheduleConfig::default())
    }
}

/// Aborts the wrapped task when dropped, so cancelling the parent cancels it too.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// State shared by every scheduled task.
#[derive(Clone)]
struct RunContext {
    gate: Arc<tokio::sync::Mutex<()>>,
    probe: Arc<dyn NetworkProbe>,
    backoff: BackoffPolicy,
}

impl RunContext {
    async fn precondition_met(&self, precondition: Precondition) -> bool {
        match precondition {
            Precondition::None => true,
            Precondition::NetworkConnected => self.probe.is_connected().await,
        }
    }

    async fn run_with_retry(&self, identity: &str, job: &Arc<dyn Job>) -> RunOutcome {
        for attempt in 0..self.backoff.max_attempts {
            if attempt > 0 {
                time::sleep(self.backoff.delay(attempt - 1)).await;
            }
            if self.run_once(identity, job).await == RunOutcome::Success {
                return RunOutcome::Success;
            }
            warn!(identity, attempt = attempt + 1, "job requested retry");
        }
        warn!(
            identity,
            attempts = self.backoff.max_attempts,
            "retries exhausted, waiting for next schedule"
        );
        RunOutcome::Retry
    }

    async fn run_once(&self, identity: &str, job: &Arc<dyn Job>) -> RunOutcome {
        let _gate = self.gate.lock().await;
        debug!(identity, "job_started");
        let job = job.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move { job.run().await }));
        match (&mut task.0).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                error!(identity, "job panicked");
                RunOutcome::Retry
            }
            Err(_) => RunOutcome::Retry,
        }
    }
}

/// Runs [`Job`]s under named identities with replace-on-resubmit semantics.
pub struct JobScheduler {
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
    ctx: RunContext,
}

impl JobScheduler {
    pub fn new(probe: Arc<dyn NetworkProbe>, backoff: BackoffPolicy) -> Self {
        JobScheduler {
            jobs: Mutex::new(HashMap::new()),
            ctx: RunContext {
                gate: Arc::new(tokio::sync::Mutex::new(())),
                probe,
                backoff,
            },
        }
    }

    /// Run `job` now and then every `interval`, replacing any job under `identity`.
    pub fn schedule_recurring(
        &self,
        identity: &str,
        interval: Duration,
        precondition: Precondition,
        job: Arc<dyn Job>,
    ) {
        let ctx = self.ctx.clone();
        let name = identity.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !ctx.precondition_met(precondition).await {
                    info!(identity = %name, "precondition unmet, skipping tick");
                    continue;
                }
                ctx.run_with_retry(&name, &job).await;
            }
        });
        info!(identity, interval_secs = interval.as_secs(), "recurring_job_scheduled");
        self.replace(identity, handle);
    }

    /// Run `job` once as soon as `precondition` holds, replacing any job under
    /// `identity`. The receiver yields the final outcome; dropping it is fine.
    pub fn schedule_once(
        &self,
        identity: &str,
        precondition: Precondition,
        job: Arc<dyn Job>,
    ) -> oneshot::Receiver<RunOutcome> {
        let (tx, rx) = oneshot::channel();
        let ctx = self.ctx.clone();
        let name = identity.to_string();
        let handle = tokio::spawn(async move {
            let mut waits = 0;
            while !ctx.precondition_met(precondition).await {
                let delay = ctx.backoff.delay(waits);
                info!(
                    identity = %name,
                    delay_secs = delay.as_secs(),
                    "precondition unmet, waiting"
                );
                time::sleep(delay).await;
                waits += 1;
            }
            let outcome = ctx.run_with_retry(&name, &job).await;
            let _ = tx.send(outcome);
        });
        debug!(identity, "one_shot_job_scheduled");
        self.replace(identity, handle);
        rx
    }

    /// Cancel the job under `identity`. Returns whether a live job was cancelled.
    pub fn cancel(&self, identity: &str) -> bool {
        match self.jobs.lock().remove(identity) {
            Some(handle) => {
                let live = !handle.is_finished();
                handle.abort();
                if live {
                    info!(identity, "job_cancelled");
                }
                live
            }
            None => false,
        }
    }

    /// True while a job under `identity` is waiting or running.
    pub fn is_scheduled(&self, identity: &str) -> bool {
        self.jobs
            .lock()
            .get(identity)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Abort every job.
    pub fn shutdown(&self) {
        for (identity, handle) in self.jobs.lock().drain() {
            debug!(identity = %identity, "job_aborted");
            handle.abort();
        }
    }

    fn replace(&self, identity: &str, handle: JoinHandle<()>) {
        if let Some(previous) = self.jobs.lock().insert(identity.to_string(), handle) {
            if !previous.is_finished() {
                debug!(identity, "replacing scheduled job");
            }
            previous.abort();
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
