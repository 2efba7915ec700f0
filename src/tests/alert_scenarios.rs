//! # End-to-End Alert Scenarios
//!
//! These tests drive the evaluator through whole ticks with a durable file-backed
//! store, a scripted wait-time source and a recording notifier, checking the
//! behavioral guarantees of the alert loop rather than individual functions.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wait_alert_lib::evaluator::{AlertEvaluator, Job, RunOutcome};
use wait_alert_lib::notifier::{notification_id, RecordingNotifier};
use wait_alert_lib::scheduler::{
    AssumeConnected, BackoffPolicy, JobScheduler, Precondition, IMMEDIATE_JOB, PERIODIC_JOB,
};
use wait_alert_lib::store::{AlertRepository, AlertStore, FilePreferences, KeyValueStore};
use wait_alert_lib::wait_times::{FetchError, WaitTimeSource};
use wait_alert_lib::{Alert, AttractionState, AttractionStatus};

/// Wait-time source replaying one scripted response per fetch.
#[derive(Default)]
struct Ticks {
    responses: Mutex<VecDeque<Result<Vec<AttractionState>, FetchError>>>,
    fetches: AtomicUsize,
}

impl Ticks {
    fn then(&self, states: Vec<AttractionState>) -> &Self {
        self.responses.lock().push_back(Ok(states));
        self
    }

    fn then_fail(&self) -> &Self {
        let err = serde_json::from_str::<Vec<u32>>("<html>").unwrap_err();
        self.responses.lock().push_back(Err(FetchError::Parse(err)));
        self
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WaitTimeSource for Ticks {
    async fn fetch_current(&self) -> Result<Vec<AttractionState>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .pop_front()
            .expect("test fetched more often than scripted")
    }
}

/// Wait-time source whose fetch hangs for an hour before answering.
#[derive(Default)]
struct Stalled {
    fetches: AtomicUsize,
}

#[async_trait]
impl WaitTimeSource for Stalled {
    async fn fetch_current(&self) -> Result<Vec<AttractionState>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60 * 60)).await;
        Ok(vec![state("coaster_a", AttractionStatus::Open, 0)])
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<AlertRepository>,
    source: Arc<Ticks>,
    notifier: Arc<RecordingNotifier>,
    evaluator: Arc<AlertEvaluator>,
}

impl Harness {
    fn new(alerts: &[(&str, &str, u32)]) -> Self {
        let dir = TempDir::new().expect("Should create temp dir");
        let prefs: Arc<dyn KeyValueStore> = Arc::new(
            FilePreferences::open(dir.path().join("prefs.json")).expect("Should open prefs"),
        );
        let store = Arc::new(AlertRepository::new(prefs));
        for (code, name, target) in alerts {
            store.upsert(Alert::new(*code, *name, *target).unwrap()).unwrap();
        }
        let source = Arc::new(Ticks::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let evaluator = Arc::new(AlertEvaluator::new(
            store.clone(),
            source.clone(),
            notifier.clone(),
        ));
        Harness {
            _dir: dir,
            store,
            source,
            notifier,
            evaluator,
        }
    }

    fn stored(&self) -> Vec<Alert> {
        let mut alerts = self.store.get_all().unwrap();
        alerts.sort_by(|a, b| a.attraction_code.cmp(&b.attraction_code));
        alerts
    }
}

fn state(code: &str, status: AttractionStatus, wait: u32) -> AttractionState {
    AttractionState {
        code: code.to_string(),
        name: code.to_string(),
        status,
        wait_time_minutes: wait,
    }
}

/// Removing the same code twice leaves the store as removing it once.
#[test]
fn removal_is_idempotent() {
    let h = Harness::new(&[("coaster_a", "Coaster A", 20), ("flume_b", "Flume B", 10)]);

    h.store.remove("coaster_a").unwrap();
    let after_once = h.stored();
    h.store.remove("coaster_a").unwrap();

    assert_eq!(h.stored(), after_once);
    assert_eq!(after_once.len(), 1);
}

/// An alert fires exactly once, on the first tick where the wait drops to target.
#[tokio::test]
async fn alert_fires_once_then_disappears() {
    let h = Harness::new(&[("coaster_a", "Coaster A", 20)]);
    h.source
        .then(vec![state("coaster_a", AttractionStatus::Open, 35)])
        .then(vec![state("coaster_a", AttractionStatus::Open, 20)]);

    assert_eq!(h.evaluator.run().await, RunOutcome::Success);
    assert!(h.notifier.delivered().is_empty());
    assert_eq!(h.stored().len(), 1);

    assert_eq!(h.evaluator.run().await, RunOutcome::Success);
    let delivered = h.notifier.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].current_wait_minutes, 20);
    assert_eq!(delivered[0].id, notification_id("coaster_a"));
    assert!(h.stored().is_empty());

    // Nothing left to check, so a third tick never reaches the network
    assert_eq!(h.evaluator.run().await, RunOutcome::Success);
    assert_eq!(h.source.fetches(), 2);
    assert_eq!(h.notifier.delivered().len(), 1);
}

/// An empty store never triggers a fetch.
#[tokio::test]
async fn idle_store_skips_network() {
    let h = Harness::new(&[]);

    assert_eq!(h.evaluator.run().await, RunOutcome::Success);
    assert_eq!(h.source.fetches(), 0);
}

/// Closed or unknown attractions never trigger, even at zero minutes.
#[tokio::test]
async fn non_open_attractions_never_trigger() {
    let h = Harness::new(&[("closed", "Closed", 30), ("unknown", "Unknown", 30)]);
    h.source.then(vec![
        state("closed", AttractionStatus::Closed, 0),
        state("unknown", AttractionStatus::Unknown, 0),
    ]);

    assert_eq!(h.evaluator.run().await, RunOutcome::Success);
    assert!(h.notifier.delivered().is_empty());
    assert_eq!(h.stored().len(), 2);
}

/// A failed fetch requests a retry and leaves the store exactly as it was.
#[tokio::test]
async fn fetch_failure_is_non_destructive() {
    let h = Harness::new(&[("coaster_a", "Coaster A", 20), ("flume_b", "Flume B", 10)]);
    let before = h.stored();
    h.source.then_fail();

    assert_eq!(h.evaluator.run().await, RunOutcome::Retry);
    assert_eq!(h.stored(), before);
    assert!(h.notifier.delivered().is_empty());
}

/// Alerts for attractions missing from the fetch stay untouched.
#[tokio::test]
async fn unmatched_alert_persists() {
    let h = Harness::new(&[("retired_ride", "Retired Ride", 60)]);
    h.source.then(vec![state("coaster_a", AttractionStatus::Open, 0)]);

    let report = h.evaluator.evaluate().await.unwrap();
    assert_eq!(report.unmatched, vec!["retired_ride".to_string()]);
    assert_eq!(
        h.stored(),
        vec![Alert::new("retired_ride", "Retired Ride", 60).unwrap()]
    );
}

/// Store {coaster_a <= 20}, coaster_a open at 15: notified with 15, store empty.
#[tokio::test]
async fn single_open_alert_below_target() {
    let h = Harness::new(&[("coaster_a", "Coaster A", 20)]);
    h.source.then(vec![state("coaster_a", AttractionStatus::Open, 15)]);

    assert_eq!(h.evaluator.run().await, RunOutcome::Success);

    let delivered = h.notifier.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].attraction_code, "coaster_a");
    assert_eq!(delivered[0].current_wait_minutes, 15);
    assert_eq!(delivered[0].title, "Wait time for Coaster A is low!");
    assert!(h.stored().is_empty());
}

/// One alert above target, one attraction closed at zero: nothing fires.
#[tokio::test]
async fn above_target_and_closed_leave_store_unchanged() {
    let h = Harness::new(&[("coaster_a", "Coaster A", 20), ("flume_b", "Flume B", 10)]);
    let before = h.stored();
    h.source.then(vec![
        state("coaster_a", AttractionStatus::Open, 25),
        state("flume_b", AttractionStatus::Closed, 0),
    ]);

    assert_eq!(h.evaluator.run().await, RunOutcome::Success);
    assert!(h.notifier.delivered().is_empty());
    assert_eq!(h.stored(), before);
}

/// The recurring job retries a failed tick and fires once the fetch recovers.
#[tokio::test(start_paused = true)]
async fn scheduler_retries_failed_tick() {
    let h = Harness::new(&[("coaster_a", "Coaster A", 20)]);
    h.source
        .then_fail()
        .then(vec![state("coaster_a", AttractionStatus::Open, 10)]);

    let scheduler = JobScheduler::new(
        Arc::new(AssumeConnected),
        BackoffPolicy {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(300),
            max_attempts: 3,
        },
    );
    scheduler.schedule_recurring(
        PERIODIC_JOB,
        Duration::from_secs(15 * 60),
        Precondition::NetworkConnected,
        h.evaluator.clone(),
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.source.fetches(), 2);
    assert_eq!(h.notifier.delivered().len(), 1);
    assert!(h.stored().is_empty());
    scheduler.shutdown();
}

/// Cancelling a check while its fetch is in flight leaves alerts and notifications alone.
#[tokio::test(start_paused = true)]
async fn cancel_during_fetch_leaves_store_unchanged() {
    let h = Harness::new(&[("coaster_a", "Coaster A", 20)]);
    let before = h.stored();
    let source = Arc::new(Stalled::default());
    let evaluator = Arc::new(AlertEvaluator::new(
        h.store.clone(),
        source.clone(),
        h.notifier.clone(),
    ));

    let scheduler = JobScheduler::new(Arc::new(AssumeConnected), BackoffPolicy::default());
    let outcome = scheduler.schedule_once(IMMEDIATE_JOB, Precondition::None, evaluator);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

    assert!(scheduler.cancel(IMMEDIATE_JOB));
    assert!(outcome.await.is_err(), "Should drop the outcome of a cancelled run");
    tokio::time::sleep(Duration::from_secs(2 * 60 * 60)).await;

    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    assert!(h.notifier.delivered().is_empty());
    assert_eq!(h.stored(), before);
}
