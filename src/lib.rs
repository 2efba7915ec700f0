//! # Wait Alert Core Library
//!
//! This library provides the data structures and services behind the wait-alert
//! watcher: live attraction wait times fetched from a public REST API, durable
//! favorites and wait-time alerts, and a periodic background evaluation that fires
//! a notification once an alert's condition holds.
//!
//! ## Design Philosophy
//!
//! ### Small, Injected Collaborators
//! The evaluation routine never talks to the network, the disk or the desktop
//! directly. It is handed an [`store::AlertStore`], a [`wait_times::WaitTimeSource`]
//! and a [`notifier::Notifier`], which keeps it testable with in-memory fakes.
//!
//! ### One-Shot Alerts
//! An alert reads "notify me when attraction X's wait drops to N minutes or less".
//! It fires at most once: after the notification is sent the alert is removed.
//!
//! ### Data Flow
//! 1. **Tick**: the [`scheduler::JobScheduler`] invokes the evaluator every 15 minutes
//!    (only while the network is reachable), plus on-demand runs
//! 2. **Fetch**: one consistent snapshot of attraction states per run
//! 3. **Match**: open attractions at or below the target trigger their alert
//! 4. **Notify + remove**: partial progress is safe, the next tick re-evaluates the rest
//!
//! ## Core Types
//! - [`Alert`]: a user-defined wait-time threshold for one attraction
//! - [`AttractionState`]: the live status and wait time of one attraction
//! - [`AttractionStatus`]: normalized open/closed status

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Module declarations
pub mod config;
pub mod evaluator;
pub mod notifier;
pub mod scheduler;
pub mod store;
pub mod wait_times;

/// Reasons an [`Alert`] cannot be created.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AlertError {
    /// Alerts are keyed by attraction code, so it may not be blank
    #[error("attraction code must not be empty")]
    EmptyCode,

    /// A zero-minute target would only ever fire on a walk-on
    #[error("target wait time must be greater than zero minutes")]
    ZeroTarget,
}

/// A user-defined wait-time threshold for a single attraction.
///
/// The store holds at most one alert per `attraction_code`; saving a new alert for
/// a code that already has one replaces it.
///
/// Serialized with camelCase keys so the persisted payload reads
/// `{"attractionCode": .., "attractionName": .., "targetTimeMinutes": ..}`.
///
/// # Example
/// ```
/// use wait_alert_lib::Alert;
///
/// let alert = Alert::new("silverstar", "Silver Star", 20).unwrap();
/// assert_eq!(alert.target_time_minutes, 20);
///
/// assert!(Alert::new("", "Nameless", 20).is_err());
/// assert!(Alert::new("silverstar", "Silver Star", 0).is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Attraction identifier, unique key within the store
    pub attraction_code: String,
    /// Human-readable attraction name, display only
    pub attraction_name: String,
    /// Notify once the wait is at or below this many minutes
    #[serde(alias = "targetTime")]
    pub target_time_minutes: u32,
}

impl Alert {
    /// Build a validated alert.
    pub fn new(
        attraction_code: impl Into<String>,
        attraction_name: impl Into<String>,
        target_time_minutes: u32,
    ) -> Result<Self, AlertError> {
        let attraction_code = attraction_code.into();
        if attraction_code.trim().is_empty() {
            return Err(AlertError::EmptyCode);
        }
        if target_time_minutes == 0 {
            return Err(AlertError::ZeroTarget);
        }
        Ok(Alert {
            attraction_code,
            attraction_name: attraction_name.into(),
            target_time_minutes,
        })
    }

    /// True when `state` satisfies this alert: the attraction is open and its wait
    /// is at or below the target.
    pub fn is_triggered_by(&self, state: &AttractionState) -> bool {
        state.status == AttractionStatus::Open
            && state.wait_time_minutes <= self.target_time_minutes
    }
}

/// Normalized operating status of an attraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttractionStatus {
    Open,
    Closed,
    Unknown,
}

impl AttractionStatus {
    /// Normalize a provider status string.
    ///
    /// Only `"opened"` (any case) counts as open. The provider reports a range of
    /// reasons for an attraction being unavailable; `"closed"` maps to `Closed` and
    /// everything else to `Unknown`.
    ///
    /// ```
    /// use wait_alert_lib::AttractionStatus;
    ///
    /// assert_eq!(AttractionStatus::from_wire("Opened"), AttractionStatus::Open);
    /// assert_eq!(AttractionStatus::from_wire("closed"), AttractionStatus::Closed);
    /// assert_eq!(AttractionStatus::from_wire("maintenance"), AttractionStatus::Unknown);
    /// ```
    pub fn from_wire(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("opened") {
            AttractionStatus::Open
        } else if raw.eq_ignore_ascii_case("closed") {
            AttractionStatus::Closed
        } else {
            AttractionStatus::Unknown
        }
    }

    /// Short label for terminal output
    pub fn label(self) -> &'static str {
        match self {
            AttractionStatus::Open => "open",
            AttractionStatus::Closed => "closed",
            AttractionStatus::Unknown => "unknown",
        }
    }
}

/// Live state of one attraction, produced fresh on every fetch and never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttractionState {
    /// Attraction identifier, matched against [`Alert::attraction_code`]
    pub code: String,
    /// Human-readable name (not used when matching alerts)
    pub name: String,
    /// Normalized operating status
    pub status: AttractionStatus,
    /// Current wait in minutes
    pub wait_time_minutes: u32,
}
