//! # Wait-Time Notifications
//!
//! Delivery is fire-and-forget: a [`Notifier`] never reports failure back to the
//! evaluator, it logs and moves on. Every notification carries an identity derived
//! from the attraction code, so a second notification for the same attraction
//! replaces the first instead of stacking.

use crate::Alert;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use tracing::{info, warn};

/// Stable notification identity for an attraction code.
///
/// 31-multiplier polynomial hash over UTF-16 code units with wrapping `i32`
/// arithmetic. The same code always yields the same id across runs and builds.
///
/// ```
/// use wait_alert_lib::notifier::notification_id;
///
/// assert_eq!(notification_id("a"), 97);
/// assert_eq!(notification_id("silverstar"), notification_id("silverstar"));
/// ```
pub fn notification_id(attraction_code: &str) -> i32 {
    attraction_code
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32))
}

/// A rendered notification ready for delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Replace-on-repeat identity, see [`notification_id`]
    pub id: i32,
    pub attraction_code: String,
    pub title: String,
    pub body: String,
    /// Longer text for surfaces that can expand a notification
    pub detail: String,
    pub current_wait_minutes: u32,
    pub target_minutes: u32,
}

impl Notification {
    pub fn for_alert(alert: &Alert, current_wait_minutes: u32) -> Self {
        Notification {
            id: notification_id(&alert.attraction_code),
            attraction_code: alert.attraction_code.clone(),
            title: format!("Wait time for {} is low!", alert.attraction_name),
            body: format!(
                "Current wait time is {} minutes (target: at most {} min).",
                current_wait_minutes, alert.target_time_minutes
            ),
            detail: format!(
                "Current wait time is {} minutes. Go catch a ride!",
                current_wait_minutes
            ),
            current_wait_minutes,
            target_minutes: alert.target_time_minutes,
        }
    }
}

/// Emits a user-visible notification for a triggered alert.
pub trait Notifier: Send + Sync {
    /// Deliver the notification. Must not panic on delivery failure.
    fn notify(&self, alert: &Alert, current_wait_minutes: u32);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, alert: &Alert, current_wait_minutes: u32) {
        let notification = Notification::for_alert(alert, current_wait_minutes);
        info!(
            id = notification.id,
            code = %notification.attraction_code,
            wait = notification.current_wait_minutes,
            target_minutes = notification.target_minutes,
            "{}",
            notification.title
        );
    }
}

/// Runs an external program per notification, appending title and body as the
/// last two arguments (`notify-send`, a push script, ...).
///
/// The child is spawned and not awaited; a missing program is logged.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
}

impl CommandNotifier {
    /// Build from `[program, leading args...]`. Returns `None` for an empty command.
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(CommandNotifier {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn command_for(&self, notification: &Notification) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&notification.title)
            .arg(&notification.body)
            .env("WAIT_ALERT_ID", notification.id.to_string())
            .env("WAIT_ALERT_CODE", &notification.attraction_code)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, alert: &Alert, current_wait_minutes: u32) {
        let notification = Notification::for_alert(alert, current_wait_minutes);
        let mut cmd = tokio::process::Command::from(self.command_for(&notification));
        match cmd.spawn() {
            Ok(_child) => {}
            Err(e) => warn!(
                program = %self.program,
                code = %alert.attraction_code,
                error = %e,
                "notify_command_failed"
            ),
        }
    }
}

/// Keeps notifications in memory, replacing by identity like a notification shade.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delivery in order, including ones later replaced.
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().clone()
    }

    /// Currently visible notifications: the latest per identity.
    pub fn visible(&self) -> Vec<Notification> {
        let delivered = self.delivered.lock();
        let mut visible: Vec<Notification> = Vec::new();
        for notification in delivered.iter() {
            match visible.iter_mut().find(|n| n.id == notification.id) {
                Some(existing) => *existing = notification.clone(),
                None => visible.push(notification.clone()),
            }
        }
        visible
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, alert: &Alert, current_wait_minutes: u32) {
        self.delivered
            .lock()
            .push(Notification::for_alert(alert, current_wait_minutes));
    }
}

/// Delivers through every inner notifier.
#[derive(Default, Clone)]
pub struct MultiNotifier {
    channels: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        MultiNotifier { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Notifier for MultiNotifier {
    fn notify(&self, alert: &Alert, current_wait_minutes: u32) {
        for channel in &self.channels {
            channel.notify(alert, current_wait_minutes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> Alert {
        Alert::new("coaster_a", "Coaster A", 20).unwrap()
    }

    #[test]
    fn test_notification_id_is_stable_and_distinct() {
        assert_eq!(notification_id(""), 0);
        assert_eq!(notification_id("ab"), 97 * 31 + 98);
        assert_eq!(notification_id("coaster_a"), notification_id("coaster_a"));
        assert_ne!(notification_id("coaster_a"), notification_id("flume_b"));
    }

    #[test]
    fn test_notification_id_wraps_instead_of_overflowing() {
        let long = "x".repeat(64);
        // Must not panic in debug builds
        let _ = notification_id(&long);
    }

    #[test]
    fn test_notification_text() {
        let n = Notification::for_alert(&alert(), 15);
        assert_eq!(n.title, "Wait time for Coaster A is low!");
        assert!(n.body.contains("15 minutes"));
        assert!(n.body.contains("at most 20 min"));
        assert_eq!(n.id, notification_id("coaster_a"));
    }

    #[test]
    fn test_recording_replaces_by_identity() {
        let notifier = RecordingNotifier::new();
        notifier.notify(&alert(), 15);
        notifier.notify(&alert(), 10);
        notifier.notify(&Alert::new("flume_b", "Flume B", 10).unwrap(), 5);

        assert_eq!(notifier.delivered().len(), 3);
        let visible = notifier.visible();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].current_wait_minutes, 10);
    }

    #[test]
    fn test_multi_fans_out() {
        let a = Arc::new(RecordingNotifier::new());
        let b = Arc::new(RecordingNotifier::new());
        let multi = MultiNotifier::new(vec![a.clone(), b.clone(), Arc::new(LogNotifier)]);
        multi.notify(&alert(), 15);
        assert_eq!(a.delivered().len(), 1);
        assert_eq!(b.delivered().len(), 1);
        assert_eq!(multi.len(), 3);
    }

    #[test]
    fn test_command_notifier_from_empty_command() {
        assert!(CommandNotifier::from_command(&[]).is_none());
    }

    #[tokio::test]
    async fn test_missing_program_does_not_panic() {
        let notifier =
            CommandNotifier::from_command(&["/nonexistent/wait-alert-notify".to_string()]).unwrap();
        notifier.notify(&alert(), 15);
    }

    #[test]
    fn test_command_arguments() {
        let notifier = CommandNotifier::from_command(&[
            "notify-send".to_string(),
            "-u".to_string(),
            "critical".to_string(),
        ])
        .unwrap();
        let n = Notification::for_alert(&alert(), 15);
        let cmd = notifier.command_for(&n);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(cmd.get_program(), "notify-send");
        assert_eq!(args, vec!["-u", "critical", n.title.as_str(), n.body.as_str()]);
    }
}
