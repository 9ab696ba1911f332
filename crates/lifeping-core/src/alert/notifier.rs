//! Local notifications raised to the user on this device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocalNotification {
    /// The deadline is close and the user has not checked in.
    UpcomingDeadline {
        deadline_at: DateTime<Utc>,
        minutes_left: i64,
    },
    /// Contacts were alerted about a missed check-in.
    ContactsAlerted {
        deadline_at: DateTime<Utc>,
        delivered: usize,
        failed: usize,
    },
}

impl LocalNotification {
    pub fn title(&self) -> &'static str {
        match self {
            LocalNotification::UpcomingDeadline { .. } => "Check-in due soon",
            LocalNotification::ContactsAlerted { .. } => "Missed check-in",
        }
    }

    pub fn body(&self) -> String {
        match self {
            LocalNotification::UpcomingDeadline { minutes_left, .. } => {
                format!("Your next check-in is due in {minutes_left} minutes.")
            }
            LocalNotification::ContactsAlerted {
                delivered, failed, ..
            } => {
                if *delivered == 0 && *failed == 0 {
                    "You missed a check-in. Add trusted contacts so someone is told next time."
                        .to_string()
                } else {
                    format!(
                        "You missed a check-in. {delivered} contact(s) alerted, \
                         {failed} unreachable."
                    )
                }
            }
        }
    }
}

/// Host notification facility.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &LocalNotification);
}

/// Default notifier: writes notifications to the log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &LocalNotification) {
        tracing::info!(title = notification.title(), "{}", notification.body());
    }
}
