//! Check-in state: deadline, status and countdown, derived from wall-clock time.
//!
//! Nothing here keeps a timer. The caller supplies `now` and the baseline
//! (the last check-in, or the monitoring anchor for a brand-new user) and gets
//! back a snapshot. Evaluating absolute deadlines means a late or skipped tick
//! never loses track of a missed check-in.
//!
//! ## Status
//!
//! ```text
//!            deadline            deadline + grace
//! ──OnTrack──┤────Overdue────────┤────Overdue (alert due)────> AlertSent
//! ```

mod lifecycle;

pub use lifecycle::{DeadlineEvent, DeadlinePhase, InvalidTransition};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{CheckInRecord, ScheduleConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    /// Deadline not reached yet.
    OnTrack,
    /// Deadline passed without a check-in.
    Overdue,
    /// Contacts have been alerted for the current deadline.
    AlertSent,
}

impl CheckInStatus {
    /// Short label shown on the dashboard.
    pub fn label(self) -> &'static str {
        match self {
            CheckInStatus::OnTrack => "All Good",
            CheckInStatus::Overdue => "Overdue",
            CheckInStatus::AlertSent => "Alert Sent",
        }
    }
}

/// Derived view of where the user stands against the current deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInState {
    pub last_check_in_at: Option<DateTime<Utc>>,
    pub next_deadline_at: DateTime<Utc>,
    pub status: CheckInStatus,
}

impl CheckInState {
    /// Instant after which contacts should be alerted.
    pub fn alert_at(&self, config: &ScheduleConfig) -> DateTime<Utc> {
        self.next_deadline_at + config.grace_period()
    }

    /// True once the grace period has fully elapsed.
    pub fn alert_due(&self, config: &ScheduleConfig, now: DateTime<Utc>) -> bool {
        now > self.alert_at(config)
    }

    /// Instant at which the upcoming-deadline reminder should be raised.
    pub fn remind_at(&self, config: &ScheduleConfig) -> DateTime<Utc> {
        self.next_deadline_at - config.upcoming_lead()
    }

    /// True within the reminder lead window before the deadline.
    pub fn upcoming_due(&self, config: &ScheduleConfig, now: DateTime<Utc>) -> bool {
        self.status == CheckInStatus::OnTrack
            && now >= self.remind_at(config)
            && now <= self.next_deadline_at
    }

    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        self.next_deadline_at - now
    }
}

/// Compute state from the latest record.
///
/// With no record, the deadline is one full interval from `now`.
pub fn compute_state(
    last_check_in: Option<&CheckInRecord>,
    config: &ScheduleConfig,
    now: DateTime<Utc>,
) -> CheckInState {
    compute_state_at(last_check_in.map(|r| r.timestamp), config, now, None)
}

/// Compute state from an explicit baseline.
///
/// `alerted_deadline` is the deadline the ledger has recorded as alerted, if
/// any; it only affects the result when it equals the computed deadline.
pub fn compute_state_at(
    baseline: Option<DateTime<Utc>>,
    config: &ScheduleConfig,
    now: DateTime<Utc>,
    alerted_deadline: Option<DateTime<Utc>>,
) -> CheckInState {
    let next_deadline_at = baseline.unwrap_or(now) + config.interval();

    let status = if alerted_deadline == Some(next_deadline_at) {
        CheckInStatus::AlertSent
    } else if now <= next_deadline_at {
        CheckInStatus::OnTrack
    } else {
        CheckInStatus::Overdue
    };

    CheckInState {
        last_check_in_at: baseline,
        next_deadline_at,
        status,
    }
}

/// Countdown text: `"Xh Ym"` until the deadline, `"Now!"` once it has passed.
pub fn format_countdown(state: &CheckInState, now: DateTime<Utc>) -> String {
    let remaining = state.time_remaining(now);
    if remaining < Duration::zero() {
        return "Now!".to_string();
    }
    let hours = remaining.num_hours();
    let minutes = remaining.num_minutes() % 60;
    format!("{hours}h {minutes}m")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CheckInRecordStatus;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
    }

    fn record_at(ts: DateTime<Utc>) -> CheckInRecord {
        CheckInRecord {
            id: 1,
            timestamp: ts,
            status: CheckInRecordStatus::Completed,
        }
    }

    #[test]
    fn new_user_gets_a_full_interval() {
        let config = ScheduleConfig::default();
        let state = compute_state(None, &config, t0());
        assert_eq!(state.status, CheckInStatus::OnTrack);
        assert_eq!(state.next_deadline_at, t0() + Duration::hours(4));
        assert_eq!(state.last_check_in_at, None);
        assert_eq!(format_countdown(&state, t0()), "4h 0m");
    }

    #[test]
    fn countdown_floors_minutes_and_says_now_when_late() {
        let config = ScheduleConfig::default();
        let state = compute_state(Some(&record_at(t0())), &config, t0());
        assert_eq!(
            format_countdown(&state, t0() + Duration::minutes(85) + Duration::seconds(59)),
            "2h 34m"
        );
        assert_eq!(format_countdown(&state, state.next_deadline_at), "0h 0m");
        assert_eq!(
            format_countdown(&state, state.next_deadline_at + Duration::seconds(1)),
            "Now!"
        );
    }

    #[test]
    fn alert_marker_only_matches_its_own_deadline() {
        let config = ScheduleConfig::default();
        let deadline = t0() + config.interval();
        let late = deadline + Duration::hours(1);

        let state = compute_state_at(Some(t0()), &config, late, Some(deadline));
        assert_eq!(state.status, CheckInStatus::AlertSent);

        let previous = Some(deadline - Duration::hours(4));
        let stale = compute_state_at(Some(t0()), &config, late, previous);
        assert_eq!(stale.status, CheckInStatus::Overdue);
    }

    #[test]
    fn upcoming_window_precedes_deadline() {
        let config = ScheduleConfig::default();
        let state = compute_state(Some(&record_at(t0())), &config, t0());
        let deadline = state.next_deadline_at;
        assert!(!state.upcoming_due(&config, deadline - Duration::minutes(16)));
        assert!(state.upcoming_due(&config, deadline - Duration::minutes(15)));
        assert!(state.upcoming_due(&config, deadline));
        assert!(!state.upcoming_due(&config, deadline + Duration::seconds(1)));
    }

    proptest! {
        #[test]
        fn status_follows_interval_and_grace(
            interval_min in 1u64..=48 * 60,
            grace_min in 1u64..=6 * 60,
            offset_ms in 0i64..=60 * 60 * 1000 * 60,
        ) {
            let config = ScheduleConfig::new(interval_min * 60_000, grace_min * 60_000);
            let now = t0() + Duration::milliseconds(offset_ms);
            let state = compute_state(Some(&record_at(t0())), &config, now);

            let interval_end = t0() + config.interval();
            let grace_end = interval_end + config.grace_period();

            if now <= interval_end {
                prop_assert_eq!(state.status, CheckInStatus::OnTrack);
                prop_assert!(!state.alert_due(&config, now));
            } else if now <= grace_end {
                prop_assert_eq!(state.status, CheckInStatus::Overdue);
                prop_assert!(!state.alert_due(&config, now));
            } else {
                prop_assert_eq!(state.status, CheckInStatus::Overdue);
                prop_assert!(state.alert_due(&config, now));
            }
        }

        #[test]
        fn countdown_is_deterministic(offset_min in 0i64..=240) {
            let config = ScheduleConfig::default();
            let state = compute_state(Some(&record_at(t0())), &config, t0());
            let now = t0() + Duration::minutes(offset_min);
            let remaining = 240 - offset_min;
            let expected = format!("{}h {}m", remaining / 60, remaining % 60);
            prop_assert_eq!(format_countdown(&state, now), expected);
        }
    }
}
