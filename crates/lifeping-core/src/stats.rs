//! Dashboard statistics: total check-ins, day streak, missed check-ins.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{AlertLedger, CheckInLog};

/// Longest streak window considered, in days.
const STREAK_LOOKBACK_DAYS: i64 = 366;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInStats {
    pub total_check_ins: u64,
    pub streak_days: u32,
    pub missed_check_ins: u64,
}

/// Compute statistics for `user_id` as of `now`.
///
/// A missed check-in is a deadline that ran past its grace period and reached
/// the alerting phase.
pub fn compute_stats(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> Result<CheckInStats> {
    let log = CheckInLog::new(conn, user_id);
    let since = now - Duration::days(STREAK_LOOKBACK_DAYS);
    let days: Vec<NaiveDate> = log
        .timestamps_since(since)?
        .into_iter()
        .map(|ts| ts.date_naive())
        .collect();

    Ok(CheckInStats {
        total_check_ins: log.count()?,
        streak_days: streak_days(&days, now.date_naive()),
        missed_check_ins: AlertLedger::new(conn, user_id).missed_count()?,
    })
}

/// Consecutive UTC days with at least one check-in, ending today.
///
/// Today still counts as open: a streak through yesterday is kept until the
/// day is over. `days` must be sorted newest first.
pub fn streak_days(days: &[NaiveDate], today: NaiveDate) -> u32 {
    let mut distinct = days.iter().copied().filter(|d| *d <= today).collect::<Vec<_>>();
    distinct.dedup();

    let Some(&first) = distinct.first() else {
        return 0;
    };
    let mut expected = if first == today {
        today
    } else if Some(first) == today.pred_opt() {
        first
    } else {
        return 0;
    };

    let mut streak = 0;
    for day in distinct {
        if day != expected {
            break;
        }
        streak += 1;
        match expected.pred_opt() {
            Some(prev) => expected = prev,
            None => break,
        }
    }
    streak
}
