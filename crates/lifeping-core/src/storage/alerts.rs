//! Alert ledger: per-deadline lifecycle phase and per-contact delivery attempts.
//!
//! A deadline gets a row here the first time it leaves `pending`. The ledger is
//! what makes alerts at-most-once per deadline, and what stops a contact that
//! was already reached from being contacted again on a retry.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::checkins::{decode_ts, encode_ts};
use crate::checkin::DeadlinePhase;
use crate::error::{DatabaseError, Result};

/// Outcome of the most recent delivery attempt to one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
    /// Contact had no usable channel; never attempted.
    Skipped,
}

impl DeliveryOutcome {
    fn as_str(self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Failed => "failed",
            DeliveryOutcome::Skipped => "skipped",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "delivered" => Some(DeliveryOutcome::Delivered),
            "failed" => Some(DeliveryOutcome::Failed),
            "skipped" => Some(DeliveryOutcome::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDelivery {
    pub contact_id: i64,
    pub outcome: DeliveryOutcome,
    pub attempts: u32,
    pub last_attempt_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlineAlert {
    pub deadline_at: DateTime<Utc>,
    pub phase: DeadlinePhase,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn conversion_error(col: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, message.into())
}

fn delivery_from_row(row: &Row<'_>) -> rusqlite::Result<ContactDelivery> {
    let raw: String = row.get(1)?;
    Ok(ContactDelivery {
        contact_id: row.get(0)?,
        outcome: DeliveryOutcome::parse(&raw)
            .ok_or_else(|| conversion_error(1, format!("unknown delivery outcome '{raw}'")))?,
        attempts: row.get(2)?,
        last_attempt_at: decode_ts(&row.get::<_, String>(3)?)?,
        error: row.get(4)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<DeadlineAlert> {
    let raw: String = row.get(1)?;
    Ok(DeadlineAlert {
        deadline_at: decode_ts(&row.get::<_, String>(0)?)?,
        phase: DeadlinePhase::parse(&raw)
            .ok_or_else(|| conversion_error(1, format!("unknown deadline phase '{raw}'")))?,
        opened_at: decode_ts(&row.get::<_, String>(2)?)?,
        updated_at: decode_ts(&row.get::<_, String>(3)?)?,
    })
}

/// A user's view of the alert ledger.
pub struct AlertLedger<'a> {
    conn: &'a Connection,
    user_id: &'a str,
}

impl<'a> AlertLedger<'a> {
    pub fn new(conn: &'a Connection, user_id: &'a str) -> Self {
        Self { conn, user_id }
    }

    /// Recorded phase for `deadline`; `None` means still pending.
    pub fn phase_of(&self, deadline: DateTime<Utc>) -> Result<Option<DeadlinePhase>> {
        Ok(self.get(deadline)?.map(|a| a.phase))
    }

    pub fn get(&self, deadline: DateTime<Utc>) -> Result<Option<DeadlineAlert>> {
        let alert = self
            .conn
            .query_row(
                "SELECT deadline_at, phase, opened_at, updated_at FROM deadline_alerts
                 WHERE user_id = ?1 AND deadline_at = ?2",
                params![self.user_id, encode_ts(deadline)],
                alert_from_row,
            )
            .optional()
            .map_err(DatabaseError::from)?;
        Ok(alert)
    }

    /// Record `phase` for `deadline`, creating the row on first use.
    pub fn set_phase(
        &self,
        deadline: DateTime<Utc>,
        phase: DeadlinePhase,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO deadline_alerts (user_id, deadline_at, phase, opened_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(user_id, deadline_at) DO UPDATE SET phase = ?3, updated_at = ?4",
            params![self.user_id, encode_ts(deadline), phase.as_str(), encode_ts(now)],
        )?;
        Ok(())
    }

    /// Newest-first ledger entries.
    pub fn recent(&self, limit: usize) -> Result<Vec<DeadlineAlert>> {
        let mut stmt = self.conn.prepare(
            "SELECT deadline_at, phase, opened_at, updated_at FROM deadline_alerts
             WHERE user_id = ?1 ORDER BY deadline_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![self.user_id, limit as i64], alert_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Deadlines whose alert is still in flight (retries outstanding).
    pub fn in_flight(&self) -> Result<Vec<DateTime<Utc>>> {
        let mut stmt = self.conn.prepare(
            "SELECT deadline_at FROM deadline_alerts
             WHERE user_id = ?1 AND phase = ?2 ORDER BY deadline_at",
        )?;
        let rows = stmt.query_map(params![self.user_id, DeadlinePhase::Alerting.as_str()], |row| {
            decode_ts(&row.get::<_, String>(0)?)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Deadlines not yet closed (`overdue` or `alerting`), oldest first.
    pub fn open(&self) -> Result<Vec<DeadlineAlert>> {
        let mut stmt = self.conn.prepare(
            "SELECT deadline_at, phase, opened_at, updated_at FROM deadline_alerts
             WHERE user_id = ?1 AND phase IN (?2, ?3) ORDER BY deadline_at",
        )?;
        let rows = stmt.query_map(
            params![
                self.user_id,
                DeadlinePhase::Overdue.as_str(),
                DeadlinePhase::Alerting.as_str()
            ],
            alert_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Number of deadlines that went unanswered long enough to alert.
    pub fn missed_count(&self) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM deadline_alerts WHERE user_id = ?1 AND phase IN (?2, ?3)",
            params![
                self.user_id,
                DeadlinePhase::Alerting.as_str(),
                DeadlinePhase::Alerted.as_str()
            ],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn deliveries(&self, deadline: DateTime<Utc>) -> Result<Vec<ContactDelivery>> {
        let mut stmt = self.conn.prepare(
            "SELECT contact_id, outcome, attempts, last_attempt_at, error FROM contact_deliveries
             WHERE user_id = ?1 AND deadline_at = ?2 ORDER BY contact_id",
        )?;
        let rows = stmt.query_map(params![self.user_id, encode_ts(deadline)], delivery_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Record one attempt for `contact_id`. Attempts accumulate; skips do not count.
    pub fn record_delivery(
        &self,
        deadline: DateTime<Utc>,
        contact_id: i64,
        outcome: DeliveryOutcome,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let increment: i64 = if outcome == DeliveryOutcome::Skipped { 0 } else { 1 };
        self.conn.execute(
            "INSERT INTO contact_deliveries
                (user_id, deadline_at, contact_id, outcome, attempts, last_attempt_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, deadline_at, contact_id) DO UPDATE SET
                outcome = ?4, attempts = attempts + ?5, last_attempt_at = ?6, error = ?7",
            params![
                self.user_id,
                encode_ts(deadline),
                contact_id,
                outcome.as_str(),
                increment,
                encode_ts(now),
                error,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::{Duration, TimeZone};

    fn deadline() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn phase_upserts_and_keeps_opened_at() {
        let db = Database::open_memory().unwrap();
        let ledger = AlertLedger::new(db.conn(), "u1");
        assert!(ledger.phase_of(deadline()).unwrap().is_none());

        let t1 = deadline() + Duration::minutes(31);
        ledger.set_phase(deadline(), DeadlinePhase::Alerting, t1).unwrap();
        ledger
            .set_phase(deadline(), DeadlinePhase::Alerted, t1 + Duration::minutes(1))
            .unwrap();

        let alert = ledger.get(deadline()).unwrap().unwrap();
        assert_eq!(alert.phase, DeadlinePhase::Alerted);
        assert_eq!(alert.opened_at, t1);
        assert_eq!(alert.updated_at, t1 + Duration::minutes(1));
        assert_eq!(ledger.missed_count().unwrap(), 1);
    }

    #[test]
    fn delivery_attempts_accumulate() {
        let db = Database::open_memory().unwrap();
        let ledger = AlertLedger::new(db.conn(), "u1");
        let now = deadline();

        ledger
            .record_delivery(deadline(), 2, DeliveryOutcome::Failed, Some("timeout"), now)
            .unwrap();
        ledger
            .record_delivery(
                deadline(),
                2,
                DeliveryOutcome::Delivered,
                None,
                now + Duration::minutes(1),
            )
            .unwrap();
        ledger
            .record_delivery(deadline(), 3, DeliveryOutcome::Skipped, None, now)
            .unwrap();

        let deliveries = ledger.deliveries(deadline()).unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].attempts, 2);
        assert_eq!(deliveries[0].outcome, DeliveryOutcome::Delivered);
        assert_eq!(deliveries[0].error, None);
        assert_eq!(deliveries[1].attempts, 0);
    }

    #[test]
    fn in_flight_lists_only_alerting() {
        let db = Database::open_memory().unwrap();
        let ledger = AlertLedger::new(db.conn(), "u1");
        let now = deadline();
        ledger.set_phase(deadline(), DeadlinePhase::Alerting, now).unwrap();
        ledger
            .set_phase(deadline() + Duration::hours(4), DeadlinePhase::CheckedIn, now)
            .unwrap();

        assert_eq!(ledger.in_flight().unwrap(), vec![deadline()]);
        assert_eq!(ledger.recent(10).unwrap().len(), 2);
    }

    #[test]
    fn open_lists_overdue_and_alerting() {
        let db = Database::open_memory().unwrap();
        let ledger = AlertLedger::new(db.conn(), "u1");
        let now = deadline();
        ledger.set_phase(deadline(), DeadlinePhase::Alerting, now).unwrap();
        ledger
            .set_phase(deadline() + Duration::hours(2), DeadlinePhase::Overdue, now)
            .unwrap();
        ledger
            .set_phase(deadline() + Duration::hours(4), DeadlinePhase::Alerted, now)
            .unwrap();
        AlertLedger::new(db.conn(), "u2")
            .set_phase(deadline(), DeadlinePhase::Overdue, now)
            .unwrap();

        let open: Vec<_> = ledger.open().unwrap().into_iter().map(|a| a.phase).collect();
        assert_eq!(open, vec![DeadlinePhase::Alerting, DeadlinePhase::Overdue]);
    }
}
