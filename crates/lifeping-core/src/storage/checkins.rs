//! Append-only check-in log.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::{DatabaseError, Result};

/// Whether the check-in arrived before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckInRecordStatus {
    Completed,
    Late,
}

impl CheckInRecordStatus {
    fn as_str(self) -> &'static str {
        match self {
            CheckInRecordStatus::Completed => "completed",
            CheckInRecordStatus::Late => "late",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(CheckInRecordStatus::Completed),
            "late" => Some(CheckInRecordStatus::Late),
            _ => None,
        }
    }
}

/// One confirmed check-in. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub status: CheckInRecordStatus,
}

/// Canonical text form for timestamps; lexical order matches time order.
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CheckInRecord> {
    let raw_status: String = row.get(2)?;
    let status = CheckInRecordStatus::parse(&raw_status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown check-in status '{raw_status}'").into(),
        )
    })?;
    Ok(CheckInRecord {
        id: row.get(0)?,
        timestamp: decode_ts(&row.get::<_, String>(1)?)?,
        status,
    })
}

/// A user's view of the check-in log.
pub struct CheckInLog<'a> {
    conn: &'a Connection,
    user_id: &'a str,
}

impl<'a> CheckInLog<'a> {
    pub fn new(conn: &'a Connection, user_id: &'a str) -> Self {
        Self { conn, user_id }
    }

    /// Append a record. The log never updates or deletes rows.
    pub fn append(
        &self,
        timestamp: DateTime<Utc>,
        status: CheckInRecordStatus,
    ) -> Result<CheckInRecord> {
        self.conn.execute(
            "INSERT INTO checkins (user_id, timestamp, status) VALUES (?1, ?2, ?3)",
            params![self.user_id, encode_ts(timestamp), status.as_str()],
        )?;
        Ok(CheckInRecord {
            id: self.conn.last_insert_rowid(),
            timestamp,
            status,
        })
    }

    /// Most recent record, if any.
    pub fn latest(&self) -> Result<Option<CheckInRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, timestamp, status FROM checkins
                 WHERE user_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT 1",
                params![self.user_id],
                record_from_row,
            )
            .optional()
            .map_err(DatabaseError::from)?;
        Ok(record)
    }

    /// Newest-first history, at most `limit` records.
    pub fn history(&self, limit: usize) -> Result<Vec<CheckInRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, status FROM checkins
             WHERE user_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![self.user_id, limit as i64], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM checkins WHERE user_id = ?1",
            params![self.user_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Timestamps of every check-in at or after `since`, newest first.
    pub fn timestamps_since(&self, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp FROM checkins
             WHERE user_id = ?1 AND timestamp >= ?2 ORDER BY timestamp DESC",
        )?;
        let rows = stmt.query_map(params![self.user_id, encode_ts(since)], |row| {
            decode_ts(&row.get::<_, String>(0)?)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
