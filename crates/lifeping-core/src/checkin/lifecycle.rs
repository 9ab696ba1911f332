//! Lifecycle of a single deadline.
//!
//! ```text
//! Pending -> Overdue -> Alerting -> Alerted
//!    \          \           \
//!     +----------+-> CheckedIn   +-> Alerted (check-in while retries pending)
//! ```
//!
//! `Alerted` and `CheckedIn` are terminal. `Alerting` is only left through a
//! finished dispatch or a check-in; there is no path from `Overdue` to
//! `Alerted` that skips the dispatch attempt.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlinePhase {
    Pending,
    Overdue,
    Alerting,
    Alerted,
    CheckedIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineEvent {
    /// Wall clock moved past the deadline.
    DeadlinePassed,
    /// Grace period elapsed with auto-alert enabled; dispatch is starting.
    GraceExpired,
    /// Every contact reached a final outcome.
    DispatchFinished,
    /// User checked in.
    CheckedIn,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot apply {event:?} to a deadline in phase {from:?}")]
pub struct InvalidTransition {
    pub from: DeadlinePhase,
    pub event: DeadlineEvent,
}

impl DeadlinePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeadlinePhase::Alerted | DeadlinePhase::CheckedIn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeadlinePhase::Pending => "pending",
            DeadlinePhase::Overdue => "overdue",
            DeadlinePhase::Alerting => "alerting",
            DeadlinePhase::Alerted => "alerted",
            DeadlinePhase::CheckedIn => "checked_in",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeadlinePhase::Pending),
            "overdue" => Some(DeadlinePhase::Overdue),
            "alerting" => Some(DeadlinePhase::Alerting),
            "alerted" => Some(DeadlinePhase::Alerted),
            "checked_in" => Some(DeadlinePhase::CheckedIn),
            _ => None,
        }
    }

    /// Apply `event`, returning the next phase.
    pub fn apply(self, event: DeadlineEvent) -> Result<Self, InvalidTransition> {
        use DeadlineEvent as E;
        use DeadlinePhase as P;

        let next = match (self, event) {
            (P::Pending, E::DeadlinePassed) => P::Overdue,
            (P::Pending | P::Overdue, E::CheckedIn) => P::CheckedIn,
            (P::Overdue, E::DeadlinePassed) => P::Overdue,
            (P::Overdue, E::GraceExpired) => P::Alerting,
            (P::Alerting, E::DispatchFinished) => P::Alerted,
            // Contacts have already been reached; outstanding retries are dropped.
            (P::Alerting, E::CheckedIn) => P::Alerted,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }
}
