//! Alert dispatch to trusted contacts.
//!
//! The dispatcher attempts every contact independently and records each
//! outcome; a contact that cannot be reached never blocks the others. Which
//! contacts are still owed an attempt (first try, retry after backoff, or
//! nothing because they were already reached) is decided by [`RetryPolicy`]
//! against the alert ledger.

mod channel;
mod notifier;

pub use channel::{channel_from_config, AlertChannel, LogChannel, WebhookChannel};
pub use notifier::{LocalNotification, Notifier, TracingNotifier};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::account::Session;
use crate::checkin::CheckInState;
use crate::storage::{AlertsConfig, Contact, ContactDelivery, DeliveryOutcome};

/// The alert as sent to every contact for one missed deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub deadline_at: DateTime<Utc>,
    pub overdue_minutes: i64,
    pub text: String,
}

impl AlertMessage {
    pub fn for_missed_deadline(
        session: &Session,
        state: &CheckInState,
        now: DateTime<Utc>,
    ) -> Self {
        let overdue_minutes = (now - state.next_deadline_at).num_minutes().max(0);
        let text = format!(
            "{} missed a scheduled LifePing check-in due at {} UTC ({} minutes ago). \
             Please try to reach them.",
            session.display_name,
            state.next_deadline_at.format("%Y-%m-%d %H:%M"),
            overdue_minutes
        );
        Self {
            user_id: session.user_id.clone(),
            user_name: session.display_name.clone(),
            user_email: session.email.clone(),
            deadline_at: state.next_deadline_at,
            overdue_minutes,
            text,
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDispatch {
    pub contact_id: i64,
    pub contact_name: String,
    pub outcome: DeliveryOutcome,
    pub error: Option<String>,
}

/// Per-contact results of a dispatch round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub deadline_at: DateTime<Utc>,
    pub dispatched_at: DateTime<Utc>,
    pub channel: String,
    pub results: Vec<ContactDispatch>,
}

impl DispatchResult {
    pub fn success_count(&self) -> usize {
        self.count(DeliveryOutcome::Delivered)
    }

    pub fn failure_count(&self) -> usize {
        self.count(DeliveryOutcome::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(DeliveryOutcome::Skipped)
    }

    fn count(&self, outcome: DeliveryOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }
}

/// What to do with a contact on this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Attempt delivery now.
    Attempt,
    /// Failed earlier; next retry not due until the given instant.
    Backoff(DateTime<Utc>),
    /// Reached, skipped, or out of attempts.
    Settled,
}

/// Bounded exponential backoff over dispatch rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AlertsConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::milliseconds(config.retry_backoff_ms as i64),
        }
    }

    /// Delay before attempt `attempts + 1`: `backoff * 2^(attempts - 1)`.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.backoff * (1i32 << exponent)
    }

    pub fn eligibility(
        &self,
        previous: Option<&ContactDelivery>,
        now: DateTime<Utc>,
    ) -> Eligibility {
        let Some(previous) = previous else {
            return Eligibility::Attempt;
        };
        match previous.outcome {
            DeliveryOutcome::Delivered | DeliveryOutcome::Skipped => Eligibility::Settled,
            DeliveryOutcome::Failed if previous.attempts >= self.max_attempts => {
                Eligibility::Settled
            }
            DeliveryOutcome::Failed => {
                let retry_at = previous.last_attempt_at + self.delay_after(previous.attempts);
                if now >= retry_at {
                    Eligibility::Attempt
                } else {
                    Eligibility::Backoff(retry_at)
                }
            }
        }
    }
}

/// Sends alerts for a user through one channel.
pub struct AlertDispatcher {
    channel: Arc<dyn AlertChannel>,
    session: Session,
}

impl AlertDispatcher {
    pub fn new(channel: Arc<dyn AlertChannel>, session: Session) -> Self {
        Self { channel, session }
    }

    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    /// The alert text for `state`'s deadline as of `now`.
    pub fn message(&self, state: &CheckInState, now: DateTime<Utc>) -> AlertMessage {
        AlertMessage::for_missed_deadline(&self.session, state, now)
    }

    /// One delivery attempt to one contact.
    ///
    /// Contacts without a reachable channel are skipped without a call.
    pub async fn attempt(&self, alert: &AlertMessage, contact: &Contact) -> ContactDispatch {
        let (outcome, error) = if !contact.is_actionable() {
            let reason = format!("contact {} has no reachable channel", contact.id);
            (DeliveryOutcome::Skipped, Some(reason))
        } else {
            match self.channel.deliver(alert, contact).await {
                Ok(()) => (DeliveryOutcome::Delivered, None),
                Err(e) => {
                    tracing::warn!(
                        contact_id = contact.id,
                        channel = self.channel.name(),
                        "alert delivery failed: {e}"
                    );
                    (DeliveryOutcome::Failed, Some(e.to_string()))
                }
            }
        };
        ContactDispatch {
            contact_id: contact.id,
            contact_name: contact.name.clone(),
            outcome,
            error,
        }
    }

    /// Attempt every contact once.
    pub async fn dispatch(
        &self,
        state: &CheckInState,
        contacts: &[Contact],
        now: DateTime<Utc>,
    ) -> DispatchResult {
        let alert = self.message(state, now);
        let mut results = Vec::with_capacity(contacts.len());
        for contact in contacts {
            results.push(self.attempt(&alert, contact).await);
        }

        let result = DispatchResult {
            deadline_at: state.next_deadline_at,
            dispatched_at: now,
            channel: self.channel.name().to_string(),
            results,
        };
        tracing::info!(
            deadline = %result.deadline_at,
            delivered = result.success_count(),
            failed = result.failure_count(),
            skipped = result.skipped_count(),
            "alert dispatch round finished"
        );
        result
    }
}
