//! The check-in monitor.
//!
//! Owns the critical section shared by "check in now" and scheduler ticks: a
//! tick cannot alert a deadline that a concurrent check-in has closed, and two
//! ticks never dispatch the same deadline.
//!
//! Each tick evaluates absolute deadlines against the wall clock:
//!
//! 1. Past the deadline, the deadline is recorded `overdue`.
//! 2. Past deadline + grace with auto-alert on, it moves to `alerting`.
//! 3. Every `alerting` deadline gets a dispatch round for the contacts still
//!    owed an attempt; once all contacts are settled it becomes `alerted`.
//! 4. Inside the reminder window, the user is reminded once per deadline.
//!
//! A brand-new user has no check-in to measure from. The first time a monitor
//! is built for them, the current instant is stored as their monitoring anchor
//! and used as the baseline until the first check-in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::account::Session;
use crate::alert::{
    channel_from_config, AlertChannel, AlertDispatcher, Eligibility, LocalNotification, Notifier,
    RetryPolicy, TracingNotifier,
};
use crate::checkin::{
    compute_state_at, CheckInState, CheckInStatus, DeadlineEvent, DeadlinePhase,
};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::scheduler::TickTarget;
use crate::storage::{
    decode_ts, encode_ts, lock, AlertLedger, CheckInLog, CheckInRecord, CheckInRecordStatus,
    Contact, ContactDelivery, ContactStore, Database, DeliveryOutcome, Preferences,
    ScheduleConfig, SharedDb,
};

pub(crate) fn anchor_key(user_id: &str) -> String {
    format!("monitor.anchor.{user_id}")
}

pub(crate) fn reminded_key(user_id: &str) -> String {
    format!("monitor.reminded.{user_id}")
}

fn kv_instant(db: &Database, key: &str) -> Result<Option<DateTime<Utc>>> {
    Ok(db.kv_get(key)?.and_then(|raw| decode_ts(&raw).ok()))
}

/// Baseline for a user with no check-ins, stored on first use.
fn ensure_anchor(db: &Database, user_id: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let key = anchor_key(user_id);
    if let Some(anchor) = kv_instant(db, &key)? {
        return Ok(anchor);
    }
    db.kv_set(&key, &encode_ts(now))?;
    tracing::debug!(user_id, anchor = %now, "monitoring anchor set");
    Ok(now)
}

/// Current state and the ledger phase of its deadline.
fn evaluate(
    db: &Database,
    user_id: &str,
    schedule: &ScheduleConfig,
    now: DateTime<Utc>,
) -> Result<(CheckInState, Option<DeadlinePhase>)> {
    let latest = CheckInLog::new(db.conn(), user_id).latest()?;
    let baseline = match &latest {
        Some(record) => record.timestamp,
        None => ensure_anchor(db, user_id, now)?,
    };
    let deadline = baseline + schedule.interval();
    let phase = AlertLedger::new(db.conn(), user_id).phase_of(deadline)?;
    let alerted = matches!(phase, Some(DeadlinePhase::Alerting | DeadlinePhase::Alerted))
        .then_some(deadline);

    let mut state = compute_state_at(Some(baseline), schedule, now, alerted);
    state.last_check_in_at = latest.map(|r| r.timestamp);
    Ok((state, phase))
}

/// Result of "check in now".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInReceipt {
    pub record: CheckInRecord,
    pub state: CheckInState,
}

pub struct MonitorBuilder {
    db: SharedDb,
    session: Session,
    prefs: watch::Receiver<Preferences>,
    contacts: ContactStore,
    channel: Option<Arc<dyn AlertChannel>>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl MonitorBuilder {
    /// Override the channel selected in preferences.
    pub fn channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Monitor> {
        let channel = match self.channel {
            Some(channel) => channel,
            None => channel_from_config(&self.prefs.borrow().alerts)?,
        };
        let now = self.clock.now().trunc_subsecs(3);
        let schedule = self.prefs.borrow().schedule.clone();
        let initial = {
            let db = lock(&self.db)?;
            evaluate(&db, &self.session.user_id, &schedule, now)?.0
        };
        let (state, _) = watch::channel(initial);

        tracing::debug!(
            user_id = %self.session.user_id,
            channel = channel.name(),
            "monitor ready"
        );
        Ok(Monitor {
            dispatcher: AlertDispatcher::new(channel, self.session.clone()),
            db: self.db,
            session: self.session,
            prefs: self.prefs,
            contacts: self.contacts,
            notifier: self.notifier,
            clock: self.clock,
            state,
            critical: Mutex::new(()),
        })
    }
}

pub struct Monitor {
    db: SharedDb,
    session: Session,
    prefs: watch::Receiver<Preferences>,
    contacts: ContactStore,
    dispatcher: AlertDispatcher,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<CheckInState>,
    critical: Mutex<()>,
}

impl Monitor {
    pub fn builder(
        db: SharedDb,
        session: Session,
        prefs: watch::Receiver<Preferences>,
        contacts: ContactStore,
    ) -> MonitorBuilder {
        MonitorBuilder {
            db,
            session,
            prefs,
            contacts,
            channel: None,
            notifier: Arc::new(TracingNotifier),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Latest-value-wins stream of the check-in state.
    pub fn subscribe(&self) -> watch::Receiver<CheckInState> {
        self.state.subscribe()
    }

    /// Recompute and publish the state for the current instant.
    pub async fn current_state(&self) -> Result<CheckInState> {
        let _guard = self.critical.lock().await;
        let now = self.now();
        let schedule = self.schedule();
        let state = {
            let db = lock(&self.db)?;
            evaluate(&db, &self.session.user_id, &schedule, now)?.0
        };
        self.state.send_replace(state.clone());
        Ok(state)
    }

    /// Record a check-in and close every open deadline.
    ///
    /// A check-in after the deadline is stored as `late`. If contacts are
    /// already being alerted, outstanding retries are dropped. Deadlines left
    /// open under an earlier interval are closed as well.
    pub async fn check_in_now(&self) -> Result<CheckInReceipt> {
        let _guard = self.critical.lock().await;
        let now = self.now();
        let schedule = self.schedule();
        let user_id = self.session.user_id.as_str();

        let receipt = {
            let db = lock(&self.db)?;
            let (before, phase) = evaluate(&db, user_id, &schedule, now)?;
            let late = now > before.next_deadline_at;
            let status = if late {
                CheckInRecordStatus::Late
            } else {
                CheckInRecordStatus::Completed
            };
            let record = CheckInLog::new(db.conn(), user_id).append(now, status)?;
            let ledger = AlertLedger::new(db.conn(), user_id);

            for open in ledger.open()? {
                if open.deadline_at == before.next_deadline_at {
                    continue;
                }
                if let Ok(next) = open.phase.apply(DeadlineEvent::CheckedIn) {
                    ledger.set_phase(open.deadline_at, next, now)?;
                    let deadline = open.deadline_at;
                    tracing::debug!(user_id, %deadline, "earlier deadline closed");
                }
            }

            let closed = match phase {
                Some(phase) => phase.apply(DeadlineEvent::CheckedIn).ok(),
                None if late => Some(DeadlinePhase::CheckedIn),
                None => None,
            };
            if let Some(next) = closed {
                ledger.set_phase(before.next_deadline_at, next, now)?;
            }

            let (state, _) = evaluate(&db, user_id, &schedule, now)?;
            CheckInReceipt { record, state }
        };

        tracing::info!(
            user_id,
            late = receipt.record.status == CheckInRecordStatus::Late,
            next_deadline = %receipt.state.next_deadline_at,
            "checked in"
        );
        self.state.send_replace(receipt.state.clone());
        Ok(receipt)
    }

    /// One monitor cycle. Returns the state after the cycle.
    pub async fn on_tick(&self) -> Result<CheckInState> {
        let _guard = self.critical.lock().await;
        let now = self.now();
        let prefs = self.prefs.borrow().clone();
        let schedule = &prefs.schedule;
        let user_id = self.session.user_id.as_str();

        let (state, phase, in_flight) = {
            let db = lock(&self.db)?;
            let ledger = AlertLedger::new(db.conn(), user_id);
            let (state, mut phase) = evaluate(&db, user_id, schedule, now)?;
            let deadline = state.next_deadline_at;

            if now > deadline {
                let current = phase.unwrap_or(DeadlinePhase::Pending);
                if let Ok(next) = current.apply(DeadlineEvent::DeadlinePassed) {
                    if next != current || phase.is_none() {
                        ledger.set_phase(deadline, next, now)?;
                        tracing::info!(user_id, %deadline, "check-in deadline missed");
                    }
                    phase = Some(next);
                }

                if schedule.auto_alert && state.alert_due(schedule, now) {
                    if let Some(Ok(next)) = phase.map(|p| p.apply(DeadlineEvent::GraceExpired)) {
                        ledger.set_phase(deadline, next, now)?;
                        tracing::warn!(
                            user_id,
                            %deadline,
                            "grace period expired, alerting contacts"
                        );
                        phase = Some(next);
                    }
                }
            }
            (state, phase, ledger.in_flight()?)
        };

        for deadline in in_flight {
            self.dispatch_round(deadline, &prefs, now).await?;
        }

        if phase.is_none() && schedule.notify_upcoming && state.upcoming_due(schedule, now) {
            self.remind_once(&state, now)?;
        }

        let state = {
            let db = lock(&self.db)?;
            evaluate(&db, user_id, schedule, now)?.0
        };
        self.state.send_replace(state.clone());
        Ok(state)
    }

    /// Earliest instant at which a tick would have work to do.
    pub async fn next_due(&self) -> Result<Option<DateTime<Utc>>> {
        let now = self.now();
        let prefs = self.prefs.borrow().clone();
        let schedule = &prefs.schedule;
        let user_id = self.session.user_id.as_str();
        let policy = RetryPolicy::from_config(&prefs.alerts);

        let (state, phase, reminded, in_flight) = {
            let db = lock(&self.db)?;
            let (state, phase) = evaluate(&db, user_id, schedule, now)?;
            let reminded = kv_instant(&db, &reminded_key(user_id))?;
            let ledger = AlertLedger::new(db.conn(), user_id);
            let mut in_flight = Vec::new();
            for deadline in ledger.in_flight()? {
                in_flight.push(ledger.deliveries(deadline)?);
            }
            (state, phase, reminded, in_flight)
        };

        let mut due = Vec::new();
        let reminder_pending = reminded != Some(state.next_deadline_at);
        if phase.is_none() && schedule.notify_upcoming && reminder_pending {
            let remind_at = state.remind_at(schedule);
            if remind_at > now {
                due.push(remind_at);
            }
        }
        let alert_ahead = matches!(
            phase,
            None | Some(DeadlinePhase::Pending | DeadlinePhase::Overdue)
        );
        if schedule.auto_alert && alert_ahead {
            due.push((state.alert_at(schedule) + chrono::Duration::milliseconds(1)).max(now));
        }
        if !in_flight.is_empty() {
            let contacts = self.contacts.list()?;
            for deliveries in &in_flight {
                let by_contact = index(deliveries);
                for contact in &contacts {
                    match policy.eligibility(by_contact.get(&contact.id).copied(), now) {
                        Eligibility::Attempt => due.push(now),
                        Eligibility::Backoff(at) => due.push(at),
                        Eligibility::Settled => {}
                    }
                }
            }
        }
        Ok(due.into_iter().min())
    }

    /// Attempt every contact still owed for `deadline`, recording each
    /// outcome as soon as it is known.
    async fn dispatch_round(
        &self,
        deadline: DateTime<Utc>,
        prefs: &Preferences,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let user_id = self.session.user_id.as_str();
        let policy = RetryPolicy::from_config(&prefs.alerts);
        let contacts = self.contacts.list()?;

        let previous = {
            let db = lock(&self.db)?;
            AlertLedger::new(db.conn(), user_id).deliveries(deadline)?
        };
        let previous = index(&previous);
        let owed: Vec<&Contact> = contacts
            .iter()
            .filter(|c| {
                policy.eligibility(previous.get(&c.id).copied(), now) == Eligibility::Attempt
            })
            .collect();

        if !owed.is_empty() {
            let target = CheckInState {
                last_check_in_at: None,
                next_deadline_at: deadline,
                status: CheckInStatus::Overdue,
            };
            let alert = self.dispatcher.message(&target, now);
            for contact in owed {
                // A check-in from another process may have closed the deadline.
                if !self.still_alerting(deadline)? {
                    tracing::info!(user_id, %deadline, "deadline closed, stopping alert round");
                    return Ok(());
                }
                let attempt = self.dispatcher.attempt(&alert, contact).await;
                let db = lock(&self.db)?;
                AlertLedger::new(db.conn(), user_id).record_delivery(
                    deadline,
                    attempt.contact_id,
                    attempt.outcome,
                    attempt.error.as_deref(),
                    now,
                )?;
            }
        }

        let deliveries = {
            let db = lock(&self.db)?;
            AlertLedger::new(db.conn(), user_id).deliveries(deadline)?
        };
        let by_contact = index(&deliveries);
        let settled = contacts.iter().all(|c| {
            policy.eligibility(by_contact.get(&c.id).copied(), now) == Eligibility::Settled
        });
        if !settled {
            return Ok(());
        }

        {
            let db = lock(&self.db)?;
            let ledger = AlertLedger::new(db.conn(), user_id);
            let current = ledger.phase_of(deadline)?.unwrap_or(DeadlinePhase::Alerting);
            match current.apply(DeadlineEvent::DispatchFinished) {
                Ok(next) => ledger.set_phase(deadline, next, now)?,
                Err(e) => {
                    tracing::warn!(user_id, %deadline, "{e}");
                    return Ok(());
                }
            }
        }

        let count = |outcome: DeliveryOutcome| {
            contacts
                .iter()
                .filter(|c| by_contact.get(&c.id).is_some_and(|d| d.outcome == outcome))
                .count()
        };
        let delivered = count(DeliveryOutcome::Delivered);
        let failed = count(DeliveryOutcome::Failed);
        tracing::info!(user_id, %deadline, delivered, failed, "alert finished");
        self.notifier.notify(&LocalNotification::ContactsAlerted {
            deadline_at: deadline,
            delivered,
            failed,
        });
        Ok(())
    }

    fn still_alerting(&self, deadline: DateTime<Utc>) -> Result<bool> {
        let db = lock(&self.db)?;
        let phase = AlertLedger::new(db.conn(), &self.session.user_id).phase_of(deadline)?;
        Ok(phase == Some(DeadlinePhase::Alerting))
    }

    fn remind_once(&self, state: &CheckInState, now: DateTime<Utc>) -> Result<()> {
        let key = reminded_key(&self.session.user_id);
        let marker = encode_ts(state.next_deadline_at);
        {
            let db = lock(&self.db)?;
            if db.kv_get(&key)?.as_deref() == Some(marker.as_str()) {
                return Ok(());
            }
            db.kv_set(&key, &marker)?;
        }
        self.notifier.notify(&LocalNotification::UpcomingDeadline {
            deadline_at: state.next_deadline_at,
            minutes_left: state.time_remaining(now).num_minutes().max(0),
        });
        Ok(())
    }

    fn schedule(&self) -> ScheduleConfig {
        self.prefs.borrow().schedule.clone()
    }

    /// Stored timestamps carry millisecond precision; so does everything the
    /// monitor compares against them.
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(3)
    }
}

fn index(deliveries: &[ContactDelivery]) -> HashMap<i64, &ContactDelivery> {
    deliveries.iter().map(|d| (d.contact_id, d)).collect()
}

#[async_trait]
impl TickTarget for Monitor {
    async fn tick(&self) {
        if let Err(e) = self.on_tick().await {
            tracing::warn!(
                user_id = %self.session.user_id,
                transient = e.is_transient(),
                "monitor tick failed: {e}"
            );
        }
    }

    async fn next_wakeup(&self) -> Option<std::time::Duration> {
        match self.next_due().await {
            Ok(Some(at)) => Some((at - self.now()).to_std().unwrap_or_default()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    user_id = %self.session.user_id,
                    "could not compute next wakeup: {e}"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::DispatchError;
    use crate::storage::{ContactDraft, PreferenceStore};
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex as StdMutex;

    type Hook = Box<dyn Fn(i64) + Send + Sync>;

    #[derive(Default)]
    struct Recorder {
        calls: StdMutex<Vec<i64>>,
        fail_ids: StdMutex<Vec<i64>>,
        after_delivery: StdMutex<Option<Hook>>,
    }

    #[async_trait]
    impl AlertChannel for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn deliver(
            &self,
            _alert: &crate::alert::AlertMessage,
            contact: &Contact,
        ) -> Result<(), DispatchError> {
            self.calls.lock().unwrap().push(contact.id);
            if let Some(hook) = self.after_delivery.lock().unwrap().as_ref() {
                hook(contact.id);
            }
            if self.fail_ids.lock().unwrap().contains(&contact.id) {
                Err(DispatchError::Unreachable(contact.id.to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct Inbox(StdMutex<Vec<LocalNotification>>);

    impl Notifier for Inbox {
        fn notify(&self, notification: &LocalNotification) {
            self.0.lock().unwrap().push(notification.clone());
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        db: SharedDb,
        prefs: PreferenceStore,
        contacts: ContactStore,
        channel: Arc<Recorder>,
        inbox: Arc<Inbox>,
        clock: Arc<ManualClock>,
        monitor: Monitor,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db: SharedDb = Arc::new(StdMutex::new(Database::open_memory().unwrap()));
        let session = Session::new("u1", "Alex", "alex@example.com");
        let prefs = PreferenceStore::open(dir.path().join("prefs.toml")).unwrap();
        prefs.save_grace_period(30 * 60 * 1000).unwrap();
        let contacts = ContactStore::open(db.clone(), &session).unwrap();
        let channel = Arc::new(Recorder::default());
        let inbox = Arc::new(Inbox::default());
        let clock = Arc::new(ManualClock::new(t0()));

        let monitor = Monitor::builder(db.clone(), session, prefs.subscribe(), contacts.clone())
            .channel(channel.clone())
            .notifier(inbox.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        Fixture {
            _dir: dir,
            db,
            prefs,
            contacts,
            channel,
            inbox,
            clock,
            monitor,
        }
    }

    #[tokio::test]
    async fn new_user_deadline_is_anchored() {
        let f = fixture();
        let state = f.monitor.current_state().await.unwrap();
        assert_eq!(state.next_deadline_at, t0() + Duration::hours(4));

        f.clock.advance(Duration::hours(1));
        let later = f.monitor.current_state().await.unwrap();
        assert_eq!(later.next_deadline_at, t0() + Duration::hours(4));
        assert_eq!(*f.monitor.subscribe().borrow(), later);
    }

    #[tokio::test]
    async fn no_alert_within_grace() {
        let f = fixture();
        f.contacts.add(ContactDraft::new("Mom").phone("+15550100")).unwrap();

        f.clock.set(t0() + Duration::hours(4) + Duration::minutes(30));
        let state = f.monitor.on_tick().await.unwrap();
        assert_eq!(state.status, CheckInStatus::Overdue);
        assert!(f.channel.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_contact_is_retried_after_backoff_only() {
        let f = fixture();
        let mom = f.contacts.add(ContactDraft::new("Mom").phone("1")).unwrap();
        let sam = f.contacts.add(ContactDraft::new("Sam").phone("2")).unwrap();
        f.channel.fail_ids.lock().unwrap().push(sam.id);

        let alert_time = t0() + Duration::hours(4) + Duration::minutes(31);
        f.clock.set(alert_time);
        f.monitor.on_tick().await.unwrap();
        assert_eq!(*f.channel.calls.lock().unwrap(), vec![mom.id, sam.id]);

        // Backoff (1 minute) not elapsed yet.
        f.clock.advance(Duration::seconds(30));
        f.monitor.on_tick().await.unwrap();
        assert_eq!(f.channel.calls.lock().unwrap().len(), 2);

        f.channel.fail_ids.lock().unwrap().clear();
        f.clock.advance(Duration::seconds(30));
        let state = f.monitor.on_tick().await.unwrap();
        assert_eq!(*f.channel.calls.lock().unwrap(), vec![mom.id, sam.id, sam.id]);
        assert_eq!(state.status, CheckInStatus::AlertSent);

        let notes = f.inbox.0.lock().unwrap();
        assert!(matches!(
            notes.last(),
            Some(LocalNotification::ContactsAlerted { delivered: 2, failed: 0, .. })
        ));
    }

    #[tokio::test]
    async fn retries_stop_after_max_attempts() {
        let f = fixture();
        f.prefs.set_key("alerts.max_attempts", "2").unwrap();
        let sam = f.contacts.add(ContactDraft::new("Sam").phone("2")).unwrap();
        f.channel.fail_ids.lock().unwrap().push(sam.id);

        f.clock.set(t0() + Duration::hours(4) + Duration::minutes(31));
        for _ in 0..5 {
            f.monitor.on_tick().await.unwrap();
            f.clock.advance(Duration::minutes(10));
        }
        assert_eq!(f.channel.calls.lock().unwrap().len(), 2);
        assert!(matches!(
            f.inbox.0.lock().unwrap().last(),
            Some(LocalNotification::ContactsAlerted { delivered: 0, failed: 1, .. })
        ));
    }

    #[tokio::test]
    async fn zero_contacts_only_notifies_locally() {
        let f = fixture();
        f.clock.set(t0() + Duration::hours(5));
        let state = f.monitor.on_tick().await.unwrap();
        assert_eq!(state.status, CheckInStatus::AlertSent);
        assert_eq!(f.inbox.0.lock().unwrap().len(), 1);
        assert!(f.channel.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn auto_alert_off_never_dispatches() {
        let f = fixture();
        f.prefs.save_auto_alert(false).unwrap();
        f.contacts.add(ContactDraft::new("Mom").phone("1")).unwrap();
        f.clock.set(t0() + Duration::hours(6));
        let state = f.monitor.on_tick().await.unwrap();
        assert_eq!(state.status, CheckInStatus::Overdue);
        assert!(f.channel.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upcoming_reminder_fires_once_per_deadline() {
        let f = fixture();
        f.clock.set(t0() + Duration::hours(4) - Duration::minutes(10));
        f.monitor.on_tick().await.unwrap();
        f.clock.advance(Duration::minutes(5));
        f.monitor.on_tick().await.unwrap();

        let notes = f.inbox.0.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert!(matches!(
            notes[0],
            LocalNotification::UpcomingDeadline { minutes_left: 10, .. }
        ));
    }

    #[tokio::test]
    async fn next_due_points_at_reminder_then_alert() {
        let f = fixture();
        let deadline = t0() + Duration::hours(4);
        assert_eq!(
            f.monitor.next_due().await.unwrap(),
            Some(deadline - Duration::minutes(15))
        );

        f.prefs.save_notify_upcoming(false).unwrap();
        assert_eq!(
            f.monitor.next_due().await.unwrap(),
            Some(deadline + Duration::minutes(30) + Duration::milliseconds(1))
        );
    }

    #[tokio::test]
    async fn check_in_during_alerting_drops_retries() {
        let f = fixture();
        let sam = f.contacts.add(ContactDraft::new("Sam").phone("2")).unwrap();
        f.channel.fail_ids.lock().unwrap().push(sam.id);

        f.clock.set(t0() + Duration::hours(4) + Duration::minutes(31));
        f.monitor.on_tick().await.unwrap();
        let receipt = f.monitor.check_in_now().await.unwrap();
        assert_eq!(receipt.record.status, CheckInRecordStatus::Late);
        assert_eq!(receipt.state.status, CheckInStatus::OnTrack);

        f.clock.advance(Duration::minutes(10));
        f.monitor.on_tick().await.unwrap();
        assert_eq!(f.channel.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn check_in_closes_deadlines_left_open_by_an_interval_change() {
        let f = fixture();
        let sam = f.contacts.add(ContactDraft::new("Sam").phone("2")).unwrap();
        f.channel.fail_ids.lock().unwrap().push(sam.id);

        f.clock.set(t0() + Duration::hours(4) + Duration::minutes(31));
        f.monitor.on_tick().await.unwrap();
        assert_eq!(f.channel.calls.lock().unwrap().len(), 1);

        // The alerting deadline no longer matches the one derived from the new interval.
        f.prefs.save_check_in_interval(2 * 60 * 60 * 1000).unwrap();
        f.monitor.check_in_now().await.unwrap();

        f.clock.advance(Duration::minutes(5));
        f.monitor.on_tick().await.unwrap();
        assert_eq!(f.channel.calls.lock().unwrap().len(), 1);

        let db = f.db.lock().unwrap();
        let ledger = AlertLedger::new(db.conn(), "u1");
        assert!(ledger.in_flight().unwrap().is_empty());
        assert_eq!(
            ledger.phase_of(t0() + Duration::hours(4)).unwrap(),
            Some(DeadlinePhase::Alerted)
        );
    }

    #[tokio::test]
    async fn each_delivery_is_recorded_before_the_next_attempt() {
        let f = fixture();
        let mom = f.contacts.add(ContactDraft::new("Mom").phone("1")).unwrap();
        f.contacts.add(ContactDraft::new("Sam").phone("2")).unwrap();
        let deadline = t0() + Duration::hours(4);

        let db = f.db.clone();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_in_hook = seen.clone();
        *f.channel.after_delivery.lock().unwrap() = Some(Box::new(move |contact_id| {
            let db = db.lock().unwrap();
            let recorded = AlertLedger::new(db.conn(), "u1").deliveries(deadline).unwrap();
            seen_in_hook.lock().unwrap().push((contact_id, recorded.len()));
        }));

        f.clock.set(deadline + Duration::minutes(31));
        f.monitor.on_tick().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (mom.id, 0));
        assert_eq!(seen[1].1, 1);
    }

    #[tokio::test]
    async fn deadline_closed_elsewhere_stops_the_round() {
        let f = fixture();
        let mom = f.contacts.add(ContactDraft::new("Mom").phone("1")).unwrap();
        f.contacts.add(ContactDraft::new("Sam").phone("2")).unwrap();
        let deadline = t0() + Duration::hours(4);
        let check_in_at = deadline + Duration::minutes(31);

        // Another process checks in while Mom is being alerted.
        let db = f.db.clone();
        *f.channel.after_delivery.lock().unwrap() = Some(Box::new(move |_| {
            let db = db.lock().unwrap();
            CheckInLog::new(db.conn(), "u1")
                .append(check_in_at, CheckInRecordStatus::Late)
                .unwrap();
            AlertLedger::new(db.conn(), "u1")
                .set_phase(deadline, DeadlinePhase::Alerted, check_in_at)
                .unwrap();
        }));

        f.clock.set(check_in_at);
        let state = f.monitor.on_tick().await.unwrap();
        assert_eq!(*f.channel.calls.lock().unwrap(), vec![mom.id]);
        assert_eq!(state.status, CheckInStatus::OnTrack);
    }
}
