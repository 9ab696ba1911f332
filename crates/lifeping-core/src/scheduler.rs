//! Periodic trigger driving the monitor.
//!
//! At most one trigger is active per scheduler. [`Scheduler::arm`] cancels the
//! previous task and spawns its replacement while holding the slot lock, so
//! there is never a window with two triggers or with none.
//!
//! Cancellation is cooperative: a cancelled task stops while it sleeps, or
//! right after the tick it is running completes. A tick is never cut short,
//! so work it has started (an alert half-way through its contacts) is
//! finished and recorded.
//!
//! The period is the check-in interval. Between periods the loop asks its
//! target when it next has work (an alert coming due, a retry, a reminder) and
//! wakes early for that instead of waiting a full interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{CoreError, DatabaseError, Result, ValidationError};
use crate::storage::ScheduleConfig;

/// Lower bound on an early wakeup, so a target that keeps reporting
/// "due now" cannot spin the loop.
const MIN_WAKE: Duration = Duration::from_secs(1);

/// Something the scheduler ticks.
#[async_trait]
pub trait TickTarget: Send + Sync + 'static {
    /// Run one tick. Failures are handled by the target.
    async fn tick(&self);

    /// Delay until the target next has work, if it knows.
    async fn next_wakeup(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArmOutcome {
    /// Increases by one on every arm.
    pub generation: u64,
    /// Whether an active trigger was cancelled.
    pub replaced_previous: bool,
}

struct Armed {
    generation: u64,
    period: Duration,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Armed {
    fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

pub struct Scheduler<T: TickTarget> {
    target: Arc<T>,
    slot: Mutex<Option<Armed>>,
    generations: AtomicU64,
}

impl<T: TickTarget> Scheduler<T> {
    pub fn new(target: Arc<T>) -> Self {
        Self {
            target,
            slot: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// (Re)arm with the check-in interval from `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&self, config: &ScheduleConfig) -> Result<ArmOutcome> {
        self.arm_every(Duration::from_millis(config.check_in_interval_ms))
    }

    /// (Re)arm with an explicit period.
    pub fn arm_every(&self, period: Duration) -> Result<ArmOutcome> {
        if period.is_zero() {
            return Err(ValidationError::NotPositive {
                field: "schedule.check_in_interval_ms".into(),
            }
            .into());
        }

        let mut slot = self.lock_slot()?;
        let replaced_previous = match slot.take() {
            Some(previous) => {
                previous.cancel();
                tracing::debug!(generation = previous.generation, "previous trigger cancelled");
                true
            }
            None => false,
        };

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(run(self.target.clone(), period, generation, cancelled));
        *slot = Some(Armed {
            generation,
            period,
            cancel,
            handle,
        });

        tracing::info!(
            generation,
            period_ms = period.as_millis() as u64,
            replaced_previous,
            "scheduler armed"
        );
        Ok(ArmOutcome {
            generation,
            replaced_previous,
        })
    }

    /// Cancel the active trigger. Returns whether one was active.
    ///
    /// A tick already running still completes in the background.
    pub fn disarm(&self) -> Result<bool> {
        let mut slot = self.lock_slot()?;
        match slot.take() {
            Some(armed) => {
                armed.cancel();
                tracing::info!(generation = armed.generation, "scheduler disarmed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Cancel the active trigger and wait for a running tick to complete.
    pub async fn shutdown(&self) -> Result<bool> {
        let armed = self.lock_slot()?.take();
        let Some(armed) = armed else {
            return Ok(false);
        };
        armed.cancel();
        if let Err(e) = armed.handle.await {
            tracing::warn!(generation = armed.generation, "scheduler task ended abnormally: {e}");
        }
        tracing::info!(generation = armed.generation, "scheduler stopped");
        Ok(true)
    }

    pub fn is_armed(&self) -> bool {
        self.lock_slot()
            .map(|slot| slot.as_ref().is_some_and(|armed| !armed.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Generation of the active trigger.
    pub fn generation(&self) -> Option<u64> {
        self.lock_slot().ok()?.as_ref().map(|armed| armed.generation)
    }

    pub fn period(&self) -> Option<Duration> {
        self.lock_slot().ok()?.as_ref().map(|armed| armed.period)
    }

    fn lock_slot(&self) -> Result<MutexGuard<'_, Option<Armed>>> {
        self.slot.lock().map_err(|e| {
            CoreError::Database(DatabaseError::QueryFailed(format!("scheduler lock poisoned: {e}")))
        })
    }
}

impl<T: TickTarget> Drop for Scheduler<T> {
    fn drop(&mut self) {
        if let Ok(slot) = self.slot.get_mut() {
            if let Some(armed) = slot.take() {
                armed.cancel();
            }
        }
    }
}

async fn run<T: TickTarget>(
    target: Arc<T>,
    period: Duration,
    generation: u64,
    mut cancelled: watch::Receiver<bool>,
) {
    while !*cancelled.borrow() {
        let delay = match target.next_wakeup().await {
            Some(due) => due.max(MIN_WAKE).min(period),
            None => period,
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            // Fires on cancel, or when the scheduler is gone.
            _ = cancelled.changed() => break,
        }
        tracing::debug!(generation, "scheduler tick");
        target.tick().await;
    }
    tracing::debug!(generation, "scheduler task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl TickTarget for Counter {
        async fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Takes `work` of (paused) time per tick and records start and end.
    struct SlowTick {
        work: Duration,
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl TickTarget for SlowTick {
        async fn tick(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period() {
        let counter = Arc::new(Counter::default());
        let scheduler = Scheduler::new(counter.clone());
        scheduler.arm_every(Duration::from_secs(60)).unwrap();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_stops_ticks() {
        let counter = Arc::new(Counter::default());
        let scheduler = Scheduler::new(counter.clone());
        scheduler.arm_every(Duration::from_secs(10)).unwrap();
        assert!(scheduler.disarm().unwrap());
        assert!(!scheduler.disarm().unwrap());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 0);
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_lets_a_running_tick_finish() {
        let target = Arc::new(SlowTick {
            work: Duration::from_secs(8),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(target.clone());
        scheduler.arm_every(Duration::from_secs(10)).unwrap();

        // First tick starts at 10s and runs until 18s.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(target.started.load(Ordering::SeqCst), 1);
        scheduler.arm_every(Duration::from_secs(60)).unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(target.finished.load(Ordering::SeqCst), 1);
        // The old loop stopped after its tick; the new one has not fired yet.
        assert_eq!(target.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_the_running_tick() {
        let target = Arc::new(SlowTick {
            work: Duration::from_secs(30),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(target.clone());
        scheduler.arm_every(Duration::from_secs(5)).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(target.started.load(Ordering::SeqCst), 1);

        assert!(scheduler.shutdown().await.unwrap());
        assert_eq!(target.finished.load(Ordering::SeqCst), 1);
        assert!(!scheduler.shutdown().await.unwrap());
    }

    #[tokio::test]
    async fn zero_period_is_rejected() {
        let scheduler = Scheduler::new(Arc::new(Counter::default()));
        assert!(matches!(
            scheduler.arm_every(Duration::ZERO),
            Err(CoreError::Validation(ValidationError::NotPositive { .. }))
        ));
        assert_eq!(scheduler.generation(), None);
    }
}
