//! Re-arming semantics of the scheduler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lifeping_core::{ScheduleConfig, Scheduler, TickTarget};

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

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

#[tokio::test(start_paused = true)]
async fn rearm_replaces_exactly_one_trigger() {
    let counter = Arc::new(Counter::default());
    let scheduler = Scheduler::new(counter.clone());

    let first = scheduler.arm(&ScheduleConfig::new(60 * 60_000, 30 * 60_000)).unwrap();
    assert_eq!(first.generation, 1);
    assert!(!first.replaced_previous);

    tokio::time::sleep(minutes(30)).await;
    let second = scheduler.arm(&ScheduleConfig::new(100 * 60_000, 30 * 60_000)).unwrap();
    assert_eq!(second.generation, 2);
    assert!(second.replaced_previous);
    assert!(scheduler.is_armed());
    assert_eq!(scheduler.generation(), Some(2));
    assert_eq!(scheduler.period(), Some(minutes(100)));

    // The first trigger would have fired at 60 minutes.
    tokio::time::sleep(minutes(65)).await;
    assert_eq!(counter.ticks.load(Ordering::SeqCst), 0);

    // The replacement fires at 30 + 100 minutes, and only once.
    tokio::time::sleep(minutes(40)).await;
    assert_eq!(counter.ticks.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_rearm_never_stacks_triggers() {
    let counter = Arc::new(Counter::default());
    let scheduler = Scheduler::new(counter.clone());

    for _ in 0..5 {
        scheduler.arm(&ScheduleConfig::new(10 * 60_000, 60_000)).unwrap();
    }
    tokio::time::sleep(minutes(10) + Duration::from_secs(1)).await;
    assert_eq!(counter.ticks.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.generation(), Some(5));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_scheduler_cancels_its_trigger() {
    let counter = Arc::new(Counter::default());
    {
        let scheduler = Scheduler::new(counter.clone());
        scheduler.arm(&ScheduleConfig::new(60_000, 60_000)).unwrap();
    }
    tokio::time::sleep(minutes(5)).await;
    assert_eq!(counter.ticks.load(Ordering::SeqCst), 0);
}
