//! # LifePing Core Library
//!
//! Core logic for LifePing, a personal safety check-in service. The user checks
//! in periodically; when a check-in is missed by more than the grace period,
//! their trusted contacts are alerted.
//!
//! The CLI is a thin layer over this crate and also hosts the background
//! monitor.
//!
//! ## Architecture
//!
//! - **Check-in state**: a pure function of the last check-in, the schedule and
//!   the wall clock. No timers are kept; absolute deadlines are re-evaluated on
//!   every tick.
//! - **Monitor**: the serialized critical section for "check in now" and ticks,
//!   including the per-deadline alert lifecycle.
//! - **Scheduler**: one periodic trigger per user, replaced atomically on re-arm.
//! - **Storage**: SQLite for accounts, contacts, check-ins and the alert
//!   ledger; TOML for per-user preferences.
//! - **Alerts**: pluggable delivery channels with per-contact bounded retry.
//!
//! ## Key Components
//!
//! - [`Monitor`]: check-in and alert loop for one signed-in user
//! - [`Scheduler`]: periodic trigger driving the monitor
//! - [`compute_state`]: deadline, status and countdown derivation
//! - [`PreferenceStore`] / [`ContactStore`]: observable per-user stores

pub mod account;
pub mod alert;
pub mod checkin;
pub mod clock;
pub mod error;
pub mod monitor;
pub mod scheduler;
pub mod stats;
pub mod storage;

pub use account::{
    AccountRemoval, AccountStore, Registration, Session, SessionStore, UserProfile,
};
pub use alert::{
    AlertChannel, AlertDispatcher, AlertMessage, DispatchResult, LocalNotification, Notifier,
    RetryPolicy,
};
pub use checkin::{
    compute_state, compute_state_at, format_countdown, CheckInState, CheckInStatus, DeadlinePhase,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AuthError, ConfigError, CoreError, DatabaseError, DispatchError, ValidationError};
pub use monitor::{CheckInReceipt, Monitor};
pub use scheduler::{ArmOutcome, Scheduler, TickTarget};
pub use stats::{compute_stats, CheckInStats};
pub use storage::{
    CheckInLog, CheckInRecord, Contact, ContactDraft, ContactStore, Database, PreferenceStore,
    Preferences, ScheduleConfig, SharedDb,
};
