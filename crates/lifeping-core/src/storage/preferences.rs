//! TOML-based per-user preferences.
//!
//! Stores:
//! - Check-in schedule (interval, grace period, reminder and auto-alert flags)
//! - Appearance (dark theme)
//! - Alert delivery settings (channel, relay URL, retry policy)
//!
//! Each user gets `<data_dir>/preferences/<user_id>.toml`.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::data_dir;
use crate::account::Session;
use crate::error::{ConfigError, Result, ValidationError};

const HOUR_MS: u64 = 60 * 60 * 1000;
const MINUTE_MS: u64 = 60 * 1000;

/// Upper bound for interval, grace period and reminder lead.
pub const MAX_SPAN_MS: u64 = 365 * 24 * HOUR_MS;
/// Upper bound for the base retry backoff.
pub const MAX_RETRY_BACKOFF_MS: u64 = 24 * HOUR_MS;
pub const MAX_ATTEMPTS: u32 = 100;
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

/// The user's check-in policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_check_in_interval_ms")]
    pub check_in_interval_ms: u64,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_true")]
    pub notify_upcoming: bool,
    #[serde(default = "default_true")]
    pub auto_alert: bool,
    /// How long before the deadline the upcoming reminder is raised.
    #[serde(default = "default_upcoming_lead_ms")]
    pub upcoming_lead_ms: u64,
}

/// Appearance settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UiConfig {
    #[serde(default)]
    pub dark_theme: bool,
}

/// How trusted contacts are reached when an alert fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannelKind {
    /// Local notification only, written to the log.
    #[default]
    Log,
    /// POST to an email/SMS relay.
    Webhook,
}

/// Alert delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub channel: AlertChannelKind,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// All preferences for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Preferences {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

// Default functions
fn default_check_in_interval_ms() -> u64 {
    4 * HOUR_MS
}
fn default_grace_period_ms() -> u64 {
    30 * MINUTE_MS
}
fn default_upcoming_lead_ms() -> u64 {
    15 * MINUTE_MS
}
fn default_true() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    MINUTE_MS
}
fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_in_interval_ms: default_check_in_interval_ms(),
            grace_period_ms: default_grace_period_ms(),
            notify_upcoming: true,
            auto_alert: true,
            upcoming_lead_ms: default_upcoming_lead_ms(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            channel: AlertChannelKind::Log,
            webhook_url: None,
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ScheduleConfig {
    /// Schedule with the given interval and grace period, other fields default.
    pub fn new(check_in_interval_ms: u64, grace_period_ms: u64) -> Self {
        Self {
            check_in_interval_ms,
            grace_period_ms,
            ..Self::default()
        }
    }

    // Clamped to MAX_SPAN_MS for configs built without `validate`.
    pub fn interval(&self) -> Duration {
        span(self.check_in_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        span(self.grace_period_ms)
    }

    pub fn upcoming_lead(&self) -> Duration {
        span(self.upcoming_lead_ms)
    }

    /// Interval and grace period must be positive and at most a year; the
    /// reminder lead must be shorter than the interval.
    pub fn validate(&self) -> Result<(), ValidationError> {
        positive_at_most("schedule.check_in_interval_ms", self.check_in_interval_ms, MAX_SPAN_MS)?;
        positive_at_most("schedule.grace_period_ms", self.grace_period_ms, MAX_SPAN_MS)?;
        if self.upcoming_lead_ms >= self.check_in_interval_ms {
            return Err(ValidationError::InvalidValue {
                field: "schedule.upcoming_lead_ms".into(),
                message: "must be shorter than the check-in interval".into(),
            });
        }
        Ok(())
    }
}

fn span(ms: u64) -> Duration {
    Duration::milliseconds(ms.min(MAX_SPAN_MS) as i64)
}

fn positive_at_most(field: &str, value: u64, max: u64) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::NotPositive { field: field.into() });
    }
    if value > max {
        return Err(ValidationError::TooLarge {
            field: field.into(),
            max,
        });
    }
    Ok(())
}

impl AlertsConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        positive_at_most(
            "alerts.max_attempts",
            u64::from(self.max_attempts),
            u64::from(MAX_ATTEMPTS),
        )?;
        positive_at_most(
            "alerts.request_timeout_secs",
            self.request_timeout_secs,
            MAX_REQUEST_TIMEOUT_SECS,
        )?;
        if self.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            return Err(ValidationError::TooLarge {
                field: "alerts.retry_backoff_ms".into(),
                max: MAX_RETRY_BACKOFF_MS,
            });
        }
        if let Some(raw) = &self.webhook_url {
            let parsed = url::Url::parse(raw).map_err(|e| ValidationError::InvalidValue {
                field: "alerts.webhook_url".into(),
                message: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ValidationError::InvalidValue {
                    field: "alerts.webhook_url".into(),
                    message: format!("unsupported scheme '{}'", parsed.scheme()),
                });
            }
        }
        if self.channel == AlertChannelKind::Webhook && self.webhook_url.is_none() {
            return Err(ValidationError::Required("alerts.webhook_url".into()));
        }
        Ok(())
    }
}

impl Preferences {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.schedule.validate()?;
        self.alerts.validate()
    }

    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }

            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let existing = obj.get(part).ok_or_else(unknown)?;

            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value
                        .parse::<bool>()
                        .map_err(|_| invalid(format!("cannot parse '{value}' as bool")))?,
                ),
                serde_json::Value::Number(_) => value
                    .parse::<u64>()
                    .map(|n| serde_json::Value::Number(n.into()))
                    .map_err(|_| {
                        invalid(format!("cannot parse '{value}' as a non-negative integer"))
                    })?,
                // Optional strings serialize as null when unset.
                serde_json::Value::Null | serde_json::Value::String(_) => {
                    if value.is_empty() || value == "none" {
                        serde_json::Value::Null
                    } else {
                        serde_json::Value::String(value.into())
                    }
                }
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                }
            };

            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    /// Get a value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a value by dot-separated key, validating the result.
    ///
    /// On error `self` is left unchanged.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Preferences =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Load from a TOML file, or return defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let prefs: Preferences =
                    toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    })?;
                prefs.validate()?;
                Ok(prefs)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()),
        }
    }

    /// Persist to a TOML file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }
}

/// File-backed preference store for one user.
///
/// Every successful write is persisted before it is published to subscribers.
pub struct PreferenceStore {
    path: PathBuf,
    current: watch::Sender<Preferences>,
}

impl PreferenceStore {
    /// Open the store at `path`, falling back to defaults when the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let prefs = Preferences::load_from(&path)?;
        let (current, _) = watch::channel(prefs);
        Ok(Self { path, current })
    }

    /// Open the store for the signed-in user under the data directory.
    pub fn for_session(session: &Session) -> Result<Self> {
        Self::open(Self::path_for(&data_dir()?, &session.user_id))
    }

    pub fn path_for(data_dir: &Path, user_id: &str) -> PathBuf {
        data_dir.join("preferences").join(format!("{user_id}.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current preferences.
    pub fn get(&self) -> Preferences {
        self.current.borrow().clone()
    }

    pub fn schedule(&self) -> ScheduleConfig {
        self.current.borrow().schedule.clone()
    }

    /// Latest-value-wins stream of preference changes.
    pub fn subscribe(&self) -> watch::Receiver<Preferences> {
        self.current.subscribe()
    }

    fn update(&self, apply: impl FnOnce(&mut Preferences) -> Result<()>) -> Result<Preferences> {
        let mut next = self.get();
        apply(&mut next)?;
        next.validate()?;
        next.save_to(&self.path)?;
        self.current.send_replace(next.clone());
        Ok(next)
    }

    pub fn check_in_interval(&self) -> u64 {
        self.current.borrow().schedule.check_in_interval_ms
    }

    pub fn save_check_in_interval(&self, interval_ms: u64) -> Result<()> {
        self.update(|p| {
            p.schedule.check_in_interval_ms = interval_ms;
            Ok(())
        })?;
        tracing::info!(interval_ms, "check-in interval updated");
        Ok(())
    }

    pub fn grace_period(&self) -> u64 {
        self.current.borrow().schedule.grace_period_ms
    }

    pub fn save_grace_period(&self, grace_ms: u64) -> Result<()> {
        self.update(|p| {
            p.schedule.grace_period_ms = grace_ms;
            Ok(())
        })
        .map(|_| ())
    }

    pub fn save_notify_upcoming(&self, enabled: bool) -> Result<()> {
        self.update(|p| {
            p.schedule.notify_upcoming = enabled;
            Ok(())
        })
        .map(|_| ())
    }

    pub fn save_auto_alert(&self, enabled: bool) -> Result<()> {
        self.update(|p| {
            p.schedule.auto_alert = enabled;
            Ok(())
        })
        .map(|_| ())
    }

    pub fn is_dark_theme(&self) -> bool {
        self.current.borrow().ui.dark_theme
    }

    pub fn save_theme(&self, dark: bool) -> Result<()> {
        self.update(|p| {
            p.ui.dark_theme = dark;
            Ok(())
        })
        .map(|_| ())
    }

    /// Flip the theme and return the new value.
    pub fn toggle_theme(&self) -> Result<bool> {
        let next = self.update(|p| {
            p.ui.dark_theme = !p.ui.dark_theme;
            Ok(())
        })?;
        tracing::debug!(dark_theme = next.ui.dark_theme, "theme toggled");
        Ok(next.ui.dark_theme)
    }

    /// Dot-path read, e.g. `schedule.grace_period_ms`.
    pub fn get_key(&self, key: &str) -> Option<String> {
        self.current.borrow().get(key)
    }

    /// Dot-path write with validation.
    pub fn set_key(&self, key: &str, value: &str) -> Result<()> {
        self.update(|p| p.set(key, value)).map(|_| ())
    }

    /// Restore defaults and persist them.
    pub fn reset(&self) -> Result<()> {
        self.update(|p| {
            *p = Preferences::default();
            Ok(())
        })
        .map(|_| ())
    }

    /// Re-read the file, publishing only if it changed on disk.
    ///
    /// Returns whether subscribers were notified.
    pub fn reload(&self) -> Result<bool> {
        let on_disk = Preferences::load_from(&self.path)?;
        Ok(self.current.send_if_modified(|current| {
            if *current == on_disk {
                false
            } else {
                *current = on_disk;
                true
            }
        }))
    }
}
