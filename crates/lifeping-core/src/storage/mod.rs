mod alerts;
mod checkins;
mod contacts;
pub mod database;
pub mod migrations;
pub mod preferences;

pub use alerts::{AlertLedger, ContactDelivery, DeadlineAlert, DeliveryOutcome};
pub use checkins::{CheckInLog, CheckInRecord, CheckInRecordStatus};
pub use contacts::{Contact, ContactDraft, ContactStore};
pub(crate) use checkins::{decode_ts, encode_ts};
pub(crate) use contacts::lock;
pub use database::Database;
pub use preferences::{
    AlertChannelKind, AlertsConfig, PreferenceStore, Preferences, ScheduleConfig, UiConfig,
};

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::ConfigError;

/// Database handle shared by the stores and the monitor. Never locked across an await.
pub type SharedDb = Arc<Mutex<Database>>;

/// Returns the LifePing data directory, creating it if needed.
///
/// `LIFEPING_HOME` overrides the location outright. Otherwise the directory is
/// `~/.config/lifeping/`, or `~/.config/lifeping-dev/` when `LIFEPING_ENV=dev`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("LIFEPING_HOME") {
        Some(home) => PathBuf::from(home),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("LIFEPING_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("lifeping-dev")
            } else {
                base_dir.join("lifeping")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
