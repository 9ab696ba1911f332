//! Core error types for lifeping-core.
//!
//! Errors fall into three families: persistence failures (retried on the next
//! monitor cycle), identity failures (surfaced to the user), and dispatch
//! failures (recorded per contact).

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for lifeping-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Identity / session errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Alert delivery errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether the failed operation should simply be retried on the next cycle.
    ///
    /// Identity and validation failures need user action and are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Database(_) | CoreError::Dispatch(_) | CoreError::Io(_)
        )
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Row that was expected to exist is missing
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown dot-path key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Identity errors. These are shown to the user and never retried silently.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Not signed in. Run `lifeping account login` first")]
    NotSignedIn,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("An account already exists for {0}")]
    EmailTaken(String),

    #[error("Session for user {0} no longer matches a registered account")]
    StaleSession(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Value must be strictly positive
    #[error("'{field}' must be greater than zero")]
    NotPositive { field: String },

    /// Value above its upper bound
    #[error("'{field}' must be at most {max}")]
    TooLarge { field: String, max: u64 },

    /// Required field missing
    #[error("'{0}' is required")]
    Required(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Delivery errors for a single contact or channel.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Relay request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Relay rejected alert (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Contact {0} has no reachable channel")]
    Unreachable(String),

    #[error("Channel not configured: {0}")]
    NotConfigured(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _msg) => {
                if inner.code == rusqlite::ErrorCode::DatabaseBusy
                    || inner.code == rusqlite::ErrorCode::DatabaseLocked
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
