pub mod account;
pub mod checkin;
pub mod config;
pub mod contact;
pub mod monitor;

use std::sync::{Arc, Mutex};

use lifeping_core::{
    ContactStore, Database, Monitor, PreferenceStore, Session, SessionStore, SharedDb,
};
use serde::Serialize;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Everything a per-user command needs, scoped to the signed-in session.
pub struct UserContext {
    pub db: SharedDb,
    pub session: Session,
    pub prefs: PreferenceStore,
}

impl UserContext {
    /// Load the signed-in user's context, or fail with "not signed in".
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let db = Database::open()?;
        let session = SessionStore::new(&db).require()?;
        let prefs = PreferenceStore::for_session(&session)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            session,
            prefs,
        })
    }

    pub fn contacts(&self) -> Result<ContactStore, Box<dyn std::error::Error>> {
        Ok(ContactStore::open(self.db.clone(), &self.session)?)
    }

    pub fn monitor(&self) -> Result<Monitor, Box<dyn std::error::Error>> {
        let monitor = Monitor::builder(
            self.db.clone(),
            self.session.clone(),
            self.prefs.subscribe(),
            self.contacts()?,
        )
        .build()?;
        Ok(monitor)
    }

    /// Run `f` with the database locked.
    pub fn with_db<T>(
        &self,
        f: impl FnOnce(&Database) -> lifeping_core::error::Result<T>,
    ) -> Result<T, Box<dyn std::error::Error>> {
        let db = self.db.lock().map_err(|e| format!("database lock poisoned: {e}"))?;
        Ok(f(&db)?)
    }
}

/// Single-threaded runtime for one-shot async commands.
pub fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

pub fn print_json<T: Serialize>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
