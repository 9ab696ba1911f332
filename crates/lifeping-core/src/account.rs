//! Local accounts, profiles and the explicit session context.
//!
//! Every per-user component takes a [`Session`] instead of reading an ambient
//! "current user". The session is persisted in the kv table so the CLI and the
//! background monitor agree on who is signed in.

use std::path::Path;

use chrono::{DateTime, Utc};
use hmac::digest::generic_array::GenericArray;
use hmac::digest::CtOutput;
use hmac::{Hmac, Mac};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AuthError, CoreError, DatabaseError, Result, ValidationError};
use crate::monitor::{anchor_key, reminded_key};
use crate::storage::Database;

const SESSION_KEY: &str = "session";
const MIN_PASSWORD_LEN: usize = 8;

const HASH_SCHEME: &str = "pbkdf2-sha256";
#[cfg(not(test))]
const PBKDF2_ROUNDS: u32 = 100_000;
#[cfg(test)]
const PBKDF2_ROUNDS: u32 = 1_000;

type HmacSha256 = Hmac<Sha256>;

/// Identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            email: email.into(),
        }
    }
}

/// Public profile of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    pub bio: String,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn session(&self) -> Session {
        Session::new(&self.user_id, &self.full_name, &self.email)
    }
}

/// Registration form.
#[derive(Debug, Clone)]
pub struct Registration {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl Registration {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.full_name.trim().is_empty() {
            return Err(ValidationError::Required("full_name".into()));
        }
        validate_email(&self.email)?;
        validate_password("password", &self.password)?;
        if self.password != self.confirm_password {
            return Err(ValidationError::InvalidValue {
                field: "confirm_password".into(),
                message: "passwords do not match".into(),
            });
        }
        Ok(())
    }
}

fn validate_password(field: &str, password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::InvalidValue {
            field: field.into(),
            message: format!("must be at least {MIN_PASSWORD_LEN} characters"),
        });
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::Required("email".into()));
    }
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    };
    if !valid {
        return Err(ValidationError::InvalidValue {
            field: "email".into(),
            message: format!("'{email}' is not an email address"),
        });
    }
    Ok(())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// PBKDF2-HMAC-SHA256 with a single output block.
fn pbkdf2_sha256(password: &[u8], salt: &[u8], rounds: u32) -> Result<[u8; 32]> {
    let prf = HmacSha256::new_from_slice(password)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    let mut mac = prf.clone();
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut block = mac.finalize().into_bytes();

    let mut derived = [0u8; 32];
    derived.copy_from_slice(&block);
    for _ in 1..rounds {
        let mut mac = prf.clone();
        mac.update(&block);
        block = mac.finalize().into_bytes();
        for (acc, byte) in derived.iter_mut().zip(block.iter()) {
            *acc ^= byte;
        }
    }
    Ok(derived)
}

/// Encoded as `pbkdf2-sha256$<rounds>$<hex>`.
fn hash_password(salt: &str, password: &str) -> Result<String> {
    let derived = pbkdf2_sha256(password.as_bytes(), salt.as_bytes(), PBKDF2_ROUNDS)?;
    Ok(format!("{HASH_SCHEME}${PBKDF2_ROUNDS}${}", hex::encode(derived)))
}

fn verify_password(salt: &str, password: &str, stored: &str) -> Result<bool> {
    let mut parts = stored.splitn(3, '$');
    let (Some(HASH_SCHEME), Some(rounds), Some(digest)) = (parts.next(), parts.next(), parts.next())
    else {
        return Ok(false);
    };
    let (Ok(rounds), Ok(expected)) = (rounds.parse::<u32>(), hex::decode(digest)) else {
        return Ok(false);
    };
    if rounds == 0 || expected.len() != 32 {
        return Ok(false);
    }
    let derived = pbkdf2_sha256(password.as_bytes(), salt.as_bytes(), rounds)?;
    let derived = CtOutput::<HmacSha256>::new(GenericArray::clone_from_slice(&derived));
    let expected = CtOutput::<HmacSha256>::new(GenericArray::clone_from_slice(&expected));
    Ok(derived == expected)
}

fn new_salt() -> Result<String> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    Ok(hex::encode(bytes))
}

/// Rows removed by [`AccountStore::delete_account`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountRemoval {
    pub contacts: usize,
    pub check_ins: usize,
    pub deadlines: usize,
    pub preferences_removed: bool,
}

/// Account registry backed by the `accounts` table.
pub struct AccountStore<'a> {
    conn: &'a Connection,
}

impl<'a> AccountStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { conn: db.conn() }
    }

    /// Create an account and return its profile.
    pub fn register(&self, form: &Registration) -> Result<UserProfile> {
        form.validate()?;
        let email = normalize_email(&form.email);
        if self.find_by_email(&email)?.is_some() {
            return Err(AuthError::EmailTaken(email).into());
        }

        let salt = new_salt()?;
        let profile = UserProfile {
            user_id: uuid::Uuid::new_v4().to_string(),
            full_name: form.full_name.trim().to_string(),
            email,
            bio: String::new(),
            created_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO accounts (user_id, email, full_name, bio, password_hash, salt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                profile.user_id,
                profile.email,
                profile.full_name,
                profile.bio,
                hash_password(&salt, &form.password)?,
                salt,
                profile.created_at.to_rfc3339(),
            ],
        )?;
        tracing::info!(user_id = %profile.user_id, "account registered");
        Ok(profile)
    }

    /// Verify credentials. Unknown email and wrong password are indistinguishable.
    pub fn login(&self, email: &str, password: &str) -> Result<UserProfile> {
        let email = normalize_email(email);
        let user_id: Option<String> = self
            .conn
            .query_row(
                "SELECT user_id FROM accounts WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::from)?;

        let user_id = user_id.ok_or(AuthError::InvalidCredentials)?;
        self.check_password(&user_id, password)?;
        self.profile(&user_id)?
            .ok_or_else(|| AuthError::StaleSession(user_id).into())
    }

    /// Fails with [`AuthError::InvalidCredentials`] unless `password` matches.
    fn check_password(&self, user_id: &str, password: &str) -> Result<()> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT password_hash, salt FROM accounts WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(DatabaseError::from)?;

        let (stored_hash, salt) = row.ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(&salt, password, &stored_hash)? {
            tracing::warn!(%user_id, "password rejected");
            return Err(AuthError::InvalidCredentials.into());
        }
        Ok(())
    }

    /// Replace the password after verifying the current one. A fresh salt is drawn.
    pub fn change_password(&self, session: &Session, current: &str, new: &str) -> Result<()> {
        self.check_password(&session.user_id, current)?;
        validate_password("new_password", new)?;
        let salt = new_salt()?;
        self.conn.execute(
            "UPDATE accounts SET password_hash = ?1, salt = ?2 WHERE user_id = ?3",
            params![hash_password(&salt, new)?, salt, session.user_id],
        )?;
        tracing::info!(user_id = %session.user_id, "password changed");
        Ok(())
    }

    /// Remove the account and everything stored for it: contacts, check-ins,
    /// alert ledger rows, monitor markers, the saved session if it is this
    /// user's, and the preferences file at `preferences`.
    pub fn delete_account(
        &self,
        session: &Session,
        password: &str,
        preferences: &Path,
    ) -> Result<AccountRemoval> {
        self.check_password(&session.user_id, password)?;
        let user_id = session.user_id.as_str();

        let tx = self.conn.unchecked_transaction()?;
        let mut removal = AccountRemoval {
            contacts: tx.execute("DELETE FROM contacts WHERE user_id = ?1", params![user_id])?,
            check_ins: tx.execute("DELETE FROM checkins WHERE user_id = ?1", params![user_id])?,
            deadlines: tx.execute(
                "DELETE FROM deadline_alerts WHERE user_id = ?1",
                params![user_id],
            )?,
            preferences_removed: false,
        };
        tx.execute("DELETE FROM contact_deliveries WHERE user_id = ?1", params![user_id])?;
        tx.execute(
            "DELETE FROM kv WHERE key IN (?1, ?2)",
            params![anchor_key(user_id), reminded_key(user_id)],
        )?;
        let signed_in: Option<String> = tx
            .query_row("SELECT value FROM kv WHERE key = ?1", params![SESSION_KEY], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(json) = signed_in {
            let saved: Option<Session> = serde_json::from_str(&json).ok();
            if saved.is_some_and(|s| s.user_id == user_id) {
                tx.execute("DELETE FROM kv WHERE key = ?1", params![SESSION_KEY])?;
            }
        }
        tx.execute("DELETE FROM accounts WHERE user_id = ?1", params![user_id])?;
        tx.commit()?;

        match std::fs::remove_file(preferences) {
            Ok(()) => removal.preferences_removed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(%user_id, contacts = removal.contacts, "account deleted");
        Ok(removal)
    }

    pub fn profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        self.query_profile("user_id", user_id)
    }

    fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        self.query_profile("email", email)
    }

    fn query_profile(&self, column: &str, value: &str) -> Result<Option<UserProfile>> {
        let sql = format!(
            "SELECT user_id, full_name, email, bio, created_at FROM accounts WHERE {column} = ?1"
        );
        let profile = self
            .conn
            .query_row(&sql, params![value], |row| {
                let created: String = row.get(4)?;
                Ok(UserProfile {
                    user_id: row.get(0)?,
                    full_name: row.get(1)?,
                    email: row.get(2)?,
                    bio: row.get(3)?,
                    created_at: DateTime::parse_from_rfc3339(&created)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_default(),
                })
            })
            .optional()
            .map_err(DatabaseError::from)?;
        Ok(profile)
    }

    /// Update name and bio of the signed-in user.
    pub fn update_profile(
        &self,
        session: &Session,
        full_name: Option<&str>,
        bio: Option<&str>,
    ) -> Result<UserProfile> {
        let mut profile = self
            .profile(&session.user_id)?
            .ok_or_else(|| AuthError::StaleSession(session.user_id.clone()))?;
        if let Some(name) = full_name {
            if name.trim().is_empty() {
                return Err(ValidationError::Required("full_name".into()).into());
            }
            profile.full_name = name.trim().to_string();
        }
        if let Some(bio) = bio {
            profile.bio = bio.trim().to_string();
        }
        self.conn.execute(
            "UPDATE accounts SET full_name = ?1, bio = ?2 WHERE user_id = ?3",
            params![profile.full_name, profile.bio, profile.user_id],
        )?;
        Ok(profile)
    }
}

/// Persists which account is signed in on this device.
pub struct SessionStore<'a> {
    db: &'a Database,
}

impl<'a> SessionStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        self.db.kv_set(SESSION_KEY, &serde_json::to_string(session)?)
    }

    pub fn load(&self) -> Result<Option<Session>> {
        match self.db.kv_get(SESSION_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// The signed-in session, or [`AuthError::NotSignedIn`].
    pub fn require(&self) -> Result<Session> {
        self.load()?.ok_or_else(|| CoreError::Auth(AuthError::NotSignedIn))
    }

    pub fn clear(&self) -> Result<()> {
        self.db.kv_delete(SESSION_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(email: &str, password: &str) -> Registration {
        Registration {
            full_name: "Alex Rivera".into(),
            email: email.into(),
            password: password.into(),
            confirm_password: password.into(),
        }
    }

    #[test]
    fn register_then_login() {
        let db = Database::open_memory().unwrap();
        let accounts = AccountStore::new(&db);
        let created = accounts.register(&form("Alex@Example.com", "correct horse")).unwrap();
        assert_eq!(created.email, "alex@example.com");

        let logged_in = accounts.login("alex@example.com ", "correct horse").unwrap();
        assert_eq!(logged_in.user_id, created.user_id);
    }

    #[test]
    fn wrong_password_and_unknown_email_are_rejected() {
        let db = Database::open_memory().unwrap();
        let accounts = AccountStore::new(&db);
        accounts.register(&form("alex@example.com", "correct horse")).unwrap();

        assert!(matches!(
            accounts.login("alex@example.com", "wrong horse"),
            Err(CoreError::Auth(AuthError::InvalidCredentials))
        ));
        assert!(matches!(
            accounts.login("nobody@example.com", "correct horse"),
            Err(CoreError::Auth(AuthError::InvalidCredentials))
        ));
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let db = Database::open_memory().unwrap();
        let accounts = AccountStore::new(&db);
        accounts.register(&form("alex@example.com", "correct horse")).unwrap();
        assert!(matches!(
            accounts.register(&form("ALEX@example.com", "another pass")),
            Err(CoreError::Auth(AuthError::EmailTaken(_)))
        ));
    }

    #[test]
    fn registration_form_validation() {
        let db = Database::open_memory().unwrap();
        let accounts = AccountStore::new(&db);
        assert!(accounts.register(&form("not-an-email", "correct horse")).is_err());
        assert!(accounts.register(&form("a@example.com", "short")).is_err());

        let mut mismatched = form("a@example.com", "correct horse");
        mismatched.confirm_password = "correct horsf".into();
        assert!(accounts.register(&mismatched).is_err());
    }

    #[test]
    fn salts_differ_between_accounts() {
        let db = Database::open_memory().unwrap();
        let accounts = AccountStore::new(&db);
        accounts.register(&form("a@example.com", "same password")).unwrap();
        accounts.register(&form("b@example.com", "same password")).unwrap();

        let hashes: Vec<String> = db
            .conn()
            .prepare("SELECT password_hash FROM accounts")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_ne!(hashes[0], hashes[1]);
    }

    #[test]
    fn password_hash_is_iterated_and_encoded() {
        let db = Database::open_memory().unwrap();
        let accounts = AccountStore::new(&db);
        accounts.register(&form("alex@example.com", "correct horse")).unwrap();

        let (stored, salt): (String, String) = db
            .conn()
            .query_row("SELECT password_hash, salt FROM accounts", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert!(stored.starts_with(&format!("pbkdf2-sha256${PBKDF2_ROUNDS}$")));
        assert!(verify_password(&salt, "correct horse", &stored).unwrap());
        assert!(!verify_password(&salt, "correct horsf", &stored).unwrap());
        assert!(!verify_password(&salt, "correct horse", "not-a-hash").unwrap());
    }

    #[test]
    fn pbkdf2_matches_rfc_7914_vector() {
        let derived = pbkdf2_sha256(b"passwd", b"salt", 1).unwrap();
        assert_eq!(
            hex::encode(derived),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn change_password_requires_the_current_one() {
        let db = Database::open_memory().unwrap();
        let accounts = AccountStore::new(&db);
        let profile = accounts.register(&form("alex@example.com", "correct horse")).unwrap();
        let session = profile.session();

        assert!(matches!(
            accounts.change_password(&session, "wrong horse", "battery staple"),
            Err(CoreError::Auth(AuthError::InvalidCredentials))
        ));
        assert!(matches!(
            accounts.change_password(&session, "correct horse", "short"),
            Err(CoreError::Validation(_))
        ));

        accounts.change_password(&session, "correct horse", "battery staple").unwrap();
        assert!(accounts.login("alex@example.com", "correct horse").is_err());
        assert_eq!(
            accounts.login("alex@example.com", "battery staple").unwrap().user_id,
            profile.user_id
        );
    }

    #[test]
    fn delete_account_removes_everything_for_the_user() {
        use crate::checkin::DeadlinePhase;
        use crate::storage::{
            AlertLedger, CheckInLog, CheckInRecordStatus, ContactDraft, ContactStore, SharedDb,
        };
        use std::sync::{Arc, Mutex};

        let dir = tempfile::TempDir::new().unwrap();
        let prefs = dir.path().join("prefs.toml");
        std::fs::write(&prefs, "").unwrap();

        let db: SharedDb = Arc::new(Mutex::new(Database::open_memory().unwrap()));
        let (gone, kept) = {
            let guard = db.lock().unwrap();
            let accounts = AccountStore::new(&guard);
            let gone = accounts.register(&form("alex@example.com", "correct horse")).unwrap();
            let kept = accounts.register(&form("sam@example.com", "correct horse")).unwrap();
            SessionStore::new(&guard).save(&gone.session()).unwrap();
            (gone.session(), kept.session())
        };

        for session in [&gone, &kept] {
            let contacts = ContactStore::open(db.clone(), session).unwrap();
            contacts.add(ContactDraft::new("Mom").phone("+15550100")).unwrap();
            let guard = db.lock().unwrap();
            let now = Utc::now();
            CheckInLog::new(guard.conn(), &session.user_id)
                .append(now, CheckInRecordStatus::Completed)
                .unwrap();
            let ledger = AlertLedger::new(guard.conn(), &session.user_id);
            ledger.set_phase(now, DeadlinePhase::Overdue, now).unwrap();
            guard.kv_set(&anchor_key(&session.user_id), &now.to_rfc3339()).unwrap();
        }

        let guard = db.lock().unwrap();
        let accounts = AccountStore::new(&guard);
        assert!(matches!(
            accounts.delete_account(&gone, "wrong horse", &prefs),
            Err(CoreError::Auth(AuthError::InvalidCredentials))
        ));

        let removal = accounts.delete_account(&gone, "correct horse", &prefs).unwrap();
        assert_eq!(removal.contacts, 1);
        assert_eq!(removal.check_ins, 1);
        assert_eq!(removal.deadlines, 1);
        assert!(removal.preferences_removed);
        assert!(!prefs.exists());

        assert!(accounts.profile(&gone.user_id).unwrap().is_none());
        assert!(accounts.login("alex@example.com", "correct horse").is_err());
        assert!(SessionStore::new(&guard).load().unwrap().is_none());
        assert!(guard.kv_get(&anchor_key(&gone.user_id)).unwrap().is_none());
        assert_eq!(CheckInLog::new(guard.conn(), &gone.user_id).count().unwrap(), 0);

        assert!(accounts.profile(&kept.user_id).unwrap().is_some());
        assert_eq!(CheckInLog::new(guard.conn(), &kept.user_id).count().unwrap(), 1);
        assert!(guard.kv_get(&anchor_key(&kept.user_id)).unwrap().is_some());
    }

    #[test]
    fn update_profile_changes_name_and_bio() {
        let db = Database::open_memory().unwrap();
        let accounts = AccountStore::new(&db);
        let profile = accounts.register(&form("alex@example.com", "correct horse")).unwrap();

        let updated = accounts
            .update_profile(&profile.session(), Some("Alex R."), Some("Hiker"))
            .unwrap();
        assert_eq!(updated.full_name, "Alex R.");
        assert_eq!(accounts.profile(&profile.user_id).unwrap().unwrap().bio, "Hiker");
    }

    #[test]
    fn session_store_roundtrip() {
        let db = Database::open_memory().unwrap();
        let sessions = SessionStore::new(&db);
        assert!(matches!(sessions.require(), Err(CoreError::Auth(AuthError::NotSignedIn))));

        let session = Session::new("u1", "Alex", "alex@example.com");
        sessions.save(&session).unwrap();
        assert_eq!(sessions.require().unwrap(), session);

        sessions.clear().unwrap();
        assert!(sessions.load().unwrap().is_none());
    }
}
