//! Trusted contacts, one row per contact, scoped to a user.

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::Database;
use crate::account::Session;
use crate::error::{DatabaseError, Result, ValidationError};

/// A person to notify on a missed check-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub name: String,
    pub relationship: String,
    pub email: String,
    pub phone_number: String,
}

impl Contact {
    /// A contact can be alerted when it has a name and at least one channel.
    pub fn is_actionable(&self) -> bool {
        !self.name.trim().is_empty()
            && (!self.email.trim().is_empty() || !self.phone_number.trim().is_empty())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            relationship: row.get(2)?,
            email: row.get(3)?,
            phone_number: row.get(4)?,
        })
    }
}

/// Fields for creating a contact; the id is assigned on insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDraft {
    pub name: String,
    pub relationship: String,
    pub email: String,
    pub phone_number: String,
}

impl ContactDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone_number = phone.into();
        self
    }

    pub fn relationship(mut self, relationship: impl Into<String>) -> Self {
        self.relationship = relationship.into();
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(&self.name, &self.email)
    }
}

fn validate_fields(name: &str, email: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::Required("name".into()));
    }
    let email = email.trim();
    if !email.is_empty() && !email.contains('@') {
        return Err(ValidationError::InvalidValue {
            field: "email".into(),
            message: format!("'{email}' is not an email address"),
        });
    }
    Ok(())
}

const SELECT_COLUMNS: &str = "SELECT id, name, relationship, email, phone_number FROM contacts";

/// Load every contact for `user_id`, ordered by id.
pub(crate) fn list_for_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<Contact>> {
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE user_id = ?1 ORDER BY id"))?;
    let rows = stmt.query_map(params![user_id], Contact::from_row)?;
    rows.collect()
}

/// CRUD over a user's contacts, published as a latest-value-wins stream.
///
/// Subscribers always observe the full list as of the most recent successful
/// write; intermediate states may be skipped.
#[derive(Clone)]
pub struct ContactStore {
    db: Arc<Mutex<Database>>,
    user_id: String,
    feed: Arc<watch::Sender<Vec<Contact>>>,
}

impl ContactStore {
    /// Open the store for `session`, loading the current list.
    pub fn open(db: Arc<Mutex<Database>>, session: &Session) -> Result<Self> {
        let initial = {
            let guard = lock(&db)?;
            list_for_user(guard.conn(), &session.user_id)?
        };
        let (feed, _) = watch::channel(initial);
        Ok(Self {
            db,
            user_id: session.user_id.clone(),
            feed: Arc::new(feed),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Contact>> {
        self.feed.subscribe()
    }

    /// Current snapshot from the feed.
    pub fn snapshot(&self) -> Vec<Contact> {
        self.feed.borrow().clone()
    }

    pub fn list(&self) -> Result<Vec<Contact>> {
        let guard = lock(&self.db)?;
        Ok(list_for_user(guard.conn(), &self.user_id)?)
    }

    pub fn get(&self, id: i64) -> Result<Option<Contact>> {
        let guard = lock(&self.db)?;
        let contact = guard
            .conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE user_id = ?1 AND id = ?2"),
                params![self.user_id, id],
                Contact::from_row,
            )
            .optional()?;
        Ok(contact)
    }

    pub fn add(&self, draft: ContactDraft) -> Result<Contact> {
        draft.validate()?;
        let contact = {
            let guard = lock(&self.db)?;
            guard.conn().execute(
                "INSERT INTO contacts (user_id, name, relationship, email, phone_number)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    self.user_id,
                    draft.name.trim(),
                    draft.relationship.trim(),
                    draft.email.trim(),
                    draft.phone_number.trim(),
                ],
            )?;
            Contact {
                id: guard.conn().last_insert_rowid(),
                name: draft.name.trim().to_string(),
                relationship: draft.relationship.trim().to_string(),
                email: draft.email.trim().to_string(),
                phone_number: draft.phone_number.trim().to_string(),
            }
        };
        tracing::info!(contact_id = contact.id, "contact added");
        self.publish()?;
        Ok(contact)
    }

    pub fn update(&self, contact: &Contact) -> Result<()> {
        validate_fields(&contact.name, &contact.email)?;
        let changed = {
            let guard = lock(&self.db)?;
            guard.conn().execute(
                "UPDATE contacts SET name = ?1, relationship = ?2, email = ?3, phone_number = ?4
                 WHERE user_id = ?5 AND id = ?6",
                params![
                    contact.name.trim(),
                    contact.relationship.trim(),
                    contact.email.trim(),
                    contact.phone_number.trim(),
                    self.user_id,
                    contact.id,
                ],
            )?
        };
        if changed == 0 {
            return Err(not_found(contact.id));
        }
        self.publish()
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let changed = {
            let guard = lock(&self.db)?;
            guard.conn().execute(
                "DELETE FROM contacts WHERE user_id = ?1 AND id = ?2",
                params![self.user_id, id],
            )?
        };
        if changed == 0 {
            return Err(not_found(id));
        }
        tracing::info!(contact_id = id, "contact removed");
        self.publish()
    }

    fn publish(&self) -> Result<()> {
        let latest = self.list()?;
        self.feed.send_replace(latest);
        Ok(())
    }
}

fn not_found(id: i64) -> crate::CoreError {
    DatabaseError::NotFound {
        entity: "contact",
        id: id.to_string(),
    }
    .into()
}

/// Lock the shared database, mapping a poisoned mutex to a persistence error.
pub(crate) fn lock(db: &Mutex<Database>) -> Result<std::sync::MutexGuard<'_, Database>> {
    db.lock()
        .map_err(|e| DatabaseError::QueryFailed(format!("database mutex poisoned: {e}")).into())
}
