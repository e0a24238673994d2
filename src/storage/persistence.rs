//! Mail persistence layer
//!
//! The core talks to storage only through [`MailStore`]. [`JsonStore`] keeps users and
//! records in memory and, when given a data directory, flushes them to a JSON file
//! after every mutation.

use crate::core::{EmailId, EmailRecord, EmailStatus, Envelope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Email {0} not found")]
    NotFound(EmailId),
    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: EmailId,
        from: EmailStatus,
        to: EmailStatus,
    },
    #[error("Store lock poisoned")]
    Poisoned,
}

/// A local mailbox owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub domain: String,
}

impl User {
    pub fn new(username: &str, domain: &str) -> Self {
        Self {
            username: username.to_string(),
            domain: domain.to_string(),
        }
    }
}

/// Deletes attachment objects from the external attachment store
pub trait AttachmentSink: Send + Sync {
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Attachment sink for deployments without an attachment store
pub struct LogAttachmentSink;

impl AttachmentSink for LogAttachmentSink {
    fn delete(&self, key: &str) -> Result<(), StorageError> {
        log::debug!("Attachment {} released", key);
        Ok(())
    }
}

/// Persistence operations the mail core depends on.
///
/// Each call is atomic on its own; no multi-call transactions are assumed.
pub trait MailStore: Send + Sync {
    fn lookup_user(&self, username: &str, domain: &str) -> Result<Option<User>, StorageError>;

    /// Commit an envelope as a new record with the given status
    fn insert_email(&self, envelope: Envelope, status: EmailStatus)
        -> Result<EmailId, StorageError>;

    /// Move a record forward. Moving to `sending` restarts its staleness clock.
    fn update_status(
        &self,
        id: EmailId,
        status: EmailStatus,
        error: Option<&str>,
    ) -> Result<(), StorageError>;

    fn get_email(&self, id: EmailId) -> Result<Option<EmailRecord>, StorageError>;

    /// Up to `limit` scheduled records due at `now`, oldest `scheduled_at` first
    fn select_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EmailRecord>, StorageError>;

    /// Pending or sending records whose send started before `threshold`
    fn select_stale_pending(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<EmailRecord>, StorageError>;

    fn select_expired(&self, now: DateTime<Utc>) -> Result<Vec<EmailRecord>, StorageError>;

    fn delete_email(&self, id: EmailId) -> Result<(), StorageError>;

    /// Purge expired records, releasing each record's attachments before the record.
    /// Returns how many records were removed.
    fn delete_expired(
        &self,
        now: DateTime<Utc>,
        attachments: &dyn AttachmentSink,
    ) -> Result<usize, StorageError> {
        let expired = self.select_expired(now)?;
        let mut removed = 0;

        for record in expired {
            let mut released = true;
            for key in &record.envelope.attachments {
                if let Err(e) = attachments.delete(key) {
                    log::warn!("Failed to delete attachment {} of {}: {}", key, record.id, e);
                    released = false;
                }
            }

            // Keep the record while any attachment still references it
            if released {
                self.delete_email(record.id)?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub mail_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".sharp_data"),
            mail_file: "mail.json".to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    users: Vec<User>,
    emails: HashMap<EmailId, EmailRecord>,
}

/// In-memory mail store with optional JSON file persistence
pub struct JsonStore {
    data: RwLock<StoreData>,
    config: Option<StorageConfig>,
}

impl JsonStore {
    /// A store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            config: None,
        }
    }

    /// Open (or create) a store under `config.data_dir`
    pub fn open(config: StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_dir)?;
        let path = config.data_dir.join(&config.mail_file);

        let data = if path.exists() {
            let reader = BufReader::new(fs::File::open(&path)?);
            serde_json::from_reader(reader)?
        } else {
            StoreData::default()
        };

        log::info!(
            "Opened mail store at {:?} ({} users, {} emails)",
            path,
            data.users.len(),
            data.emails.len()
        );

        Ok(Self {
            data: RwLock::new(data),
            config: Some(config),
        })
    }

    /// Register a local mailbox; existing users are left untouched
    pub fn add_user(&self, user: User) -> Result<(), StorageError> {
        let mut data = self.write()?;
        if !data.users.contains(&user) {
            data.users.push(user);
            if let Err(e) = self.flush(&data) {
                data.users.pop();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Number of stored records
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.read()?.emails.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// All records, for inspection
    pub fn emails(&self) -> Result<Vec<EmailRecord>, StorageError> {
        Ok(self.read()?.emails.values().cloned().collect())
    }

    /// Insert a fully built record as-is
    pub fn insert_record(&self, record: EmailRecord) -> Result<EmailId, StorageError> {
        let mut data = self.write()?;
        let id = record.id;
        let previous = data.emails.insert(id, record);
        if let Err(e) = self.flush(&data) {
            match previous {
                Some(previous) => data.emails.insert(id, previous),
                None => data.emails.remove(&id),
            };
            return Err(e);
        }
        Ok(id)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreData>, StorageError> {
        self.data.read().map_err(|_| StorageError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreData>, StorageError> {
        self.data.write().map_err(|_| StorageError::Poisoned)
    }

    /// Write to a temporary file, then rename over the real one.
    /// Callers undo their in-memory change when this fails.
    fn flush(&self, data: &StoreData) -> Result<(), StorageError> {
        let Some(config) = &self.config else {
            return Ok(());
        };

        let temp_path = config.data_dir.join(format!("{}.tmp", config.mail_file));
        let writer = BufWriter::new(fs::File::create(&temp_path)?);
        serde_json::to_writer_pretty(writer, data)?;
        fs::rename(&temp_path, config.data_dir.join(&config.mail_file))?;

        Ok(())
    }
}

impl MailStore for JsonStore {
    fn lookup_user(&self, username: &str, domain: &str) -> Result<Option<User>, StorageError> {
        let data = self.read()?;
        Ok(data
            .users
            .iter()
            .find(|u| u.username == username && u.domain == domain)
            .cloned())
    }

    fn insert_email(
        &self,
        envelope: Envelope,
        status: EmailStatus,
    ) -> Result<EmailId, StorageError> {
        self.insert_record(EmailRecord::new(envelope, status, Utc::now()))
    }

    fn update_status(
        &self,
        id: EmailId,
        status: EmailStatus,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut data = self.write()?;
        let record = data.emails.get_mut(&id).ok_or(StorageError::NotFound(id))?;

        if !record.status.can_transition_to(status) {
            return Err(StorageError::InvalidTransition {
                id,
                from: record.status,
                to: status,
            });
        }

        let before = record.clone();
        record.status = status;
        if let Some(error) = error {
            record.error_message = Some(error.to_string());
        }
        if status == EmailStatus::Sending {
            record.sent_at = Utc::now();
        }

        if let Err(e) = self.flush(&data) {
            data.emails.insert(id, before);
            return Err(e);
        }
        Ok(())
    }

    fn get_email(&self, id: EmailId) -> Result<Option<EmailRecord>, StorageError> {
        Ok(self.read()?.emails.get(&id).cloned())
    }

    fn select_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EmailRecord>, StorageError> {
        let data = self.read()?;
        let mut due: Vec<EmailRecord> = data
            .emails
            .values()
            .filter(|r| r.status == EmailStatus::Scheduled)
            .filter(|r| r.envelope.scheduled_at.map_or(true, |at| at <= now))
            .cloned()
            .collect();

        due.sort_by_key(|r| (r.envelope.scheduled_at, r.sent_at));
        due.truncate(limit);
        Ok(due)
    }

    fn select_stale_pending(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<EmailRecord>, StorageError> {
        let data = self.read()?;
        Ok(data
            .emails
            .values()
            .filter(|r| matches!(r.status, EmailStatus::Pending | EmailStatus::Sending))
            .filter(|r| r.sent_at < threshold)
            .cloned()
            .collect())
    }

    fn select_expired(&self, now: DateTime<Utc>) -> Result<Vec<EmailRecord>, StorageError> {
        let data = self.read()?;
        Ok(data
            .emails
            .values()
            .filter(|r| r.is_expired(now))
            .cloned()
            .collect())
    }

    fn delete_email(&self, id: EmailId) -> Result<(), StorageError> {
        let mut data = self.write()?;
        if let Some(removed) = data.emails.remove(&id) {
            if let Err(e) = self.flush(&data) {
                data.emails.insert(id, removed);
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Address;
    use chrono::Duration;
    use std::sync::Mutex;

    fn envelope(subject: &str) -> Envelope {
        Envelope::new(
            Address::new("alice", "a.example"),
            Address::new("bob", "b.example"),
            subject,
            "body",
        )
    }

    #[test]
    fn test_lookup_user() {
        let store = JsonStore::in_memory();
        store.add_user(User::new("bob", "b.example")).unwrap();

        assert!(store.lookup_user("bob", "b.example").unwrap().is_some());
        assert!(store.lookup_user("bob", "B.example").unwrap().is_none());
        assert!(store.lookup_user("eve", "b.example").unwrap().is_none());
    }

    #[test]
    fn test_update_status_is_forward_only() {
        let store = JsonStore::in_memory();
        let id = store
            .insert_email(envelope("s"), EmailStatus::Scheduled)
            .unwrap();

        store.update_status(id, EmailStatus::Sending, None).unwrap();
        store
            .update_status(id, EmailStatus::Failed, Some("boom"))
            .unwrap();

        let err = store.update_status(id, EmailStatus::Sent, None).unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { .. }));

        let record = store.get_email(id).unwrap().unwrap();
        assert_eq!(record.status, EmailStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_select_due_scheduled_oldest_first() {
        let store = JsonStore::in_memory();
        let now = Utc::now();

        for (subject, offset) in [("later", -10), ("future", 600), ("earliest", -60)] {
            let mut env = envelope(subject);
            env.scheduled_at = Some(now + Duration::seconds(offset));
            store.insert_email(env, EmailStatus::Scheduled).unwrap();
        }

        let due = store.select_due_scheduled(now, 10).unwrap();
        let subjects: Vec<&str> = due.iter().map(|r| r.envelope.subject.as_str()).collect();
        assert_eq!(subjects, vec!["earliest", "later"]);

        assert_eq!(store.select_due_scheduled(now, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_select_stale_pending() {
        let store = JsonStore::in_memory();
        let now = Utc::now();

        let mut old = EmailRecord::new(envelope("old"), EmailStatus::Sending, now);
        old.sent_at = now - Duration::seconds(120);
        let old_id = store.insert_record(old).unwrap();

        store.insert_email(envelope("new"), EmailStatus::Sending).unwrap();

        let mut sent = EmailRecord::new(envelope("done"), EmailStatus::Sent, now);
        sent.sent_at = now - Duration::seconds(120);
        store.insert_record(sent).unwrap();

        let stale = store
            .select_stale_pending(now - Duration::seconds(30))
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old_id);
    }

    struct RecordingSink {
        deleted: Mutex<Vec<String>>,
    }

    impl AttachmentSink for RecordingSink {
        fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.deleted.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_delete_expired_releases_attachments() {
        let store = JsonStore::in_memory();
        let now = Utc::now();

        let mut env = envelope("expiring");
        env.expires_at = Some(now - Duration::seconds(1));
        env.attachments = vec!["a/1".to_string(), "a/2".to_string()];
        let expired_id = store.insert_email(env, EmailStatus::Sent).unwrap();
        let kept_id = store.insert_email(envelope("kept"), EmailStatus::Sent).unwrap();

        let sink = RecordingSink {
            deleted: Mutex::new(Vec::new()),
        };
        assert_eq!(store.delete_expired(now, &sink).unwrap(), 1);
        assert_eq!(*sink.deleted.lock().unwrap(), vec!["a/1", "a/2"]);
        assert!(store.get_email(expired_id).unwrap().is_none());
        assert!(store.get_email(kept_id).unwrap().is_some());
    }

    #[test]
    fn test_save_load_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        };

        let id = {
            let store = JsonStore::open(config.clone()).unwrap();
            store.add_user(User::new("bob", "b.example")).unwrap();
            store.insert_email(envelope("persisted"), EmailStatus::Sent).unwrap()
        };

        let reopened = JsonStore::open(config).unwrap();
        assert!(reopened.lookup_user("bob", "b.example").unwrap().is_some());
        let record = reopened.get_email(id).unwrap().unwrap();
        assert_eq!(record.envelope.subject, "persisted");
        assert_eq!(record.status, EmailStatus::Sent);
    }

    #[test]
    fn test_failed_flush_leaves_store_unchanged() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data_dir = temp_dir.path().join("mail");
        let store = JsonStore::open(StorageConfig {
            data_dir: data_dir.clone(),
            ..Default::default()
        })
        .unwrap();
        let id = store.insert_email(envelope("kept"), EmailStatus::Scheduled).unwrap();

        // Nowhere left to write the file
        fs::remove_dir_all(&data_dir).unwrap();

        assert!(store.insert_email(envelope("lost"), EmailStatus::Pending).is_err());
        assert_eq!(store.len().unwrap(), 1);

        assert!(store.update_status(id, EmailStatus::Sending, Some("x")).is_err());
        let record = store.get_email(id).unwrap().unwrap();
        assert_eq!(record.status, EmailStatus::Scheduled);
        assert!(record.error_message.is_none());

        assert!(store.delete_email(id).is_err());
        assert!(store.get_email(id).unwrap().is_some());

        assert!(store.add_user(User::new("bob", "b.example")).is_err());
        assert!(store.lookup_user("bob", "b.example").unwrap().is_none());
    }
}
