//! Paid flow: a submission waits under an opaque session id until an external
//! payment confirmation releases it, then the finished report waits under the
//! same id for pickup. Storage sits behind a narrow key-value interface.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::{EntitlementError, ReportError, Result};
use crate::form::ReportForm;
use crate::report::{OutputFormat, ReportGenerator};

pub trait SessionStore: Send + Sync {
    fn put(&self, id: &str, blob: Vec<u8>) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<Vec<u8>>>;
    fn delete(&self, id: &str) -> Result<()>;
    /// Drop entries under `prefix` not written for at least `age`; returns how many.
    fn purge(&self, prefix: &str, age: Duration) -> Result<usize>;
}

/// Latest write time that counts as `age` old; `None` when nothing can be that old.
fn cutoff(age: Duration) -> Option<DateTime<Utc>> {
    let age = chrono::Duration::from_std(age).ok()?;
    Utc::now().checked_sub_signed(age)
}

impl<T: SessionStore + ?Sized> SessionStore for Box<T> {
    fn put(&self, id: &str, blob: Vec<u8>) -> Result<()> {
        (**self).put(id, blob)
    }

    fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(id)
    }

    fn delete(&self, id: &str) -> Result<()> {
        (**self).delete(id)
    }

    fn purge(&self, prefix: &str, age: Duration) -> Result<usize> {
        (**self).purge(prefix, age)
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn put(&self, id: &str, blob: Vec<u8>) -> Result<()> {
        self.entries.lock().insert(id.to_string(), (blob, Utc::now()));
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(id).map(|(blob, _)| blob.clone()))
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.entries.lock().remove(id);
        Ok(())
    }

    fn purge(&self, prefix: &str, age: Duration) -> Result<usize> {
        let Some(cutoff) = cutoff(age) else { return Ok(0) };
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|id, (_, written)| !(id.starts_with(prefix) && *written <= cutoff));
        Ok(before - entries.len())
    }
}

/// Survives restarts and can be shared by several processes.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                blob BLOB NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl SessionStore for SqliteSessionStore {
    fn put(&self, id: &str, blob: Vec<u8>) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO sessions (id, blob) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET blob = excluded.blob, updated_at = CURRENT_TIMESTAMP",
            params![id, blob],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let blob = conn
            .query_row("SELECT blob FROM sessions WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(blob)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.conn.lock().execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn purge(&self, prefix: &str, age: Duration) -> Result<usize> {
        let Some(cutoff) = cutoff(age) else { return Ok(0) };
        // Same layout as CURRENT_TIMESTAMP, so text comparison orders correctly.
        let cutoff = cutoff.format("%Y-%m-%d %H:%M:%S").to_string();
        let n = self.conn.lock().execute(
            "DELETE FROM sessions WHERE substr(id, 1, length(?1)) = ?1 AND updated_at <= ?2",
            params![prefix, cutoff],
        )?;
        Ok(n)
    }
}

fn pending_key(id: &str) -> String {
    format!("pending:{id}")
}

fn report_key(id: &str) -> String {
    format!("report:{id}")
}

/// A report held for pickup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReport {
    pub format: OutputFormat,
    pub bytes: Vec<u8>,
}

impl StoredReport {
    /// `<format>\n<document bytes>`
    fn encode(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.bytes.len() + 5);
        blob.extend_from_slice(self.format.as_str().as_bytes());
        blob.push(b'\n');
        blob.extend_from_slice(&self.bytes);
        blob
    }

    fn decode(blob: Vec<u8>) -> Result<Self> {
        let nl = blob
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| ReportError::Store("stored report has no format header".into()))?;
        let format = std::str::from_utf8(&blob[..nl])
            .ok()
            .and_then(OutputFormat::parse)
            .ok_or_else(|| ReportError::Store("stored report has an unknown format".into()))?;
        Ok(Self { format, bytes: blob[nl + 1..].to_vec() })
    }

    pub fn download_name(&self) -> &'static str {
        self.format.download_name()
    }
}

pub struct Entitlements<S: SessionStore> {
    store: S,
}

impl<S: SessionStore> Entitlements<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Hold a submission; the returned id travels through the payment processor.
    pub fn begin(&self, form: &ReportForm) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.store.put(&pending_key(&id), serde_json::to_vec(form)?)?;
        tracing::info!(session = %id, "submission held for payment");
        Ok(id)
    }

    pub fn pending(&self, id: &str) -> Result<ReportForm> {
        let blob = self
            .store
            .get(&pending_key(id))?
            .ok_or_else(|| EntitlementError::NotFound(id.to_string()))?;
        Ok(serde_json::from_slice(&blob)?)
    }

    /// Called once the payment processor's callback has been verified. The
    /// held form is only released after the report is safely stored.
    pub async fn confirm(&self, id: &str, generator: &ReportGenerator) -> Result<StoredReport> {
        let form = self.pending(id)?;
        let report = generator.generate(&form).await?;
        let stored = StoredReport { format: report.format, bytes: report.bytes()? };
        self.store.put(&report_key(id), stored.encode())?;
        self.store.delete(&pending_key(id))?;
        tracing::info!(session = %id, format = stored.format.as_str(), "paid report stored");
        Ok(stored)
    }

    /// Forget held submissions whose payment never arrived within `max_age`.
    pub fn purge_abandoned(&self, max_age: Duration) -> Result<usize> {
        let n = self.store.purge(&pending_key(""), max_age)?;
        if n > 0 {
            tracing::info!(purged = n, "abandoned submissions dropped");
        }
        Ok(n)
    }

    pub fn fetch(&self, id: &str) -> Result<StoredReport> {
        if let Some(blob) = self.store.get(&report_key(id))? {
            return StoredReport::decode(blob);
        }
        if self.store.get(&pending_key(id))?.is_some() {
            return Err(EntitlementError::NotReady(id.to_string()).into());
        }
        Err(EntitlementError::NotFound(id.to_string()).into())
    }
}
