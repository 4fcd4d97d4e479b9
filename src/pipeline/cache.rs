//! Evidence cache.
//!
//! Memoizes settled extraction results per (document hash, requirement id,
//! registry version). A changed document or registry version is a new key,
//! so a stale hit is impossible. Writes are idempotent upserts; every write
//! is also appended to an audit history.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{self, DatabaseError};
use crate::models::EvidenceRecord;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub document_hash: String,
    pub requirement_id: String,
    pub registry_version: String,
}

impl CacheKey {
    pub fn new(document_hash: &str, requirement_id: &str, registry_version: &str) -> Self {
        Self {
            document_hash: document_hash.to_string(),
            requirement_id: requirement_id.to_string(),
            registry_version: registry_version.to_string(),
        }
    }
}

/// Frozen result for one key. An empty `records` list means the extraction
/// ran and found nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub records: Vec<EvidenceRecord>,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
}

pub trait EvidenceCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, DatabaseError>;

    /// Store the latest entry for its key and append it to the history.
    fn put(&self, entry: &CacheEntry) -> Result<(), DatabaseError>;

    /// Every entry ever written for the key, oldest first.
    fn history(&self, key: &CacheKey) -> Result<Vec<CacheEntry>, DatabaseError>;
}

// ═══════════════════════════════════════════════════════════
// SQLite
// ═══════════════════════════════════════════════════════════

pub struct SqliteEvidenceCache {
    conn: Mutex<Connection>,
}

impl SqliteEvidenceCache {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(db::open_database(path)?),
        })
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(db::open_memory_database()?),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, DatabaseError>) -> Result<T, DatabaseError> {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

fn entry_from_row(key: &CacheKey, records_json: &str, run_id: &str, created_at: &str) -> Result<CacheEntry, DatabaseError> {
    let records: Vec<EvidenceRecord> = serde_json::from_str(records_json)?;
    let run_id = Uuid::parse_str(run_id).map_err(|e| DatabaseError::CorruptRow(format!("run id: {e}")))?;
    let created_at = DateTime::parse_from_rfc3339(created_at)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    Ok(CacheEntry {
        key: key.clone(),
        records,
        run_id,
        created_at,
    })
}

impl EvidenceCache for SqliteEvidenceCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, DatabaseError> {
        self.with_conn(|conn| {
            let row: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT records_json, run_id, created_at FROM evidence_cache
                     WHERE document_hash = ?1 AND requirement_id = ?2 AND registry_version = ?3",
                    params![key.document_hash, key.requirement_id, key.registry_version],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            row.map(|(json, run_id, created_at)| entry_from_row(key, &json, &run_id, &created_at))
                .transpose()
        })
    }

    fn put(&self, entry: &CacheEntry) -> Result<(), DatabaseError> {
        let records_json = serde_json::to_string(&entry.records)?;
        let run_id = entry.run_id.to_string();
        let created_at = entry.created_at.to_rfc3339();
        let key = &entry.key;

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO evidence_cache
                     (document_hash, requirement_id, registry_version, records_json, run_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (document_hash, requirement_id, registry_version)
                 DO UPDATE SET records_json = excluded.records_json,
                               run_id = excluded.run_id,
                               created_at = excluded.created_at",
                params![key.document_hash, key.requirement_id, key.registry_version, records_json, run_id, created_at],
            )?;
            tx.execute(
                "INSERT INTO evidence_history
                     (document_hash, requirement_id, registry_version, records_json, run_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![key.document_hash, key.requirement_id, key.registry_version, records_json, run_id, created_at],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn history(&self, key: &CacheKey) -> Result<Vec<CacheEntry>, DatabaseError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT records_json, run_id, created_at FROM evidence_history
                 WHERE document_hash = ?1 AND requirement_id = ?2 AND registry_version = ?3
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(
                params![key.document_hash, key.requirement_id, key.registry_version],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )?;

            let mut entries = Vec::new();
            for row in rows {
                let (json, run_id, created_at) = row?;
                entries.push(entry_from_row(key, &json, &run_id, &created_at)?);
            }
            Ok(entries)
        })
    }
}

// ═══════════════════════════════════════════════════════════
// In-memory
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
pub struct InMemoryEvidenceCache {
    latest: Mutex<HashMap<CacheKey, CacheEntry>>,
    history: Mutex<Vec<CacheEntry>>,
}

impl InMemoryEvidenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.latest.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EvidenceCache for InMemoryEvidenceCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, DatabaseError> {
        let latest = self.latest.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        Ok(latest.get(key).cloned())
    }

    fn put(&self, entry: &CacheEntry) -> Result<(), DatabaseError> {
        self.latest
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned)?
            .insert(entry.key.clone(), entry.clone());
        self.history
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned)?
            .push(entry.clone());
        Ok(())
    }

    fn history(&self, key: &CacheKey) -> Result<Vec<CacheEntry>, DatabaseError> {
        let history = self.history.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        Ok(history.iter().filter(|e| &e.key == key).cloned().collect())
    }
}
