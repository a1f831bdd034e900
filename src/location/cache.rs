//! Location cache storage.
//!
//! One row per distinct location text. `upsert` is the only write path for
//! values: coordinates and provider are last-writer-wins, `usage_count`
//! accumulates. Timestamps are stored as Unix milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::types::{CacheEntry, CacheError, CacheWrite, ProviderId};

/// Aggregate figures for the admin stats surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSummary {
    pub total_entries: u64,
    pub total_usage: u64,
    /// Entries used at or after the `recent_since` cutoff.
    pub recent_entries: u64,
}

/// Durable key-value table of resolved locations.
///
/// Implementations must be safe to share between concurrent resolutions.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the entry for `text`. A row that fails to decode is reported
    /// as [`CacheError::Corrupted`] so the caller can drop it.
    async fn get(&self, text: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Insert or update the entry for `text`.
    ///
    /// On create: `created_at = last_used_at = now`, `usage_count = 1`.
    /// On update: value fields overwritten, `last_used_at = now`,
    /// `usage_count += 1`, `created_at` untouched.
    async fn upsert(&self, text: &str, write: &CacheWrite, now: DateTime<Utc>)
        -> Result<(), CacheError>;

    /// Record a read hit.
    async fn touch(&self, id: i64, now: DateTime<Utc>) -> Result<(), CacheError>;

    async fn delete(&self, id: i64) -> Result<(), CacheError>;

    async fn count(&self) -> Result<u64, CacheError>;

    /// Delete up to `n` entries with the oldest `last_used_at`.
    async fn delete_oldest(&self, n: u64) -> Result<u64, CacheError>;

    async fn delete_all(&self) -> Result<u64, CacheError>;

    async fn usage_summary(&self, recent_since: DateTime<Utc>) -> Result<UsageSummary, CacheError>;
}

// ─── SQLite store ───────────────────────────────────────────────

const SELECT_COLUMNS: &str = "id, location_text, latitude, longitude, formatted_address, \
     source_provider, confidence_score, created_at, last_used_at, usage_count";

/// SQLite-backed cache table. Survives restarts.
///
/// A single connection behind a mutex serialises writers; the blocking
/// SQLite calls run on the blocking thread pool.
#[derive(Clone)]
pub struct SqliteCacheStore {
    pub(super) conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteCacheStore {
    /// Open (creating if needed) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Non-durable store (for testing).
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(conn: &Connection) -> Result<(), CacheError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS location_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                location_text TEXT NOT NULL UNIQUE,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                formatted_address TEXT,
                source_provider TEXT NOT NULL,
                confidence_score REAL NOT NULL DEFAULT 0.9,
                created_at INTEGER NOT NULL,
                last_used_at INTEGER NOT NULL,
                usage_count INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_location_cache_last_used
                ON location_cache(last_used_at);
            "#,
        )?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, CacheError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| CacheError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }
}

fn decode_row(row: &Row<'_>) -> Result<CacheEntry, CacheError> {
    let id: i64 = row.get(0)?;
    let corrupt = |reason: String| CacheError::Corrupted { id, reason };

    let location_text: String = row.get(1).map_err(|e| corrupt(e.to_string()))?;
    let latitude: f64 = row.get(2).map_err(|e| corrupt(e.to_string()))?;
    let longitude: f64 = row.get(3).map_err(|e| corrupt(e.to_string()))?;
    let formatted_address: Option<String> = row.get(4).map_err(|e| corrupt(e.to_string()))?;
    let provider: String = row.get(5).map_err(|e| corrupt(e.to_string()))?;
    let confidence_score: f64 = row.get(6).map_err(|e| corrupt(e.to_string()))?;
    let created_ms: i64 = row.get(7).map_err(|e| corrupt(e.to_string()))?;
    let used_ms: i64 = row.get(8).map_err(|e| corrupt(e.to_string()))?;
    let usage: i64 = row.get(9).map_err(|e| corrupt(e.to_string()))?;

    let source_provider = provider.parse::<ProviderId>().map_err(corrupt)?;
    let created_at = DateTime::from_timestamp_millis(created_ms)
        .ok_or_else(|| corrupt(format!("bad created_at {}", created_ms)))?;
    let last_used_at = DateTime::from_timestamp_millis(used_ms)
        .ok_or_else(|| corrupt(format!("bad last_used_at {}", used_ms)))?;
    let usage_count =
        u64::try_from(usage).map_err(|_| corrupt(format!("negative usage_count {}", usage)))?;
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(corrupt("non-finite coordinates".into()));
    }

    Ok(CacheEntry {
        id,
        location_text,
        latitude,
        longitude,
        formatted_address,
        source_provider,
        confidence_score,
        created_at,
        last_used_at,
        usage_count,
    })
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, text: &str) -> Result<Option<CacheEntry>, CacheError> {
        let text = text.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM location_cache WHERE location_text = ?1",
                SELECT_COLUMNS
            );
            let decoded = conn
                .query_row(&sql, params![text], |row| Ok(decode_row(row)))
                .optional()?;
            decoded.transpose()
        })
        .await
    }

    async fn upsert(
        &self,
        text: &str,
        write: &CacheWrite,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let text = text.to_string();
        let write = write.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO location_cache (
                    location_text, latitude, longitude, formatted_address,
                    source_provider, confidence_score, created_at, last_used_at, usage_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 1)
                ON CONFLICT(location_text) DO UPDATE SET
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    formatted_address = excluded.formatted_address,
                    source_provider = excluded.source_provider,
                    confidence_score = excluded.confidence_score,
                    last_used_at = excluded.last_used_at,
                    usage_count = location_cache.usage_count + 1
                "#,
                params![
                    text,
                    write.latitude,
                    write.longitude,
                    write.formatted_address,
                    write.source_provider.as_str(),
                    write.confidence_score,
                    now.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn touch(&self, id: i64, now: DateTime<Utc>) -> Result<(), CacheError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE location_cache SET last_used_at = ?1, usage_count = usage_count + 1 WHERE id = ?2",
                params![now.timestamp_millis(), id],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: i64) -> Result<(), CacheError> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM location_cache WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn count(&self) -> Result<u64, CacheError> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM location_cache", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    async fn delete_oldest(&self, n: u64) -> Result<u64, CacheError> {
        if n == 0 {
            return Ok(0);
        }
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let removed = conn.execute(
                r#"
                DELETE FROM location_cache WHERE id IN (
                    SELECT id FROM location_cache
                    ORDER BY last_used_at ASC, id ASC
                    LIMIT ?1
                )
                "#,
                params![limit],
            )?;
            Ok(removed as u64)
        })
        .await
    }

    async fn delete_all(&self) -> Result<u64, CacheError> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM location_cache", [])?;
            Ok(removed as u64)
        })
        .await
    }

    async fn usage_summary(&self, recent_since: DateTime<Utc>) -> Result<UsageSummary, CacheError> {
        self.with_conn(move |conn| {
            let (total, usage, recent): (i64, i64, i64) = conn.query_row(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(usage_count), 0),
                    COALESCE(SUM(CASE WHEN last_used_at >= ?1 THEN 1 ELSE 0 END), 0)
                FROM location_cache
                "#,
                params![recent_since.timestamp_millis()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            Ok(UsageSummary {
                total_entries: total.max(0) as u64,
                total_usage: usage.max(0) as u64,
                recent_entries: recent.max(0) as u64,
            })
        })
        .await
    }
}

// ─── In-memory store ────────────────────────────────────────────

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    rows: HashMap<String, CacheEntry>,
}

/// Process-local store with the same semantics as the SQLite table.
/// Not durable; meant for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryCacheStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, CacheError> {
        self.inner.lock().map_err(|_| CacheError::Poisoned)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, text: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.lock()?.rows.get(text).cloned())
    }

    async fn upsert(
        &self,
        text: &str,
        write: &CacheWrite,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let mut inner = self.lock()?;
        if let Some(entry) = inner.rows.get_mut(text) {
            entry.latitude = write.latitude;
            entry.longitude = write.longitude;
            entry.formatted_address = write.formatted_address.clone();
            entry.source_provider = write.source_provider;
            entry.confidence_score = write.confidence_score;
            entry.last_used_at = now;
            entry.usage_count += 1;
            return Ok(());
        }
        inner.next_id += 1;
        let entry = CacheEntry {
            id: inner.next_id,
            location_text: text.to_string(),
            latitude: write.latitude,
            longitude: write.longitude,
            formatted_address: write.formatted_address.clone(),
            source_provider: write.source_provider,
            confidence_score: write.confidence_score,
            created_at: now,
            last_used_at: now,
            usage_count: 1,
        };
        inner.rows.insert(text.to_string(), entry);
        Ok(())
    }

    async fn touch(&self, id: i64, now: DateTime<Utc>) -> Result<(), CacheError> {
        let mut inner = self.lock()?;
        if let Some(entry) = inner.rows.values_mut().find(|e| e.id == id) {
            entry.last_used_at = now;
            entry.usage_count += 1;
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), CacheError> {
        self.lock()?.rows.retain(|_, e| e.id != id);
        Ok(())
    }

    async fn count(&self) -> Result<u64, CacheError> {
        Ok(self.lock()?.rows.len() as u64)
    }

    async fn delete_oldest(&self, n: u64) -> Result<u64, CacheError> {
        let mut inner = self.lock()?;
        let mut by_age: Vec<(DateTime<Utc>, i64, String)> = inner
            .rows
            .iter()
            .map(|(k, e)| (e.last_used_at, e.id, k.clone()))
            .collect();
        by_age.sort();
        let mut removed = 0;
        for (_, _, key) in by_age.into_iter().take(n as usize) {
            inner.rows.remove(&key);
            removed += 1;
        }
        Ok(removed)
    }

    async fn delete_all(&self) -> Result<u64, CacheError> {
        let mut inner = self.lock()?;
        let removed = inner.rows.len() as u64;
        inner.rows.clear();
        Ok(removed)
    }

    async fn usage_summary(&self, recent_since: DateTime<Utc>) -> Result<UsageSummary, CacheError> {
        let inner = self.lock()?;
        Ok(UsageSummary {
            total_entries: inner.rows.len() as u64,
            total_usage: inner.rows.values().map(|e| e.usage_count).sum(),
            recent_entries: inner
                .rows
                .values()
                .filter(|e| e.last_used_at >= recent_since)
                .count() as u64,
        })
    }
}
