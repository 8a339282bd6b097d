// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! TTL-based cache for reverse search results, keyed by content fingerprint

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::{Result, TaxisError};

/// Search result cache (thread-safe wrapper)
#[derive(Clone)]
pub struct SearchCache {
    conn: Arc<Mutex<Connection>>,
    ttl_hours: u64,
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: i64,
    pub valid_entries: i64,
    pub expired_entries: i64,
    pub ttl_hours: u64,
}

impl SearchCache {
    /// Open or create the cache database
    pub fn open<P: AsRef<Path>>(path: P, ttl_hours: u64) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl_hours,
        };
        cache.initialize()?;
        Ok(cache)
    }

    /// Open an in-memory cache (for testing)
    pub fn in_memory(ttl_hours: u64) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl_hours,
        };
        cache.initialize()?;
        Ok(cache)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| TaxisError::Config("Cache lock poisoned".to_string()))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS search_cache (
                fingerprint TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                cached_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_cached_at ON search_cache(cached_at);
        "#)?;
        Ok(())
    }

    /// Retrieve a cached payload if present and not expired
    pub fn get(&self, fingerprint: &str) -> Result<Option<String>> {
        self.get_at(fingerprint, Utc::now())
    }

    fn get_at(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        let row: rusqlite::Result<(String, String)> = conn.query_row(
            "SELECT payload, cached_at FROM search_cache WHERE fingerprint = ?1",
            params![fingerprint],
            |row| Ok((row.get(0)?, row.get(1)?)),
        );

        let (payload, cached_at) = match row {
            Ok(pair) => pair,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let cached_time = match DateTime::parse_from_rfc3339(&cached_at) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(_) => {
                // Unparseable timestamp, treat as expired
                warn!("Invalid cache timestamp for {}", fingerprint);
                return Ok(None);
            }
        };

        if now - cached_time > ChronoDuration::hours(self.ttl_hours as i64) {
            debug!("Cache entry expired for {}", fingerprint);
            return Ok(None);
        }

        debug!("Cache hit for {}", fingerprint);
        Ok(Some(payload))
    }

    /// Store a payload, overwriting any prior entry
    pub fn set(&self, fingerprint: &str, payload: &str) -> Result<()> {
        self.set_at(fingerprint, payload, Utc::now())
    }

    fn set_at(&self, fingerprint: &str, payload: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO search_cache (fingerprint, payload, cached_at) VALUES (?1, ?2, ?3)",
            params![fingerprint, payload, now.to_rfc3339()],
        )?;
        debug!("Cached result for {}", fingerprint);
        Ok(())
    }

    /// Delete entries older than the TTL; returns how many were removed.
    /// Maintenance only, correctness never depends on it.
    pub fn cleanup(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - ChronoDuration::hours(self.ttl_hours as i64);
        let conn = self.lock_conn()?;
        let deleted = conn.execute(
            "DELETE FROM search_cache WHERE cached_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        if deleted > 0 {
            info!("Cleaned up {} expired cache entries", deleted);
        }
        Ok(deleted)
    }

    /// Cache statistics
    pub fn stats(&self) -> Result<CacheStats> {
        let cutoff = (Utc::now() - ChronoDuration::hours(self.ttl_hours as i64)).to_rfc3339();
        let conn = self.lock_conn()?;

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM search_cache", [], |row| row.get(0))?;
        let valid: i64 = conn.query_row(
            "SELECT COUNT(*) FROM search_cache WHERE cached_at >= ?1",
            params![cutoff],
            |row| row.get(0),
        )?;

        Ok(CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
            ttl_hours: self.ttl_hours,
        })
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute("DELETE FROM search_cache", [])?;
        info!("Cleared all cache entries ({} deleted)", deleted);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_hits() {
        let cache = SearchCache::in_memory(48).unwrap();
        cache.set("abc123", r#"{"status":"no_match"}"#).unwrap();

        let hit = cache.get("abc123").unwrap();
        assert_eq!(hit.as_deref(), Some(r#"{"status":"no_match"}"#));
    }

    #[test]
    fn missing_fingerprint_is_a_miss() {
        let cache = SearchCache::in_memory(48).unwrap();
        assert!(cache.get("nope").unwrap().is_none());
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = SearchCache::in_memory(48).unwrap();
        let old = Utc::now() - ChronoDuration::hours(49);
        cache.set_at("abc123", "{}", old).unwrap();

        assert!(cache.get("abc123").unwrap().is_none());
    }

    #[test]
    fn entry_within_ttl_survives() {
        let cache = SearchCache::in_memory(48).unwrap();
        let recent = Utc::now() - ChronoDuration::hours(47);
        cache.set_at("abc123", "{}", recent).unwrap();

        assert!(cache.get("abc123").unwrap().is_some());
    }

    #[test]
    fn set_overwrites_prior_entry() {
        let cache = SearchCache::in_memory(48).unwrap();
        cache.set("abc123", "old").unwrap();
        cache.set("abc123", "new").unwrap();

        assert_eq!(cache.get("abc123").unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn cleanup_removes_only_expired() {
        let cache = SearchCache::in_memory(48).unwrap();
        let now = Utc::now();
        cache.set_at("old", "{}", now - ChronoDuration::hours(100)).unwrap();
        cache.set_at("fresh", "{}", now).unwrap();

        let deleted = cache.cleanup(now).unwrap();
        assert_eq!(deleted, 1);
        assert!(cache.get("fresh").unwrap().is_some());

        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.valid_entries, 1);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = SearchCache::in_memory(48).unwrap();
        cache.set("a", "{}").unwrap();
        cache.set("b", "{}").unwrap();

        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.get("a").unwrap().is_none());
    }
}
