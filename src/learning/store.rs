// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Preference store: learned rules plus the append-only movement log

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use super::confidence::ConfidencePolicy;
use super::patterns::pattern_keys;
use crate::analysis::ContentFeatures;
use crate::{Result, TaxisError};

/// A learned preference rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceRule {
    pub pattern_key: String,
    pub category: String,
    pub confidence: f64,
    pub sample_count: u32,
    pub last_updated: DateTime<Utc>,
}

/// Learning statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningStats {
    pub movements: i64,
    pub corrections: i64,
    pub preferences: i64,
    pub high_confidence: i64,
}

/// Preference database (thread-safe wrapper)
#[derive(Clone)]
pub struct PreferenceStore {
    conn: Arc<Mutex<Connection>>,
    policy: ConfidencePolicy,
}

impl PreferenceStore {
    /// Open or create the preference database
    pub fn open<P: AsRef<Path>>(path: P, policy: ConfidencePolicy) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            policy,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    pub fn in_memory(policy: ConfidencePolicy) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            policy,
        };
        store.initialize()?;
        Ok(store)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| TaxisError::Config("Store lock poisoned".to_string()))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS preferences (
                pattern_key TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                confidence REAL NOT NULL,
                sample_count INTEGER NOT NULL,
                last_updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS movements (
                id TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL,
                file_name TEXT NOT NULL,
                suggested_category TEXT NOT NULL,
                actual_category TEXT NOT NULL,
                style TEXT,
                style_confidence REAL,
                persons_detected INTEGER,
                tags TEXT,
                is_correction INTEGER NOT NULL,
                moved_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_movements_fingerprint ON movements(fingerprint);
            CREATE INDEX IF NOT EXISTS idx_movements_actual ON movements(actual_category);
        "#)?;
        Ok(())
    }

    /// Record a categorization decision and learn from it.
    ///
    /// Always appends a movement event. When the actual category differs
    /// from the suggestion, every pattern key derived from the snapshot is
    /// reinforced toward the actual category. Agreements teach nothing, so
    /// correct suggestions cannot inflate unrelated pattern confidence.
    /// Event and rule updates commit in one transaction.
    pub fn record_movement(
        &self,
        fingerprint: &str,
        file_name: &str,
        suggested_category: &str,
        actual_category: &str,
        features: Option<&ContentFeatures>,
        tags: &[String],
    ) -> Result<()> {
        let is_correction = suggested_category != actual_category;
        let now = Utc::now();
        let tags_json = serde_json::to_string(tags)?;

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"INSERT INTO movements
               (id, fingerprint, file_name, suggested_category, actual_category,
                style, style_confidence, persons_detected, tags, is_correction, moved_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                Uuid::new_v4().to_string(),
                fingerprint,
                file_name,
                suggested_category,
                actual_category,
                features.map(|f| f.style.as_str()),
                features.map(|f| f.style_confidence),
                features.map(|f| f.detected_entities),
                tags_json,
                is_correction as i32,
                now.to_rfc3339(),
            ],
        )?;

        if is_correction {
            for key in pattern_keys(features, tags) {
                Self::upsert_in_tx(&tx, &self.policy, &key, actual_category, now)?;
            }
        }

        tx.commit()?;
        debug!("Recorded movement: {} -> {}", file_name, actual_category);
        Ok(())
    }

    /// Reinforce a single pattern key toward a category
    pub fn upsert(&self, pattern_key: &str, category: &str) -> Result<()> {
        let now = Utc::now();
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        Self::upsert_in_tx(&tx, &self.policy, pattern_key, category, now)?;
        tx.commit()?;
        Ok(())
    }

    fn upsert_in_tx(
        tx: &Transaction<'_>,
        policy: &ConfidencePolicy,
        pattern_key: &str,
        category: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let existing: rusqlite::Result<u32> = tx.query_row(
            "SELECT sample_count FROM preferences WHERE pattern_key = ?1",
            params![pattern_key],
            |row| row.get(0),
        );

        match existing {
            Ok(sample_count) => {
                // Existing rules keep their category; only the evidence grows
                let new_count = sample_count + 1;
                tx.execute(
                    r#"UPDATE preferences
                       SET confidence = ?1, sample_count = ?2, last_updated = ?3
                       WHERE pattern_key = ?4"#,
                    params![policy.confidence(new_count), new_count, now.to_rfc3339(), pattern_key],
                )?;
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                tx.execute(
                    r#"INSERT INTO preferences
                       (pattern_key, category, confidence, sample_count, last_updated)
                       VALUES (?1, ?2, ?3, 1, ?4)"#,
                    params![pattern_key, category, policy.confidence(1), now.to_rfc3339()],
                )?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    /// Best rule matching any of the given keys: highest confidence, then
    /// highest sample count, then most recently updated
    pub fn query(&self, pattern_keys: &[String]) -> Result<Option<PreferenceRule>> {
        if pattern_keys.is_empty() {
            return Ok(None);
        }

        let placeholders = vec!["?"; pattern_keys.len()].join(", ");
        let sql = format!(
            r#"SELECT pattern_key, category, confidence, sample_count, last_updated
               FROM preferences WHERE pattern_key IN ({})
               ORDER BY confidence DESC, sample_count DESC, last_updated DESC
               LIMIT 1"#,
            placeholders
        );

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row(params_from_iter(pattern_keys.iter()), Self::row_to_rule);

        match result {
            Ok(rule) => Ok(Some(rule)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a single rule by key
    pub fn get_rule(&self, pattern_key: &str) -> Result<Option<PreferenceRule>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            r#"SELECT pattern_key, category, confidence, sample_count, last_updated
               FROM preferences WHERE pattern_key = ?1"#,
            params![pattern_key],
            Self::row_to_rule,
        );

        match result {
            Ok(rule) => Ok(Some(rule)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<PreferenceRule> {
        let updated: String = row.get(4)?;
        Ok(PreferenceRule {
            pattern_key: row.get(0)?,
            category: row.get(1)?,
            confidence: row.get(2)?,
            sample_count: row.get(3)?,
            last_updated: DateTime::parse_from_rfc3339(&updated)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    /// Export all rules, most confident first
    pub fn export(&self) -> Result<Vec<PreferenceRule>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT pattern_key, category, confidence, sample_count, last_updated
               FROM preferences ORDER BY confidence DESC, sample_count DESC"#,
        )?;
        let rules = stmt
            .query_map([], Self::row_to_rule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    /// Import rules, replacing any with the same key
    pub fn import(&self, rules: &[PreferenceRule]) -> Result<usize> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        for rule in rules {
            tx.execute(
                r#"INSERT OR REPLACE INTO preferences
                   (pattern_key, category, confidence, sample_count, last_updated)
                   VALUES (?1, ?2, ?3, ?4, ?5)"#,
                params![
                    rule.pattern_key,
                    rule.category,
                    rule.confidence,
                    rule.sample_count,
                    rule.last_updated.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        info!("Imported {} preference rules", rules.len());
        Ok(rules.len())
    }

    /// Clear all learned rules and movement events
    pub fn reset(&self) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM preferences", [])?;
        tx.execute("DELETE FROM movements", [])?;
        tx.commit()?;
        info!("Cleared all preference data");
        Ok(())
    }

    /// Learning statistics
    pub fn stats(&self) -> Result<LearningStats> {
        let conn = self.lock_conn()?;
        let movements: i64 =
            conn.query_row("SELECT COUNT(*) FROM movements", [], |row| row.get(0))?;
        let corrections: i64 = conn.query_row(
            "SELECT COUNT(*) FROM movements WHERE is_correction = 1",
            [],
            |row| row.get(0),
        )?;
        let preferences: i64 =
            conn.query_row("SELECT COUNT(*) FROM preferences", [], |row| row.get(0))?;
        let high_confidence: i64 = conn.query_row(
            "SELECT COUNT(*) FROM preferences WHERE confidence >= 0.7",
            [],
            |row| row.get(0),
        )?;

        Ok(LearningStats {
            movements,
            corrections,
            preferences,
            high_confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PreferenceStore {
        PreferenceStore::in_memory(ConfidencePolicy::default()).unwrap()
    }

    fn anime_features() -> ContentFeatures {
        ContentFeatures {
            style: "anime".to_string(),
            style_confidence: 0.9,
            detected_entities: 1,
        }
    }

    #[test]
    fn upsert_creates_then_increments() {
        let store = store();
        store.upsert("style:anime", "Anime").unwrap();

        let rule = store.get_rule("style:anime").unwrap().unwrap();
        assert_eq!(rule.category, "Anime");
        assert_eq!(rule.sample_count, 1);
        assert_eq!(rule.confidence, 0.3);

        store.upsert("style:anime", "Anime").unwrap();
        let rule = store.get_rule("style:anime").unwrap().unwrap();
        assert_eq!(rule.sample_count, 2);
    }

    #[test]
    fn upsert_keeps_category_fixed() {
        let store = store();
        store.upsert("style:anime", "Anime").unwrap();
        store.upsert("style:anime", "Other").unwrap();

        let rule = store.get_rule("style:anime").unwrap().unwrap();
        assert_eq!(rule.category, "Anime");
        assert_eq!(rule.sample_count, 2);
    }

    #[test]
    fn confidence_tracks_sample_count() {
        let store = store();
        for _ in 0..60 {
            store.upsert("tags:present", "Anime/Characters").unwrap();
        }

        let rule = store.get_rule("tags:present").unwrap().unwrap();
        assert_eq!(rule.sample_count, 60);
        assert_eq!(rule.confidence, 0.7);
    }

    #[test]
    fn query_prefers_confidence_then_samples() {
        let store = store();
        for _ in 0..60 {
            store.upsert("style:anime", "Anime").unwrap();
        }
        for _ in 0..12 {
            store.upsert("tags:present", "Tagged").unwrap();
        }

        let keys = vec!["style:anime".to_string(), "tags:present".to_string()];
        let best = store.query(&keys).unwrap().unwrap();
        assert_eq!(best.pattern_key, "style:anime");
        assert_eq!(best.category, "Anime");
    }

    #[test]
    fn query_with_no_keys_or_no_rules_is_none() {
        let store = store();
        assert!(store.query(&[]).unwrap().is_none());
        assert!(store.query(&["style:anime".to_string()]).unwrap().is_none());
    }

    #[test]
    fn corrections_learn_agreements_do_not() {
        let store = store();
        let features = anime_features();
        let tags = vec!["1girl".to_string()];

        // Agreement: nothing learned
        store
            .record_movement("fp1", "a.jpg", "Anime", "Anime", Some(&features), &tags)
            .unwrap();
        assert_eq!(store.stats().unwrap().preferences, 0);

        // Correction: every derived key learns the actual category
        store
            .record_movement("fp2", "b.jpg", "Uncategorized", "Anime", Some(&features), &tags)
            .unwrap();
        let rule = store.get_rule("style:anime+persons:yes").unwrap().unwrap();
        assert_eq!(rule.category, "Anime");

        let stats = store.stats().unwrap();
        assert_eq!(stats.movements, 2);
        assert_eq!(stats.corrections, 1);
        assert!(stats.preferences >= 4);
    }

    #[test]
    fn hundred_corrections_scenario() {
        let store = store();
        let features = anime_features();

        for i in 0..100 {
            store
                .record_movement(
                    &format!("fp{}", i),
                    "img.png",
                    "Uncategorized",
                    "Anime/Characters",
                    Some(&features),
                    &[],
                )
                .unwrap();
        }

        let exported = store.export().unwrap();
        let rule = exported
            .iter()
            .find(|r| r.pattern_key == "style:anime+persons:yes")
            .expect("rule for style:anime+persons:yes");
        assert_eq!(rule.category, "Anime/Characters");
        assert_eq!(rule.sample_count, 100);
        assert!(rule.confidence >= 0.7 && rule.confidence <= 0.9);
    }

    #[test]
    fn export_import_round_trip() {
        let store = store();
        for _ in 0..15 {
            store.upsert("style:anime", "Anime").unwrap();
        }
        store.upsert("tags:present", "Tagged").unwrap();

        let exported = store.export().unwrap();
        assert_eq!(exported.len(), 2);

        let other = PreferenceStore::in_memory(ConfidencePolicy::default()).unwrap();
        other.import(&exported).unwrap();

        let rule = other.get_rule("style:anime").unwrap().unwrap();
        assert_eq!(rule.category, "Anime");
        assert_eq!(rule.sample_count, 15);
        assert_eq!(rule.confidence, 0.5);
    }

    #[test]
    fn reset_clears_rules_and_events() {
        let store = store();
        store.upsert("style:anime", "Anime").unwrap();
        store
            .record_movement("fp", "a.jpg", "X", "Y", None, &[])
            .unwrap();

        store.reset().unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.preferences, 0);
        assert_eq!(stats.movements, 0);
        assert!(store.get_rule("style:anime").unwrap().is_none());
    }
}
