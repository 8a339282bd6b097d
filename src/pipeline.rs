// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch orchestrator driving each image through the staged workflow

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::analysis::{content_fingerprint, infer_category, ContentClassifier};
use crate::cache::SearchCache;
use crate::config::AppConfig;
use crate::learning::{CategorySuggester, PreferenceStore};
use crate::limiter::RateLimiter;
use crate::review::TagReviewer;
use crate::search::{search_with_retry, LookupOutcome, ReverseLookup};
use crate::sidecar::CategorySink;
use crate::{Result, TaxisError};

/// Workflow stage an item is in, used for failure reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fingerprint,
    CacheCheck,
    Lookup,
    Classify,
    Review,
    Suggest,
    Sink,
    Record,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fingerprint => "fingerprint",
            Stage::CacheCheck => "cache_check",
            Stage::Lookup => "lookup",
            Stage::Classify => "classify",
            Stage::Review => "review",
            Stage::Suggest => "suggest",
            Stage::Sink => "sink",
            Stage::Record => "record",
        };
        write!(f, "{}", name)
    }
}

/// One failed item in the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureNote {
    pub file: String,
    pub stage: Stage,
    pub reason: String,
}

/// Batch processing summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchManifest {
    pub total: usize,
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub failures: Vec<FailureNote>,
}

enum ItemOutcome {
    Done { category: String },
    Skipped,
}

type StageResult<T> = std::result::Result<T, (Stage, TaxisError)>;

fn at(stage: Stage) -> impl FnOnce(TaxisError) -> (Stage, TaxisError) {
    move |e| (stage, e)
}

/// Staged batch pipeline. Owns the learning store and the caching and
/// throttling layers; the lookup, classifier, reviewer and sink are
/// injected collaborators.
pub struct Pipeline {
    config: AppConfig,
    cache: SearchCache,
    limiter: RateLimiter,
    store: PreferenceStore,
    suggester: CategorySuggester,
    lookup: Box<dyn ReverseLookup>,
    classifier: Option<Box<dyn ContentClassifier>>,
    reviewer: Box<dyn TagReviewer>,
    sink: Box<dyn CategorySink>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        store: PreferenceStore,
        cache: SearchCache,
        lookup: Box<dyn ReverseLookup>,
        classifier: Option<Box<dyn ContentClassifier>>,
        reviewer: Box<dyn TagReviewer>,
        sink: Box<dyn CategorySink>,
    ) -> Self {
        let limiter = RateLimiter::new(
            config.lookup.rate_limit,
            Duration::from_secs(config.lookup.window_secs),
        );
        let suggester = CategorySuggester::new(store.clone());

        Self {
            config,
            cache,
            limiter,
            store,
            suggester,
            lookup,
            classifier,
            reviewer,
            sink,
        }
    }

    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Process a batch of images. Per-item failures are recorded and the
    /// loop moves on; storage failures abort the batch. A raised shutdown
    /// flag stops between items, and the manifest still covers everything
    /// processed so far.
    pub async fn process_batch(
        &self,
        paths: &[PathBuf],
        shutdown: Option<watch::Receiver<bool>>,
    ) -> Result<BatchManifest> {
        let start = std::time::Instant::now();
        let total = paths.len();
        let mut done = 0usize;
        let mut skipped = 0usize;
        let mut failures = Vec::new();

        info!("Processing batch of {} images", total);

        for (idx, path) in paths.iter().enumerate() {
            if let Some(rx) = &shutdown {
                if *rx.borrow() {
                    warn!("Shutdown requested, stopping after {} items", idx);
                    break;
                }
            }

            match self.process_item(path).await {
                Ok(ItemOutcome::Done { category }) => {
                    done += 1;
                    info!("{} -> {}", path.display(), category);
                }
                Ok(ItemOutcome::Skipped) => {
                    skipped += 1;
                    debug!("Skipping {:?} - already processed", path);
                }
                Err((stage, e)) if e.is_fatal() => {
                    error!("Storage failure at {} for {:?}: {}", stage, path, e);
                    return Err(e);
                }
                Err((stage, e)) => {
                    error!("Failed at {} for {:?}: {}", stage, path, e);
                    failures.push(FailureNote {
                        file: path.display().to_string(),
                        stage,
                        reason: e.to_string(),
                    });
                }
            }

            if (idx + 1) % 10 == 0 {
                info!("Progress: {}/{}", idx + 1, total);
            }
        }

        let manifest = BatchManifest {
            total,
            done,
            skipped,
            failed: failures.len(),
            duration_ms: start.elapsed().as_millis() as u64,
            failures,
        };

        info!(
            "Batch complete: {} done, {} skipped, {} failed",
            manifest.done, manifest.skipped, manifest.failed
        );

        Ok(manifest)
    }

    async fn process_item(&self, path: &Path) -> StageResult<ItemOutcome> {
        if self.config.workflow.skip_existing && self.sink.is_complete(path) {
            return Ok(ItemOutcome::Skipped);
        }

        let fingerprint = content_fingerprint(path).map_err(at(Stage::Fingerprint))?;

        let outcome = self.lookup_cached(path, &fingerprint).await?;

        let proposed_tags = match &outcome {
            LookupOutcome::Match(m) => m.tags.clone(),
            LookupOutcome::NoMatch => Vec::new(),
        };

        let features = match &self.classifier {
            Some(classifier) => classifier.classify(path).await.map_err(at(Stage::Classify))?,
            None => None,
        };

        let tags = self
            .reviewer
            .review_tags(path, proposed_tags)
            .await
            .map_err(at(Stage::Review))?;

        let default = &self.config.learning.default_category;
        let suggestion = self
            .suggester
            .suggest(features.as_ref(), &tags, default)
            .map_err(at(Stage::Suggest))?;

        // Learned suggestion wins only when it is confident enough;
        // otherwise fall back to style inference
        let suggested_category = if suggestion.confidence >= self.config.learning.min_confidence {
            suggestion.category
        } else {
            infer_category(features.as_ref(), default)
        };

        let actual_category = self
            .sink
            .sink(path, &suggested_category, &tags)
            .await
            .map_err(at(Stage::Sink))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");
        self.store
            .record_movement(
                &fingerprint,
                file_name,
                &suggested_category,
                &actual_category,
                features.as_ref(),
                &tags,
            )
            .map_err(at(Stage::Record))?;

        Ok(ItemOutcome::Done {
            category: actual_category,
        })
    }

    /// Read-through lookup: the cache is consulted before the limiter is
    /// ever touched, and every outcome is cached, no-match included, so a
    /// fingerprint costs at most one external call per TTL window.
    async fn lookup_cached(&self, path: &Path, fingerprint: &str) -> StageResult<LookupOutcome> {
        if let Some(payload) = self.cache.get(fingerprint).map_err(at(Stage::CacheCheck))? {
            match serde_json::from_str(&payload) {
                Ok(outcome) => return Ok(outcome),
                Err(e) => warn!("Discarding unreadable cache entry for {}: {}", fingerprint, e),
            }
        }

        let outcome = search_with_retry(
            self.lookup.as_ref(),
            &self.limiter,
            path,
            self.config.lookup.retries,
        )
        .await
        .map_err(at(Stage::Lookup))?;

        let payload = serde_json::to_string(&outcome)
            .map_err(|e| (Stage::CacheCheck, TaxisError::Json(e)))?;
        self.cache
            .set(fingerprint, &payload)
            .map_err(at(Stage::CacheCheck))?;

        Ok(outcome)
    }
}

/// Find processable images under a directory, sorted for stable ordering
pub fn find_images(config: &AppConfig, dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*", dir.display());
    let mut paths: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| TaxisError::Config(format!("Bad glob pattern: {}", e)))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file() && config.is_supported_image(p))
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ContentFeatures;
    use crate::learning::ConfidencePolicy;
    use crate::search::LookupMatch;
    use crate::sidecar::SidecarSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct FakeLookup {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl ReverseLookup for FakeLookup {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn search(&self, _path: &Path) -> Result<LookupOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TaxisError::Lookup("service down".to_string()));
            }
            Ok(LookupOutcome::Match(LookupMatch {
                similarity: 93.0,
                source_url: None,
                tags: vec!["1girl".to_string(), "Blue Eyes".to_string()],
            }))
        }
    }

    struct FakeClassifier;

    #[async_trait]
    impl ContentClassifier for FakeClassifier {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn classify(&self, _path: &Path) -> Result<Option<ContentFeatures>> {
            Ok(Some(ContentFeatures {
                style: "anime".to_string(),
                style_confidence: 0.9,
                detected_entities: 1,
            }))
        }
    }

    /// Sink that pretends the user filed everything somewhere else
    struct OverrideSink {
        inner: SidecarSink,
        category: String,
    }

    #[async_trait]
    impl CategorySink for OverrideSink {
        fn is_complete(&self, path: &Path) -> bool {
            self.inner.is_complete(path)
        }

        async fn sink(&self, path: &Path, _category: &str, tags: &[String]) -> Result<String> {
            self.inner.sink(path, &self.category, tags).await
        }
    }

    fn test_pipeline(
        lookup_calls: Arc<AtomicU32>,
        fail_lookup: bool,
        sink: Box<dyn CategorySink>,
    ) -> Pipeline {
        let mut config = AppConfig::default();
        config.lookup.retries = 0;
        config.lookup.rate_limit = 100;

        let store = PreferenceStore::in_memory(ConfidencePolicy::default()).unwrap();
        let cache = SearchCache::in_memory(48).unwrap();

        Pipeline::new(
            config,
            store,
            cache,
            Box::new(FakeLookup {
                calls: lookup_calls,
                fail: fail_lookup,
            }),
            Some(Box::new(FakeClassifier)),
            Box::new(crate::review::AutoApprove),
            sink,
        )
    }

    fn write_images(dir: &Path, names: &[(&str, &[u8])]) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for (name, content) in names {
            let path = dir.join(name);
            std::fs::write(&path, content).unwrap();
            paths.push(path);
        }
        paths
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_processes_and_records() {
        let dir = tempdir().unwrap();
        let paths = write_images(dir.path(), &[("a.jpg", b"img-a")]);

        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = test_pipeline(calls.clone(), false, Box::new(SidecarSink::new(None)));

        let manifest = pipeline.process_batch(&paths, None).await.unwrap();
        assert_eq!(manifest.done, 1);
        assert_eq!(manifest.skipped, 0);
        assert_eq!(manifest.failed, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = pipeline.store().stats().unwrap();
        assert_eq!(stats.movements, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_skips_completed_items() {
        let dir = tempdir().unwrap();
        let paths = write_images(dir.path(), &[("a.jpg", b"img-a"), ("b.jpg", b"img-b")]);

        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = test_pipeline(calls.clone(), false, Box::new(SidecarSink::new(None)));

        let first = pipeline.process_batch(&paths, None).await.unwrap();
        assert_eq!(first.done, 2);

        let second = pipeline.process_batch(&paths, None).await.unwrap();
        assert_eq!(second.done, 0);
        assert_eq!(second.skipped, 2);
        // No further lookups on the second run
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_content_costs_one_lookup() {
        let dir = tempdir().unwrap();
        // Same bytes, different names: same fingerprint
        let paths = write_images(dir.path(), &[("a.jpg", b"same"), ("b.jpg", b"same")]);

        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = test_pipeline(calls.clone(), false, Box::new(SidecarSink::new(None)));

        let manifest = pipeline.process_batch(&paths, None).await.unwrap();
        assert_eq!(manifest.done, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn item_failures_do_not_abort_the_batch() {
        let dir = tempdir().unwrap();
        let paths = write_images(dir.path(), &[("a.jpg", b"img-a"), ("b.jpg", b"img-b")]);

        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = test_pipeline(calls.clone(), true, Box::new(SidecarSink::new(None)));

        let manifest = pipeline.process_batch(&paths, None).await.unwrap();
        assert_eq!(manifest.done, 0);
        assert_eq!(manifest.failed, 2);
        assert_eq!(manifest.failures.len(), 2);
        assert_eq!(manifest.failures[0].stage, Stage::Lookup);
    }

    #[tokio::test(start_paused = true)]
    async fn overridden_sink_category_is_learned_as_correction() {
        let dir = tempdir().unwrap();
        let paths = write_images(dir.path(), &[("a.jpg", b"img-a")]);

        let calls = Arc::new(AtomicU32::new(0));
        let sink = OverrideSink {
            inner: SidecarSink::new(None),
            category: "Favorites".to_string(),
        };
        let pipeline = test_pipeline(calls.clone(), false, Box::new(sink));

        pipeline.process_batch(&paths, None).await.unwrap();

        let stats = pipeline.store().stats().unwrap();
        assert_eq!(stats.corrections, 1);
        let rule = pipeline
            .store()
            .get_rule("style:anime+persons:yes")
            .unwrap()
            .unwrap();
        assert_eq!(rule.category, "Favorites");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flag_stops_between_items() {
        let dir = tempdir().unwrap();
        let paths = write_images(dir.path(), &[("a.jpg", b"img-a"), ("b.jpg", b"img-b")]);

        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = test_pipeline(calls.clone(), false, Box::new(SidecarSink::new(None)));

        let (tx, rx) = watch::channel(true);
        drop(tx);
        let manifest = pipeline.process_batch(&paths, Some(rx)).await.unwrap();
        assert_eq!(manifest.total, 2);
        assert_eq!(manifest.done, 0);
        assert_eq!(manifest.failed, 0);
    }

    #[test]
    fn find_images_filters_by_extension() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("b.PNG"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let config = AppConfig::default();
        let found = find_images(&config, dir.path()).unwrap();
        assert_eq!(found.len(), 2);
    }
}
