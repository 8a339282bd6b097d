// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Taxis

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::learning::ConfidencePolicy;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Directory layout
    #[serde(default)]
    pub directories: DirectoryConfig,

    /// Reverse image search service
    pub lookup: LookupConfig,

    /// Content classification service
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Search result cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Preference learning
    #[serde(default)]
    pub learning: LearningConfig,

    /// Batch workflow settings
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DirectoryConfig {
    /// Incoming images to process
    #[serde(default = "default_inbox")]
    pub inbox: String,

    /// Destination root for sorted files; None leaves files in place
    #[serde(default)]
    pub sorted: Option<String>,

    /// Database directory (preferences + cache)
    #[serde(default = "default_data_dir")]
    pub data: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LookupConfig {
    pub url: String,

    /// Minimum similarity (0-100) for a match to count
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,

    /// Maximum requests per sliding window
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,

    /// Sliding window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Maximum general tags taken from a match
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_classifier_url")]
    pub url: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Time to live for cached lookup results, in hours
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LearningConfig {
    /// Learned suggestions below this confidence are not acted on
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Category used when nothing better is known
    #[serde(default = "default_category")]
    pub default_category: String,

    /// Confidence curve; defaults reproduce the established behavior
    #[serde(default)]
    pub confidence: ConfidencePolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkflowConfig {
    /// Skip items that already carry a completion sidecar
    #[serde(default = "default_true")]
    pub skip_existing: bool,

    /// Move files into per-category directories after sinking
    #[serde(default)]
    pub move_files: bool,

    /// Image extensions eligible for processing
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

// Default value functions
fn default_inbox() -> String { "./inbox".to_string() }
fn default_data_dir() -> String { "./data".to_string() }
fn default_min_similarity() -> f64 { 70.0 }
fn default_rate_limit() -> usize { 6 }
fn default_window_secs() -> u64 { 30 }
fn default_timeout() -> u64 { 30 }
fn default_retries() -> u32 { 3 }
fn default_max_tags() -> usize { 10 }
fn default_true() -> bool { true }
fn default_classifier_url() -> String { "http://localhost:8750/classify".to_string() }
fn default_ttl_hours() -> u64 { 48 }
fn default_min_confidence() -> f64 { 0.7 }
fn default_category() -> String { "Uncategorized".to_string() }

fn default_extensions() -> Vec<String> {
    vec!["jpg", "jpeg", "png", "webp", "gif", "bmp"]
        .into_iter().map(String::from).collect()
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            inbox: default_inbox(),
            sorted: None,
            data: default_data_dir(),
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            url: "https://iqdb.org".to_string(),
            min_similarity: default_min_similarity(),
            rate_limit: default_rate_limit(),
            window_secs: default_window_secs(),
            timeout_secs: default_timeout(),
            retries: default_retries(),
            max_tags: default_max_tags(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_classifier_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_hours: default_ttl_hours() }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            default_category: default_category(),
            confidence: ConfidencePolicy::default(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            skip_existing: true,
            move_files: false,
            extensions: default_extensions(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            directories: DirectoryConfig::default(),
            lookup: LookupConfig::default(),
            classifier: ClassifierConfig::default(),
            cache: CacheConfig::default(),
            learning: LearningConfig::default(),
            workflow: WorkflowConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::TaxisError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check whether a path has an eligible image extension
    pub fn is_supported_image(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.workflow.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.lookup.rate_limit, 6);
        assert_eq!(parsed.lookup.window_secs, 30);
        assert_eq!(parsed.cache.ttl_hours, 48);
        assert_eq!(parsed.learning.default_category, "Uncategorized");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let json = r#"{"lookup": {"url": "http://localhost:9000"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.lookup.url, "http://localhost:9000");
        assert_eq!(config.lookup.min_similarity, 70.0);
        assert!(config.workflow.skip_existing);
    }

    #[test]
    fn supported_image_extensions() {
        let config = AppConfig::default();
        assert!(config.is_supported_image(Path::new("a/b/photo.JPG")));
        assert!(config.is_supported_image(Path::new("x.png")));
        assert!(!config.is_supported_image(Path::new("notes.txt")));
        assert!(!config.is_supported_image(Path::new("no_extension")));
    }
}
