// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Sink stage: tag sidecars and category-directory sorting

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{Result, TaxisError};

/// Sidecar file contents. The field encoding is deliberately plain JSON;
/// richer metadata formats live behind their own tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarRecord {
    pub category: String,
    pub tags: Vec<String>,
    pub written_at: DateTime<Utc>,
}

/// Trait for the sink stage. Returns the category the item actually
/// ended up in; an interactive implementation may override the proposal,
/// which is where corrections come from.
#[async_trait]
pub trait CategorySink: Send + Sync {
    /// Whether the item already carries a completion marker
    fn is_complete(&self, path: &Path) -> bool;

    /// Sink one item: persist the marker, optionally relocate the file.
    /// Returns the actual category.
    async fn sink(&self, path: &Path, category: &str, tags: &[String]) -> Result<String>;
}

/// Default sink: writes a JSON sidecar next to the image and, when a
/// sorted root is configured, moves both into a per-category directory.
pub struct SidecarSink {
    sorted_root: Option<PathBuf>,
}

impl SidecarSink {
    pub fn new(sorted_root: Option<PathBuf>) -> Self {
        Self { sorted_root }
    }

    /// Sidecar path for an image: `photo.jpg` -> `photo.jpg.tags.json`
    pub fn sidecar_path(path: &Path) -> PathBuf {
        PathBuf::from(format!("{}.tags.json", path.display()))
    }

    fn destination(&self, path: &Path, category: &str) -> Result<Option<PathBuf>> {
        let Some(root) = &self.sorted_root else {
            return Ok(None);
        };

        let file_name = path
            .file_name()
            .ok_or_else(|| TaxisError::Validation(format!("No file name in {:?}", path)))?;

        let dir = root.join(category);
        std::fs::create_dir_all(&dir)?;

        let mut dest = dir.join(file_name);
        if dest.exists() {
            // Collision: disambiguate with a time suffix
            let stamp = Local::now().format("%H%M%S");
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("jpg");
            dest = dir.join(format!("{}_{}.{}", stem, stamp, ext));
        }

        Ok(Some(dest))
    }
}

#[async_trait]
impl CategorySink for SidecarSink {
    fn is_complete(&self, path: &Path) -> bool {
        Self::sidecar_path(path).exists()
    }

    async fn sink(&self, path: &Path, category: &str, tags: &[String]) -> Result<String> {
        let final_path = match self.destination(path, category)? {
            Some(dest) => {
                std::fs::rename(path, &dest)?;
                info!("Moved {:?} -> {:?}", path, dest);
                dest
            }
            None => path.to_path_buf(),
        };

        let record = SidecarRecord {
            category: category.to_string(),
            tags: tags.to_vec(),
            written_at: Utc::now(),
        };
        let sidecar = Self::sidecar_path(&final_path);
        std::fs::write(&sidecar, serde_json::to_string_pretty(&record)?)?;
        debug!("Wrote sidecar {:?}", sidecar);

        // Marker next to the original location keeps re-runs idempotent
        // even when the file itself was moved away
        if final_path.as_path() != path {
            let origin_marker = Self::sidecar_path(path);
            std::fs::write(&origin_marker, serde_json::to_string_pretty(&record)?)?;
        }

        Ok(category.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn in_place_sink_writes_marker() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("photo.jpg");
        std::fs::write(&image, b"fake image").unwrap();

        let sink = SidecarSink::new(None);
        assert!(!sink.is_complete(&image));

        let actual = sink
            .sink(&image, "Anime", &["Blue Eyes".to_string()])
            .await
            .unwrap();
        assert_eq!(actual, "Anime");
        assert!(sink.is_complete(&image));

        let record: SidecarRecord = serde_json::from_str(
            &std::fs::read_to_string(SidecarSink::sidecar_path(&image)).unwrap(),
        )
        .unwrap();
        assert_eq!(record.category, "Anime");
        assert_eq!(record.tags, vec!["Blue Eyes"]);
    }

    #[tokio::test]
    async fn sorting_sink_moves_into_category_dir() {
        let dir = tempdir().unwrap();
        let sorted = dir.path().join("sorted");
        let image = dir.path().join("photo.jpg");
        std::fs::write(&image, b"fake image").unwrap();

        let sink = SidecarSink::new(Some(sorted.clone()));
        sink.sink(&image, "Anime/Characters", &[]).await.unwrap();

        let moved = sorted.join("Anime/Characters/photo.jpg");
        assert!(moved.exists());
        assert!(!image.exists());
        assert!(SidecarSink::sidecar_path(&moved).exists());

        // Origin marker still blocks re-processing of the same path
        assert!(sink.is_complete(&image));
    }
}
