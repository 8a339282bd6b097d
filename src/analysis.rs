// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Content classification boundary: feature snapshots and the classifier client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::{Result, TaxisError};

/// Classification features for one image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFeatures {
    /// Detected style label (e.g. "anime", "photo")
    pub style: String,
    /// Style confidence (0.0 - 1.0)
    pub style_confidence: f64,
    /// Number of detected persons
    pub detected_entities: u32,
}

/// Trait for content classifiers. The models themselves live elsewhere;
/// only their output shape matters here.
#[async_trait]
pub trait ContentClassifier: Send + Sync {
    /// Name of this classifier
    fn name(&self) -> &'static str;

    /// Classify an image, returning None when no snapshot can be produced
    async fn classify(&self, path: &Path) -> Result<Option<ContentFeatures>>;
}

/// HTTP client for a local classification service
pub struct HttpClassifier {
    client: Client,
    url: String,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    style: String,
    style_confidence: f64,
    #[serde(default)]
    persons_detected: u32,
}

impl HttpClassifier {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TaxisError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ContentClassifier for HttpClassifier {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn classify(&self, path: &Path) -> Result<Option<ContentFeatures>> {
        let image_data = prepare_image(path)?;

        debug!("Sending classification request for {:?}", path);

        let part = reqwest::multipart::Part::bytes(image_data)
            .file_name("image.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| TaxisError::Validation(format!("Bad multipart payload: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self.client.post(&self.url).multipart(form).send().await?;

        if !response.status().is_success() {
            return Err(TaxisError::Validation(format!(
                "Classifier returned status {}",
                response.status()
            )));
        }

        let parsed: ClassifyResponse = response.json().await?;
        Ok(Some(ContentFeatures {
            style: parsed.style,
            style_confidence: parsed.style_confidence,
            detected_entities: parsed.persons_detected,
        }))
    }
}

/// Calculate a stable content fingerprint
pub fn content_fingerprint(path: &Path) -> Result<String> {
    let data = std::fs::read(path)?;
    let hash = blake3::hash(&data);
    Ok(hash.to_hex().to_string())
}

/// Downscale large images and re-encode as JPEG for upload
pub fn prepare_image(path: &Path) -> Result<Vec<u8>> {
    let img = image::open(path)?;

    let img = if img.width() > 1024 || img.height() > 1024 {
        img.resize(1024, 1024, image::imageops::FilterType::Triangle)
    } else {
        img
    };

    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    img.write_to(&mut cursor, image::ImageFormat::Jpeg)?;

    Ok(buffer)
}

/// Style-based category inference, used when no learned rule is confident
/// enough to act on
pub fn infer_category(features: Option<&ContentFeatures>, default_category: &str) -> String {
    let Some(features) = features else {
        return default_category.to_string();
    };

    if features.style_confidence < 0.5 {
        return default_category.to_string();
    }

    let style = features.style.to_lowercase();
    if style.contains("anime") || style.contains("illustration") {
        if features.detected_entities > 0 {
            "Anime/Characters".to_string()
        } else {
            "Anime".to_string()
        }
    } else if style.contains("photo") || style.contains("realistic") {
        "Photos".to_string()
    } else if style.contains("3d") || style.contains("render") {
        "Renders".to_string()
    } else {
        default_category.to_string()
    }
}
