// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Reverse image search boundary: lookup trait, HTTP client, tag cleanup

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::analysis::prepare_image;
use crate::limiter::RateLimiter;
use crate::{Result, TaxisError};

/// Meta tags that never describe image content
const FILTER_TAGS: &[&str] = &[
    "translation_request", "commentary", "commentary_request",
    "bad_id", "bad_link", "md5_mismatch", "tagme",
    "artist_request", "character_request", "source_request",
];

/// Content rating tags, filtered out of general tags
const RATING_TAGS: &[&str] = &["safe", "questionable", "explicit", "sensitive"];

/// Outcome of a reverse lookup. Serialized to JSON for the cache, so
/// no-match outcomes are remembered too.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LookupOutcome {
    Match(LookupMatch),
    NoMatch,
}

/// A successful reverse-search match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupMatch {
    /// Similarity percentage (0-100)
    pub similarity: f64,
    pub source_url: Option<String>,
    pub tags: Vec<String>,
}

/// Trait for reverse image search services
#[async_trait]
pub trait ReverseLookup: Send + Sync {
    /// Name of this lookup service
    fn name(&self) -> &'static str;

    /// Search for an image and return the best match
    async fn search(&self, path: &Path) -> Result<LookupOutcome>;
}

/// HTTP reverse-search client
pub struct HttpLookupClient {
    client: Client,
    base_url: String,
    min_similarity: f64,
    max_tags: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    matches: Vec<RemoteMatch>,
}

#[derive(Deserialize)]
struct RemoteMatch {
    similarity: f64,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

impl HttpLookupClient {
    pub fn new(base_url: &str, min_similarity: f64, max_tags: usize, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TaxisError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            min_similarity,
            max_tags,
        })
    }
}

#[async_trait]
impl ReverseLookup for HttpLookupClient {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn search(&self, path: &Path) -> Result<LookupOutcome> {
        let image_data = prepare_image(path)?;

        debug!("Sending reverse search for {:?}", path);

        let part = reqwest::multipart::Part::bytes(image_data)
            .file_name("image.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| TaxisError::Validation(format!("Bad multipart payload: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = format!("{}/search", self.base_url);
        let response = self.client.post(&url).multipart(form).send().await?;

        if !response.status().is_success() {
            return Err(TaxisError::Lookup(format!(
                "Search service returned status {}",
                response.status()
            )));
        }

        let parsed: SearchResponse = response.json().await?;

        let best = parsed
            .matches
            .into_iter()
            .filter(|m| m.similarity >= self.min_similarity)
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity));

        match best {
            Some(m) => {
                let mut tags = normalize_tags(&m.tags);
                tags.truncate(self.max_tags);
                info!("Match at {:.1}% with {} tags", m.similarity, tags.len());
                Ok(LookupOutcome::Match(LookupMatch {
                    similarity: m.similarity,
                    source_url: m.url,
                    tags,
                }))
            }
            None => Ok(LookupOutcome::NoMatch),
        }
    }
}

/// Rate-limited lookup with bounded retry and exponential backoff.
/// Transient failures are retried; anything else propagates at once.
pub async fn search_with_retry(
    lookup: &dyn ReverseLookup,
    limiter: &RateLimiter,
    path: &Path,
    retries: u32,
) -> Result<LookupOutcome> {
    let mut last_error = None;

    for attempt in 0..=retries {
        if attempt > 0 {
            let delay = Duration::from_secs(2u64.pow(attempt - 1));
            warn!("Retrying lookup in {:?} (attempt {})", delay, attempt + 1);
            tokio::time::sleep(delay).await;
        }

        limiter.acquire().await;

        match lookup.search(path).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_transient() => {
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| TaxisError::Lookup("Unknown error".to_string())))
}

/// Filter out meta/rating/degenerate tags and convert the remainder to
/// readable form: `blue_eyes` -> `Blue Eyes`
pub fn normalize_tags(raw: &[String]) -> Vec<String> {
    raw.iter()
        .filter(|tag| {
            let tag = tag.trim();
            if tag.is_empty() || tag.len() < 3 {
                return false;
            }
            if FILTER_TAGS.contains(&tag) || RATING_TAGS.contains(&tag) {
                return false;
            }
            // Drop tags that are mostly digits (ids, years)
            let digits = tag.chars().filter(|c| c.is_ascii_digit()).count();
            (digits as f64 / tag.len() as f64) <= 0.7
        })
        .map(|tag| titleize(tag))
        .collect()
}

fn titleize(tag: &str) -> String {
    tag.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
