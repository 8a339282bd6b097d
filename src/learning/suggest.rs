// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Category suggestions from learned preferences

use tracing::debug;

use super::patterns::pattern_keys;
use super::store::PreferenceStore;
use crate::analysis::ContentFeatures;
use crate::Result;

/// A category suggestion with its supporting evidence
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub category: String,
    pub confidence: f64,
    /// Pattern key that produced the suggestion, if any
    pub reason: Option<String>,
}

/// Suggests categories by matching pattern keys against learned rules.
/// Whether a learned suggestion beats a model-derived one is the caller's
/// policy, typically a minimum-confidence threshold.
#[derive(Clone)]
pub struct CategorySuggester {
    store: PreferenceStore,
}

impl CategorySuggester {
    pub fn new(store: PreferenceStore) -> Self {
        Self { store }
    }

    /// Suggest a category for a feature snapshot and tag list.
    ///
    /// No derivable patterns, or no matching rule, falls back to
    /// `(default_category, 0.0)`.
    pub fn suggest(
        &self,
        features: Option<&ContentFeatures>,
        tags: &[String],
        default_category: &str,
    ) -> Result<Suggestion> {
        let keys = pattern_keys(features, tags);
        if keys.is_empty() {
            return Ok(Suggestion {
                category: default_category.to_string(),
                confidence: 0.0,
                reason: None,
            });
        }

        match self.store.query(&keys)? {
            Some(rule) => {
                debug!(
                    "Learned suggestion {} ({:.2}) via {}",
                    rule.category, rule.confidence, rule.pattern_key
                );
                Ok(Suggestion {
                    category: rule.category,
                    confidence: rule.confidence,
                    reason: Some(rule.pattern_key),
                })
            }
            None => Ok(Suggestion {
                category: default_category.to_string(),
                confidence: 0.0,
                reason: None,
            }),
        }
    }
}
