// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Canonical pattern keys derived from classification features and tags

use crate::analysis::ContentFeatures;

/// Style predictions below this confidence carry no pattern signal
const STYLE_CONFIDENCE_FLOOR: f64 = 0.7;

/// Tags that strongly indicate a recognizable character
const CHARACTER_INDICATOR_TERMS: &[&str] = &["1girl", "1boy", "solo", "2girls", "multiple_girls"];

/// Derive the pattern keys for a feature snapshot and tag list.
///
/// Pure and deterministic: the same inputs always produce the same keys,
/// sorted and deduplicated, independent of tag ordering. No features
/// means no keys; suggestion then falls back to the default category.
pub fn pattern_keys(features: Option<&ContentFeatures>, tags: &[String]) -> Vec<String> {
    let Some(features) = features else {
        return Vec::new();
    };

    let mut keys = Vec::new();

    if features.style_confidence > STYLE_CONFIDENCE_FLOOR {
        keys.push(format!("style:{}", features.style));
        if features.detected_entities > 0 {
            keys.push(format!("style:{}+persons:yes", features.style));
        } else {
            keys.push(format!("style:{}+persons:no", features.style));
        }
    }

    if !tags.is_empty() {
        keys.push("tags:present".to_string());

        let has_character = tags.iter().any(|tag| {
            CHARACTER_INDICATOR_TERMS.iter().any(|term| tag.eq_ignore_ascii_case(term))
        });
        if has_character {
            keys.push("tags:anime_character".to_string());
        }
    }

    keys.sort();
    keys.dedup();
    keys
}
