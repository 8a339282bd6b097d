// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Tag review boundary

use async_trait::async_trait;
use std::path::Path;

use crate::Result;

/// Trait for tag review. An interactive implementation can prompt the
/// user; the pipeline only sees a request/response exchange at a fixed
/// stage.
#[async_trait]
pub trait TagReviewer: Send + Sync {
    /// Review proposed tags for an item, returning the approved set
    async fn review_tags(&self, path: &Path, proposed: Vec<String>) -> Result<Vec<String>>;
}

/// Reviewer that approves every proposed tag unchanged
pub struct AutoApprove;

#[async_trait]
impl TagReviewer for AutoApprove {
    async fn review_tags(&self, _path: &Path, proposed: Vec<String>) -> Result<Vec<String>> {
        Ok(proposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_approve_passes_tags_through() {
        let reviewer = AutoApprove;
        let tags = vec!["Blue Eyes".to_string(), "1girl".to_string()];
        let approved =
            tokio_test::block_on(reviewer.review_tags(Path::new("a.jpg"), tags.clone())).unwrap();
        assert_eq!(approved, tags);
    }
}
