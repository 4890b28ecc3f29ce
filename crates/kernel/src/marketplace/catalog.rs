//! Catalog entries and search.

use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plugin::PluginManifest;

/// Aggregated star rating.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    /// Mean of all review ratings, 0.0 with no reviews.
    pub average: f64,
    pub count: u64,
    /// Review count per star, index 0 = one star.
    pub distribution: [u64; 5],
}

/// Download and install counters.
///
/// Weekly and monthly counters only grow here; an external process resets
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStats {
    pub downloads: u64,
    pub active_installs: u64,
    pub weekly_downloads: u64,
    pub monthly_downloads: u64,
}

/// A plugin listed in the marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplacePlugin {
    pub manifest: PluginManifest,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub rating: Rating,
    #[serde(default)]
    pub stats: DownloadStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub verified: bool,
}

impl MarketplacePlugin {
    /// New unverified entry with zeroed stats.
    pub fn new(manifest: PluginManifest, category: impl Into<String>, tags: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            manifest,
            category: category.into(),
            tags,
            rating: Rating::default(),
            stats: DownloadStats::default(),
            created_at: now,
            updated_at: now,
            featured: false,
            verified: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    fn matches_text(&self, needle: &str) -> bool {
        let m = &self.manifest;
        m.name.to_lowercase().contains(needle)
            || m.description.to_lowercase().contains(needle)
            || m.keywords.iter().any(|k| k.to_lowercase().contains(needle))
    }
}

/// Sort order for search results. All orders are descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    Downloads,
    Rating,
    Updated,
}

/// Marketplace search parameters. Empty fields do not filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub query: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub sort_by: Option<SortBy>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = Some(sort_by);
        self
    }
}

/// Apply `query` to the catalog: category, then tags, then text, then sort.
///
/// Unsorted results come back in id order so output is deterministic.
pub(crate) fn search(
    catalog: &HashMap<String, MarketplacePlugin>,
    query: &SearchQuery,
) -> Vec<MarketplacePlugin> {
    let needle = query
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_lowercase);

    let mut results: Vec<MarketplacePlugin> = catalog
        .values()
        .filter(|p| query.category.as_ref().is_none_or(|c| &p.category == c))
        .filter(|p| query.tags.iter().all(|t| p.tags.contains(t)))
        .filter(|p| needle.as_deref().is_none_or(|n| p.matches_text(n)))
        .cloned()
        .collect();

    results.sort_by(|a, b| a.id().cmp(b.id()));

    match query.sort_by {
        Some(SortBy::Downloads) => results.sort_by_key(|p| Reverse(p.stats.downloads)),
        Some(SortBy::Rating) => {
            results.sort_by(|a, b| b.rating.average.total_cmp(&a.rating.average));
        }
        Some(SortBy::Updated) => results.sort_by_key(|p| Reverse(p.updated_at)),
        None => {}
    }

    results
}
