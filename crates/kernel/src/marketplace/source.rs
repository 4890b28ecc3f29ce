//! External catalog sources.
//!
//! The marketplace keeps its catalog in memory and refreshes it from a
//! [`CatalogSource`]. The shipped source reads a JSON file; other transports
//! implement the trait.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::catalog::{DownloadStats, MarketplacePlugin};
use crate::plugin::PluginManifest;

/// One listing as delivered by a catalog source.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub manifest: PluginManifest,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub stats: Option<DownloadStats>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub verified: bool,
}

impl CatalogEntry {
    pub(crate) fn into_plugin(self) -> MarketplacePlugin {
        let mut plugin = MarketplacePlugin::new(self.manifest, self.category, self.tags);
        plugin.stats = self.stats.unwrap_or_default();
        plugin.featured = self.featured;
        plugin.verified = self.verified;
        plugin
    }
}

/// Supplier of marketplace listings.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<CatalogEntry>>;
}

/// Catalog stored as a JSON array of entries on disk.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for JsonFileSource {
    async fn fetch(&self) -> Result<Vec<CatalogEntry>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read catalog: {}", self.path.display()))?;

        let entries: Vec<CatalogEntry> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse catalog JSON at {}", self.path.display()))?;

        debug!(path = %self.path.display(), count = entries.len(), "read catalog");
        Ok(entries)
    }
}

/// Fixed in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    entries: Vec<CatalogEntry>,
}

impl StaticSource {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl CatalogSource for StaticSource {
    async fn fetch(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.entries.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"[
        {
            "id": "heatmap",
            "name": "Heatmap",
            "version": "1.2.0",
            "description": "Click heatmaps",
            "category": "analytics",
            "tags": ["charts"],
            "stats": {"downloads": 10, "activeInstalls": 2, "weeklyDownloads": 1, "monthlyDownloads": 4},
            "verified": true
        },
        {
            "id": "dark-mode",
            "name": "Dark mode",
            "version": "0.3.1",
            "category": "ui"
        }
    ]"#;

    #[tokio::test]
    async fn reads_json_catalog() {
        let path = std::env::temp_dir().join(format!("hookwork-catalog-{}.json", std::process::id()));
        tokio::fs::write(&path, CATALOG).await.unwrap();

        let entries = JsonFileSource::new(&path).fetch().await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        assert_eq!(entries.len(), 2);
        let heatmap = entries.into_iter().next().unwrap().into_plugin();
        assert_eq!(heatmap.manifest.version, "1.2.0");
        assert_eq!(heatmap.stats.downloads, 10);
        assert!(heatmap.verified);
        assert!(!heatmap.featured);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = JsonFileSource::new("/nonexistent/catalog.json")
            .fetch()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to read catalog"));
    }
}
