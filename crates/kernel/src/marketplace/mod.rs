//! Plugin marketplace.
//!
//! An in-memory catalog of installable plugins with search, reviews,
//! publishing and download statistics. The catalog is logically separate
//! from the locally registered plugin set: the registry reads manifests from
//! here and reports downloads and installs back.

mod catalog;
mod reviews;
mod source;

pub use catalog::{DownloadStats, MarketplacePlugin, Rating, SearchQuery, SortBy};
pub use reviews::{NewReview, Review};
pub use source::{CatalogEntry, CatalogSource, JsonFileSource, StaticSource};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::plugin::{PluginError, PluginManifest, PluginResult};

/// The marketplace catalog.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Default)]
pub struct Marketplace {
    catalog: RwLock<HashMap<String, MarketplacePlugin>>,
    reviews: RwLock<HashMap<String, Vec<Review>>>,
    source: Option<Arc<dyn CatalogSource>>,
}

impl Marketplace {
    /// Empty marketplace with no refresh source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marketplace that refreshes from `source`.
    pub fn with_source(source: Arc<dyn CatalogSource>) -> Self {
        Self {
            source: Some(source),
            ..Self::default()
        }
    }

    /// Reload listings from the configured source.
    ///
    /// Entries that survive the refresh keep their local reviews, rating and
    /// counters unless the source supplies counters of its own. Entries the
    /// source no longer lists are dropped together with their reviews.
    /// Returns the number of listings after the refresh.
    pub async fn refresh(&self) -> PluginResult<usize> {
        let Some(source) = &self.source else {
            debug!("marketplace has no catalog source, skipping refresh");
            return Ok(self.catalog.read().len());
        };

        let entries = source.fetch().await?;

        let mut catalog = self.catalog.write();
        let mut fresh = HashMap::with_capacity(entries.len());

        for entry in entries {
            let has_stats = entry.stats.is_some();
            let mut plugin = entry.into_plugin();

            if let Some(existing) = catalog.get(plugin.id()) {
                plugin.rating = existing.rating.clone();
                plugin.created_at = existing.created_at;
                if !has_stats {
                    plugin.stats = existing.stats.clone();
                }
                if existing.manifest == plugin.manifest {
                    plugin.updated_at = existing.updated_at;
                }
            }

            fresh.insert(plugin.id().to_string(), plugin);
        }

        *catalog = fresh;
        self.reviews.write().retain(|id, _| catalog.contains_key(id));

        info!(count = catalog.len(), "marketplace catalog refreshed");
        Ok(catalog.len())
    }

    pub fn get_plugin(&self, id: &str) -> Option<MarketplacePlugin> {
        self.catalog.read().get(id).cloned()
    }

    /// Current manifest for `id`, if listed.
    pub fn get_manifest(&self, id: &str) -> Option<PluginManifest> {
        self.catalog.read().get(id).map(|p| p.manifest.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.catalog.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.catalog.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.read().is_empty()
    }

    /// Search the catalog. See [`SearchQuery`] for filter semantics.
    pub fn search(&self, query: &SearchQuery) -> Vec<MarketplacePlugin> {
        catalog::search(&self.catalog.read(), query)
    }

    /// Distinct categories, sorted.
    pub fn categories(&self) -> Vec<String> {
        let catalog = self.catalog.read();
        let set: BTreeSet<&str> = catalog.values().map(|p| p.category.as_str()).collect();
        set.into_iter().map(String::from).collect()
    }

    /// Featured listings, most downloaded first.
    pub fn featured(&self) -> Vec<MarketplacePlugin> {
        let mut featured: Vec<_> = self
            .catalog
            .read()
            .values()
            .filter(|p| p.featured)
            .cloned()
            .collect();
        featured.sort_by(|a, b| {
            b.stats
                .downloads
                .cmp(&a.stats.downloads)
                .then_with(|| a.id().cmp(b.id()))
        });
        featured
    }

    /// Add a listing. Fails if the id is already published.
    pub fn publish_plugin(
        &self,
        manifest: PluginManifest,
        category: impl Into<String>,
        tags: Vec<String>,
    ) -> PluginResult<MarketplacePlugin> {
        manifest.validate()?;

        let mut catalog = self.catalog.write();
        if catalog.contains_key(&manifest.id) {
            return Err(PluginError::AlreadyPublished {
                plugin: manifest.id,
            });
        }

        let plugin = MarketplacePlugin::new(manifest, category, tags);
        info!(plugin = %plugin.id(), version = %plugin.manifest.version, "plugin published");
        catalog.insert(plugin.id().to_string(), plugin.clone());
        Ok(plugin)
    }

    /// Replace the manifest of an existing listing (typically a new version).
    pub fn update_plugin(&self, manifest: PluginManifest) -> PluginResult<MarketplacePlugin> {
        manifest.validate()?;

        let mut catalog = self.catalog.write();
        let plugin = catalog
            .get_mut(&manifest.id)
            .ok_or_else(|| PluginError::NotInMarketplace {
                plugin: manifest.id.clone(),
            })?;

        info!(
            plugin = %manifest.id,
            from = %plugin.manifest.version,
            to = %manifest.version,
            "marketplace listing updated"
        );
        plugin.manifest = manifest;
        plugin.updated_at = Utc::now();
        Ok(plugin.clone())
    }

    /// Remove a listing and its reviews.
    pub fn unpublish_plugin(&self, id: &str) -> PluginResult<MarketplacePlugin> {
        let removed = self
            .catalog
            .write()
            .remove(id)
            .ok_or_else(|| PluginError::NotInMarketplace {
                plugin: id.to_string(),
            })?;
        self.reviews.write().remove(id);

        info!(plugin = %id, "plugin unpublished");
        Ok(removed)
    }

    pub fn set_featured(&self, id: &str, featured: bool) -> PluginResult<()> {
        self.with_listing(id, |p| p.featured = featured)
    }

    pub fn set_verified(&self, id: &str, verified: bool) -> PluginResult<()> {
        self.with_listing(id, |p| p.verified = verified)
    }

    /// Append a review and recompute the listing's rating.
    pub fn add_review(&self, id: &str, review: NewReview) -> PluginResult<Review> {
        let review = review.into_review(id)?;

        let mut catalog = self.catalog.write();
        let plugin = catalog
            .get_mut(id)
            .ok_or_else(|| PluginError::NotInMarketplace {
                plugin: id.to_string(),
            })?;

        let mut reviews = self.reviews.write();
        let list = reviews.entry(id.to_string()).or_default();
        list.push(review.clone());
        plugin.rating = reviews::aggregate(list);

        debug!(
            plugin = %id,
            rating = review.rating,
            average = plugin.rating.average,
            "review added"
        );
        Ok(review)
    }

    /// Reviews for a listing, oldest first.
    pub fn reviews(&self, id: &str) -> Vec<Review> {
        self.reviews.read().get(id).cloned().unwrap_or_default()
    }

    /// Increment a review's helpful count.
    pub fn mark_review_helpful(&self, id: &str, review_id: Uuid) -> PluginResult<u64> {
        let mut reviews = self.reviews.write();
        let review = reviews
            .get_mut(id)
            .and_then(|list| list.iter_mut().find(|r| r.id == review_id))
            .ok_or_else(|| PluginError::InvalidReview {
                plugin: id.to_string(),
                details: format!("review {review_id} not found"),
            })?;

        review.helpful += 1;
        Ok(review.helpful)
    }

    /// Count a download.
    pub fn record_download(&self, id: &str) -> PluginResult<()> {
        self.with_listing(id, |p| {
            p.stats.downloads += 1;
            p.stats.weekly_downloads += 1;
            p.stats.monthly_downloads += 1;
        })
    }

    pub fn record_install(&self, id: &str) -> PluginResult<()> {
        self.with_listing(id, |p| p.stats.active_installs += 1)
    }

    pub fn record_uninstall(&self, id: &str) -> PluginResult<()> {
        self.with_listing(id, |p| {
            p.stats.active_installs = p.stats.active_installs.saturating_sub(1);
        })
    }

    fn with_listing(&self, id: &str, f: impl FnOnce(&mut MarketplacePlugin)) -> PluginResult<()> {
        let mut catalog = self.catalog.write();
        let plugin = catalog
            .get_mut(id)
            .ok_or_else(|| PluginError::NotInMarketplace {
                plugin: id.to_string(),
            })?;
        f(plugin);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn publish(market: &Marketplace, id: &str, category: &str) {
        market
            .publish_plugin(PluginManifest::new(id, id, "1.0.0"), category, vec![])
            .unwrap();
    }

    #[test]
    fn publish_rejects_duplicates() {
        let market = Marketplace::new();
        publish(&market, "heatmap", "analytics");

        let err = market
            .publish_plugin(PluginManifest::new("heatmap", "Heatmap", "2.0.0"), "analytics", vec![])
            .unwrap_err();
        assert!(matches!(err, PluginError::AlreadyPublished { .. }));
    }

    #[test]
    fn published_entry_starts_empty() {
        let market = Marketplace::new();
        publish(&market, "heatmap", "analytics");

        let entry = market.get_plugin("heatmap").unwrap();
        assert_eq!(entry.stats, DownloadStats::default());
        assert_eq!(entry.rating.count, 0);
        assert!(!entry.verified);
    }

    #[test]
    fn reviews_update_rating() {
        let market = Marketplace::new();
        publish(&market, "heatmap", "analytics");

        market.add_review("heatmap", NewReview::new("a", 5)).unwrap();
        market.add_review("heatmap", NewReview::new("b", 4)).unwrap();

        let rating = market.get_plugin("heatmap").unwrap().rating;
        assert_eq!(rating.average, 4.5);
        assert_eq!(rating.count, 2);
        assert_eq!(market.reviews("heatmap").len(), 2);
    }

    #[test]
    fn review_for_unknown_plugin_fails() {
        let market = Marketplace::new();
        let err = market.add_review("ghost", NewReview::new("a", 5)).unwrap_err();
        assert!(matches!(err, PluginError::NotInMarketplace { .. }));
    }

    #[test]
    fn helpful_votes_accumulate() {
        let market = Marketplace::new();
        publish(&market, "heatmap", "analytics");
        let review = market.add_review("heatmap", NewReview::new("a", 3)).unwrap();

        market.mark_review_helpful("heatmap", review.id).unwrap();
        assert_eq!(market.mark_review_helpful("heatmap", review.id).unwrap(), 2);
        assert!(market.mark_review_helpful("heatmap", Uuid::now_v7()).is_err());
    }

    #[test]
    fn downloads_increment_all_counters() {
        let market = Marketplace::new();
        publish(&market, "heatmap", "analytics");

        market.record_download("heatmap").unwrap();
        market.record_download("heatmap").unwrap();
        market.record_install("heatmap").unwrap();
        market.record_uninstall("heatmap").unwrap();
        market.record_uninstall("heatmap").unwrap();

        let stats = market.get_plugin("heatmap").unwrap().stats;
        assert_eq!(stats.downloads, 2);
        assert_eq!(stats.weekly_downloads, 2);
        assert_eq!(stats.monthly_downloads, 2);
        assert_eq!(stats.active_installs, 0);
    }

    #[test]
    fn update_and_unpublish() {
        let market = Marketplace::new();
        publish(&market, "heatmap", "analytics");
        market.add_review("heatmap", NewReview::new("a", 5)).unwrap();

        let updated = market
            .update_plugin(PluginManifest::new("heatmap", "heatmap", "1.1.0"))
            .unwrap();
        assert_eq!(updated.manifest.version, "1.1.0");
        assert_eq!(updated.rating.count, 1);

        market.unpublish_plugin("heatmap").unwrap();
        assert!(!market.contains("heatmap"));
        assert!(market.reviews("heatmap").is_empty());
        assert!(market.unpublish_plugin("heatmap").is_err());
    }

    #[test]
    fn categories_and_featured() {
        let market = Marketplace::new();
        publish(&market, "heatmap", "analytics");
        publish(&market, "funnel", "analytics");
        publish(&market, "dark-mode", "ui");
        market.set_featured("dark-mode", true).unwrap();

        assert_eq!(market.categories(), vec!["analytics", "ui"]);
        let featured = market.featured();
        assert_eq!(featured.len(), 1);
        assert_eq!(featured[0].id(), "dark-mode");
    }

    #[tokio::test]
    async fn refresh_keeps_reviews_for_surviving_entries() {
        let entries: Vec<CatalogEntry> = serde_json::from_str(
            r#"[
                {"id": "heatmap", "name": "Heatmap", "version": "1.1.0", "category": "analytics"},
                {"id": "funnel", "name": "Funnel", "version": "2.0.0", "category": "analytics"}
            ]"#,
        )
        .unwrap();
        let market = Marketplace::with_source(Arc::new(StaticSource::new(entries)));

        assert_eq!(market.refresh().await.unwrap(), 2);
        market.add_review("heatmap", NewReview::new("a", 2)).unwrap();
        market.record_download("heatmap").unwrap();

        market.refresh().await.unwrap();
        let heatmap = market.get_plugin("heatmap").unwrap();
        assert_eq!(heatmap.rating.count, 1);
        assert_eq!(heatmap.stats.downloads, 1);
        assert_eq!(market.reviews("heatmap").len(), 1);
    }

    #[tokio::test]
    async fn refresh_without_source_is_a_noop() {
        let market = Marketplace::new();
        publish(&market, "heatmap", "analytics");
        assert_eq!(market.refresh().await.unwrap(), 1);
    }
}
