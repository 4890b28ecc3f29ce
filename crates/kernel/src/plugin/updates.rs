//! Periodic update checks against the marketplace.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::PluginRegistry;
use crate::events::PluginEvent;

/// Default interval between update checks (one hour).
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 3600;

/// An installed plugin with a different version in the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateInfo {
    pub plugin: String,
    pub installed: String,
    pub available: String,
}

/// Checks for plugin updates and optionally applies them.
///
/// A check never fails: problems are logged and emitted as
/// `plugin:update:check:failed` events.
pub struct UpdateChecker {
    registry: Arc<PluginRegistry>,
    interval: Duration,
    auto_update: bool,
}

impl UpdateChecker {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            auto_update: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Apply available updates instead of only announcing them.
    pub fn with_auto_update(mut self, auto_update: bool) -> Self {
        self.auto_update = auto_update;
        self
    }

    /// Run a single check.
    ///
    /// Refreshes the marketplace, emits `plugin:update:available` for each
    /// outdated plugin and, with auto-update on, updates it. Returns the
    /// updates that were found.
    pub async fn check_once(&self) -> Vec<UpdateInfo> {
        let events = self.registry.events();

        if let Err(e) = self.registry.marketplace().refresh().await {
            warn!(error = %e, "marketplace refresh failed, checking cached catalog");
            events.emit(PluginEvent::UpdateCheckFailed {
                plugin: None,
                error: e.to_string(),
            });
        }

        let updates = self.registry.check_updates();
        for update in &updates {
            info!(
                plugin = %update.plugin,
                installed = %update.installed,
                available = %update.available,
                "plugin update available"
            );
            events.emit(PluginEvent::UpdateAvailable {
                plugin: update.plugin.clone(),
                installed: update.installed.clone(),
                available: update.available.clone(),
            });

            if self.auto_update {
                if let Err(e) = self.registry.update(&update.plugin).await {
                    warn!(plugin = %update.plugin, error = %e, "automatic update failed");
                    events.emit(PluginEvent::UpdateCheckFailed {
                        plugin: Some(update.plugin.clone()),
                        error: e.to_string(),
                    });
                }
            }
        }

        debug!(updates = updates.len(), "update check complete");
        updates
    }

    /// Check on every tick until stopped.
    ///
    /// The first check runs immediately.
    pub fn spawn(self) -> UpdateCheckerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            info!(
                interval_secs = self.interval.as_secs(),
                auto_update = self.auto_update,
                "update checker started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.check_once().await;
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            debug!("update checker stopping");
                            break;
                        }
                    }
                }
            }
        });

        UpdateCheckerHandle { stop_tx, handle }
    }
}

/// Handle to a running [`UpdateChecker`].
pub struct UpdateCheckerHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl UpdateCheckerHandle {
    /// Stop the checker and wait for the current check to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "update checker task failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::marketplace::Marketplace;
    use crate::plugin::PluginManifest;

    async fn setup() -> Arc<PluginRegistry> {
        let marketplace = Arc::new(Marketplace::new());
        marketplace
            .publish_plugin(PluginManifest::new("seo", "SEO", "1.0.0"), "tools", vec![])
            .unwrap();

        let registry = Arc::new(PluginRegistry::new(Arc::clone(&marketplace)));
        registry
            .install("seo", Default::default())
            .await
            .unwrap();

        marketplace
            .update_plugin(PluginManifest::new("seo", "SEO", "1.1.0"))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn check_announces_updates() {
        let registry = setup().await;
        let mut events = registry.events().subscribe();

        let updates = UpdateChecker::new(Arc::clone(&registry)).check_once().await;
        assert_eq!(
            updates,
            vec![UpdateInfo {
                plugin: "seo".into(),
                installed: "1.0.0".into(),
                available: "1.1.0".into(),
            }]
        );

        let event = events.try_recv().unwrap();
        assert_eq!(event.name(), "plugin:update:available");
        assert_eq!(registry.get("seo").unwrap().manifest.version, "1.0.0");
    }

    #[tokio::test]
    async fn auto_update_applies_new_version() {
        let registry = setup().await;

        UpdateChecker::new(Arc::clone(&registry))
            .with_auto_update(true)
            .check_once()
            .await;

        assert_eq!(registry.get("seo").unwrap().manifest.version, "1.1.0");
        assert!(registry.check_updates().is_empty());
    }

    #[tokio::test]
    async fn spawned_checker_stops() {
        let registry = setup().await;
        let handle = UpdateChecker::new(Arc::clone(&registry))
            .with_interval(Duration::from_millis(10))
            .spawn();

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop().await;
    }
}
