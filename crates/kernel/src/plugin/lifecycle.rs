//! Plugin callbacks and instance loading.
//!
//! Every callback is optional: the defaults succeed without doing anything,
//! so a plugin only overrides what it cares about. Callback failures are
//! plain `anyhow` errors; the registry turns them into
//! [`PluginError::Lifecycle`](super::PluginError::Lifecycle) and rolls back.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::manifest::PluginManifest;

/// Behaviour behind a registered manifest.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Called once after the registration is stored.
    async fn on_install(&self) -> Result<()> {
        Ok(())
    }

    /// Called before the registration is removed.
    async fn on_uninstall(&self) -> Result<()> {
        Ok(())
    }

    async fn on_enable(&self) -> Result<()> {
        Ok(())
    }

    async fn on_disable(&self) -> Result<()> {
        Ok(())
    }

    async fn on_config_change(&self, _config: &Value) -> Result<()> {
        Ok(())
    }

    /// Called after the manifest has been swapped for a newer version.
    async fn on_update(&self, _old: &PluginManifest, _new: &PluginManifest) -> Result<()> {
        Ok(())
    }

    /// Service a hook listed in the manifest's `hooks`.
    ///
    /// `Ok(None)` means the plugin had nothing to contribute.
    async fn handle_hook(&self, _hook: &str, _data: &Value) -> Result<Option<Value>> {
        Ok(None)
    }
}

/// Resolves a manifest's entry point to a plugin instance.
///
/// Used whenever the registry installs a plugin without an explicit
/// instance, such as dependencies pulled from the marketplace.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    async fn load(&self, manifest: &PluginManifest) -> Result<Arc<dyn Plugin>>;
}

/// Plugin with no behaviour beyond its manifest.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarativePlugin;

#[async_trait]
impl Plugin for DeclarativePlugin {}

/// Loader that backs every manifest with a [`DeclarativePlugin`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarativeLoader;

#[async_trait]
impl PluginLoader for DeclarativeLoader {
    async fn load(&self, _manifest: &PluginManifest) -> Result<Arc<dyn Plugin>> {
        Ok(Arc::new(DeclarativePlugin))
    }
}
