#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Fixtures build real registries and marketplaces; the only stand-in is
//! [`RecordingPlugin`], which logs its callbacks and fails on request.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use hookwork_kernel::events::PluginEvent;
use hookwork_kernel::marketplace::Marketplace;
use hookwork_kernel::plugin::{Plugin, PluginManifest, PluginRegistry};

/// Host version used by every test registry.
pub const SYSTEM_VERSION: &str = "1.0.0";

/// Plugin that records each callback it receives.
///
/// Callbacks named in the failure set return an error instead. The hook
/// callback is recorded as `hook:<name>` and fails when `"hook"` is set.
pub struct RecordingPlugin {
    id: String,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashSet<&'static str>>,
}

impl RecordingPlugin {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
        })
    }

    /// A plugin whose `callback` fails from the start.
    pub fn failing(id: &str, callback: &'static str) -> Arc<Self> {
        let plugin = Self::new(id);
        plugin.fail_on(callback);
        plugin
    }

    pub fn fail_on(&self, callback: &'static str) {
        self.failures.lock().insert(callback);
    }

    pub fn recover(&self, callback: &'static str) {
        self.failures.lock().remove(callback);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, callback: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == callback).count()
    }

    fn record(&self, callback: &'static str) -> Result<()> {
        self.calls.lock().push(callback.to_string());
        if self.failures.lock().contains(callback) {
            bail!("{} failed in {callback}", self.id);
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    async fn on_install(&self) -> Result<()> {
        self.record("on_install")
    }

    async fn on_uninstall(&self) -> Result<()> {
        self.record("on_uninstall")
    }

    async fn on_enable(&self) -> Result<()> {
        self.record("on_enable")
    }

    async fn on_disable(&self) -> Result<()> {
        self.record("on_disable")
    }

    async fn on_config_change(&self, _config: &Value) -> Result<()> {
        self.record("on_config_change")
    }

    async fn on_update(&self, _old: &PluginManifest, _new: &PluginManifest) -> Result<()> {
        self.record("on_update")
    }

    async fn handle_hook(&self, hook: &str, data: &Value) -> Result<Option<Value>> {
        self.calls.lock().push(format!("hook:{hook}"));
        if self.failures.lock().contains("hook") {
            bail!("{} crashed in {hook}", self.id);
        }
        Ok(Some(json!({ "plugin": self.id, "data": data })))
    }
}

/// Manifest with the given dependencies (`(id, range)` pairs).
pub fn manifest(id: &str, version: &str, deps: &[(&str, &str)]) -> PluginManifest {
    deps.iter().fold(
        PluginManifest::new(id, id.to_uppercase(), version),
        |m, (dep, range)| m.with_dependency(*dep, *range),
    )
}

/// Manifest that services `hooks`.
pub fn hooked(id: &str, hooks: &[&str]) -> PluginManifest {
    hooks
        .iter()
        .fold(PluginManifest::new(id, id.to_uppercase(), "1.0.0"), |m, hook| {
            m.with_hook(*hook)
        })
}

/// Marketplace pre-populated with `manifests` in category "tools".
pub fn marketplace_with(manifests: &[PluginManifest]) -> Arc<Marketplace> {
    let marketplace = Arc::new(Marketplace::new());
    for m in manifests {
        marketplace
            .publish_plugin(m.clone(), "tools", vec![])
            .unwrap();
    }
    marketplace
}

pub fn registry_with(marketplace: Arc<Marketplace>) -> Arc<PluginRegistry> {
    Arc::new(PluginRegistry::new(marketplace).with_system_version(SYSTEM_VERSION))
}

/// Registry with an empty marketplace.
pub fn registry() -> Arc<PluginRegistry> {
    registry_with(Arc::new(Marketplace::new()))
}

/// Register `manifest` backed by a fresh [`RecordingPlugin`] and enable it.
pub async fn enabled(registry: &PluginRegistry, manifest: PluginManifest) -> Arc<RecordingPlugin> {
    let plugin = RecordingPlugin::new(&manifest.id);
    let id = manifest.id.clone();
    registry
        .register_with(manifest, plugin.clone())
        .await
        .unwrap();
    registry.enable(&id).await.unwrap();
    plugin
}

/// Every event currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<PluginEvent>) -> Vec<PluginEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Canonical names of `events`.
pub fn names(events: &[PluginEvent]) -> Vec<&'static str> {
    events.iter().map(PluginEvent::name).collect()
}
