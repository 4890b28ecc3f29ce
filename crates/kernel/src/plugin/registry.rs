//! Plugin registry and lifecycle manager.
//!
//! The registry owns every [`PluginRegistration`], the hook table and the
//! per-plugin locks. Lifecycle operations on one plugin id are serialized;
//! operations on different ids run independently. Map and hook-table guards
//! are never held across an await.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use super::dependency::{resolve_dependencies, resolve_load_order};
use super::error::{PluginError, PluginResult};
use super::lifecycle::{DeclarativeLoader, Plugin, PluginLoader};
use super::manifest::PluginManifest;
use super::status::{PluginRegistration, PluginStatus, RegistryStats, Transition};
use super::updates::UpdateInfo;
use crate::events::{EventBus, PluginEvent};
use crate::hook::{DispatchOutcome, HookHandler, HookId, HookRegistry, PluginHookHandler, dispatch};
use crate::marketplace::Marketplace;
use crate::metrics::Metrics;

/// Host version assumed when none is configured.
pub const DEFAULT_SYSTEM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Options for [`PluginRegistry::install`].
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Register this manifest instead of fetching one from the marketplace.
    pub manifest: Option<PluginManifest>,
    /// Override the marketplace version.
    pub version: Option<String>,
    /// Configuration applied after registration.
    pub config: Option<Value>,
    /// Enable the plugin once installed.
    pub enable: bool,
}

/// Registry of installed plugins.
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, PluginRegistration>>,
    hooks: HookRegistry,
    locks: DashMap<String, Arc<Mutex<()>>>,
    next_sequence: AtomicU64,
    marketplace: Arc<Marketplace>,
    loader: Arc<dyn PluginLoader>,
    events: EventBus,
    metrics: Arc<Metrics>,
    system_version: String,
}

impl PluginRegistry {
    /// Create a registry backed by `marketplace`.
    pub fn new(marketplace: Arc<Marketplace>) -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            hooks: HookRegistry::new(),
            locks: DashMap::new(),
            next_sequence: AtomicU64::new(0),
            marketplace,
            loader: Arc::new(DeclarativeLoader),
            events: EventBus::default(),
            metrics: Arc::new(Metrics::new()),
            system_version: DEFAULT_SYSTEM_VERSION.to_string(),
        }
    }

    /// Use `loader` to create instances for manifests registered without one.
    pub fn with_loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Host version checked against `minSystemVersion`/`maxSystemVersion`.
    pub fn with_system_version(mut self, version: impl Into<String>) -> Self {
        self.system_version = version.into();
        self
    }

    pub fn marketplace(&self) -> &Arc<Marketplace> {
        &self.marketplace
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn system_version(&self) -> &str {
        &self.system_version
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a manifest, creating its instance through the loader.
    ///
    /// Missing dependencies are installed from the marketplace first.
    pub async fn register(&self, manifest: PluginManifest) -> PluginResult<()> {
        let plugin = self.load_instance(&manifest).await?;
        self.register_with(manifest, plugin).await
    }

    /// Register a manifest backed by an explicit plugin instance.
    pub async fn register_with(
        &self,
        manifest: PluginManifest,
        plugin: Arc<dyn Plugin>,
    ) -> PluginResult<()> {
        let _guard = self.lock(&manifest.id).await;
        let result = self.register_locked(manifest, plugin).await;
        self.metrics.record_transition("register", result.is_ok());
        result
    }

    async fn register_locked(
        &self,
        manifest: PluginManifest,
        plugin: Arc<dyn Plugin>,
    ) -> PluginResult<()> {
        if self.is_registered(&manifest.id) {
            return Err(PluginError::AlreadyRegistered {
                plugin: manifest.id,
            });
        }

        manifest.validate()?;
        manifest.check_system_version(&self.system_version)?;

        let plan = self.plan_dependencies(&manifest)?;
        self.install_planned(&manifest.id, plan).await?;

        self.admit(manifest, plugin).await
    }

    /// Resolve `manifest`'s dependencies and validate everything to install.
    fn plan_dependencies(&self, manifest: &PluginManifest) -> PluginResult<Vec<PluginManifest>> {
        let installed = self.manifests();
        let plan = resolve_dependencies(manifest, &installed, |id| {
            self.marketplace.get_manifest(id)
        })?;

        for dep in &plan {
            dep.validate()?;
            dep.check_system_version(&self.system_version)?;
        }

        Ok(plan)
    }

    /// Install planned dependencies in order, dependencies first.
    ///
    /// A failure leaves already-installed dependencies in place; they are
    /// complete plugins in their own right.
    async fn install_planned(&self, root: &str, plan: Vec<PluginManifest>) -> PluginResult<()> {
        for dep in plan {
            let _guard = self.lock(&dep.id).await;
            if self.is_registered(&dep.id) {
                continue;
            }

            info!(plugin = %root, dependency = %dep.id, version = %dep.version, "auto-installing dependency");
            self.events.emit(PluginEvent::InstallStarted {
                plugin: dep.id.clone(),
            });

            let instance = self.load_instance(&dep).await?;
            let id = dep.id.clone();
            let version = dep.version.clone();
            self.admit(dep, instance).await?;

            self.note_download(&id);
            self.events.emit(PluginEvent::InstallCompleted {
                plugin: id,
                version,
            });
        }
        Ok(())
    }

    /// Store a validated, resolved registration and run `on_install`.
    ///
    /// If `on_install` fails the registration and its hook handlers are
    /// removed again before the error is returned.
    async fn admit(&self, manifest: PluginManifest, plugin: Arc<dyn Plugin>) -> PluginResult<()> {
        let id = manifest.id.clone();
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let registration =
            PluginRegistration::new(manifest.clone(), Arc::clone(&plugin), sequence)?;

        {
            let mut plugins = self.plugins.write();
            if plugins.contains_key(&id) {
                return Err(PluginError::AlreadyRegistered { plugin: id });
            }
            plugins.insert(id.clone(), registration);
        }
        self.subscribe_hooks(&manifest, &plugin);

        if let Err(e) = plugin.on_install().await {
            let err = PluginError::lifecycle(&id, "on_install", &e);
            self.hooks.unregister_owner(&id);
            self.plugins.write().remove(&id);
            warn!(plugin = %id, error = %err, "install callback failed, registration rolled back");
            self.emit_error(&id, "on_install", &err);
            return Err(err);
        }

        if let Err(e) = self.marketplace.record_install(&id) {
            debug!(plugin = %id, error = %e, "install not tracked by marketplace");
        }

        info!(
            plugin = %id,
            version = %manifest.version,
            hooks = ?manifest.hooks,
            "plugin registered"
        );
        self.events.emit(PluginEvent::Registered {
            plugin: id,
            version: manifest.version,
        });
        self.refresh_gauges();
        Ok(())
    }

    /// Remove a plugin, disabling it first if needed.
    pub async fn unregister(&self, id: &str) -> PluginResult<()> {
        let _guard = self.lock(id).await;
        let result = self.unregister_locked(id).await;
        self.metrics.record_transition("unregister", result.is_ok());
        result
    }

    async fn unregister_locked(&self, id: &str) -> PluginResult<()> {
        let registration = self.require(id)?;
        registration
            .status
            .apply(id, Transition::Uninstall)?;

        if registration.enabled {
            self.disable_locked(id).await?;
        }

        if let Err(e) = registration.plugin.on_uninstall().await {
            let err = PluginError::lifecycle(id, "on_uninstall", &e);
            self.mark_failed(id, "on_uninstall", &err);
            return Err(err);
        }

        self.hooks.unregister_owner(id);
        self.plugins.write().remove(id);

        if let Err(e) = self.marketplace.record_uninstall(id) {
            debug!(plugin = %id, error = %e, "uninstall not tracked by marketplace");
        }

        info!(plugin = %id, "plugin unregistered");
        self.events.emit(PluginEvent::Unregistered {
            plugin: id.to_string(),
        });
        self.refresh_gauges();
        Ok(())
    }

    /// Install a plugin, from the marketplace unless a manifest is supplied.
    ///
    /// A supplied manifest must carry `id`.
    pub async fn install(
        &self,
        id: &str,
        options: InstallOptions,
    ) -> PluginResult<PluginRegistration> {
        let InstallOptions {
            manifest,
            version,
            config,
            enable,
        } = options;

        if let Some(manifest) = manifest {
            if manifest.id != id {
                return Err(PluginError::invalid_manifest(
                    id,
                    format!("supplied manifest is for '{}'", manifest.id),
                ));
            }
            self.register(manifest).await?;
        } else {
            self.events.emit(PluginEvent::InstallStarted {
                plugin: id.to_string(),
            });

            let mut manifest =
                self.marketplace
                    .get_manifest(id)
                    .ok_or_else(|| PluginError::NotInMarketplace {
                        plugin: id.to_string(),
                    })?;
            if let Some(version) = version {
                manifest.version = version;
            }

            let version = manifest.version.clone();
            self.register(manifest).await?;
            self.note_download(id);

            info!(plugin = %id, version = %version, "installed from marketplace");
            self.events.emit(PluginEvent::InstallCompleted {
                plugin: id.to_string(),
                version,
            });
        }

        if let Some(config) = config {
            self.update_config(id, config).await?;
        }
        if enable {
            self.enable(id).await?;
        }

        self.require(id)
    }

    // =========================================================================
    // Enable / disable
    // =========================================================================

    /// Enable a plugin. Every declared dependency must already be enabled.
    ///
    /// Only direct dependencies are checked; callers enable bottom-up (see
    /// [`enable_all`](Self::enable_all)).
    pub async fn enable(&self, id: &str) -> PluginResult<()> {
        let _guard = self.lock(id).await;
        let result = self.enable_locked(id).await;
        self.metrics.record_transition("enable", result.is_ok());
        result
    }

    async fn enable_locked(&self, id: &str) -> PluginResult<()> {
        let registration = self.require(id)?;
        if registration.enabled {
            return Ok(());
        }
        registration.status.apply(id, Transition::Enable)?;

        for dep in registration.manifest.dependencies.keys() {
            if !self.is_enabled(dep) {
                return Err(PluginError::DependencyNotEnabled {
                    plugin: id.to_string(),
                    dependency: dep.clone(),
                });
            }
        }

        if let Err(e) = registration.plugin.on_enable().await {
            let err = PluginError::lifecycle(id, "on_enable", &e);
            self.mark_failed(id, "on_enable", &err);
            return Err(err);
        }

        self.with_registration(id, |r| r.transition(Transition::Enable))??;

        info!(plugin = %id, "plugin enabled");
        self.events.emit(PluginEvent::Enabled {
            plugin: id.to_string(),
        });
        self.refresh_gauges();
        Ok(())
    }

    /// Disable a plugin.
    ///
    /// Never blocked by enabled dependents; they are named in a
    /// `plugin:dependents:warning` event instead.
    pub async fn disable(&self, id: &str) -> PluginResult<()> {
        let _guard = self.lock(id).await;
        let result = self.disable_locked(id).await;
        self.metrics.record_transition("disable", result.is_ok());
        result
    }

    async fn disable_locked(&self, id: &str) -> PluginResult<()> {
        let registration = self.require(id)?;
        if !registration.enabled {
            return Ok(());
        }
        registration.status.apply(id, Transition::Disable)?;

        let dependents = self.enabled_dependents(id);
        if !dependents.is_empty() {
            warn!(plugin = %id, dependents = ?dependents, "disabling plugin with enabled dependents");
            self.events.emit(PluginEvent::DependentsWarning {
                plugin: id.to_string(),
                dependents,
            });
        }

        if let Err(e) = registration.plugin.on_disable().await {
            let err = PluginError::lifecycle(id, "on_disable", &e);
            self.mark_failed(id, "on_disable", &err);
            return Err(err);
        }

        self.with_registration(id, |r| r.transition(Transition::Disable))??;

        info!(plugin = %id, "plugin disabled");
        self.events.emit(PluginEvent::Disabled {
            plugin: id.to_string(),
        });
        self.refresh_gauges();
        Ok(())
    }

    /// Disable then re-enable a plugin that was enabled.
    pub async fn reload(&self, id: &str) -> PluginResult<()> {
        let _guard = self.lock(id).await;
        let was_enabled = self.require(id)?.enabled;

        if was_enabled {
            self.disable_locked(id).await?;
            self.enable_locked(id).await?;
        }

        debug!(plugin = %id, was_enabled, "plugin reloaded");
        self.metrics.record_transition("reload", true);
        Ok(())
    }

    /// Enable `ids` in dependency order.
    ///
    /// Dependencies outside `ids` must already be enabled. Stops at the first
    /// failure. Returns the ids in the order they were enabled.
    pub async fn enable_all(&self, ids: &[String]) -> PluginResult<Vec<String>> {
        for id in ids {
            self.require(id)?;
        }

        let wanted: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
        let order: Vec<String> = resolve_load_order(&self.manifests())?
            .into_iter()
            .filter(|id| wanted.contains(id.as_str()))
            .collect();

        for id in &order {
            self.enable(id).await?;
        }
        Ok(order)
    }

    // =========================================================================
    // Configuration and updates
    // =========================================================================

    /// Replace a plugin's configuration.
    ///
    /// If `on_config_change` fails the previous configuration is restored.
    pub async fn update_config(&self, id: &str, config: Value) -> PluginResult<()> {
        let _guard = self.lock(id).await;
        let registration = self.require(id)?;

        let previous = self.with_registration(id, |r| std::mem::replace(&mut r.config, config.clone()))?;

        if let Err(e) = registration.plugin.on_config_change(&config).await {
            let err = PluginError::lifecycle(id, "on_config_change", &e);
            self.with_registration(id, |r| r.config = previous)?;
            self.mark_failed(id, "on_config_change", &err);
            self.metrics.record_transition("configure", false);
            return Err(err);
        }

        debug!(plugin = %id, "plugin configuration changed");
        self.events.emit(PluginEvent::ConfigChanged {
            plugin: id.to_string(),
        });
        self.metrics.record_transition("configure", true);
        Ok(())
    }

    /// Plugins whose marketplace version differs from the installed one.
    pub fn check_updates(&self) -> Vec<UpdateInfo> {
        let mut updates: Vec<UpdateInfo> = self
            .plugins
            .read()
            .values()
            .filter_map(|r| {
                let available = self.marketplace.get_manifest(r.id())?;
                (available.version != r.manifest.version).then(|| UpdateInfo {
                    plugin: r.id().to_string(),
                    installed: r.manifest.version.clone(),
                    available: available.version,
                })
            })
            .collect();
        updates.sort_by(|a, b| a.plugin.cmp(&b.plugin));
        updates
    }

    /// Move a plugin to the marketplace's current version.
    ///
    /// Returns `false` if the versions already match. On an `on_update`
    /// failure the previous manifest is restored and the plugin is left in
    /// `ERROR`.
    pub async fn update(&self, id: &str) -> PluginResult<bool> {
        let _guard = self.lock(id).await;
        let result = self.update_locked(id).await;
        self.metrics.record_transition("update", result.is_ok());
        result
    }

    async fn update_locked(&self, id: &str) -> PluginResult<bool> {
        let registration = self.require(id)?;
        let new = self
            .marketplace
            .get_manifest(id)
            .ok_or_else(|| PluginError::NotInMarketplace {
                plugin: id.to_string(),
            })?;

        if new.version == registration.manifest.version {
            debug!(plugin = %id, version = %new.version, "already up to date");
            return Ok(false);
        }

        new.validate()?;
        new.check_system_version(&self.system_version)?;
        let plan = self.plan_dependencies(&new)?;

        let previous_status = registration.status;
        self.with_registration(id, |r| r.transition(Transition::BeginUpdate))??;

        if let Err(err) = self.install_planned(id, plan).await {
            self.with_registration(id, |r| r.transition(Transition::Restore(previous_status)))??;
            return Err(err);
        }

        let old = registration.manifest.clone();
        self.with_registration(id, |r| r.manifest = new.clone())?;
        self.hooks.unregister_owner(id);
        self.subscribe_hooks(&new, &registration.plugin);

        if let Err(e) = registration.plugin.on_update(&old, &new).await {
            let err = PluginError::lifecycle(id, "on_update", &e);
            self.with_registration(id, |r| r.manifest = old.clone())?;
            self.hooks.unregister_owner(id);
            self.subscribe_hooks(&old, &registration.plugin);
            self.mark_failed(id, "on_update", &err);
            return Err(err);
        }

        self.with_registration(id, |r| r.transition(Transition::Restore(previous_status)))??;
        self.note_download(id);

        info!(plugin = %id, from = %old.version, to = %new.version, "plugin updated");
        self.events.emit(PluginEvent::Updated {
            plugin: id.to_string(),
            from: old.version,
            to: new.version,
        });
        Ok(true)
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    /// Register a host handler for `hook`. Host handlers always run.
    pub fn register_hook(&self, hook: &str, handler: Arc<dyn HookHandler>) -> HookId {
        self.hooks.register(hook, None, handler)
    }

    /// Register a handler owned by plugin `id`.
    ///
    /// The handler only runs while the plugin is enabled, and its failure
    /// disables the plugin.
    pub fn register_plugin_hook(
        &self,
        id: &str,
        hook: &str,
        handler: Arc<dyn HookHandler>,
    ) -> PluginResult<HookId> {
        self.require(id)?;
        Ok(self.hooks.register(hook, Some(id), handler))
    }

    pub fn unregister_hook(&self, hook: &str, handler: HookId) -> bool {
        self.hooks.unregister(hook, handler)
    }

    /// Run `hook` and return the first non-empty result.
    ///
    /// Never fails: handler errors are reported as `hook:error` events and
    /// the owning plugin is disabled.
    pub async fn execute_hook(&self, hook: &str, data: Value) -> Option<Value> {
        let outcome = self.dispatch_hook(hook, &data).await;
        outcome.results.into_iter().next().map(|r| r.output)
    }

    /// Run `hook` and return every non-empty result in handler order.
    pub async fn execute_hook_all(&self, hook: &str, data: Value) -> Vec<Value> {
        let outcome = self.dispatch_hook(hook, &data).await;
        outcome.results.into_iter().map(|r| r.output).collect()
    }

    async fn dispatch_hook(&self, hook: &str, data: &Value) -> DispatchOutcome {
        let handlers: Vec<_> = self
            .hooks
            .handlers(hook)
            .into_iter()
            .filter(|h| h.owner.as_deref().is_none_or(|owner| self.is_enabled(owner)))
            .collect();

        let outcome = dispatch(hook, data, &handlers, Some(&self.metrics)).await;

        let mut culprits: Vec<(String, String)> = Vec::new();
        for failure in &outcome.failures {
            self.events.emit(PluginEvent::HookError {
                hook: hook.to_string(),
                plugin: failure.owner.clone(),
                error: failure.error.clone(),
            });

            let culprit = failure
                .owner
                .clone()
                .or_else(|| self.first_enabled_declaring(hook));
            match culprit {
                Some(culprit) if !culprits.iter().any(|(id, _)| *id == culprit) => {
                    culprits.push((culprit, failure.error.clone()));
                }
                _ => {}
            }
        }

        for (plugin, error) in culprits {
            self.isolate(&plugin, hook, &error).await;
        }

        outcome
    }

    /// Disable a plugin whose hook handler failed.
    ///
    /// When the plugin's lifecycle lock is already held (for instance by one
    /// of its own callbacks running the hook) the plugin is switched off
    /// without running `on_disable`.
    async fn isolate(&self, id: &str, hook: &str, error: &str) {
        let guard = self.try_lock(id);
        if !self.is_enabled(id) {
            return;
        }

        warn!(plugin = %id, hook = %hook, error = %error, "disabling plugin after hook failure");

        let disabled = match &guard {
            Some(_) => self.disable_locked(id).await,
            None => {
                debug!(plugin = %id, "lifecycle lock busy, forcing disable");
                self.force_disable(id)
            }
        };
        if let Err(e) = disabled {
            error!(plugin = %id, error = %e, "disable failed during crash isolation");
            let _ = self.with_registration(id, |r| r.enabled = false);
            self.refresh_gauges();
        }
        let failure = PluginError::Hook {
            plugin: id.to_string(),
            hook: hook.to_string(),
            message: error.to_string(),
        };
        let _ = self.with_registration(id, |r| r.last_error = Some(failure.to_string()));

        self.metrics.record_crash();
        self.events.emit(PluginEvent::Crashed {
            plugin: id.to_string(),
            hook: hook.to_string(),
            error: error.to_string(),
        });
    }

    /// Mark a plugin disabled without its callback or the lifecycle lock.
    fn force_disable(&self, id: &str) -> PluginResult<()> {
        self.with_registration(id, |r| r.transition(Transition::Disable))??;
        self.events.emit(PluginEvent::Disabled {
            plugin: id.to_string(),
        });
        self.refresh_gauges();
        Ok(())
    }

    /// Earliest-registered enabled plugin whose manifest declares `hook`.
    fn first_enabled_declaring(&self, hook: &str) -> Option<String> {
        self.plugins
            .read()
            .values()
            .filter(|r| r.enabled && r.manifest.declares_hook(hook))
            .min_by_key(|r| r.sequence)
            .map(|r| r.id().to_string())
    }

    fn subscribe_hooks(&self, manifest: &PluginManifest, plugin: &Arc<dyn Plugin>) {
        for hook in &manifest.hooks {
            let handler = Arc::new(PluginHookHandler::new(Arc::clone(plugin)));
            self.hooks.register(hook, Some(&manifest.id), handler);
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get(&self, id: &str) -> Option<PluginRegistration> {
        self.plugins.read().get(id).cloned()
    }

    /// All registrations, sorted by id.
    pub fn list(&self) -> Vec<PluginRegistration> {
        let mut list: Vec<_> = self.plugins.read().values().cloned().collect();
        list.sort_by(|a, b| a.id().cmp(b.id()));
        list
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.plugins.read().contains_key(id)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.plugins.read().get(id).is_some_and(|r| r.enabled)
    }

    pub fn status(&self, id: &str) -> Option<PluginStatus> {
        self.plugins.read().get(id).map(|r| r.status)
    }

    /// Ids of enabled plugins, sorted.
    pub fn enabled_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .plugins
            .read()
            .values()
            .filter(|r| r.enabled)
            .map(|r| r.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Registered plugins that declare `id` as a dependency, sorted.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        let mut ids: Vec<_> = self
            .plugins
            .read()
            .values()
            .filter(|r| r.manifest.depends_on(id))
            .map(|r| r.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    fn enabled_dependents(&self, id: &str) -> Vec<String> {
        self.dependents_of(id)
            .into_iter()
            .filter(|dep| self.is_enabled(dep))
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for registration in self.plugins.read().values() {
            stats.count(registration.status);
        }
        stats
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Per-plugin lifecycle lock.
    async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let mutex = Arc::clone(self.locks.entry(id.to_string()).or_default().value());
        mutex.lock_owned().await
    }

    fn try_lock(&self, id: &str) -> Option<OwnedMutexGuard<()>> {
        let mutex = Arc::clone(self.locks.entry(id.to_string()).or_default().value());
        mutex.try_lock_owned().ok()
    }

    async fn load_instance(&self, manifest: &PluginManifest) -> PluginResult<Arc<dyn Plugin>> {
        self.loader
            .load(manifest)
            .await
            .map_err(|e| PluginError::lifecycle(&manifest.id, "load", &e))
    }

    fn require(&self, id: &str) -> PluginResult<PluginRegistration> {
        self.get(id).ok_or_else(|| PluginError::not_found(id))
    }

    fn manifests(&self) -> HashMap<String, PluginManifest> {
        self.plugins
            .read()
            .iter()
            .map(|(id, r)| (id.clone(), r.manifest.clone()))
            .collect()
    }

    fn with_registration<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut PluginRegistration) -> T,
    ) -> PluginResult<T> {
        let mut plugins = self.plugins.write();
        let registration = plugins
            .get_mut(id)
            .ok_or_else(|| PluginError::not_found(id))?;
        Ok(f(registration))
    }

    fn mark_failed(&self, id: &str, phase: &str, err: &PluginError) {
        error!(plugin = %id, phase = %phase, error = %err, "lifecycle callback failed");
        let _ = self.with_registration(id, |r| r.fail(err));
        self.emit_error(id, phase, err);
        self.refresh_gauges();
    }

    fn emit_error(&self, id: &str, phase: &str, err: &PluginError) {
        self.events.emit(PluginEvent::Error {
            plugin: id.to_string(),
            phase: phase.to_string(),
            error: err.to_string(),
        });
    }

    fn note_download(&self, id: &str) {
        match self.marketplace.record_download(id) {
            Ok(()) => self.metrics.record_marketplace_install(),
            Err(e) => debug!(plugin = %id, error = %e, "download not tracked by marketplace"),
        }
    }

    fn refresh_gauges(&self) {
        let plugins = self.plugins.read();
        let enabled = plugins.values().filter(|r| r.enabled).count();
        self.metrics.set_plugin_counts(plugins.len(), enabled);
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.read().len())
            .field("hooks", &self.hooks.hook_count())
            .field("system_version", &self.system_version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registry() -> PluginRegistry {
        PluginRegistry::new(Arc::new(Marketplace::new())).with_system_version("1.0.0")
    }

    #[tokio::test]
    async fn register_then_enable() {
        let registry = registry();
        registry
            .register(PluginManifest::new("a", "A", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(registry.status("a"), Some(PluginStatus::Installed));

        registry.enable("a").await.unwrap();
        assert!(registry.is_enabled("a"));
        assert_eq!(registry.status("a"), Some(PluginStatus::Enabled));
        assert_eq!(registry.stats().enabled, 1);
    }

    #[tokio::test]
    async fn duplicate_register_fails() {
        let registry = registry();
        let manifest = PluginManifest::new("a", "A", "1.0.0");
        registry.register(manifest.clone()).await.unwrap();

        let err = registry.register(manifest).await.unwrap_err();
        assert!(matches!(err, PluginError::AlreadyRegistered { .. }));
    }

    #[tokio::test]
    async fn unknown_plugin_operations_fail() {
        let registry = registry();
        assert!(matches!(
            registry.enable("ghost").await,
            Err(PluginError::NotFound { .. })
        ));
        assert!(registry.disable("ghost").await.is_err());
        assert!(registry.unregister("ghost").await.is_err());
        assert!(registry.reload("ghost").await.is_err());
    }

    #[tokio::test]
    async fn enable_and_disable_are_idempotent() {
        let registry = registry();
        registry
            .register(PluginManifest::new("a", "A", "1.0.0"))
            .await
            .unwrap();

        registry.disable("a").await.unwrap();
        assert_eq!(registry.status("a"), Some(PluginStatus::Installed));

        registry.enable("a").await.unwrap();
        registry.enable("a").await.unwrap();
        assert!(registry.is_enabled("a"));
    }

    #[tokio::test]
    async fn system_version_window_is_enforced() {
        let registry = registry();
        let manifest = PluginManifest {
            min_system_version: Some("2.0.0".into()),
            ..PluginManifest::new("future", "Future", "1.0.0")
        };

        let err = registry.register(manifest).await.unwrap_err();
        assert!(matches!(err, PluginError::IncompatibleSystem { .. }));
        assert!(!registry.is_registered("future"));
    }

    #[tokio::test]
    async fn unregister_removes_hooks() {
        let registry = registry();
        registry
            .register(PluginManifest::new("a", "A", "1.0.0").with_hook("render"))
            .await
            .unwrap();
        assert_eq!(registry.hooks().handler_count("render"), 1);

        registry.enable("a").await.unwrap();
        registry.unregister("a").await.unwrap();
        assert!(!registry.is_registered("a"));
        assert!(!registry.hooks().has_hook("render"));
    }

    #[tokio::test]
    async fn metrics_track_registered_plugins() {
        let registry = registry();
        registry
            .register(PluginManifest::new("a", "A", "1.0.0"))
            .await
            .unwrap();
        registry.enable("a").await.unwrap();

        assert_eq!(registry.metrics().registered_plugins.get(), 1);
        assert_eq!(registry.metrics().enabled_plugins.get(), 1);
        assert!(registry.metrics().encode().contains("plugin_transitions_total"));
    }
}
