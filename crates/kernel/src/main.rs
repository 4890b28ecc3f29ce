//! Hookwork host daemon
//!
//! Loads the marketplace catalog and local plugin manifests, enables the
//! configured plugins and checks for updates until interrupted.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use hookwork_kernel::config::Config;
use hookwork_kernel::events::EventBus;
use hookwork_kernel::marketplace::{JsonFileSource, Marketplace};
use hookwork_kernel::plugin::{PluginManifest, PluginRegistry, UpdateChecker};

/// Suffix of manifest files in the manifest directory.
const MANIFEST_SUFFIX: &str = ".plugin.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Hookwork host");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        system_version = %config.system_version,
        manifest_dir = %config.manifest_dir.display(),
        "Configuration loaded"
    );

    let marketplace = match &config.catalog_path {
        Some(path) => {
            let marketplace = Marketplace::with_source(Arc::new(JsonFileSource::new(path)));
            marketplace
                .refresh()
                .await
                .with_context(|| format!("failed to load catalog {}", path.display()))?;
            marketplace
        }
        None => Marketplace::new(),
    };
    info!(listings = marketplace.len(), "Marketplace ready");

    let events = EventBus::new(config.event_capacity);
    spawn_event_logger(&events);

    let registry = Arc::new(
        PluginRegistry::new(Arc::new(marketplace))
            .with_events(events)
            .with_system_version(config.system_version.clone()),
    );

    let manifests = load_manifests(&config.manifest_dir)?;
    register_local(&registry, manifests).await;

    if !config.enabled_plugins.is_empty() {
        match registry.enable_all(&config.enabled_plugins).await {
            Ok(order) => info!(plugins = ?order, "Plugins enabled"),
            Err(e) => warn!(error = %e, "failed to enable configured plugins"),
        }
    }

    let stats = registry.stats();
    info!(
        total = stats.total,
        enabled = stats.enabled,
        errors = stats.error,
        "Plugins loaded"
    );

    let checker = UpdateChecker::new(Arc::clone(&registry))
        .with_interval(config.update_interval)
        .with_auto_update(config.auto_update)
        .spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutting down");
    checker.stop().await;

    for id in registry.enabled_ids() {
        if let Err(e) = registry.disable(&id).await {
            warn!(plugin = %id, error = %e, "failed to disable plugin during shutdown");
        }
    }

    Ok(())
}

/// Read every manifest file in `dir`, sorted by file name.
///
/// A missing directory yields no manifests; unparseable files are skipped.
fn load_manifests(dir: &Path) -> Result<Vec<PluginManifest>> {
    if !dir.exists() {
        debug!(dir = %dir.display(), "manifest directory does not exist");
        return Ok(Vec::new());
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read manifest directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(MANIFEST_SUFFIX))
        })
        .collect();
    paths.sort();

    let mut manifests = Vec::with_capacity(paths.len());
    for path in paths {
        match PluginManifest::parse(&path) {
            Ok(manifest) => manifests.push(manifest),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping invalid manifest"),
        }
    }
    Ok(manifests)
}

/// Register local manifests, holding back each one until the local
/// manifests it depends on have been attempted.
async fn register_local(registry: &PluginRegistry, manifests: Vec<PluginManifest>) {
    let mut pending_ids: HashSet<String> = manifests.iter().map(|m| m.id.clone()).collect();
    let mut pending = manifests;

    while !pending.is_empty() {
        let (ready, waiting): (Vec<_>, Vec<_>) = pending.into_iter().partition(|m| {
            m.dependencies
                .keys()
                .all(|dep| registry.is_registered(dep) || !pending_ids.contains(dep))
        });

        if ready.is_empty() {
            let ids: Vec<_> = waiting.iter().map(|m| m.id.as_str()).collect();
            warn!(plugins = ?ids, "local manifests depend on each other in a cycle");
            break;
        }

        for manifest in ready {
            let id = manifest.id.clone();
            if let Err(e) = registry.register(manifest).await {
                warn!(plugin = %id, error = %e, "failed to register plugin");
            }
            pending_ids.remove(&id);
        }
        pending = waiting;
    }
}

/// Log every runtime event at debug level.
fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => debug!(event = event.name(), payload = ?event, "runtime event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
