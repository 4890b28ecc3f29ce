//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::plugin::{DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_SYSTEM_VERSION};

/// Host configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON marketplace catalog. When None, the marketplace starts empty.
    pub catalog_path: Option<PathBuf>,

    /// Directory scanned for `*.plugin.toml` manifests (default: ./plugins).
    pub manifest_dir: PathBuf,

    /// Plugin ids to enable at startup (from HOOKWORK_ENABLED_PLUGINS).
    pub enabled_plugins: Vec<String>,

    /// Seconds between update checks (default: 3600).
    pub update_interval: Duration,

    /// Apply updates automatically (default: false).
    pub auto_update: bool,

    /// Host version checked against manifest system version windows.
    pub system_version: String,

    /// Event channel capacity (default: 256).
    pub event_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let catalog_path = env::var("HOOKWORK_CATALOG_PATH").ok().map(PathBuf::from);

        let manifest_dir = env::var("HOOKWORK_MANIFEST_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./plugins"));

        let enabled_plugins = env::var("HOOKWORK_ENABLED_PLUGINS")
            .map(|v| parse_list(&v))
            .unwrap_or_default();

        let update_interval_secs: u64 = env::var("HOOKWORK_UPDATE_INTERVAL_SECS")
            .unwrap_or_else(|_| DEFAULT_CHECK_INTERVAL_SECS.to_string())
            .parse()
            .context("HOOKWORK_UPDATE_INTERVAL_SECS must be a valid u64")?;
        if update_interval_secs == 0 {
            anyhow::bail!("HOOKWORK_UPDATE_INTERVAL_SECS must be greater than zero");
        }

        let auto_update = env::var("HOOKWORK_AUTO_UPDATE")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        let system_version = env::var("HOOKWORK_SYSTEM_VERSION")
            .unwrap_or_else(|_| DEFAULT_SYSTEM_VERSION.to_string());

        let event_capacity: usize = env::var("HOOKWORK_EVENT_CAPACITY")
            .unwrap_or_else(|_| DEFAULT_EVENT_CAPACITY.to_string())
            .parse()
            .context("HOOKWORK_EVENT_CAPACITY must be a valid usize")?;
        if event_capacity == 0 {
            anyhow::bail!("HOOKWORK_EVENT_CAPACITY must be greater than zero");
        }

        Ok(Self {
            catalog_path,
            manifest_dir,
            enabled_plugins,
            update_interval: Duration::from_secs(update_interval_secs),
            auto_update,
            system_version,
            event_capacity,
        })
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
