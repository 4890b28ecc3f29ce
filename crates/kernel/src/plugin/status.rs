//! Plugin status tracking.
//!
//! Each registered plugin carries a [`PluginStatus`] that only moves along
//! the edges allowed by [`PluginStatus::apply`]:
//!
//! ```text
//! UNINSTALLED -register-> INSTALLED -enable-> ENABLED <-enable/disable-> DISABLED
//! any -begin update-> UPDATING -restore-> previous
//! any -fail-> ERROR
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{PluginError, PluginResult};
use super::lifecycle::Plugin;
use super::manifest::PluginManifest;

/// Lifecycle status of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginStatus {
    Uninstalled,
    Installed,
    Enabled,
    Disabled,
    Error,
    Updating,
}

/// A requested lifecycle move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Register,
    Enable,
    Disable,
    BeginUpdate,
    /// Leave `UPDATING` for the status held before the update began.
    Restore(PluginStatus),
    Fail,
    Uninstall,
}

impl Transition {
    fn verb(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::BeginUpdate => "update",
            Self::Restore(_) => "finish update",
            Self::Fail => "fail",
            Self::Uninstall => "uninstall",
        }
    }
}

impl PluginStatus {
    /// Compute the status reached by `transition`, or reject the move.
    pub fn apply(self, plugin: &str, transition: Transition) -> PluginResult<Self> {
        use PluginStatus::*;

        let next = match (self, transition) {
            (Uninstalled, Transition::Register) => Some(Installed),
            (Installed | Disabled | Error, Transition::Enable) => Some(Enabled),
            (Enabled | Error, Transition::Disable) => Some(Disabled),
            (Installed | Enabled | Disabled | Error, Transition::BeginUpdate) => Some(Updating),
            (Updating, Transition::Restore(previous)) if previous != Updating => Some(previous),
            (_, Transition::Fail) => Some(Error),
            (Installed | Enabled | Disabled | Error, Transition::Uninstall) => Some(Uninstalled),
            _ => None,
        };

        next.ok_or_else(|| PluginError::InvalidTransition {
            plugin: plugin.to_string(),
            action: transition.verb(),
            status: self.to_string(),
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninstalled => "uninstalled",
            Self::Installed => "installed",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Error => "error",
            Self::Updating => "updating",
        }
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plugin known to the registry.
#[derive(Clone)]
pub struct PluginRegistration {
    pub manifest: PluginManifest,
    pub status: PluginStatus,
    pub enabled: bool,
    /// Opaque plugin configuration.
    pub config: Value,
    pub installed_at: DateTime<Utc>,
    /// Registration order within the owning registry.
    pub sequence: u64,
    pub enabled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub(crate) plugin: Arc<dyn Plugin>,
}

impl PluginRegistration {
    pub(crate) fn new(
        manifest: PluginManifest,
        plugin: Arc<dyn Plugin>,
        sequence: u64,
    ) -> PluginResult<Self> {
        let status = PluginStatus::Uninstalled.apply(&manifest.id, Transition::Register)?;
        let now = Utc::now();

        Ok(Self {
            manifest,
            status,
            enabled: false,
            config: Value::Object(serde_json::Map::new()),
            installed_at: now,
            sequence,
            enabled_at: None,
            updated_at: now,
            last_error: None,
            plugin,
        })
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    /// Apply a transition, keeping the enabled flag in step with the status.
    pub(crate) fn transition(&mut self, transition: Transition) -> PluginResult<PluginStatus> {
        let next = self.status.apply(&self.manifest.id, transition)?;
        let now = Utc::now();

        match next {
            PluginStatus::Enabled => {
                self.enabled = true;
                self.enabled_at = Some(now);
                self.last_error = None;
            }
            PluginStatus::Disabled | PluginStatus::Uninstalled => self.enabled = false,
            _ => {}
        }

        self.status = next;
        self.updated_at = now;
        Ok(next)
    }

    /// Record a failed callback and move to `ERROR`.
    pub(crate) fn fail(&mut self, error: &PluginError) {
        self.last_error = Some(error.to_string());
        self.status = PluginStatus::Error;
        self.updated_at = Utc::now();
    }
}

impl fmt::Debug for PluginRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistration")
            .field("id", &self.manifest.id)
            .field("version", &self.manifest.version)
            .field("status", &self.status)
            .field("enabled", &self.enabled)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

/// Snapshot of plugin counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub installed: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub error: usize,
    pub updating: usize,
}

impl RegistryStats {
    pub(crate) fn count(&mut self, status: PluginStatus) {
        self.total += 1;
        match status {
            PluginStatus::Installed => self.installed += 1,
            PluginStatus::Enabled => self.enabled += 1,
            PluginStatus::Disabled => self.disabled += 1,
            PluginStatus::Error => self.error += 1,
            PluginStatus::Updating => self.updating += 1,
            PluginStatus::Uninstalled => {}
        }
    }
}
