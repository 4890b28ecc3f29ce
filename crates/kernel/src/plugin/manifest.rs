//! Plugin manifests.
//!
//! A manifest is the unit exchanged with the marketplace and stored in
//! `{id}.plugin.toml` files on disk. It declares:
//! - id, name, version, description, author, entry point
//! - dependencies (other plugin ids with a version range)
//! - permissions (drawn from [`Permission`])
//! - hooks (extension points the plugin services)

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::error::{PluginError, PluginResult};
use super::version;

/// Declarative description of a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Unique plugin id.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Version (`MAJOR.MINOR.PATCH`, optional suffix).
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    /// Entry point reference handed to the [`PluginLoader`](super::PluginLoader).
    #[serde(default)]
    pub main: String,

    /// Plugin id → version range.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default)]
    pub permissions: Vec<String>,

    /// Hook names this plugin services through `handle_hook`.
    #[serde(default)]
    pub hooks: Vec<String>,

    /// Search keywords.
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_system_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_system_version: Option<String>,
}

/// Capabilities a plugin may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Storage,
    Network,
    Notifications,
    Analytics,
    Ui,
    Events,
    System,
    Filesystem,
    Clipboard,
}

/// Permission names accepted in manifests.
pub const KNOWN_PERMISSIONS: &[&str] = &[
    "storage",
    "network",
    "notifications",
    "analytics",
    "ui",
    "events",
    "system",
    "filesystem",
    "clipboard",
];

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Network => "network",
            Self::Notifications => "notifications",
            Self::Analytics => "analytics",
            Self::Ui => "ui",
            Self::Events => "events",
            Self::System => "system",
            Self::Filesystem => "filesystem",
            Self::Clipboard => "clipboard",
        }
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "storage" => Ok(Self::Storage),
            "network" => Ok(Self::Network),
            "notifications" => Ok(Self::Notifications),
            "analytics" => Ok(Self::Analytics),
            "ui" => Ok(Self::Ui),
            "events" => Ok(Self::Events),
            "system" => Ok(Self::System),
            "filesystem" => Ok(Self::Filesystem),
            "clipboard" => Ok(Self::Clipboard),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PluginManifest {
    /// Minimal manifest with the given identity.
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: String::new(),
            main: String::new(),
            dependencies: BTreeMap::new(),
            permissions: Vec::new(),
            hooks: Vec::new(),
            keywords: Vec::new(),
            min_system_version: None,
            max_system_version: None,
        }
    }

    /// Add a dependency on `id` matching `range`.
    pub fn with_dependency(mut self, id: impl Into<String>, range: impl Into<String>) -> Self {
        self.dependencies.insert(id.into(), range.into());
        self
    }

    pub fn with_hook(mut self, hook: impl Into<String>) -> Self {
        self.hooks.push(hook.into());
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission.as_str().to_string());
        self
    }

    /// Read and validate a TOML manifest file.
    pub fn parse(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plugin manifest: {}", path.display()))?;

        Self::parse_str(&content, path)
    }

    /// Parse and validate a TOML manifest.
    pub fn parse_str(content: &str, path: &Path) -> Result<Self> {
        let manifest: PluginManifest = toml::from_str(content)
            .with_context(|| format!("failed to parse plugin manifest TOML at {}", path.display()))?;

        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse and validate a JSON manifest.
    pub fn from_json(content: &str) -> Result<Self> {
        let manifest: PluginManifest =
            serde_json::from_str(content).context("failed to parse plugin manifest JSON")?;

        manifest.validate()?;
        Ok(manifest)
    }

    /// Check required fields, the version format and the permission allow-list.
    pub fn validate(&self) -> PluginResult<()> {
        let label = if self.id.is_empty() { "<unnamed>" } else { &self.id };

        if self.id.trim().is_empty() {
            return Err(PluginError::invalid_manifest(label, "empty 'id' field"));
        }
        if self.name.trim().is_empty() {
            return Err(PluginError::invalid_manifest(label, "empty 'name' field"));
        }
        if self.version.trim().is_empty() {
            return Err(PluginError::invalid_manifest(label, "empty 'version' field"));
        }
        if !version::is_valid_version(&self.version) {
            return Err(PluginError::invalid_manifest(
                label,
                format!("version '{}' is not MAJOR.MINOR.PATCH", self.version),
            ));
        }

        for permission in &self.permissions {
            if Permission::from_str(permission).is_err() {
                return Err(PluginError::invalid_permission(
                    label,
                    permission,
                    KNOWN_PERMISSIONS,
                ));
            }
        }

        if let Some(dep) = self.dependencies.keys().find(|dep| **dep == self.id) {
            return Err(PluginError::circular(std::slice::from_ref(&self.id), dep));
        }

        Ok(())
    }

    /// Check the plugin supports the running host version.
    pub fn check_system_version(&self, system: &str) -> PluginResult<()> {
        let min = self.min_system_version.as_deref();
        let max = self.max_system_version.as_deref();

        if version::within_window(system, min, max) {
            return Ok(());
        }

        Err(PluginError::IncompatibleSystem {
            plugin: self.id.clone(),
            requirement: format!("{}..={}", min.unwrap_or("*"), max.unwrap_or("*")),
            system: system.to_string(),
        })
    }

    /// Declared permissions. Unknown names are skipped; `validate` rejects them.
    pub fn granted_permissions(&self) -> BTreeSet<Permission> {
        self.permissions
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect()
    }

    pub fn declares_hook(&self, hook: &str) -> bool {
        self.hooks.iter().any(|h| h == hook)
    }

    pub fn depends_on(&self, id: &str) -> bool {
        self.dependencies.contains_key(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_manifest() {
        let toml = r#"
id = "blog"
name = "Blog"
description = "Provides a blog"
version = "1.0.0"
author = "Hookwork"
main = "blog.wasm"
permissions = ["storage", "ui"]
hooks = ["content:render", "analytics:track"]
minSystemVersion = "1.0.0"

[dependencies]
markdown = "^1.2.0"
"#;

        let manifest = PluginManifest::parse_str(toml, Path::new("blog.plugin.toml")).unwrap();
        assert_eq!(manifest.id, "blog");
        assert_eq!(manifest.dependencies.get("markdown").unwrap(), "^1.2.0");
        assert_eq!(manifest.hooks.len(), 2);
        assert!(manifest.declares_hook("analytics:track"));
        assert_eq!(manifest.min_system_version.as_deref(), Some("1.0.0"));
        assert!(manifest.granted_permissions().contains(&Permission::Storage));
    }

    #[test]
    fn parse_minimal_manifest() {
        let toml = r#"
id = "minimal"
name = "Minimal"
version = "0.1.0"
"#;

        let manifest = PluginManifest::parse_str(toml, Path::new("test.toml")).unwrap();
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.hooks.is_empty());
        assert!(manifest.permissions.is_empty());
    }

    #[test]
    fn parse_json_manifest() {
        let json = r#"{
            "id": "charts",
            "name": "Charts",
            "version": "2.1.0",
            "description": "Charting",
            "author": "someone",
            "main": "index.js",
            "dependencies": {"core-ui": "^2.0.0"},
            "maxSystemVersion": "3.0.0"
        }"#;

        let manifest = PluginManifest::from_json(json).unwrap();
        assert_eq!(manifest.max_system_version.as_deref(), Some("3.0.0"));
        assert!(manifest.depends_on("core-ui"));
    }

    #[test]
    fn reject_unknown_permission() {
        let manifest = PluginManifest::new("bad", "Bad", "1.0.0");
        let manifest = PluginManifest {
            permissions: vec!["root".into()],
            ..manifest
        };

        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, PluginError::InvalidPermission { .. }));
        assert!(err.to_string().contains("Valid permissions"));
    }

    #[test]
    fn reject_empty_name() {
        let manifest = PluginManifest::new("test", "", "1.0.0");
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("empty 'name'"));
    }

    #[test]
    fn reject_bad_version() {
        for version in ["", "1.0", "one.two.three"] {
            let manifest = PluginManifest::new("test", "Test", version);
            assert!(manifest.validate().is_err(), "accepted {version:?}");
        }
    }

    #[test]
    fn reject_self_dependency() {
        let manifest = PluginManifest::new("loop", "Loop", "1.0.0").with_dependency("loop", "^1.0.0");
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, PluginError::CircularDependency { .. }));
    }

    #[test]
    fn system_window_is_checked() {
        let manifest = PluginManifest {
            min_system_version: Some("2.0.0".into()),
            ..PluginManifest::new("new", "New", "1.0.0")
        };

        assert!(manifest.check_system_version("2.3.0").is_ok());
        let err = manifest.check_system_version("1.9.0").unwrap_err();
        assert!(matches!(err, PluginError::IncompatibleSystem { .. }));
    }
}
