//! Plugin system.
//!
//! This module handles:
//! - Parsing and validating plugin manifests
//! - Resolving dependencies and load order
//! - The registry that drives plugin lifecycles
//! - Checking the marketplace for updates

mod dependency;
mod error;
mod lifecycle;
mod manifest;
mod registry;
mod status;
mod updates;
mod version;

pub use dependency::{resolve_dependencies, resolve_load_order};
pub use error::{ErrorCategory, PluginError, PluginResult};
pub use lifecycle::{DeclarativeLoader, DeclarativePlugin, Plugin, PluginLoader};
pub use manifest::{KNOWN_PERMISSIONS, Permission, PluginManifest};
pub use registry::{DEFAULT_SYSTEM_VERSION, InstallOptions, PluginRegistry};
pub use status::{PluginRegistration, PluginStatus, RegistryStats, Transition};
pub use updates::{DEFAULT_CHECK_INTERVAL_SECS, UpdateChecker, UpdateCheckerHandle, UpdateInfo};
pub use version::{Version, is_compatible, is_valid_version, within_window};
