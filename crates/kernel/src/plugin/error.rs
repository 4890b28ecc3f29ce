//! Plugin runtime error types with clear, actionable messages.
//!
//! Every error names the plugin (and hook or dependency, where relevant) so
//! callers can surface the failure without extra context.

use std::fmt;

use thiserror::Error;

/// Errors returned by the registry, resolver and marketplace.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin id is not registered.
    #[error("plugin '{plugin}' is not registered")]
    NotFound { plugin: String },

    /// Plugin id is not present in the marketplace catalog.
    #[error("plugin '{plugin}' not found in marketplace")]
    NotInMarketplace { plugin: String },

    /// A plugin with the same id is already registered.
    #[error("plugin '{plugin}' is already registered")]
    AlreadyRegistered { plugin: String },

    /// A marketplace entry with the same id already exists.
    #[error("plugin '{plugin}' is already published")]
    AlreadyPublished { plugin: String },

    /// The manifest is malformed.
    #[error("plugin '{plugin}': invalid manifest: {details}")]
    InvalidManifest { plugin: String, details: String },

    /// The manifest requests a permission outside the allow-list.
    #[error("plugin '{plugin}': invalid permission '{permission}'. Valid permissions: {valid}")]
    InvalidPermission {
        plugin: String,
        permission: String,
        valid: String,
    },

    /// The host version is outside the plugin's supported window.
    #[error("plugin '{plugin}': requires system version {requirement}, running {system}")]
    IncompatibleSystem {
        plugin: String,
        requirement: String,
        system: String,
    },

    /// A dependency is neither registered nor available in the marketplace.
    #[error("Missing dependency: {dependency}@{range}")]
    MissingDependency { dependency: String, range: String },

    /// The dependency graph loops back on itself.
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    /// A dependency's version does not satisfy the declared range.
    #[error("Incompatible dependency version: {dependency}@{actual} (required: {range})")]
    IncompatibleVersion {
        dependency: String,
        actual: String,
        range: String,
    },

    /// Enabling requires each declared dependency to be enabled first.
    #[error("plugin '{plugin}': Dependency {dependency} is not enabled")]
    DependencyNotEnabled { plugin: String, dependency: String },

    /// A lifecycle callback failed.
    #[error("plugin '{plugin}': {phase} failed: {message}")]
    Lifecycle {
        plugin: String,
        phase: &'static str,
        message: String,
    },

    /// The state machine does not allow the requested move.
    #[error("plugin '{plugin}': cannot {action} while {status}")]
    InvalidTransition {
        plugin: String,
        action: &'static str,
        status: String,
    },

    /// A hook handler failed. Dispatch never returns this to its caller.
    #[error("plugin '{plugin}': hook '{hook}' failed: {message}")]
    Hook {
        plugin: String,
        hook: String,
        message: String,
    },

    /// A review was rejected.
    #[error("invalid review for '{plugin}': {details}")]
    InvalidReview { plugin: String, details: String },

    /// The catalog source could not be read.
    #[error("marketplace catalog error: {0}")]
    Catalog(#[from] anyhow::Error),
}

/// Result alias for runtime operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Taxonomy bucket for an error, used in logs and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    AlreadyExists,
    Validation,
    Dependency,
    Lifecycle,
    HookExecution,
    Catalog,
}

impl PluginError {
    pub fn not_found(plugin: impl Into<String>) -> Self {
        Self::NotFound {
            plugin: plugin.into(),
        }
    }

    pub fn invalid_manifest(plugin: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidManifest {
            plugin: plugin.into(),
            details: details.into(),
        }
    }

    /// Create an invalid permission error listing the allowed values.
    pub fn invalid_permission(
        plugin: impl Into<String>,
        permission: impl Into<String>,
        valid: &[&str],
    ) -> Self {
        Self::InvalidPermission {
            plugin: plugin.into(),
            permission: permission.into(),
            valid: valid.join(", "),
        }
    }

    /// Wrap a failed lifecycle callback.
    pub fn lifecycle(plugin: impl Into<String>, phase: &'static str, err: &anyhow::Error) -> Self {
        Self::Lifecycle {
            plugin: plugin.into(),
            phase,
            message: format!("{err:#}"),
        }
    }

    pub fn circular(path: &[String], closing: &str) -> Self {
        let mut cycle = path.join(" -> ");
        cycle.push_str(" -> ");
        cycle.push_str(closing);
        Self::CircularDependency { cycle }
    }

    /// Taxonomy bucket for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } | Self::NotInMarketplace { .. } => ErrorCategory::NotFound,
            Self::AlreadyRegistered { .. } | Self::AlreadyPublished { .. } => {
                ErrorCategory::AlreadyExists
            }
            Self::InvalidManifest { .. }
            | Self::InvalidPermission { .. }
            | Self::IncompatibleSystem { .. }
            | Self::InvalidReview { .. } => ErrorCategory::Validation,
            Self::MissingDependency { .. }
            | Self::CircularDependency { .. }
            | Self::IncompatibleVersion { .. }
            | Self::DependencyNotEnabled { .. } => ErrorCategory::Dependency,
            Self::Lifecycle { .. } | Self::InvalidTransition { .. } => ErrorCategory::Lifecycle,
            Self::Hook { .. } => ErrorCategory::HookExecution,
            Self::Catalog(_) => ErrorCategory::Catalog,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Validation => "validation",
            Self::Dependency => "dependency",
            Self::Lifecycle => "lifecycle",
            Self::HookExecution => "hook_execution",
            Self::Catalog => "catalog",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_permission_lists_valid_options() {
        let err = PluginError::invalid_permission("blog", "root", &["storage", "network"]);
        let msg = err.to_string();
        assert!(msg.contains("root"));
        assert!(msg.contains("storage, network"));
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn circular_error_shows_the_cycle() {
        let path = vec!["a".to_string(), "b".to_string()];
        let err = PluginError::circular(&path, "a");
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
        assert_eq!(err.category(), ErrorCategory::Dependency);
    }

    #[test]
    fn dependency_messages_match_contract() {
        let missing = PluginError::MissingDependency {
            dependency: "child".into(),
            range: "^1.0.0".into(),
        };
        assert_eq!(missing.to_string(), "Missing dependency: child@^1.0.0");

        let incompatible = PluginError::IncompatibleVersion {
            dependency: "child".into(),
            actual: "1.1.0".into(),
            range: "^1.2.0".into(),
        };
        assert_eq!(
            incompatible.to_string(),
            "Incompatible dependency version: child@1.1.0 (required: ^1.2.0)"
        );
    }

    #[test]
    fn lifecycle_error_keeps_callback_message() {
        let cause = anyhow::anyhow!("disk full");
        let err = PluginError::lifecycle("blog", "on_install", &cause);
        assert!(err.to_string().contains("on_install failed: disk full"));
        assert_eq!(err.category().to_string(), "lifecycle");
    }
}
