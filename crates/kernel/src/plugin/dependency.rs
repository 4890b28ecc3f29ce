//! Plugin dependency resolution.
//!
//! Two entry points:
//! - [`resolve_dependencies`] walks a manifest's dependency graph before
//!   registration, detecting cycles and version mismatches and planning
//!   which missing dependencies to install from the marketplace.
//! - [`resolve_load_order`] orders already-registered plugins so that
//!   dependencies come before dependents (Kahn's algorithm).

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::debug;

use super::error::{PluginError, PluginResult};
use super::manifest::PluginManifest;
use super::version;

/// Step of the iterative depth-first walk.
enum Step {
    /// Check a plugin's dependencies. `path` holds the root and every
    /// ancestor of this plugin, owned per branch.
    Visit {
        manifest: PluginManifest,
        path: Vec<String>,
    },
    /// All dependencies of the plugin have been planned.
    Leave { manifest: PluginManifest },
}

/// Plan the installs needed before `root` can be registered.
///
/// `installed` holds the manifests of registered plugins; `lookup` fetches
/// a manifest from the marketplace. Returns the manifests to install,
/// dependencies first. Nothing is returned for dependencies that are
/// already registered.
///
/// # Errors
/// - `CircularDependency` if any dependency leads back to a plugin on the
///   current path, including the root
/// - `MissingDependency` if a dependency is neither registered nor listed
/// - `IncompatibleVersion` if a dependency's version does not satisfy its range
pub fn resolve_dependencies<F>(
    root: &PluginManifest,
    installed: &HashMap<String, PluginManifest>,
    lookup: F,
) -> PluginResult<Vec<PluginManifest>>
where
    F: Fn(&str) -> Option<PluginManifest>,
{
    let mut plan = Vec::new();
    let mut planned: HashMap<String, PluginManifest> = HashMap::new();
    let mut explored: HashSet<String> = HashSet::new();
    let mut in_plan: HashSet<String> = HashSet::new();

    let mut stack = vec![Step::Visit {
        manifest: root.clone(),
        path: vec![root.id.clone()],
    }];

    while let Some(step) = stack.pop() {
        let (manifest, path) = match step {
            Step::Leave { manifest } => {
                // A planned id can be left more than once when several
                // branches reach it; only the first leave places it.
                if planned.contains_key(&manifest.id) && in_plan.insert(manifest.id.clone()) {
                    debug!(plugin = %root.id, dependency = %manifest.id, "planned dependency install");
                    plan.push(manifest.clone());
                }
                explored.insert(manifest.id);
                continue;
            }
            Step::Visit { manifest, path } => (manifest, path),
        };

        let mut children = Vec::with_capacity(manifest.dependencies.len());

        for (dep, range) in &manifest.dependencies {
            if path.iter().any(|p| p == dep) {
                return Err(PluginError::circular(&path, dep));
            }

            let candidate = if let Some(existing) = installed.get(dep) {
                existing.clone()
            } else if let Some(pending) = planned.get(dep) {
                pending.clone()
            } else {
                let Some(listed) = lookup(dep) else {
                    return Err(PluginError::MissingDependency {
                        dependency: dep.clone(),
                        range: range.clone(),
                    });
                };
                if listed.depends_on(&root.id) {
                    let mut cycle = path.clone();
                    cycle.push(dep.clone());
                    return Err(PluginError::circular(&cycle, &root.id));
                }
                planned.insert(dep.clone(), listed.clone());
                listed
            };

            if !version::is_compatible(&candidate.version, range) {
                return Err(PluginError::IncompatibleVersion {
                    dependency: dep.clone(),
                    actual: candidate.version.clone(),
                    range: range.clone(),
                });
            }

            if !explored.contains(dep) {
                children.push(candidate);
            }
        }

        stack.push(Step::Leave { manifest });

        // Reverse so dependencies are visited in declaration order.
        for child in children.into_iter().rev() {
            let mut child_path = path.clone();
            child_path.push(child.id.clone());
            stack.push(Step::Visit {
                manifest: child,
                path: child_path,
            });
        }
    }

    Ok(plan)
}

/// Resolve plugin load order based on dependencies.
///
/// Returns plugin ids sorted so that dependencies come before dependents.
/// Ties are broken alphabetically.
///
/// # Errors
/// Returns error if:
/// - A plugin declares a dependency that isn't in `plugins`
/// - There is a circular dependency
pub fn resolve_load_order(plugins: &HashMap<String, PluginManifest>) -> PluginResult<Vec<String>> {
    // in_degree[p] = number of plugins that p depends on (that must load first)
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for id in plugins.keys() {
        in_degree.insert(id, 0);
        dependents.entry(id.as_str()).or_default();
    }

    for (id, manifest) in plugins {
        for (dep, range) in &manifest.dependencies {
            if !plugins.contains_key(dep) {
                return Err(PluginError::MissingDependency {
                    dependency: dep.clone(),
                    range: range.clone(),
                });
            }

            // id depends on dep, so dep must load first
            if let Some(degree) = in_degree.get_mut(id.as_str()) {
                *degree += 1;
            }
            dependents.entry(dep.as_str()).or_default().push(id);
        }
    }

    let mut result = Vec::with_capacity(plugins.len());
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut queue: VecDeque<&str> = VecDeque::new();

    loop {
        queue.extend(std::mem::take(&mut ready));
        let Some(plugin) = queue.pop_front() else {
            break;
        };
        result.push(plugin.to_string());

        // For each plugin that depends on this one, decrease its in_degree
        if let Some(deps) = dependents.get(plugin) {
            for dependent in deps {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }
    }

    if result.len() != plugins.len() {
        let loaded: HashSet<_> = result.iter().map(String::as_str).collect();
        let mut in_cycle: Vec<_> = plugins
            .keys()
            .filter(|k| !loaded.contains(k.as_str()))
            .cloned()
            .collect();
        in_cycle.sort();

        return Err(PluginError::CircularDependency {
            cycle: in_cycle.join(", "),
        });
    }

    Ok(result)
}
