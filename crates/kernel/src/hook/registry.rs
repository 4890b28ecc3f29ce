//! Hook registry - indexes which handlers service which hooks.
//!
//! The registry maps hook names to handlers in registration order. Each
//! handler may be owned by a plugin; ownership decides which plugin is
//! disabled when the handler fails.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::plugin::Plugin;

/// Something that can service a hook.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Handle `hook` with `data`. `Ok(None)` contributes no result.
    async fn call(&self, hook: &str, data: &Value) -> Result<Option<Value>>;
}

/// Handle returned by [`HookRegistry::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(Uuid);

impl HookId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A registered handler with its owning plugin.
#[derive(Clone)]
pub struct RegisteredHandler {
    pub id: HookId,
    /// Owning plugin id; `None` for handlers registered by the host.
    pub owner: Option<String>,
    pub handler: Arc<dyn HookHandler>,
}

impl fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Registry mapping hook names to ordered handlers.
#[derive(Debug, Default)]
pub struct HookRegistry {
    handlers: RwLock<HashMap<String, Vec<RegisteredHandler>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to `hook`. Handlers run in registration order.
    pub fn register(
        &self,
        hook: &str,
        owner: Option<&str>,
        handler: Arc<dyn HookHandler>,
    ) -> HookId {
        let id = HookId::new();
        self.handlers
            .write()
            .entry(hook.to_string())
            .or_default()
            .push(RegisteredHandler {
                id,
                owner: owner.map(String::from),
                handler,
            });
        id
    }

    /// Remove one handler. Returns false if it was not registered.
    pub fn unregister(&self, hook: &str, id: HookId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(hook) else {
            return false;
        };

        let before = list.len();
        list.retain(|h| h.id != id);
        let removed = list.len() != before;

        if list.is_empty() {
            handlers.remove(hook);
        }
        removed
    }

    /// Remove every handler owned by `owner`. Returns how many were removed.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut handlers = self.handlers.write();
        let mut removed = 0;

        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|h| h.owner.as_deref() != Some(owner));
            removed += before - list.len();
        }
        handlers.retain(|_, list| !list.is_empty());

        removed
    }

    /// Snapshot of the handlers for a hook, in registration order.
    ///
    /// Returns an empty list if nothing services the hook.
    pub fn handlers(&self, hook: &str) -> Vec<RegisteredHandler> {
        self.handlers.read().get(hook).cloned().unwrap_or_default()
    }

    pub fn has_hook(&self, hook: &str) -> bool {
        self.handlers
            .read()
            .get(hook)
            .is_some_and(|handlers| !handlers.is_empty())
    }

    /// Registered hook names, sorted.
    pub fn hook_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn handler_count(&self, hook: &str) -> usize {
        self.handlers.read().get(hook).map(Vec::len).unwrap_or(0)
    }

    pub fn hook_count(&self) -> usize {
        self.handlers.read().len()
    }
}

/// Routes a hook to a plugin's `handle_hook`.
pub struct PluginHookHandler {
    plugin: Arc<dyn Plugin>,
}

impl PluginHookHandler {
    pub fn new(plugin: Arc<dyn Plugin>) -> Self {
        Self { plugin }
    }
}

#[async_trait]
impl HookHandler for PluginHookHandler {
    async fn call(&self, hook: &str, data: &Value) -> Result<Option<Value>> {
        self.plugin.handle_hook(hook, data).await
    }
}

/// Handler backed by a synchronous closure.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> HookHandler for FnHandler<F>
where
    F: Fn(&Value) -> Result<Option<Value>> + Send + Sync,
{
    async fn call(&self, _hook: &str, data: &Value) -> Result<Option<Value>> {
        (self.f)(data)
    }
}

/// Wrap a closure as a hook handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn HookHandler>
where
    F: Fn(&Value) -> Result<Option<Value>> + Send + Sync + 'static,
{
    Arc::new(FnHandler { f })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn HookHandler> {
        handler_fn(|_| Ok(None))
    }

    #[test]
    fn empty_registry() {
        let registry = HookRegistry::new();
        assert_eq!(registry.hook_count(), 0);
        assert!(!registry.has_hook("analytics:track"));
        assert!(registry.handlers("analytics:track").is_empty());
        assert_eq!(registry.handler_count("analytics:track"), 0);
    }

    #[test]
    fn handlers_keep_registration_order() {
        let registry = HookRegistry::new();
        let first = registry.register("render", Some("a"), noop());
        let second = registry.register("render", Some("b"), noop());
        let third = registry.register("render", None, noop());

        let ids: Vec<_> = registry.handlers("render").iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![first, second, third]);
    }

    #[test]
    fn unregister_single_handler() {
        let registry = HookRegistry::new();
        let id = registry.register("render", Some("a"), noop());
        registry.register("render", Some("b"), noop());

        assert!(registry.unregister("render", id));
        assert!(!registry.unregister("render", id));
        assert_eq!(registry.handler_count("render"), 1);
    }

    #[test]
    fn last_unregister_drops_the_hook() {
        let registry = HookRegistry::new();
        let id = registry.register("render", None, noop());
        registry.unregister("render", id);
        assert!(!registry.has_hook("render"));
        assert!(registry.hook_names().is_empty());
    }

    #[test]
    fn unregister_owner_removes_across_hooks() {
        let registry = HookRegistry::new();
        registry.register("render", Some("a"), noop());
        registry.register("track", Some("a"), noop());
        registry.register("track", Some("b"), noop());

        assert_eq!(registry.unregister_owner("a"), 2);
        assert_eq!(registry.hook_names(), vec!["track".to_string()]);
        assert_eq!(registry.handler_count("track"), 1);
    }
}
