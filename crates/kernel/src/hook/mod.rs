//! Hook system for plugin extension points.
//!
//! Hooks are named extension points that plugins service. When a hook is
//! executed, every enabled handler is called sequentially in registration
//! order; a handler that fails gets its owning plugin disabled without the
//! failure reaching the caller.

mod dispatcher;
mod registry;

pub use dispatcher::{DispatchOutcome, HookFailure, HookResult, dispatch};
pub use registry::{
    FnHandler, HookHandler, HookId, HookRegistry, PluginHookHandler, RegisteredHandler,
    handler_fn,
};
