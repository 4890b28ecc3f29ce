//! Hook dispatcher - invokes handlers in registration order.
//!
//! Handlers run one after another, never concurrently. A failing handler is
//! logged and recorded as a [`HookFailure`]; the remaining handlers still
//! run. Acting on failures (disabling the owner) is the caller's job.

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error};

use super::registry::{HookId, RegisteredHandler};
use crate::metrics::Metrics;

/// Output of one successful handler.
#[derive(Debug, Clone, PartialEq)]
pub struct HookResult {
    pub owner: Option<String>,
    pub output: Value,
}

/// A handler that returned an error.
#[derive(Debug, Clone, PartialEq)]
pub struct HookFailure {
    pub handler: HookId,
    pub owner: Option<String>,
    pub error: String,
}

/// Everything a dispatch produced, in handler order.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Non-empty results of successful handlers.
    pub results: Vec<HookResult>,
    pub failures: Vec<HookFailure>,
    /// Number of handlers invoked.
    pub invoked: usize,
}

impl DispatchOutcome {
    /// First successful result, if any.
    pub fn first(&self) -> Option<&Value> {
        self.results.first().map(|r| &r.output)
    }
}

/// Invoke each handler in order with `data`.
pub async fn dispatch(
    hook: &str,
    data: &Value,
    handlers: &[RegisteredHandler],
    metrics: Option<&Metrics>,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();

    if handlers.is_empty() {
        debug!(hook = %hook, "no handlers registered for hook");
        return outcome;
    }

    for registered in handlers {
        let owner = registered.owner.as_deref().unwrap_or("host");
        let started = Instant::now();
        let result = registered.handler.call(hook, data).await;
        outcome.invoked += 1;

        if let Some(metrics) = metrics {
            metrics.record_hook(owner, hook, started.elapsed().as_secs_f64(), result.is_ok());
        }

        match result {
            Ok(Some(output)) => outcome.results.push(HookResult {
                owner: registered.owner.clone(),
                output,
            }),
            Ok(None) => {}
            Err(e) => {
                error!(
                    plugin = %owner,
                    hook = %hook,
                    error = %e,
                    "hook handler failed"
                );
                outcome.failures.push(HookFailure {
                    handler: registered.id,
                    owner: registered.owner.clone(),
                    error: format!("{e:#}"),
                });
            }
        }
    }

    debug!(
        hook = %hook,
        handlers = handlers.len(),
        results = outcome.results.len(),
        failures = outcome.failures.len(),
        "dispatch complete"
    );

    outcome
}
