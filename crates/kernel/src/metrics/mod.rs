//! Prometheus metrics collection.
//!
//! Provides plugin runtime metrics in Prometheus format.

use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Hook invocation labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HookLabels {
    pub plugin: String,
    pub hook: String,
}

/// Lifecycle transition labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    pub action: String,
    pub outcome: String,
}

/// Runtime metrics.
pub struct Metrics {
    registry: Registry,

    /// Hook handler invocations by plugin/hook.
    pub hook_invocations: Family<HookLabels, Counter>,

    /// Failed hook handler invocations by plugin/hook.
    pub hook_failures: Family<HookLabels, Counter>,

    /// Hook handler duration.
    pub hook_duration_seconds: Family<HookLabels, Histogram>,

    /// Lifecycle operations by action and outcome.
    pub transitions: Family<TransitionLabels, Counter>,

    /// Plugins disabled by crash isolation.
    pub crashes: Counter,

    /// Registered plugins gauge.
    pub registered_plugins: Gauge,

    /// Enabled plugins gauge.
    pub enabled_plugins: Gauge,

    /// Marketplace installs counter.
    pub marketplace_installs: Counter,
}

impl Metrics {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let hook_invocations = Family::<HookLabels, Counter>::default();
        registry.register(
            "hook_invocations_total",
            "Total hook handler invocations",
            hook_invocations.clone(),
        );

        let hook_failures = Family::<HookLabels, Counter>::default();
        registry.register(
            "hook_failures_total",
            "Hook handler invocations that returned an error",
            hook_failures.clone(),
        );

        let hook_duration_seconds = Family::<HookLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.0001, 2.0, 14))
        });
        registry.register(
            "hook_duration_seconds",
            "Hook handler duration in seconds",
            hook_duration_seconds.clone(),
        );

        let transitions = Family::<TransitionLabels, Counter>::default();
        registry.register(
            "plugin_transitions_total",
            "Plugin lifecycle operations by action and outcome",
            transitions.clone(),
        );

        let crashes = Counter::default();
        registry.register(
            "plugin_crashes_total",
            "Plugins disabled after a hook failure",
            crashes.clone(),
        );

        let registered_plugins = Gauge::default();
        registry.register(
            "plugins_registered",
            "Registered plugins",
            registered_plugins.clone(),
        );

        let enabled_plugins = Gauge::default();
        registry.register(
            "plugins_enabled",
            "Enabled plugins",
            enabled_plugins.clone(),
        );

        let marketplace_installs = Counter::default();
        registry.register(
            "marketplace_installs_total",
            "Plugins installed from the marketplace",
            marketplace_installs.clone(),
        );

        Self {
            registry,
            hook_invocations,
            hook_failures,
            hook_duration_seconds,
            transitions,
            crashes,
            registered_plugins,
            enabled_plugins,
            marketplace_installs,
        }
    }

    /// Record a hook handler invocation.
    pub fn record_hook(&self, plugin: &str, hook: &str, duration_secs: f64, ok: bool) {
        let labels = HookLabels {
            plugin: plugin.to_string(),
            hook: hook.to_string(),
        };

        self.hook_invocations.get_or_create(&labels).inc();
        self.hook_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
        if !ok {
            self.hook_failures.get_or_create(&labels).inc();
        }
    }

    /// Record a lifecycle operation.
    pub fn record_transition(&self, action: &str, ok: bool) {
        let labels = TransitionLabels {
            action: action.to_string(),
            outcome: if ok { "ok" } else { "error" }.to_string(),
        };
        self.transitions.get_or_create(&labels).inc();
    }

    pub fn record_crash(&self) {
        self.crashes.inc();
    }

    pub fn record_marketplace_install(&self) {
        self.marketplace_installs.inc();
    }

    /// Publish current plugin counts.
    pub fn set_plugin_counts(&self, registered: usize, enabled: usize) {
        self.registered_plugins
            .set(i64::try_from(registered).unwrap_or(i64::MAX));
        self.enabled_plugins
            .set(i64::try_from(enabled).unwrap_or(i64::MAX));
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Panics
    ///
    /// Panics if Prometheus metric encoding to a `String` buffer fails.
    /// The `fmt::Write` impl for `String` is infallible, and all metric
    /// labels use derived `EncodeLabelSet` impls that do not produce
    /// `fmt::Error`.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        // Prometheus encoding to String buffer is infallible
        #[allow(clippy::expect_used)]
        encode(&mut buffer, &self.registry).expect("encoding metrics");
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}
