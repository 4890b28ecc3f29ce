//! Runtime event stream.
//!
//! The registry publishes lifecycle, hook and update events on a broadcast
//! channel. Publishing never blocks and never fails: with no subscribers the
//! event is dropped, and slow subscribers observe `Lagged`.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// An event emitted by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum PluginEvent {
    #[serde(rename = "plugin:registered")]
    Registered { plugin: String, version: String },

    #[serde(rename = "plugin:unregistered")]
    Unregistered { plugin: String },

    #[serde(rename = "plugin:enabled")]
    Enabled { plugin: String },

    #[serde(rename = "plugin:disabled")]
    Disabled { plugin: String },

    /// A hook handler failed and the plugin was disabled.
    #[serde(rename = "plugin:crashed")]
    Crashed {
        plugin: String,
        hook: String,
        error: String,
    },

    #[serde(rename = "plugin:updated")]
    Updated {
        plugin: String,
        from: String,
        to: String,
    },

    #[serde(rename = "plugin:config:changed")]
    ConfigChanged { plugin: String },

    /// Disabling left enabled plugins whose dependency is now off.
    #[serde(rename = "plugin:dependents:warning")]
    DependentsWarning {
        plugin: String,
        dependents: Vec<String>,
    },

    /// A lifecycle callback failed.
    #[serde(rename = "plugin:error")]
    Error {
        plugin: String,
        phase: String,
        error: String,
    },

    #[serde(rename = "hook:error")]
    HookError {
        hook: String,
        plugin: Option<String>,
        error: String,
    },

    #[serde(rename = "plugin:marketplace:install:started")]
    InstallStarted { plugin: String },

    #[serde(rename = "plugin:marketplace:install:completed")]
    InstallCompleted { plugin: String, version: String },

    #[serde(rename = "plugin:update:available")]
    UpdateAvailable {
        plugin: String,
        installed: String,
        available: String,
    },

    #[serde(rename = "plugin:update:check:failed")]
    UpdateCheckFailed {
        plugin: Option<String>,
        error: String,
    },
}

impl PluginEvent {
    /// Canonical event name, as used in the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "plugin:registered",
            Self::Unregistered { .. } => "plugin:unregistered",
            Self::Enabled { .. } => "plugin:enabled",
            Self::Disabled { .. } => "plugin:disabled",
            Self::Crashed { .. } => "plugin:crashed",
            Self::Updated { .. } => "plugin:updated",
            Self::ConfigChanged { .. } => "plugin:config:changed",
            Self::DependentsWarning { .. } => "plugin:dependents:warning",
            Self::Error { .. } => "plugin:error",
            Self::HookError { .. } => "hook:error",
            Self::InstallStarted { .. } => "plugin:marketplace:install:started",
            Self::InstallCompleted { .. } => "plugin:marketplace:install:completed",
            Self::UpdateAvailable { .. } => "plugin:update:available",
            Self::UpdateCheckFailed { .. } => "plugin:update:check:failed",
        }
    }
}

/// Broadcast publisher for [`PluginEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PluginEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to every current subscriber.
    pub fn emit(&self, event: PluginEvent) {
        trace!(event = event.name(), "emit");
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn serialized_tag_matches_name() {
        let events = [
            PluginEvent::Registered {
                plugin: "p".into(),
                version: "1.0.0".into(),
            },
            PluginEvent::DependentsWarning {
                plugin: "p".into(),
                dependents: vec!["q".into()],
            },
            PluginEvent::InstallStarted { plugin: "p".into() },
            PluginEvent::HookError {
                hook: "h".into(),
                plugin: None,
                error: "boom".into(),
            },
        ];

        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.name());
        }
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(PluginEvent::Enabled { plugin: "p".into() });

        assert_eq!(rx.recv().await.unwrap(), PluginEvent::Enabled { plugin: "p".into() });
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.emit(PluginEvent::Disabled { plugin: "p".into() });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
