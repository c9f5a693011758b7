//! Engine configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_debounce_window_ms() -> u64 {
    1000
}

/// Configuration for one conversation surface.
///
/// `mode` selects the generation behavior on the service side; everything the
/// mode needs beyond that travels as opaque `mode_options`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Generation mode routed to the service ("tutor", "quiz", ...).
    pub mode: String,

    /// Opaque mode-specific sub-configuration, forwarded with every
    /// generation request and persisted alongside the conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_options: Option<Value>,

    /// Quiet window for coalescing persistence writes.
    #[serde(default = "default_debounce_window_ms")]
    pub debounce_window_ms: u64,

    /// Optional grouping key attached when a conversation is first created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: "tutor".to_string(),
            mode_options: None,
            debounce_window_ms: default_debounce_window_ms(),
            grouping_id: None,
        }
    }
}

impl EngineConfig {
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            ..Default::default()
        }
    }

    pub fn with_mode_options(mut self, options: Value) -> Self {
        self.mode_options = Some(options);
        self
    }

    pub fn with_debounce_window_ms(mut self, window_ms: u64) -> Self {
        self.debounce_window_ms = window_ms;
        self
    }

    pub fn with_grouping_id(mut self, grouping_id: impl Into<String>) -> Self {
        self.grouping_id = Some(grouping_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_debounce_window() {
        let config = EngineConfig::new("tutor");
        assert_eq!(config.debounce_window_ms, 1000);
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"mode":"quiz"}"#).unwrap();
        assert_eq!(config.mode, "quiz");
        assert_eq!(config.debounce_window_ms, 1000);
        assert!(config.mode_options.is_none());
        assert!(config.grouping_id.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = EngineConfig::new("tutor")
            .with_debounce_window_ms(50)
            .with_grouping_id("course-7");
        assert_eq!(config.debounce_window_ms, 50);
        assert_eq!(config.grouping_id.as_deref(), Some("course-7"));
    }
}
