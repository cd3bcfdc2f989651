//! Bridge configuration.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```
//! use otter_bridge::BridgeConfig;
//!
//! let config = BridgeConfig::from_json_str(r#"{"queues": {"script": {"name": "js"}}}"#).unwrap();
//! assert_eq!(config.queues.script.name, "js");
//! assert!(config.buffer_calls_before_load);
//! ```

use crate::error::BridgeResult;
use crate::queue::QueueConfigurationSpec;
use serde::Deserialize;
use std::time::Duration;

/// Settings for one bridge
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Thread names and stack sizes for the three queues
    pub queues: QueueConfigurationSpec,

    /// Hold script calls made before the bundle runs and flush them after it.
    /// When false such calls are dropped with a warning.
    /// Default: true
    pub buffer_calls_before_load: bool,

    /// Let the default exception handler tear the bridge down on native failures.
    /// Default: true
    pub escalate_native_exceptions: bool,

    /// How long one attempt at a call lock waits before re-checking for teardown.
    /// Default: 5
    pub call_lock_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queues: QueueConfigurationSpec::default(),
            buffer_calls_before_load: true,
            escalate_native_exceptions: true,
            call_lock_timeout_ms: 5,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document, defaulting missing fields
    pub fn from_json_str(json: &str) -> BridgeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn queues(mut self, queues: QueueConfigurationSpec) -> Self {
        self.queues = queues;
        self
    }

    pub fn buffer_calls_before_load(mut self, buffer: bool) -> Self {
        self.buffer_calls_before_load = buffer;
        self
    }

    pub fn escalate_native_exceptions(mut self, escalate: bool) -> Self {
        self.escalate_native_exceptions = escalate;
        self
    }

    pub fn call_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.call_lock_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(BridgeConfig::from_json_str("{}").unwrap(), BridgeConfig::default());
    }

    #[test]
    fn test_partial_queue_spec() {
        let config = BridgeConfig::from_json_str(
            r#"{"queues": {"script": {"name": "js", "stack_size": 8388608}}, "call_lock_timeout_ms": 0}"#,
        )
        .unwrap();
        assert_eq!(config.queues.script.stack_size, Some(8 * 1024 * 1024));
        assert_eq!(config.queues.ui.name, "otter-ui");
        assert_eq!(config.call_lock_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn test_invalid_document() {
        let err = BridgeConfig::from_json_str("{\"buffer_calls_before_load\": 3}").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }
}
