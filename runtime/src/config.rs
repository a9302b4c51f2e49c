//! Runtime configuration recognized by the core.
//!
//! No file or environment loading lives here — that's process bootstrap,
//! out of scope per the top-level purpose statement. Callers build a
//! `RuntimeConfig` directly, the way `ForwarderConfig` is built from
//! already-parsed TOML rather than parsing living in `rt-protocol`.

use std::sync::Arc;

/// A generated-code-supplied extension to the per-call codec: additional
/// named encode/decode behavior for types the core's blanket
/// `EncodeValue`/`DecodeValue` impls don't reach. The core never calls
/// into this itself — it only threads the hook through to generated
/// `EncodeValue`/`DecodeValue` impls that ask for it via `RuntimeConfig`.
pub trait SerializersModuleExtension: Send + Sync {
    /// A stable name identifying this extension, for logging/diagnostics.
    fn name(&self) -> &str;

    /// Encodes `value` under `type_tag` if this extension recognizes it,
    /// falling through to the default codec on `None`.
    fn encode_extra(&self, type_tag: &str, value: &serde_json::Value) -> Option<serde_json::Value>;

    /// Decodes `payload` under `type_tag` if this extension recognizes
    /// it, falling through to the default codec on `None`.
    fn decode_extra(&self, type_tag: &str, payload: &serde_json::Value) -> Option<serde_json::Value>;
}

/// Backpressure policy for a `SharedHot` stream's broadcaster when a slow
/// subscriber falls behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Block the feeder until the slow subscriber catches up.
    Suspend,
    /// Drop the oldest buffered element to make room.
    DropOldest,
    /// Drop the newly produced element.
    DropLatest,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldest
    }
}

/// Configuration shared by client and server engines.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Replay buffer size for `SharedHot` streams. 0 means new subscribers
    /// see only elements produced after they subscribe.
    pub shared_flow_buffer: usize,
    /// Number of most-recent elements replayed to a fresh `SharedHot`
    /// subscriber on subscription.
    pub shared_flow_replay: usize,
    /// What happens when a `SharedHot` subscriber can't keep up.
    pub shared_flow_on_overflow: OverflowPolicy,
    /// Hook for extending the per-call codec with additional contextual
    /// serializers; the core never calls into this itself, it only carries
    /// it through to generated code that wants it.
    pub serializers_module_extension: Option<Arc<dyn SerializersModuleExtension>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shared_flow_buffer: 0,
            shared_flow_replay: 0,
            shared_flow_on_overflow: OverflowPolicy::default(),
            serializers_module_extension: None,
        }
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("shared_flow_buffer", &self.shared_flow_buffer)
            .field("shared_flow_replay", &self.shared_flow_replay)
            .field("shared_flow_on_overflow", &self.shared_flow_on_overflow)
            .field(
                "serializers_module_extension",
                &self.serializers_module_extension.is_some(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_zero_buffers_and_drop_oldest_policy() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.shared_flow_buffer, 0);
        assert_eq!(cfg.shared_flow_replay, 0);
        assert_eq!(cfg.shared_flow_on_overflow, OverflowPolicy::DropOldest);
        assert!(cfg.serializers_module_extension.is_none());
    }

    struct UpperCaseStrings;

    impl SerializersModuleExtension for UpperCaseStrings {
        fn name(&self) -> &str {
            "upper-case-strings"
        }

        fn encode_extra(&self, type_tag: &str, value: &serde_json::Value) -> Option<serde_json::Value> {
            if type_tag != "UpperCase" {
                return None;
            }
            value.as_str().map(|s| serde_json::Value::String(s.to_uppercase()))
        }

        fn decode_extra(&self, type_tag: &str, payload: &serde_json::Value) -> Option<serde_json::Value> {
            self.encode_extra(type_tag, payload)
        }
    }

    #[test]
    fn configured_extension_is_reachable_through_the_config() {
        let mut cfg = RuntimeConfig::default();
        cfg.serializers_module_extension = Some(Arc::new(UpperCaseStrings));
        let ext = cfg.serializers_module_extension.as_ref().unwrap();
        assert_eq!(ext.name(), "upper-case-strings");
        let encoded = ext.encode_extra("UpperCase", &serde_json::json!("hi")).unwrap();
        assert_eq!(encoded, serde_json::json!("HI"));
        assert!(ext.encode_extra("Other", &serde_json::json!("hi")).is_none());
    }
}
