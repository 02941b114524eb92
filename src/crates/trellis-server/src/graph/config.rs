//! Run configuration handed to graphs
//!
//! Configs layer: assistant defaults, then thread config, then the caller's
//! per-run config, with `configurable` deep-merged across layers and later
//! layers overriding earlier ones.

use crate::utils::{deep_merge, shallow_merge};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arbitrary structured configuration with a `configurable` sub-mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnableConfig {
    /// Free-form tags propagated to the graph
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Recursion limit for graph execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursion_limit: Option<u32>,

    /// The configurable sub-mapping; deep-merged when configs layer
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub configurable: Map<String, Value>,

    /// Any further top-level config fields, kept as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunnableConfig {
    /// Config with only a `configurable` mapping
    pub fn from_configurable(configurable: Map<String, Value>) -> Self {
        Self {
            configurable,
            ..Default::default()
        }
    }

    /// Overlay `other` onto `self`: tags union, scalar fields override,
    /// `extra` shallow-merges, `configurable` deep-merges.
    pub fn merged_with(&self, other: &RunnableConfig) -> RunnableConfig {
        let mut merged = self.clone();
        for tag in &other.tags {
            if !merged.tags.contains(tag) {
                merged.tags.push(tag.clone());
            }
        }
        if other.recursion_limit.is_some() {
            merged.recursion_limit = other.recursion_limit;
        }
        shallow_merge(&mut merged.extra, &other.extra);
        deep_merge(&mut merged.configurable, &other.configurable);
        merged
    }

    /// Set one configurable key
    pub fn set_configurable(&mut self, key: impl Into<String>, value: Value) {
        self.configurable.insert(key.into(), value);
    }

    /// Read one configurable key as a string
    pub fn configurable_str(&self, key: &str) -> Option<&str> {
        self.configurable.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_with(configurable: Value) -> RunnableConfig {
        match configurable {
            Value::Object(map) => RunnableConfig::from_configurable(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_configurable_deep_merges() {
        let base = config_with(json!({"model": {"name": "a", "temp": 0.2}, "x": 1}));
        let overlay = config_with(json!({"model": {"temp": 0.9}, "y": 2}));
        let merged = base.merged_with(&overlay);
        assert_eq!(
            Value::Object(merged.configurable),
            json!({"model": {"name": "a", "temp": 0.9}, "x": 1, "y": 2})
        );
    }

    #[test]
    fn test_later_layer_wins() {
        let base = config_with(json!({"k": "assistant"}));
        let overlay = config_with(json!({"k": "user"}));
        assert_eq!(
            base.merged_with(&overlay).configurable_str("k"),
            Some("user")
        );
    }

    #[test]
    fn test_tags_union_and_scalars() {
        let mut base = RunnableConfig::default();
        base.tags = vec!["a".to_string()];
        base.recursion_limit = Some(10);

        let mut overlay = RunnableConfig::default();
        overlay.tags = vec!["a".to_string(), "b".to_string()];

        let merged = base.merged_with(&overlay);
        assert_eq!(merged.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(merged.recursion_limit, Some(10));
    }

    #[test]
    fn test_unknown_top_level_fields_round_trip() {
        let raw = json!({"configurable": {"x": 1}, "timeout": 30});
        let config: RunnableConfig = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(config.extra.get("timeout"), Some(&json!(30)));
        assert_eq!(serde_json::to_value(&config).unwrap(), raw);
    }
}
