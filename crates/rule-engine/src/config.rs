//! Engine capacities.

use serde::Deserialize;

/// Fixed capacities for every bounded store in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Slots in the global entity pool.
    pub global_entities: u32,
    /// Slots in the scene entity pool.
    pub scene_entities: u32,
    /// Capacity of the global rule partition.
    pub global_rules: usize,
    /// Capacity of the scene rule partition.
    pub scene_rules: usize,
    /// Distinct selectors tracked at once.
    pub max_selectors: usize,
    /// Diagnostics retained for inspection.
    pub diagnostic_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global_entities: 256,
            scene_entities: 2048,
            global_rules: 64,
            scene_rules: 256,
            max_selectors: 512,
            diagnostic_history: 256,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config object; missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the text is not a valid config object.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Read overrides from `RULES_*` environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn read<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            default: T,
        ) -> T {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            global_entities: read(&lookup, "RULES_GLOBAL_ENTITIES", defaults.global_entities),
            scene_entities: read(&lookup, "RULES_SCENE_ENTITIES", defaults.scene_entities),
            global_rules: read(&lookup, "RULES_GLOBAL_RULES", defaults.global_rules),
            scene_rules: read(&lookup, "RULES_SCENE_RULES", defaults.scene_rules),
            max_selectors: read(&lookup, "RULES_MAX_SELECTORS", defaults.max_selectors),
            diagnostic_history: read(
                &lookup,
                "RULES_DIAGNOSTIC_HISTORY",
                defaults.diagnostic_history,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "sceneRules": 8 }"#).unwrap();
        assert_eq!(config.scene_rules, 8);
        assert_eq!(config.global_rules, EngineConfig::default().global_rules);
    }

    #[test]
    fn test_lookup_overrides_and_fallbacks() {
        let config = EngineConfig::from_lookup(|key| match key {
            "RULES_GLOBAL_RULES" => Some("3".into()),
            "RULES_SCENE_RULES" => Some("not a number".into()),
            _ => None,
        });
        assert_eq!(config.global_rules, 3);
        assert_eq!(config.scene_rules, EngineConfig::default().scene_rules);
    }
}
