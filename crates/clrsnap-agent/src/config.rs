//! Agent configuration.

use std::time::Duration;

use serde::Deserialize;

/// Per-process knobs. Nothing here persists; the controlling client
/// re-establishes breakpoints on restart.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    /// Member depth captured per variable.
    pub object_depth: i32,
    /// Array elements serialised per array.
    pub max_array_items: usize,
    /// Reference-following bound during materialisation.
    pub deref_depth: u32,
    /// Expression-tree depth bound.
    pub ast_depth: usize,
    /// Wall-clock budget for one managed evaluation, in seconds.
    pub eval_timeout_secs: u64,
    /// Whether non-auto property getters may be invoked.
    pub property_eval: bool,
    /// Stack frames captured per snapshot.
    pub max_stack_frames: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            object_depth: 5,
            max_array_items: 1000,
            deref_depth: 10,
            ast_depth: 25,
            eval_timeout_secs: 60,
            property_eval: true,
            max_stack_frames: 20,
        }
    }
}

impl AgentConfig {
    #[must_use]
    pub fn eval_timeout(&self) -> Duration {
        Duration::from_secs(self.eval_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_budgets() {
        let config = AgentConfig::default();
        assert_eq!(config.object_depth, 5);
        assert_eq!(config.max_array_items, 1000);
        assert_eq!(config.deref_depth, 10);
        assert_eq!(config.ast_depth, 25);
        assert_eq!(config.eval_timeout(), Duration::from_secs(60));
        assert!(config.property_eval);
    }

    #[test]
    fn partial_json_overrides_keep_other_defaults() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"objectDepth": 3, "propertyEval": false}"#).unwrap();
        assert_eq!(config.object_depth, 3);
        assert!(!config.property_eval);
        assert_eq!(config.max_array_items, 1000);
    }
}
