use std::time::Duration;

/// Commands offered when nothing matched.
pub const DEFAULT_SUGGESTION_IDS: &[&str] = &[
    "core/add-new-post",
    "core/open-media-library",
    "wapuu/tell-joke",
];

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Quiet time after the last keystroke before a live query is dispatched.
    pub live_debounce: Duration,
    pub suggestion_ids: Vec<String>,
    pub suggestion_count: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            live_debounce: Duration::from_millis(250),
            suggestion_ids: DEFAULT_SUGGESTION_IDS
                .iter()
                .map(ToString::to_string)
                .collect(),
            suggestion_count: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_offer_three_suggestions() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.suggestion_ids.len(), config.suggestion_count);
        assert_eq!(config.live_debounce, Duration::from_millis(250));
    }
}
