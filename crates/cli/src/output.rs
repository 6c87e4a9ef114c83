use intent_orchestrator::{LiveResults, Resolution};
use intent_pipeline::{PipelineSnapshot, PipelineState};
use intent_protocol::{CommandRegistry, CommandTarget, DynamicVocabulary, MatchResult};
use serde::Serialize;

/// A match joined with what the host needs to act on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ResolvedCommand {
    pub id: String,
    pub score: f32,
    pub label: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub explanation: String,
    pub target: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dynamic: bool,
}

impl ResolvedCommand {
    fn from_match(
        found: &MatchResult,
        registry: &CommandRegistry,
        vocabulary: &DynamicVocabulary,
    ) -> Option<Self> {
        if let Some(command) = registry.get(&found.id) {
            let (target, url, action) = match command.target() {
                CommandTarget::Navigate(url) => ("navigate", Some(url.to_string()), None),
                CommandTarget::Action(action) => ("action", None, Some(action.to_string())),
                CommandTarget::Chat => ("chat", None, None),
            };
            return Some(Self {
                id: command.id.clone(),
                score: found.score,
                label: command.label.clone(),
                explanation: command.explanation.clone(),
                target,
                url,
                action,
                dynamic: false,
            });
        }
        let learned = vocabulary.get(&found.id)?;
        Some(Self {
            id: learned.id.clone(),
            score: found.score,
            label: learned.label.clone(),
            explanation: learned.explanation.clone(),
            target: "navigate",
            url: Some(learned.url.clone()),
            action: None,
            dynamic: true,
        })
    }
}

pub(crate) fn resolve_all(
    matches: &[MatchResult],
    registry: &CommandRegistry,
    vocabulary: &DynamicVocabulary,
) -> Vec<ResolvedCommand> {
    matches
        .iter()
        .filter_map(|found| {
            let resolved = ResolvedCommand::from_match(found, registry, vocabulary);
            if resolved.is_none() {
                log::warn!("Match {} is not a known command; skipping", found.id);
            }
            resolved
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub(crate) struct ResolveOutput {
    pub query: String,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub pipeline: PipelineState,
    pub loading_progress: u8,
    pub commands: Vec<ResolvedCommand>,
}

impl ResolveOutput {
    pub(crate) fn new(
        query: &str,
        resolution: &Resolution,
        snapshot: &PipelineSnapshot,
        registry: &CommandRegistry,
        vocabulary: &DynamicVocabulary,
    ) -> Self {
        let message = match resolution {
            Resolution::NotUnderstood { message, .. } => Some(message.clone()),
            Resolution::WarmingUp { state, .. } => Some(format!(
                "Still warming up ({}); showing quick matches",
                state.as_str()
            )),
            _ => None,
        };
        Self {
            query: query.to_string(),
            outcome: resolution.kind(),
            message,
            pipeline: snapshot.state,
            loading_progress: snapshot.loading_progress,
            commands: resolve_all(resolution.matches(), registry, vocabulary),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct LiveOutput {
    pub generation: u64,
    pub query: String,
    pub commands: Vec<ResolvedCommand>,
}

impl LiveOutput {
    pub(crate) fn new(
        live: &LiveResults,
        registry: &CommandRegistry,
        vocabulary: &DynamicVocabulary,
    ) -> Self {
        Self {
            generation: live.generation,
            query: live.query.clone(),
            commands: resolve_all(&live.matches, registry, vocabulary),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusOutput {
    #[serde(flatten)]
    pub snapshot: PipelineSnapshot,
    pub stuck: bool,
    pub registry_commands: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use intent_protocol::DynamicCommand;
    use pretty_assertions::assert_eq;

    fn registry() -> CommandRegistry {
        CommandRegistry::from_json_str(
            r#"[
                {"id":"core/add-new-post","label":"Create a new post","descriptions":["new post"],"url":"post-new.php"},
                {"id":"wapuu/tell-joke","label":"Tell a joke","descriptions":["make me laugh"],"action":"joke"}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn matches_are_joined_with_their_commands() {
        let registry = registry();
        let vocabulary = DynamicVocabulary::learn_menu(&registry, [("Tools", "/wp-admin/tools.php")]);
        let matches = vec![
            MatchResult::new("wapuu/tell-joke", 0.9),
            MatchResult::new("dynamic//wp-admin/tools.php", 0.8),
            MatchResult::new("core/removed", 0.7),
            MatchResult::new("core/add-new-post", 0.6),
        ];

        let resolved = resolve_all(&matches, &registry, &vocabulary);
        let targets: Vec<(&str, &str)> = resolved.iter().map(|r| (r.id.as_str(), r.target)).collect();
        assert_eq!(
            targets,
            vec![
                ("wapuu/tell-joke", "action"),
                ("dynamic//wp-admin/tools.php", "navigate"),
                ("core/add-new-post", "navigate"),
            ]
        );
        assert!(resolved[1].dynamic);
        assert_eq!(resolved[2].url.as_deref(), Some("post-new.php"));
    }

    #[test]
    fn static_commands_omit_the_dynamic_flag() {
        let registry = registry();
        let vocabulary = DynamicVocabulary::default();
        let resolved = resolve_all(&[MatchResult::new("core/add-new-post", 1.0)], &registry, &vocabulary);
        let json = serde_json::to_value(&resolved[0]).unwrap();
        assert!(json.get("dynamic").is_none());
        assert_eq!(json["target"], "navigate");

        let learned = DynamicCommand::from_menu_item("Tools", "/wp-admin/tools.php").unwrap();
        assert_eq!(learned.id, "dynamic//wp-admin/tools.php");
    }
}
