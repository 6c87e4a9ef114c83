use anyhow::{Context as AnyhowContext, Result};
use intent_orchestrator::{OrchestratorConfig, QueryOrchestrator, Resolution};
use intent_pipeline::{LocalAssetLoader, Pipeline, PipelineConfig, PipelineSnapshot};
use intent_protocol::{CommandRegistry, DynamicVocabulary};
use intent_search::FallbackMatcher;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::output::ResolveOutput;

/// Registry compiled into the binary; used unless `INTENT_REGISTRY` points elsewhere.
pub(crate) const BUNDLED_REGISTRY: &str = include_str!("../assets/commands.json");

pub(crate) fn load_registry() -> Result<Arc<CommandRegistry>> {
    let registry = match env::var_os("INTENT_REGISTRY") {
        Some(path) => {
            let path = Path::new(&path);
            CommandRegistry::load(path)
                .with_context(|| format!("Failed to load command registry {}", path.display()))?
        }
        None => CommandRegistry::from_json_str(BUNDLED_REGISTRY)
            .context("Bundled command registry is invalid")?,
    };
    Ok(Arc::new(registry))
}

#[derive(Debug, Deserialize)]
struct MenuItem {
    label: String,
    url: String,
}

async fn load_menu(registry: &CommandRegistry, path: &Path) -> Result<DynamicVocabulary> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read menu {}", path.display()))?;
    let items: Vec<MenuItem> = serde_json::from_str(&raw)
        .with_context(|| format!("Menu {} is not a JSON array of {{label, url}}", path.display()))?;
    let vocabulary = DynamicVocabulary::learn_menu(
        registry,
        items.iter().map(|item| (item.label.as_str(), item.url.as_str())),
    );
    log::info!(
        "Learned {} of {} menu entries from {}",
        vocabulary.len(),
        items.len(),
        path.display()
    );
    Ok(vocabulary)
}

/// A running pipeline plus everything needed to answer and describe queries.
pub(crate) struct Session {
    pub(crate) registry: Arc<CommandRegistry>,
    pub(crate) vocabulary: DynamicVocabulary,
    pub(crate) pipeline: Pipeline,
    pub(crate) orchestrator: QueryOrchestrator,
}

impl Session {
    pub(crate) async fn start(menu: Option<&Path>) -> Result<Self> {
        let registry = load_registry()?;
        let loader = LocalAssetLoader::from_env().context("Invalid embedding mode")?;
        let config = PipelineConfig::from_env();
        log::info!(
            "Starting pipeline ({} mode, index {}, model {})",
            loader.mode().as_str(),
            config.embeddings_location,
            config.model_location
        );
        let pipeline = Pipeline::start(config, Arc::new(loader));

        let vocabulary = match menu {
            Some(path) => load_menu(&registry, path).await?,
            None => DynamicVocabulary::default(),
        };
        if !vocabulary.is_empty() {
            pipeline
                .learn(vocabulary.learn_items())
                .await
                .context("Failed to hand menu entries to the pipeline")?;
        }

        let fallback = Arc::new(FallbackMatcher::new(Arc::clone(&registry)));
        let orchestrator = QueryOrchestrator::new(
            Arc::new(pipeline.clone()),
            fallback,
            OrchestratorConfig::default(),
        );

        Ok(Self {
            registry,
            vocabulary,
            pipeline,
            orchestrator,
        })
    }

    /// Waits until the pipeline is ready or has given up, bounded by `timeout`.
    pub(crate) async fn settle(&self, timeout: Duration) -> PipelineSnapshot {
        match tokio::time::timeout(timeout, self.pipeline.wait_until_settled()).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(err)) => {
                log::warn!("Pipeline stopped while booting: {err}");
                self.pipeline.snapshot()
            }
            Err(_) => {
                log::warn!("Pipeline did not settle within {}s", timeout.as_secs());
                self.pipeline.snapshot()
            }
        }
    }

    pub(crate) async fn resolve(&self, text: &str, context: Option<String>) -> ResolveOutput {
        let resolution: Resolution = self.orchestrator.submit(text, context).await;
        ResolveOutput::new(
            text,
            &resolution,
            &self.pipeline.snapshot(),
            &self.registry,
            &self.vocabulary,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intent_orchestrator::DEFAULT_SUGGESTION_IDS;

    #[test]
    fn bundled_registry_is_valid() {
        let registry = CommandRegistry::from_json_str(BUNDLED_REGISTRY).unwrap();
        assert!(registry.len() > 40);
        for id in DEFAULT_SUGGESTION_IDS {
            assert!(registry.contains(id), "missing suggestion {id}");
        }
    }

    #[tokio::test]
    async fn menu_entries_become_dynamic_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("menu.json");
        std::fs::write(
            &path,
            r#"[
                {"label":"Tools","url":"tools.php"},
                {"label":"Comments <span>3</span>","url":"/wp-admin/edit-comments.php"},
                {"label":"Evil","url":"https://example.com"}
            ]"#,
        )
        .unwrap();
        let registry = CommandRegistry::from_json_str(BUNDLED_REGISTRY).unwrap();
        let vocabulary = load_menu(&registry, &path).await.unwrap();
        let labels: Vec<&str> = vocabulary.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Comments"]);
    }
}
