use crate::command::CommandRegistry;
use crate::messages::LearnItem;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DYNAMIC_ID_PREFIX: &str = "dynamic/";

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid digits regex"));
static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>?").expect("valid markup regex"));
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid spaces regex"));

/// Only local admin targets are accepted: absolute-path relative URLs, `admin.php` pages,
/// or anything under `wp-admin`.
#[must_use]
pub fn is_safe_url(url: &str) -> bool {
    let url = url.trim();
    if url.is_empty() {
        return false;
    }
    url.starts_with('/') || url.starts_with("admin.php") || url.contains("wp-admin")
}

/// A command discovered from the host navigation at runtime. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicCommand {
    pub id: String,
    pub label: String,
    pub url: String,
    pub explanation: String,
}

impl DynamicCommand {
    /// Builds a command from a raw menu entry, dropping badge counters and markup.
    pub fn from_menu_item(raw_label: &str, url: &str) -> Option<Self> {
        let without_digits = DIGITS.replace_all(raw_label, "");
        let without_markup = MARKUP.replace_all(&without_digits, "");
        let label = SPACES.replace_all(without_markup.trim(), " ").into_owned();
        let url = url.trim();
        if label.is_empty() || !is_safe_url(url) {
            return None;
        }
        Some(Self {
            id: format!("{DYNAMIC_ID_PREFIX}{url}"),
            explanation: format!("Open the {label} page"),
            label,
            url: url.to_string(),
        })
    }

    #[must_use]
    pub fn learn_item(&self) -> LearnItem {
        LearnItem {
            id: self.id.clone(),
            label: self.label.clone(),
        }
    }
}

/// Session-scoped set of learned commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicVocabulary {
    commands: Vec<DynamicCommand>,
}

impl DynamicVocabulary {
    /// Learns `(label, url)` menu entries, keeping the first entry per label and skipping
    /// anything whose id would shadow a static command.
    pub fn learn_menu<'a, I>(registry: &CommandRegistry, items: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut commands: Vec<DynamicCommand> = Vec::new();
        for (raw_label, url) in items {
            let Some(command) = DynamicCommand::from_menu_item(raw_label, url) else {
                continue;
            };
            if registry.contains(&command.id) {
                continue;
            }
            if commands
                .iter()
                .any(|c| c.label == command.label || c.id == command.id)
            {
                continue;
            }
            commands.push(command);
        }
        Self { commands }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&DynamicCommand> {
        self.commands.iter().find(|c| c.id == id)
    }

    #[must_use]
    pub fn learn_items(&self) -> Vec<LearnItem> {
        self.commands.iter().map(DynamicCommand::learn_item).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DynamicCommand> {
        self.commands.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
