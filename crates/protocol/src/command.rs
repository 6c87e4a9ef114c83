use crate::error::{RegistryError, Result};
use crate::MatchResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Score assigned to generic suggestions offered when nothing matched.
pub const SUGGESTION_SCORE: f32 = 0.1;

/// A registered action with example phrasings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub descriptions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// What resolving a command leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTarget<'a> {
    Navigate(&'a str),
    Action(&'a str),
    Chat,
}

impl Command {
    #[must_use]
    pub fn target(&self) -> CommandTarget<'_> {
        match (self.url.as_deref(), self.action.as_deref()) {
            (Some(url), _) => CommandTarget::Navigate(url),
            (None, Some(action)) => CommandTarget::Action(action),
            (None, None) => CommandTarget::Chat,
        }
    }

    /// Label first, then every example phrasing; the order the offline index is built in.
    pub fn phrases(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.label.as_str()).chain(self.descriptions.iter().map(String::as_str))
    }

    fn validate(&self) -> Result<()> {
        if self.descriptions.iter().all(|d| d.trim().is_empty()) {
            return Err(RegistryError::EmptyDescriptions(self.id.clone()));
        }
        if self.url.is_some() && self.action.is_some() {
            return Err(RegistryError::ConflictingTarget(self.id.clone()));
        }
        Ok(())
    }
}

/// Static, ordered table of known commands.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    commands: Vec<Command>,
    by_id: HashMap<String, usize>,
}

impl CommandRegistry {
    pub fn new(commands: Vec<Command>) -> Result<Self> {
        if commands.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut by_id = HashMap::with_capacity(commands.len());
        for (idx, command) in commands.iter().enumerate() {
            command.validate()?;
            if by_id.insert(command.id.clone(), idx).is_some() {
                return Err(RegistryError::DuplicateId(command.id.clone()));
            }
        }
        Ok(Self { commands, by_id })
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let commands: Vec<Command> = serde_json::from_str(raw)?;
        Self::new(commands)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Command> {
        self.by_id.get(id).map(|&idx| &self.commands[idx])
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Generic suggestions for the no-match outcome.
    ///
    /// Preferred ids that exist in the registry come first (unknown ids are skipped);
    /// the remainder is filled in registry order.
    #[must_use]
    pub fn suggestions(&self, preferred: &[String], count: usize) -> Vec<MatchResult> {
        let mut out: Vec<MatchResult> = Vec::with_capacity(count);
        let picked = preferred
            .iter()
            .filter(|id| self.contains(id))
            .map(String::as_str)
            .chain(self.commands.iter().map(|c| c.id.as_str()));
        for id in picked {
            if out.len() >= count {
                break;
            }
            if out.iter().any(|m| m.id == id) {
                continue;
            }
            out.push(MatchResult::new(id, SUGGESTION_SCORE));
        }
        out
    }
}

impl<'a> IntoIterator for &'a CommandRegistry {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}
