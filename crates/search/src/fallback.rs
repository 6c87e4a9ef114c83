use crate::fuzzy::distance_chars;
use intent_protocol::{CommandRegistry, MatchResult};
use once_cell::sync::OnceCell;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackOptions {
    /// Largest normalized distance that still counts as a match.
    pub threshold: f64,
    pub limit: usize,
}

impl Default for FallbackOptions {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            limit: 3,
        }
    }
}

struct SearchKey {
    chars: Vec<char>,
}

struct FallbackEntry {
    id: String,
    keys: Vec<SearchKey>,
}

/// Lexical matcher over every static command's label and descriptions.
///
/// The lowercased key table is built on the first search and reused afterwards.
pub struct FallbackMatcher {
    registry: Arc<CommandRegistry>,
    options: FallbackOptions,
    entries: OnceCell<Vec<FallbackEntry>>,
}

impl FallbackMatcher {
    #[must_use]
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self::with_options(registry, FallbackOptions::default())
    }

    #[must_use]
    pub fn with_options(registry: Arc<CommandRegistry>, options: FallbackOptions) -> Self {
        Self {
            registry,
            options,
            entries: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    fn entries(&self) -> &[FallbackEntry] {
        self.entries.get_or_init(|| {
            log::debug!(
                "Building fallback index over {} commands",
                self.registry.len()
            );
            self.registry
                .iter()
                .map(|command| FallbackEntry {
                    id: command.id.clone(),
                    keys: command
                        .phrases()
                        .map(|phrase| SearchKey {
                            chars: phrase.trim().to_lowercase().chars().collect(),
                        })
                        .filter(|key| !key.chars.is_empty())
                        .collect(),
                })
                .collect()
        })
    }

    /// Up to `limit` commands whose best key is within the distance threshold, scored
    /// `1 - distance`, best first; equal scores keep registry order.
    #[must_use]
    pub fn search(&self, text: &str) -> Vec<MatchResult> {
        let query: Vec<char> = text.trim().to_lowercase().chars().collect();
        if query.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = self
            .entries()
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                let best = entry
                    .keys
                    .iter()
                    .map(|key| distance_chars(&query, &key.chars))
                    .fold(f64::INFINITY, f64::min);
                (best <= self.options.threshold).then_some((idx, best))
            })
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(self.options.limit);

        let entries = self.entries();
        scored
            .into_iter()
            .map(|(idx, distance)| {
                #[allow(clippy::cast_possible_truncation)]
                let score = (1.0 - distance) as f32;
                MatchResult::new(entries[idx].id.clone(), score)
            })
            .collect()
    }
}
