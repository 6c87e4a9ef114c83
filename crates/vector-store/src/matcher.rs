use crate::index::EmbeddingEntry;
use intent_protocol::MatchResult;

/// Additive bonus for entries whose context equals the current UI context.
pub const CONTEXT_BOOST: f32 = 0.15;

pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const DEFAULT_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankOptions {
    pub threshold: f32,
    pub limit: usize,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// Cosine similarity; 0 for mismatched lengths or a zero-norm operand.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (x.mul_add(*y, dot), x.mul_add(*x, na), y.mul_add(*y, nb))
        });

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Best-of-N score of one entry: the maximum similarity over its phrasings.
fn entry_score(query: &[f32], entry: &EmbeddingEntry) -> f32 {
    entry
        .embeddings
        .iter()
        .map(|vector| cosine_similarity(query, vector))
        .reduce(f32::max)
        .unwrap_or(0.0)
}

/// Ranks entries against a query vector.
///
/// Entries scoring below `threshold` (after the context boost) are dropped; the rest are
/// sorted by score descending with ties kept in index order, then truncated to `limit`.
pub fn rank<'a, I>(
    query: &[f32],
    entries: I,
    context: Option<&str>,
    options: &RankOptions,
) -> Vec<MatchResult>
where
    I: IntoIterator<Item = &'a EmbeddingEntry>,
{
    let mut results: Vec<MatchResult> = entries
        .into_iter()
        .filter_map(|entry| {
            let mut score = entry_score(query, entry);
            if context.is_some() && entry.context.as_deref() == context {
                score += CONTEXT_BOOST;
            }
            (score >= options.threshold).then(|| MatchResult::new(entry.id.clone(), score))
        })
        .collect();

    // `sort_by` is stable, which keeps index order for equal scores.
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(options.limit);
    results
}
