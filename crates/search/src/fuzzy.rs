/// Share of the distance that comes from edits; the rest penalises keys much longer
/// than the query so an exact label beats a phrase that merely contains it.
const EDIT_WEIGHT: f64 = 0.75;
const LENGTH_WEIGHT: f64 = 1.0 - EDIT_WEIGHT;

/// Approximate substring distance in `[0, 1]` between a query and a key.
///
/// Both inputs are compared as given; callers lowercase them first. `0.0` means the key
/// equals the query. The edit part is the smallest Levenshtein distance between the query
/// and any window of the key of roughly the query's length, divided by the query length.
#[must_use]
pub fn normalized_distance(query: &str, key: &str) -> f64 {
    let query_chars: Vec<char> = query.chars().collect();
    let key_chars: Vec<char> = key.chars().collect();
    distance_chars(&query_chars, &key_chars)
}

pub(crate) fn distance_chars(query: &[char], key: &[char]) -> f64 {
    if query.is_empty() || key.is_empty() {
        return 1.0;
    }

    let edits = best_window_edits(query, key);
    let edit_ratio = (edits as f64 / query.len() as f64).min(1.0);

    let (short, long) = if query.len() <= key.len() {
        (query.len(), key.len())
    } else {
        (key.len(), query.len())
    };
    let length_ratio = 1.0 - short as f64 / long as f64;

    EDIT_WEIGHT.mul_add(edit_ratio, LENGTH_WEIGHT * length_ratio)
}

fn best_window_edits(query: &[char], key: &[char]) -> usize {
    let query_str: String = query.iter().collect();
    if key.len() < query.len() {
        let key_str: String = key.iter().collect();
        return strsim::levenshtein(&query_str, &key_str);
    }

    let min_width = query.len().saturating_sub(1).max(1);
    let max_width = query.len() + 1;
    let mut best = usize::MAX;
    for width in min_width..=max_width {
        for window in key.windows(width) {
            let window_str: String = window.iter().collect();
            best = best.min(strsim::levenshtein(&query_str, &window_str));
            if best == 0 {
                return 0;
            }
        }
    }
    best
}
