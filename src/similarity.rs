//! Text and tag similarity for the conflict scan and the propagation targeter.

use std::collections::HashSet;

use crate::models::{round2, ConflictType, Learning, PropagationDestination};

/// Word overlap at which two learnings without opposing wording are
/// considered to cover the same ground.
pub const SCOPE_OVERLAP_SIMILARITY: f64 = 0.7;

const OPPOSITION_PAIRS: &[(&str, &str)] = &[
    ("always", "never"),
    ("prefer", "avoid"),
    ("should", "shouldn't"),
    ("must", "mustn't"),
    ("enable", "disable"),
    ("include", "exclude"),
    ("allow", "forbid"),
    ("sync", "async"),
    ("before", "after"),
    ("increase", "decrease"),
    ("use", "avoid"),
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "don't", "doesn't", "shouldn't", "mustn't", "can't", "won't", "isn't",
    "aren't",
];

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do",
    "does", "did", "it", "its", "of", "in", "to", "for", "on", "at", "by", "with", "from",
    "this", "that", "and", "or", "but", "we", "our",
];

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

fn content_words(text: &str) -> HashSet<String> {
    words(text)
        .into_iter()
        .filter(|w| !STOP_WORDS.contains(&w.as_str()) && !NEGATIONS.contains(&w.as_str()))
        .collect()
}

pub fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Jaccard similarity of the content words of two texts.
pub fn word_overlap(a: &str, b: &str) -> f64 {
    jaccard(&content_words(a), &content_words(b))
}

fn has_opposition(a: &HashSet<String>, b: &HashSet<String>) -> bool {
    OPPOSITION_PAIRS.iter().any(|(x, y)| {
        (a.contains(*x) && b.contains(*y)) || (a.contains(*y) && b.contains(*x))
    })
}

fn is_negated(words: &HashSet<String>) -> bool {
    NEGATIONS.iter().any(|n| words.contains(*n))
}

fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Classify a pair of active learnings of the same category.
///
/// Returns the conflict type and a description, or `None` when the pair
/// looks independent. Opposing wording only counts once the texts are about
/// the same thing (`min_similarity`).
pub fn classify_pair(
    a: &Learning,
    b: &Learning,
    min_similarity: f64,
) -> Option<(ConflictType, String)> {
    if normalize_title(&a.title) == normalize_title(&b.title) {
        return Some((
            ConflictType::VersionDrift,
            format!(
                "separate chains share the title '{}' (iterations {} and {})",
                a.title, a.iteration, b.iteration
            ),
        ));
    }

    let overlap = word_overlap(&a.content, &b.content);
    if overlap < min_similarity {
        return None;
    }

    let words_a = words(&a.content);
    let words_b = words(&b.content);
    if has_opposition(&words_a, &words_b) || is_negated(&words_a) != is_negated(&words_b) {
        return Some((
            ConflictType::Contradiction,
            format!(
                "'{}' and '{}' give opposing guidance ({:.0}% word overlap)",
                a.title,
                b.title,
                overlap * 100.0
            ),
        ));
    }

    if overlap >= SCOPE_OVERLAP_SIMILARITY {
        return Some((
            ConflictType::ScopeOverlap,
            format!(
                "'{}' and '{}' cover the same ground ({:.0}% word overlap)",
                a.title,
                b.title,
                overlap * 100.0
            ),
        ));
    }

    None
}

/// Relevance of a destination for a learning, 0.00 to 1.00.
///
/// Half the weight is tag overlap, 0.3 goes to a destination owned by the
/// agent that reported the learning and 0.2 to a destination that accepts the
/// learning's category.
pub fn relevance(learning: &Learning, destination: &PropagationDestination) -> f64 {
    let learning_tags: HashSet<String> = learning.tags.iter().map(|t| t.to_lowercase()).collect();
    let destination_tags: HashSet<String> =
        destination.tags.iter().map(|t| t.to_lowercase()).collect();
    let tag_score = jaccard(&learning_tags, &destination_tags);

    let agent_score = match (&learning.source_agent, &destination.agent) {
        (Some(a), Some(b)) if a.trim().eq_ignore_ascii_case(b.trim()) => 1.0,
        _ => 0.0,
    };

    let category_score = if destination.categories.contains(&learning.category) {
        1.0
    } else {
        0.0
    };

    round2(0.5 * tag_score + 0.3 * agent_score + 0.2 * category_score)
}
