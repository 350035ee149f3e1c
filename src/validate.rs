//! Input normalization for operation types and statuses.
//!
//! Three-tier resolution: exact match → synonym lookup → error with
//! suggestion. Used by the CLI so `oq enqueue photo ...` and
//! `oq list --status done` work.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

// ── Valid value sets (O(1) lookups) ──────────────────────────

pub static VALID_STATUSES: LazyLock<HashSet<&str>> = LazyLock::new(|| {
    ["pending", "syncing", "completed", "failed"]
        .into_iter()
        .collect()
});

pub static VALID_TYPES: LazyLock<HashSet<&str>> = LazyLock::new(|| {
    [
        "photo-capture",
        "voice-capture",
        "text-capture",
        "quick-action",
        "voice-note",
        "property-share",
        "check-in",
        "content-create",
        "content-update",
        "content-delete",
    ]
    .into_iter()
    .collect()
});

// ── Synonym maps ─────────────────────────────────────────────

pub static STATUS_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("queued", "pending"),
        ("waiting", "pending"),
        ("new", "pending"),
        ("in_flight", "syncing"),
        ("running", "syncing"),
        ("done", "completed"),
        ("complete", "completed"),
        ("synced", "completed"),
        ("error", "failed"),
        ("failure", "failed"),
        ("dead", "failed"),
    ]
    .into_iter()
    .collect()
});

pub static TYPE_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("photo", "photo-capture"),
        ("picture", "photo-capture"),
        ("voice", "voice-capture"),
        ("audio", "voice-capture"),
        ("text", "text-capture"),
        ("note", "text-capture"),
        ("action", "quick-action"),
        ("memo", "voice-note"),
        ("share", "property-share"),
        ("checkin", "check-in"),
        ("visit", "check-in"),
        ("create", "content-create"),
        ("update", "content-update"),
        ("edit", "content-update"),
        ("delete", "content-delete"),
        ("remove", "content-delete"),
    ]
    .into_iter()
    .collect()
});

/// Normalize a status string via exact match or synonym lookup.
///
/// Returns the canonical status, or an error with the original input
/// and an optional suggestion.
pub fn normalize_status(input: &str) -> Result<String, (String, Option<String>)> {
    normalize(input, &VALID_STATUSES, &STATUS_SYNONYMS)
}

/// Normalize an operation type string via exact match or synonym lookup.
///
/// Underscores are accepted in place of dashes (`content_create`).
pub fn normalize_type(input: &str) -> Result<String, (String, Option<String>)> {
    let dashed = input.replace('_', "-");
    normalize(&dashed, &VALID_TYPES, &TYPE_SYNONYMS).map_err(|(_, s)| (input.to_string(), s))
}

fn normalize(
    input: &str,
    valid: &HashSet<&str>,
    synonyms: &HashMap<&str, &str>,
) -> Result<String, (String, Option<String>)> {
    let lower = input.trim().to_lowercase();

    // Tier 1: exact match
    if valid.contains(lower.as_str()) {
        return Ok(lower);
    }

    // Tier 2: synonym lookup
    if let Some(&canonical) = synonyms.get(lower.as_str()) {
        return Ok(canonical.to_string());
    }

    // Tier 3: find closest suggestion
    let suggestion = find_closest_match(&lower, valid, synonyms);
    Err((input.to_string(), suggestion))
}

/// Find the closest matching value across valid set and synonyms.
///
/// Ties resolve alphabetically so suggestions are stable.
fn find_closest_match(
    input: &str,
    valid: &HashSet<&str>,
    synonyms: &HashMap<&str, &str>,
) -> Option<String> {
    let mut candidates: Vec<(usize, &str)> = valid
        .iter()
        .chain(synonyms.keys())
        .map(|&v| {
            let canonical = synonyms.get(v).copied().unwrap_or(v);
            (levenshtein_distance(input, v), canonical)
        })
        .filter(|(dist, _)| *dist <= 3)
        .collect();

    candidates.sort_unstable();
    candidates.first().map(|(_, v)| (*v).to_string())
}

// ── Levenshtein distance ─────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let a_len = a.len();
    let b_len = b.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    // Single-row optimization (O(min(m,n)) space)
    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for i in 1..=a_len {
        curr[0] = i;
        for j in 1..=b_len {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1) // deletion
                .min(curr[j - 1] + 1) // insertion
                .min(prev[j - 1] + cost); // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_status() {
        assert_eq!(normalize_status("pending"), Ok("pending".to_string()));
        assert_eq!(normalize_status("done"), Ok("completed".to_string()));
        assert_eq!(normalize_status("queued"), Ok("pending".to_string()));
        assert_eq!(normalize_status("FAILED"), Ok("failed".to_string()));
        assert!(normalize_status("nonsense").is_err());
    }

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("check-in"), Ok("check-in".to_string()));
        assert_eq!(normalize_type("content_create"), Ok("content-create".to_string()));
        assert_eq!(normalize_type("photo"), Ok("photo-capture".to_string()));
        assert_eq!(normalize_type("Share"), Ok("property-share".to_string()));
        assert!(normalize_type("teleport").is_err());
    }

    #[test]
    fn test_suggestion_for_typo() {
        let (input, suggestion) = normalize_type("voice-nte").unwrap_err();
        assert_eq!(input, "voice-nte");
        assert_eq!(suggestion, Some("voice-note".to_string()));
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("abc", "abd"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }
}
