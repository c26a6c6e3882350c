//! Classifier (§4.1, classify half).
//!
//! Produces a {complexity, intent, keywords, confidence} tuple.
//! Deterministic, infallible: an empty query always maps to {low, general}
//! (§4.1 "Failure semantics").

use crate::atoms::constants::{COMPLEXITY_HIGH_FLOOR, COMPLEXITY_LOW_CEILING, HIGH_COMPLEXITY_WEIGHT, WORD_COUNT_DIVISOR};
use crate::atoms::types::{Classification, Complexity, Intent};

const SECURITY_VOCAB: &[&str] = &[
    "auth", "authentication", "authorization", "encrypt", "decrypt", "vulnerability",
    "exploit", "injection", "xss", "csrf", "credential", "secret", "token", "cve",
    "penetration", "firewall", "tls", "ssl", "sandbox",
];

const DATABASE_VOCAB: &[&str] = &[
    "sql", "query", "schema", "migration", "index", "transaction", "table", "postgres",
    "mysql", "sqlite", "database", "orm", "join", "foreign key", "constraint",
];

const DEVELOPMENT_VOCAB: &[&str] = &[
    "function", "bug", "compile", "implement", "debug", "test", "api", "class",
    "variable", "unit test", "stack trace", "exception", "parse", "library", "module",
];

const PLANNING_VOCAB: &[&str] = &[
    "roadmap", "plan", "timeline", "milestone", "strategy", "priorit", "estimate",
    "schedule", "scope", "requirement", "proposal",
];

/// Short high-complexity vocabulary (§4.1).
const HIGH_COMPLEXITY_VOCAB: &[&str] =
    &["migrate", "refactor", "architecture", "redesign", "end-to-end"];

struct VocabHit {
    intent: Intent,
    count: usize,
    matches: Vec<String>,
}

/// Deterministic scan over a Query's text; never fails. Uses the default
/// bucket thresholds — callers with a loaded `GatewayConfig` should prefer
/// [`classify_with_thresholds`] so `router.haiku_threshold`/
/// `router.premium_threshold` are honored.
pub fn classify(content: &str) -> Classification {
    classify_with_thresholds(content, COMPLEXITY_LOW_CEILING, COMPLEXITY_HIGH_FLOOR)
}

/// Deterministic scan over a Query's text, parameterized by the low/high
/// complexity bucket boundaries (§6 `router.haiku_threshold` /
/// `router.premium_threshold`).
pub fn classify_with_thresholds(content: &str, low_ceiling: f64, high_floor: f64) -> Classification {
    let lower = content.to_lowercase();
    let word_count = lower.split_whitespace().count();

    let vocabs: [(Intent, &[&str]); 4] = [
        (Intent::Security, SECURITY_VOCAB),
        (Intent::Database, DATABASE_VOCAB),
        (Intent::Development, DEVELOPMENT_VOCAB),
        (Intent::Planning, PLANNING_VOCAB),
    ];

    let hits: Vec<VocabHit> = vocabs
        .iter()
        .map(|(intent, vocab)| {
            let matches: Vec<String> =
                vocab.iter().filter(|kw| lower.contains(*kw)).map(|kw| kw.to_string()).collect();
            VocabHit { intent: *intent, count: matches.len(), matches }
        })
        .collect();

    let high_matches: Vec<String> =
        HIGH_COMPLEXITY_VOCAB.iter().filter(|kw| lower.contains(*kw)).map(|kw| kw.to_string()).collect();

    // Intent: vocabulary with the highest non-zero count, ties broken by
    // fixed priority order (security > database > development > planning).
    // `hits` is already in that priority order; keep the first strict max
    // rather than `Iterator::max_by_key` (which keeps the *last* tie).
    let mut best: Option<&VocabHit> = None;
    for hit in hits.iter().filter(|h| h.count > 0) {
        if best.map_or(true, |b| hit.count > b.count) {
            best = Some(hit);
        }
    }
    let (intent, mut matched_keywords) =
        best.map(|h| (h.intent, h.matches.clone())).unwrap_or((Intent::General, Vec::new()));

    matched_keywords.extend(high_matches.iter().cloned());

    let score = (high_matches.len() as f64) * HIGH_COMPLEXITY_WEIGHT
        + (word_count as f64) / WORD_COUNT_DIVISOR;
    let score = score.clamp(0.0, 1.0);

    let complexity = if score < low_ceiling {
        Complexity::Low
    } else if score >= high_floor {
        Complexity::High
    } else {
        Complexity::Medium
    };

    let total_matches: usize = hits.iter().map(|h| h.count).sum::<usize>() + high_matches.len();
    let max_count = hits.iter().map(|h| h.count).max().unwrap_or(0).max(high_matches.len());
    let confidence = (max_count as f64 / (total_matches as f64 + 1.0)).clamp(0.0, 1.0);

    Classification { complexity, intent, matched_keywords, confidence }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_is_low_general() {
        let c = classify("");
        assert_eq!(c.complexity, Complexity::Low);
        assert_eq!(c.intent, Intent::General);
    }

    #[test]
    fn classification_is_pure() {
        let q = "please refactor the authentication module";
        assert_eq!(classify(q).complexity, classify(q).complexity);
        assert_eq!(classify(q).intent, classify(q).intent);
    }

    #[test]
    fn security_keywords_drive_security_intent() {
        let c = classify("can you review this authentication and encryption flow for vulnerabilities");
        assert_eq!(c.intent, Intent::Security);
    }

    #[test]
    fn high_complexity_vocab_pushes_toward_high() {
        let long_text = "word ".repeat(40);
        let c = classify(&format!("{long_text} please refactor and redesign the architecture end-to-end"));
        assert_eq!(c.complexity, Complexity::High);
    }

    #[test]
    fn short_plain_query_is_low() {
        let c = classify("hello");
        assert_eq!(c.complexity, Complexity::Low);
    }

    #[test]
    fn database_beats_development_on_tie_priority() {
        // one hit each: "sql" (database) and "bug" (development) — database wins by priority.
        let c = classify("sql bug");
        assert_eq!(c.intent, Intent::Database);
    }
}
