//! Keyword extraction and the fixed topic / intent lookup tables used to
//! annotate archived turns and queries.

use crate::types::Role;
use std::collections::HashSet;

/// Upper bound on keywords recorded per text.
pub const MAX_KEYWORDS: usize = 20;

/// Tokens of three characters or fewer never become keywords, so only longer
/// stop words need listing.
const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "also", "because", "been", "before", "being", "below",
    "between", "both", "could", "does", "doing", "done", "down", "during", "each", "even",
    "every", "from", "further", "going", "have", "having", "here", "into", "just", "like",
    "lets", "make", "many", "more", "most", "much", "must", "only", "other", "ours", "over",
    "please", "really", "same", "should", "some", "such", "sure", "than", "thank", "thanks",
    "that", "thats", "their", "theirs", "them", "then", "there", "these", "they", "this",
    "those", "through", "under", "until", "very", "want", "well", "were", "what", "when",
    "where", "which", "while", "will", "with", "would", "yeah", "your", "yours",
];

const TOPICS: &[(&str, &[&str])] = &[
    (
        "database",
        &[
            "database", "databases", "postgres", "postgresql", "sqlite", "mysql", "sql",
            "schema", "query", "queries", "migration", "migrations", "table", "tables",
        ],
    ),
    (
        "testing",
        &["test", "tests", "testing", "assert", "coverage", "fixture", "fixtures", "pytest"],
    ),
    (
        "architecture",
        &[
            "architecture", "design", "pattern", "patterns", "module", "modules", "layer",
            "layers", "interface", "refactor", "structure",
        ],
    ),
    (
        "performance",
        &[
            "performance", "latency", "throughput", "slow", "optimize", "optimization",
            "cache", "caching", "benchmark", "profiling",
        ],
    ),
    (
        "debugging",
        &[
            "bug", "bugs", "error", "errors", "crash", "debug", "traceback", "exception",
            "broken", "failing", "panic",
        ],
    ),
    (
        "deployment",
        &[
            "deploy", "deployment", "docker", "kubernetes", "release", "production", "pipeline",
            "ci",
        ],
    ),
    (
        "security",
        &[
            "security", "auth", "authentication", "password", "encrypt", "encryption",
            "permission", "permissions", "secret", "secrets",
        ],
    ),
    (
        "api",
        &["api", "endpoint", "endpoints", "http", "rest", "graphql", "grpc", "webhook"],
    ),
    (
        "frontend",
        &["frontend", "react", "css", "html", "layout", "button", "component", "components"],
    ),
    (
        "data",
        &["json", "jsonl", "csv", "parse", "parser", "serialize", "serialization", "format"],
    ),
];

const CORRECTION_OPENERS: &[&str] = &[
    "no",
    "nope",
    "nah",
    "actually",
    "wait",
    "not quite",
    "that's wrong",
    "that's not",
    "that is wrong",
    "that is not",
    "wrong",
    "incorrect",
    "instead",
    "hold on",
    "stop",
];

const USER_REQUEST_PHRASES: &[&str] = &[
    "please", "can you", "could you", "would you", "i want", "i need", "i'd like",
];
const DECISION_PHRASES: &[&str] = &[
    "let's", "let us", "we'll", "we will", "decided", "go with", "switch to", "i'll", "i will",
    "going to",
];
const EXPLANATION_PHRASES: &[&str] = &[
    "because", "this means", "the reason", "in other words", "that's why", "which means",
];
const TASK_PHRASES: &[&str] = &[
    "next step", "todo", "to do", "follow-up", "follow up", "we should", "you should",
];
const QUESTION_OPENERS: &[&str] = &[
    "how", "what", "why", "when", "where", "who", "which", "is", "are", "does",
];

/// Lower-case and split on anything that is not alphanumeric. Apostrophes
/// are dropped first so contractions stay one token (`let's` -> `lets`).
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = normalize_quotes(&text.to_lowercase()).replace('\'', "");
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keywords of `text`: tokens longer than three characters that are not
/// stop words, deduplicated in first-occurrence order, at most
/// [`MAX_KEYWORDS`].
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for token in tokenize(text) {
        if token.chars().count() <= 3 || STOP_WORDS.contains(&token.as_str()) {
            continue;
        }
        if seen.insert(token.clone()) {
            out.push(token);
            if out.len() >= MAX_KEYWORDS {
                break;
            }
        }
    }
    out
}

/// Topic labels whose keyword list intersects the tokens of `text`, in table
/// order.
pub fn classify_topics(text: &str) -> Vec<String> {
    let tokens: HashSet<String> = tokenize(text).into_iter().collect();
    TOPICS
        .iter()
        .filter(|(_, words)| words.iter().any(|w| tokens.contains(*w)))
        .map(|(topic, _)| (*topic).to_string())
        .collect()
}

/// Role-conditioned intent tags. Every turn gets at least one tag;
/// `statement` is the fallback.
pub fn classify_intents(role: Role, text: &str) -> Vec<String> {
    let lower = normalize_quotes(&text.to_lowercase());
    let mut tags: Vec<&str> = Vec::new();
    match role {
        Role::User => {
            if lower.contains('?') || starts_with_word(&lower, QUESTION_OPENERS) {
                tags.push("question");
            }
            if starts_with_correction(text) {
                tags.push("correction");
            }
            if contains_any(&lower, USER_REQUEST_PHRASES) {
                tags.push("request");
            }
            if contains_any(&lower, DECISION_PHRASES) {
                tags.push("decision");
            }
        }
        Role::Assistant => {
            if lower.contains("```") || lower.contains("def ") || lower.contains("class ")
                || lower.contains("fn ")
            {
                tags.push("code");
            }
            if contains_any(&lower, EXPLANATION_PHRASES) {
                tags.push("explanation");
            }
            if contains_any(&lower, DECISION_PHRASES) {
                tags.push("decision");
            }
            if contains_any(&lower, TASK_PHRASES) {
                tags.push("task");
            }
        }
        Role::System => {}
    }
    if tags.is_empty() {
        tags.push("statement");
    }
    tags.into_iter().map(str::to_string).collect()
}

/// True when `text` opens with a negation or correction phrase such as
/// "No," or "Actually".
pub fn starts_with_correction(text: &str) -> bool {
    let lower = normalize_quotes(&text.trim_start().to_lowercase());
    starts_with_word(&lower, CORRECTION_OPENERS)
}

fn starts_with_word(lower: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| {
        lower.strip_prefix(p).is_some_and(|rest| {
            rest.chars()
                .next()
                .is_none_or(|c| !c.is_alphanumeric() && c != '\'')
        })
    })
}

fn contains_any(lower: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| lower.contains(p))
}

fn normalize_quotes(s: &str) -> String {
    s.replace(['\u{2018}', '\u{2019}'], "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keywords_drop_short_and_stop_words_in_first_occurrence_order() {
        let kws = extract_keywords("No, actually let's use Postgres instead of SQLite. Postgres!");
        assert_eq!(kws, vec!["actually", "postgres", "instead", "sqlite"]);
    }

    #[test]
    fn keywords_are_capped() {
        let text = (0..40)
            .map(|i| format!("word{i:02}"))
            .collect::<Vec<_>>()
            .join(" ");
        let kws = extract_keywords(&text);
        assert_eq!(kws.len(), MAX_KEYWORDS);
        assert_eq!(kws[0], "word00");
        assert_eq!(kws[19], "word19");
    }

    #[test]
    fn topics_follow_table_order() {
        assert_eq!(
            classify_topics("Failing test after the postgres migration"),
            vec!["database", "testing", "debugging"]
        );
        assert!(classify_topics("hello there").is_empty());
    }

    #[test]
    fn user_intents() {
        assert_eq!(classify_intents(Role::User, "Is this thread safe?"), vec!["question"]);
        assert_eq!(
            classify_intents(Role::User, "No, actually let's use Postgres"),
            vec!["correction", "decision"]
        );
        assert_eq!(classify_intents(Role::User, "ok"), vec!["statement"]);
    }

    #[test]
    fn assistant_intents() {
        let tags = classify_intents(Role::Assistant, "```rust\nfn main() {}\n```");
        assert!(tags.contains(&"code".to_string()));
        let tags = classify_intents(Role::Assistant, "I'll split it because the file is big.");
        assert_eq!(tags, vec!["explanation", "decision"]);
    }

    #[test]
    fn correction_requires_word_boundary() {
        assert!(starts_with_correction("No, that breaks the build"));
        assert!(starts_with_correction("  Actually we need both"));
        assert!(starts_with_correction("That\u{2019}s wrong"));
        assert!(!starts_with_correction("Now add the tests"));
        assert!(!starts_with_correction("Nobody uses that"));
        assert!(!starts_with_correction("Great, no issues"));
    }
}
