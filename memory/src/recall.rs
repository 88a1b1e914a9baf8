use crate::keywords;
use crate::types::ConversationTurn;
use serde::Serialize;
use std::collections::HashSet;

pub const KEYWORD_WEIGHT: f64 = 0.6;
pub const TOPIC_WEIGHT: f64 = 0.3;
pub const INTENT_WEIGHT: f64 = 0.1;
/// Candidates scoring at or below this are dropped.
pub const MIN_RELEVANCE: f64 = 0.3;
pub const CONTEXT_TURNS: usize = 2;
pub const DEFAULT_MAX_RESULTS: usize = 5;

/// What kind of turn a query is looking for. Everything but `General`
/// corresponds to an intent tag on archived turns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    #[default]
    General,
    Decision,
    Question,
    Code,
    Correction,
    Task,
    Explanation,
}

impl QueryType {
    pub fn intent_tag(&self) -> Option<&'static str> {
        match self {
            QueryType::General => None,
            QueryType::Decision => Some("decision"),
            QueryType::Question => Some("question"),
            QueryType::Code => Some("code"),
            QueryType::Correction => Some("correction"),
            QueryType::Task => Some("task"),
            QueryType::Explanation => Some("explanation"),
        }
    }

    /// Guess the query type from its wording.
    pub fn infer(text: &str) -> Self {
        let tokens: HashSet<String> = keywords::tokenize(text).into_iter().collect();
        let has = |words: &[&str]| words.iter().any(|w| tokens.contains(*w));
        if has(&[
            "why", "decide", "decided", "decision", "choose", "chose", "chosen", "switch",
            "switched", "pick", "picked",
        ]) {
            QueryType::Decision
        } else if has(&["wrong", "mistake", "correct", "corrected", "correction"]) {
            QueryType::Correction
        } else if has(&[
            "code", "function", "implement", "implemented", "implementation", "snippet", "class",
        ]) {
            QueryType::Code
        } else if has(&["todo", "next", "task", "tasks", "remaining", "pending"]) {
            QueryType::Task
        } else if has(&["how", "explain", "explained", "explanation"]) {
            QueryType::Explanation
        } else if has(&["asked", "question", "questions"]) {
            QueryType::Question
        } else {
            QueryType::General
        }
    }
}

impl std::str::FromStr for QueryType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "general" | "any" => QueryType::General,
            "decision" | "decisions" => QueryType::Decision,
            "question" | "questions" => QueryType::Question,
            "code" => QueryType::Code,
            "correction" | "corrections" => QueryType::Correction,
            "task" | "tasks" => QueryType::Task,
            "explanation" | "explanations" => QueryType::Explanation,
            other => anyhow::bail!("unknown query type: {other}"),
        })
    }
}

#[derive(Clone, Debug)]
pub struct Query {
    pub text: String,
    pub query_type: QueryType,
    pub session_id: Option<String>,
    /// Only consider turns carrying this intent tag.
    pub intent_filter: Option<String>,
    pub max_results: usize,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            query_type: QueryType::General,
            session_id: None,
            intent_filter: None,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    /// A query whose type is inferred from its wording.
    pub fn natural(text: impl Into<String>) -> Self {
        let text = text.into();
        let query_type = QueryType::infer(&text);
        Self {
            query_type,
            ..Self::new(text)
        }
    }
}

/// Why a turn matched, and how well.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Relevance {
    pub score: f64,
    pub matched_keywords: Vec<String>,
    pub matched_topics: Vec<String>,
    pub matched_intent: Option<String>,
}

impl Relevance {
    pub fn explain(&self) -> String {
        let mut parts = Vec::new();
        if !self.matched_keywords.is_empty() {
            parts.push(format!("matched keywords: {}", self.matched_keywords.join(", ")));
        }
        if !self.matched_topics.is_empty() {
            parts.push(format!("shared topics: {}", self.matched_topics.join(", ")));
        }
        if let Some(intent) = &self.matched_intent {
            parts.push(format!("tagged as {intent}"));
        }
        if parts.is_empty() {
            return "no direct overlap".to_string();
        }
        parts.join("; ")
    }
}

/// `0.6 * keyword overlap + 0.3 * topic overlap + 0.1 * intent match`, with
/// overlaps measured as the fraction of the query's keywords and topics
/// found on the turn.
pub fn score_turn(
    query_keywords: &[String],
    query_topics: &[String],
    intent: Option<&str>,
    turn: &ConversationTurn,
) -> Relevance {
    let matched_keywords: Vec<String> = query_keywords
        .iter()
        .filter(|k| turn.keywords.contains(k))
        .cloned()
        .collect();
    let matched_topics: Vec<String> = query_topics
        .iter()
        .filter(|t| turn.topics.contains(t))
        .cloned()
        .collect();
    let matched_intent = intent
        .filter(|tag| turn.intent_tags.iter().any(|t| t.as_str() == *tag))
        .map(str::to_string);

    let mut score = KEYWORD_WEIGHT * fraction(matched_keywords.len(), query_keywords.len())
        + TOPIC_WEIGHT * fraction(matched_topics.len(), query_topics.len());
    if matched_intent.is_some() {
        score += INTENT_WEIGHT;
    }
    Relevance {
        score,
        matched_keywords,
        matched_topics,
        matched_intent,
    }
}

fn fraction(hit: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hit as f64 / total as f64
    }
}

/// A turn with its neighbours in the session timeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ContextWindow {
    pub before: Vec<ConversationTurn>,
    pub after: Vec<ConversationTurn>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryResult {
    pub turn: ConversationTurn,
    pub relevance: Relevance,
    pub context: ContextWindow,
    pub why_relevant: String,
}
