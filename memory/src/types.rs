use serde::Deserialize;
use serde::Serialize;

/// Author of a conversational turn.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Lenient mapping used when parsing loosely shaped transcripts.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Role::User,
            "assistant" | "ai" | "model" => Role::Assistant,
            _ => Role::System,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One input message as handed to the extractor or the retrieval store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>, // RFC3339
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Decision {
    pub description: String,
    pub reasoning: String,
    pub importance: f64,
    pub source_excerpt: String,
    pub turn_index: usize,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreakthroughKind {
    /// The user opened a turn by correcting the assistant.
    UserCorrection,
    /// A turn contained an explicit insight phrase.
    InsightPhrase,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Breakthrough {
    pub trigger: String,
    pub insight: String,
    pub importance: f64,
    pub kind: BreakthroughKind,
    pub turn_index: usize,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationStyle {
    #[default]
    Terse,
    Direct,
    Detailed,
}

impl CommunicationStyle {
    /// Classify from the mean user message length in characters.
    pub fn from_mean_length(mean: f64) -> Self {
        if mean < 50.0 {
            CommunicationStyle::Terse
        } else if mean < 200.0 {
            CommunicationStyle::Direct
        } else {
            CommunicationStyle::Detailed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationStyle::Terse => "terse",
            CommunicationStyle::Direct => "direct",
            CommunicationStyle::Detailed => "detailed",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UserIntent {
    pub goals: Vec<String>,
    pub communication_style: CommunicationStyle,
    pub priorities: Vec<String>,
    pub mean_message_length: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TechnicalContext {
    pub files_changed: Vec<String>,
    pub architecture_decisions: Vec<String>,
    pub technologies: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Done,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Task {
    pub description: String,
    pub priority: f64,
    pub status: TaskStatus,
    pub source_excerpt: String,
}

/// Everything preserved about one session.
///
/// `integrity_hash` covers every other field; see [`crate::integrity`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionMemory {
    pub session_id: String,
    pub timestamp: String, // RFC3339
    pub decisions: Vec<Decision>,
    pub breakthroughs: Vec<Breakthrough>,
    pub user_intent: UserIntent,
    pub technical_context: TechnicalContext,
    pub tasks: Vec<Task>,
    pub previous_session_id: Option<String>,
    pub context_utilization: f64,
    pub conversation_summary: String,
    pub character_plate_version: String,
    pub warnings: Vec<String>,
    pub successor_priorities: Vec<String>,
    pub integrity_hash: String,
}

pub const CHARACTER_PLATE_VERSION: &str = "1.0";

/// One archived message in the retrieval log. Never rewritten once appended.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub turn_id: String,
    pub session_id: String,
    pub position: usize,
    pub timestamp: String, // RFC3339
    pub role: Role,
    pub content: String,
    pub token_estimate: usize,
    pub keywords: Vec<String>,
    pub topics: Vec<String>,
    pub intent_tags: Vec<String>,
    pub responds_to: Option<String>,
}

impl ConversationTurn {
    pub fn make_id(session_id: &str, position: usize) -> String {
        format!("{session_id}:{position}")
    }
}

/// Rough token count used wherever no tokenizer is available.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
